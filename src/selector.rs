//! Page selector parsing: turn `"1-3,5,8-"` into a normalised page set.
//!
//! Every page-scoped operation (split, extract, remove, rotate) goes through
//! [`parse`] so edge cases behave identically at every call site:
//!
//! | Token | Meaning |
//! |-------|---------|
//! | `n`   | page `n`, if `1 ≤ n ≤ total` |
//! | `a-b` | pages `a..=b` clipped to `1..=total` |
//! | `-b`  | `a` omitted (or non-numeric) → starts at 1 |
//! | `a-`  | `b` omitted → runs to the last page |
//!
//! The literal `all` is a caller-level shortcut handled by [`resolve`], not
//! by [`parse`]. An empty result is an error, never an empty success.

use crate::error::SelectorError;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// Reserved selector meaning "every page".
pub const ALL: &str = "all";

/// A non-empty, ascending, deduplicated set of 1-indexed page numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSet(BTreeSet<usize>);

impl PageSet {
    /// Every page of a `total`-page document.
    pub fn full(total: usize) -> Result<Self, SelectorError> {
        if total == 0 {
            return Err(SelectorError::Empty {
                selector: ALL.to_string(),
                total,
            });
        }
        Ok(PageSet((1..=total).collect()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, page: usize) -> bool {
        self.0.contains(&page)
    }

    /// Pages in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.0.iter().copied().collect()
    }

    /// Pages of `1..=total` not in this set.
    pub fn complement(&self, total: usize) -> Result<PageSet, SelectorError> {
        let rest: BTreeSet<usize> = (1..=total).filter(|p| !self.0.contains(p)).collect();
        if rest.is_empty() {
            return Err(SelectorError::NothingLeft {
                selector: self.to_selector_string(),
                total,
            });
        }
        Ok(PageSet(rest))
    }

    /// Canonical selector text: ascending, consecutive runs collapsed.
    ///
    /// `parse(&set.to_selector_string(), total)` yields `set` again.
    pub fn to_selector_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut pages = self.0.iter().copied().peekable();

        while let Some(start) = pages.next() {
            let mut end = start;
            while pages.peek() == Some(&(end + 1)) {
                end += 1;
                pages.next();
            }
            if start == end {
                parts.push(start.to_string());
            } else {
                parts.push(format!("{start}-{end}"));
            }
        }

        parts.join(",")
    }
}

impl fmt::Display for PageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_selector_string())
    }
}

impl Serialize for PageSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

/// Parse a selector against a document of `total` pages.
pub fn parse(selector: &str, total: usize) -> Result<PageSet, SelectorError> {
    let mut pages = BTreeSet::new();

    for token in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.split_once('-') {
            Some((start, end)) => {
                let start = start.trim().parse::<usize>().unwrap_or(1).max(1);
                let end = match end.trim() {
                    "" => total,
                    raw => raw.parse::<usize>().map_err(|_| SelectorError::Unparseable {
                        token: token.to_string(),
                    })?,
                };
                let end = end.min(total);
                if start <= end {
                    pages.extend(start..=end);
                }
            }
            None => {
                let page = token
                    .parse::<usize>()
                    .map_err(|_| SelectorError::Unparseable {
                        token: token.to_string(),
                    })?;
                if (1..=total).contains(&page) {
                    pages.insert(page);
                }
            }
        }
    }

    if pages.is_empty() {
        return Err(SelectorError::Empty {
            selector: selector.trim().to_string(),
            total,
        });
    }
    Ok(PageSet(pages))
}

/// Parse a user answer, honouring the `all` shortcut.
pub fn resolve(selector: &str, total: usize) -> Result<PageSet, SelectorError> {
    if is_all(selector) {
        return PageSet::full(total);
    }
    parse(selector, total)
}

/// Pages that survive removing `selector` from a `total`-page document.
pub fn remove_pages(selector: &str, total: usize) -> Result<PageSet, SelectorError> {
    let removed = resolve(selector, total)?;
    removed.complement(total).map_err(|_| SelectorError::NothingLeft {
        selector: selector.trim().to_string(),
        total,
    })
}

/// Grammar-only check used while the page count is still unknown.
pub fn check_syntax(selector: &str) -> Result<(), SelectorError> {
    if is_all(selector) {
        return Ok(());
    }
    let tokens: Vec<&str> = selector
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return Err(SelectorError::Unparseable {
            token: selector.trim().to_string(),
        });
    }
    for token in tokens {
        let valid = match token.split_once('-') {
            Some((_, end)) => end.trim().is_empty() || end.trim().parse::<usize>().is_ok(),
            None => token.parse::<usize>().is_ok(),
        };
        if !valid {
            return Err(SelectorError::Unparseable {
                token: token.to_string(),
            });
        }
    }
    Ok(())
}

fn is_all(selector: &str) -> bool {
    selector.trim().eq_ignore_ascii_case(ALL)
}
