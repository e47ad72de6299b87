//! Keyword commands recognised in any state.

use once_cell::sync::Lazy;
use regex::Regex;

/// `help`, `/menu`, `/start@docbot`, `DONE`.
static COMMAND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/?([A-Za-z]+)(?:@\S+)?$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `menu`, `start` or `help`.
    Menu,
    Cancel,
    Clear,
    Done,
}

impl Command {
    /// Parse a whole message as a command; anything else is `None`.
    pub fn parse(text: &str) -> Option<Command> {
        let caps = COMMAND_RE.captures(text.trim())?;
        match caps[1].to_ascii_lowercase().as_str() {
            "menu" | "start" | "help" => Some(Command::Menu),
            "cancel" => Some(Command::Cancel),
            "clear" => Some(Command::Clear),
            "done" => Some(Command::Done),
            _ => None,
        }
    }
}
