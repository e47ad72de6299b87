//! A line-oriented channel over stdin/stdout.
//!
//! Input lines:
//!
//! | Line | Event |
//! |------|-------|
//! | `menu` | text from the default user |
//! | `@alice 3` | text from `alice` |
//! | `/file ~/scan.pdf` | attachment from the default user |
//! | `@bob /file https://host/a.pdf` | attachment from `bob` |
//!
//! Replies are printed as `[user] text`. Delivered files are copied into an
//! outbox directory, because the staged artifact is released right after
//! delivery.

use super::{attachment::SourceAttachment, InboundEvent, MessagingChannel};
use crate::artifact::ArtifactHandle;
use crate::error::ChannelError;
use crate::session::UserId;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

const FILE_PREFIX: &str = "/file";

/// Parse one console line into an event.
///
/// Returns `None` for blank lines and for a `@user` prefix with nothing after it.
pub fn parse_console_line(line: &str, default_user: &UserId) -> Option<InboundEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (user, rest) = match line.strip_prefix('@') {
        Some(tagged) => {
            let (name, rest) = tagged.split_once(char::is_whitespace)?;
            (UserId::from(name), rest.trim())
        }
        None => (default_user.clone(), line),
    };
    if rest.is_empty() {
        return None;
    }

    if let Some(arg) = rest.strip_prefix(FILE_PREFIX) {
        if arg.starts_with(char::is_whitespace) && !arg.trim().is_empty() {
            let attachment = SourceAttachment::parse(&expand_home(arg.trim()));
            return Some(InboundEvent::file(user, Arc::new(attachment)));
        }
    }
    Some(InboundEvent::text(user, rest))
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{home}/{rest}"),
        _ => path.to_string(),
    }
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Console transport: replies to a writer, files to an outbox.
pub struct ConsoleChannel {
    outbox: PathBuf,
    out: Mutex<Writer>,
}

impl ConsoleChannel {
    /// Print replies to stdout.
    pub fn stdout(outbox: impl Into<PathBuf>) -> Result<Self, ChannelError> {
        Self::with_writer(outbox, Box::new(tokio::io::stdout()))
    }

    pub fn with_writer(outbox: impl Into<PathBuf>, writer: Writer) -> Result<Self, ChannelError> {
        let outbox = outbox.into();
        std::fs::create_dir_all(&outbox)?;
        Ok(Self {
            outbox,
            out: Mutex::new(writer),
        })
    }

    pub fn outbox(&self) -> &Path {
        &self.outbox
    }

    async fn write_line(&self, user: &UserId, text: &str) -> Result<(), ChannelError> {
        let mut out = self.out.lock().await;
        for line in text.lines() {
            out.write_all(format!("[{user}] {line}\n").as_bytes())
                .await
                .map_err(|e| ChannelError::Delivery(e.to_string()))?;
        }
        out.flush()
            .await
            .map_err(|e| ChannelError::Delivery(e.to_string()))
    }
}

#[async_trait]
impl MessagingChannel for ConsoleChannel {
    async fn reply(&self, user: &UserId, text: &str) -> Result<(), ChannelError> {
        self.write_line(user, text).await
    }

    async fn reply_with_file(&self, user: &UserId, file: &ArtifactHandle) -> Result<(), ChannelError> {
        let target = self.outbox.join(format!("{}-{}", user, file.file_name()));
        tokio::fs::copy(file.path(), &target)
            .await
            .map_err(|e| ChannelError::Delivery(format!("copy to outbox failed: {e}")))?;
        debug!("Delivered {} to {}", file, target.display());
        self.write_line(user, &format!("file: {}", target.display()))
            .await
    }
}
