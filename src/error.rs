//! Error types for the docbot library.
//!
//! Two families of failure reach the orchestrator, and each is reported
//! differently when it surfaces at the top of event handling:
//!
//! * [`BotError::InputValidation`] and [`BotError::SessionState`] — the user
//!   sent something the workflow cannot use. The message is shown verbatim,
//!   so it must say how to fix the problem.
//!
//! * [`BotError::ExternalTool`], [`BotError::Io`] and [`BotError::Channel`] —
//!   something outside the user's control failed. The detail is logged and
//!   the user sees a generic failure message.
//!
//! Narrower error types ([`SelectorError`], [`EngineError`], [`ChannelError`])
//! are produced by the leaf components and convert into [`BotError`] with `?`.

use std::path::PathBuf;
use thiserror::Error;

/// All errors surfaced by the orchestrator.
///
/// Whatever the variant, the orchestrator resets the session's current step
/// and selected operation and keeps the uploaded files and collected answers.
#[derive(Debug, Error)]
pub enum BotError {
    // ── User-correctable ──────────────────────────────────────────────────
    /// Wrong file type, too few/many files, malformed range, missing answer.
    #[error("{message}")]
    InputValidation { message: String },

    /// The event cannot be handled in the session's current step.
    #[error("{message}")]
    SessionState { message: String },

    // ── Infrastructure ────────────────────────────────────────────────────
    /// The conversion engine failed or produced nothing usable.
    #[error("Conversion failed: {0}")]
    ExternalTool(#[source] EngineError),

    /// Allocating, writing or inspecting a staged artifact failed.
    #[error("Artifact I/O failed ({context}) for '{path}': {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Downloading an attachment or delivering a reply failed.
    #[error("Messaging channel error: {0}")]
    Channel(#[from] ChannelError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BotError {
    pub fn validation(message: impl Into<String>) -> Self {
        BotError::InputValidation {
            message: message.into(),
        }
    }

    pub fn session_state(message: impl Into<String>) -> Self {
        BotError::SessionState {
            message: message.into(),
        }
    }

    /// Whether the message can be shown to the user as-is.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            BotError::InputValidation { .. } | BotError::SessionState { .. }
        )
    }

    /// Short stable label used in logs and observer callbacks.
    pub fn kind(&self) -> &'static str {
        match self {
            BotError::InputValidation { .. } => "input_validation",
            BotError::SessionState { .. } => "session_state",
            BotError::ExternalTool(_) => "external_tool",
            BotError::Io { .. } => "io",
            BotError::Channel(_) => "channel",
            BotError::InvalidConfig(_) => "config",
        }
    }
}

impl From<EngineError> for BotError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Io {
                context,
                path,
                source,
            } => BotError::Io {
                context,
                path,
                source,
            },
            other => BotError::ExternalTool(other),
        }
    }
}

impl From<SelectorError> for BotError {
    fn from(err: SelectorError) -> Self {
        BotError::validation(err.to_string())
    }
}

/// A page selector could not be turned into a non-empty page set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    /// A token is neither a number nor a `a-b` range.
    #[error("'{token}' is not a page number or range. Use forms like 1-3,5 or 4-")]
    Unparseable { token: String },

    /// Every token fell outside the document.
    #[error("'{selector}' selects no pages (the document has {total} pages)")]
    Empty { selector: String, total: usize },

    /// Removing the selection would leave an empty document.
    #[error("Removing '{selector}' would leave no pages (the document has {total} pages)")]
    NothingLeft { selector: String, total: usize },
}

/// Failures reported by a [`crate::engine::ConversionEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine ran but reported a failure.
    #[error("{operation} failed: {detail}")]
    Failed { operation: String, detail: String },

    /// The engine returned, but no output artifact is usable.
    #[error("{operation} produced no usable output")]
    NoOutput { operation: String },

    /// The engine has no implementation for this operation.
    #[error("operation '{operation}' is not available in this engine")]
    Unsupported { operation: String },

    /// The engine call exceeded its time budget.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// The engine process could not be started.
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine task panicked.
    #[error("engine task panicked: {0}")]
    Panicked(String),

    /// Allocating or writing a staged artifact failed inside the engine call.
    /// Surfaces as [`BotError::Io`].
    #[error("artifact I/O failed ({context}) for '{path}': {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Carry a staging failure into the engine's error type, keeping I/O
    /// failures distinguishable from tool failures.
    pub fn staging(operation: &str, err: BotError) -> Self {
        match err {
            BotError::Io {
                context,
                path,
                source,
            } => EngineError::Io {
                context,
                path,
                source,
            },
            other => EngineError::Failed {
                operation: operation.to_string(),
                detail: other.to_string(),
            },
        }
    }
}

/// Failures at the messaging-channel boundary.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Attachment source was not found.
    #[error("Attachment not found: '{path}'")]
    NotFound { path: PathBuf },

    /// Process does not have read permission on the attachment.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// HTTP download of an attachment failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// Sending a reply to the user failed.
    #[error("Failed to deliver reply: {0}")]
    Delivery(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
