//! The messaging-channel seam.
//!
//! A channel delivers [`InboundEvent`]s from users and accepts replies. The
//! orchestrator never talks to a transport directly; chat platforms, the
//! console adapter and the test recorder all implement [`MessagingChannel`].

pub mod attachment;
pub mod console;

use crate::artifact::ArtifactHandle;
use crate::error::ChannelError;
use crate::session::UserId;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub use attachment::SourceAttachment;
pub use console::ConsoleChannel;

/// Raw content of a downloaded attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub original_name: String,
}

/// A file attached to an inbound message, fetched lazily.
#[async_trait]
pub trait Attachment: Send + Sync {
    /// Size announced by the transport, if known before download.
    fn declared_size(&self) -> Option<u64> {
        None
    }

    async fn download(&self) -> Result<DownloadedFile, ChannelError>;
}

/// One message from a user.
#[derive(Clone)]
pub struct InboundEvent {
    pub sender_id: UserId,
    pub text: Option<String>,
    pub attachment: Option<Arc<dyn Attachment>>,
}

impl InboundEvent {
    pub fn text(sender: impl Into<UserId>, text: impl Into<String>) -> Self {
        Self {
            sender_id: sender.into(),
            text: Some(text.into()),
            attachment: None,
        }
    }

    pub fn file(sender: impl Into<UserId>, attachment: Arc<dyn Attachment>) -> Self {
        Self {
            sender_id: sender.into(),
            text: None,
            attachment: Some(attachment),
        }
    }

    pub fn has_attachment(&self) -> bool {
        self.attachment.is_some()
    }
}

impl fmt::Debug for InboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundEvent")
            .field("sender_id", &self.sender_id)
            .field("text", &self.text)
            .field("attachment", &self.attachment.as_ref().map(|_| "<dyn Attachment>"))
            .finish()
    }
}

/// Outbound side of a conversation transport.
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    async fn reply(&self, user: &UserId, text: &str) -> Result<(), ChannelError>;

    /// Send a staged artifact. The artifact is released once this returns,
    /// so the channel must finish reading it before returning.
    async fn reply_with_file(&self, user: &UserId, file: &ArtifactHandle) -> Result<(), ChannelError>;
}
