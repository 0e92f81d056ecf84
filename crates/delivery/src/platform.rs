//! Delivery platform trait and shared types.
//!
//! The core depends on exactly three platform primitives: create, edit and
//! delete a message. Message ids are opaque handles owned by the platform;
//! the core only stores and replays them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur during platform calls.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("message or channel not found")]
    NotFound,

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("platform rejected the call: {0}")]
    Api(String),
}

/// Recipient channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque message handle owned by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which tracked message a publish or recall refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Data,
    Plot,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Data => "data",
            MessageKind::Plot => "plot",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three primitives the delivery platform must expose.
#[async_trait::async_trait]
pub trait MessagePlatform: Send + Sync {
    async fn create_message(
        &self,
        channel: ChannelId,
        content: &str,
    ) -> Result<MessageId, PlatformError>;

    /// Fails with [`PlatformError::NotFound`] when the message no longer
    /// exists on the platform side.
    async fn edit_message(
        &self,
        channel: ChannelId,
        id: &MessageId,
        content: &str,
    ) -> Result<(), PlatformError>;

    /// Fails with [`PlatformError::NotFound`] when the message is already
    /// gone; callers treat that as success.
    async fn delete_message(
        &self,
        channel: ChannelId,
        id: &MessageId,
    ) -> Result<(), PlatformError>;
}
