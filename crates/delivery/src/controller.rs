//! Idempotent publish/recall of a channel's tracked messages.
//!
//! `publish` keeps exactly one live message per kind per channel: it edits
//! the stored message when it still exists, recreates it when the platform
//! lost it, and creates-and-stores on first use. `recall` deletes and
//! forgets, treating "already gone" as done.

use std::sync::Arc;

use crate::platform::{ChannelId, MessageId, MessageKind, MessagePlatform, PlatformError};
use crate::registry::ChannelRegistry;

/// What a publish actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Created(MessageId),
    Edited(MessageId),
    /// The stored message had vanished; a replacement was created.
    Replaced {
        old: MessageId,
        new: MessageId,
    },
}

impl PublishOutcome {
    pub fn message_id(&self) -> &MessageId {
        match self {
            PublishOutcome::Created(id) | PublishOutcome::Edited(id) => id,
            PublishOutcome::Replaced { new, .. } => new,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecallOutcome {
    Recalled(MessageId),
    /// No id stored: nothing to do, no platform call made.
    NothingToRecall,
}

pub struct DeliveryController {
    platform: Arc<dyn MessagePlatform>,
    registry: Arc<ChannelRegistry>,
}

impl DeliveryController {
    pub fn new(platform: Arc<dyn MessagePlatform>, registry: Arc<ChannelRegistry>) -> Self {
        Self { platform, registry }
    }

    /// Edit the channel's tracked message of `kind`, or create it.
    pub async fn publish(
        &self,
        channel: ChannelId,
        kind: MessageKind,
        content: &str,
    ) -> Result<PublishOutcome, PlatformError> {
        match self.registry.message_id(channel, kind) {
            Some(stored) => match self.platform.edit_message(channel, &stored, content).await {
                Ok(()) => Ok(PublishOutcome::Edited(stored)),
                Err(PlatformError::NotFound) => {
                    tracing::warn!(
                        channel = %channel,
                        kind = %kind,
                        message = %stored,
                        "stored message gone, creating replacement"
                    );
                    let new = self.platform.create_message(channel, content).await?;
                    self.registry.set_message_id(channel, kind, new.clone());
                    Ok(PublishOutcome::Replaced { old: stored, new })
                }
                Err(err) => Err(err),
            },
            None => {
                let id = self.platform.create_message(channel, content).await?;
                self.registry.set_message_id(channel, kind, id.clone());
                Ok(PublishOutcome::Created(id))
            }
        }
    }

    /// Delete the channel's tracked message of `kind` and forget its id.
    /// Idempotent: a second recall reports [`RecallOutcome::NothingToRecall`].
    pub async fn recall(
        &self,
        channel: ChannelId,
        kind: MessageKind,
    ) -> Result<RecallOutcome, PlatformError> {
        let Some(stored) = self.registry.message_id(channel, kind) else {
            return Ok(RecallOutcome::NothingToRecall);
        };
        match self.platform.delete_message(channel, &stored).await {
            Ok(()) | Err(PlatformError::NotFound) => {
                self.registry.clear_message_id(channel, kind);
                Ok(RecallOutcome::Recalled(stored))
            }
            // Id retained so the recall can be retried.
            Err(err) => Err(err),
        }
    }

    /// One-off untracked message (alert notifications).
    pub async fn announce(
        &self,
        channel: ChannelId,
        content: &str,
    ) -> Result<MessageId, PlatformError> {
        self.platform.create_message(channel, content).await
    }
}

#[cfg(test)]
pub mod testing {
    //! Mock platform shared by controller and dispatcher tests.

    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MockPlatform {
        pub creates: AtomicUsize,
        pub edits: AtomicUsize,
        pub deletes: AtomicUsize,
        next_id: AtomicUsize,
        /// Ids that exist on the "platform" side.
        pub live: Mutex<HashSet<String>>,
        /// Channels whose calls all fail.
        pub broken_channels: Mutex<HashSet<u64>>,
    }

    impl MockPlatform {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn break_channel(&self, channel: ChannelId) {
            self.broken_channels.lock().unwrap().insert(channel.0);
        }

        pub fn drop_message(&self, id: &MessageId) {
            self.live.lock().unwrap().remove(&id.0);
        }

        fn check_channel(&self, channel: ChannelId) -> Result<(), PlatformError> {
            if self.broken_channels.lock().unwrap().contains(&channel.0) {
                return Err(PlatformError::Api("channel broken".into()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl MessagePlatform for MockPlatform {
        async fn create_message(
            &self,
            channel: ChannelId,
            _content: &str,
        ) -> Result<MessageId, PlatformError> {
            self.check_channel(channel)?;
            self.creates.fetch_add(1, Ordering::SeqCst);
            let id = format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            self.live.lock().unwrap().insert(id.clone());
            Ok(MessageId(id))
        }

        async fn edit_message(
            &self,
            channel: ChannelId,
            id: &MessageId,
            _content: &str,
        ) -> Result<(), PlatformError> {
            self.check_channel(channel)?;
            self.edits.fetch_add(1, Ordering::SeqCst);
            if !self.live.lock().unwrap().contains(&id.0) {
                return Err(PlatformError::NotFound);
            }
            Ok(())
        }

        async fn delete_message(
            &self,
            channel: ChannelId,
            id: &MessageId,
        ) -> Result<(), PlatformError> {
            self.check_channel(channel)?;
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if !self.live.lock().unwrap().remove(&id.0) {
                return Err(PlatformError::NotFound);
            }
            Ok(())
        }
    }
}
