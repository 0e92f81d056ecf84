pub mod controller;
pub mod discord;
pub mod format;
pub mod platform;
pub mod registry;

pub use controller::{DeliveryController, PublishOutcome, RecallOutcome};
pub use discord::DiscordApi;
pub use platform::{ChannelId, MessageId, MessageKind, MessagePlatform, PlatformError};
pub use registry::{ChannelRegistry, DeliveryRecord};
