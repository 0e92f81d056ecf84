//! Per-channel delivery state.
//!
//! One record per recipient channel: the autorun flag plus the ids of the
//! messages currently representing the latest report. Disabling a channel
//! clears only the flag. Ids survive, so a re-enabled channel keeps editing
//! its existing messages instead of spawning new ones.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::platform::{ChannelId, MessageId, MessageKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub autorun: bool,
    pub data_message: Option<MessageId>,
    pub plot_message: Option<MessageId>,
}

impl DeliveryRecord {
    pub fn message(&self, kind: MessageKind) -> Option<&MessageId> {
        match kind {
            MessageKind::Data => self.data_message.as_ref(),
            MessageKind::Plot => self.plot_message.as_ref(),
        }
    }

    fn message_mut(&mut self, kind: MessageKind) -> &mut Option<MessageId> {
        match kind {
            MessageKind::Data => &mut self.data_message,
            MessageKind::Plot => &mut self.plot_message,
        }
    }
}

/// Channel state service object; all mutation goes through one lock.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    records: Mutex<HashMap<ChannelId, DeliveryRecord>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn autorun on, creating the record if the channel is new. Enabling
    /// never publishes by itself; the next in-window tick does.
    pub fn enable(&self, channel: ChannelId) {
        let mut records = self.records.lock().unwrap();
        records.entry(channel).or_default().autorun = true;
        tracing::info!(channel = %channel, "autorun enabled");
    }

    /// Turn autorun off. Message ids are retained.
    pub fn disable(&self, channel: ChannelId) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(&channel) {
            record.autorun = false;
            tracing::info!(channel = %channel, "autorun disabled");
        }
    }

    pub fn get(&self, channel: ChannelId) -> DeliveryRecord {
        let records = self.records.lock().unwrap();
        records.get(&channel).cloned().unwrap_or_default()
    }

    /// Channels with autorun on, in stable order.
    pub fn enabled_channels(&self) -> Vec<ChannelId> {
        let records = self.records.lock().unwrap();
        let mut channels: Vec<ChannelId> = records
            .iter()
            .filter(|(_, r)| r.autorun)
            .map(|(c, _)| *c)
            .collect();
        channels.sort_by_key(|c| c.0);
        channels
    }

    pub fn message_id(&self, channel: ChannelId, kind: MessageKind) -> Option<MessageId> {
        let records = self.records.lock().unwrap();
        records
            .get(&channel)
            .and_then(|r| r.message(kind).cloned())
    }

    pub fn set_message_id(&self, channel: ChannelId, kind: MessageKind, id: MessageId) {
        let mut records = self.records.lock().unwrap();
        *records.entry(channel).or_default().message_mut(kind) = Some(id);
    }

    pub fn clear_message_id(&self, channel: ChannelId, kind: MessageKind) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(&channel) {
            *record.message_mut(kind) = None;
        }
    }
}
