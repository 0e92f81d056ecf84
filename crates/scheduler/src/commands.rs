//! Externally-triggered commands.
//!
//! The platform collaborator receives these from users and invokes the
//! handler synchronously; the reply string goes back through the same
//! platform. Manual triggers bypass the autorun fan-out and drive the same
//! publish/recall operations a tick would.

use sterling_delivery::controller::{PublishOutcome, RecallOutcome};
use sterling_delivery::format;
use sterling_delivery::platform::{ChannelId, MessageKind};
use sterling_market::cache::SlotFreshness;

use crate::dispatcher::Dispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Turn autorun on for the channel.
    Enable,
    /// Turn autorun off (message ids retained).
    Disable,
    /// Build a fresh report now and publish it to this channel.
    ForceUpdate,
    /// Publish the holdings summary message to this channel.
    ForcePlot,
    /// Delete the channel's data message.
    RecallData,
    /// Delete the channel's plot message.
    RecallPlot,
    /// Show delivery state and per-source freshness.
    Status,
}

impl Command {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "enable" | "autorun_on" => Some(Command::Enable),
            "disable" | "autorun_off" => Some(Command::Disable),
            "update" | "update_data" => Some(Command::ForceUpdate),
            "plot" | "update_plot" => Some(Command::ForcePlot),
            "recall-data" | "recall_data" => Some(Command::RecallData),
            "recall-plot" | "recall_plot" => Some(Command::RecallPlot),
            "status" => Some(Command::Status),
            _ => None,
        }
    }
}

impl Dispatcher {
    /// Execute one command for one channel and produce the reply text.
    /// Total: failures come back as reply text, never as panics or
    /// propagated errors.
    pub async fn handle_command(&self, channel: ChannelId, command: Command) -> String {
        match command {
            Command::Enable => {
                self.registry().enable(channel);
                "✅ Autorun enabled. The next in-window tick will publish here.".to_string()
            }
            Command::Disable => {
                self.registry().disable(channel);
                "🛑 Autorun disabled. Tracked messages were kept and will be reused on re-enable."
                    .to_string()
            }
            Command::ForceUpdate => {
                let report = self.aggregator().build_report(true).await;
                let body = format::render_report(&report);
                match self
                    .controller()
                    .publish(channel, MessageKind::Data, &body)
                    .await
                {
                    Ok(outcome) => format!(
                        "✅ Data {} (message `{}`).",
                        describe_publish(&outcome),
                        outcome.message_id()
                    ),
                    Err(err) => format!("❌ Data update failed: {err}"),
                }
            }
            Command::ForcePlot => {
                let report = self.aggregator().build_report(false).await;
                let body = format::render_plot_summary(&report);
                match self
                    .controller()
                    .publish(channel, MessageKind::Plot, &body)
                    .await
                {
                    Ok(outcome) => format!(
                        "✅ Plot {} (message `{}`).",
                        describe_publish(&outcome),
                        outcome.message_id()
                    ),
                    Err(err) => format!("❌ Plot update failed: {err}"),
                }
            }
            Command::RecallData => self.recall_reply(channel, MessageKind::Data).await,
            Command::RecallPlot => self.recall_reply(channel, MessageKind::Plot).await,
            Command::Status => self.status_reply(channel).await,
        }
    }

    async fn recall_reply(&self, channel: ChannelId, kind: MessageKind) -> String {
        match self.controller().recall(channel, kind).await {
            Ok(RecallOutcome::Recalled(id)) => {
                format!("🗑️ {kind} message `{id}` recalled.")
            }
            Ok(RecallOutcome::NothingToRecall) => {
                format!("ℹ️ No {kind} message to recall.")
            }
            Err(err) => format!("❌ Recall failed: {err}"),
        }
    }

    async fn status_reply(&self, channel: ChannelId) -> String {
        let record = self.registry().get(channel);
        let status = self.aggregator().status().await;

        let mut lines = vec![
            "**🤖 Status**".to_string(),
            format!(
                "• Autorun: {}",
                if record.autorun { "🟢 on" } else { "🔴 off" }
            ),
            format!(
                "• Data message: `{}`",
                record
                    .data_message
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "not set".into())
            ),
            format!(
                "• Plot message: `{}`",
                record
                    .plot_message
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "not set".into())
            ),
            String::new(),
            "**Sources**".to_string(),
        ];

        lines.push(format!(
            "• Cache: {} hits / {} misses",
            status.cache_hits, status.cache_misses
        ));
        if status.sources.is_empty() {
            lines.push("• No sources fetched yet".to_string());
        }
        for source in &status.sources {
            let state = match source.freshness {
                SlotFreshness::Fresh { age_secs } => format!("fresh ({age_secs}s old)"),
                SlotFreshness::Stale { age_secs } => format!("stale ({age_secs}s old)"),
                SlotFreshness::Absent => "unavailable".to_string(),
            };
            let mut line = format!("• {}: {}", source.key, state);
            if let Some(err) = &source.last_error {
                line.push_str(&format!(" — last error: {err}"));
            }
            lines.push(line);
        }

        if !status.budgets.is_empty() {
            lines.push(String::new());
            lines.push("**Rate budgets**".to_string());
            for budget in &status.budgets {
                lines.push(format!(
                    "• {}: {}/{} used, window resets {}",
                    budget.source,
                    budget.consumed,
                    budget.limit,
                    budget.window_ends.format("%Y-%m-%d %H:%M UTC")
                ));
            }
        }

        lines.join("\n")
    }
}

fn describe_publish(outcome: &PublishOutcome) -> &'static str {
    match outcome {
        PublishOutcome::Created(_) => "published",
        PublishOutcome::Edited(_) => "updated in place",
        PublishOutcome::Replaced { .. } => "republished (previous message was gone)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_both_spellings() {
        assert_eq!(Command::parse("enable"), Some(Command::Enable));
        assert_eq!(Command::parse("autorun_on"), Some(Command::Enable));
        assert_eq!(Command::parse(" STATUS "), Some(Command::Status));
        assert_eq!(Command::parse("recall-plot"), Some(Command::RecallPlot));
        assert_eq!(Command::parse("nonsense"), None);
    }
}
