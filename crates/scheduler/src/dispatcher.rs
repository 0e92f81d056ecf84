//! Cadence loops and per-tick fan-out.
//!
//! Two cadences drive the system: the report cadence builds one composite
//! report per tick and edits it into every autorun channel; the alert
//! cadence force-refreshes trust holdings and announces detected moves.
//! Each stage is timeout-bounded and returns structured outcomes: a tick
//! can fail and a channel can fail, but the loops never do.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sterling_core::Clock;
use sterling_delivery::controller::DeliveryController;
use sterling_delivery::format;
use sterling_delivery::platform::{ChannelId, MessageKind};
use sterling_delivery::registry::ChannelRegistry;
use sterling_market::Aggregator;

use crate::window::ActiveWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceKind {
    /// Build the composite report and publish-or-edit it per channel.
    Report,
    /// Check trust holdings and announce moves.
    Alert,
}

#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    pub name: &'static str,
    pub kind: CadenceKind,
    pub interval: Duration,
    pub window: ActiveWindow,
}

impl Cadence {
    pub fn report(interval: Duration, window: ActiveWindow) -> Self {
        Self {
            name: "report",
            kind: CadenceKind::Report,
            interval,
            window,
        }
    }

    pub fn alert(interval: Duration, window: ActiveWindow) -> Self {
        Self {
            name: "alert",
            kind: CadenceKind::Alert,
            interval,
            window,
        }
    }
}

/// Result of delivering to one channel in one tick.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub channel: ChannelId,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

pub struct Dispatcher {
    aggregator: Arc<Aggregator>,
    controller: Arc<DeliveryController>,
    registry: Arc<ChannelRegistry>,
    clock: Arc<dyn Clock>,
    tick_timeout: Duration,
    publish_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        aggregator: Arc<Aggregator>,
        controller: Arc<DeliveryController>,
        registry: Arc<ChannelRegistry>,
        clock: Arc<dyn Clock>,
        tick_timeout: Duration,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            aggregator,
            controller,
            registry,
            clock,
            tick_timeout,
            publish_timeout,
        }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn controller(&self) -> &Arc<DeliveryController> {
        &self.controller
    }

    /// Drive one cadence forever. Out-of-window ticks are skipped quietly;
    /// nothing that happens inside a tick stops the loop.
    pub async fn run_cadence(self: Arc<Self>, cadence: Cadence) {
        tracing::info!(
            cadence = cadence.name,
            interval_secs = cadence.interval.as_secs(),
            "cadence started"
        );
        let mut interval = tokio::time::interval(cadence.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of `interval` fires immediately; consume it so the
        // first real tick lands one interval after startup.
        interval.tick().await;

        loop {
            interval.tick().await;
            if !cadence.window.contains(self.clock.now()) {
                tracing::debug!(cadence = cadence.name, "outside active window, skipping tick");
                continue;
            }
            let outcomes = match cadence.kind {
                CadenceKind::Report => self.report_tick().await,
                CadenceKind::Alert => self.alert_tick().await,
            };
            let failed = outcomes.iter().filter(|o| !o.success).count();
            tracing::info!(
                cadence = cadence.name,
                channels = outcomes.len(),
                failed,
                "tick complete"
            );
        }
    }

    /// One report tick: build, render once, fan out. A build timeout aborts
    /// the whole tick with nothing published.
    pub async fn report_tick(&self) -> Vec<TickOutcome> {
        let report = match tokio::time::timeout(
            self.tick_timeout,
            self.aggregator.build_report(false),
        )
        .await
        {
            Ok(report) => report,
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.tick_timeout.as_secs(),
                    "report build timed out, aborting tick"
                );
                return Vec::new();
            }
        };
        let body = format::render_report(&report);
        self.fan_out(MessageKind::Data, &body).await
    }

    /// One alert tick: refresh holdings, announce moves if any.
    pub async fn alert_tick(&self) -> Vec<TickOutcome> {
        let changes = match tokio::time::timeout(
            self.tick_timeout,
            self.aggregator.check_holdings(),
        )
        .await
        {
            Ok(changes) => changes,
            Err(_) => {
                tracing::error!("holdings check timed out, aborting tick");
                return Vec::new();
            }
        };
        if changes.is_empty() {
            tracing::debug!("no holdings changes detected");
            return Vec::new();
        }
        tracing::info!(changes = changes.len(), "holdings moved, announcing");
        let body = format::render_alert(&changes, self.clock.now());

        let mut outcomes = Vec::new();
        for channel in self.registry.enabled_channels() {
            let start = Instant::now();
            let result = tokio::time::timeout(
                self.publish_timeout,
                self.controller.announce(channel, &body),
            )
            .await;
            outcomes.push(self.record_outcome(channel, start, flatten(result)));
        }
        outcomes
    }

    /// Publish the shared body to every autorun channel, isolating failures.
    async fn fan_out(&self, kind: MessageKind, body: &str) -> Vec<TickOutcome> {
        let channels = self.registry.enabled_channels();
        if channels.is_empty() {
            tracing::debug!("no autorun channels enabled");
            return Vec::new();
        }

        let mut outcomes = Vec::with_capacity(channels.len());
        for channel in channels {
            let start = Instant::now();
            let result = tokio::time::timeout(
                self.publish_timeout,
                self.controller.publish(channel, kind, body),
            )
            .await;
            outcomes.push(self.record_outcome(channel, start, flatten(result).map(|_| ())));
        }
        outcomes
    }

    fn record_outcome<T>(
        &self,
        channel: ChannelId,
        start: Instant,
        result: Result<T, String>,
    ) -> TickOutcome {
        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(_) => {
                tracing::info!(channel = %channel, duration_ms, "delivery ok");
                TickOutcome {
                    channel,
                    success: true,
                    error: None,
                    duration_ms,
                }
            }
            Err(error) => {
                tracing::warn!(channel = %channel, error = %error, duration_ms, "delivery failed");
                TickOutcome {
                    channel,
                    success: false,
                    error: Some(error),
                    duration_ms,
                }
            }
        }
    }
}

/// Collapse a timeout-wrapped platform result into one error string.
fn flatten<T, E: std::fmt::Display>(
    result: Result<Result<T, E>, tokio::time::error::Elapsed>,
) -> Result<T, String> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err("publish timed out".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use sterling_core::report::{Quote, TrustHoldings};
    use sterling_core::{ManualClock, MemorySink};
    use sterling_delivery::platform::{MessageId, MessagePlatform, PlatformError};
    use sterling_market::aggregator::SourceChains;
    use sterling_market::{FetchError, RateBudgetGuard, SourceAdapter, SourceId, SourceValue};

    // ── Mocks ───────────────────────────────────────────────────────

    #[derive(Default)]
    struct MockPlatform {
        creates: AtomicUsize,
        edits: AtomicUsize,
        next_id: AtomicUsize,
        live: Mutex<HashSet<String>>,
        broken: Mutex<HashSet<u64>>,
    }

    impl MockPlatform {
        fn break_channel(&self, channel: ChannelId) {
            self.broken.lock().unwrap().insert(channel.0);
        }

        fn check(&self, channel: ChannelId) -> Result<(), PlatformError> {
            if self.broken.lock().unwrap().contains(&channel.0) {
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
            self.check(channel)?;
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
            self.check(channel)?;
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
            self.check(channel)?;
            if !self.live.lock().unwrap().remove(&id.0) {
                return Err(PlatformError::NotFound);
            }
            Ok(())
        }
    }

    struct StubAdapter {
        id: SourceId,
        value: SourceValue,
        delay: Option<Duration>,
    }

    #[async_trait::async_trait]
    impl SourceAdapter for StubAdapter {
        fn id(&self) -> SourceId {
            self.id
        }

        fn ttl(&self) -> Duration {
            Duration::from_secs(3600)
        }

        async fn fetch(&self) -> Result<SourceValue, FetchError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.value.clone())
        }
    }

    fn quote(price: f64) -> SourceValue {
        SourceValue::Quote(Quote {
            price,
            change_pct: None,
            previous_close: None,
        })
    }

    fn dispatcher_with(
        chains: SourceChains,
        tick_timeout: Duration,
    ) -> (Arc<Dispatcher>, Arc<MockPlatform>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap(),
        ));
        let budget = Arc::new(RateBudgetGuard::new(
            clock.clone(),
            chrono::Duration::days(30),
            HashMap::new(),
        ));
        let aggregator = Arc::new(Aggregator::new(
            clock.clone(),
            budget,
            Arc::new(MemorySink::new()),
            Duration::from_secs(5),
            chains,
        ));
        let platform = Arc::new(MockPlatform::default());
        let registry = Arc::new(ChannelRegistry::new());
        let controller = Arc::new(DeliveryController::new(platform.clone(), registry.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            aggregator,
            controller,
            registry,
            clock,
            tick_timeout,
            Duration::from_secs(5),
        ));
        (dispatcher, platform)
    }

    fn spot_chains() -> SourceChains {
        SourceChains {
            spot_silver: vec![Arc::new(StubAdapter {
                id: SourceId::SpotSilver,
                value: quote(50.0),
                delay: None,
            })],
            ..Default::default()
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn failed_channel_does_not_block_the_next() {
        let (dispatcher, platform) = dispatcher_with(spot_chains(), Duration::from_secs(30));
        let (a, b) = (ChannelId(1), ChannelId(2));
        dispatcher.registry().enable(a);
        dispatcher.registry().enable(b);
        platform.break_channel(a);

        let outcomes = dispatcher.report_tick().await;
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].success);
        assert!(outcomes[0].error.as_deref().unwrap().contains("broken"));
        assert!(outcomes[1].success);
        // Channel B got its message even though A failed first.
        assert_eq!(platform.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_tick_edits_instead_of_creating() {
        let (dispatcher, platform) = dispatcher_with(spot_chains(), Duration::from_secs(30));
        dispatcher.registry().enable(ChannelId(1));

        dispatcher.report_tick().await;
        dispatcher.report_tick().await;

        assert_eq!(platform.creates.load(Ordering::SeqCst), 1);
        assert_eq!(platform.edits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_report_build_aborts_tick_without_publishing() {
        let chains = SourceChains {
            spot_silver: vec![Arc::new(StubAdapter {
                id: SourceId::SpotSilver,
                value: quote(50.0),
                delay: Some(Duration::from_secs(600)),
            })],
            ..Default::default()
        };
        // Tick timeout far below the adapter delay (and the per-source
        // timeout above it, so the build itself is what stalls).
        let (dispatcher, platform) = dispatcher_with(chains, Duration::from_secs(1));
        dispatcher.registry().enable(ChannelId(1));

        let outcomes = dispatcher.report_tick().await;
        assert!(outcomes.is_empty());
        assert_eq!(platform.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_channel_is_skipped() {
        let (dispatcher, platform) = dispatcher_with(spot_chains(), Duration::from_secs(30));
        dispatcher.registry().enable(ChannelId(1));
        dispatcher.registry().enable(ChannelId(2));
        dispatcher.registry().disable(ChannelId(1));

        let outcomes = dispatcher.report_tick().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].channel, ChannelId(2));
        assert_eq!(platform.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enable_command_does_not_publish_by_itself() {
        use crate::commands::Command;

        let (dispatcher, platform) = dispatcher_with(spot_chains(), Duration::from_secs(30));
        let reply = dispatcher
            .handle_command(ChannelId(9), Command::Enable)
            .await;
        assert!(reply.contains("enabled"));
        assert_eq!(platform.creates.load(Ordering::SeqCst), 0);

        // The next tick performs the first publish.
        let outcomes = dispatcher.report_tick().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(platform.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_update_command_creates_then_edits() {
        use crate::commands::Command;

        let (dispatcher, platform) = dispatcher_with(spot_chains(), Duration::from_secs(30));
        let channel = ChannelId(9);

        let reply = dispatcher.handle_command(channel, Command::ForceUpdate).await;
        assert!(reply.contains("published"), "got reply: {reply}");
        assert_eq!(platform.creates.load(Ordering::SeqCst), 1);

        let reply = dispatcher.handle_command(channel, Command::ForceUpdate).await;
        assert!(reply.contains("updated in place"), "got reply: {reply}");
        assert_eq!(platform.creates.load(Ordering::SeqCst), 1);
        assert_eq!(platform.edits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recall_command_reports_noop_without_message() {
        use crate::commands::Command;

        let (dispatcher, _) = dispatcher_with(spot_chains(), Duration::from_secs(30));
        let reply = dispatcher
            .handle_command(ChannelId(9), Command::RecallPlot)
            .await;
        assert!(reply.contains("No plot message to recall"), "got reply: {reply}");
    }

    #[tokio::test]
    async fn status_command_lists_source_freshness() {
        use crate::commands::Command;

        let (dispatcher, _) = dispatcher_with(spot_chains(), Duration::from_secs(30));
        dispatcher.registry().enable(ChannelId(9));
        dispatcher.report_tick().await;

        let reply = dispatcher.handle_command(ChannelId(9), Command::Status).await;
        assert!(reply.contains("Autorun: 🟢 on"), "got reply: {reply}");
        assert!(reply.contains("spot_silver: fresh"), "got reply: {reply}");
        assert!(reply.contains("Data message:"), "got reply: {reply}");
    }

    #[tokio::test]
    async fn alert_tick_announces_holdings_move_to_enabled_channels() {
        let chains = SourceChains {
            slv_holdings: vec![Arc::new(StubAdapter {
                id: SourceId::SlvHoldings,
                value: SourceValue::Holdings(TrustHoldings::from_ounces(450_000_000.0)),
                delay: None,
            })],
            ..Default::default()
        };
        let (dispatcher, platform) = dispatcher_with(chains, Duration::from_secs(30));
        dispatcher.registry().enable(ChannelId(1));

        // First observation counts as a move and is announced.
        let outcomes = dispatcher.alert_tick().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);
        assert_eq!(platform.creates.load(Ordering::SeqCst), 1);

        // Unchanged holdings: quiet tick, no new message.
        let outcomes = dispatcher.alert_tick().await;
        assert!(outcomes.is_empty());
        assert_eq!(platform.creates.load(Ordering::SeqCst), 1);
    }
}
