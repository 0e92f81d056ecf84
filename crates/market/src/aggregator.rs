//! Composite report assembly.
//!
//! The aggregator owns the per-field adapter chains (primary source first,
//! non-budgeted proxy after it), the cache store, and the rate budget guard.
//! `build_report` is total: a failed source marks its own field unavailable
//! and everything else proceeds. The budget check runs inside the fetch
//! closure, so a fresh cache hit never spends quota.

use std::sync::Arc;
use std::time::Duration;

use sterling_core::report::{
    combine2, CompositeReport, Deltas, Derived, Field, FuturesQuote, HoldingsChange, Inventory,
    Quote, ShfeQuote, TrustHoldings, OUNCES_PER_CONTRACT, OUNCES_PER_KG,
};
use sterling_core::{Clock, MetricSink};

use crate::adapter::{FetchError, SourceAdapter, SourceId, SourceValue};
use crate::budget::{BudgetStatus, RateBudgetGuard};
use crate::cache::{CacheStore, SourceStatus};

/// Metric names forwarded to the sink.
mod metric {
    pub const SPOT_SILVER: &str = "spot_silver_usd";
    pub const SPOT_GOLD: &str = "spot_gold_usd";
    pub const COMEX_PRICE: &str = "comex_futures_usd";
    pub const COMEX_OI: &str = "comex_futures_oi";
    pub const SHFE_PRICE: &str = "shfe_price_cny_kg";
    pub const SHFE_OI: &str = "shfe_oi";
    pub const REGISTERED: &str = "inventory_registered_oz";
    pub const ELIGIBLE: &str = "inventory_eligible_oz";
    pub const SLV_TONNES: &str = "slv_holdings_tonnes";
    pub const GLD_TONNES: &str = "gld_holdings_tonnes";
}

/// Tonnes threshold below which a holdings move is considered noise.
const HOLDINGS_EPSILON: f64 = 0.01;

/// Per-field adapter chains, tried in order until one yields a value.
#[derive(Default)]
pub struct SourceChains {
    pub spot_silver: Vec<Arc<dyn SourceAdapter>>,
    pub spot_gold: Vec<Arc<dyn SourceAdapter>>,
    pub comex: Vec<Arc<dyn SourceAdapter>>,
    pub shfe: Vec<Arc<dyn SourceAdapter>>,
    pub slv_price: Vec<Arc<dyn SourceAdapter>>,
    pub gld_price: Vec<Arc<dyn SourceAdapter>>,
    pub slv_holdings: Vec<Arc<dyn SourceAdapter>>,
    pub gld_holdings: Vec<Arc<dyn SourceAdapter>>,
    pub inventory: Vec<Arc<dyn SourceAdapter>>,
    pub deliveries: Vec<Arc<dyn SourceAdapter>>,
    pub fx: Vec<Arc<dyn SourceAdapter>>,
}

/// Diagnostic snapshot for the status command.
#[derive(Debug, Clone)]
pub struct AggregatorStatus {
    pub sources: Vec<SourceStatus>,
    pub budgets: Vec<BudgetStatus>,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

pub struct Aggregator {
    cache: CacheStore<SourceId, SourceValue>,
    budget: Arc<RateBudgetGuard>,
    sink: Arc<dyn MetricSink>,
    clock: Arc<dyn Clock>,
    fetch_timeout: Duration,
    chains: SourceChains,
}

impl Aggregator {
    pub fn new(
        clock: Arc<dyn Clock>,
        budget: Arc<RateBudgetGuard>,
        sink: Arc<dyn MetricSink>,
        fetch_timeout: Duration,
        chains: SourceChains,
    ) -> Self {
        Self {
            cache: CacheStore::new(clock.clone()),
            budget,
            sink,
            clock,
            fetch_timeout,
            chains,
        }
    }

    /// Walk a chain: first fresh value wins; a stale serve from an earlier
    /// adapter is held back in case a later adapter can do better, and used
    /// only when none can.
    async fn fetch_chain(
        &self,
        chain: &[Arc<dyn SourceAdapter>],
        force: bool,
    ) -> Field<SourceValue> {
        let mut stale_candidate: Option<SourceValue> = None;

        for adapter in chain {
            let id = adapter.id();
            let ttl = adapter.ttl();
            let budget = self.budget.clone();
            let adapter = adapter.clone();
            let budgeted = adapter.rate_budgeted();

            let fetch = || async move {
                if budgeted && !budget.try_consume(id) {
                    return Err(FetchError::RateLimited(format!(
                        "budget exhausted for {id}"
                    )));
                }
                adapter.fetch().await
            };

            let attempt = if force {
                tokio::time::timeout(self.fetch_timeout, self.cache.refresh(id, ttl, fetch)).await
            } else {
                tokio::time::timeout(self.fetch_timeout, self.cache.get_or_fetch(id, ttl, fetch))
                    .await
            };

            match attempt {
                Err(_) => {
                    tracing::warn!(source = %id, "source fetch timed out");
                }
                Ok(Err(err)) => {
                    tracing::warn!(source = %id, error = %err, "source fetch failed");
                }
                Ok(Ok(cached)) => {
                    if !cached.stale {
                        return Field::Fresh(cached.value);
                    }
                    if stale_candidate.is_none() {
                        stale_candidate = Some(cached.value);
                    }
                }
            }
        }

        match stale_candidate {
            Some(value) => Field::Stale(value),
            None => Field::Unavailable,
        }
    }

    /// Build the composite report. Total: always returns, annotating each
    /// field with freshness instead of failing.
    pub async fn build_report(&self, force: bool) -> CompositeReport {
        let (
            spot_silver,
            spot_gold,
            comex,
            shfe,
            slv_price,
            gld_price,
            fx,
            slv_holdings,
            gld_holdings,
            inventory,
            deliveries,
        ) = tokio::join!(
            self.fetch_chain(&self.chains.spot_silver, force),
            self.fetch_chain(&self.chains.spot_gold, force),
            self.fetch_chain(&self.chains.comex, force),
            self.fetch_chain(&self.chains.shfe, force),
            self.fetch_chain(&self.chains.slv_price, force),
            self.fetch_chain(&self.chains.gld_price, force),
            self.fetch_chain(&self.chains.fx, force),
            self.fetch_chain(&self.chains.slv_holdings, force),
            self.fetch_chain(&self.chains.gld_holdings, force),
            self.fetch_chain(&self.chains.inventory, force),
            self.fetch_chain(&self.chains.deliveries, force),
        );

        let spot_silver = project(&spot_silver, |v| v.as_quote().cloned());
        let spot_gold = project(&spot_gold, |v| v.as_quote().cloned());
        let comex = project(&comex, |v| v.as_futures().cloned());
        let shfe = project(&shfe, |v| v.as_shfe().cloned());
        let slv_price = project(&slv_price, |v| v.as_quote().cloned());
        let gld_price = project(&gld_price, |v| v.as_quote().cloned());
        let usd_cny = project(&fx, |v| v.as_fx());
        let slv_holdings = project(&slv_holdings, |v| v.as_holdings().cloned());
        let gld_holdings = project(&gld_holdings, |v| v.as_holdings().cloned());
        let inventory = project(&inventory, |v| v.as_inventory().cloned());
        let deliveries = project(&deliveries, |v| v.as_deliveries().map(<[_]>::to_vec));

        let holdings_changed = self.record_holdings(&slv_holdings, &gld_holdings);
        self.record_scalars(&spot_silver, &spot_gold, &comex, &shfe, &inventory);

        let deltas = Deltas {
            comex_oi: comex
                .value()
                .and_then(|q| q.open_interest)
                .and_then(|_| self.sink.delta(metric::COMEX_OI)),
            shfe_oi: shfe
                .value()
                .and_then(|q| q.open_interest)
                .and_then(|_| self.sink.delta(metric::SHFE_OI)),
            slv_tonnes: self.sink.delta(metric::SLV_TONNES),
            gld_tonnes: self.sink.delta(metric::GLD_TONNES),
        };

        let derived = derive_fields(
            &spot_silver,
            &comex,
            &shfe,
            &usd_cny,
            &inventory,
            &slv_holdings,
        );

        CompositeReport {
            generated_at: self.clock.now(),
            spot_silver,
            spot_gold,
            comex,
            shfe,
            slv_price,
            gld_price,
            usd_cny,
            slv_holdings,
            gld_holdings,
            inventory,
            deliveries,
            derived,
            deltas,
            holdings_changed,
        }
    }

    /// Forward holdings to the sink when they moved; report whether any did.
    /// A first observation counts as a move.
    fn record_holdings(
        &self,
        slv: &Field<TrustHoldings>,
        gld: &Field<TrustHoldings>,
    ) -> bool {
        let mut changed = false;
        for (name, field) in [(metric::SLV_TONNES, slv), (metric::GLD_TONNES, gld)] {
            let Some(holdings) = field.value() else {
                continue;
            };
            let moved = self
                .sink
                .latest(name)
                .map_or(true, |prev| (holdings.tonnes - prev).abs() > HOLDINGS_EPSILON);
            if moved {
                self.sink.append(name, holdings.tonnes);
                changed = true;
            }
        }
        changed
    }

    fn record_scalars(
        &self,
        spot_silver: &Field<Quote>,
        spot_gold: &Field<Quote>,
        comex: &Field<FuturesQuote>,
        shfe: &Field<ShfeQuote>,
        inventory: &Field<Inventory>,
    ) {
        if let Some(q) = spot_silver.value() {
            self.sink.append(metric::SPOT_SILVER, q.price);
        }
        if let Some(q) = spot_gold.value() {
            self.sink.append(metric::SPOT_GOLD, q.price);
        }
        if let Some(q) = comex.value() {
            self.sink.append(metric::COMEX_PRICE, q.price);
            if let Some(oi) = q.open_interest {
                self.sink.append(metric::COMEX_OI, oi as f64);
            }
        }
        if let Some(q) = shfe.value() {
            self.sink.append(metric::SHFE_PRICE, q.price_cny_kg);
            if let Some(oi) = q.open_interest {
                self.sink.append(metric::SHFE_OI, oi as f64);
            }
        }
        if let Some(inv) = inventory.value() {
            self.sink.append(metric::REGISTERED, inv.registered);
            self.sink.append(metric::ELIGIBLE, inv.eligible);
        }
    }

    /// Force-refresh the trust holdings sources and report detected moves.
    /// Drives the alert cadence; everything else stays cached.
    pub async fn check_holdings(&self) -> Vec<HoldingsChange> {
        let (slv, gld) = tokio::join!(
            self.fetch_chain(&self.chains.slv_holdings, true),
            self.fetch_chain(&self.chains.gld_holdings, true),
        );
        let slv = project(&slv, |v| v.as_holdings().cloned());
        let gld = project(&gld, |v| v.as_holdings().cloned());

        let mut changes = Vec::new();
        for (trust, name, field) in [
            ("SLV", metric::SLV_TONNES, &slv),
            ("GLD", metric::GLD_TONNES, &gld),
        ] {
            let Some(holdings) = field.value() else {
                continue;
            };
            let moved = self
                .sink
                .latest(name)
                .map_or(true, |prev| (holdings.tonnes - prev).abs() > HOLDINGS_EPSILON);
            if moved {
                self.sink.append(name, holdings.tonnes);
                changes.push(HoldingsChange {
                    trust: trust.to_string(),
                    tonnes: holdings.tonnes,
                    delta_tonnes: self.sink.delta(name),
                });
            }
        }
        changes
    }

    pub async fn status(&self) -> AggregatorStatus {
        AggregatorStatus {
            sources: self.cache.snapshot().await,
            budgets: self.budget.status(),
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
        }
    }
}

/// Narrow a `Field<SourceValue>` to a typed payload, preserving freshness.
/// A variant mismatch (an adapter wired into the wrong chain) degrades to
/// unavailable rather than contaminating the field.
fn project<T>(field: &Field<SourceValue>, extract: impl Fn(&SourceValue) -> Option<T>) -> Field<T> {
    match field {
        Field::Fresh(v) => match extract(v) {
            Some(t) => Field::Fresh(t),
            None => {
                tracing::error!("source value variant mismatch in chain");
                Field::Unavailable
            }
        },
        Field::Stale(v) => match extract(v) {
            Some(t) => Field::Stale(t),
            None => Field::Unavailable,
        },
        Field::Unavailable => Field::Unavailable,
    }
}

fn derive_fields(
    spot_silver: &Field<Quote>,
    comex: &Field<FuturesQuote>,
    shfe: &Field<ShfeQuote>,
    usd_cny: &Field<f64>,
    inventory: &Field<Inventory>,
    slv_holdings: &Field<TrustHoldings>,
) -> Derived {
    let spot_price = project_inner(spot_silver, |q| Some(q.price));
    let comex_price = project_inner(comex, |q| Some(q.price));
    let comex_oi = project_inner(comex, |q| q.open_interest.map(|oi| oi as f64));
    let registered = project_inner(inventory, |inv| Some(inv.registered));
    let slv_ounces = project_inner(slv_holdings, |h| Some(h.ounces));

    let shfe_usd_oz = combine2(shfe, usd_cny, |q, rate| {
        (q.price_cny_kg / rate) / OUNCES_PER_KG
    });
    let shanghai_premium = combine2(&shfe_usd_oz, &spot_price, |shfe, spot| shfe - spot);
    let futures_basis = combine2(&comex_price, &spot_price, |fut, spot| fut - spot);
    let paper_to_physical = combine2(&comex_oi, &registered, |oi, reg| {
        if *reg > 0.0 {
            oi * OUNCES_PER_CONTRACT / reg
        } else {
            0.0
        }
    });
    let registered_share = project_inner(inventory, |inv| Some(inv.registered_share()));
    let slv_coverage = combine2(&registered, &slv_ounces, |reg, oz| {
        if *oz > 0.0 {
            reg / oz
        } else {
            0.0
        }
    });

    Derived {
        shfe_usd_oz,
        shanghai_premium,
        futures_basis,
        paper_to_physical,
        registered_share,
        slv_coverage,
    }
}

/// Like [`project`] but over an already-typed field.
fn project_inner<T, U>(field: &Field<T>, extract: impl Fn(&T) -> Option<U>) -> Field<U> {
    match field {
        Field::Fresh(v) => extract(v).map_or(Field::Unavailable, Field::Fresh),
        Field::Stale(v) => extract(v).map_or(Field::Unavailable, Field::Stale),
        Field::Unavailable => Field::Unavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use sterling_core::{ManualClock, MemorySink};

    struct MockAdapter {
        id: SourceId,
        budgeted: bool,
        /// Responses consumed in order; once drained, `fallback` repeats.
        script: std::sync::Mutex<Vec<Option<SourceValue>>>,
        fallback: Option<SourceValue>,
        calls: Arc<AtomicUsize>,
    }

    impl MockAdapter {
        fn build(
            id: SourceId,
            budgeted: bool,
            script: Vec<Option<SourceValue>>,
            fallback: Option<SourceValue>,
        ) -> (Arc<Self>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Arc::new(Self {
                    id,
                    budgeted,
                    script: std::sync::Mutex::new(script),
                    fallback,
                    calls: calls.clone(),
                }),
                calls,
            )
        }

        fn ok(id: SourceId, value: SourceValue) -> (Arc<Self>, Arc<AtomicUsize>) {
            Self::build(id, false, Vec::new(), Some(value))
        }

        fn failing(id: SourceId) -> (Arc<Self>, Arc<AtomicUsize>) {
            Self::build(id, false, Vec::new(), None)
        }

        fn budgeted(id: SourceId, value: SourceValue) -> (Arc<Self>, Arc<AtomicUsize>) {
            Self::build(id, true, Vec::new(), Some(value))
        }

        fn sequence(
            id: SourceId,
            steps: Vec<Option<SourceValue>>,
        ) -> (Arc<Self>, Arc<AtomicUsize>) {
            Self::build(id, false, steps, None)
        }
    }

    #[async_trait::async_trait]
    impl SourceAdapter for MockAdapter {
        fn id(&self) -> SourceId {
            self.id
        }

        fn ttl(&self) -> Duration {
            Duration::from_secs(3600)
        }

        fn rate_budgeted(&self) -> bool {
            self.budgeted
        }

        async fn fetch(&self) -> Result<SourceValue, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    self.fallback.clone()
                } else {
                    script.remove(0)
                }
            };
            step.ok_or_else(|| FetchError::Unavailable("mock down".into()))
        }
    }

    fn quote(price: f64) -> SourceValue {
        SourceValue::Quote(Quote {
            price,
            change_pct: None,
            previous_close: None,
        })
    }

    fn futures(price: f64, oi: u64) -> SourceValue {
        SourceValue::Futures(FuturesQuote {
            price,
            previous_close: None,
            change_pct: None,
            volume: None,
            open_interest: Some(oi),
        })
    }

    fn aggregator(chains: SourceChains, limits: HashMap<SourceId, u32>) -> Aggregator {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap(),
        ));
        let budget = Arc::new(RateBudgetGuard::new(
            clock.clone(),
            chrono::Duration::days(30),
            limits,
        ));
        Aggregator::new(
            clock,
            budget,
            Arc::new(MemorySink::new()),
            Duration::from_secs(5),
            chains,
        )
    }

    #[tokio::test]
    async fn partial_failure_marks_only_that_field() {
        let (silver, _) = MockAdapter::ok(SourceId::SpotSilver, quote(50.0));
        let (gold, _) = MockAdapter::failing(SourceId::SpotGold);
        let chains = SourceChains {
            spot_silver: vec![silver],
            spot_gold: vec![gold],
            ..Default::default()
        };

        let report = aggregator(chains, HashMap::new()).build_report(false).await;
        assert!(report.spot_silver.is_available());
        assert!(!report.spot_gold.is_available());
    }

    #[tokio::test]
    async fn derived_unavailable_when_input_missing() {
        let (silver, _) = MockAdapter::ok(SourceId::SpotSilver, quote(50.0));
        let (comex, _) = MockAdapter::ok(SourceId::ComexFutures, futures(51.5, 150_000));
        // No FX chain: the SHFE conversion and premium can't be computed.
        let chains = SourceChains {
            spot_silver: vec![silver],
            comex: vec![comex],
            ..Default::default()
        };

        let report = aggregator(chains, HashMap::new()).build_report(false).await;
        assert_eq!(report.derived.futures_basis, Field::Fresh(1.5));
        assert!(!report.derived.shanghai_premium.is_available());
        assert!(!report.derived.paper_to_physical.is_available());
    }

    #[tokio::test]
    async fn budget_refusal_falls_back_to_proxy() {
        let (api, api_calls) = MockAdapter::budgeted(SourceId::MetalsApiSilver, quote(50.0));
        let (scrape, scrape_calls) = MockAdapter::ok(SourceId::SpotSilver, quote(49.9));
        let chains = SourceChains {
            spot_silver: vec![api, scrape],
            ..Default::default()
        };

        // Limit 0: the budgeted primary is refused before its fetch runs.
        let limits = HashMap::from([(SourceId::MetalsApiSilver, 0)]);
        let report = aggregator(chains, limits).build_report(false).await;

        assert_eq!(api_calls.load(Ordering::SeqCst), 0);
        assert_eq!(scrape_calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.spot_silver.value().unwrap().price, 49.9);
        assert_eq!(report.spot_silver.freshness(), sterling_core::Freshness::Fresh);
    }

    #[tokio::test]
    async fn cache_hit_spends_no_budget() {
        let (api, api_calls) = MockAdapter::budgeted(SourceId::MetalsApiSilver, quote(50.0));
        let chains = SourceChains {
            spot_silver: vec![api],
            ..Default::default()
        };
        let limits = HashMap::from([(SourceId::MetalsApiSilver, 5)]);
        let agg = aggregator(chains, limits);

        agg.build_report(false).await;
        agg.build_report(false).await;

        assert_eq!(api_calls.load(Ordering::SeqCst), 1);
        let status = agg.status().await;
        assert_eq!(status.budgets[0].consumed, 1);
    }

    #[tokio::test]
    async fn oi_delta_appears_on_second_tick() {
        let (comex, _) = MockAdapter::sequence(
            SourceId::ComexFutures,
            vec![
                Some(futures(51.5, 150_000)),
                Some(futures(51.6, 152_000)),
            ],
        );
        let agg = aggregator(
            SourceChains {
                comex: vec![comex],
                ..Default::default()
            },
            HashMap::new(),
        );

        let report = agg.build_report(false).await;
        assert_eq!(report.deltas.comex_oi, None);

        // Force past the cache for the second observation.
        let report = agg.build_report(true).await;
        assert_eq!(report.deltas.comex_oi, Some(2_000.0));
    }

    #[tokio::test]
    async fn first_holdings_observation_flags_change() {
        let (slv, _) = MockAdapter::ok(
            SourceId::SlvHoldings,
            SourceValue::Holdings(TrustHoldings::from_ounces(450_000_000.0)),
        );
        let chains = SourceChains {
            slv_holdings: vec![slv],
            ..Default::default()
        };
        let report = aggregator(chains, HashMap::new()).build_report(false).await;
        assert!(report.holdings_changed);
    }

    #[tokio::test]
    async fn check_holdings_reports_move_with_delta() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap(),
        ));
        let budget = Arc::new(RateBudgetGuard::new(
            clock.clone(),
            chrono::Duration::days(30),
            HashMap::new(),
        ));
        let sink = Arc::new(MemorySink::new());
        sink.append(metric::SLV_TONNES, 14_000.0);

        let (slv, _) = MockAdapter::ok(
            SourceId::SlvHoldings,
            SourceValue::Holdings(TrustHoldings {
                tonnes: 14_025.5,
                ounces: 14_025.5 * 32_150.7,
            }),
        );
        let agg = Aggregator::new(
            clock,
            budget,
            sink,
            Duration::from_secs(5),
            SourceChains {
                slv_holdings: vec![slv],
                ..Default::default()
            },
        );

        let changes = agg.check_holdings().await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].trust, "SLV");
        assert_eq!(changes[0].delta_tonnes, Some(25.5));

        // No further move: a second check is quiet.
        let changes = agg.check_holdings().await;
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn stale_primary_loses_to_fresh_proxy() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap(),
        ));
        let budget = Arc::new(RateBudgetGuard::new(
            clock.clone(),
            chrono::Duration::days(30),
            HashMap::new(),
        ));

        // Primary succeeds once, then stays down; proxy is healthy.
        let (primary, _) =
            MockAdapter::sequence(SourceId::MetalsApiSilver, vec![Some(quote(50.0))]);
        let (proxy, proxy_calls) = MockAdapter::ok(SourceId::SpotSilver, quote(49.5));
        let agg = Aggregator::new(
            clock.clone(),
            budget,
            Arc::new(MemorySink::new()),
            Duration::from_secs(5),
            SourceChains {
                spot_silver: vec![primary, proxy],
                ..Default::default()
            },
        );

        let report = agg.build_report(false).await;
        assert_eq!(report.spot_silver.value().unwrap().price, 50.0);
        assert_eq!(proxy_calls.load(Ordering::SeqCst), 0);

        clock.advance(chrono::Duration::seconds(7200)); // past the mock TTL

        // Primary now fails: its cached value is only a stale candidate and
        // the fresh proxy value wins.
        let report = agg.build_report(false).await;
        assert_eq!(
            report.spot_silver,
            Field::Fresh(Quote {
                price: 49.5,
                change_pct: None,
                previous_close: None,
            })
        );
    }
}
