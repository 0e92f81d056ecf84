//! sterling-bot — market report aggregator and Discord delivery service.
//!
//! Wires the source adapters, cache, rate budget, aggregator, delivery
//! controller and the two cadence loops, then runs until interrupted.
//! `once` and `status` subcommands drive the same command operations the
//! platform would, for one-shot use from a shell.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use sterling_core::config::{load_dotenv, Config};
use sterling_core::{MemorySink, SystemClock};
use sterling_delivery::controller::DeliveryController;
use sterling_delivery::discord::DiscordApi;
use sterling_delivery::platform::ChannelId;
use sterling_delivery::registry::ChannelRegistry;
use sterling_market::aggregator::SourceChains;
use sterling_market::bulletin::{BulletinAdapter, BulletinClient};
use sterling_market::sources::{
    FxRateAdapter, HoldingsArchiveAdapter, InventoryReportAdapter, MetalsApiAdapter, QuoteKind,
    QuotePageAdapter, TrustHoldingsAdapter,
};
use sterling_market::{Aggregator, RateBudgetGuard, SourceAdapter, SourceId};
use sterling_scheduler::{ActiveWindow, Cadence, Command, Dispatcher};

// ── CLI ─────────────────────────────────────────────────────────────

/// Sterling market data bot — aggregates metal market sources and delivers
/// composite reports to Discord channels.
#[derive(Parser, Debug)]
#[command(name = "sterling-bot", version, about)]
struct Cli {
    /// Config profile; every key is looked up as {PROFILE}_{KEY} first.
    #[arg(long, env = "STERLING_PROFILE", default_value = "")]
    profile: String,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run both cadence loops until interrupted (default).
    Run,
    /// Force-build a report, publish it to one channel, and exit.
    Once {
        #[arg(long)]
        channel: u64,
    },
    /// Print delivery and source status for one channel, and exit.
    Status {
        #[arg(long)]
        channel: u64,
    },
}

// ── Wiring ──────────────────────────────────────────────────────────

fn build_chains(config: &Config, http: &reqwest::Client) -> SourceChains {
    let quote_ttl = Duration::from_secs(config.cache.quote_ttl_secs);
    let daily_ttl = Duration::from_secs(config.cache.daily_ttl_hours * 3600);
    let timeout = Duration::from_secs(config.sources.fetch_timeout_secs);
    let page = |path: &str| format!("{}{}", config.sources.quote_base_url, path);

    let quote = |id: SourceId, kind: QuoteKind, path: &str| -> Arc<dyn SourceAdapter> {
        Arc::new(QuotePageAdapter::new(
            id,
            kind,
            http.clone(),
            page(path),
            quote_ttl,
            timeout,
        ))
    };

    // Budgeted API first where a key is configured, scrape as the
    // non-budgeted proxy behind it.
    let mut spot_silver: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    let mut spot_gold: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    if let Some(key) = &config.sources.metals_api_key {
        spot_silver.push(Arc::new(MetalsApiAdapter::silver(
            http.clone(),
            config.sources.metals_api_url.clone(),
            key.clone(),
            quote_ttl,
            timeout,
        )));
        spot_gold.push(Arc::new(MetalsApiAdapter::gold(
            http.clone(),
            config.sources.metals_api_url.clone(),
            key.clone(),
            quote_ttl,
            timeout,
        )));
    }
    spot_silver.push(quote(
        SourceId::SpotSilver,
        QuoteKind::Spot,
        "/forex/quotes/%5EXAGUSD/overview",
    ));
    spot_gold.push(quote(
        SourceId::SpotGold,
        QuoteKind::Spot,
        "/forex/quotes/%5EXAUUSD/overview",
    ));

    SourceChains {
        spot_silver,
        spot_gold,
        comex: vec![quote(
            SourceId::ComexFutures,
            QuoteKind::Futures,
            "/futures/quotes/SIH26/overview",
        )],
        shfe: vec![quote(
            SourceId::ShfeFutures,
            QuoteKind::Shfe,
            "/futures/quotes/XOH26/overview",
        )],
        slv_price: vec![quote(
            SourceId::SlvPrice,
            QuoteKind::Spot,
            "/etfs-funds/quotes/SLV/overview",
        )],
        gld_price: vec![quote(
            SourceId::GldPrice,
            QuoteKind::Spot,
            "/etfs-funds/quotes/GLD/overview",
        )],
        slv_holdings: vec![Arc::new(TrustHoldingsAdapter::new(
            http.clone(),
            config.sources.trust_page_url.clone(),
            daily_ttl,
            timeout,
        ))],
        gld_holdings: vec![Arc::new(HoldingsArchiveAdapter::new(
            http.clone(),
            config.sources.holdings_archive_url.clone(),
            daily_ttl,
            timeout,
        ))],
        inventory: vec![Arc::new(InventoryReportAdapter::new(
            http.clone(),
            config.sources.inventory_report_url.clone(),
            daily_ttl,
            timeout,
        ))],
        deliveries: vec![Arc::new(BulletinAdapter::new(
            BulletinClient::new(http.clone(), config.sources.bulletin_url.clone(), timeout),
            config.sources.contract_label.clone(),
            daily_ttl,
        ))],
        fx: vec![Arc::new(FxRateAdapter::new(
            http.clone(),
            config.sources.fx_url.clone(),
            daily_ttl,
            timeout,
        ))],
    }
}

fn build_dispatcher(config: &Config) -> anyhow::Result<Arc<Dispatcher>> {
    let http = reqwest::Client::builder()
        .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36")
        .build()?;

    let clock = Arc::new(SystemClock);
    let budget = Arc::new(RateBudgetGuard::new(
        clock.clone(),
        chrono::Duration::days(config.budget.window_days as i64),
        HashMap::from([
            (SourceId::MetalsApiSilver, config.budget.request_limit),
            (SourceId::MetalsApiGold, config.budget.request_limit),
        ]),
    ));
    let aggregator = Arc::new(Aggregator::new(
        clock.clone(),
        budget,
        Arc::new(MemorySink::new()),
        Duration::from_secs(config.sources.fetch_timeout_secs),
        build_chains(config, &http),
    ));

    let token = config
        .discord
        .bot_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DISCORD_BOT_TOKEN is not set"))?;
    let platform = Arc::new(DiscordApi::new(token, config.discord.api_base.clone())?);

    let registry = Arc::new(ChannelRegistry::new());
    for id in &config.discord.channel_ids {
        registry.enable(ChannelId(*id));
    }
    let controller = Arc::new(DeliveryController::new(platform, registry.clone()));

    Ok(Arc::new(Dispatcher::new(
        aggregator,
        controller,
        registry,
        clock,
        Duration::from_secs(config.scheduler.tick_timeout_secs),
        Duration::from_secs(config.scheduler.publish_timeout_secs),
    )))
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::for_profile(&cli.profile);
    config.log_summary();

    let dispatcher = build_dispatcher(&config)?;

    match cli.command.unwrap_or(Cmd::Run) {
        Cmd::Run => {
            let sched = &config.scheduler;
            let report = Cadence::report(
                Duration::from_secs(sched.report_interval_mins * 60),
                ActiveWindow::new(
                    sched.report_start_hour,
                    sched.report_end_hour,
                    sched.utc_offset_hours,
                ),
            );
            let alert = Cadence::alert(
                Duration::from_secs(sched.alert_interval_mins * 60),
                ActiveWindow::new(
                    sched.alert_start_hour,
                    sched.alert_end_hour,
                    sched.utc_offset_hours,
                ),
            );

            tokio::spawn(dispatcher.clone().run_cadence(report));
            tokio::spawn(dispatcher.clone().run_cadence(alert));
            info!("sterling-bot running; press ctrl-c to stop");

            tokio::signal::ctrl_c().await?;
            info!("sterling-bot shutting down");
        }
        Cmd::Once { channel } => {
            let reply = dispatcher
                .handle_command(ChannelId(channel), Command::ForceUpdate)
                .await;
            println!("{reply}");
        }
        Cmd::Status { channel } => {
            let reply = dispatcher
                .handle_command(ChannelId(channel), Command::Status)
                .await;
            println!("{reply}");
        }
    }

    Ok(())
}
