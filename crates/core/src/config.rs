use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_i32(profile: &str, key: &str, default: i32) -> i32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub discord: DiscordConfig,
    pub sources: SourcesConfig,
    pub cache: CacheConfig,
    pub budget: BudgetConfig,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `STERLING_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = profiled_env_or("", "STERLING_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            discord: DiscordConfig::from_env_profiled(p),
            sources: SourcesConfig::from_env_profiled(p),
            cache: CacheConfig::from_env_profiled(p),
            budget: BudgetConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() {
            "default"
        } else {
            &self.profile
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  discord:    token={}, channels={:?}",
            if self.discord.bot_token.is_some() { "set" } else { "(none)" },
            self.discord.channel_ids,
        );
        tracing::info!(
            "  sources:    metals_api={}, contract_label={}",
            if self.sources.metals_api_key.is_some() { "set" } else { "(none)" },
            self.sources.contract_label,
        );
        tracing::info!(
            "  cache:      quote_ttl={}s, daily_ttl={}h",
            self.cache.quote_ttl_secs,
            self.cache.daily_ttl_hours,
        );
        tracing::info!(
            "  budget:     limit={}/window, window={}d",
            self.budget.request_limit,
            self.budget.window_days,
        );
        tracing::info!(
            "  scheduler:  report={}m {}–{}h, alert={}m {}–{}h, utc_offset={}h",
            self.scheduler.report_interval_mins,
            self.scheduler.report_start_hour,
            self.scheduler.report_end_hour,
            self.scheduler.alert_interval_mins,
            self.scheduler.alert_start_hour,
            self.scheduler.alert_end_hour,
            self.scheduler.utc_offset_hours,
        );
    }
}

// ── Discord ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: Option<String>,
    pub api_base: String,
    /// Channels enabled for autorun at startup.
    pub channel_ids: Vec<u64>,
}

impl DiscordConfig {
    fn from_env_profiled(p: &str) -> Self {
        let channel_ids = profiled_env_opt(p, "DISCORD_CHANNEL_IDS")
            .map(|raw| {
                raw.split(',')
                    .filter_map(|s| s.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            bot_token: profiled_env_opt(p, "DISCORD_BOT_TOKEN"),
            api_base: profiled_env_or(p, "DISCORD_API_BASE", "https://discord.com/api/v10"),
            channel_ids,
        }
    }
}

// ── Sources ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub quote_base_url: String,
    pub metals_api_url: String,
    pub metals_api_key: Option<String>,
    pub trust_page_url: String,
    pub holdings_archive_url: String,
    pub inventory_report_url: String,
    pub bulletin_url: String,
    pub fx_url: String,
    /// Section label the bulletin extractor validates header lines against.
    pub contract_label: String,
    pub fetch_timeout_secs: u64,
}

impl SourcesConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            quote_base_url: profiled_env_or(
                p,
                "QUOTE_BASE_URL",
                "https://www.barchart.com",
            ),
            metals_api_url: profiled_env_or(
                p,
                "METALS_API_URL",
                "https://api.metals.dev/v1/latest",
            ),
            metals_api_key: profiled_env_opt(p, "METALS_API_KEY"),
            trust_page_url: profiled_env_or(
                p,
                "TRUST_PAGE_URL",
                "https://www.ishares.com/us/products/239855/ishares-silver-trust-fund",
            ),
            holdings_archive_url: profiled_env_or(
                p,
                "HOLDINGS_ARCHIVE_URL",
                "https://www.spdrgoldshares.com/assets/dynamic/GLD/GLD_US_archive_EN.csv",
            ),
            inventory_report_url: profiled_env_or(
                p,
                "INVENTORY_REPORT_URL",
                "https://www.cmegroup.com/delivery_reports/Silver_stocks.csv",
            ),
            bulletin_url: profiled_env_or(
                p,
                "BULLETIN_URL",
                "https://www.cmegroup.com/delivery_reports/MetalsIssuesAndStopsMTDReport.pdf",
            ),
            fx_url: profiled_env_or(
                p,
                "FX_URL",
                "https://open.er-api.com/v6/latest/USD",
            ),
            contract_label: profiled_env_or(p, "BULLETIN_CONTRACT_LABEL", "SILVER FUTURES"),
            fetch_timeout_secs: profiled_env_u64(p, "FETCH_TIMEOUT_SECONDS", 15),
        }
    }
}

// ── Cache ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for intraday quotes.
    pub quote_ttl_secs: u64,
    /// TTL for once-a-day feeds (holdings, inventory, bulletin, FX).
    pub daily_ttl_hours: u64,
}

impl CacheConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            quote_ttl_secs: profiled_env_u64(p, "QUOTE_TTL_SECONDS", 1800),
            daily_ttl_hours: profiled_env_u64(p, "DAILY_TTL_HOURS", 24),
        }
    }
}

// ── Rate budget ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Requests allowed per window for each budgeted source.
    pub request_limit: u32,
    /// Window length in days (fixed periodic window, anchored at startup).
    pub window_days: u32,
}

impl BudgetConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            request_limit: profiled_env_u32(p, "METALS_API_MONTHLY_LIMIT", 200),
            window_days: profiled_env_u32(p, "BUDGET_WINDOW_DAYS", 30),
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub report_interval_mins: u64,
    pub report_start_hour: u32,
    pub report_end_hour: u32,
    pub alert_interval_mins: u64,
    pub alert_start_hour: u32,
    pub alert_end_hour: u32,
    /// Offset of the market's local time from UTC, in hours.
    pub utc_offset_hours: i32,
    pub tick_timeout_secs: u64,
    pub publish_timeout_secs: u64,
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            report_interval_mins: profiled_env_u64(p, "REPORT_INTERVAL_MINUTES", 60),
            report_start_hour: profiled_env_u32(p, "REPORT_START_HOUR", 8),
            report_end_hour: profiled_env_u32(p, "REPORT_END_HOUR", 20),
            alert_interval_mins: profiled_env_u64(p, "ALERT_INTERVAL_MINUTES", 5),
            alert_start_hour: profiled_env_u32(p, "ALERT_START_HOUR", 17),
            alert_end_hour: profiled_env_u32(p, "ALERT_END_HOUR", 20),
            utc_offset_hours: profiled_env_i32(p, "MARKET_UTC_OFFSET_HOURS", -5),
            tick_timeout_secs: profiled_env_u64(p, "TICK_TIMEOUT_SECONDS", 120),
            publish_timeout_secs: profiled_env_u64(p, "PUBLISH_TIMEOUT_SECONDS", 30),
        }
    }
}
