//! Environment-driven configuration. The only module that reads env vars.
//!
//! One struct per concern, sane defaults, `dotenvy` for local `.env` files.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct VenueLimits {
    pub reads_per_sec: f64,
    pub writes_per_sec: f64,
}

#[derive(Debug, Clone)]
pub struct TradingConfig {
    pub database_path: String,
    pub server_port: u16,
    pub session_log_dir: String,
    pub backup_dir: String,
    pub backup_max_age_hours: i64,
    pub backup_retain_count: usize,

    pub kalshi_base_url: String,
    pub polymarket_base_url: String,
    pub kalshi_limits: VenueLimits,
    pub polymarket_limits: VenueLimits,

    pub max_slippage_cents: i64,
    pub min_edge_pct: f64,
    pub max_position_usd_kalshi: f64,
    pub max_position_usd_polymarket: f64,
    pub max_portfolio_usd: f64,

    pub maker_fill_timeout_secs: u64,
    pub taker_fill_timeout_secs: u64,
    pub recommendation_ttl_minutes: i64,
    pub wrap_up_timeout_secs: u64,
}

impl TradingConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_path: env_or("DATABASE_PATH", "./copilot-engine.db"),
            server_port: env_or("SERVER_PORT", "8765").parse().context("SERVER_PORT")?,
            session_log_dir: env_or("SESSION_LOG_DIR", "./sessions"),
            backup_dir: env_or("BACKUP_DIR", "./backups"),
            backup_max_age_hours: env_or("BACKUP_MAX_AGE_HOURS", "24")
                .parse()
                .context("BACKUP_MAX_AGE_HOURS")?,
            backup_retain_count: env_or("BACKUP_RETAIN_COUNT", "7")
                .parse()
                .context("BACKUP_RETAIN_COUNT")?,

            kalshi_base_url: env_or("KALSHI_BASE_URL", "https://api.elections.kalshi.com"),
            polymarket_base_url: env_or("POLYMARKET_BASE_URL", "https://api.polymarket.us"),
            kalshi_limits: VenueLimits {
                reads_per_sec: env_or("KALSHI_READS_PER_SEC", "30").parse()?,
                writes_per_sec: env_or("KALSHI_WRITES_PER_SEC", "30").parse()?,
            },
            polymarket_limits: VenueLimits {
                reads_per_sec: env_or("POLYMARKET_READS_PER_SEC", "15").parse()?,
                writes_per_sec: env_or("POLYMARKET_WRITES_PER_SEC", "50").parse()?,
            },

            max_slippage_cents: env_or("MAX_SLIPPAGE_CENTS", "3").parse()?,
            min_edge_pct: env_or("MIN_EDGE_PCT", "2.0").parse()?,
            max_position_usd_kalshi: env_or("MAX_POSITION_USD_KALSHI", "500").parse()?,
            max_position_usd_polymarket: env_or("MAX_POSITION_USD_POLYMARKET", "500").parse()?,
            max_portfolio_usd: env_or("MAX_PORTFOLIO_USD", "1000").parse()?,

            maker_fill_timeout_secs: env_or("MAKER_FILL_TIMEOUT_SECS", "60").parse()?,
            taker_fill_timeout_secs: env_or("TAKER_FILL_TIMEOUT_SECS", "30").parse()?,
            recommendation_ttl_minutes: env_or("RECOMMENDATION_TTL_MINUTES", "60").parse()?,
            wrap_up_timeout_secs: env_or("WRAP_UP_TIMEOUT_SECS", "20").parse()?,
        })
    }

    pub fn max_position_usd(&self, exchange: &str) -> f64 {
        match exchange {
            crate::models::EXCHANGE_KALSHI => self.max_position_usd_kalshi,
            crate::models::EXCHANGE_POLYMARKET => self.max_position_usd_polymarket,
            _ => 0.0,
        }
    }
}

/// Signing credentials. PEM material may be supplied inline (with `\n`
/// escaped) or as a filesystem path.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub kalshi_api_key_id: String,
    pub kalshi_private_key_pem: Option<String>,
    pub kalshi_private_key_path: Option<String>,

    pub polymarket_key_id: String,
    pub polymarket_secret_key_b64: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            kalshi_api_key_id: std::env::var("KALSHI_API_KEY_ID").unwrap_or_default(),
            kalshi_private_key_pem: std::env::var("KALSHI_PRIVATE_KEY")
                .ok()
                .map(|s| s.replace("\\n", "\n")),
            kalshi_private_key_path: std::env::var("KALSHI_PRIVATE_KEY_PATH").ok(),

            polymarket_key_id: std::env::var("POLYMARKET_KEY_ID").unwrap_or_default(),
            polymarket_secret_key_b64: std::env::var("POLYMARKET_SECRET_KEY").ok(),
        }
    }

    pub fn kalshi_private_key_pem(&self) -> Result<String> {
        if let Some(pem) = &self.kalshi_private_key_pem {
            return Ok(pem.clone());
        }
        let path = self
            .kalshi_private_key_path
            .as_ref()
            .context("no KALSHI_PRIVATE_KEY or KALSHI_PRIVATE_KEY_PATH configured")?;
        std::fs::read_to_string(path).with_context(|| format!("reading {path}"))
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
