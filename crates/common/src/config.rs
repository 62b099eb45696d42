use crate::{Error, Result};

/// Process-level configuration loaded from environment variables at startup.
/// Pair and strategy settings live in the TOML engine file it points to.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Engine config file path
    pub engine_config_path: String,

    // Health endpoints (disabled when unset)
    pub health_port: Option<u16>,

    // Paper venue
    pub paper_initial_balance: f64,
    pub paper_slippage_bps: f64,
    pub paper_fee_bps: f64,
    pub paper_seed: u64,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Ok(Config {
            database_url: required_env("DATABASE_URL")?,
            engine_config_path: optional_env("ENGINE_CONFIG_PATH")
                .unwrap_or_else(|| "config/trendbot.toml".to_string()),
            health_port: parsed_env("HEALTH_PORT")?,
            paper_initial_balance: parsed_env("PAPER_INITIAL_BALANCE")?.unwrap_or(10_000.0),
            paper_slippage_bps: parsed_env("PAPER_SLIPPAGE_BPS")?.unwrap_or(10.0),
            paper_fee_bps: parsed_env("PAPER_FEE_BPS")?.unwrap_or(26.0),
            paper_seed: parsed_env("PAPER_SEED")?.unwrap_or(7),
        })
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        Error::Config(format!(
            "Required environment variable '{key}' is not set. Check your .env file."
        ))
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match optional_env(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'"))),
    }
}
