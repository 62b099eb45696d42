use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::{Error, Result, Timeframe};
use risk::RiskConfig;
use strategy::StrategyParams;

use crate::retry::RetryPolicy;

/// Engine configuration file (TOML). Loaded once at startup.
///
/// Example `config/trendbot.toml`:
/// ```toml
/// [engine]
/// tick_interval_ms = 5000
/// max_concurrent_positions = 2
///
/// [risk]
/// max_risk_per_trade = 0.01
/// stop_loss_pct = 0.02
/// take_profit_pct = 0.04
///
/// [[pair]]
/// symbol = "BTCUSDT"
/// timeframe = "1h"
///
/// [pair.strategy]
/// fast_ema = 12
/// slow_ema = 25
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineFileConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Defaults for every pair without its own `[pair.risk]`.
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(rename = "pair", default)]
    pub pairs: Vec<PairConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Milliseconds between ticks. Defaults to each pair's timeframe.
    pub tick_interval_ms: Option<u64>,
    /// Candles fetched per tick.
    pub candle_history: usize,
    pub max_concurrent_positions: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: None,
            candle_history: 200,
            max_concurrent_positions: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Bound on a single `submit_order` call.
    pub submit_timeout_ms: u64,
    /// How long a working order is polled before it is cancelled.
    pub fill_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Submissions per intent, counting resubmits after a confirmed NotFound.
    pub max_submit_attempts: u32,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            submit_timeout_ms: 5_000,
            fill_timeout_ms: 30_000,
            poll_interval_ms: 1_000,
            max_submit_attempts: 2,
        }
    }
}

impl ExecutionSettings {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn fill_timeout(&self) -> Duration {
        Duration::from_millis(self.fill_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PairConfig {
    /// Trading pair, e.g. "BTCUSDT".
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: Timeframe,
    #[serde(default)]
    pub strategy: StrategyParams,
    /// Overrides the top-level `[risk]` section for this pair.
    #[serde(default)]
    pub risk: Option<RiskConfig>,
}

fn default_timeframe() -> Timeframe {
    Timeframe::H1
}

impl EngineFileConfig {
    /// Read, parse and validate the file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read engine config at '{path}': {e}")))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pairs.is_empty() {
            return Err(Error::Config("at least one [[pair]] is required".into()));
        }
        if self.engine.max_concurrent_positions == 0 {
            return Err(Error::Config("max_concurrent_positions must be at least 1".into()));
        }
        if self.engine.tick_interval_ms == Some(0) {
            return Err(Error::Config("tick_interval_ms must be positive".into()));
        }
        if self.execution.max_submit_attempts == 0 {
            return Err(Error::Config("max_submit_attempts must be at least 1".into()));
        }
        if self.execution.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        self.risk.validate()?;

        let mut seen = HashSet::new();
        for pair in &self.pairs {
            if pair.symbol.trim().is_empty() {
                return Err(Error::Config("pair symbol must not be empty".into()));
            }
            if !seen.insert(pair.symbol.as_str()) {
                return Err(Error::Config(format!("duplicate pair '{}'", pair.symbol)));
            }
            pair.strategy
                .validate()
                .map_err(|e| Error::Config(format!("{}: {e}", pair.symbol)))?;
            if let Some(risk) = &pair.risk {
                risk.validate()
                    .map_err(|e| Error::Config(format!("{}: {e}", pair.symbol)))?;
                // One drawdown guard watches the whole account.
                if risk.max_drawdown_pct != self.risk.max_drawdown_pct {
                    return Err(Error::Config(format!(
                        "{}: max_drawdown_pct is account-wide and must match [risk]",
                        pair.symbol
                    )));
                }
            }
            let required = pair.strategy.required_history();
            if self.engine.candle_history < required {
                return Err(Error::Config(format!(
                    "{}: candle_history {} is below the {} candles the indicators need",
                    pair.symbol, self.engine.candle_history, required
                )));
            }
        }
        Ok(())
    }

    pub fn risk_for(&self, pair: &PairConfig) -> RiskConfig {
        pair.risk.clone().unwrap_or_else(|| self.risk.clone())
    }

    pub fn tick_interval(&self, pair: &PairConfig) -> Duration {
        self.engine
            .tick_interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| pair.timeframe.duration())
    }
}
