use serde::{Deserialize, Serialize};

use common::{Error, Result};

/// Per-pair indicator and signal parameters (the `[pair.strategy]` table).
///
/// Example:
/// ```toml
/// [pair.strategy]
/// fast_ema = 12
/// slow_ema = 25
/// rsi_period = 14
/// stoch_period = 14
/// counter_threshold = 3
/// stoch_lower = 20.0
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StrategyParams {
    pub fast_ema: usize,
    pub slow_ema: usize,
    pub rsi_period: usize,
    pub stoch_period: usize,
    /// SMA length applied to the raw stochastic to get %K.
    pub k_smooth: usize,
    /// SMA length applied to %K to get %D.
    pub d_smooth: usize,
    /// Non-crossover candles required before a bullish crossover may enter.
    pub counter_threshold: u32,
    /// Entry requires `stoch_lower < %K <= stoch_upper`.
    pub stoch_lower: f64,
    pub stoch_upper: f64,
    pub reset_on_bearish: bool,
    pub reset_on_unconfirmed_bullish: bool,
    pub alert_bands: AlertBands,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            fast_ema: 12,
            slow_ema: 25,
            rsi_period: 14,
            stoch_period: 14,
            k_smooth: 3,
            d_smooth: 3,
            counter_threshold: 3,
            stoch_lower: 20.0,
            stoch_upper: 100.0,
            reset_on_bearish: true,
            reset_on_unconfirmed_bullish: true,
            alert_bands: AlertBands::default(),
        }
    }
}

/// StochRSI levels used for informational alerts.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl Default for AlertBands {
    fn default() -> Self {
        Self {
            upper: 80.0,
            middle: 50.0,
            lower: 20.0,
        }
    }
}

impl StrategyParams {
    /// Candles needed before the first snapshot can be produced.
    pub fn required_history(&self) -> usize {
        let stoch_warmup =
            self.rsi_period + self.stoch_period + (self.k_smooth - 1) + (self.d_smooth - 1);
        self.slow_ema.max(stoch_warmup)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fast_ema == 0 || self.fast_ema >= self.slow_ema {
            return Err(Error::Config(format!(
                "fast_ema ({}) must be non-zero and less than slow_ema ({})",
                self.fast_ema, self.slow_ema
            )));
        }
        if self.rsi_period < 2 {
            return Err(Error::Config("rsi_period must be >= 2".into()));
        }
        if self.stoch_period == 0 || self.k_smooth == 0 || self.d_smooth == 0 {
            return Err(Error::Config(
                "stoch_period, k_smooth and d_smooth must be >= 1".into(),
            ));
        }
        if !(0.0..100.0).contains(&self.stoch_lower)
            || self.stoch_upper <= self.stoch_lower
            || self.stoch_upper > 100.0
        {
            return Err(Error::Config(format!(
                "stoch bounds must satisfy 0 <= lower < upper <= 100, got {} / {}",
                self.stoch_lower, self.stoch_upper
            )));
        }
        let b = &self.alert_bands;
        if !(b.lower < b.middle && b.middle < b.upper) {
            return Err(Error::Config("alert bands must satisfy lower < middle < upper".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_warmup_covers_smoothed_stochastic() {
        let params = StrategyParams::default();
        // 14 + 14 + 2 + 2 outweighs slow EMA of 25
        assert_eq!(params.required_history(), 32);
    }

    #[test]
    fn unsmoothed_warmup_is_max_of_slow_and_rsi_plus_stoch() {
        let params = StrategyParams {
            k_smooth: 1,
            d_smooth: 1,
            slow_ema: 40,
            ..StrategyParams::default()
        };
        assert_eq!(params.required_history(), 40);
        let params = StrategyParams {
            k_smooth: 1,
            d_smooth: 1,
            ..StrategyParams::default()
        };
        assert_eq!(params.required_history(), 28);
    }

    #[test]
    fn validate_rejects_inverted_emas() {
        let params = StrategyParams {
            fast_ema: 30,
            ..StrategyParams::default()
        };
        assert!(params.validate().is_err());
        assert!(StrategyParams::default().validate().is_ok());
    }

    #[test]
    fn partial_table_falls_back_to_defaults() {
        let params: StrategyParams = toml::from_str("counter_threshold = 5").unwrap();
        assert_eq!(params.counter_threshold, 5);
        assert_eq!(params.fast_ema, 12);
        assert_eq!(params.alert_bands.upper, 80.0);
    }
}
