pub mod ema;
pub mod rsi;
pub mod stoch_rsi;

pub use ema::EmaIndicator;
pub use rsi::RsiIndicator;
pub use stoch_rsi::{StochLines, StochRsi};

use common::{Candle, Error, IndicatorSnapshot, Result};

use crate::StrategyParams;

/// Compute one snapshot per candle whose indicator windows are all populated.
///
/// Pure function of `candles` (oldest first). Warm-up candles are omitted,
/// never zero-filled. Fails with `InsufficientData` when `candles` is
/// shorter than `params.required_history()`.
pub fn compute_snapshots(
    candles: &[Candle],
    params: &StrategyParams,
) -> Result<Vec<IndicatorSnapshot>> {
    let required = params.required_history();
    if candles.len() < required {
        return Err(Error::InsufficientData {
            required,
            available: candles.len(),
        });
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let fast = EmaIndicator::new(params.fast_ema).series(&closes);
    let slow = EmaIndicator::new(params.slow_ema).series(&closes);
    let rsi = RsiIndicator::new(params.rsi_period).series(&closes);
    let stoch = StochRsi::new(params.stoch_period, params.k_smooth, params.d_smooth).lines(&rsi);

    let snapshots = candles
        .iter()
        .enumerate()
        .filter_map(|(i, candle)| {
            Some(IndicatorSnapshot {
                fast_ema: fast[i]?,
                slow_ema: slow[i]?,
                stoch_rsi: stoch.k[i]?,
                stoch_rsi_d: stoch.d[i]?,
                close: candle.close,
                timestamp: candle.timestamp,
            })
        })
        .collect();

    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
                timestamp: start + Duration::hours(i as i64),
            })
            .collect()
    }

    fn wave(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + (i as f64 * 0.4).sin() * 5.0 + i as f64 * 0.1)
            .collect()
    }

    #[test]
    fn short_history_fails_with_insufficient_data() {
        let params = StrategyParams::default();
        let series = candles(&wave(params.required_history() - 1));
        match compute_snapshots(&series, &params) {
            Err(Error::InsufficientData { required, available }) => {
                assert_eq!(required, 32);
                assert_eq!(available, 31);
            }
            other => panic!("expected InsufficientData, got {other:?}"),
        }
    }

    #[test]
    fn exact_warmup_yields_single_snapshot() {
        let params = StrategyParams::default();
        let series = candles(&wave(params.required_history()));
        let snapshots = compute_snapshots(&series, &params).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].timestamp, series.last().unwrap().timestamp);
    }

    #[test]
    fn one_snapshot_per_candle_after_warmup() {
        let params = StrategyParams::default();
        let series = candles(&wave(100));
        let snapshots = compute_snapshots(&series, &params).unwrap();
        assert_eq!(snapshots.len(), 100 - params.required_history() + 1);
        assert!(snapshots
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn uptrend_puts_fast_ema_above_slow() {
        let params = StrategyParams::default();
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let snapshots = compute_snapshots(&candles(&closes), &params).unwrap();
        let last = snapshots.last().unwrap();
        assert!(last.fast_ema > last.slow_ema);
    }
}
