use chrono::{DateTime, Utc};
use tracing::debug;

use common::{IndicatorSnapshot, Signal, SignalKind};

use crate::StrategyParams;

/// Direction of an EMA crossover between two consecutive snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossover {
    Bullish,
    Bearish,
    None,
}

impl Crossover {
    /// Equal EMAs on the current snapshot never count as a crossover.
    pub fn detect(prev: &IndicatorSnapshot, curr: &IndicatorSnapshot) -> Self {
        if prev.fast_ema <= prev.slow_ema && curr.fast_ema > curr.slow_ema {
            Crossover::Bullish
        } else if prev.fast_ema >= prev.slow_ema && curr.fast_ema < curr.slow_ema {
            Crossover::Bearish
        } else {
            Crossover::None
        }
    }
}

/// Maps indicator snapshots to discrete signals for one pair.
///
/// Holds the crossover counter: the number of non-crossover candles since
/// its last reset. A bullish crossover only becomes `EnterLong` once the
/// counter has cleared `counter_threshold` and %K sits inside the entry
/// bounds. Bearish crossovers always yield `ExitLong`.
///
/// Never looks at position state.
#[derive(Debug, Clone)]
pub struct SignalEngine {
    params: StrategyParams,
    counter: u32,
    last_seen: Option<DateTime<Utc>>,
    prev: Option<IndicatorSnapshot>,
}

impl SignalEngine {
    pub fn new(params: StrategyParams) -> Self {
        Self {
            params,
            counter: 0,
            last_seen: None,
            prev: None,
        }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Timestamp of the last snapshot that advanced the engine.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// Evaluate the snapshots newer than the last one seen, in order.
    ///
    /// Only the latest snapshot may produce a non-`None` signal; older ones
    /// (the warm-up replay on first call, or candles missed between ticks)
    /// just advance the counter. Returns `None` for an empty slice.
    pub fn evaluate(&mut self, snapshots: &[IndicatorSnapshot]) -> Option<Signal> {
        let latest = *snapshots.last()?;
        let start = match self.last_seen {
            Some(seen) => snapshots.partition_point(|s| s.timestamp <= seen),
            None => 0,
        };
        if start == snapshots.len() {
            return Some(Signal::none(latest));
        }

        let mut kind = SignalKind::None;
        for idx in start..snapshots.len() {
            let prev = if idx > 0 {
                Some(snapshots[idx - 1])
            } else {
                self.prev
            };
            kind = self.step(prev.as_ref(), &snapshots[idx]);
        }

        self.last_seen = Some(latest.timestamp);
        self.prev = Some(latest);

        Some(Signal {
            kind,
            timestamp: latest.timestamp,
            snapshot: latest,
        })
    }

    fn step(&mut self, prev: Option<&IndicatorSnapshot>, curr: &IndicatorSnapshot) -> SignalKind {
        let Some(prev) = prev else {
            return SignalKind::None;
        };

        match Crossover::detect(prev, curr) {
            Crossover::Bullish => {
                if self.counter >= self.params.counter_threshold && self.stoch_confirms(curr) {
                    self.counter = 0;
                    SignalKind::EnterLong
                } else {
                    debug!(
                        counter = self.counter,
                        stoch_rsi = curr.stoch_rsi,
                        "Bullish crossover not confirmed"
                    );
                    if self.params.reset_on_unconfirmed_bullish {
                        self.counter = 0;
                    } else {
                        self.counter = self.counter.saturating_add(1);
                    }
                    SignalKind::None
                }
            }
            Crossover::Bearish => {
                if self.params.reset_on_bearish {
                    self.counter = 0;
                } else {
                    self.counter = self.counter.saturating_add(1);
                }
                SignalKind::ExitLong
            }
            Crossover::None => {
                self.counter = self.counter.saturating_add(1);
                SignalKind::None
            }
        }
    }

    fn stoch_confirms(&self, snapshot: &IndicatorSnapshot) -> bool {
        snapshot.stoch_rsi > self.params.stoch_lower && snapshot.stoch_rsi <= self.params.stoch_upper
    }
}
