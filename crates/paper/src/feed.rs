use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use common::{Candle, Result, Timeframe};

use crate::PaperVenue;

struct Walk {
    pair: String,
    timeframe: Timeframe,
    close: f64,
    next_open: DateTime<Utc>,
}

/// Seeded random-walk candle generator feeding a `PaperVenue`.
///
/// Each step appends one closed candle per pair, spaced exactly one
/// timeframe apart. The same seed always yields the same price path.
pub struct SyntheticFeed {
    rng: StdRng,
    /// Maximum fractional move of a single candle.
    volatility: f64,
    walks: Vec<Walk>,
}

impl SyntheticFeed {
    pub fn new(seed: u64, volatility: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            volatility,
            walks: Vec::new(),
        }
    }

    /// Start a walk at `price`; the first candle opens at `start`.
    pub fn add_pair(&mut self, pair: &str, timeframe: Timeframe, price: f64, start: DateTime<Utc>) {
        self.walks.push(Walk {
            pair: pair.to_string(),
            timeframe,
            close: price,
            next_open: start,
        });
    }

    /// Generate the next candle for every pair.
    pub fn next_candles(&mut self) -> Vec<(String, Candle)> {
        let vol = self.volatility;
        let mut out = Vec::with_capacity(self.walks.len());
        for walk in &mut self.walks {
            let open = walk.close;
            let close = (open * (1.0 + self.rng.gen_range(-vol..=vol))).max(f64::EPSILON);
            let high = open.max(close) * (1.0 + self.rng.gen_range(0.0..=vol / 2.0));
            let low = open.min(close) * (1.0 - self.rng.gen_range(0.0..=vol / 2.0));
            let candle = Candle {
                open,
                high,
                low,
                close,
                volume: self.rng.gen_range(1.0..100.0),
                timestamp: walk.next_open,
            };
            walk.close = close;
            walk.next_open += walk.timeframe.as_chrono();
            out.push((walk.pair.clone(), candle));
        }
        out
    }

    /// Push `count` candles per pair into the venue.
    pub async fn fill(&mut self, venue: &PaperVenue, count: usize) -> Result<()> {
        for _ in 0..count {
            for (pair, candle) in self.next_candles() {
                venue.push_candle(&pair, candle).await?;
            }
        }
        Ok(())
    }

    /// Push one candle per pair every `period` until the task is aborted.
    pub async fn run(mut self, venue: Arc<PaperVenue>, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; history was already seeded.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for (pair, candle) in self.next_candles() {
                match venue.push_candle(&pair, candle).await {
                    Ok(()) => debug!(pair = %pair, close = candle.close, "Synthetic candle"),
                    Err(e) => warn!(pair = %pair, error = %e, "Synthetic candle dropped"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::{OrderConstraints, Venue};

    use crate::PaperSettings;

    fn feed(seed: u64) -> SyntheticFeed {
        let mut feed = SyntheticFeed::new(seed, 0.01);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        feed.add_pair("BTCUSDT", Timeframe::H1, 100.0, start);
        feed.add_pair("ETHUSDT", Timeframe::M15, 50.0, start);
        feed
    }

    #[test]
    fn same_seed_same_path() {
        let (mut a, mut b) = (feed(42), feed(42));
        for _ in 0..20 {
            assert_eq!(a.next_candles(), b.next_candles());
        }
    }

    #[test]
    fn candles_are_contiguous_and_consistent() {
        let mut feed = feed(7);
        let mut btc = Vec::new();
        for _ in 0..50 {
            btc.extend(
                feed.next_candles()
                    .into_iter()
                    .filter(|(p, _)| p == "BTCUSDT")
                    .map(|(_, c)| c),
            );
        }
        for w in btc.windows(2) {
            assert_eq!(w[1].timestamp - w[0].timestamp, chrono::Duration::hours(1));
            assert_eq!(w[1].open, w[0].close);
        }
        for c in &btc {
            assert!(c.low <= c.open.min(c.close));
            assert!(c.high >= c.open.max(c.close));
            assert!(c.close > 0.0);
        }
    }

    #[tokio::test]
    async fn fill_seeds_venue_history() {
        let venue = PaperVenue::new(PaperSettings {
            initial_balance: 1_000.0,
            slippage_bps: 0.0,
            fee_bps: 0.0,
        });
        let constraints = OrderConstraints {
            min_size: 0.001,
            max_size: 10.0,
            size_increment: 0.001,
            price_increment: 0.01,
        };
        venue.add_pair("BTCUSDT", constraints).await;
        venue.add_pair("ETHUSDT", constraints).await;

        let mut feed = feed(1);
        feed.fill(&venue, 40).await.unwrap();

        let candles = venue.fetch_candles("ETHUSDT", Timeframe::M15, 100).await.unwrap();
        assert_eq!(candles.len(), 40);
    }
}
