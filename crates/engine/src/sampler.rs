use std::sync::Arc;

use tracing::debug;

use common::{Candle, Error, Result, Timeframe, Venue};

use crate::retry::{with_backoff, RetryPolicy};

/// Fetches recent closed candles for one pair and checks them before they
/// reach the indicators.
pub struct MarketDataSampler {
    venue: Arc<dyn Venue>,
    pair: String,
    timeframe: Timeframe,
    history: usize,
    retry: RetryPolicy,
}

impl MarketDataSampler {
    pub fn new(
        venue: Arc<dyn Venue>,
        pair: impl Into<String>,
        timeframe: Timeframe,
        history: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            venue,
            pair: pair.into(),
            timeframe,
            history,
            retry,
        }
    }

    pub async fn sample(&self) -> Result<Vec<Candle>> {
        let candles = with_backoff(&self.retry, &self.pair, "fetch_candles", move || {
            self.venue
                .fetch_candles(&self.pair, self.timeframe, self.history)
        })
        .await?;
        validate_candles(&candles, self.timeframe)?;
        debug!(pair = %self.pair, count = candles.len(), "Candles sampled");
        Ok(candles)
    }
}

/// Candles must be strictly increasing in time with no gap wider than one
/// timeframe.
pub fn validate_candles(candles: &[Candle], timeframe: Timeframe) -> Result<()> {
    let step = timeframe.as_chrono();
    for w in candles.windows(2) {
        let (prev, curr) = (&w[0], &w[1]);
        if curr.timestamp == prev.timestamp {
            return Err(Error::DataQuality(format!(
                "duplicate candle at {}",
                curr.timestamp
            )));
        }
        if curr.timestamp < prev.timestamp {
            return Err(Error::DataQuality(format!(
                "candles out of order: {} after {}",
                curr.timestamp, prev.timestamp
            )));
        }
        if curr.timestamp - prev.timestamp > step {
            return Err(Error::DataQuality(format!(
                "gap of {}s between {} and {} exceeds {timeframe}",
                (curr.timestamp - prev.timestamp).num_seconds(),
                prev.timestamp,
                curr.timestamp
            )));
        }
    }
    if let Some(bad) = candles.iter().find(|c| !(c.close.is_finite() && c.close > 0.0)) {
        return Err(Error::DataQuality(format!(
            "non-positive close {} at {}",
            bad.close, bad.timestamp
        )));
    }
    Ok(())
}
