use async_trait::async_trait;

use crate::{Candle, OrderConstraints, OrderIntent, OrderReport, Result, Timeframe};

/// Abstraction over the trading venue.
///
/// `PaperVenue` implements this for simulation. Every call may fail with
/// `Error::Network` or `Error::Venue`; callers treat both as retryable.
/// Business rejections of an order surface as `Error::OrderRejected` from
/// `submit_order` or as `VenueOrderStatus::Rejected` from `order_status`.
///
/// Only the execution coordinator in `crates/engine` submits orders. All
/// order flow goes through the Risk Manager first.
#[async_trait]
pub trait Venue: Send + Sync {
    /// Most recent `count` closed candles, oldest first.
    async fn fetch_candles(
        &self,
        pair: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>>;

    /// Account equity in quote currency.
    async fn balance(&self) -> Result<f64>;

    /// Submit an order under the intent's client order id. Returns the
    /// venue-side order id.
    async fn submit_order(&self, intent: &OrderIntent) -> Result<String>;

    /// Look up an order by its client order id.
    async fn order_status(&self, pair: &str, client_order_id: &str) -> Result<OrderReport>;

    /// Cancel whatever part of the order is still working.
    async fn cancel_order(&self, pair: &str, client_order_id: &str) -> Result<()>;

    async fn order_constraints(&self, pair: &str) -> Result<OrderConstraints>;
}
