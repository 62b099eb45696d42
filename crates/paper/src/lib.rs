pub mod feed;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use common::{
    Candle, Error, OrderConstraints, OrderIntent, OrderKind, OrderReport, OrderSide,
    RejectionReason, Result, Timeframe, Venue, VenueOrderStatus,
};

pub use feed::SyntheticFeed;

/// Costs applied to every simulated fill.
#[derive(Debug, Clone, Copy)]
pub struct PaperSettings {
    pub initial_balance: f64,
    pub slippage_bps: f64,
    /// Taker fee, charged in quote currency on both sides.
    pub fee_bps: f64,
}

struct Market {
    candles: Vec<Candle>,
    constraints: OrderConstraints,
}

struct PaperOrder {
    intent: OrderIntent,
    report: OrderReport,
}

struct Ledger {
    cash: f64,
    holdings: HashMap<String, f64>,
    markets: HashMap<String, Market>,
    /// Keyed by client order id.
    orders: HashMap<String, PaperOrder>,
    next_order: u64,
}

/// Simulated venue for paper trading.
///
/// Market orders fill at the latest close with slippage. Limit and stop
/// orders rest until a later candle pushed through `push_candle` crosses
/// their price. No real orders are ever sent anywhere.
pub struct PaperVenue {
    settings: PaperSettings,
    ledger: RwLock<Ledger>,
    /// Candles kept per pair.
    retention: usize,
}

impl PaperVenue {
    pub fn new(settings: PaperSettings) -> Self {
        info!(
            balance = settings.initial_balance,
            slippage_bps = settings.slippage_bps,
            fee_bps = settings.fee_bps,
            "PaperVenue initialized"
        );
        Self {
            settings,
            ledger: RwLock::new(Ledger {
                cash: settings.initial_balance,
                holdings: HashMap::new(),
                markets: HashMap::new(),
                orders: HashMap::new(),
                next_order: 1,
            }),
            retention: 1_000,
        }
    }

    /// Register a tradable pair. Candles for unknown pairs are refused.
    pub async fn add_pair(&self, pair: &str, constraints: OrderConstraints) {
        self.ledger.write().await.markets.insert(
            pair.to_string(),
            Market {
                candles: Vec::new(),
                constraints,
            },
        );
    }

    /// Append a newly closed candle and fill any resting orders it crosses.
    pub async fn push_candle(&self, pair: &str, candle: Candle) -> Result<()> {
        let mut ledger = self.ledger.write().await;
        let market = ledger
            .markets
            .get_mut(pair)
            .ok_or_else(|| Error::Venue(format!("unknown pair {pair}")))?;
        if let Some(last) = market.candles.last() {
            if candle.timestamp <= last.timestamp {
                return Err(Error::DataQuality(format!(
                    "{pair}: candle at {} is not newer than {}",
                    candle.timestamp, last.timestamp
                )));
            }
        }
        market.candles.push(candle);
        let excess = market.candles.len().saturating_sub(self.retention);
        market.candles.drain(..excess);

        let crossed: Vec<(String, f64)> = ledger
            .orders
            .iter()
            .filter(|(_, o)| o.intent.pair == pair && o.report.status == VenueOrderStatus::Pending)
            .filter_map(|(id, o)| self.crossing_price(&o.intent, &candle).map(|p| (id.clone(), p)))
            .collect();

        for (id, price) in crossed {
            ledger.fill(&id, price, self.settings.fee_bps);
        }
        Ok(())
    }

    pub async fn cash(&self) -> f64 {
        self.ledger.read().await.cash
    }

    pub async fn holdings(&self, pair: &str) -> f64 {
        self.ledger.read().await.holdings.get(pair).copied().unwrap_or(0.0)
    }

    fn slipped(&self, side: OrderSide, price: f64) -> f64 {
        let slip = self.settings.slippage_bps / 10_000.0;
        match side {
            OrderSide::Buy => price * (1.0 + slip),
            OrderSide::Sell => price * (1.0 - slip),
        }
    }

    /// Fill price for a resting order if `candle` trades through it.
    fn crossing_price(&self, intent: &OrderIntent, candle: &Candle) -> Option<f64> {
        match (intent.kind, intent.side) {
            (OrderKind::Market, _) => None,
            (OrderKind::Limit { price }, OrderSide::Buy) => (candle.low <= price).then_some(price),
            (OrderKind::Limit { price }, OrderSide::Sell) => (candle.high >= price).then_some(price),
            (OrderKind::Stop { trigger }, OrderSide::Buy) => {
                (candle.high >= trigger).then(|| self.slipped(OrderSide::Buy, trigger))
            }
            (OrderKind::Stop { trigger }, OrderSide::Sell) => {
                (candle.low <= trigger).then(|| self.slipped(OrderSide::Sell, trigger))
            }
        }
    }
}

impl Ledger {
    fn last_close(&self, pair: &str) -> Option<f64> {
        self.markets.get(pair)?.candles.last().map(|c| c.close)
    }

    fn equity(&self) -> f64 {
        let held: f64 = self
            .holdings
            .iter()
            .map(|(pair, qty)| qty * self.last_close(pair).unwrap_or(0.0))
            .sum();
        self.cash + held
    }

    /// Check funds for a fill of `quantity` at `price`.
    fn affordable(
        &self,
        intent: &OrderIntent,
        price: f64,
        fee_bps: f64,
    ) -> std::result::Result<(), String> {
        match intent.side {
            OrderSide::Buy => {
                let cost = intent.quantity * price * (1.0 + fee_bps / 10_000.0);
                if cost > self.cash + 1e-9 {
                    return Err(format!(
                        "insufficient cash: need {cost:.2}, have {:.2}",
                        self.cash
                    ));
                }
            }
            OrderSide::Sell => {
                let held = self.holdings.get(&intent.pair).copied().unwrap_or(0.0);
                if intent.quantity > held + 1e-9 {
                    return Err(format!(
                        "insufficient holdings: selling {}, holding {held}",
                        intent.quantity
                    ));
                }
            }
        }
        Ok(())
    }

    /// Settle the order at `price`, or mark it rejected if funds ran out
    /// while it was resting.
    fn fill(&mut self, client_order_id: &str, price: f64, fee_bps: f64) {
        let Some(intent) = self.orders.get(client_order_id).map(|o| o.intent.clone()) else {
            return;
        };
        let checked = self.affordable(&intent, price, fee_bps);
        let Some(order) = self.orders.get_mut(client_order_id) else {
            return;
        };
        if let Err(reason) = checked {
            warn!(pair = %intent.pair, order_id = %client_order_id, reason = %reason, "Resting paper order rejected");
            order.report.status = VenueOrderStatus::Rejected;
            order.report.reason = Some(reason);
            return;
        }

        order.report.status = VenueOrderStatus::Filled;
        order.report.filled_quantity = intent.quantity;
        order.report.average_price = Some(price);

        let notional = intent.quantity * price;
        let fee = notional * fee_bps / 10_000.0;
        let held = self.holdings.entry(intent.pair.clone()).or_insert(0.0);
        match intent.side {
            OrderSide::Buy => {
                self.cash -= notional + fee;
                *held += intent.quantity;
            }
            OrderSide::Sell => {
                self.cash += notional - fee;
                *held = (*held - intent.quantity).max(0.0);
            }
        }
        debug!(
            pair = %intent.pair,
            side = %intent.side,
            qty = intent.quantity,
            price,
            fee,
            cash = self.cash,
            "Paper fill"
        );
    }
}

fn rejected(reason: String) -> Error {
    Error::OrderRejected {
        reason: RejectionReason::Other(reason),
    }
}

#[async_trait]
impl Venue for PaperVenue {
    async fn fetch_candles(
        &self,
        pair: &str,
        _timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>> {
        let ledger = self.ledger.read().await;
        let market = ledger
            .markets
            .get(pair)
            .ok_or_else(|| Error::Venue(format!("unknown pair {pair}")))?;
        let skip = market.candles.len().saturating_sub(count);
        Ok(market.candles[skip..].to_vec())
    }

    async fn balance(&self) -> Result<f64> {
        Ok(self.ledger.read().await.equity())
    }

    async fn submit_order(&self, intent: &OrderIntent) -> Result<String> {
        let mut ledger = self.ledger.write().await;

        // Same client order id twice is the same order.
        if let Some(existing) = ledger.orders.get(&intent.id) {
            return Ok(existing.report.order_id.clone());
        }

        let market = ledger
            .markets
            .get(&intent.pair)
            .ok_or_else(|| Error::Venue(format!("unknown pair {}", intent.pair)))?;
        let constraints = market.constraints;
        if intent.quantity < constraints.min_size - 1e-12
            || intent.quantity > constraints.max_size + 1e-12
        {
            return Err(rejected(format!(
                "quantity {} outside [{}, {}]",
                intent.quantity, constraints.min_size, constraints.max_size
            )));
        }
        let last = market
            .candles
            .last()
            .map(|c| c.close)
            .ok_or_else(|| Error::Venue(format!("no price yet for {}", intent.pair)))?;

        let order_id = format!("paper-{}", ledger.next_order);
        let market_price = match intent.kind {
            OrderKind::Market => {
                let price = self.slipped(intent.side, last);
                ledger
                    .affordable(intent, price, self.settings.fee_bps)
                    .map_err(rejected)?;
                Some(price)
            }
            OrderKind::Limit { .. } | OrderKind::Stop { .. } => None,
        };

        ledger.next_order += 1;
        ledger.orders.insert(
            intent.id.clone(),
            PaperOrder {
                intent: intent.clone(),
                report: OrderReport {
                    order_id: order_id.clone(),
                    status: VenueOrderStatus::Pending,
                    filled_quantity: 0.0,
                    average_price: None,
                    reason: None,
                },
            },
        );
        if let Some(price) = market_price {
            ledger.fill(&intent.id, price, self.settings.fee_bps);
        } else {
            debug!(pair = %intent.pair, kind = %intent.kind, order_id = %order_id, "Paper order resting");
        }
        Ok(order_id)
    }

    async fn order_status(&self, _pair: &str, client_order_id: &str) -> Result<OrderReport> {
        Ok(self
            .ledger
            .read()
            .await
            .orders
            .get(client_order_id)
            .map(|o| o.report.clone())
            .unwrap_or_else(|| OrderReport::not_found(client_order_id)))
    }

    async fn cancel_order(&self, _pair: &str, client_order_id: &str) -> Result<()> {
        let mut ledger = self.ledger.write().await;
        if let Some(order) = ledger.orders.get_mut(client_order_id) {
            if order.report.status == VenueOrderStatus::Pending {
                order.report.status = VenueOrderStatus::Cancelled;
            }
        }
        Ok(())
    }

    async fn order_constraints(&self, pair: &str) -> Result<OrderConstraints> {
        self.ledger
            .read()
            .await
            .markets
            .get(pair)
            .map(|m| m.constraints)
            .ok_or_else(|| Error::Venue(format!("unknown pair {pair}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::{IntentReason, ProtectiveLevels};

    const CONSTRAINTS: OrderConstraints = OrderConstraints {
        min_size: 0.001,
        max_size: 100.0,
        size_increment: 0.001,
        price_increment: 0.01,
    };

    fn candle(hour: i64, low: f64, high: f64, close: f64) -> Candle {
        Candle {
            open: close,
            high,
            low,
            close,
            volume: 1.0,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour),
        }
    }

    async fn venue(slippage_bps: f64, fee_bps: f64) -> PaperVenue {
        let venue = PaperVenue::new(PaperSettings {
            initial_balance: 10_000.0,
            slippage_bps,
            fee_bps,
        });
        venue.add_pair("BTCUSDT", CONSTRAINTS).await;
        venue.push_candle("BTCUSDT", candle(0, 995.0, 1005.0, 1000.0)).await.unwrap();
        venue
    }

    fn buy(qty: f64, kind: OrderKind) -> OrderIntent {
        OrderIntent::entry(
            "BTCUSDT",
            qty,
            kind,
            ProtectiveLevels {
                reference_price: 1000.0,
                stop_loss_price: 980.0,
                take_profit_price: 1040.0,
            },
        )
    }

    #[tokio::test]
    async fn market_buy_applies_slippage_and_fee() {
        let venue = venue(10.0, 20.0).await;
        let intent = buy(1.0, OrderKind::Market);
        venue.submit_order(&intent).await.unwrap();

        let report = venue.order_status("BTCUSDT", &intent.id).await.unwrap();
        assert_eq!(report.status, VenueOrderStatus::Filled);
        let expected = 1000.0 * (1.0 + 10.0 / 10_000.0);
        assert!((report.average_price.unwrap() - expected).abs() < 1e-9);

        let fee = expected * 20.0 / 10_000.0;
        assert!((venue.cash().await - (10_000.0 - expected - fee)).abs() < 1e-9);
        assert_eq!(venue.holdings("BTCUSDT").await, 1.0);
    }

    #[tokio::test]
    async fn equity_marks_holdings_at_last_close() {
        let venue = venue(0.0, 0.0).await;
        venue.submit_order(&buy(2.0, OrderKind::Market)).await.unwrap();
        venue.push_candle("BTCUSDT", candle(1, 1000.0, 1110.0, 1100.0)).await.unwrap();

        assert!((venue.balance().await.unwrap() - 10_200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sell_applies_negative_slippage() {
        let venue = venue(10.0, 0.0).await;
        venue.submit_order(&buy(1.0, OrderKind::Market)).await.unwrap();

        let exit = OrderIntent::exit("BTCUSDT", 1.0, IntentReason::ExitSignal);
        venue.submit_order(&exit).await.unwrap();

        let report = venue.order_status("BTCUSDT", &exit.id).await.unwrap();
        let expected = 1000.0 * (1.0 - 10.0 / 10_000.0);
        assert!((report.average_price.unwrap() - expected).abs() < 1e-9);
        assert_eq!(venue.holdings("BTCUSDT").await, 0.0);
    }

    #[tokio::test]
    async fn rejects_unaffordable_and_unheld_orders() {
        let venue = venue(0.0, 0.0).await;

        let err = venue.submit_order(&buy(50.0, OrderKind::Market)).await.unwrap_err();
        assert!(matches!(err, Error::OrderRejected { .. }));
        assert!(err.to_string().contains("insufficient cash"));

        let exit = OrderIntent::exit("BTCUSDT", 1.0, IntentReason::StopLoss);
        let err = venue.submit_order(&exit).await.unwrap_err();
        assert!(err.to_string().contains("insufficient holdings"));
        assert_eq!(
            venue.order_status("BTCUSDT", &exit.id).await.unwrap().status,
            VenueOrderStatus::NotFound
        );
    }

    #[tokio::test]
    async fn rejects_size_outside_constraints() {
        let venue = venue(0.0, 0.0).await;
        let err = venue.submit_order(&buy(0.0001, OrderKind::Market)).await.unwrap_err();
        assert!(matches!(err, Error::OrderRejected { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn duplicate_client_id_fills_once() {
        let venue = venue(0.0, 0.0).await;
        let intent = buy(1.0, OrderKind::Market);
        let first = venue.submit_order(&intent).await.unwrap();
        let second = venue.submit_order(&intent).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(venue.holdings("BTCUSDT").await, 1.0);
    }

    #[tokio::test]
    async fn limit_order_rests_until_a_later_candle_crosses() {
        let venue = venue(0.0, 0.0).await;
        let intent = buy(1.0, OrderKind::Limit { price: 990.0 });
        venue.submit_order(&intent).await.unwrap();
        assert_eq!(
            venue.order_status("BTCUSDT", &intent.id).await.unwrap().status,
            VenueOrderStatus::Pending
        );

        venue.push_candle("BTCUSDT", candle(1, 992.0, 1010.0, 1001.0)).await.unwrap();
        assert_eq!(
            venue.order_status("BTCUSDT", &intent.id).await.unwrap().status,
            VenueOrderStatus::Pending
        );

        venue.push_candle("BTCUSDT", candle(2, 985.0, 1000.0, 988.0)).await.unwrap();
        let report = venue.order_status("BTCUSDT", &intent.id).await.unwrap();
        assert_eq!(report.status, VenueOrderStatus::Filled);
        assert_eq!(report.average_price, Some(990.0));
    }

    #[tokio::test]
    async fn stop_sell_triggers_on_low() {
        let venue = venue(0.0, 0.0).await;
        venue.submit_order(&buy(1.0, OrderKind::Market)).await.unwrap();

        let mut stop = OrderIntent::exit("BTCUSDT", 1.0, IntentReason::StopLoss);
        stop.kind = OrderKind::Stop { trigger: 970.0 };
        venue.submit_order(&stop).await.unwrap();
        venue.push_candle("BTCUSDT", candle(1, 960.0, 1000.0, 965.0)).await.unwrap();

        let report = venue.order_status("BTCUSDT", &stop.id).await.unwrap();
        assert_eq!(report.status, VenueOrderStatus::Filled);
        assert_eq!(report.average_price, Some(970.0));
    }

    #[tokio::test]
    async fn cancelled_order_never_fills() {
        let venue = venue(0.0, 0.0).await;
        let intent = buy(1.0, OrderKind::Limit { price: 990.0 });
        venue.submit_order(&intent).await.unwrap();
        venue.cancel_order("BTCUSDT", &intent.id).await.unwrap();
        venue.push_candle("BTCUSDT", candle(1, 980.0, 1000.0, 985.0)).await.unwrap();

        let report = venue.order_status("BTCUSDT", &intent.id).await.unwrap();
        assert_eq!(report.status, VenueOrderStatus::Cancelled);
        assert_eq!(report.filled_quantity, 0.0);
        assert_eq!(venue.cash().await, 10_000.0);
    }

    #[tokio::test]
    async fn fetch_returns_most_recent_candles_oldest_first() {
        let venue = venue(0.0, 0.0).await;
        for h in 1..5 {
            venue
                .push_candle("BTCUSDT", candle(h, 990.0, 1010.0, 1000.0 + h as f64))
                .await
                .unwrap();
        }
        let candles = venue.fetch_candles("BTCUSDT", Timeframe::H1, 3).await.unwrap();
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![1002.0, 1003.0, 1004.0]);
    }

    #[tokio::test]
    async fn refuses_stale_candles_and_unknown_pairs() {
        let venue = venue(0.0, 0.0).await;
        assert!(venue
            .push_candle("BTCUSDT", candle(0, 990.0, 1010.0, 1000.0))
            .await
            .is_err());
        let err = venue.fetch_candles("DOGEUSDT", Timeframe::H1, 10).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
