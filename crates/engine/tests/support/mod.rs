#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use common::{
    Candle, Error, OrderConstraints, OrderIntent, OrderReport, RejectionReason, Result, Timeframe,
    Venue, VenueOrderStatus,
};
use strategy::{compute_snapshots, SignalEngine, StrategyParams};

/// What the venue does with the next `submit_order` call.
#[derive(Debug, Clone)]
pub enum SubmitStep {
    /// Accept and fill according to `FillMode`.
    Accept,
    /// Accept and fill, but the acknowledgement never arrives.
    LoseAck,
    /// Transport failure before the order reaches the venue.
    Drop,
    Reject(String),
}

#[derive(Debug, Clone, Copy)]
pub enum FillMode {
    Full { price: f64 },
    /// Rests with `filled` executed; cancel finishes it as partially filled.
    Working { filled: f64, price: f64 },
}

pub struct VenueState {
    pub candles: HashMap<String, Vec<Candle>>,
    pub failing_pairs: HashSet<String>,
    pub balance: f64,
    /// Number of upcoming `balance` calls that fail with a network error.
    pub balance_failures: usize,
    pub constraints: OrderConstraints,
    pub script: VecDeque<SubmitStep>,
    pub fill: FillMode,
    pub orders: HashMap<String, OrderReport>,
    pub submissions: Vec<OrderIntent>,
    pub cancels: usize,
    pub status_unavailable: bool,
}

/// In-memory venue double driven by a per-test script.
pub struct ScriptedVenue {
    pub state: Mutex<VenueState>,
}

impl ScriptedVenue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VenueState {
                candles: HashMap::new(),
                failing_pairs: HashSet::new(),
                balance: 10_000.0,
                balance_failures: 0,
                constraints: OrderConstraints {
                    min_size: 0.001,
                    max_size: 1_000.0,
                    size_increment: 0.001,
                    price_increment: 0.01,
                },
                script: VecDeque::new(),
                fill: FillMode::Full { price: 100.0 },
                orders: HashMap::new(),
                submissions: Vec::new(),
                cancels: 0,
                status_unavailable: false,
            }),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut VenueState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn submissions(&self) -> usize {
        self.with(|s| s.submissions.len())
    }

    /// Record an order as already filled, as if submitted by an earlier run.
    pub fn seed_filled(&self, intent: &OrderIntent, price: f64) {
        self.with(|s| {
            s.orders.insert(intent.id.clone(), filled_report(intent, price));
        });
    }
}

fn filled_report(intent: &OrderIntent, price: f64) -> OrderReport {
    OrderReport {
        order_id: format!("v-{}", intent.id),
        status: VenueOrderStatus::Filled,
        filled_quantity: intent.quantity,
        average_price: Some(price),
        reason: None,
    }
}

#[async_trait]
impl Venue for ScriptedVenue {
    async fn fetch_candles(&self, pair: &str, _tf: Timeframe, count: usize) -> Result<Vec<Candle>> {
        self.with(|s| {
            if s.failing_pairs.contains(pair) {
                return Err(Error::Network(format!("{pair}: connection reset")));
            }
            let all = s.candles.get(pair).cloned().unwrap_or_default();
            let skip = all.len().saturating_sub(count);
            Ok(all[skip..].to_vec())
        })
    }

    async fn balance(&self) -> Result<f64> {
        self.with(|s| {
            if s.balance_failures > 0 {
                s.balance_failures -= 1;
                return Err(Error::Network("balance: connection reset".into()));
            }
            Ok(s.balance)
        })
    }

    async fn submit_order(&self, intent: &OrderIntent) -> Result<String> {
        let step = self.with(|s| {
            s.submissions.push(intent.clone());
            let step = s.script.pop_front().unwrap_or(SubmitStep::Accept);
            if matches!(step, SubmitStep::Accept | SubmitStep::LoseAck) {
                let report = match s.fill {
                    FillMode::Full { price } => filled_report(intent, price),
                    FillMode::Working { filled, price } => OrderReport {
                        order_id: format!("v-{}", intent.id),
                        status: VenueOrderStatus::Pending,
                        filled_quantity: filled,
                        average_price: (filled > 0.0).then_some(price),
                        reason: None,
                    },
                };
                s.orders.insert(intent.id.clone(), report);
            }
            step
        });

        match step {
            SubmitStep::Accept => Ok(format!("v-{}", intent.id)),
            SubmitStep::LoseAck => std::future::pending().await,
            SubmitStep::Drop => Err(Error::Network("broken pipe".into())),
            SubmitStep::Reject(reason) => Err(Error::OrderRejected {
                reason: RejectionReason::Other(reason),
            }),
        }
    }

    async fn order_status(&self, _pair: &str, client_order_id: &str) -> Result<OrderReport> {
        self.with(|s| {
            if s.status_unavailable {
                return Err(Error::Venue("status endpoint unavailable".into()));
            }
            Ok(s.orders
                .get(client_order_id)
                .cloned()
                .unwrap_or_else(|| OrderReport::not_found(client_order_id)))
        })
    }

    async fn cancel_order(&self, _pair: &str, client_order_id: &str) -> Result<()> {
        self.with(|s| {
            s.cancels += 1;
            if let Some(report) = s.orders.get_mut(client_order_id) {
                if report.status == VenueOrderStatus::Pending {
                    report.status = if report.filled_quantity > 0.0 {
                        VenueOrderStatus::PartiallyFilled
                    } else {
                        VenueOrderStatus::Cancelled
                    };
                }
            }
            Ok(())
        })
    }

    async fn order_constraints(&self, _pair: &str) -> Result<OrderConstraints> {
        Ok(self.with(|s| s.constraints))
    }
}

pub async fn memory_db() -> SqlitePool {
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    engine::migrate(&db).await.unwrap();
    db
}

/// Hourly candles with the given closes.
pub fn hourly(closes: &[f64]) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            open: close,
            high: close * 1.001,
            low: close * 0.999,
            close,
            volume: 10.0,
            timestamp: start + Duration::hours(i as i64),
        })
        .collect()
}

/// A long decline followed by a rally, truncated at the first candle where
/// a fresh signal engine emits ENTER_LONG.
pub fn closes_ending_in_entry(params: &StrategyParams) -> Vec<f64> {
    let mut closes: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
    closes.extend((1..=30).map(|i| 141.0 + 3.0 * i as f64));

    for end in params.required_history()..=closes.len() {
        let snapshots = compute_snapshots(&hourly(&closes[..end]), params).unwrap();
        let signal = SignalEngine::new(params.clone()).evaluate(&snapshots).unwrap();
        if signal.kind == common::SignalKind::EnterLong {
            closes.truncate(end);
            return closes;
        }
    }
    panic!("price path never produced an entry");
}
