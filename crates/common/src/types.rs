use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// One closed OHLCV bar. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Open time of the bar.
    pub timestamp: DateTime<Utc>,
}

/// Candle width supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn duration(&self) -> Duration {
        let secs = match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::H1 => 60 * 60,
            Timeframe::H4 => 4 * 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
        };
        Duration::from_secs(secs)
    }

    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.duration().as_secs() as i64)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(Error::Config(format!(
                "invalid timeframe '{other}', expected one of 1m, 5m, 15m, 1h, 4h, 1d"
            ))),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

/// Indicator values for one candle whose lookback windows are fully populated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub fast_ema: f64,
    pub slow_ema: f64,
    /// Smoothed stochastic of RSI (%K), in [0, 100].
    pub stoch_rsi: f64,
    /// Signal line of the stochastic RSI (%D), in [0, 100].
    pub stoch_rsi_d: f64,
    pub close: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    None,
    EnterLong,
    ExitLong,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::None => write!(f, "NONE"),
            SignalKind::EnterLong => write!(f, "ENTER_LONG"),
            SignalKind::ExitLong => write!(f, "EXIT_LONG"),
        }
    }
}

/// Output of the signal engine for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub timestamp: DateTime<Utc>,
    pub snapshot: IndicatorSnapshot,
}

impl Signal {
    pub fn none(snapshot: IndicatorSnapshot) -> Self {
        Self {
            kind: SignalKind::None,
            timestamp: snapshot.timestamp,
            snapshot,
        }
    }
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit { price: f64 },
    Stop { trigger: f64 },
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderKind::Market => write!(f, "MARKET"),
            OrderKind::Limit { .. } => write!(f, "LIMIT"),
            OrderKind::Stop { .. } => write!(f, "STOP"),
        }
    }
}

/// Why an order intent was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentReason {
    EntrySignal,
    ExitSignal,
    StopLoss,
    TakeProfit,
    DrawdownHalt,
}

impl IntentReason {
    pub fn is_entry(&self) -> bool {
        matches!(self, IntentReason::EntrySignal)
    }
}

impl std::fmt::Display for IntentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntentReason::EntrySignal => write!(f, "entry signal"),
            IntentReason::ExitSignal => write!(f, "exit signal"),
            IntentReason::StopLoss => write!(f, "stop-loss"),
            IntentReason::TakeProfit => write!(f, "take-profit"),
            IntentReason::DrawdownHalt => write!(f, "drawdown halt"),
        }
    }
}

/// Protective exit levels attached to an entry intent, recorded on fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveLevels {
    /// Price the levels were computed from.
    pub reference_price: f64,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
}

impl ProtectiveLevels {
    /// Shift both levels so they keep their distance from `fill_price`.
    pub fn anchored_to(&self, fill_price: f64) -> Self {
        let shift = fill_price - self.reference_price;
        Self {
            reference_price: fill_price,
            stop_loss_price: self.stop_loss_price + shift,
            take_profit_price: self.take_profit_price + shift,
        }
    }
}

/// A concrete order the engine wants executed. Consumed by the execution
/// coordinator and discarded after a terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Client order id; the venue resolves status lookups by it.
    pub id: String,
    pub pair: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub kind: OrderKind,
    pub reason: IntentReason,
    /// Set on entries only.
    pub protective: Option<ProtectiveLevels>,
    pub created_at: DateTime<Utc>,
}

impl OrderIntent {
    pub fn entry(
        pair: impl Into<String>,
        quantity: f64,
        kind: OrderKind,
        protective: ProtectiveLevels,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pair: pair.into(),
            side: OrderSide::Buy,
            quantity,
            kind,
            reason: IntentReason::EntrySignal,
            protective: Some(protective),
            created_at: Utc::now(),
        }
    }

    pub fn exit(pair: impl Into<String>, quantity: f64, reason: IntentReason) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pair: pair.into(),
            side: OrderSide::Sell,
            quantity,
            kind: OrderKind::Market,
            reason,
            protective: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_entry(&self) -> bool {
        self.side == OrderSide::Buy
    }
}

/// Details of an open, risk-exposed holding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub opened_at: DateTime<Utc>,
    pub entry_order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "UPPERCASE")]
pub enum PositionState {
    Flat,
    Open(OpenPosition),
}

/// The single live position of a tracked pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub pair: String,
    #[serde(flatten)]
    pub state: PositionState,
}

impl Position {
    pub fn flat(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            state: PositionState::Flat,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, PositionState::Open(_))
    }

    pub fn open(&self) -> Option<&OpenPosition> {
        match &self.state {
            PositionState::Open(open) => Some(open),
            PositionState::Flat => None,
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            PositionState::Flat => "FLAT",
            PositionState::Open(_) => "OPEN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Filled,
    Partial,
    Rejected,
    TimedOut,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Filled => write!(f, "FILLED"),
            ExecutionStatus::Partial => write!(f, "PARTIAL"),
            ExecutionStatus::Rejected => write!(f, "REJECTED"),
            ExecutionStatus::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// Terminal result of executing one intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub intent: OrderIntent,
    pub status: ExecutionStatus,
    pub fill_price: Option<f64>,
    pub filled_quantity: f64,
    /// Venue-side explanation for rejections and timeouts.
    pub detail: Option<String>,
    /// False when the venue could not confirm the final state; the intent
    /// must be reconciled again before the pair acts on anything else.
    pub confirmed: bool,
}

impl ExecutionOutcome {
    pub fn has_fill(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Filled | ExecutionStatus::Partial
        ) && self.filled_quantity > 0.0
    }
}

/// Order state as reported by the venue for a client order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VenueOrderStatus {
    /// Accepted and still working.
    Pending,
    Filled,
    /// Finished (cancelled or expired) with only part of the quantity filled.
    PartiallyFilled,
    Rejected,
    /// Cancelled with nothing filled.
    Cancelled,
    /// The venue has never seen this client order id.
    NotFound,
}

impl VenueOrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VenueOrderStatus::Pending | VenueOrderStatus::NotFound)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReport {
    pub order_id: String,
    pub status: VenueOrderStatus,
    pub filled_quantity: f64,
    pub average_price: Option<f64>,
    pub reason: Option<String>,
}

impl OrderReport {
    pub fn not_found(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            status: VenueOrderStatus::NotFound,
            filled_quantity: 0.0,
            average_price: None,
            reason: None,
        }
    }
}

/// Venue-reported sizing rules for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderConstraints {
    pub min_size: f64,
    pub max_size: f64,
    pub size_increment: f64,
    pub price_increment: f64,
}

/// Reason the Risk Manager turned a signal into a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    AlreadyOpen,
    NotOpen,
    MaxConcurrentPositions,
    SizeRoundsToZero,
    DrawdownHalt,
    Other(String),
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::AlreadyOpen => write!(f, "position already open"),
            RejectionReason::NotOpen => write!(f, "no open position to exit"),
            RejectionReason::MaxConcurrentPositions => {
                write!(f, "max concurrent positions reached")
            }
            RejectionReason::SizeRoundsToZero => write!(f, "position size rounds to zero"),
            RejectionReason::DrawdownHalt => write!(f, "max drawdown halt active"),
            RejectionReason::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Lifecycle state of one pair's task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PairTaskState {
    #[default]
    Starting,
    Running,
    Halted,
    Stopped,
}

impl std::fmt::Display for PairTaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairTaskState::Starting => write!(f, "starting"),
            PairTaskState::Running => write!(f, "running"),
            PairTaskState::Halted => write!(f, "halted"),
            PairTaskState::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_parses_allowed_values() {
        assert_eq!("1h".parse::<Timeframe>().unwrap(), Timeframe::H1);
        assert_eq!("15m".parse::<Timeframe>().unwrap(), Timeframe::M15);
        assert_eq!(Timeframe::H4.duration(), Duration::from_secs(14_400));
        assert!("2h".parse::<Timeframe>().is_err());
    }

    #[test]
    fn protective_levels_keep_distance_when_anchored() {
        let levels = ProtectiveLevels {
            reference_price: 100.0,
            stop_loss_price: 95.0,
            take_profit_price: 110.0,
        };
        let anchored = levels.anchored_to(102.0);
        assert!((anchored.stop_loss_price - 97.0).abs() < 1e-9);
        assert!((anchored.take_profit_price - 112.0).abs() < 1e-9);
    }

    #[test]
    fn flat_position_serializes_without_price_fields() {
        let json = serde_json::to_value(Position::flat("BTCUSDT")).unwrap();
        assert_eq!(json["state"], "FLAT");
        assert!(json.get("entry_price").is_none());
    }

    #[test]
    fn only_pending_and_not_found_are_non_terminal() {
        assert!(!VenueOrderStatus::Pending.is_terminal());
        assert!(!VenueOrderStatus::NotFound.is_terminal());
        assert!(VenueOrderStatus::PartiallyFilled.is_terminal());
        assert!(VenueOrderStatus::Cancelled.is_terminal());
    }
}
