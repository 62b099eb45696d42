use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use common::{
    Error, IntentReason, OrderConstraints, OrderIntent, OrderKind, Position, ProtectiveLevels,
    RejectionReason, Result, Signal, SignalKind,
};

/// How entry orders are placed. Exits are always market orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryOrderType {
    #[default]
    Market,
    Limit,
}

/// User-configurable risk parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of equity lost if a position is stopped out (e.g. 0.01 = 1%).
    pub max_risk_per_trade: f64,
    /// Stop-loss distance below the entry price (e.g. 0.02 = 2%).
    pub stop_loss_pct: f64,
    /// Take-profit distance above the entry price (e.g. 0.04 = 4%).
    pub take_profit_pct: f64,
    /// Upper bound on a position's notional as a fraction of equity.
    pub max_position_fraction: f64,
    pub entry_order: EntryOrderType,
    /// Equity drawdown from peak that halts new entries (e.g. 0.10 = 10%).
    pub max_drawdown_pct: Option<f64>,
    /// Exit open positions once the drawdown halt is active.
    pub flatten_on_halt: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_risk_per_trade: 0.01,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            max_position_fraction: 0.25,
            entry_order: EntryOrderType::Market,
            max_drawdown_pct: Some(0.10),
            flatten_on_halt: true,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| v > 0.0 && v <= 1.0;
        if !in_unit(self.max_risk_per_trade) {
            return Err(Error::Config("max_risk_per_trade must be in (0, 1]".into()));
        }
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 1.0) {
            return Err(Error::Config("stop_loss_pct must be in (0, 1)".into()));
        }
        if self.take_profit_pct <= 0.0 {
            return Err(Error::Config("take_profit_pct must be positive".into()));
        }
        if !in_unit(self.max_position_fraction) {
            return Err(Error::Config("max_position_fraction must be in (0, 1]".into()));
        }
        if let Some(dd) = self.max_drawdown_pct {
            if !in_unit(dd) {
                return Err(Error::Config("max_drawdown_pct must be in (0, 1]".into()));
            }
        }
        Ok(())
    }
}

/// Everything the Risk Manager reads for one decision.
#[derive(Debug, Clone)]
pub struct RiskContext<'a> {
    pub position: &'a Position,
    /// Latest close for the pair.
    pub price: f64,
    pub equity: f64,
    pub constraints: &'a OrderConstraints,
    /// OPEN positions across all pairs, including in-flight entries.
    pub open_positions: usize,
    pub max_concurrent_positions: usize,
    /// Drawdown halt latched.
    pub halted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Submit(OrderIntent),
    /// Nothing to do; carries the reason when a signal was rejected.
    NoOp(Option<RejectionReason>),
}

/// Turns signals into order intents, or rejects them.
///
/// Protective exits (stop-loss, take-profit, drawdown flatten) are checked
/// first on every call and override whatever the signal says.
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn evaluate(&self, signal: &Signal, ctx: &RiskContext<'_>) -> RiskDecision {
        if let Some(intent) = self.protective_exit(ctx) {
            return RiskDecision::Submit(intent);
        }

        let pair = &ctx.position.pair;
        match signal.kind {
            SignalKind::None => RiskDecision::NoOp(None),

            SignalKind::EnterLong => {
                if ctx.position.is_open() {
                    return self.reject(pair, signal, RejectionReason::AlreadyOpen);
                }
                if ctx.halted {
                    return self.reject(pair, signal, RejectionReason::DrawdownHalt);
                }
                if ctx.open_positions >= ctx.max_concurrent_positions {
                    return self.reject(pair, signal, RejectionReason::MaxConcurrentPositions);
                }

                let quantity = position_size(ctx.equity, ctx.price, &self.config, ctx.constraints);
                if quantity <= 0.0 {
                    return self.reject(pair, signal, RejectionReason::SizeRoundsToZero);
                }

                let levels = ProtectiveLevels {
                    reference_price: ctx.price,
                    stop_loss_price: ctx.price * (1.0 - self.config.stop_loss_pct),
                    take_profit_price: ctx.price * (1.0 + self.config.take_profit_pct),
                };
                let kind = match self.config.entry_order {
                    EntryOrderType::Market => OrderKind::Market,
                    EntryOrderType::Limit => OrderKind::Limit {
                        price: round_to_increment(ctx.price, ctx.constraints.price_increment),
                    },
                };

                let intent = OrderIntent::entry(pair.clone(), quantity, kind, levels);
                info!(
                    pair = %pair,
                    qty = quantity,
                    price = ctx.price,
                    stop_loss = levels.stop_loss_price,
                    take_profit = levels.take_profit_price,
                    "Entry approved by RiskManager"
                );
                RiskDecision::Submit(intent)
            }

            SignalKind::ExitLong => match ctx.position.open() {
                None => self.reject(pair, signal, RejectionReason::NotOpen),
                Some(open) => {
                    info!(pair = %pair, qty = open.quantity, "Exit approved by RiskManager");
                    RiskDecision::Submit(OrderIntent::exit(
                        pair.clone(),
                        open.quantity,
                        IntentReason::ExitSignal,
                    ))
                }
            },
        }
    }

    /// Stop-loss, take-profit or drawdown flatten for an OPEN position.
    fn protective_exit(&self, ctx: &RiskContext<'_>) -> Option<OrderIntent> {
        let open = ctx.position.open()?;
        let pair = &ctx.position.pair;

        let reason = if ctx.price <= open.stop_loss_price {
            IntentReason::StopLoss
        } else if ctx.price >= open.take_profit_price {
            IntentReason::TakeProfit
        } else if ctx.halted && self.config.flatten_on_halt {
            IntentReason::DrawdownHalt
        } else {
            return None;
        };

        let pnl_pct = (ctx.price - open.entry_price) / open.entry_price;
        warn!(
            pair = %pair,
            price = ctx.price,
            entry = open.entry_price,
            pnl_pct = pnl_pct,
            reason = %reason,
            "Protective exit triggered"
        );
        Some(OrderIntent::exit(pair.clone(), open.quantity, reason))
    }

    fn reject(&self, pair: &str, signal: &Signal, reason: RejectionReason) -> RiskDecision {
        warn!(
            pair = %pair,
            signal = %signal.kind,
            reason = %reason,
            "Signal rejected by RiskManager"
        );
        RiskDecision::NoOp(Some(reason))
    }
}

/// Risk-based position size in base units, or 0 when it rounds to nothing.
///
/// `equity * max_risk_per_trade / (price * stop_loss_pct)`, capped by
/// `max_position_fraction` of equity, rounded down to the size increment and
/// clamped to the venue's min/max order size.
pub fn position_size(
    equity: f64,
    price: f64,
    config: &RiskConfig,
    constraints: &OrderConstraints,
) -> f64 {
    if !(equity > 0.0 && price > 0.0) {
        return 0.0;
    }
    let stop_distance = price * config.stop_loss_pct;
    let by_risk = equity * config.max_risk_per_trade / stop_distance;
    let by_notional = equity * config.max_position_fraction / price;

    let quantity = floor_to_increment(by_risk.min(by_notional), constraints.size_increment);
    if !(quantity > 0.0) {
        return 0.0;
    }
    quantity.max(constraints.min_size).min(constraints.max_size)
}

fn floor_to_increment(value: f64, increment: f64) -> f64 {
    if increment <= 0.0 {
        return value;
    }
    // nudge so that 0.3 / 0.1 does not floor to 2
    ((value / increment) + 1e-9).floor() * increment
}

fn round_to_increment(value: f64, increment: f64) -> f64 {
    if increment <= 0.0 {
        return value;
    }
    (value / increment).round() * increment
}
