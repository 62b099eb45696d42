use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use common::{
    ExecutionOutcome, ExecutionStatus, IndicatorSnapshot, OrderIntent, Position, RejectionReason,
    Result, SignalKind, Venue,
};
use risk::{DrawdownGuard, PositionSlots, RiskContext, RiskDecision, RiskManager, SlotReservation};
use strategy::{check_stoch_alert, compute_snapshots, SignalEngine, StrategyParams};

use crate::executor::ExecutionCoordinator;
use crate::journal::TradeJournal;
use crate::retry::{with_backoff, RetryPolicy};
use crate::sampler::MarketDataSampler;
use crate::tracker::{PositionTracker, Transition};

/// What one completed tick did.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Close time of the newest candle evaluated.
    pub candle_time: Option<DateTime<Utc>>,
    pub signal: SignalKind,
    pub rejection: Option<RejectionReason>,
    pub outcome: Option<ExecutionStatus>,
    pub position: Position,
    pub equity: Option<f64>,
    /// An earlier intent is still unresolved; nothing new was attempted.
    pub awaiting_reconciliation: bool,
}

/// Cross-pair collaborators shared by every pipeline.
#[derive(Clone)]
pub struct SharedRisk {
    pub slots: Arc<PositionSlots>,
    pub guard: Arc<DrawdownGuard>,
}

/// Sampler → Indicator → Signal → Risk → Execution for one pair.
///
/// Owns the pair's tracker and signal state, so only the pair's own task
/// can touch them.
pub struct PairPipeline {
    pair: String,
    venue: Arc<dyn Venue>,
    sampler: MarketDataSampler,
    params: StrategyParams,
    signals: SignalEngine,
    risk: RiskManager,
    tracker: PositionTracker,
    coordinator: ExecutionCoordinator,
    journal: TradeJournal,
    retry: RetryPolicy,
    shared: SharedRisk,
    /// Slot held by an entry whose outcome is not yet applied.
    entry_slot: Option<SlotReservation>,
    last_snapshot: Option<IndicatorSnapshot>,
}

impl PairPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        venue: Arc<dyn Venue>,
        sampler: MarketDataSampler,
        params: StrategyParams,
        risk: RiskManager,
        tracker: PositionTracker,
        coordinator: ExecutionCoordinator,
        journal: TradeJournal,
        retry: RetryPolicy,
        shared: SharedRisk,
    ) -> Self {
        // An entry restored as pending keeps its slot until it resolves.
        let entry_slot = tracker
            .pending()
            .filter(|p| p.is_entry() && !tracker.current().is_open())
            .map(|_| shared.slots.adopt());
        Self {
            pair: tracker.pair().to_string(),
            venue,
            sampler,
            signals: SignalEngine::new(params.clone()),
            params,
            risk,
            tracker,
            coordinator,
            journal,
            retry,
            shared,
            entry_slot,
            last_snapshot: None,
        }
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub fn position(&self) -> &Position {
        self.tracker.current()
    }

    /// Run one tick. `Ok(None)` means shutdown interrupted a data fetch
    /// before anything was submitted.
    pub async fn tick(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<Option<TickReport>> {
        // An unresolved intent from an earlier tick comes first.
        if let Some(pending) = self.tracker.pending().cloned() {
            let outcome = self.coordinator.reconcile(&pending).await;
            if !self.settle(outcome).await? {
                return Ok(Some(self.report(None, SignalKind::None, None, None, None, true)));
            }
        }

        let Some(candles) = unless_shutdown(shutdown, self.sampler.sample()).await else {
            return Ok(None);
        };
        let snapshots = compute_snapshots(&candles?, &self.params)?;
        // Evaluated on a copy: a tick that fails before the risk step must
        // see the same candle again next time.
        let mut signals = self.signals.clone();
        let Some(signal) = signals.evaluate(&snapshots) else {
            return Ok(Some(self.report(None, SignalKind::None, None, None, None, false)));
        };
        self.log_alert(&signal.snapshot);

        let venue = &self.venue;
        let pair = self.pair.as_str();
        let Some(equity) = unless_shutdown(
            shutdown,
            with_backoff(&self.retry, pair, "balance", move || venue.balance()),
        )
        .await
        else {
            return Ok(None);
        };
        let equity = equity?;
        let Some(constraints) = unless_shutdown(
            shutdown,
            with_backoff(&self.retry, pair, "order_constraints", move || {
                venue.order_constraints(pair)
            }),
        )
        .await
        else {
            return Ok(None);
        };
        let constraints = constraints?;
        self.signals = signals;

        let drawdown = self.shared.guard.observe(equity);
        let ctx = RiskContext {
            position: self.tracker.current(),
            price: signal.snapshot.close,
            equity,
            constraints: &constraints,
            open_positions: self.shared.slots.open(),
            max_concurrent_positions: self.shared.slots.max(),
            halted: drawdown.halted,
        };

        let (rejection, outcome) = match self.risk.evaluate(&signal, &ctx) {
            RiskDecision::NoOp(reason) => (reason, None),
            RiskDecision::Submit(intent) => match self.submit(intent).await? {
                Ok(status) => (None, Some(status)),
                Err(reason) => (Some(reason), None),
            },
        };

        let report = self.report(
            Some(signal.snapshot.timestamp),
            signal.kind,
            rejection,
            outcome,
            Some(equity),
            self.tracker.pending().is_some(),
        );
        info!(
            pair = %self.pair,
            signal = %signal.kind,
            state = report.position.state_name(),
            equity = equity,
            drawdown_pct = drawdown.drawdown * 100.0,
            counter = self.signals.counter(),
            "Tick complete"
        );
        Ok(Some(report))
    }

    /// Reserve a slot for entries, write the intent ahead, execute, settle.
    async fn submit(
        &mut self,
        intent: OrderIntent,
    ) -> Result<std::result::Result<ExecutionStatus, RejectionReason>> {
        if intent.is_entry() {
            match self.shared.slots.try_reserve() {
                Some(slot) => self.entry_slot = Some(slot),
                None => {
                    warn!(pair = %self.pair, "Entry dropped; no free position slot");
                    return Ok(Err(RejectionReason::MaxConcurrentPositions));
                }
            }
        }

        if let Err(e) = self.tracker.record_pending(&intent).await {
            self.entry_slot = None;
            return Err(e);
        }
        let outcome = self.coordinator.execute(&intent).await;
        let status = outcome.status;
        self.settle(outcome).await?;
        Ok(Ok(status))
    }

    /// Apply a terminal outcome. Returns false when the outcome is still
    /// unconfirmed and the intent stays pending.
    async fn settle(&mut self, outcome: ExecutionOutcome) -> Result<bool> {
        if !outcome.confirmed {
            warn!(
                pair = %self.pair,
                order_id = %outcome.intent.id,
                detail = ?outcome.detail,
                "Order outcome unconfirmed; intent kept pending"
            );
            return Ok(false);
        }

        let entry_price = self.tracker.current().open().map(|open| open.entry_price);
        let transition = self.tracker.apply_fill(&outcome).await?;
        let mut pnl = None;
        match &transition {
            Transition::Opened => match self.entry_slot.take() {
                Some(slot) => slot.commit(),
                None => self.shared.slots.occupy(),
            },
            Transition::Closed(_) | Transition::Reduced { .. } => {
                if let (Some(entry), Some(exit)) = (entry_price, outcome.fill_price) {
                    pnl = Some((exit - entry) * outcome.filled_quantity);
                }
                if matches!(transition, Transition::Closed(_)) {
                    self.shared.slots.release();
                }
            }
            Transition::Unchanged => {
                // nothing filled; an entry gives its slot back
                self.entry_slot = None;
                if outcome.status == ExecutionStatus::Rejected {
                    warn!(
                        pair = %self.pair,
                        order_id = %outcome.intent.id,
                        reason = ?outcome.detail,
                        "Intent abandoned after rejection"
                    );
                }
            }
            Transition::Replayed => self.entry_slot = None,
        }

        if transition != Transition::Replayed {
            if let Err(e) = self.journal.record(&outcome, pnl).await {
                error!(pair = %self.pair, order_id = %outcome.intent.id, error = %e, "Failed to journal trade");
            }
        }
        Ok(true)
    }

    fn log_alert(&mut self, latest: &IndicatorSnapshot) {
        if let Some(prev) = self.last_snapshot.filter(|p| p.timestamp < latest.timestamp) {
            if let Some(alert) = check_stoch_alert(&prev, latest, &self.params.alert_bands) {
                info!(
                    pair = %self.pair,
                    alert = %alert,
                    k = latest.stoch_rsi,
                    d = latest.stoch_rsi_d,
                    "StochRSI alert"
                );
            }
        }
        self.last_snapshot = Some(*latest);
    }

    fn report(
        &self,
        candle_time: Option<DateTime<Utc>>,
        signal: SignalKind,
        rejection: Option<RejectionReason>,
        outcome: Option<ExecutionStatus>,
        equity: Option<f64>,
        awaiting_reconciliation: bool,
    ) -> TickReport {
        TickReport {
            candle_time,
            signal,
            rejection,
            outcome,
            position: self.tracker.current().clone(),
            equity,
            awaiting_reconciliation,
        }
    }
}

/// Await `fut` unless shutdown is signalled first. Only side-effect free
/// fetches go through here.
async fn unless_shutdown<T>(
    shutdown: &mut watch::Receiver<bool>,
    fut: impl Future<Output = T>,
) -> Option<T> {
    if *shutdown.borrow() {
        return None;
    }
    tokio::select! {
        value = fut => Some(value),
        _ = shutdown_requested(shutdown) => None,
    }
}

/// Resolves once the flag flips to true. Never resolves if every sender is
/// gone, since nothing can request shutdown any more.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
