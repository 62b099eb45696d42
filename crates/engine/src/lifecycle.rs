use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use common::{PairTaskState, Position, Result, SignalKind, Venue};
use risk::{DrawdownGuard, PositionSlots, RiskManager};

use crate::config::EngineFileConfig;
use crate::executor::ExecutionCoordinator;
use crate::journal::TradeJournal;
use crate::pipeline::{shutdown_requested, PairPipeline, SharedRisk, TickReport};
use crate::sampler::MarketDataSampler;
use crate::store::PositionStore;
use crate::tracker::PositionTracker;

/// Read-model of one pair's task, for the status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PairStatus {
    pub pair: String,
    pub task: PairTaskState,
    pub position: Position,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_signal: Option<SignalKind>,
    pub last_error: Option<String>,
    pub equity: Option<f64>,
    pub awaiting_reconciliation: bool,
}

impl PairStatus {
    fn new(position: Position) -> Self {
        Self {
            pair: position.pair.clone(),
            task: PairTaskState::Starting,
            position,
            last_tick: None,
            last_signal: None,
            last_error: None,
            equity: None,
            awaiting_reconciliation: false,
        }
    }
}

type StatusBoard = Arc<RwLock<BTreeMap<String, PairStatus>>>;

/// Cloneable handle passed to other crates (API, binary).
#[derive(Clone)]
pub struct EngineHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
    status: StatusBoard,
    guard: Arc<DrawdownGuard>,
    slots: Arc<PositionSlots>,
}

impl EngineHandle {
    /// Ask every pair task to stop after its current execution step.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn pairs(&self) -> Vec<PairStatus> {
        self.status.read().await.values().cloned().collect()
    }

    pub async fn pair(&self, pair: &str) -> Option<PairStatus> {
        self.status.read().await.get(pair).cloned()
    }

    pub fn drawdown_halted(&self) -> bool {
        self.guard.is_halted()
    }

    pub fn open_positions(&self) -> usize {
        self.slots.open()
    }

    /// Healthy unless a pair task halted or the drawdown guard latched.
    pub async fn is_healthy(&self) -> bool {
        !self.drawdown_halted()
            && self
                .status
                .read()
                .await
                .values()
                .all(|s| s.task != PairTaskState::Halted)
    }
}

/// The main engine: one independent task per configured pair.
pub struct Engine {
    pipelines: Vec<(PairPipeline, Duration)>,
    status: StatusBoard,
    shutdown_rx: watch::Receiver<bool>,
}

impl Engine {
    /// Restore every pair's tracker and wire its pipeline.
    pub async fn build(
        config: &EngineFileConfig,
        venue: Arc<dyn Venue>,
        db: SqlitePool,
    ) -> Result<(Self, EngineHandle)> {
        let slots = PositionSlots::new(config.engine.max_concurrent_positions);
        let guard = Arc::new(DrawdownGuard::new(config.risk.max_drawdown_pct));
        let shared = SharedRisk {
            slots: Arc::clone(&slots),
            guard: Arc::clone(&guard),
        };
        let store = PositionStore::new(db.clone());
        let journal = TradeJournal::new(db);

        let mut pipelines = Vec::with_capacity(config.pairs.len());
        let mut board = BTreeMap::new();
        for pair in &config.pairs {
            let tracker = PositionTracker::restore(store.clone(), &pair.symbol).await?;
            if tracker.current().is_open() {
                slots.occupy();
            }
            board.insert(pair.symbol.clone(), PairStatus::new(tracker.current().clone()));

            let sampler = MarketDataSampler::new(
                Arc::clone(&venue),
                pair.symbol.clone(),
                pair.timeframe,
                config.engine.candle_history,
                config.retry.clone(),
            );
            let coordinator = ExecutionCoordinator::new(
                Arc::clone(&venue),
                config.execution.clone(),
                config.retry.clone(),
            );
            let pipeline = PairPipeline::new(
                Arc::clone(&venue),
                sampler,
                pair.strategy.clone(),
                RiskManager::new(config.risk_for(pair)),
                tracker,
                coordinator,
                journal.clone(),
                config.retry.clone(),
                shared.clone(),
            );
            pipelines.push((pipeline, config.tick_interval(pair)));
        }

        if slots.open() > slots.max() {
            warn!(
                open = slots.open(),
                max = slots.max(),
                "Restored more open positions than max_concurrent_positions"
            );
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let status = Arc::new(RwLock::new(board));
        let handle = EngineHandle {
            shutdown_tx: Arc::new(shutdown_tx),
            status: Arc::clone(&status),
            guard,
            slots,
        };
        Ok((
            Self {
                pipelines,
                status,
                shutdown_rx,
            },
            handle,
        ))
    }

    /// Run until shutdown. Returns once every pair task has stopped.
    pub async fn run(self) {
        let mut tasks = JoinSet::new();
        for (pipeline, period) in self.pipelines {
            info!(pair = %pipeline.pair(), period_secs = period.as_secs_f64(), "Starting pair task");
            tasks.spawn(run_pair(
                pipeline,
                period,
                self.shutdown_rx.clone(),
                Arc::clone(&self.status),
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Pair task panicked");
            }
        }
        info!("All pair tasks stopped");
    }
}

async fn run_pair(
    mut pipeline: PairPipeline,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    status: StatusBoard,
) {
    let pair = pipeline.pair().to_string();
    set_state(&status, &pair, PairTaskState::Running).await;

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        match pipeline.tick(&mut shutdown).await {
            Ok(Some(report)) => record_tick(&status, &pair, report).await,
            Ok(None) => break,
            Err(e) if e.is_fatal() => {
                error!(pair = %pair, error = %e, "Fatal error; halting pair task");
                let mut board = status.write().await;
                if let Some(entry) = board.get_mut(&pair) {
                    entry.task = PairTaskState::Halted;
                    entry.last_error = Some(e.to_string());
                    entry.position = pipeline.position().clone();
                }
                return;
            }
            Err(e) => {
                warn!(pair = %pair, error = %e, "Tick skipped");
                if let Some(entry) = status.write().await.get_mut(&pair) {
                    entry.last_error = Some(e.to_string());
                    entry.position = pipeline.position().clone();
                }
            }
        }
    }

    info!(pair = %pair, "Pair task stopped");
    set_state(&status, &pair, PairTaskState::Stopped).await;
}

async fn record_tick(status: &StatusBoard, pair: &str, report: TickReport) {
    if let Some(entry) = status.write().await.get_mut(pair) {
        entry.last_tick = Some(Utc::now());
        entry.last_signal = Some(report.signal);
        entry.last_error = None;
        entry.position = report.position;
        entry.awaiting_reconciliation = report.awaiting_reconciliation;
        if report.equity.is_some() {
            entry.equity = report.equity;
        }
    }
}

async fn set_state(status: &StatusBoard, pair: &str, state: PairTaskState) {
    if let Some(entry) = status.write().await.get_mut(pair) {
        entry.task = state;
    }
}
