use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, OrderConstraints};
use engine::{Engine, EngineFileConfig, TradeJournal};
use paper::{PaperSettings, PaperVenue, SyntheticFeed};

/// Sizing rules the paper venue applies to every pair.
const PAPER_CONSTRAINTS: OrderConstraints = OrderConstraints {
    min_size: 0.0001,
    max_size: 1_000.0,
    size_increment: 0.0001,
    price_increment: 0.01,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env()?;
    let engine_cfg = EngineFileConfig::load(&cfg.engine_config_path)?;
    info!(
        pairs = engine_cfg.pairs.len(),
        config = %cfg.engine_config_path,
        "TrendBot starting"
    );

    // ── Database ──────────────────────────────────────────────────────────────
    let options = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("invalid DATABASE_URL '{}'", cfg.database_url))?
        .create_if_missing(true);
    let db = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("failed to connect to database")?;
    engine::migrate(&db).await.context("database migration failed")?;
    info!("Database ready");

    // ── Paper venue + synthetic feed ──────────────────────────────────────────
    let venue = Arc::new(PaperVenue::new(PaperSettings {
        initial_balance: cfg.paper_initial_balance,
        slippage_bps: cfg.paper_slippage_bps,
        fee_bps: cfg.paper_fee_bps,
    }));
    let mut feed = SyntheticFeed::new(cfg.paper_seed, 0.01);
    let history = engine_cfg.engine.candle_history;
    for pair in &engine_cfg.pairs {
        venue.add_pair(&pair.symbol, PAPER_CONSTRAINTS).await;
        let start = Utc::now() - pair.timeframe.as_chrono() * history as i32;
        feed.add_pair(&pair.symbol, pair.timeframe, 100.0, start);
    }
    feed.fill(&venue, history).await?;
    let feed_period = engine_cfg
        .pairs
        .iter()
        .map(|p| engine_cfg.tick_interval(p))
        .min()
        .context("no pairs configured")?;
    let feed_task = tokio::spawn(feed.run(Arc::clone(&venue), feed_period));

    // ── Engine ────────────────────────────────────────────────────────────────
    let (engine, handle) = Engine::build(&engine_cfg, venue, db.clone()).await?;
    let journal = TradeJournal::new(db);

    // ── Status API ────────────────────────────────────────────────────────────
    let api_task = cfg.health_port.map(|port| {
        let state = api::AppState {
            engine: handle.clone(),
            journal: journal.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = api::serve(state, port).await {
                error!(error = %e, "Status API stopped");
            }
        })
    });

    let mut engine_task = tokio::spawn(engine.run());
    info!("All subsystems started. Waiting for shutdown signal.");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received; stopping pair tasks");
            handle.shutdown();
            if let Err(e) = (&mut engine_task).await {
                error!(error = %e, "Engine task failed");
            }
        }
        joined = &mut engine_task => {
            if let Err(e) = joined {
                error!(error = %e, "Engine task failed");
            }
            warn!("Engine stopped without a shutdown signal");
        }
    }

    feed_task.abort();
    if let Some(task) = api_task {
        task.abort();
    }

    // ── Session summary ───────────────────────────────────────────────────────
    match journal.performance().await {
        Ok(s) => info!(
            fills = s.total_fills,
            closed = s.closed_trades,
            win_rate = s.win_rate,
            total_pnl = s.total_pnl,
            profit_factor = ?s.profit_factor,
            "Session performance"
        ),
        Err(e) => warn!(error = %e, "Could not read trade journal"),
    }
    info!("Exiting.");
    Ok(())
}
