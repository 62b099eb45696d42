use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use common::{ExecutionOutcome, Result};

/// Append-only record of confirmed terminal outcomes (`trades` table).
#[derive(Clone)]
pub struct TradeJournal {
    db: SqlitePool,
}

/// Aggregate results over every journaled trade.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    /// Outcomes with a non-zero fill.
    pub total_fills: i64,
    pub closed_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    /// Percentage of closed trades with positive PnL.
    pub win_rate: f64,
    pub total_pnl: f64,
    pub average_win: f64,
    pub average_loss: f64,
    /// Gross profit over gross loss; `None` without any losing trade.
    pub profit_factor: Option<f64>,
}

impl TradeJournal {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record one outcome. Re-recording the same order id is ignored.
    pub async fn record(&self, outcome: &ExecutionOutcome, pnl: Option<f64>) -> Result<()> {
        let intent = &outcome.intent;
        sqlx::query(
            r#"
            INSERT INTO trades (
                order_id, pair, side, kind, reason, status,
                requested_quantity, filled_quantity, fill_price, pnl, executed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(order_id) DO NOTHING
            "#,
        )
        .bind(&intent.id)
        .bind(&intent.pair)
        .bind(intent.side.to_string())
        .bind(intent.kind.to_string())
        .bind(intent.reason.to_string())
        .bind(outcome.status.to_string())
        .bind(intent.quantity)
        .bind(outcome.filled_quantity)
        .bind(outcome.fill_price)
        .bind(pnl)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn performance(&self) -> Result<PerformanceSummary> {
        let total_fills: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM trades WHERE filled_quantity > 0")
                .fetch_one(&self.db)
                .await?
                .try_get("n")?;

        let pnls: Vec<f64> = sqlx::query("SELECT pnl FROM trades WHERE pnl IS NOT NULL")
            .fetch_all(&self.db)
            .await?
            .iter()
            .map(|row| row.try_get::<f64, _>("pnl"))
            .collect::<std::result::Result<_, _>>()?;

        Ok(summarize(total_fills, &pnls))
    }
}

fn summarize(total_fills: i64, pnls: &[f64]) -> PerformanceSummary {
    let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();
    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();

    let mean = |xs: &[f64]| {
        if xs.is_empty() {
            0.0
        } else {
            xs.iter().sum::<f64>() / xs.len() as f64
        }
    };

    PerformanceSummary {
        total_fills,
        closed_trades: pnls.len() as i64,
        winning_trades: wins.len() as i64,
        losing_trades: losses.len() as i64,
        win_rate: if pnls.is_empty() {
            0.0
        } else {
            wins.len() as f64 / pnls.len() as f64 * 100.0
        },
        total_pnl: pnls.iter().sum(),
        average_win: mean(&wins),
        average_loss: mean(&losses),
        profit_factor: (gross_loss > 0.0).then(|| gross_profit / gross_loss),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::memory_db;
    use common::{ExecutionStatus, IntentReason, OrderIntent};

    fn exit(status: ExecutionStatus, qty: f64) -> ExecutionOutcome {
        ExecutionOutcome {
            intent: OrderIntent::exit("BTCUSDT", 1.0, IntentReason::ExitSignal),
            status,
            fill_price: Some(100.0),
            filled_quantity: qty,
            detail: None,
            confirmed: true,
        }
    }

    #[tokio::test]
    async fn summary_over_recorded_exits() {
        let journal = TradeJournal::new(memory_db().await);
        journal.record(&exit(ExecutionStatus::Filled, 1.0), Some(30.0)).await.unwrap();
        journal.record(&exit(ExecutionStatus::Filled, 1.0), Some(10.0)).await.unwrap();
        journal.record(&exit(ExecutionStatus::Filled, 1.0), Some(-20.0)).await.unwrap();
        journal.record(&exit(ExecutionStatus::Rejected, 0.0), None).await.unwrap();

        let summary = journal.performance().await.unwrap();
        assert_eq!(summary.total_fills, 3);
        assert_eq!(summary.closed_trades, 3);
        assert_eq!(summary.winning_trades, 2);
        assert_eq!(summary.losing_trades, 1);
        assert!((summary.win_rate - 66.666_666).abs() < 1e-3);
        assert_eq!(summary.total_pnl, 20.0);
        assert_eq!(summary.average_win, 20.0);
        assert_eq!(summary.average_loss, -20.0);
        assert_eq!(summary.profit_factor, Some(2.0));
    }

    #[tokio::test]
    async fn same_order_is_journaled_once() {
        let journal = TradeJournal::new(memory_db().await);
        let outcome = exit(ExecutionStatus::Filled, 1.0);
        journal.record(&outcome, Some(5.0)).await.unwrap();
        journal.record(&outcome, Some(5.0)).await.unwrap();

        let summary = journal.performance().await.unwrap();
        assert_eq!(summary.closed_trades, 1);
        assert_eq!(summary.profit_factor, None);
    }

    #[test]
    fn empty_journal_summary_is_zeroed() {
        assert_eq!(summarize(0, &[]), PerformanceSummary::default());
    }
}
