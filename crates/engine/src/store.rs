use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use common::{Error, OpenPosition, OrderIntent, Position, PositionState, Result};

/// Apply the embedded migrations under `migrations/`.
pub async fn migrate(db: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(db)
        .await
        .map_err(|e| Error::Database(e.into()))
}

/// One `positions` row: the tracker's durable state for a pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRecord {
    pub position: Position,
    /// Client order id of the last outcome applied.
    pub last_order_id: Option<String>,
    /// Entry order id of the current or most recently closed position.
    pub last_entry_order_id: Option<String>,
    /// Intent submitted (or about to be) whose outcome is not yet applied.
    pub pending: Option<OrderIntent>,
}

impl PositionRecord {
    pub fn flat(pair: impl Into<String>) -> Self {
        Self {
            position: Position::flat(pair),
            last_order_id: None,
            last_entry_order_id: None,
            pending: None,
        }
    }
}

#[derive(Clone)]
pub struct PositionStore {
    db: SqlitePool,
}

impl PositionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn load(&self, pair: &str) -> Result<Option<PositionRecord>> {
        let row = sqlx::query("SELECT * FROM positions WHERE pair = ?1")
            .bind(pair)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }

    pub async fn load_all(&self) -> Result<Vec<PositionRecord>> {
        let rows = sqlx::query("SELECT * FROM positions ORDER BY pair")
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    /// Upsert the full row for `record.position.pair`.
    pub async fn save(&self, record: &PositionRecord) -> Result<()> {
        let open = record.position.open();
        let pending = record
            .pending
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO positions (
                pair, state, entry_price, quantity, stop_loss_price, take_profit_price,
                opened_at, entry_order_id, last_order_id, last_entry_order_id,
                pending_intent, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(pair) DO UPDATE SET
                state = excluded.state,
                entry_price = excluded.entry_price,
                quantity = excluded.quantity,
                stop_loss_price = excluded.stop_loss_price,
                take_profit_price = excluded.take_profit_price,
                opened_at = excluded.opened_at,
                entry_order_id = excluded.entry_order_id,
                last_order_id = excluded.last_order_id,
                last_entry_order_id = excluded.last_entry_order_id,
                pending_intent = excluded.pending_intent,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.position.pair)
        .bind(record.position.state_name())
        .bind(open.map(|o| o.entry_price))
        .bind(open.map(|o| o.quantity))
        .bind(open.map(|o| o.stop_loss_price))
        .bind(open.map(|o| o.take_profit_price))
        .bind(open.map(|o| o.opened_at.to_rfc3339()))
        .bind(open.map(|o| o.entry_order_id.clone()))
        .bind(record.last_order_id.as_deref())
        .bind(record.last_entry_order_id.as_deref())
        .bind(pending)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

fn decode_row(row: &SqliteRow) -> Result<PositionRecord> {
    let pair: String = row.try_get("pair")?;
    let state: String = row.try_get("state")?;

    let position_state = match state.as_str() {
        "FLAT" => PositionState::Flat,
        "OPEN" => {
            let opened_at: String = row.try_get("opened_at")?;
            PositionState::Open(OpenPosition {
                entry_price: row.try_get("entry_price")?,
                quantity: row.try_get("quantity")?,
                stop_loss_price: row.try_get("stop_loss_price")?,
                take_profit_price: row.try_get("take_profit_price")?,
                opened_at: parse_timestamp(&opened_at)?,
                entry_order_id: row.try_get("entry_order_id")?,
            })
        }
        other => {
            return Err(Error::Database(sqlx::Error::Decode(
                format!("unknown position state '{other}' for {pair}").into(),
            )))
        }
    };

    let pending: Option<String> = row.try_get("pending_intent")?;
    let pending = pending
        .as_deref()
        .map(serde_json::from_str::<OrderIntent>)
        .transpose()?;

    Ok(PositionRecord {
        position: Position {
            pair,
            state: position_state,
        },
        last_order_id: row.try_get("last_order_id")?,
        last_entry_order_id: row.try_get("last_entry_order_id")?,
        pending,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Database(sqlx::Error::Decode(Box::new(e))))
}
