use tracing::{debug, info};

use common::{
    Error, ExecutionOutcome, ExecutionStatus, OpenPosition, OrderIntent, Position, PositionState,
    Result,
};

use crate::store::{PositionRecord, PositionStore};

/// Effect of applying an outcome to the tracked position.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The outcome's order id was already applied.
    Replayed,
    /// Terminal outcome with nothing filled; only the pending intent cleared.
    Unchanged,
    Opened,
    Reduced { remaining: f64 },
    /// The position went FLAT. Carries the position that was closed.
    Closed(OpenPosition),
}

/// Sole writer of one pair's position state.
///
/// Every change is persisted before it becomes visible through `current()`,
/// so a failed write leaves the in-memory state matching the database.
pub struct PositionTracker {
    store: PositionStore,
    record: PositionRecord,
}

impl PositionTracker {
    /// Load the pair's row, creating a FLAT one on first run.
    pub async fn restore(store: PositionStore, pair: &str) -> Result<Self> {
        let record = match store.load(pair).await? {
            Some(record) => {
                info!(
                    pair = %pair,
                    state = record.position.state_name(),
                    pending = record.pending.is_some(),
                    "Position restored"
                );
                record
            }
            None => {
                let record = PositionRecord::flat(pair);
                store.save(&record).await?;
                record
            }
        };
        Ok(Self { store, record })
    }

    pub fn current(&self) -> &Position {
        &self.record.position
    }

    pub fn pair(&self) -> &str {
        &self.record.position.pair
    }

    pub fn pending(&self) -> Option<&OrderIntent> {
        self.record.pending.as_ref()
    }

    /// Persist the intent before it is sent to the venue.
    pub async fn record_pending(&mut self, intent: &OrderIntent) -> Result<()> {
        if let Some(existing) = &self.record.pending {
            if existing.id != intent.id {
                return Err(self.invalid("new intent", "intent already pending"));
            }
        }
        let next = PositionRecord {
            pending: Some(intent.clone()),
            ..self.record.clone()
        };
        self.commit(next).await
    }

    /// Apply a confirmed terminal outcome.
    pub async fn apply_fill(&mut self, outcome: &ExecutionOutcome) -> Result<Transition> {
        let intent = &outcome.intent;
        if intent.pair != self.record.position.pair {
            return Err(self.invalid("fill for another pair", &intent.pair));
        }
        if self.already_applied(intent) {
            debug!(pair = %intent.pair, order_id = %intent.id, "Outcome already applied");
            return Ok(Transition::Replayed);
        }

        let mut next = PositionRecord {
            position: self.record.position.clone(),
            last_order_id: Some(intent.id.clone()),
            last_entry_order_id: self.record.last_entry_order_id.clone(),
            pending: self
                .record
                .pending
                .clone()
                .filter(|pending| pending.id != intent.id),
        };

        let transition = if !outcome.has_fill() {
            Transition::Unchanged
        } else if intent.is_entry() {
            self.open_from(outcome, &mut next)?
        } else {
            self.close_from(outcome, &mut next)?
        };

        self.commit(next).await?;
        if transition != Transition::Unchanged {
            info!(
                pair = %intent.pair,
                order_id = %intent.id,
                status = %outcome.status,
                state = self.record.position.state_name(),
                "Position updated"
            );
        }
        Ok(transition)
    }

    /// The last outcome, or the entry behind the current or most recently
    /// closed position.
    fn already_applied(&self, intent: &OrderIntent) -> bool {
        let id = Some(intent.id.as_str());
        if self.record.last_order_id.as_deref() == id {
            return true;
        }
        intent.is_entry()
            && (self.record.last_entry_order_id.as_deref() == id
                || self.record.position.open().map(|o| o.entry_order_id.as_str()) == id)
    }

    fn open_from(&self, outcome: &ExecutionOutcome, next: &mut PositionRecord) -> Result<Transition> {
        let intent = &outcome.intent;
        if self.record.position.is_open() {
            return Err(self.invalid("entry fill", "OPEN"));
        }
        let fill_price = outcome
            .fill_price
            .ok_or_else(|| self.invalid("entry fill without price", "FLAT"))?;
        let levels = intent
            .protective
            .ok_or_else(|| self.invalid("entry fill without protective levels", "FLAT"))?
            .anchored_to(fill_price);

        next.position.state = PositionState::Open(OpenPosition {
            entry_price: fill_price,
            quantity: outcome.filled_quantity,
            stop_loss_price: levels.stop_loss_price,
            take_profit_price: levels.take_profit_price,
            opened_at: chrono::Utc::now(),
            entry_order_id: intent.id.clone(),
        });
        next.last_entry_order_id = Some(intent.id.clone());
        Ok(Transition::Opened)
    }

    fn close_from(&self, outcome: &ExecutionOutcome, next: &mut PositionRecord) -> Result<Transition> {
        let Some(open) = self.record.position.open() else {
            return Err(self.invalid("exit fill", "FLAT"));
        };

        let remaining = open.quantity - outcome.filled_quantity;
        if outcome.status == ExecutionStatus::Filled || remaining <= f64::EPSILON * open.quantity {
            next.position.state = PositionState::Flat;
            return Ok(Transition::Closed(open.clone()));
        }

        next.position.state = PositionState::Open(OpenPosition {
            quantity: remaining,
            ..open.clone()
        });
        Ok(Transition::Reduced { remaining })
    }

    async fn commit(&mut self, next: PositionRecord) -> Result<()> {
        self.store.save(&next).await?;
        self.record = next;
        Ok(())
    }

    fn invalid(&self, event: &str, state: &str) -> Error {
        Error::InvalidTransition {
            pair: self.record.position.pair.clone(),
            state: state.to_string(),
            event: event.to_string(),
        }
    }
}
