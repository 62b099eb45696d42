pub mod drawdown;
pub mod manager;
pub mod slots;

pub use drawdown::{DrawdownGuard, DrawdownStatus};
pub use manager::{position_size, EntryOrderType, RiskConfig, RiskContext, RiskDecision, RiskManager};
pub use slots::{PositionSlots, SlotReservation};
