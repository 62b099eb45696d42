pub mod config;
pub mod executor;
pub mod journal;
pub mod lifecycle;
pub mod pipeline;
pub mod retry;
pub mod sampler;
pub mod store;
pub mod tracker;

pub use config::{EngineFileConfig, EngineSettings, ExecutionSettings, PairConfig};
pub use executor::ExecutionCoordinator;
pub use journal::{PerformanceSummary, TradeJournal};
pub use lifecycle::{Engine, EngineHandle, PairStatus};
pub use pipeline::{PairPipeline, SharedRisk, TickReport};
pub use retry::{with_backoff, RetryPolicy};
pub use sampler::{validate_candles, MarketDataSampler};
pub use store::{migrate, PositionRecord, PositionStore};
pub use tracker::{PositionTracker, Transition};
