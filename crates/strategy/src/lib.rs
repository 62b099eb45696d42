pub mod alerts;
pub mod config;
pub mod indicators;
pub mod signal;

pub use alerts::{check_stoch_alert, StochAlert};
pub use config::{AlertBands, StrategyParams};
pub use indicators::compute_snapshots;
pub use signal::{Crossover, SignalEngine};
