use thiserror::Error;

use crate::RejectionReason;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Insufficient data: need {required} candles, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Data quality error: {0}")]
    DataQuality(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Venue error: {0}")]
    Venue(String),

    #[error("Order rejected: {reason}")]
    OrderRejected { reason: RejectionReason },

    #[error("Invalid transition for {pair}: {event} while {state}")]
    InvalidTransition {
        pair: String,
        state: String,
        event: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transient venue failures, retried with bounded backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Venue(_))
    }

    /// Errors after which a pair's position state can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvalidTransition { .. } | Error::Database(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_and_venue_errors_are_retryable() {
        assert!(Error::Network("reset".into()).is_retryable());
        assert!(Error::Venue("rate limited".into()).is_retryable());
        assert!(!Error::OrderRejected {
            reason: RejectionReason::Other("insufficient balance".into())
        }
        .is_retryable());
        assert!(!Error::InsufficientData {
            required: 30,
            available: 3
        }
        .is_retryable());
    }

    #[test]
    fn invalid_transition_is_fatal() {
        let err = Error::InvalidTransition {
            pair: "BTCUSDT".into(),
            state: "FLAT".into(),
            event: "exit fill".into(),
        };
        assert!(err.is_fatal());
        assert!(!Error::DataQuality("gap".into()).is_fatal());
    }
}
