use std::sync::Mutex;

use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawdownStatus {
    pub peak_equity: f64,
    /// Fractional drop from peak, 0.0 at a new high.
    pub drawdown: f64,
    pub halted: bool,
}

#[derive(Debug, Default)]
struct GuardState {
    peak: f64,
    halted: bool,
}

/// Tracks peak account equity and latches a halt once the drawdown from
/// that peak reaches the configured limit. The halt is never cleared while
/// the process runs.
#[derive(Debug)]
pub struct DrawdownGuard {
    max_drawdown_pct: Option<f64>,
    state: Mutex<GuardState>,
}

impl DrawdownGuard {
    pub fn new(max_drawdown_pct: Option<f64>) -> Self {
        Self {
            max_drawdown_pct,
            state: Mutex::new(GuardState::default()),
        }
    }

    pub fn observe(&self, equity: f64) -> DrawdownStatus {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if equity > state.peak {
            state.peak = equity;
        }
        let drawdown = if state.peak > 0.0 {
            ((state.peak - equity) / state.peak).max(0.0)
        } else {
            0.0
        };

        if let Some(limit) = self.max_drawdown_pct {
            if !state.halted && drawdown >= limit {
                state.halted = true;
                error!(
                    peak = state.peak,
                    equity = equity,
                    drawdown_pct = drawdown * 100.0,
                    "Max drawdown reached; new entries halted"
                );
            }
        }

        DrawdownStatus {
            peak_equity: state.peak,
            drawdown,
            halted: state.halted,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().map(|s| s.halted).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halts_at_limit_and_stays_halted() {
        let guard = DrawdownGuard::new(Some(0.10));
        assert!(!guard.observe(10_000.0).halted);
        assert!(!guard.observe(11_000.0).halted);

        let status = guard.observe(9_900.0);
        assert!(status.halted);
        assert!((status.drawdown - 0.10).abs() < 1e-9);

        assert!(guard.observe(12_000.0).halted);
        assert!(guard.is_halted());
    }

    #[test]
    fn disabled_guard_never_halts() {
        let guard = DrawdownGuard::new(None);
        guard.observe(10_000.0);
        let status = guard.observe(1.0);
        assert!(!status.halted);
        assert!(status.drawdown > 0.99);
    }
}
