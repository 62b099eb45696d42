use std::sync::Arc;

use tokio::time::{sleep, timeout, Instant};
use tracing::{error, info, warn};

use common::{
    Error, ExecutionOutcome, ExecutionStatus, OrderIntent, OrderReport, Result, Venue,
    VenueOrderStatus,
};

use crate::config::ExecutionSettings;
use crate::retry::{with_backoff, RetryPolicy};

/// Drives one order intent to a terminal outcome.
///
/// This is the ONLY component that calls `Venue::submit_order`. A submit
/// whose result is unknown (timeout or transport error) is never blindly
/// resent: the venue is asked for the order's status by client order id
/// first, and only a definite `NotFound` allows another submission.
pub struct ExecutionCoordinator {
    venue: Arc<dyn Venue>,
    settings: ExecutionSettings,
    retry: RetryPolicy,
}

enum Submission {
    /// The venue has the order; wait for it to finish.
    Working,
    /// Already known to be terminal.
    Done(ExecutionOutcome),
}

impl ExecutionCoordinator {
    pub fn new(venue: Arc<dyn Venue>, settings: ExecutionSettings, retry: RetryPolicy) -> Self {
        Self {
            venue,
            settings,
            retry,
        }
    }

    pub async fn execute(&self, intent: &OrderIntent) -> ExecutionOutcome {
        info!(
            pair = %intent.pair,
            order_id = %intent.id,
            side = %intent.side,
            kind = %intent.kind,
            qty = intent.quantity,
            reason = %intent.reason,
            "Submitting order"
        );
        match self.submit(intent).await {
            Submission::Done(outcome) => outcome,
            Submission::Working => self.await_terminal(intent).await,
        }
    }

    /// Resolve an intent left pending by an earlier tick or a previous run.
    pub async fn reconcile(&self, intent: &OrderIntent) -> ExecutionOutcome {
        match self.query(intent).await {
            Ok(report) if report.status == VenueOrderStatus::NotFound => {
                warn!(
                    pair = %intent.pair,
                    order_id = %intent.id,
                    "Pending order never reached the venue; abandoning intent"
                );
                self.outcome(intent, ExecutionStatus::TimedOut, None, 0.0, Some("not found at venue".into()), true)
            }
            Ok(report) if report.status.is_terminal() => self.from_report(intent, report),
            Ok(_) => self.await_terminal(intent).await,
            Err(e) => self.unconfirmed(intent, &e),
        }
    }

    async fn submit(&self, intent: &OrderIntent) -> Submission {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match timeout(self.settings.submit_timeout(), self.venue.submit_order(intent)).await {
                Ok(Ok(venue_id)) => {
                    info!(pair = %intent.pair, order_id = %intent.id, venue_id = %venue_id, "Order accepted");
                    return Submission::Working;
                }
                Ok(Err(Error::OrderRejected { reason })) => {
                    warn!(pair = %intent.pair, order_id = %intent.id, reason = %reason, "Order rejected; intent abandoned");
                    return Submission::Done(self.outcome(
                        intent,
                        ExecutionStatus::Rejected,
                        None,
                        0.0,
                        Some(reason.to_string()),
                        true,
                    ));
                }
                Ok(Err(e)) => {
                    warn!(pair = %intent.pair, order_id = %intent.id, error = %e, attempt, "Order submission failed; reconciling");
                }
                Err(_) => {
                    warn!(
                        pair = %intent.pair,
                        order_id = %intent.id,
                        timeout_ms = self.settings.submit_timeout_ms,
                        attempt,
                        "Order submission timed out; reconciling"
                    );
                }
            }

            match self.query(intent).await {
                Ok(report) if report.status == VenueOrderStatus::NotFound => {
                    if attempt >= self.settings.max_submit_attempts {
                        warn!(
                            pair = %intent.pair,
                            order_id = %intent.id,
                            attempts = attempt,
                            "Order never reached the venue; intent abandoned"
                        );
                        return Submission::Done(self.outcome(
                            intent,
                            ExecutionStatus::TimedOut,
                            None,
                            0.0,
                            Some("submission did not reach the venue".into()),
                            true,
                        ));
                    }
                    info!(pair = %intent.pair, order_id = %intent.id, "Order not at venue; resubmitting");
                }
                Ok(report) if report.status.is_terminal() => {
                    return Submission::Done(self.from_report(intent, report));
                }
                Ok(_) => return Submission::Working,
                Err(e) => return Submission::Done(self.unconfirmed(intent, &e)),
            }
        }
    }

    /// Poll until terminal or `fill_timeout`, then cancel the remainder.
    async fn await_terminal(&self, intent: &OrderIntent) -> ExecutionOutcome {
        let deadline = Instant::now() + self.settings.fill_timeout();
        loop {
            match self.query(intent).await {
                Ok(report) if report.status.is_terminal() => return self.from_report(intent, report),
                Ok(_) => {}
                Err(e) => warn!(pair = %intent.pair, order_id = %intent.id, error = %e, "Order status poll failed"),
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(self.settings.poll_interval()).await;
        }

        warn!(
            pair = %intent.pair,
            order_id = %intent.id,
            fill_timeout_ms = self.settings.fill_timeout_ms,
            "Order not terminal in time; cancelling remainder"
        );
        let venue = &self.venue;
        if let Err(e) = with_backoff(&self.retry, &intent.pair, "cancel_order", move || {
            venue.cancel_order(&intent.pair, &intent.id)
        })
        .await
        {
            warn!(pair = %intent.pair, order_id = %intent.id, error = %e, "Cancel failed");
        }

        match self.query(intent).await {
            Ok(report) if report.status.is_terminal() => {
                let mut outcome = self.from_report(intent, report);
                if outcome.status == ExecutionStatus::Filled {
                    return outcome;
                }
                if outcome.status != ExecutionStatus::Rejected {
                    outcome.status = if outcome.filled_quantity > 0.0 {
                        ExecutionStatus::Partial
                    } else {
                        ExecutionStatus::TimedOut
                    };
                }
                outcome
            }
            Ok(report) => {
                let e = Error::Venue(format!("order still {:?} after cancel", report.status));
                self.unconfirmed(intent, &e)
            }
            Err(e) => self.unconfirmed(intent, &e),
        }
    }

    async fn query(&self, intent: &OrderIntent) -> Result<OrderReport> {
        let venue = &self.venue;
        with_backoff(&self.retry, &intent.pair, "order_status", move || {
            venue.order_status(&intent.pair, &intent.id)
        })
        .await
    }

    fn from_report(&self, intent: &OrderIntent, report: OrderReport) -> ExecutionOutcome {
        let filled = report.filled_quantity.max(0.0);
        let status = match report.status {
            VenueOrderStatus::Filled => ExecutionStatus::Filled,
            VenueOrderStatus::PartiallyFilled if filled > 0.0 => ExecutionStatus::Partial,
            VenueOrderStatus::Cancelled if filled > 0.0 => ExecutionStatus::Partial,
            VenueOrderStatus::Rejected => ExecutionStatus::Rejected,
            VenueOrderStatus::PartiallyFilled | VenueOrderStatus::Cancelled => ExecutionStatus::TimedOut,
            VenueOrderStatus::Pending | VenueOrderStatus::NotFound => {
                let e = Error::Venue(format!("order status {:?} is not terminal", report.status));
                return self.unconfirmed(intent, &e);
            }
        };

        if filled > 0.0 && report.average_price.is_none() {
            let e = Error::Venue("fill reported without an average price".into());
            return self.unconfirmed(intent, &e);
        }

        let outcome = self.outcome(intent, status, report.average_price, filled, report.reason, true);
        match status {
            ExecutionStatus::Rejected => warn!(
                pair = %intent.pair,
                order_id = %intent.id,
                reason = ?outcome.detail,
                "Order rejected by venue; intent abandoned"
            ),
            _ => info!(
                pair = %intent.pair,
                order_id = %intent.id,
                status = %status,
                price = ?outcome.fill_price,
                filled = filled,
                "Order finished"
            ),
        }
        outcome
    }

    fn unconfirmed(&self, intent: &OrderIntent, e: &Error) -> ExecutionOutcome {
        error!(
            pair = %intent.pair,
            order_id = %intent.id,
            error = %e,
            "Order state unknown; will reconcile next tick"
        );
        self.outcome(intent, ExecutionStatus::TimedOut, None, 0.0, Some(e.to_string()), false)
    }

    fn outcome(
        &self,
        intent: &OrderIntent,
        status: ExecutionStatus,
        fill_price: Option<f64>,
        filled_quantity: f64,
        detail: Option<String>,
        confirmed: bool,
    ) -> ExecutionOutcome {
        ExecutionOutcome {
            intent: intent.clone(),
            status,
            fill_price,
            filled_quantity,
            detail,
            confirmed,
        }
    }
}
