use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::db::StoreError;
use crate::models::{BookingStatus, PaymentStatus};
use crate::services::reconciler;
use crate::services::state_machine::{self, Outcome, Target, TransitionError, TransitionRequest};
use crate::state::AppState;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub replayed: usize,
    pub expired: usize,
    pub skipped: usize,
}

/// Background task that periodically expires unpaid holds.
pub async fn run_sweeper(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(state.config.sweep_interval);
    loop {
        interval.tick().await;
        match sweep_once(&state, Utc::now()).await {
            Ok(report) if report != SweepReport::default() => {
                tracing::info!(
                    replayed = report.replayed,
                    expired = report.expired,
                    skipped = report.skipped,
                    "sweep finished"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "sweep failed, retrying next tick"),
        }
    }
}

/// One pass: replay ledger rows left unapplied, then expire holds past their TTL.
/// Replay goes first so a payment that already arrived wins over expiry.
pub async fn sweep_once(state: &AppState, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
    let mut report = SweepReport {
        replayed: reconciler::replay_unapplied(state, now).await?,
        ..Default::default()
    };

    let cutoff = now - state.config.hold_ttl();
    let expired = state.store.list_expired_holds(cutoff).await?;

    for hold in expired {
        let request = TransitionRequest {
            booking_id: hold.id.clone(),
            expected_version: hold.version,
            target: Target::new(BookingStatus::Cancelled, PaymentStatus::Expired),
            deposit_amount_paid: None,
            applied_event: None,
        };

        match state_machine::transition(state, request, now).await {
            Ok(Outcome::Applied(_)) => {
                tracing::info!(booking_id = %hold.id, created_at = %hold.created_at, "expired unpaid hold");
                report.expired += 1;
            }
            Ok(Outcome::Unchanged(_)) => report.skipped += 1,
            Err(TransitionError::Store(e)) => return Err(e),
            Err(e) => {
                // Usually a payment landed between listing and expiring.
                tracing::debug!(booking_id = %hold.id, error = %e, "sweeper skip");
                report.skipped += 1;
            }
        }
    }

    Ok(report)
}
