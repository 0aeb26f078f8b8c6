use chrono::{DateTime, SubsecRound, Utc};

use crate::db::{StoreError, VersionedUpdate};
use crate::models::{Booking, BookingStatus, PaymentStatus};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
}

impl Target {
    pub fn new(status: BookingStatus, payment_status: PaymentStatus) -> Self {
        Self {
            status,
            payment_status,
        }
    }

    pub fn of(booking: &Booking) -> Self {
        Self::new(booking.status, booking.payment_status)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.status.as_str(), self.payment_status.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("booking {0} not found")]
    NotFound(String),

    #[error("booking {booking_id} changed since version {expected}")]
    StaleVersion { booking_id: String, expected: i64 },

    #[error("booking {booking_id}: illegal transition {current} -> {target}")]
    IllegalTransition {
        booking_id: String,
        current: Target,
        target: Target,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransitionError {
    pub fn code(&self) -> &'static str {
        match self {
            TransitionError::NotFound(_) => "NOT_FOUND",
            TransitionError::StaleVersion { .. } => "STALE_VERSION",
            TransitionError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            TransitionError::Store(_) => "STORE_ERROR",
        }
    }
}

fn status_edge(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;
    matches!(
        (from, to),
        (PendingPayment, Confirmed)
            | (PendingPayment, Cancelled)
            | (Confirmed, InProgress)
            | (Confirmed, Cancelled)
            | (Confirmed, NoShow)
            | (InProgress, Completed)
    )
}

fn payment_edge(from: PaymentStatus, to: PaymentStatus) -> bool {
    use PaymentStatus::*;
    matches!(
        (from, to),
        (Pending, DepositPaid)
            | (Pending, Paid)
            | (Pending, Expired)
            | (DepositPaid, Paid)
            | (DepositPaid, Refunded)
            | (Paid, Refunded)
    )
}

/// Checks `target` against the transition tables. `Ok(false)` means the booking is
/// already there and nothing needs writing.
pub fn check_transition(current: &Booking, target: &Target) -> Result<bool, TransitionError> {
    let from = Target::of(current);
    if from == *target {
        return Ok(false);
    }

    let illegal = || TransitionError::IllegalTransition {
        booking_id: current.id.clone(),
        current: from,
        target: *target,
    };

    let status_ok = from.status == target.status || status_edge(from.status, target.status);
    let payment_ok = from.payment_status == target.payment_status
        || payment_edge(from.payment_status, target.payment_status);
    if !status_ok || !payment_ok {
        return Err(illegal());
    }

    // Entering `confirmed` needs money in: the deposit when the booking was created
    // with one, otherwise full payment.
    if target.status == BookingStatus::Confirmed && from.status != BookingStatus::Confirmed {
        let settled = match target.payment_status {
            PaymentStatus::Paid => true,
            PaymentStatus::DepositPaid => current.requires_deposit,
            _ => false,
        };
        if !settled {
            return Err(illegal());
        }
    }

    Ok(true)
}

#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub booking_id: String,
    pub expected_version: i64,
    pub target: Target,
    /// Replaces the recorded deposit when set.
    pub deposit_amount_paid: Option<i64>,
    /// Ledger row to mark applied together with the transition.
    pub applied_event: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Applied(Booking),
    Unchanged(Booking),
}

impl Outcome {
    pub fn booking(&self) -> &Booking {
        match self {
            Outcome::Applied(b) | Outcome::Unchanged(b) => b,
        }
    }
}

/// The only way a booking's status fields change. Fails with `StaleVersion` if the
/// booking moved past `expected_version`, and with `IllegalTransition` if the target is
/// not reachable from the stored state.
pub async fn transition(
    state: &AppState,
    request: TransitionRequest,
    now: DateTime<Utc>,
) -> Result<Outcome, TransitionError> {
    let now = now.trunc_subsecs(0);
    let current = state
        .store
        .get_booking(&request.booking_id)
        .await?
        .ok_or_else(|| TransitionError::NotFound(request.booking_id.clone()))?;

    if current.version != request.expected_version {
        tracing::debug!(
            booking_id = %current.id,
            expected = request.expected_version,
            found = current.version,
            "stale version"
        );
        return Err(TransitionError::StaleVersion {
            booking_id: current.id,
            expected: request.expected_version,
        });
    }

    match check_transition(&current, &request.target) {
        Err(e) => {
            tracing::warn!(booking_id = %current.id, error = %e, "rejected illegal transition");
            return Err(e);
        }
        Ok(false) => {
            if let Some(event_id) = &request.applied_event {
                state.store.mark_event_applied(event_id, now).await?;
            }
            return Ok(Outcome::Unchanged(current));
        }
        Ok(true) => {}
    }

    let update = VersionedUpdate {
        booking_id: current.id.clone(),
        expected_version: request.expected_version,
        status: request.target.status,
        payment_status: request.target.payment_status,
        deposit_amount_paid: request
            .deposit_amount_paid
            .unwrap_or(current.deposit_amount_paid),
        updated_at: now,
        applied_event: request.applied_event.clone(),
    };

    let Some(updated) = state.store.update_versioned(&update).await? else {
        tracing::debug!(booking_id = %current.id, "lost transition race");
        return Err(TransitionError::StaleVersion {
            booking_id: current.id,
            expected: request.expected_version,
        });
    };

    tracing::info!(
        booking_id = %updated.id,
        from = %Target::of(&current),
        to = %Target::of(&updated),
        version = updated.version,
        "booking transitioned"
    );
    // No subscribers is fine.
    let _ = state.booking_tx.send((&updated).into());

    Ok(Outcome::Applied(updated))
}

/// Explicit cancellation. A hold gives up its payment session; a confirmed booking
/// keeps its payment status until a refund event arrives.
pub async fn cancel(
    state: &AppState,
    booking_id: &str,
    now: DateTime<Utc>,
) -> Result<Outcome, TransitionError> {
    let mut retried = false;
    loop {
        let current = state
            .store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| TransitionError::NotFound(booking_id.to_string()))?;

        let payment_status = match current.payment_status {
            PaymentStatus::Pending => PaymentStatus::Expired,
            other => other,
        };
        let request = TransitionRequest {
            booking_id: current.id.clone(),
            expected_version: current.version,
            target: Target::new(BookingStatus::Cancelled, payment_status),
            deposit_amount_paid: None,
            applied_event: None,
        };

        match transition(state, request, now).await {
            Err(TransitionError::StaleVersion { .. }) if !retried => retried = true,
            result => return result,
        }
    }
}

/// Time-driven moves (`in_progress`, `completed`, `no_show`) made by an operator.
pub async fn advance(
    state: &AppState,
    booking_id: &str,
    expected_version: i64,
    status: BookingStatus,
    now: DateTime<Utc>,
) -> Result<Outcome, TransitionError> {
    let current = state
        .store
        .get_booking(booking_id)
        .await?
        .ok_or_else(|| TransitionError::NotFound(booking_id.to_string()))?;

    let request = TransitionRequest {
        booking_id: current.id.clone(),
        expected_version,
        target: Target::new(status, current.payment_status),
        deposit_amount_paid: None,
        applied_event: None,
    };
    transition(state, request, now).await
}
