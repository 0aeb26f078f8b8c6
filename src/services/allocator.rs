use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{Booking, BookingStatus, ClientInfo, PaymentStatus, Service, Studio};
use crate::services::payments::{PaymentSession, SessionRequest};
use crate::services::scheduling::{self, SchedulingError};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct HoldRequest {
    pub studio_id: String,
    pub service_id: String,
    pub start_time: DateTime<Utc>,
    pub client: ClientInfo,
}

#[derive(Debug, Clone)]
pub struct Hold {
    pub booking: Booking,
    pub session: PaymentSession,
    pub hold_expires_at: DateTime<Utc>,
}

/// Inserts a `pending_payment` hold for the interval, or fails with `SLOT_TAKEN` if an
/// overlapping booking got there first.
pub async fn allocate(
    state: &AppState,
    studio: &Studio,
    service: &Service,
    start: DateTime<Utc>,
    client: ClientInfo,
    now: DateTime<Utc>,
) -> Result<Booking, AppError> {
    let start = start.trunc_subsecs(0);
    let now = now.trunc_subsecs(0);
    let end = scheduling::check_window(state.store.as_ref(), studio, service, start, now).await?;

    let booking = Booking {
        id: uuid::Uuid::new_v4().to_string(),
        studio_id: studio.id.clone(),
        service_id: service.id.clone(),
        client,
        start_time: start,
        end_time: end,
        status: BookingStatus::PendingPayment,
        payment_status: PaymentStatus::Pending,
        total_price: service.price,
        requires_deposit: service.requires_deposit,
        deposit_required: service.deposit_required(),
        deposit_amount_paid: 0,
        payment_session_ref: None,
        version: 1,
        created_at: now,
        updated_at: now,
    };

    if !state.store.insert_hold(&booking).await? {
        tracing::info!(
            studio_id = %studio.id,
            start = %start,
            "allocation lost: slot already held"
        );
        return Err(SchedulingError::SlotTaken.into());
    }

    tracing::info!(
        booking_id = %booking.id,
        studio_id = %studio.id,
        start = %booking.start_time,
        end = %booking.end_time,
        "hold allocated"
    );
    Ok(booking)
}

/// Allocates a hold and opens a payment session for it. If the session cannot be
/// created the hold is removed again.
pub async fn create_hold(
    state: &AppState,
    request: HoldRequest,
    now: DateTime<Utc>,
) -> Result<Hold, AppError> {
    if request.client.name.trim().is_empty() {
        return Err(AppError::BadRequest("client name is required".to_string()));
    }

    let (studio, service) =
        scheduling::resolve_catalog(state.store.as_ref(), &request.studio_id, &request.service_id)
            .await?;
    let mut booking = allocate(
        state,
        &studio,
        &service,
        request.start_time,
        request.client,
        now,
    )
    .await?;

    let session_request = SessionRequest {
        booking_id: booking.id.clone(),
        amount: booking.amount_due_now(),
        currency: state.config.currency.clone(),
        description: format!("{} at {}", service.name, studio.name),
        customer_email: booking.client.email.clone(),
    };

    let session = match tokio::time::timeout(
        state.config.gateway_timeout,
        state.gateway.create_session(&session_request),
    )
    .await
    {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            tracing::error!(booking_id = %booking.id, error = %e, "payment session creation failed");
            rollback_hold(state, &booking.id).await;
            return Err(AppError::Gateway(e.to_string()));
        }
        Err(_) => {
            tracing::error!(booking_id = %booking.id, "payment session creation timed out");
            rollback_hold(state, &booking.id).await;
            return Err(AppError::Gateway("payment session creation timed out".to_string()));
        }
    };

    let attached = state
        .store
        .attach_payment_session(&booking.id, &session.session_ref, now.trunc_subsecs(0))
        .await?;
    if !attached {
        // The hold was expired or cancelled while the gateway call was in flight.
        tracing::warn!(booking_id = %booking.id, "hold gone before payment session could be attached");
        return Err(AppError::Gateway(
            "hold expired before payment session was ready".to_string(),
        ));
    }
    booking.payment_session_ref = Some(session.session_ref.clone());

    let hold_expires_at = booking.hold_expires_at(state.config.hold_ttl());
    tracing::info!(
        booking_id = %booking.id,
        session_ref = %session.session_ref,
        hold_expires_at = %hold_expires_at,
        "hold ready for payment"
    );

    Ok(Hold {
        booking,
        session,
        hold_expires_at,
    })
}

async fn rollback_hold(state: &AppState, booking_id: &str) {
    match state.store.discard_hold(booking_id).await {
        Ok(true) => tracing::info!(booking_id, "hold rolled back"),
        Ok(false) => tracing::warn!(booking_id, "hold already changed, nothing to roll back"),
        // Left for the sweeper: without a session it can only expire.
        Err(e) => tracing::error!(booking_id, error = %e, "failed to roll back hold"),
    }
}
