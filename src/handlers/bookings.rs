use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::errors::AppError;
use crate::models::{Booking, BookingStatus, BookingUpdate};
use crate::services::allocator::{self, HoldRequest};
use crate::services::scheduling::{self, AvailabilityCheck};
use crate::state::AppState;

// GET /api/availability
#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub studio_id: String,
    pub service_id: String,
    pub start_time: DateTime<Utc>,
}

pub async fn check_availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityCheck>, AppError> {
    let check = scheduling::check_availability(
        state.store.as_ref(),
        &query.studio_id,
        &query.service_id,
        query.start_time,
        Utc::now(),
    )
    .await?;
    Ok(Json(check))
}

// POST /api/holds
#[derive(Serialize)]
pub struct HoldResponse {
    booking: Booking,
    checkout_url: Option<String>,
    hold_expires_at: DateTime<Utc>,
}

pub async fn create_hold(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HoldRequest>,
) -> Result<Json<HoldResponse>, AppError> {
    let hold = allocator::create_hold(&state, body, Utc::now()).await?;
    Ok(Json(HoldResponse {
        booking: hold.booking,
        checkout_url: hold.session.checkout_url,
        hold_expires_at: hold.hold_expires_at,
    }))
}

// GET /api/bookings/:id
#[derive(Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    booking: Booking,
    #[serde(skip_serializing_if = "Option::is_none")]
    hold_expires_at: Option<DateTime<Utc>>,
}

pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BookingView>, AppError> {
    let booking = state
        .store
        .get_booking(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))?;

    let hold_expires_at = (booking.status == BookingStatus::PendingPayment)
        .then(|| booking.hold_expires_at(state.config.hold_ttl()));
    Ok(Json(BookingView {
        booking,
        hold_expires_at,
    }))
}

// GET /api/bookings/:id/events
pub async fn events_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Subscribe before reading so no update falls between the snapshot and the feed.
    let rx = state.booking_tx.subscribe();

    let current = state
        .store
        .get_booking(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))?;

    let snapshot = BookingUpdate::from(&current);
    let catchup_stream = tokio_stream::once(Ok::<_, Infallible>(update_event(&snapshot)));

    let live_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(update) if update.booking_id == id => Some(Ok(update_event(&update))),
        Ok(_) => None,
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
            tracing::debug!(skipped = n, "booking stream lagged");
            None
        }
    });

    let keepalive_stream = tokio_stream::StreamExt::map(
        tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(Duration::from_secs(30))),
        |_| Ok(Event::default().comment("keepalive")),
    );

    let combined = catchup_stream.chain(live_stream);
    let merged = StreamExt::merge(combined, keepalive_stream);

    Ok(Sse::new(merged))
}

fn update_event(update: &BookingUpdate) -> Event {
    let data = serde_json::to_string(update).unwrap_or_default();
    Event::default().data(data).event("booking_update")
}
