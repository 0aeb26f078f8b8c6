use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{
    AvailabilityWindow, Booking, BookingStatus, PaymentEventRecord, Service, Studio, WeeklySchedule,
};
use crate::services::state_machine;
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

async fn require_studio(state: &AppState, id: &str) -> Result<Studio, AppError> {
    state
        .store
        .get_studio(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("studio {id}")))
}

async fn require_booking(state: &AppState, id: &str) -> Result<Booking, AppError> {
    state
        .store
        .get_booking(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

// PUT /api/admin/studios/:id
#[derive(Deserialize)]
pub struct StudioRequest {
    pub name: String,
    pub timezone: String,
}

pub async fn put_studio(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<StudioRequest>,
) -> Result<Json<Studio>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let studio = Studio {
        id,
        name: body.name,
        timezone: body.timezone,
    };
    studio.tz().map_err(|e| AppError::BadRequest(e.to_string()))?;

    state.store.upsert_studio(&studio).await?;
    tracing::info!(studio_id = %studio.id, timezone = %studio.timezone, "studio saved");
    Ok(Json(studio))
}

// GET /api/admin/studios/:id/availability
#[derive(Serialize)]
pub struct AvailabilityResponse {
    studio_id: String,
    timezone: String,
    windows: Vec<AvailabilityWindow>,
    summary: String,
}

pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let studio = require_studio(&state, &id).await?;
    let schedule = state.store.get_schedule(&studio.id).await?;
    let summary = schedule.to_human_readable();

    Ok(Json(AvailabilityResponse {
        studio_id: studio.id,
        timezone: studio.timezone,
        windows: schedule.windows,
        summary,
    }))
}

// PUT /api/admin/studios/:id/availability
pub async fn put_availability(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(schedule): Json<WeeklySchedule>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let studio = require_studio(&state, &id).await?;
    schedule
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    state.store.replace_schedule(&studio.id, &schedule).await?;
    let summary = schedule.to_human_readable();
    tracing::info!(studio_id = %studio.id, %summary, "availability replaced");

    Ok(Json(AvailabilityResponse {
        studio_id: studio.id,
        timezone: studio.timezone,
        windows: schedule.windows,
        summary,
    }))
}

// POST /api/admin/services, PUT /api/admin/services/:id
#[derive(Deserialize)]
pub struct ServiceRequest {
    pub studio_id: String,
    pub name: String,
    pub duration_minutes: i64,
    pub price: i64,
    #[serde(default)]
    pub requires_deposit: bool,
    #[serde(default)]
    pub deposit_percentage: i64,
    #[serde(default)]
    pub min_advance_minutes: i64,
    #[serde(default = "default_max_advance")]
    pub max_advance_minutes: i64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_max_advance() -> i64 {
    60 * 24 * 90
}

fn default_active() -> bool {
    true
}

impl ServiceRequest {
    fn into_service(self, id: String) -> Service {
        Service {
            id,
            studio_id: self.studio_id,
            name: self.name,
            duration_minutes: self.duration_minutes,
            price: self.price,
            requires_deposit: self.requires_deposit,
            deposit_percentage: self.deposit_percentage,
            min_advance_minutes: self.min_advance_minutes,
            max_advance_minutes: self.max_advance_minutes,
            active: self.active,
        }
    }
}

async fn save_service(state: &AppState, service: Service) -> Result<Json<Service>, AppError> {
    service
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    require_studio(state, &service.studio_id).await?;

    // Existing bookings keep the price and deposit they were created with.
    state.store.upsert_service(&service).await?;
    tracing::info!(service_id = %service.id, studio_id = %service.studio_id, "service saved");
    Ok(Json(service))
}

pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ServiceRequest>,
) -> Result<Json<Service>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let service = body.into_service(uuid::Uuid::new_v4().to_string());
    save_service(&state, service).await
}

pub async fn update_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ServiceRequest>,
) -> Result<Json<Service>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let existing = state
        .store
        .get_service(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("service {id}")))?;
    if body.studio_id != existing.studio_id {
        return Err(AppError::BadRequest(format!(
            "service {id} belongs to studio {} and cannot be moved",
            existing.studio_id
        )));
    }
    save_service(&state, body.into_service(id)).await
}

// GET /api/admin/bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn get_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(s) => Some(
            BookingStatus::parse(s)
                .ok_or_else(|| AppError::BadRequest(format!("unknown status: {s}")))?,
        ),
    };

    let bookings = state.store.list_bookings(status, limit).await?;
    Ok(Json(bookings))
}

// POST /api/admin/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let outcome = state_machine::cancel(&state, &id, Utc::now()).await?;
    Ok(Json(outcome.booking().clone()))
}

// POST /api/admin/bookings/:id/status
#[derive(Deserialize)]
pub struct AdvanceRequest {
    pub expected_version: i64,
    pub status: BookingStatus,
}

pub async fn advance_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<AdvanceRequest>,
) -> Result<Json<Booking>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    if !matches!(
        body.status,
        BookingStatus::InProgress | BookingStatus::Completed | BookingStatus::NoShow
    ) {
        return Err(AppError::BadRequest(format!(
            "status {} cannot be set directly",
            body.status.as_str()
        )));
    }

    let outcome =
        state_machine::advance(&state, &id, body.expected_version, body.status, Utc::now()).await?;
    Ok(Json(outcome.booking().clone()))
}

// GET /api/admin/bookings/:id/payment-events
pub async fn get_payment_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<PaymentEventRecord>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let booking = require_booking(&state, &id).await?;
    let events = match booking.payment_session_ref.as_deref() {
        Some(session_ref) => state.store.list_events_for_booking_ref(session_ref).await?,
        None => vec![],
    };
    Ok(Json(events))
}
