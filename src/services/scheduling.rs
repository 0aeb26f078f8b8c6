use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::db::Store;
use crate::errors::AppError;
use crate::models::{Service, Studio, WeeklySchedule};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulingError {
    #[error("That time is outside the studio's opening hours. Open: {hours}")]
    OutsideHours { hours: String },

    #[error("That time overlaps an existing booking. Please pick another time.")]
    Overlap,

    #[error("Sorry, that time was just booked by someone else. Please pick another time.")]
    SlotTaken,

    #[error("That time is too soon. This service must be booked at least {min_advance_minutes} minutes ahead.")]
    TooSoon { min_advance_minutes: i64 },

    #[error("That time is too far ahead. This service can be booked at most {max_advance_minutes} minutes ahead.")]
    TooFar { max_advance_minutes: i64 },
}

impl SchedulingError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulingError::OutsideHours { .. } => "OUTSIDE_HOURS",
            SchedulingError::Overlap => "OVERLAP",
            SchedulingError::SlotTaken => "SLOT_TAKEN",
            SchedulingError::TooSoon { .. } => "TOO_SOON",
            SchedulingError::TooFar { .. } => "TOO_FAR",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AvailabilityCheck {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub end_time: DateTime<Utc>,
}

/// Loads the studio and service for a request and checks they belong together.
pub async fn resolve_catalog(
    store: &dyn Store,
    studio_id: &str,
    service_id: &str,
) -> Result<(Studio, Service), AppError> {
    let studio = store
        .get_studio(studio_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("studio {studio_id}")))?;
    let service = store
        .get_service(service_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("service {service_id}")))?;

    if service.studio_id != studio.id {
        return Err(AppError::BadRequest(format!(
            "service {service_id} is not offered by studio {studio_id}"
        )));
    }
    if !service.active {
        return Err(AppError::BadRequest(format!("service {service_id} is not bookable")));
    }
    Ok((studio, service))
}

pub fn check_advance(
    service: &Service,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), SchedulingError> {
    let earliest = service.min_advance().and_then(|d| now.checked_add_signed(d));
    if earliest.map_or(true, |earliest| start < earliest) {
        return Err(SchedulingError::TooSoon {
            min_advance_minutes: service.min_advance_minutes,
        });
    }
    // An unrepresentable horizon is later than any start we can be given.
    let latest = service.max_advance().and_then(|d| now.checked_add_signed(d));
    if latest.is_some_and(|latest| start > latest) {
        return Err(SchedulingError::TooFar {
            max_advance_minutes: service.max_advance_minutes,
        });
    }
    Ok(())
}

pub fn end_time(service: &Service, start: DateTime<Utc>) -> Result<DateTime<Utc>, AppError> {
    service
        .duration()
        .and_then(|d| start.checked_add_signed(d))
        .ok_or_else(|| {
            AppError::BadRequest(format!("service {} has an out-of-range duration", service.id))
        })
}

/// Opening hours are read in the studio's zone; the interval must fit one local day.
pub fn check_hours(
    schedule: &WeeklySchedule,
    tz: Tz,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), SchedulingError> {
    let local_start = start.with_timezone(&tz).naive_local();
    let local_end = end.with_timezone(&tz).naive_local();

    if !schedule.contains(&local_start, &local_end) {
        return Err(SchedulingError::OutsideHours {
            hours: schedule.to_human_readable(),
        });
    }
    Ok(())
}

/// Advance and opening-hours checks. Returns the interval's end.
pub async fn check_window(
    store: &dyn Store,
    studio: &Studio,
    service: &Service,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, AppError> {
    let end = end_time(service, start)?;
    check_advance(service, start, now)?;

    let schedule = store.get_schedule(&studio.id).await?;
    check_hours(&schedule, studio.tz()?, start, end)?;

    Ok(end)
}

/// Full advisory check, including overlap with slot-holding bookings. A pass here
/// does not reserve anything; allocation re-checks atomically.
pub async fn check_slot(
    store: &dyn Store,
    studio: &Studio,
    service: &Service,
    start: DateTime<Utc>,
    exclude_booking_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, AppError> {
    let end = check_window(store, studio, service, start, now).await?;

    let conflicts = store
        .find_overlapping(&studio.id, start, end, exclude_booking_id)
        .await?;
    if let Some(existing) = conflicts.first() {
        tracing::debug!(
            studio_id = %studio.id,
            conflicting_booking = %existing.id,
            "candidate interval overlaps"
        );
        return Err(SchedulingError::Overlap.into());
    }

    Ok(end)
}

pub async fn check_availability(
    store: &dyn Store,
    studio_id: &str,
    service_id: &str,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<AvailabilityCheck, AppError> {
    let (studio, service) = resolve_catalog(store, studio_id, service_id).await?;
    let end = end_time(&service, start)?;

    match check_slot(store, &studio, &service, start, None, now).await {
        Ok(_) => Ok(AvailabilityCheck {
            available: true,
            reason: None,
            message: None,
            end_time: end,
        }),
        Err(AppError::Scheduling(e)) => Ok(AvailabilityCheck {
            available: false,
            reason: Some(e.code()),
            message: Some(e.to_string()),
            end_time: end,
        }),
        Err(e) => Err(e),
    }
}
