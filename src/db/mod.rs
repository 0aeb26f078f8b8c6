pub mod migrations;
pub mod queries;
pub mod sqlite;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::models::{
    Booking, BookingStatus, PaymentEventRecord, PaymentStatus, Service, Studio, WeeklySchedule,
};

pub use sqlite::SqliteStore;

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .context("failed to set database pragmas")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .context("failed to set busy timeout")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store operation timed out")]
    Timeout,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// A state transition guarded by the version the caller last observed.
#[derive(Debug, Clone)]
pub struct VersionedUpdate {
    pub booking_id: String,
    pub expected_version: i64,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub deposit_amount_paid: i64,
    pub updated_at: DateTime<Utc>,
    /// Ledger row to flag as applied in the same atomic write.
    pub applied_event: Option<String>,
}

/// Persistence port. Every component reaches storage only through this trait.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_studio(&self, studio: &Studio) -> Result<(), StoreError>;
    async fn get_studio(&self, id: &str) -> Result<Option<Studio>, StoreError>;

    async fn get_schedule(&self, studio_id: &str) -> Result<WeeklySchedule, StoreError>;
    async fn replace_schedule(
        &self,
        studio_id: &str,
        schedule: &WeeklySchedule,
    ) -> Result<(), StoreError>;

    async fn upsert_service(&self, service: &Service) -> Result<(), StoreError>;
    async fn get_service(&self, id: &str) -> Result<Option<Service>, StoreError>;

    async fn find_overlapping(
        &self,
        studio_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_booking_id: Option<&str>,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Atomic check-and-insert. `Ok(false)` means an overlapping booking holds the slot.
    async fn insert_hold(&self, booking: &Booking) -> Result<bool, StoreError>;
    async fn attach_payment_session(
        &self,
        booking_id: &str,
        session_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    async fn discard_hold(&self, booking_id: &str) -> Result<bool, StoreError>;

    async fn get_booking(&self, id: &str) -> Result<Option<Booking>, StoreError>;
    async fn get_booking_by_session_ref(
        &self,
        session_ref: &str,
    ) -> Result<Option<Booking>, StoreError>;
    async fn list_bookings(
        &self,
        status: Option<BookingStatus>,
        limit: i64,
    ) -> Result<Vec<Booking>, StoreError>;
    async fn list_expired_holds(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, StoreError>;

    /// `Ok(None)` when the stored version no longer matches.
    async fn update_versioned(&self, update: &VersionedUpdate)
        -> Result<Option<Booking>, StoreError>;

    async fn record_payment_event(
        &self,
        record: &PaymentEventRecord,
    ) -> Result<PaymentEventRecord, StoreError>;
    async fn mark_event_applied(&self, event_id: &str, at: DateTime<Utc>)
        -> Result<bool, StoreError>;
    async fn list_unapplied_events(
        &self,
        received_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentEventRecord>, StoreError>;
    async fn list_events_for_booking_ref(
        &self,
        booking_ref: &str,
    ) -> Result<Vec<PaymentEventRecord>, StoreError>;
}
