use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::{queries, Store, StoreError, VersionedUpdate};
use crate::models::{
    Booking, BookingStatus, PaymentEventRecord, Service, Studio, WeeklySchedule,
};

/// `Store` over a single SQLite connection. Calls run on the blocking pool and are
/// abandoned after `timeout`; an abandoned write may still land, which callers treat
/// like any other retryable failure.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    timeout: Duration,
}

impl SqliteStore {
    pub fn new(conn: Connection, timeout: Duration) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            timeout,
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let task = tokio::task::spawn_blocking(move || {
            let db = conn
                .lock()
                .map_err(|_| anyhow::anyhow!("database mutex poisoned"))?;
            f(&db)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(StoreError::Timeout),
            Ok(Err(join_err)) => Err(StoreError::Backend(anyhow::anyhow!(
                "store task failed: {join_err}"
            ))),
            Ok(Ok(result)) => result.map_err(StoreError::Backend),
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_studio(&self, studio: &Studio) -> Result<(), StoreError> {
        let studio = studio.clone();
        self.with_conn(move |db| queries::upsert_studio(db, &studio))
            .await
    }

    async fn get_studio(&self, id: &str) -> Result<Option<Studio>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |db| queries::get_studio(db, &id)).await
    }

    async fn get_schedule(&self, studio_id: &str) -> Result<WeeklySchedule, StoreError> {
        let studio_id = studio_id.to_string();
        self.with_conn(move |db| queries::get_schedule(db, &studio_id))
            .await
    }

    async fn replace_schedule(
        &self,
        studio_id: &str,
        schedule: &WeeklySchedule,
    ) -> Result<(), StoreError> {
        let studio_id = studio_id.to_string();
        let schedule = schedule.clone();
        self.with_conn(move |db| queries::replace_schedule(db, &studio_id, &schedule))
            .await
    }

    async fn upsert_service(&self, service: &Service) -> Result<(), StoreError> {
        let service = service.clone();
        self.with_conn(move |db| queries::upsert_service(db, &service))
            .await
    }

    async fn get_service(&self, id: &str) -> Result<Option<Service>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |db| queries::get_service(db, &id)).await
    }

    async fn find_overlapping(
        &self,
        studio_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_booking_id: Option<&str>,
    ) -> Result<Vec<Booking>, StoreError> {
        let studio_id = studio_id.to_string();
        let exclude = exclude_booking_id.map(str::to_string);
        self.with_conn(move |db| {
            queries::find_overlapping(db, &studio_id, &start, &end, exclude.as_deref())
        })
        .await
    }

    async fn insert_hold(&self, booking: &Booking) -> Result<bool, StoreError> {
        let booking = booking.clone();
        self.with_conn(move |db| queries::insert_hold(db, &booking))
            .await
    }

    async fn attach_payment_session(
        &self,
        booking_id: &str,
        session_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let booking_id = booking_id.to_string();
        let session_ref = session_ref.to_string();
        self.with_conn(move |db| {
            queries::attach_payment_session(db, &booking_id, &session_ref, &now)
        })
        .await
    }

    async fn discard_hold(&self, booking_id: &str) -> Result<bool, StoreError> {
        let booking_id = booking_id.to_string();
        self.with_conn(move |db| queries::discard_hold(db, &booking_id))
            .await
    }

    async fn get_booking(&self, id: &str) -> Result<Option<Booking>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |db| queries::get_booking_by_id(db, &id))
            .await
    }

    async fn get_booking_by_session_ref(
        &self,
        session_ref: &str,
    ) -> Result<Option<Booking>, StoreError> {
        let session_ref = session_ref.to_string();
        self.with_conn(move |db| queries::get_booking_by_session_ref(db, &session_ref))
            .await
    }

    async fn list_bookings(
        &self,
        status: Option<BookingStatus>,
        limit: i64,
    ) -> Result<Vec<Booking>, StoreError> {
        self.with_conn(move |db| queries::get_all_bookings(db, status, limit))
            .await
    }

    async fn list_expired_holds(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, StoreError> {
        self.with_conn(move |db| queries::list_expired_holds(db, &cutoff))
            .await
    }

    async fn update_versioned(
        &self,
        update: &VersionedUpdate,
    ) -> Result<Option<Booking>, StoreError> {
        let update = update.clone();
        self.with_conn(move |db| queries::update_versioned(db, &update))
            .await
    }

    async fn record_payment_event(
        &self,
        record: &PaymentEventRecord,
    ) -> Result<PaymentEventRecord, StoreError> {
        let record = record.clone();
        self.with_conn(move |db| queries::record_payment_event(db, &record))
            .await
    }

    async fn mark_event_applied(
        &self,
        event_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let event_id = event_id.to_string();
        self.with_conn(move |db| queries::mark_event_applied(db, &event_id, &at))
            .await
    }

    async fn list_unapplied_events(
        &self,
        received_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentEventRecord>, StoreError> {
        self.with_conn(move |db| queries::list_unapplied_events(db, &received_before, limit))
            .await
    }

    async fn list_events_for_booking_ref(
        &self,
        booking_ref: &str,
    ) -> Result<Vec<PaymentEventRecord>, StoreError> {
        let booking_ref = booking_ref.to_string();
        self.with_conn(move |db| queries::list_events_for_booking_ref(db, &booking_ref))
            .await
    }
}
