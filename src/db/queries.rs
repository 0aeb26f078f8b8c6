use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::VersionedUpdate;
use crate::models::availability::hhmm;
use crate::models::{
    AvailabilityWindow, Booking, BookingStatus, ClientInfo, PaymentEventRecord, PaymentEventType,
    PaymentStatus, Service, Studio, WeeklySchedule,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BOOKING_COLUMNS: &str = "id, studio_id, service_id, client_name, client_email, client_phone, \
     start_time, end_time, status, payment_status, total_price, requires_deposit, \
     deposit_required, deposit_amount_paid, payment_session_ref, version, created_at, updated_at";

const EVENT_COLUMNS: &str =
    "event_id, booking_ref, event_type, amount, currency, occurred_at, received_at, applied, applied_at";

pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map_err(|e| anyhow::anyhow!("bad timestamp {s:?}: {e}"))?;
    Ok(naive.and_utc())
}

// ── Studios ──

pub fn upsert_studio(conn: &Connection, studio: &Studio) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO studios (id, name, timezone) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, timezone = excluded.timezone",
        params![studio.id, studio.name, studio.timezone],
    )?;
    Ok(())
}

pub fn get_studio(conn: &Connection, id: &str) -> anyhow::Result<Option<Studio>> {
    let studio = conn
        .query_row(
            "SELECT id, name, timezone FROM studios WHERE id = ?1",
            params![id],
            |row| {
                Ok(Studio {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    timezone: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(studio)
}

// ── Availability ──

pub fn get_schedule(conn: &Connection, studio_id: &str) -> anyhow::Result<WeeklySchedule> {
    let mut stmt = conn.prepare(
        "SELECT weekday, open_time, close_time, is_available
         FROM availability_windows WHERE studio_id = ?1 ORDER BY weekday ASC",
    )?;

    let rows = stmt.query_map(params![studio_id], |row| {
        let weekday: u8 = row.get(0)?;
        let open: String = row.get(1)?;
        let close: String = row.get(2)?;
        let is_available: bool = row.get(3)?;
        Ok((weekday, open, close, is_available))
    })?;

    let mut windows = vec![];
    for row in rows {
        let (weekday, open, close, is_available) = row?;
        windows.push(AvailabilityWindow {
            weekday,
            open_time: hhmm::parse(&open).map_err(anyhow::Error::msg)?,
            close_time: hhmm::parse(&close).map_err(anyhow::Error::msg)?,
            is_available,
        });
    }
    Ok(WeeklySchedule { windows })
}

pub fn replace_schedule(
    conn: &Connection,
    studio_id: &str,
    schedule: &WeeklySchedule,
) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM availability_windows WHERE studio_id = ?1",
        params![studio_id],
    )?;
    for w in &schedule.windows {
        tx.execute(
            "INSERT INTO availability_windows (studio_id, weekday, open_time, close_time, is_available)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                studio_id,
                w.weekday,
                w.open_time.format("%H:%M").to_string(),
                w.close_time.format("%H:%M").to_string(),
                w.is_available,
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

// ── Services ──

pub fn upsert_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO services (id, studio_id, name, duration_minutes, price, requires_deposit,
                               deposit_percentage, min_advance_minutes, max_advance_minutes, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           duration_minutes = excluded.duration_minutes,
           price = excluded.price,
           requires_deposit = excluded.requires_deposit,
           deposit_percentage = excluded.deposit_percentage,
           min_advance_minutes = excluded.min_advance_minutes,
           max_advance_minutes = excluded.max_advance_minutes,
           active = excluded.active",
        params![
            service.id,
            service.studio_id,
            service.name,
            service.duration_minutes,
            service.price,
            service.requires_deposit,
            service.deposit_percentage,
            service.min_advance_minutes,
            service.max_advance_minutes,
            service.active,
        ],
    )?;
    Ok(())
}

pub fn get_service(conn: &Connection, id: &str) -> anyhow::Result<Option<Service>> {
    let service = conn
        .query_row(
            "SELECT id, studio_id, name, duration_minutes, price, requires_deposit,
                    deposit_percentage, min_advance_minutes, max_advance_minutes, active
             FROM services WHERE id = ?1",
            params![id],
            |row| {
                Ok(Service {
                    id: row.get(0)?,
                    studio_id: row.get(1)?,
                    name: row.get(2)?,
                    duration_minutes: row.get(3)?,
                    price: row.get(4)?,
                    requires_deposit: row.get(5)?,
                    deposit_percentage: row.get(6)?,
                    min_advance_minutes: row.get(7)?,
                    max_advance_minutes: row.get(8)?,
                    active: row.get(9)?,
                })
            },
        )
        .optional()?;
    Ok(service)
}

// ── Bookings ──

/// Inserts the hold only if no slot-holding booking on the same studio overlaps it.
/// The overlap check and the insert are one statement, so concurrent callers cannot
/// both pass. Returns false when the slot was taken.
pub fn insert_hold(conn: &Connection, booking: &Booking) -> anyhow::Result<bool> {
    let sql = format!(
        "INSERT INTO bookings ({BOOKING_COLUMNS})
         SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18
         WHERE NOT EXISTS (
             SELECT 1 FROM bookings
             WHERE studio_id = ?2
               AND status NOT IN ('cancelled', 'no_show')
               AND start_time < ?8
               AND end_time > ?7
         )"
    );
    let count = conn.execute(
        &sql,
        params![
            booking.id,
            booking.studio_id,
            booking.service_id,
            booking.client.name,
            booking.client.email,
            booking.client.phone,
            fmt_ts(&booking.start_time),
            fmt_ts(&booking.end_time),
            booking.status.as_str(),
            booking.payment_status.as_str(),
            booking.total_price,
            booking.requires_deposit,
            booking.deposit_required,
            booking.deposit_amount_paid,
            booking.payment_session_ref,
            booking.version,
            fmt_ts(&booking.created_at),
            fmt_ts(&booking.updated_at),
        ],
    )?;
    Ok(count > 0)
}

pub fn attach_payment_session(
    conn: &Connection,
    booking_id: &str,
    session_ref: &str,
    now: &DateTime<Utc>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET payment_session_ref = ?1, updated_at = ?2
         WHERE id = ?3 AND payment_session_ref IS NULL AND status = 'pending_payment'",
        params![session_ref, fmt_ts(now), booking_id],
    )?;
    Ok(count > 0)
}

/// Removes a hold whose payment session could never be created. Only an untouched
/// hold qualifies: no session ref and never transitioned.
pub fn discard_hold(conn: &Connection, booking_id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "DELETE FROM bookings
         WHERE id = ?1 AND status = 'pending_payment' AND payment_session_ref IS NULL AND version = 1",
        params![booking_id],
    )?;
    Ok(count > 0)
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1");
    let result = conn
        .query_row(&sql, params![id], |row| Ok(parse_booking_row(row)))
        .optional()?;
    result.transpose()
}

pub fn get_booking_by_session_ref(
    conn: &Connection,
    session_ref: &str,
) -> anyhow::Result<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE payment_session_ref = ?1");
    let result = conn
        .query_row(&sql, params![session_ref], |row| Ok(parse_booking_row(row)))
        .optional()?;
    result.transpose()
}

pub fn find_overlapping(
    conn: &Connection,
    studio_id: &str,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    exclude_booking_id: Option<&str>,
) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE studio_id = ?1
           AND status NOT IN ('cancelled', 'no_show')
           AND start_time < ?3
           AND end_time > ?2
           AND (?4 IS NULL OR id != ?4)
         ORDER BY start_time ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![studio_id, fmt_ts(start), fmt_ts(end), exclude_booking_id],
        |row| Ok(parse_booking_row(row)),
    )?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

pub fn get_all_bookings(
    conn: &Connection,
    status_filter: Option<BookingStatus>,
    limit: i64,
) -> anyhow::Result<Vec<Booking>> {
    let (sql, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match status_filter {
        Some(status) => (
            format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE status = ?1 ORDER BY start_time DESC LIMIT ?2"
            ),
            vec![
                Box::new(status.as_str()) as Box<dyn rusqlite::types::ToSql>,
                Box::new(limit),
            ],
        ),
        None => (
            format!("SELECT {BOOKING_COLUMNS} FROM bookings ORDER BY start_time DESC LIMIT ?1"),
            vec![Box::new(limit) as Box<dyn rusqlite::types::ToSql>],
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Holds created strictly before `cutoff` that are still waiting for payment.
pub fn list_expired_holds(
    conn: &Connection,
    cutoff: &DateTime<Utc>,
) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE status = 'pending_payment' AND created_at < ?1
         ORDER BY created_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![fmt_ts(cutoff)], |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Compare-and-set on `version`. The booking update and, when given, the ledger's
/// `applied` flag commit together. Returns None if the stored version moved on.
pub fn update_versioned(
    conn: &Connection,
    update: &VersionedUpdate,
) -> anyhow::Result<Option<Booking>> {
    let tx = conn.unchecked_transaction()?;
    let count = tx.execute(
        "UPDATE bookings
         SET status = ?1, payment_status = ?2, deposit_amount_paid = ?3,
             version = version + 1, updated_at = ?4
         WHERE id = ?5 AND version = ?6",
        params![
            update.status.as_str(),
            update.payment_status.as_str(),
            update.deposit_amount_paid,
            fmt_ts(&update.updated_at),
            update.booking_id,
            update.expected_version,
        ],
    )?;
    if count == 0 {
        // Dropping the transaction rolls it back.
        return Ok(None);
    }

    if let Some(event_id) = &update.applied_event {
        tx.execute(
            "UPDATE payment_events SET applied = 1, applied_at = ?1 WHERE event_id = ?2",
            params![fmt_ts(&update.updated_at), event_id],
        )?;
    }

    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1");
    let booking = tx.query_row(&sql, params![update.booking_id], |row| {
        Ok(parse_booking_row(row))
    })??;
    tx.commit()?;
    Ok(Some(booking))
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let status_str: String = row.get(8)?;
    let payment_str: String = row.get(9)?;
    let start_str: String = row.get(6)?;
    let end_str: String = row.get(7)?;
    let created_str: String = row.get(16)?;
    let updated_str: String = row.get(17)?;

    Ok(Booking {
        id: row.get(0)?,
        studio_id: row.get(1)?,
        service_id: row.get(2)?,
        client: ClientInfo {
            name: row.get(3)?,
            email: row.get(4)?,
            phone: row.get(5)?,
        },
        start_time: parse_ts(&start_str)?,
        end_time: parse_ts(&end_str)?,
        status: BookingStatus::parse(&status_str)
            .ok_or_else(|| anyhow::anyhow!("unknown booking status: {status_str}"))?,
        payment_status: PaymentStatus::parse(&payment_str)
            .ok_or_else(|| anyhow::anyhow!("unknown payment status: {payment_str}"))?,
        total_price: row.get(10)?,
        requires_deposit: row.get(11)?,
        deposit_required: row.get(12)?,
        deposit_amount_paid: row.get(13)?,
        payment_session_ref: row.get(14)?,
        version: row.get(15)?,
        created_at: parse_ts(&created_str)?,
        updated_at: parse_ts(&updated_str)?,
    })
}

// ── Payment Event Ledger ──

/// Inserts the ledger row if the event id is new. Either way returns the stored row,
/// so the caller sees whether an earlier delivery was already applied.
pub fn record_payment_event(
    conn: &Connection,
    record: &PaymentEventRecord,
) -> anyhow::Result<PaymentEventRecord> {
    conn.execute(
        "INSERT OR IGNORE INTO payment_events
             (event_id, booking_ref, event_type, amount, currency, occurred_at, received_at, applied, applied_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL)",
        params![
            record.event_id,
            record.booking_ref,
            record.event_type.as_str(),
            record.amount,
            record.currency,
            fmt_ts(&record.occurred_at),
            fmt_ts(&record.received_at),
        ],
    )?;

    get_payment_event(conn, &record.event_id)?
        .ok_or_else(|| anyhow::anyhow!("ledger row vanished: {}", record.event_id))
}

pub fn get_payment_event(
    conn: &Connection,
    event_id: &str,
) -> anyhow::Result<Option<PaymentEventRecord>> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM payment_events WHERE event_id = ?1");
    let result = conn
        .query_row(&sql, params![event_id], |row| Ok(parse_event_row(row)))
        .optional()?;
    result.transpose()
}

pub fn mark_event_applied(
    conn: &Connection,
    event_id: &str,
    at: &DateTime<Utc>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE payment_events SET applied = 1, applied_at = ?1 WHERE event_id = ?2 AND applied = 0",
        params![fmt_ts(at), event_id],
    )?;
    Ok(count > 0)
}

pub fn list_unapplied_events(
    conn: &Connection,
    received_before: &DateTime<Utc>,
    limit: i64,
) -> anyhow::Result<Vec<PaymentEventRecord>> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM payment_events
         WHERE applied = 0 AND received_at < ?1
         ORDER BY received_at ASC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![fmt_ts(received_before), limit], |row| {
        Ok(parse_event_row(row))
    })?;

    let mut events = vec![];
    for row in rows {
        events.push(row??);
    }
    Ok(events)
}

pub fn list_events_for_booking_ref(
    conn: &Connection,
    booking_ref: &str,
) -> anyhow::Result<Vec<PaymentEventRecord>> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM payment_events
         WHERE booking_ref = ?1 ORDER BY received_at ASC, event_id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![booking_ref], |row| Ok(parse_event_row(row)))?;

    let mut events = vec![];
    for row in rows {
        events.push(row??);
    }
    Ok(events)
}

fn parse_event_row(row: &rusqlite::Row) -> anyhow::Result<PaymentEventRecord> {
    let event_type_str: String = row.get(2)?;
    let occurred_str: String = row.get(5)?;
    let received_str: String = row.get(6)?;
    let applied_at_str: Option<String> = row.get(8)?;

    Ok(PaymentEventRecord {
        event_id: row.get(0)?,
        booking_ref: row.get(1)?,
        event_type: PaymentEventType::parse(&event_type_str)
            .ok_or_else(|| anyhow::anyhow!("unknown event type: {event_type_str}"))?,
        amount: row.get(3)?,
        currency: row.get(4)?,
        occurred_at: parse_ts(&occurred_str)?,
        received_at: parse_ts(&received_str)?,
        applied: row.get(7)?,
        applied_at: applied_at_str.as_deref().map(parse_ts).transpose()?,
    })
}
