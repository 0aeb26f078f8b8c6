use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::db::StoreError;
use crate::errors::AppError;
use crate::models::{
    Booking, BookingStatus, PaymentEvent, PaymentEventKind, PaymentEventRecord, PaymentEventType,
    PaymentStatus,
};
use crate::services::state_machine::{self, Outcome, Target, TransitionError, TransitionRequest};
use crate::state::AppState;

const REPLAY_BATCH: i64 = 100;

/// Verifies `t=<unix>,v1=<hex>` where v1 is HMAC-SHA256 over `"<t>.<payload>"`.
pub fn verify_signature(
    payload: &[u8],
    sig_header: &str,
    secret: &str,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> Result<(), &'static str> {
    let mut timestamp = "";
    let mut signature = "";
    for part in sig_header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = t;
        } else if let Some(v) = part.strip_prefix("v1=") {
            signature = v;
        }
    }

    if timestamp.is_empty() || signature.is_empty() {
        return Err("malformed signature header");
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| "HMAC key error")?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    let sig_bytes = hex::decode(signature).map_err(|_| "signature is not hex")?;
    mac.verify_slice(&sig_bytes)
        .map_err(|_| "signature mismatch")?;

    let ts: i64 = timestamp.parse().map_err(|_| "invalid timestamp")?;
    if (now.timestamp() - ts).unsigned_abs() > tolerance.as_secs() {
        return Err("timestamp outside tolerance");
    }

    Ok(())
}

/// Produces the header value a gateway would send for `payload` at `timestamp`.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> anyhow::Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow::anyhow!("HMAC key error"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let sig = hex::encode(mac.finalize().into_bytes());
    Ok(format!("t={timestamp},v1={sig}"))
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub event_id: String,
    pub event_type: String,
    pub payment_session_ref: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    pub timestamp: i64,
}

impl WebhookPayload {
    /// The one place raw event type strings are looked at. Unknown types yield None.
    pub fn into_event(self, default_currency: &str) -> Result<Option<PaymentEvent>, AppError> {
        let Some(event_type) = PaymentEventType::parse(&self.event_type) else {
            tracing::debug!(event_type = %self.event_type, "ignoring unsupported event type");
            return Ok(None);
        };
        if self.event_id.is_empty() || self.payment_session_ref.is_empty() {
            return Err(AppError::BadRequest(
                "event_id and payment_session_ref are required".to_string(),
            ));
        }
        let occurred_at = DateTime::from_timestamp(self.timestamp, 0)
            .ok_or_else(|| AppError::BadRequest(format!("invalid timestamp: {}", self.timestamp)))?;
        let currency = if self.currency.is_empty() {
            default_currency.to_string()
        } else {
            self.currency.to_lowercase()
        };

        Ok(Some(PaymentEvent {
            event_id: self.event_id,
            session_ref: self.payment_session_ref,
            kind: PaymentEventKind::new(event_type, self.amount),
            currency,
            occurred_at,
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Applied(Target),
    NoOp(String),
    UnknownBooking,
    Dropped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Event type this engine does not act on.
    Ignored,
    /// Event id already applied earlier.
    Duplicate,
    Processed(Resolution),
    /// Recorded, but reconciliation failed; the sweeper replays it.
    Deferred,
}

impl Delivery {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Delivery::Ignored => serde_json::json!({ "result": "ignored" }),
            Delivery::Duplicate => serde_json::json!({ "result": "duplicate" }),
            Delivery::Deferred => serde_json::json!({ "result": "deferred" }),
            Delivery::Processed(Resolution::Applied(target)) => serde_json::json!({
                "result": "applied",
                "status": target.status,
                "payment_status": target.payment_status,
            }),
            Delivery::Processed(Resolution::NoOp(reason)) => {
                serde_json::json!({ "result": "no_op", "reason": reason })
            }
            Delivery::Processed(Resolution::UnknownBooking) => {
                serde_json::json!({ "result": "unknown_booking" })
            }
            Delivery::Processed(Resolution::Dropped(reason)) => {
                serde_json::json!({ "result": "dropped", "reason": reason })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Move {
        target: Target,
        deposit_amount_paid: Option<i64>,
    },
    NoOp(&'static str),
    Reject(String),
}

fn move_to(status: BookingStatus, payment_status: PaymentStatus) -> Plan {
    Plan::Move {
        target: Target::new(status, payment_status),
        deposit_amount_paid: None,
    }
}

/// Decides what an event means for a booking in its current state.
pub fn plan(booking: &Booking, event: &PaymentEvent, currency: &str) -> Plan {
    match &event.kind {
        PaymentEventKind::SessionCompleted { amount }
        | PaymentEventKind::PaymentSucceeded { amount } => {
            if !event.currency.eq_ignore_ascii_case(currency) {
                return Plan::Reject(format!(
                    "currency {} does not match {currency}",
                    event.currency
                ));
            }
            plan_payment(booking, *amount)
        }
        PaymentEventKind::SessionExpired => match (booking.status, booking.payment_status) {
            (BookingStatus::Cancelled, PaymentStatus::Expired) => {
                Plan::NoOp("hold already expired")
            }
            (BookingStatus::PendingPayment, _) => {
                move_to(BookingStatus::Cancelled, PaymentStatus::Expired)
            }
            _ => Plan::Reject(format!(
                "session expired but booking is {}",
                booking.status.as_str()
            )),
        },
        PaymentEventKind::PaymentFailed => {
            if booking.status == BookingStatus::PendingPayment {
                // Same state as now: the hold stays open for another attempt.
                move_to(BookingStatus::PendingPayment, PaymentStatus::Pending)
            } else {
                Plan::NoOp("payment failure arrived after booking left pending_payment")
            }
        }
        PaymentEventKind::RefundIssued { .. } => match booking.payment_status {
            PaymentStatus::Refunded => Plan::NoOp("already refunded"),
            PaymentStatus::DepositPaid | PaymentStatus::Paid => {
                let status = if booking.status == BookingStatus::Confirmed {
                    BookingStatus::Cancelled
                } else {
                    booking.status
                };
                move_to(status, PaymentStatus::Refunded)
            }
            other => Plan::Reject(format!("refund for booking with payment {}", other.as_str())),
        },
    }
}

fn plan_payment(booking: &Booking, amount: i64) -> Plan {
    if amount <= 0 {
        return Plan::Reject(format!("non-positive amount {amount}"));
    }
    if booking.payment_status == PaymentStatus::Paid {
        return Plan::NoOp("already paid");
    }

    let covered = if booking.payment_status == PaymentStatus::DepositPaid {
        booking.deposit_amount_paid + amount
    } else {
        amount
    };
    let status = if booking.status == BookingStatus::PendingPayment {
        BookingStatus::Confirmed
    } else {
        booking.status
    };

    if covered >= booking.total_price {
        return move_to(status, PaymentStatus::Paid);
    }
    if booking.payment_status == PaymentStatus::DepositPaid {
        // First deposit wins.
        return Plan::NoOp("deposit already recorded");
    }
    if booking.requires_deposit && amount >= booking.deposit_required {
        return Plan::Move {
            target: Target::new(status, PaymentStatus::DepositPaid),
            deposit_amount_paid: Some(amount),
        };
    }
    Plan::Reject(format!(
        "amount {amount} covers neither the deposit {} nor the total {}",
        booking.deposit_required, booking.total_price
    ))
}

/// A payment that arrived for a booking that can no longer take it.
fn needs_refund(booking: &Booking, event: &PaymentEvent) -> bool {
    matches!(
        event.kind,
        PaymentEventKind::SessionCompleted { .. } | PaymentEventKind::PaymentSucceeded { .. }
    ) && !booking.payment_status.is_settled()
        && booking.status.is_terminal()
}

/// Applies one event to its booking. Only store failures are returned; everything
/// else resolves to an outcome and marks the ledger row applied.
///
/// A stale version re-reads the booking and plans again, once, so a concurrent event
/// that moved the booking first is accounted for.
pub async fn reconcile(
    state: &AppState,
    event: &PaymentEvent,
    now: DateTime<Utc>,
) -> Result<Resolution, StoreError> {
    let store = state.store.as_ref();

    let Some(mut booking) = store.get_booking_by_session_ref(&event.session_ref).await? else {
        tracing::info!(
            event_id = %event.event_id,
            session_ref = %event.session_ref,
            "no booking for payment session, acknowledging"
        );
        store.mark_event_applied(&event.event_id, now).await?;
        return Ok(Resolution::UnknownBooking);
    };

    if event.kind == PaymentEventKind::PaymentFailed {
        tracing::warn!(
            event_id = %event.event_id,
            booking_id = %booking.id,
            "payment attempt failed, hold kept until it expires"
        );
    }

    let mut retried = false;
    loop {
        let (target, deposit_amount_paid) = match plan(&booking, event, &state.config.currency) {
            Plan::Move {
                target,
                deposit_amount_paid,
            } => (target, deposit_amount_paid),
            Plan::NoOp(reason) => {
                tracing::info!(
                    event_id = %event.event_id,
                    booking_id = %booking.id,
                    reason,
                    "event needs no change"
                );
                store.mark_event_applied(&event.event_id, now).await?;
                return Ok(Resolution::NoOp(reason.to_string()));
            }
            Plan::Reject(reason) => {
                tracing::warn!(
                    event_id = %event.event_id,
                    booking_id = %booking.id,
                    %reason,
                    "dropping payment event"
                );
                store.mark_event_applied(&event.event_id, now).await?;
                return Ok(Resolution::Dropped(reason));
            }
        };

        let request = TransitionRequest {
            booking_id: booking.id.clone(),
            expected_version: booking.version,
            target,
            deposit_amount_paid,
            applied_event: Some(event.event_id.clone()),
        };

        match state_machine::transition(state, request, now).await {
            Ok(Outcome::Applied(updated)) => {
                tracing::info!(
                    event_id = %event.event_id,
                    booking_id = %updated.id,
                    event_type = event.kind.event_type().as_str(),
                    "payment event applied"
                );
                return Ok(Resolution::Applied(Target::of(&updated)));
            }
            Ok(Outcome::Unchanged(_)) => {
                return Ok(Resolution::NoOp("booking already in target state".to_string()));
            }
            Err(TransitionError::StaleVersion { .. }) if !retried => {
                retried = true;
                tracing::debug!(
                    event_id = %event.event_id,
                    booking_id = %booking.id,
                    "booking moved underneath the event, planning again"
                );
                match store.get_booking(&booking.id).await? {
                    Some(fresh) => booking = fresh,
                    None => {
                        store.mark_event_applied(&event.event_id, now).await?;
                        return Ok(Resolution::UnknownBooking);
                    }
                }
            }
            Err(e @ TransitionError::StaleVersion { .. })
            | Err(e @ TransitionError::IllegalTransition { .. }) => {
                if let Some(latest) = store.get_booking(&booking.id).await? {
                    booking = latest;
                }
                if needs_refund(&booking, event) {
                    tracing::warn!(
                        event_id = %event.event_id,
                        booking_id = %booking.id,
                        amount = event.kind.amount(),
                        "payment received for a booking that can no longer be paid, refund required"
                    );
                }
                store.mark_event_applied(&event.event_id, now).await?;
                return Ok(Resolution::Dropped(e.to_string()));
            }
            Err(TransitionError::NotFound(_)) => {
                store.mark_event_applied(&event.event_id, now).await?;
                return Ok(Resolution::UnknownBooking);
            }
            Err(TransitionError::Store(e)) => return Err(e),
        }
    }
}

/// Webhook intake: authenticate, parse, record in the ledger, then reconcile.
/// An `Err` means nothing durable happened and the gateway should redeliver.
pub async fn ingest(
    state: &AppState,
    signature: Option<&str>,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<Delivery, AppError> {
    let secret = &state.config.webhook_secret;
    if secret.is_empty() {
        tracing::warn!("webhook secret not configured, accepting unsigned event");
    } else {
        let header = signature.ok_or_else(|| {
            tracing::warn!("missing webhook signature header");
            AppError::SignatureInvalid("missing signature header".to_string())
        })?;
        verify_signature(body, header, secret, now, state.config.webhook_tolerance).map_err(|e| {
            tracing::warn!(error = e, "webhook signature verification failed");
            AppError::SignatureInvalid(e.to_string())
        })?;
    }

    let payload: WebhookPayload = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("malformed event: {e}")))?;
    let Some(event) = payload.into_event(&state.config.currency)? else {
        return Ok(Delivery::Ignored);
    };

    let record = state
        .store
        .record_payment_event(&PaymentEventRecord::received(&event, now))
        .await?;
    if record.applied {
        tracing::info!(event_id = %event.event_id, "duplicate payment event, already applied");
        return Ok(Delivery::Duplicate);
    }

    match reconcile(state, &event, now).await {
        Ok(resolution) => Ok(Delivery::Processed(resolution)),
        Err(e) => {
            tracing::error!(event_id = %event.event_id, error = %e, "reconciliation failed, left for replay");
            Ok(Delivery::Deferred)
        }
    }
}

/// Re-runs ledger rows that were recorded but never marked applied.
pub async fn replay_unapplied(state: &AppState, now: DateTime<Utc>) -> Result<usize, StoreError> {
    let after = chrono::Duration::from_std(state.config.ledger_replay_after)
        .unwrap_or_else(|_| chrono::Duration::seconds(30));
    let pending = state
        .store
        .list_unapplied_events(now - after, REPLAY_BATCH)
        .await?;

    let mut replayed = 0;
    for record in pending {
        let resolution = reconcile(state, &record.to_event(), now).await?;
        tracing::info!(event_id = %record.event_id, ?resolution, "replayed payment event");
        replayed += 1;
    }
    Ok(replayed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::services::allocator::{create_hold, HoldRequest};
    use crate::services::testing::{client, fixture, ts, Fixture};

    const SECRET: &str = "whsec_test";

    async fn hold(state: &AppState, service_id: &str) -> Booking {
        create_hold(
            state,
            HoldRequest {
                studio_id: "studio-1".to_string(),
                service_id: service_id.to_string(),
                start_time: ts("2025-06-16 10:00"),
                client: client(),
            },
            ts("2025-06-15 12:00"),
        )
        .await
        .unwrap()
        .booking
    }

    fn event(id: &str, booking: &Booking, kind: PaymentEventKind) -> PaymentEvent {
        PaymentEvent {
            event_id: id.to_string(),
            session_ref: booking.payment_session_ref.clone().unwrap(),
            kind,
            currency: "usd".to_string(),
            occurred_at: ts("2025-06-15 12:05"),
        }
    }

    fn body(id: &str, booking: &Booking, event_type: &str, amount: i64) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "event_id": id,
            "event_type": event_type,
            "payment_session_ref": booking.payment_session_ref,
            "amount": amount,
            "currency": "usd",
            "timestamp": ts("2025-06-15 12:05").timestamp(),
        }))
        .unwrap()
    }

    async fn deliver(
        state: &AppState,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Delivery, AppError> {
        let header = signature_header(body, SECRET, now.timestamp()).unwrap();
        ingest(state, Some(&header), body, now).await
    }

    async fn current(state: &AppState, id: &str) -> Booking {
        state.store.get_booking(id).await.unwrap().unwrap()
    }

    #[test]
    fn test_signature_round_trip() {
        let now = ts("2025-06-15 12:00");
        let header = signature_header(b"{}", SECRET, now.timestamp()).unwrap();
        assert!(verify_signature(b"{}", &header, SECRET, now, Duration::from_secs(300)).is_ok());
    }

    #[test]
    fn test_signature_rejects_tampering() {
        let now = ts("2025-06-15 12:00");
        let header = signature_header(b"{}", SECRET, now.timestamp()).unwrap();
        assert_eq!(
            verify_signature(b"{ }", &header, SECRET, now, Duration::from_secs(300)),
            Err("signature mismatch")
        );
        assert_eq!(
            verify_signature(b"{}", &header, "other", now, Duration::from_secs(300)),
            Err("signature mismatch")
        );
        assert_eq!(
            verify_signature(b"{}", "v1=abc", SECRET, now, Duration::from_secs(300)),
            Err("malformed signature header")
        );
    }

    #[test]
    fn test_signature_rejects_old_timestamp() {
        let now = ts("2025-06-15 12:00");
        let header = signature_header(b"{}", SECRET, now.timestamp() - 600).unwrap();
        assert_eq!(
            verify_signature(b"{}", &header, SECRET, now, Duration::from_secs(300)),
            Err("timestamp outside tolerance")
        );
    }

    #[test]
    fn test_unknown_event_type_parses_to_none() {
        let payload: WebhookPayload = serde_json::from_str(
            r#"{"event_id":"e","event_type":"customer.created","payment_session_ref":"cs","timestamp":0}"#,
        )
        .unwrap();
        assert!(payload.into_event("usd").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_payment_confirms() {
        let Fixture { state, .. } = fixture().await;
        let booking = hold(&state, "svc-1").await;
        let now = ts("2025-06-15 12:05");

        let delivery = deliver(&state, &body("evt_1", &booking, "session_completed", 10_000), now)
            .await
            .unwrap();
        assert_eq!(
            delivery,
            Delivery::Processed(Resolution::Applied(Target::new(
                BookingStatus::Confirmed,
                PaymentStatus::Paid
            )))
        );

        let events = state
            .store
            .list_events_for_booking_ref(booking.payment_session_ref.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].applied);
    }

    #[tokio::test]
    async fn test_deposit_then_duplicate_is_applied_once() {
        let Fixture { state, .. } = fixture().await;
        let booking = hold(&state, "svc-dep").await;
        let now = ts("2025-06-15 12:05");
        let payload = body("evt_dep", &booking, "session_completed", 3_000);

        deliver(&state, &payload, now).await.unwrap();
        let after_first = current(&state, &booking.id).await;
        assert_eq!(after_first.status, BookingStatus::Confirmed);
        assert_eq!(after_first.payment_status, PaymentStatus::DepositPaid);
        assert_eq!(after_first.deposit_amount_paid, 3_000);

        let delivery = deliver(&state, &payload, ts("2025-06-15 12:06")).await.unwrap();
        assert_eq!(delivery, Delivery::Duplicate);
        assert_eq!(current(&state, &booking.id).await, after_first);
    }

    #[tokio::test]
    async fn test_balance_after_deposit_marks_paid() {
        let Fixture { state, .. } = fixture().await;
        let booking = hold(&state, "svc-dep").await;
        let now = ts("2025-06-15 12:05");

        deliver(&state, &body("evt_dep", &booking, "session_completed", 3_000), now)
            .await
            .unwrap();
        deliver(&state, &body("evt_rest", &booking, "payment_succeeded", 7_000), now)
            .await
            .unwrap();

        let b = current(&state, &booking.id).await;
        assert_eq!(b.status, BookingStatus::Confirmed);
        assert_eq!(b.payment_status, PaymentStatus::Paid);
        assert_eq!(b.version, 3);
    }

    #[tokio::test]
    async fn test_session_expired_cancels_hold() {
        let Fixture { state, .. } = fixture().await;
        let booking = hold(&state, "svc-1").await;

        let payload = body("evt_exp", &booking, "session_expired", 0);
        deliver(&state, &payload, ts("2025-06-15 12:05")).await.unwrap();
        let b = current(&state, &booking.id).await;
        assert_eq!(b.status, BookingStatus::Cancelled);
        assert_eq!(b.payment_status, PaymentStatus::Expired);
    }

    #[tokio::test]
    async fn test_payment_failed_keeps_hold() {
        let Fixture { state, .. } = fixture().await;
        let booking = hold(&state, "svc-1").await;

        let payload = body("evt_fail", &booking, "payment_failed", 0);
        let delivery = deliver(&state, &payload, ts("2025-06-15 12:05")).await.unwrap();
        assert!(matches!(delivery, Delivery::Processed(Resolution::NoOp(_))));

        let b = current(&state, &booking.id).await;
        assert_eq!(b.status, BookingStatus::PendingPayment);
        assert_eq!(b.version, 1);
    }

    #[tokio::test]
    async fn test_refund_cancels_confirmed_booking() {
        let Fixture { state, .. } = fixture().await;
        let booking = hold(&state, "svc-1").await;
        let now = ts("2025-06-15 12:05");

        deliver(&state, &body("evt_pay", &booking, "session_completed", 10_000), now)
            .await
            .unwrap();
        deliver(&state, &body("evt_ref", &booking, "refund_issued", 10_000), now)
            .await
            .unwrap();

        let b = current(&state, &booking.id).await;
        assert_eq!(b.status, BookingStatus::Cancelled);
        assert_eq!(b.payment_status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_refund_on_unpaid_hold_is_dropped() {
        let Fixture { state, .. } = fixture().await;
        let booking = hold(&state, "svc-1").await;

        let payload = body("evt_ref", &booking, "refund_issued", 10_000);
        let delivery = deliver(&state, &payload, ts("2025-06-15 12:05")).await.unwrap();
        assert!(matches!(delivery, Delivery::Processed(Resolution::Dropped(_))));
        assert_eq!(current(&state, &booking.id).await.version, 1);
    }

    #[tokio::test]
    async fn test_payment_after_expiry_is_dropped() {
        let Fixture { state, .. } = fixture().await;
        let booking = hold(&state, "svc-1").await;
        let now = ts("2025-06-15 12:05");

        deliver(&state, &body("evt_exp", &booking, "session_expired", 0), now)
            .await
            .unwrap();
        let delivery = deliver(&state, &body("evt_pay", &booking, "session_completed", 10_000), now)
            .await
            .unwrap();
        assert!(matches!(delivery, Delivery::Processed(Resolution::Dropped(_))));

        let b = current(&state, &booking.id).await;
        assert_eq!(b.status, BookingStatus::Cancelled);
        assert_eq!(b.payment_status, PaymentStatus::Expired);
    }

    #[tokio::test]
    async fn test_underpayment_and_wrong_currency_dropped() {
        let Fixture { state, .. } = fixture().await;
        let booking = hold(&state, "svc-1").await;

        let e = event("e1", &booking, PaymentEventKind::SessionCompleted { amount: 3_000 });
        assert!(matches!(plan(&booking, &e, "usd"), Plan::Reject(_)));

        let mut e = event("e2", &booking, PaymentEventKind::SessionCompleted { amount: 10_000 });
        e.currency = "eur".to_string();
        assert!(matches!(plan(&booking, &e, "usd"), Plan::Reject(_)));
    }

    #[tokio::test]
    async fn test_unknown_session_acknowledged() {
        let Fixture { state, .. } = fixture().await;
        let payload = serde_json::to_vec(&serde_json::json!({
            "event_id": "evt_x",
            "event_type": "session_completed",
            "payment_session_ref": "cs_nobody",
            "amount": 100,
            "currency": "usd",
            "timestamp": ts("2025-06-15 12:05").timestamp(),
        }))
        .unwrap();

        let delivery = deliver(&state, &payload, ts("2025-06-15 12:05")).await.unwrap();
        assert_eq!(delivery, Delivery::Processed(Resolution::UnknownBooking));
    }

    #[tokio::test]
    async fn test_bad_signature_has_no_side_effects() {
        let Fixture { state, .. } = fixture().await;
        let booking = hold(&state, "svc-1").await;
        let payload = body("evt_1", &booking, "session_completed", 10_000);
        let now = ts("2025-06-15 12:05");
        let header = signature_header(&payload, "wrong-secret", now.timestamp()).unwrap();

        let err = ingest(&state, Some(&header), &payload, now).await.unwrap_err();
        assert!(matches!(err, AppError::SignatureInvalid(_)));

        let err = ingest(&state, None, &payload, now).await.unwrap_err();
        assert!(matches!(err, AppError::SignatureInvalid(_)));

        assert_eq!(current(&state, &booking.id).await.version, 1);
        assert!(state
            .store
            .list_events_for_booking_ref(booking.payment_session_ref.as_deref().unwrap())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_order_and_duplication_do_not_change_outcome() {
        use PaymentEventKind::*;

        // Every ordering of these deliveries, each possibly doubled, must land in
        // the same place: the highest-precedence payment.
        let kinds = [
            ("evt_fail", PaymentFailed),
            ("evt_dep", SessionCompleted { amount: 3_000 }),
            ("evt_full", PaymentSucceeded { amount: 10_000 }),
        ];
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for order in orders {
            for doubled in [false, true] {
                let Fixture { state, .. } = fixture().await;
                let booking = hold(&state, "svc-dep").await;
                let now = ts("2025-06-15 12:05");

                for &i in &order {
                    let (id, kind) = &kinds[i];
                    let e = event(id, &booking, kind.clone());
                    let record = state
                        .store
                        .record_payment_event(&PaymentEventRecord::received(&e, now))
                        .await
                        .unwrap();
                    if !record.applied {
                        reconcile(&state, &e, now).await.unwrap();
                    }
                    if doubled {
                        let again = state
                            .store
                            .record_payment_event(&PaymentEventRecord::received(&e, now))
                            .await
                            .unwrap();
                        assert!(again.applied);
                    }
                }

                let b = current(&state, &booking.id).await;
                assert_eq!(
                    (b.status, b.payment_status),
                    (BookingStatus::Confirmed, PaymentStatus::Paid),
                    "order {order:?}, doubled {doubled}"
                );
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deposit_and_balance_both_count() {
        for _ in 0..20 {
            let Fixture { state, .. } = fixture().await;
            let booking = hold(&state, "svc-dep").await;
            let now = ts("2025-06-15 12:05");

            let mut handles = vec![];
            for (id, amount) in [("evt_dep", 3_000), ("evt_rest", 7_000)] {
                let e = event(id, &booking, PaymentEventKind::SessionCompleted { amount });
                state
                    .store
                    .record_payment_event(&PaymentEventRecord::received(&e, now))
                    .await
                    .unwrap();
                let state = Arc::clone(&state);
                handles.push(tokio::spawn(async move { reconcile(&state, &e, now).await }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let b = current(&state, &booking.id).await;
            assert_eq!(
                (b.status, b.payment_status),
                (BookingStatus::Confirmed, PaymentStatus::Paid)
            );
            let events = state
                .store
                .list_events_for_booking_ref(booking.payment_session_ref.as_deref().unwrap())
                .await
                .unwrap();
            assert!(events.iter().all(|e| e.applied));
        }
    }

    #[tokio::test]
    async fn test_refund_judged_on_latest_booking() {
        let Fixture { state, .. } = fixture().await;
        let booking = hold(&state, "svc-1").await;
        let pay = event("evt_pay", &booking, PaymentEventKind::SessionCompleted { amount: 10_000 });
        assert!(!needs_refund(&booking, &pay));

        let expire = event("evt_exp", &booking, PaymentEventKind::SessionExpired);
        reconcile(&state, &expire, ts("2025-06-15 12:05")).await.unwrap();
        let expired = current(&state, &booking.id).await;
        assert!(needs_refund(&expired, &pay));

        let refund = event("evt_ref", &booking, PaymentEventKind::RefundIssued { amount: 10_000 });
        assert!(!needs_refund(&expired, &refund));

        // A payment after expiry leaves the booking as it was.
        let resolution = reconcile(&state, &pay, ts("2025-06-15 12:06")).await.unwrap();
        assert!(matches!(resolution, Resolution::Dropped(_)));
        assert_eq!(current(&state, &booking.id).await, expired);
    }

    #[tokio::test]
    async fn test_replay_applies_recorded_event() {
        let Fixture { state, .. } = fixture().await;
        let booking = hold(&state, "svc-1").await;
        let received = ts("2025-06-15 12:05");

        // Recorded but never reconciled, as after a crash.
        let e = event("evt_crash", &booking, PaymentEventKind::SessionCompleted { amount: 10_000 });
        state
            .store
            .record_payment_event(&PaymentEventRecord::received(&e, received))
            .await
            .unwrap();

        // Too fresh to replay yet.
        assert_eq!(replay_unapplied(&state, ts("2025-06-15 12:05")).await.unwrap(), 0);

        assert_eq!(replay_unapplied(&state, ts("2025-06-15 12:06")).await.unwrap(), 1);
        let b = current(&state, &booking.id).await;
        assert_eq!(b.payment_status, PaymentStatus::Paid);

        assert_eq!(replay_unapplied(&state, ts("2025-06-15 12:07")).await.unwrap(), 0);
    }
}
