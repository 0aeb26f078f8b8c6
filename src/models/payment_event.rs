use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of gateway event types the reconciler understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventType {
    SessionCompleted,
    SessionExpired,
    PaymentSucceeded,
    PaymentFailed,
    RefundIssued,
}

impl PaymentEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventType::SessionCompleted => "session_completed",
            PaymentEventType::SessionExpired => "session_expired",
            PaymentEventType::PaymentSucceeded => "payment_succeeded",
            PaymentEventType::PaymentFailed => "payment_failed",
            PaymentEventType::RefundIssued => "refund_issued",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session_completed" => Some(PaymentEventType::SessionCompleted),
            "session_expired" => Some(PaymentEventType::SessionExpired),
            "payment_succeeded" => Some(PaymentEventType::PaymentSucceeded),
            "payment_failed" => Some(PaymentEventType::PaymentFailed),
            "refund_issued" => Some(PaymentEventType::RefundIssued),
            _ => None,
        }
    }
}

/// What a gateway event means for a booking, with the payload that matters for it.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEventKind {
    SessionCompleted { amount: i64 },
    SessionExpired,
    PaymentSucceeded { amount: i64 },
    PaymentFailed,
    RefundIssued { amount: i64 },
}

impl PaymentEventKind {
    pub fn new(event_type: PaymentEventType, amount: i64) -> Self {
        match event_type {
            PaymentEventType::SessionCompleted => PaymentEventKind::SessionCompleted { amount },
            PaymentEventType::SessionExpired => PaymentEventKind::SessionExpired,
            PaymentEventType::PaymentSucceeded => PaymentEventKind::PaymentSucceeded { amount },
            PaymentEventType::PaymentFailed => PaymentEventKind::PaymentFailed,
            PaymentEventType::RefundIssued => PaymentEventKind::RefundIssued { amount },
        }
    }

    pub fn event_type(&self) -> PaymentEventType {
        match self {
            PaymentEventKind::SessionCompleted { .. } => PaymentEventType::SessionCompleted,
            PaymentEventKind::SessionExpired => PaymentEventType::SessionExpired,
            PaymentEventKind::PaymentSucceeded { .. } => PaymentEventType::PaymentSucceeded,
            PaymentEventKind::PaymentFailed => PaymentEventType::PaymentFailed,
            PaymentEventKind::RefundIssued { .. } => PaymentEventType::RefundIssued,
        }
    }

    pub fn amount(&self) -> i64 {
        match self {
            PaymentEventKind::SessionCompleted { amount }
            | PaymentEventKind::PaymentSucceeded { amount }
            | PaymentEventKind::RefundIssued { amount } => *amount,
            PaymentEventKind::SessionExpired | PaymentEventKind::PaymentFailed => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    pub event_id: String,
    pub session_ref: String,
    pub kind: PaymentEventKind,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

/// Append-only ledger row, one per distinct external event id.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentEventRecord {
    pub event_id: String,
    pub booking_ref: String,
    pub event_type: PaymentEventType,
    pub amount: i64,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

impl PaymentEventRecord {
    pub fn received(event: &PaymentEvent, received_at: DateTime<Utc>) -> Self {
        Self {
            event_id: event.event_id.clone(),
            booking_ref: event.session_ref.clone(),
            event_type: event.kind.event_type(),
            amount: event.kind.amount(),
            currency: event.currency.clone(),
            occurred_at: event.occurred_at,
            received_at,
            applied: false,
            applied_at: None,
        }
    }

    /// Rebuilds the event from the ledger for replay.
    pub fn to_event(&self) -> PaymentEvent {
        PaymentEvent {
            event_id: self.event_id.clone(),
            session_ref: self.booking_ref.clone(),
            kind: PaymentEventKind::new(self.event_type, self.amount),
            currency: self.currency.clone(),
            occurred_at: self.occurred_at,
        }
    }
}
