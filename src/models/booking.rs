use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientInfo {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: String,
    pub studio_id: String,
    pub service_id: String,
    pub client: ClientInfo,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    /// Minor currency units, snapshotted from the service at creation.
    pub total_price: i64,
    pub requires_deposit: bool,
    pub deposit_required: i64,
    pub deposit_amount_paid: i64,
    pub payment_session_ref: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Holds are not stored with a deadline; it is always derived from `created_at`.
    pub fn hold_expires_at(&self, hold_ttl: Duration) -> DateTime<Utc> {
        self.created_at + hold_ttl
    }

    /// Amount the client is asked to pay when the hold is created.
    pub fn amount_due_now(&self) -> i64 {
        if self.requires_deposit {
            self.deposit_required
        } else {
            self.total_price
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingPayment,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_payment" => Some(BookingStatus::PendingPayment),
            "confirmed" => Some(BookingStatus::Confirmed),
            "in_progress" => Some(BookingStatus::InProgress),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "no_show" => Some(BookingStatus::NoShow),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    DepositPaid,
    Paid,
    Expired,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::DepositPaid => "deposit_paid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "deposit_paid" => Some(PaymentStatus::DepositPaid),
            "paid" => Some(PaymentStatus::Paid),
            "expired" => Some(PaymentStatus::Expired),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::DepositPaid | PaymentStatus::Paid)
    }
}

/// Published after every applied transition.
#[derive(Debug, Clone, Serialize)]
pub struct BookingUpdate {
    pub booking_id: String,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub version: i64,
}

impl From<&Booking> for BookingUpdate {
    fn from(b: &Booking) -> Self {
        Self {
            booking_id: b.id.clone(),
            status: b.status,
            payment_status: b.payment_status,
            version: b.version,
        }
    }
}
