pub mod local;
pub mod stripe;

use async_trait::async_trait;
use serde::Serialize;

/// What the gateway needs to open a checkout for one hold.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub booking_id: String,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentSession {
    /// Opaque to the engine; gateway events refer back to the booking through it.
    pub session_ref: String,
    pub checkout_url: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, request: &SessionRequest) -> anyhow::Result<PaymentSession>;
}
