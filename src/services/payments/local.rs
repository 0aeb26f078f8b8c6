use async_trait::async_trait;

use super::{PaymentGateway, PaymentSession, SessionRequest};

/// Development gateway: mints session refs without talking to anyone. Payment
/// events for these sessions are posted to the webhook by hand.
pub struct LocalGateway;

#[async_trait]
impl PaymentGateway for LocalGateway {
    async fn create_session(&self, request: &SessionRequest) -> anyhow::Result<PaymentSession> {
        let session_ref = format!("cs_local_{}", uuid::Uuid::new_v4().simple());
        tracing::info!(
            booking_id = %request.booking_id,
            session_ref = %session_ref,
            amount = request.amount,
            "local payment session created"
        );
        Ok(PaymentSession {
            session_ref,
            checkout_url: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_sessions_are_unique() {
        let request = SessionRequest {
            booking_id: "bk-1".to_string(),
            amount: 5_000,
            currency: "usd".to_string(),
            description: "Recording hour".to_string(),
            customer_email: None,
        };
        let a = LocalGateway.create_session(&request).await.unwrap();
        let b = LocalGateway.create_session(&request).await.unwrap();
        assert!(a.session_ref.starts_with("cs_local_"));
        assert_ne!(a.session_ref, b.session_ref);
        assert!(a.checkout_url.is_none());
    }
}
