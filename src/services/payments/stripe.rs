use anyhow::Context;
use async_trait::async_trait;

use super::{PaymentGateway, PaymentSession, SessionRequest};

/// Checkout sessions against a Stripe-compatible API.
pub struct StripeGateway {
    api_key: String,
    base_url: String,
    success_url: String,
    cancel_url: String,
    client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(api_key: String, base_url: String, success_url: String, cancel_url: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            success_url,
            cancel_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_session(&self, request: &SessionRequest) -> anyhow::Result<PaymentSession> {
        let url = format!("{}/v1/checkout/sessions", self.base_url);
        let amount = request.amount.to_string();

        let mut form: Vec<(&str, &str)> = vec![
            ("mode", "payment"),
            ("client_reference_id", &request.booking_id),
            ("metadata[booking_id]", &request.booking_id),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", &request.currency),
            ("line_items[0][price_data][unit_amount]", &amount),
            ("line_items[0][price_data][product_data][name]", &request.description),
            ("success_url", &self.success_url),
            ("cancel_url", &self.cancel_url),
        ];
        if let Some(email) = request.customer_email.as_deref() {
            form.push(("customer_email", email));
        }

        let resp: serde_json::Value = self
            .client
            .post(&url)
            .basic_auth(&self.api_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .context("failed to create checkout session")?
            .error_for_status()
            .context("payment gateway returned error")?
            .json()
            .await
            .context("invalid checkout session response")?;

        let session_ref = resp["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("checkout session response missing id: {resp}"))?;

        Ok(PaymentSession {
            session_ref,
            checkout_url: resp["url"].as_str().map(String::from),
        })
    }
}
