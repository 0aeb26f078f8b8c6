use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub hold_ttl: Duration,
    pub sweep_interval: Duration,
    pub store_timeout: Duration,
    pub gateway_timeout: Duration,
    /// Empty disables signature checks (local development only).
    pub webhook_secret: String,
    pub webhook_tolerance: Duration,
    pub ledger_replay_after: Duration,
    pub currency: String,
    pub payment_gateway: String,
    pub gateway_api_key: String,
    pub gateway_base_url: String,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "studiobook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            hold_ttl: Duration::from_secs(env_u64("HOLD_TTL_SECS", 15 * 60)),
            sweep_interval: Duration::from_secs(env_u64("SWEEP_INTERVAL_SECS", 60)),
            store_timeout: Duration::from_millis(env_u64("STORE_TIMEOUT_MS", 5_000)),
            gateway_timeout: Duration::from_millis(env_u64("GATEWAY_TIMEOUT_MS", 10_000)),
            webhook_secret: env::var("WEBHOOK_SECRET").unwrap_or_default(),
            webhook_tolerance: Duration::from_secs(env_u64("WEBHOOK_TOLERANCE_SECS", 300)),
            ledger_replay_after: Duration::from_secs(env_u64("LEDGER_REPLAY_AFTER_SECS", 30)),
            currency: env::var("CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|_| "usd".to_string()),
            payment_gateway: env::var("PAYMENT_GATEWAY").unwrap_or_else(|_| "local".to_string()),
            gateway_api_key: env::var("GATEWAY_API_KEY").unwrap_or_default(),
            gateway_base_url: env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            checkout_success_url: env::var("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|_| "http://localhost:3000/booking/success".to_string()),
            checkout_cancel_url: env::var("CHECKOUT_CANCEL_URL")
                .unwrap_or_else(|_| "http://localhost:3000/booking/cancelled".to_string()),
        }
    }

    pub fn hold_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.hold_ttl).unwrap_or_else(|_| chrono::Duration::minutes(15))
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
