//! Shared fixtures for service-level unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::config::AppConfig;
use crate::db::{self, SqliteStore, Store};
use crate::models::{ClientInfo, Service, Studio, WeeklySchedule};
use crate::services::payments::{PaymentGateway, PaymentSession, SessionRequest};
use crate::state::AppState;

pub fn ts(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .unwrap()
        .and_utc()
}

pub fn client() -> ClientInfo {
    ClientInfo {
        name: "Alice".to_string(),
        email: Some("alice@example.com".to_string()),
        phone: None,
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: "test-token".to_string(),
        hold_ttl: Duration::from_secs(15 * 60),
        sweep_interval: Duration::from_secs(60),
        store_timeout: Duration::from_secs(5),
        gateway_timeout: Duration::from_secs(5),
        webhook_secret: "whsec_test".to_string(),
        webhook_tolerance: Duration::from_secs(300),
        ledger_replay_after: Duration::from_secs(30),
        currency: "usd".to_string(),
        payment_gateway: "local".to_string(),
        gateway_api_key: String::new(),
        gateway_base_url: String::new(),
        checkout_success_url: String::new(),
        checkout_cancel_url: String::new(),
    }
}

/// Hands out sequential session refs and remembers every request.
pub struct RecordingGateway {
    pub requests: Arc<Mutex<Vec<SessionRequest>>>,
    pub fail: bool,
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_session(&self, request: &SessionRequest) -> anyhow::Result<PaymentSession> {
        if self.fail {
            anyhow::bail!("gateway unavailable");
        }
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        Ok(PaymentSession {
            session_ref: format!("cs_test_{}", requests.len()),
            checkout_url: Some(format!("https://pay.example/{}", requests.len())),
        })
    }
}

pub struct Fixture {
    pub state: Arc<AppState>,
    pub requests: Arc<Mutex<Vec<SessionRequest>>>,
}

/// Studio "studio-1" (UTC) open Monday 09:00-22:00, with "svc-1" (60 min, 100.00, paid
/// in full) and "svc-dep" (60 min, 100.00, 30% deposit).
pub async fn fixture() -> Fixture {
    fixture_with_gateway(false).await
}

pub async fn fixture_with_gateway(fail: bool) -> Fixture {
    let conn = db::init_db(":memory:").unwrap();
    let store = Arc::new(SqliteStore::new(conn, Duration::from_secs(5)));
    let requests = Arc::new(Mutex::new(vec![]));
    let gateway = RecordingGateway {
        requests: Arc::clone(&requests),
        fail,
    };

    store
        .upsert_studio(&Studio {
            id: "studio-1".to_string(),
            name: "Loft".to_string(),
            timezone: "UTC".to_string(),
        })
        .await
        .unwrap();
    store
        .replace_schedule(
            "studio-1",
            &WeeklySchedule::from_json(
                r#"{"windows":[{"weekday":1,"open_time":"09:00","close_time":"22:00"}]}"#,
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let base = Service {
        id: "svc-1".to_string(),
        studio_id: "studio-1".to_string(),
        name: "Recording hour".to_string(),
        duration_minutes: 60,
        price: 10_000,
        requires_deposit: false,
        deposit_percentage: 0,
        min_advance_minutes: 60,
        max_advance_minutes: 60 * 24 * 30,
        active: true,
    };
    store.upsert_service(&base).await.unwrap();
    store
        .upsert_service(&Service {
            id: "svc-dep".to_string(),
            requires_deposit: true,
            deposit_percentage: 30,
            ..base
        })
        .await
        .unwrap();

    let state = Arc::new(AppState::new(store, test_config(), Box::new(gateway)));
    Fixture { state, requests }
}
