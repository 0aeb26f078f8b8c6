use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::db::Store;
use crate::models::BookingUpdate;
use crate::services::payments::PaymentGateway;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: AppConfig,
    pub gateway: Box<dyn PaymentGateway>,
    pub booking_tx: broadcast::Sender<BookingUpdate>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: AppConfig, gateway: Box<dyn PaymentGateway>) -> Self {
        let (booking_tx, _) = broadcast::channel(256);
        Self {
            store,
            config,
            gateway,
            booking_tx,
        }
    }
}
