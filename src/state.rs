use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::{models::QueueEntryRow, notify::NotificationGateway, store::Store};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub store: Store,
    pub events: broadcast::Sender<QueueEvent>,
    pub gateway: Arc<dyn NotificationGateway>,
}

#[derive(Clone, Debug)]
pub struct PushConfig {
    pub public_key: String,
    pub private_key: String,
    pub subject: String,
}

impl PushConfig {
    pub fn from_env() -> Self {
        Self {
            public_key: std::env::var("VAPID_PUBLIC_KEY").unwrap_or_default(),
            private_key: std::env::var("VAPID_PRIVATE_KEY").unwrap_or_default(),
            subject: std::env::var("VAPID_SUBJECT")
                .unwrap_or_else(|_| "mailto:queue@cutline.local".to_string()),
        }
    }

    pub fn enabled(&self) -> bool {
        !(self.public_key.trim().is_empty() || self.private_key.trim().is_empty())
    }
}

/// Broadcast to SSE subscribers whenever a queue entry changes state.
#[derive(Clone, Debug, Serialize)]
pub struct QueueEvent {
    pub kind: String,
    pub entry_id: String,
    pub status: String,
    pub barbershop_id: String,
    pub slot_date: Option<String>,
    pub slot_start: Option<String>,
    pub employee_id: Option<String>,
}

impl QueueEvent {
    pub fn from_entry(kind: &str, entry: &QueueEntryRow) -> Self {
        Self {
            kind: kind.to_string(),
            entry_id: entry.id.clone(),
            status: entry.status.clone(),
            barbershop_id: entry.barbershop_id.clone(),
            slot_date: None,
            slot_start: None,
            employee_id: None,
        }
    }

    pub fn with_slot(mut self, date: &str, start: &str, employee_id: &str) -> Self {
        self.slot_date = Some(date.to_string());
        self.slot_start = Some(start.to_string());
        self.employee_id = Some(employee_id.to_string());
        self
    }
}
