use async_trait::async_trait;
use serde::Deserialize;
use sqlx::SqlitePool;
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushError, WebPushMessageBuilder, URL_SAFE_NO_PAD,
};

use crate::{
    auth::new_id,
    error::QueueError,
    models::{AppointmentRow, QueueEntryRow},
    state::PushConfig,
};

/// Outbound client messaging. The engine only emits notify intents on the
/// transition to `notified`; delivery, retries and transport live behind
/// this seam.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn notify(
        &self,
        entry: &QueueEntryRow,
        reservation: &AppointmentRow,
    ) -> Result<(), QueueError>;
}

#[derive(Debug, Deserialize)]
pub struct PushSubscriptionInput {
    pub endpoint: String,
    pub keys: PushKeys,
}

#[derive(Debug, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PushSubscriptionRow {
    endpoint: String,
    p256dh: String,
    auth: String,
}

pub async fn store_subscription(
    pool: &SqlitePool,
    queue_entry_id: &str,
    raw_subscription: &str,
) -> Result<(), sqlx::Error> {
    let subscription: PushSubscriptionInput = match serde_json::from_str(raw_subscription) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("Invalid push subscription payload: {err}");
            return Ok(());
        }
    };

    sqlx::query(
        r#"INSERT INTO push_subscriptions (id, queue_entry_id, endpoint, p256dh, auth, created_at)
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT(queue_entry_id, endpoint) DO UPDATE SET
             p256dh = excluded.p256dh,
             auth = excluded.auth"#,
    )
    .bind(new_id())
    .bind(queue_entry_id)
    .bind(subscription.endpoint)
    .bind(subscription.keys.p256dh)
    .bind(subscription.keys.auth)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Web-push delivery to every subscription registered for the entry.
/// Individual send failures are logged; the call only errors when every
/// endpoint failed, and the engine treats even that as log-and-continue.
pub struct PushGateway {
    pool: SqlitePool,
    config: PushConfig,
}

impl PushGateway {
    pub fn new(pool: SqlitePool, config: PushConfig) -> Self {
        if !config.enabled() {
            log::info!("VAPID keys not set; slot notifications will only be visible via SSE");
        }
        Self { pool, config }
    }
}

#[async_trait]
impl NotificationGateway for PushGateway {
    async fn notify(
        &self,
        entry: &QueueEntryRow,
        reservation: &AppointmentRow,
    ) -> Result<(), QueueError> {
        if !self.config.enabled() {
            return Ok(());
        }

        let rows = sqlx::query_as::<_, PushSubscriptionRow>(
            "SELECT endpoint, p256dh, auth FROM push_subscriptions WHERE queue_entry_id = ?",
        )
        .bind(&entry.id)
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        if rows.is_empty() {
            return Ok(());
        }

        let payload = serde_json::json!({
            "title": "Your slot is ready",
            "body": format!(
                "A {} slot opened at {}. Confirm within the response window to keep it.",
                reservation.date, reservation.start_time
            ),
            "url": format!("/api/queue/{}", entry.id),
        })
        .to_string();

        let total = rows.len();
        let mut failed = 0;
        for row in rows {
            if let Err(err) = send_push(&self.config, row, &payload).await {
                log::warn!("Push send failed for entry {}: {err}", entry.id);
                failed += 1;
            }
        }
        if failed == total {
            return Err(QueueError::Upstream(format!(
                "all {total} push sends failed for entry {}",
                entry.id
            )));
        }
        Ok(())
    }
}

async fn send_push(
    config: &PushConfig,
    row: PushSubscriptionRow,
    payload: &str,
) -> Result<(), WebPushError> {
    let subscription = SubscriptionInfo::new(row.endpoint, row.p256dh, row.auth);
    let mut builder = WebPushMessageBuilder::new(&subscription);
    builder.set_payload(ContentEncoding::Aes128Gcm, payload.as_bytes());

    let mut vapid_builder =
        VapidSignatureBuilder::from_base64(&config.private_key, URL_SAFE_NO_PAD, &subscription)?;
    vapid_builder.add_claim("sub", config.subject.clone());

    builder.set_vapid_signature(vapid_builder.build()?);

    let client = IsahcWebPushClient::new()?;
    client.send(builder.build()?).await?;
    Ok(())
}
