use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::QueueError;

/// Per-barbershop queue configuration. One row per shop, seeded with
/// defaults when the shop is created and passed explicitly into the engine
/// so tests can inject arbitrary weight combinations.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueSettings {
    pub enabled: bool,
    pub max_queue_size: i64,
    pub notification_minutes: i64,
    pub buffer_percentage: i64,
    pub eta_weight: f64,
    pub position_weight: f64,
    pub wait_time_bonus: f64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_queue_size: 50,
            notification_minutes: 30,
            buffer_percentage: 33,
            eta_weight: 0.60,
            position_weight: 0.40,
            wait_time_bonus: 0.20,
        }
    }
}

impl QueueSettings {
    /// How far ahead of "now" a slot may start and still trigger a
    /// notification. The buffer percentage widens the base window to absorb
    /// early finishes.
    pub fn notification_window_minutes(&self) -> i64 {
        self.notification_minutes * (100 + self.buffer_percentage) / 100
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_queue_size < 1 {
            return Err(QueueError::Validation(
                "max_queue_size must be at least 1".into(),
            ));
        }
        if self.notification_minutes < 1 {
            return Err(QueueError::Validation(
                "notification_minutes must be at least 1".into(),
            ));
        }
        if !(0..=50).contains(&self.buffer_percentage) {
            return Err(QueueError::Validation(
                "buffer_percentage must be between 0 and 50".into(),
            ));
        }
        for (name, value) in [
            ("eta_weight", self.eta_weight),
            ("position_weight", self.position_weight),
            ("wait_time_bonus", self.wait_time_bonus),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(QueueError::Validation(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }
        Ok(())
    }
}

pub async fn load(pool: &SqlitePool, barbershop_id: &str) -> Result<QueueSettings, QueueError> {
    sqlx::query_as::<_, QueueSettings>(
        r#"SELECT enabled, max_queue_size, notification_minutes, buffer_percentage,
                  eta_weight, position_weight, wait_time_bonus
           FROM queue_settings
           WHERE barbershop_id = ?"#,
    )
    .bind(barbershop_id)
    .fetch_optional(pool)
    .await?
    .ok_or(QueueError::NotFound("barbershop"))
}

pub async fn upsert(
    pool: &SqlitePool,
    barbershop_id: &str,
    settings: &QueueSettings,
) -> Result<(), QueueError> {
    settings.validate()?;
    sqlx::query(
        r#"INSERT INTO queue_settings
           (barbershop_id, enabled, max_queue_size, notification_minutes,
            buffer_percentage, eta_weight, position_weight, wait_time_bonus)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(barbershop_id) DO UPDATE SET
             enabled = excluded.enabled,
             max_queue_size = excluded.max_queue_size,
             notification_minutes = excluded.notification_minutes,
             buffer_percentage = excluded.buffer_percentage,
             eta_weight = excluded.eta_weight,
             position_weight = excluded.position_weight,
             wait_time_bonus = excluded.wait_time_bonus"#,
    )
    .bind(barbershop_id)
    .bind(settings.enabled)
    .bind(settings.max_queue_size)
    .bind(settings.notification_minutes)
    .bind(settings.buffer_percentage)
    .bind(settings.eta_weight)
    .bind(settings.position_weight)
    .bind(settings.wait_time_bonus)
    .execute(pool)
    .await?;
    Ok(())
}
