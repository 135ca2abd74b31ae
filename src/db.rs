use std::{env, fs, path::Path};

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    auth::{hash_password, new_id},
    settings::QueueSettings,
};

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub async fn seed_defaults(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    seed_admin(pool).await?;
    let shop_id = seed_barbershop(pool).await?;
    seed_demo(pool, &shop_id).await?;
    Ok(())
}

pub async fn log_activity(
    pool: &SqlitePool,
    kind: &str,
    message: &str,
    queue_entry_id: Option<&str>,
    appointment_id: Option<&str>,
) {
    let _ = sqlx::query(
        r#"INSERT INTO activities (id, kind, message, created_at, queue_entry_id, appointment_id)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(kind)
    .bind(message)
    .bind(Utc::now().to_rfc3339())
    .bind(queue_entry_id)
    .bind(appointment_id)
    .execute(pool)
    .await;
}

async fn seed_admin(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM users LIMIT 1")
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Ok(());
    }

    let username = env::var("ADMIN_USER").unwrap_or_else(|_| "admin".to_string());
    let password = env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());
    let display_name = env::var("ADMIN_DISPLAY_NAME").unwrap_or_else(|_| "Super Admin".to_string());

    if password == "admin" {
        log::warn!("ADMIN_PASSWORD not set. Using default password 'admin'. Set ADMIN_PASSWORD in production.");
    }

    let password_hash = hash_password(&password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;

    sqlx::query(
        r#"INSERT INTO users (id, username, display_name, password_hash, active, created_at)
           VALUES (?, ?, ?, ?, 1, ?)"#,
    )
    .bind(new_id())
    .bind(username)
    .bind(display_name)
    .bind(password_hash)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Ensure one barbershop exists with a default (disabled) queue settings
/// row, so the admin API has something to configure on first boot.
async fn seed_barbershop(pool: &SqlitePool) -> Result<String, sqlx::Error> {
    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM barbershops LIMIT 1")
        .fetch_optional(pool)
        .await?;
    if let Some((id,)) = existing {
        return Ok(id);
    }

    let shop_id = new_id();
    let name = env::var("SHOP_NAME").unwrap_or_else(|_| "Main Street Barbers".to_string());
    sqlx::query("INSERT INTO barbershops (id, name, created_at) VALUES (?, ?, ?)")
        .bind(&shop_id)
        .bind(name)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;

    let defaults = QueueSettings::default();
    sqlx::query(
        r#"INSERT INTO queue_settings
           (barbershop_id, enabled, max_queue_size, notification_minutes,
            buffer_percentage, eta_weight, position_weight, wait_time_bonus)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&shop_id)
    .bind(defaults.enabled)
    .bind(defaults.max_queue_size)
    .bind(defaults.notification_minutes)
    .bind(defaults.buffer_percentage)
    .bind(defaults.eta_weight)
    .bind(defaults.position_weight)
    .bind(defaults.wait_time_bonus)
    .execute(pool)
    .await?;

    Ok(shop_id)
}

/// `SEED_DEMO=true` fills the catalog with one service, one employee and a
/// Mon-Sat 09:00-18:00 schedule so the queue can be exercised immediately.
async fn seed_demo(pool: &SqlitePool, shop_id: &str) -> Result<(), sqlx::Error> {
    if env::var("SEED_DEMO").unwrap_or_else(|_| "false".to_string()) != "true" {
        return Ok(());
    }

    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM services LIMIT 1")
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let now = Utc::now().to_rfc3339();

    let service_id = new_id();
    sqlx::query(
        r#"INSERT INTO services (id, barbershop_id, name, duration_minutes, price_cents, active)
           VALUES (?, ?, ?, ?, ?, 1)"#,
    )
    .bind(&service_id)
    .bind(shop_id)
    .bind("Signature Cut")
    .bind(45_i64)
    .bind(3500_i64)
    .execute(pool)
    .await?;

    let employee_id = new_id();
    sqlx::query(
        r#"INSERT INTO employees (id, barbershop_id, display_name, active, created_at)
           VALUES (?, ?, ?, 1, ?)"#,
    )
    .bind(&employee_id)
    .bind(shop_id)
    .bind("Barber One")
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query("INSERT INTO employee_services (employee_id, service_id) VALUES (?, ?)")
        .bind(&employee_id)
        .bind(&service_id)
        .execute(pool)
        .await?;

    // Monday through Saturday
    for weekday in 0..6_i64 {
        sqlx::query(
            r#"INSERT INTO employee_schedules (id, employee_id, weekday, start_time, end_time, active)
               VALUES (?, ?, ?, ?, ?, 1)"#,
        )
        .bind(new_id())
        .bind(&employee_id)
        .bind(weekday)
        .bind("09:00")
        .bind("18:00")
        .execute(pool)
        .await?;
    }

    log::info!("Seeded demo catalog for barbershop {shop_id}");
    Ok(())
}
