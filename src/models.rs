use serde::Serialize;

pub const APPT_PENDING: &str = "pending";
pub const APPT_CONFIRMED: &str = "confirmed";
pub const APPT_CANCELLED: &str = "cancelled";
pub const APPT_NO_SHOW: &str = "no_show";
pub const APPT_COMPLETED: &str = "completed";
pub const APPT_QUEUE_RESERVED: &str = "queue_reserved";

pub const ENTRY_WAITING: &str = "waiting";
pub const ENTRY_NOTIFIED: &str = "notified";
pub const ENTRY_CONFIRMED: &str = "confirmed";
pub const ENTRY_CANCELLED: &str = "cancelled";
pub const ENTRY_EXPIRED: &str = "expired";

#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub active: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServiceRow {
    pub id: String,
    pub barbershop_id: String,
    pub name: String,
    pub duration_minutes: i64,
    pub price_cents: i64,
    pub active: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EmployeeRow {
    pub id: String,
    pub barbershop_id: String,
    pub display_name: String,
    pub active: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EmployeeScheduleRow {
    pub id: String,
    pub employee_id: String,
    pub weekday: i64,
    pub start_time: String,
    pub end_time: String,
    pub active: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub barbershop_id: String,
    pub employee_id: String,
    pub service_id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
    pub client_name: String,
    pub client_phone: String,
    pub queue_entry_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QueueEntryRow {
    pub id: String,
    pub barbershop_id: String,
    pub client_name: String,
    pub client_phone: String,
    pub service_id: String,
    pub travel_minutes: i64,
    pub status: String,
    pub priority_score: Option<f64>,
    pub created_at: String,
    pub notified_at: Option<String>,
}
