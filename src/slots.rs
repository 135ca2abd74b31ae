//! Aggregates per-employee slot generation into one bookable list for a
//! service and date.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::Serialize;

use crate::{
    error::QueueError,
    models::{EmployeeScheduleRow, ServiceRow},
    schedule::{available_starts, format_hhmm, parse_hhmm},
    store::Store,
};

#[derive(Debug, Clone, Serialize)]
pub struct SlotOption {
    pub start_minutes: u32,
    pub start_time: String,
    pub employee_id: String,
}

/// Weekday index used by `employee_schedules.weekday`: 0 = Monday.
pub fn weekday_index(date: NaiveDate) -> i64 {
    date.weekday().num_days_from_monday() as i64
}

pub async fn fetch_service(
    store: &Store,
    service_id: &str,
) -> Result<Option<ServiceRow>, QueueError> {
    let row = sqlx::query_as::<_, ServiceRow>(
        r#"SELECT id, barbershop_id, name, duration_minutes, price_cents, active
           FROM services
           WHERE id = ? AND active = 1"#,
    )
    .bind(service_id)
    .fetch_optional(store.pool())
    .await?;
    Ok(row)
}

/// All bookable (start, employee) pairs for a service on a date, merged
/// across qualified and active employees.
///
/// `min_lead_minutes` is how far ahead of "now" a same-day slot must start:
/// client-facing listings pass the arrival buffer, the queue engine passes
/// zero. When several employees share a start time, the lowest employee id
/// wins so output is deterministic. Zero qualified employees is an empty
/// result, not an error.
pub async fn available_slots(
    store: &Store,
    service: &ServiceRow,
    date: NaiveDate,
    employee_id: Option<&str>,
    now: DateTime<Utc>,
    min_lead_minutes: u32,
) -> Result<Vec<SlotOption>, QueueError> {
    let date_str = date.format("%Y-%m-%d").to_string();
    let weekday = weekday_index(date);
    let cutoff_minutes = if now.date_naive() == date {
        Some(now.time().hour() * 60 + now.time().minute() + min_lead_minutes)
    } else {
        None
    };

    let mut employee_ids = qualified_employees(store, service).await?;
    if let Some(wanted) = employee_id {
        employee_ids.retain(|id| id == wanted);
    }

    let duration = service.duration_minutes.max(0) as u32;
    let mut options: Vec<SlotOption> = Vec::new();

    for employee in &employee_ids {
        let windows = sqlx::query_as::<_, EmployeeScheduleRow>(
            r#"SELECT id, employee_id, weekday, start_time, end_time, active
               FROM employee_schedules
               WHERE employee_id = ? AND weekday = ? AND active = 1"#,
        )
        .bind(employee)
        .bind(weekday)
        .fetch_all(store.pool())
        .await?;

        if windows.is_empty() {
            continue;
        }

        let booked = booked_intervals(store, employee, &date_str).await?;

        for window in &windows {
            let (start, end) = match (parse_hhmm(&window.start_time), parse_hhmm(&window.end_time))
            {
                (Ok(start), Ok(end)) => (start, end),
                _ => {
                    log::warn!(
                        "Skipping malformed schedule row {} for employee {employee}",
                        window.id
                    );
                    continue;
                }
            };
            for start_minutes in available_starts(start, end, duration, &booked, cutoff_minutes) {
                options.push(SlotOption {
                    start_minutes,
                    start_time: format_hhmm(start_minutes),
                    employee_id: employee.clone(),
                });
            }
        }
    }

    options.sort_by(|a, b| {
        a.start_minutes
            .cmp(&b.start_minutes)
            .then_with(|| a.employee_id.cmp(&b.employee_id))
    });
    options.dedup_by(|next, kept| next.start_minutes == kept.start_minutes);
    Ok(options)
}

async fn qualified_employees(
    store: &Store,
    service: &ServiceRow,
) -> Result<Vec<String>, QueueError> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"SELECT e.id
           FROM employees e
           JOIN employee_services es ON es.employee_id = e.id
           WHERE es.service_id = ? AND e.barbershop_id = ? AND e.active = 1
           ORDER BY e.id"#,
    )
    .bind(&service.id)
    .bind(&service.barbershop_id)
    .fetch_all(store.pool())
    .await?;
    Ok(ids)
}

async fn booked_intervals(
    store: &Store,
    employee_id: &str,
    date: &str,
) -> Result<Vec<(u32, u32)>, QueueError> {
    let mut intervals = Vec::new();
    for appointment in store.find_appointments(employee_id, date).await? {
        match (
            parse_hhmm(&appointment.start_time),
            parse_hhmm(&appointment.end_time),
        ) {
            (Ok(start), Ok(end)) => intervals.push((start, end)),
            _ => log::warn!("Skipping malformed appointment interval {}", appointment.id),
        }
    }
    Ok(intervals)
}
