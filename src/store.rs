use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    auth::new_id,
    error::QueueError,
    models::{
        AppointmentRow, QueueEntryRow, APPT_CANCELLED, APPT_PENDING, APPT_QUEUE_RESERVED,
        ENTRY_CONFIRMED, ENTRY_NOTIFIED, ENTRY_WAITING,
    },
    schedule::format_hhmm,
};

/// Repository for appointments and queue entries. Slot reservation is the
/// transactional boundary behind the no-overlap invariant: the free check
/// and the insert commit together or not at all.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn find_appointments(
        &self,
        employee_id: &str,
        date: &str,
    ) -> Result<Vec<AppointmentRow>, QueueError> {
        let rows = sqlx::query_as::<_, AppointmentRow>(
            r#"SELECT id, barbershop_id, employee_id, service_id, date, start_time, end_time,
                      status, client_name, client_phone, queue_entry_id, created_at
               FROM appointments
               WHERE employee_id = ? AND date = ? AND status != ?
               ORDER BY start_time"#,
        )
        .bind(employee_id)
        .bind(date)
        .bind(APPT_CANCELLED)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Create a `queue_reserved` hold for `entry` on the given slot. Fails
    /// with `SlotConflict` if any non-cancelled appointment overlaps the
    /// interval; the unique (employee, date, start) index backstops
    /// exact-start races that slip between check and insert.
    pub async fn reserve_slot(
        &self,
        entry: &QueueEntryRow,
        employee_id: &str,
        date: &str,
        start_minutes: u32,
        end_minutes: u32,
    ) -> Result<AppointmentRow, QueueError> {
        let mut tx = self.pool.begin().await?;
        let appointment =
            insert_reservation(&mut tx, entry, employee_id, date, start_minutes, end_minutes)
                .await?;
        tx.commit().await?;
        Ok(appointment)
    }

    /// Reserve the slot and flip the entry `waiting -> notified` in one
    /// transaction, so a hold can never outlive a failed status update.
    /// Returns `Ok(None)` when the entry left `waiting` concurrently; the
    /// reservation rolls back with it.
    pub async fn reserve_and_notify(
        &self,
        entry: &QueueEntryRow,
        employee_id: &str,
        date: &str,
        start_minutes: u32,
        end_minutes: u32,
        notified_at: &str,
    ) -> Result<Option<AppointmentRow>, QueueError> {
        let mut tx = self.pool.begin().await?;
        let appointment =
            insert_reservation(&mut tx, entry, employee_id, date, start_minutes, end_minutes)
                .await?;

        let moved = sqlx::query(
            "UPDATE queue_entries SET status = ?, notified_at = ? WHERE id = ? AND status = ?",
        )
        .bind(ENTRY_NOTIFIED)
        .bind(notified_at)
        .bind(&entry.id)
        .bind(ENTRY_WAITING)
        .execute(&mut *tx)
        .await?;

        if moved.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(appointment))
    }

    /// Promote a `queue_reserved` hold into a real pending appointment.
    pub async fn promote_to_appointment(&self, appointment_id: &str) -> Result<(), QueueError> {
        let result = sqlx::query("UPDATE appointments SET status = ? WHERE id = ? AND status = ?")
            .bind(APPT_PENDING)
            .bind(appointment_id)
            .bind(APPT_QUEUE_RESERVED)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound("reservation"));
        }
        Ok(())
    }

    /// Drop a reservation, returning its slot to general availability.
    pub async fn delete_reservation(&self, appointment_id: &str) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM appointments WHERE id = ? AND status = ?")
            .bind(appointment_id)
            .bind(APPT_QUEUE_RESERVED)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn reservation_for_entry(
        &self,
        queue_entry_id: &str,
    ) -> Result<Option<AppointmentRow>, QueueError> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            r#"SELECT id, barbershop_id, employee_id, service_id, date, start_time, end_time,
                      status, client_name, client_phone, queue_entry_id, created_at
               FROM appointments
               WHERE queue_entry_id = ? AND status = ?
               LIMIT 1"#,
        )
        .bind(queue_entry_id)
        .bind(APPT_QUEUE_RESERVED)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn fetch_entry(&self, entry_id: &str) -> Result<Option<QueueEntryRow>, QueueError> {
        let row = sqlx::query_as::<_, QueueEntryRow>(
            r#"SELECT id, barbershop_id, client_name, client_phone, service_id, travel_minutes,
                      status, priority_score, created_at, notified_at
               FROM queue_entries
               WHERE id = ?"#,
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn insert_entry(&self, entry: &QueueEntryRow) -> Result<(), QueueError> {
        sqlx::query(
            r#"INSERT INTO queue_entries
               (id, barbershop_id, client_name, client_phone, service_id, travel_minutes,
                status, priority_score, created_at, notified_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&entry.id)
        .bind(&entry.barbershop_id)
        .bind(&entry.client_name)
        .bind(&entry.client_phone)
        .bind(&entry.service_id)
        .bind(entry.travel_minutes)
        .bind(&entry.status)
        .bind(entry.priority_score)
        .bind(&entry.created_at)
        .bind(&entry.notified_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn waiting_count(&self, barbershop_id: &str) -> Result<i64, QueueError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_entries WHERE barbershop_id = ? AND status = ?",
        )
        .bind(barbershop_id)
        .bind(ENTRY_WAITING)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// An active entry is `waiting` or `notified`; at most one may exist per
    /// client phone per shop.
    pub async fn active_entry_for_phone(
        &self,
        barbershop_id: &str,
        client_phone: &str,
    ) -> Result<Option<QueueEntryRow>, QueueError> {
        let row = sqlx::query_as::<_, QueueEntryRow>(
            r#"SELECT id, barbershop_id, client_name, client_phone, service_id, travel_minutes,
                      status, priority_score, created_at, notified_at
               FROM queue_entries
               WHERE barbershop_id = ? AND client_phone = ? AND status IN ('waiting', 'notified')
               LIMIT 1"#,
        )
        .bind(barbershop_id)
        .bind(client_phone)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn entries_with_status(
        &self,
        barbershop_id: &str,
        status: &str,
    ) -> Result<Vec<QueueEntryRow>, QueueError> {
        let rows = sqlx::query_as::<_, QueueEntryRow>(
            r#"SELECT id, barbershop_id, client_name, client_phone, service_id, travel_minutes,
                      status, priority_score, created_at, notified_at
               FROM queue_entries
               WHERE barbershop_id = ? AND status = ?
               ORDER BY created_at"#,
        )
        .bind(barbershop_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_entries(
        &self,
        barbershop_id: &str,
    ) -> Result<Vec<QueueEntryRow>, QueueError> {
        let rows = sqlx::query_as::<_, QueueEntryRow>(
            r#"SELECT id, barbershop_id, client_name, client_phone, service_id, travel_minutes,
                      status, priority_score, created_at, notified_at
               FROM queue_entries
               WHERE barbershop_id = ?
               ORDER BY created_at DESC"#,
        )
        .bind(barbershop_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update_score(&self, entry_id: &str, score: f64) -> Result<(), QueueError> {
        sqlx::query("UPDATE queue_entries SET priority_score = ? WHERE id = ?")
            .bind(score)
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Confirm in one transaction: the entry moves `notified -> confirmed`
    /// and its reservation is promoted to a pending appointment. Returns
    /// false when the entry was not `notified`, leaving the store untouched.
    pub async fn confirm_entry(&self, entry_id: &str) -> Result<bool, QueueError> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            "UPDATE queue_entries SET status = ? WHERE id = ? AND status = ?",
        )
        .bind(ENTRY_CONFIRMED)
        .bind(entry_id)
        .bind(ENTRY_NOTIFIED)
        .execute(&mut *tx)
        .await?;

        if moved.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE appointments SET status = ? WHERE queue_entry_id = ? AND status = ?",
        )
        .bind(APPT_PENDING)
        .bind(entry_id)
        .bind(APPT_QUEUE_RESERVED)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Cancel or expire in one transaction: the entry leaves the active set
    /// and any linked reservation is deleted, so a closed entry can never
    /// hold a dangling `queue_reserved` appointment. Returns false when the
    /// entry was neither `waiting` nor `notified`.
    pub async fn close_entry(&self, entry_id: &str, to_status: &str) -> Result<bool, QueueError> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            "UPDATE queue_entries SET status = ? WHERE id = ? AND status IN (?, ?)",
        )
        .bind(to_status)
        .bind(entry_id)
        .bind(ENTRY_WAITING)
        .bind(ENTRY_NOTIFIED)
        .execute(&mut *tx)
        .await?;

        if moved.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM appointments WHERE queue_entry_id = ? AND status = ?")
            .bind(entry_id)
            .bind(APPT_QUEUE_RESERVED)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// 1-based count of waiting entries created no later than this one.
    pub async fn queue_position(&self, entry: &QueueEntryRow) -> Result<i64, QueueError> {
        let ahead: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM queue_entries
               WHERE barbershop_id = ? AND status = ?
                 AND (created_at < ? OR (created_at = ? AND id <= ?))"#,
        )
        .bind(&entry.barbershop_id)
        .bind(ENTRY_WAITING)
        .bind(&entry.created_at)
        .bind(&entry.created_at)
        .bind(&entry.id)
        .fetch_one(&self.pool)
        .await?;
        Ok(ahead.max(1))
    }
}

async fn insert_reservation(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entry: &QueueEntryRow,
    employee_id: &str,
    date: &str,
    start_minutes: u32,
    end_minutes: u32,
) -> Result<AppointmentRow, QueueError> {
    let start_time = format_hhmm(start_minutes);
    let end_time = format_hhmm(end_minutes);

    let clash: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM appointments
           WHERE employee_id = ? AND date = ? AND status != ?
             AND start_time < ? AND end_time > ?"#,
    )
    .bind(employee_id)
    .bind(date)
    .bind(APPT_CANCELLED)
    .bind(&end_time)
    .bind(&start_time)
    .fetch_one(&mut **tx)
    .await?;

    if clash > 0 {
        return Err(QueueError::SlotConflict);
    }

    let appointment = AppointmentRow {
        id: new_id(),
        barbershop_id: entry.barbershop_id.clone(),
        employee_id: employee_id.to_string(),
        service_id: entry.service_id.clone(),
        date: date.to_string(),
        start_time,
        end_time,
        status: APPT_QUEUE_RESERVED.to_string(),
        client_name: entry.client_name.clone(),
        client_phone: entry.client_phone.clone(),
        queue_entry_id: Some(entry.id.clone()),
        created_at: Utc::now().to_rfc3339(),
    };

    let inserted = sqlx::query(
        r#"INSERT INTO appointments
           (id, barbershop_id, employee_id, service_id, date, start_time, end_time,
            status, client_name, client_phone, queue_entry_id, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&appointment.id)
    .bind(&appointment.barbershop_id)
    .bind(&appointment.employee_id)
    .bind(&appointment.service_id)
    .bind(&appointment.date)
    .bind(&appointment.start_time)
    .bind(&appointment.end_time)
    .bind(&appointment.status)
    .bind(&appointment.client_name)
    .bind(&appointment.client_phone)
    .bind(&appointment.queue_entry_id)
    .bind(&appointment.created_at)
    .execute(&mut **tx)
    .await;

    match inserted {
        Ok(_) => Ok(appointment),
        Err(err) if is_unique_violation(&err) => Err(QueueError::SlotConflict),
        Err(err) => Err(err.into()),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}
