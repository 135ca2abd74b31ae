//! End-to-end queue engine scenarios against an in-memory SQLite store.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use cutline::auth::new_id;
use cutline::error::QueueError;
use cutline::models::{
    AppointmentRow, QueueEntryRow, APPT_PENDING, APPT_QUEUE_RESERVED, ENTRY_CANCELLED,
    ENTRY_CONFIRMED, ENTRY_EXPIRED, ENTRY_NOTIFIED, ENTRY_WAITING,
};
use cutline::notify::NotificationGateway;
use cutline::queue::{JoinRequest, QueueEngine};
use cutline::settings::{self, QueueSettings};
use cutline::slots;
use cutline::store::Store;

#[derive(Default)]
struct RecordingGateway {
    notified: Mutex<Vec<String>>,
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn notify(
        &self,
        entry: &QueueEntryRow,
        _reservation: &AppointmentRow,
    ) -> Result<(), QueueError> {
        self.notified.lock().unwrap().push(entry.id.clone());
        Ok(())
    }
}

struct Ctx {
    pool: SqlitePool,
    store: Store,
    engine: QueueEngine,
    gateway: Arc<RecordingGateway>,
    shop_id: String,
    service_id: String,
    employee_id: String,
}

/// Monday 2026-03-02 at 10:00 UTC; schedules below are seeded for every
/// weekday so the fixture does not care which day it is.
fn monday_10am() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
}

async fn setup(window: (&str, &str), settings: QueueSettings) -> Ctx {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    cutline::db::run_migrations(&pool).await.unwrap();

    let shop_id = new_id();
    sqlx::query("INSERT INTO barbershops (id, name, created_at) VALUES (?, 'Test Shop', ?)")
        .bind(&shop_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .unwrap();
    settings::upsert(&pool, &shop_id, &settings).await.unwrap();

    let service_id = new_id();
    sqlx::query(
        "INSERT INTO services (id, barbershop_id, name, duration_minutes, price_cents, active)
         VALUES (?, ?, 'Signature Cut', 30, 3500, 1)",
    )
    .bind(&service_id)
    .bind(&shop_id)
    .execute(&pool)
    .await
    .unwrap();

    let employee_id = new_id();
    sqlx::query(
        "INSERT INTO employees (id, barbershop_id, display_name, active, created_at)
         VALUES (?, ?, 'Barber One', 1, ?)",
    )
    .bind(&employee_id)
    .bind(&shop_id)
    .bind(Utc::now().to_rfc3339())
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query("INSERT INTO employee_services (employee_id, service_id) VALUES (?, ?)")
        .bind(&employee_id)
        .bind(&service_id)
        .execute(&pool)
        .await
        .unwrap();

    for weekday in 0..7 {
        sqlx::query(
            "INSERT INTO employee_schedules (id, employee_id, weekday, start_time, end_time, active)
             VALUES (?, ?, ?, ?, ?, 1)",
        )
        .bind(new_id())
        .bind(&employee_id)
        .bind(weekday as i64)
        .bind(window.0)
        .bind(window.1)
        .execute(&pool)
        .await
        .unwrap();
    }

    let store = Store::new(pool.clone());
    let (events, _) = broadcast::channel(64);
    let gateway = Arc::new(RecordingGateway::default());
    let engine = QueueEngine::new(store.clone(), gateway.clone(), events);

    Ctx {
        pool,
        store,
        engine,
        gateway,
        shop_id,
        service_id,
        employee_id,
    }
}

fn enabled_settings() -> QueueSettings {
    QueueSettings {
        enabled: true,
        max_queue_size: 2,
        notification_minutes: 30,
        buffer_percentage: 0,
        eta_weight: 0.6,
        position_weight: 0.4,
        wait_time_bonus: 0.2,
    }
}

fn join_request(ctx: &Ctx, name: &str, phone: &str, travel: i64) -> JoinRequest {
    JoinRequest {
        barbershop_id: ctx.shop_id.clone(),
        client_name: name.to_string(),
        client_phone: phone.to_string(),
        service_id: ctx.service_id.clone(),
        travel_time_minutes: travel,
    }
}

async fn reservation_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM appointments WHERE status = ?")
        .bind(APPT_QUEUE_RESERVED)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn join_rejects_malformed_payloads() {
    let ctx = setup(("09:00", "18:00"), enabled_settings()).await;
    let now = monday_10am();

    let bad_name = join_request(&ctx, "Al", "5551234567", 15);
    assert!(matches!(
        ctx.engine.join(&bad_name, now).await,
        Err(QueueError::Validation(_))
    ));

    let bad_phone = join_request(&ctx, "Alice Example", "12345", 15);
    assert!(matches!(
        ctx.engine.join(&bad_phone, now).await,
        Err(QueueError::Validation(_))
    ));

    let bad_travel = join_request(&ctx, "Alice Example", "5551234567", 0);
    assert!(matches!(
        ctx.engine.join(&bad_travel, now).await,
        Err(QueueError::Validation(_))
    ));

    let bad_service = JoinRequest {
        service_id: new_id(),
        ..join_request(&ctx, "Alice Example", "5551234567", 15)
    };
    assert!(matches!(
        ctx.engine.join(&bad_service, now).await,
        Err(QueueError::Validation(_))
    ));
}

#[tokio::test]
async fn join_fails_when_queue_disabled() {
    let settings = QueueSettings {
        enabled: false,
        ..enabled_settings()
    };
    let ctx = setup(("09:00", "18:00"), settings).await;

    let result = ctx
        .engine
        .join(&join_request(&ctx, "Alice Example", "5551234567", 15), monday_10am())
        .await;
    assert!(matches!(result, Err(QueueError::QueueDisabled)));
}

#[tokio::test]
async fn join_enforces_capacity_and_duplicates() {
    let settings = QueueSettings {
        max_queue_size: 1,
        ..enabled_settings()
    };
    let ctx = setup(("09:00", "18:00"), settings).await;
    let now = monday_10am();

    let first = ctx
        .engine
        .join(&join_request(&ctx, "Alice Example", "5551234567", 15), now)
        .await
        .unwrap();
    assert_eq!(first.status, ENTRY_WAITING);

    // same phone joins again while active
    let dup = ctx
        .engine
        .join(&join_request(&ctx, "Alice Again", "5551234567", 20), now)
        .await;
    match dup {
        Err(QueueError::DuplicateEntry { existing_id }) => assert_eq!(existing_id, first.id),
        other => panic!("expected DuplicateEntry, got {other:?}"),
    }

    // a different client hits the cap
    let full = ctx
        .engine
        .join(&join_request(&ctx, "Bob Example", "5559876543", 15), now)
        .await;
    assert!(matches!(full, Err(QueueError::QueueFull)));
}

#[tokio::test]
async fn process_notifies_best_eta_match_and_confirm_promotes() {
    // one reservable slot: window [10:20, 10:50) fits exactly one
    // 30-minute service, 20 minutes from "now"
    let ctx = setup(("10:20", "10:50"), enabled_settings()).await;
    let now = monday_10am();

    let a = ctx
        .engine
        .join(&join_request(&ctx, "Alice Example", "5551234567", 10), now)
        .await
        .unwrap();
    let b = ctx
        .engine
        .join(
            &join_request(&ctx, "Bob Example", "5559876543", 60),
            now + Duration::seconds(1),
        )
        .await
        .unwrap();

    let outcome = ctx.engine.process(&ctx.shop_id, now).await.unwrap();
    assert_eq!(outcome.notified, 1);
    assert_eq!(outcome.expired, 0);

    // A's 10-minute ETA matches the 20-minute gap better than B's hour
    let a_row = ctx.store.fetch_entry(&a.id).await.unwrap().unwrap();
    let b_row = ctx.store.fetch_entry(&b.id).await.unwrap().unwrap();
    assert_eq!(a_row.status, ENTRY_NOTIFIED);
    assert!(a_row.notified_at.is_some());
    assert_eq!(b_row.status, ENTRY_WAITING);
    assert!(b_row.priority_score.is_some());

    let reservation = ctx.store.reservation_for_entry(&a.id).await.unwrap().unwrap();
    assert_eq!(reservation.status, APPT_QUEUE_RESERVED);
    assert_eq!(reservation.employee_id, ctx.employee_id);
    assert_eq!(reservation.start_time, "10:20");
    assert_eq!(reservation.end_time, "10:50");

    // re-running the pass is a no-op: the only slot is held
    let again = ctx.engine.process(&ctx.shop_id, now).await.unwrap();
    assert_eq!(again.notified, 0);

    // the dispatch is spawned off the pass; yield so it runs
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(*ctx.gateway.notified.lock().unwrap(), vec![a.id.clone()]);

    let confirmed = ctx.engine.confirm(&a.id).await.unwrap();
    assert_eq!(confirmed.status, ENTRY_CONFIRMED);

    let promoted: String =
        sqlx::query_scalar("SELECT status FROM appointments WHERE queue_entry_id = ?")
            .bind(&a.id)
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
    assert_eq!(promoted, APPT_PENDING);

    // confirmed entries no longer count toward capacity: B waiting + A
    // confirmed leaves room under max_queue_size = 2
    let c = ctx
        .engine
        .join(
            &join_request(&ctx, "Cara Example", "5550001111", 15),
            now + Duration::seconds(2),
        )
        .await
        .unwrap();
    assert_eq!(c.status, ENTRY_WAITING);
}

#[tokio::test]
async fn confirm_is_rejected_outside_notified_state() {
    let ctx = setup(("10:20", "10:50"), enabled_settings()).await;
    let now = monday_10am();

    let a = ctx
        .engine
        .join(&join_request(&ctx, "Alice Example", "5551234567", 10), now)
        .await
        .unwrap();

    // still waiting: nothing has been offered yet
    assert!(matches!(
        ctx.engine.confirm(&a.id).await,
        Err(QueueError::InvalidState { .. })
    ));
    assert!(matches!(
        ctx.engine.confirm("no-such-entry").await,
        Err(QueueError::NotFound(_))
    ));

    ctx.engine.process(&ctx.shop_id, now).await.unwrap();
    ctx.engine.confirm(&a.id).await.unwrap();

    // double confirm fails and leaves the appointment pending
    assert!(matches!(
        ctx.engine.confirm(&a.id).await,
        Err(QueueError::InvalidState { .. })
    ));
    let status: String =
        sqlx::query_scalar("SELECT status FROM appointments WHERE queue_entry_id = ?")
            .bind(&a.id)
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
    assert_eq!(status, APPT_PENDING);
}

#[tokio::test]
async fn cancel_frees_the_reservation_exactly_once() {
    let ctx = setup(("10:20", "10:50"), enabled_settings()).await;
    let now = monday_10am();

    let a = ctx
        .engine
        .join(&join_request(&ctx, "Alice Example", "5551234567", 10), now)
        .await
        .unwrap();
    ctx.engine.process(&ctx.shop_id, now).await.unwrap();
    assert_eq!(reservation_count(&ctx.pool).await, 1);

    let cancelled = ctx.engine.cancel(&a.id).await.unwrap();
    assert_eq!(cancelled.status, ENTRY_CANCELLED);
    assert_eq!(reservation_count(&ctx.pool).await, 0);

    // cancelling again is rejected, not double-applied
    assert!(matches!(
        ctx.engine.cancel(&a.id).await,
        Err(QueueError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn unanswered_offers_expire_and_release_the_slot() {
    let ctx = setup(("10:20", "10:50"), enabled_settings()).await;
    let now = monday_10am();

    let a = ctx
        .engine
        .join(&join_request(&ctx, "Alice Example", "5551234567", 10), now)
        .await
        .unwrap();
    ctx.engine.process(&ctx.shop_id, now).await.unwrap();
    assert_eq!(reservation_count(&ctx.pool).await, 1);

    // 31 minutes later the 30-minute response window has lapsed
    let later = now + Duration::minutes(31);
    let outcome = ctx.engine.process(&ctx.shop_id, later).await.unwrap();
    assert_eq!(outcome.expired, 1);

    let a_row = ctx.store.fetch_entry(&a.id).await.unwrap().unwrap();
    assert_eq!(a_row.status, ENTRY_EXPIRED);
    assert_eq!(reservation_count(&ctx.pool).await, 0);
}

#[tokio::test]
async fn waiting_entry_is_not_notified_without_a_slot_in_window() {
    // the only slot starts 100 minutes out, far beyond the 30-minute window
    let ctx = setup(("11:40", "12:10"), enabled_settings()).await;
    let now = monday_10am();

    let a = ctx
        .engine
        .join(&join_request(&ctx, "Alice Example", "5551234567", 10), now)
        .await
        .unwrap();

    let outcome = ctx.engine.process(&ctx.shop_id, now).await.unwrap();
    assert_eq!(outcome.notified, 0);

    let a_row = ctx.store.fetch_entry(&a.id).await.unwrap().unwrap();
    assert_eq!(a_row.status, ENTRY_WAITING);
    // the pass still rescored the entry
    assert!(a_row.priority_score.is_some());
}

#[tokio::test]
async fn overlapping_reservations_lose_the_race() {
    let ctx = setup(("10:00", "12:00"), enabled_settings()).await;
    let now = monday_10am();

    let a = ctx
        .engine
        .join(&join_request(&ctx, "Alice Example", "5551234567", 10), now)
        .await
        .unwrap();
    let b = ctx
        .engine
        .join(
            &join_request(&ctx, "Bob Example", "5559876543", 10),
            now + Duration::seconds(1),
        )
        .await
        .unwrap();

    let date = "2026-03-02";
    ctx.store
        .reserve_slot(&a, &ctx.employee_id, date, 630, 660)
        .await
        .unwrap();

    // exact duplicate start
    assert!(matches!(
        ctx.store
            .reserve_slot(&b, &ctx.employee_id, date, 630, 660)
            .await,
        Err(QueueError::SlotConflict)
    ));
    // straddling overlap: [10:20, 10:50) against the held [10:30, 11:00)
    assert!(matches!(
        ctx.store
            .reserve_slot(&b, &ctx.employee_id, date, 620, 650)
            .await,
        Err(QueueError::SlotConflict)
    ));
    // back-to-back is allowed
    ctx.store
        .reserve_slot(&b, &ctx.employee_id, date, 660, 690)
        .await
        .unwrap();

    let rows: Vec<AppointmentRow> = ctx.store.find_appointments(&ctx.employee_id, date).await.unwrap();
    assert_eq!(rows.len(), 2);
    for pair in rows.windows(2) {
        assert!(pair[0].end_time <= pair[1].start_time);
    }

    // dropping A's hold frees the interval for the next reservation
    let a_hold = ctx.store.reservation_for_entry(&a.id).await.unwrap().unwrap();
    ctx.store.delete_reservation(&a_hold.id).await.unwrap();
    ctx.store
        .reserve_slot(&a, &ctx.employee_id, date, 630, 660)
        .await
        .unwrap();

    // promoting B's hold keeps the interval occupied and is one-shot
    let hold = ctx.store.reservation_for_entry(&b.id).await.unwrap().unwrap();
    ctx.store.promote_to_appointment(&hold.id).await.unwrap();
    assert!(matches!(
        ctx.store.promote_to_appointment(&hold.id).await,
        Err(QueueError::NotFound(_))
    ));
    assert!(matches!(
        ctx.store
            .reserve_slot(&a, &ctx.employee_id, date, 660, 690)
            .await,
        Err(QueueError::SlotConflict)
    ));
}

#[tokio::test]
async fn allocator_merges_employees_and_breaks_ties_by_lowest_id() {
    let ctx = setup(("09:00", "12:00"), enabled_settings()).await;

    // second qualified employee with the same weekly schedule
    let second_id = new_id();
    sqlx::query(
        "INSERT INTO employees (id, barbershop_id, display_name, active, created_at)
         VALUES (?, ?, 'Barber Two', 1, ?)",
    )
    .bind(&second_id)
    .bind(&ctx.shop_id)
    .bind(Utc::now().to_rfc3339())
    .execute(&ctx.pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO employee_services (employee_id, service_id) VALUES (?, ?)")
        .bind(&second_id)
        .bind(&ctx.service_id)
        .execute(&ctx.pool)
        .await
        .unwrap();
    for weekday in 0..7 {
        sqlx::query(
            "INSERT INTO employee_schedules (id, employee_id, weekday, start_time, end_time, active)
             VALUES (?, ?, ?, '09:00', '12:00', 1)",
        )
        .bind(new_id())
        .bind(&second_id)
        .bind(weekday as i64)
        .execute(&ctx.pool)
        .await
        .unwrap();
    }

    let (low_id, high_id) = if ctx.employee_id < second_id {
        (ctx.employee_id.clone(), second_id.clone())
    } else {
        (second_id.clone(), ctx.employee_id.clone())
    };

    // book the lower-id employee 09:00-09:30 so early slots fall to the other
    sqlx::query(
        "INSERT INTO appointments
         (id, barbershop_id, employee_id, service_id, date, start_time, end_time,
          status, client_name, client_phone, queue_entry_id, created_at)
         VALUES (?, ?, ?, ?, '2026-03-03', '09:00', '09:30', 'pending', 'Walk In',
                 '5550002222', NULL, ?)",
    )
    .bind(new_id())
    .bind(&ctx.shop_id)
    .bind(&low_id)
    .bind(&ctx.service_id)
    .bind(Utc::now().to_rfc3339())
    .execute(&ctx.pool)
    .await
    .unwrap();

    let service = slots::fetch_service(&ctx.store, &ctx.service_id)
        .await
        .unwrap()
        .unwrap();
    // tomorrow relative to the fixed clock, so no same-day cutoff applies
    let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
    let options = slots::available_slots(
        &ctx.store,
        &service,
        date,
        None,
        monday_10am(),
        cutline::schedule::ARRIVAL_BUFFER_MINUTES,
    )
    .await
    .unwrap();

    // one option per start time, ascending, covering the whole grid
    let starts: Vec<&str> = options.iter().map(|o| o.start_time.as_str()).collect();
    assert_eq!(starts.first(), Some(&"09:00"));
    assert_eq!(starts.last(), Some(&"11:30"));
    assert_eq!(starts.len(), 16);

    // while the low-id employee is booked, the other one covers the starts
    for option in &options {
        if option.start_time.as_str() < "09:30" {
            assert_eq!(option.employee_id, high_id);
        } else {
            // both free: deterministic tie-break on the lowest id
            assert_eq!(option.employee_id, low_id);
        }
    }
}

#[tokio::test]
async fn process_fills_remaining_slots_greedily() {
    // window [10:20, 11:20) holds two 30-minute slots on the grid at 10:20
    // and 10:50 once overlaps are excluded; the hour-long notification
    // window keeps both reservable in one pass
    let settings = QueueSettings {
        max_queue_size: 5,
        notification_minutes: 60,
        ..enabled_settings()
    };
    let ctx = setup(("10:20", "11:20"), settings).await;
    let now = monday_10am();

    let a = ctx
        .engine
        .join(&join_request(&ctx, "Alice Example", "5551234567", 20), now)
        .await
        .unwrap();
    let b = ctx
        .engine
        .join(
            &join_request(&ctx, "Bob Example", "5559876543", 45),
            now + Duration::seconds(1),
        )
        .await
        .unwrap();
    let c = ctx
        .engine
        .join(
            &join_request(&ctx, "Cara Example", "5550001111", 170),
            now + Duration::seconds(2),
        )
        .await
        .unwrap();

    let outcome = ctx.engine.process(&ctx.shop_id, now).await.unwrap();
    assert_eq!(outcome.notified, 2);

    let a_row = ctx.store.fetch_entry(&a.id).await.unwrap().unwrap();
    let b_row = ctx.store.fetch_entry(&b.id).await.unwrap().unwrap();
    let c_row = ctx.store.fetch_entry(&c.id).await.unwrap().unwrap();
    assert_eq!(a_row.status, ENTRY_NOTIFIED);
    assert_eq!(b_row.status, ENTRY_NOTIFIED);
    assert_eq!(c_row.status, ENTRY_WAITING);

    // the two holds sit on distinct, non-overlapping slots
    let rows = ctx
        .store
        .find_appointments(&ctx.employee_id, "2026-03-02")
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_ne!(rows[0].start_time, rows[1].start_time);
}
