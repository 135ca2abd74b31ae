use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{admin_validator, new_id},
    error::QueueError,
    models::{EmployeeRow, EmployeeScheduleRow, ServiceRow},
    queue::QueueEngine,
    schedule::parse_hhmm,
    settings::{self, QueueSettings},
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin/api")
            .wrap(HttpAuthentication::basic(admin_validator))
            .service(
                web::resource("/barbershops")
                    .route(web::post().to(create_barbershop))
                    .route(web::get().to(list_barbershops)),
            )
            .service(
                web::resource("/settings/{shop_id}")
                    .route(web::get().to(get_settings))
                    .route(web::put().to(put_settings)),
            )
            .service(web::resource("/queue/{shop_id}").route(web::get().to(list_queue)))
            .service(
                web::resource("/queue/{shop_id}/process").route(web::post().to(process_queue)),
            )
            .service(
                web::resource("/services")
                    .route(web::post().to(create_service)),
            )
            .service(web::resource("/services/{shop_id}").route(web::get().to(list_services)))
            .service(
                web::resource("/services/{id}/deactivate")
                    .route(web::post().to(deactivate_service)),
            )
            .service(web::resource("/employees").route(web::post().to(create_employee)))
            .service(web::resource("/employees/{shop_id}").route(web::get().to(list_employees)))
            .service(
                web::resource("/employees/{id}/deactivate")
                    .route(web::post().to(deactivate_employee)),
            )
            .service(
                web::resource("/employees/{id}/services").route(web::post().to(assign_service)),
            )
            .service(
                web::resource("/employees/{id}/schedules")
                    .route(web::post().to(create_schedule))
                    .route(web::get().to(list_schedules)),
            ),
    );
}

#[derive(Deserialize)]
struct CreateBarbershop {
    name: String,
}

/// A new shop starts with the default (disabled) queue settings row.
async fn create_barbershop(
    state: web::Data<AppState>,
    payload: web::Json<CreateBarbershop>,
) -> Result<HttpResponse, QueueError> {
    if payload.name.trim().is_empty() {
        return Err(QueueError::Validation("barbershop name is required".into()));
    }

    let id = new_id();
    sqlx::query("INSERT INTO barbershops (id, name, created_at) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(payload.name.trim())
        .bind(Utc::now().to_rfc3339())
        .execute(&state.db)
        .await?;
    settings::upsert(&state.db, &id, &QueueSettings::default()).await?;

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

async fn list_barbershops(state: web::Data<AppState>) -> Result<HttpResponse, QueueError> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT id, name FROM barbershops ORDER BY name")
            .fetch_all(&state.db)
            .await?;
    let shops: Vec<_> = rows
        .into_iter()
        .map(|(id, name)| json!({ "id": id, "name": name }))
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "barbershops": shops })))
}

async fn get_settings(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, QueueError> {
    let settings = settings::load(&state.db, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(settings))
}

async fn put_settings(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<QueueSettings>,
) -> Result<HttpResponse, QueueError> {
    let shop_id = path.into_inner();
    // reject unknown shops rather than upserting a row for them
    settings::load(&state.db, &shop_id).await?;
    settings::upsert(&state.db, &shop_id, &payload).await?;
    Ok(HttpResponse::Ok().json(payload.into_inner()))
}

async fn list_queue(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, QueueError> {
    let entries = state.store.list_entries(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "entries": entries })))
}

async fn process_queue(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, QueueError> {
    let engine = QueueEngine::new(
        state.store.clone(),
        state.gateway.clone(),
        state.events.clone(),
    );
    let outcome = engine.process(&path.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

#[derive(Deserialize)]
struct CreateService {
    barbershop_id: String,
    name: String,
    duration_minutes: i64,
    #[serde(default)]
    price_cents: i64,
}

async fn create_service(
    state: web::Data<AppState>,
    payload: web::Json<CreateService>,
) -> Result<HttpResponse, QueueError> {
    if payload.name.trim().is_empty() {
        return Err(QueueError::Validation("service name is required".into()));
    }
    if !(1..=480).contains(&payload.duration_minutes) {
        return Err(QueueError::Validation(
            "duration_minutes must be between 1 and 480".into(),
        ));
    }

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO services (id, barbershop_id, name, duration_minutes, price_cents, active)
           VALUES (?, ?, ?, ?, ?, 1)"#,
    )
    .bind(&id)
    .bind(&payload.barbershop_id)
    .bind(payload.name.trim())
    .bind(payload.duration_minutes)
    .bind(payload.price_cents)
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

async fn list_services(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, QueueError> {
    let rows = sqlx::query_as::<_, ServiceRow>(
        r#"SELECT id, barbershop_id, name, duration_minutes, price_cents, active
           FROM services
           WHERE barbershop_id = ?
           ORDER BY name"#,
    )
    .bind(path.into_inner())
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "services": rows })))
}

async fn deactivate_service(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, QueueError> {
    let result = sqlx::query("UPDATE services SET active = 0 WHERE id = ?")
        .bind(path.into_inner())
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(QueueError::NotFound("service"));
    }
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

#[derive(Deserialize)]
struct CreateEmployee {
    barbershop_id: String,
    display_name: String,
}

async fn create_employee(
    state: web::Data<AppState>,
    payload: web::Json<CreateEmployee>,
) -> Result<HttpResponse, QueueError> {
    if payload.display_name.trim().is_empty() {
        return Err(QueueError::Validation("display_name is required".into()));
    }

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO employees (id, barbershop_id, display_name, active, created_at)
           VALUES (?, ?, ?, 1, ?)"#,
    )
    .bind(&id)
    .bind(&payload.barbershop_id)
    .bind(payload.display_name.trim())
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

async fn list_employees(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, QueueError> {
    let rows = sqlx::query_as::<_, EmployeeRow>(
        r#"SELECT id, barbershop_id, display_name, active, created_at
           FROM employees
           WHERE barbershop_id = ?
           ORDER BY display_name"#,
    )
    .bind(path.into_inner())
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "employees": rows })))
}

async fn deactivate_employee(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, QueueError> {
    let result = sqlx::query("UPDATE employees SET active = 0 WHERE id = ?")
        .bind(path.into_inner())
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(QueueError::NotFound("employee"));
    }
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

#[derive(Deserialize)]
struct AssignService {
    service_id: String,
}

async fn assign_service(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AssignService>,
) -> Result<HttpResponse, QueueError> {
    let employee_id = path.into_inner();
    sqlx::query(
        r#"INSERT INTO employee_services (employee_id, service_id)
           VALUES (?, ?)
           ON CONFLICT(employee_id, service_id) DO NOTHING"#,
    )
    .bind(&employee_id)
    .bind(&payload.service_id)
    .execute(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

#[derive(Deserialize)]
struct CreateSchedule {
    weekday: i64,
    start_time: String,
    end_time: String,
}

async fn create_schedule(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<CreateSchedule>,
) -> Result<HttpResponse, QueueError> {
    if !(0..=6).contains(&payload.weekday) {
        return Err(QueueError::Validation(
            "weekday must be between 0 (Monday) and 6 (Sunday)".into(),
        ));
    }
    let start = parse_hhmm(&payload.start_time).map_err(QueueError::Validation)?;
    let end = parse_hhmm(&payload.end_time).map_err(QueueError::Validation)?;
    if start >= end {
        return Err(QueueError::Validation(
            "start_time must be before end_time".into(),
        ));
    }

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO employee_schedules (id, employee_id, weekday, start_time, end_time, active)
           VALUES (?, ?, ?, ?, ?, 1)"#,
    )
    .bind(&id)
    .bind(path.into_inner())
    .bind(payload.weekday)
    .bind(&payload.start_time)
    .bind(&payload.end_time)
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

async fn list_schedules(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, QueueError> {
    let rows = sqlx::query_as::<_, EmployeeScheduleRow>(
        r#"SELECT id, employee_id, weekday, start_time, end_time, active
           FROM employee_schedules
           WHERE employee_id = ?
           ORDER BY weekday, start_time"#,
    )
    .bind(path.into_inner())
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "schedules": rows })))
}
