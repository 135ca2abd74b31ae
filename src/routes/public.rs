use actix_web::{web, HttpResponse};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::QueueError,
    models::ENTRY_WAITING,
    notify,
    queue::{JoinRequest, QueueEngine},
    schedule, slots,
    state::AppState,
};

/// Dates further out than this are rejected before the allocator runs.
const BOOKING_HORIZON_DAYS: i64 = 30;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/queue/join").route(web::post().to(join)))
        .service(web::resource("/api/queue/{id}").route(web::get().to(entry_status)))
        .service(web::resource("/api/queue/{id}/confirm").route(web::post().to(confirm)))
        .service(web::resource("/api/queue/{id}/cancel").route(web::post().to(cancel)))
        .service(web::resource("/api/queue/{id}/subscribe").route(web::post().to(subscribe)))
        .service(web::resource("/api/slots").route(web::get().to(list_slots)))
        .service(web::resource("/health").route(web::get().to(health)));
}

fn engine(state: &AppState) -> QueueEngine {
    QueueEngine::new(
        state.store.clone(),
        state.gateway.clone(),
        state.events.clone(),
    )
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn join(
    state: web::Data<AppState>,
    payload: web::Json<JoinRequest>,
) -> Result<HttpResponse, QueueError> {
    let entry = engine(&state).join(&payload, Utc::now()).await?;
    let position = state.store.queue_position(&entry).await?;
    Ok(HttpResponse::Created().json(json!({
        "entry_id": entry.id,
        "position": position,
    })))
}

async fn entry_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, QueueError> {
    let entry_id = path.into_inner();
    let entry = state
        .store
        .fetch_entry(&entry_id)
        .await?
        .ok_or(QueueError::NotFound("queue entry"))?;

    let position = if entry.status == ENTRY_WAITING {
        Some(state.store.queue_position(&entry).await?)
    } else {
        None
    };
    let reservation = state.store.reservation_for_entry(&entry.id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "entry": entry,
        "position": position,
        "reservation": reservation.map(|r| json!({
            "date": r.date,
            "start_time": r.start_time,
            "end_time": r.end_time,
            "employee_id": r.employee_id,
        })),
    })))
}

async fn confirm(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, QueueError> {
    let entry = engine(&state).confirm(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "entry": entry })))
}

async fn cancel(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, QueueError> {
    let entry = engine(&state).cancel(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "entry": entry })))
}

async fn subscribe(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, QueueError> {
    let entry_id = path.into_inner();
    if state.store.fetch_entry(&entry_id).await?.is_none() {
        return Err(QueueError::NotFound("queue entry"));
    }

    let raw = String::from_utf8(body.to_vec()).unwrap_or_default();
    if raw.trim().is_empty() {
        return Err(QueueError::Validation("empty subscription payload".into()));
    }

    notify::store_subscription(&state.db, &entry_id, &raw).await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

#[derive(Deserialize)]
struct SlotsQuery {
    service_id: String,
    date: String,
    employee_id: Option<String>,
}

async fn list_slots(
    state: web::Data<AppState>,
    query: web::Query<SlotsQuery>,
) -> Result<HttpResponse, QueueError> {
    let date = NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|_| QueueError::Validation("date must be YYYY-MM-DD".into()))?;

    let now = Utc::now();
    let today = now.date_naive();
    if date < today {
        return Err(QueueError::Validation("date is in the past".into()));
    }
    if (date - today).num_days() > BOOKING_HORIZON_DAYS {
        return Err(QueueError::Validation(format!(
            "date is beyond the {BOOKING_HORIZON_DAYS}-day booking horizon"
        )));
    }

    let service = slots::fetch_service(&state.store, &query.service_id)
        .await?
        .ok_or(QueueError::NotFound("service"))?;

    let options = slots::available_slots(
        &state.store,
        &service,
        date,
        query.employee_id.as_deref(),
        now,
        schedule::ARRIVAL_BUFFER_MINUTES,
    )
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "service_id": service.id,
        "duration_minutes": service.duration_minutes,
        "date": query.date,
        "slots": options,
    })))
}
