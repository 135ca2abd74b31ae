use actix_web::{http::header, web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use serde::Serialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::{
    auth::admin_validator,
    state::{AppState, QueueEvent},
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/admin/api/events")
            .wrap(HttpAuthentication::basic(admin_validator))
            .route(web::get().to(stream_events)),
    )
    .service(web::resource("/api/queue/{id}/events").route(web::get().to(stream_entry_events)));
}

async fn stream_events(state: web::Data<AppState>) -> HttpResponse {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<web::Bytes, actix_web::Error>(event_to_bytes(&event))),
        Err(_) => None,
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

fn event_to_bytes(event: &QueueEvent) -> web::Bytes {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    web::Bytes::from(format!("event: update\ndata: {}\n\n", payload))
}

/// Subset of `QueueEvent` exposed on the unauthenticated per-entry stream.
#[derive(Serialize)]
struct PublicEntryEvent {
    entry_id: String,
    status: String,
    slot_date: Option<String>,
    slot_start: Option<String>,
}

async fn stream_entry_events(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let entry_id = path.into_inner();
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let event = match result {
            Ok(event) => event,
            Err(_) => return None,
        };
        if event.entry_id != entry_id {
            return None;
        }
        let public = PublicEntryEvent {
            entry_id: event.entry_id,
            status: event.status,
            slot_date: event.slot_date,
            slot_start: event.slot_start,
        };
        Some(Ok::<web::Bytes, actix_web::Error>(public_event_to_bytes(
            &public,
        )))
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

fn public_event_to_bytes(event: &PublicEntryEvent) -> web::Bytes {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    web::Bytes::from(format!("event: update\ndata: {}\n\n", payload))
}
