//! HTTP surface checks: status-code mapping for the public queue API.

use std::str::FromStr;
use std::sync::Arc;

use actix_web::{test, web, App};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use cutline::auth::new_id;
use cutline::notify::PushGateway;
use cutline::settings::{self, QueueSettings};
use cutline::state::{AppState, PushConfig};
use cutline::store::Store;
use cutline::{db, routes};

async fn test_state() -> (AppState, String, String) {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
    let pool: SqlitePool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();

    let shop_id = new_id();
    sqlx::query("INSERT INTO barbershops (id, name, created_at) VALUES (?, 'Test Shop', ?)")
        .bind(&shop_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .unwrap();
    let queue_settings = QueueSettings {
        enabled: true,
        ..QueueSettings::default()
    };
    settings::upsert(&pool, &shop_id, &queue_settings)
        .await
        .unwrap();

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

    let (events, _) = broadcast::channel(16);
    let push = PushConfig {
        public_key: String::new(),
        private_key: String::new(),
        subject: String::new(),
    };
    let state = AppState {
        db: pool.clone(),
        store: Store::new(pool.clone()),
        events,
        gateway: Arc::new(PushGateway::new(pool, push)),
    };
    (state, shop_id, service_id)
}

#[actix_web::test]
async fn health_is_open() {
    let (state, _, _) = test_state().await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(routes::public::configure),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert!(resp.status().is_success());
}

#[actix_web::test]
async fn join_maps_validation_errors_to_400() {
    let (state, shop_id, service_id) = test_state().await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(routes::public::configure),
    )
    .await;

    let payload = json!({
        "barbershop_id": shop_id,
        "client_name": "Al",
        "client_phone": "5551234567",
        "service_id": service_id,
        "travel_time_minutes": 15,
    });
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/queue/join")
            .set_json(&payload)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 400);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "validation_error");
}

#[actix_web::test]
async fn join_then_duplicate_maps_to_409() {
    let (state, shop_id, service_id) = test_state().await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(routes::public::configure),
    )
    .await;

    let payload = json!({
        "barbershop_id": shop_id,
        "client_name": "Alice Example",
        "client_phone": "5551234567",
        "service_id": service_id,
        "travel_time_minutes": 15,
    });

    let first = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/queue/join")
            .set_json(&payload)
            .to_request(),
    )
    .await;
    assert_eq!(first.status().as_u16(), 201);
    let body: Value = test::read_body_json(first).await;
    assert_eq!(body["position"], 1);
    let entry_id = body["entry_id"].as_str().unwrap().to_string();

    let second = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/queue/join")
            .set_json(&payload)
            .to_request(),
    )
    .await;
    assert_eq!(second.status().as_u16(), 409);
    let body: Value = test::read_body_json(second).await;
    assert_eq!(body["error"], "duplicate_entry");
    assert_eq!(body["entry_id"], entry_id.as_str());
}

#[actix_web::test]
async fn unknown_entry_maps_to_404() {
    let (state, _, _) = test_state().await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(routes::public::configure),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/queue/{}", new_id()))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 404);
}

#[actix_web::test]
async fn slots_rejects_dates_beyond_the_horizon() {
    let (state, _, service_id) = test_state().await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(routes::public::configure),
    )
    .await;

    let far = (Utc::now().date_naive() + chrono::Duration::days(45)).format("%Y-%m-%d");
    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/slots?service_id={service_id}&date={far}"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 400);

    let near = (Utc::now().date_naive() + chrono::Duration::days(7)).format("%Y-%m-%d");
    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/slots?service_id={service_id}&date={near}"))
            .to_request(),
    )
    .await;
    // no employees are seeded: an empty slot list, not an error
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["slots"].as_array().unwrap().len(), 0);
}
