use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};

use crate::{queue::QueueEngine, state::AppState};

pub const DEFAULT_TICK_SECONDS: u64 = 60;

/// Periodic driver for the queue engine: every tick, run expiry and a
/// ProcessQueue pass for each shop with the queue enabled. A failing shop is
/// logged and the loop moves on; the worker itself never exits.
pub async fn run(state: AppState, tick_seconds: u64) {
    let mut ticker = interval(Duration::from_secs(tick_seconds.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log::info!("Queue worker started (tick every {tick_seconds}s)");

    loop {
        ticker.tick().await;
        tick(&state).await;
    }
}

async fn tick(state: &AppState) {
    let shops: Vec<String> =
        match sqlx::query_scalar("SELECT barbershop_id FROM queue_settings WHERE enabled = 1")
            .fetch_all(&state.db)
            .await
        {
            Ok(shops) => shops,
            Err(err) => {
                log::error!("Queue worker could not list enabled shops: {err}");
                return;
            }
        };

    let engine = QueueEngine::new(
        state.store.clone(),
        state.gateway.clone(),
        state.events.clone(),
    );

    for shop_id in shops {
        match engine.process(&shop_id, Utc::now()).await {
            Ok(outcome) if outcome.notified > 0 || outcome.expired > 0 => {
                log::info!(
                    "Queue pass for {shop_id}: {} notified, {} expired",
                    outcome.notified,
                    outcome.expired
                );
            }
            Ok(_) => {}
            Err(err) => log::error!("Queue pass failed for {shop_id}: {err}"),
        }
    }
}
