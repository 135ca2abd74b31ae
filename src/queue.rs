//! Queue entry lifecycle: join, periodic processing, confirm, cancel,
//! expire.
//!
//! ProcessQueue is the admission-control step: it rescores every waiting
//! entry, finds reservable slots inside the notification window and greedily
//! notifies the best-scoring entry per slot. Reservation and the status flip
//! are guarded so concurrent passes, client cancels and direct bookings
//! resolve to a single winner per slot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    auth::new_id,
    db::log_activity,
    error::QueueError,
    models::{QueueEntryRow, ENTRY_CANCELLED, ENTRY_EXPIRED, ENTRY_NOTIFIED, ENTRY_WAITING},
    notify::NotificationGateway,
    priority,
    settings::{self, QueueSettings},
    slots::{self, SlotOption},
    state::QueueEvent,
    store::Store,
};

/// Fallback "minutes until slot" used to score entries that currently have
/// no reservable slot; far enough out that their eta component stays near
/// zero until a real slot appears.
const NO_SLOT_GAP_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequest {
    pub barbershop_id: String,
    pub client_name: String,
    pub client_phone: String,
    pub service_id: String,
    pub travel_time_minutes: i64,
}

impl JoinRequest {
    fn validate(&self) -> Result<(), QueueError> {
        let name = self.client_name.trim();
        if name.len() < 3 || name.len() > 100 {
            return Err(QueueError::Validation(
                "client_name must be between 3 and 100 characters".into(),
            ));
        }
        let phone = self.client_phone.trim();
        if phone.len() < 10 || phone.len() > 20 {
            return Err(QueueError::Validation(
                "client_phone must be between 10 and 20 characters".into(),
            ));
        }
        if !(1..=180).contains(&self.travel_time_minutes) {
            return Err(QueueError::Validation(
                "travel_time_minutes must be between 1 and 180".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ProcessOutcome {
    pub notified: usize,
    pub expired: usize,
}

#[derive(Clone)]
pub struct QueueEngine {
    store: Store,
    gateway: Arc<dyn NotificationGateway>,
    events: broadcast::Sender<QueueEvent>,
}

impl QueueEngine {
    pub fn new(
        store: Store,
        gateway: Arc<dyn NotificationGateway>,
        events: broadcast::Sender<QueueEvent>,
    ) -> Self {
        Self {
            store,
            gateway,
            events,
        }
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }

    /// Add a client to the waitlist. At most one active (`waiting` or
    /// `notified`) entry may exist per phone per shop; a second join is
    /// rejected with `DuplicateEntry` carrying the existing entry id.
    pub async fn join(
        &self,
        request: &JoinRequest,
        now: DateTime<Utc>,
    ) -> Result<QueueEntryRow, QueueError> {
        request.validate()?;

        let service = slots::fetch_service(&self.store, &request.service_id)
            .await?
            .filter(|s| s.barbershop_id == request.barbershop_id)
            .ok_or_else(|| QueueError::Validation("unknown service for this barbershop".into()))?;

        let settings = settings::load(self.store.pool(), &request.barbershop_id).await?;
        if !settings.enabled {
            return Err(QueueError::QueueDisabled);
        }

        if let Some(existing) = self
            .store
            .active_entry_for_phone(&request.barbershop_id, request.client_phone.trim())
            .await?
        {
            return Err(QueueError::DuplicateEntry {
                existing_id: existing.id,
            });
        }

        if self.store.waiting_count(&request.barbershop_id).await? >= settings.max_queue_size {
            return Err(QueueError::QueueFull);
        }

        let entry = QueueEntryRow {
            id: new_id(),
            barbershop_id: request.barbershop_id.clone(),
            client_name: request.client_name.trim().to_string(),
            client_phone: request.client_phone.trim().to_string(),
            service_id: service.id,
            travel_minutes: request.travel_time_minutes,
            status: ENTRY_WAITING.to_string(),
            priority_score: None,
            created_at: now.to_rfc3339(),
            notified_at: None,
        };
        self.store.insert_entry(&entry).await?;

        log_activity(
            self.store.pool(),
            "queue_joined",
            &format!("{} joined the queue.", entry.client_name),
            Some(&entry.id),
            None,
        )
        .await;
        self.emit(QueueEvent::from_entry("queue_joined", &entry));

        Ok(entry)
    }

    /// One periodic pass for a barbershop: expire overdue offers, then
    /// greedily notify the best-scoring waiting entries while reservable
    /// slots remain inside the notification window. Idempotent when nothing
    /// is eligible; per-entry failures are logged and skipped, never fatal.
    pub async fn process(
        &self,
        barbershop_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, QueueError> {
        let settings = settings::load(self.store.pool(), barbershop_id).await?;
        let mut outcome = ProcessOutcome::default();
        if !settings.enabled {
            return Ok(outcome);
        }

        outcome.expired = self.expire_overdue(barbershop_id, &settings, now).await?;

        let window = settings.notification_window_minutes();
        let now_minutes = (now.time().hour() * 60 + now.time().minute()) as i64;
        let today = now.date_naive();
        let date_str = today.format("%Y-%m-%d").to_string();

        let mut services = HashMap::new();
        let mut skip: HashSet<String> = HashSet::new();
        let initial_waiting = self
            .store
            .entries_with_status(barbershop_id, ENTRY_WAITING)
            .await?
            .len();
        let max_rounds = initial_waiting * 2 + 4;

        for _ in 0..max_rounds {
            let waiting = self
                .store
                .entries_with_status(barbershop_id, ENTRY_WAITING)
                .await?;
            if waiting.is_empty() {
                break;
            }

            // Rescore everything, then pick the best among entries whose
            // earliest slot starts inside the window.
            let mut best: Option<(f64, QueueEntryRow, SlotOption)> = None;
            for (index, entry) in waiting.iter().enumerate() {
                if skip.contains(&entry.id) {
                    continue;
                }
                let earliest = match self.earliest_slot(&entry.service_id, today, now, &mut services).await {
                    Ok(slot) => slot,
                    Err(err) => {
                        log::error!("Slot lookup failed for entry {}: {err}", entry.id);
                        skip.insert(entry.id.clone());
                        continue;
                    }
                };

                let gap = earliest
                    .as_ref()
                    .map(|slot| slot.start_minutes as i64 - now_minutes)
                    .unwrap_or(NO_SLOT_GAP_MINUTES);
                let score = priority::score(
                    &settings,
                    entry.travel_minutes,
                    gap,
                    index as u32 + 1,
                    wait_minutes(&entry.created_at, now),
                );
                if let Err(err) = self.store.update_score(&entry.id, score).await {
                    log::error!("Failed to persist score for entry {}: {err}", entry.id);
                }

                let Some(slot) = earliest else {
                    continue;
                };
                if slot.start_minutes as i64 - now_minutes > window {
                    continue;
                }
                let better = match &best {
                    // strictly greater keeps the earliest created_at on ties
                    Some((best_score, _, _)) => score > *best_score,
                    None => true,
                };
                if better {
                    best = Some((score, entry.clone(), slot));
                }
            }

            let Some((score, entry, slot)) = best else {
                break;
            };

            match self.notify_entry(&entry, &slot, &date_str, score, now).await {
                Ok(true) => outcome.notified += 1,
                // lost the slot or the entry; next round recomputes
                Ok(false) => {}
                Err(QueueError::SlotConflict) => {
                    log::info!(
                        "Reservation race lost for entry {} at {}; retrying with next candidate",
                        entry.id,
                        slot.start_time
                    );
                }
                Err(err) => {
                    log::error!("Failed to notify entry {}: {err}", entry.id);
                    skip.insert(entry.id.clone());
                }
            }
        }

        Ok(outcome)
    }

    /// Reserve the slot and flip the entry to `notified`. Returns false when
    /// the entry was concurrently closed; the fresh reservation is deleted
    /// again so no cancelled entry keeps a hold.
    async fn notify_entry(
        &self,
        entry: &QueueEntryRow,
        slot: &SlotOption,
        date: &str,
        score: f64,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let service = slots::fetch_service(&self.store, &entry.service_id)
            .await?
            .ok_or(QueueError::NotFound("service"))?;
        let end_minutes = slot.start_minutes + service.duration_minutes.max(0) as u32;

        let Some(reservation) = self
            .store
            .reserve_and_notify(
                entry,
                &slot.employee_id,
                date,
                slot.start_minutes,
                end_minutes,
                &now.to_rfc3339(),
            )
            .await?
        else {
            // the entry was cancelled mid-pass; the hold rolled back with it
            return Ok(false);
        };

        log_activity(
            self.store.pool(),
            "queue_notified",
            &format!(
                "{} offered {} at {} (score {score:.3}).",
                entry.client_name, reservation.date, reservation.start_time
            ),
            Some(&entry.id),
            Some(&reservation.id),
        )
        .await;

        let mut notified = entry.clone();
        notified.status = ENTRY_NOTIFIED.to_string();
        notified.notified_at = Some(now.to_rfc3339());
        notified.priority_score = Some(score);
        self.emit(
            QueueEvent::from_entry("queue_notified", &notified).with_slot(
                &reservation.date,
                &reservation.start_time,
                &reservation.employee_id,
            ),
        );

        // Fire-and-forget: a stuck push endpoint must not stall the pass.
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            if let Err(err) = gateway.notify(&notified, &reservation).await {
                log::warn!("Notification dispatch failed for {}: {err}", notified.id);
            }
        });

        Ok(true)
    }

    /// Promote the reserved slot into a pending appointment. Only valid from
    /// `notified`.
    pub async fn confirm(&self, entry_id: &str) -> Result<QueueEntryRow, QueueError> {
        if !self.store.confirm_entry(entry_id).await? {
            return Err(self.state_error(entry_id).await?);
        }

        let entry = self
            .store
            .fetch_entry(entry_id)
            .await?
            .ok_or(QueueError::NotFound("queue entry"))?;

        log_activity(
            self.store.pool(),
            "queue_confirmed",
            &format!("{} confirmed their slot.", entry.client_name),
            Some(&entry.id),
            None,
        )
        .await;
        self.emit(QueueEvent::from_entry("queue_confirmed", &entry));
        Ok(entry)
    }

    /// Client-initiated leave. Valid from `waiting` or `notified`; any
    /// reservation is freed in the same transaction.
    pub async fn cancel(&self, entry_id: &str) -> Result<QueueEntryRow, QueueError> {
        if !self.store.close_entry(entry_id, ENTRY_CANCELLED).await? {
            return Err(self.state_error(entry_id).await?);
        }

        let entry = self
            .store
            .fetch_entry(entry_id)
            .await?
            .ok_or(QueueError::NotFound("queue entry"))?;

        log_activity(
            self.store.pool(),
            "queue_cancelled",
            &format!("{} left the queue.", entry.client_name),
            Some(&entry.id),
            None,
        )
        .await;
        self.emit(QueueEvent::from_entry("queue_cancelled", &entry));
        Ok(entry)
    }

    async fn expire_overdue(
        &self,
        barbershop_id: &str,
        settings: &QueueSettings,
        now: DateTime<Utc>,
    ) -> Result<usize, QueueError> {
        let mut expired = 0;
        for entry in self
            .store
            .entries_with_status(barbershop_id, ENTRY_NOTIFIED)
            .await?
        {
            let Some(notified_at) = entry.notified_at.as_deref() else {
                log::warn!("Notified entry {} has no notified_at timestamp", entry.id);
                continue;
            };
            let overdue = match DateTime::parse_from_rfc3339(notified_at) {
                Ok(ts) => (now - ts.with_timezone(&Utc)).num_minutes() >= settings.notification_minutes,
                Err(err) => {
                    log::warn!("Unparseable notified_at on entry {}: {err}", entry.id);
                    continue;
                }
            };
            if !overdue {
                continue;
            }
            match self.store.close_entry(&entry.id, ENTRY_EXPIRED).await {
                Ok(true) => {
                    expired += 1;
                    let mut closed = entry.clone();
                    closed.status = ENTRY_EXPIRED.to_string();
                    log_activity(
                        self.store.pool(),
                        "queue_expired",
                        &format!("Offer for {} expired unanswered.", entry.client_name),
                        Some(&entry.id),
                        None,
                    )
                    .await;
                    self.emit(QueueEvent::from_entry("queue_expired", &closed));
                }
                Ok(false) => {}
                Err(err) => log::error!("Failed to expire entry {}: {err}", entry.id),
            }
        }
        Ok(expired)
    }

    /// Map a failed transition to `NotFound` or `InvalidState`.
    async fn state_error(&self, entry_id: &str) -> Result<QueueError, QueueError> {
        Ok(match self.store.fetch_entry(entry_id).await? {
            Some(entry) => QueueError::InvalidState {
                status: entry.status,
            },
            None => QueueError::NotFound("queue entry"),
        })
    }

    async fn earliest_slot(
        &self,
        service_id: &str,
        today: chrono::NaiveDate,
        now: DateTime<Utc>,
        services: &mut HashMap<String, crate::models::ServiceRow>,
    ) -> Result<Option<SlotOption>, QueueError> {
        let service = match services.get(service_id) {
            Some(service) => service.clone(),
            None => {
                let service = slots::fetch_service(&self.store, service_id)
                    .await?
                    .ok_or(QueueError::NotFound("service"))?;
                services.insert(service_id.to_string(), service.clone());
                service
            }
        };
        let options = slots::available_slots(&self.store, &service, today, None, now, 0).await?;
        Ok(options.into_iter().next())
    }
}

fn wait_minutes(created_at: &str, now: DateTime<Utc>) -> i64 {
    match DateTime::parse_from_rfc3339(created_at) {
        Ok(ts) => (now - ts.with_timezone(&Utc)).num_minutes().max(0),
        Err(_) => 0,
    }
}
