use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;

/// Failure modes of the queue and slot engine. `SlotConflict` is recovered
/// inside ProcessQueue and only surfaces if a client races a direct booking.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("{0}")]
    Validation(String),

    #[error("virtual queue is disabled for this barbershop")]
    QueueDisabled,

    #[error("the queue is full")]
    QueueFull,

    #[error("an active queue entry already exists for this phone number")]
    DuplicateEntry { existing_id: String },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("operation not valid while the entry is '{status}'")]
    InvalidState { status: String },

    #[error("the slot was taken by a concurrent reservation")]
    SlotConflict,

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl QueueError {
    fn kind(&self) -> &'static str {
        match self {
            QueueError::Validation(_) => "validation_error",
            QueueError::QueueDisabled => "queue_disabled",
            QueueError::QueueFull => "queue_full",
            QueueError::DuplicateEntry { .. } => "duplicate_entry",
            QueueError::NotFound(_) => "not_found",
            QueueError::InvalidState { .. } => "invalid_state",
            QueueError::SlotConflict => "slot_conflict",
            QueueError::Upstream(_) => "upstream_failure",
            QueueError::Database(_) => "internal_error",
        }
    }
}

impl ResponseError for QueueError {
    fn status_code(&self) -> StatusCode {
        match self {
            QueueError::Validation(_) => StatusCode::BAD_REQUEST,
            QueueError::NotFound(_) => StatusCode::NOT_FOUND,
            QueueError::DuplicateEntry { .. }
            | QueueError::InvalidState { .. }
            | QueueError::SlotConflict => StatusCode::CONFLICT,
            QueueError::QueueDisabled => StatusCode::UNPROCESSABLE_ENTITY,
            QueueError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
            QueueError::Upstream(_) => StatusCode::BAD_GATEWAY,
            QueueError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if matches!(self, QueueError::Database(_)) {
            log::error!("Request failed: {self}");
        }
        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        if let QueueError::DuplicateEntry { existing_id } = self {
            body["entry_id"] = json!(existing_id);
        }
        HttpResponse::build(self.status_code()).json(body)
    }
}
