use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;
use uuid::Uuid;

pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Errors surfaced by the delivery pipeline.
///
/// Transient broker failures are retried inside the coordinator and never
/// appear here below the attempt ceiling; every surfaced variant carries
/// enough detail to distinguish "never attempted" (validation, unknown
/// party) from "attempted and abandoned" (exhausted, rejected, timeout).
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown party: {0}")]
    UnknownParty(Uuid),

    #[error("not found")]
    NotFound,

    #[error("publish retries exhausted after {attempts} attempts: {last_error}")]
    PublishExhausted { attempts: u32, last_error: String },

    #[error("broker rejected payload: {0}")]
    Rejected(String),

    #[error("submit deadline exceeded after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Stable machine-readable reason kind included in every failure response.
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::Config(_) => "config",
            DeliveryError::Validation(_) => "validation",
            DeliveryError::UnknownParty(_) => "unknown_party",
            DeliveryError::NotFound => "not_found",
            DeliveryError::PublishExhausted { .. } => "publish_exhausted",
            DeliveryError::Rejected(_) => "rejected",
            DeliveryError::Timeout { .. } => "timeout",
            DeliveryError::Cache(_) => "cache",
            DeliveryError::Database(_) => "database",
            DeliveryError::Encryption(_) => "encryption",
            DeliveryError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DeliveryError::Validation(_) => StatusCode::BAD_REQUEST,
            DeliveryError::UnknownParty(_) | DeliveryError::NotFound => StatusCode::NOT_FOUND,
            DeliveryError::PublishExhausted { .. } | DeliveryError::Timeout { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ResponseError for DeliveryError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status()).json(serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }))
    }
}
