//! Thin HTTP translation over the delivery coordinator and cache.

use actix_web::{web, HttpResponse};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DeliveryError, DeliveryResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub sender_id: String,
    pub receiver_id: String,
    pub message_content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestMessageResponse {
    pub message_id: Uuid,
    pub message_content: String,
}

fn parse_user_id(field: &str, raw: &str) -> DeliveryResult<Uuid> {
    if raw.trim().is_empty() {
        return Err(DeliveryError::Validation(format!("{field} is missing")));
    }
    Uuid::parse_str(raw.trim())
        .map_err(|_| DeliveryError::Validation(format!("{field} is not a valid UUID")))
}

pub async fn send_message(
    state: web::Data<AppState>,
    body: web::Json<SendMessageRequest>,
) -> DeliveryResult<HttpResponse> {
    let sender_id = parse_user_id("senderId", &body.sender_id)?;
    let receiver_id = parse_user_id("receiverId", &body.receiver_id)?;

    let message_id = state
        .coordinator
        .submit(sender_id, receiver_id, body.message_content.as_bytes())
        .await?;

    Ok(HttpResponse::Created().json(SendMessageResponse { message_id }))
}

/// Audit read: the most recently accepted message for a pair, decrypted.
pub async fn latest_message(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
) -> DeliveryResult<HttpResponse> {
    let (sender_id, receiver_id) = path.into_inner();

    let entry = state
        .cache
        .get_latest(sender_id, receiver_id)
        .await?
        .ok_or(DeliveryError::NotFound)?;

    let ciphertext = STANDARD
        .decode(entry.payload.as_bytes())
        .map_err(|e| DeliveryError::Cache(format!("corrupt cache entry: {e}")))?;
    let plaintext = state
        .encryption
        .decrypt(sender_id, receiver_id, &ciphertext)?;

    Ok(HttpResponse::Ok().json(LatestMessageResponse {
        message_id: entry.message_id,
        message_content: String::from_utf8_lossy(&plaintext).into_owned(),
    }))
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}
