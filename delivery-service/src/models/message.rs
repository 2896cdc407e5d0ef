use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery lifecycle of a submitted message.
///
/// Advanced only by the coordinator; the dispatcher reads and forwards but
/// never mutates a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Accepted and cached, publish not yet confirmed
    Pending,
    /// Broker confirmed the publish
    Published,
    /// Caller acknowledged, delivery record discarded
    Acknowledged,
    /// Retries exhausted, rejected, or deadline exceeded
    Failed,
}

/// A message owned by the delivery coordinator.
///
/// The id is immutable and serves as the idempotency key for both cache
/// writes and broker publish deduplication.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    /// Encrypted payload bytes, identical to what is cached and published
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub state: DeliveryState,
}

impl Message {
    pub fn new(id: Uuid, sender_id: Uuid, receiver_id: Uuid, payload: Vec<u8>) -> Self {
        Self {
            id,
            sender_id,
            receiver_id,
            payload,
            created_at: Utc::now(),
            state: DeliveryState::Pending,
        }
    }

    /// Partition key: keeps all traffic between one pair on one partition so
    /// intra-pair ordering survives the broker.
    pub fn pair_key(sender_id: Uuid, receiver_id: Uuid) -> String {
        format!("{}:{}", sender_id, receiver_id)
    }
}

/// In-flight publish tracking, one per message, coordinator-owned.
///
/// Created on the first publish attempt, dropped on acknowledgement, and
/// retained for operator inspection when attempts are exhausted.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub message_id: Uuid,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    pub fn new(message_id: Uuid) -> Self {
        Self {
            message_id,
            attempts: 0,
            last_error: None,
            next_retry_at: None,
        }
    }
}

/// Latest accepted payload for a (sender, receiver) pair.
///
/// Written before every publish attempt and overwritten by newer messages
/// between the same pair, so it always names the most recently *accepted*
/// (not necessarily delivered) message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub message_id: Uuid,
    /// Base64 ciphertext, same bytes the broker carries
    pub payload: String,
}

/// Wire envelope published to the broker and consumed by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    /// Base64 ciphertext
    pub payload: String,
    pub created_at: DateTime<Utc>,
}
