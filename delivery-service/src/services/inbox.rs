//! Receiver-facing delivery target: a per-receiver Redis inbox list.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;
use uuid::Uuid;

use crate::services::dispatcher::DeliveryCallback;

fn inbox_key(receiver_id: Uuid) -> String {
    format!("inbox:{}", receiver_id)
}

/// Pushes delivered payloads onto `inbox:{receiver}` for client pickup.
pub struct ReceiverInbox {
    conn: ConnectionManager,
}

impl ReceiverInbox {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DeliveryCallback for ReceiverInbox {
    async fn deliver(
        &self,
        receiver_id: Uuid,
        message_id: Uuid,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        let entry = serde_json::json!({
            "messageId": message_id,
            "payload": base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                payload,
            ),
        });

        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(inbox_key(receiver_id), entry.to_string())
            .await?;

        info!(message_id = %message_id, receiver_id = %receiver_id, "message delivered to inbox");
        Ok(())
    }
}
