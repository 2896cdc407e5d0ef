//! Delivery coordinator: owns the publish path.
//!
//! A submitted message is durably cached before the first publish attempt,
//! published with bounded exponential backoff on transient broker failures,
//! and only acknowledged to the caller once the broker confirmed the publish
//! or the message was explicitly marked Failed. There are no silent drops.
//!
//! Concurrency: submits run independently and each message id is owned by
//! exactly one `submit` call, so per-message progression is sequential and
//! non-reentrant without extra locking. Retry waits suspend the task, they
//! never block other in-flight submissions.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use broker_client::BrokerClient;

use crate::cache::CacheStore;
use crate::error::{DeliveryError, DeliveryResult};
use crate::metrics;
use crate::models::{CacheEntry, DeliveryRecord, DeliveryState, Message, MessageEnvelope};
use crate::services::encryption::EncryptionService;
use crate::services::user_store::UserStore;

/// Bounded exponential backoff for transient publish failures.
#[derive(Debug, Clone)]
pub struct PublishRetryConfig {
    /// Total publish attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Add random jitter to each delay (±30%)
    pub jitter: bool,
}

impl Default for PublishRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl PublishRetryConfig {
    /// Delay before the retry that follows `attempt` (1-based).
    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.base_delay.as_millis() as f64 * exp)
            .min(self.max_delay.as_millis() as f64);

        let millis = if self.jitter {
            let factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
            millis * factor
        } else {
            millis
        };

        Duration::from_millis(millis as u64)
    }
}

pub struct DeliveryCoordinator {
    broker: Arc<dyn BrokerClient>,
    cache: Arc<dyn CacheStore>,
    users: Arc<dyn UserStore>,
    encryption: Arc<EncryptionService>,
    topic: String,
    retry: PublishRetryConfig,
    submit_timeout: Duration,
    /// Coordinator-owned message lifecycle, keyed by message id
    messages: DashMap<Uuid, Message>,
    /// Live in-flight publish tracking
    records: DashMap<Uuid, DeliveryRecord>,
    /// Records retained for operator inspection after a terminal failure
    failed: DashMap<Uuid, DeliveryRecord>,
}

impl DeliveryCoordinator {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        cache: Arc<dyn CacheStore>,
        users: Arc<dyn UserStore>,
        encryption: Arc<EncryptionService>,
        topic: String,
        retry: PublishRetryConfig,
        submit_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            cache,
            users,
            encryption,
            topic,
            retry,
            submit_timeout,
            messages: DashMap::new(),
            records: DashMap::new(),
            failed: DashMap::new(),
        }
    }

    /// Submit a message for delivery using the configured default deadline.
    pub async fn submit(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        payload: &[u8],
    ) -> DeliveryResult<Uuid> {
        self.submit_with_deadline(sender_id, receiver_id, payload, self.submit_timeout)
            .await
    }

    /// Submit a message for delivery.
    ///
    /// Returns the message id once the broker confirmed the publish. Any
    /// error after validation leaves the cache entry in place as evidence
    /// the message was accepted, and leaves the message in the Failed state.
    pub async fn submit_with_deadline(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        payload: &[u8],
        deadline: Duration,
    ) -> DeliveryResult<Uuid> {
        // Reject synchronously before any side effect
        if sender_id.is_nil() {
            return Err(DeliveryError::Validation("senderId is missing".into()));
        }
        if receiver_id.is_nil() {
            return Err(DeliveryError::Validation("receiverId is missing".into()));
        }
        if payload.is_empty() {
            return Err(DeliveryError::Validation("payload is empty".into()));
        }

        if !self.users.exists(sender_id).await? {
            return Err(DeliveryError::UnknownParty(sender_id));
        }
        if !self.users.exists(receiver_id).await? {
            return Err(DeliveryError::UnknownParty(receiver_id));
        }

        let message_id = Uuid::new_v4();
        let ciphertext = self.encryption.encrypt(sender_id, receiver_id, payload)?;
        let payload_b64 = STANDARD.encode(&ciphertext);

        // The cache write must complete before any publish attempt so a
        // later-reported failure still leaves a queryable audit record.
        let entry = CacheEntry {
            message_id,
            payload: payload_b64.clone(),
        };
        self.cache
            .put_latest(sender_id, receiver_id, &entry)
            .await?;

        let message = Message::new(message_id, sender_id, receiver_id, ciphertext);
        let envelope = MessageEnvelope {
            message_id,
            sender_id,
            receiver_id,
            payload: payload_b64,
            created_at: message.created_at,
        };
        let envelope_bytes = serde_json::to_vec(&envelope)
            .map_err(|e| DeliveryError::Internal(format!("serialize envelope: {e}")))?;
        self.messages.insert(message_id, message);
        metrics::MESSAGES_SUBMITTED.inc();

        metrics::INFLIGHT_PUBLISHES.inc();
        let result = self
            .publish_with_retry(message_id, sender_id, receiver_id, &envelope_bytes, deadline)
            .await;
        metrics::INFLIGHT_PUBLISHES.dec();
        result
    }

    /// Publish with retry-on-transient-failure under a deadline.
    async fn publish_with_retry(
        &self,
        message_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        envelope: &[u8],
        deadline: Duration,
    ) -> DeliveryResult<Uuid> {
        let key = Message::pair_key(sender_id, receiver_id);
        let deadline_at = Instant::now() + deadline;
        self.records.insert(message_id, DeliveryRecord::new(message_id));

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if let Some(mut record) = self.records.get_mut(&message_id) {
                record.attempts = attempt;
            }

            // The deadline bounds the publish await itself, not just the
            // backoff waits; a broker that hangs past the deadline still
            // yields Timeout. The abandoned send may yet land, which the
            // consumer-side dedup absorbs.
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            let outcome = match tokio::time::timeout(
                remaining,
                self.broker.publish(&self.topic, &key, envelope),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.records.remove(&message_id);
                    self.set_state(message_id, DeliveryState::Failed);
                    metrics::MESSAGES_FAILED.inc();
                    warn!(
                        message_id = %message_id,
                        attempt,
                        "submit deadline exceeded during publish"
                    );
                    return Err(DeliveryError::Timeout { attempts: attempt });
                }
            };

            match outcome {
                Ok(()) => {
                    self.set_state(message_id, DeliveryState::Published);
                    self.records.remove(&message_id);
                    self.set_state(message_id, DeliveryState::Acknowledged);
                    metrics::MESSAGES_ACKNOWLEDGED.inc();
                    info!(message_id = %message_id, attempt, "message published and acknowledged");
                    return Ok(message_id);
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff_for_attempt(attempt);
                    let remaining = deadline_at.saturating_duration_since(Instant::now());
                    if delay >= remaining {
                        // Deadline would expire mid-wait; stop retrying now
                        // and clean up the live record rather than leave a
                        // dangling retry running past cancellation.
                        self.records.remove(&message_id);
                        self.set_state(message_id, DeliveryState::Failed);
                        metrics::MESSAGES_FAILED.inc();
                        warn!(
                            message_id = %message_id,
                            attempt,
                            "submit deadline exceeded mid-retry"
                        );
                        return Err(DeliveryError::Timeout { attempts: attempt });
                    }

                    if let Some(mut record) = self.records.get_mut(&message_id) {
                        record.last_error = Some(e.to_string());
                        record.next_retry_at =
                            Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
                    }
                    metrics::PUBLISH_RETRIES.inc();
                    debug!(
                        message_id = %message_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient publish failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    // Attempt ceiling reached
                    self.retain_failed(message_id, attempt, &e.to_string());
                    error!(
                        message_id = %message_id,
                        attempts = attempt,
                        error = %e,
                        "publish retries exhausted"
                    );
                    return Err(DeliveryError::PublishExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    // Permanent rejection: retrying will not help
                    self.retain_failed(message_id, attempt, &e.to_string());
                    error!(message_id = %message_id, error = %e, "broker rejected payload");
                    return Err(DeliveryError::Rejected(e.to_string()));
                }
            }
        }
    }

    fn retain_failed(&self, message_id: Uuid, attempts: u32, last_error: &str) {
        self.set_state(message_id, DeliveryState::Failed);
        metrics::MESSAGES_FAILED.inc();
        if let Some((_, mut record)) = self.records.remove(&message_id) {
            record.attempts = attempts;
            record.last_error = Some(last_error.to_string());
            record.next_retry_at = None;
            self.failed.insert(message_id, record);
        }
    }

    fn set_state(&self, message_id: Uuid, state: DeliveryState) {
        if let Some(mut message) = self.messages.get_mut(&message_id) {
            message.state = state;
        }
    }

    pub fn message_state(&self, message_id: Uuid) -> Option<DeliveryState> {
        self.messages.get(&message_id).map(|m| m.state)
    }

    /// Delivery records retained after terminal failure, for inspection.
    pub fn failed_records(&self) -> Vec<DeliveryRecord> {
        self.failed.iter().map(|r| r.clone()).collect()
    }

    pub fn inflight_count(&self) -> usize {
        self.records.len()
    }

    /// Drop terminal messages (and their retained failure records) older
    /// than the retention window. Returns the number of messages removed.
    pub fn sweep_expired(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let expired: Vec<Uuid> = self
            .messages
            .iter()
            .filter(|m| {
                matches!(
                    m.state,
                    DeliveryState::Acknowledged | DeliveryState::Failed
                ) && m.created_at < cutoff
            })
            .map(|m| m.id)
            .collect();

        for id in &expired {
            self.messages.remove(id);
            self.failed.remove(id);
        }
        expired.len()
    }

    /// Background retention sweep; spawn once at process start.
    pub async fn run_retention_sweep(self: Arc<Self>, interval: Duration, retention: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = self.sweep_expired(retention);
            if removed > 0 {
                info!(removed, "retention sweep dropped terminal messages");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression_and_cap() {
        let retry = PublishRetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(retry.backoff_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.backoff_for_attempt(2), Duration::from_millis(400));
        assert_eq!(retry.backoff_for_attempt(3), Duration::from_millis(800));
        assert_eq!(retry.backoff_for_attempt(4), Duration::from_millis(1600));
        // 200ms * 2^9 would be 102s, capped at 5s
        assert_eq!(retry.backoff_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_jitter_stays_bounded() {
        let retry = PublishRetryConfig {
            jitter: true,
            ..Default::default()
        };

        for _ in 0..100 {
            let delay = retry.backoff_for_attempt(2);
            // base 200ms * 2 = 400ms, jitter is ±30%
            assert!(delay >= Duration::from_millis(280));
            assert!(delay <= Duration::from_millis(520));
        }
    }
}
