mod common;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use delivery_service::cache::{CacheStore, InMemoryCacheStore};
use delivery_service::error::DeliveryError;
use delivery_service::models::{DeliveryState, MessageEnvelope};
use delivery_service::services::coordinator::{DeliveryCoordinator, PublishRetryConfig};
use delivery_service::services::encryption::EncryptionService;
use delivery_service::services::user_store::InMemoryUserStore;

use common::MockBroker;

const TOPIC: &str = "messages";

struct Fixture {
    broker: Arc<MockBroker>,
    cache: Arc<InMemoryCacheStore>,
    encryption: Arc<EncryptionService>,
    coordinator: DeliveryCoordinator,
    sender: Uuid,
    receiver: Uuid,
}

/// Coordinator wired to in-memory fakes, with fast deterministic backoff.
fn fixture(broker: MockBroker) -> Fixture {
    let broker = Arc::new(broker);
    let cache = Arc::new(InMemoryCacheStore::new());
    let encryption = Arc::new(EncryptionService::new([9u8; 32]));
    let sender = Uuid::new_v4();
    let receiver = Uuid::new_v4();
    let users = Arc::new(InMemoryUserStore::with_users(&[sender, receiver]));

    let retry = PublishRetryConfig {
        max_attempts: 5,
        base_delay: Duration::from_millis(2),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        jitter: false,
    };
    let coordinator = DeliveryCoordinator::new(
        broker.clone(),
        cache.clone(),
        users,
        encryption.clone(),
        TOPIC.to_string(),
        retry,
        Duration::from_secs(5),
    );

    Fixture {
        broker,
        cache,
        encryption,
        coordinator,
        sender,
        receiver,
    }
}

#[tokio::test]
async fn test_submit_publishes_caches_and_acknowledges() {
    let f = fixture(MockBroker::new());

    let id = f
        .coordinator
        .submit(f.sender, f.receiver, b"hello")
        .await
        .unwrap();

    assert_eq!(
        f.coordinator.message_state(id),
        Some(DeliveryState::Acknowledged)
    );
    assert_eq!(f.coordinator.inflight_count(), 0);

    // Cache entry names the acknowledged message and decrypts to the
    // original payload
    let entry = f
        .cache
        .get_latest(f.sender, f.receiver)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.message_id, id);
    let ciphertext = base64::Engine::decode(
        &base64::engine::general_purpose::STANDARD,
        entry.payload.as_bytes(),
    )
    .unwrap();
    assert_eq!(
        f.encryption.decrypt(f.sender, f.receiver, &ciphertext).unwrap(),
        b"hello"
    );

    // Exactly one publish, keyed by the pair, carrying the envelope
    let published = f.broker.published();
    assert_eq!(published.len(), 1);
    let (topic, key, payload) = &published[0];
    assert_eq!(topic, TOPIC);
    assert_eq!(key, &format!("{}:{}", f.sender, f.receiver));
    let envelope: MessageEnvelope = serde_json::from_slice(payload).unwrap();
    assert_eq!(envelope.message_id, id);
    assert_eq!(envelope.sender_id, f.sender);
    assert_eq!(envelope.receiver_id, f.receiver);
}

#[tokio::test]
async fn test_submit_rejects_missing_sender_without_side_effects() {
    let f = fixture(MockBroker::new());

    let err = f
        .coordinator
        .submit(Uuid::nil(), f.receiver, b"hello")
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Validation(_)));
    assert!(f.cache.is_empty());
    assert_eq!(f.broker.attempts(), 0);
}

#[tokio::test]
async fn test_submit_rejects_empty_payload() {
    let f = fixture(MockBroker::new());

    let err = f
        .coordinator
        .submit(f.sender, f.receiver, b"")
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Validation(_)));
    assert!(f.cache.is_empty());
}

#[tokio::test]
async fn test_submit_rejects_unknown_receiver_before_caching() {
    let f = fixture(MockBroker::new());
    let stranger = Uuid::new_v4();

    let err = f
        .coordinator
        .submit(f.sender, stranger, b"hello")
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::UnknownParty(id) if id == stranger));
    assert!(f.cache.is_empty());
    assert_eq!(f.broker.attempts(), 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let f = fixture(MockBroker::failing_transient(3));

    let id = f
        .coordinator
        .submit(f.sender, f.receiver, b"hello")
        .await
        .unwrap();

    assert_eq!(f.broker.attempts(), 4);
    assert_eq!(f.broker.published().len(), 1);
    assert_eq!(
        f.coordinator.message_state(id),
        Some(DeliveryState::Acknowledged)
    );
    // Live record removed on acknowledgement, nothing retained as failed
    assert_eq!(f.coordinator.inflight_count(), 0);
    assert!(f.coordinator.failed_records().is_empty());
}

#[tokio::test]
async fn test_exhausted_retries_fail_but_keep_cache_entry() {
    let f = fixture(MockBroker::failing_transient(5));

    let err = f
        .coordinator
        .submit(f.sender, f.receiver, b"hello")
        .await
        .unwrap_err();

    let DeliveryError::PublishExhausted { attempts, .. } = err else {
        panic!("expected PublishExhausted, got {err:?}");
    };
    assert_eq!(attempts, 5);
    assert_eq!(f.broker.attempts(), 5);

    // The record is retained for inspection and the cache write survives
    let records = f.coordinator.failed_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempts, 5);
    assert!(records[0].last_error.is_some());

    let entry = f.cache.get_latest(f.sender, f.receiver).await.unwrap();
    let entry = entry.expect("cache entry must survive a failed publish");
    assert_eq!(
        f.coordinator.message_state(entry.message_id),
        Some(DeliveryState::Failed)
    );
}

#[tokio::test]
async fn test_permanent_rejection_fails_immediately() {
    let f = fixture(MockBroker::rejecting());

    let err = f
        .coordinator
        .submit(f.sender, f.receiver, b"hello")
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Rejected(_)));
    // No retries for a permanent rejection
    assert_eq!(f.broker.attempts(), 1);
    assert_eq!(f.coordinator.failed_records().len(), 1);
}

#[tokio::test]
async fn test_deadline_exceeded_mid_retry_times_out_and_cleans_up() {
    let f = fixture(MockBroker::failing_transient(10));

    // First backoff is 50ms; a 60ms deadline expires during the second wait
    let retry_coordinator = {
        let broker = f.broker.clone();
        let cache = f.cache.clone();
        let users = Arc::new(InMemoryUserStore::with_users(&[f.sender, f.receiver]));
        DeliveryCoordinator::new(
            broker,
            cache,
            users,
            f.encryption.clone(),
            TOPIC.to_string(),
            PublishRetryConfig {
                max_attempts: 10,
                base_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(200),
                multiplier: 2.0,
                jitter: false,
            },
            Duration::from_secs(5),
        )
    };

    let err = retry_coordinator
        .submit_with_deadline(f.sender, f.receiver, b"hello", Duration::from_millis(60))
        .await
        .unwrap_err();

    let DeliveryError::Timeout { attempts } = err else {
        panic!("expected Timeout, got {err:?}");
    };
    assert!(attempts >= 1);

    // Timeout cleans up the live record instead of retaining it
    assert_eq!(retry_coordinator.inflight_count(), 0);
    assert!(retry_coordinator.failed_records().is_empty());

    let entry = f.cache.get_latest(f.sender, f.receiver).await.unwrap().unwrap();
    assert_eq!(
        retry_coordinator.message_state(entry.message_id),
        Some(DeliveryState::Failed)
    );
}

#[tokio::test]
async fn test_deadline_bounds_a_hanging_publish() {
    let f = fixture(MockBroker::slow(Duration::from_secs(10)));

    let started = tokio::time::Instant::now();
    let err = f
        .coordinator
        .submit_with_deadline(f.sender, f.receiver, b"hello", Duration::from_millis(50))
        .await
        .unwrap_err();

    // The hang is cut off at the deadline, not at the broker's own timeout
    assert!(matches!(err, DeliveryError::Timeout { attempts: 1 }));
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(f.coordinator.inflight_count(), 0);
    assert!(f.coordinator.failed_records().is_empty());
    let entry = f.cache.get_latest(f.sender, f.receiver).await.unwrap().unwrap();
    assert_eq!(
        f.coordinator.message_state(entry.message_id),
        Some(DeliveryState::Failed)
    );
}

#[tokio::test]
async fn test_retention_sweep_drops_only_terminal_messages() {
    let f = fixture(MockBroker::new());

    let id = f
        .coordinator
        .submit(f.sender, f.receiver, b"hello")
        .await
        .unwrap();
    assert_eq!(
        f.coordinator.message_state(id),
        Some(DeliveryState::Acknowledged)
    );

    // Fresh messages stay within the window
    assert_eq!(f.coordinator.sweep_expired(Duration::from_secs(3600)), 0);
    assert!(f.coordinator.message_state(id).is_some());

    // A zero retention window expires everything terminal
    assert_eq!(f.coordinator.sweep_expired(Duration::ZERO), 1);
    assert!(f.coordinator.message_state(id).is_none());
}
