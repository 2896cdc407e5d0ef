//! # Broker Client Abstraction
//!
//! Publish/subscribe seam between the delivery pipeline and the message
//! broker. The rest of the system depends only on the traits in this crate;
//! the Kafka implementations live in [`kafka`] and hide connection handling,
//! producer configuration, and offset plumbing.
//!
//! The crate exists so the delivery coordinator's retry policy can be
//! correct: every publish failure is classified as transient (caller may
//! retry) or permanent (caller must not retry) before it leaves this crate.

use async_trait::async_trait;

mod error;
pub mod kafka;

pub use error::{BrokerError, BrokerResult};
pub use kafka::{KafkaBrokerClient, KafkaMessageSource};

/// A single record consumed from the broker.
///
/// Ordering is only meaningful within a partition; consumers must not assume
/// any ordering across partitions.
#[derive(Debug, Clone)]
pub struct InboundRecord {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Producer side: publish a keyed payload to a topic.
///
/// Implementations must distinguish transient from permanent failures so the
/// caller can retry with backoff only when it helps.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> BrokerResult<()>;
}

/// Consumer side: a lazy, infinite, restartable sequence of records.
///
/// `next` suspends until a record arrives; after a restart the sequence
/// resumes from the last committed offset.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn next(&self) -> BrokerResult<InboundRecord>;
}

/// Commits the consumer position for a partition.
///
/// `offset` is the offset of the record that was fully processed; the
/// committed position is the next record after it. Commits are persisted by
/// the broker, so restarts do not redeliver already-committed records
/// (at-least-once semantics still permit rare duplicates across crashes).
#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    async fn commit(&self, partition: i32, offset: i64) -> BrokerResult<()>;
}
