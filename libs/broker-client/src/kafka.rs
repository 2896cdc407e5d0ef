//! Kafka implementations of the broker traits (rdkafka).

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use crate::{BrokerClient, BrokerError, BrokerResult, InboundRecord, MessageSource, OffsetCommitter};

/// How long the producer waits for broker acknowledgement of one record.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Classify an rdkafka error into the transient/permanent taxonomy.
///
/// Rejections of the record itself (oversized, malformed) are permanent;
/// everything else (transport failures, timeouts, full local queue) is
/// assumed to resolve on retry.
fn classify(err: &KafkaError) -> BrokerError {
    let code = err.rdkafka_error_code().unwrap_or(RDKafkaErrorCode::Unknown);
    match code {
        RDKafkaErrorCode::MessageSizeTooLarge
        | RDKafkaErrorCode::InvalidMessage
        | RDKafkaErrorCode::InvalidMessageSize
        | RDKafkaErrorCode::UnknownTopicOrPartition => BrokerError::Permanent(err.to_string()),
        _ => BrokerError::Transient(err.to_string()),
    }
}

/// Kafka producer wrapper.
///
/// The producer is configured idempotent (`enable.idempotence=true`,
/// `acks=all`) so that broker-level retries of a single send cannot
/// duplicate a record; the message id carried in the payload remains the
/// end-to-end idempotency key.
pub struct KafkaBrokerClient {
    producer: FutureProducer,
}

impl KafkaBrokerClient {
    pub fn new(brokers: &str) -> BrokerResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| BrokerError::Transient(format!("failed to create producer: {e}")))?;

        info!(brokers = %brokers, "Kafka producer created");
        Ok(Self { producer })
    }
}

#[async_trait]
impl BrokerClient for KafkaBrokerClient {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> BrokerResult<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, DELIVERY_TIMEOUT)
            .await
            .map_err(|(err, _)| classify(&err))?;

        debug!(topic = %topic, key = %key, "record published");
        Ok(())
    }
}

/// Kafka consumer wrapper with manual commits.
///
/// Auto-commit is disabled: the dispatcher commits each offset only after
/// the delivery callback succeeds, so a crash mid-processing redelivers the
/// record instead of losing it.
pub struct KafkaMessageSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaMessageSource {
    pub fn new(brokers: &str, topic: &str, group_id: &str) -> BrokerResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "10000")
            .create()
            .map_err(|e| BrokerError::Transient(format!("failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        info!(topic = %topic, group_id = %group_id, "Kafka consumer subscribed");
        Ok(Self {
            consumer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaMessageSource {
    async fn next(&self) -> BrokerResult<InboundRecord> {
        let msg = self.consumer.recv().await.map_err(|e| classify(&e))?;
        Ok(InboundRecord {
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg
                .key()
                .and_then(|k| std::str::from_utf8(k).ok())
                .map(str::to_string),
            payload: msg.payload().unwrap_or_default().to_vec(),
        })
    }
}

#[async_trait]
impl OffsetCommitter for KafkaMessageSource {
    async fn commit(&self, partition: i32, offset: i64) -> BrokerResult<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| BrokerError::Commit(e.to_string()))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| BrokerError::Commit(e.to_string()))?;

        debug!(partition, offset, "offset committed");
        Ok(())
    }
}
