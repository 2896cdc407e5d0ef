//! In-memory fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use broker_client::{BrokerClient, BrokerError, BrokerResult, InboundRecord, MessageSource, OffsetCommitter};
use delivery_service::services::dispatcher::DeliveryCallback;

/// Broker fake with a scripted sequence of publish outcomes.
///
/// Each publish consumes the next scripted outcome; an empty script means
/// success. Successful publishes are recorded for inspection.
#[derive(Default)]
pub struct MockBroker {
    script: Mutex<VecDeque<Result<(), BrokerError>>>,
    attempts: AtomicU32,
    published: Mutex<Vec<(String, String, Vec<u8>)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker whose publishes hang for `delay` before succeeding.
    pub fn slow(delay: Duration) -> Self {
        let broker = Self::new();
        *broker.delay.lock().unwrap() = Some(delay);
        broker
    }

    pub fn failing_transient(times: u32) -> Self {
        let broker = Self::new();
        {
            let mut script = broker.script.lock().unwrap();
            for _ in 0..times {
                script.push_back(Err(BrokerError::Transient("broker unreachable".into())));
            }
        }
        broker
    }

    pub fn rejecting() -> Self {
        let broker = Self::new();
        broker
            .script
            .lock()
            .unwrap()
            .push_back(Err(BrokerError::Permanent("payload too large".into())));
        broker
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<(String, String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> BrokerResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(outcome) = self.script.lock().unwrap().pop_front() {
            outcome?;
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), key.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// Finite record source: yields the queued outcomes in order, then ends the
/// stream with a non-transient error so the dispatcher loop exits.
pub struct ScriptedSource {
    outcomes: Mutex<VecDeque<BrokerResult<InboundRecord>>>,
}

impl ScriptedSource {
    pub fn new(records: Vec<InboundRecord>) -> Self {
        Self::with_outcomes(records.into_iter().map(Ok).collect())
    }

    pub fn with_outcomes(outcomes: Vec<BrokerResult<InboundRecord>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
        }
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn next(&self) -> BrokerResult<InboundRecord> {
        match self.outcomes.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Err(BrokerError::Subscribe("end of stream".into())),
        }
    }
}

/// Record source fed by a channel, so a test controls exactly when each
/// record becomes visible to the dispatcher.
pub struct ChannelSource {
    rx: tokio::sync::Mutex<tokio::sync::mpsc::Receiver<InboundRecord>>,
}

impl ChannelSource {
    pub fn new() -> (tokio::sync::mpsc::Sender<InboundRecord>, Self) {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        (
            tx,
            Self {
                rx: tokio::sync::Mutex::new(rx),
            },
        )
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next(&self) -> BrokerResult<InboundRecord> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| BrokerError::Subscribe("end of stream".into()))
    }
}

/// Committer that records every committed (partition, offset).
#[derive(Default)]
pub struct RecordingCommitter {
    commits: Mutex<Vec<(i32, i64)>>,
}

impl RecordingCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> Vec<(i32, i64)> {
        self.commits.lock().unwrap().clone()
    }
}

#[async_trait]
impl OffsetCommitter for RecordingCommitter {
    async fn commit(&self, partition: i32, offset: i64) -> BrokerResult<()> {
        self.commits.lock().unwrap().push((partition, offset));
        Ok(())
    }
}

/// Delivery callback that records invocations and can be told to fail for
/// specific message ids.
#[derive(Default)]
pub struct RecordingCallback {
    delivered: Mutex<Vec<(Uuid, Uuid, Vec<u8>)>>,
    fail_for: Mutex<Vec<Uuid>>,
    attempts: AtomicU32,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, message_id: Uuid) {
        self.fail_for.lock().unwrap().push(message_id);
    }

    pub fn delivered(&self) -> Vec<(Uuid, Uuid, Vec<u8>)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryCallback for RecordingCallback {
    async fn deliver(
        &self,
        receiver_id: Uuid,
        message_id: Uuid,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_for.lock().unwrap().contains(&message_id) {
            anyhow::bail!("receiver unavailable");
        }
        self.delivered
            .lock()
            .unwrap()
            .push((receiver_id, message_id, payload.to_vec()));
        Ok(())
    }
}

/// Poll `check` until it returns true or the timeout elapses.
pub async fn wait_for<F: Fn() -> bool>(check: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
