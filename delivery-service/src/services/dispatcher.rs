//! Inbound dispatcher: consumes broker records in commit order per
//! partition, deduplicates by message identity, and forwards to the
//! delivery callback.
//!
//! Each partition is processed by a single worker task so intra-partition
//! ordering is preserved; different partitions run fully in parallel and no
//! ordering across partitions is guaranteed. The offset is committed only
//! after the callback succeeds, so the pipeline is at-least-once: a crash
//! between callback success and commit redelivers the record on resume,
//! which the dedup window bounds.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::from_slice;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use broker_client::{InboundRecord, MessageSource, OffsetCommitter};

use crate::metrics;
use crate::models::MessageEnvelope;

const PARTITION_CHANNEL_CAPACITY: usize = 128;
const CONSUME_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Per-partition worker progression: Idle → Fetching → Processing →
/// Committing → Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartitionPhase {
    Idle,
    Fetching,
    Processing,
    Committing,
}

/// What handling a record decided, before the offset commit.
enum RecordOutcome {
    /// Callback succeeded, id recorded in the dedup window
    Delivered(Uuid),
    /// Known duplicate or unparseable record; advance past it
    Skipped,
}

/// Receiver-facing collaborator invoked once per deduplicated record.
///
/// Failure means the offset is not committed and the record will be
/// redelivered after restart or rebalance.
#[async_trait::async_trait]
pub trait DeliveryCallback: Send + Sync {
    async fn deliver(
        &self,
        receiver_id: Uuid,
        message_id: Uuid,
        payload: &[u8],
    ) -> anyhow::Result<()>;
}

/// Bounded recent-window set of message ids used to suppress known
/// duplicates. Oldest entries are evicted once capacity is reached, so the
/// suppression guarantee only holds within the window.
pub struct DedupWindow {
    capacity: usize,
    seen: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Record an id; returns false if it was already inside the window.
    pub fn insert(&mut self, id: Uuid) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

pub struct InboundDispatcher {
    source: Arc<dyn MessageSource>,
    committer: Arc<dyn OffsetCommitter>,
    callback: Arc<dyn DeliveryCallback>,
    dedup: Arc<Mutex<DedupWindow>>,
}

impl InboundDispatcher {
    pub fn new(
        source: Arc<dyn MessageSource>,
        committer: Arc<dyn OffsetCommitter>,
        callback: Arc<dyn DeliveryCallback>,
        dedup_window_size: usize,
    ) -> Self {
        Self {
            source,
            committer,
            callback,
            dedup: Arc::new(Mutex::new(DedupWindow::new(dedup_window_size))),
        }
    }

    /// Consume records until the source ends (tests) or forever (Kafka).
    ///
    /// Records are routed to one worker task per partition; a worker that
    /// hits a callback failure stops without committing and the partition
    /// stays halted until restart or rebalance redelivers from the
    /// uncommitted offset.
    pub async fn run(&self) {
        let mut workers: HashMap<i32, mpsc::Sender<InboundRecord>> = HashMap::new();
        let mut halted: HashSet<i32> = HashSet::new();

        loop {
            let record = match self.source.next().await {
                Ok(record) => record,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "transient consume error, backing off");
                    tokio::time::sleep(CONSUME_RETRY_DELAY).await;
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "consumer stream ended");
                    break;
                }
            };

            let partition = record.partition;
            if halted.contains(&partition) {
                // Spawning a replacement worker here would commit offsets
                // past the failed, uncommitted record and lose it. The
                // partition stays dead until restart/rebalance resumes it
                // from the committed position.
                debug!(
                    partition,
                    offset = record.offset,
                    "partition halted, dropping record until redelivery"
                );
                continue;
            }

            let sender = workers
                .entry(partition)
                .or_insert_with(|| self.spawn_partition_worker(partition));

            if sender.send(record).await.is_err() {
                // Worker halted on a failed callback; its offset was not
                // committed, so the broker redelivers from there after
                // restart/rebalance. Dropping the record here is safe.
                warn!(partition, "partition worker stopped, awaiting redelivery");
                workers.remove(&partition);
                halted.insert(partition);
            }
        }
    }

    fn spawn_partition_worker(&self, partition: i32) -> mpsc::Sender<InboundRecord> {
        let (tx, mut rx) = mpsc::channel::<InboundRecord>(PARTITION_CHANNEL_CAPACITY);
        let committer = Arc::clone(&self.committer);
        let callback = Arc::clone(&self.callback);
        let dedup = Arc::clone(&self.dedup);

        info!(partition, "starting partition worker");
        tokio::spawn(async move {
            let mut phase = PartitionPhase::Idle;
            loop {
                advance(&mut phase, PartitionPhase::Fetching, partition);
                let Some(record) = rx.recv().await else {
                    debug!(partition, "partition channel closed");
                    break;
                };

                advance(&mut phase, PartitionPhase::Processing, partition);
                let outcome =
                    match handle_record(&*callback, &dedup, &record).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            // Do not commit, do not advance: the same record
                            // is redelivered after restart or rebalance.
                            error!(
                                partition,
                                offset = record.offset,
                                error = %e,
                                "delivery callback failed, halting partition"
                            );
                            break;
                        }
                    };

                advance(&mut phase, PartitionPhase::Committing, partition);
                if let Err(e) = committer.commit(record.partition, record.offset).await {
                    error!(
                        partition,
                        offset = record.offset,
                        error = %e,
                        "offset commit failed, halting partition"
                    );
                    break;
                }

                if let RecordOutcome::Delivered(message_id) = outcome {
                    metrics::RECORDS_DELIVERED.inc();
                    debug!(
                        message_id = %message_id,
                        partition,
                        offset = record.offset,
                        "record delivered and committed"
                    );
                }
                advance(&mut phase, PartitionPhase::Idle, partition);
            }
        });

        tx
    }
}

fn advance(phase: &mut PartitionPhase, next: PartitionPhase, partition: i32) {
    trace!(partition, from = ?phase, to = ?next, "partition phase");
    *phase = next;
}

/// Parse, deduplicate, and deliver one record. The caller commits the offset
/// on any Ok outcome and halts the partition on Err.
async fn handle_record(
    callback: &dyn DeliveryCallback,
    dedup: &Mutex<DedupWindow>,
    record: &InboundRecord,
) -> anyhow::Result<RecordOutcome> {
    let envelope: MessageEnvelope = match from_slice(&record.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            // A record that cannot be parsed will never become deliverable;
            // log and advance past it.
            warn!(
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "unparseable record, skipping"
            );
            return Ok(RecordOutcome::Skipped);
        }
    };

    let already_seen = {
        let window = dedup.lock().expect("dedup window lock poisoned");
        window.contains(&envelope.message_id)
    };
    if already_seen {
        metrics::DUPLICATES_SKIPPED.inc();
        info!(
            message_id = %envelope.message_id,
            partition = record.partition,
            offset = record.offset,
            "duplicate record skipped"
        );
        return Ok(RecordOutcome::Skipped);
    }

    let payload = base64::Engine::decode(
        &base64::engine::general_purpose::STANDARD,
        envelope.payload.as_bytes(),
    )?;

    callback
        .deliver(envelope.receiver_id, envelope.message_id, &payload)
        .await?;

    {
        let mut window = dedup.lock().expect("dedup window lock poisoned");
        window.insert(envelope.message_id);
    }
    Ok(RecordOutcome::Delivered(envelope.message_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_window_detects_duplicates() {
        let mut window = DedupWindow::new(8);
        let id = Uuid::new_v4();

        assert!(window.insert(id));
        assert!(!window.insert(id));
        assert!(window.contains(&id));
    }

    #[test]
    fn test_dedup_window_evicts_oldest() {
        let mut window = DedupWindow::new(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        window.insert(a);
        window.insert(b);
        window.insert(c);

        assert!(!window.contains(&a));
        assert!(window.contains(&b));
        assert!(window.contains(&c));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_dedup_window_minimum_capacity() {
        let mut window = DedupWindow::new(0);
        let id = Uuid::new_v4();
        assert!(window.insert(id));
        assert!(window.contains(&id));
    }
}
