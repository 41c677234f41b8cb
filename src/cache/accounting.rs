//! Access Accounting Module
//!
//! Hit counts and last-access times are applied off the read path. Reads push
//! an access record into a bounded channel and return immediately; a single
//! worker drains the channel in batches, coalesces records per key and issues
//! one storage update per key and batch. When the channel is full the record
//! is dropped and counted.
//!
//! Each record names the write it read (`updated_at` of the row). Hits on a row
//! that has been overwritten in the meantime are discarded, so a fresh entry
//! always starts cold.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::entry::ResultTable;
use crate::keys::CacheKey;
use crate::storage::CacheBackend;

/// Upper bound on records taken off the channel per batch.
const BATCH_LIMIT: usize = 256;

#[derive(Debug)]
pub(crate) enum Command {
    Access {
        table: ResultTable,
        key: String,
        written_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    Flush(oneshot::Sender<()>),
}

// == Access Recorder ==
/// Handle used by the caches to enqueue access records.
#[derive(Debug, Clone)]
pub struct AccessRecorder {
    tx: mpsc::Sender<Command>,
    dropped: Arc<AtomicU64>,
}

impl AccessRecorder {
    /// Creates the channel and spawns the worker applying records to `backend`.
    ///
    /// The worker exits once every recorder clone has been dropped.
    pub fn spawn(backend: Arc<dyn CacheBackend>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (recorder, rx) = Self::channel(capacity);
        let handle = tokio::spawn(run_worker(backend, rx));
        info!(capacity, "Access accounting worker started");
        (recorder, handle)
    }

    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let recorder = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (recorder, rx)
    }

    /// Enqueues one hit on the row version written at `written_at`, without waiting.
    pub fn record(
        &self,
        table: ResultTable,
        key: &CacheKey,
        written_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) {
        let command = Command::Access {
            table,
            key: key.as_str().to_string(),
            written_at,
            at,
        };
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(cache = table.label(), key = %key, "Accounting queue full, access dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(cache = table.label(), "Accounting worker stopped, access dropped");
            }
        }
    }

    /// Waits until every record enqueued before this call has been applied.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).await.is_err() {
            return;
        }
        let _ = done.await;
    }

    /// Records lost to a full queue or a stopped worker.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

type Pending = HashMap<(ResultTable, String, DateTime<Utc>), (u64, DateTime<Utc>)>;

// == Worker ==
pub(crate) async fn run_worker(backend: Arc<dyn CacheBackend>, mut rx: mpsc::Receiver<Command>) {
    let mut batch = Vec::with_capacity(BATCH_LIMIT);

    while rx.recv_many(&mut batch, BATCH_LIMIT).await > 0 {
        let mut pending = Pending::new();
        let mut acks = Vec::new();

        for command in batch.drain(..) {
            match command {
                Command::Access {
                    table,
                    key,
                    written_at,
                    at,
                } => {
                    let slot = pending.entry((table, key, written_at)).or_insert((0, at));
                    slot.0 += 1;
                    slot.1 = slot.1.max(at);
                }
                Command::Flush(ack) => acks.push(ack),
            }
        }

        apply(backend.as_ref(), pending).await;

        for ack in acks {
            let _ = ack.send(());
        }
    }

    debug!("Access accounting worker stopped");
}

async fn apply(backend: &dyn CacheBackend, pending: Pending) {
    for ((table, key, written_at), (hits, at)) in pending {
        match backend.record_access(table, &key, written_at, hits, at).await {
            Ok(true) => {}
            // Row deleted, swept or overwritten since the read
            Ok(false) => debug!(cache = table.label(), key = %key, "Accessed entry no longer current"),
            Err(e) => warn!(
                cache = table.label(),
                key = %key,
                hits,
                error = %e,
                "Failed to record cache access"
            ),
        }
    }
}
