//! Async audit pipeline with batch inserts and backpressure.
//!
//! [`AsyncAuditWriter`] wraps an [`AuditStore`] with a bounded async channel
//! and a background task that drains events in batches, so dispatches never
//! wait on a synchronous SQLite write.
//!
//! - The channel has a fixed capacity. When it is full, `send()` returns an
//!   error instead of blocking.
//! - `Shutdown` drains every buffered event before the task exits.
//! - A failed insert is logged and the pipeline keeps going.
//! - Events are inserted in the order they were received.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use tally_types::{AuditConfig, AuditEvent, TallyError};

use crate::sink::AuditSink;
use crate::store::AuditStore;

/// Commands sent through the channel to the background writer task.
#[derive(Debug)]
pub enum AuditCommand {
    Insert(AuditEvent),
    /// Flush any pending batch immediately.
    Flush,
    /// Drain all remaining events, then stop.
    Shutdown,
}

/// Tuning for the async pipeline.
#[derive(Debug, Clone)]
pub struct AsyncAuditConfig {
    /// Bounded channel capacity. Default: 4096.
    pub channel_capacity: usize,
    /// Maximum number of events per batch. Default: 64.
    pub batch_size: usize,
    /// The task flushes a partial batch after this long. Default: 100ms.
    pub flush_interval: Duration,
}

impl Default for AsyncAuditConfig {
    fn default() -> Self {
        Self::from(&AuditConfig::default())
    }
}

impl From<&AuditConfig> for AsyncAuditConfig {
    fn from(config: &AuditConfig) -> Self {
        Self {
            channel_capacity: config.channel_capacity.max(1),
            batch_size: config.batch_size.max(1),
            flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
        }
    }
}

/// An async front for [`AuditStore`] that batches inserts via a bounded channel.
pub struct AsyncAuditWriter {
    tx: mpsc::Sender<AuditCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AsyncAuditWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncAuditWriter")
            .field("running", &self.handle.lock().is_some())
            .finish()
    }
}

impl AsyncAuditWriter {
    /// Open an [`AuditStore`] at `db_path` and spawn the background writer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(db_path: &Path, config: AsyncAuditConfig) -> Result<Self, TallyError> {
        let store = AuditStore::open(db_path)?;
        Ok(Self::with_store(store, config))
    }

    /// Spawn the background writer over an already opened store.
    pub fn with_store(store: AuditStore, config: AsyncAuditConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let handle = tokio::spawn(writer_task(store, rx, config.batch_size, config.flush_interval));

        info!(
            capacity = config.channel_capacity,
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            "async audit pipeline started"
        );

        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue a command for the background writer.
    ///
    /// Fails if the channel is full (backpressure) or the writer has stopped.
    pub fn send(&self, cmd: AuditCommand) -> Result<(), TallyError> {
        self.tx.try_send(cmd).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TallyError::LedgerError(
                "async audit channel full: backpressure applied".to_string(),
            ),
            mpsc::error::TrySendError::Closed(_) => TallyError::LedgerError(
                "async audit channel closed: background writer has stopped".to_string(),
            ),
        })
    }

    /// Stop the pipeline, draining every pending event first.
    ///
    /// Calling this more than once is a no-op after the first call.
    pub async fn shutdown(&self) -> Result<(), TallyError> {
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };

        self.tx
            .send(AuditCommand::Shutdown)
            .await
            .map_err(|_| TallyError::LedgerError("async audit channel closed".to_string()))?;

        handle.await.map_err(|e| {
            TallyError::LedgerError(format!("async audit writer task panicked: {e}"))
        })
    }
}

#[async_trait]
impl AuditSink for AsyncAuditWriter {
    async fn record(&self, event: &AuditEvent) -> Result<(), TallyError> {
        self.send(AuditCommand::Insert(event.clone()))
    }
}

/// Background task that drains the channel and batch-inserts events.
///
/// Runs until `Shutdown` is received or every sender is dropped.
async fn writer_task(
    mut store: AuditStore,
    mut rx: mpsc::Receiver<AuditCommand>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut batch: Vec<AuditEvent> = Vec::with_capacity(batch_size);
    let mut interval = tokio::time::interval(flush_interval);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            biased;

            maybe_cmd = rx.recv() => {
                match maybe_cmd {
                    Some(AuditCommand::Shutdown) => {
                        flush_batch(&mut store, &mut batch);
                        drain_remaining(&mut store, &mut rx, batch_size);
                        info!("async audit pipeline shut down gracefully");
                        return;
                    }
                    Some(AuditCommand::Flush) => {
                        flush_batch(&mut store, &mut batch);
                    }
                    Some(AuditCommand::Insert(event)) => {
                        batch.push(event);
                        if batch.len() >= batch_size {
                            flush_batch(&mut store, &mut batch);
                        }
                    }
                    None => {
                        flush_batch(&mut store, &mut batch);
                        info!("async audit pipeline channel closed, flushed remaining events");
                        return;
                    }
                }
            }
            _ = interval.tick() => {
                if !batch.is_empty() {
                    flush_batch(&mut store, &mut batch);
                }
            }
        }
    }
}

/// Drain everything still buffered after a shutdown signal.
fn drain_remaining(
    store: &mut AuditStore,
    rx: &mut mpsc::Receiver<AuditCommand>,
    batch_size: usize,
) {
    let mut batch: Vec<AuditEvent> = Vec::with_capacity(batch_size);

    rx.close();

    while let Ok(cmd) = rx.try_recv() {
        if let AuditCommand::Insert(event) = cmd {
            batch.push(event);
            if batch.len() >= batch_size {
                flush_batch(store, &mut batch);
            }
        }
    }

    flush_batch(store, &mut batch);
}

/// Insert every event in the batch. A failed insert does not stop the rest.
fn flush_batch(store: &mut AuditStore, batch: &mut Vec<AuditEvent>) {
    if batch.is_empty() {
        return;
    }

    let count = batch.len();

    for event in batch.drain(..) {
        if let Err(e) = store.append(&event) {
            error!(
                error = %e,
                command = %event.command,
                "async audit insert failed, continuing pipeline"
            );
        }
    }

    tracing::trace!(count, "flushed audit batch");
}
