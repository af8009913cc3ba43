//! Bounded background task queue for handler side effects.
//!
//! Handlers that need to do work after replying (refreshing a feed, warming
//! a cache entry) submit it here instead of spawning ad hoc. The queue is a
//! bounded channel drained by one worker; each task runs in its own tokio
//! task, so a failing or panicking task does not affect the others.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use tally_types::{TallyError, TaskQueueConfig};

/// A unit of background work.
pub type BackgroundTask = BoxFuture<'static, anyhow::Result<()>>;

enum TaskMessage {
    Run { label: String, task: BackgroundTask },
    Shutdown,
}

/// Cloneable handle to the queue. All clones feed the same worker.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<TaskMessage>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("queued", &self.queued())
            .field("capacity", &self.tx.max_capacity())
            .finish()
    }
}

impl TaskQueue {
    /// Start a queue holding at most `capacity` not-yet-started tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(worker_task(rx));
        info!(capacity, "task queue started");
        Self {
            tx,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    pub fn from_config(config: &TaskQueueConfig) -> Self {
        Self::start(config.queue_capacity)
    }

    /// Queue a task. Fails immediately when the queue is full or shut down.
    pub fn submit<F>(&self, label: impl Into<String>, task: F) -> Result<(), TallyError>
    where
        F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = label.into();
        let message = TaskMessage::Run {
            label: label.clone(),
            task: Box::pin(task),
        };
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                TallyError::TaskError(format!("task queue full, rejected '{label}'"))
            }
            mpsc::error::TrySendError::Closed(_) => {
                TallyError::TaskError(format!("task queue shut down, rejected '{label}'"))
            }
        })
    }

    /// Tasks waiting to be started.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Stop accepting tasks, start everything already queued, and wait for
    /// all started tasks to finish. Later calls return immediately.
    pub async fn shutdown(&self) -> Result<(), TallyError> {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return Ok(());
        };

        self.tx
            .send(TaskMessage::Shutdown)
            .await
            .map_err(|_| TallyError::TaskError("task worker already stopped".to_string()))?;

        worker
            .await
            .map_err(|e| TallyError::TaskError(format!("task worker panicked: {e}")))
    }
}

async fn worker_task(mut rx: mpsc::Receiver<TaskMessage>) {
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(TaskMessage::Run { label, task }) => spawn_task(&mut running, label, task),
                Some(TaskMessage::Shutdown) | None => break,
            },
            Some(joined) = running.join_next(), if !running.is_empty() => report(joined),
        }
    }

    rx.close();
    while let Ok(msg) = rx.try_recv() {
        if let TaskMessage::Run { label, task } = msg {
            spawn_task(&mut running, label, task);
        }
    }
    while let Some(joined) = running.join_next().await {
        report(joined);
    }
    info!("task queue drained");
}

fn spawn_task(
    running: &mut JoinSet<(String, anyhow::Result<()>)>,
    label: String,
    task: BackgroundTask,
) {
    debug!(task = %label, "starting background task");
    running.spawn(async move { (label, task.await) });
}

fn report(joined: Result<(String, anyhow::Result<()>), tokio::task::JoinError>) {
    match joined {
        Ok((label, Ok(()))) => debug!(task = %label, "background task finished"),
        Ok((label, Err(e))) => error!(task = %label, error = %e, "background task failed"),
        Err(e) => error!(error = %e, "background task panicked"),
    }
}
