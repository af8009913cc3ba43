//! The seam the dispatcher writes audit events through.

use async_trait::async_trait;
use parking_lot::Mutex;

use tally_types::{AuditEvent, TallyError};

use crate::store::AuditStore;

/// Destination for audit events.
///
/// Recording is best-effort from the dispatcher's point of view: errors are
/// logged by the caller and never change a command's result.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), TallyError>;
}

/// Direct, synchronous writes into a SQLite store.
#[async_trait]
impl AuditSink for Mutex<AuditStore> {
    async fn record(&self, event: &AuditEvent) -> Result<(), TallyError> {
        self.lock().append(event).map(|_| ())
    }
}

/// In-process audit trail.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Events recorded for one actor, oldest first.
    pub fn for_actor(&self, actor_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.actor_id == actor_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryLedger {
    async fn record(&self, event: &AuditEvent) -> Result<(), TallyError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
