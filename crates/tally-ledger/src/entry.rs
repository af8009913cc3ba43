//! AuditRecord: one hash-chained row of the command audit trail.
//!
//! Each record stores an [`AuditEvent`] plus `prev_hash`, the hash of the
//! record before it, forming a tamper-evident chain.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use tally_types::{ActorId, AuditEvent, CommandStatus, ScopeId, TallyError};

/// A persisted audit event with its chain links.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub entry_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub scope_id: String,
    pub actor_id: String,
    pub command: String,
    /// Arguments as a JSON array.
    pub args: String,
    pub status: String,
    pub detail: Option<String>,
    pub message_id: Option<String>,
    pub prev_hash: String,
    pub entry_hash: String,
}

impl AuditRecord {
    /// Build a record for `event` chained onto `prev_hash`.
    pub fn new(event: &AuditEvent, prev_hash: String) -> Result<Self, TallyError> {
        let args = serde_json::to_string(&event.args)
            .map_err(|e| TallyError::LedgerError(format!("failed to serialize args: {e}")))?;
        let mut record = Self {
            entry_id: Uuid::new_v4(),
            timestamp: event.timestamp,
            scope_id: event.scope_id.to_string(),
            actor_id: event.actor_id.to_string(),
            command: event.command.clone(),
            args,
            status: event.status.to_string(),
            detail: event.detail.clone(),
            message_id: event.message_id.clone(),
            prev_hash,
            entry_hash: String::new(),
        };
        record.entry_hash = record.recompute_hash();
        Ok(record)
    }

    /// Recompute this record's hash from its fields. Compare against
    /// `entry_hash` to detect tampering.
    pub fn recompute_hash(&self) -> String {
        compute_hash(&[
            &self.entry_id.to_string(),
            &self.timestamp.to_rfc3339(),
            &self.scope_id,
            &self.actor_id,
            &self.command,
            &self.args,
            &self.status,
            self.detail.as_deref().unwrap_or(""),
            self.message_id.as_deref().unwrap_or(""),
            &self.prev_hash,
        ])
    }

    /// Convert back into the event that was recorded.
    pub fn to_event(&self) -> Result<AuditEvent, TallyError> {
        let args: Vec<String> = serde_json::from_str(&self.args)
            .map_err(|e| TallyError::LedgerError(format!("invalid args column: {e}")))?;
        let status: CommandStatus = self.status.parse()?;
        Ok(AuditEvent {
            scope_id: ScopeId::new(self.scope_id.as_str()),
            actor_id: ActorId::new(self.actor_id.as_str()),
            command: self.command.clone(),
            args,
            status,
            detail: self.detail.clone(),
            message_id: self.message_id.clone(),
            timestamp: self.timestamp,
        })
    }
}

/// SHA-256 over the given fields, hex encoded.
///
/// Fields are NUL-terminated so a byte cannot move between adjacent fields
/// without changing the digest.
pub(crate) fn compute_hash(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
