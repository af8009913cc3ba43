use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ActorId, CommandResult, CommandStatus, ScopeId};

/// One record in the command audit trail.
///
/// Written exactly once per dispatch attempt that reaches the rate-limit
/// gate, including attempts that were rate limited or denied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub scope_id: ScopeId,
    pub actor_id: ActorId,
    /// Canonical command name (aliases are resolved before auditing).
    pub command: String,
    pub args: Vec<String>,
    pub status: CommandStatus,
    pub detail: Option<String>,
    /// Inbound chat message that carried the command, if the caller knows it.
    #[serde(default)]
    pub message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Build an event from the final result of a dispatch.
    ///
    /// The audit `detail` prefers the result's detail and falls back to its
    /// message for failures, so denials are self-describing in the trail.
    pub fn from_result(
        scope_id: ScopeId,
        actor_id: ActorId,
        command: impl Into<String>,
        args: Vec<String>,
        result: &CommandResult,
    ) -> Self {
        let detail = match (&result.detail, result.status) {
            (Some(d), _) => Some(d.clone()),
            (None, CommandStatus::Error) => Some(result.message.clone()),
            (None, CommandStatus::Ok) => None,
        };
        Self {
            scope_id,
            actor_id,
            command: command.into(),
            args,
            status: result.status,
            detail,
            message_id: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }
}
