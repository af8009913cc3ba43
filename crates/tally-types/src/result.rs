//! The outcome of one command dispatch.

use serde::{Deserialize, Serialize};

/// Whether a dispatch succeeded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Ok,
    Error,
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandStatus::Ok => write!(f, "ok"),
            CommandStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for CommandStatus {
    type Err = crate::TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(CommandStatus::Ok),
            "error" => Ok(CommandStatus::Error),
            other => Err(crate::TallyError::LedgerError(format!(
                "unknown command status: {other:?}"
            ))),
        }
    }
}

/// Result of a command, produced either by a handler or by the dispatcher
/// itself when a gate short-circuits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResult {
    pub status: CommandStatus,
    /// User-facing message.
    pub message: String,
    /// Diagnostic detail (reset time, handler error text, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Opaque structured payload for the caller to render.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl CommandResult {
    /// A successful result with just a message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            detail: None,
            payload: None,
        }
    }

    /// A failed result with just a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Error,
            message: message.into(),
            detail: None,
            payload: None,
        }
    }

    /// Attach a diagnostic detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach a structured payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == CommandStatus::Ok
    }
}
