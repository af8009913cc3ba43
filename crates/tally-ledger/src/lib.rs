//! Audit trail for Tally command dispatches.
//!
//! Every dispatch that reaches the rate-limit gate produces one
//! [`AuditEvent`](tally_types::AuditEvent), written through an [`AuditSink`].
//! [`AuditStore`] persists events to SQLite as a SHA-256 hash chain;
//! [`AsyncAuditWriter`] batches writes to it off the request path.

pub mod entry;
pub mod pipeline;
pub mod sink;
pub mod store;

pub use entry::AuditRecord;
pub use pipeline::{AsyncAuditConfig, AsyncAuditWriter, AuditCommand};
pub use sink::{AuditSink, MemoryLedger};
pub use store::{AuditStore, IntegrityReport, GENESIS_HASH};
