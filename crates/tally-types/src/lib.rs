//! Core types shared across all Tally crates.
//!
//! Defines identifiers, roles, command results, audit events, configuration,
//! and the shared error type used by the parser, dispatcher, rate limiter,
//! cache, and audit ledger.

pub mod audit;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod ids;
pub mod result;
pub mod role;

pub use audit::AuditEvent;
pub use config::{
    AuditConfig, CacheConfig, RateLimitConfig, TallyConfig, TaskQueueConfig, CONFIG_FILENAME,
    LEDGER_FILENAME,
};
pub use config_loader::{ConfigLoader, ConfigSource, EffectiveConfig};
pub use error::TallyError;
pub use ids::{ActorId, ScopeId};
pub use result::{CommandResult, CommandStatus};
pub use role::Role;
