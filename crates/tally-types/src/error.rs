//! Error types shared across all Tally crates.

/// Errors that can occur across the Tally command core.
///
/// Each variant corresponds to a different subsystem: parser, registry,
/// rate limiter, cache, audit ledger, membership lookup, configuration, or the
/// background task queue.
#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    #[error("command parse error: {0}")]
    ParseError(String),

    #[error("command registry error: {0}")]
    RegistryError(String),

    #[error("rate limit store error: {0}")]
    RateLimitError(String),

    #[error("cache backend error: {0}")]
    CacheError(String),

    #[error("audit ledger error: {0}")]
    LedgerError(String),

    #[error("membership lookup failed: {0}")]
    MembershipError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("task queue error: {0}")]
    TaskError(String),
}
