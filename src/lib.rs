//! Tally -- command processing core for a chat/watchlist service.
//!
//! This facade re-exports the workspace crates so the host application (and
//! the integration tests under `tests/`) can depend on a single package.

pub use tally_cache as cache;
pub use tally_commands as commands;
pub use tally_ledger as ledger;
pub use tally_limiter as limiter;
pub use tally_types as types;
