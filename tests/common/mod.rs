//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use tally::commands::{
    CommandHandlers, CommandKind, CommandRegistry, Dispatcher, HandlerContext, StaticMembership,
    TaskQueue,
};
use tally::ledger::{AuditSink, AuditStore, MemoryLedger};
use tally::limiter::{FixedWindowLimiter, MemoryWindowStore};
use tally::types::{ActorId, AuditEvent, CommandResult, RateLimitConfig, Role, ScopeId};

pub const SCOPE: &str = "room-1";

/// Create a temporary file for use as a test database.
pub fn temp_db() -> NamedTempFile {
    NamedTempFile::new().expect("should create temp file for ledger database")
}

/// Open an AuditStore on the given temp file.
pub fn open_test_store(tmp: &NamedTempFile) -> AuditStore {
    AuditStore::open(tmp.path()).expect("should open audit store")
}

/// Build an audit event for `actor` in [`SCOPE`].
pub fn event(actor: &str, command: &str, args: &[&str], result: &CommandResult) -> AuditEvent {
    AuditEvent::from_result(
        ScopeId::new(SCOPE),
        ActorId::new(actor),
        command,
        args.iter().map(|a| a.to_string()).collect(),
        result,
    )
}

/// Handler set that counts invocations per kind and echoes its arguments.
#[derive(Default)]
pub struct CountingHandlers {
    calls: AtomicUsize,
    alerts: AtomicUsize,
}

impl CountingHandlers {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn alerts(&self) -> usize {
        self.alerts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandHandlers for CountingHandlers {
    async fn handle(
        &self,
        kind: CommandKind,
        ctx: HandlerContext,
    ) -> anyhow::Result<CommandResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if kind == CommandKind::Alert {
            self.alerts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(CommandResult::ok(format!("{kind:?} {}", ctx.args.join(" "))))
    }
}

/// A dispatcher wired to in-memory collaborators, with handles to inspect them.
pub struct Fixture {
    pub dispatcher: Dispatcher,
    pub handlers: Arc<CountingHandlers>,
    pub ledger: Arc<MemoryLedger>,
    pub windows: Arc<MemoryWindowStore>,
    pub members: Arc<StaticMembership>,
}

impl Fixture {
    /// Members: `alice` (member), `ada` (admin), `otto` (owner), all in [`SCOPE`].
    pub fn new() -> Self {
        Self::with_sink_and_config(None, RateLimitConfig::default())
    }

    pub fn with_sink_and_config(sink: Option<Arc<dyn AuditSink>>, config: RateLimitConfig) -> Self {
        let handlers = Arc::new(CountingHandlers::default());
        let ledger = Arc::new(MemoryLedger::new());
        let windows = Arc::new(MemoryWindowStore::new());
        let members = Arc::new(
            StaticMembership::new()
                .with_member(SCOPE, "alice", Role::Member)
                .with_member(SCOPE, "ada", Role::Admin)
                .with_member(SCOPE, "otto", Role::Owner),
        );
        let limiter = FixedWindowLimiter::new(windows.clone(), config.window(), config.capacity);
        let audit = match sink {
            Some(sink) => sink,
            None => ledger.clone() as Arc<dyn AuditSink>,
        };

        let dispatcher = Dispatcher::new(
            Arc::new(CommandRegistry::builtin().expect("builtin registry is valid")),
            limiter,
            members.clone(),
            handlers.clone(),
            audit,
            TaskQueue::start(16),
        );

        Self {
            dispatcher,
            handlers,
            ledger,
            windows,
            members,
        }
    }
}
