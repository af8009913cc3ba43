//! The contract command handlers satisfy.

use async_trait::async_trait;

use tally_types::{ActorId, CommandResult, Role, ScopeId};

use crate::registry::CommandKind;
use crate::tasks::TaskQueue;

/// Everything a handler gets to see about one invocation.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub scope_id: ScopeId,
    pub actor_id: ActorId,
    /// The caller's role, already checked against the command's permission.
    pub role: Role,
    pub args: Vec<String>,
    /// Queue for work that should outlive the reply.
    pub tasks: TaskQueue,
}

/// The handler set, selected by [`CommandKind`].
///
/// Returning `Err` (or panicking) yields a "Command failed" result; a
/// handler that wants to report a user-facing failure returns
/// `Ok(CommandResult::error(..))` instead.
#[async_trait]
pub trait CommandHandlers: Send + Sync {
    async fn handle(&self, kind: CommandKind, ctx: HandlerContext)
        -> anyhow::Result<CommandResult>;
}
