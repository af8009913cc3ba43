//! Command dispatch: parse, resolve, rate-limit, authorize, invoke, audit.
//!
//! [`Dispatcher::execute`] is the single entry point for chat commands. The
//! gates run in a fixed order:
//!
//! 1. parse the raw text
//! 2. resolve the name against the registry
//! 3. consume one unit of the actor's rate-limit window
//! 4. check the actor's role in the scope
//! 5. run the handler in its own task
//! 6. record exactly one audit event
//!
//! Parse and resolve failures return before the rate limiter is touched and
//! are not audited. Every attempt that reaches step 3 is audited, including
//! denials. Rate limiting runs before authorization, so a flood of
//! unauthorized attempts exhausts the caller's own quota.

use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use tracing::{debug, error, info, warn};

use tally_ledger::AuditSink;
use tally_limiter::FixedWindowLimiter;
use tally_types::{ActorId, AuditEvent, CommandResult, Role, ScopeId};

use crate::handler::{CommandHandlers, HandlerContext};
use crate::membership::MembershipLookup;
use crate::parser::{parse, CommandInvocation};
use crate::registry::{CommandMetadata, CommandRegistry};
use crate::tasks::TaskQueue;

pub const MSG_INVALID_FORMAT: &str = "Invalid command format";
pub const MSG_RATE_LIMITED: &str = "Rate limit exceeded";
pub const MSG_ACCESS_DENIED: &str = "Access denied";
pub const MSG_COMMAND_FAILED: &str = "Command failed";
pub const MSG_TIMED_OUT: &str = "Command timed out";

/// Audit detail recorded for rate-limited attempts.
pub const AUDIT_RATE_LIMITED: &str = "Rate limited";

/// One inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub actor_id: ActorId,
    pub scope_id: ScopeId,
    pub raw: String,
    /// The chat message that carried the command, if known.
    pub message_id: Option<String>,
}

impl DispatchRequest {
    pub fn new(
        actor_id: impl Into<ActorId>,
        scope_id: impl Into<ScopeId>,
        raw: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            scope_id: scope_id.into(),
            raw: raw.into(),
            message_id: None,
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

/// Runs commands through the gate sequence. Clones share all state.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    limiter: FixedWindowLimiter,
    membership: Arc<dyn MembershipLookup>,
    handlers: Arc<dyn CommandHandlers>,
    audit: Arc<dyn AuditSink>,
    tasks: TaskQueue,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("commands", &self.registry.len())
            .field("limiter", &self.limiter)
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CommandRegistry>,
        limiter: FixedWindowLimiter,
        membership: Arc<dyn MembershipLookup>,
        handlers: Arc<dyn CommandHandlers>,
        audit: Arc<dyn AuditSink>,
        tasks: TaskQueue,
    ) -> Self {
        Self {
            registry,
            limiter,
            membership,
            handlers,
            audit,
            tasks,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn limiter(&self) -> &FixedWindowLimiter {
        &self.limiter
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    /// Run one command to completion.
    pub async fn execute(&self, request: DispatchRequest) -> CommandResult {
        self.run(request, None).await
    }

    /// Run one command, giving the handler at most `timeout`.
    ///
    /// On timeout the handler task is aborted, the attempt is audited as
    /// failed, and the consumed rate-limit unit is not returned.
    pub async fn execute_with_timeout(
        &self,
        request: DispatchRequest,
        timeout: Duration,
    ) -> CommandResult {
        self.run(request, Some(timeout)).await
    }

    async fn run(&self, request: DispatchRequest, timeout: Option<Duration>) -> CommandResult {
        let invocation = match parse(&request.raw) {
            Ok(invocation) => invocation,
            Err(e) => {
                debug!(actor = %request.actor_id, error = %e, "not a valid command");
                return CommandResult::error(MSG_INVALID_FORMAT).with_detail(e.to_string());
            }
        };

        let Some(meta) = self.registry.find(&invocation.name) else {
            debug!(actor = %request.actor_id, command = %invocation.name, "unknown command");
            return CommandResult::error(format!("Unknown command: {}", invocation.name));
        };
        debug!(
            actor = %request.actor_id,
            scope = %request.scope_id,
            command = %meta.name,
            form = ?invocation.form,
            "command resolved"
        );

        let decision = self
            .limiter
            .check(&request.actor_id, &request.scope_id)
            .await;
        if !decision.allowed {
            let mut result = CommandResult::error(MSG_RATE_LIMITED);
            if let Some(reset_at) = decision.reset_at {
                result = result.with_detail(reset_at.to_rfc3339_opts(SecondsFormat::Secs, true));
            }
            info!(
                actor = %request.actor_id,
                scope = %request.scope_id,
                command = %meta.name,
                reset_at = ?decision.reset_at,
                "command rate limited"
            );
            let mut event = self.audit_event(&request, meta, &invocation, &result);
            event.detail = Some(AUDIT_RATE_LIMITED.to_string());
            self.record(event).await;
            return result;
        }

        // The remaining gates run in their own task so the audit event is
        // still written when the caller stops waiting on `execute`.
        let this = self.clone();
        let meta = meta.clone();
        let tail =
            tokio::spawn(async move { this.finish(request, meta, invocation, timeout).await });
        match tail.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "dispatch task failed");
                CommandResult::error(MSG_COMMAND_FAILED)
            }
        }
    }

    /// Authorize, invoke, and audit an admitted command.
    async fn finish(
        &self,
        request: DispatchRequest,
        meta: CommandMetadata,
        invocation: CommandInvocation,
        timeout: Option<Duration>,
    ) -> CommandResult {
        let result = match self.authorize(&request, &meta).await {
            Ok(role) => {
                let ctx = HandlerContext {
                    scope_id: request.scope_id.clone(),
                    actor_id: request.actor_id.clone(),
                    role,
                    args: invocation.args.clone(),
                    tasks: self.tasks.clone(),
                };
                self.invoke(&meta, ctx, timeout).await
            }
            Err(denied) => denied,
        };

        info!(
            actor = %request.actor_id,
            scope = %request.scope_id,
            command = %meta.name,
            status = %result.status,
            "command dispatched"
        );
        let event = self.audit_event(&request, &meta, &invocation, &result);
        self.record(event).await;
        result
    }

    /// The caller's role if it satisfies the command, otherwise the denial.
    async fn authorize(
        &self,
        request: &DispatchRequest,
        meta: &CommandMetadata,
    ) -> Result<Role, CommandResult> {
        let role = match self
            .membership
            .lookup_role(&request.actor_id, &request.scope_id)
            .await
        {
            Ok(role) => role,
            Err(e) => {
                warn!(
                    actor = %request.actor_id,
                    scope = %request.scope_id,
                    error = %e,
                    "membership lookup failed, treating as non-member"
                );
                None
            }
        };

        match role {
            None => Err(CommandResult::error(MSG_ACCESS_DENIED)),
            Some(role) if !role.satisfies(meta.permission) => Err(CommandResult::error(format!(
                "{} permission required",
                meta.permission
            ))),
            Some(role) => Ok(role),
        }
    }

    async fn invoke(
        &self,
        meta: &CommandMetadata,
        ctx: HandlerContext,
        timeout: Option<Duration>,
    ) -> CommandResult {
        let handlers = Arc::clone(&self.handlers);
        let kind = meta.kind;
        let mut task = tokio::spawn(async move { handlers.handle(kind, ctx).await });

        let joined = match timeout {
            None => (&mut task).await,
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    warn!(
                        command = %meta.name,
                        timeout_ms = limit.as_millis() as u64,
                        "handler timed out"
                    );
                    return CommandResult::error(MSG_TIMED_OUT);
                }
            },
        };

        match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(command = %meta.name, error = %e, "handler failed");
                CommandResult::error(MSG_COMMAND_FAILED).with_detail(format!("{e:#}"))
            }
            Err(e) if e.is_panic() => {
                error!(command = %meta.name, "handler panicked");
                CommandResult::error(MSG_COMMAND_FAILED).with_detail("handler panicked")
            }
            Err(e) => {
                warn!(command = %meta.name, error = %e, "handler task cancelled");
                CommandResult::error(MSG_COMMAND_FAILED).with_detail("handler cancelled")
            }
        }
    }

    fn audit_event(
        &self,
        request: &DispatchRequest,
        meta: &CommandMetadata,
        invocation: &CommandInvocation,
        result: &CommandResult,
    ) -> AuditEvent {
        AuditEvent::from_result(
            request.scope_id.clone(),
            request.actor_id.clone(),
            meta.name.clone(),
            invocation.args.clone(),
            result,
        )
        .with_message_id(request.message_id.clone())
    }

    async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(&event).await {
            error!(
                actor = %event.actor_id,
                command = %event.command,
                error = %e,
                "failed to record audit event"
            );
        }
    }
}
