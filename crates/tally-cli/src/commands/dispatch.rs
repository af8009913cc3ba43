//! `tally dispatch` -- run one command through the full gate sequence.
//!
//! Membership is a single-entry table built from `--role`; the audit trail
//! goes to the configured SQLite ledger through the async writer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use tally_cache::TieredCache;
use tally_commands::{CommandRegistry, DispatchRequest, Dispatcher, StaticMembership, TaskQueue};
use tally_ledger::{AsyncAuditConfig, AsyncAuditWriter};
use tally_limiter::{FixedWindowLimiter, RedisWindowStore};
use tally_types::{Role, TallyConfig};

use crate::commands::load_config;
use crate::handlers::DemoHandlers;

#[derive(Debug)]
pub struct DispatchArgs {
    pub actor: String,
    pub scope: String,
    pub role: Role,
    pub message_id: Option<String>,
    pub timeout_ms: Option<u64>,
    pub raw: String,
}

pub fn run(args: DispatchArgs) -> Result<()> {
    let config = load_config()?;
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    rt.block_on(dispatch(config, args))
}

fn build_limiter(config: &TallyConfig) -> Result<FixedWindowLimiter> {
    let rate = &config.rate_limit;
    Ok(match &rate.redis_url {
        Some(url) => {
            let store = RedisWindowStore::new(url, config.cache.key_prefix.clone())
                .context("invalid rate_limit.redis_url")?;
            FixedWindowLimiter::new(Arc::new(store), rate.window(), rate.capacity)
        }
        None => FixedWindowLimiter::in_memory(rate),
    })
}

async fn dispatch(config: TallyConfig, args: DispatchArgs) -> Result<()> {
    let db_path = &config.audit.db_path;
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let registry = Arc::new(CommandRegistry::builtin().context("invalid built-in command table")?);
    let cache = TieredCache::from_config(&config.cache).context("failed to build cache")?;
    let membership = StaticMembership::new().with_member(
        args.scope.as_str(),
        args.actor.as_str(),
        args.role,
    );
    let audit = Arc::new(
        AsyncAuditWriter::start(db_path, AsyncAuditConfig::from(&config.audit))
            .context("failed to open audit ledger")?,
    );
    let tasks = TaskQueue::from_config(&config.tasks);

    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        build_limiter(&config)?,
        Arc::new(membership),
        Arc::new(DemoHandlers::new(registry, cache)),
        audit.clone(),
        tasks.clone(),
    );

    let mut request = DispatchRequest::new(args.actor.as_str(), args.scope.as_str(), args.raw);
    if let Some(id) = args.message_id {
        request = request.with_message_id(id);
    }

    let result = match args.timeout_ms {
        Some(ms) => {
            dispatcher
                .execute_with_timeout(request, Duration::from_millis(ms))
                .await
        }
        None => dispatcher.execute(request).await,
    };

    tasks.shutdown().await.context("failed to drain background tasks")?;
    audit.shutdown().await.context("failed to flush audit ledger")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("failed to render result")?
    );
    Ok(())
}
