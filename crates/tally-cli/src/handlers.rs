//! A self-contained handler set for the CLI.
//!
//! Market data is synthesised locally, so quotes are stable per symbol but
//! meaningless. Quotes go through the singleflight cache the same way a
//! real upstream call would.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use tally_cache::TieredCache;
use tally_commands::{CommandHandlers, CommandKind, CommandRegistry, HandlerContext};
use tally_types::{CommandResult, ScopeId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceAlert {
    pub symbol: String,
    pub above: bool,
    pub threshold: f64,
}

impl PriceAlert {
    /// Parse `>150` / `<150` style conditions.
    fn parse(symbol: &str, condition: &str) -> Option<Self> {
        let (above, number) = match condition.chars().next()? {
            '>' => (true, &condition[1..]),
            '<' => (false, &condition[1..]),
            _ => return None,
        };
        let threshold: f64 = number.trim().parse().ok()?;
        Some(Self {
            symbol: symbol.to_uppercase(),
            above,
            threshold,
        })
    }
}

pub struct DemoHandlers {
    registry: Arc<CommandRegistry>,
    cache: TieredCache,
    watchlists: Mutex<HashMap<ScopeId, BTreeSet<String>>>,
    alerts: Mutex<HashMap<ScopeId, Vec<PriceAlert>>>,
}

impl DemoHandlers {
    pub fn new(registry: Arc<CommandRegistry>, cache: TieredCache) -> Self {
        Self {
            registry,
            cache,
            watchlists: Mutex::new(HashMap::new()),
            alerts: Mutex::new(HashMap::new()),
        }
    }

    async fn quote(&self, symbol: &str) -> anyhow::Result<Quote> {
        let symbol = symbol.to_uppercase();
        let key = format!("quote:{symbol}");
        let quote = self
            .cache
            .cached_json(&key, self.cache.default_ttl(), move || async move {
                Ok(synthetic_quote(&symbol))
            })
            .await?;
        Ok(quote)
    }

    fn usage(&self, kind: CommandKind) -> CommandResult {
        let usage = self
            .registry
            .all()
            .iter()
            .find(|m| m.kind == kind)
            .map(|m| m.usage())
            .unwrap_or_default();
        CommandResult::error(format!("Usage: {usage}"))
    }
}

/// Deterministic pseudo-price derived from the symbol text.
fn synthetic_quote(symbol: &str) -> Quote {
    let seed = symbol
        .bytes()
        .fold(17u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
    Quote {
        price: (seed % 100_000) as f64 / 100.0,
    }
}

#[async_trait]
impl CommandHandlers for DemoHandlers {
    async fn handle(
        &self,
        kind: CommandKind,
        ctx: HandlerContext,
    ) -> anyhow::Result<CommandResult> {
        match kind {
            CommandKind::Help => Ok(CommandResult::ok(self.registry.help_text(ctx.role))),
            CommandKind::Echo => Ok(CommandResult::ok(ctx.args.join(" "))),
            CommandKind::Quote => {
                if ctx.args.is_empty() {
                    return Ok(self.usage(kind));
                }
                let mut prices = serde_json::Map::new();
                let mut lines = Vec::new();
                for symbol in &ctx.args {
                    let quote = self.quote(symbol).await?;
                    lines.push(format!("{}: {:.2}", symbol.to_uppercase(), quote.price));
                    prices.insert(symbol.to_uppercase(), json!(quote.price));
                }
                Ok(CommandResult::ok(lines.join("\n")).with_payload(prices.into()))
            }
            CommandKind::Alert => {
                let (Some(symbol), Some(condition)) = (ctx.args.first(), ctx.args.get(1)) else {
                    return Ok(self.usage(kind));
                };
                let Some(alert) = PriceAlert::parse(symbol, condition) else {
                    return Ok(CommandResult::error("Condition must look like >150 or <150"));
                };
                let message = format!(
                    "Alert set: {} {} {}",
                    alert.symbol,
                    if alert.above { "above" } else { "below" },
                    alert.threshold
                );
                let payload = serde_json::to_value(&alert)?;
                self.alerts
                    .lock()
                    .entry(ctx.scope_id.clone())
                    .or_default()
                    .push(alert);
                Ok(CommandResult::ok(message).with_payload(payload))
            }
            CommandKind::Alerts => {
                let alerts = self.alerts.lock().get(&ctx.scope_id).cloned().unwrap_or_default();
                if alerts.is_empty() {
                    return Ok(CommandResult::ok("No active alerts"));
                }
                let payload = serde_json::to_value(&alerts)?;
                Ok(
                    CommandResult::ok(format!("{} active alert(s)", alerts.len()))
                        .with_payload(payload),
                )
            }
            CommandKind::Watch | CommandKind::Unwatch => {
                if ctx.args.is_empty() {
                    return Ok(self.usage(kind));
                }
                let mut lists = self.watchlists.lock();
                let list = lists.entry(ctx.scope_id.clone()).or_default();
                for symbol in &ctx.args {
                    if kind == CommandKind::Watch {
                        list.insert(symbol.to_uppercase());
                    } else {
                        list.remove(&symbol.to_uppercase());
                    }
                }
                let symbols: Vec<String> = list.iter().cloned().collect();
                Ok(CommandResult::ok(format!("Watchlist: {}", symbols.join(", ")))
                    .with_payload(json!(symbols)))
            }
            CommandKind::News => {
                let Some(symbol) = ctx.args.first() else {
                    return Ok(self.usage(kind));
                };
                Ok(CommandResult::ok(format!("No recent headlines for {}", symbol.to_uppercase())))
            }
            CommandKind::Ask => {
                if ctx.args.is_empty() {
                    return Ok(self.usage(kind));
                }
                let question = ctx.args.join(" ");
                let actor = ctx.actor_id.clone();
                ctx.tasks.submit("ask", async move {
                    info!(actor = %actor, question = %question, "question queued for assistant");
                    Ok(())
                })?;
                Ok(CommandResult::ok("Question received; the answer will be posted here"))
            }
            CommandKind::Mute => {
                let Some(member) = ctx.args.first() else {
                    return Ok(self.usage(kind));
                };
                let minutes: u64 = match ctx.args.get(1) {
                    Some(m) => m.parse().map_err(|_| anyhow::anyhow!("invalid minutes: {m}"))?,
                    None => 10,
                };
                Ok(CommandResult::ok(format!("{member} muted for {minutes} minute(s)")))
            }
            CommandKind::Kick => {
                let Some(member) = ctx.args.first() else {
                    return Ok(self.usage(kind));
                };
                Ok(CommandResult::ok(format!("{member} removed from {}", ctx.scope_id)))
            }
            CommandKind::Purge => {
                let count: usize = ctx.args.first().and_then(|c| c.parse().ok()).unwrap_or(50);
                Ok(CommandResult::ok(format!("Purged {count} message(s)")))
            }
        }
    }
}
