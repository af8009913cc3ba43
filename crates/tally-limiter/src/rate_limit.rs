//! Fixed-window rate limiting keyed by (actor, scope).
//!
//! Provides [`FixedWindowLimiter`], which admits up to `capacity` commands
//! per key within a window of fixed length. A window starts on the first
//! hit for a key and is replaced wholesale (not incremented) once
//! `now >= reset_at`. Window state lives behind the [`WindowStore`] trait so
//! the bookkeeping can sit in-process ([`MemoryWindowStore`]) or in Redis.
//!
//! Store failures fail open: the command is admitted and a warning logged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use tally_types::{ActorId, RateLimitConfig, ScopeId, TallyError};

/// Rate-limit key: one window per actor per scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub actor: ActorId,
    pub scope: ScopeId,
}

impl WindowKey {
    pub fn new(actor: &ActorId, scope: &ScopeId) -> Self {
        Self {
            actor: actor.clone(),
            scope: scope.clone(),
        }
    }
}

/// A live fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Hits still available in the current window.
    pub remaining: u32,
    /// When the current window ends. `None` when the limiter failed open.
    pub reset_at: Option<DateTime<Utc>>,
}

/// Backing store for fixed windows.
///
/// `hit` must apply the whole read-modify-write atomically per key: two
/// concurrent hits must never both observe `count < capacity` when only one
/// slot remains.
#[async_trait]
pub trait WindowStore: Send + Sync {
    async fn hit(
        &self,
        key: &WindowKey,
        now: DateTime<Utc>,
        window: Duration,
        capacity: u32,
    ) -> Result<RateLimitDecision, TallyError>;
}

/// Apply one hit to an optional existing window.
///
/// Shared by stores that keep windows in Rust data structures.
pub fn apply_hit(
    slot: &mut Option<RateLimitWindow>,
    now: DateTime<Utc>,
    window: Duration,
    capacity: u32,
) -> RateLimitDecision {
    match slot {
        Some(existing) if now < existing.reset_at => {
            if existing.count >= capacity {
                return RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_at: Some(existing.reset_at),
                };
            }
            existing.count += 1;
            RateLimitDecision {
                allowed: true,
                remaining: capacity - existing.count,
                reset_at: Some(existing.reset_at),
            }
        }
        _ => {
            let span = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
            let reset_at = now.checked_add_signed(span).unwrap_or(DateTime::<Utc>::MAX_UTC);
            *slot = Some(RateLimitWindow { count: 1, reset_at });
            RateLimitDecision {
                allowed: true,
                remaining: capacity.saturating_sub(1),
                reset_at: Some(reset_at),
            }
        }
    }
}

/// Tracked keys at which [`MemoryWindowStore`] first sweeps expired windows.
pub const DEFAULT_PRUNE_THRESHOLD: usize = 10_000;

/// In-process window store.
///
/// A single mutex guards the map; it is only held for the in-memory
/// increment, never across an await. Expired windows are swept from `hit`
/// once the map reaches a size threshold, so idle keys do not accumulate.
#[derive(Debug)]
pub struct MemoryWindowStore {
    windows: Mutex<HashMap<WindowKey, RateLimitWindow>>,
    prune_threshold: usize,
    /// Map size that triggers the next sweep. Tracks twice the live set so
    /// a map full of live windows is not rescanned on every hit.
    next_prune: AtomicUsize,
}

impl Default for MemoryWindowStore {
    fn default() -> Self {
        Self::with_prune_threshold(DEFAULT_PRUNE_THRESHOLD)
    }
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep expired windows whenever at least `threshold` keys are tracked.
    pub fn with_prune_threshold(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            windows: Mutex::new(HashMap::new()),
            prune_threshold: threshold,
            next_prune: AtomicUsize::new(threshold),
        }
    }

    /// Current window for a key, if any (expired windows included).
    pub fn window(&self, key: &WindowKey) -> Option<RateLimitWindow> {
        self.windows.lock().get(key).copied()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop windows that have ended. Returns how many were removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows.lock();
        self.sweep(&mut windows, now)
    }

    fn sweep(
        &self,
        windows: &mut HashMap<WindowKey, RateLimitWindow>,
        now: DateTime<Utc>,
    ) -> usize {
        let before = windows.len();
        windows.retain(|_, w| now < w.reset_at);
        let live = windows.len();
        self.next_prune.store(
            live.saturating_mul(2).max(self.prune_threshold),
            Ordering::Relaxed,
        );
        before - live
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn hit(
        &self,
        key: &WindowKey,
        now: DateTime<Utc>,
        window: Duration,
        capacity: u32,
    ) -> Result<RateLimitDecision, TallyError> {
        let mut windows = self.windows.lock();
        let mut slot = windows.get(key).copied();
        let decision = apply_hit(&mut slot, now, window, capacity);
        if let Some(updated) = slot {
            windows.insert(key.clone(), updated);
        }
        if windows.len() >= self.next_prune.load(Ordering::Relaxed) {
            let removed = self.sweep(&mut windows, now);
            debug!(removed, live = windows.len(), "pruned expired rate-limit windows");
        }
        Ok(decision)
    }
}

/// Fixed-window limiter over a pluggable [`WindowStore`].
#[derive(Clone)]
pub struct FixedWindowLimiter {
    store: Arc<dyn WindowStore>,
    window: Duration,
    capacity: u32,
}

impl std::fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("window", &self.window)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl FixedWindowLimiter {
    /// Create a limiter over the given store.
    pub fn new(store: Arc<dyn WindowStore>, window: Duration, capacity: u32) -> Self {
        Self {
            store,
            window,
            capacity,
        }
    }

    /// Create a limiter with an in-process store from config.
    pub fn in_memory(config: &RateLimitConfig) -> Self {
        Self::new(
            Arc::new(MemoryWindowStore::new()),
            config.window(),
            config.capacity,
        )
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Check (and record) one command for `(actor, scope)` at the current time.
    pub async fn check(&self, actor: &ActorId, scope: &ScopeId) -> RateLimitDecision {
        self.check_at(actor, scope, Utc::now()).await
    }

    /// Check (and record) one command at an explicit time.
    pub async fn check_at(
        &self,
        actor: &ActorId,
        scope: &ScopeId,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let key = WindowKey::new(actor, scope);
        match self.store.hit(&key, now, self.window, self.capacity).await {
            Ok(decision) => {
                debug!(
                    actor = %actor,
                    scope = %scope,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "rate limit checked"
                );
                decision
            }
            Err(e) => {
                warn!(
                    actor = %actor,
                    scope = %scope,
                    error = %e,
                    "rate limit store unavailable, failing open"
                );
                RateLimitDecision {
                    allowed: true,
                    remaining: self.capacity,
                    reset_at: None,
                }
            }
        }
    }
}
