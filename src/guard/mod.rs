//! Concurrency Guard / Debounce Cache
//!
//! Short-lived keyed locks. `try_enter` takes a key for its keyspace window and
//! returns `false` while the key is held; keys expire on their own. The clock is
//! injected so expiry can be driven by tests without waiting.
//!
//! This is best-effort duplicate suppression. Correctness comes from the
//! reconciler's value diff.
//!
//! `CharacterLocks` is the other half: an async mutex per character, held around
//! read-check-write sequences that may run on several event lanes at once.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::model::{CharacterId, SourceId};
use crate::settings::DebounceWindows;

/// Millisecond clock
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Monotonic clock backed by tokio's `Instant` (respects paused test time)
pub struct SystemClock {
    start: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Clock advanced by hand
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Operation category; each has its own keyspace and window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuardSpace {
    GrantAdd,
    GrantRemove,
    Enhancement,
    Evaluation,
    Trigger,
}

impl GuardSpace {
    pub fn window_ms(&self, windows: &DebounceWindows) -> u64 {
        match self {
            Self::GrantAdd => windows.grant_add_ms,
            Self::GrantRemove => windows.grant_remove_ms,
            Self::Enhancement => windows.enhancement_ms,
            Self::Evaluation => windows.evaluation_ms,
            Self::Trigger => windows.trigger_ms,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GrantAdd => "grant-add",
            Self::GrantRemove => "grant-remove",
            Self::Enhancement => "enhancement",
            Self::Evaluation => "evaluation",
            Self::Trigger => "trigger",
        }
    }
}

/// `(keyspace, character, source, target descriptor)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuardKey {
    pub space: GuardSpace,
    pub character: CharacterId,
    pub source: Option<SourceId>,
    pub target: String,
}

impl GuardKey {
    pub fn new(
        space: GuardSpace,
        character: &CharacterId,
        source: Option<&SourceId>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            space,
            character: character.clone(),
            source: source.cloned(),
            target: target.into(),
        }
    }

    /// Same character/source/target in another keyspace
    pub fn in_space(&self, space: GuardSpace) -> Self {
        Self {
            space,
            ..self.clone()
        }
    }
}

impl fmt::Display for GuardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.space.as_str(), self.character)?;
        if let Some(source) = &self.source {
            write!(f, ":{}", source)?;
        }
        write!(f, ":{}", self.target)
    }
}

/// Short hex fingerprint of arbitrary descriptor parts
pub fn fingerprint<I, T>(parts: I) -> String
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut hasher = Sha3_256::new();
    for part in parts {
        hasher.update(part.as_ref());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Keyed debounce cache
pub struct DebounceGuard {
    clock: Arc<dyn Clock>,
    windows: DebounceWindows,
    /// key -> expiry (ms)
    held: Mutex<HashMap<GuardKey, u64>>,
}

impl DebounceGuard {
    pub fn new(clock: Arc<dyn Clock>, windows: DebounceWindows) -> Self {
        Self {
            clock,
            windows,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Take `key` for its keyspace window; `false` if already held
    pub fn try_enter(&self, key: &GuardKey) -> bool {
        let now = self.clock.now_ms();
        let mut held = self.held.lock();
        held.retain(|_, expires| *expires > now);

        if held.contains_key(key) {
            trace!(%key, "debounce key held");
            return false;
        }
        held.insert(key.clone(), now + key.space.window_ms(&self.windows));
        true
    }

    /// Let `key` expire `after_ms` from now (0 releases immediately)
    pub fn release(&self, key: &GuardKey, after_ms: u64) {
        let mut held = self.held.lock();
        if after_ms == 0 {
            held.remove(key);
            return;
        }
        let expires = self.clock.now_ms() + after_ms;
        if let Some(slot) = held.get_mut(key) {
            *slot = expires;
        }
    }

    pub fn is_held(&self, key: &GuardKey) -> bool {
        let now = self.clock.now_ms();
        self.held.lock().get(key).is_some_and(|expires| *expires > now)
    }

    /// Unexpired keys
    pub fn held_count(&self) -> usize {
        let now = self.clock.now_ms();
        self.held.lock().values().filter(|e| **e > now).count()
    }
}

// ============================================================================
// Per-character write locks
// ============================================================================

/// Async mutex per character, created on first use
#[derive(Clone, Default)]
pub struct CharacterLocks {
    locks: Arc<Mutex<HashMap<CharacterId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl CharacterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `character`. Never hold two at once.
    pub async fn lock(&self, character: &CharacterId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self.locks.lock().entry(character.clone()).or_default().clone();
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
