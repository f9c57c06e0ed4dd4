//! Cooldown/Resource Tracker
//!
//! Once-per-window markers stored in the owning character's state flags. A key is
//! `cooldown.<gate>.<source>` or `zone.<zone>`; its value is the round it was set.
//! Boundaries (rest, combat end, round advance) clear exactly the keys whose
//! window elapsed. Flags this module can't parse are never touched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::guard::CharacterLocks;
use crate::host::{Host, HostError};
use crate::model::{CharacterId, FlagMap, SourceId, ZoneId};

const COOLDOWN_PREFIX: &str = "cooldown.";
const ZONE_PREFIX: &str = "zone.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Window {
    Rest,
    Combat,
    Round,
}

/// Gated behaviours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gate {
    ReflectShock,
    HealPulse,
    WatchersMantle,
    BonusActionPulse,
}

impl Gate {
    pub const ALL: [Gate; 4] = [
        Gate::ReflectShock,
        Gate::HealPulse,
        Gate::WatchersMantle,
        Gate::BonusActionPulse,
    ];

    pub fn window(&self) -> Window {
        match self {
            Self::ReflectShock | Self::HealPulse | Self::WatchersMantle => Window::Rest,
            Self::BonusActionPulse => Window::Round,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReflectShock => "reflect_shock",
            Self::HealPulse => "heal_pulse",
            Self::WatchersMantle => "watchers_mantle",
            Self::BonusActionPulse => "bonus_action_pulse",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.as_str() == s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CooldownKey {
    Gate { gate: Gate, source: SourceId },
    /// Zone exposure this round
    Zone(ZoneId),
}

impl CooldownKey {
    pub fn gate(gate: Gate, source: &SourceId) -> Self {
        Self::Gate {
            gate,
            source: source.clone(),
        }
    }

    pub fn zone(zone: &ZoneId) -> Self {
        Self::Zone(zone.clone())
    }

    pub fn window(&self) -> Window {
        match self {
            Self::Gate { gate, .. } => gate.window(),
            Self::Zone(_) => Window::Round,
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        if let Some(rest) = key.strip_prefix(COOLDOWN_PREFIX) {
            let (gate, source) = rest.split_once('.')?;
            if source.is_empty() {
                return None;
            }
            return Some(Self::Gate {
                gate: Gate::parse(gate)?,
                source: SourceId::from(source),
            });
        }
        let zone = key.strip_prefix(ZONE_PREFIX)?;
        (!zone.is_empty()).then(|| Self::Zone(ZoneId::from(zone)))
    }
}

impl fmt::Display for CooldownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gate { gate, source } => write!(f, "{}{}.{}", COOLDOWN_PREFIX, gate.as_str(), source),
            Self::Zone(zone) => write!(f, "{}{}", ZONE_PREFIX, zone),
        }
    }
}

/// Lifecycle boundary that may clear keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Rest,
    CombatEnded,
    /// The scene advanced to `round`
    RoundAdvanced { round: u32 },
}

/// Keys in `flags` whose window elapsed at `boundary`, in flag order
pub fn keys_due(flags: &FlagMap, boundary: Boundary) -> Vec<CooldownKey> {
    flags
        .iter()
        .filter_map(|(raw, value)| {
            let key = CooldownKey::parse(raw)?;
            let due = match (boundary, key.window()) {
                (Boundary::Rest, Window::Rest) => true,
                (Boundary::CombatEnded, Window::Combat | Window::Round) => true,
                (Boundary::RoundAdvanced { round }, Window::Round) => {
                    value.as_u64().map_or(true, |set| set < round as u64)
                }
                _ => false,
            };
            due.then_some(key)
        })
        .collect()
}

/// Per-character once-per-window markers
#[derive(Clone)]
pub struct CooldownTracker {
    host: Arc<dyn Host>,
    locks: CharacterLocks,
}

impl CooldownTracker {
    pub fn new(host: Arc<dyn Host>, locks: CharacterLocks) -> Self {
        Self { host, locks }
    }

    /// Check and mark `key` as one step under the character's write lock.
    /// `false` when the window was already used.
    pub async fn claim(&self, character: &CharacterId, key: &CooldownKey, round: u32) -> Result<bool, HostError> {
        let _write = self.locks.lock(character).await;
        let owner = self.host.character(character).await?;
        if owner.state_flags.contains_key(&key.to_string()) {
            debug!(%character, %key, "cooldown already used");
            return Ok(false);
        }
        self.mark_triggered(character, key, round).await?;
        Ok(true)
    }

    pub async fn has_triggered(&self, character: &CharacterId, key: &CooldownKey) -> Result<bool, HostError> {
        let owner = self.host.character(character).await?;
        Ok(owner.state_flags.contains_key(&key.to_string()))
    }

    pub async fn mark_triggered(
        &self,
        character: &CharacterId,
        key: &CooldownKey,
        round: u32,
    ) -> Result<(), HostError> {
        debug!(%character, %key, round, "cooldown marked");
        self.host
            .set_state_flag(character, &key.to_string(), round.into())
            .await
    }

    pub async fn clear(&self, character: &CharacterId, keys: &[CooldownKey]) -> Result<(), HostError> {
        if keys.is_empty() {
            return Ok(());
        }
        let raw: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        debug!(%character, count = raw.len(), "cooldowns cleared");
        self.host.unset_state_flags(character, &raw).await
    }

    /// Clear everything due at `boundary`; returns what was cleared
    pub async fn clear_boundary(
        &self,
        character: &CharacterId,
        boundary: Boundary,
    ) -> Result<Vec<CooldownKey>, HostError> {
        let owner = self.host.character(character).await?;
        let due = keys_due(&owner.state_flags, boundary);
        self.clear(character, &due).await?;
        Ok(due)
    }
}
