//! Configuration Store
//!
//! The upgrade configuration lives as a flat key-value map on the source entity.
//! This module turns that map into a typed `UpgradeConfig` (tier, three cluster
//! slots, grant references, gating flags) and writes it back through the host.
//! Keys are an exhaustive enum so a misspelled category can't silently read as 0.

mod behavior;

pub use behavior::{behavior, behaviors, live_behaviors, Behavior, SourceClass};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::dice::{DiceFormula, Die};
use crate::host::{Host, HostError};
use crate::model::{Attunement, CharacterId, DamageType, FlagMap, SourceEntity, SourceId};

/// Persisted configuration keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    PowerTier,
    Cluster1,
    Cluster2,
    Cluster3,
    SelectedSpell,
    SelectedFeat,
    RequiresEquipped,
    RequiresAttunement,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 8] = [
        ConfigKey::PowerTier,
        ConfigKey::Cluster1,
        ConfigKey::Cluster2,
        ConfigKey::Cluster3,
        ConfigKey::SelectedSpell,
        ConfigKey::SelectedFeat,
        ConfigKey::RequiresEquipped,
        ConfigKey::RequiresAttunement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PowerTier => "power_tier",
            Self::Cluster1 => "cluster_1",
            Self::Cluster2 => "cluster_2",
            Self::Cluster3 => "cluster_3",
            Self::SelectedSpell => "selected_spell",
            Self::SelectedFeat => "selected_feat",
            Self::RequiresEquipped => "requires_equipped",
            Self::RequiresAttunement => "requires_attunement",
        }
    }
}

/// Power tier, 0 = inactive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PowerTier {
    Inactive,
    One,
    Two,
    Three,
}

impl PowerTier {
    pub fn from_ordinal(n: u8) -> Option<Self> {
        match n {
            0 => Some(Self::Inactive),
            1 => Some(Self::One),
            2 => Some(Self::Two),
            3 => Some(Self::Three),
            _ => None,
        }
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Inactive => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    /// Damage / healing die for this tier
    pub fn die(&self) -> Option<DiceFormula> {
        match self {
            Self::Inactive => None,
            Self::One => Some(DiceFormula::single(Die::D4)),
            Self::Two => Some(DiceFormula::single(Die::D6)),
            Self::Three => Some(DiceFormula::single(Die::D8)),
        }
    }

    /// Flat armor bonus for this tier
    pub fn bonus(&self) -> i32 {
        self.ordinal() as i32
    }

    /// Die used by triggers; an inactive tier still rolls the smallest die
    pub fn trigger_die(&self) -> DiceFormula {
        self.die().unwrap_or(DiceFormula::single(Die::D4))
    }
}

/// Modifier family selected in a cluster slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    /// 1: radiant / thunder
    Storm,
    /// 2: acid / necrotic
    Blight,
    /// 3: fire / cold
    Flux,
}

impl Family {
    pub fn from_ordinal(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::Storm),
            2 => Some(Self::Blight),
            3 => Some(Self::Flux),
            _ => None,
        }
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Storm => 1,
            Self::Blight => 2,
            Self::Flux => 3,
        }
    }

    pub fn damage_types(&self) -> [DamageType; 2] {
        match self {
            Self::Storm => [DamageType::Radiant, DamageType::Thunder],
            Self::Blight => [DamageType::Acid, DamageType::Necrotic],
            Self::Flux => [DamageType::Fire, DamageType::Cold],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterSlot {
    First,
    Second,
    Third,
}

impl ClusterSlot {
    pub const ALL: [ClusterSlot; 3] = [ClusterSlot::First, ClusterSlot::Second, ClusterSlot::Third];

    pub fn index(&self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
            Self::Third => 2,
        }
    }

    pub fn key(&self) -> ConfigKey {
        match self {
            Self::First => ConfigKey::Cluster1,
            Self::Second => ConfigKey::Cluster2,
            Self::Third => ConfigKey::Cluster3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantSlot {
    Spell,
    Feat,
}

impl GrantSlot {
    pub fn key(&self) -> ConfigKey {
        match self {
            Self::Spell => ConfigKey::SelectedSpell,
            Self::Feat => ConfigKey::SelectedFeat,
        }
    }
}

/// Owner-selected content identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantReference {
    pub slot: GrantSlot,
    pub identifier: String,
}

/// Typed upgrade configuration of one source entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeConfig {
    pub tier: PowerTier,
    pub clusters: [Option<Family>; 3],
    pub grants: Vec<GrantReference>,
    pub requires_equipped: bool,
    pub requires_attunement: bool,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            tier: PowerTier::Inactive,
            clusters: [None; 3],
            grants: Vec::new(),
            requires_equipped: false,
            requires_attunement: false,
        }
    }
}

impl UpgradeConfig {
    pub fn new(tier: PowerTier) -> Self {
        Self {
            tier,
            ..Self::default()
        }
    }

    pub fn with_cluster(mut self, slot: ClusterSlot, family: Option<Family>) -> Self {
        self.clusters[slot.index()] = family;
        self
    }

    pub fn with_grant(mut self, slot: GrantSlot, identifier: impl Into<String>) -> Self {
        self.grants.retain(|g| g.slot != slot);
        self.grants.push(GrantReference {
            slot,
            identifier: identifier.into(),
        });
        self
    }

    pub fn cluster(&self, slot: ClusterSlot) -> Option<Family> {
        self.clusters[slot.index()]
    }

    pub fn is_active(&self) -> bool {
        self.tier != PowerTier::Inactive
    }

    /// Parse the flat map. `None` when no upgrade key is present at all.
    pub fn from_flags(flags: &FlagMap) -> Option<Self> {
        if !ConfigKey::ALL.iter().any(|k| flags.contains_key(k.as_str())) {
            return None;
        }

        let tier = PowerTier::from_ordinal(read_ordinal(flags, ConfigKey::PowerTier)).unwrap_or_else(|| {
            warn!("power tier out of range, treating as inactive");
            PowerTier::Inactive
        });

        let mut clusters = [None; 3];
        for slot in ClusterSlot::ALL {
            let n = read_ordinal(flags, slot.key());
            clusters[slot.index()] = match n {
                0 => None,
                n => Family::from_ordinal(n).or_else(|| {
                    warn!(key = slot.key().as_str(), value = n, "cluster ordinal out of range, treating as none");
                    None
                }),
            };
        }

        let grants = [GrantSlot::Spell, GrantSlot::Feat]
            .into_iter()
            .filter_map(|slot| {
                read_identifier(flags, slot.key()).map(|identifier| GrantReference { slot, identifier })
            })
            .collect();

        Some(Self {
            tier,
            clusters,
            grants,
            requires_equipped: read_bool(flags, ConfigKey::RequiresEquipped),
            requires_attunement: read_bool(flags, ConfigKey::RequiresAttunement),
        })
    }

    /// Flat map layout written back to the source entity
    pub fn to_flags(&self) -> FlagMap {
        let mut flags = FlagMap::new();
        flags.insert(
            ConfigKey::PowerTier.as_str().into(),
            self.tier.ordinal().to_string().into(),
        );
        for slot in ClusterSlot::ALL {
            let n = self.cluster(slot).map_or(0, |f| f.ordinal());
            flags.insert(slot.key().as_str().into(), n.to_string().into());
        }
        // unset slots are written as null so a full commit clears them
        for slot in [GrantSlot::Spell, GrantSlot::Feat] {
            let value = self
                .grants
                .iter()
                .find(|g| g.slot == slot)
                .map_or(serde_json::Value::Null, |g| g.identifier.clone().into());
            flags.insert(slot.key().as_str().into(), value);
        }
        flags.insert(
            ConfigKey::RequiresEquipped.as_str().into(),
            self.requires_equipped.into(),
        );
        flags.insert(
            ConfigKey::RequiresAttunement.as_str().into(),
            self.requires_attunement.into(),
        );
        flags
    }
}

fn read_ordinal(flags: &FlagMap, key: ConfigKey) -> u8 {
    match flags.get(key.as_str()) {
        None | Some(serde_json::Value::Null) => 0,
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => 0,
        Some(serde_json::Value::String(s)) => s.trim().parse::<u8>().unwrap_or_else(|_| {
            warn!(key = key.as_str(), value = %s, "unparseable ordinal, treating as 0");
            0
        }),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(u8::MAX),
        Some(other) => {
            warn!(key = key.as_str(), value = %other, "unexpected ordinal value, treating as 0");
            0
        }
    }
}

fn read_bool(flags: &FlagMap, key: ConfigKey) -> bool {
    match flags.get(key.as_str()) {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => matches!(s.trim(), "true" | "1"),
        Some(serde_json::Value::Number(n)) => n.as_u64().is_some_and(|v| v != 0),
        _ => false,
    }
}

fn read_identifier(flags: &FlagMap, key: ConfigKey) -> Option<String> {
    match flags.get(key.as_str()) {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// `equipped AND (not requires_attunement OR attuned)`.
///
/// A source whose attunement is `Required` counts as requiring attunement even when
/// the configuration flag is unset.
pub fn activation_met(source: &SourceEntity, config: &UpgradeConfig) -> bool {
    let requires_attunement = config.requires_attunement || source.attunement == Attunement::Required;
    source.equipped && (!requires_attunement || source.attuned)
}

/// Reads and writes upgrade configuration through the host
#[derive(Clone)]
pub struct ConfigStore {
    host: Arc<dyn Host>,
}

impl ConfigStore {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { host }
    }

    pub async fn read(
        &self,
        character: &CharacterId,
        source: &SourceId,
    ) -> Result<Option<UpgradeConfig>, HostError> {
        let owner = self.host.character(character).await?;
        let item = owner
            .item(source)
            .ok_or_else(|| HostError::SourceNotFound(source.clone()))?;
        Ok(UpgradeConfig::from_flags(&item.flags))
    }

    /// Commit a full configuration
    pub async fn write(
        &self,
        character: &CharacterId,
        source: &SourceId,
        config: &UpgradeConfig,
    ) -> Result<(), HostError> {
        self.write_patch(character, source, config.to_flags()).await
    }

    /// Commit a partial flag patch; `null` values remove keys
    pub async fn write_patch(
        &self,
        character: &CharacterId,
        source: &SourceId,
        patch: FlagMap,
    ) -> Result<(), HostError> {
        debug!(%character, %source, keys = patch.len(), "writing upgrade flags");
        self.host.update_source_flags(character, source, patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceKind;
    use serde_json::json;

    fn flags(pairs: &[(&str, serde_json::Value)]) -> FlagMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_missing_configuration_is_none() {
        assert!(UpgradeConfig::from_flags(&FlagMap::new()).is_none());
        let unrelated = flags(&[("color", json!("red"))]);
        assert!(UpgradeConfig::from_flags(&unrelated).is_none());
    }

    #[test]
    fn test_parse_string_and_number_ordinals() {
        let f = flags(&[
            ("power_tier", json!("2")),
            ("cluster_1", json!(1)),
            ("cluster_3", json!("3")),
            ("selected_feat", json!("alert")),
        ]);
        let config = UpgradeConfig::from_flags(&f).unwrap();
        assert_eq!(config.tier, PowerTier::Two);
        assert_eq!(config.cluster(ClusterSlot::First), Some(Family::Storm));
        assert_eq!(config.cluster(ClusterSlot::Second), None);
        assert_eq!(config.cluster(ClusterSlot::Third), Some(Family::Flux));
        assert_eq!(config.grants.len(), 1);
        assert_eq!(config.grants[0].identifier, "alert");
    }

    #[test]
    fn test_out_of_range_values_are_inactive() {
        let f = flags(&[("power_tier", json!("9")), ("cluster_2", json!(7))]);
        let config = UpgradeConfig::from_flags(&f).unwrap();
        assert_eq!(config.tier, PowerTier::Inactive);
        assert_eq!(config.cluster(ClusterSlot::Second), None);
    }

    #[test]
    fn test_flags_written_back_parse_identically() {
        let config = UpgradeConfig::new(PowerTier::Three)
            .with_cluster(ClusterSlot::Second, Some(Family::Blight))
            .with_grant(GrantSlot::Spell, "shield");
        let parsed = UpgradeConfig::from_flags(&config.to_flags()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_full_commit_clears_dropped_grant() {
        let mut stored = UpgradeConfig::new(PowerTier::Two)
            .with_grant(GrantSlot::Feat, "alert")
            .to_flags();
        // host merge: null removes the key
        for (key, value) in UpgradeConfig::new(PowerTier::Two).to_flags() {
            if value.is_null() {
                stored.remove(&key);
            } else {
                stored.insert(key, value);
            }
        }
        let parsed = UpgradeConfig::from_flags(&stored).unwrap();
        assert!(parsed.grants.is_empty());
    }

    #[test]
    fn test_tier_dice() {
        assert_eq!(PowerTier::Inactive.die(), None);
        assert_eq!(PowerTier::One.die().unwrap().to_string(), "1d4");
        assert_eq!(PowerTier::Two.die().unwrap().to_string(), "1d6");
        assert_eq!(PowerTier::Three.die().unwrap().to_string(), "1d8");
        assert_eq!(PowerTier::Inactive.trigger_die().to_string(), "1d4");
    }

    #[test]
    fn test_activation_requirements() {
        let mut ring = SourceEntity::new("r", "Ring", SourceKind::Other);
        let config = UpgradeConfig::new(PowerTier::One);
        assert!(!activation_met(&ring, &config), "unequipped never activates");

        ring.equipped = true;
        assert!(activation_met(&ring, &config));

        let attuned_config = UpgradeConfig {
            requires_attunement: true,
            ..config.clone()
        };
        assert!(!activation_met(&ring, &attuned_config));
        ring.attuned = true;
        assert!(activation_met(&ring, &attuned_config));

        ring.attuned = false;
        ring.attunement = Attunement::Required;
        assert!(!activation_met(&ring, &config), "required attunement gates too");
    }
}
