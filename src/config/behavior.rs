//! Cluster behaviour table.
//!
//! `(source class, cluster slot, family)` maps to exactly one behaviour. The match
//! below is exhaustive; adding a family or slot is a compile error until the table
//! covers it.

use serde::{Deserialize, Serialize};

use super::{activation_met, ClusterSlot, Family, UpgradeConfig};
use crate::constants::{MOBILE_FEAT, SHARPSHOOTER_FEAT};
use crate::model::{DamageType, SourceEntity, WeaponStyle};

/// What kind of behaviour table a source entity uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceClass {
    Armor,
    MeleeWeapon,
    RangedWeapon,
}

impl SourceClass {
    pub fn of(source: &SourceEntity) -> Option<Self> {
        if source.is_armor() {
            return Some(Self::Armor);
        }
        match source.weapon_style()? {
            WeaponStyle::Melee => Some(Self::MeleeWeapon),
            WeaponStyle::Ranged => Some(Self::RangedWeapon),
            WeaponStyle::Other => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Behavior {
    // Armor
    ReflectShock,
    ProneRecovery,
    HealPulse,
    RuneEvasion,
    GrantMobile,
    BonusActionPulse,
    RuneShield,
    WatchersMantle,
    IllusoryAura,

    // Melee weapon
    ElementalBurst(Family),
    CritPush,
    CritStagger,
    TerrainPulse,
    RunePrecision,
    Gravebind,
    PhantomAdvantage,

    // Ranged weapon
    TracerWhistle,
    RunePoison,
    RuneSlow,
    DebrisCover,
    DashBlock,
    RevealPulse,
    RunePull,
    Sporewake,
    GrantSharpshooter,
}

impl Behavior {
    /// Only fires on critical hits
    pub fn crit_only(&self) -> bool {
        matches!(self, Self::CritPush | Self::CritStagger | Self::RunePrecision)
    }

    /// Grant implied by the behaviour (reconciled like a selected grant)
    pub fn implied_grant(&self) -> Option<&'static str> {
        match self {
            Self::GrantMobile => Some(MOBILE_FEAT),
            Self::GrantSharpshooter => Some(SHARPSHOOTER_FEAT),
            _ => None,
        }
    }

    /// Damage types injected into the weapon while active.
    ///
    /// Melee families offer two elements, one of which is chosen.
    pub fn injection_options(&self) -> &'static [DamageType] {
        match self {
            Self::ElementalBurst(Family::Storm) => &[DamageType::Radiant, DamageType::Thunder],
            Self::ElementalBurst(Family::Blight) => &[DamageType::Acid, DamageType::Necrotic],
            Self::ElementalBurst(Family::Flux) => &[DamageType::Fire, DamageType::Cold],
            Self::TracerWhistle => &[DamageType::Sonic],
            Self::RunePoison => &[DamageType::Poison],
            _ => &[],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ReflectShock => "Reflect Shock",
            Self::ProneRecovery => "Prone Recovery",
            Self::HealPulse => "Heal Pulse",
            Self::RuneEvasion => "Rune Evasion",
            Self::GrantMobile => "Mobile",
            Self::BonusActionPulse => "Bonus Action Pulse",
            Self::RuneShield => "Rune Shield",
            Self::WatchersMantle => "Buried Watcher's Mantle",
            Self::IllusoryAura => "Illusory Aura",
            Self::ElementalBurst(_) => "Elemental Burst",
            Self::CritPush => "Crushing Push",
            Self::CritStagger => "Stagger",
            Self::TerrainPulse => "Terrain Pulse",
            Self::RunePrecision => "Rune Precision",
            Self::Gravebind => "Gravebind",
            Self::PhantomAdvantage => "Phantom Advantage",
            Self::TracerWhistle => "Tracer Whistle",
            Self::RunePoison => "Rune Poison",
            Self::RuneSlow => "Rune Slow",
            Self::DebrisCover => "Debris Cover",
            Self::DashBlock => "Dash Block",
            Self::RevealPulse => "Reveal Pulse",
            Self::RunePull => "Rune Pull",
            Self::Sporewake => "Sporewake",
            Self::GrantSharpshooter => "Sharpshooter",
        }
    }
}

pub fn behavior(class: SourceClass, slot: ClusterSlot, family: Family) -> Behavior {
    use Behavior::*;
    use ClusterSlot::*;
    use Family::*;

    match (class, slot, family) {
        (SourceClass::Armor, First, Storm) => ReflectShock,
        (SourceClass::Armor, First, Blight) => ProneRecovery,
        (SourceClass::Armor, First, Flux) => HealPulse,
        (SourceClass::Armor, Second, Storm) => RuneEvasion,
        (SourceClass::Armor, Second, Blight) => GrantMobile,
        (SourceClass::Armor, Second, Flux) => BonusActionPulse,
        (SourceClass::Armor, Third, Storm) => RuneShield,
        (SourceClass::Armor, Third, Blight) => WatchersMantle,
        (SourceClass::Armor, Third, Flux) => IllusoryAura,

        (SourceClass::MeleeWeapon, First, f) => ElementalBurst(f),
        (SourceClass::MeleeWeapon, Second, Storm) => CritPush,
        (SourceClass::MeleeWeapon, Second, Blight) => CritStagger,
        (SourceClass::MeleeWeapon, Second, Flux) => TerrainPulse,
        (SourceClass::MeleeWeapon, Third, Storm) => RunePrecision,
        (SourceClass::MeleeWeapon, Third, Blight) => Gravebind,
        (SourceClass::MeleeWeapon, Third, Flux) => PhantomAdvantage,

        (SourceClass::RangedWeapon, First, Storm) => TracerWhistle,
        (SourceClass::RangedWeapon, First, Blight) => RunePoison,
        (SourceClass::RangedWeapon, First, Flux) => RuneSlow,
        (SourceClass::RangedWeapon, Second, Storm) => DebrisCover,
        (SourceClass::RangedWeapon, Second, Blight) => DashBlock,
        (SourceClass::RangedWeapon, Second, Flux) => RevealPulse,
        (SourceClass::RangedWeapon, Third, Storm) => RunePull,
        (SourceClass::RangedWeapon, Third, Blight) => Sporewake,
        (SourceClass::RangedWeapon, Third, Flux) => GrantSharpshooter,
    }
}

/// Behaviours configured on a source, in slot order. Empty for tools, natural armor
/// and unclassified weapons.
pub fn behaviors(source: &SourceEntity, config: &UpgradeConfig) -> Vec<(ClusterSlot, Behavior)> {
    let Some(class) = SourceClass::of(source) else {
        return Vec::new();
    };
    ClusterSlot::ALL
        .into_iter()
        .filter_map(|slot| config.cluster(slot).map(|f| (slot, behavior(class, slot, f))))
        .collect()
}

/// Behaviours that may fire right now: config active and activation requirements met
pub fn live_behaviors(source: &SourceEntity, config: &UpgradeConfig) -> Vec<Behavior> {
    if !config.is_active() || !activation_met(source, config) {
        return Vec::new();
    }
    behaviors(source, config).into_iter().map(|(_, b)| b).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PowerTier;
    use crate::model::SourceKind;

    #[test]
    fn test_table_is_distinct_per_class() {
        let mut seen = std::collections::HashSet::new();
        for class in [SourceClass::Armor, SourceClass::MeleeWeapon, SourceClass::RangedWeapon] {
            for slot in ClusterSlot::ALL {
                for family in [Family::Storm, Family::Blight, Family::Flux] {
                    seen.insert(behavior(class, slot, family));
                }
            }
        }
        // 9 armor + 3 bursts + 6 melee + 9 ranged
        assert_eq!(seen.len(), 27);
    }

    #[test]
    fn test_source_classes() {
        let sword = SourceEntity::new("s", "Sword", SourceKind::Weapon(WeaponStyle::Melee));
        let bow = SourceEntity::new("b", "Bow", SourceKind::Weapon(WeaponStyle::Ranged));
        let hide = SourceEntity::new("h", "Hide", SourceKind::Armor { natural: true });
        let kit = SourceEntity::new("k", "Kit", SourceKind::Tool);
        assert_eq!(SourceClass::of(&sword), Some(SourceClass::MeleeWeapon));
        assert_eq!(SourceClass::of(&bow), Some(SourceClass::RangedWeapon));
        assert_eq!(SourceClass::of(&hide), None);
        assert_eq!(SourceClass::of(&kit), None);
    }

    #[test]
    fn test_live_behaviors_need_tier_and_equip() {
        let mut bow = SourceEntity::new("b", "Bow", SourceKind::Weapon(WeaponStyle::Ranged));
        let config = UpgradeConfig::new(PowerTier::One).with_cluster(ClusterSlot::Third, Some(Family::Flux));
        assert!(live_behaviors(&bow, &config).is_empty());
        bow.equipped = true;
        assert_eq!(live_behaviors(&bow, &config), vec![Behavior::GrantSharpshooter]);
        let inactive = UpgradeConfig {
            tier: PowerTier::Inactive,
            ..config
        };
        assert!(live_behaviors(&bow, &inactive).is_empty());
    }

    #[test]
    fn test_crit_only_and_grants() {
        assert!(Behavior::CritPush.crit_only());
        assert!(!Behavior::Gravebind.crit_only());
        assert_eq!(Behavior::GrantMobile.implied_grant(), Some("mobile"));
        assert_eq!(Behavior::TracerWhistle.injection_options(), &[DamageType::Sonic]);
    }
}
