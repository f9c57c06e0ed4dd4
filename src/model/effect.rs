//! Derived effect records.
//!
//! Every record carries its semantic category and the source that produced it.
//! `(origin, category)` is unique per character; the reconciler and the trigger
//! writer both enforce it.

use serde::{Deserialize, Serialize};

use super::{CharacterId, EffectId, SourceId};
use crate::dice::DiceFormula;

/// Damage types injected into or dealt by upgraded equipment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DamageType {
    Radiant,
    Thunder,
    Acid,
    Necrotic,
    Fire,
    Cold,
    Sonic,
    Poison,
    Lightning,
}

impl DamageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Radiant => "radiant",
            Self::Thunder => "thunder",
            Self::Acid => "acid",
            Self::Necrotic => "necrotic",
            Self::Fire => "fire",
            Self::Cold => "cold",
            Self::Sonic => "sonic",
            Self::Poison => "poison",
            Self::Lightning => "lightning",
        }
    }
}

/// Semantic category of a derived effect.
///
/// The first four are owned by the reconciler; the rest are written by triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EffectCategory {
    // Reconciled
    StatBonus,
    PassiveMovement,
    ElementalInjection,
    ConditionalAura,

    // Trigger-written
    TracerWhistle,
    RunePoison,
    RuneSlow,
    Staggered,
    DashBlocked,
    ReactionBlocked,
    Gravebound,
    Restrained,
    PhantomAdvantage,
    RunePrecision,
    RuneShield,
    BonusActionBlocked,
    WatchersMantle,
    Frightened,
    SporePoisoned,
}

impl EffectCategory {
    pub fn is_reconciled(&self) -> bool {
        matches!(
            self,
            Self::StatBonus | Self::PassiveMovement | Self::ElementalInjection | Self::ConditionalAura
        )
    }

    /// Display label for trigger-written categories
    pub fn label(&self) -> &'static str {
        match self {
            Self::StatBonus => "Enhancement",
            Self::PassiveMovement => "Rune Evasion",
            Self::ElementalInjection => "Rune Infusion",
            Self::ConditionalAura => "Illusory Aura",
            Self::TracerWhistle => "Tracer Whistle",
            Self::RunePoison => "Rune Poison",
            Self::RuneSlow => "Rune Slow",
            Self::Staggered => "Staggered",
            Self::DashBlocked => "Dash Blocked",
            Self::ReactionBlocked => "Reaction Blocked",
            Self::Gravebound => "Gravebound",
            Self::Restrained => "Restrained",
            Self::PhantomAdvantage => "Phantom Advantage",
            Self::RunePrecision => "Rune Precision",
            Self::RuneShield => "Rune Shield",
            Self::BonusActionBlocked => "Bonus Action Blocked",
            Self::WatchersMantle => "Buried Watcher's Mantle",
            Self::Frightened => "Frightened",
            Self::SporePoisoned => "Poisoned (Sporewake)",
        }
    }
}

/// Stat or behaviour a change applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatKey {
    ArmorClassBonus,
    AttackBonus,
    WeaponDamageBonus,
    WeaponDamageType,
    WalkSpeed,
    BonusAction,
    Reaction,
    Dash,
    DamageResistanceAll,
    AttackDisadvantage,
    RangedDisadvantageAgainstSelf,
    AdvantageNextAttack,
    MoveThroughAllies,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeMode {
    Add,
    Override,
    Multiply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeValue {
    Flat(i32),
    /// Multiplicative factor in percent (50 = half)
    Percent(i32),
    Dice(DiceFormula),
    Damage(DamageType),
    Flag(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectChange {
    pub key: StatKey,
    pub mode: ChangeMode,
    pub value: ChangeValue,
}

impl EffectChange {
    pub fn add(key: StatKey, value: ChangeValue) -> Self {
        Self {
            key,
            mode: ChangeMode::Add,
            value,
        }
    }

    pub fn set(key: StatKey, value: ChangeValue) -> Self {
        Self {
            key,
            mode: ChangeMode::Override,
            value,
        }
    }

    pub fn scale(key: StatKey, percent: i32) -> Self {
        Self {
            key,
            mode: ChangeMode::Multiply,
            value: ChangeValue::Percent(percent),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifetime {
    Rounds(u32),
    Indefinite,
}

impl Lifetime {
    pub fn is_expired(&self, created_at_round: u32, current_round: u32) -> bool {
        match self {
            Self::Rounds(n) => current_round >= created_at_round.saturating_add(*n),
            Self::Indefinite => false,
        }
    }
}

/// Extra per-category data read back by later triggers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectPayload {
    None,
    PoisonTick { die: DiceFormula, dc: u32 },
    NecroticTick { die: DiceFormula },
    Precision { against: Option<CharacterId> },
    Slow { rolled: u32, penalty_ft: i32 },
}

/// The value of a derived effect; two specs are equal iff the effect is the same
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectSpec {
    pub label: String,
    pub category: EffectCategory,
    pub origin: SourceId,
    pub changes: Vec<EffectChange>,
    pub lifetime: Lifetime,
    pub payload: EffectPayload,
}

impl EffectSpec {
    pub fn new(category: EffectCategory, origin: SourceId, lifetime: Lifetime) -> Self {
        Self {
            label: category.label().to_string(),
            category,
            origin,
            changes: Vec::new(),
            lifetime,
            payload: EffectPayload::None,
        }
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_change(mut self, change: EffectChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn with_payload(mut self, payload: EffectPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Damage types this spec injects into its weapon
    pub fn injected_types(&self) -> impl Iterator<Item = DamageType> + '_ {
        self.changes.iter().filter_map(|c| match (c.key, c.value) {
            (StatKey::WeaponDamageType, ChangeValue::Damage(t)) => Some(t),
            _ => None,
        })
    }
}

/// Persisted derived effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedEffect {
    pub id: EffectId,
    pub spec: EffectSpec,
    pub created_at_round: u32,
    /// Host-assigned creation order, newest is largest
    pub created_seq: u64,
}

impl DerivedEffect {
    pub fn is_expired(&self, current_round: u32) -> bool {
        self.spec.lifetime.is_expired(self.created_at_round, current_round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciled_categories() {
        assert!(EffectCategory::StatBonus.is_reconciled());
        assert!(EffectCategory::ConditionalAura.is_reconciled());
        assert!(!EffectCategory::RuneShield.is_reconciled());
        assert!(!EffectCategory::SporePoisoned.is_reconciled());
    }

    #[test]
    fn test_lifetime_expiry() {
        assert!(!Lifetime::Rounds(2).is_expired(3, 4));
        assert!(Lifetime::Rounds(2).is_expired(3, 5));
        assert!(!Lifetime::Indefinite.is_expired(0, u32::MAX));
        assert!(!Lifetime::Rounds(u32::MAX).is_expired(5, u32::MAX - 1));
    }

    #[test]
    fn test_spec_equality_is_by_value() {
        let origin = SourceId::from("sword");
        let a = EffectSpec::new(EffectCategory::StatBonus, origin.clone(), Lifetime::Indefinite)
            .with_change(EffectChange::add(StatKey::ArmorClassBonus, ChangeValue::Flat(2)));
        let b = a.clone();
        let c = EffectSpec::new(EffectCategory::StatBonus, origin, Lifetime::Indefinite)
            .with_change(EffectChange::add(StatKey::ArmorClassBonus, ChangeValue::Flat(3)));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_injected_types() {
        let spec = EffectSpec::new(
            EffectCategory::ElementalInjection,
            SourceId::from("bow"),
            Lifetime::Indefinite,
        )
        .with_change(EffectChange::add(
            StatKey::WeaponDamageType,
            ChangeValue::Damage(DamageType::Fire),
        ))
        .with_change(EffectChange::add(
            StatKey::WeaponDamageType,
            ChangeValue::Damage(DamageType::Sonic),
        ));
        let types: Vec<_> = spec.injected_types().collect();
        assert_eq!(types, vec![DamageType::Fire, DamageType::Sonic]);
    }
}
