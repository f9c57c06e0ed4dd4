//! Desired derived state for one source entity. Pure: the random element pick is
//! drawn by the caller and passed in.

use std::collections::BTreeMap;

use crate::config::{activation_met, live_behaviors, Behavior, UpgradeConfig};
use crate::constants::ILLUSORY_AURA_HP_PERCENT;
use crate::grants::ContentKind;
use crate::model::{
    ChangeValue, DamageType, EffectCategory, EffectChange, EffectSpec, HitPoints, Lifetime, SourceEntity, StatKey,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredGrant {
    pub identifier: String,
    pub kind: ContentKind,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredState {
    pub effects: BTreeMap<EffectCategory, EffectSpec>,
    pub grants: Vec<DesiredGrant>,
}

/// Elements the source's injection may carry, empty when it injects nothing
pub fn injection_options(source: &SourceEntity, config: &UpgradeConfig) -> &'static [DamageType] {
    live_behaviors(source, config)
        .into_iter()
        .map(|b| b.injection_options())
        .find(|options| !options.is_empty())
        .unwrap_or(&[])
}

pub fn desired_state(
    source: &SourceEntity,
    config: Option<&UpgradeConfig>,
    hp: HitPoints,
    element: Option<DamageType>,
) -> DesiredState {
    let mut desired = DesiredState::default();
    let Some(config) = config else {
        return desired;
    };
    if !config.is_active() || !activation_met(source, config) {
        return desired;
    }

    if let Some(bonus) = stat_bonus(source, config) {
        desired.effects.insert(EffectCategory::StatBonus, bonus);
    }

    for behavior in live_behaviors(source, config) {
        match behavior {
            Behavior::RuneEvasion => {
                desired.effects.insert(
                    EffectCategory::PassiveMovement,
                    EffectSpec::new(EffectCategory::PassiveMovement, source.id.clone(), Lifetime::Indefinite)
                        .with_change(EffectChange::set(StatKey::MoveThroughAllies, ChangeValue::Flag(true))),
                );
            }
            Behavior::IllusoryAura if hp.max > 0 && hp.percent() <= ILLUSORY_AURA_HP_PERCENT => {
                desired.effects.insert(
                    EffectCategory::ConditionalAura,
                    EffectSpec::new(EffectCategory::ConditionalAura, source.id.clone(), Lifetime::Indefinite)
                        .with_change(EffectChange::set(
                            StatKey::RangedDisadvantageAgainstSelf,
                            ChangeValue::Flag(true),
                        )),
                );
            }
            b if !b.injection_options().is_empty() => {
                if let Some(element) = element.filter(|e| b.injection_options().contains(e)) {
                    desired.effects.insert(
                        EffectCategory::ElementalInjection,
                        EffectSpec::new(EffectCategory::ElementalInjection, source.id.clone(), Lifetime::Indefinite)
                            .labeled(format!("Rune Infusion ({})", element.as_str()))
                            .with_change(EffectChange::add(StatKey::WeaponDamageType, ChangeValue::Damage(element))),
                    );
                }
            }
            b => {
                if let Some(identifier) = b.implied_grant() {
                    push_grant(&mut desired.grants, identifier, ContentKind::Feat);
                }
            }
        }
    }

    for grant in &config.grants {
        push_grant(&mut desired.grants, &grant.identifier, grant.slot.into());
    }

    desired
}

fn stat_bonus(source: &SourceEntity, config: &UpgradeConfig) -> Option<EffectSpec> {
    let spec = EffectSpec::new(EffectCategory::StatBonus, source.id.clone(), Lifetime::Indefinite);
    if source.weapon_style().is_some() {
        let die = config.tier.die()?;
        return Some(
            spec.labeled(format!("Enhancement (+{})", die))
                .with_change(EffectChange::add(StatKey::WeaponDamageBonus, ChangeValue::Dice(die))),
        );
    }
    if source.is_armor() {
        let bonus = config.tier.bonus();
        return Some(
            spec.labeled(format!("Enhancement (+{} AC)", bonus))
                .with_change(EffectChange::add(StatKey::ArmorClassBonus, ChangeValue::Flat(bonus))),
        );
    }
    None
}

fn push_grant(grants: &mut Vec<DesiredGrant>, identifier: &str, kind: ContentKind) {
    if grants.iter().any(|g| g.identifier == identifier) {
        return;
    }
    grants.push(DesiredGrant {
        identifier: identifier.to_string(),
        kind,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterSlot, Family, GrantSlot, PowerTier};
    use crate::dice::{DiceFormula, Die};
    use crate::model::{SourceKind, WeaponStyle};

    fn equipped(kind: SourceKind) -> SourceEntity {
        let mut s = SourceEntity::new("src", "Thing", kind);
        s.equipped = true;
        s
    }

    const FULL: HitPoints = HitPoints { value: 20, max: 20 };

    #[test]
    fn test_nothing_without_config_or_tier() {
        let sword = equipped(SourceKind::Weapon(WeaponStyle::Melee));
        assert_eq!(desired_state(&sword, None, FULL, None), DesiredState::default());
        let inactive = UpgradeConfig::new(PowerTier::Inactive).with_cluster(ClusterSlot::First, Some(Family::Flux));
        assert_eq!(desired_state(&sword, Some(&inactive), FULL, None), DesiredState::default());
    }

    #[test]
    fn test_weapon_bonus_uses_tier_die() {
        let sword = equipped(SourceKind::Weapon(WeaponStyle::Melee));
        let config = UpgradeConfig::new(PowerTier::Two);
        let desired = desired_state(&sword, Some(&config), FULL, None);
        let bonus = &desired.effects[&EffectCategory::StatBonus];
        assert_eq!(
            bonus.changes,
            vec![EffectChange::add(
                StatKey::WeaponDamageBonus,
                ChangeValue::Dice(DiceFormula::single(Die::D6))
            )]
        );
    }

    #[test]
    fn test_armor_bonus_and_passives() {
        let plate = equipped(SourceKind::Armor { natural: false });
        let config = UpgradeConfig::new(PowerTier::Three)
            .with_cluster(ClusterSlot::Second, Some(Family::Storm))
            .with_cluster(ClusterSlot::Third, Some(Family::Flux));
        let desired = desired_state(&plate, Some(&config), FULL, None);
        assert!(desired.effects.contains_key(&EffectCategory::PassiveMovement));
        assert!(!desired.effects.contains_key(&EffectCategory::ConditionalAura));
        assert_eq!(
            desired.effects[&EffectCategory::StatBonus].changes[0].value,
            ChangeValue::Flat(3)
        );

        let low = HitPoints::new(2, 20);
        let desired = desired_state(&plate, Some(&config), low, None);
        assert!(desired.effects.contains_key(&EffectCategory::ConditionalAura));
    }

    #[test]
    fn test_natural_armor_has_no_armor_categories() {
        let hide = equipped(SourceKind::Armor { natural: true });
        let config = UpgradeConfig::new(PowerTier::Two).with_cluster(ClusterSlot::Second, Some(Family::Storm));
        assert!(desired_state(&hide, Some(&config), FULL, None).effects.is_empty());
    }

    #[test]
    fn test_injection_only_with_matching_element() {
        let sword = equipped(SourceKind::Weapon(WeaponStyle::Melee));
        let config = UpgradeConfig::new(PowerTier::One).with_cluster(ClusterSlot::First, Some(Family::Flux));
        assert_eq!(injection_options(&sword, &config), &[DamageType::Fire, DamageType::Cold]);

        let desired = desired_state(&sword, Some(&config), FULL, Some(DamageType::Cold));
        let types: Vec<_> = desired.effects[&EffectCategory::ElementalInjection]
            .injected_types()
            .collect();
        assert_eq!(types, vec![DamageType::Cold]);

        let desired = desired_state(&sword, Some(&config), FULL, Some(DamageType::Acid));
        assert!(!desired.effects.contains_key(&EffectCategory::ElementalInjection));
    }

    #[test]
    fn test_grants_are_deduplicated() {
        let bow = equipped(SourceKind::Weapon(WeaponStyle::Ranged));
        let config = UpgradeConfig::new(PowerTier::One)
            .with_cluster(ClusterSlot::Third, Some(Family::Flux))
            .with_grant(GrantSlot::Feat, "sharpshooter")
            .with_grant(GrantSlot::Spell, "hunters-mark");
        let desired = desired_state(&bow, Some(&config), FULL, None);
        let ids: Vec<&str> = desired.grants.iter().map(|g| g.identifier.as_str()).collect();
        assert_eq!(ids, vec!["sharpshooter", "hunters-mark"]);
    }
}
