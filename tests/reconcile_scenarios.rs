//! Reconciler scenarios against the in-memory host.
//!
//! Covers:
//! - Stat bonus follows the power tier and the activation requirements
//! - Granted content is created once, never duplicated, removed on unequip
//! - Concurrent re-entry is debounced to a single write set
//! - A partially applied pass converges on the next one
//! - Duplicate repair, orphan purge and catalog failures

use std::sync::Arc;

use upgrade_core::config::{ClusterSlot, Family, GrantSlot, PowerTier, UpgradeConfig};
use upgrade_core::dice::{DiceFormula, Die, ScriptedDice};
use upgrade_core::engine::{EngineError, Outcome, UpgradeEngine};
use upgrade_core::events::GameEvent;
use upgrade_core::grants::{ContentKind, ContentTemplate, StaticCatalog};
use upgrade_core::guard::ManualClock;
use upgrade_core::host::{Host, HostError, InMemoryHost};
use upgrade_core::model::{
    ActorKind, Attunement, ChangeValue, CharacterId, EffectCategory, EffectSpec, Lifetime, OwningCharacter,
    SourceEntity, SourceId, SourceKind, StatKey, WeaponStyle,
};
use upgrade_core::reconcile::desired_state;
use upgrade_core::settings::EngineSettings;

// ============================================================
// Helpers
// ============================================================

struct World {
    host: Arc<InMemoryHost>,
    clock: Arc<ManualClock>,
    catalog: Arc<StaticCatalog>,
    engine: Arc<UpgradeEngine>,
    hero: CharacterId,
}

impl World {
    fn new(items: Vec<SourceEntity>) -> Self {
        let host = Arc::new(InMemoryHost::new());
        let mut hero = OwningCharacter::new("hero", "Hero", ActorKind::Character);
        hero.items = items;
        host.add_character(hero);

        let clock = Arc::new(ManualClock::new());
        let catalog = Arc::new(StaticCatalog::new().with_entry(ContentTemplate::new(
            "ability-x",
            "Ability X",
            ContentKind::Spell,
            "Does the thing.",
        )));
        let engine = UpgradeEngine::new(
            EngineSettings::default(),
            host.clone(),
            catalog.clone(),
            clock.clone(),
            Arc::new(ScriptedDice::default()),
        )
        .unwrap();

        Self {
            host,
            clock,
            catalog,
            engine: Arc::new(engine),
            hero: CharacterId::from("hero"),
        }
    }

    fn hero(&self) -> OwningCharacter {
        self.host.snapshot(&self.hero).unwrap()
    }

    /// Past every debounce window
    fn settle(&self) {
        self.clock.advance(1_000);
    }

    fn count(&self, origin: &str, category: EffectCategory) -> usize {
        self.hero().effects_from(&SourceId::from(origin), category).count()
    }
}

fn equipped(id: &str, kind: SourceKind) -> SourceEntity {
    let mut item = SourceEntity::new(id, id, kind);
    item.equipped = true;
    item
}

fn sword() -> SourceEntity {
    equipped("sword", SourceKind::Weapon(WeaponStyle::Melee))
}

// ============================================================
// Stat bonus and activation
// ============================================================

#[tokio::test]
async fn test_tier_two_stat_bonus_follows_requirements() {
    let world = World::new(vec![sword()]);
    let sword_id = SourceId::from("sword");
    let config = UpgradeConfig::new(PowerTier::Two).with_cluster(ClusterSlot::First, Some(Family::Storm));

    world.engine.configure(&world.hero, &sword_id, &config).await.unwrap();

    let hero = world.hero();
    let bonus: Vec<_> = hero.effects_from(&sword_id, EffectCategory::StatBonus).collect();
    assert_eq!(bonus.len(), 1);
    assert_eq!(bonus[0].spec.label, "Enhancement (+1d6)");
    assert_eq!(bonus[0].spec.changes[0].key, StatKey::WeaponDamageBonus);
    assert_eq!(
        bonus[0].spec.changes[0].value,
        ChangeValue::Dice(DiceFormula::single(Die::D6))
    );
    assert_eq!(world.count("sword", EffectCategory::ElementalInjection), 1);

    // attunement now required but the sword isn't attuned
    let gated = UpgradeConfig {
        requires_attunement: true,
        ..config
    };
    world.engine.configure(&world.hero, &sword_id, &gated).await.unwrap();
    assert_eq!(world.count("sword", EffectCategory::StatBonus), 0);
    assert_eq!(world.count("sword", EffectCategory::ElementalInjection), 0);
}

#[tokio::test]
async fn test_armor_bonus_scales_with_tier() {
    let world = World::new(vec![equipped("plate", SourceKind::Armor { natural: false })]);
    let plate = SourceId::from("plate");

    world
        .engine
        .configure(&world.hero, &plate, &UpgradeConfig::new(PowerTier::Three))
        .await
        .unwrap();
    let hero = world.hero();
    let bonus = hero.effects_from(&plate, EffectCategory::StatBonus).next().unwrap();
    assert_eq!(bonus.spec.changes[0].value, ChangeValue::Flat(3));

    world
        .engine
        .configure(&world.hero, &plate, &UpgradeConfig::new(PowerTier::Inactive))
        .await
        .unwrap();
    assert!(world.hero().effects.is_empty());
}

#[tokio::test]
async fn test_natural_armor_never_gets_armor_effects() {
    let world = World::new(vec![equipped("hide", SourceKind::Armor { natural: true })]);
    let config = UpgradeConfig::new(PowerTier::Three).with_cluster(ClusterSlot::Second, Some(Family::Storm));
    world
        .engine
        .configure(&world.hero, &SourceId::from("hide"), &config)
        .await
        .unwrap();
    assert!(world.hero().effects.is_empty());
}

#[tokio::test]
async fn test_missing_configuration_is_reported() {
    let world = World::new(vec![sword()]);
    let report = world
        .engine
        .reconciler()
        .reconcile(&world.hero, &SourceId::from("sword"))
        .await
        .unwrap();
    assert!(report
        .outcomes
        .iter()
        .any(|o| matches!(o, Outcome::ConfigurationMissing { .. })));
    assert_eq!(report.writes(), 0);
}

#[tokio::test]
async fn test_pending_attunement_is_applied_before_commit() {
    let mut ring_blade = sword();
    ring_blade.attunement = Attunement::Required;
    let world = World::new(vec![ring_blade]);
    let sword_id = SourceId::from("sword");

    world
        .engine
        .configure(&world.hero, &sword_id, &UpgradeConfig::new(PowerTier::One))
        .await
        .unwrap();
    assert!(world.hero().effects.is_empty());

    world
        .engine
        .handle(GameEvent::ItemEquipStateAboutToChange {
            character: world.hero.clone(),
            source: sword_id.clone(),
            equipped: None,
            attuned: Some(true),
        })
        .await
        .unwrap();
    assert_eq!(world.count("sword", EffectCategory::StatBonus), 1);
}

// ============================================================
// Granted content
// ============================================================

#[tokio::test]
async fn test_grant_created_once_and_removed_on_unequip() {
    let world = World::new(vec![sword()]);
    let sword_id = SourceId::from("sword");
    let config = UpgradeConfig::new(PowerTier::One).with_grant(GrantSlot::Spell, "ability-x");

    world.engine.configure(&world.hero, &sword_id, &config).await.unwrap();
    let grants = world.hero().grants;
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].entry_id, "ability-x");
    assert_eq!(grants[0].name, "Ability X (sword)");
    assert!(!grants[0].synthetic);

    world.settle();
    let again = world.engine.reconciler().reconcile(&world.hero, &sword_id).await.unwrap();
    assert_eq!(again.writes(), 0);
    assert_eq!(world.hero().grants.len(), 1);

    world.host.update_character(&world.hero, |c| c.items[0].equipped = false);
    world
        .engine
        .handle(GameEvent::CharacterUpdated {
            character: world.hero.clone(),
        })
        .await
        .unwrap();
    let hero = world.hero();
    assert!(hero.grants.is_empty());
    assert!(hero.effects.is_empty());
}

#[tokio::test]
async fn test_quick_reequip_is_not_swallowed_by_stale_add_key() {
    let world = World::new(vec![sword()]);
    let sword_id = SourceId::from("sword");
    let config = UpgradeConfig::new(PowerTier::One).with_grant(GrantSlot::Spell, "ability-x");
    world.engine.configure(&world.hero, &sword_id, &config).await.unwrap();

    // no clock advance between the toggles
    world.host.update_character(&world.hero, |c| c.items[0].equipped = false);
    world.engine.reconciler().reconcile(&world.hero, &sword_id).await.unwrap();
    assert!(world.hero().grants.is_empty());

    world.host.update_character(&world.hero, |c| c.items[0].equipped = true);
    world.engine.reconciler().reconcile(&world.hero, &sword_id).await.unwrap();
    assert_eq!(world.hero().grants.len(), 1);
}

#[tokio::test]
async fn test_quick_reequip_restores_stat_bonus() {
    let world = World::new(vec![sword()]);
    let sword_id = SourceId::from("sword");
    world
        .engine
        .configure(&world.hero, &sword_id, &UpgradeConfig::new(PowerTier::Two))
        .await
        .unwrap();
    assert_eq!(world.count("sword", EffectCategory::StatBonus), 1);

    // each toggle lands well inside the enhancement and evaluation windows
    world.clock.advance(50);
    world.host.update_character(&world.hero, |c| c.items[0].equipped = false);
    let unequip = world.engine.reconciler().reconcile(&world.hero, &sword_id).await.unwrap();
    assert_eq!(unequip.effects_deleted, 1);
    assert_eq!(world.count("sword", EffectCategory::StatBonus), 0);

    world.clock.advance(50);
    world.host.update_character(&world.hero, |c| c.items[0].equipped = true);
    let reequip = world.engine.reconciler().reconcile(&world.hero, &sword_id).await.unwrap();
    assert!(!reequip.suppressed(), "outcomes: {:?}", reequip.outcomes);
    assert_eq!(reequip.effects_created, 1);
    assert_eq!(world.count("sword", EffectCategory::StatBonus), 1);
}

#[tokio::test]
async fn test_replayed_snapshot_is_still_suppressed() {
    let world = World::new(vec![sword()]);
    let sword_id = SourceId::from("sword");
    world
        .engine
        .configure(&world.hero, &sword_id, &UpgradeConfig::new(PowerTier::Two))
        .await
        .unwrap();
    world.settle();
    world.host.reset_calls();

    // a pending unequip delivered twice from the same read
    let owner = world.hero();
    let mut pending = owner.items[0].clone();
    pending.equipped = false;

    let first = world.engine.reconciler().reconcile_with(&owner, pending.clone()).await.unwrap();
    let replay = world.engine.reconciler().reconcile_with(&owner, pending).await.unwrap();
    assert_eq!(first.effects_deleted, 1);
    assert!(replay.suppressed());
    assert_eq!(world.host.calls().effect_deletes, 1);
}

#[tokio::test]
async fn test_implied_feat_falls_back_to_synthetic_template() {
    let world = World::new(vec![equipped("plate", SourceKind::Armor { natural: false })]);
    let config = UpgradeConfig::new(PowerTier::One).with_cluster(ClusterSlot::Second, Some(Family::Blight));
    world
        .engine
        .configure(&world.hero, &SourceId::from("plate"), &config)
        .await
        .unwrap();

    let grants = world.hero().grants;
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].entry_id, "mobile");
    assert!(grants[0].synthetic);
}

#[tokio::test]
async fn test_unavailable_catalog_skips_grant_but_keeps_effects() {
    let world = World::new(vec![sword()]);
    let sword_id = SourceId::from("sword");
    world.catalog.set_unavailable(true);

    let config = UpgradeConfig::new(PowerTier::One).with_grant(GrantSlot::Spell, "ability-x");
    let report = world.engine.configure(&world.hero, &sword_id, &config).await.unwrap();
    assert!(report
        .outcomes
        .iter()
        .any(|o| matches!(o, Outcome::ContentResolutionFailed { identifier, .. } if identifier == "ability-x")));
    assert!(world.hero().grants.is_empty());
    assert_eq!(world.count("sword", EffectCategory::StatBonus), 1);

    world.catalog.set_unavailable(false);
    world.settle();
    world.engine.reconciler().reconcile(&world.hero, &sword_id).await.unwrap();
    assert_eq!(world.hero().grants.len(), 1);
}

#[tokio::test]
async fn test_unknown_identifier_without_fallback_is_reported() {
    let world = World::new(vec![sword()]);
    let config = UpgradeConfig::new(PowerTier::One).with_grant(GrantSlot::Feat, "no-such-feat");
    let report = world
        .engine
        .configure(&world.hero, &SourceId::from("sword"), &config)
        .await
        .unwrap();
    assert!(report
        .outcomes
        .iter()
        .any(|o| matches!(o, Outcome::ContentResolutionFailed { .. })));
    assert!(world.hero().grants.is_empty());
}

// ============================================================
// Debounce and self-healing
// ============================================================

#[tokio::test]
async fn test_concurrent_reentry_writes_once() {
    let world = World::new(vec![sword()]);
    let sword_id = SourceId::from("sword");
    world
        .engine
        .config_store()
        .write(&world.hero, &sword_id, &UpgradeConfig::new(PowerTier::Two))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = world.engine.clone();
        let hero = world.hero.clone();
        let source = sword_id.clone();
        handles.push(tokio::spawn(async move {
            engine.reconciler().reconcile(&hero, &source).await
        }));
    }
    let mut suppressed = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().suppressed() {
            suppressed += 1;
        }
    }

    assert_eq!(suppressed, 7);
    assert_eq!(world.host.calls().effect_creates, 1);
    assert_eq!(world.count("sword", EffectCategory::StatBonus), 1);
}

#[tokio::test]
async fn test_partial_failure_converges_on_next_pass() {
    let world = World::new(vec![sword()]);
    let sword_id = SourceId::from("sword");
    let config = UpgradeConfig::new(PowerTier::Two)
        .with_cluster(ClusterSlot::First, Some(Family::Blight))
        .with_grant(GrantSlot::Spell, "ability-x");
    world
        .engine
        .config_store()
        .write(&world.hero, &sword_id, &config)
        .await
        .unwrap();

    world.host.fail_writes_after(1);
    let failed = world.engine.reconciler().reconcile(&world.hero, &sword_id).await;
    assert!(matches!(
        failed,
        Err(EngineError::Host(HostError::WriteRejected(_)))
    ));
    assert_eq!(world.hero().effects.len(), 1);

    // no settle: a failed pass must not hold its keys
    world.host.heal_writes();
    world.engine.reconciler().reconcile(&world.hero, &sword_id).await.unwrap();
    let hero = world.hero();
    assert_eq!(hero.effects_from(&sword_id, EffectCategory::StatBonus).count(), 1);
    assert_eq!(hero.effects_from(&sword_id, EffectCategory::ElementalInjection).count(), 1);
    assert_eq!(hero.grants.len(), 1);

    world.settle();
    let steady = world.engine.reconciler().reconcile(&world.hero, &sword_id).await.unwrap();
    assert_eq!(steady.writes(), 0);
}

// ============================================================
// Repair and purge
// ============================================================

#[tokio::test]
async fn test_duplicate_records_are_repaired_keeping_newest() {
    let world = World::new(vec![sword()]);
    let sword_id = SourceId::from("sword");
    let config = UpgradeConfig::new(PowerTier::One);
    world
        .engine
        .config_store()
        .write(&world.hero, &sword_id, &config)
        .await
        .unwrap();

    let item = world.hero().item(&sword_id).cloned().unwrap();
    let want = desired_state(&item, Some(&config), world.hero().hp, None)
        .effects
        .remove(&EffectCategory::StatBonus)
        .unwrap();
    world.host.create_effect(&world.hero, want.clone()).await.unwrap();
    let newest = world.host.create_effect(&world.hero, want).await.unwrap();

    let report = world.engine.reconciler().reconcile(&world.hero, &sword_id).await.unwrap();
    assert!(report.outcomes.iter().any(|o| matches!(
        o,
        Outcome::InvariantViolationDetected { removed: 1, .. }
    )));
    let hero = world.hero();
    let left: Vec<_> = hero.effects_from(&sword_id, EffectCategory::StatBonus).collect();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, newest);
    assert_eq!(report.effects_created, 0);
}

#[tokio::test]
async fn test_removed_source_is_purged_but_foreign_trigger_effects_stay() {
    let world = World::new(vec![sword()]);
    let sword_id = SourceId::from("sword");
    let config = UpgradeConfig::new(PowerTier::One).with_grant(GrantSlot::Spell, "ability-x");
    world.engine.configure(&world.hero, &sword_id, &config).await.unwrap();

    // an enemy's rune poison on the hero
    let poison = EffectSpec::new(EffectCategory::RunePoison, SourceId::from("orc-bow"), Lifetime::Rounds(10));
    world.host.create_effect(&world.hero, poison).await.unwrap();

    world.host.update_character(&world.hero, |c| c.items.clear());
    world
        .engine
        .handle(GameEvent::CharacterUpdated {
            character: world.hero.clone(),
        })
        .await
        .unwrap();

    let hero = world.hero();
    assert!(hero.grants.is_empty());
    assert_eq!(hero.effects.len(), 1);
    assert_eq!(hero.effects[0].spec.category, EffectCategory::RunePoison);
}

#[tokio::test]
async fn test_illusory_aura_tracks_low_hp() {
    let world = World::new(vec![equipped("cloak", SourceKind::Armor { natural: false })]);
    let cloak = SourceId::from("cloak");
    let config = UpgradeConfig::new(PowerTier::One).with_cluster(ClusterSlot::Third, Some(Family::Flux));
    world.engine.configure(&world.hero, &cloak, &config).await.unwrap();
    assert_eq!(world.count("cloak", EffectCategory::ConditionalAura), 0);

    world.host.update_character(&world.hero, |c| c.hp.value = 1);
    world
        .engine
        .handle(GameEvent::CharacterUpdated {
            character: world.hero.clone(),
        })
        .await
        .unwrap();
    assert_eq!(world.count("cloak", EffectCategory::ConditionalAura), 1);

    world.host.update_character(&world.hero, |c| c.hp.value = 10);
    world
        .engine
        .handle(GameEvent::CharacterUpdated {
            character: world.hero.clone(),
        })
        .await
        .unwrap();
    assert_eq!(world.count("cloak", EffectCategory::ConditionalAura), 0);
}
