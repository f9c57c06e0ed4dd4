//! Engine facade: wires the host ports to the reconciler and trigger engine and
//! dispatches inbound events.
//!
//! ## Dispatch
//! ```text
//! configuration-changed / equip toggle / character-updated / source-removed
//!       ↓
//! [Reconciler]  value diff → minimal creates/deletes
//!
//! attack / damage / turn / token / zone / round / rest / combat-ended / condition
//!       ↓
//! [TriggerEngine]  conditions → draw → apply
//! ```

mod outcome;
mod queue;

pub use outcome::{EngineError, Outcome};
pub use queue::EventQueue;

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ConfigStore, UpgradeConfig};
use crate::dice::{DrawService, SeededDice};
use crate::events::GameEvent;
use crate::grants::{ContentCatalog, GrantResolver};
use crate::guard::{Clock, DebounceGuard, SystemClock};
use crate::host::Host;
use crate::model::{CharacterId, SourceId};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::settings::EngineSettings;
use crate::triggers::{TriggerBatch, TriggerEngine, TriggerReport};

/// Everything one inbound event produced
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventReport {
    pub kind: &'static str,
    /// Outcomes across reconciles and triggers
    pub outcomes: Vec<Outcome>,
    pub reconciles: Vec<ReconcileReport>,
    pub triggers: Vec<TriggerReport>,
    /// Replacement amount for damage-about-to-apply
    pub adjusted_damage: Option<i32>,
}

impl EventReport {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    fn with_batch(mut self, batch: TriggerBatch) -> Self {
        self.outcomes.extend(batch.outcomes);
        for report in &batch.reports {
            self.outcomes.extend(report.outcomes.iter().cloned());
        }
        self.triggers.extend(batch.reports);
        self.adjusted_damage = batch.adjusted_damage;
        self
    }

    fn with_reconcile(mut self, report: ReconcileReport) -> Self {
        self.outcomes.extend(report.outcomes.iter().cloned());
        self.reconciles.push(report);
        self
    }

    pub fn suppressed(&self) -> bool {
        self.outcomes.iter().any(Outcome::is_suppressed)
    }
}

pub struct UpgradeEngine {
    host: Arc<dyn Host>,
    config: ConfigStore,
    reconciler: Reconciler,
    triggers: TriggerEngine,
    guard: Arc<DebounceGuard>,
    settings: EngineSettings,
}

impl UpgradeEngine {
    pub fn new(
        settings: EngineSettings,
        host: Arc<dyn Host>,
        catalog: Arc<dyn ContentCatalog>,
        clock: Arc<dyn Clock>,
        dice: Arc<dyn DrawService>,
    ) -> Result<Self, EngineError> {
        settings.validate()?;
        let guard = Arc::new(DebounceGuard::new(clock, settings.debounce.clone()));
        let reconciler = Reconciler::new(host.clone(), dice.clone(), GrantResolver::new(catalog), guard.clone());
        let triggers = TriggerEngine::new(host.clone(), dice, guard.clone());

        info!(
            queue_capacity = settings.queue_capacity,
            seeded = settings.dice_seed.is_some(),
            "upgrade engine initialized"
        );
        Ok(Self {
            config: ConfigStore::new(host.clone()),
            host,
            reconciler,
            triggers,
            guard,
            settings,
        })
    }

    /// Wall clock and seeded (or entropy) dice per `settings`
    pub fn from_settings(
        settings: EngineSettings,
        host: Arc<dyn Host>,
        catalog: Arc<dyn ContentCatalog>,
    ) -> Result<Self, EngineError> {
        let dice: Arc<dyn DrawService> = match settings.dice_seed {
            Some(seed) => Arc::new(SeededDice::from_seed(seed)),
            None => Arc::new(SeededDice::from_entropy()),
        };
        Self::new(settings, host, catalog, Arc::new(SystemClock::new()), dice)
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn triggers(&self) -> &TriggerEngine {
        &self.triggers
    }

    pub fn guard(&self) -> &DebounceGuard {
        &self.guard
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Commit a configuration, then reconcile against the committed flags
    pub async fn configure(
        &self,
        character: &CharacterId,
        source: &SourceId,
        config: &UpgradeConfig,
    ) -> Result<ReconcileReport, EngineError> {
        self.config.write(character, source, config).await?;
        self.reconciler.reconcile(character, source).await
    }

    pub async fn handle(&self, event: GameEvent) -> Result<EventReport, EngineError> {
        let report = EventReport::new(event.kind());
        debug!(kind = event.kind(), lane = %event.lane(), "handling event");

        let report = match event {
            GameEvent::ConfigurationChanged { character, source } => {
                report.with_reconcile(self.reconciler.reconcile(&character, &source).await?)
            }

            GameEvent::ItemEquipStateAboutToChange {
                character,
                source,
                equipped,
                attuned,
            } => {
                let owner = self.host.character(&character).await?;
                match owner.item(&source).cloned() {
                    Some(mut item) => {
                        if let Some(equipped) = equipped {
                            item.equipped = equipped;
                        }
                        if let Some(attuned) = attuned {
                            item.attuned = attuned;
                        }
                        report.with_reconcile(self.reconciler.reconcile_with(&owner, item).await?)
                    }
                    None => report.with_reconcile(self.reconciler.purge_source(&owner, &source).await?),
                }
            }

            GameEvent::CharacterUpdated { character } => {
                let mut report = report;
                for reconciled in self.reconciler.reconcile_character(&character).await? {
                    report = report.with_reconcile(reconciled);
                }
                report
            }

            GameEvent::SourceRemoved { character, source } => {
                let owner = self.host.character(&character).await?;
                report.with_reconcile(self.reconciler.purge_source(&owner, &source).await?)
            }

            GameEvent::AttackResolved(attack) => report.with_batch(self.triggers.on_attack(&attack).await?),
            GameEvent::DamageIncoming(damage) => report.with_batch(self.triggers.on_damage(&damage).await?),
            GameEvent::TurnStarted { character } => report.with_batch(self.triggers.on_turn_start(&character).await?),
            GameEvent::TokenMoved { character, to } => {
                report.with_batch(self.triggers.on_token_moved(&character, to).await?)
            }
            GameEvent::AreaTemplateCreated { zone, center } => {
                report.with_batch(self.triggers.on_area_template_created(&zone, center).await?)
            }
            GameEvent::CombatRoundAdvanced { round } => report.with_batch(self.triggers.on_round_advanced(round).await?),
            GameEvent::RestCompleted { character } => report.with_batch(self.triggers.on_rest(&character).await?),
            GameEvent::CombatEnded => report.with_batch(self.triggers.on_combat_ended().await?),
            GameEvent::ConditionApplied { character, condition } => {
                report.with_batch(self.triggers.on_condition(&character, condition).await?)
            }
        };

        if !report.outcomes.is_empty() {
            debug!(kind = report.kind, outcomes = report.outcomes.len(), "event produced outcomes");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterSlot, Family, PowerTier};
    use crate::dice::ScriptedDice;
    use crate::grants::StaticCatalog;
    use crate::guard::ManualClock;
    use crate::host::InMemoryHost;
    use crate::model::{ActorKind, EffectCategory, OwningCharacter, SourceEntity, SourceKind, WeaponStyle};

    fn engine_with_sword() -> (Arc<InMemoryHost>, UpgradeEngine, CharacterId, SourceId) {
        let host = Arc::new(InMemoryHost::new());
        let mut hero = OwningCharacter::new("hero", "Hero", ActorKind::Character);
        let mut sword = SourceEntity::new("sword", "Longsword", SourceKind::Weapon(WeaponStyle::Melee));
        sword.equipped = true;
        hero.items.push(sword);
        host.add_character(hero);

        let engine = UpgradeEngine::new(
            EngineSettings::default(),
            host.clone(),
            Arc::new(StaticCatalog::new()),
            Arc::new(ManualClock::new()),
            Arc::new(ScriptedDice::default()),
        )
        .unwrap();
        (host, engine, CharacterId::from("hero"), SourceId::from("sword"))
    }

    #[tokio::test]
    async fn test_configure_commits_then_reconciles() {
        let (host, engine, hero, sword) = engine_with_sword();
        let config = UpgradeConfig::new(PowerTier::Two).with_cluster(ClusterSlot::First, Some(Family::Flux));

        let report = engine.configure(&hero, &sword, &config).await.unwrap();
        assert!(report.effects_created >= 2);

        let stored = engine.config_store().read(&hero, &sword).await.unwrap();
        assert_eq!(stored, Some(config));
        let snapshot = host.snapshot(&hero).unwrap();
        assert!(snapshot.has_effect(EffectCategory::StatBonus));
        assert!(snapshot.has_effect(EffectCategory::ElementalInjection));
    }

    #[tokio::test]
    async fn test_unequip_toggle_reconciles_pending_state() {
        let (host, engine, hero, sword) = engine_with_sword();
        let config = UpgradeConfig {
            requires_equipped: true,
            ..UpgradeConfig::new(PowerTier::One)
        };
        engine.configure(&hero, &sword, &config).await.unwrap();
        assert!(host.snapshot(&hero).unwrap().has_effect(EffectCategory::StatBonus));

        let report = engine
            .handle(GameEvent::ItemEquipStateAboutToChange {
                character: hero.clone(),
                source: sword.clone(),
                equipped: Some(false),
                attuned: None,
            })
            .await
            .unwrap();
        assert_eq!(report.kind, "item-equip-state-about-to-change");
        assert_eq!(report.reconciles.len(), 1);
        assert!(!host.snapshot(&hero).unwrap().has_effect(EffectCategory::StatBonus));
    }

    #[tokio::test]
    async fn test_source_removed_purges() {
        let (host, engine, hero, sword) = engine_with_sword();
        engine
            .configure(&hero, &sword, &UpgradeConfig::new(PowerTier::Three))
            .await
            .unwrap();
        host.update_character(&hero, |c| c.items.clear());

        engine
            .handle(GameEvent::SourceRemoved {
                character: hero.clone(),
                source: sword,
            })
            .await
            .unwrap();
        assert!(host.snapshot(&hero).unwrap().effects.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let host = Arc::new(InMemoryHost::new());
        let settings = EngineSettings {
            queue_capacity: 0,
            ..EngineSettings::default()
        };
        let result = UpgradeEngine::from_settings(settings, host, Arc::new(StaticCatalog::new()));
        assert!(matches!(result, Err(EngineError::Settings(_))));
    }
}
