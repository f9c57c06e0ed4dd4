//! Effect Reconciler
//!
//! Computes the desired derived records of a source entity, diffs them by value
//! against what the owning character holds and applies the minimal write set:
//! deletions first, then creations. Safe to call any number of times; a partial
//! failure is corrected by the next pass.

mod desired;
mod diff;

pub use desired::{desired_state, injection_options, DesiredGrant, DesiredState};
pub use diff::{plan_effects, plan_grants, EffectPlan, GrantGating, GrantPlan, RECONCILED};

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::UpgradeConfig;
use crate::dice::DrawService;
use crate::engine::{EngineError, Outcome};
use crate::grants::{materialize, GrantResolver};
use crate::guard::{fingerprint, DebounceGuard, GuardKey, GuardSpace};
use crate::host::Host;
use crate::model::{
    Attunement, CharacterId, DamageType, DerivedEffect, EffectCategory, EffectSpec, GrantedEntity,
    OwningCharacter, SourceEntity, SourceId,
};
use crate::constants::ILLUSORY_AURA_HP_PERCENT;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub character: CharacterId,
    pub source: SourceId,
    pub outcomes: Vec<Outcome>,
    pub effects_created: usize,
    pub effects_deleted: usize,
    pub grants_created: usize,
    pub grants_deleted: usize,
}

impl ReconcileReport {
    fn new(character: &CharacterId, source: &SourceId) -> Self {
        Self {
            character: character.clone(),
            source: source.clone(),
            outcomes: Vec::new(),
            effects_created: 0,
            effects_deleted: 0,
            grants_created: 0,
            grants_deleted: 0,
        }
    }

    pub fn writes(&self) -> usize {
        self.effects_created + self.effects_deleted + self.grants_created + self.grants_deleted
    }

    pub fn suppressed(&self) -> bool {
        self.outcomes.iter().any(Outcome::is_suppressed)
    }
}

/// Evaluation descriptor: configuration, equip/attune state, HP band, the records
/// the source currently holds and the character revision they were read at
fn evaluation_fingerprint(owner: &OwningCharacter, source: &SourceEntity) -> String {
    let flags = serde_json::to_string(&source.flags).unwrap_or_default();
    let low_hp = owner.hp.max > 0 && owner.hp.percent() <= ILLUSORY_AURA_HP_PERCENT;
    let records = owner
        .effects
        .iter()
        .filter(|e| e.spec.origin == source.id)
        .map(|e| e.id.as_str())
        .chain(owner.grants_from(&source.id).map(|g| g.id.as_str()))
        .collect::<Vec<_>>()
        .join(",");
    fingerprint([
        flags,
        format!("equipped={}", source.equipped),
        format!("attuned={}", source.attuned),
        format!("low_hp={}", low_hp),
        records,
        format!("revision={}", owner.revision),
    ])
}

fn grant_gating(source: &SourceEntity, config: &UpgradeConfig) -> GrantGating {
    GrantGating {
        equipped: config.requires_equipped,
        attunement_required: config.requires_attunement || source.attunement == Attunement::Required,
    }
}

pub struct Reconciler {
    host: Arc<dyn Host>,
    dice: Arc<dyn DrawService>,
    resolver: GrantResolver,
    guard: Arc<DebounceGuard>,
}

impl Reconciler {
    pub fn new(
        host: Arc<dyn Host>,
        dice: Arc<dyn DrawService>,
        resolver: GrantResolver,
        guard: Arc<DebounceGuard>,
    ) -> Self {
        Self {
            host,
            dice,
            resolver,
            guard,
        }
    }

    /// Reconcile one source against the character's current state.
    ///
    /// A source no longer on the character has all its records purged.
    pub async fn reconcile(&self, character: &CharacterId, source: &SourceId) -> Result<ReconcileReport, EngineError> {
        let owner = self.host.character(character).await?;
        match owner.item(source).cloned() {
            Some(item) => self.reconcile_with(&owner, item).await,
            None => self.purge_source(&owner, source).await,
        }
    }

    /// Reconcile using `source` as given (e.g. with a pending equip toggle applied)
    pub async fn reconcile_with(
        &self,
        owner: &OwningCharacter,
        source: SourceEntity,
    ) -> Result<ReconcileReport, EngineError> {
        let mut report = ReconcileReport::new(&owner.id, &source.id);

        let key = GuardKey::new(
            GuardSpace::Evaluation,
            &owner.id,
            Some(&source.id),
            evaluation_fingerprint(owner, &source),
        );
        if !self.guard.try_enter(&key) {
            debug!(character = %owner.id, source = %source.id, "evaluation suppressed");
            report.outcomes.push(Outcome::DuplicateSuppressed {
                space: GuardSpace::Evaluation,
                key: key.to_string(),
            });
            return Ok(report);
        }

        let result = self.run_pass(owner, &source, &mut report).await;
        if result.is_err() {
            // the next trigger must be able to retry immediately
            self.guard.release(&key, 0);
        }
        result.map(|_| report)
    }

    async fn run_pass(
        &self,
        owner: &OwningCharacter,
        source: &SourceEntity,
        report: &mut ReconcileReport,
    ) -> Result<(), EngineError> {
        let config = UpgradeConfig::from_flags(&source.flags);
        if config.is_none() {
            report.outcomes.push(Outcome::ConfigurationMissing {
                source: source.id.clone(),
            });
        }

        let element = self.pick_element(owner, source, config.as_ref()).await;
        let desired = desired_state(source, config.as_ref(), owner.hp, element);

        self.apply_effects(owner, &source.id, &desired.effects, report).await?;
        self.apply_grants(owner, source, config.as_ref(), &desired.grants, report)
            .await?;

        if report.writes() > 0 {
            info!(
                character = %owner.id,
                source = %source.id,
                created = report.effects_created + report.grants_created,
                deleted = report.effects_deleted + report.grants_deleted,
                "reconciled"
            );
        }
        Ok(())
    }

    /// Keep the current element while it still belongs to the configured family
    async fn pick_element(
        &self,
        owner: &OwningCharacter,
        source: &SourceEntity,
        config: Option<&UpgradeConfig>,
    ) -> Option<DamageType> {
        let options = config.map_or(&[][..], |c| injection_options(source, c));
        if options.is_empty() {
            return None;
        }
        let current = owner
            .effects_from(&source.id, EffectCategory::ElementalInjection)
            .max_by_key(|e| e.created_seq)
            .and_then(|e| e.spec.injected_types().next());
        if let Some(current) = current.filter(|c| options.contains(c)) {
            return Some(current);
        }
        if options.len() == 1 {
            return options.first().copied();
        }
        let index = self.dice.pick(options.len()).await;
        options.get(index).copied()
    }

    async fn apply_effects(
        &self,
        owner: &OwningCharacter,
        origin: &SourceId,
        desired: &BTreeMap<EffectCategory, EffectSpec>,
        report: &mut ReconcileReport,
    ) -> Result<(), EngineError> {
        let current: Vec<DerivedEffect> = owner
            .effects
            .iter()
            .filter(|e| &e.spec.origin == origin)
            .cloned()
            .collect();
        let plan = plan_effects(&current, desired);

        for (category, removed) in &plan.violations {
            warn!(
                character = %owner.id,
                %origin,
                category = category.label(),
                removed,
                "duplicate derived effects found, keeping the newest"
            );
            report
                .outcomes
                .push(Outcome::duplicate_invariant(origin, *category, *removed));
        }
        if plan.is_empty() {
            return Ok(());
        }

        // the same write set planned from a later revision is a new update
        let key = GuardKey::new(
            GuardSpace::Enhancement,
            &owner.id,
            Some(origin),
            format!("{}@{}", plan.fingerprint(), owner.revision),
        );
        if !self.guard.try_enter(&key) {
            debug!(character = %owner.id, %origin, "identical effect write set in flight");
            report.outcomes.push(Outcome::DuplicateSuppressed {
                space: GuardSpace::Enhancement,
                key: key.to_string(),
            });
            return Ok(());
        }

        let result = self.write_effects(&owner.id, plan, report).await;
        if result.is_err() {
            self.guard.release(&key, 0);
        }
        result
    }

    async fn write_effects(
        &self,
        character: &CharacterId,
        plan: EffectPlan,
        report: &mut ReconcileReport,
    ) -> Result<(), EngineError> {
        if !plan.deletes.is_empty() {
            self.host.delete_effects(character, &plan.deletes).await?;
            report.effects_deleted += plan.deletes.len();
        }
        for spec in plan.creates {
            debug!(%character, label = %spec.label, "creating derived effect");
            self.host.create_effect(character, spec).await?;
            report.effects_created += 1;
        }
        Ok(())
    }

    async fn apply_grants(
        &self,
        owner: &OwningCharacter,
        source: &SourceEntity,
        config: Option<&UpgradeConfig>,
        desired: &[DesiredGrant],
        report: &mut ReconcileReport,
    ) -> Result<(), EngineError> {
        let current: Vec<GrantedEntity> = owner.grants_from(&source.id).cloned().collect();
        let gating = config.map(|c| grant_gating(source, c));
        let plan = plan_grants(&current, desired, gating);

        for (entry, removed) in &plan.violations {
            warn!(character = %owner.id, source = %source.id, entry, removed, "duplicate granted entities found");
            report.outcomes.push(Outcome::InvariantViolationDetected {
                origin: source.id.clone(),
                category: format!("grant:{}", entry),
                removed: *removed,
            });
        }

        // Resolve before touching storage so a failed lookup leaves that grant as is
        let mut drafts = Vec::new();
        let mut unresolved = BTreeSet::new();
        if let Some(config) = config {
            let mut pass = self.resolver.pass();
            for want in &plan.creates {
                match pass.resolve(&want.identifier).await {
                    Ok(template) => drafts.push(materialize(&template, source, config)),
                    Err(err) => {
                        warn!(source = %source.id, identifier = %want.identifier, error = %err, "grant content resolution failed");
                        report.outcomes.push(Outcome::ContentResolutionFailed {
                            source: source.id.clone(),
                            identifier: want.identifier.clone(),
                            reason: err.to_string(),
                        });
                        unresolved.insert(want.identifier.clone());
                    }
                }
            }
        }

        for (id, entry) in plan.deletes {
            if unresolved.contains(&entry) {
                continue;
            }
            let key = GuardKey::new(GuardSpace::GrantRemove, &owner.id, Some(&source.id), entry.as_str());
            if !self.guard.try_enter(&key) {
                report.outcomes.push(Outcome::DuplicateSuppressed {
                    space: GuardSpace::GrantRemove,
                    key: key.to_string(),
                });
                continue;
            }
            if let Err(err) = self.host.delete_grants(&owner.id, &[id]).await {
                self.guard.release(&key, 0);
                return Err(err.into());
            }
            self.guard.release(&key.in_space(GuardSpace::GrantAdd), 0);
            report.grants_deleted += 1;
        }

        for draft in drafts {
            let key = GuardKey::new(GuardSpace::GrantAdd, &owner.id, Some(&source.id), draft.entry_id.as_str());
            if !self.guard.try_enter(&key) {
                report.outcomes.push(Outcome::DuplicateSuppressed {
                    space: GuardSpace::GrantAdd,
                    key: key.to_string(),
                });
                continue;
            }
            let entry = draft.entry_id.clone();
            if let Err(err) = self.host.create_grant(&owner.id, draft).await {
                self.guard.release(&key, 0);
                return Err(err.into());
            }
            info!(character = %owner.id, source = %source.id, entry = %entry, "granted");
            self.guard.release(&key.in_space(GuardSpace::GrantRemove), 0);
            report.grants_created += 1;
        }
        Ok(())
    }

    /// Reconcile every configured item of a character, then purge records whose
    /// source is gone
    pub async fn reconcile_character(&self, character: &CharacterId) -> Result<Vec<ReconcileReport>, EngineError> {
        let owner = self.host.character(character).await?;
        let mut reports = Vec::new();

        for item in &owner.items {
            let has_records = owner.effects.iter().any(|e| e.spec.origin == item.id)
                || owner.grants.iter().any(|g| g.source_id == item.id);
            if item.flags.is_empty() && !has_records {
                continue;
            }
            reports.push(self.reconcile_with(&owner, item.clone()).await?);
        }

        // Reconciled categories always originate from the character's own items;
        // trigger effects may come from someone else's gear and are left alone.
        let orphans: BTreeSet<SourceId> = owner
            .effects
            .iter()
            .filter(|e| e.spec.category.is_reconciled())
            .map(|e| e.spec.origin.clone())
            .chain(owner.grants.iter().map(|g| g.source_id.clone()))
            .filter(|origin| owner.item(origin).is_none())
            .collect();
        for origin in orphans {
            reports.push(self.purge_source(&owner, &origin).await?);
        }
        Ok(reports)
    }

    /// Delete every record produced by `source` on this character
    pub async fn purge_source(&self, owner: &OwningCharacter, source: &SourceId) -> Result<ReconcileReport, EngineError> {
        let mut report = ReconcileReport::new(&owner.id, source);

        let effects: Vec<_> = owner
            .effects
            .iter()
            .filter(|e| &e.spec.origin == source)
            .map(|e| e.id.clone())
            .collect();
        if !effects.is_empty() {
            self.host.delete_effects(&owner.id, &effects).await?;
            report.effects_deleted = effects.len();
        }

        let grants: Vec<_> = owner.grants_from(source).map(|g| g.id.clone()).collect();
        if !grants.is_empty() {
            self.host.delete_grants(&owner.id, &grants).await?;
            report.grants_deleted = grants.len();
        }

        if report.writes() > 0 {
            info!(character = %owner.id, %source, deleted = report.writes(), "purged records of removed source");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterSlot, Family, GrantSlot, PowerTier};
    use crate::dice::ScriptedDice;
    use crate::grants::StaticCatalog;
    use crate::guard::ManualClock;
    use crate::host::InMemoryHost;
    use crate::model::{ActorKind, SourceKind, WeaponStyle};
    use crate::settings::DebounceWindows;

    struct Fixture {
        host: Arc<InMemoryHost>,
        clock: Arc<ManualClock>,
        reconciler: Reconciler,
        hero: CharacterId,
    }

    fn fixture(config: UpgradeConfig, kind: SourceKind) -> Fixture {
        let host = Arc::new(InMemoryHost::new());
        let mut hero = OwningCharacter::new("hero", "Hero", ActorKind::Character);
        let mut item = SourceEntity::new("item", "Item", kind);
        item.equipped = true;
        item.flags = config.to_flags();
        hero.items.push(item);
        host.add_character(hero);

        let clock = Arc::new(ManualClock::new());
        let guard = Arc::new(DebounceGuard::new(clock.clone(), DebounceWindows::default()));
        let reconciler = Reconciler::new(
            host.clone(),
            Arc::new(ScriptedDice::default()),
            GrantResolver::new(Arc::new(StaticCatalog::new())),
            guard,
        );
        Fixture {
            host,
            clock,
            reconciler,
            hero: CharacterId::from("hero"),
        }
    }

    #[tokio::test]
    async fn test_second_pass_writes_nothing() {
        let f = fixture(
            UpgradeConfig::new(PowerTier::Two).with_cluster(ClusterSlot::First, Some(Family::Storm)),
            SourceKind::Weapon(WeaponStyle::Melee),
        );
        let first = f.reconciler.reconcile(&f.hero, &SourceId::from("item")).await.unwrap();
        assert_eq!(first.effects_created, 2);

        f.clock.advance(1_000);
        let second = f.reconciler.reconcile(&f.hero, &SourceId::from("item")).await.unwrap();
        assert_eq!(second.writes(), 0);
        assert!(!second.suppressed());
    }

    #[tokio::test]
    async fn test_element_is_kept_across_passes() {
        let f = fixture(
            UpgradeConfig::new(PowerTier::One).with_cluster(ClusterSlot::First, Some(Family::Flux)),
            SourceKind::Weapon(WeaponStyle::Melee),
        );
        f.reconciler.reconcile(&f.hero, &SourceId::from("item")).await.unwrap();
        let element = |h: &InMemoryHost| {
            h.snapshot(&CharacterId::from("hero"))
                .unwrap()
                .effects
                .iter()
                .find_map(|e| e.spec.injected_types().next())
        };
        assert_eq!(element(&f.host), Some(DamageType::Fire));

        // tier change rewrites the bonus but keeps the element
        let config = UpgradeConfig::new(PowerTier::Three).with_cluster(ClusterSlot::First, Some(Family::Flux));
        f.host.update_character(&f.hero, |c| c.items[0].flags = config.to_flags());
        f.clock.advance(1_000);
        let report = f.reconciler.reconcile(&f.hero, &SourceId::from("item")).await.unwrap();
        assert_eq!(report.effects_created, 1);
        assert_eq!(element(&f.host), Some(DamageType::Fire));
    }

    #[tokio::test]
    async fn test_missing_configuration_is_reported() {
        let f = fixture(UpgradeConfig::default(), SourceKind::Tool);
        f.host.update_character(&f.hero, |c| c.items[0].flags.clear());
        let report = f.reconciler.reconcile(&f.hero, &SourceId::from("item")).await.unwrap();
        assert_eq!(
            report.outcomes,
            vec![Outcome::ConfigurationMissing {
                source: SourceId::from("item")
            }]
        );
    }

    #[tokio::test]
    async fn test_unresolvable_grant_is_skipped() {
        let f = fixture(
            UpgradeConfig::new(PowerTier::One)
                .with_grant(GrantSlot::Spell, "no-such-spell")
                .with_cluster(ClusterSlot::Second, Some(Family::Blight)),
            SourceKind::Armor { natural: false },
        );
        let report = f.reconciler.reconcile(&f.hero, &SourceId::from("item")).await.unwrap();
        assert_eq!(report.grants_created, 1, "mobile falls back to the synthetic template");
        assert_eq!(report.effects_created, 1);
        assert!(report
            .outcomes
            .iter()
            .any(|o| matches!(o, Outcome::ContentResolutionFailed { identifier, .. } if identifier == "no-such-spell")));
    }

    #[tokio::test]
    async fn test_orphans_are_purged() {
        let f = fixture(UpgradeConfig::new(PowerTier::One), SourceKind::Armor { natural: false });
        f.reconciler.reconcile(&f.hero, &SourceId::from("item")).await.unwrap();
        f.host.update_character(&f.hero, |c| c.items.clear());

        let reports = f.reconciler.reconcile_character(&f.hero).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].effects_deleted, 1);
        assert!(f.host.snapshot(&f.hero).unwrap().effects.is_empty());
    }
}
