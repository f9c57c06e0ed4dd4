//! Trigger Engine
//!
//! Maps transient game events to conditional, randomized side effects. Each
//! behaviour runs through `Idle -> ConditionsChecked -> (RandomOutcomeDrawn) ->
//! Applied` and returns to idle; the report records how far it got.
//!
//! Trigger-written effects keep the `(origin, category)` uniqueness of the
//! reconciled ones: writing a category replaces the previous record unless the
//! same record was already written this round.
//!
//! Behaviours reach characters outside the event's lane (the defender's armor
//! reacts on the attacker's lane). Gate claims and effect replaces therefore run
//! under the target character's write lock.

mod attack;
mod damage;
mod lifecycle;
mod turns;
mod zones;

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{live_behaviors, Behavior, UpgradeConfig};
use crate::cooldown::CooldownTracker;
use crate::dice::DrawService;
use crate::engine::Outcome;
use crate::grid::{order_by_distance, resolve_forced_move, ForcedMove, GridPoint, Heading, Occupancy, TokenSnapshot};
use crate::guard::{CharacterLocks, DebounceGuard, GuardKey, GuardSpace};
use crate::host::{Host, HostResult, Narration, NarrationKind};
use crate::model::{Ability, CharacterId, EffectCategory, EffectId, EffectSpec, OwningCharacter, SourceEntity, SourceId};
use crate::constants::FEET_PER_CELL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum TriggerPhase {
    Idle,
    ConditionsChecked,
    RandomOutcomeDrawn,
    Applied,
}

/// Result of one behaviour reacting to one event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerReport {
    pub behavior: Behavior,
    pub source: SourceId,
    /// Furthest phase reached before returning to idle
    pub phase: TriggerPhase,
    pub affected: Vec<CharacterId>,
    pub outcomes: Vec<Outcome>,
}

/// Everything a trigger handler produced for one event
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TriggerBatch {
    pub reports: Vec<TriggerReport>,
    pub outcomes: Vec<Outcome>,
    /// Damage the host should apply instead of the incoming amount
    pub adjusted_damage: Option<i32>,
}

impl TriggerBatch {
    pub fn applied(&self) -> impl Iterator<Item = &TriggerReport> {
        self.reports.iter().filter(|r| r.phase == TriggerPhase::Applied)
    }

    fn suppressed(space: GuardSpace, key: &GuardKey) -> Self {
        Self {
            outcomes: vec![Outcome::DuplicateSuppressed {
                space,
                key: key.to_string(),
            }],
            ..Self::default()
        }
    }
}

/// One behaviour's walk through the state machine
struct TriggerRun {
    behavior: Behavior,
    source: SourceId,
    phase: TriggerPhase,
    affected: Vec<CharacterId>,
    outcomes: Vec<Outcome>,
}

impl TriggerRun {
    fn new(behavior: Behavior, source: &SourceId) -> Self {
        Self {
            behavior,
            source: source.clone(),
            phase: TriggerPhase::Idle,
            affected: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    fn advance(&mut self, phase: TriggerPhase) {
        if phase > self.phase {
            self.phase = phase;
        }
    }

    fn checked(&mut self) {
        self.advance(TriggerPhase::ConditionsChecked);
    }

    fn drawn(&mut self) {
        self.advance(TriggerPhase::RandomOutcomeDrawn);
    }

    fn applied(&mut self, character: &CharacterId) {
        self.advance(TriggerPhase::Applied);
        if !self.affected.contains(character) {
            self.affected.push(character.clone());
        }
    }

    fn finish(self) -> TriggerReport {
        debug!(behavior = self.behavior.name(), phase = ?self.phase, "trigger finished");
        TriggerReport {
            behavior: self.behavior,
            source: self.source,
            phase: self.phase,
            affected: self.affected,
            outcomes: self.outcomes,
        }
    }
}

/// An upgraded item whose behaviours may fire
struct LiveSource {
    item: SourceEntity,
    config: UpgradeConfig,
    behaviors: Vec<Behavior>,
}

fn live_sources(owner: &OwningCharacter) -> Vec<LiveSource> {
    owner
        .items
        .iter()
        .filter_map(|item| {
            let config = UpgradeConfig::from_flags(&item.flags)?;
            let behaviors = live_behaviors(item, &config);
            (!behaviors.is_empty()).then(|| LiveSource {
                item: item.clone(),
                config,
                behaviors,
            })
        })
        .collect()
}

pub struct TriggerEngine {
    host: Arc<dyn Host>,
    dice: Arc<dyn DrawService>,
    guard: Arc<DebounceGuard>,
    cooldowns: CooldownTracker,
    locks: CharacterLocks,
}

impl TriggerEngine {
    pub fn new(host: Arc<dyn Host>, dice: Arc<dyn DrawService>, guard: Arc<DebounceGuard>) -> Self {
        let locks = CharacterLocks::new();
        let cooldowns = CooldownTracker::new(host.clone(), locks.clone());
        Self {
            host,
            dice,
            guard,
            cooldowns,
            locks,
        }
    }

    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    /// Write a trigger effect, replacing any previous record of its category.
    /// Returns `false` when the same record was already written this round.
    async fn write_effect(&self, character: &CharacterId, spec: EffectSpec) -> HostResult<bool> {
        let _write = self.locks.lock(character).await;
        let owner = self.host.character(character).await?;
        let round = self.host.current_round().await;
        let existing: Vec<_> = owner.effects_from(&spec.origin, spec.category).collect();

        if let [only] = existing.as_slice() {
            if only.spec == spec && only.created_at_round == round {
                debug!(%character, label = %spec.label, "effect already applied this round");
                return Ok(false);
            }
        }

        let stale: Vec<EffectId> = existing.iter().map(|e| e.id.clone()).collect();
        if !stale.is_empty() {
            self.host.delete_effects(character, &stale).await?;
        }
        info!(%character, label = %spec.label, "applying effect");
        self.host.create_effect(character, spec).await?;
        Ok(true)
    }

    async fn remove_effect(&self, character: &CharacterId, origin: &SourceId, category: EffectCategory) -> HostResult<()> {
        let _write = self.locks.lock(character).await;
        let owner = self.host.character(character).await?;
        let ids: Vec<EffectId> = owner.effects_from(origin, category).map(|e| e.id.clone()).collect();
        if ids.is_empty() {
            return Ok(());
        }
        self.host.delete_effects(character, &ids).await
    }

    /// `true` when the saving throw fails
    async fn save_fails(&self, character: &CharacterId, ability: Ability, dc: u32) -> HostResult<bool> {
        let total = self.host.roll_save(character, ability, dc).await?;
        debug!(%character, ability = ability.as_str(), dc, total, "saving throw");
        Ok(total < dc)
    }

    async fn narrate(&self, speaker: &CharacterId, text: String) {
        self.host.narrate(Narration::info(speaker, text)).await;
    }

    /// Characters with tokens within `radius_ft` of `center`, nearest first
    async fn characters_near(
        &self,
        center: GridPoint,
        radius_ft: f32,
        keep: impl Fn(&OwningCharacter) -> bool,
    ) -> HostResult<Vec<(TokenSnapshot, OwningCharacter)>> {
        let mut tokens = self.host.tokens_within(center, radius_ft).await;
        order_by_distance(&mut tokens, center, |t| t.position);

        let mut found = Vec::new();
        for token in tokens {
            let character = match self.host.character(&token.character).await {
                Ok(c) => c,
                Err(err) => {
                    debug!(token = %token.token, error = %err, "token without character");
                    continue;
                }
            };
            if keep(&character) {
                found.push((token, character));
            }
        }
        Ok(found)
    }

    /// Move `mover`'s token `cells` away from / toward `origin`.
    ///
    /// Returns the spatial failure outcome when no valid cell exists; the caller
    /// still applies its non-spatial parts.
    async fn force_move(
        &self,
        mover: &OwningCharacter,
        origin: GridPoint,
        cells: u32,
        heading: Heading,
        occupancy: Option<&mut Occupancy>,
    ) -> HostResult<Option<Outcome>> {
        let Some(token) = self.host.token_for(&mover.id).await else {
            debug!(character = %mover.id, "no token to move");
            return Ok(None);
        };
        let mut fresh;
        let occupancy = match occupancy {
            Some(occ) => occ,
            None => {
                fresh = Occupancy::from_tokens(&self.host.tokens().await, &token.token);
                &mut fresh
            }
        };

        let request = ForcedMove {
            origin,
            mover: token.position,
            cells,
            heading,
            allowance: (mover.walk_speed_ft as f32 / FEET_PER_CELL) as u32,
        };
        match resolve_forced_move(request, occupancy) {
            Ok(dest) => {
                self.host.move_token(&token.token, dest).await?;
                occupancy.vacate(token.position);
                occupancy.occupy(dest);
                info!(character = %mover.id, x = dest.x, y = dest.y, "token relocated");
                Ok(None)
            }
            Err(reason) => {
                self.host
                    .narrate(Narration::of_kind(
                        NarrationKind::SpatialFailure,
                        &mover.id,
                        format!("{} could not be relocated ({}).", mover.name, reason),
                    ))
                    .await;
                Ok(Some(Outcome::SpatialResolutionFailed {
                    token: token.token,
                    reason,
                }))
            }
        }
    }

    fn enter_trigger(&self, character: &CharacterId, source: Option<&SourceId>, descriptor: &str) -> Result<(), TriggerBatch> {
        let key = GuardKey::new(GuardSpace::Trigger, character, source, descriptor);
        if self.guard.try_enter(&key) {
            Ok(())
        } else {
            debug!(%key, "trigger suppressed");
            Err(TriggerBatch::suppressed(GuardSpace::Trigger, &key))
        }
    }
}
