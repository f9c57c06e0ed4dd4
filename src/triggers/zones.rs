//! Area zones: creation effects, deferred placement and per-round exposure.

use tracing::{debug, info, warn};

use super::{TriggerBatch, TriggerEngine, TriggerReport, TriggerRun};
use crate::config::Behavior;
use crate::constants::{ONE_ROUND, PULL_CELLS, PULL_DEAD_ZONE_FT, SPOREWAKE_DC};
use crate::cooldown::CooldownKey;
use crate::engine::EngineError;
use crate::grid::{GridPoint, Heading, Occupancy};
use crate::host::{AreaZone, ZoneDraft, ZoneKind};
use crate::model::{
    Ability, ChangeValue, CharacterId, EffectCategory, EffectChange, EffectSpec, Lifetime, OwningCharacter, StatKey,
    ZoneId,
};

fn behavior_of(kind: ZoneKind) -> Behavior {
    match kind {
        ZoneKind::DebrisCover => Behavior::DebrisCover,
        ZoneKind::TerrainPulse => Behavior::TerrainPulse,
        ZoneKind::RevealIllusions => Behavior::RevealPulse,
        ZoneKind::RunePull => Behavior::RunePull,
        ZoneKind::Sporewake => Behavior::Sporewake,
    }
}

impl TriggerEngine {
    /// Create the zone and resolve it now, or ask for manual placement
    pub(super) async fn place_zone(&self, draft: ZoneDraft, run: &mut TriggerRun) -> Result<(), EngineError> {
        let owner = draft.owner.clone();
        let label = draft.kind.label();
        let id = self.host.create_zone(draft.clone()).await?;
        let zone = AreaZone::from_draft(id, draft);

        if zone.is_pending() {
            info!(zone = %zone.id, kind = label, "zone awaiting placement");
            self.narrate(&owner, format!("Place the {} template.", label)).await;
            run.checked();
            return Ok(());
        }
        self.resolve_zone_creation(&zone, run).await
    }

    /// The host placed a pending zone
    pub async fn on_area_template_created(&self, zone: &ZoneId, center: GridPoint) -> Result<TriggerBatch, EngineError> {
        let mut batch = TriggerBatch::default();
        let Some(mut placed) = self.host.zones().await.into_iter().find(|z| &z.id == zone) else {
            debug!(%zone, "template is not one of ours");
            return Ok(batch);
        };
        if !placed.is_pending() {
            debug!(%zone, "zone already placed");
            return Ok(batch);
        }

        placed.center = Some(center);
        self.host.update_zone(placed.clone()).await?;

        let mut run = TriggerRun::new(behavior_of(placed.kind), &placed.source);
        run.checked();
        self.resolve_zone_creation(&placed, &mut run).await?;
        batch.reports.push(run.finish());
        Ok(batch)
    }

    async fn resolve_zone_creation(&self, zone: &AreaZone, run: &mut TriggerRun) -> Result<(), EngineError> {
        let Some(center) = zone.center else {
            return Ok(());
        };
        let owner = self.host.character(&zone.owner).await?;
        info!(zone = %zone.id, kind = zone.kind.label(), "zone resolving");

        match zone.kind {
            ZoneKind::TerrainPulse => {
                let hostiles = self
                    .characters_near(center, zone.radius_ft, |c| c.is_hostile_to(&owner))
                    .await?;
                for (_, hostile) in hostiles {
                    let spec = EffectSpec::new(EffectCategory::ReactionBlocked, zone.source.clone(), Lifetime::Rounds(ONE_ROUND))
                        .with_change(EffectChange::set(StatKey::Reaction, ChangeValue::Flag(false)));
                    self.write_effect(&hostile.id, spec).await?;
                    run.applied(&hostile.id);
                }
                self.narrate(&owner.id, "The ground heaves and buckles.".to_string()).await;
            }

            ZoneKind::RunePull => {
                let mut occupancy = Occupancy::default();
                for token in self.host.tokens().await {
                    occupancy.occupy(token.position);
                }
                let candidates = self
                    .characters_near(center, zone.radius_ft, |c| c.is_hostile_to(&owner))
                    .await?;
                for (token, hostile) in candidates {
                    if token.position.distance_ft(center) <= PULL_DEAD_ZONE_FT {
                        continue;
                    }
                    // the mover's own cell is not an obstacle for itself
                    occupancy.vacate(token.position);
                    let outcome = self
                        .force_move(&hostile, center, PULL_CELLS, Heading::Toward, Some(&mut occupancy))
                        .await?;
                    match outcome {
                        Some(failure) => {
                            occupancy.occupy(token.position);
                            run.outcomes.push(failure);
                        }
                        None => run.applied(&hostile.id),
                    }
                }
            }

            ZoneKind::Sporewake => {
                let round = self.host.current_round().await;
                let inside = self.characters_near(center, zone.radius_ft, |c| c.id != owner.id).await?;
                for (_, character) in inside {
                    if self.expose_to_zone(zone, &character, round).await? {
                        run.drawn();
                        run.applied(&character.id);
                    }
                }
            }

            ZoneKind::DebrisCover => {
                self.narrate(&owner.id, format!("Debris showers around {}, offering cover.", owner.name))
                    .await;
                run.applied(&owner.id);
            }

            ZoneKind::RevealIllusions => {
                self.narrate(&owner.id, "A pulse of light strips illusions bare.".to_string())
                    .await;
                run.applied(&owner.id);
            }
        }
        Ok(())
    }

    /// Once-per-round save-or-effect for a character inside `zone`.
    /// Returns `false` when the zone already affected them this round.
    pub(super) async fn expose_to_zone(
        &self,
        zone: &AreaZone,
        character: &OwningCharacter,
        round: u32,
    ) -> Result<bool, EngineError> {
        let key = CooldownKey::zone(&zone.id);
        if !self.cooldowns.claim(&character.id, &key, round).await? {
            debug!(zone = %zone.id, character = %character.id, "already exposed this round");
            return Ok(false);
        }

        if let Some(die) = zone.damage_die {
            let amount = self.dice.roll(die).await as i32;
            self.host.apply_hp_delta(&character.id, -amount).await?;
            self.narrate(
                &character.id,
                format!("{} chokes on spores for {} poison damage.", character.name, amount),
            )
            .await;
        }
        if self.save_fails(&character.id, Ability::Con, SPOREWAKE_DC).await? {
            let spec = EffectSpec::new(EffectCategory::SporePoisoned, zone.source.clone(), Lifetime::Rounds(ONE_ROUND))
                .with_change(EffectChange::set(StatKey::AttackDisadvantage, ChangeValue::Flag(true)));
            self.write_effect(&character.id, spec).await?;
        }
        Ok(true)
    }

    /// Sporewake zones covering `at` that haven't affected the character this round
    pub(super) async fn exposure_check(
        &self,
        character: &CharacterId,
        at: GridPoint,
    ) -> Result<Vec<TriggerReport>, EngineError> {
        let target = match self.host.character(character).await {
            Ok(c) => c,
            Err(err) => {
                warn!(%character, error = %err, "exposure check without character");
                return Ok(Vec::new());
            }
        };
        let round = self.host.current_round().await;

        let mut reports = Vec::new();
        for zone in self.host.zones().await {
            if zone.kind != ZoneKind::Sporewake || zone.owner == target.id || !zone.contains(at) {
                continue;
            }
            let mut run = TriggerRun::new(Behavior::Sporewake, &zone.source);
            run.checked();
            if self.expose_to_zone(&zone, &target, round).await? {
                run.drawn();
                run.applied(&target.id);
            }
            reports.push(run.finish());
        }
        Ok(reports)
    }
}
