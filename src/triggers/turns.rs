//! Turn-start ticks, movement into zones and condition reactions.

use tracing::debug;

use super::{live_sources, TriggerBatch, TriggerEngine, TriggerRun};
use crate::config::Behavior;
use crate::engine::EngineError;
use crate::events::Condition;
use crate::grid::GridPoint;
use crate::model::{Ability, CharacterId, EffectCategory, EffectPayload};

impl TriggerEngine {
    /// Damage-over-time ticks, then zone exposure at the token's position
    pub async fn on_turn_start(&self, character: &CharacterId) -> Result<TriggerBatch, EngineError> {
        let round = self.host.current_round().await;
        if let Err(suppressed) = self.enter_trigger(character, None, &format!("turn-{}", round)) {
            return Ok(suppressed);
        }

        let mut batch = TriggerBatch::default();
        let target = self.host.character(character).await?;

        for effect in &target.effects {
            match (effect.spec.category, &effect.spec.payload) {
                (EffectCategory::RunePoison, EffectPayload::PoisonTick { die, dc }) => {
                    let mut run = TriggerRun::new(Behavior::RunePoison, &effect.spec.origin);
                    run.checked();
                    let amount = self.dice.roll(*die).await as i32;
                    run.drawn();
                    self.host.apply_hp_delta(&target.id, -amount).await?;
                    self.narrate(
                        &target.id,
                        format!("Rune poison burns {} for {} damage.", target.name, amount),
                    )
                    .await;
                    if !self.save_fails(&target.id, Ability::Con, *dc).await? {
                        self.remove_effect(&target.id, &effect.spec.origin, EffectCategory::RunePoison)
                            .await?;
                        self.narrate(&target.id, format!("{} shakes off the rune poison.", target.name))
                            .await;
                    }
                    run.applied(&target.id);
                    batch.reports.push(run.finish());
                }
                (EffectCategory::Gravebound, EffectPayload::NecroticTick { die }) => {
                    let mut run = TriggerRun::new(Behavior::Gravebind, &effect.spec.origin);
                    run.checked();
                    let amount = self.dice.roll(*die).await as i32;
                    run.drawn();
                    self.host.apply_hp_delta(&target.id, -amount).await?;
                    self.narrate(
                        &target.id,
                        format!("The grave's grip drains {} hit points from {}.", amount, target.name),
                    )
                    .await;
                    run.applied(&target.id);
                    batch.reports.push(run.finish());
                }
                _ => {}
            }
        }

        if let Some(token) = self.host.token_for(character).await {
            batch.reports.extend(self.exposure_check(character, token.position).await?);
        }
        Ok(batch)
    }

    pub async fn on_token_moved(&self, character: &CharacterId, to: GridPoint) -> Result<TriggerBatch, EngineError> {
        Ok(TriggerBatch {
            reports: self.exposure_check(character, to).await?,
            ..TriggerBatch::default()
        })
    }

    pub async fn on_condition(&self, character: &CharacterId, condition: Condition) -> Result<TriggerBatch, EngineError> {
        let mut batch = TriggerBatch::default();
        match condition {
            Condition::Prone => {
                let target = self.host.character(character).await?;
                for live in live_sources(&target) {
                    if !live.behaviors.contains(&Behavior::ProneRecovery) {
                        continue;
                    }
                    let mut run = TriggerRun::new(Behavior::ProneRecovery, &live.item.id);
                    if !target.hp.below_half() {
                        debug!(%character, "prone above half HP, no recovery");
                        batch.reports.push(run.finish());
                        continue;
                    }
                    run.checked();
                    let healed = self.dice.roll(live.config.tier.trigger_die()).await as i32;
                    run.drawn();
                    self.host.apply_hp_delta(&target.id, healed).await?;
                    self.narrate(
                        &target.id,
                        format!("{}'s {} knits {} hit points as they fall.", target.name, live.item.name, healed),
                    )
                    .await;
                    run.applied(&target.id);
                    batch.reports.push(run.finish());
                }
            }
        }
        Ok(batch)
    }
}
