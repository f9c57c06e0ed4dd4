//! Damage-about-to-apply behaviours on the target's armor.
//!
//! Threshold behaviours compare HP before and after the incoming amount, so a
//! crossing fires once; cooldown keys stop it firing again until rest.

use super::{live_sources, TriggerBatch, TriggerEngine, TriggerRun};
use crate::config::Behavior;
use crate::constants::{FRIGHT_PULSE_DC, FRIGHT_PULSE_RADIUS_FT, ONE_ROUND};
use crate::cooldown::{CooldownKey, Gate};
use crate::engine::EngineError;
use crate::events::DamageEvent;
use crate::model::{Ability, ChangeValue, EffectCategory, EffectChange, EffectSpec, Lifetime, StatKey};

impl TriggerEngine {
    pub async fn on_damage(&self, event: &DamageEvent) -> Result<TriggerBatch, EngineError> {
        if let Err(suppressed) = self.enter_trigger(&event.target, None, &event.event_id.0) {
            return Ok(suppressed);
        }

        let mut batch = TriggerBatch::default();
        if event.amount <= 0 {
            return Ok(batch);
        }

        let target = self.host.character(&event.target).await?;
        let round = self.host.current_round().await;
        let before = target.hp;
        let after = before.after_damage(event.amount);
        let mut amount = event.amount;

        let sources = live_sources(&target);

        // Resistance first, then healing against what is left
        for live in &sources {
            if !live.behaviors.contains(&Behavior::WatchersMantle) {
                continue;
            }
            let mut run = TriggerRun::new(Behavior::WatchersMantle, &live.item.id);
            let key = CooldownKey::gate(Gate::WatchersMantle, &live.item.id);
            if !after.at_or_below_half() || !self.cooldowns.claim(&target.id, &key, round).await? {
                batch.reports.push(run.finish());
                continue;
            }
            run.checked();
            amount /= 2;

            let mantle = EffectSpec::new(EffectCategory::WatchersMantle, live.item.id.clone(), Lifetime::Rounds(ONE_ROUND))
                .with_change(EffectChange::set(StatKey::DamageResistanceAll, ChangeValue::Flag(true)));
            self.write_effect(&target.id, mantle).await?;
            run.applied(&target.id);

            if let Some(token) = self.host.token_for(&target.id).await {
                let hostiles = self
                    .characters_near(token.position, FRIGHT_PULSE_RADIUS_FT, |c| c.is_hostile_to(&target))
                    .await?;
                for (_, hostile) in hostiles {
                    let fails = self.save_fails(&hostile.id, Ability::Wis, FRIGHT_PULSE_DC).await?;
                    run.drawn();
                    if fails {
                        let frightened =
                            EffectSpec::new(EffectCategory::Frightened, live.item.id.clone(), Lifetime::Rounds(ONE_ROUND))
                                .with_change(EffectChange::set(StatKey::AttackDisadvantage, ChangeValue::Flag(true)));
                        self.write_effect(&hostile.id, frightened).await?;
                        run.applied(&hostile.id);
                    }
                }
            }
            self.narrate(
                &target.id,
                format!("A buried watcher's mantle rises around {}.", target.name),
            )
            .await;
            batch.reports.push(run.finish());
        }

        for live in &sources {
            if !live.behaviors.contains(&Behavior::HealPulse) {
                continue;
            }
            let mut run = TriggerRun::new(Behavior::HealPulse, &live.item.id);
            let key = CooldownKey::gate(Gate::HealPulse, &live.item.id);
            let crosses = !before.below_half() && before.after_damage(amount).below_half();
            if !crosses || !self.cooldowns.claim(&target.id, &key, round).await? {
                batch.reports.push(run.finish());
                continue;
            }
            run.checked();
            let healed = self.dice.roll(live.config.tier.trigger_die()).await as i32;
            run.drawn();
            // never heal past max
            amount = (amount - healed).max(before.value - before.max);
            self.narrate(
                &target.id,
                format!("{}'s {} pulses, restoring {} hit points.", target.name, live.item.name, healed),
            )
            .await;
            run.applied(&target.id);
            batch.reports.push(run.finish());
        }

        batch.adjusted_damage = Some(amount);
        Ok(batch)
    }
}
