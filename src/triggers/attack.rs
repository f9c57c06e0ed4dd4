//! Attack-resolved behaviours: the attacker's weapon, then the defender's armor.

use tracing::debug;

use super::{live_sources, LiveSource, TriggerBatch, TriggerEngine, TriggerReport, TriggerRun};
use crate::config::{live_behaviors, Behavior, UpgradeConfig};
use crate::constants::*;
use crate::cooldown::{CooldownKey, Gate};
use crate::engine::{EngineError, Outcome};
use crate::events::{AttackEvent, AttackOutcome};
use crate::grid::{GridPoint, Heading};
use crate::host::{Narration, NarrationKind, ZoneDraft, ZoneKind};
use crate::model::{
    Ability, ChangeValue, EffectCategory, EffectChange, EffectPayload, EffectSpec, Lifetime, OwningCharacter,
    SourceEntity, StatKey, WeaponStyle,
};

struct AttackContext<'a> {
    attacker: &'a OwningCharacter,
    target: Option<&'a OwningCharacter>,
    item: &'a SourceEntity,
    config: &'a UpgradeConfig,
    critical: bool,
    damage_total: i32,
}

fn round_effect(category: EffectCategory, item: &SourceEntity, rounds: u32) -> EffectSpec {
    EffectSpec::new(category, item.id.clone(), Lifetime::Rounds(rounds))
}

impl TriggerEngine {
    pub async fn on_attack(&self, event: &AttackEvent) -> Result<TriggerBatch, EngineError> {
        if let Err(suppressed) = self.enter_trigger(&event.attacker, Some(&event.source), &event.event_id.0) {
            return Ok(suppressed);
        }

        let mut batch = TriggerBatch::default();
        let attacker = self.host.character(&event.attacker).await?;
        let target = match &event.target {
            Some(id) => Some(self.host.character(id).await?),
            None => None,
        };
        let Some(item) = attacker.item(&event.source).cloned() else {
            debug!(source = %event.source, "attack with an item the attacker doesn't hold");
            return Ok(batch);
        };

        match UpgradeConfig::from_flags(&item.flags) {
            None => batch.outcomes.push(Outcome::ConfigurationMissing {
                source: item.id.clone(),
            }),
            Some(config) => {
                let behaviors = live_behaviors(&item, &config);
                let (critical, damage_total) = match event.outcome {
                    AttackOutcome::Hit { critical, damage_total } => (critical, damage_total),
                    AttackOutcome::Miss => {
                        if !behaviors.is_empty() {
                            self.host
                                .narrate(Narration::of_kind(
                                    NarrationKind::Miss,
                                    &attacker.id,
                                    format!("{}'s {} misses; its runes flicker and fade.", attacker.name, item.name),
                                ))
                                .await;
                        }
                        return Ok(batch);
                    }
                };

                let ctx = AttackContext {
                    attacker: &attacker,
                    target: target.as_ref(),
                    item: &item,
                    config: &config,
                    critical,
                    damage_total,
                };
                for behavior in behaviors {
                    if let Some(report) = self.weapon_behavior(behavior, &ctx).await? {
                        batch.reports.push(report);
                    }
                }
            }
        }

        if item.weapon_style() == Some(WeaponStyle::Melee) && event.outcome.is_hit() {
            if let Some(defender) = &target {
                for live in live_sources(defender) {
                    for behavior in live.behaviors.clone() {
                        if let Some(report) = self.armor_reaction(behavior, &live, defender, &attacker).await? {
                            batch.reports.push(report);
                        }
                    }
                }
            }
        }

        Ok(batch)
    }

    /// `None` for behaviours that don't react to attacks
    async fn weapon_behavior(
        &self,
        behavior: Behavior,
        ctx: &AttackContext<'_>,
    ) -> Result<Option<TriggerReport>, EngineError> {
        let mut run = TriggerRun::new(behavior, &ctx.item.id);
        let tier_die = ctx.config.tier.trigger_die();

        if behavior.crit_only() && !ctx.critical {
            return Ok(Some(run.finish()));
        }

        match behavior {
            Behavior::ElementalBurst(family) => {
                run.checked();
                let element = ctx
                    .attacker
                    .effects_from(&ctx.item.id, EffectCategory::ElementalInjection)
                    .find_map(|e| e.spec.injected_types().next())
                    .unwrap_or(family.damage_types()[0]);
                let amount = self.dice.roll(tier_die).await;
                run.drawn();
                self.narrate(
                    &ctx.attacker.id,
                    format!("{} bursts with {} energy for {} extra damage.", ctx.item.name, element.as_str(), amount),
                )
                .await;
                run.applied(&ctx.attacker.id);
            }

            Behavior::CritPush => {
                let Some(target) = ctx.target else { return Ok(Some(run.finish())) };
                run.checked();
                let fails = self.save_fails(&target.id, Ability::Str, PUSH_SAVE_DC).await?;
                run.drawn();
                if fails {
                    if let Some(origin) = self.host.token_for(&ctx.attacker.id).await {
                        if let Some(outcome) = self
                            .force_move(target, origin.position, PUSH_CELLS, Heading::Away, None)
                            .await?
                        {
                            run.outcomes.push(outcome);
                        }
                    }
                    self.narrate(&target.id, format!("{} is hurled back by the blow.", target.name))
                        .await;
                    run.applied(&target.id);
                }
            }

            Behavior::CritStagger => {
                let Some(target) = ctx.target else { return Ok(Some(run.finish())) };
                run.checked();
                let staggered = round_effect(EffectCategory::Staggered, ctx.item, ONE_ROUND)
                    .with_change(EffectChange::scale(StatKey::WalkSpeed, STAGGER_SPEED_PERCENT));
                self.write_effect(&target.id, staggered).await?;
                if let Some(origin) = self.host.token_for(&ctx.attacker.id).await {
                    if let Some(outcome) = self
                        .force_move(target, origin.position, STAGGER_CELLS, Heading::Away, None)
                        .await?
                    {
                        run.outcomes.push(outcome);
                    }
                }
                run.applied(&target.id);
            }

            Behavior::TerrainPulse => {
                let Some(target) = ctx.target else { return Ok(Some(run.finish())) };
                if ctx.damage_total < target.hp.value {
                    return Ok(Some(run.finish()));
                }
                run.checked();
                let center = self.host.token_for(&target.id).await.map(|t| t.position);
                let draft = self.zone_draft(ZoneKind::TerrainPulse, center, SMALL_ZONE_RADIUS_FT, ctx, ONE_ROUND);
                self.place_zone(draft, &mut run).await?;
            }

            Behavior::RunePrecision => {
                run.checked();
                let Some(origin) = self.host.token_for(&ctx.attacker.id).await else {
                    return Ok(Some(run.finish()));
                };
                let against = ctx.target.map(|t| t.id.clone());
                let allies = self
                    .characters_near(origin.position, PRECISION_RADIUS_FT, |c| c.is_ally_of(ctx.attacker))
                    .await?;
                for (_, ally) in allies {
                    let spec = round_effect(EffectCategory::RunePrecision, ctx.item, PRECISION_ROUNDS)
                        .with_change(EffectChange::add(StatKey::AttackBonus, ChangeValue::Flat(PRECISION_ATTACK)))
                        .with_payload(EffectPayload::Precision {
                            against: against.clone(),
                        });
                    self.write_effect(&ally.id, spec).await?;
                    run.applied(&ally.id);
                }
            }

            Behavior::Gravebind => {
                let Some(target) = ctx.target else { return Ok(Some(run.finish())) };
                run.checked();
                let fails = self.save_fails(&target.id, Ability::Dex, GRAVEBIND_DC).await?;
                run.drawn();
                if fails {
                    let restrained = round_effect(EffectCategory::Restrained, ctx.item, ONE_ROUND)
                        .with_change(EffectChange::set(StatKey::WalkSpeed, ChangeValue::Flat(0)));
                    let bound = round_effect(EffectCategory::Gravebound, ctx.item, ONE_ROUND)
                        .with_payload(EffectPayload::NecroticTick { die: tier_die });
                    self.write_effect(&target.id, restrained).await?;
                    self.write_effect(&target.id, bound).await?;
                    self.narrate(&target.id, format!("Grasping grave-hands bind {}.", target.name))
                        .await;
                    run.applied(&target.id);
                }
            }

            Behavior::PhantomAdvantage => {
                run.checked();
                let spec = round_effect(EffectCategory::PhantomAdvantage, ctx.item, ONE_ROUND)
                    .with_change(EffectChange::set(StatKey::AdvantageNextAttack, ChangeValue::Flag(true)));
                self.write_effect(&ctx.attacker.id, spec).await?;
                run.applied(&ctx.attacker.id);
            }

            Behavior::TracerWhistle => {
                let Some(target) = ctx.target else { return Ok(Some(run.finish())) };
                run.checked();
                let spec = round_effect(EffectCategory::TracerWhistle, ctx.item, ONE_ROUND)
                    .with_change(EffectChange::set(StatKey::AttackDisadvantage, ChangeValue::Flag(true)));
                if self.write_effect(&target.id, spec).await? {
                    self.narrate(
                        &target.id,
                        format!("{} is disoriented by the tracer whistle.", target.name),
                    )
                    .await;
                }
                run.applied(&target.id);
            }

            Behavior::RunePoison => {
                let Some(target) = ctx.target else { return Ok(Some(run.finish())) };
                run.checked();
                let spec = round_effect(EffectCategory::RunePoison, ctx.item, RUNE_POISON_ROUNDS).with_payload(
                    EffectPayload::PoisonTick {
                        die: tier_die,
                        dc: RUNE_POISON_DC,
                    },
                );
                self.write_effect(&target.id, spec).await?;
                run.applied(&target.id);
            }

            Behavior::RuneSlow => {
                let Some(target) = ctx.target else { return Ok(Some(run.finish())) };
                run.checked();
                let rolled = self.dice.roll(tier_die).await;
                run.drawn();
                let headroom = (target.walk_speed_ft as i32 - SLOW_SPEED_FLOOR_FT).max(0);
                let penalty_ft = (rolled as i32 * SLOW_FEET_PER_POINT).min(headroom);
                let spec = round_effect(EffectCategory::RuneSlow, ctx.item, ONE_ROUND)
                    .with_change(EffectChange::add(StatKey::WalkSpeed, ChangeValue::Flat(-penalty_ft)))
                    .with_payload(EffectPayload::Slow { rolled, penalty_ft });
                self.write_effect(&target.id, spec).await?;
                self.narrate(&target.id, format!("{} is slowed by {} ft.", target.name, penalty_ft))
                    .await;
                run.applied(&target.id);
            }

            Behavior::DebrisCover => {
                run.checked();
                let center = self.host.token_for(&ctx.attacker.id).await.map(|t| t.position);
                let draft = self.zone_draft(ZoneKind::DebrisCover, center, SMALL_ZONE_RADIUS_FT, ctx, ONE_ROUND);
                self.place_zone(draft, &mut run).await?;
            }

            Behavior::DashBlock => {
                let Some(target) = ctx.target else { return Ok(Some(run.finish())) };
                run.checked();
                let spec = round_effect(EffectCategory::DashBlocked, ctx.item, ONE_ROUND)
                    .with_change(EffectChange::set(StatKey::Dash, ChangeValue::Flag(false)));
                self.write_effect(&target.id, spec).await?;
                run.applied(&target.id);
            }

            Behavior::RevealPulse | Behavior::RunePull | Behavior::Sporewake => {
                let Some(target) = ctx.target else { return Ok(Some(run.finish())) };
                run.checked();
                let center = self.host.token_for(&target.id).await.map(|t| t.position);
                let draft = match behavior {
                    Behavior::RevealPulse => {
                        self.zone_draft(ZoneKind::RevealIllusions, center, SMALL_ZONE_RADIUS_FT, ctx, ONE_ROUND)
                    }
                    Behavior::RunePull => {
                        self.zone_draft(ZoneKind::RunePull, center, PULL_ZONE_RADIUS_FT, ctx, ONE_ROUND)
                    }
                    _ => ZoneDraft {
                        damage_die: Some(tier_die),
                        ..self.zone_draft(ZoneKind::Sporewake, center, SMALL_ZONE_RADIUS_FT, ctx, SPOREWAKE_ROUNDS)
                    },
                };
                self.place_zone(draft, &mut run).await?;
            }

            // reconciled or reactive, not attack-triggered
            _ => return Ok(None),
        }

        Ok(Some(run.finish()))
    }

    fn zone_draft(
        &self,
        kind: ZoneKind,
        center: Option<GridPoint>,
        radius_ft: f32,
        ctx: &AttackContext<'_>,
        rounds: u32,
    ) -> ZoneDraft {
        ZoneDraft {
            kind,
            center,
            radius_ft,
            source: ctx.item.id.clone(),
            owner: ctx.attacker.id.clone(),
            rounds_remaining: rounds,
            damage_die: None,
        }
    }

    /// Defender armor reacting to a melee hit
    async fn armor_reaction(
        &self,
        behavior: Behavior,
        live: &LiveSource,
        wearer: &OwningCharacter,
        attacker: &OwningCharacter,
    ) -> Result<Option<TriggerReport>, EngineError> {
        let mut run = TriggerRun::new(behavior, &live.item.id);
        let tier_die = live.config.tier.trigger_die();
        let round = self.host.current_round().await;

        match behavior {
            Behavior::ReflectShock => {
                let key = CooldownKey::gate(Gate::ReflectShock, &live.item.id);
                if !self.cooldowns.claim(&wearer.id, &key, round).await? {
                    return Ok(Some(run.finish()));
                }
                run.checked();
                let amount = self.dice.roll(tier_die).await;
                run.drawn();
                self.host.apply_hp_delta(&attacker.id, -(amount as i32)).await?;
                self.narrate(
                    &wearer.id,
                    format!("{}'s {} lashes back at {} for {} damage.", wearer.name, live.item.name, attacker.name, amount),
                )
                .await;
                run.applied(&attacker.id);
            }

            Behavior::BonusActionPulse => {
                let key = CooldownKey::gate(Gate::BonusActionPulse, &live.item.id);
                if !self.cooldowns.claim(&wearer.id, &key, round).await? {
                    return Ok(Some(run.finish()));
                }
                run.checked();
                let fails = self
                    .save_fails(&attacker.id, Ability::Con, BONUS_ACTION_PULSE_DC)
                    .await?;
                run.drawn();
                if fails {
                    let spec = round_effect(EffectCategory::BonusActionBlocked, &live.item, ONE_ROUND)
                        .with_change(EffectChange::set(StatKey::BonusAction, ChangeValue::Flag(false)));
                    self.write_effect(&attacker.id, spec).await?;
                    run.applied(&attacker.id);
                }
            }

            Behavior::RuneShield => {
                let Some(origin) = self.host.token_for(&wearer.id).await else {
                    return Ok(Some(run.finish()));
                };
                run.checked();
                let allies = self
                    .characters_near(origin.position, RUNE_SHIELD_RADIUS_FT, |c| c.is_ally_of(wearer))
                    .await?;
                for (_, ally) in allies {
                    let spec = round_effect(EffectCategory::RuneShield, &live.item, RUNE_SHIELD_ROUNDS)
                        .with_change(EffectChange::add(StatKey::ArmorClassBonus, ChangeValue::Flat(RUNE_SHIELD_AC)));
                    self.write_effect(&ally.id, spec).await?;
                    run.applied(&ally.id);
                }
            }

            _ => return Ok(None),
        }

        Ok(Some(run.finish()))
    }
}
