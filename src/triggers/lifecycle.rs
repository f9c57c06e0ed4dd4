//! Lifecycle boundaries: rest, round advance, combat end.

use tracing::{debug, info};

use super::{TriggerBatch, TriggerEngine};
use crate::cooldown::Boundary;
use crate::engine::EngineError;
use crate::model::{CharacterId, EffectId, Lifetime};

impl TriggerEngine {
    /// Clear the resting character's per-rest cooldowns
    pub async fn on_rest(&self, character: &CharacterId) -> Result<TriggerBatch, EngineError> {
        let cleared = self.cooldowns.clear_boundary(character, Boundary::Rest).await?;
        info!(%character, cleared = cleared.len(), "rest completed");
        Ok(TriggerBatch::default())
    }

    /// Expire round-limited effects, clear round cooldowns and tick zones down
    pub async fn on_round_advanced(&self, round: u32) -> Result<TriggerBatch, EngineError> {
        for character in self.host.scene_characters().await {
            let owner = self.host.character(&character).await?;
            let expired: Vec<EffectId> = owner
                .effects
                .iter()
                .filter(|e| e.is_expired(round))
                .map(|e| e.id.clone())
                .collect();
            if !expired.is_empty() {
                debug!(%character, count = expired.len(), round, "effects expired");
                self.host.delete_effects(&character, &expired).await?;
            }
            self.cooldowns
                .clear_boundary(&character, Boundary::RoundAdvanced { round })
                .await?;
        }

        for mut zone in self.host.zones().await {
            zone.rounds_remaining = zone.rounds_remaining.saturating_sub(1);
            if zone.rounds_remaining == 0 {
                info!(zone = %zone.id, kind = zone.kind.label(), "zone dissipated");
                self.host.delete_zone(&zone.id).await?;
            } else {
                self.host.update_zone(zone).await?;
            }
        }
        Ok(TriggerBatch::default())
    }

    /// Drop combat-scoped state across the scene
    pub async fn on_combat_ended(&self) -> Result<TriggerBatch, EngineError> {
        for character in self.host.scene_characters().await {
            self.cooldowns.clear_boundary(&character, Boundary::CombatEnded).await?;
            let owner = self.host.character(&character).await?;
            let timed: Vec<EffectId> = owner
                .effects
                .iter()
                .filter(|e| !e.spec.category.is_reconciled() && matches!(e.spec.lifetime, Lifetime::Rounds(_)))
                .map(|e| e.id.clone())
                .collect();
            if !timed.is_empty() {
                self.host.delete_effects(&character, &timed).await?;
            }
        }
        for zone in self.host.zones().await {
            self.host.delete_zone(&zone.id).await?;
        }
        info!("combat ended");
        Ok(TriggerBatch::default())
    }
}
