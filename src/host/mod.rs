//! Host ports - everything the engine reads from or writes to the hosting game.
//!
//! The host owns persistence, permissions and event dispatch. Each write is its
//! own atomic unit against one document; there are no transactions. Every write
//! to a character bumps its `revision`.

mod memory;

pub use memory::{CallLog, InMemoryHost};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dice::DiceFormula;
use crate::grid::{GridPoint, TokenSnapshot};
use crate::model::{
    Ability, CharacterId, EffectId, EffectSpec, FlagMap, GrantDraft, GrantId, HitPoints, OwningCharacter,
    SourceId, TokenId, ZoneId,
};

pub type HostResult<T> = Result<T, HostError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("character not found: {0}")]
    CharacterNotFound(CharacterId),
    #[error("source entity not found: {0}")]
    SourceNotFound(SourceId),
    #[error("token not found: {0}")]
    TokenNotFound(TokenId),
    #[error("zone not found: {0}")]
    ZoneNotFound(ZoneId),
    #[error("host write rejected: {0}")]
    WriteRejected(String),
}

// ============================================================================
// Area zones
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneKind {
    DebrisCover,
    TerrainPulse,
    RevealIllusions,
    RunePull,
    Sporewake,
}

impl ZoneKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::DebrisCover => "Debris Cover",
            Self::TerrainPulse => "Terrain Pulse",
            Self::RevealIllusions => "Reveal Pulse",
            Self::RunePull => "Rune Pull",
            Self::Sporewake => "Sporewake Cloud",
        }
    }
}

/// Zone to create; `center: None` asks the host for manual placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDraft {
    pub kind: ZoneKind,
    pub center: Option<GridPoint>,
    pub radius_ft: f32,
    pub source: SourceId,
    pub owner: CharacterId,
    pub rounds_remaining: u32,
    pub damage_die: Option<DiceFormula>,
}

/// Area-of-effect marker owned by this engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaZone {
    pub id: ZoneId,
    pub kind: ZoneKind,
    pub center: Option<GridPoint>,
    pub radius_ft: f32,
    pub source: SourceId,
    pub owner: CharacterId,
    pub rounds_remaining: u32,
    pub damage_die: Option<DiceFormula>,
}

impl AreaZone {
    pub fn from_draft(id: ZoneId, draft: ZoneDraft) -> Self {
        Self {
            id,
            kind: draft.kind,
            center: draft.center,
            radius_ft: draft.radius_ft,
            source: draft.source,
            owner: draft.owner,
            rounds_remaining: draft.rounds_remaining,
            damage_die: draft.damage_die,
        }
    }

    /// Waiting for the host to place it
    pub fn is_pending(&self) -> bool {
        self.center.is_none()
    }

    pub fn contains(&self, point: GridPoint) -> bool {
        self.center.is_some_and(|c| c.distance_ft(point) <= self.radius_ft)
    }
}

// ============================================================================
// Narration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NarrationKind {
    Info,
    Miss,
    /// Forced movement could not be placed
    SpatialFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Narration {
    pub speaker: Option<CharacterId>,
    pub text: String,
    pub kind: NarrationKind,
}

impl Narration {
    pub fn info(speaker: &CharacterId, text: impl Into<String>) -> Self {
        Self {
            speaker: Some(speaker.clone()),
            text: text.into(),
            kind: NarrationKind::Info,
        }
    }

    pub fn of_kind(kind: NarrationKind, speaker: &CharacterId, text: impl Into<String>) -> Self {
        Self {
            speaker: Some(speaker.clone()),
            text: text.into(),
            kind,
        }
    }
}

// ============================================================================
// Host trait
// ============================================================================

/// Outbound collaborator: document store, dice-backed saves, chat, canvas
#[async_trait]
pub trait Host: Send + Sync {
    // ---- reads ----

    async fn character(&self, id: &CharacterId) -> HostResult<OwningCharacter>;
    async fn current_round(&self) -> u32;
    /// Characters present in the active scene, in scene order
    async fn scene_characters(&self) -> Vec<CharacterId>;
    /// Placed tokens, in scene order
    async fn tokens(&self) -> Vec<TokenSnapshot>;
    async fn zones(&self) -> Vec<AreaZone>;

    async fn token_for(&self, character: &CharacterId) -> Option<TokenSnapshot> {
        self.tokens().await.into_iter().find(|t| &t.character == character)
    }

    async fn tokens_within(&self, center: GridPoint, radius_ft: f32) -> Vec<TokenSnapshot> {
        self.tokens()
            .await
            .into_iter()
            .filter(|t| t.position.distance_ft(center) <= radius_ft)
            .collect()
    }

    // ---- derived records ----

    async fn create_effect(&self, character: &CharacterId, spec: EffectSpec) -> HostResult<EffectId>;
    async fn delete_effects(&self, character: &CharacterId, ids: &[EffectId]) -> HostResult<()>;
    async fn create_grant(&self, character: &CharacterId, draft: GrantDraft) -> HostResult<GrantId>;
    async fn delete_grants(&self, character: &CharacterId, ids: &[GrantId]) -> HostResult<()>;

    // ---- game actions ----

    /// Positive heals, negative damages; clamped to `0..=max`
    async fn apply_hp_delta(&self, character: &CharacterId, delta: i32) -> HostResult<HitPoints>;
    /// Saving throw total for `ability`
    async fn roll_save(&self, character: &CharacterId, ability: Ability, dc: u32) -> HostResult<u32>;
    async fn narrate(&self, narration: Narration);
    async fn move_token(&self, token: &TokenId, to: GridPoint) -> HostResult<()>;

    // ---- area zones ----

    async fn create_zone(&self, draft: ZoneDraft) -> HostResult<ZoneId>;
    async fn update_zone(&self, zone: AreaZone) -> HostResult<()>;
    async fn delete_zone(&self, id: &ZoneId) -> HostResult<()>;

    // ---- flat flag maps ----

    async fn set_state_flag(&self, character: &CharacterId, key: &str, value: serde_json::Value) -> HostResult<()>;
    async fn unset_state_flags(&self, character: &CharacterId, keys: &[String]) -> HostResult<()>;
    /// Merge `patch` into the source's flags; `null` removes a key
    async fn update_source_flags(&self, character: &CharacterId, source: &SourceId, patch: FlagMap) -> HostResult<()>;
}
