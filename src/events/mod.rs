//! Inbound lifecycle events from the host.
//!
//! Every event names the lane it serializes on: the character whose state it
//! mutates, or the scene for round/zone/combat-wide events.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::grid::GridPoint;
use crate::model::{CharacterId, SourceId, ZoneId};

/// Host-assigned id of one logical event; re-fires reuse it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackOutcome {
    Hit { critical: bool, damage_total: i32 },
    Miss,
}

impl AttackOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Hit { critical: true, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackEvent {
    pub event_id: EventId,
    pub attacker: CharacterId,
    pub target: Option<CharacterId>,
    /// Item the attack was made with
    pub source: SourceId,
    pub outcome: AttackOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackKind {
    Melee,
    Ranged,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageEvent {
    pub event_id: EventId,
    pub target: CharacterId,
    pub attacker: Option<CharacterId>,
    pub amount: i32,
    pub attack: Option<AttackKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Prone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEvent {
    /// Configuration on the source was written and committed
    ConfigurationChanged { character: CharacterId, source: SourceId },
    /// Equip/attune toggle about to be committed; `None` keeps the current value
    ItemEquipStateAboutToChange {
        character: CharacterId,
        source: SourceId,
        equipped: Option<bool>,
        attuned: Option<bool>,
    },
    AttackResolved(AttackEvent),
    DamageIncoming(DamageEvent),
    TurnStarted { character: CharacterId },
    TokenMoved { character: CharacterId, to: GridPoint },
    AreaTemplateCreated { zone: ZoneId, center: GridPoint },
    CombatRoundAdvanced { round: u32 },
    RestCompleted { character: CharacterId },
    CombatEnded,
    CharacterUpdated { character: CharacterId },
    SourceRemoved { character: CharacterId, source: SourceId },
    ConditionApplied { character: CharacterId, condition: Condition },
}

/// Serialization lane
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Lane {
    Character(CharacterId),
    Scene,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Character(id) => write!(f, "character:{}", id),
            Self::Scene => f.write_str("scene"),
        }
    }
}

impl GameEvent {
    pub fn lane(&self) -> Lane {
        match self {
            Self::ConfigurationChanged { character, .. }
            | Self::ItemEquipStateAboutToChange { character, .. }
            | Self::TurnStarted { character }
            | Self::TokenMoved { character, .. }
            | Self::RestCompleted { character }
            | Self::CharacterUpdated { character }
            | Self::SourceRemoved { character, .. }
            | Self::ConditionApplied { character, .. } => Lane::Character(character.clone()),
            Self::AttackResolved(attack) => Lane::Character(attack.attacker.clone()),
            Self::DamageIncoming(damage) => Lane::Character(damage.target.clone()),
            Self::AreaTemplateCreated { .. } | Self::CombatRoundAdvanced { .. } | Self::CombatEnded => Lane::Scene,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigurationChanged { .. } => "configuration-changed",
            Self::ItemEquipStateAboutToChange { .. } => "item-equip-state-about-to-change",
            Self::AttackResolved(_) => "attack-resolved",
            Self::DamageIncoming(_) => "damage-about-to-apply",
            Self::TurnStarted { .. } => "turn-started",
            Self::TokenMoved { .. } => "token-moved",
            Self::AreaTemplateCreated { .. } => "area-template-created",
            Self::CombatRoundAdvanced { .. } => "combat-round-advanced",
            Self::RestCompleted { .. } => "rest-completed",
            Self::CombatEnded => "combat-ended",
            Self::CharacterUpdated { .. } => "character-updated",
            Self::SourceRemoved { .. } => "source-removed",
            Self::ConditionApplied { .. } => "condition-applied",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lanes() {
        let hero = CharacterId::from("hero");
        let attack = GameEvent::AttackResolved(AttackEvent {
            event_id: EventId::new("roll-1"),
            attacker: hero.clone(),
            target: Some(CharacterId::from("orc")),
            source: SourceId::from("sword"),
            outcome: AttackOutcome::Miss,
        });
        assert_eq!(attack.lane(), Lane::Character(hero.clone()));
        assert_eq!(GameEvent::CombatRoundAdvanced { round: 2 }.lane(), Lane::Scene);
        assert_eq!(Lane::Character(hero).to_string(), "character:hero");
    }

    #[test]
    fn test_attack_outcome_flags() {
        let crit = AttackOutcome::Hit {
            critical: true,
            damage_total: 9,
        };
        assert!(crit.is_hit() && crit.is_critical());
        assert!(!AttackOutcome::Miss.is_hit());
    }

    #[test]
    fn test_event_serde() {
        let event = GameEvent::TokenMoved {
            character: CharacterId::from("hero"),
            to: GridPoint::new(2, 3),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: GameEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.kind(), "token-moved");
    }
}
