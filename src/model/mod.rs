//! Persistent entities the engine reads: source entities (equipment carrying an
//! upgrade configuration) and the characters that own them.

mod effect;

pub use effect::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Flat key-value map persisted on a document (source flags, character state flags)
pub type FlagMap = BTreeMap<String, serde_json::Value>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Owning character (actor) document id
    CharacterId
);
string_id!(
    /// Source entity (equipment) id
    SourceId
);
string_id!(
    /// Derived effect record id, assigned by the host
    EffectId
);
string_id!(
    /// Granted entity record id, assigned by the host
    GrantId
);
string_id!(TokenId);
string_id!(ZoneId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorKind {
    Character,
    Npc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Disposition {
    Friendly,
    Neutral,
    Hostile,
}

/// Saving-throw abilities used by the behaviour table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ability {
    Str,
    Dex,
    Con,
    Wis,
}

impl Ability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Dex => "dex",
            Self::Con => "con",
            Self::Wis => "wis",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitPoints {
    pub value: i32,
    pub max: i32,
}

impl HitPoints {
    pub fn new(value: i32, max: i32) -> Self {
        Self { value, max }
    }

    /// Current HP as a whole percentage of max (0 when max is 0)
    pub fn percent(&self) -> i32 {
        if self.max <= 0 {
            return 0;
        }
        self.value * 100 / self.max
    }

    /// Strictly below half of max
    pub fn below_half(&self) -> bool {
        self.value * 2 < self.max
    }

    pub fn at_or_below_half(&self) -> bool {
        self.value * 2 <= self.max
    }

    pub fn after_damage(&self, amount: i32) -> Self {
        Self {
            value: (self.value - amount).clamp(0, self.max),
            max: self.max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeaponStyle {
    Melee,
    Ranged,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Weapon(WeaponStyle),
    Armor { natural: bool },
    Tool,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attunement {
    None,
    Optional,
    Required,
}

/// Equippable object that may carry an upgrade configuration in `flags`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntity {
    pub id: SourceId,
    pub name: String,
    pub kind: SourceKind,
    pub equipped: bool,
    pub attuned: bool,
    pub attunement: Attunement,
    pub flags: FlagMap,
}

impl SourceEntity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id: SourceId::new(id),
            name: name.into(),
            kind,
            equipped: false,
            attuned: false,
            attunement: Attunement::None,
            flags: FlagMap::new(),
        }
    }

    /// Worn armor that is not natural armor
    pub fn is_armor(&self) -> bool {
        matches!(self.kind, SourceKind::Armor { natural: false })
    }

    pub fn weapon_style(&self) -> Option<WeaponStyle> {
        match self.kind {
            SourceKind::Weapon(style) => Some(style),
            _ => None,
        }
    }

    pub fn is_weapon(&self) -> bool {
        matches!(
            self.kind,
            SourceKind::Weapon(WeaponStyle::Melee | WeaponStyle::Ranged)
        )
    }
}

/// Concrete copy of resolved grant content, keyed by `(source_id, entry_id)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantedEntity {
    pub id: GrantId,
    pub source_id: SourceId,
    pub entry_id: String,
    pub name: String,
    pub description: String,
    pub synthetic: bool,
    pub equipped: bool,
    pub attunement_required: bool,
}

/// Draft for a granted entity before the host assigns an id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantDraft {
    pub source_id: SourceId,
    pub entry_id: String,
    pub name: String,
    pub description: String,
    pub synthetic: bool,
    pub equipped: bool,
    pub attunement_required: bool,
}

impl GrantDraft {
    pub fn into_entity(self, id: GrantId) -> GrantedEntity {
        GrantedEntity {
            id,
            source_id: self.source_id,
            entry_id: self.entry_id,
            name: self.name,
            description: self.description,
            synthetic: self.synthetic,
            equipped: self.equipped,
            attunement_required: self.attunement_required,
        }
    }
}

/// Character owning equipment, derived effects, granted content and state flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwningCharacter {
    pub id: CharacterId,
    pub name: String,
    pub kind: ActorKind,
    pub disposition: Disposition,
    pub hp: HitPoints,
    pub walk_speed_ft: u32,
    pub items: Vec<SourceEntity>,
    pub effects: Vec<DerivedEffect>,
    pub grants: Vec<GrantedEntity>,
    pub state_flags: FlagMap,
    /// Document revision; the host bumps it on every committed write
    #[serde(default)]
    pub revision: u64,
}

impl OwningCharacter {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ActorKind) -> Self {
        let disposition = match kind {
            ActorKind::Character => Disposition::Friendly,
            ActorKind::Npc => Disposition::Hostile,
        };
        Self {
            id: CharacterId::new(id),
            name: name.into(),
            kind,
            disposition,
            hp: HitPoints::new(10, 10),
            walk_speed_ft: crate::constants::DEFAULT_WALK_SPEED_FT,
            items: Vec::new(),
            effects: Vec::new(),
            grants: Vec::new(),
            state_flags: FlagMap::new(),
            revision: 0,
        }
    }

    pub fn item(&self, id: &SourceId) -> Option<&SourceEntity> {
        self.items.iter().find(|i| &i.id == id)
    }

    /// Effects of one category produced by one origin
    pub fn effects_from<'a>(
        &'a self,
        origin: &'a SourceId,
        category: EffectCategory,
    ) -> impl Iterator<Item = &'a DerivedEffect> + 'a {
        self.effects
            .iter()
            .filter(move |e| &e.spec.origin == origin && e.spec.category == category)
    }

    pub fn has_effect(&self, category: EffectCategory) -> bool {
        self.effects.iter().any(|e| e.spec.category == category)
    }

    pub fn grants_from<'a>(
        &'a self,
        source: &'a SourceId,
    ) -> impl Iterator<Item = &'a GrantedEntity> + 'a {
        self.grants.iter().filter(move |g| &g.source_id == source)
    }

    /// Equipped, configured items (weapons and armor carrying upgrade flags)
    pub fn upgraded_items(&self) -> impl Iterator<Item = &SourceEntity> {
        self.items.iter().filter(|i| i.equipped && !i.flags.is_empty())
    }

    /// Same side, not self
    pub fn is_ally_of(&self, other: &OwningCharacter) -> bool {
        self.id != other.id && self.kind == other.kind && self.disposition == other.disposition
    }

    /// Opposite side, one of them hostile
    pub fn is_hostile_to(&self, other: &OwningCharacter) -> bool {
        self.id != other.id
            && self.kind != other.kind
            && (self.disposition == Disposition::Hostile || other.disposition == Disposition::Hostile)
    }

    pub fn is_hostile(&self) -> bool {
        self.kind == ActorKind::Npc && self.disposition == Disposition::Hostile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hp_thresholds() {
        let hp = HitPoints::new(50, 100);
        assert!(!hp.below_half());
        assert!(hp.at_or_below_half());
        assert_eq!(hp.percent(), 50);
        assert!(hp.after_damage(1).below_half());
        assert_eq!(hp.after_damage(500).value, 0);
    }

    #[test]
    fn test_natural_armor_is_not_armor() {
        let plate = SourceEntity::new("a", "Plate", SourceKind::Armor { natural: false });
        let hide = SourceEntity::new("b", "Hide", SourceKind::Armor { natural: true });
        assert!(plate.is_armor());
        assert!(!hide.is_armor());
    }

    #[test]
    fn test_id_display_and_serde() {
        let id = CharacterId::from("hero");
        assert_eq!(id.to_string(), "hero");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"hero\"");
    }

    #[test]
    fn test_allies_and_hostiles() {
        let a = OwningCharacter::new("a", "A", ActorKind::Character);
        let b = OwningCharacter::new("b", "B", ActorKind::Character);
        let orc = OwningCharacter::new("o", "Orc", ActorKind::Npc);
        assert!(a.is_ally_of(&b));
        assert!(!a.is_ally_of(&a));
        assert!(!a.is_ally_of(&orc));
        assert!(orc.is_hostile());
        assert!(a.is_hostile_to(&orc) && orc.is_hostile_to(&a));
        assert!(!a.is_hostile_to(&b));

        let mut merchant = OwningCharacter::new("m", "Merchant", ActorKind::Npc);
        merchant.disposition = Disposition::Neutral;
        assert!(!a.is_hostile_to(&merchant));
    }
}
