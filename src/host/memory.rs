//! In-memory host used by tests and the simulator.
//!
//! Every write yields to the scheduler first, so concurrent handlers interleave at
//! the same points they would against a real document store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use super::{AreaZone, Host, HostError, HostResult, Narration, ZoneDraft};
use crate::grid::{GridPoint, TokenSnapshot};
use crate::model::{
    Ability, CharacterId, DerivedEffect, EffectId, EffectSpec, FlagMap, GrantDraft, GrantId, HitPoints,
    OwningCharacter, SourceId, TokenId, ZoneId,
};

/// Counts of externally visible calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    pub effect_creates: usize,
    pub effect_deletes: usize,
    pub grant_creates: usize,
    pub grant_deletes: usize,
    pub hp_deltas: usize,
    pub saves: usize,
    pub token_moves: usize,
    pub zone_creates: usize,
    pub zone_deletes: usize,
}

impl CallLog {
    /// Derived-record writes
    pub fn record_writes(&self) -> usize {
        self.effect_creates + self.effect_deletes + self.grant_creates + self.grant_deletes
    }
}

struct State {
    characters: Vec<OwningCharacter>,
    tokens: Vec<TokenSnapshot>,
    zones: Vec<AreaZone>,
    round: u32,
    next_id: u64,
    next_seq: u64,
    saves: HashMap<CharacterId, VecDeque<u32>>,
    default_save: u32,
    narrations: Vec<Narration>,
    calls: CallLog,
    fail_after: Option<usize>,
    failing: bool,
}

impl State {
    fn character_mut(&mut self, id: &CharacterId) -> HostResult<&mut OwningCharacter> {
        self.characters
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| HostError::CharacterNotFound(id.clone()))
    }

    /// Character about to be written; bumps its revision
    fn write_target(&mut self, id: &CharacterId) -> HostResult<&mut OwningCharacter> {
        let owner = self.character_mut(id)?;
        owner.revision += 1;
        Ok(owner)
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    /// Failure injection for record writes
    fn admit_write(&mut self) -> HostResult<()> {
        if self.failing {
            return Err(HostError::WriteRejected("injected failure".into()));
        }
        if let Some(remaining) = self.fail_after {
            if remaining == 0 {
                self.failing = true;
                return Err(HostError::WriteRejected("injected failure".into()));
            }
            self.fail_after = Some(remaining - 1);
        }
        Ok(())
    }
}

pub struct InMemoryHost {
    state: Mutex<State>,
}

impl Default for InMemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                characters: Vec::new(),
                tokens: Vec::new(),
                zones: Vec::new(),
                round: 1,
                next_id: 0,
                next_seq: 0,
                saves: HashMap::new(),
                default_save: 10,
                narrations: Vec::new(),
                calls: CallLog::default(),
                fail_after: None,
                failing: false,
            }),
        }
    }

    pub fn add_character(&self, character: OwningCharacter) {
        self.state.lock().characters.push(character);
    }

    /// Place (or move) the character's token
    pub fn place_token(&self, character: &CharacterId, at: GridPoint) -> TokenId {
        let token = TokenId::new(format!("tok-{}", character));
        let mut state = self.state.lock();
        match state.tokens.iter_mut().find(|t| t.token == token) {
            Some(existing) => existing.position = at,
            None => state.tokens.push(TokenSnapshot {
                token: token.clone(),
                character: character.clone(),
                position: at,
            }),
        }
        token
    }

    pub fn token_position(&self, character: &CharacterId) -> Option<GridPoint> {
        self.state
            .lock()
            .tokens
            .iter()
            .find(|t| &t.character == character)
            .map(|t| t.position)
    }

    pub fn set_round(&self, round: u32) {
        self.state.lock().round = round;
    }

    /// Mutate a character in place (equip toggles, HP, flags...) as one write
    pub fn update_character(&self, id: &CharacterId, f: impl FnOnce(&mut OwningCharacter)) -> bool {
        let mut state = self.state.lock();
        match state.write_target(id) {
            Ok(c) => {
                f(c);
                true
            }
            Err(_) => false,
        }
    }

    pub fn snapshot(&self, id: &CharacterId) -> Option<OwningCharacter> {
        self.state.lock().characters.iter().find(|c| &c.id == id).cloned()
    }

    /// Queue saving-throw totals for a character
    pub fn queue_saves(&self, character: &CharacterId, totals: impl IntoIterator<Item = u32>) {
        self.state
            .lock()
            .saves
            .entry(character.clone())
            .or_default()
            .extend(totals);
    }

    pub fn set_default_save(&self, total: u32) {
        self.state.lock().default_save = total;
    }

    pub fn narrations(&self) -> Vec<Narration> {
        self.state.lock().narrations.clone()
    }

    pub fn calls(&self) -> CallLog {
        self.state.lock().calls.clone()
    }

    pub fn reset_calls(&self) {
        self.state.lock().calls = CallLog::default();
    }

    pub fn zone_list(&self) -> Vec<AreaZone> {
        self.state.lock().zones.clone()
    }

    /// Reject every record write after `n` more succeed
    pub fn fail_writes_after(&self, n: usize) {
        let mut state = self.state.lock();
        state.fail_after = Some(n);
        state.failing = false;
    }

    pub fn heal_writes(&self) {
        let mut state = self.state.lock();
        state.fail_after = None;
        state.failing = false;
    }
}

#[async_trait]
impl Host for InMemoryHost {
    async fn character(&self, id: &CharacterId) -> HostResult<OwningCharacter> {
        self.snapshot(id)
            .ok_or_else(|| HostError::CharacterNotFound(id.clone()))
    }

    async fn current_round(&self) -> u32 {
        self.state.lock().round
    }

    async fn scene_characters(&self) -> Vec<CharacterId> {
        self.state.lock().characters.iter().map(|c| c.id.clone()).collect()
    }

    async fn tokens(&self) -> Vec<TokenSnapshot> {
        self.state.lock().tokens.clone()
    }

    async fn zones(&self) -> Vec<AreaZone> {
        self.state.lock().zones.clone()
    }

    async fn create_effect(&self, character: &CharacterId, spec: EffectSpec) -> HostResult<EffectId> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.admit_write()?;
        let id = EffectId::new(state.next_id("fx"));
        state.next_seq += 1;
        let seq = state.next_seq;
        let round = state.round;
        state.write_target(character)?.effects.push(DerivedEffect {
            id: id.clone(),
            spec,
            created_at_round: round,
            created_seq: seq,
        });
        state.calls.effect_creates += 1;
        Ok(id)
    }

    async fn delete_effects(&self, character: &CharacterId, ids: &[EffectId]) -> HostResult<()> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.admit_write()?;
        let owner = state.write_target(character)?;
        let before = owner.effects.len();
        owner.effects.retain(|e| !ids.contains(&e.id));
        let removed = before - owner.effects.len();
        state.calls.effect_deletes += removed;
        Ok(())
    }

    async fn create_grant(&self, character: &CharacterId, draft: GrantDraft) -> HostResult<GrantId> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.admit_write()?;
        let id = GrantId::new(state.next_id("grant"));
        state
            .write_target(character)?
            .grants
            .push(draft.into_entity(id.clone()));
        state.calls.grant_creates += 1;
        Ok(id)
    }

    async fn delete_grants(&self, character: &CharacterId, ids: &[GrantId]) -> HostResult<()> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.admit_write()?;
        let owner = state.write_target(character)?;
        let before = owner.grants.len();
        owner.grants.retain(|g| !ids.contains(&g.id));
        let removed = before - owner.grants.len();
        state.calls.grant_deletes += removed;
        Ok(())
    }

    async fn apply_hp_delta(&self, character: &CharacterId, delta: i32) -> HostResult<HitPoints> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        let owner = state.write_target(character)?;
        owner.hp.value = (owner.hp.value + delta).clamp(0, owner.hp.max);
        let hp = owner.hp;
        state.calls.hp_deltas += 1;
        Ok(hp)
    }

    async fn roll_save(&self, character: &CharacterId, _ability: Ability, _dc: u32) -> HostResult<u32> {
        let mut state = self.state.lock();
        state.character_mut(character)?;
        state.calls.saves += 1;
        let default = state.default_save;
        Ok(state
            .saves
            .get_mut(character)
            .and_then(|q| q.pop_front())
            .unwrap_or(default))
    }

    async fn narrate(&self, narration: Narration) {
        self.state.lock().narrations.push(narration);
    }

    async fn move_token(&self, token: &TokenId, to: GridPoint) -> HostResult<()> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        let entry = state
            .tokens
            .iter_mut()
            .find(|t| &t.token == token)
            .ok_or_else(|| HostError::TokenNotFound(token.clone()))?;
        entry.position = to;
        state.calls.token_moves += 1;
        Ok(())
    }

    async fn create_zone(&self, draft: ZoneDraft) -> HostResult<ZoneId> {
        let mut state = self.state.lock();
        let id = ZoneId::new(state.next_id("zone"));
        state.zones.push(AreaZone::from_draft(id.clone(), draft));
        state.calls.zone_creates += 1;
        Ok(id)
    }

    async fn update_zone(&self, zone: AreaZone) -> HostResult<()> {
        let mut state = self.state.lock();
        let slot = state
            .zones
            .iter_mut()
            .find(|z| z.id == zone.id)
            .ok_or_else(|| HostError::ZoneNotFound(zone.id.clone()))?;
        *slot = zone;
        Ok(())
    }

    async fn delete_zone(&self, id: &ZoneId) -> HostResult<()> {
        let mut state = self.state.lock();
        let before = state.zones.len();
        state.zones.retain(|z| &z.id != id);
        if state.zones.len() == before {
            return Err(HostError::ZoneNotFound(id.clone()));
        }
        state.calls.zone_deletes += 1;
        Ok(())
    }

    async fn set_state_flag(&self, character: &CharacterId, key: &str, value: serde_json::Value) -> HostResult<()> {
        let mut state = self.state.lock();
        state
            .write_target(character)?
            .state_flags
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn unset_state_flags(&self, character: &CharacterId, keys: &[String]) -> HostResult<()> {
        let mut state = self.state.lock();
        let owner = state.write_target(character)?;
        for key in keys {
            owner.state_flags.remove(key);
        }
        Ok(())
    }

    async fn update_source_flags(&self, character: &CharacterId, source: &SourceId, patch: FlagMap) -> HostResult<()> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        let item = state
            .write_target(character)?
            .items
            .iter_mut()
            .find(|i| &i.id == source)
            .ok_or_else(|| HostError::SourceNotFound(source.clone()))?;
        for (key, value) in patch {
            if value.is_null() {
                item.flags.remove(&key);
            } else {
                item.flags.insert(key, value);
            }
        }
        Ok(())
    }
}
