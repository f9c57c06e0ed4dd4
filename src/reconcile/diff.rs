//! Value diff between desired and current records of one origin.
//!
//! Duplicates of a unique key are repaired here: the newest record is kept and
//! the rest are scheduled for deletion.

use std::collections::BTreeMap;

use super::desired::DesiredGrant;
use crate::guard::fingerprint;
use crate::model::{DerivedEffect, EffectCategory, EffectId, EffectSpec, GrantId, GrantedEntity};

/// Categories the reconciler owns
pub const RECONCILED: [EffectCategory; 4] = [
    EffectCategory::StatBonus,
    EffectCategory::PassiveMovement,
    EffectCategory::ElementalInjection,
    EffectCategory::ConditionalAura,
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectPlan {
    pub deletes: Vec<EffectId>,
    pub creates: Vec<EffectSpec>,
    /// `(category, extra records removed)`
    pub violations: Vec<(EffectCategory, usize)>,
}

impl EffectPlan {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.creates.is_empty()
    }

    /// Identity of the write set, used as a debounce descriptor
    pub fn fingerprint(&self) -> String {
        let deletes = self.deletes.iter().map(|id| id.as_str().to_string());
        let creates = self
            .creates
            .iter()
            .map(|spec| serde_json::to_string(spec).unwrap_or_default());
        fingerprint(deletes.chain(creates))
    }
}

/// `current` holds the character's records of this origin (any category)
pub fn plan_effects(current: &[DerivedEffect], desired: &BTreeMap<EffectCategory, EffectSpec>) -> EffectPlan {
    let mut plan = EffectPlan::default();

    for category in RECONCILED {
        let mut existing: Vec<&DerivedEffect> = current.iter().filter(|e| e.spec.category == category).collect();
        existing.sort_by_key(|e| e.created_seq);

        let keep = existing.pop();
        if !existing.is_empty() {
            plan.violations.push((category, existing.len()));
            plan.deletes.extend(existing.iter().map(|e| e.id.clone()));
        }

        match (desired.get(&category), keep) {
            (None, None) => {}
            (None, Some(current)) => plan.deletes.push(current.id.clone()),
            (Some(want), Some(current)) if &current.spec == want => {}
            (Some(want), Some(current)) => {
                plan.deletes.push(current.id.clone());
                plan.creates.push(want.clone());
            }
            (Some(want), None) => plan.creates.push(want.clone()),
        }
    }

    plan
}

/// Gating copied onto granted entities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantGating {
    pub equipped: bool,
    pub attunement_required: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrantPlan {
    /// `(record, entry id)`
    pub deletes: Vec<(GrantId, String)>,
    pub creates: Vec<DesiredGrant>,
    pub violations: Vec<(String, usize)>,
}

/// `current` holds the character's grants of this source
pub fn plan_grants(current: &[GrantedEntity], desired: &[DesiredGrant], gating: Option<GrantGating>) -> GrantPlan {
    let mut plan = GrantPlan::default();

    let mut by_entry: BTreeMap<&str, Vec<&GrantedEntity>> = BTreeMap::new();
    for grant in current {
        by_entry.entry(grant.entry_id.as_str()).or_default().push(grant);
    }

    for (entry, mut records) in by_entry {
        // host order is creation order; keep the newest
        let keep = records.pop();
        if !records.is_empty() {
            plan.violations.push((entry.to_string(), records.len()));
            plan.deletes
                .extend(records.iter().map(|g| (g.id.clone(), entry.to_string())));
        }
        let Some(keep) = keep else { continue };

        let wanted = desired.iter().find(|d| d.identifier == entry);
        let matches_gating = gating.is_some_and(|g| {
            keep.equipped == g.equipped && keep.attunement_required == g.attunement_required
        });
        match wanted {
            Some(_) if matches_gating => {}
            Some(want) => {
                plan.deletes.push((keep.id.clone(), entry.to_string()));
                plan.creates.push(want.clone());
            }
            None => plan.deletes.push((keep.id.clone(), entry.to_string())),
        }
    }

    for want in desired {
        if !current.iter().any(|g| g.entry_id == want.identifier) {
            plan.creates.push(want.clone());
        }
    }

    plan
}
