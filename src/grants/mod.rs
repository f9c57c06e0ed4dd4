//! Grant Content Resolver
//!
//! Resolves an abstract grant identifier to a concrete content template through
//! an external catalog. When the catalog has no entry, a small static table of
//! synthetic fallbacks is consulted. Results are cached for one reconciliation
//! pass only.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::{GrantSlot, UpgradeConfig};
use crate::constants::{MOBILE_FEAT, SHARPSHOOTER_FEAT};
use crate::model::{Attunement, GrantDraft, SourceEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Spell,
    Feat,
}

impl From<GrantSlot> for ContentKind {
    fn from(slot: GrantSlot) -> Self {
        match slot {
            GrantSlot::Spell => Self::Spell,
            GrantSlot::Feat => Self::Feat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTemplate {
    pub identifier: String,
    pub name: String,
    pub description: String,
    pub kind: ContentKind,
    /// Built locally because the catalog lacked it
    pub synthetic: bool,
}

impl ContentTemplate {
    pub fn new(
        identifier: impl Into<String>,
        name: impl Into<String>,
        kind: ContentKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            description: description.into(),
            kind,
            synthetic: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("catalog entry `{identifier}` is malformed: {reason}")]
    Malformed { identifier: String, reason: String },
}

/// External content catalog
#[async_trait]
pub trait ContentCatalog: Send + Sync {
    async fn lookup(&self, identifier: &str) -> Result<Option<ContentTemplate>, CatalogError>;
}

/// In-memory catalog
#[derive(Default)]
pub struct StaticCatalog {
    entries: RwLock<HashMap<String, ContentTemplate>>,
    unavailable: AtomicBool,
    lookups: AtomicU64,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, template: ContentTemplate) -> Self {
        self.insert(template);
        self
    }

    pub fn insert(&self, template: ContentTemplate) {
        self.entries.write().insert(template.identifier.clone(), template);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentCatalog for StaticCatalog {
    async fn lookup(&self, identifier: &str) -> Result<Option<ContentTemplate>, CatalogError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("catalog offline".into()));
        }
        Ok(self.entries.read().get(identifier).cloned())
    }
}

/// Locally defined templates used when the catalog lacks an entry
pub fn fallback_template(identifier: &str) -> Option<ContentTemplate> {
    let (name, description) = match identifier {
        MOBILE_FEAT => (
            "Mobile",
            "Your speed increases by 10 feet. Dashing ignores difficult terrain, and a creature you attack in melee can't make opportunity attacks against you this turn.",
        ),
        SHARPSHOOTER_FEAT => (
            "Sharpshooter",
            "Attacking at long range doesn't impose disadvantage, and your ranged weapon attacks ignore half and three-quarters cover.",
        ),
        _ => return None,
    };
    Some(ContentTemplate {
        identifier: identifier.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        kind: ContentKind::Feat,
        synthetic: true,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no catalog entry or fallback for `{0}`")]
    NotFound(String),
    #[error("catalog lookup for `{identifier}` failed: {source}")]
    Catalog {
        identifier: String,
        #[source]
        source: CatalogError,
    },
}

#[derive(Clone)]
pub struct GrantResolver {
    catalog: Arc<dyn ContentCatalog>,
}

impl GrantResolver {
    pub fn new(catalog: Arc<dyn ContentCatalog>) -> Self {
        Self { catalog }
    }

    /// Start a pass with a fresh cache
    pub fn pass(&self) -> ResolvePass<'_> {
        ResolvePass {
            catalog: self.catalog.as_ref(),
            cache: HashMap::new(),
        }
    }
}

/// One reconciliation pass worth of cached resolutions
pub struct ResolvePass<'a> {
    catalog: &'a dyn ContentCatalog,
    cache: HashMap<String, Result<ContentTemplate, ResolveError>>,
}

impl ResolvePass<'_> {
    pub async fn resolve(&mut self, identifier: &str) -> Result<ContentTemplate, ResolveError> {
        if let Some(cached) = self.cache.get(identifier) {
            return cached.clone();
        }
        let resolved = match self.catalog.lookup(identifier).await {
            Ok(Some(template)) => Ok(template),
            Ok(None) => {
                debug!(identifier, "catalog miss, trying fallback");
                fallback_template(identifier).ok_or_else(|| ResolveError::NotFound(identifier.to_string()))
            }
            Err(source) => Err(ResolveError::Catalog {
                identifier: identifier.to_string(),
                source,
            }),
        };
        self.cache.insert(identifier.to_string(), resolved.clone());
        resolved
    }
}

/// Concrete grant copy for `source`.
///
/// Name and description mention the source; equip and attunement gating are
/// copied from its configuration.
pub fn materialize(template: &ContentTemplate, source: &SourceEntity, config: &UpgradeConfig) -> GrantDraft {
    GrantDraft {
        source_id: source.id.clone(),
        entry_id: template.identifier.clone(),
        name: format!("{} ({})", template.name, source.name),
        description: format!("{}\n\nGranted by {}.", template.description, source.name),
        synthetic: template.synthetic,
        equipped: config.requires_equipped,
        attunement_required: config.requires_attunement || source.attunement == Attunement::Required,
    }
}
