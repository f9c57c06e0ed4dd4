//! Outcome taxonomy and engine errors.
//!
//! Outcomes are recorded in reports and never abort the host. `EngineError` is
//! only returned when a handler could not read or write host state at all.

use serde::{Deserialize, Serialize};

use crate::grid::SpatialFailure;
use crate::guard::GuardSpace;
use crate::host::HostError;
use crate::model::{EffectCategory, SourceId, TokenId};
use crate::settings::SettingsError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// No upgrade configuration on the source; nothing to do
    ConfigurationMissing { source: SourceId },
    /// Grant content could not be resolved; that grant was skipped
    ContentResolutionFailed {
        source: SourceId,
        identifier: String,
        reason: String,
    },
    /// Forced movement skipped; non-spatial parts still applied
    SpatialResolutionFailed { token: TokenId, reason: SpatialFailure },
    /// Debounce guard rejected a re-entrant call
    DuplicateSuppressed { space: GuardSpace, key: String },
    /// More than one record shared a unique key; extras were deleted
    InvariantViolationDetected {
        origin: SourceId,
        category: String,
        removed: usize,
    },
}

impl Outcome {
    pub fn duplicate_invariant(origin: &SourceId, category: EffectCategory, removed: usize) -> Self {
        Self::InvariantViolationDetected {
            origin: origin.clone(),
            category: category.label().to_string(),
            removed,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, Self::DuplicateSuppressed { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("host error: {0}")]
    Host(#[from] HostError),
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("event queue for lane `{0}` is closed")]
    QueueClosed(String),
}
