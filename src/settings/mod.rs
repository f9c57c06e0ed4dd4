//! Engine settings loaded from JSON.
//!
//! Debounce windows per guard keyspace, the dice seed, queue capacity and the
//! tracing filter. A file is validated as a whole before anything uses it.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::logging::TracingConfig;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("debounce window `{name}` must be 1..=10000 ms, got {value}")]
    Window { name: &'static str, value: u64 },
    #[error("queue capacity must be greater than zero")]
    QueueCapacity,
}

/// Debounce window per guard keyspace, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceWindows {
    pub grant_add_ms: u64,
    pub grant_remove_ms: u64,
    pub enhancement_ms: u64,
    pub evaluation_ms: u64,
    pub trigger_ms: u64,
}

impl Default for DebounceWindows {
    fn default() -> Self {
        Self {
            grant_add_ms: 500,
            grant_remove_ms: 300,
            enhancement_ms: 300,
            evaluation_ms: 100,
            trigger_ms: 250,
        }
    }
}

impl DebounceWindows {
    fn named(&self) -> [(&'static str, u64); 5] {
        [
            ("grant_add_ms", self.grant_add_ms),
            ("grant_remove_ms", self.grant_remove_ms),
            ("enhancement_ms", self.enhancement_ms),
            ("evaluation_ms", self.evaluation_ms),
            ("trigger_ms", self.trigger_ms),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub debounce: DebounceWindows,
    /// Fixed seed for reproducible sessions; entropy when absent
    pub dice_seed: Option<u64>,
    /// Per-lane event queue capacity
    pub queue_capacity: usize,
    pub tracing: TracingConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            debounce: DebounceWindows::default(),
            dice_seed: None,
            queue_capacity: 100,
            tracing: TracingConfig::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        for (name, value) in self.debounce.named() {
            if !(1..=10_000).contains(&value) {
                return Err(SettingsError::Window { name, value });
            }
        }
        if self.queue_capacity == 0 {
            return Err(SettingsError::QueueCapacity);
        }
        Ok(())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
