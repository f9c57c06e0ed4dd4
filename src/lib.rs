//! Upgradable Equipment - Core Library
//!
//! This crate keeps the derived state of upgradable equipment in sync with its
//! configuration and reacts to combat events:
//! - Configuration store (power tier, cluster slots, grant references)
//! - Effect reconciler (value-based diff of derived effects and granted content)
//! - Debounce guard with an injected clock
//! - Cooldown tracker for once-per-rest / once-per-round gates
//! - Trigger engine (attacks, incoming damage, turns, zones, rests)
//! - Grid resolution for forced movement and area pulls
//! - Per-character serialized event lanes

pub mod config;
pub mod constants;
pub mod cooldown;
pub mod dice;
pub mod engine;
pub mod events;
pub mod grants;
pub mod grid;
pub mod guard;
pub mod host;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod settings;
pub mod triggers;
