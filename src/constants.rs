//! Centralized rule constants for the upgrade engine.
//!
//! Difficulty values, radii and durations used by the behaviour table. Debounce
//! windows are runtime settings and live in `settings`, not here.

// =====================================================
// Saving throws
// =====================================================

/// Crit push (melee, slot 2 Storm): Strength save
pub const PUSH_SAVE_DC: u32 = 13;

/// Rune Poison end-of-effect Constitution save
pub const RUNE_POISON_DC: u32 = 13;

/// Bonus-action pulse (armor, slot 2 Flux): attacker Constitution save
pub const BONUS_ACTION_PULSE_DC: u32 = 14;

/// Sporewake exposure Constitution save
pub const SPOREWAKE_DC: u32 = 14;

/// Gravebind (melee, slot 3 Blight): Dexterity save
pub const GRAVEBIND_DC: u32 = 15;

/// Watcher's Mantle fright pulse: Wisdom save
pub const FRIGHT_PULSE_DC: u32 = 15;

// =====================================================
// Distances (feet)
// =====================================================

/// Grid cell edge length
pub const FEET_PER_CELL: f32 = 5.0;

/// Rune Shield ally radius around the wearer
pub const RUNE_SHIELD_RADIUS_FT: f32 = 10.0;

/// Watcher's Mantle fright radius around the wearer
pub const FRIGHT_PULSE_RADIUS_FT: f32 = 10.0;

/// Rune Precision ally radius around the attacker
pub const PRECISION_RADIUS_FT: f32 = 20.0;

/// Debris cover, reveal pulse, terrain pulse and Sporewake radius
pub const SMALL_ZONE_RADIUS_FT: f32 = 7.5;

/// Rune pull zone radius
pub const PULL_ZONE_RADIUS_FT: f32 = 12.5;

/// Tokens at or within this distance of the pull centre are not pulled
pub const PULL_DEAD_ZONE_FT: f32 = 5.0;

/// Crit push distance in cells (10 ft)
pub const PUSH_CELLS: u32 = 2;

/// Stagger push distance in cells (5 ft)
pub const STAGGER_CELLS: u32 = 1;

/// Rune pull distance in cells (5 ft)
pub const PULL_CELLS: u32 = 1;

// =====================================================
// Durations (rounds)
// =====================================================

pub const ONE_ROUND: u32 = 1;
pub const RUNE_SHIELD_ROUNDS: u32 = 2;
pub const PRECISION_ROUNDS: u32 = 2;
pub const RUNE_POISON_ROUNDS: u32 = 10;
pub const SPOREWAKE_ROUNDS: u32 = 3;

// =====================================================
// Magnitudes
// =====================================================

/// Rune Shield AC bonus
pub const RUNE_SHIELD_AC: i32 = 2;

/// Rune Precision attack bonus
pub const PRECISION_ATTACK: i32 = 2;

/// Rune Slow: feet of speed lost per point rolled
pub const SLOW_FEET_PER_POINT: i32 = 5;

/// Rune Slow never drops walking speed below this
pub const SLOW_SPEED_FLOOR_FT: i32 = 5;

/// Staggered movement factor in percent
pub const STAGGER_SPEED_PERCENT: i32 = 50;

/// Illusory Aura HP threshold in percent of max HP (inclusive)
pub const ILLUSORY_AURA_HP_PERCENT: i32 = 10;

/// Default walking speed when a token reports none
pub const DEFAULT_WALK_SPEED_FT: u32 = 30;

// =====================================================
// Grant identifiers implied by cluster behaviours
// =====================================================

pub const MOBILE_FEAT: &str = "mobile";
pub const SHARPSHOOTER_FEAT: &str = "sharpshooter";
