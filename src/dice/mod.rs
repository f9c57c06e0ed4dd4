//! Randomized Draw Service
//!
//! Produces integer outcomes from named dice (`1d4`, `2d6`, ...). Each die is an
//! independent uniform draw over its faces. Two implementations:
//! - `SeededDice`: Xoshiro256++ behind a lock, seeded from a number or a label
//! - `ScriptedDice`: replays queued totals, for deterministic tests and replays

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Supported die shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Die {
    D4,
    D6,
    D8,
    D10,
    D12,
    D20,
}

impl Die {
    pub fn faces(&self) -> u32 {
        match self {
            Self::D4 => 4,
            Self::D6 => 6,
            Self::D8 => 8,
            Self::D10 => 10,
            Self::D12 => 12,
            Self::D20 => 20,
        }
    }

    pub fn from_faces(faces: u32) -> Option<Self> {
        match faces {
            4 => Some(Self::D4),
            6 => Some(Self::D6),
            8 => Some(Self::D8),
            10 => Some(Self::D10),
            12 => Some(Self::D12),
            20 => Some(Self::D20),
            _ => None,
        }
    }
}

/// `count` dice of one shape, summed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiceFormula {
    pub count: u32,
    pub die: Die,
}

impl DiceFormula {
    pub const fn new(count: u32, die: Die) -> Self {
        Self { count, die }
    }

    pub const fn single(die: Die) -> Self {
        Self { count: 1, die }
    }

    pub fn min(&self) -> u32 {
        self.count
    }

    pub fn max(&self) -> u32 {
        self.count * self.die.faces()
    }
}

impl fmt::Display for DiceFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.die.faces())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DiceError {
    #[error("malformed dice formula: {0:?}")]
    Malformed(String),
    #[error("unsupported die: d{0}")]
    UnsupportedDie(u32),
    #[error("dice count must be between 1 and 20, got {0}")]
    Count(u32),
}

impl FromStr for DiceFormula {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_lowercase();
        let (count, faces) = trimmed
            .split_once('d')
            .ok_or_else(|| DiceError::Malformed(s.to_string()))?;

        let count = if count.is_empty() {
            1
        } else {
            count
                .parse::<u32>()
                .map_err(|_| DiceError::Malformed(s.to_string()))?
        };
        if !(1..=20).contains(&count) {
            return Err(DiceError::Count(count));
        }

        let faces = faces
            .parse::<u32>()
            .map_err(|_| DiceError::Malformed(s.to_string()))?;
        let die = Die::from_faces(faces).ok_or(DiceError::UnsupportedDie(faces))?;

        Ok(Self { count, die })
    }
}

/// Source of randomized outcomes. Every call is an independent draw.
#[async_trait]
pub trait DrawService: Send + Sync {
    /// Roll the formula and return the total
    async fn roll(&self, formula: DiceFormula) -> u32;

    /// Uniform index in `0..len`; returns 0 when `len` is 0
    async fn pick(&self, len: usize) -> usize;
}

/// Seeded Xoshiro256++ dice
pub struct SeededDice {
    rng: Mutex<Xoshiro256PlusPlus>,
}

impl SeededDice {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(Xoshiro256PlusPlus::seed_from_u64(seed)),
        }
    }

    /// Derive the seed from a label (session name, scene id, ...)
    pub fn from_label(label: &str) -> Self {
        Self::from_seed(label_seed(label))
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(Xoshiro256PlusPlus::from_entropy()),
        }
    }
}

/// Stable 64-bit seed from a label
pub fn label_seed(label: &str) -> u64 {
    let mut hasher = Sha3_256::new();
    hasher.update(label.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[0..8]);
    u64::from_le_bytes(bytes)
}

#[async_trait]
impl DrawService for SeededDice {
    async fn roll(&self, formula: DiceFormula) -> u32 {
        let faces = formula.die.faces();
        let mut rng = self.rng.lock();
        (0..formula.count).map(|_| rng.gen_range(1..=faces)).sum()
    }

    async fn pick(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        self.rng.lock().gen_range(0..len)
    }
}

/// Replays queued outcomes in order.
///
/// Roll totals are clamped into the formula's range; an exhausted queue rolls the
/// formula minimum and picks index 0.
#[derive(Default)]
pub struct ScriptedDice {
    totals: Mutex<VecDeque<u32>>,
    picks: Mutex<VecDeque<usize>>,
}

impl ScriptedDice {
    pub fn new(totals: impl IntoIterator<Item = u32>) -> Self {
        Self {
            totals: Mutex::new(totals.into_iter().collect()),
            picks: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_picks(self, picks: impl IntoIterator<Item = usize>) -> Self {
        self.picks.lock().extend(picks);
        self
    }

    pub fn push_total(&self, total: u32) {
        self.totals.lock().push_back(total);
    }

    pub fn remaining(&self) -> usize {
        self.totals.lock().len()
    }
}

#[async_trait]
impl DrawService for ScriptedDice {
    async fn roll(&self, formula: DiceFormula) -> u32 {
        let next = self.totals.lock().pop_front();
        next.map_or(formula.min(), |v| v.clamp(formula.min(), formula.max()))
    }

    async fn pick(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        self.picks.lock().pop_front().map_or(0, |i| i % len)
    }
}
