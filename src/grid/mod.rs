//! Positional resolution on the square grid.
//!
//! Positions are integer cells; distances are reported in feet. Forced movement
//! walks a rounded direction vector and tries the farthest cell first, rejecting
//! occupied cells and cells beyond the mover's walk allowance.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::constants::FEET_PER_CELL;
use crate::model::{CharacterId, TokenId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GridPoint {
    pub x: i32,
    pub y: i32,
}

impl GridPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance in feet
    pub fn distance_ft(&self, other: GridPoint) -> f32 {
        let dx = (self.x - other.x) as f32;
        let dy = (self.y - other.y) as f32;
        (dx * dx + dy * dy).sqrt() * FEET_PER_CELL
    }

    /// Cells moved, counting diagonals as one
    pub fn chebyshev(&self, other: GridPoint) -> u32 {
        (self.x - other.x).unsigned_abs().max((self.y - other.y).unsigned_abs())
    }

    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// A placed token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub token: TokenId,
    pub character: CharacterId,
    pub position: GridPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum SpatialFailure {
    #[error("mover is at the effect origin, no direction")]
    NoDirection,
    #[error("no free cell within reach")]
    NoFreeCell,
}

/// Occupied cells, excluding the mover
#[derive(Debug, Clone, Default)]
pub struct Occupancy {
    cells: HashSet<GridPoint>,
}

impl Occupancy {
    pub fn from_tokens<'a>(tokens: impl IntoIterator<Item = &'a TokenSnapshot>, mover: &TokenId) -> Self {
        Self {
            cells: tokens
                .into_iter()
                .filter(|t| &t.token != mover)
                .map(|t| t.position)
                .collect(),
        }
    }

    pub fn is_occupied(&self, cell: GridPoint) -> bool {
        self.cells.contains(&cell)
    }

    pub fn occupy(&mut self, cell: GridPoint) {
        self.cells.insert(cell);
    }

    pub fn vacate(&mut self, cell: GridPoint) {
        self.cells.remove(&cell);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heading {
    Away,
    Toward,
}

/// Forced movement request
#[derive(Debug, Clone, Copy)]
pub struct ForcedMove {
    pub origin: GridPoint,
    pub mover: GridPoint,
    pub cells: u32,
    pub heading: Heading,
    /// Walk allowance in cells
    pub allowance: u32,
}

/// Unit direction from `from` to `to`, `None` when they coincide
pub fn direction(from: GridPoint, to: GridPoint) -> Option<(f32, f32)> {
    let dx = (to.x - from.x) as f32;
    let dy = (to.y - from.y) as f32;
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return None;
    }
    Some((dx / len, dy / len))
}

/// Destination cell for a forced move.
///
/// Candidates go from `cells` down to 1 along the heading; the first that is free,
/// differs from the start, stays within the allowance and (when pulling) doesn't
/// land on the origin wins.
pub fn resolve_forced_move(request: ForcedMove, occupancy: &Occupancy) -> Result<GridPoint, SpatialFailure> {
    let (dx, dy) = direction(request.origin, request.mover).ok_or(SpatialFailure::NoDirection)?;
    let (dx, dy) = match request.heading {
        Heading::Away => (dx, dy),
        Heading::Toward => (-dx, -dy),
    };

    for step in (1..=request.cells).rev() {
        let candidate = request.mover.offset(
            (dx * step as f32).round() as i32,
            (dy * step as f32).round() as i32,
        );
        if candidate == request.mover {
            continue;
        }
        if request.mover.chebyshev(candidate) > request.allowance {
            continue;
        }
        if request.heading == Heading::Toward && candidate == request.origin {
            continue;
        }
        if occupancy.is_occupied(candidate) {
            continue;
        }
        return Ok(candidate);
    }
    Err(SpatialFailure::NoFreeCell)
}

/// Stable sort by ascending distance from `origin`; ties keep input order
pub fn order_by_distance<T>(items: &mut [T], origin: GridPoint, position: impl Fn(&T) -> GridPoint) {
    items.sort_by(|a, b| {
        position(a)
            .distance_ft(origin)
            .total_cmp(&position(b).distance_ft(origin))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(id: &str, x: i32, y: i32) -> TokenSnapshot {
        TokenSnapshot {
            token: TokenId::from(id),
            character: CharacterId::from(id),
            position: GridPoint::new(x, y),
        }
    }

    fn push(mover: GridPoint, cells: u32) -> ForcedMove {
        ForcedMove {
            origin: GridPoint::new(0, 0),
            mover,
            cells,
            heading: Heading::Away,
            allowance: 6,
        }
    }

    #[test]
    fn test_distance_in_feet() {
        let a = GridPoint::new(0, 0);
        assert_eq!(a.distance_ft(GridPoint::new(2, 0)), 10.0);
        assert!((a.distance_ft(GridPoint::new(1, 1)) - 7.071).abs() < 0.01);
        assert_eq!(a.chebyshev(GridPoint::new(3, -2)), 3);
    }

    #[test]
    fn test_push_straight_line() {
        let dest = resolve_forced_move(push(GridPoint::new(1, 0), 2), &Occupancy::default()).unwrap();
        assert_eq!(dest, GridPoint::new(3, 0));
    }

    #[test]
    fn test_push_falls_back_to_nearer_cell() {
        let tokens = [token("wall", 3, 0)];
        let occ = Occupancy::from_tokens(&tokens, &TokenId::from("mover"));
        let dest = resolve_forced_move(push(GridPoint::new(1, 0), 2), &occ).unwrap();
        assert_eq!(dest, GridPoint::new(2, 0));
    }

    #[test]
    fn test_surrounded_fails() {
        let tokens = [token("a", 2, 0), token("b", 3, 0)];
        let occ = Occupancy::from_tokens(&tokens, &TokenId::from("mover"));
        assert_eq!(
            resolve_forced_move(push(GridPoint::new(1, 0), 2), &occ),
            Err(SpatialFailure::NoFreeCell)
        );
    }

    #[test]
    fn test_allowance_limits_distance() {
        let mut request = push(GridPoint::new(1, 0), 2);
        request.allowance = 1;
        assert_eq!(
            resolve_forced_move(request, &Occupancy::default()),
            Ok(GridPoint::new(2, 0))
        );
        request.allowance = 0;
        assert_eq!(
            resolve_forced_move(request, &Occupancy::default()),
            Err(SpatialFailure::NoFreeCell)
        );
    }

    #[test]
    fn test_pull_never_lands_on_origin() {
        let request = ForcedMove {
            origin: GridPoint::new(0, 0),
            mover: GridPoint::new(1, 0),
            cells: 1,
            heading: Heading::Toward,
            allowance: 6,
        };
        assert_eq!(
            resolve_forced_move(request, &Occupancy::default()),
            Err(SpatialFailure::NoFreeCell)
        );
        let request = ForcedMove {
            mover: GridPoint::new(3, 0),
            ..request
        };
        assert_eq!(resolve_forced_move(request, &Occupancy::default()), Ok(GridPoint::new(2, 0)));
    }

    #[test]
    fn test_no_direction() {
        assert_eq!(
            resolve_forced_move(push(GridPoint::new(0, 0), 2), &Occupancy::default()),
            Err(SpatialFailure::NoDirection)
        );
    }

    #[test]
    fn test_order_by_distance_is_stable() {
        let mut tokens = vec![token("far", 5, 0), token("tie-a", 0, 2), token("near", 1, 0), token("tie-b", 2, 0)];
        order_by_distance(&mut tokens, GridPoint::new(0, 0), |t| t.position);
        let order: Vec<&str> = tokens.iter().map(|t| t.token.as_str()).collect();
        assert_eq!(order, vec!["near", "tie-a", "tie-b", "far"]);
    }
}
