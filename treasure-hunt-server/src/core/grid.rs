//! Grid Topology
//!
//! The board is a flat index space of `TOTAL_POSITIONS` cells. Neighbors are
//! computed modulo the whole space rather than per row, so stepping east from
//! the last column lands on the first column of the *next* row. Clients rely
//! on this layout; do not "fix" it into a per-row torus.

use serde::{Serialize, Deserialize};

/// Board position index in `0..TOTAL_POSITIONS`.
pub type Position = u32;

/// Side length of the square grid.
pub const GRID_SIDE: u32 = 10;

/// Number of addressable cells.
pub const TOTAL_POSITIONS: u32 = GRID_SIDE * GRID_SIDE;

/// A single orthogonal step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Direction {
    /// +1
    East = 0,
    /// -1
    West = 1,
    /// +GRID_SIDE
    South = 2,
    /// -GRID_SIDE
    North = 3,
}

impl Direction {
    /// All directions in neighbor order.
    pub const ALL: [Direction; 4] = [
        Direction::East,
        Direction::West,
        Direction::South,
        Direction::North,
    ];

    /// Position reached by stepping from `from` in this direction.
    #[inline]
    pub fn step(self, from: Position) -> Position {
        neighbors(from)[self as usize]
    }
}

/// The four neighbors of `p`: east, west, south, north.
///
/// `p` is reduced modulo `TOTAL_POSITIONS` first, so the result is always a
/// valid position.
#[inline]
pub fn neighbors(p: Position) -> [Position; 4] {
    let p = p % TOTAL_POSITIONS;
    [
        (p + 1) % TOTAL_POSITIONS,
        (p + TOTAL_POSITIONS - 1) % TOTAL_POSITIONS,
        (p + GRID_SIDE) % TOTAL_POSITIONS,
        (p + TOTAL_POSITIONS - GRID_SIDE) % TOTAL_POSITIONS,
    ]
}

/// Whether moving from `from` to `to` is a single legal step.
///
/// Diagonal steps and staying in place are never legal.
#[inline]
pub fn is_valid_move(from: Position, to: Position) -> bool {
    to < TOTAL_POSITIONS && neighbors(from).contains(&to)
}

/// Pick a neighbor of `p` using the low two bits of a draw.
#[inline]
pub fn adjacent_from_draw(p: Position, value: Position) -> Position {
    neighbors(p)[(value & 3) as usize]
}

/// Whether `p` addresses a cell on the board.
#[inline]
pub fn is_on_board(p: Position) -> bool {
    p < TOTAL_POSITIONS
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_neighbors_interior() {
        assert_eq!(neighbors(55), [56, 54, 65, 45]);
    }

    #[test]
    fn test_neighbors_wrap_whole_space() {
        // East of the last column is the first column of the next row.
        assert_eq!(neighbors(9)[0], 10);
        // West of the first column is the last column of the previous row.
        assert_eq!(neighbors(10)[1], 9);
        // Corners wrap through the ends of the index space.
        assert_eq!(neighbors(0), [1, 99, 10, 90]);
        assert_eq!(neighbors(99), [0, 98, 9, 89]);
    }

    #[test]
    fn test_every_position_has_four_distinct_moves() {
        for from in 0..TOTAL_POSITIONS {
            let valid: Vec<_> = (0..TOTAL_POSITIONS)
                .filter(|to| is_valid_move(from, *to))
                .collect();
            assert_eq!(valid.len(), 4, "position {} should have 4 moves", from);
        }
    }

    #[test]
    fn test_no_stay_or_diagonal() {
        assert!(!is_valid_move(55, 55));
        assert!(!is_valid_move(55, 66));
        assert!(!is_valid_move(55, 44));
    }

    #[test]
    fn test_off_board_target_rejected() {
        assert!(!is_valid_move(99, 100));
        assert!(!is_valid_move(0, u32::MAX));
    }

    #[test]
    fn test_direction_step_matches_neighbors() {
        for p in 0..TOTAL_POSITIONS {
            let n = neighbors(p);
            for (i, dir) in Direction::ALL.iter().enumerate() {
                assert_eq!(dir.step(p), n[i]);
            }
        }
    }

    #[test]
    fn test_adjacent_from_draw_uses_low_bits() {
        assert_eq!(adjacent_from_draw(50, 0), 51);
        assert_eq!(adjacent_from_draw(50, 1), 49);
        assert_eq!(adjacent_from_draw(50, 2), 60);
        assert_eq!(adjacent_from_draw(50, 3), 40);
        assert_eq!(adjacent_from_draw(50, 98), 60);
    }

    proptest! {
        #[test]
        fn prop_move_validity_symmetric(from in 0u32..TOTAL_POSITIONS, to in 0u32..TOTAL_POSITIONS) {
            prop_assert_eq!(is_valid_move(from, to), is_valid_move(to, from));
        }

        #[test]
        fn prop_neighbors_on_board(p in any::<u32>()) {
            for n in neighbors(p) {
                prop_assert!(is_on_board(n));
            }
        }
    }
}
