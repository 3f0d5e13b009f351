//! Treasure relocation.
//!
//! After every move the landing cell decides what the treasure does, first
//! match wins:
//!
//! 1. multiple of 5: hop to a random neighbor of the current treasure cell
//! 2. prime: jump to a random cell anywhere
//! 3. otherwise: stay

use serde::{Serialize, Deserialize};

use crate::core::grid::{adjacent_from_draw, Position};

/// What the treasure does after a player lands on a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relocation {
    /// Hop to a neighbor of the current treasure cell.
    Adjacent,
    /// Jump to any cell.
    Anywhere,
    /// Stay put.
    Stay,
}

/// Relocation rule for a landing cell.
#[inline]
pub fn relocation_rule(landed: Position) -> Relocation {
    if landed % 5 == 0 {
        Relocation::Adjacent
    } else if is_prime(landed) {
        Relocation::Anywhere
    } else {
        Relocation::Stay
    }
}

/// Primality by 6k±1 trial division.
pub fn is_prime(n: Position) -> bool {
    if n < 2 {
        return false;
    }
    if n < 4 {
        return true;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    let n = u64::from(n);
    let mut k = 5u64;
    while k * k <= n {
        if n % k == 0 || n % (k + 2) == 0 {
            return false;
        }
        k += 6;
    }
    true
}

/// Owns the treasure position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasureController {
    position: Position,
}

impl TreasureController {
    /// Place the treasure at `position`.
    pub fn new(position: Position) -> Self {
        Self { position }
    }

    /// Current treasure cell.
    #[inline]
    pub fn position(&self) -> Position {
        self.position
    }

    /// Move the treasure. Returns the new cell only if it changed.
    pub fn move_to(&mut self, position: Position) -> Option<Position> {
        if position == self.position {
            return None;
        }
        self.position = position;
        Some(position)
    }

    /// Place the treasure for a new round. Never reported as a move.
    pub fn reseed(&mut self, position: Position) {
        self.position = position;
    }

    /// Apply the relocation policy for a player landing on `landed`.
    ///
    /// `draw` is called at most once, and only when the rule needs
    /// randomness. Returns the new cell if the treasure moved.
    pub fn relocate<F, E>(&mut self, landed: Position, mut draw: F) -> Result<Option<Position>, E>
    where
        F: FnMut() -> Result<Position, E>,
    {
        let next = match relocation_rule(landed) {
            Relocation::Adjacent => adjacent_from_draw(self.position, draw()?),
            Relocation::Anywhere => draw()?,
            Relocation::Stay => return Ok(None),
        };
        Ok(self.move_to(next))
    }
}
