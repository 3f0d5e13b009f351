//! Core deterministic primitives.
//!
//! Nothing here knows about players or currency. The game layer builds on
//! these.

pub mod clock;
pub mod grid;
pub mod hash;
pub mod rng;

// Re-export core types
pub use clock::{Clock, FixedClock, SystemClock};
pub use grid::{Direction, Position, GRID_SIDE, TOTAL_POSITIONS, neighbors, is_valid_move};
pub use hash::{StateHash, compute_state_hash};
pub use rng::{
    EntropyInputs, InsecurePseudoRandom, RandomnessError, RandomnessMode, RandomnessSource,
    VerifiableExternal,
};
