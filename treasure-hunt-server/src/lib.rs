//! # Treasure Hunt Server
//!
//! Multiplayer find-the-treasure game on a 10x10 wrapping grid. Players
//! stake into a shared pool, walk the board one cell at a time, and the
//! first to stand on the treasure takes 90% of the pool.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TREASURE HUNT SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── grid.rs     - Toroidal board, neighbors, directions     │
//! │  ├── rng.rs      - Randomness sources (insecure / oracle)    │
//! │  ├── clock.rs    - Timestamp capability                      │
//! │  └── hash.rs     - State hashing for verification            │
//! │                                                              │
//! │  game/           - Game logic                                │
//! │  ├── state.rs    - Identities, registry, snapshots           │
//! │  ├── treasure.rs - Relocation policy                         │
//! │  ├── prize.rs    - Winner share                              │
//! │  ├── ledger.rs   - Currency substrate                        │
//! │  ├── engine.rs   - Transition orchestration                  │
//! │  └── events.rs   - Game events                               │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── session.rs  - Single-writer engine actor                │
//! │  └── auth.rs     - JWT identity                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! Given the same randomness draws, clock readings and call order, the
//! engine produces identical events and state hashes:
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - Entropy counters live in the game state and roll back with it
//! - Time and randomness enter only through capabilities

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::grid::{Direction, Position};
pub use crate::core::rng::{RandomnessMode, RandomnessSource};
pub use game::engine::{Collaborators, EngineConfig, GameEngine};
pub use game::error::GameError;
pub use game::ledger::Amount;
pub use game::state::Identity;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Percentage of the pool paid to the winner.
pub const WINNER_SHARE_PERCENT: u32 = 90;

/// Maximum number of joined players per round.
pub const MAX_PLAYERS: usize = 100;

/// Default minimum stake (0.01 of an 18-decimal currency unit).
pub const DEFAULT_MIN_BET: Amount = 10_000_000_000_000_000;
