//! Game Logic Module
//!
//! Everything that decides the outcome of a call. Deterministic given the
//! randomness source, the clock and the ledger.
//!
//! ## Module Structure
//!
//! - `state`: Identities, player registry, snapshots
//! - `treasure`: Treasure position and relocation policy
//! - `prize`: Winner share and pool payouts
//! - `ledger`: Currency substrate abstraction
//! - `engine`: Join / move / withdraw orchestration
//! - `events`: Notifications emitted by committed transitions
//! - `error`: Error taxonomy

pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod prize;
pub mod state;
pub mod treasure;

// Re-export key types
pub use engine::{Collaborators, EngineConfig, GameEngine, Payout, TransitionResult};
pub use error::{ErrorKind, GameError, SnapshotError};
pub use events::{GameEvent, GameEventData};
pub use ledger::{Amount, InMemoryLedger, Ledger, LedgerSnapshot, TransferError};
pub use state::{GameSnapshot, GameState, Identity, PlayerRegistry, SavedGame};
pub use treasure::{Relocation, TreasureController};
