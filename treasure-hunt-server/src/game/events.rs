//! Game Events
//!
//! Notifications emitted by committed transitions. Events from a
//! transition that fails are discarded along with its state changes.

use serde::{Serialize, Deserialize};

use crate::core::grid::Position;
use crate::game::ledger::Amount;
use crate::game::state::Identity;

/// Game event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Identity joined the round at `position`.
    PlayerJoined {
        /// Joining player.
        identity: Identity,
        /// Drawn starting cell.
        position: Position,
    },

    /// Identity moved to `position`.
    PlayerMoved {
        /// Moving player.
        identity: Identity,
        /// Cell moved to.
        position: Position,
    },

    /// Treasure relocated to `position`.
    TreasureMoved {
        /// New treasure cell.
        position: Position,
    },

    /// Identity found the treasure and was paid `prize`.
    GameWon {
        /// Winner.
        identity: Identity,
        /// Amount paid out of the pool.
        prize: Amount,
    },

    /// Owner drained the pool.
    EmergencyWithdrawal {
        /// Owner who received the pool.
        owner: Identity,
        /// Amount drained.
        amount: Amount,
    },
}

/// A game event tagged with the transition that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Sequence number of the committing transition.
    pub sequence: u64,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(sequence: u64, data: GameEventData) -> Self {
        Self { sequence, data }
    }

    /// Create player joined event.
    pub fn player_joined(sequence: u64, identity: Identity, position: Position) -> Self {
        Self::new(sequence, GameEventData::PlayerJoined { identity, position })
    }

    /// Create player moved event.
    pub fn player_moved(sequence: u64, identity: Identity, position: Position) -> Self {
        Self::new(sequence, GameEventData::PlayerMoved { identity, position })
    }

    /// Create treasure moved event.
    pub fn treasure_moved(sequence: u64, position: Position) -> Self {
        Self::new(sequence, GameEventData::TreasureMoved { position })
    }

    /// Create game won event.
    pub fn game_won(sequence: u64, identity: Identity, prize: Amount) -> Self {
        Self::new(sequence, GameEventData::GameWon { identity, prize })
    }

    /// Create emergency withdrawal event.
    pub fn emergency_withdrawal(sequence: u64, owner: Identity, amount: Amount) -> Self {
        Self::new(sequence, GameEventData::EmergencyWithdrawal { owner, amount })
    }

    /// Identity the event is about, if any.
    pub fn identity(&self) -> Option<Identity> {
        match &self.data {
            GameEventData::PlayerJoined { identity, .. }
            | GameEventData::PlayerMoved { identity, .. }
            | GameEventData::GameWon { identity, .. } => Some(*identity),
            GameEventData::EmergencyWithdrawal { owner, .. } => Some(*owner),
            GameEventData::TreasureMoved { .. } => None,
        }
    }
}
