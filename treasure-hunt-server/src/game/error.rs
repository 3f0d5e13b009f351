//! Game errors.
//!
//! Every error leaves the game state exactly as it was before the call.

use thiserror::Error;

use crate::core::grid::Position;
use crate::core::rng::RandomnessError;
use crate::game::ledger::{Amount, TransferError};
use crate::game::state::Identity;

/// Broad error classes, for routing and client-facing codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input.
    Validation,
    /// Precondition on current state not met.
    StateConflict,
    /// Caller lacks the required role.
    Authorization,
    /// Outbound payment could not be delivered.
    TransferFailure,
    /// No randomness available for the draw.
    Randomness,
}

/// Errors returned by engine transitions and queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// Stake below the configured minimum.
    #[error("insufficient bet: staked {stake}, minimum is {min_bet}")]
    InsufficientBet {
        /// Amount offered.
        stake: Amount,
        /// Configured minimum.
        min_bet: Amount,
    },

    /// Target is not one of the four neighbors of the current cell.
    #[error("invalid move from {from} to {to}")]
    InvalidMove {
        /// Current cell.
        from: Position,
        /// Requested cell.
        to: Position,
    },

    /// Identity already in the current round.
    #[error("player {0} already joined")]
    PlayerAlreadyJoined(Identity),

    /// Identity not in the current round.
    #[error("player {0} has not joined")]
    PlayerNotJoined(Identity),

    /// Joined set is full.
    #[error("maximum of {0} players reached")]
    MaxPlayersReached(usize),

    /// Caller is not allowed to perform this operation.
    #[error("caller {0} is not authorized")]
    Unauthorized(Identity),

    /// Payout failed; the whole transition was rolled back.
    #[error("transfer failed: {0}")]
    TransferFailed(#[from] TransferError),

    /// Randomness could not be drawn; the transition was rolled back.
    #[error("randomness unavailable: {0}")]
    RandomnessUnavailable(#[from] RandomnessError),
}

impl GameError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GameError::InsufficientBet { .. } | GameError::InvalidMove { .. } => {
                ErrorKind::Validation
            }
            GameError::PlayerAlreadyJoined(_)
            | GameError::PlayerNotJoined(_)
            | GameError::MaxPlayersReached(_) => ErrorKind::StateConflict,
            GameError::Unauthorized(_) => ErrorKind::Authorization,
            GameError::TransferFailed(_) => ErrorKind::TransferFailure,
            GameError::RandomnessUnavailable(_) => ErrorKind::Randomness,
        }
    }
}

/// Errors restoring a persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// An identity appears twice in the joined list.
    #[error("duplicate player {0} in snapshot")]
    DuplicatePlayer(Identity),

    /// A position is outside the board.
    #[error("position {0} is off the board")]
    PositionOutOfRange(Position),

    /// More joined players than the engine allows.
    #[error("snapshot has {count} players, maximum is {max}")]
    TooManyPlayers {
        /// Players in the snapshot.
        count: usize,
        /// Configured maximum.
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let id = Identity::new([1; 16]);
        assert_eq!(
            GameError::InsufficientBet { stake: 1, min_bet: 2 }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(GameError::InvalidMove { from: 0, to: 55 }.kind(), ErrorKind::Validation);
        assert_eq!(GameError::PlayerAlreadyJoined(id).kind(), ErrorKind::StateConflict);
        assert_eq!(GameError::PlayerNotJoined(id).kind(), ErrorKind::StateConflict);
        assert_eq!(GameError::MaxPlayersReached(100).kind(), ErrorKind::StateConflict);
        assert_eq!(GameError::Unauthorized(id).kind(), ErrorKind::Authorization);
        assert_eq!(
            GameError::from(TransferError::Rejected(id)).kind(),
            ErrorKind::TransferFailure
        );
        assert_eq!(
            GameError::from(RandomnessError::Unfulfilled([0; 32])).kind(),
            ErrorKind::Randomness
        );
    }
}
