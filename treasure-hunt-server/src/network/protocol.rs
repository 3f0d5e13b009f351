//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket. Messages
//! are JSON objects tagged by `"type"`. Identities and 32-byte words travel
//! as hex strings; currency amounts travel as decimal strings so clients
//! without 128-bit integers keep full precision.

use serde::{Serialize, Deserialize};

use crate::core::grid::{Direction, Position};
use crate::core::rng::{RandomWord, RequestSeed};
use crate::game::error::{ErrorKind, GameError};
use crate::game::events::{GameEvent, GameEventData};
use crate::game::ledger::Amount;
use crate::game::state::Identity;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with a provider-issued JWT. Must be the first message.
    Auth(AuthRequest),

    /// Join the current round.
    Join {
        /// Stake, decimal string.
        #[serde(with = "amount_string")]
        stake: Amount,
    },

    /// Move to a neighboring cell.
    Move {
        /// Target cell.
        target: Position,
    },

    /// Move one cell in a direction.
    Step {
        /// Direction of travel.
        direction: Direction,
    },

    /// Owner-only pool drain.
    EmergencyWithdraw,

    /// Oracle-only randomness fulfilment.
    FulfillRandomness {
        /// Request seed, 64 hex chars.
        request: String,
        /// Random word, 64 hex chars.
        word: String,
    },

    /// Owner-only account credit.
    Fund {
        /// Account to credit, hex or UUID.
        account: String,
        /// Amount added, decimal string.
        #[serde(with = "amount_string")]
        amount: Amount,
    },

    /// Ask for the treasure position.
    QueryTreasure,

    /// Ask for a player's status.
    QueryPlayer {
        /// Identity as hex or UUID.
        identity: String,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// JWT from the auth provider.
    pub token: String,
    /// Client version for compatibility checks.
    #[serde(default)]
    pub client_version: String,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Events from one committed transition.
    Events {
        /// Events in emission order.
        events: Vec<EventNotice>,
    },

    /// Treasure position.
    Treasure {
        /// Current treasure cell.
        position: Position,
    },

    /// Player status.
    Player(PlayerStatus),

    /// Randomness fulfilment accepted.
    Fulfilled {
        /// Request seed (hex).
        request: String,
    },

    /// Account credited.
    Funded {
        /// Credited account (hex).
        account: String,
        /// New balance, decimal string.
        #[serde(with = "amount_string")]
        balance: Amount,
    },

    /// Pong response.
    Pong {
        /// Client timestamp from the ping.
        timestamp: u64,
        /// Server time in unix milliseconds.
        server_time: i64,
    },

    /// Request rejected.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why the connection is closing.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Caller's game identity (hex) on success.
    pub identity: Option<String>,
    /// Failure reason.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Player status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatus {
    /// Identity (hex).
    pub identity: String,
    /// Whether the player is in the current round.
    pub joined: bool,
    /// Current cell while joined.
    pub position: Option<Position>,
    /// Ledger balance outside the pool, decimal string.
    #[serde(with = "amount_string")]
    pub balance: Amount,
}

/// A game event as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventNotice {
    /// A player joined.
    PlayerJoined {
        /// Committing transition.
        sequence: u64,
        /// Player (hex).
        identity: String,
        /// Starting cell.
        position: Position,
    },
    /// A player moved.
    PlayerMoved {
        /// Committing transition.
        sequence: u64,
        /// Player (hex).
        identity: String,
        /// New cell.
        position: Position,
    },
    /// The treasure relocated.
    TreasureMoved {
        /// Committing transition.
        sequence: u64,
        /// New treasure cell.
        position: Position,
    },
    /// A player found the treasure.
    GameWon {
        /// Committing transition.
        sequence: u64,
        /// Winner (hex).
        identity: String,
        /// Prize paid, decimal string.
        #[serde(with = "amount_string")]
        prize: Amount,
    },
    /// The owner drained the pool.
    EmergencyWithdrawal {
        /// Committing transition.
        sequence: u64,
        /// Owner (hex).
        owner: String,
        /// Amount drained, decimal string.
        #[serde(with = "amount_string")]
        amount: Amount,
    },
}

impl From<&GameEvent> for EventNotice {
    fn from(event: &GameEvent) -> Self {
        let sequence = event.sequence;
        match &event.data {
            GameEventData::PlayerJoined { identity, position } => EventNotice::PlayerJoined {
                sequence,
                identity: identity.to_string(),
                position: *position,
            },
            GameEventData::PlayerMoved { identity, position } => EventNotice::PlayerMoved {
                sequence,
                identity: identity.to_string(),
                position: *position,
            },
            GameEventData::TreasureMoved { position } => EventNotice::TreasureMoved {
                sequence,
                position: *position,
            },
            GameEventData::GameWon { identity, prize } => EventNotice::GameWon {
                sequence,
                identity: identity.to_string(),
                prize: *prize,
            },
            GameEventData::EmergencyWithdrawal { owner, amount } => EventNotice::EmergencyWithdrawal {
                sequence,
                owner: owner.to_string(),
                amount: *amount,
            },
        }
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Create an error with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl From<&GameError> for ServerError {
    fn from(err: &GameError) -> Self {
        Self::new(err.kind().into(), err.to_string())
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Not authenticated.
    NotAuthenticated,
    /// Malformed message or argument.
    InvalidInput,
    /// Rejected by game rules (stake, move).
    Validation,
    /// Conflicts with the current round (joined, full).
    StateConflict,
    /// Caller lacks the required role.
    Unauthorized,
    /// Payout could not be delivered.
    TransferFailed,
    /// Randomness not yet available; retry after fulfilment.
    RandomnessUnavailable,
    /// Internal error.
    InternalError,
}

impl From<ErrorKind> for ErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation => ErrorCode::Validation,
            ErrorKind::StateConflict => ErrorCode::StateConflict,
            ErrorKind::Authorization => ErrorCode::Unauthorized,
            ErrorKind::TransferFailure => ErrorCode::TransferFailed,
            ErrorKind::Randomness => ErrorCode::RandomnessUnavailable,
        }
    }
}

// =============================================================================
// PARSING HELPERS
// =============================================================================

/// Parse an identity given as 32 hex chars or a UUID.
pub fn parse_identity(s: &str) -> Option<Identity> {
    Identity::from_hex(s).or_else(|| Identity::from_uuid_str(s))
}

/// Parse a 32-byte hex word (request seed or random word).
pub fn parse_word(s: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(s.trim_start_matches("0x")).ok()?;
    bytes.try_into().ok()
}

/// Parse the request and word of a fulfilment message.
pub fn parse_fulfilment(request: &str, word: &str) -> Option<(RequestSeed, RandomWord)> {
    Some((parse_word(request)?, parse_word(word)?))
}

mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::game::ledger::Amount;

    pub fn serialize<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(amount)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Error message from a code and text.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError::new(code, message))
    }

    /// Event batch from committed game events.
    pub fn events(events: &[GameEvent]) -> Self {
        ServerMessage::Events {
            events: events.iter().map(EventNotice::from).collect(),
        }
    }
}
