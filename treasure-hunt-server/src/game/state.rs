//! Game State Definitions
//!
//! The single aggregate every transition mutates. Uses BTreeMap for
//! deterministic iteration order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Serialize, Deserialize};

use crate::core::grid::{is_on_board, Position};
use crate::core::hash::{StateHash, StateHasher, compute_state_hash};
use crate::game::error::SnapshotError;
use crate::game::ledger::LedgerSnapshot;
use crate::game::treasure::TreasureController;

// =============================================================================
// IDENTITY
// =============================================================================

/// Caller identity (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub struct Identity(pub [u8; 16]);

impl Identity {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s)
            .ok()
            .map(|u| Self(*u.as_bytes()))
    }

    /// Create from a 32-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// First four bytes, hex encoded, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// =============================================================================
// PLAYER REGISTRY
// =============================================================================

/// Per-identity record.
///
/// `position` is only meaningful while `joined` is true.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Current cell.
    pub position: Position,
    /// Whether the identity is in the current round.
    pub joined: bool,
}

/// Player records plus the ordered list of joined identities.
///
/// The joined list always matches the set of records with `joined = true`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRegistry {
    players: BTreeMap<Identity, Player>,
    joined: Vec<Identity>,
}

impl PlayerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` is in the current round.
    pub fn is_joined(&self, id: &Identity) -> bool {
        self.players.get(id).is_some_and(|p| p.joined)
    }

    /// Position of a joined player.
    pub fn position(&self, id: &Identity) -> Option<Position> {
        self.players
            .get(id)
            .filter(|p| p.joined)
            .map(|p| p.position)
    }

    /// Number of joined players.
    pub fn joined_count(&self) -> usize {
        self.joined.len()
    }

    /// Joined identities in join order.
    pub fn joined(&self) -> &[Identity] {
        &self.joined
    }

    /// Insert a newly joined player. The caller has already checked
    /// membership and capacity.
    pub(crate) fn insert(&mut self, id: Identity, position: Position) {
        debug_assert!(!self.is_joined(&id));
        self.players.insert(id, Player { position, joined: true });
        self.joined.push(id);
    }

    /// Move a joined player. Returns false if `id` is not joined.
    pub(crate) fn set_position(&mut self, id: &Identity, position: Position) -> bool {
        match self.players.get_mut(id) {
            Some(player) if player.joined => {
                player.position = position;
                true
            }
            _ => false,
        }
    }

    /// Drop every joined player and clear the joined list.
    ///
    /// Safe to call repeatedly and with nobody joined. Returns how many
    /// players were removed.
    pub fn reset(&mut self) -> usize {
        let removed = self.joined.len();
        for id in self.joined.drain(..) {
            self.players.remove(&id);
        }
        removed
    }

    /// Hash registry contents in join order.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.joined.len() as u32);
        for id in &self.joined {
            hasher.update_identity(&id.0);
            if let Some(player) = self.players.get(id) {
                hasher.update_u32(player.position);
                hasher.update_bool(player.joined);
            }
        }
    }

    /// Rebuild a registry from a joined list, checking every invariant.
    pub fn from_joined(
        entries: &[(Identity, Position)],
        max_players: usize,
    ) -> Result<Self, SnapshotError> {
        if entries.len() > max_players {
            return Err(SnapshotError::TooManyPlayers {
                count: entries.len(),
                max: max_players,
            });
        }
        let mut seen = BTreeSet::new();
        let mut registry = Self::new();
        for (id, position) in entries {
            if !seen.insert(*id) {
                return Err(SnapshotError::DuplicatePlayer(*id));
            }
            if !is_on_board(*position) {
                return Err(SnapshotError::PositionOutOfRange(*position));
            }
            registry.insert(*id, *position);
        }
        Ok(registry)
    }
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Counters fed into every draw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntropyCounters {
    /// Number of committed transitions.
    pub sequence: u64,
    /// Number of draws taken.
    pub nonce: u64,
}

impl EntropyCounters {
    /// Return the current nonce and advance it.
    pub fn next_nonce(&mut self) -> u64 {
        let nonce = self.nonce;
        self.nonce += 1;
        nonce
    }
}

/// Complete mutable state of the game.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameState {
    /// Players and the joined list.
    pub registry: PlayerRegistry,
    /// Treasure position.
    pub treasure: TreasureController,
    /// Draw inputs owned by the state so rollbacks rewind them.
    pub entropy: EntropyCounters,
    /// Completed rounds (wins and emergency drains).
    pub rounds_completed: u64,
}

impl GameState {
    /// Create a state with the treasure at `treasure`.
    pub fn new(treasure: Position) -> Self {
        Self {
            registry: PlayerRegistry::new(),
            treasure: TreasureController::new(treasure),
            entropy: EntropyCounters::default(),
            rounds_completed: 0,
        }
    }

    /// Compute hash of current state for verification.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.entropy.sequence, |hasher| {
            hasher.update_u64(self.entropy.nonce);
            hasher.update_u64(self.rounds_completed);
            hasher.update_u32(self.treasure.position());
            self.registry.hash_into(hasher);
        })
    }

    /// Export the persisted view of this state.
    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            players: self
                .registry
                .joined()
                .iter()
                .filter_map(|id| self.registry.position(id).map(|p| (*id, p)))
                .collect(),
            treasure_position: self.treasure.position(),
            entropy: self.entropy,
            rounds_completed: self.rounds_completed,
        }
    }

    /// Rebuild state from a snapshot, validating it first.
    pub fn from_snapshot(snapshot: &GameSnapshot, max_players: usize) -> Result<Self, SnapshotError> {
        if !is_on_board(snapshot.treasure_position) {
            return Err(SnapshotError::PositionOutOfRange(snapshot.treasure_position));
        }
        Ok(Self {
            registry: PlayerRegistry::from_joined(&snapshot.players, max_players)?,
            treasure: TreasureController::new(snapshot.treasure_position),
            entropy: snapshot.entropy,
            rounds_completed: snapshot.rounds_completed,
        })
    }
}

/// Persisted form of [`GameState`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    /// Joined players in join order.
    pub players: Vec<(Identity, Position)>,
    /// Treasure position.
    pub treasure_position: Position,
    /// Draw counters.
    pub entropy: EntropyCounters,
    /// Completed rounds.
    pub rounds_completed: u64,
}

impl GameSnapshot {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// What the server writes to disk: the game snapshot plus the balances of
/// an in-process ledger.
///
/// `ledger` is absent when the ledger lives outside the process, or in
/// files written before balances were saved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedGame {
    /// Game state.
    pub game: GameSnapshot,
    /// Ledger balances backing the pool.
    #[serde(default)]
    pub ledger: Option<LedgerSnapshot>,
}

impl SavedGame {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string. A bare [`GameSnapshot`] reads as a
    /// saved game without balances.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s).or_else(|err| match GameSnapshot::from_json(s) {
            Ok(game) => Ok(Self { game, ledger: None }),
            Err(_) => Err(err),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
