//! Randomness Sources
//!
//! Draws board positions from entropy inputs that live in the game state
//! (transition sequence, draw nonce), plus a coarse timestamp and the acting
//! identity.
//!
//! # Security
//!
//! [`InsecurePseudoRandom`] is **not** secure. Anyone who can predict or
//! influence the timestamp, the acting identity or the order of
//! transitions can predict or bias its output. It exists to reproduce the
//! legacy behaviour. Deployments that care about fairness should run with
//! [`VerifiableExternal`], which defers to an oracle.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};
use thiserror::Error;

use super::grid::{adjacent_from_draw, Position, TOTAL_POSITIONS};

/// 32-byte oracle request seed.
pub type RequestSeed = [u8; 32];

/// 32-byte oracle randomness word.
pub type RandomWord = [u8; 32];

/// Inputs mixed into every draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntropyInputs {
    /// Committed transition counter.
    pub sequence: u64,
    /// Coarse unix timestamp (seconds).
    pub timestamp: i64,
    /// Identity of the caller driving the transition.
    pub actor: [u8; 16],
    /// Per-draw nonce, strictly increasing.
    pub nonce: u64,
}

/// Randomness errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RandomnessError {
    /// The oracle has not fulfilled this request yet.
    #[error("randomness request {} not fulfilled", hex::encode(.0))]
    Unfulfilled(RequestSeed),

    /// No outstanding request has this seed.
    #[error("randomness request {} is not outstanding", hex::encode(.0))]
    UnknownRequest(RequestSeed),

    /// The request was already fulfilled with a different word.
    #[error("randomness request {} already fulfilled", hex::encode(.0))]
    AlreadyFulfilled(RequestSeed),

    /// This source does not accept external fulfilments.
    #[error("{0} does not accept fulfilments")]
    FulfilmentUnsupported(&'static str),
}

/// A capability that turns entropy inputs into board positions.
pub trait RandomnessSource: Send {
    /// Draw a position in `0..TOTAL_POSITIONS`.
    fn draw(&mut self, inputs: &EntropyInputs) -> Result<Position, RandomnessError>;

    /// Record an oracle fulfilment.
    fn fulfill(&mut self, request: RequestSeed, word: RandomWord) -> Result<(), RandomnessError> {
        let _ = (request, word);
        Err(RandomnessError::FulfilmentUnsupported(self.name()))
    }

    /// Requests that failed for lack of a fulfilment, oldest first.
    fn pending_requests(&self) -> Vec<RequestSeed> {
        Vec::new()
    }

    /// Forget requests drawn before `committed`, the sequence of the next
    /// transition.
    fn prune(&mut self, committed: u64) {
        let _ = committed;
    }

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Draw a neighbor of `p`: `neighbors(p)[draw() & 3]`.
pub fn draw_adjacent(
    source: &mut dyn RandomnessSource,
    inputs: &EntropyInputs,
    p: Position,
) -> Result<Position, RandomnessError> {
    let value = source.draw(inputs)?;
    Ok(adjacent_from_draw(p, value))
}

/// Which randomness source the engine runs with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomnessMode {
    /// Hash-of-metadata draws (legacy, predictable).
    #[default]
    InsecurePseudoRandom,
    /// Oracle-backed draws.
    VerifiableExternal,
}

impl RandomnessMode {
    /// Build the configured source.
    pub fn build(self) -> Box<dyn RandomnessSource> {
        match self {
            RandomnessMode::InsecurePseudoRandom => Box::new(InsecurePseudoRandom),
            RandomnessMode::VerifiableExternal => Box::new(VerifiableExternal::new()),
        }
    }

    /// Parse from a config string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insecure" | "insecure_pseudo_random" => Some(Self::InsecurePseudoRandom),
            "verifiable" | "verifiable_external" => Some(Self::VerifiableExternal),
            _ => None,
        }
    }
}

/// Legacy hash-of-metadata randomness. See the module docs.
#[derive(Clone, Copy, Debug, Default)]
pub struct InsecurePseudoRandom;

impl RandomnessSource for InsecurePseudoRandom {
    fn draw(&mut self, inputs: &EntropyInputs) -> Result<Position, RandomnessError> {
        let digest = hash_inputs(b"TREASURE_HUNT_DRAW_V1", inputs);
        Ok(reduce_word(&digest))
    }

    fn name(&self) -> &'static str {
        "insecure_pseudo_random"
    }
}

/// Oracle-backed randomness.
///
/// Every draw derives a request seed from the entropy inputs. The oracle
/// fulfils seeds out of band; a draw for an unfulfilled seed fails, the
/// seed is queued in [`pending_requests`](RandomnessSource::pending_requests)
/// and the transition can be retried once the fulfilment lands.
///
/// The request seed leaves out the timestamp, and lookups do not consume
/// fulfilments, so a rolled-back transition retried with the same counters
/// sees the same word. Only queued seeds can be fulfilled. Book entries are
/// tagged with the sequence they were drawn at and dropped once a later
/// transition commits, because no draw can ask for them again.
#[derive(Clone, Debug, Default)]
pub struct VerifiableExternal {
    fulfilled: BTreeMap<RequestSeed, Fulfilment>,
    pending: Vec<PendingRequest>,
}

#[derive(Clone, Copy, Debug)]
struct Fulfilment {
    sequence: u64,
    word: RandomWord,
}

#[derive(Clone, Copy, Debug)]
struct PendingRequest {
    seed: RequestSeed,
    sequence: u64,
}

impl VerifiableExternal {
    /// Create an empty fulfilment book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded fulfilments.
    pub fn fulfilled_count(&self) -> usize {
        self.fulfilled.len()
    }
}

impl RandomnessSource for VerifiableExternal {
    fn draw(&mut self, inputs: &EntropyInputs) -> Result<Position, RandomnessError> {
        let seed = request_seed(inputs);
        match self.fulfilled.get(&seed) {
            Some(fulfilment) => Ok(reduce_word(&fulfilment.word)),
            None => {
                if !self.pending.iter().any(|p| p.seed == seed) {
                    self.pending.push(PendingRequest { seed, sequence: inputs.sequence });
                }
                Err(RandomnessError::Unfulfilled(seed))
            }
        }
    }

    fn fulfill(&mut self, request: RequestSeed, word: RandomWord) -> Result<(), RandomnessError> {
        if let Some(existing) = self.fulfilled.get(&request) {
            if existing.word != word {
                return Err(RandomnessError::AlreadyFulfilled(request));
            }
            return Ok(());
        }
        let index = self
            .pending
            .iter()
            .position(|p| p.seed == request)
            .ok_or(RandomnessError::UnknownRequest(request))?;
        let pending = self.pending.remove(index);
        self.fulfilled.insert(request, Fulfilment { sequence: pending.sequence, word });
        Ok(())
    }

    fn pending_requests(&self) -> Vec<RequestSeed> {
        self.pending.iter().map(|p| p.seed).collect()
    }

    fn prune(&mut self, committed: u64) {
        self.pending.retain(|p| p.sequence >= committed);
        self.fulfilled.retain(|_, f| f.sequence >= committed);
    }

    fn name(&self) -> &'static str {
        "verifiable_external"
    }
}

/// Seed an oracle must fulfil for a draw with these inputs.
///
/// The timestamp is excluded so that a retry after fulfilment asks for the
/// same seed.
pub fn request_seed(inputs: &EntropyInputs) -> RequestSeed {
    let mut hasher = Sha256::new();
    hasher.update(b"TREASURE_HUNT_ORACLE_REQUEST_V1");
    hasher.update(inputs.sequence.to_le_bytes());
    hasher.update(inputs.actor);
    hasher.update(inputs.nonce.to_le_bytes());
    hasher.finalize().into()
}

fn hash_inputs(domain: &[u8], inputs: &EntropyInputs) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(inputs.sequence.to_le_bytes());
    hasher.update(inputs.timestamp.to_le_bytes());
    hasher.update(inputs.actor);
    hasher.update(inputs.nonce.to_le_bytes());
    hasher.finalize().into()
}

/// Reduce a 32-byte word to a board position using its first 8 bytes.
fn reduce_word(word: &[u8; 32]) -> Position {
    let mut head = [0u8; 8];
    head.copy_from_slice(&word[..8]);
    (u64::from_le_bytes(head) % u64::from(TOTAL_POSITIONS)) as Position
}

/// Replays a fixed list of draws, for tests that need exact positions.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ScriptedRandomness {
    values: std::collections::VecDeque<Position>,
}

#[cfg(test)]
impl ScriptedRandomness {
    pub(crate) fn new(values: &[Position]) -> Self {
        Self { values: values.iter().copied().collect() }
    }
}

#[cfg(test)]
impl RandomnessSource for ScriptedRandomness {
    fn draw(&mut self, inputs: &EntropyInputs) -> Result<Position, RandomnessError> {
        self.values
            .pop_front()
            .ok_or_else(|| RandomnessError::Unfulfilled(request_seed(inputs)))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

// =============================================================================
// TESTS
// =============================================================================
