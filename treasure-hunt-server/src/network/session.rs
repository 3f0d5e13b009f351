//! Engine Session
//!
//! A single-writer actor that owns the [`GameEngine`]. Every connection
//! talks to it through a cloneable [`EngineHandle`]; requests are applied
//! one at a time in arrival order, which gives every transition a total
//! order without locking the engine.
//!
//! Committed events are fanned out on a broadcast channel. When a snapshot
//! path is configured, the actor persists the game state and the ledger
//! balances after every committed transition and every credit.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::core::grid::{Direction, Position};
use crate::core::rng::{RandomWord, RequestSeed};
use crate::game::engine::{GameEngine, TransitionResult};
use crate::game::error::GameError;
use crate::game::events::GameEvent;
use crate::game::ledger::Amount;
use crate::game::state::{GameSnapshot, Identity, SavedGame};

/// Events of one committed transition.
pub type EventBatch = Arc<Vec<GameEvent>>;

type Reply<T> = oneshot::Sender<T>;

/// Actor tuning.
#[derive(Debug, Clone)]
pub struct ActorConfig {
    /// Pending request capacity.
    pub queue_capacity: usize,
    /// Broadcast buffer per subscriber.
    pub event_capacity: usize,
    /// Where to persist snapshots, if anywhere.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            event_capacity: 256,
            snapshot_path: None,
        }
    }
}

/// Player status as seen by the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerView {
    /// In the current round.
    pub joined: bool,
    /// Cell while joined.
    pub position: Option<Position>,
    /// Ledger balance outside the pool.
    pub balance: Amount,
}

/// Requests handled by the actor.
#[derive(Debug)]
pub enum EngineRequest {
    /// Join with a stake.
    Join {
        /// Joining identity.
        caller: Identity,
        /// Amount moved into the pool.
        stake: Amount,
        /// Outcome.
        reply: Reply<Result<TransitionResult, GameError>>,
    },
    /// Move to a target cell.
    Move {
        /// Moving identity.
        caller: Identity,
        /// Neighboring cell.
        target: Position,
        /// Outcome.
        reply: Reply<Result<TransitionResult, GameError>>,
    },
    /// Move one cell in a direction.
    Step {
        /// Moving identity.
        caller: Identity,
        /// Direction of travel.
        direction: Direction,
        /// Outcome.
        reply: Reply<Result<TransitionResult, GameError>>,
    },
    /// Owner drains the pool.
    EmergencyWithdraw {
        /// Must be the owner.
        caller: Identity,
        /// Outcome.
        reply: Reply<Result<TransitionResult, GameError>>,
    },
    /// Oracle supplies a random word.
    FulfillRandomness {
        /// Must be the oracle.
        caller: Identity,
        /// Outstanding request seed.
        request: RequestSeed,
        /// Random word for the request.
        word: RandomWord,
        /// Outcome.
        reply: Reply<Result<(), GameError>>,
    },
    /// Owner credits an account.
    Fund {
        /// Must be the owner.
        caller: Identity,
        /// Account to credit.
        account: Identity,
        /// Amount added.
        amount: Amount,
        /// New balance of the account.
        reply: Reply<Result<Amount, GameError>>,
    },
    /// Treasure cell.
    Treasure {
        /// Current treasure cell.
        reply: Reply<Position>,
    },
    /// Status of one player.
    Player {
        /// Identity to look up.
        identity: Identity,
        /// Status of the identity.
        reply: Reply<PlayerView>,
    },
    /// Outstanding oracle requests.
    PendingRandomness {
        /// Seeds, oldest first.
        reply: Reply<Vec<RequestSeed>>,
    },
    /// Persistable state.
    Snapshot {
        /// Game state.
        reply: Reply<GameSnapshot>,
    },
}

/// Actor errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActorError {
    /// The actor has stopped.
    #[error("engine actor is not running")]
    Closed,

    /// The engine rejected the request.
    #[error(transparent)]
    Game(#[from] GameError),
}

// =============================================================================
// ACTOR
// =============================================================================

/// Owns the engine and applies requests in order.
pub struct EngineActor {
    engine: GameEngine,
    requests: mpsc::Receiver<EngineRequest>,
    events: broadcast::Sender<EventBatch>,
    snapshot_path: Option<PathBuf>,
}

impl EngineActor {
    /// Create an actor and its handle without starting it.
    pub fn new(engine: GameEngine, config: ActorConfig) -> (Self, EngineHandle) {
        let (request_tx, request_rx) = mpsc::channel(config.queue_capacity);
        let (event_tx, _) = broadcast::channel(config.event_capacity);

        let handle = EngineHandle {
            requests: request_tx,
            events: event_tx.clone(),
        };
        let actor = Self {
            engine,
            requests: request_rx,
            events: event_tx,
            snapshot_path: config.snapshot_path,
        };
        (actor, handle)
    }

    /// Create an actor and run it on the tokio runtime.
    pub fn spawn(engine: GameEngine, config: ActorConfig) -> (EngineHandle, JoinHandle<()>) {
        let (actor, handle) = Self::new(engine, config);
        let task = tokio::spawn(actor.run());
        (handle, task)
    }

    /// Process requests until every handle is dropped.
    #[instrument(skip(self), name = "engine_actor")]
    pub async fn run(mut self) {
        info!(
            "Engine actor started: treasure at {}, {} players joined",
            self.engine.current_treasure_position(),
            self.engine.joined_players().len()
        );

        while let Some(request) = self.requests.recv().await {
            self.handle(request).await;
        }

        info!("Engine actor stopped at sequence {}", self.engine.sequence());
    }

    async fn handle(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::Join { caller, stake, reply } => {
                let result = self.engine.join(caller, stake);
                self.commit(result, reply).await;
            }
            EngineRequest::Move { caller, target, reply } => {
                let result = self.engine.make_move(caller, target);
                self.commit(result, reply).await;
            }
            EngineRequest::Step { caller, direction, reply } => {
                let result = self.engine.step(caller, direction);
                self.commit(result, reply).await;
            }
            EngineRequest::EmergencyWithdraw { caller, reply } => {
                let result = self.engine.emergency_withdraw(caller);
                self.commit(result, reply).await;
            }
            EngineRequest::FulfillRandomness { caller, request, word, reply } => {
                let _ = reply.send(self.engine.fulfill_randomness(caller, request, word));
            }
            EngineRequest::Fund { caller, account, amount, reply } => {
                let result = self.engine.fund(caller, account, amount);
                if result.is_ok() {
                    self.persist().await;
                }
                let _ = reply.send(result);
            }
            EngineRequest::Treasure { reply } => {
                let _ = reply.send(self.engine.current_treasure_position());
            }
            EngineRequest::Player { identity, reply } => {
                let view = PlayerView {
                    joined: self.engine.player_joined(&identity),
                    position: self.engine.player_position(&identity).ok(),
                    balance: self.engine.ledger().balance_of(&identity),
                };
                let _ = reply.send(view);
            }
            EngineRequest::PendingRandomness { reply } => {
                let _ = reply.send(self.engine.pending_randomness());
            }
            EngineRequest::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot());
            }
        }
    }

    /// Publish a committed transition, then answer the caller.
    async fn commit(
        &mut self,
        result: Result<TransitionResult, GameError>,
        reply: Reply<Result<TransitionResult, GameError>>,
    ) {
        if let Ok(transition) = &result {
            if !transition.events.is_empty() {
                // No subscribers is not an error.
                let _ = self.events.send(Arc::new(transition.events.clone()));
            }
            self.persist().await;
        }
        if reply.send(result).is_err() {
            debug!("Caller went away before the reply");
        }
    }

    async fn persist(&mut self) {
        let Some(path) = self.snapshot_path.clone() else {
            return;
        };
        let saved = self.engine.saved();
        if let Err(e) = write_snapshot(&path, &saved).await {
            error!("Failed to persist snapshot to {}: {}", path.display(), e);
        }
    }
}

/// Write `saved` as JSON via a temporary file and rename.
pub async fn write_snapshot(path: &std::path::Path, saved: &SavedGame) -> std::io::Result<()> {
    let json = saved.to_json().map_err(std::io::Error::other)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Read a saved game, if the file exists.
pub async fn read_snapshot(path: &std::path::Path) -> std::io::Result<Option<SavedGame>> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => SavedGame::from_json(&json)
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable client of the engine actor.
#[derive(Clone)]
pub struct EngineHandle {
    requests: mpsc::Sender<EngineRequest>,
    events: broadcast::Sender<EventBatch>,
}

impl EngineHandle {
    /// Receive every committed event batch from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventBatch> {
        self.events.subscribe()
    }

    /// Join with `stake`.
    pub async fn join(&self, caller: Identity, stake: Amount) -> Result<TransitionResult, ActorError> {
        Ok(self.call(|reply| EngineRequest::Join { caller, stake, reply }).await??)
    }

    /// Move to `target`.
    pub async fn make_move(&self, caller: Identity, target: Position) -> Result<TransitionResult, ActorError> {
        Ok(self.call(|reply| EngineRequest::Move { caller, target, reply }).await??)
    }

    /// Move one cell in `direction`.
    pub async fn step(&self, caller: Identity, direction: Direction) -> Result<TransitionResult, ActorError> {
        Ok(self.call(|reply| EngineRequest::Step { caller, direction, reply }).await??)
    }

    /// Owner-only pool drain.
    pub async fn emergency_withdraw(&self, caller: Identity) -> Result<TransitionResult, ActorError> {
        Ok(self.call(|reply| EngineRequest::EmergencyWithdraw { caller, reply }).await??)
    }

    /// Oracle-only fulfilment.
    pub async fn fulfill_randomness(
        &self,
        caller: Identity,
        request: RequestSeed,
        word: RandomWord,
    ) -> Result<(), ActorError> {
        Ok(self
            .call(|reply| EngineRequest::FulfillRandomness { caller, request, word, reply })
            .await??)
    }

    /// Owner-only credit. Returns the new balance.
    pub async fn fund(&self, caller: Identity, account: Identity, amount: Amount) -> Result<Amount, ActorError> {
        Ok(self
            .call(|reply| EngineRequest::Fund { caller, account, amount, reply })
            .await??)
    }

    /// Current treasure cell.
    pub async fn treasure_position(&self) -> Result<Position, ActorError> {
        self.call(|reply| EngineRequest::Treasure { reply }).await
    }

    /// Status of `identity`.
    pub async fn player(&self, identity: Identity) -> Result<PlayerView, ActorError> {
        self.call(|reply| EngineRequest::Player { identity, reply }).await
    }

    /// Outstanding oracle requests.
    pub async fn pending_randomness(&self) -> Result<Vec<RequestSeed>, ActorError> {
        self.call(|reply| EngineRequest::PendingRandomness { reply }).await
    }

    /// Current persistable state.
    pub async fn snapshot(&self) -> Result<GameSnapshot, ActorError> {
        self.call(|reply| EngineRequest::Snapshot { reply }).await
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> EngineRequest) -> Result<T, ActorError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(build(tx))
            .await
            .map_err(|_| ActorError::Closed)?;
        rx.await.map_err(|_| ActorError::Closed)
    }
}
