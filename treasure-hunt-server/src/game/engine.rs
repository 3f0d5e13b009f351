//! Game Engine
//!
//! Orchestrates join, move and emergency withdrawal over one owned
//! [`GameState`].
//!
//! ## Transition rules
//!
//! - Every mutating operation is all-or-nothing: the state is checkpointed
//!   first and restored on any error, so a failed call leaves no trace
//!   (including the entropy counters).
//! - Ledger calls come last in every transition. Internal state is final
//!   before currency leaves the pool.
//! - On a move the treasure relocates *before* the win check, so a player
//!   can win because the treasure jumped onto them, or miss because it
//!   jumped away.
//! - Each commit lets the randomness source forget requests drawn at the
//!   previous sequence.

use tracing::{debug, info, warn};

use crate::core::clock::{Clock, SystemClock};
use crate::core::grid::{is_valid_move, Direction, Position};
use crate::core::hash::StateHash;
use crate::core::rng::{
    EntropyInputs, RandomWord, RandomnessMode, RandomnessSource, RequestSeed,
};
use crate::game::error::{GameError, SnapshotError};
use crate::game::events::GameEvent;
use crate::game::ledger::{Amount, InMemoryLedger, Ledger};
use crate::game::prize::{drain, pay_winner};
use crate::game::state::{EntropyCounters, GameSnapshot, GameState, Identity, SavedGame};
use crate::{DEFAULT_MIN_BET, MAX_PLAYERS};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Smallest accepted stake.
    pub min_bet: Amount,
    /// Capacity of the joined set.
    pub max_players: usize,
    /// Identity allowed to drain the pool.
    pub owner: Identity,
    /// Identity allowed to fulfil randomness requests.
    pub oracle: Option<Identity>,
    /// Randomness source to build.
    pub randomness: RandomnessMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_bet: DEFAULT_MIN_BET,
            max_players: MAX_PLAYERS,
            owner: Identity::default(),
            oracle: None,
            randomness: RandomnessMode::default(),
        }
    }
}

/// External collaborators the engine settles against.
pub struct Collaborators {
    /// Draw source.
    pub randomness: Box<dyn RandomnessSource>,
    /// Currency substrate.
    pub ledger: Box<dyn Ledger>,
    /// Timestamp source.
    pub clock: Box<dyn Clock>,
}

impl Collaborators {
    /// Bundle collaborators.
    pub fn new(
        randomness: Box<dyn RandomnessSource>,
        ledger: Box<dyn Ledger>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self { randomness, ledger, clock }
    }

    /// Configured randomness, an in-memory ledger and the wall clock.
    pub fn in_memory(config: &EngineConfig) -> Self {
        Self::new(
            config.randomness.build(),
            Box::new(InMemoryLedger::new()),
            Box::new(SystemClock),
        )
    }
}

/// Currency paid out by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payout {
    /// Recipient.
    pub recipient: Identity,
    /// Amount transferred.
    pub amount: Amount,
}

/// Result of a committed transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionResult {
    /// Events in emission order.
    pub events: Vec<GameEvent>,
    /// Outbound payment, if any.
    pub payout: Option<Payout>,
}

/// The game engine.
pub struct GameEngine {
    config: EngineConfig,
    state: GameState,
    randomness: Box<dyn RandomnessSource>,
    ledger: Box<dyn Ledger>,
    clock: Box<dyn Clock>,
}

impl GameEngine {
    /// Create an engine and draw the first treasure position.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self, GameError> {
        let mut engine = Self::with_treasure(config, collaborators, 0);
        let owner = engine.config.owner;
        let position = engine.draw(&owner)?;
        engine.state.treasure.reseed(position);
        info!(
            "Engine ready: treasure at {}, randomness {}",
            position,
            engine.randomness.name()
        );
        Ok(engine)
    }

    /// Create an engine with the treasure at a known position.
    pub fn with_treasure(config: EngineConfig, collaborators: Collaborators, treasure: Position) -> Self {
        Self {
            config,
            state: GameState::new(treasure),
            randomness: collaborators.randomness,
            ledger: collaborators.ledger,
            clock: collaborators.clock,
        }
    }

    /// Restore an engine from a persisted snapshot.
    pub fn from_snapshot(
        config: EngineConfig,
        collaborators: Collaborators,
        snapshot: &GameSnapshot,
    ) -> Result<Self, SnapshotError> {
        let state = GameState::from_snapshot(snapshot, config.max_players)?;
        info!(
            "Restored snapshot: {} players, treasure at {}, sequence {}",
            state.registry.joined_count(),
            state.treasure.position(),
            state.entropy.sequence
        );
        Ok(Self {
            config,
            state,
            randomness: collaborators.randomness,
            ledger: collaborators.ledger,
            clock: collaborators.clock,
        })
    }

    /// Restore an engine and its in-memory ledger from a saved game.
    ///
    /// Without saved balances nothing backs the stakes of the joined
    /// players, so the round restarts empty.
    pub fn from_saved(
        config: EngineConfig,
        randomness: Box<dyn RandomnessSource>,
        clock: Box<dyn Clock>,
        saved: &SavedGame,
    ) -> Result<Self, SnapshotError> {
        let (ledger, snapshot) = match &saved.ledger {
            Some(ledger) => (InMemoryLedger::from_snapshot(ledger), saved.game.clone()),
            None => {
                warn!(
                    "Saved game carries no ledger balances, dropping {} joined players",
                    saved.game.players.len()
                );
                let game = GameSnapshot { players: Vec::new(), ..saved.game.clone() };
                (InMemoryLedger::new(), game)
            }
        };
        let collaborators = Collaborators::new(randomness, Box::new(ledger), clock);
        Self::from_snapshot(config, collaborators, &snapshot)
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    /// Join the current round with `stake`.
    pub fn join(&mut self, caller: Identity, stake: Amount) -> Result<TransitionResult, GameError> {
        self.atomically(|engine, result| {
            if stake < engine.config.min_bet {
                return Err(GameError::InsufficientBet {
                    stake,
                    min_bet: engine.config.min_bet,
                });
            }
            if engine.state.registry.is_joined(&caller) {
                return Err(GameError::PlayerAlreadyJoined(caller));
            }
            if engine.state.registry.joined_count() >= engine.config.max_players {
                return Err(GameError::MaxPlayersReached(engine.config.max_players));
            }

            let position = engine.draw(&caller)?;
            engine.state.registry.insert(caller, position);
            engine.ledger.deposit(&caller, stake)?;

            info!("Player {} joined at {} with stake {}", caller.short(), position, stake);
            result.events.push(GameEvent::player_joined(engine.sequence(), caller, position));
            Ok(())
        })
    }

    /// Step to `target`, a neighbor of the caller's current cell.
    pub fn make_move(&mut self, caller: Identity, target: Position) -> Result<TransitionResult, GameError> {
        self.atomically(|engine, result| {
            let from = engine
                .state
                .registry
                .position(&caller)
                .ok_or(GameError::PlayerNotJoined(caller))?;
            if !is_valid_move(from, target) {
                return Err(GameError::InvalidMove { from, to: target });
            }

            engine.state.registry.set_position(&caller, target);
            debug!("Player {} moved {} -> {}", caller.short(), from, target);
            result.events.push(GameEvent::player_moved(engine.sequence(), caller, target));

            if let Some(position) = engine.relocate_treasure(target, &caller)? {
                debug!("Treasure moved to {}", position);
                result.events.push(GameEvent::treasure_moved(engine.sequence(), position));
            }

            if target == engine.state.treasure.position() {
                engine.end_game(caller, result)?;
            }
            Ok(())
        })
    }

    /// Step one cell in `direction`.
    pub fn step(&mut self, caller: Identity, direction: Direction) -> Result<TransitionResult, GameError> {
        let from = self.player_position(&caller)?;
        self.make_move(caller, direction.step(from))
    }

    /// Owner-only: end the round and move the whole pool to the owner.
    pub fn emergency_withdraw(&mut self, caller: Identity) -> Result<TransitionResult, GameError> {
        self.atomically(|engine, result| {
            if caller != engine.config.owner {
                return Err(GameError::Unauthorized(caller));
            }

            let cleared = engine.reset_game();
            engine.state.rounds_completed += 1;
            let amount = drain(&mut *engine.ledger, &caller)?;

            warn!("Emergency withdrawal of {} by owner, {} players cleared", amount, cleared);
            result.events.push(GameEvent::emergency_withdrawal(engine.sequence(), caller, amount));
            result.payout = Some(Payout { recipient: caller, amount });
            Ok(())
        })
    }

    /// Oracle-only: supply the word for a pending randomness request.
    pub fn fulfill_randomness(
        &mut self,
        caller: Identity,
        request: RequestSeed,
        word: RandomWord,
    ) -> Result<(), GameError> {
        if self.config.oracle != Some(caller) {
            return Err(GameError::Unauthorized(caller));
        }
        self.randomness.fulfill(request, word)?;
        debug!("Randomness request {} fulfilled", hex::encode(request));
        Ok(())
    }

    /// Owner-only: credit `account` from outside the game. Returns the new
    /// balance.
    pub fn fund(&mut self, caller: Identity, account: Identity, amount: Amount) -> Result<Amount, GameError> {
        if caller != self.config.owner {
            return Err(GameError::Unauthorized(caller));
        }
        self.ledger.credit(&account, amount)?;
        let balance = self.ledger.balance_of(&account);
        info!("Credited {} to {}, balance {}", amount, account.short(), balance);
        Ok(balance)
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Current treasure cell.
    pub fn current_treasure_position(&self) -> Position {
        self.state.treasure.position()
    }

    /// Cell of a joined player.
    pub fn player_position(&self, id: &Identity) -> Result<Position, GameError> {
        self.state
            .registry
            .position(id)
            .ok_or(GameError::PlayerNotJoined(*id))
    }

    /// Whether `id` is in the current round.
    pub fn player_joined(&self, id: &Identity) -> bool {
        self.state.registry.is_joined(id)
    }

    /// Joined identities in join order.
    pub fn joined_players(&self) -> &[Identity] {
        self.state.registry.joined()
    }

    /// Pool balance held by the ledger.
    pub fn pool_balance(&self) -> Amount {
        self.ledger.pool_balance()
    }

    /// Ledger, for balance queries.
    pub fn ledger(&self) -> &dyn Ledger {
        &*self.ledger
    }

    /// Randomness requests waiting on the oracle.
    pub fn pending_randomness(&self) -> Vec<RequestSeed> {
        self.randomness.pending_requests()
    }

    /// Number of committed transitions.
    pub fn sequence(&self) -> u64 {
        self.state.entropy.sequence
    }

    /// Completed rounds.
    pub fn rounds_completed(&self) -> u64 {
        self.state.rounds_completed
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Digest of the full game state.
    pub fn state_hash(&self) -> StateHash {
        self.state.compute_hash()
    }

    /// Persisted view of the game state.
    pub fn snapshot(&self) -> GameSnapshot {
        self.state.snapshot()
    }

    /// Game state plus ledger balances, when the ledger can export them.
    pub fn saved(&self) -> SavedGame {
        SavedGame {
            game: self.state.snapshot(),
            ledger: self.ledger.export(),
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Run `op` as one transition. On error the state is restored and the
    /// events are dropped; on success the sequence advances and stale
    /// randomness requests are pruned.
    fn atomically<F>(&mut self, op: F) -> Result<TransitionResult, GameError>
    where
        F: FnOnce(&mut Self, &mut TransitionResult) -> Result<(), GameError>,
    {
        let checkpoint = self.state.clone();
        let mut result = TransitionResult::default();
        match op(self, &mut result) {
            Ok(()) => {
                self.state.entropy.sequence += 1;
                self.randomness.prune(self.state.entropy.sequence);
                Ok(result)
            }
            Err(err) => {
                self.state = checkpoint;
                debug!("Transition rejected: {}", err);
                Err(err)
            }
        }
    }

    /// Pay the winner and start a new round.
    fn end_game(&mut self, winner: Identity, result: &mut TransitionResult) -> Result<(), GameError> {
        let cleared = self.reset_game();
        let reseeded = self.draw(&winner)?;
        self.state.treasure.reseed(reseeded);
        self.state.rounds_completed += 1;

        let prize = pay_winner(&mut *self.ledger, &winner)?;

        info!(
            "Player {} found the treasure: prize {}, {} players reset, treasure reseeded at {}",
            winner.short(),
            prize,
            cleared,
            reseeded
        );
        result.events.push(GameEvent::game_won(self.sequence(), winner, prize));
        result.payout = Some(Payout { recipient: winner, amount: prize });
        Ok(())
    }

    /// Remove every joined player. Returns how many were removed.
    fn reset_game(&mut self) -> usize {
        self.state.registry.reset()
    }

    fn relocate_treasure(&mut self, landed: Position, actor: &Identity) -> Result<Option<Position>, GameError> {
        let GameEngine { state, randomness, clock, .. } = self;
        let GameState { treasure, entropy, .. } = state;
        treasure.relocate(landed, || draw_position(&mut **randomness, &**clock, &mut *entropy, actor))
    }

    fn draw(&mut self, actor: &Identity) -> Result<Position, GameError> {
        draw_position(&mut *self.randomness, &*self.clock, &mut self.state.entropy, actor)
    }
}

fn draw_position(
    randomness: &mut dyn RandomnessSource,
    clock: &dyn Clock,
    entropy: &mut EntropyCounters,
    actor: &Identity,
) -> Result<Position, GameError> {
    let inputs = EntropyInputs {
        sequence: entropy.sequence,
        timestamp: clock.now(),
        actor: actor.0,
        nonce: entropy.next_nonce(),
    };
    Ok(randomness.draw(&inputs)?)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FixedClock;
    use crate::core::grid::{neighbors, TOTAL_POSITIONS};
    use crate::core::rng::{
        request_seed, InsecurePseudoRandom, RandomnessError, ScriptedRandomness, VerifiableExternal,
    };
    use crate::game::ledger::TransferError;

    const MIN_BET: Amount = 10_000_000_000_000_000;
    const NOW: i64 = 1_700_000_000;

    fn owner() -> Identity {
        Identity::new([0xAA; 16])
    }

    fn oracle() -> Identity {
        Identity::new([0xBB; 16])
    }

    fn player(n: u8) -> Identity {
        Identity::new([n; 16])
    }

    fn config() -> EngineConfig {
        EngineConfig {
            min_bet: MIN_BET,
            owner: owner(),
            oracle: Some(oracle()),
            ..Default::default()
        }
    }

    /// Players 0..MAX_PLAYERS and 200 hold one minimum bet each.
    fn funded_ledger() -> InMemoryLedger {
        let mut ledger = InMemoryLedger::new();
        for n in (0..MAX_PLAYERS as u8).chain([200]) {
            ledger.credit(&player(n), MIN_BET).unwrap();
        }
        ledger
    }

    fn engine_with(randomness: Box<dyn RandomnessSource>, ledger: InMemoryLedger) -> GameEngine {
        let collaborators = Collaborators::new(randomness, Box::new(ledger), Box::new(FixedClock(NOW)));
        GameEngine::new(config(), collaborators).unwrap()
    }

    fn scripted(draws: &[Position]) -> GameEngine {
        engine_with(Box::new(ScriptedRandomness::new(draws)), funded_ledger())
    }

    #[test]
    fn test_new_engine_seeds_treasure() {
        let engine = scripted(&[34]);
        assert_eq!(engine.current_treasure_position(), 34);
        assert_eq!(engine.sequence(), 0);
        assert!(engine.joined_players().is_empty());
    }

    #[test]
    fn test_join_assigns_drawn_position() {
        let mut engine = scripted(&[34, 32]);
        let a = player(1);

        let result = engine.join(a, MIN_BET).unwrap();

        assert_eq!(result.events, vec![GameEvent::player_joined(0, a, 32)]);
        assert_eq!(result.payout, None);
        assert_eq!(engine.player_position(&a), Ok(32));
        assert!(engine.player_joined(&a));
        assert_eq!(engine.joined_players(), &[a]);
        assert_eq!(engine.pool_balance(), MIN_BET);
        assert_eq!(engine.sequence(), 1);
    }

    #[test]
    fn test_join_rejects_small_stake() {
        let mut engine = scripted(&[34, 32]);
        let before = engine.state_hash();

        let result = engine.join(player(1), MIN_BET - 1);

        assert_eq!(
            result,
            Err(GameError::InsufficientBet { stake: MIN_BET - 1, min_bet: MIN_BET })
        );
        assert_eq!(engine.state_hash(), before);
        assert_eq!(engine.pool_balance(), 0);
    }

    #[test]
    fn test_duplicate_join_rejected_without_change() {
        let mut engine = scripted(&[34, 32, 60]);
        let a = player(1);
        engine.join(a, MIN_BET).unwrap();
        let before = engine.state_hash();

        assert_eq!(engine.join(a, MIN_BET), Err(GameError::PlayerAlreadyJoined(a)));
        assert_eq!(engine.state_hash(), before);
        assert_eq!(engine.pool_balance(), MIN_BET);
        assert_eq!(engine.player_position(&a), Ok(32));
    }

    #[test]
    fn test_max_players_reached() {
        let mut engine = engine_with(Box::new(InsecurePseudoRandom), funded_ledger());
        for i in 0..MAX_PLAYERS {
            engine.join(player(i as u8), MIN_BET).unwrap();
        }
        assert_eq!(engine.joined_players().len(), MAX_PLAYERS);
        let before = engine.state_hash();

        let result = engine.join(player(200), MIN_BET);

        assert_eq!(result, Err(GameError::MaxPlayersReached(MAX_PLAYERS)));
        assert_eq!(engine.state_hash(), before);
        assert!(!engine.player_joined(&player(200)));
        assert_eq!(engine.pool_balance(), MIN_BET * MAX_PLAYERS as Amount);
    }

    #[test]
    fn test_unfunded_join_rejected() {
        let mut engine = engine_with(Box::new(ScriptedRandomness::new(&[34, 32])), InMemoryLedger::new());
        let a = player(1);
        let before = engine.state_hash();

        let result = engine.join(a, 1_000 * MIN_BET);

        assert_eq!(
            result,
            Err(GameError::TransferFailed(TransferError::InsufficientFunds {
                account: a,
                requested: 1_000 * MIN_BET,
                available: 0,
            }))
        );
        assert_eq!(engine.state_hash(), before);
        assert!(!engine.player_joined(&a));
        assert_eq!(engine.pool_balance(), 0);
    }

    #[test]
    fn test_stake_beyond_balance_rejected() {
        let mut engine = scripted(&[34, 32, 32]);
        let a = player(1);

        assert!(matches!(
            engine.join(a, 2 * MIN_BET),
            Err(GameError::TransferFailed(TransferError::InsufficientFunds { .. }))
        ));
        assert_eq!(engine.ledger().balance_of(&a), MIN_BET);

        engine.join(a, MIN_BET).unwrap();
        assert_eq!(engine.ledger().balance_of(&a), 0);
        assert_eq!(engine.pool_balance(), MIN_BET);
    }

    #[test]
    fn test_fund_requires_owner() {
        let mut engine = engine_with(Box::new(ScriptedRandomness::new(&[34, 32])), InMemoryLedger::new());
        let a = player(1);

        assert_eq!(engine.fund(a, a, MIN_BET), Err(GameError::Unauthorized(a)));
        assert_eq!(engine.ledger().balance_of(&a), 0);

        assert_eq!(engine.fund(owner(), a, MIN_BET), Ok(MIN_BET));
        assert_eq!(engine.sequence(), 0);
        engine.join(a, MIN_BET).unwrap();
        assert_eq!(engine.pool_balance(), MIN_BET);
    }

    #[test]
    fn test_move_requires_join() {
        let mut engine = scripted(&[34]);
        let a = player(1);
        assert_eq!(engine.make_move(a, 1), Err(GameError::PlayerNotJoined(a)));
        assert_eq!(engine.player_position(&a), Err(GameError::PlayerNotJoined(a)));
    }

    #[test]
    fn test_invalid_move_leaves_state() {
        let mut engine = scripted(&[34, 32]);
        let a = player(1);
        engine.join(a, MIN_BET).unwrap();
        let before = engine.state_hash();

        for target in [32, 55, 43, 100, u32::MAX] {
            assert_eq!(
                engine.make_move(a, target),
                Err(GameError::InvalidMove { from: 32, to: target })
            );
        }

        assert_eq!(engine.state_hash(), before);
        assert_eq!(engine.player_position(&a), Ok(32));
        assert_eq!(engine.current_treasure_position(), 34);
        assert_eq!(engine.joined_players(), &[a]);
    }

    #[test]
    fn test_two_player_win_scenario() {
        // treasure 34, A at 32, B at 80, reseed to 7
        let mut engine = scripted(&[34, 32, 80, 7]);
        let (a, b) = (player(1), player(2));
        engine.join(a, MIN_BET).unwrap();
        engine.join(b, MIN_BET).unwrap();
        assert_eq!(engine.pool_balance(), 2 * MIN_BET);

        // 33 is neither prime nor a multiple of 5: the treasure stays.
        let first = engine.make_move(a, 33).unwrap();
        assert_eq!(first.events, vec![GameEvent::player_moved(2, a, 33)]);

        let second = engine.make_move(a, 34).unwrap();
        let prize = 2 * MIN_BET * 90 / 100;
        assert_eq!(
            second.events,
            vec![
                GameEvent::player_moved(3, a, 34),
                GameEvent::game_won(3, a, prize),
            ]
        );
        assert_eq!(second.payout, Some(Payout { recipient: a, amount: prize }));

        assert!(!engine.player_joined(&a));
        assert!(!engine.player_joined(&b));
        assert!(engine.joined_players().is_empty());
        assert_eq!(engine.current_treasure_position(), 7);
        assert_eq!(engine.ledger().balance_of(&a), prize);
        assert_eq!(engine.pool_balance(), 2 * MIN_BET - prize);
        assert_eq!(engine.rounds_completed(), 1);
    }

    #[test]
    fn test_multiple_of_five_moves_treasure_to_neighbor() {
        // treasure 50, A at 44, adjacent draw 2 -> south of 50
        let mut engine = scripted(&[50, 44, 2]);
        let a = player(1);
        engine.join(a, MIN_BET).unwrap();

        let result = engine.make_move(a, 45).unwrap();

        assert_eq!(
            result.events,
            vec![
                GameEvent::player_moved(1, a, 45),
                GameEvent::treasure_moved(1, 60),
            ]
        );
        assert!(neighbors(50).contains(&engine.current_treasure_position()));
        assert!(engine.player_joined(&a));
        assert_eq!(result.payout, None);
    }

    #[test]
    fn test_relocation_onto_player_wins() {
        // treasure 20, A at 40, A lands on prime 41 and the treasure jumps there
        let mut engine = scripted(&[20, 40, 41, 3]);
        let a = player(1);
        engine.join(a, MIN_BET).unwrap();

        let result = engine.make_move(a, 41).unwrap();

        let prize = MIN_BET * 90 / 100;
        assert_eq!(
            result.events,
            vec![
                GameEvent::player_moved(1, a, 41),
                GameEvent::treasure_moved(1, 41),
                GameEvent::game_won(1, a, prize),
            ]
        );
        assert!(!engine.player_joined(&a));
        assert_eq!(engine.current_treasure_position(), 3);
    }

    #[test]
    fn test_relocation_away_misses() {
        // treasure 43, A at 42, A lands on prime 43 but the treasure jumps to 10
        let mut engine = scripted(&[43, 42, 10]);
        let a = player(1);
        engine.join(a, MIN_BET).unwrap();

        let result = engine.make_move(a, 43).unwrap();

        assert_eq!(
            result.events,
            vec![
                GameEvent::player_moved(1, a, 43),
                GameEvent::treasure_moved(1, 10),
            ]
        );
        assert!(engine.player_joined(&a));
        assert_eq!(engine.player_position(&a), Ok(43));
        assert_eq!(engine.pool_balance(), MIN_BET);
    }

    #[test]
    fn test_unchanged_relocation_is_silent() {
        // A lands on prime 41, the draw keeps the treasure at 20
        let mut engine = scripted(&[20, 40, 20]);
        let a = player(1);
        engine.join(a, MIN_BET).unwrap();

        let result = engine.make_move(a, 41).unwrap();

        assert_eq!(result.events, vec![GameEvent::player_moved(1, a, 41)]);
        assert_eq!(engine.current_treasure_position(), 20);
    }

    #[test]
    fn test_transfer_failure_rolls_back_move() {
        let a = player(1);
        let mut ledger = funded_ledger();
        ledger.reject_incoming(a);
        let mut engine = engine_with(Box::new(ScriptedRandomness::new(&[34, 33, 99])), ledger);
        engine.join(a, MIN_BET).unwrap();
        let before = engine.state_hash();

        let result = engine.make_move(a, 34);

        assert_eq!(result, Err(GameError::TransferFailed(TransferError::Rejected(a))));
        assert_eq!(engine.state_hash(), before);
        assert!(engine.player_joined(&a));
        assert_eq!(engine.player_position(&a), Ok(33));
        assert_eq!(engine.current_treasure_position(), 34);
        assert_eq!(engine.pool_balance(), MIN_BET);
        assert_eq!(engine.rounds_completed(), 0);
        assert_eq!(engine.sequence(), 1);
    }

    #[test]
    fn test_randomness_failure_rolls_back_join() {
        // Script runs dry after the initial placement.
        let mut engine = scripted(&[34]);
        let before = engine.state_hash();

        let result = engine.join(player(1), MIN_BET);

        assert!(matches!(result, Err(GameError::RandomnessUnavailable(_))));
        assert_eq!(engine.state_hash(), before);
        assert_eq!(engine.pool_balance(), 0);
    }

    #[test]
    fn test_emergency_withdraw_requires_owner() {
        let mut engine = scripted(&[34, 32]);
        let a = player(1);
        engine.join(a, MIN_BET).unwrap();
        let before = engine.state_hash();

        assert_eq!(engine.emergency_withdraw(a), Err(GameError::Unauthorized(a)));
        assert_eq!(engine.state_hash(), before);
        assert_eq!(engine.pool_balance(), MIN_BET);
        assert!(engine.player_joined(&a));
    }

    #[test]
    fn test_emergency_withdraw_resets_and_drains() {
        let mut engine = scripted(&[34, 32, 80]);
        let (a, b) = (player(1), player(2));
        engine.join(a, MIN_BET).unwrap();
        engine.join(b, MIN_BET).unwrap();

        let result = engine.emergency_withdraw(owner()).unwrap();

        assert_eq!(
            result.events,
            vec![GameEvent::emergency_withdrawal(2, owner(), 2 * MIN_BET)]
        );
        assert_eq!(result.payout, Some(Payout { recipient: owner(), amount: 2 * MIN_BET }));
        assert!(engine.joined_players().is_empty());
        assert!(!engine.player_joined(&a));
        assert_eq!(engine.pool_balance(), 0);
        assert_eq!(engine.ledger().balance_of(&owner()), 2 * MIN_BET);
        assert_eq!(engine.current_treasure_position(), 34);
    }

    #[test]
    fn test_emergency_withdraw_failure_keeps_players() {
        let mut ledger = funded_ledger();
        ledger.reject_incoming(owner());
        let mut engine = engine_with(Box::new(ScriptedRandomness::new(&[34, 32])), ledger);
        let a = player(1);
        engine.join(a, MIN_BET).unwrap();
        let before = engine.state_hash();

        assert!(matches!(engine.emergency_withdraw(owner()), Err(GameError::TransferFailed(_))));
        assert_eq!(engine.state_hash(), before);
        assert!(engine.player_joined(&a));
    }

    #[test]
    fn test_reset_game_idempotent() {
        let mut engine = scripted(&[34, 32]);
        assert_eq!(engine.reset_game(), 0);

        engine.join(player(1), MIN_BET).unwrap();
        assert_eq!(engine.reset_game(), 1);
        assert_eq!(engine.reset_game(), 0);
        assert!(engine.joined_players().is_empty());
    }

    #[test]
    fn test_step_uses_direction() {
        let mut engine = scripted(&[34, 39, 0]);
        let a = player(1);
        engine.join(a, MIN_BET).unwrap();

        // East of the last column wraps to the next row, a multiple of 5.
        let result = engine.step(a, Direction::East).unwrap();
        assert_eq!(result.events[0], GameEvent::player_moved(1, a, 40));
    }

    #[test]
    fn test_verifiable_external_flow() {
        let collaborators = Collaborators::new(
            Box::new(VerifiableExternal::new()),
            Box::new(funded_ledger()),
            Box::new(FixedClock(NOW)),
        );
        let config = EngineConfig {
            randomness: RandomnessMode::VerifiableExternal,
            ..config()
        };
        let mut engine = GameEngine::with_treasure(config, collaborators, 34);
        let a = player(1);
        let before = engine.state_hash();

        let request = request_seed(&EntropyInputs { sequence: 0, timestamp: NOW, actor: a.0, nonce: 0 });
        assert_eq!(
            engine.join(a, MIN_BET),
            Err(GameError::RandomnessUnavailable(RandomnessError::Unfulfilled(request)))
        );
        assert_eq!(engine.state_hash(), before);
        assert_eq!(engine.pending_randomness(), vec![request]);

        let mut word = [0u8; 32];
        word[0] = 57;
        assert_eq!(
            engine.fulfill_randomness(a, request, word),
            Err(GameError::Unauthorized(a))
        );
        engine.fulfill_randomness(oracle(), request, word).unwrap();
        assert!(engine.pending_randomness().is_empty());

        let result = engine.join(a, MIN_BET).unwrap();
        assert_eq!(result.events, vec![GameEvent::player_joined(0, a, 57)]);
    }

    #[test]
    fn test_insecure_source_rejects_fulfilment() {
        let mut engine = engine_with(Box::new(InsecurePseudoRandom), funded_ledger());
        let result = engine.fulfill_randomness(oracle(), [0; 32], [0; 32]);
        assert!(matches!(
            result,
            Err(GameError::RandomnessUnavailable(RandomnessError::FulfilmentUnsupported(_)))
        ));
    }

    #[test]
    fn test_snapshot_restore_preserves_state() {
        let mut engine = scripted(&[34, 32, 80]);
        engine.join(player(1), MIN_BET).unwrap();
        engine.join(player(2), MIN_BET).unwrap();

        let snapshot = engine.snapshot();
        let collaborators = Collaborators::new(
            Box::new(InsecurePseudoRandom),
            Box::new(InMemoryLedger::with_pool(2 * MIN_BET)),
            Box::new(FixedClock(NOW)),
        );
        let restored = GameEngine::from_snapshot(config(), collaborators, &snapshot).unwrap();

        assert_eq!(restored.state_hash(), engine.state_hash());
        assert_eq!(restored.joined_players(), engine.joined_players());
        assert_eq!(restored.current_treasure_position(), 34);
    }

    #[test]
    fn test_saved_game_restores_pool() {
        let mut engine = scripted(&[34, 33]);
        let a = player(1);
        engine.join(a, MIN_BET).unwrap();

        let saved = engine.saved();
        assert_eq!(saved.ledger.as_ref().map(|l| l.pool), Some(MIN_BET));

        let mut restored = GameEngine::from_saved(
            config(),
            Box::new(ScriptedRandomness::new(&[7])),
            Box::new(FixedClock(NOW)),
            &saved,
        )
        .unwrap();
        assert_eq!(restored.state_hash(), engine.state_hash());
        assert_eq!(restored.pool_balance(), MIN_BET);

        let result = restored.make_move(a, 34).unwrap();
        let prize = MIN_BET * 90 / 100;
        assert_eq!(result.payout, Some(Payout { recipient: a, amount: prize }));
        assert_eq!(restored.ledger().balance_of(&a), prize);
    }

    #[test]
    fn test_saved_game_without_ledger_drops_players() {
        let mut engine = scripted(&[34, 33]);
        let a = player(1);
        engine.join(a, MIN_BET).unwrap();
        let saved = SavedGame { ledger: None, ..engine.saved() };

        let restored = GameEngine::from_saved(
            config(),
            Box::new(InsecurePseudoRandom),
            Box::new(FixedClock(NOW)),
            &saved,
        )
        .unwrap();

        assert!(restored.joined_players().is_empty());
        assert!(!restored.player_joined(&a));
        assert_eq!(restored.pool_balance(), 0);
        assert_eq!(restored.current_treasure_position(), 34);
        assert_eq!(restored.sequence(), engine.sequence());
    }

    #[test]
    fn test_commit_prunes_stale_oracle_requests() {
        let collaborators = Collaborators::new(
            Box::new(VerifiableExternal::new()),
            Box::new(funded_ledger()),
            Box::new(FixedClock(NOW)),
        );
        let config = EngineConfig {
            randomness: RandomnessMode::VerifiableExternal,
            ..config()
        };
        let mut engine = GameEngine::with_treasure(config, collaborators, 34);
        let (a, b) = (player(1), player(2));
        let seed = |actor: Identity, sequence: u64, nonce: u64| {
            request_seed(&EntropyInputs { sequence, timestamp: NOW, actor: actor.0, nonce })
        };

        assert!(engine.join(a, MIN_BET).is_err());
        assert!(engine.join(b, MIN_BET).is_err());
        assert_eq!(engine.pending_randomness(), vec![seed(a, 0, 0), seed(b, 0, 0)]);
        engine.fulfill_randomness(oracle(), seed(a, 0, 0), [1; 32]).unwrap();
        engine.fulfill_randomness(oracle(), seed(b, 0, 0), [2; 32]).unwrap();

        // B commits first; A's answered request was for sequence 0 and is gone.
        engine.join(b, MIN_BET).unwrap();
        assert!(engine.pending_randomness().is_empty());
        assert_eq!(
            engine.fulfill_randomness(oracle(), seed(a, 0, 0), [1; 32]),
            Err(GameError::RandomnessUnavailable(RandomnessError::UnknownRequest(seed(a, 0, 0))))
        );

        assert_eq!(
            engine.join(a, MIN_BET),
            Err(GameError::RandomnessUnavailable(RandomnessError::Unfulfilled(seed(a, 1, 1))))
        );
        assert_eq!(engine.pending_randomness(), vec![seed(a, 1, 1)]);
    }

    #[test]
    fn test_insecure_game_is_reproducible() {
        let run = || {
            let mut engine = engine_with(Box::new(InsecurePseudoRandom), funded_ledger());
            let a = player(1);
            engine.join(a, MIN_BET).unwrap();
            let mut events = Vec::new();
            for _ in 0..50 {
                let Ok(from) = engine.player_position(&a) else { break };
                let result = engine.make_move(a, neighbors(from)[0]).unwrap();
                events.extend(result.events);
            }
            (events, engine.state_hash())
        };

        let (events1, hash1) = run();
        let (events2, hash2) = run();
        assert_eq!(events1, events2);
        assert_eq!(hash1, hash2);
        assert!(events1.iter().all(|e| match e.data {
            crate::game::events::GameEventData::TreasureMoved { position } => position < TOTAL_POSITIONS,
            _ => true,
        }));
    }
}
