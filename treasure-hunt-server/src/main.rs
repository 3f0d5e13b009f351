//! Treasure Hunt Server
//!
//! Runs the engine actor behind the WebSocket front end until Ctrl-C.
//!
//! Environment: `BIND_ADDR`, `MAX_CONNECTIONS`, `MIN_BET`, `MAX_PLAYERS`,
//! `OWNER_ID`, `ORACLE_ID`, `RANDOMNESS_MODE` (`insecure` | `verifiable`),
//! `SNAPSHOT_PATH`, the `AUTH_*` variables and `RUST_LOG`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use treasure_hunt::{
    core::rng::{EntropyInputs, InsecurePseudoRandom, RandomnessMode, RandomnessSource},
    game::engine::{Collaborators, EngineConfig, GameEngine},
    game::state::Identity,
    network::{
        protocol::parse_identity,
        session::{read_snapshot, ActorConfig, EngineActor},
        AuthConfig, GameServer, ServerConfig,
    },
    VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Treasure Hunt Server v{}", VERSION);

    let engine_config = engine_config_from_env()?;
    let server_config = server_config_from_env()?;
    let auth_config = AuthConfig::from_env();
    let snapshot_path = env_var("SNAPSHOT_PATH").map(PathBuf::from);

    info!(
        "Min bet {}, max players {}, randomness {:?}",
        engine_config.min_bet, engine_config.max_players, engine_config.randomness
    );

    let engine = build_engine(engine_config, snapshot_path.as_ref()).await?;
    let actor_config = ActorConfig {
        snapshot_path,
        ..Default::default()
    };
    let (handle, actor_task) = EngineActor::spawn(engine, actor_config);

    let server = GameServer::new(server_config, auth_config, handle);
    tokio::select! {
        result = server.run() => result.context("game server failed")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
    }

    drop(server);
    if tokio::time::timeout(Duration::from_secs(5), actor_task).await.is_err() {
        warn!("Engine actor did not stop within 5s");
    }
    info!("Server stopped");
    Ok(())
}

/// Restore from the snapshot if one exists, otherwise start a fresh round.
async fn build_engine(config: EngineConfig, snapshot_path: Option<&PathBuf>) -> Result<GameEngine> {
    let collaborators = Collaborators::in_memory(&config);

    if let Some(path) = snapshot_path {
        let saved = read_snapshot(path)
            .await
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        if let Some(saved) = saved {
            return GameEngine::from_saved(config, collaborators.randomness, collaborators.clock, &saved)
                .with_context(|| format!("invalid snapshot {}", path.display()));
        }
    }

    match config.randomness {
        RandomnessMode::InsecurePseudoRandom => Ok(GameEngine::new(config, collaborators)?),
        RandomnessMode::VerifiableExternal => {
            // The oracle cannot answer before the server exists.
            let inputs = EntropyInputs {
                sequence: 0,
                timestamp: chrono::Utc::now().timestamp(),
                actor: config.owner.0,
                nonce: 0,
            };
            let genesis = InsecurePseudoRandom.draw(&inputs)?;
            warn!("Initial treasure placed with insecure randomness at {}", genesis);
            Ok(GameEngine::with_treasure(config, collaborators, genesis))
        }
    }
}

fn engine_config_from_env() -> Result<EngineConfig> {
    let mut config = EngineConfig::default();

    if let Some(min_bet) = env_var("MIN_BET") {
        config.min_bet = min_bet.parse().context("MIN_BET must be an unsigned integer")?;
    }
    if let Some(max_players) = env_var("MAX_PLAYERS") {
        config.max_players = max_players.parse().context("MAX_PLAYERS must be an unsigned integer")?;
    }
    match env_var("OWNER_ID") {
        Some(owner) => config.owner = identity_var("OWNER_ID", &owner)?,
        None => warn!("OWNER_ID not set; emergency withdrawal is bound to the all-zero identity"),
    }
    if let Some(oracle) = env_var("ORACLE_ID") {
        config.oracle = Some(identity_var("ORACLE_ID", &oracle)?);
    }
    if let Some(mode) = env_var("RANDOMNESS_MODE") {
        config.randomness = match RandomnessMode::parse(&mode) {
            Some(mode) => mode,
            None => bail!("RANDOMNESS_MODE must be `insecure` or `verifiable`, got `{}`", mode),
        };
    }
    if config.randomness == RandomnessMode::VerifiableExternal && config.oracle.is_none() {
        bail!("RANDOMNESS_MODE=verifiable requires ORACLE_ID");
    }
    if config.randomness == RandomnessMode::InsecurePseudoRandom {
        warn!("Running with insecure pseudo-randomness; draws are predictable");
    }

    Ok(config)
}

fn server_config_from_env() -> Result<ServerConfig> {
    let mut config = ServerConfig::default();
    if let Some(addr) = env_var("BIND_ADDR") {
        config.bind_addr = addr
            .parse::<SocketAddr>()
            .with_context(|| format!("BIND_ADDR `{}` is not a socket address", addr))?;
    }
    if let Some(max) = env_var("MAX_CONNECTIONS") {
        config.max_connections = max.parse().context("MAX_CONNECTIONS must be an unsigned integer")?;
    }
    Ok(config)
}

fn identity_var(name: &str, value: &str) -> Result<Identity> {
    match parse_identity(value) {
        Some(identity) => Ok(identity),
        None => bail!("{} must be a UUID or 32 hex chars, got `{}`", name, value),
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
