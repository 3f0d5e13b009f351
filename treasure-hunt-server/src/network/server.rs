//! WebSocket Game Server
//!
//! Accepts WebSocket connections, authenticates callers and routes their
//! requests to the engine actor. Every authenticated connection also
//! receives the committed event stream.
//!
//! A connection must send `auth` before anything but `ping`. Transition
//! requests get no direct reply on success; the resulting events arrive
//! on the shared stream like everyone else's. Rejections come back to the
//! caller alone as `error`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::game::state::Identity;
use crate::network::auth::{authenticate, AuthConfig};
use crate::network::protocol::{
    parse_fulfilment, parse_identity, AuthRequest, AuthResult, ClientMessage, ErrorCode,
    PlayerStatus, ServerError, ServerMessage,
};
use crate::network::session::{ActorError, EngineHandle, EventBatch};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound queue per connection.
    pub outbound_capacity: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            outbound_capacity: 64,
            version: crate::VERSION.to_string(),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Per-connection state.
#[derive(Debug, Default)]
struct ClientState {
    identity: Option<Identity>,
}

/// Shared by every connection task.
struct ServerContext {
    config: ServerConfig,
    auth: AuthConfig,
    engine: EngineHandle,
}

/// Decrements the connection count when a connection task ends.
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The game server.
pub struct GameServer {
    context: Arc<ServerContext>,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server in front of a running engine actor.
    pub fn new(config: ServerConfig, auth: AuthConfig, engine: EngineHandle) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            context: Arc::new(ServerContext { config, auth, engine }),
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(self.context.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until shutdown.
    #[instrument(skip_all, name = "game_server")]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);
        if !self.context.auth.is_configured() {
            warn!("No AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set; every auth attempt will fail");
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.load(Ordering::SeqCst) >= self.context.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Signal the accept loop and every connection to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        self.connections.fetch_add(1, Ordering::SeqCst);
        let guard = ConnectionGuard(self.connections.clone());
        let context = self.context.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = serve_client(stream, addr, context, shutdown_rx).await {
                warn!("Connection {} ended with error: {}", addr, e);
            }
            debug!("Client {} cleaned up", addr);
        });
    }
}

async fn serve_client(
    stream: TcpStream,
    addr: SocketAddr,
    context: Arc<ServerContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), GameServerError> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(context.config.outbound_capacity);

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut client = ClientState::default();
    let mut events: Option<broadcast::Receiver<EventBatch>> = None;

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                let reply = match msg {
                    Some(Ok(Message::Text(text))) => match ClientMessage::from_json(&text) {
                        Ok(request) => {
                            let was_authenticated = client.identity.is_some();
                            let reply = dispatch(&context, &mut client, request).await;
                            if !was_authenticated && client.identity.is_some() {
                                events = Some(context.engine.subscribe());
                            }
                            reply
                        }
                        Err(e) => {
                            debug!("Invalid message from {}: {}", addr, e);
                            Some(ServerMessage::error(ErrorCode::InvalidInput, "invalid message format"))
                        }
                    },
                    Some(Ok(Message::Binary(_))) => {
                        Some(ServerMessage::error(ErrorCode::InvalidInput, "binary frames are not supported"))
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client {} disconnected", addr);
                        break;
                    }
                    Some(Err(e)) => {
                        sender_task.abort();
                        return Err(e.into());
                    }
                    Some(Ok(_)) => None,
                };
                if let Some(reply) = reply {
                    if msg_tx.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            batch = next_batch(&mut events) => {
                match batch {
                    Ok(batch) => {
                        if msg_tx.send(ServerMessage::events(&batch)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagged, {} event batches dropped", addr, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = msg_tx.send(ServerMessage::Shutdown { reason: "engine stopped".into() }).await;
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = msg_tx.send(ServerMessage::Shutdown { reason: "server shutting down".into() }).await;
                break;
            }
        }
    }

    drop(msg_tx);
    let _ = sender_task.await;
    Ok(())
}

/// Next event batch, or never when the connection is not subscribed.
async fn next_batch(
    events: &mut Option<broadcast::Receiver<EventBatch>>,
) -> Result<EventBatch, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle one client request. Returns the direct reply, if any.
async fn dispatch(context: &ServerContext, client: &mut ClientState, msg: ClientMessage) -> Option<ServerMessage> {
    let engine = &context.engine;

    let caller = match (&msg, client.identity) {
        (ClientMessage::Auth(request), _) => return Some(handle_auth(context, client, request)),
        (ClientMessage::Ping { timestamp }, _) => {
            return Some(ServerMessage::Pong {
                timestamp: *timestamp,
                server_time: chrono::Utc::now().timestamp_millis(),
            })
        }
        (_, Some(identity)) => identity,
        (_, None) => {
            return Some(ServerMessage::error(ErrorCode::NotAuthenticated, "must authenticate first"))
        }
    };

    let outcome = match msg {
        ClientMessage::Join { stake } => engine.join(caller, stake).await.map(|_| None),
        ClientMessage::Move { target } => engine.make_move(caller, target).await.map(|_| None),
        ClientMessage::Step { direction } => engine.step(caller, direction).await.map(|_| None),
        ClientMessage::EmergencyWithdraw => engine.emergency_withdraw(caller).await.map(|_| None),
        ClientMessage::FulfillRandomness { request, word } => {
            let Some((request, word)) = parse_fulfilment(&request, &word) else {
                return Some(ServerMessage::error(ErrorCode::InvalidInput, "request and word must be 32-byte hex"));
            };
            engine
                .fulfill_randomness(caller, request, word)
                .await
                .map(|()| Some(ServerMessage::Fulfilled { request: hex::encode(request) }))
        }
        ClientMessage::Fund { account, amount } => {
            let Some(account) = parse_identity(&account) else {
                return Some(ServerMessage::error(ErrorCode::InvalidInput, "account must be hex or UUID"));
            };
            engine.fund(caller, account, amount).await.map(|balance| {
                Some(ServerMessage::Funded { account: account.to_string(), balance })
            })
        }
        ClientMessage::QueryTreasure => engine
            .treasure_position()
            .await
            .map(|position| Some(ServerMessage::Treasure { position })),
        ClientMessage::QueryPlayer { identity } => {
            let Some(target) = parse_identity(&identity) else {
                return Some(ServerMessage::error(ErrorCode::InvalidInput, "identity must be hex or UUID"));
            };
            engine.player(target).await.map(|view| {
                Some(ServerMessage::Player(PlayerStatus {
                    identity: target.to_string(),
                    joined: view.joined,
                    position: view.position,
                    balance: view.balance,
                }))
            })
        }
        ClientMessage::Auth(_) | ClientMessage::Ping { .. } => Ok(None),
    };

    match outcome {
        Ok(reply) => reply,
        Err(ActorError::Game(e)) => {
            debug!("Request from {} rejected: {}", caller.short(), e);
            Some(ServerMessage::Error(ServerError::from(&e)))
        }
        Err(ActorError::Closed) => {
            error!("Engine actor is not running");
            Some(ServerMessage::error(ErrorCode::InternalError, "engine unavailable"))
        }
    }
}

fn handle_auth(context: &ServerContext, client: &mut ClientState, request: &AuthRequest) -> ServerMessage {
    let version = context.config.version.clone();
    match authenticate(&request.token, &context.auth) {
        Ok(identity) => {
            info!("Client authenticated as {}", identity.short());
            client.identity = Some(identity);
            ServerMessage::AuthResult(AuthResult {
                success: true,
                identity: Some(identity.to_string()),
                error: None,
                server_version: version,
            })
        }
        Err(e) => {
            debug!("Authentication failed: {}", e);
            ServerMessage::AuthResult(AuthResult {
                success: false,
                identity: None,
                error: Some(e.to_string()),
                server_version: version,
            })
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
