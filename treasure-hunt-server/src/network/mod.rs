//! Network Layer
//!
//! WebSocket front end and the engine actor.
//! This layer is **non-deterministic** - all game rules live in `game/`.

pub mod auth;
pub mod protocol;
pub mod session;
pub mod server;

pub use auth::{authenticate, validate_token, AuthConfig, AuthError, TokenClaims};
pub use protocol::{ClientMessage, ErrorCode, EventNotice, ServerError, ServerMessage};
pub use session::{ActorConfig, ActorError, EngineActor, EngineHandle, EventBatch};
pub use server::{GameServer, GameServerError, ServerConfig};
