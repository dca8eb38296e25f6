//! Network Layer
//!
//! WebSocket server, wire protocol and the authoritative run session.
//! All mutation of game state happens inside the session task; connection
//! tasks only decode and forward.

pub mod protocol;
pub mod session;
pub mod server;
pub mod timer;

pub use protocol::{
    ClientMessage, ServerMessage, PlayerStateReport, PlayerStateRelay, SessionSnapshot,
    PlayerSnapshot, RejectCode, Rejection,
};
pub use session::{
    RunSession, RunPhase, SessionConfig, SessionEvent, JoinRejection, AbilityDenial, StateError,
};
pub use server::{GameServer, ServerConfig, ConfigError, GameServerError};
pub use timer::ScheduledTask;
