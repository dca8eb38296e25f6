//! # Trio Run Server
//!
//! Authoritative server and client simulation for a cooperative
//! three-player platformer. Each player gets one traversal ability and
//! the whole team has to reach the goal before the run time is recorded.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TRIO RUN SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Geometry and time primitives              │
//! │  ├── vec2.rs     - 2D float vector                           │
//! │  ├── rect.rs     - Axis-aligned rectangles, penetration      │
//! │  └── clock.rs    - Wall clock and manual test clock          │
//! │                                                              │
//! │  game/           - Rules (no I/O)                            │
//! │  ├── ability.rs  - Ability catalog and assignment            │
//! │  ├── level.rs    - Level geometry and loading                │
//! │  ├── player.rs   - Player record                             │
//! │  ├── physics.rs  - Body kinematics and collisions            │
//! │  └── leaderboard.rs - Best five runs                         │
//! │                                                              │
//! │  network/        - Server side                               │
//! │  ├── protocol.rs - JSON wire messages                        │
//! │  ├── session.rs  - Run session state machine                 │
//! │  ├── timer.rs    - Cancellable scheduled reset               │
//! │  └── server.rs   - WebSocket server                          │
//! │                                                              │
//! │  storage/        - Leaderboard persistence                   │
//! │  client/         - Client world and send throttle            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! The server owns phases, ability use, goal flags, the timer and the
//! leaderboard. Positions are reported by clients and trusted; the
//! server only checks them against the goal rectangle.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod storage;
pub mod client;

// Re-export commonly used types
pub use core::{Rect, Vec2};
pub use game::{AbilityCatalog, AbilityKind, Body, Level, MoveInput, PhysicsConstants, PlayerId};
pub use network::{ClientMessage, GameServer, RunPhase, RunSession, ServerConfig, ServerMessage};
pub use client::ClientWorld;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
