//! Game Rules Module
//!
//! Everything the server and client agree on, with no I/O.
//!
//! ## Module Structure
//!
//! - `ability`: Ability catalog and first-come assignment
//! - `level`: Static level geometry, built-ins and JSON loading
//! - `player`: Server-side player record and name sanitizing
//! - `physics`: Per-player kinematics and collision resolution
//! - `leaderboard`: Sorted, capped best-time list

pub mod ability;
pub mod level;
pub mod player;
pub mod physics;
pub mod leaderboard;

// Re-export key types
pub use ability::{AbilityKind, AbilityDef, AbilityCatalog};
pub use level::{
    Level, LevelError, Platform, SurfaceKind, WorldBounds,
    load_levels, load_levels_or_builtin, parse_levels,
};
pub use player::{Player, PlayerId, sanitize_name};
pub use physics::{
    AbilityEffects, AbilityFlags, Body, MoveInput, PhysicsConstants, StepOutcome,
    cap_frame_delta, MAX_FRAME_DELTA,
};
pub use leaderboard::{Leaderboard, LeaderboardEntry, LEADERBOARD_CAPACITY};
