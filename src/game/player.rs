//! Player Records
//!
//! Server-side state for one connected participant. Positions are
//! client-reported and trusted; the server only uses them for goal
//! containment.

use std::fmt;

use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::core::{Rect, Vec2};
use crate::game::ability::AbilityKind;
use crate::game::physics::AbilityFlags;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Connection-scoped player identifier.
///
/// Implements Ord so player maps iterate deterministically.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Fresh random id for a new connection.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id from raw bytes (tests, replays).
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl fmt::Debug for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlayerId({})", self.short())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trim a display name and cap it at `max_chars` characters.
///
/// Returns `None` for names that are blank after trimming.
pub fn sanitize_name(raw: &str, max_chars: usize) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let capped: String = trimmed.chars().take(max_chars).collect();
    // Truncation may expose trailing whitespace
    Some(capped.trim_end().to_string())
}

// =============================================================================
// PLAYER
// =============================================================================

/// A registered participant.
#[derive(Clone, Debug, PartialEq)]
pub struct Player {
    /// Connection id
    pub id: PlayerId,
    /// Sanitized display name
    pub name: String,
    /// Assigned ability; `None` for spectators
    pub ability: Option<AbilityKind>,
    /// Ability already activated this run
    pub ability_used: bool,
    /// Bounding box touched the goal during this run
    pub reached_goal: bool,
    /// Last reported top-left position
    pub position: Vec2,
    /// Last reported velocity
    pub velocity: Vec2,
    /// Facing direction (-1 or 1)
    pub facing: i8,
    /// Last reported grounded flag
    pub grounded: bool,
    /// Last reported ability effects
    pub ability_flags: AbilityFlags,
    /// Spawn slot; also the ordering key
    pub spawn_index: usize,
}

impl Player {
    /// New player standing at `spawn`.
    pub fn new(
        id: PlayerId,
        name: String,
        ability: Option<AbilityKind>,
        spawn_index: usize,
        spawn: Vec2,
    ) -> Self {
        Self {
            id,
            name,
            ability,
            ability_used: false,
            reached_goal: false,
            position: spawn,
            velocity: Vec2::ZERO,
            facing: 1,
            grounded: false,
            ability_flags: AbilityFlags::default(),
            spawn_index,
        }
    }

    /// True if the player holds no ability.
    #[inline]
    pub fn is_spectator(&self) -> bool {
        self.ability.is_none()
    }

    /// Put the player back at `spawn` for a fresh run.
    pub fn reset_to(&mut self, spawn: Vec2) {
        self.position = spawn;
        self.velocity = Vec2::ZERO;
        self.facing = 1;
        self.grounded = false;
        self.ability_used = false;
        self.reached_goal = false;
        self.ability_flags = AbilityFlags::default();
    }

    /// Bounding box for a player of `size`.
    #[inline]
    pub fn bounds(&self, size: Vec2) -> Rect {
        Rect::at(self.position, size)
    }
}
