//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON text frame tagged by `"type"` with a camelCase
//! event name, e.g. `{"type":"registerPlayer","name":"Ada"}`.

use serde::{Serialize, Deserialize};

use crate::core::Vec2;
use crate::game::{
    AbilityDef, AbilityFlags, AbilityKind, LeaderboardEntry, Level, Player, PlayerId,
};
use crate::network::session::RunPhase;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Join the session under a display name.
    RegisterPlayer(RegisterRequest),

    /// Local body state, sent at most ~30 times per second.
    PlayerState(PlayerStateReport),

    /// Activate the assigned ability.
    UseAbility(UseAbilityRequest),

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp echoed back
        timestamp: u64,
    },
}

/// Registration request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Requested display name (untrimmed).
    pub name: String,
}

/// Client-reported body state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStateReport {
    /// Top-left position.
    pub position: Vec2,
    /// Velocity in px/s.
    pub velocity: Vec2,
    /// Facing direction (-1 or 1).
    pub facing: i8,
    /// Player is actively moving (starts the run timer).
    #[serde(default)]
    pub moving: bool,
    /// Standing on a surface.
    #[serde(default)]
    pub grounded: bool,
    /// Active ability effects.
    #[serde(default)]
    pub ability_flags: AbilityFlags,
}

impl PlayerStateReport {
    /// True if every number in the report is finite.
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite()
    }
}

/// Ability activation request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseAbilityRequest {
    /// Dash direction (-1 or 1); defaults to facing.
    #[serde(default)]
    pub direction: Option<i8>,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Everything a freshly connected client needs.
    InitialData(InitialData),

    /// Registration succeeded.
    JoinAccepted(JoinAccepted),

    /// Registration refused.
    JoinRejected(Rejection),

    /// Full session snapshot after a mutation.
    SessionUpdate(SessionSnapshot),

    /// Players were put back at spawn.
    RunReset(RunReset),

    /// The whole team reached the goal.
    RunCompleted(RunCompleted),

    /// The run timer started.
    TimerStarted(TimerStarted),

    /// Relayed state of another player.
    PlayerState(PlayerStateRelay),

    /// Another player activated their ability.
    AbilityUsed(AbilityActivation),

    /// Your own activation was accepted.
    AbilityConfirmed(AbilityActivation),

    /// Your own activation was refused.
    AbilityDenied(Rejection),

    /// Pong response.
    Pong {
        /// Echoed client timestamp
        timestamp: u64,
        /// Server wall clock (Unix ms)
        #[serde(rename = "serverTime")]
        server_time: u64,
    },

    /// Malformed or unusable message.
    Error(ServerError),
}

/// Payload of `initialData`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialData {
    /// Connection id assigned to the receiver.
    pub self_id: PlayerId,
    /// Ability catalog in assignment order.
    pub abilities: Vec<AbilityDef>,
    /// Current level.
    pub level: Level,
    /// Best runs, fastest first.
    pub leaderboard: Vec<LeaderboardEntry>,
    /// Session snapshot.
    pub session: SessionSnapshot,
}

/// Payload of `joinAccepted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinAccepted {
    /// The registered player.
    pub player: PlayerSnapshot,
    /// Assigned ability; absent for spectators.
    pub ability: Option<AbilityDef>,
    /// Joined as a spectator.
    pub spectator: bool,
}

/// A refused request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Machine-readable reason.
    pub code: RejectCode,
    /// Human-readable reason.
    pub reason: String,
}

/// Payload of `runReset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReset {
    /// Session after the reset.
    pub session: SessionSnapshot,
    /// Level for the new run (changes when levels rotate).
    pub level: Level,
    /// Current leaderboard.
    pub leaderboard: Vec<LeaderboardEntry>,
    /// Status line for players.
    pub message: String,
}

/// Payload of `runCompleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCompleted {
    /// Elapsed run time.
    pub time_ms: u64,
    /// Leaderboard including this run if it made the cut.
    pub leaderboard: Vec<LeaderboardEntry>,
    /// Team label recorded for the run.
    pub team_name: String,
    /// Level the run was on.
    pub level_id: String,
}

/// Payload of `timerStarted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerStarted {
    /// Server wall clock at start (Unix ms).
    pub start_time: u64,
}

/// Payload of a relayed `playerState`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStateRelay {
    /// Whose state this is.
    pub id: PlayerId,
    /// Top-left position.
    pub position: Vec2,
    /// Velocity in px/s.
    pub velocity: Vec2,
    /// Facing direction.
    pub facing: i8,
    /// Standing on a surface.
    pub grounded: bool,
    /// Active ability effects.
    pub ability_flags: AbilityFlags,
}

/// Payload of `abilityUsed` / `abilityConfirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityActivation {
    /// Who activated.
    pub player_id: PlayerId,
    /// Which ability.
    pub ability: AbilityKind,
    /// Requested direction, if any.
    pub direction: Option<i8>,
    /// Position at activation.
    pub position: Vec2,
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: RejectCode,
    /// Human-readable message.
    pub message: String,
}

/// Reason codes for rejections, denials and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    /// Display name blank after trimming.
    BlankName,
    /// Connection already registered.
    AlreadyRegistered,
    /// Every ability (and spectator slot) is taken.
    TeamFull,
    /// Spectators cannot use abilities.
    Spectator,
    /// Run is not active or running.
    RunNotActive,
    /// Ability already used this run.
    AbilityAlreadyUsed,
    /// Connection has not registered.
    NotRegistered,
    /// Malformed message.
    InvalidInput,
    /// Server at connection capacity.
    ServerFull,
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Read-only view of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// State machine phase.
    pub phase: RunPhase,
    /// Index of the current level.
    pub level_index: usize,
    /// Id of the current level.
    pub level_id: String,
    /// Fewer than `team_size` players.
    pub waiting_for_players: bool,
    /// Timer counting.
    pub timer_running: bool,
    /// Timer start (Unix ms).
    pub timer_start: Option<u64>,
    /// Run finished.
    pub completed: bool,
    /// Elapsed time of the finished run.
    pub completion_time: Option<u64>,
    /// Runs started since the server came up.
    pub run_number: u64,
    /// Players required to start.
    pub team_size: usize,
    /// Players in spawn order.
    pub players: Vec<PlayerSnapshot>,
}

/// Read-only view of one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    /// Connection id.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Assigned ability.
    pub ability: Option<AbilityKind>,
    /// Ability used this run.
    pub ability_used: bool,
    /// Reached the goal this run.
    pub reached_goal: bool,
    /// Top-left position.
    pub position: Vec2,
    /// Velocity.
    pub velocity: Vec2,
    /// Facing direction.
    pub facing: i8,
    /// Standing on a surface.
    pub grounded: bool,
    /// Active ability effects.
    pub ability_flags: AbilityFlags,
    /// Spawn slot.
    pub spawn_index: usize,
    /// No ability held.
    pub spectator: bool,
}

impl From<&Player> for PlayerSnapshot {
    fn from(p: &Player) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            ability: p.ability,
            ability_used: p.ability_used,
            reached_goal: p.reached_goal,
            position: p.position,
            velocity: p.velocity,
            facing: p.facing,
            grounded: p.grounded,
            ability_flags: p.ability_flags,
            spawn_index: p.spawn_index,
            spectator: p.is_spectator(),
        }
    }
}

impl From<&Player> for PlayerStateRelay {
    fn from(p: &Player) -> Self {
        Self {
            id: p.id,
            position: p.position,
            velocity: p.velocity,
            facing: p.facing,
            grounded: p.grounded,
            ability_flags: p.ability_flags,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Error reply for a message that failed to parse.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code: RejectCode::InvalidInput,
            message: message.into(),
        })
    }
}
