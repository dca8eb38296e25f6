//! Run Session
//!
//! The single authoritative aggregate for the current run: registered
//! players, level selection, readiness gating, the run timer, goal tracking,
//! completion and leaderboard submission, and the post-completion reset.
//!
//! The session is owned by one task and mutated only through [`RunSession::handle`]
//! and the command methods it dispatches to. Every command runs to completion
//! without awaiting, so each broadcast reflects a fully applied mutation.
//!
//! ## Phases
//!
//! ```text
//!   WaitingForPlayers ──team full──▶ Active ──first move──▶ Running
//!          ▲                            ▲                      │
//!          │ player left                │ reset (team full)    │ all in goal
//!          └────────────────────────────┴────── Completed ◀────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::{Clock, Vec2};
use crate::game::{
    AbilityCatalog, AbilityFlags, AbilityKind, Leaderboard, LeaderboardEntry, Level, Player,
    PlayerId, sanitize_name,
};
use crate::network::protocol::{
    AbilityActivation, ClientMessage, InitialData, JoinAccepted, PlayerSnapshot,
    PlayerStateRelay, PlayerStateReport, RejectCode, Rejection, RunCompleted, RunReset,
    ServerError, ServerMessage, SessionSnapshot, TimerStarted,
};
use crate::network::timer::ScheduledTask;
use crate::storage::LeaderboardStore;

/// Outbound message channel of one connection.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Run state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunPhase {
    /// Fewer players than abilities.
    WaitingForPlayers,
    /// Team complete, timer not started.
    Active,
    /// Timer running.
    Running,
    /// Run finished, reset scheduled.
    Completed,
}

/// Configuration for the run session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Ability catalog; its size is the team size.
    pub catalog: AbilityCatalog,
    /// Index of the first level played.
    pub start_level: usize,
    /// Delay between completion and the automatic reset.
    pub reset_delay: Duration,
    /// Player bounding box used for goal containment.
    pub player_size: Vec2,
    /// Display names are truncated to this many characters.
    pub max_name_len: usize,
    /// Admit extra players without an ability once the team is full.
    pub allow_spectators: bool,
    /// Spectator cap when spectators are allowed.
    pub max_spectators: usize,
    /// Move to the next level on each post-completion reset.
    pub advance_levels: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            catalog: AbilityCatalog::standard(),
            start_level: 0,
            reset_delay: Duration::from_secs(5),
            player_size: Vec2::new(32.0, 48.0),
            max_name_len: 16,
            allow_spectators: false,
            max_spectators: 4,
            advance_levels: false,
        }
    }
}

/// Inputs to the session task.
#[derive(Debug)]
pub enum SessionEvent {
    /// A transport connection opened.
    Connected {
        /// Connection id
        id: PlayerId,
        /// Where to send this connection's messages
        outbox: Outbox,
    },
    /// A decoded client message.
    Message {
        /// Sender
        id: PlayerId,
        /// Payload
        message: ClientMessage,
    },
    /// A transport connection closed.
    Disconnected {
        /// Connection id
        id: PlayerId,
    },
    /// The scheduled reset fired.
    ResetDue {
        /// Schedule token
        token: u64,
    },
}

/// Registration refusals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinRejection {
    /// Name blank after trimming.
    #[error("Please enter a name.")]
    BlankName,
    /// Connection already registered.
    #[error("You have already joined.")]
    AlreadyRegistered,
    /// No ability or spectator slot left.
    #[error("The team is full. Try again after the current run.")]
    TeamFull,
}

impl JoinRejection {
    /// Wire code.
    pub fn code(&self) -> RejectCode {
        match self {
            JoinRejection::BlankName => RejectCode::BlankName,
            JoinRejection::AlreadyRegistered => RejectCode::AlreadyRegistered,
            JoinRejection::TeamFull => RejectCode::TeamFull,
        }
    }

    /// Wire payload.
    pub fn to_rejection(&self) -> Rejection {
        Rejection { code: self.code(), reason: self.to_string() }
    }
}

/// Ability activation refusals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbilityDenial {
    /// Connection has not registered.
    #[error("Join the team first.")]
    NotRegistered,
    /// Spectators have no ability.
    #[error("Spectators cannot use abilities.")]
    Spectator,
    /// Session is waiting or completed.
    #[error("The run is not active.")]
    RunNotActive,
    /// One activation per run.
    #[error("Ability already used.")]
    AlreadyUsed,
}

impl AbilityDenial {
    /// Wire code.
    pub fn code(&self) -> RejectCode {
        match self {
            AbilityDenial::NotRegistered => RejectCode::NotRegistered,
            AbilityDenial::Spectator => RejectCode::Spectator,
            AbilityDenial::RunNotActive => RejectCode::RunNotActive,
            AbilityDenial::AlreadyUsed => RejectCode::AbilityAlreadyUsed,
        }
    }

    /// Wire payload.
    pub fn to_rejection(&self) -> Rejection {
        Rejection { code: self.code(), reason: self.to_string() }
    }
}

/// Reasons a state report was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Connection has not registered.
    #[error("player is not registered")]
    NotRegistered,
    /// Spectators have no body.
    #[error("spectators do not report state")]
    Spectator,
    /// NaN or infinite coordinates.
    #[error("playerState contains non-finite numbers")]
    NonFinite,
}

/// The authoritative run session.
pub struct RunSession {
    config: SessionConfig,
    levels: Vec<Level>,
    level_index: usize,
    phase: RunPhase,
    timer_start: Option<u64>,
    completion_time: Option<u64>,
    run_number: u64,
    /// Registered players.
    players: BTreeMap<PlayerId, Player>,
    /// Every open connection, registered or not.
    connections: BTreeMap<PlayerId, Outbox>,
    leaderboard: Leaderboard,
    store: Box<dyn LeaderboardStore>,
    clock: Arc<dyn Clock>,
    reset_task: ScheduledTask,
    /// Loopback for scheduled events.
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl RunSession {
    /// Create a session, loading the leaderboard from `store`.
    ///
    /// An empty `levels` list falls back to the built-in levels. A store
    /// that fails to load is logged and treated as empty.
    pub fn new(
        config: SessionConfig,
        levels: Vec<Level>,
        store: Box<dyn LeaderboardStore>,
        clock: Arc<dyn Clock>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let levels = if levels.is_empty() { Level::builtin() } else { levels };
        let level_index = config.start_level % levels.len();

        let leaderboard = match store.load() {
            Ok(entries) => Leaderboard::from_entries(entries),
            Err(e) => {
                warn!("Could not load leaderboard, starting empty: {}", e);
                Leaderboard::new()
            }
        };

        Self {
            config,
            levels,
            level_index,
            phase: RunPhase::WaitingForPlayers,
            timer_start: None,
            completion_time: None,
            run_number: 0,
            players: BTreeMap::new(),
            connections: BTreeMap::new(),
            leaderboard,
            store,
            clock,
            reset_task: ScheduledTask::new(),
            events,
        }
    }

    // =========================================================================
    // EVENT DISPATCH
    // =========================================================================

    /// Apply one event.
    pub fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected { id, outbox } => self.connect(id, outbox),
            SessionEvent::Message { id, message } => self.handle_message(id, message),
            SessionEvent::Disconnected { id } => self.disconnect(id),
            SessionEvent::ResetDue { token } => {
                self.fire_reset(token);
            }
        }
    }

    fn handle_message(&mut self, id: PlayerId, message: ClientMessage) {
        match message {
            ClientMessage::RegisterPlayer(req) => {
                if let Err(e) = self.register(id, &req.name) {
                    debug!("Join rejected for {}: {}", id.short(), e);
                }
            }
            ClientMessage::PlayerState(report) => {
                if let Err(e) = self.update_state(id, report) {
                    debug!("State from {} ignored: {}", id.short(), e);
                }
            }
            ClientMessage::UseAbility(req) => {
                if let Err(e) = self.use_ability(id, req.direction) {
                    debug!("Ability denied for {}: {}", id.short(), e);
                }
            }
            ClientMessage::Ping { timestamp } => {
                let server_time = self.clock.now_ms();
                self.send_to(&id, ServerMessage::Pong { timestamp, server_time });
            }
        }
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Track a new connection and send it the initial data.
    pub fn connect(&mut self, id: PlayerId, outbox: Outbox) {
        debug!("Connection {} opened", id.short());
        let initial = ServerMessage::InitialData(InitialData {
            self_id: id,
            abilities: self.config.catalog.entries().to_vec(),
            level: self.level().clone(),
            leaderboard: self.leaderboard.entries().to_vec(),
            session: self.snapshot(),
        });
        let _ = outbox.send(initial);
        self.connections.insert(id, outbox);
    }

    /// Register a connection under a display name.
    ///
    /// The requester receives `joinAccepted` or `joinRejected`; a rejection
    /// leaves the session untouched.
    pub fn register(
        &mut self,
        id: PlayerId,
        raw_name: &str,
    ) -> Result<PlayerSnapshot, JoinRejection> {
        match self.admit(id, raw_name) {
            Ok(snapshot) => Ok(snapshot),
            Err(rejection) => {
                self.send_to(&id, ServerMessage::JoinRejected(rejection.to_rejection()));
                Err(rejection)
            }
        }
    }

    fn admit(&mut self, id: PlayerId, raw_name: &str) -> Result<PlayerSnapshot, JoinRejection> {
        if self.players.contains_key(&id) {
            return Err(JoinRejection::AlreadyRegistered);
        }
        let name = sanitize_name(raw_name, self.config.max_name_len)
            .ok_or(JoinRejection::BlankName)?;

        let taken: Vec<AbilityKind> = self.players.values().filter_map(|p| p.ability).collect();
        let (ability, spawn_index) = match self.config.catalog.next_available(taken) {
            Some(def) => {
                let index = self.config.catalog.index_of(def.id).unwrap_or(0);
                (Some(def.id), index)
            }
            None => (None, self.free_spectator_slot()?),
        };

        let spawn = self.level().spawn_point(spawn_index);
        let player = Player::new(id, name, ability, spawn_index, spawn);
        let snapshot = PlayerSnapshot::from(&player);
        info!(
            "{} joined as {} (slot {})",
            player.name,
            ability.map(AbilityKind::id).unwrap_or("spectator"),
            spawn_index,
        );
        self.players.insert(id, player);

        let accepted = ServerMessage::JoinAccepted(JoinAccepted {
            player: snapshot.clone(),
            ability: ability.and_then(|kind| self.config.catalog.get(kind)).cloned(),
            spectator: ability.is_none(),
        });
        self.send_to(&id, accepted);

        if ability.is_some()
            && self.phase == RunPhase::WaitingForPlayers
            && self.team_count() == self.team_size()
        {
            self.enter_active("Team assembled! Start moving to begin the timer.");
        } else {
            self.broadcast(ServerMessage::SessionUpdate(self.snapshot()));
        }

        Ok(snapshot)
    }

    fn free_spectator_slot(&self) -> Result<usize, JoinRejection> {
        let spectators: Vec<usize> = self.players.values()
            .filter(|p| p.is_spectator())
            .map(|p| p.spawn_index)
            .collect();
        if !self.config.allow_spectators || spectators.len() >= self.config.max_spectators {
            return Err(JoinRejection::TeamFull);
        }
        let slot = (self.team_size()..)
            .find(|slot| !spectators.contains(slot))
            .unwrap_or(self.team_size());
        Ok(slot)
    }

    /// Apply a client-reported body state.
    ///
    /// Relays the state to every other connection, starts the timer on the
    /// first movement of an active run, records goal arrival and checks for
    /// completion across the whole team.
    pub fn update_state(
        &mut self,
        id: PlayerId,
        report: PlayerStateReport,
    ) -> Result<(), StateError> {
        if !report.is_finite() {
            self.send_to(&id, ServerMessage::Error(ServerError {
                code: RejectCode::InvalidInput,
                message: StateError::NonFinite.to_string(),
            }));
            return Err(StateError::NonFinite);
        }

        let player_size = self.config.player_size;
        let phase = self.phase;
        let goal = self.level().goal;

        let player = self.players.get_mut(&id).ok_or(StateError::NotRegistered)?;
        if player.is_spectator() {
            return Err(StateError::Spectator);
        }

        player.position = report.position;
        player.velocity = report.velocity;
        player.facing = if report.facing < 0 { -1 } else { 1 };
        player.grounded = report.grounded;
        player.ability_flags = report.ability_flags;

        let newly_in_goal = phase == RunPhase::Running
            && !player.reached_goal
            && player.bounds(player_size).overlaps(&goal);
        if newly_in_goal {
            player.reached_goal = true;
            info!("{} reached the goal", player.name);
        }

        let relay = ServerMessage::PlayerState(PlayerStateRelay::from(&*player));
        self.broadcast_except(&id, relay);

        if phase == RunPhase::Active && report.moving {
            self.start_timer();
        }

        if self.phase == RunPhase::Running {
            if self.all_reached_goal() {
                self.complete_run();
            } else if newly_in_goal {
                self.broadcast(ServerMessage::SessionUpdate(self.snapshot()));
            }
        }
        Ok(())
    }

    /// Activate the requester's ability.
    ///
    /// Allowed once per run while the run is active or running. The
    /// requester gets `abilityConfirmed` or `abilityDenied`; everyone else
    /// gets `abilityUsed`.
    pub fn use_ability(
        &mut self,
        id: PlayerId,
        direction: Option<i8>,
    ) -> Result<AbilityActivation, AbilityDenial> {
        match self.activate(id, direction) {
            Ok(activation) => {
                self.send_to(&id, ServerMessage::AbilityConfirmed(activation));
                self.broadcast_except(&id, ServerMessage::AbilityUsed(activation));
                Ok(activation)
            }
            Err(denial) => {
                self.send_to(&id, ServerMessage::AbilityDenied(denial.to_rejection()));
                Err(denial)
            }
        }
    }

    fn activate(
        &mut self,
        id: PlayerId,
        direction: Option<i8>,
    ) -> Result<AbilityActivation, AbilityDenial> {
        let phase = self.phase;
        let player = self.players.get_mut(&id).ok_or(AbilityDenial::NotRegistered)?;
        let ability = player.ability.ok_or(AbilityDenial::Spectator)?;
        if !matches!(phase, RunPhase::Active | RunPhase::Running) {
            return Err(AbilityDenial::RunNotActive);
        }
        if player.ability_used {
            return Err(AbilityDenial::AlreadyUsed);
        }

        player.ability_used = true;
        player.ability_flags = flags_for(ability);
        info!("{} used {}", player.name, ability.id());

        Ok(AbilityActivation {
            player_id: id,
            ability,
            direction: direction.map(|d| if d < 0 { -1 } else { 1 }),
            position: player.position,
        })
    }

    /// Drop a connection and its player, if any.
    ///
    /// Losing a team member outside `WaitingForPlayers` cancels any pending
    /// reset and sends the remaining players back to spawn.
    pub fn disconnect(&mut self, id: PlayerId) {
        self.connections.remove(&id);

        let player = match self.players.remove(&id) {
            Some(player) => player,
            None => {
                debug!("Connection {} closed before joining", id.short());
                return;
            }
        };

        info!("{} left ({})", player.name, id.short());
        if !player.is_spectator() && self.phase != RunPhase::WaitingForPlayers {
            self.enter_waiting(&format!("{} left the run. Waiting for players...", player.name));
        } else {
            self.broadcast(ServerMessage::SessionUpdate(self.snapshot()));
        }
    }

    /// Handle the post-completion reset. Returns false for stale tokens.
    pub fn fire_reset(&mut self, token: u64) -> bool {
        if !self.reset_task.complete(token) || self.phase != RunPhase::Completed {
            debug!("Ignoring stale reset {}", token);
            return false;
        }

        if self.config.advance_levels {
            self.level_index = (self.level_index + 1) % self.levels.len();
            info!("Advancing to level {}", self.level().id);
        }

        if self.team_count() == self.team_size() {
            self.enter_active("New run! Start moving to begin the timer.");
        } else {
            self.enter_waiting("Waiting for players...");
        }
        true
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    fn enter_active(&mut self, message: &str) {
        self.reset_task.cancel();
        self.phase = RunPhase::Active;
        self.timer_start = None;
        self.completion_time = None;
        self.run_number += 1;
        self.reset_players();
        info!("Run {} ready on {}", self.run_number, self.level().id);
        self.broadcast_reset(message);
    }

    fn enter_waiting(&mut self, message: &str) {
        if self.reset_task.cancel() {
            debug!("Cancelled pending reset");
        }
        self.phase = RunPhase::WaitingForPlayers;
        self.timer_start = None;
        self.completion_time = None;
        self.reset_players();
        info!("Waiting for players ({}/{})", self.team_count(), self.team_size());
        self.broadcast_reset(message);
    }

    fn start_timer(&mut self) {
        let start_time = self.clock.now_ms();
        self.phase = RunPhase::Running;
        self.timer_start = Some(start_time);
        info!("Run {} timer started", self.run_number);
        self.broadcast(ServerMessage::TimerStarted(TimerStarted { start_time }));
        self.broadcast(ServerMessage::SessionUpdate(self.snapshot()));
    }

    fn complete_run(&mut self) {
        let now = self.clock.now_ms();
        let time_ms = now.saturating_sub(self.timer_start.unwrap_or(now));
        self.phase = RunPhase::Completed;
        self.completion_time = Some(time_ms);

        let team_name = self.team_label();
        let level_id = self.level().id.clone();
        info!("Run {} completed by {} in {} ms", self.run_number, team_name, time_ms);

        let entry = LeaderboardEntry {
            team_name: team_name.clone(),
            time_ms,
            level_id: level_id.clone(),
            recorded_at: self.clock.now_utc(),
        };
        if let Some(rank) = self.leaderboard.record(entry) {
            info!("New leaderboard entry at #{}", rank + 1);
            if let Err(e) = self.store.save(self.leaderboard.entries()) {
                warn!("Failed to persist leaderboard: {}", e);
            }
        }

        self.broadcast(ServerMessage::RunCompleted(RunCompleted {
            time_ms,
            leaderboard: self.leaderboard.entries().to_vec(),
            team_name,
            level_id,
        }));
        self.broadcast(ServerMessage::SessionUpdate(self.snapshot()));

        self.reset_task.schedule(
            self.config.reset_delay,
            self.events.clone(),
            |token| SessionEvent::ResetDue { token },
        );
    }

    fn reset_players(&mut self) {
        let level = &self.levels[self.level_index];
        for player in self.players.values_mut() {
            player.reset_to(level.spawn_point(player.spawn_index));
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Read-only snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            level_index: self.level_index,
            level_id: self.level().id.clone(),
            waiting_for_players: self.phase == RunPhase::WaitingForPlayers,
            timer_running: self.phase == RunPhase::Running,
            timer_start: self.timer_start,
            completed: self.phase == RunPhase::Completed,
            completion_time: self.completion_time,
            run_number: self.run_number,
            team_size: self.team_size(),
            players: self.players_in_spawn_order().into_iter().map(PlayerSnapshot::from).collect(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Current level.
    pub fn level(&self) -> &Level {
        &self.levels[self.level_index]
    }

    /// Players required to start a run.
    pub fn team_size(&self) -> usize {
        self.config.catalog.len()
    }

    /// Registered non-spectators.
    pub fn team_count(&self) -> usize {
        self.players.values().filter(|p| !p.is_spectator()).count()
    }

    /// Registered player by id.
    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    /// Registered players ordered by spawn index.
    pub fn players_in_spawn_order(&self) -> Vec<&Player> {
        let mut players: Vec<&Player> = self.players.values().collect();
        players.sort_by_key(|p| p.spawn_index);
        players
    }

    /// Best runs.
    pub fn leaderboard(&self) -> &Leaderboard {
        &self.leaderboard
    }

    /// Runs started so far.
    pub fn run_number(&self) -> u64 {
        self.run_number
    }

    /// True while a post-completion reset is scheduled.
    pub fn reset_pending(&self) -> bool {
        self.reset_task.is_pending()
    }

    /// Open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn all_reached_goal(&self) -> bool {
        let mut team = self.players.values().filter(|p| !p.is_spectator()).peekable();
        team.peek().is_some() && team.all(|p| p.reached_goal)
    }

    fn team_label(&self) -> String {
        self.players_in_spawn_order()
            .into_iter()
            .filter(|p| !p.is_spectator())
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    // =========================================================================
    // MESSAGING
    // =========================================================================

    fn send_to(&self, id: &PlayerId, message: ServerMessage) {
        if let Some(outbox) = self.connections.get(id) {
            let _ = outbox.send(message);
        }
    }

    fn broadcast(&self, message: ServerMessage) {
        for outbox in self.connections.values() {
            let _ = outbox.send(message.clone());
        }
    }

    fn broadcast_except(&self, skip: &PlayerId, message: ServerMessage) {
        for (id, outbox) in &self.connections {
            if id != skip {
                let _ = outbox.send(message.clone());
            }
        }
    }

    fn broadcast_reset(&self, message: &str) {
        self.broadcast(ServerMessage::RunReset(RunReset {
            session: self.snapshot(),
            level: self.level().clone(),
            leaderboard: self.leaderboard.entries().to_vec(),
            message: message.to_string(),
        }));
    }
}

fn flags_for(ability: AbilityKind) -> AbilityFlags {
    AbilityFlags {
        phase_active: ability == AbilityKind::PhaseWalker,
        dash_active: ability == AbilityKind::DashSprinter,
        ceiling_active: ability == AbilityKind::CeilingWalker,
    }
}
