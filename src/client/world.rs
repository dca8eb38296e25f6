//! Client World
//!
//! The client half of a run: consumes every server event, steps the
//! locally controlled body once per frame, mirrors remote bodies from
//! relayed snapshots and produces the messages to send back.
//!
//! Remote bodies are never simulated. Their position and velocity are
//! overwritten by the latest `playerState` or `sessionUpdate` to arrive,
//! with no interpolation and no sequence numbers.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::client::throttle::SendThrottle;
use crate::game::{
    AbilityDef, AbilityKind, Body, LeaderboardEntry, Level, MoveInput, PhysicsConstants,
    PlayerId, cap_frame_delta,
};
use crate::network::protocol::{
    AbilityActivation, ClientMessage, PlayerSnapshot, PlayerStateReport, RegisterRequest,
    RejectCode, ServerMessage, SessionSnapshot, UseAbilityRequest,
};
use crate::network::session::RunPhase;

/// Local refusals, raised before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Name blank after trimming.
    #[error("name is blank")]
    BlankName,
    /// Not registered with the server yet.
    #[error("not joined")]
    NotJoined,
    /// Joined as a spectator.
    #[error("no ability assigned")]
    NoAbility,
    /// Run is waiting or completed.
    #[error("run is not active")]
    RunNotActive,
    /// Ability already used this run.
    #[error("ability already used")]
    AbilityUsed,
    /// An effect is still running.
    #[error("ability effect still active")]
    EffectActive,
}

/// One player as the client sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientPlayer {
    /// Connection id
    pub id: PlayerId,
    /// Display name
    pub name: String,
    /// Assigned ability
    pub ability: Option<AbilityKind>,
    /// Ability used this run
    pub ability_used: bool,
    /// Reached the goal this run (server view)
    pub reached_goal: bool,
    /// Spawn slot
    pub spawn_index: usize,
    /// Kinematic state
    pub body: Body,
}

impl ClientPlayer {
    fn from_snapshot(snapshot: &PlayerSnapshot, constants: &PhysicsConstants) -> Self {
        let mut body = Body::at(snapshot.position, constants.player_size);
        body.velocity = snapshot.velocity;
        body.facing = snapshot.facing;
        body.grounded = snapshot.grounded;
        body.apply_flags(snapshot.ability_flags, constants);
        Self {
            id: snapshot.id,
            name: snapshot.name.clone(),
            ability: snapshot.ability,
            ability_used: snapshot.ability_used,
            reached_goal: snapshot.reached_goal,
            spawn_index: snapshot.spawn_index,
            body,
        }
    }

    fn update_meta(&mut self, snapshot: &PlayerSnapshot) {
        self.name = snapshot.name.clone();
        self.ability = snapshot.ability;
        self.ability_used = snapshot.ability_used;
        self.reached_goal = snapshot.reached_goal;
        self.spawn_index = snapshot.spawn_index;
    }

    /// Overwrite kinematics from the server's copy. Remote players only.
    fn update_body(&mut self, snapshot: &PlayerSnapshot, constants: &PhysicsConstants) {
        self.body.position = snapshot.position;
        self.body.velocity = snapshot.velocity;
        self.body.facing = if snapshot.facing < 0 { -1 } else { 1 };
        self.body.grounded = snapshot.grounded;
        self.body.apply_flags(snapshot.ability_flags, constants);
    }

    /// True if the player holds no ability.
    pub fn is_spectator(&self) -> bool {
        self.ability.is_none()
    }
}

/// Run timer as displayed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct TimerDisplay {
    running: bool,
    start_ms: u64,
    elapsed_ms: u64,
}

/// Client-side state of the game.
#[derive(Debug)]
pub struct ClientWorld {
    constants: PhysicsConstants,
    self_id: Option<PlayerId>,
    joined: bool,
    level: Option<Level>,
    abilities: Vec<AbilityDef>,
    leaderboard: Vec<LeaderboardEntry>,
    session: Option<SessionSnapshot>,
    players: BTreeMap<PlayerId, ClientPlayer>,
    timer: TimerDisplay,
    /// Latest human-readable server message.
    message: Option<String>,
    join_error: Option<String>,
    team_label: Option<String>,
    /// Local body touched the goal during this run.
    local_in_goal: bool,
    /// Optimistic activation awaiting the server's answer.
    ability_pending: bool,
    throttle: SendThrottle,
}

impl Default for ClientWorld {
    fn default() -> Self {
        Self::new(PhysicsConstants::default())
    }
}

impl ClientWorld {
    /// Empty world; populated by `initialData`.
    pub fn new(constants: PhysicsConstants) -> Self {
        Self {
            constants,
            self_id: None,
            joined: false,
            level: None,
            abilities: Vec::new(),
            leaderboard: Vec::new(),
            session: None,
            players: BTreeMap::new(),
            timer: TimerDisplay::default(),
            message: None,
            join_error: None,
            team_label: None,
            local_in_goal: false,
            ability_pending: false,
            throttle: SendThrottle::default(),
        }
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Build a registration request.
    pub fn register(&mut self, name: &str) -> Result<ClientMessage, ClientError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::BlankName);
        }
        self.join_error = None;
        Ok(ClientMessage::RegisterPlayer(RegisterRequest { name: name.to_string() }))
    }

    /// Advance one rendered frame.
    ///
    /// Steps the local body (unless the run is completed), ticks remote
    /// ability timers and returns a `playerState` report when the send
    /// throttle allows one.
    pub fn frame(
        &mut self,
        input: &MoveInput,
        delta_seconds: f32,
        now_ms: u64,
    ) -> Option<ClientMessage> {
        let dt = cap_frame_delta(delta_seconds);
        let phase = self.phase();
        let local_id = self.self_id;

        for player in self.players.values_mut() {
            if Some(player.id) != local_id {
                player.body.tick_ability_timers(dt);
            }
        }

        let level = self.level.as_ref()?;
        if !self.joined {
            return None;
        }
        let local = self.players.get_mut(&local_id?)?;
        if local.is_spectator() {
            return None;
        }

        if phase != Some(RunPhase::Completed) {
            let outcome = local.body.step(input, level, &self.constants, dt);
            if outcome.in_goal && phase == Some(RunPhase::Running) && !self.local_in_goal {
                self.local_in_goal = true;
                debug!("Local player touched the goal");
            }
            if outcome.effect_expired {
                debug!("Local ability effect ended");
            }
        }

        if !self.throttle.ready(now_ms) {
            return None;
        }
        let body = &local.body;
        Some(ClientMessage::PlayerState(PlayerStateReport {
            position: body.position,
            velocity: body.velocity,
            facing: body.facing,
            moving: input.direction() != 0 || input.jump,
            grounded: body.grounded,
            ability_flags: body.effects.flags(),
        }))
    }

    /// Activate the local ability optimistically and build the request.
    pub fn request_ability(&mut self) -> Result<ClientMessage, ClientError> {
        if !self.joined {
            return Err(ClientError::NotJoined);
        }
        let phase = self.phase();
        let local_id = self.self_id.ok_or(ClientError::NotJoined)?;
        let local = self.players.get_mut(&local_id).ok_or(ClientError::NotJoined)?;
        let ability = local.ability.ok_or(ClientError::NoAbility)?;

        if !matches!(phase, Some(RunPhase::Active) | Some(RunPhase::Running)) {
            return Err(ClientError::RunNotActive);
        }
        if local.ability_used {
            return Err(ClientError::AbilityUsed);
        }
        if local.body.effects.flags().any() {
            return Err(ClientError::EffectActive);
        }

        let direction = if local.body.facing < 0 { -1 } else { 1 };
        local.body.activate(ability, Some(direction), &self.constants, true);
        local.ability_used = true;
        self.ability_pending = true;

        Ok(ClientMessage::UseAbility(UseAbilityRequest { direction: Some(direction) }))
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Apply one server event.
    pub fn apply(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::InitialData(data) => {
                self.self_id = Some(data.self_id);
                self.level = Some(data.level);
                self.abilities = data.abilities;
                self.leaderboard = data.leaderboard;
                self.sync_session(data.session);
            }
            ServerMessage::JoinAccepted(accepted) => {
                self.self_id = Some(accepted.player.id);
                self.joined = true;
                self.join_error = None;
                let player = ClientPlayer::from_snapshot(&accepted.player, &self.constants);
                info!(
                    "Joined as {} ({})",
                    player.name,
                    accepted.ability.as_ref().map(|a| a.name.as_str()).unwrap_or("spectator"),
                );
                self.players.insert(player.id, player);
            }
            ServerMessage::JoinRejected(rejection) => {
                self.join_error = Some(rejection.reason);
            }
            ServerMessage::SessionUpdate(snapshot) => self.sync_session(snapshot),
            ServerMessage::RunReset(reset) => {
                if self.level.as_ref().is_some_and(|level| level.id != reset.level.id) {
                    info!("Level changed to {}", reset.level.id);
                }
                self.level = Some(reset.level);
                self.leaderboard = reset.leaderboard;
                self.message = Some(reset.message);
                self.timer = TimerDisplay::default();
                self.local_in_goal = false;
                self.ability_pending = false;
                self.team_label = None;
                self.throttle.reset();
                self.sync_session(reset.session);
                self.snap_to_snapshot();
            }
            ServerMessage::RunCompleted(completed) => {
                self.timer.running = false;
                self.timer.elapsed_ms = completed.time_ms;
                self.leaderboard = completed.leaderboard;
                self.team_label = Some(completed.team_name);
                self.message = Some("Level complete!".to_string());
            }
            ServerMessage::TimerStarted(started) => {
                self.timer = TimerDisplay {
                    running: true,
                    start_ms: started.start_time,
                    elapsed_ms: 0,
                };
                self.message = None;
            }
            ServerMessage::PlayerState(relay) => {
                if Some(relay.id) == self.self_id {
                    return;
                }
                if let Some(player) = self.players.get_mut(&relay.id) {
                    player.body.position = relay.position;
                    player.body.velocity = relay.velocity;
                    player.body.facing = if relay.facing < 0 { -1 } else { 1 };
                    player.body.grounded = relay.grounded;
                    player.body.apply_flags(relay.ability_flags, &self.constants);
                }
            }
            ServerMessage::AbilityUsed(activation) => self.apply_remote_ability(&activation),
            ServerMessage::AbilityConfirmed(activation) => {
                if Some(activation.player_id) != self.self_id {
                    return;
                }
                if self.ability_pending {
                    // Already applied when requested
                    self.ability_pending = false;
                } else if let Some(local) = self.players.get_mut(&activation.player_id) {
                    let direction = activation.direction;
                    local.body.activate(activation.ability, direction, &self.constants, true);
                    local.ability_used = true;
                }
            }
            ServerMessage::AbilityDenied(rejection) => {
                self.ability_pending = false;
                if let Some(local) = self.self_id.and_then(|id| self.players.get_mut(&id)) {
                    let position = local.body.position;
                    let velocity = local.body.velocity;
                    local.body.reset_to(position);
                    local.body.velocity = velocity;
                    if rejection.code != RejectCode::AbilityAlreadyUsed {
                        local.ability_used = false;
                    }
                }
                self.message = Some(rejection.reason);
            }
            ServerMessage::Pong { timestamp, server_time } => {
                debug!("Pong {} (server time {})", timestamp, server_time);
            }
            ServerMessage::Error(error) => {
                debug!("Server error {:?}: {}", error.code, error.message);
            }
        }
    }

    fn apply_remote_ability(&mut self, activation: &AbilityActivation) {
        if Some(activation.player_id) == self.self_id {
            return;
        }
        if let Some(player) = self.players.get_mut(&activation.player_id) {
            player.body.activate(activation.ability, activation.direction, &self.constants, false);
            player.ability_used = true;
        }
    }

    /// Create, update and drop players to match a snapshot and take the
    /// timer from it. The local body is never overwritten here.
    fn sync_session(&mut self, snapshot: SessionSnapshot) {
        self.players.retain(|id, _| snapshot.players.iter().any(|p| p.id == *id));
        for entry in &snapshot.players {
            match self.players.get_mut(&entry.id) {
                Some(player) => {
                    player.update_meta(entry);
                    if Some(entry.id) != self.self_id {
                        player.update_body(entry, &self.constants);
                    }
                }
                None => {
                    let player = ClientPlayer::from_snapshot(entry, &self.constants);
                    self.players.insert(entry.id, player);
                }
            }
        }

        self.timer = match (snapshot.timer_running, snapshot.timer_start) {
            (true, Some(start_ms)) => TimerDisplay { running: true, start_ms, elapsed_ms: 0 },
            _ => TimerDisplay {
                running: false,
                start_ms: 0,
                elapsed_ms: snapshot.completion_time.unwrap_or(0),
            },
        };

        if self.joined && !self.self_id.is_some_and(|id| self.players.contains_key(&id)) {
            self.joined = false;
        }
        self.session = Some(snapshot);
    }

    /// Put every body where the current snapshot says, clearing effects.
    fn snap_to_snapshot(&mut self) {
        let snapshot = match &self.session {
            Some(snapshot) => snapshot,
            None => return,
        };
        for entry in &snapshot.players {
            if let Some(player) = self.players.get_mut(&entry.id) {
                player.body.reset_to(entry.position);
                player.body.facing = entry.facing;
            }
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Elapsed run time to display at `now_ms`.
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        if self.timer.running {
            now_ms.saturating_sub(self.timer.start_ms)
        } else {
            self.timer.elapsed_ms
        }
    }

    /// True while the run timer is counting.
    pub fn timer_running(&self) -> bool {
        self.timer.running
    }

    /// One-line status for the HUD.
    pub fn status_line(&self) -> String {
        if !self.joined {
            if let Some(error) = &self.join_error {
                return error.clone();
            }
        }
        let session = match &self.session {
            Some(session) => session,
            None => return "Connecting...".to_string(),
        };
        match session.phase {
            RunPhase::WaitingForPlayers => {
                if let Some(message) = &self.message {
                    return message.clone();
                }
                let present = session.players.iter().filter(|p| !p.spectator).count();
                let missing = session.team_size.saturating_sub(present);
                let noun = if missing == 1 { "player" } else { "players" };
                format!("Waiting for {} {}...", missing, noun)
            }
            RunPhase::Active => "Team ready. Start moving!".to_string(),
            RunPhase::Running => {
                self.message.clone().unwrap_or_else(|| "Run in progress".to_string())
            }
            RunPhase::Completed => "Level complete!".to_string(),
        }
    }

    /// Current phase as last reported by the server.
    pub fn phase(&self) -> Option<RunPhase> {
        self.session.as_ref().map(|s| s.phase)
    }

    /// Connection id assigned by the server.
    pub fn self_id(&self) -> Option<PlayerId> {
        self.self_id
    }

    /// True once registration was accepted.
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Last join rejection reason.
    pub fn join_error(&self) -> Option<&str> {
        self.join_error.as_deref()
    }

    /// Current level.
    pub fn level(&self) -> Option<&Level> {
        self.level.as_ref()
    }

    /// Ability catalog.
    pub fn abilities(&self) -> &[AbilityDef] {
        &self.abilities
    }

    /// Best runs.
    pub fn leaderboard(&self) -> &[LeaderboardEntry] {
        &self.leaderboard
    }

    /// Team label of the last completed run.
    pub fn team_label(&self) -> Option<&str> {
        self.team_label.as_deref()
    }

    /// Last session snapshot.
    pub fn session(&self) -> Option<&SessionSnapshot> {
        self.session.as_ref()
    }

    /// Player by id.
    pub fn player(&self, id: &PlayerId) -> Option<&ClientPlayer> {
        self.players.get(id)
    }

    /// All known players.
    pub fn players(&self) -> impl Iterator<Item = &ClientPlayer> {
        self.players.values()
    }

    /// The locally controlled player.
    pub fn local_player(&self) -> Option<&ClientPlayer> {
        self.self_id.and_then(|id| self.players.get(&id))
    }

    /// Mutable local body, for tooling that places the player directly.
    pub fn local_body_mut(&mut self) -> Option<&mut Body> {
        let id = self.self_id?;
        self.players.get_mut(&id).map(|p| &mut p.body)
    }

    /// True if the local body touched the goal during this run.
    pub fn local_in_goal(&self) -> bool {
        self.local_in_goal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    use crate::core::{ManualClock, Vec2};
    use crate::game::AbilityFlags;
    use crate::network::protocol::{PlayerStateRelay, Rejection, RunReset};
    use crate::network::session::{RunSession, SessionConfig, SessionEvent};
    use crate::storage::MemoryStore;

    const FRAME: f32 = 1.0 / 60.0;

    struct Seat {
        id: PlayerId,
        inbox: mpsc::UnboundedReceiver<ServerMessage>,
        world: ClientWorld,
    }

    struct Table {
        session: RunSession,
        _events: mpsc::UnboundedReceiver<SessionEvent>,
        clock: ManualClock,
        seats: Vec<Seat>,
    }

    impl Table {
        fn new() -> Self {
            let (tx, events) = mpsc::unbounded_channel();
            let clock = ManualClock::new(10_000);
            let session = RunSession::new(
                SessionConfig::default(),
                vec![Level::retro_training()],
                Box::new(MemoryStore::new()),
                Arc::new(clock.clone()),
                tx,
            );
            Self { session, _events: events, clock, seats: Vec::new() }
        }

        fn sit(&mut self, n: u8) -> usize {
            let id = PlayerId::from_bytes([n; 16]);
            let (outbox, inbox) = mpsc::unbounded_channel();
            self.session.handle(SessionEvent::Connected { id, outbox });
            self.seats.push(Seat { id, inbox, world: ClientWorld::default() });
            self.pump();
            self.seats.len() - 1
        }

        fn send(&mut self, seat: usize, message: ClientMessage) {
            let id = self.seats[seat].id;
            self.session.handle(SessionEvent::Message { id, message });
            self.pump();
        }

        fn join(&mut self, seat: usize, name: &str) {
            let msg = self.seats[seat].world.register(name).unwrap();
            self.send(seat, msg);
        }

        fn pump(&mut self) {
            for seat in &mut self.seats {
                while let Ok(msg) = seat.inbox.try_recv() {
                    seat.world.apply(msg);
                }
            }
        }

        fn full_team(&mut self) {
            for (n, name) in [(1, "A"), (2, "B"), (3, "C")] {
                let seat = self.sit(n);
                self.join(seat, name);
            }
        }
    }

    fn right() -> MoveInput {
        MoveInput { right: true, ..Default::default() }
    }

    #[tokio::test]
    async fn test_join_flow_updates_world() {
        let mut table = Table::new();
        let a = table.sit(1);

        let world = &table.seats[a].world;
        assert!(world.level().is_some());
        assert_eq!(world.abilities().len(), 3);
        assert!(!world.is_joined());
        assert_eq!(world.status_line(), "Waiting for 3 players...");

        table.join(a, "  A  ");
        let world = &table.seats[a].world;
        assert!(world.is_joined());
        assert_eq!(world.local_player().unwrap().name, "A");
        assert_eq!(world.status_line(), "Waiting for 2 players...");

        let b = table.sit(2);
        table.join(b, "B");
        let c = table.sit(3);
        table.join(c, "C");

        for seat in &table.seats {
            assert_eq!(seat.world.phase(), Some(RunPhase::Active));
            assert_eq!(seat.world.status_line(), "Team ready. Start moving!");
            assert_eq!(seat.world.players().count(), 3);
        }
        let spawn = Level::retro_training().spawn_point(2);
        assert_eq!(table.seats[c].world.local_player().unwrap().body.position, spawn);
    }

    #[test]
    fn test_blank_name_not_sent() {
        let mut world = ClientWorld::default();
        assert_eq!(world.register("   "), Err(ClientError::BlankName));
    }

    #[tokio::test]
    async fn test_join_rejection_shown() {
        let mut table = Table::new();
        table.full_team();
        let d = table.sit(4);
        table.join(d, "D");

        let world = &table.seats[d].world;
        assert!(!world.is_joined());
        assert_eq!(world.join_error(), Some("The team is full. Try again after the current run."));
        assert_eq!(world.status_line(), world.join_error().unwrap());
    }

    #[tokio::test]
    async fn test_frame_throttles_reports() {
        let mut table = Table::new();
        table.full_team();
        let world = &mut table.seats[0].world;

        let sent = (0..10u64)
            .filter(|i| world.frame(&right(), FRAME, i * 16).is_some())
            .count();
        assert_eq!(sent, 4);
    }

    #[tokio::test]
    async fn test_first_move_starts_timer_everywhere() {
        let mut table = Table::new();
        table.full_team();

        let report = table.seats[0].world.frame(&right(), FRAME, 0).unwrap();
        match &report {
            ClientMessage::PlayerState(state) => assert!(state.moving),
            other => panic!("expected playerState, got {:?}", other),
        }
        table.send(0, report);

        for seat in &table.seats {
            assert!(seat.world.timer_running());
            assert_eq!(seat.world.phase(), Some(RunPhase::Running));
            assert_eq!(seat.world.elapsed_ms(10_750), 750);
        }

        // The mover's state reached the others
        let a = table.seats[0].id;
        let local = table.seats[0].world.local_player().unwrap().body.position;
        assert_eq!(table.seats[1].world.player(&a).unwrap().body.position, local);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_through_clients() {
        let mut table = Table::new();
        table.full_team();

        let start = table.seats[0].world.frame(&right(), FRAME, 0).unwrap();
        table.send(0, start);
        table.clock.advance(3_000);

        for seat in 0..3 {
            let body = table.seats[seat].world.local_body_mut().unwrap();
            body.position = Vec2::new(850.0, 192.0);
            body.velocity = Vec2::ZERO;
            let world = &mut table.seats[seat].world;
            let report = world.frame(&MoveInput::default(), FRAME, 1_000).unwrap();
            assert!(table.seats[seat].world.local_in_goal());
            table.send(seat, report);
        }

        for seat in &table.seats {
            assert_eq!(seat.world.phase(), Some(RunPhase::Completed));
            assert!(!seat.world.timer_running());
            assert_eq!(seat.world.elapsed_ms(99_999), 3_000);
            assert_eq!(seat.world.team_label(), Some("A, B, C"));
            assert_eq!(seat.world.leaderboard().len(), 1);
            assert_eq!(seat.world.status_line(), "Level complete!");
        }

        // Bodies stay put once the run is over
        let before = table.seats[0].world.local_player().unwrap().body;
        table.seats[0].world.frame(&right(), FRAME, 2_000);
        assert_eq!(table.seats[0].world.local_player().unwrap().body, before);
    }

    #[tokio::test]
    async fn test_request_ability_gating() {
        let mut world = ClientWorld::default();
        assert_eq!(world.request_ability(), Err(ClientError::NotJoined));

        let mut table = Table::new();
        let a = table.sit(1);
        table.join(a, "A");
        assert_eq!(table.seats[a].world.request_ability(), Err(ClientError::RunNotActive));

        let b = table.sit(2);
        table.join(b, "B");
        let c = table.sit(3);
        table.join(c, "C");

        let msg = table.seats[a].world.request_ability().unwrap();
        assert_eq!(msg, ClientMessage::UseAbility(UseAbilityRequest { direction: Some(1) }));
        let flags = table.seats[a].world.local_player().unwrap().body.effects.flags();
        assert!(flags.phase_active);
        assert_eq!(table.seats[a].world.request_ability(), Err(ClientError::AbilityUsed));

        // Other clients see the effect once the server relays it
        table.send(a, msg);
        let id = table.seats[a].id;
        assert!(table.seats[b].world.player(&id).unwrap().body.effects.flags().phase_active);
    }

    #[tokio::test]
    async fn test_confirmation_does_not_reapply() {
        let mut table = Table::new();
        table.full_team();

        let msg = table.seats[0].world.request_ability().unwrap();
        for i in 0..30u64 {
            table.seats[0].world.frame(&MoveInput::default(), FRAME, i * 16);
        }
        let remaining = table.seats[0].world.local_player().unwrap().body.effects.phase_timer;
        assert!(remaining < 1.5);

        table.send(0, msg);
        let after = table.seats[0].world.local_player().unwrap().body.effects.phase_timer;
        assert_eq!(after, remaining);
    }

    #[tokio::test]
    async fn test_denial_clears_local_effect() {
        let mut table = Table::new();
        table.full_team();
        let world = &mut table.seats[2].world;

        world.request_ability().unwrap();
        assert_eq!(world.local_player().unwrap().body.gravity_dir, -1.0);

        world.apply(ServerMessage::AbilityDenied(Rejection {
            code: RejectCode::RunNotActive,
            reason: "The run is not active.".into(),
        }));

        let local = world.local_player().unwrap();
        assert!(!local.body.effects.flags().any());
        assert_eq!(local.body.gravity_dir, 1.0);
        assert!(!local.ability_used);
    }

    #[tokio::test]
    async fn test_remote_state_last_write_wins() {
        let mut table = Table::new();
        table.full_team();
        let b = table.seats[1].id;
        let world = &mut table.seats[0].world;

        let relay = |x: f32| ServerMessage::PlayerState(PlayerStateRelay {
            id: b,
            position: Vec2::new(x, 400.0),
            velocity: Vec2::new(50.0, 0.0),
            facing: 1,
            grounded: true,
            ability_flags: AbilityFlags::default(),
        });

        // Newer snapshot delivered first, stale one second: the stale one sticks
        world.apply(relay(300.0));
        world.apply(relay(200.0));
        assert_eq!(world.player(&b).unwrap().body.position, Vec2::new(200.0, 400.0));

        // Remote bodies are not simulated
        world.frame(&right(), FRAME, 0);
        assert_eq!(world.player(&b).unwrap().body.position, Vec2::new(200.0, 400.0));
    }

    #[tokio::test]
    async fn test_session_update_keeps_local_body() {
        let mut table = Table::new();
        table.full_team();

        for i in 0..20u64 {
            table.seats[0].world.frame(&right(), FRAME, i * 40);
        }
        let moved = table.seats[0].world.local_player().unwrap().body.position;
        let snapshot = table.session.snapshot();
        table.seats[0].world.apply(ServerMessage::SessionUpdate(snapshot));

        assert_eq!(table.seats[0].world.local_player().unwrap().body.position, moved);
    }

    #[tokio::test]
    async fn test_reset_after_leave_snaps_to_spawn() {
        let mut table = Table::new();
        table.full_team();

        let start = table.seats[0].world.frame(&right(), FRAME, 0).unwrap();
        table.send(0, start);
        for i in 1..30u64 {
            table.seats[1].world.frame(&right(), FRAME, i * 40);
        }
        table.seats[1].world.request_ability().unwrap();

        let leaver = table.seats[2].id;
        table.session.handle(SessionEvent::Disconnected { id: leaver });
        table.pump();

        let world = &table.seats[1].world;
        assert_eq!(world.phase(), Some(RunPhase::WaitingForPlayers));
        assert_eq!(world.status_line(), "C left the run. Waiting for players...");
        assert!(!world.timer_running());
        assert!(world.player(&leaver).is_none());

        let local = world.local_player().unwrap();
        assert_eq!(local.body.position, Level::retro_training().spawn_point(1));
        assert!(!local.body.effects.flags().any());
    }

    #[tokio::test]
    async fn test_reset_carries_rotated_level() {
        let mut table = Table::new();
        table.full_team();
        let mut snapshot = table.session.snapshot();
        snapshot.level_id = "phase-gate".into();
        let level = Level::phase_gate();
        let spawn = level.spawn_point(0);
        snapshot.players[0].position = spawn;

        let world = &mut table.seats[0].world;
        world.apply(ServerMessage::RunReset(RunReset {
            session: snapshot,
            level,
            leaderboard: Vec::new(),
            message: "New run! Start moving to begin the timer.".into(),
        }));

        assert_eq!(world.level().unwrap().id, "phase-gate");
        assert_eq!(world.local_player().unwrap().body.position, spawn);
    }

    #[tokio::test]
    async fn test_late_joiner_sees_running_timer() {
        let mut table = Table::new();
        table.full_team();
        let start = table.seats[0].world.frame(&right(), FRAME, 0).unwrap();
        table.send(0, start);

        table.clock.advance(2_000);
        let observer = table.sit(9);

        let world = &table.seats[observer].world;
        assert_eq!(world.phase(), Some(RunPhase::Running));
        assert!(world.timer_running());
        assert_eq!(world.elapsed_ms(12_000), 2_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_joiner_sees_completion_time() {
        let mut table = Table::new();
        table.full_team();
        let start = table.seats[0].world.frame(&right(), FRAME, 0).unwrap();
        table.send(0, start);
        table.clock.advance(4_500);

        for seat in 0..3 {
            let body = table.seats[seat].world.local_body_mut().unwrap();
            body.position = Vec2::new(850.0, 192.0);
            body.velocity = Vec2::ZERO;
            let world = &mut table.seats[seat].world;
            let report = world.frame(&MoveInput::default(), FRAME, 1_000).unwrap();
            table.send(seat, report);
        }
        assert_eq!(table.session.phase(), RunPhase::Completed);

        let observer = table.sit(9);
        let world = &table.seats[observer].world;
        assert!(!world.timer_running());
        assert_eq!(world.elapsed_ms(99_999), 4_500);
    }

    #[tokio::test]
    async fn test_session_update_moves_remote_bodies() {
        let mut table = Table::new();
        table.full_team();
        let local_before = table.seats[0].world.local_player().unwrap().body.position;
        let b = table.seats[1].id;

        let mut snapshot = table.session.snapshot();
        snapshot.players[0].position = Vec2::new(500.0, 100.0);
        snapshot.players[1].position = Vec2::new(400.0, 300.0);
        snapshot.players[1].velocity = Vec2::new(-80.0, 0.0);

        let world = &mut table.seats[0].world;
        world.apply(ServerMessage::SessionUpdate(snapshot));

        let remote = world.player(&b).unwrap();
        assert_eq!(remote.body.position, Vec2::new(400.0, 300.0));
        assert_eq!(remote.body.velocity, Vec2::new(-80.0, 0.0));
        assert_eq!(world.local_player().unwrap().body.position, local_before);
    }
}
