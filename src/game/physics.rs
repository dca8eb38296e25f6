//! Per-Player Physics
//!
//! Kinematics for one player body: input acceleration, jumping, gravity
//! (optionally inverted), integration, minimum-penetration collision
//! against static rectangles and world-bound clamping.
//!
//! Only the locally controlled body is stepped. Remote bodies are
//! overwritten from server snapshots and only have their ability timers
//! ticked.

use serde::{Serialize, Deserialize};

use crate::core::{Rect, Vec2};
use crate::game::ability::AbilityKind;
use crate::game::level::Level;

/// Longest frame delta the simulation will integrate (seconds).
pub const MAX_FRAME_DELTA: f32 = 0.05;

/// Clamp a raw frame delta to `[0, MAX_FRAME_DELTA]`.
///
/// Long pauses (tab switches, debugger breaks) would otherwise tunnel
/// bodies through thin platforms.
#[inline]
pub fn cap_frame_delta(seconds: f32) -> f32 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0.0;
    }
    seconds.min(MAX_FRAME_DELTA)
}

/// Movement tuning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhysicsConstants {
    /// Player bounding box size
    pub player_size: Vec2,
    /// Max horizontal run speed (px/s)
    pub move_speed: f32,
    /// Horizontal acceleration while grounded (px/s²)
    pub ground_accel: f32,
    /// Horizontal acceleration while airborne (px/s²)
    pub air_accel: f32,
    /// Per-step velocity multiplier when grounded with no input
    pub ground_friction: f32,
    /// Per-step velocity multiplier when airborne with no input
    pub air_friction: f32,
    /// Horizontal speeds below this snap to zero
    pub stop_threshold: f32,
    /// Jump launch speed (px/s)
    pub jump_speed: f32,
    /// Terminal speed in either vertical direction (px/s)
    pub max_fall_speed: f32,
    /// Dash horizontal speed (px/s)
    pub dash_speed: f32,
    /// Dash duration (s)
    pub dash_duration: f32,
    /// Phase duration (s)
    pub phase_duration: f32,
    /// Gravity inversion duration (s)
    pub ceiling_duration: f32,
}

impl Default for PhysicsConstants {
    fn default() -> Self {
        Self {
            player_size: Vec2::new(32.0, 48.0),
            move_speed: 220.0,
            ground_accel: 1400.0,
            air_accel: 1000.0,
            ground_friction: 0.8,
            air_friction: 0.98,
            stop_threshold: 1.0,
            jump_speed: 520.0,
            max_fall_speed: 900.0,
            dash_speed: 560.0,
            dash_duration: 0.22,
            phase_duration: 1.5,
            ceiling_duration: 5.0,
        }
    }
}

/// Held controls for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MoveInput {
    /// Move left held
    pub left: bool,
    /// Move right held
    pub right: bool,
    /// Jump held
    pub jump: bool,
}

impl MoveInput {
    /// Net horizontal direction: -1, 0 or 1. Opposing keys cancel.
    #[inline]
    pub fn direction(&self) -> i8 {
        match (self.left, self.right) {
            (true, false) => -1,
            (false, true) => 1,
            _ => 0,
        }
    }
}

/// Which ability effects are currently active (wire form).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityFlags {
    /// Passing through walls
    #[serde(default)]
    pub phase_active: bool,
    /// Dashing
    #[serde(default)]
    pub dash_active: bool,
    /// Gravity inverted
    #[serde(default)]
    pub ceiling_active: bool,
}

impl AbilityFlags {
    /// True if any effect is active.
    pub fn any(&self) -> bool {
        self.phase_active || self.dash_active || self.ceiling_active
    }
}

/// Remaining durations of ability effects (seconds; zero = inactive).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AbilityEffects {
    /// Phase time left
    pub phase_timer: f32,
    /// Dash time left
    pub dash_timer: f32,
    /// Dash direction (-1 or 1)
    pub dash_direction: i8,
    /// Gravity inversion time left
    pub ceiling_timer: f32,
}

impl Default for AbilityEffects {
    fn default() -> Self {
        Self {
            phase_timer: 0.0,
            dash_timer: 0.0,
            dash_direction: 1,
            ceiling_timer: 0.0,
        }
    }
}

impl AbilityEffects {
    /// Current flags.
    pub fn flags(&self) -> AbilityFlags {
        AbilityFlags {
            phase_active: self.phase_timer > 0.0,
            dash_active: self.dash_timer > 0.0,
            ceiling_active: self.ceiling_timer > 0.0,
        }
    }
}

/// Outcome of one physics step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Bounding box touches the goal after the step
    pub in_goal: bool,
    /// An ability effect ran out during this step
    pub effect_expired: bool,
}

/// Kinematic state of one player body.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Body {
    /// Top-left corner
    pub position: Vec2,
    /// Velocity (px/s)
    pub velocity: Vec2,
    /// Bounding box size
    pub size: Vec2,
    /// Facing direction (-1 or 1)
    pub facing: i8,
    /// Standing on a surface relative to current gravity
    pub grounded: bool,
    /// 1 for normal gravity, -1 while inverted
    pub gravity_dir: f32,
    /// Active ability effects
    pub effects: AbilityEffects,
}

impl Body {
    /// Body at rest at `position`.
    pub fn at(position: Vec2, size: Vec2) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            size,
            facing: 1,
            grounded: false,
            gravity_dir: 1.0,
            effects: AbilityEffects::default(),
        }
    }

    /// Current bounding box.
    #[inline]
    pub fn bounds(&self) -> Rect {
        Rect::at(self.position, self.size)
    }

    /// Teleport to `position`, stop, and drop every ability effect.
    pub fn reset_to(&mut self, position: Vec2) {
        self.position = position;
        self.velocity = Vec2::ZERO;
        self.grounded = false;
        self.gravity_dir = 1.0;
        self.effects = AbilityEffects {
            dash_direction: self.effects.dash_direction,
            ..AbilityEffects::default()
        };
    }

    /// Start an ability effect.
    ///
    /// `direction` only matters for the dash. Velocity kicks are applied
    /// only to locally simulated bodies; remote bodies get their velocity
    /// from snapshots.
    pub fn activate(
        &mut self,
        kind: AbilityKind,
        direction: Option<i8>,
        constants: &PhysicsConstants,
        simulated: bool,
    ) {
        match kind {
            AbilityKind::PhaseWalker => {
                self.effects.phase_timer = constants.phase_duration;
            }
            AbilityKind::DashSprinter => {
                let dir = match direction.unwrap_or(self.facing) {
                    d if d < 0 => -1,
                    _ => 1,
                };
                self.effects.dash_timer = constants.dash_duration;
                self.effects.dash_direction = dir;
                if simulated {
                    self.velocity.x = dir as f32 * constants.dash_speed;
                }
            }
            AbilityKind::CeilingWalker => {
                self.effects.ceiling_timer = constants.ceiling_duration;
                self.gravity_dir = -1.0;
                self.grounded = false;
                if simulated {
                    self.velocity.y = -constants.jump_speed;
                }
            }
        }
    }

    /// Mirror effect flags reported by the server for a remote body.
    pub fn apply_flags(&mut self, flags: AbilityFlags, constants: &PhysicsConstants) {
        let effects = &mut self.effects;
        effects.phase_timer = match (flags.phase_active, effects.phase_timer > 0.0) {
            (true, true) => effects.phase_timer,
            (true, false) => constants.phase_duration,
            (false, _) => 0.0,
        };
        effects.dash_timer = match (flags.dash_active, effects.dash_timer > 0.0) {
            (true, true) => effects.dash_timer,
            (true, false) => constants.dash_duration,
            (false, _) => 0.0,
        };
        effects.ceiling_timer = match (flags.ceiling_active, effects.ceiling_timer > 0.0) {
            (true, true) => effects.ceiling_timer,
            (true, false) => constants.ceiling_duration,
            (false, _) => 0.0,
        };
        self.gravity_dir = if flags.ceiling_active { -1.0 } else { 1.0 };
    }

    /// Count down ability timers. Returns true if any effect ended.
    pub fn tick_ability_timers(&mut self, dt: f32) -> bool {
        let mut expired = false;
        let effects = &mut self.effects;

        if effects.phase_timer > 0.0 {
            effects.phase_timer -= dt;
            if effects.phase_timer <= 0.0 {
                effects.phase_timer = 0.0;
                expired = true;
            }
        }
        if effects.dash_timer > 0.0 {
            effects.dash_timer -= dt;
            if effects.dash_timer <= 0.0 {
                effects.dash_timer = 0.0;
                expired = true;
            }
        }
        if effects.ceiling_timer > 0.0 {
            effects.ceiling_timer -= dt;
            if effects.ceiling_timer <= 0.0 {
                effects.ceiling_timer = 0.0;
                self.gravity_dir = 1.0;
                expired = true;
            }
        }
        expired
    }

    /// Advance the body by `dt` seconds (already capped).
    pub fn step(
        &mut self,
        input: &MoveInput,
        level: &Level,
        constants: &PhysicsConstants,
        dt: f32,
    ) -> StepOutcome {
        // 1. Ability timers
        let effect_expired = self.tick_ability_timers(dt);

        // 2. Horizontal control
        self.apply_horizontal(input, constants, dt);

        // 3. Jump
        if input.jump && self.grounded {
            self.velocity.y = -self.gravity_dir * constants.jump_speed;
            self.grounded = false;
        }

        // 4. Gravity
        self.velocity.y += level.world.gravity * self.gravity_dir * dt;
        let max_fall = constants.max_fall_speed;
        self.velocity.y = self.velocity.y.clamp(-max_fall, max_fall);

        // 5. Integrate
        self.position = self.position + self.velocity.scale(dt);

        // 6. Collisions
        self.resolve_collisions(level);

        // 7. World bounds
        self.clamp_to_world(level);

        // 8. Local goal check
        StepOutcome {
            in_goal: level.goal_reached_by(&self.bounds()),
            effect_expired,
        }
    }

    fn apply_horizontal(&mut self, input: &MoveInput, constants: &PhysicsConstants, dt: f32) {
        if self.effects.dash_timer > 0.0 {
            self.velocity.x = self.effects.dash_direction as f32 * constants.dash_speed;
            return;
        }

        let direction = input.direction();
        if direction != 0 {
            let accel = if self.grounded { constants.ground_accel } else { constants.air_accel };
            self.velocity.x += direction as f32 * accel * dt;
            self.velocity.x = self.velocity.x.clamp(-constants.move_speed, constants.move_speed);
            self.facing = direction;
        } else {
            let friction =
                if self.grounded { constants.ground_friction } else { constants.air_friction };
            self.velocity.x *= friction;
            if self.velocity.x.abs() < constants.stop_threshold {
                self.velocity.x = 0.0;
            }
        }
    }

    /// Push the body out of every overlapping platform along the axis of
    /// least penetration.
    ///
    /// Clears `grounded`, then sets it when a push lands the body on a
    /// surface that is "down" for the current gravity direction. Walls are
    /// skipped while phasing. A body that overlaps nothing is left as is.
    pub fn resolve_collisions(&mut self, level: &Level) {
        self.grounded = false;
        let phasing = self.effects.phase_timer > 0.0;
        let mut rect = self.bounds();

        for platform in &level.platforms {
            if phasing && platform.is_wall() {
                continue;
            }
            let tile = platform.rect;
            let pen = match rect.penetration(&tile) {
                Some(pen) => pen,
                None => continue,
            };

            if pen.min_horizontal() < pen.min_vertical() {
                if pen.left < pen.right {
                    rect.x = tile.x - rect.width;
                } else {
                    rect.x = tile.right();
                }
                self.velocity.x = 0.0;
            } else if pen.up < pen.down {
                // Pushed up: landed on top of the tile
                rect.y = tile.y - rect.height;
                if self.gravity_dir > 0.0 {
                    self.grounded = true;
                    self.velocity.y = 0.0;
                } else {
                    self.velocity.y = self.velocity.y.min(0.0);
                }
            } else {
                // Pushed down: hit the underside of the tile
                rect.y = tile.bottom();
                if self.gravity_dir < 0.0 {
                    self.grounded = true;
                    self.velocity.y = 0.0;
                } else {
                    self.velocity.y = self.velocity.y.max(0.0);
                }
            }
        }

        self.position = rect.origin();
    }

    /// Keep the body inside the world. The bound acting as floor for the
    /// current gravity direction grounds the body.
    pub fn clamp_to_world(&mut self, level: &Level) {
        let world = &level.world;

        if self.position.x < 0.0 {
            self.position.x = 0.0;
            self.velocity.x = self.velocity.x.max(0.0);
        }
        let max_x = world.width - self.size.x;
        if self.position.x > max_x {
            self.position.x = max_x;
            self.velocity.x = self.velocity.x.min(0.0);
        }

        if self.position.y < 0.0 {
            self.position.y = 0.0;
            if self.gravity_dir < 0.0 {
                self.grounded = true;
                self.velocity.y = self.velocity.y.max(0.0);
            } else {
                self.velocity.y = 0.0;
            }
        }
        let max_y = world.height - self.size.y;
        if self.position.y > max_y {
            self.position.y = max_y;
            if self.gravity_dir > 0.0 {
                self.grounded = true;
                self.velocity.y = self.velocity.y.min(0.0);
            } else {
                self.velocity.y = 0.0;
            }
        }
    }
}
