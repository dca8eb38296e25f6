//! Level Geometry
//!
//! Static level data: world bounds and gravity, ordered spawn points,
//! platform and wall rectangles, and one goal rectangle. Levels are
//! read-only once loaded.

use std::path::Path;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::{Rect, Vec2};

/// World bounds and gravity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    /// World width in pixels
    pub width: f32,
    /// World height in pixels
    pub height: f32,
    /// Downward acceleration in px/s²
    pub gravity: f32,
}

/// How a platform interacts with abilities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    /// Always collides.
    #[default]
    Solid,
    /// Collides unless the player is phasing.
    Wall,
}

/// A static collision rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    /// Rectangle geometry
    #[serde(flatten)]
    pub rect: Rect,
    /// Surface behaviour
    #[serde(default, rename = "type")]
    pub kind: SurfaceKind,
}

impl Platform {
    /// Solid platform.
    pub const fn solid(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { rect: Rect::new(x, y, width, height), kind: SurfaceKind::Solid }
    }

    /// Phase-passable wall.
    pub const fn wall(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { rect: Rect::new(x, y, width, height), kind: SurfaceKind::Wall }
    }

    /// True for phase-passable walls.
    #[inline]
    pub fn is_wall(&self) -> bool {
        self.kind == SurfaceKind::Wall
    }
}

/// A complete level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    /// Stable identifier (recorded on leaderboard entries)
    pub id: String,
    /// Display name
    pub name: String,
    /// Bounds and gravity
    pub world: WorldBounds,
    /// Spawn points, indexed by spawn index
    pub spawn_points: Vec<Vec2>,
    /// Static collision rectangles
    pub platforms: Vec<Platform>,
    /// Goal region
    pub goal: Rect,
}

/// Level loading / validation errors.
#[derive(Debug, Error)]
pub enum LevelError {
    /// Could not read the level file.
    #[error("failed to read level file: {0}")]
    Io(#[from] std::io::Error),
    /// Level file is not valid JSON.
    #[error("failed to parse level file: {0}")]
    Parse(#[from] serde_json::Error),
    /// Level file contained no levels.
    #[error("level file contains no levels")]
    Empty,
    /// Geometry is unusable.
    #[error("level '{id}' is invalid: {reason}")]
    Invalid {
        /// Offending level id
        id: String,
        /// What is wrong
        reason: String,
    },
}

impl Level {
    /// Spawn position for a spawn index. Out-of-range indices fall back to
    /// the first spawn point.
    pub fn spawn_point(&self, index: usize) -> Vec2 {
        self.spawn_points
            .get(index)
            .or_else(|| self.spawn_points.first())
            .copied()
            .unwrap_or(Vec2::ZERO)
    }

    /// True if a bounding box touches the goal region.
    #[inline]
    pub fn goal_reached_by(&self, bounds: &Rect) -> bool {
        bounds.overlaps(&self.goal)
    }

    /// Check the geometry is usable.
    pub fn validate(&self) -> Result<(), LevelError> {
        let invalid = |reason: &str| LevelError::Invalid {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        let world = &self.world;
        if !(world.width.is_finite() && world.width > 0.0
            && world.height.is_finite() && world.height > 0.0)
        {
            return Err(invalid("world dimensions must be positive"));
        }
        if !world.gravity.is_finite() {
            return Err(invalid("gravity must be finite"));
        }
        if self.spawn_points.is_empty() {
            return Err(invalid("at least one spawn point is required"));
        }
        if self.spawn_points.iter().any(|p| !p.is_finite()) {
            return Err(invalid("spawn points must be finite"));
        }
        if self.platforms.iter().any(|p| !p.rect.is_valid()) {
            return Err(invalid("platform geometry must be finite and non-negative"));
        }
        if !self.goal.is_valid() {
            return Err(invalid("goal geometry must be finite and non-negative"));
        }
        Ok(())
    }

    /// First built-in level: a staircase of ledges up to a flag.
    pub fn retro_training() -> Self {
        Self {
            id: "retro-training".to_string(),
            name: "Retro Run".to_string(),
            world: WorldBounds { width: 960.0, height: 540.0, gravity: 1800.0 },
            spawn_points: vec![
                Vec2::new(80.0, 420.0),
                Vec2::new(120.0, 420.0),
                Vec2::new(160.0, 420.0),
            ],
            platforms: vec![
                Platform::solid(0.0, 500.0, 960.0, 40.0),
                Platform::solid(200.0, 420.0, 160.0, 16.0),
                Platform::solid(380.0, 360.0, 160.0, 16.0),
                Platform::solid(560.0, 300.0, 160.0, 16.0),
                Platform::solid(740.0, 240.0, 140.0, 16.0),
            ],
            goal: Rect::new(860.0, 140.0, 24.0, 120.0),
        }
    }

    /// Second built-in level: a wall only the phase walker can cross,
    /// with the goal hanging from the ceiling.
    pub fn phase_gate() -> Self {
        Self {
            id: "phase-gate".to_string(),
            name: "Phase Gate".to_string(),
            world: WorldBounds { width: 1280.0, height: 600.0, gravity: 1800.0 },
            spawn_points: vec![
                Vec2::new(60.0, 500.0),
                Vec2::new(110.0, 500.0),
                Vec2::new(160.0, 500.0),
            ],
            platforms: vec![
                Platform::solid(0.0, 560.0, 1280.0, 40.0),
                Platform::wall(520.0, 300.0, 40.0, 260.0),
                Platform::solid(300.0, 420.0, 140.0, 16.0),
                Platform::solid(640.0, 0.0, 400.0, 24.0),
                Platform::solid(1100.0, 380.0, 180.0, 16.0),
            ],
            goal: Rect::new(1180.0, 24.0, 60.0, 80.0),
        }
    }

    /// All built-in levels in rotation order.
    pub fn builtin() -> Vec<Level> {
        vec![Level::retro_training(), Level::phase_gate()]
    }
}

/// Parse and validate levels from a JSON array.
pub fn parse_levels(json: &str) -> Result<Vec<Level>, LevelError> {
    let levels: Vec<Level> = serde_json::from_str(json)?;
    if levels.is_empty() {
        return Err(LevelError::Empty);
    }
    for level in &levels {
        level.validate()?;
    }
    Ok(levels)
}

/// Load and validate levels from a JSON file.
pub fn load_levels(path: impl AsRef<Path>) -> Result<Vec<Level>, LevelError> {
    let raw = std::fs::read_to_string(path)?;
    parse_levels(&raw)
}

/// Levels from `path` when given, otherwise the built-in set.
pub fn load_levels_or_builtin(path: Option<&Path>) -> Result<Vec<Level>, LevelError> {
    match path {
        Some(path) => load_levels(path),
        None => Ok(Level::builtin()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_levels_validate() {
        for level in Level::builtin() {
            level.validate().unwrap();
            assert_eq!(level.spawn_points.len(), 3);
        }
    }

    #[test]
    fn test_spawn_point_fallback() {
        let level = Level::retro_training();
        assert_eq!(level.spawn_point(1), Vec2::new(120.0, 420.0));
        assert_eq!(level.spawn_point(7), Vec2::new(80.0, 420.0));
    }

    #[test]
    fn test_goal_reached_by() {
        let level = Level::retro_training();
        // Standing on the last ledge under the flag
        let on_ledge = Rect::new(850.0, 192.0, 32.0, 48.0);
        assert!(level.goal_reached_by(&on_ledge));

        let at_spawn = Rect::new(80.0, 420.0, 32.0, 48.0);
        assert!(!level.goal_reached_by(&at_spawn));
    }

    #[test]
    fn test_parse_platform_type_tag() {
        let json = r#"[{
            "id": "t",
            "name": "Test",
            "world": { "width": 100, "height": 100, "gravity": 10 },
            "spawnPoints": [{ "x": 1, "y": 2 }],
            "platforms": [
                { "x": 0, "y": 90, "width": 100, "height": 10 },
                { "x": 50, "y": 0, "width": 5, "height": 90, "type": "wall" }
            ],
            "goal": { "x": 90, "y": 0, "width": 10, "height": 10 }
        }]"#;

        let levels = parse_levels(json).unwrap();
        assert_eq!(levels[0].platforms[0].kind, SurfaceKind::Solid);
        assert!(levels[0].platforms[1].is_wall());
    }

    #[test]
    fn test_parse_rejects_bad_geometry() {
        let json = r#"[{
            "id": "broken",
            "name": "Broken",
            "world": { "width": 0, "height": 100, "gravity": 10 },
            "spawnPoints": [{ "x": 1, "y": 2 }],
            "platforms": [],
            "goal": { "x": 90, "y": 0, "width": 10, "height": 10 }
        }]"#;

        assert!(matches!(parse_levels(json), Err(LevelError::Invalid { .. })));
        assert!(matches!(parse_levels("[]"), Err(LevelError::Empty)));
        assert!(matches!(parse_levels("{"), Err(LevelError::Parse(_))));
    }

    #[test]
    fn test_missing_level_file_is_io_error() {
        let missing = std::env::temp_dir().join("trio-run-no-such-levels.json");
        assert!(matches!(load_levels_or_builtin(Some(missing.as_path())), Err(LevelError::Io(_))));
        assert_eq!(load_levels_or_builtin(None).unwrap().len(), 2);
    }

    #[test]
    fn test_level_json_roundtrip_keeps_wall_tag() {
        let level = Level::phase_gate();
        let json = serde_json::to_string(&level).unwrap();
        assert!(json.contains("\"type\":\"wall\""));
        let parsed: Level = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, level);
    }
}
