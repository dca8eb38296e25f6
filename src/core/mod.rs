//! Core primitives.
//!
//! Geometry and time types shared by the server rules and the client
//! simulation. Nothing in this module performs I/O.

pub mod vec2;
pub mod rect;
pub mod clock;

// Re-export core types
pub use vec2::Vec2;
pub use rect::{Rect, Penetration};
pub use clock::{Clock, SystemClock, ManualClock};
