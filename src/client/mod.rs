//! Client Simulation
//!
//! What a browser client does between server events: steps the local
//! body every frame, mirrors remote bodies from relayed snapshots and
//! throttles outbound state reports.
//!
//! ## Module Structure
//!
//! - `world`: Event handling, local stepping and ability requests
//! - `throttle`: Minimum spacing between state sends

pub mod world;
pub mod throttle;

pub use world::{ClientError, ClientPlayer, ClientWorld};
pub use throttle::{SendThrottle, SEND_INTERVAL_MS};
