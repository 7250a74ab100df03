//! Simulated environments for slingshot RL
//!
//! [`ProjectileSim`] stands in for the external game engine: a deterministic
//! ballistic level with targets, destructible obstacles, a projectile budget
//! and an explicit settle step after every launch.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod level;
pub mod sim;

// Re-export environments
pub use level::{LevelGenerator, LevelLayout};
pub use sim::{LevelSource, ProjectileSim, SimConfig};

// Re-export core types
pub use slingshot_rl_core::{Environment, GamePhase, Outcome, Snapshot};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{LevelLayout, ProjectileSim, SimConfig};
    pub use slingshot_rl_core::prelude::*;
}
