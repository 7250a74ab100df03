//! Core types and the snapshot → reward pipeline for slingshot RL
//!
//! This crate provides the data model shared by the agent, environment and
//! trainer crates: snapshots, feature extraction, state-vector encoding,
//! reward evaluation and the environment trait.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

pub mod action;
pub mod encoder;
pub mod environment;
pub mod error;
pub mod features;
pub mod reward;
pub mod snapshot;
pub mod trajectory;

// Re-export core traits and types
pub use action::{Action, ActionSpace, Outcome};
pub use encoder::{EncoderConfig, StateEncoder, StateVector, STATE_DIM};
pub use environment::{Environment, Episode};
pub use error::{RLError, Result};
pub use features::{FeatureExtractor, FeatureSet, NormalizedFeatureSet};
pub use reward::{RewardBreakdown, RewardConfig, RewardEvaluator};
pub use snapshot::{AttemptHistory, GamePhase, Obstacle, Snapshot, Vec2};
pub use trajectory::{Trajectory, Transition};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Action, Environment, FeatureExtractor, GamePhase, Outcome, Result, RewardEvaluator,
        Snapshot, StateEncoder, StateVector, Transition,
    };
}
