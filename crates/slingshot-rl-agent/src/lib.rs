//! Policy learning and action selection for slingshot RL
//!
//! This crate provides:
//! - An actor-critic policy/value network trained with A2C
//! - Experience replay and exploration schedules
//! - The exploration controller (heuristic, random, learned policy)
//! - Local and TCP learners behind one trait

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

pub mod buffer;
pub mod exploration;
pub mod learner;
pub mod policy;
pub mod utils;

// Re-export policy components
pub use policy::{
    create_policy_network, ActorCriticNetwork, LossStats, NetworkConfig, PolicyNetwork,
    PolicyOutput,
};

// Re-export action selection
pub use exploration::{
    ActionSource, Decision, DecisionContext, DecisionKind, ExplorationController, HeuristicConfig,
};
pub use learner::{Learner, LearnerConfig, LocalLearner, RemoteLearner, ReplayConfig};

// Re-export utilities
pub use buffer::{PrioritizedBatch, PrioritizedReplayBuffer, PriorityConfig, ReplayBuffer};
pub use utils::{linear_slope, ExplorationSchedule, RollingWindow};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ActionSource, ActorCriticNetwork, ExplorationController, ExplorationSchedule, Learner,
        NetworkConfig, PolicyNetwork, ReplayBuffer,
    };
    pub use slingshot_rl_core::prelude::*;
}
