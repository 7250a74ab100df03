//! Training loop for slingshot RL
//!
//! This crate wires the pipeline together:
//! - [`Orchestrator`]: episode state machine, statistics and checkpoints
//! - [`PerformanceMonitor`]: rolling success/reward windows and alerts
//! - [`FileStore`]: atomic checkpoint, report and log persistence
//! - [`server::serve`]: the learner process behind the TCP transport

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

pub mod config;
pub mod monitor;
pub mod orchestrator;
pub mod server;
pub mod store;

pub use config::{LearnerKind, LearnerSettings, Mode, OutputConfig, TrainingConfig};
pub use monitor::{MonitorConfig, MonitorReport, PerformanceMonitor};
pub use orchestrator::{LossTally, Orchestrator, StepState, TrainingStats};
pub use store::{CheckpointRecord, FileStore, Persistence, SummaryRecord};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{FileStore, Mode, Orchestrator, Persistence, TrainingConfig};
    pub use slingshot_rl_agent::prelude::*;
}
