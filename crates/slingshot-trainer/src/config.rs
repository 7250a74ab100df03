//! Training configuration
//!
//! One JSON document, camelCase keys, every section optional. Missing
//! sections fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use slingshot_rl_agent::{
    ActionSource, ExplorationSchedule, HeuristicConfig, LearnerConfig, NetworkConfig, ReplayConfig,
};
use slingshot_rl_core::{EncoderConfig, RLError, Result, RewardConfig, StateEncoder};
use slingshot_rl_env::SimConfig;

use crate::monitor::MonitorConfig;

/// Run mode
///
/// | mode       | exploration | learning | checkpoints | report |
/// |------------|-------------|----------|-------------|--------|
/// | training   | yes         | yes      | yes         | yes    |
/// | testing    | no          | no       | no          | yes    |
/// | deployment | no          | no       | no          | no     |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    /// Explore, learn and checkpoint
    #[default]
    Training,
    /// Play greedily without learning
    Deployment,
    /// Evaluate greedily and write a report
    Testing,
}

impl Mode {
    /// Whether transitions are pushed to the learner and exploration decays
    #[must_use]
    pub fn is_learning(self) -> bool {
        self == Self::Training
    }

    /// Whether a summary report is written at the end of the run
    #[must_use]
    pub fn writes_report(self) -> bool {
        self != Self::Deployment
    }
}

impl std::str::FromStr for Mode {
    type Err = RLError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "training" | "train" => Ok(Self::Training),
            "deployment" | "deploy" => Ok(Self::Deployment),
            "testing" | "test" => Ok(Self::Testing),
            other => Err(RLError::Config(format!("unknown mode '{other}'"))),
        }
    }
}

/// Which learner backs the learned-policy source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LearnerKind {
    /// In-process network
    #[default]
    Local,
    /// Learner process over TCP
    Remote,
}

/// Learner section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LearnerSettings {
    /// Local or remote learner
    pub kind: LearnerKind,
    /// Remote learner address and timeouts (also used by `serve`)
    pub remote: LearnerConfig,
    /// Replay cadence of the local learner
    pub replay: ReplayConfig,
}

/// Output locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutputConfig {
    /// Checkpoint directory
    pub checkpoint_dir: PathBuf,
    /// Report directory
    pub report_dir: PathBuf,
    /// Per-episode log file
    pub log_file: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("checkpoints"),
            report_dir: PathBuf::from("reports"),
            log_file: PathBuf::from("logs/training.log"),
        }
    }
}

/// Complete training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrainingConfig {
    /// Run mode
    pub mode: Mode,
    /// Action source
    pub action_source: ActionSource,
    /// Exploration rate schedule
    pub exploration: ExplorationSchedule,
    /// Heuristic shot parameters
    pub heuristic: HeuristicConfig,
    /// Reward constants
    pub reward: RewardConfig,
    /// Episodes to run
    pub max_episodes: u64,
    /// Save a checkpoint every N episodes
    pub checkpoint_frequency: u64,
    /// Log progress every N episodes
    pub print_frequency: u64,
    /// Pause between an episode's end and the level reset
    pub episode_restart_delay_ms: u64,
    /// Longest wait for the world to settle after a launch
    pub settle_timeout_ms: u64,
    /// Interval between settle polls
    pub settle_poll_ms: u64,
    /// Shots after which an unfinished episode is ended as a loss
    pub max_steps_per_episode: usize,
    /// Learner section
    pub learner: LearnerSettings,
    /// State-vector caps
    pub encoder: EncoderConfig,
    /// Network hyperparameters
    pub network: NetworkConfig,
    /// Performance monitor thresholds
    pub monitor: MonitorConfig,
    /// Output locations
    pub output: OutputConfig,
    /// Simulated environment
    pub simulator: SimConfig,
    /// Seed for action selection
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            action_source: ActionSource::default(),
            exploration: ExplorationSchedule::default(),
            heuristic: HeuristicConfig::default(),
            reward: RewardConfig::default(),
            max_episodes: 1_000,
            checkpoint_frequency: 100,
            print_frequency: 10,
            episode_restart_delay_ms: 500,
            settle_timeout_ms: 10_000,
            settle_poll_ms: 10,
            max_steps_per_episode: 50,
            learner: LearnerSettings::default(),
            encoder: EncoderConfig::default(),
            network: NetworkConfig::default(),
            monitor: MonitorConfig::default(),
            output: OutputConfig::default(),
            simulator: SimConfig::default(),
            seed: None,
        }
    }
}

impl TrainingConfig {
    /// Load and validate a JSON configuration file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            RLError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.exploration.validate()?;
        self.network.validate()?;
        self.learner.replay.validate()?;
        self.simulator.validate()?;

        if self.max_episodes == 0 {
            return Err(RLError::Config("maxEpisodes must be at least 1".to_string()));
        }
        if self.checkpoint_frequency == 0 || self.print_frequency == 0 {
            return Err(RLError::Config(
                "checkpointFrequency and printFrequency must be at least 1".to_string(),
            ));
        }
        if self.settle_timeout_ms == 0 || self.max_steps_per_episode == 0 {
            return Err(RLError::Config(
                "settleTimeoutMs and maxStepsPerEpisode must be at least 1".to_string(),
            ));
        }

        let state_len = StateEncoder::new(self.encoder).len();
        if self.network.input_dim != state_len {
            return Err(RLError::Config(format!(
                "network.inputDim is {} but the encoder produces {} values",
                self.network.input_dim, state_len
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = TrainingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mode, Mode::Training);
        assert_eq!(config.action_source, ActionSource::LearnedPolicy);
    }

    #[test]
    fn test_partial_json() {
        let config: TrainingConfig = serde_json::from_str(
            r#"{
                "mode": "testing",
                "actionSource": "heuristic",
                "exploration": { "decay": 0.9 },
                "reward": { "hitReward": 10.0 },
                "maxEpisodes": 5,
                "learner": { "kind": "remote", "remote": { "port": 7000 } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.mode, Mode::Testing);
        assert_eq!(config.action_source, ActionSource::Heuristic);
        assert_eq!(config.exploration.decay, 0.9);
        assert_eq!(config.exploration.min_rate, 0.01);
        assert_eq!(config.reward.hit_reward, 10.0);
        assert_eq!(config.reward.miss_penalty, -10.0);
        assert_eq!(config.max_episodes, 5);
        assert_eq!(config.learner.kind, LearnerKind::Remote);
        assert_eq!(config.learner.remote.port, 7000);
        assert_eq!(config.learner.remote.host, "127.0.0.1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_floor_and_mismatched_input() {
        let mut config = TrainingConfig::default();
        config.exploration.min_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.encoder.max_targets = 4;
        assert!(matches!(config.validate(), Err(RLError::Config(_))));
    }

    #[test]
    fn test_rejects_unusable_simulator_and_replay() {
        let mut config = TrainingConfig::default();
        config.simulator.time_step = 0.0;
        assert!(matches!(config.validate(), Err(RLError::Config(_))));

        let config: TrainingConfig = serde_json::from_str(
            r#"{ "simulator": { "level": { "kind": "generated", "generator": { "xRange": [35.0, 12.0] } } } }"#,
        )
        .unwrap();
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.learner.replay.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.learner.replay.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Training".parse::<Mode>().unwrap(), Mode::Training);
        assert_eq!("deploy".parse::<Mode>().unwrap(), Mode::Deployment);
        assert!("sometimes".parse::<Mode>().is_err());
        assert!(!Mode::Deployment.writes_report());
        assert!(!Mode::Testing.is_learning());
    }

    #[tokio::test]
    async fn test_from_file_reports_missing_path() {
        let err = TrainingConfig::from_file(Path::new("/nonexistent/slingshot.json"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/slingshot.json"));
    }
}
