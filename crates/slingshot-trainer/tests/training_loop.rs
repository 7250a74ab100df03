//! End-to-end tests of the training loop against a scripted environment

use approx::assert_relative_eq;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::net::TcpListener;

use slingshot_rl_agent::{ActionSource, ExplorationSchedule, Learner, LearnerConfig, RemoteLearner};
use slingshot_rl_core::{
    Action, Environment, GamePhase, Outcome, Result, RewardConfig, RewardEvaluator, Snapshot,
    Vec2,
};
use slingshot_trainer::{CheckpointRecord, FileStore, Orchestrator, StepState, TrainingConfig};

/// One target, fixed outcomes, a 2 s clock per shot
struct ScriptedEnv {
    target: Vec2,
    projectiles: u32,
    remaining: u32,
    phase: GamePhase,
    clock: f64,
    hits: bool,
    never_settles: bool,
    pending: Option<Outcome>,
    settled: Option<Outcome>,
    actions: Vec<Action>,
    resets: u32,
}

impl ScriptedEnv {
    fn new(hits: bool) -> Self {
        Self {
            target: Vec2::new(10.0, 0.0),
            projectiles: 3,
            remaining: 3,
            phase: GamePhase::Start,
            clock: 0.0,
            hits,
            never_settles: false,
            pending: None,
            settled: None,
            actions: Vec::new(),
            resets: 0,
        }
    }

    fn stuck() -> Self {
        Self {
            never_settles: true,
            ..Self::new(true)
        }
    }
}

#[async_trait]
impl Environment for ScriptedEnv {
    async fn snapshot(&mut self) -> Result<Snapshot> {
        Ok(Snapshot {
            targets: if self.phase == GamePhase::Won {
                Vec::new()
            } else {
                vec![self.target]
            },
            agents_remaining: self.remaining,
            phase: self.phase,
            timestamp: self.clock,
            ..Snapshot::empty()
        })
    }

    async fn execute_action(&mut self, action: Action) -> Result<()> {
        self.actions.push(action);
        self.remaining -= 1;
        self.pending = Some(if self.hits {
            Outcome {
                hit: true,
                targets_destroyed: 1,
                impact_point: self.target,
                time_to_impact: 1.2,
                ..Outcome::default()
            }
        } else {
            Outcome::miss()
        });
        Ok(())
    }

    async fn is_settled(&mut self) -> Result<bool> {
        if self.never_settles && self.pending.is_some() {
            return Ok(false);
        }
        if let Some(outcome) = self.pending.take() {
            self.clock += 2.0;
            self.phase = if outcome.hit {
                GamePhase::Won
            } else if self.remaining == 0 {
                GamePhase::Lost
            } else {
                GamePhase::Playing
            };
            self.settled = Some(outcome);
        }
        Ok(true)
    }

    async fn phase(&mut self) -> Result<GamePhase> {
        Ok(self.phase)
    }

    async fn outcome(&mut self) -> Result<Option<Outcome>> {
        Ok(self.settled.take())
    }

    async fn reset(&mut self) -> Result<()> {
        self.remaining = self.projectiles;
        self.phase = GamePhase::Playing;
        self.clock = 0.0;
        self.pending = None;
        self.settled = None;
        self.resets += 1;
        Ok(())
    }
}

fn base_config(dir: &Path) -> TrainingConfig {
    let mut config = TrainingConfig {
        action_source: ActionSource::Heuristic,
        max_episodes: 1,
        episode_restart_delay_ms: 0,
        settle_poll_ms: 1,
        settle_timeout_ms: 1_000,
        seed: Some(42),
        ..TrainingConfig::default()
    };
    config.output.checkpoint_dir = dir.join("checkpoints");
    config.output.report_dir = dir.join("reports");
    config.output.log_file = dir.join("logs/training.log");
    config
}

fn orchestrator(
    config: TrainingConfig,
    env: ScriptedEnv,
    learner: Option<Box<dyn Learner>>,
) -> Orchestrator<ScriptedEnv> {
    Orchestrator::new(config, env, learner, Arc::new(FileStore)).unwrap()
}

#[tokio::test]
async fn test_heuristic_episode_end_to_end() {
    let dir = tempdir().unwrap();
    let mut orch = orchestrator(base_config(dir.path()), ScriptedEnv::new(true), None);
    let summary = orch.run().await.unwrap();

    let env = orch.environment_mut();
    assert_eq!(env.actions.len(), 1);
    let shot = env.actions[0];
    assert!((10.0..=70.0).contains(&shot.angle), "angle {}", shot.angle);
    assert!((0.4..=1.0).contains(&shot.force), "force {}", shot.force);

    // 300 for the hit and the destroyed target, 2 s of time penalty,
    // then 500 for the win plus 50 for each of the two unused projectiles
    let evaluator = RewardEvaluator::new(RewardConfig::default());
    let outcome = Outcome {
        hit: true,
        targets_destroyed: 1,
        ..Outcome::default()
    };
    let breakdown = evaluator.breakdown(&outcome);
    assert_relative_eq!(breakdown.hit + breakdown.targets, 300.0);
    assert_relative_eq!(summary.best_reward, 300.0 - 0.2 + 600.0, epsilon = 1e-9);

    assert_eq!(summary.episodes, 1);
    assert_eq!(summary.successful_episodes, 1);
    assert_relative_eq!(summary.success_rate, 1.0);
    assert_eq!(orch.state(), StepState::Terminal);
}

#[tokio::test]
async fn test_episode_counter_survives_environment_reset() {
    let dir = tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.max_episodes = 5;
    let mut orch = orchestrator(config, ScriptedEnv::new(false), None);
    let summary = orch.run().await.unwrap();

    assert_eq!(orch.episode(), 5);
    assert_eq!(summary.episodes, 5);
    assert_eq!(summary.successful_episodes, 0);
    // Three misses per episode exhaust the projectiles
    assert_eq!(summary.total_steps, 15);
    // One reset to load the first level, one between each pair of episodes
    assert_eq!(orch.environment_mut().resets, 5);
}

#[tokio::test]
async fn test_explicit_reset_keeps_counters() {
    let dir = tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.max_episodes = 2;
    let mut orch = orchestrator(config, ScriptedEnv::new(true), None);
    orch.run().await.unwrap();
    assert_eq!(orch.episode(), 2);
    assert_eq!(orch.stats().successful, 2);

    orch.environment_mut().reset().await.unwrap();
    assert_eq!(orch.episode(), 2);
    assert_eq!(orch.stats().successful, 2);
    assert_eq!(orch.stats().total_steps, 2);

    // The next episode continues the numbering
    let episode = orch.run_episode().await.unwrap();
    assert_eq!(episode.index, 3);
    assert!(episode.success);
    assert_eq!(orch.episode(), 2);
}

#[tokio::test]
async fn test_settle_timeout_scores_a_miss() {
    let dir = tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.settle_timeout_ms = 30;
    let mut orch = orchestrator(config, ScriptedEnv::stuck(), None);

    let episode = orch.run_episode().await.unwrap();
    assert!(!episode.success);
    assert_eq!(episode.steps, 1);
    assert_relative_eq!(episode.total_reward, -10.0);
    assert_eq!(orch.state(), StepState::Terminal);
}

#[tokio::test]
async fn test_unresponsive_learner_falls_back_to_random() {
    // Accepts connections through the backlog but never answers
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = silent.local_addr().unwrap().port();

    let dir = tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.action_source = ActionSource::LearnedPolicy;
    config.max_episodes = 3;
    config.exploration = ExplorationSchedule {
        initial_rate: 0.01,
        decay: 1.0,
        min_rate: 0.01,
    };
    let learner = RemoteLearner::new(LearnerConfig {
        port,
        timeout_ms: 50,
        retry_interval_ms: 60_000,
        ..LearnerConfig::default()
    });

    let mut orch = orchestrator(config, ScriptedEnv::new(false), Some(Box::new(learner)));
    let summary = orch.run().await.unwrap();

    assert_eq!(summary.episodes, 3);
    assert!(summary.learner_fallbacks >= 1);
    assert_eq!(summary.learner_fallbacks, orch.learner_fallbacks());
    let env = orch.environment_mut();
    assert_eq!(env.actions.len(), 9);
    for action in &env.actions {
        assert!((-90.0..=90.0).contains(&action.angle));
        assert!((0.3..=1.0).contains(&action.force));
    }
    drop(silent);
}

#[tokio::test]
async fn test_checkpoints_are_complete_json() {
    let dir = tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.max_episodes = 3;
    config.checkpoint_frequency = 1;
    let mut orch = orchestrator(config, ScriptedEnv::new(true), None);
    orch.run().await.unwrap();

    let checkpoints = dir.path().join("checkpoints");
    for episode in 1..=3u64 {
        let raw = std::fs::read(checkpoints.join(format!("episode_{episode}.json"))).unwrap();
        let record: CheckpointRecord = serde_json::from_slice(&raw).unwrap();
        assert_eq!(record.episode, episode);
        assert_eq!(record.successful_episodes, episode);
        assert_eq!(record.total_steps, episode);
    }
    let leftovers: Vec<_> = std::fs::read_dir(&checkpoints)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
        .collect();
    assert!(leftovers.is_empty());

    let reports: Vec<_> = std::fs::read_dir(dir.path().join("reports"))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .collect();
    assert_eq!(reports.len(), 2, "json report plus text rendering");
}

#[tokio::test]
async fn test_persistence_failure_is_not_fatal() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("not-a-directory");
    std::fs::write(&blocker, b"x").unwrap();

    let mut config = base_config(dir.path());
    config.max_episodes = 2;
    config.checkpoint_frequency = 1;
    config.output.checkpoint_dir = blocker.join("checkpoints");
    config.output.report_dir = blocker.join("reports");
    config.output.log_file = blocker.join("training.log");

    let mut orch = orchestrator(config, ScriptedEnv::new(true), None);
    let summary = orch.run().await.unwrap();
    assert_eq!(summary.episodes, 2);
    assert!(orch.save_checkpoint("manual").await.is_none());
}
