//! Episode and training orchestration
//!
//! One [`Orchestrator`] drives one environment. Each step walks
//! `Idle -> Acting -> AwaitingOutcome -> Scoring` and either returns to
//! `Idle` or ends the episode in `Terminal`. Counters, rolling statistics and
//! the exploration rate live here and survive environment resets.

use chrono::{DateTime, Utc};
use metrics::{gauge, increment_counter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use slingshot_rl_agent::{
    DecisionContext, DecisionKind, ExplorationController, Learner, LossStats, RollingWindow,
};
use slingshot_rl_core::{
    Environment, Episode, FeatureExtractor, GamePhase, Outcome, RLError, Result, RewardEvaluator,
    StateEncoder, Trajectory, Transition,
};

use crate::config::TrainingConfig;
use crate::monitor::PerformanceMonitor;
use crate::store::{CheckpointRecord, Persistence, SummaryRecord};

/// Episodes kept for rolling statistics and the first/last comparison
pub const HISTORY_LEN: usize = 100;

/// Where the orchestrator is within a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// Waiting for the environment to be ready
    Idle,
    /// Choosing and launching an action
    Acting,
    /// Polling until the world settles
    AwaitingOutcome,
    /// Turning the outcome into a reward and transition
    Scoring,
    /// Episode over
    Terminal,
}

/// Running count of policy update losses
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossTally {
    /// Updates seen
    pub updates: u64,
    /// Total loss of the most recent update
    pub latest: Option<f64>,
    sum: f64,
}

impl LossTally {
    /// Count one update
    pub fn add(&mut self, stats: &LossStats) {
        let loss = f64::from(stats.total_loss);
        self.updates += 1;
        self.sum += loss;
        self.latest = Some(loss);
    }

    /// Fold in a later tally
    pub fn merge(&mut self, later: &LossTally) {
        self.updates += later.updates;
        self.sum += later.sum;
        if later.latest.is_some() {
            self.latest = later.latest;
        }
    }

    /// Mean total loss, `None` before the first update
    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        (self.updates > 0).then(|| self.sum / self.updates as f64)
    }
}

fn format_loss(loss: Option<f64>) -> String {
    loss.map_or_else(|| "-".to_string(), |l| format!("{l:.4}"))
}

/// Counters and rolling statistics across episodes
#[derive(Debug, Clone)]
pub struct TrainingStats {
    /// Episodes finished
    pub episodes: u64,
    /// Episodes won
    pub successful: u64,
    /// Shots taken
    pub total_steps: u64,
    /// Best episode reward, `None` before the first episode
    pub best_reward: Option<f64>,
    /// Policy update losses of this process
    pub losses: LossTally,
    recent_rewards: RollingWindow<f64>,
    recent_successes: RollingWindow<bool>,
    first_rewards: Vec<f64>,
}

impl Default for TrainingStats {
    fn default() -> Self {
        Self {
            episodes: 0,
            successful: 0,
            total_steps: 0,
            best_reward: None,
            losses: LossTally::default(),
            recent_rewards: RollingWindow::new(HISTORY_LEN),
            recent_successes: RollingWindow::new(HISTORY_LEN),
            first_rewards: Vec::with_capacity(HISTORY_LEN),
        }
    }
}

impl TrainingStats {
    /// Counters restored from a checkpoint; rolling windows start empty
    #[must_use]
    pub fn resumed(record: &CheckpointRecord) -> Self {
        Self {
            episodes: record.episode,
            successful: record.successful_episodes,
            total_steps: record.total_steps,
            best_reward: (record.episode > 0).then_some(record.best_reward),
            ..Self::default()
        }
    }

    /// Fold a finished episode into the statistics
    pub fn record(&mut self, episode: &Episode) {
        self.episodes += 1;
        if episode.success {
            self.successful += 1;
        }
        self.total_steps += episode.steps as u64;
        self.best_reward = Some(
            self.best_reward
                .map_or(episode.total_reward, |best| best.max(episode.total_reward)),
        );
        self.recent_rewards.push(episode.total_reward);
        self.recent_successes.push(episode.success);
        if self.first_rewards.len() < HISTORY_LEN {
            self.first_rewards.push(episode.total_reward);
        }
    }

    /// Won / finished over the whole run
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.episodes == 0 {
            0.0
        } else {
            self.successful as f64 / self.episodes as f64
        }
    }

    /// Success rate over the last [`HISTORY_LEN`] episodes
    #[must_use]
    pub fn recent_success_rate(&self) -> f64 {
        self.recent_successes.rate()
    }

    /// Average reward over the last [`HISTORY_LEN`] episodes
    #[must_use]
    pub fn average_reward(&self) -> f64 {
        self.recent_rewards.mean()
    }

    /// Average reward over the first [`HISTORY_LEN`] episodes of this process
    #[must_use]
    pub fn first_average(&self) -> f64 {
        if self.first_rewards.is_empty() {
            0.0
        } else {
            self.first_rewards.iter().sum::<f64>() / self.first_rewards.len() as f64
        }
    }

    /// Recent rewards, oldest first
    #[must_use]
    pub fn reward_history(&self) -> Vec<f64> {
        self.recent_rewards.to_vec()
    }
}

/// Drives episodes against one environment
pub struct Orchestrator<E: Environment> {
    config: TrainingConfig,
    env: E,
    learner: Option<Box<dyn Learner>>,
    store: Arc<dyn Persistence>,
    extractor: FeatureExtractor,
    encoder: StateEncoder,
    evaluator: RewardEvaluator,
    controller: ExplorationController,
    monitor: PerformanceMonitor,
    stats: TrainingStats,
    episode_losses: LossTally,
    exploration_rate: f64,
    state: StepState,
    run_id: Uuid,
    started_at: DateTime<Utc>,
}

impl<E: Environment> Orchestrator<E> {
    /// Create an orchestrator; validates the configuration
    pub fn new(
        config: TrainingConfig,
        env: E,
        learner: Option<Box<dyn Learner>>,
        store: Arc<dyn Persistence>,
    ) -> Result<Self> {
        config.validate()?;

        let controller =
            ExplorationController::new(config.action_source, config.heuristic, config.seed);
        Ok(Self {
            extractor: FeatureExtractor::default(),
            encoder: StateEncoder::new(config.encoder),
            evaluator: RewardEvaluator::new(config.reward),
            monitor: PerformanceMonitor::new(config.monitor),
            stats: TrainingStats::default(),
            episode_losses: LossTally::default(),
            exploration_rate: config.exploration.initial_rate,
            state: StepState::Idle,
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            controller,
            config,
            env,
            learner,
            store,
        })
    }

    /// Counters and rolling statistics
    #[must_use]
    pub fn stats(&self) -> &TrainingStats {
        &self.stats
    }

    /// Episodes finished so far
    #[must_use]
    pub fn episode(&self) -> u64 {
        self.stats.episodes
    }

    /// Current exploration rate
    #[must_use]
    pub fn exploration_rate(&self) -> f64 {
        self.exploration_rate
    }

    /// Current step state
    #[must_use]
    pub fn state(&self) -> StepState {
        self.state
    }

    /// Identifier stamped on checkpoints and reports
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Random shots caused by an unavailable learner
    #[must_use]
    pub fn learner_fallbacks(&self) -> u64 {
        self.controller.fallbacks()
    }

    /// The driven environment
    pub fn environment_mut(&mut self) -> &mut E {
        &mut self.env
    }

    /// Run episodes until `max_episodes`, then save, report and close
    pub async fn run(&mut self) -> Result<SummaryRecord> {
        info!(
            run_id = %self.run_id,
            mode = ?self.config.mode,
            source = ?self.controller.source(),
            start_episode = self.stats.episodes + 1,
            max_episodes = self.config.max_episodes,
            "training started"
        );

        let restart_delay = Duration::from_millis(self.config.episode_restart_delay_ms);
        while self.stats.episodes < self.config.max_episodes {
            let episode = self.run_episode().await?;
            self.finish_episode(&episode).await;

            if self.stats.episodes < self.config.max_episodes {
                sleep(restart_delay).await;
                self.env.reset().await?;
            }
        }

        let summary = self.final_report();
        if self.config.mode.is_learning() {
            self.save_checkpoint("final").await;
        }
        if self.config.mode.writes_report() {
            self.write_report(&summary).await;
        }
        info!(
            episodes = summary.episodes,
            success_rate = summary.success_rate,
            average_reward = summary.average_reward,
            improvement = summary.improvement,
            "training finished"
        );
        self.shutdown().await;
        Ok(summary)
    }

    /// Play one episode to its terminal state
    ///
    /// Does not touch counters; [`Orchestrator::run`] folds the returned
    /// episode into the statistics.
    pub async fn run_episode(&mut self) -> Result<Episode> {
        let index = self.stats.episodes + 1;
        let start_time = Utc::now();
        let started = Instant::now();
        let learning = self.config.mode.is_learning();
        let rate = if learning { self.exploration_rate } else { 0.0 };

        let mut episode_clock = None;
        let mut trajectory = Trajectory::new(index);
        let mut success = false;
        self.episode_losses = LossTally::default();

        loop {
            self.state = StepState::Idle;
            self.wait_until_ready().await?;

            let snapshot = self.env.snapshot().await?;
            let clock_start = *episode_clock.get_or_insert(snapshot.timestamp);
            let features = self.extractor.extract(&snapshot);
            let state = self.encoder.encode_features(&features, &snapshot);

            self.state = StepState::Acting;
            let ctx = DecisionContext {
                state: &state,
                features: &features,
            };
            let decision = self
                .controller
                .choose_action(&ctx, rate, self.learner.as_deref_mut())
                .await;
            debug!(
                episode = index,
                step = trajectory.len() + 1,
                angle = decision.action.angle,
                force = decision.action.force,
                kind = ?decision.kind,
                "action chosen"
            );
            if decision.kind == DecisionKind::Fallback {
                increment_counter!("slingshot_fallback_actions_total");
            }
            self.env.execute_action(decision.action).await?;

            self.state = StepState::AwaitingOutcome;
            let outcome = self.await_outcome().await?;

            self.state = StepState::Scoring;
            let next = self.env.snapshot().await?;
            let timed_out = outcome.is_none();
            let outcome = outcome
                .unwrap_or_else(Outcome::miss)
                .at_elapsed(next.timestamp - clock_start);
            let mut reward = self.evaluator.score(&outcome);

            let phase = self.env.phase().await?;
            let capped = trajectory.len() + 1 >= self.config.max_steps_per_episode;
            let done = timed_out || phase.is_terminal() || capped;
            if done {
                success = phase == GamePhase::Won && !timed_out;
                reward += self.evaluator.episode_bonus(success, next.agents_remaining);
                if capped && !phase.is_terminal() {
                    warn!(
                        episode = index,
                        steps = trajectory.len() + 1,
                        "step cap reached, ending episode as a loss"
                    );
                }
            }

            let next_features = self.extractor.extract(&next);
            let transition = Transition {
                state,
                action: decision.action,
                reward,
                next_state: self.encoder.encode_features(&next_features, &next),
                done,
            };
            if learning {
                self.push_transition(&transition).await;
            }
            trajectory.push(transition);

            if done {
                self.state = StepState::Terminal;
                break;
            }
        }

        let returns = trajectory.returns(f64::from(self.config.network.gamma));
        debug!(
            episode = index,
            success,
            total_reward = trajectory.total_reward,
            discounted_return = returns.first().copied().unwrap_or_default(),
            "episode finished"
        );

        Ok(Episode {
            index,
            success,
            total_reward: trajectory.total_reward,
            steps: trajectory.len(),
            duration_secs: started.elapsed().as_secs_f64(),
            start_time,
            end_time: Utc::now(),
        })
    }

    async fn wait_until_ready(&mut self) -> Result<()> {
        let phase = self.env.phase().await?;
        if phase != GamePhase::Playing {
            debug!(?phase, "environment not in play, resetting level");
            self.env.reset().await?;
            let phase = self.env.phase().await?;
            if phase != GamePhase::Playing {
                return Err(RLError::Environment(format!(
                    "environment reports {phase:?} right after a reset"
                )));
            }
        }

        if self.poll_settled().await? {
            Ok(())
        } else {
            Err(RLError::Environment(format!(
                "world did not settle within {} ms before the next launch",
                self.config.settle_timeout_ms
            )))
        }
    }

    /// Poll `is_settled` until true or the settle timeout passes
    async fn poll_settled(&mut self) -> Result<bool> {
        let interval = Duration::from_millis(self.config.settle_poll_ms);
        let bound = Duration::from_millis(self.config.settle_timeout_ms);
        let env = &mut self.env;

        let polled = timeout(bound, async {
            loop {
                if env.is_settled().await? {
                    return Ok::<_, RLError>(());
                }
                sleep(interval).await;
            }
        })
        .await;

        match polled {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(false),
        }
    }

    /// Outcome of the last launch, `None` when the world never settled
    async fn await_outcome(&mut self) -> Result<Option<Outcome>> {
        if !self.poll_settled().await? {
            warn!(
                timeout_ms = self.config.settle_timeout_ms,
                "outcome not available before the settle timeout, scoring the shot as a miss"
            );
            increment_counter!("slingshot_settle_timeouts_total");
            return Ok(None);
        }

        match self.env.outcome().await? {
            Some(outcome) => Ok(Some(outcome)),
            None => {
                debug!("environment settled without an outcome, treating as a miss");
                Ok(Some(Outcome::miss()))
            }
        }
    }

    async fn push_transition(&mut self, transition: &Transition) {
        let Some(learner) = self.learner.as_mut() else {
            return;
        };
        match learner.push_transition(transition).await {
            Ok(Some(stats)) => self.episode_losses.add(&stats),
            Ok(None) => {}
            Err(e) if e.is_transient() => {
                debug!(error = %e, "transition dropped, learner unavailable");
            }
            Err(e) => warn!(error = %e, "learner rejected transition"),
        }
    }

    async fn finish_episode(&mut self, episode: &Episode) {
        self.stats.record(episode);
        let losses = self.episode_losses;
        self.stats.losses.merge(&losses);
        self.monitor.record(episode.success, episode.total_reward);

        let report = self.monitor.check();
        if report.retraining_recommended {
            warn!(
                success_rate = report.success_rate,
                average_reward = report.average_reward,
                trend = report.trend,
                "performance is poor and falling, retraining recommended"
            );
        } else if report.performance_drop {
            warn!(
                success_rate = report.success_rate,
                trend = report.trend,
                "performance drop detected"
            );
        }

        if self.config.mode.is_learning() {
            self.exploration_rate = self.config.exploration.decay(self.exploration_rate);
        }

        increment_counter!("slingshot_episodes_total");
        if episode.success {
            increment_counter!("slingshot_episodes_won_total");
        }
        gauge!("slingshot_episode_reward", episode.total_reward);
        gauge!("slingshot_success_rate", self.stats.recent_success_rate());
        gauge!("slingshot_exploration_rate", self.exploration_rate);

        if let Some(latest) = losses.latest {
            gauge!("slingshot_episode_loss", latest);
        }
        let line = format!(
            "episode={} success={} reward={:.2} steps={} duration={:.2}s exploration={:.4} updates={} loss_last={} loss_mean={}",
            episode.index,
            episode.success,
            episode.total_reward,
            episode.steps,
            episode.duration_secs,
            self.exploration_rate,
            losses.updates,
            format_loss(losses.latest),
            format_loss(losses.mean())
        );
        if let Err(e) = self.store.append_log(&self.config.output.log_file, &line).await {
            error!(
                error = %e,
                path = %self.config.output.log_file.display(),
                "cannot append to training log; check output.logFile"
            );
        }

        let index = episode.index;
        if index % self.config.print_frequency == 0 {
            info!(
                episode = index,
                reward = episode.total_reward,
                average_reward = self.stats.average_reward(),
                success_rate = self.stats.recent_success_rate(),
                exploration = self.exploration_rate,
                loss = losses.mean(),
                "progress"
            );
        }
        if self.config.mode.is_learning() && index % self.config.checkpoint_frequency == 0 {
            self.save_checkpoint(&format!("episode_{index}")).await;
        }
    }

    fn checkpoint_record(&self, parameters_file: Option<String>) -> CheckpointRecord {
        CheckpointRecord {
            episode: self.stats.episodes,
            successful_episodes: self.stats.successful,
            average_reward: self.stats.average_reward(),
            best_reward: self.stats.best_reward.unwrap_or(0.0),
            total_steps: self.stats.total_steps,
            timestamp: Utc::now(),
            exploration_rate: self.exploration_rate,
            run_id: Some(self.run_id),
            parameters_file,
        }
    }

    /// Save `<checkpoint_dir>/<tag>.json` plus learner parameters if any
    ///
    /// Failures are logged, never returned; training carries on.
    pub async fn save_checkpoint(&mut self, tag: &str) -> Option<PathBuf> {
        let dir = self.config.output.checkpoint_dir.clone();
        let path = dir.join(format!("{tag}.json"));

        let mut parameters_file = None;
        if let Some(params) = self.learner.as_ref().and_then(|l| l.parameters()) {
            let name = format!("{tag}.params.bin.gz");
            match self.store.write_parameters(&dir.join(&name), &params).await {
                Ok(()) => parameters_file = Some(name),
                Err(e) => error!(
                    error = %e,
                    "cannot save network parameters; check that output.checkpointDir is writable"
                ),
            }
        }

        let record = self.checkpoint_record(parameters_file);
        match self.store.write_checkpoint(&path, &record).await {
            Ok(()) => {
                info!(path = %path.display(), episode = record.episode, "checkpoint saved");
                Some(path)
            }
            Err(e) => {
                error!(
                    error = %e,
                    path = %path.display(),
                    "checkpoint save failed, training continues; check that output.checkpointDir is writable"
                );
                None
            }
        }
    }

    /// Continue from a checkpoint
    ///
    /// Returns `Ok(false)` and leaves everything fresh when the checkpoint's
    /// counters are inconsistent or its parameters are missing, unreadable or
    /// do not fit the learner. An unreadable checkpoint record is an error.
    pub async fn resume(&mut self, path: &Path) -> Result<bool> {
        let record = self.store.read_checkpoint(path).await?;

        if let Err(reason) = record.check_consistency(self.config.max_episodes) {
            warn!(path = %path.display(), %reason, "inconsistent checkpoint, starting fresh");
            return Ok(false);
        }

        if let (Some(file), Some(learner)) = (&record.parameters_file, self.learner.as_mut()) {
            let params_path = path.parent().unwrap_or_else(|| Path::new(".")).join(file);
            let params = match self.store.read_parameters(&params_path).await {
                Ok(params) => params,
                Err(e) => {
                    warn!(
                        path = %params_path.display(),
                        error = %e,
                        "checkpoint parameters unreadable, starting fresh"
                    );
                    return Ok(false);
                }
            };
            if let Err(e) = learner.load_parameters(&params) {
                warn!(error = %e, "checkpoint parameters do not fit the learner, starting fresh");
                return Ok(false);
            }
        }

        self.stats = TrainingStats::resumed(&record);
        self.exploration_rate = record.exploration_rate;
        info!(
            path = %path.display(),
            episode = record.episode,
            exploration = record.exploration_rate,
            previous_run = ?record.run_id,
            "resumed from checkpoint"
        );
        Ok(true)
    }

    /// Summary of the run so far
    #[must_use]
    pub fn final_report(&self) -> SummaryRecord {
        let first = self.stats.first_average();
        let last = self.stats.average_reward();
        SummaryRecord {
            run_id: self.run_id,
            mode: self.config.mode,
            episodes: self.stats.episodes,
            successful_episodes: self.stats.successful,
            success_rate: self.stats.success_rate(),
            average_reward: last,
            best_reward: self.stats.best_reward.unwrap_or(0.0),
            total_steps: self.stats.total_steps,
            first_100_average: first,
            last_100_average: last,
            improvement: last - first,
            learner_fallbacks: self.controller.fallbacks(),
            policy_updates: self.stats.losses.updates,
            latest_loss: self.stats.losses.latest,
            mean_loss: self.stats.losses.mean(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }

    async fn write_report(&self, summary: &SummaryRecord) {
        let path = self.config.output.report_dir.join(format!(
            "summary_{}.json",
            summary.finished_at.format("%Y%m%d_%H%M%S")
        ));
        match self.store.write_report(&path, summary).await {
            Ok(()) => info!(path = %path.display(), "report written"),
            Err(e) => error!(
                error = %e,
                path = %path.display(),
                "cannot write report; check that output.reportDir is writable"
            ),
        }
    }

    /// Close the learner and the environment
    pub async fn shutdown(&mut self) {
        if let Some(learner) = self.learner.as_mut() {
            if let Err(e) = learner.close().await {
                debug!(error = %e, "learner close failed");
            }
        }
        if let Err(e) = self.env.close().await {
            warn!(error = %e, "environment close failed");
        }
    }
}
