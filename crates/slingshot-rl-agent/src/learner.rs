//! Learner seam: where policy actions come from and transitions go to
//!
//! [`LocalLearner`] owns an in-process network and replay buffer.
//! [`RemoteLearner`] talks to a learner process over TCP using
//! length-prefixed JSON frames (4-byte big-endian length, then the body).

use async_trait::async_trait;
use metrics::{gauge, increment_counter};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

use slingshot_rl_core::{Action, RLError, Result, StateVector, Transition};

use crate::buffer::{PrioritizedReplayBuffer, PriorityConfig, ReplayBuffer};
use crate::policy::{LossStats, PolicyNetwork};

/// Largest frame body accepted from the wire
pub const MAX_FRAME_LEN: u32 = 1 << 20;

/// Source of policy actions and sink for experience
#[async_trait]
pub trait Learner: Send {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Ask for an action in `state`
    async fn request_action(&mut self, state: &StateVector) -> Result<Action>;

    /// Hand over a finished transition; no reply is expected.
    ///
    /// Returns the loss of the policy update the transition triggered, if any.
    async fn push_transition(&mut self, transition: &Transition) -> Result<Option<LossStats>>;

    /// Network parameters, when the learner owns a network in-process
    fn parameters(&self) -> Option<Vec<f32>> {
        None
    }

    /// Restore network parameters; a no-op for learners without a local network
    fn load_parameters(&mut self, _params: &[f32]) -> Result<()> {
        Ok(())
    }

    /// Release the connection or flush pending work
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Messages sent to a learner process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LearnerRequest {
    /// Request an action for a state vector
    Act {
        /// Encoded state
        state: Vec<f32>,
    },
    /// One-way transition push
    Transition {
        /// State the action was taken in
        state: Vec<f32>,
        /// `[angle, force]`
        action: [f32; 2],
        /// Scalar reward
        reward: f64,
        /// State after the outcome
        next_state: Vec<f32>,
        /// Episode ended with this step
        done: bool,
    },
    /// Orderly shutdown of the connection
    Close,
}

impl From<&Transition> for LearnerRequest {
    fn from(t: &Transition) -> Self {
        Self::Transition {
            state: t.state.0.clone(),
            action: t.action.to_array(),
            reward: t.reward,
            next_state: t.next_state.0.clone(),
            done: t.done,
        }
    }
}

/// Messages sent back by a learner process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LearnerResponse {
    /// Chosen action
    Action {
        /// Launch angle in degrees
        angle: f64,
        /// Normalized launch force
        force: f64,
    },
    /// The request could not be served
    Error {
        /// Human-readable reason
        message: String,
    },
}

/// Write one length-prefixed JSON frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| RLError::Learner(format!("frame of {} bytes is too large", body.len())))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed JSON frame; `None` on a clean end of stream
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(RLError::Learner(format!(
            "incoming frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

/// Replay and update cadence of the in-process learner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReplayConfig {
    /// Transitions kept
    pub capacity: usize,
    /// Transitions required before the first update
    pub min_size: usize,
    /// Transitions per update batch
    pub batch_size: usize,
    /// Update every N pushed transitions
    pub update_frequency: usize,
    /// Sample by TD-error priority instead of uniformly
    pub prioritized: Option<PriorityConfig>,
    /// Seed for batch sampling
    pub seed: Option<u64>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            min_size: 64,
            batch_size: 32,
            update_frequency: 4,
            prioritized: None,
            seed: None,
        }
    }
}

impl ReplayConfig {
    /// Require a non-empty buffer and batch
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 || self.batch_size == 0 || self.update_frequency == 0 {
            return Err(RLError::Config(format!(
                "replay capacity, batchSize and updateFrequency must be at least 1, got {} / {} / {}",
                self.capacity, self.batch_size, self.update_frequency
            )));
        }
        if let Some(priority) = &self.prioritized {
            priority.validate()?;
        }
        Ok(())
    }
}

/// Uniform or prioritized storage behind a [`LocalLearner`]
enum Replay {
    Uniform(ReplayBuffer),
    Prioritized(PrioritizedReplayBuffer),
}

impl Replay {
    fn push(&mut self, transition: Transition) {
        match self {
            Self::Uniform(buffer) => buffer.push(transition),
            Self::Prioritized(buffer) => buffer.push(transition),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Uniform(buffer) => buffer.len(),
            Self::Prioritized(buffer) => buffer.len(),
        }
    }
}

/// In-process actor-critic learner
pub struct LocalLearner {
    network: Box<dyn PolicyNetwork>,
    buffer: Replay,
    config: ReplayConfig,
    training: bool,
    pushed: u64,
    last_loss: Option<LossStats>,
    rng: StdRng,
}

impl LocalLearner {
    /// Wrap a network; `training` enables sampling and updates
    #[must_use]
    pub fn new(network: Box<dyn PolicyNetwork>, config: ReplayConfig, training: bool) -> Self {
        let buffer = match config.prioritized {
            Some(priority) => {
                Replay::Prioritized(PrioritizedReplayBuffer::new(config.capacity, priority))
            }
            None => Replay::Uniform(ReplayBuffer::new(config.capacity)),
        };
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            network,
            buffer,
            config,
            training,
            pushed: 0,
            last_loss: None,
            rng,
        }
    }

    /// Loss of the most recent update
    #[must_use]
    pub fn last_loss(&self) -> Option<LossStats> {
        self.last_loss
    }

    /// Transitions currently buffered
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Borrow the network
    #[must_use]
    pub fn network(&self) -> &dyn PolicyNetwork {
        self.network.as_ref()
    }

    fn maybe_update(&mut self) -> Result<Option<LossStats>> {
        let due = self.pushed % self.config.update_frequency.max(1) as u64 == 0;
        if !self.training || !due || self.buffer.len() < self.config.min_size.max(1) {
            return Ok(None);
        }

        let stats = match &mut self.buffer {
            Replay::Uniform(buffer) => {
                let batch = buffer.sample(self.config.batch_size, &mut self.rng);
                self.network.update(&batch)?
            }
            Replay::Prioritized(buffer) => {
                let batch = buffer.sample(self.config.batch_size, &mut self.rng)?;
                let (stats, td_errors) =
                    self.network.update_weighted(&batch.transitions, &batch.weights)?;
                buffer.update_priorities(&batch.indices, &td_errors);
                stats
            }
        };
        debug!(
            policy_loss = stats.policy_loss,
            value_loss = stats.value_loss,
            entropy = stats.entropy,
            grad_norm = stats.grad_norm,
            "policy update"
        );
        increment_counter!("slingshot_policy_updates_total");
        gauge!("slingshot_policy_total_loss", f64::from(stats.total_loss));
        self.last_loss = Some(stats);
        Ok(Some(stats))
    }
}

#[async_trait]
impl Learner for LocalLearner {
    fn name(&self) -> &str {
        "local"
    }

    async fn request_action(&mut self, state: &StateVector) -> Result<Action> {
        let (action, _value) = if self.training {
            self.network.predict(state)?
        } else {
            self.network.act_deterministic(state)?
        };
        Ok(action)
    }

    async fn push_transition(&mut self, transition: &Transition) -> Result<Option<LossStats>> {
        self.buffer.push(transition.clone());
        self.pushed += 1;
        self.maybe_update()
    }

    fn parameters(&self) -> Option<Vec<f32>> {
        Some(self.network.parameters())
    }

    fn load_parameters(&mut self, params: &[f32]) -> Result<()> {
        self.network.set_parameters(params)
    }
}

/// Where to find a learner process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LearnerConfig {
    /// Learner host
    pub host: String,
    /// Learner port
    pub port: u16,
    /// Bound on connect, request and push
    pub timeout_ms: u64,
    /// Pause before reconnecting after a failure
    pub retry_interval_ms: u64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9999,
            timeout_ms: 1_000,
            retry_interval_ms: 5_000,
        }
    }
}

impl LearnerConfig {
    /// `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Learner reached over TCP
pub struct RemoteLearner {
    config: LearnerConfig,
    stream: Option<TcpStream>,
    retry_at: Option<Instant>,
}

impl RemoteLearner {
    /// Create a learner; the connection is opened lazily
    #[must_use]
    pub fn new(config: LearnerConfig) -> Self {
        Self {
            config,
            stream: None,
            retry_at: None,
        }
    }

    /// Whether a connection is currently open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn bound(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Drop the connection and hold off reconnects for a while
    fn mark_down(&mut self) {
        self.stream = None;
        self.retry_at = Some(Instant::now() + Duration::from_millis(self.config.retry_interval_ms));
    }

    async fn connection(&mut self) -> Result<&mut TcpStream> {
        if self.stream.is_none() {
            if let Some(at) = self.retry_at {
                if Instant::now() < at {
                    return Err(RLError::Learner(format!(
                        "learner at {} unavailable, next reconnect in {} ms",
                        self.config.address(),
                        at.saturating_duration_since(Instant::now()).as_millis()
                    )));
                }
            }

            let address = self.config.address();
            match timeout(self.bound(), TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    info!(%address, "connected to learner");
                    self.stream = Some(stream);
                    self.retry_at = None;
                }
                Ok(Err(e)) => {
                    self.mark_down();
                    return Err(RLError::Learner(format!("connect to {address}: {e}")));
                }
                Err(_) => {
                    self.mark_down();
                    return Err(RLError::LearnerTimeout(self.config.timeout_ms));
                }
            }
        }

        self.stream
            .as_mut()
            .ok_or_else(|| RLError::Learner("learner connection missing".to_string()))
    }
}

#[async_trait]
impl Learner for RemoteLearner {
    fn name(&self) -> &str {
        "remote"
    }

    async fn request_action(&mut self, state: &StateVector) -> Result<Action> {
        increment_counter!("slingshot_learner_requests_total");
        let bound = self.bound();
        let timeout_ms = self.config.timeout_ms;
        let request = LearnerRequest::Act {
            state: state.0.clone(),
        };

        let stream = self.connection().await?;
        let exchange = async move {
            write_frame(&mut *stream, &request).await?;
            read_frame::<_, LearnerResponse>(&mut *stream).await
        };

        let outcome = timeout(bound, exchange).await;
        match outcome {
            Ok(Ok(Some(LearnerResponse::Action { angle, force }))) => Ok(Action::new(angle, force)),
            Ok(Ok(Some(LearnerResponse::Error { message }))) => Err(RLError::Learner(message)),
            Ok(Ok(None)) => {
                self.mark_down();
                Err(RLError::Learner("learner closed the connection".to_string()))
            }
            Ok(Err(e)) => {
                self.mark_down();
                Err(e)
            }
            Err(_) => {
                increment_counter!("slingshot_learner_timeouts_total");
                self.mark_down();
                Err(RLError::LearnerTimeout(timeout_ms))
            }
        }
    }

    async fn push_transition(&mut self, transition: &Transition) -> Result<Option<LossStats>> {
        let bound = self.bound();
        let timeout_ms = self.config.timeout_ms;
        let message = LearnerRequest::from(transition);

        let stream = self.connection().await?;
        let outcome = timeout(bound, write_frame(stream, &message)).await;
        match outcome {
            Ok(Ok(())) => Ok(None),
            Ok(Err(e)) => {
                self.mark_down();
                Err(e)
            }
            Err(_) => {
                self.mark_down();
                Err(RLError::LearnerTimeout(timeout_ms))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let bound = self.bound();
            let _ = timeout(bound, write_frame(&mut stream, &LearnerRequest::Close)).await;
            let _ = timeout(bound, stream.shutdown()).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ActorCriticNetwork, NetworkConfig};
    use tokio::net::TcpListener;

    fn small_network() -> Box<dyn PolicyNetwork> {
        Box::new(
            ActorCriticNetwork::new(NetworkConfig {
                input_dim: 4,
                hidden_dims: vec![8, 8, 4],
                dropout: 0.0,
                seed: Some(3),
                ..NetworkConfig::default()
            })
            .unwrap(),
        )
    }

    fn transition() -> Transition {
        Transition {
            state: StateVector::zeros(4),
            action: Action::new(20.0, 0.5),
            reward: 1.0,
            next_state: StateVector::zeros(4),
            done: false,
        }
    }

    fn remote_config(port: u16) -> LearnerConfig {
        LearnerConfig {
            host: "127.0.0.1".to_string(),
            port,
            timeout_ms: 200,
            retry_interval_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn test_frame_round_trip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let sent = LearnerRequest::from(&transition());
        write_frame(&mut a, &sent).await.unwrap();
        let received: LearnerRequest = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(received, sent);

        drop(a);
        let end: Option<LearnerRequest> = read_frame(&mut b).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_wire_format_is_tagged_json() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &LearnerResponse::Action { angle: 30.0, force: 0.5 })
            .await
            .unwrap();

        let mut len = [0u8; 4];
        b.read_exact(&mut len).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        b.read_exact(&mut body).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["type"], "action");
        assert_eq!(value["angle"], 30.0);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_FRAME_LEN + 1).to_be_bytes()).await.unwrap();
        let result: Result<Option<LearnerRequest>> = read_frame(&mut b).await;
        assert!(matches!(result, Err(RLError::Learner(_))));
    }

    #[tokio::test]
    async fn test_local_learner_updates_once_warm() {
        let config = ReplayConfig {
            capacity: 16,
            min_size: 4,
            batch_size: 4,
            update_frequency: 2,
            ..ReplayConfig::default()
        };
        let mut learner = LocalLearner::new(small_network(), config, true);

        for _ in 0..3 {
            assert!(learner.push_transition(&transition()).await.unwrap().is_none());
        }
        assert!(learner.last_loss().is_none());

        let stats = learner.push_transition(&transition()).await.unwrap();
        assert_eq!(stats.map(|s| s.batch_size), Some(4));
        assert_eq!(learner.last_loss(), stats);

        let action = learner.request_action(&StateVector::zeros(4)).await.unwrap();
        assert!((-90.0..=90.0).contains(&action.angle));
        assert!(learner.parameters().is_some());
    }

    #[tokio::test]
    async fn test_prioritized_learner_updates() {
        let config = ReplayConfig {
            capacity: 16,
            min_size: 4,
            batch_size: 3,
            update_frequency: 1,
            prioritized: Some(PriorityConfig::default()),
            seed: Some(9),
        };
        let mut learner = LocalLearner::new(small_network(), config, true);

        let mut updates = 0;
        for i in 0..8 {
            let mut t = transition();
            t.reward = f64::from(i);
            if let Some(stats) = learner.push_transition(&t).await.unwrap() {
                assert_eq!(stats.batch_size, 3);
                assert!(stats.total_loss.is_finite());
                updates += 1;
            }
        }
        assert_eq!(updates, 5);
        assert_eq!(learner.buffered(), 8);
    }

    #[tokio::test]
    async fn test_seeded_replay_is_reproducible() {
        let config = ReplayConfig {
            capacity: 32,
            min_size: 4,
            batch_size: 4,
            update_frequency: 1,
            seed: Some(21),
            ..ReplayConfig::default()
        };
        let mut a = LocalLearner::new(small_network(), config, true);
        let mut b = LocalLearner::new(small_network(), config, true);
        for i in 0..10 {
            let mut t = transition();
            t.reward = f64::from(i);
            let left = a.push_transition(&t).await.unwrap();
            let right = b.push_transition(&t).await.unwrap();
            assert_eq!(left, right);
        }
        assert_eq!(a.parameters(), b.parameters());
    }

    #[test]
    fn test_replay_config_validation() {
        assert!(ReplayConfig::default().validate().is_ok());
        for broken in [
            ReplayConfig { batch_size: 0, ..ReplayConfig::default() },
            ReplayConfig { capacity: 0, ..ReplayConfig::default() },
            ReplayConfig {
                prioritized: Some(PriorityConfig { alpha: -1.0, ..PriorityConfig::default() }),
                ..ReplayConfig::default()
            },
        ] {
            assert!(matches!(broken.validate(), Err(RLError::Config(_))));
        }
    }

    #[tokio::test]
    async fn test_remote_learner_answers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            while let Ok(Some(request)) = read_frame::<_, LearnerRequest>(&mut socket).await {
                if let LearnerRequest::Act { .. } = request {
                    let reply = LearnerResponse::Action { angle: 42.0, force: 0.8 };
                    write_frame(&mut socket, &reply).await.unwrap();
                }
            }
        });

        let mut learner = RemoteLearner::new(remote_config(port));
        tokio_test::assert_ok!(learner.push_transition(&transition()).await);
        let action = learner.request_action(&StateVector::zeros(4)).await.unwrap();
        assert_eq!(action, Action::new(42.0, 0.8));
        learner.close().await.unwrap();
        assert!(!learner.is_connected());
    }

    #[tokio::test]
    async fn test_silent_learner_times_out_then_backs_off() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // Accept and hold the socket without ever replying
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let mut learner = RemoteLearner::new(remote_config(port));
        let started = std::time::Instant::now();
        let result = learner.request_action(&StateVector::zeros(4)).await;
        assert!(matches!(result, Err(RLError::LearnerTimeout(200))));
        assert!(started.elapsed() < Duration::from_secs(2));

        // Reconnects are held off, so the next call fails fast
        let started = std::time::Instant::now();
        let result = learner.request_action(&StateVector::zeros(4)).await;
        assert!(matches!(result, Err(RLError::Learner(_))));
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_refused_connection_is_transient() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut learner = RemoteLearner::new(remote_config(port));
        let err = learner.request_action(&StateVector::zeros(4)).await.unwrap_err();
        assert!(err.is_transient());
    }
}
