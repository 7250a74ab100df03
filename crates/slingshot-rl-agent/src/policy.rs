//! Actor-critic policy/value network
//!
//! Pure ndarray MLP: shared hidden layers (ReLU + inverted dropout) feed an
//! action-mean head, a state-dependent log-std head and a state-value head.
//!
//! The action distribution is a diagonal Gaussian over *normalized* action
//! units `u = (angle / 90, force)`. The mean is bounded per dimension
//! (`tanh` for the angle, `sigmoid` for the force); samples are clamped into
//! the action box before they are turned into an [`Action`].

use ndarray::{Array1, Array2, Axis, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Normal as Density};

use slingshot_rl_core::action::MAX_ANGLE;
use slingshot_rl_core::{Action, RLError, Result, StateVector, Transition, STATE_DIM};

/// Lower clamp of the log-std head
pub const LOG_STD_MIN: f32 = -20.0;
/// Upper clamp of the log-std head
pub const LOG_STD_MAX: f32 = 2.0;

const ACTION_DIM: usize = 2;

/// Policy network trait for the training loop
pub trait PolicyNetwork: Send + Sync {
    /// Deterministic forward pass (no dropout)
    fn forward(&self, state: &StateVector) -> Result<PolicyOutput>;

    /// Sample an action from the policy and return it with the state value
    fn predict(&mut self, state: &StateVector) -> Result<(Action, f32)>;

    /// Mean action and state value, no sampling
    fn act_deterministic(&self, state: &StateVector) -> Result<(Action, f32)> {
        let output = self.forward(state)?;
        Ok((output.mean_action(), output.value))
    }

    /// One advantage actor-critic step on a batch of transitions
    fn update(&mut self, batch: &[Transition]) -> Result<LossStats> {
        let weights = vec![1.0f32; batch.len()];
        self.update_weighted(batch, &weights).map(|(stats, _)| stats)
    }

    /// Actor-critic step with a loss weight per transition.
    ///
    /// Also returns each transition's absolute TD error `|target − V(s)|`.
    fn update_weighted(
        &mut self,
        batch: &[Transition],
        weights: &[f32],
    ) -> Result<(LossStats, Vec<f32>)>;

    /// Flattened parameters
    fn parameters(&self) -> Vec<f32>;

    /// Replace all parameters from a flat slice
    fn set_parameters(&mut self, params: &[f32]) -> Result<()>;

    /// Number of scalar parameters
    fn parameter_count(&self) -> usize;
}

/// Output from the policy network
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutput {
    /// Bounded mean in normalized action units
    pub mean: [f32; ACTION_DIM],
    /// Clamped log standard deviation
    pub log_std: [f32; ACTION_DIM],
    /// State value estimate
    pub value: f32,
}

impl PolicyOutput {
    /// Mean converted to an [`Action`]
    #[must_use]
    pub fn mean_action(&self) -> Action {
        to_action(self.mean)
    }

    /// Log-density of `action` under this output's Gaussian
    pub fn log_prob(&self, action: &Action) -> Result<f32> {
        let u = to_normalized(action);
        let mut total = 0.0;
        for i in 0..ACTION_DIM {
            let density = Density::new(f64::from(self.mean[i]), f64::from(self.log_std[i].exp()))
                .map_err(|e| RLError::Network(e.to_string()))?;
            total += density.ln_pdf(f64::from(u[i]));
        }
        Ok(total as f32)
    }

    /// Differential entropy of the Gaussian
    #[must_use]
    pub fn entropy(&self) -> f32 {
        self.log_std
            .iter()
            .map(|s| 0.5 + 0.5 * (2.0 * std::f32::consts::PI).ln() + s)
            .sum()
    }
}

fn to_action(u: [f32; ACTION_DIM]) -> Action {
    Action::new(f64::from(u[0]) * MAX_ANGLE, f64::from(u[1]))
}

fn to_normalized(action: &Action) -> [f32; ACTION_DIM] {
    [(action.angle / MAX_ANGLE) as f32, action.force as f32]
}

/// Network and optimizer hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Input dimension
    pub input_dim: usize,
    /// Hidden layer sizes
    pub hidden_dims: Vec<usize>,
    /// Dropout probability on hidden activations while training
    pub dropout: f32,
    /// Adam learning rate
    pub learning_rate: f32,
    /// Discount factor
    pub gamma: f32,
    /// Weight of the value loss
    pub value_loss_coef: f32,
    /// Weight of the entropy bonus
    pub entropy_coef: f32,
    /// Global gradient-norm clip
    pub max_grad_norm: f32,
    /// L2 weight decay folded into the Adam step
    pub weight_decay: f32,
    /// Initial bias of the log-std head
    pub init_log_std: f32,
    /// Seed for initialization, dropout and sampling
    pub seed: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input_dim: STATE_DIM,
            hidden_dims: vec![256, 256, 128],
            dropout: 0.2,
            learning_rate: 3e-4,
            gamma: 0.99,
            value_loss_coef: 0.5,
            entropy_coef: 0.01,
            max_grad_norm: 1.0,
            weight_decay: 1e-5,
            init_log_std: -0.5,
            seed: None,
        }
    }
}

impl NetworkConfig {
    /// Reject shapes and coefficients the network cannot train with
    pub fn validate(&self) -> Result<()> {
        if self.input_dim == 0 || self.hidden_dims.is_empty() || self.hidden_dims.contains(&0) {
            return Err(RLError::Config(format!(
                "network needs a non-empty input and hidden layers, got {} / {:?}",
                self.input_dim, self.hidden_dims
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(RLError::Config(format!("dropout must be in [0, 1), got {}", self.dropout)));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(RLError::Config(format!("gamma must be in [0, 1], got {}", self.gamma)));
        }
        if self.learning_rate <= 0.0 {
            return Err(RLError::Config("learning rate must be positive".to_string()));
        }
        Ok(())
    }
}

/// Training statistics of one update
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossStats {
    /// Mean −log π(a|s)·A
    pub policy_loss: f32,
    /// Mean (V(s) − target)²
    pub value_loss: f32,
    /// Mean policy entropy
    pub entropy: f32,
    /// policy + c_v·value − β·entropy
    pub total_loss: f32,
    /// Mean advantage over the batch
    pub mean_advantage: f32,
    /// Gradient norm before clipping
    pub grad_norm: f32,
    /// Transitions in the batch
    pub batch_size: usize,
}

/// Fully connected layer, `y = x·W + b` with `W` shaped (in, out)
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Dense {
    pub(crate) w: Array2<f32>,
    pub(crate) b: Array1<f32>,
}

impl Dense {
    fn xavier<R: Rng>(in_dim: usize, out_dim: usize, gain: f32, rng: &mut R) -> Self {
        let limit = gain * (6.0 / (in_dim + out_dim) as f32).sqrt();
        Self {
            w: Array2::from_shape_fn((in_dim, out_dim), |_| rng.gen_range(-limit..limit)),
            b: Array1::zeros(out_dim),
        }
    }

    fn zeros_like(&self) -> Self {
        Self {
            w: Array2::zeros(self.w.raw_dim()),
            b: Array1::zeros(self.b.raw_dim()),
        }
    }

    fn forward(&self, x: &Array1<f32>) -> Array1<f32> {
        x.dot(&self.w) + &self.b
    }

    fn len(&self) -> usize {
        self.w.len() + self.b.len()
    }

    /// Accumulate the gradient of `y = x·W + b` given `dL/dy`
    fn accumulate(&mut self, x: &Array1<f32>, grad_out: &Array1<f32>) {
        let outer = x
            .view()
            .insert_axis(Axis(1))
            .dot(&grad_out.view().insert_axis(Axis(0)));
        self.w += &outer;
        self.b += grad_out;
    }

    fn scale(&mut self, factor: f32) {
        self.w.mapv_inplace(|g| g * factor);
        self.b.mapv_inplace(|g| g * factor);
    }

    fn sum_squares(&self) -> f32 {
        self.w.iter().chain(self.b.iter()).map(|g| g * g).sum()
    }
}

/// Adam moments for one layer
#[derive(Debug, Clone)]
struct Moments {
    m: Dense,
    v: Dense,
}

#[derive(Debug, Clone, Copy)]
struct AdamStep {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    t: i32,
}

impl AdamStep {
    fn apply(&self, param: &mut Dense, grad: &Dense, moments: &mut Moments) {
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);
        let step = |p: &mut f32, m: &mut f32, v: &mut f32, g: f32| {
            let g = g + self.weight_decay * *p;
            *m = self.beta1 * *m + (1.0 - self.beta1) * g;
            *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *p -= self.lr * m_hat / (v_hat.sqrt() + self.epsilon);
        };
        Zip::from(&mut param.w)
            .and(&mut moments.m.w)
            .and(&mut moments.v.w)
            .and(&grad.w)
            .for_each(|p, m, v, &g| step(p, m, v, g));
        Zip::from(&mut param.b)
            .and(&mut moments.m.b)
            .and(&mut moments.v.b)
            .and(&grad.b)
            .for_each(|p, m, v, &g| step(p, m, v, g));
    }
}

/// Gradients (or any per-layer tensor set) in network layout
#[derive(Debug, Clone)]
pub(crate) struct Gradients {
    pub(crate) hidden: Vec<Dense>,
    pub(crate) mean: Dense,
    pub(crate) log_std: Dense,
    pub(crate) value: Dense,
}

impl Gradients {
    fn layers_mut(&mut self) -> impl Iterator<Item = &mut Dense> {
        self.hidden
            .iter_mut()
            .chain([&mut self.mean, &mut self.log_std, &mut self.value])
    }

    fn layers(&self) -> impl Iterator<Item = &Dense> {
        self.hidden
            .iter()
            .chain([&self.mean, &self.log_std, &self.value])
    }

    fn norm(&self) -> f32 {
        self.layers().map(Dense::sum_squares).sum::<f32>().sqrt()
    }
}

/// Activations kept from a forward pass for backprop
struct ForwardTrace {
    /// Input of every hidden layer
    inputs: Vec<Array1<f32>>,
    /// Pre-activation of every hidden layer
    pre: Vec<Array1<f32>>,
    /// Output of the last hidden layer (after dropout)
    features: Array1<f32>,
    /// Log-std before clamping
    raw_log_std: Array1<f32>,
    output: PolicyOutput,
}

/// Pure ndarray actor-critic network
pub struct ActorCriticNetwork {
    config: NetworkConfig,
    layers: Gradients,
    moments: Vec<Moments>,
    updates: i32,
    rng: StdRng,
}

impl ActorCriticNetwork {
    /// Create a freshly initialized network
    pub fn new(config: NetworkConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut hidden = Vec::with_capacity(config.hidden_dims.len());
        let mut prev_dim = config.input_dim;
        for &dim in &config.hidden_dims {
            hidden.push(Dense::xavier(prev_dim, dim, 1.0, &mut rng));
            prev_dim = dim;
        }

        let mean = Dense::xavier(prev_dim, ACTION_DIM, 1.0, &mut rng);
        let mut log_std = Dense::xavier(prev_dim, ACTION_DIM, 0.1, &mut rng);
        log_std.b.fill(config.init_log_std);
        let value = Dense::xavier(prev_dim, 1, 1.0, &mut rng);

        let layers = Gradients {
            hidden,
            mean,
            log_std,
            value,
        };
        let moments = layers
            .layers()
            .map(|l| Moments {
                m: l.zeros_like(),
                v: l.zeros_like(),
            })
            .collect();

        Ok(Self {
            config,
            layers,
            moments,
            updates: 0,
            rng,
        })
    }

    /// Network configuration
    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Updates applied so far
    #[must_use]
    pub fn updates(&self) -> u64 {
        u64::try_from(self.updates).unwrap_or(0)
    }

    fn input(&self, state: &StateVector) -> Result<Array1<f32>> {
        state.check_len(self.config.input_dim)?;
        Ok(Array1::from_vec(state.0.clone()))
    }

    fn dropout_masks(&mut self) -> Vec<Array1<f32>> {
        let p = self.config.dropout;
        let keep_scale = 1.0 / (1.0 - p);
        let rng = &mut self.rng;
        self.config
            .hidden_dims
            .iter()
            .map(|&dim| {
                Array1::from_shape_fn(dim, |_| if rng.gen::<f32>() < p { 0.0 } else { keep_scale })
            })
            .collect()
    }

    /// Forward pass; `masks` enables dropout
    fn trace(&self, input: Array1<f32>, masks: Option<&[Array1<f32>]>) -> ForwardTrace {
        let mut inputs = Vec::with_capacity(self.layers.hidden.len());
        let mut pre = Vec::with_capacity(self.layers.hidden.len());
        let mut hidden = input;

        for (i, layer) in self.layers.hidden.iter().enumerate() {
            let z = layer.forward(&hidden);
            let mut activated = z.mapv(|v| v.max(0.0));
            if let Some(masks) = masks {
                activated *= &masks[i];
            }
            inputs.push(hidden);
            pre.push(z);
            hidden = activated;
        }

        let raw_mean = self.layers.mean.forward(&hidden);
        let raw_log_std = self.layers.log_std.forward(&hidden);
        let value = self.layers.value.forward(&hidden)[0];

        let output = PolicyOutput {
            mean: [raw_mean[0].tanh(), sigmoid(raw_mean[1])],
            log_std: [
                raw_log_std[0].clamp(LOG_STD_MIN, LOG_STD_MAX),
                raw_log_std[1].clamp(LOG_STD_MIN, LOG_STD_MAX),
            ],
            value,
        };

        ForwardTrace {
            inputs,
            pre,
            features: hidden,
            raw_log_std,
            output,
        }
    }

    /// Bootstrapped targets `r + γ·V(s')·(1 − done)`, evaluated without dropout
    fn targets(&self, batch: &[Transition]) -> Result<Vec<f32>> {
        batch
            .iter()
            .map(|t| {
                let next_value = if t.done {
                    0.0
                } else {
                    self.trace(self.input(&t.next_state)?, None).output.value
                };
                Ok(t.reward as f32 + self.config.gamma * next_value)
            })
            .collect()
    }

    /// Weighted mean A2C loss over the batch, its gradient w.r.t. every
    /// parameter, and the absolute TD error of each transition.
    /// Targets and advantages are treated as constants.
    fn loss_and_gradients(
        &self,
        batch: &[Transition],
        targets: &[f32],
        weights: &[f32],
        masks: Option<&[Vec<Array1<f32>>]>,
    ) -> Result<(LossStats, Gradients, Vec<f32>)> {
        let n = batch.len() as f32;
        let mut grads = Gradients {
            hidden: self.layers.hidden.iter().map(Dense::zeros_like).collect(),
            mean: self.layers.mean.zeros_like(),
            log_std: self.layers.log_std.zeros_like(),
            value: self.layers.value.zeros_like(),
        };
        let mut stats = LossStats {
            batch_size: batch.len(),
            ..LossStats::default()
        };

        let c_v = self.config.value_loss_coef;
        let beta = self.config.entropy_coef;
        let mut td_errors = Vec::with_capacity(batch.len());

        for (i, ((transition, &target), &weight)) in
            batch.iter().zip(targets).zip(weights).enumerate()
        {
            let scale = weight / n;
            let sample_masks = masks.map(|m| m[i].as_slice());
            let trace = self.trace(self.input(&transition.state)?, sample_masks);
            let out = &trace.output;

            let advantage = target - out.value;
            let log_prob = out.log_prob(&transition.action)?;
            let entropy = out.entropy();

            stats.policy_loss += -log_prob * advantage * scale;
            stats.value_loss += (out.value - target).powi(2) * scale;
            stats.entropy += entropy * scale;
            stats.mean_advantage += advantage / n;
            td_errors.push(advantage.abs());

            // Head gradients
            let u = to_normalized(&transition.action);
            let mut g_mean = Array1::zeros(ACTION_DIM);
            let mut g_log_std = Array1::zeros(ACTION_DIM);
            for d in 0..ACTION_DIM {
                let sigma = out.log_std[d].exp();
                let z = (u[d] - out.mean[d]) / sigma;
                let d_mean = -advantage * z / sigma;
                let d_bound = if d == 0 {
                    1.0 - out.mean[0] * out.mean[0]
                } else {
                    out.mean[1] * (1.0 - out.mean[1])
                };
                g_mean[d] = d_mean * d_bound * scale;

                let raw = trace.raw_log_std[d];
                if (LOG_STD_MIN..=LOG_STD_MAX).contains(&raw) {
                    g_log_std[d] = (-advantage * (z * z - 1.0) - beta) * scale;
                }
            }
            let g_value = Array1::from_elem(1, 2.0 * c_v * (out.value - target) * scale);

            grads.mean.accumulate(&trace.features, &g_mean);
            grads.log_std.accumulate(&trace.features, &g_log_std);
            grads.value.accumulate(&trace.features, &g_value);

            let mut g_hidden = self.layers.mean.w.dot(&g_mean)
                + self.layers.log_std.w.dot(&g_log_std)
                + self.layers.value.w.dot(&g_value);

            for layer in (0..self.layers.hidden.len()).rev() {
                let mut g_pre = g_hidden;
                Zip::from(&mut g_pre)
                    .and(&trace.pre[layer])
                    .for_each(|g, &z| {
                        if z <= 0.0 {
                            *g = 0.0;
                        }
                    });
                if let Some(masks) = sample_masks {
                    g_pre *= &masks[layer];
                }
                grads.hidden[layer].accumulate(&trace.inputs[layer], &g_pre);
                g_hidden = self.layers.hidden[layer].w.dot(&g_pre);
            }
        }

        stats.total_loss = stats.policy_loss + c_v * stats.value_loss - beta * stats.entropy;
        Ok((stats, grads, td_errors))
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl PolicyNetwork for ActorCriticNetwork {
    fn forward(&self, state: &StateVector) -> Result<PolicyOutput> {
        Ok(self.trace(self.input(state)?, None).output)
    }

    fn predict(&mut self, state: &StateVector) -> Result<(Action, f32)> {
        let output = self.forward(state)?;
        let mut u = [0.0f32; ACTION_DIM];
        for (d, slot) in u.iter_mut().enumerate() {
            let dist = Normal::new(output.mean[d], output.log_std[d].exp())
                .map_err(|e| RLError::Network(e.to_string()))?;
            *slot = dist.sample(&mut self.rng);
        }
        u[0] = u[0].clamp(-1.0, 1.0);
        u[1] = u[1].clamp(0.0, 1.0);
        Ok((to_action(u), output.value))
    }

    fn update_weighted(
        &mut self,
        batch: &[Transition],
        weights: &[f32],
    ) -> Result<(LossStats, Vec<f32>)> {
        if batch.is_empty() {
            return Err(RLError::Network("cannot update on an empty batch".to_string()));
        }
        if weights.len() != batch.len() {
            return Err(RLError::DimensionMismatch {
                expected: batch.len(),
                actual: weights.len(),
            });
        }

        let targets = self.targets(batch)?;
        let masks: Vec<Vec<Array1<f32>>> = if self.config.dropout > 0.0 {
            (0..batch.len()).map(|_| self.dropout_masks()).collect()
        } else {
            Vec::new()
        };
        let masks = if masks.is_empty() { None } else { Some(masks.as_slice()) };

        let (mut stats, mut grads, td_errors) =
            self.loss_and_gradients(batch, &targets, weights, masks)?;
        if !stats.total_loss.is_finite() {
            return Err(RLError::Network(format!(
                "non-finite loss {}, skipping update",
                stats.total_loss
            )));
        }

        stats.grad_norm = grads.norm();
        if stats.grad_norm > self.config.max_grad_norm {
            let scale = self.config.max_grad_norm / stats.grad_norm;
            grads.layers_mut().for_each(|g| g.scale(scale));
        }

        self.updates += 1;
        let step = AdamStep {
            lr: self.config.learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: self.config.weight_decay,
            t: self.updates,
        };
        for ((param, grad), moments) in self
            .layers
            .layers_mut()
            .zip(grads.layers())
            .zip(self.moments.iter_mut())
        {
            step.apply(param, grad, moments);
        }

        Ok((stats, td_errors))
    }

    fn parameters(&self) -> Vec<f32> {
        let mut params = Vec::with_capacity(self.parameter_count());
        for layer in self.layers.layers() {
            params.extend(layer.w.iter().copied());
            params.extend(layer.b.iter().copied());
        }
        params
    }

    fn set_parameters(&mut self, params: &[f32]) -> Result<()> {
        let expected = self.parameter_count();
        if params.len() != expected {
            return Err(RLError::DimensionMismatch {
                expected,
                actual: params.len(),
            });
        }
        let mut values = params.iter().copied();
        for layer in self.layers.layers_mut() {
            for (slot, value) in layer.w.iter_mut().chain(layer.b.iter_mut()).zip(&mut values) {
                *slot = value;
            }
        }
        Ok(())
    }

    fn parameter_count(&self) -> usize {
        self.layers.layers().map(Dense::len).sum()
    }
}

/// Create a policy network based on configuration
pub fn create_policy_network(config: &NetworkConfig) -> Result<Box<dyn PolicyNetwork>> {
    Ok(Box::new(ActorCriticNetwork::new(config.clone())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small_config() -> NetworkConfig {
        NetworkConfig {
            input_dim: 4,
            hidden_dims: vec![16, 16, 8],
            dropout: 0.0,
            learning_rate: 1e-2,
            seed: Some(11),
            ..NetworkConfig::default()
        }
    }

    fn state(values: [f32; 4]) -> StateVector {
        StateVector(values.to_vec())
    }

    fn transition(reward: f64, done: bool) -> Transition {
        Transition {
            state: state([0.1, 0.2, 0.3, 0.4]),
            action: Action::new(30.0, 0.7),
            reward,
            next_state: state([0.4, 0.3, 0.2, 0.1]),
            done,
        }
    }

    #[test]
    fn test_default_architecture() {
        let network = ActorCriticNetwork::new(NetworkConfig {
            seed: Some(1),
            ..NetworkConfig::default()
        })
        .unwrap();
        let expected = (64 * 256 + 256) + (256 * 256 + 256) + (256 * 128 + 128)
            + 2 * (128 * 2 + 2)
            + (128 + 1);
        assert_eq!(network.parameter_count(), expected);

        let output = network.forward(&StateVector::zeros(64)).unwrap();
        assert!(output.value.is_finite());
        assert_relative_eq!(output.log_std[0], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_outputs_stay_in_range() {
        let mut network = ActorCriticNetwork::new(small_config()).unwrap();
        for scale in [-100.0f32, -1.0, 0.0, 1.0, 100.0] {
            let s = state([scale; 4]);
            let output = network.forward(&s).unwrap();
            assert!(output.mean[0] >= -1.0 && output.mean[0] <= 1.0);
            assert!(output.mean[1] >= 0.0 && output.mean[1] <= 1.0);
            assert!(output.log_std.iter().all(|v| (LOG_STD_MIN..=LOG_STD_MAX).contains(v)));

            let (action, _) = network.predict(&s).unwrap();
            assert!((-90.0..=90.0).contains(&action.angle));
            assert!((0.0..=1.0).contains(&action.force));
        }
    }

    #[test]
    fn test_wrong_input_length_rejected() {
        let network = ActorCriticNetwork::new(small_config()).unwrap();
        assert!(matches!(
            network.forward(&StateVector::zeros(64)),
            Err(RLError::DimensionMismatch { expected: 4, actual: 64 })
        ));
    }

    #[test]
    fn test_terminal_target_ignores_next_value() {
        let network = ActorCriticNetwork::new(small_config()).unwrap();
        let targets = network.targets(&[transition(5.0, true)]).unwrap();
        assert_eq!(targets, vec![5.0]);

        let next_value = network.forward(&state([0.4, 0.3, 0.2, 0.1])).unwrap().value;
        let targets = network.targets(&[transition(5.0, false)]).unwrap();
        assert_relative_eq!(targets[0], 5.0 + 0.99 * next_value, epsilon = 1e-5);
    }

    #[test]
    fn test_head_gradients_match_finite_differences() {
        let mut network = ActorCriticNetwork::new(small_config()).unwrap();
        let batch = vec![transition(2.0, false), transition(-1.0, true)];
        let targets = network.targets(&batch).unwrap();
        let weights = [1.0, 0.5];
        let (_, grads, _) = network
            .loss_and_gradients(&batch, &targets, &weights, None)
            .unwrap();

        let eps = 1e-2f32;
        for (head, index) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            let analytic = if head == 0 {
                grads.mean.b[index]
            } else {
                grads.log_std.b[index]
            };
            let original = *head_bias(&mut network, head, index);

            *head_bias(&mut network, head, index) = original + eps;
            let (plus, ..) = network
                .loss_and_gradients(&batch, &targets, &weights, None)
                .unwrap();
            *head_bias(&mut network, head, index) = original - eps;
            let (minus, ..) = network
                .loss_and_gradients(&batch, &targets, &weights, None)
                .unwrap();
            *head_bias(&mut network, head, index) = original;

            let numeric = (plus.total_loss - minus.total_loss) / (2.0 * eps);
            assert!(
                (numeric - analytic).abs() <= 1e-2 + 0.05 * analytic.abs(),
                "head {head}[{index}]: numeric {numeric} vs analytic {analytic}"
            );
        }
    }

    fn head_bias(network: &mut ActorCriticNetwork, head: usize, index: usize) -> &mut f32 {
        let layer = if head == 0 {
            &mut network.layers.mean
        } else {
            &mut network.layers.log_std
        };
        &mut layer.b[index]
    }

    #[test]
    fn test_update_fits_value() {
        let mut network = ActorCriticNetwork::new(small_config()).unwrap();
        let batch = vec![transition(1.0, true)];

        let first = network.update(&batch).unwrap();
        let mut last = first;
        for _ in 0..300 {
            last = network.update(&batch).unwrap();
        }
        assert!(last.value_loss < first.value_loss * 0.5, "{first:?} -> {last:?}");
        assert_eq!(network.updates(), 301);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let mut network = ActorCriticNetwork::new(small_config()).unwrap();
        assert!(network.update(&[]).is_err());
    }

    #[test]
    fn test_weighted_update_reports_td_errors() {
        let mut network = ActorCriticNetwork::new(small_config()).unwrap();
        let batch = vec![transition(2.0, true), transition(-1.0, true)];
        let values: Vec<f32> = batch
            .iter()
            .map(|t| network.forward(&t.state).unwrap().value)
            .collect();

        let (stats, td_errors) = network.update_weighted(&batch, &[1.0, 0.0]).unwrap();
        assert_eq!(stats.batch_size, 2);
        assert_eq!(td_errors.len(), 2);
        // Terminal targets are the bare rewards
        assert_relative_eq!(td_errors[0], (2.0 - values[0]).abs(), epsilon = 1e-5);
        assert_relative_eq!(td_errors[1], (-1.0 - values[1]).abs(), epsilon = 1e-5);

        assert!(matches!(
            network.update_weighted(&batch, &[1.0]),
            Err(RLError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_parameters_round_trip_preserves_outputs() {
        let source = ActorCriticNetwork::new(small_config()).unwrap();
        let mut target = ActorCriticNetwork::new(NetworkConfig {
            seed: Some(99),
            ..small_config()
        })
        .unwrap();

        target.set_parameters(&source.parameters()).unwrap();
        let s = state([0.5, -0.5, 0.25, 1.0]);
        assert_eq!(source.forward(&s).unwrap(), target.forward(&s).unwrap());
        assert!(target.set_parameters(&[0.0; 3]).is_err());
    }

    #[test]
    fn test_log_prob_peaks_at_mean() {
        let network = ActorCriticNetwork::new(small_config()).unwrap();
        let output = network.forward(&state([0.1, 0.1, 0.1, 0.1])).unwrap();
        let at_mean = output.log_prob(&output.mean_action()).unwrap();
        let away = output
            .log_prob(&Action::new(output.mean_action().angle + 45.0, 0.0))
            .unwrap();
        assert!(at_mean > away);
    }
}
