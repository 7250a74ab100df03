//! Experience replay for the local learner
//!
//! [`ReplayBuffer`] samples uniformly. [`PrioritizedReplayBuffer`] samples in
//! proportion to `priority^alpha` and returns importance-sampling weights
//! `(N·P(i))^-beta`, normalized by the largest weight in the batch.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use slingshot_rl_core::{RLError, Result, Transition};

/// Bounded FIFO of transitions with uniform sampling
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    buffer: VecDeque<Transition>,
    capacity: usize,
}

impl ReplayBuffer {
    /// Create a new replay buffer
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
        }
    }

    /// Add a transition, evicting the oldest when full
    pub fn push(&mut self, transition: Transition) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    /// Sample up to `batch_size` distinct transitions.
    ///
    /// Returns fewer than requested when the buffer is smaller than the batch.
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<Transition> {
        let indices: Vec<usize> = (0..self.buffer.len()).collect();
        indices
            .choose_multiple(rng, batch_size.min(self.buffer.len()))
            .map(|&i| self.buffer[i].clone())
            .collect()
    }

    /// Get the current size of the buffer
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Maximum number of stored transitions
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Exponents of prioritized replay
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PriorityConfig {
    /// How strongly priorities skew sampling; 0 is uniform
    pub alpha: f64,
    /// Importance-sampling correction; 1 fully compensates the skew
    pub beta: f64,
    /// Added to every priority so nothing becomes unsampleable
    pub epsilon: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta: 0.4,
            epsilon: 1e-6,
        }
    }
}

impl PriorityConfig {
    /// Require `alpha >= 0`, `0 <= beta <= 1` and `epsilon > 0`
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(RLError::Config(format!(
                "priority alpha must be >= 0, got {}",
                self.alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.beta) {
            return Err(RLError::Config(format!(
                "priority beta must be in [0, 1], got {}",
                self.beta
            )));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(RLError::Config(format!(
                "priority epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

/// Transitions drawn by priority, with the positions needed to re-prioritize them
#[derive(Debug, Clone, Default)]
pub struct PrioritizedBatch {
    /// Buffer positions, valid until the next push
    pub indices: Vec<usize>,
    /// Sampled transitions
    pub transitions: Vec<Transition>,
    /// Importance-sampling weights in (0, 1]
    pub weights: Vec<f32>,
}

/// Bounded FIFO of transitions sampled by priority
#[derive(Debug, Clone)]
pub struct PrioritizedReplayBuffer {
    buffer: VecDeque<Transition>,
    priorities: VecDeque<f64>,
    capacity: usize,
    config: PriorityConfig,
    max_priority: f64,
}

impl PrioritizedReplayBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new(capacity: usize, config: PriorityConfig) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(4096)),
            priorities: VecDeque::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
            config,
            max_priority: 1.0,
        }
    }

    /// Add a transition at the highest priority seen so far
    pub fn push(&mut self, transition: Transition) {
        self.insert(transition, self.max_priority);
    }

    /// Add a transition at an explicit priority
    pub fn push_with_priority(&mut self, transition: Transition, priority: f64) {
        let priority = self.clean(priority);
        self.max_priority = self.max_priority.max(priority);
        self.insert(transition, priority);
    }

    fn insert(&mut self, transition: Transition, priority: f64) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
            self.priorities.pop_front();
        }
        self.buffer.push_back(transition);
        self.priorities.push_back(priority);
    }

    fn clean(&self, priority: f64) -> f64 {
        if priority.is_finite() {
            priority.abs() + self.config.epsilon
        } else {
            self.max_priority
        }
    }

    fn probabilities(&self) -> Vec<f64> {
        let scaled: Vec<f64> = self
            .priorities
            .iter()
            .map(|p| p.powf(self.config.alpha))
            .collect();
        let total: f64 = scaled.iter().sum();
        scaled.into_iter().map(|p| p / total).collect()
    }

    /// Draw up to `batch_size` distinct transitions by priority
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Result<PrioritizedBatch> {
        let count = batch_size.min(self.buffer.len());
        if count == 0 {
            return Ok(PrioritizedBatch::default());
        }

        let probabilities = self.probabilities();
        let positions: Vec<usize> = (0..self.buffer.len()).collect();
        let indices: Vec<usize> = positions
            .choose_multiple_weighted(rng, count, |&i| probabilities[i])
            .map_err(|e| RLError::Network(format!("prioritized sampling failed: {e}")))?
            .copied()
            .collect();

        let n = self.buffer.len() as f64;
        let raw: Vec<f64> = indices
            .iter()
            .map(|&i| (n * probabilities[i]).powf(-self.config.beta))
            .collect();
        let largest = raw.iter().copied().fold(f64::MIN_POSITIVE, f64::max);

        Ok(PrioritizedBatch {
            transitions: indices.iter().map(|&i| self.buffer[i].clone()).collect(),
            weights: raw.iter().map(|w| (w / largest) as f32).collect(),
            indices,
        })
    }

    /// Replace the priorities at `indices`, typically with absolute TD errors
    pub fn update_priorities(&mut self, indices: &[usize], priorities: &[f32]) {
        for (&index, &priority) in indices.iter().zip(priorities) {
            let priority = self.clean(f64::from(priority));
            if let Some(slot) = self.priorities.get_mut(index) {
                *slot = priority;
                self.max_priority = self.max_priority.max(priority);
            }
        }
    }

    /// Priority stored at `index`
    #[must_use]
    pub fn priority(&self, index: usize) -> Option<f64> {
        self.priorities.get(index).copied()
    }

    /// Get the current size of the buffer
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
