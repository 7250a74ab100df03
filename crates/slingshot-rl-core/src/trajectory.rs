//! Transitions and per-episode trajectories

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::encoder::StateVector;

/// Single (s, a, r, s', done) step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// State the action was chosen in
    pub state: StateVector,
    /// Action taken
    pub action: Action,
    /// Reward received, terminal bonus included on the last step
    pub reward: f64,
    /// State after the outcome settled
    pub next_state: StateVector,
    /// Whether the episode ended with this step
    pub done: bool,
}

/// Ordered transitions of one episode
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    /// Sequence of transitions
    pub transitions: Vec<Transition>,
    /// Total reward
    pub total_reward: f64,
    /// Episode index this trajectory belongs to
    pub episode: u64,
}

impl Trajectory {
    /// Create a new empty trajectory
    #[must_use]
    pub fn new(episode: u64) -> Self {
        Self {
            transitions: Vec::new(),
            total_reward: 0.0,
            episode,
        }
    }

    /// Add a transition to the trajectory
    pub fn push(&mut self, transition: Transition) {
        self.total_reward += transition.reward;
        self.transitions.push(transition);
    }

    /// Get the length of the trajectory
    #[must_use]
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Check if trajectory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Discounted return from every step to the end of the episode
    #[must_use]
    pub fn returns(&self, gamma: f64) -> Vec<f64> {
        let mut returns = vec![0.0; self.len()];
        let mut running_return = 0.0;

        for i in (0..self.len()).rev() {
            if self.transitions[i].done {
                running_return = 0.0;
            }
            running_return = self.transitions[i].reward + gamma * running_return;
            returns[i] = running_return;
        }

        returns
    }
}
