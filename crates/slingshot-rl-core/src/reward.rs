//! Reward signals for shots and episodes

use serde::{Deserialize, Serialize};

use crate::action::Outcome;

/// Reward constants
///
/// No clipping is applied anywhere: episode totals grow with the number of
/// shots and the level layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RewardConfig {
    /// Added when the shot hits
    pub hit_reward: f64,
    /// Added when the shot misses (negative)
    pub miss_penalty: f64,
    /// Multiplied by damage dealt
    pub damage_coefficient: f64,
    /// Multiplied by targets destroyed
    pub target_destroyed_reward: f64,
    /// Added once when the level is won
    pub episode_complete_reward: f64,
    /// Multiplied by seconds since episode start (negative)
    pub time_penalty_rate: f64,
    /// Multiplied by projectiles left when the level is won
    pub unused_resource_bonus: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            hit_reward: 100.0,
            miss_penalty: -10.0,
            damage_coefficient: 0.5,
            target_destroyed_reward: 200.0,
            episode_complete_reward: 500.0,
            time_penalty_rate: -0.1,
            unused_resource_bonus: 50.0,
        }
    }
}

/// Per-term view of a step reward
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    /// Hit reward or miss penalty
    pub hit: f64,
    /// Damage term
    pub damage: f64,
    /// Targets-destroyed term
    pub targets: f64,
    /// Elapsed-time term
    pub time: f64,
}

impl RewardBreakdown {
    /// Sum of all terms
    #[must_use]
    pub fn total(&self) -> f64 {
        self.hit + self.damage + self.targets + self.time
    }
}

/// Scores outcomes; holds no episode state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RewardEvaluator {
    config: RewardConfig,
}

impl RewardEvaluator {
    /// Create an evaluator with the given constants
    #[must_use]
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    /// Reward constants
    #[must_use]
    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    /// Split a step reward into its four terms
    #[must_use]
    pub fn breakdown(&self, outcome: &Outcome) -> RewardBreakdown {
        let c = &self.config;
        RewardBreakdown {
            hit: if outcome.hit { c.hit_reward } else { c.miss_penalty },
            damage: c.damage_coefficient * outcome.damage,
            targets: c.target_destroyed_reward * f64::from(outcome.targets_destroyed),
            time: c.time_penalty_rate * outcome.elapsed_secs,
        }
    }

    /// Step reward for one resolved shot
    #[must_use]
    pub fn score(&self, outcome: &Outcome) -> f64 {
        self.breakdown(outcome).total()
    }

    /// Terminal bonus: completion reward plus a bonus per unused projectile,
    /// both only when the level was won
    #[must_use]
    pub fn episode_bonus(&self, completed: bool, resources_unused: u32) -> f64 {
        if completed {
            self.config.episode_complete_reward
                + self.config.unused_resource_bonus * f64::from(resources_unused)
        } else {
            0.0
        }
    }
}
