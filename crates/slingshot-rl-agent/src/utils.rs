//! Schedules and rolling statistics shared by the agent and trainer

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use slingshot_rl_core::{RLError, Result};

/// Multiplicative exploration decay, applied once per finished episode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExplorationSchedule {
    /// Rate at the first episode
    pub initial_rate: f64,
    /// Factor applied after every episode
    pub decay: f64,
    /// Floor the rate never drops below
    pub min_rate: f64,
}

impl Default for ExplorationSchedule {
    fn default() -> Self {
        Self {
            initial_rate: 1.0,
            decay: 0.995,
            min_rate: 0.01,
        }
    }
}

impl ExplorationSchedule {
    /// Create a validated schedule
    pub fn new(initial_rate: f64, decay: f64, min_rate: f64) -> Result<Self> {
        let schedule = Self {
            initial_rate,
            decay,
            min_rate,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Require `0 < min_rate <= initial_rate <= 1` and `0 < decay <= 1`
    pub fn validate(&self) -> Result<()> {
        if !(self.min_rate > 0.0 && self.min_rate <= self.initial_rate && self.initial_rate <= 1.0) {
            return Err(RLError::Config(format!(
                "exploration rates must satisfy 0 < min ({}) <= initial ({}) <= 1",
                self.min_rate, self.initial_rate
            )));
        }
        if !(self.decay > 0.0 && self.decay <= 1.0) {
            return Err(RLError::Config(format!(
                "exploration decay must be in (0, 1], got {}",
                self.decay
            )));
        }
        Ok(())
    }

    /// Next rate after one episode
    #[must_use]
    pub fn decay(&self, rate: f64) -> f64 {
        (rate * self.decay).max(self.min_rate)
    }

    /// Rate after `episodes` decays from the initial rate
    #[must_use]
    pub fn rate_after(&self, episodes: u64) -> f64 {
        let exponent = i32::try_from(episodes).unwrap_or(i32::MAX);
        (self.initial_rate * self.decay.powi(exponent)).max(self.min_rate)
    }
}

/// Fixed-capacity window over the most recent values
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    values: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    /// Create an empty window
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Push a value, evicting the oldest when full
    pub fn push(&mut self, value: T) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Number of values held
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the window is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether the window holds `capacity` values
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    /// Oldest-first iterator
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.values.iter()
    }

    /// Drop every value
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl RollingWindow<f64> {
    /// Mean of the window, 0 when empty
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.values.iter().sum::<f64>() / self.values.len() as f64
        }
    }

    /// Values as a vector, oldest first
    #[must_use]
    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }
}

impl RollingWindow<bool> {
    /// Fraction of `true` values, 0 when empty
    #[must_use]
    pub fn rate(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.values.iter().filter(|v| **v).count() as f64 / self.values.len() as f64
        }
    }
}

/// Least-squares slope of `values` against their index
#[must_use]
pub fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });

    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_decay_floors_at_min() {
        let schedule = ExplorationSchedule::new(1.0, 0.5, 0.1).unwrap();
        let mut rate = schedule.initial_rate;
        let mut seen = Vec::new();
        for _ in 0..6 {
            rate = schedule.decay(rate);
            seen.push(rate);
        }
        assert_eq!(seen, vec![0.5, 0.25, 0.125, 0.1, 0.1, 0.1]);
        assert_relative_eq!(schedule.rate_after(2), 0.25);
        assert_relative_eq!(schedule.rate_after(1_000), 0.1);
    }

    #[test]
    fn test_default_decay_converges_to_floor() {
        let schedule = ExplorationSchedule::default();
        let mut rate = 1.0;
        for _ in 0..2_000 {
            let next = schedule.decay(rate);
            assert!(next <= rate);
            assert!(next >= 0.01);
            rate = next;
        }
        assert_eq!(rate, 0.01);
    }

    #[test]
    fn test_invalid_schedules() {
        assert!(ExplorationSchedule::new(1.0, 0.9, 0.0).is_err());
        assert!(ExplorationSchedule::new(0.5, 0.9, 0.6).is_err());
        assert!(ExplorationSchedule::new(1.0, 1.5, 0.1).is_err());
        assert!(ExplorationSchedule::new(1.2, 0.9, 0.1).is_err());
    }

    #[test]
    fn test_rolling_window() {
        let mut window = RollingWindow::new(3);
        assert_eq!(window.mean(), 0.0);
        for v in [1.0, 2.0, 3.0, 4.0] {
            window.push(v);
        }
        assert!(window.is_full());
        assert_eq!(window.to_vec(), vec![2.0, 3.0, 4.0]);
        assert_relative_eq!(window.mean(), 3.0);

        let mut wins = RollingWindow::new(4);
        for v in [true, false, true, true] {
            wins.push(v);
        }
        assert_relative_eq!(wins.rate(), 0.75);
    }

    #[test]
    fn test_linear_slope() {
        assert_eq!(linear_slope(&[]), 0.0);
        assert_eq!(linear_slope(&[5.0]), 0.0);
        assert_relative_eq!(linear_slope(&[1.0, 3.0, 5.0, 7.0]), 2.0);
        assert_relative_eq!(linear_slope(&[4.0, 4.0, 4.0]), 0.0);
        assert!(linear_slope(&[0.9, 0.7, 0.6, 0.2]) < 0.0);
    }
}
