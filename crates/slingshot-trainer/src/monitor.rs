//! Rolling performance tracking with level-triggered alerts

use serde::{Deserialize, Serialize};

use slingshot_rl_agent::{linear_slope, RollingWindow};

/// Monitor windows and thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Episodes in the success and reward windows
    pub window: usize,
    /// Success-rate samples in the trend window
    pub trend_window: usize,
    /// Success rate below which performance counts as degraded
    pub success_threshold: f64,
    /// Slope below `-trend_epsilon` counts as declining
    pub trend_epsilon: f64,
    /// Slope below `-strong_decline` counts as strongly declining
    pub strong_decline: f64,
    /// Average reward below which retraining is advised
    pub reward_floor: f64,
    /// Episodes recorded before any alert can fire
    pub min_samples: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: 100,
            trend_window: 10,
            success_threshold: 0.5,
            trend_epsilon: 0.001,
            strong_decline: 0.02,
            reward_floor: 0.0,
            min_samples: 10,
        }
    }
}

/// Result of one [`PerformanceMonitor::check`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorReport {
    /// Success rate over the window
    pub success_rate: f64,
    /// Average reward over the window
    pub average_reward: f64,
    /// Least-squares slope of recent success-rate samples
    pub trend: f64,
    /// Episodes in the window
    pub samples: usize,
    /// Success rate low and falling
    pub performance_drop: bool,
    /// Success rate very low and falling fast or rewards poor
    pub retraining_recommended: bool,
}

/// Success/reward windows plus a success-rate trend
#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    config: MonitorConfig,
    successes: RollingWindow<bool>,
    rewards: RollingWindow<f64>,
    trend: RollingWindow<f64>,
}

impl PerformanceMonitor {
    /// Create an empty monitor
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            successes: RollingWindow::new(config.window),
            rewards: RollingWindow::new(config.window),
            trend: RollingWindow::new(config.trend_window),
        }
    }

    /// Record one finished episode
    pub fn record(&mut self, success: bool, reward: f64) {
        self.successes.push(success);
        self.rewards.push(reward);
        self.push_rate_sample(self.successes.rate());
    }

    /// Push a success-rate sample into the trend window directly
    pub fn push_rate_sample(&mut self, rate: f64) {
        self.trend.push(rate);
    }

    /// Slope of the trend window
    #[must_use]
    pub fn trend(&self) -> f64 {
        linear_slope(&self.trend.to_vec())
    }

    /// Evaluate alerts against the current windows
    #[must_use]
    pub fn check(&self) -> MonitorReport {
        let success_rate = self.successes.rate();
        let average_reward = self.rewards.mean();
        let trend = self.trend();
        let warmed_up = self.successes.len() >= self.config.min_samples;

        let threshold = self.config.success_threshold;
        let performance_drop =
            warmed_up && success_rate < threshold && trend < -self.config.trend_epsilon;
        let retraining_recommended = warmed_up
            && success_rate < threshold / 2.0
            && (trend < -self.config.strong_decline || average_reward < self.config.reward_floor);

        MonitorReport {
            success_rate,
            average_reward,
            trend,
            samples: self.successes.len(),
            performance_drop,
            retraining_recommended,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_trend_sign() {
        let mut rising = PerformanceMonitor::new(MonitorConfig::default());
        for i in 1..=9 {
            rising.push_rate_sample(f64::from(i) / 10.0);
        }
        assert_relative_eq!(rising.trend(), 0.1, epsilon = 1e-12);

        let mut falling = PerformanceMonitor::new(MonitorConfig::default());
        for i in (1..=9).rev() {
            falling.push_rate_sample(f64::from(i) / 10.0);
        }
        assert!(falling.trend() < 0.0);
    }

    #[test]
    fn test_windows() {
        let mut monitor = PerformanceMonitor::new(MonitorConfig {
            window: 4,
            ..MonitorConfig::default()
        });
        for (success, reward) in [(true, 10.0), (false, 0.0), (true, 20.0), (true, 30.0), (false, -10.0)] {
            monitor.record(success, reward);
        }
        let report = monitor.check();
        assert_eq!(report.samples, 4);
        assert_relative_eq!(report.success_rate, 0.5);
        assert_relative_eq!(report.average_reward, 10.0);
    }

    #[test]
    fn test_alerts_are_level_triggered() {
        let mut monitor = PerformanceMonitor::new(MonitorConfig {
            window: 10,
            trend_window: 5,
            min_samples: 5,
            ..MonitorConfig::default()
        });

        // Start strong, then lose repeatedly
        for _ in 0..5 {
            monitor.record(true, 100.0);
        }
        assert!(!monitor.check().performance_drop);
        for _ in 0..10 {
            monitor.record(false, -50.0);
        }
        let report = monitor.check();
        assert_eq!(report.success_rate, 0.0);
        assert!(report.performance_drop);
        assert!(report.retraining_recommended);

        // Still at 0% but no longer falling; poor rewards keep retraining advised
        for _ in 0..5 {
            monitor.record(false, -50.0);
        }
        let report = monitor.check();
        assert!(!report.performance_drop);
        assert!(report.retraining_recommended);

        // Recovery clears everything
        for _ in 0..10 {
            monitor.record(true, 100.0);
        }
        let report = monitor.check();
        assert!(!report.performance_drop);
        assert!(!report.retraining_recommended);
    }

    #[test]
    fn test_drop_while_falling() {
        let mut monitor = PerformanceMonitor::new(MonitorConfig {
            window: 20,
            trend_window: 5,
            min_samples: 5,
            ..MonitorConfig::default()
        });
        for _ in 0..5 {
            monitor.record(true, 50.0);
        }
        for _ in 0..8 {
            monitor.record(false, 50.0);
        }
        let report = monitor.check();
        assert!(report.success_rate < 0.5);
        assert!(report.trend < 0.0);
        assert!(report.performance_drop);
    }

    #[test]
    fn test_quiet_before_warm_up() {
        let mut monitor = PerformanceMonitor::new(MonitorConfig::default());
        monitor.record(false, -100.0);
        let report = monitor.check();
        assert!(!report.performance_drop);
        assert!(!report.retraining_recommended);
    }
}
