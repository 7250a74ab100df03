//! Level layouts: where targets and obstacles start

use rand::Rng;
use serde::{Deserialize, Serialize};

use slingshot_rl_core::{Obstacle, RLError, Result, Vec2};

/// Initial contents of a level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelLayout {
    /// Target centres
    pub targets: Vec<Vec2>,
    /// Obstacles at full health
    pub obstacles: Vec<Obstacle>,
}

impl LevelLayout {
    /// One target, no obstacles
    #[must_use]
    pub fn single_target(target: Vec2) -> Self {
        Self {
            targets: vec![target],
            obstacles: Vec::new(),
        }
    }

    /// Random layout from `generator`
    pub fn generate<R: Rng + ?Sized>(generator: &LevelGenerator, rng: &mut R) -> Self {
        let targets = (0..generator.targets)
            .map(|_| {
                Vec2::new(
                    rng.gen_range(generator.x_range.0..=generator.x_range.1),
                    rng.gen_range(generator.y_range.0..=generator.y_range.1),
                )
            })
            .collect::<Vec<_>>();

        // Obstacles are placed in front of (left of) a random target
        let obstacles = (0..generator.obstacles)
            .map(|i| {
                let anchor = targets.get(i % targets.len().max(1)).copied().unwrap_or_default();
                Obstacle {
                    position: Vec2::new(
                        (anchor.x - rng.gen_range(1.5..=4.0)).max(generator.x_range.0 / 2.0),
                        anchor.y + rng.gen_range(-1.0..=2.0),
                    ),
                    rotation: 0.0,
                    scale: Vec2::new(1.0, rng.gen_range(1.0..=3.0)),
                    health: generator.obstacle_health,
                    max_health: generator.obstacle_health,
                    kind: rng.gen_range(0..3),
                }
            })
            .collect();

        Self { targets, obstacles }
    }
}

/// Parameters for random levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LevelGenerator {
    /// Targets per level
    pub targets: usize,
    /// Obstacles per level
    pub obstacles: usize,
    /// Horizontal placement range of targets
    pub x_range: (f64, f64),
    /// Vertical placement range of targets
    pub y_range: (f64, f64),
    /// Starting obstacle health
    pub obstacle_health: f64,
}

impl LevelGenerator {
    /// Reject placement ranges that cannot be sampled
    pub fn validate(&self) -> Result<()> {
        for (name, (low, high)) in [("xRange", self.x_range), ("yRange", self.y_range)] {
            if !low.is_finite() || !high.is_finite() || low > high {
                return Err(RLError::Config(format!(
                    "level {name} must be a finite [low, high] pair, got ({low}, {high})"
                )));
            }
        }
        if !self.obstacle_health.is_finite() || self.obstacle_health <= 0.0 {
            return Err(RLError::Config(format!(
                "obstacleHealth must be positive, got {}",
                self.obstacle_health
            )));
        }
        Ok(())
    }
}

impl Default for LevelGenerator {
    fn default() -> Self {
        Self {
            targets: 3,
            obstacles: 4,
            x_range: (12.0, 35.0),
            y_range: (0.0, 6.0),
            obstacle_health: 100.0,
        }
    }
}
