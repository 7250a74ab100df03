//! Launch actions, action ranges and shot outcomes

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::snapshot::Vec2;

/// Lowest launch angle in degrees
pub const MIN_ANGLE: f64 = -90.0;
/// Highest launch angle in degrees
pub const MAX_ANGLE: f64 = 90.0;

/// A single launch: angle in degrees and normalized force
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Launch angle in degrees, [-90, 90]
    pub angle: f64,
    /// Launch force, [0, 1]
    pub force: f64,
}

impl Action {
    /// Create an action, clamping both components into their valid ranges.
    /// Infinities clamp to the nearest bound; NaN becomes 0.
    #[must_use]
    pub fn new(angle: f64, force: f64) -> Self {
        Self {
            angle: if angle.is_nan() { 0.0 } else { angle.clamp(MIN_ANGLE, MAX_ANGLE) },
            force: if force.is_nan() { 0.0 } else { force.clamp(0.0, 1.0) },
        }
    }

    /// Flat `[angle, force]` representation used by the network and the wire
    #[must_use]
    pub fn to_array(&self) -> [f32; 2] {
        [self.angle as f32, self.force as f32]
    }

    /// Inverse of [`Action::to_array`]
    #[must_use]
    pub fn from_array(values: [f32; 2]) -> Self {
        Self::new(f64::from(values[0]), f64::from(values[1]))
    }
}

/// Box of admissible actions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionSpace {
    /// Angle bounds in degrees
    pub angle: (f64, f64),
    /// Force bounds
    pub force: (f64, f64),
}

impl ActionSpace {
    /// Create a new action space
    #[must_use]
    pub const fn new(angle: (f64, f64), force: (f64, f64)) -> Self {
        Self { angle, force }
    }

    /// Full launch range, [-90°, 90°] × [0, 1]
    #[must_use]
    pub const fn full() -> Self {
        Self::new((MIN_ANGLE, MAX_ANGLE), (0.0, 1.0))
    }

    /// Sample uniformly from the box
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Action {
        let angle = rng.gen_range(self.angle.0..=self.angle.1);
        let force = rng.gen_range(self.force.0..=self.force.1);
        Action::new(angle, force)
    }

    /// Check if an action lies inside the box
    #[must_use]
    pub fn contains(&self, action: &Action) -> bool {
        action.angle >= self.angle.0
            && action.angle <= self.angle.1
            && action.force >= self.force.0
            && action.force <= self.force.1
    }

    /// Project an action onto the box
    #[must_use]
    pub fn clamp(&self, action: Action) -> Action {
        Action {
            angle: action.angle.clamp(self.angle.0, self.angle.1),
            force: action.force.clamp(self.force.0, self.force.1),
        }
    }
}

/// Result of one launch after physics settles
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Whether the projectile hit a target or obstacle
    pub hit: bool,
    /// Damage dealt to obstacles and targets
    pub damage: f64,
    /// Targets destroyed by this shot
    pub targets_destroyed: u32,
    /// Obstacles destroyed by this shot
    pub obstacles_destroyed: u32,
    /// Where the projectile came to rest or first struck
    pub impact_point: Vec2,
    /// Seconds from launch to impact
    pub time_to_impact: f64,
    /// Seconds since the episode started, stamped by the orchestrator
    #[serde(default)]
    pub elapsed_secs: f64,
}

impl Outcome {
    /// A shot that hit nothing
    #[must_use]
    pub fn miss() -> Self {
        Self::default()
    }

    /// Same outcome with the episode clock stamped on it
    #[must_use]
    pub fn at_elapsed(mut self, elapsed_secs: f64) -> Self {
        self.elapsed_secs = elapsed_secs.max(0.0);
        self
    }
}
