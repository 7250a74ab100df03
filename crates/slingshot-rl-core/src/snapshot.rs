//! World snapshots handed from the environment to the learning pipeline

use serde::{Deserialize, Serialize};

/// 2-D world coordinate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    /// Horizontal coordinate
    pub x: f64,
    /// Vertical coordinate
    pub y: f64,
}

impl Vec2 {
    /// Create a new point
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Straight-line distance to another point
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Angle in degrees from this point toward `other`, in [-180, 180]
    #[must_use]
    pub fn angle_to(&self, other: &Self) -> f64 {
        (other.y - self.y).atan2(other.x - self.x).to_degrees()
    }

    /// Euclidean length
    #[must_use]
    pub fn length(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Phase reported by the game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Level loaded, nothing launched yet
    Start,
    /// Waiting for or resolving shots
    Playing,
    /// Every target destroyed
    Won,
    /// Out of projectiles with targets left
    Lost,
}

impl GamePhase {
    /// Won or lost
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }
}

/// Destructible obstacle in the level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    /// Centre position
    pub position: Vec2,
    /// Rotation in degrees
    pub rotation: f64,
    /// Width and height
    pub scale: Vec2,
    /// Remaining health
    pub health: f64,
    /// Health at spawn
    pub max_health: f64,
    /// Material/kind identifier
    pub kind: u32,
}

impl Obstacle {
    /// Health as a fraction of max health, 0 when max health is not positive
    #[must_use]
    pub fn health_fraction(&self) -> f64 {
        if self.max_health > 0.0 {
            (self.health / self.max_health).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Shots already taken in the current episode
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptHistory {
    /// Shots taken
    pub attempts: u32,
    /// Shots that hit something
    pub successes: u32,
    /// Damage summed over all shots
    pub total_damage: f64,
}

impl AttemptHistory {
    /// Fraction of shots that hit, 0 before the first shot
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            f64::from(self.successes) / f64::from(self.attempts)
        }
    }

    /// Mean damage per shot, 0 before the first shot
    #[must_use]
    pub fn average_damage(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.total_damage / f64::from(self.attempts)
        }
    }

    /// Fold one resolved shot into the history
    pub fn record(&mut self, hit: bool, damage: f64) {
        self.attempts += 1;
        if hit {
            self.successes += 1;
        }
        self.total_damage += damage.max(0.0);
    }
}

/// Immutable read of the world at one decision point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Launch position
    pub agent_position: Vec2,
    /// Projectile kind identifier
    pub agent_type: u32,
    /// Live target positions, in priority order
    pub targets: Vec<Vec2>,
    /// Obstacles, in priority order
    pub obstacles: Vec<Obstacle>,
    /// Projectiles left to launch
    pub agents_remaining: u32,
    /// Current game phase
    pub phase: GamePhase,
    /// Gravity vector
    pub gravity: Vec2,
    /// Game clock in seconds
    pub timestamp: f64,
    /// Shots already taken this episode
    #[serde(default)]
    pub history: AttemptHistory,
}

impl Snapshot {
    /// Snapshot of an empty level with default gravity
    #[must_use]
    pub fn empty() -> Self {
        Self {
            agent_position: Vec2::default(),
            agent_type: 0,
            targets: Vec::new(),
            obstacles: Vec::new(),
            agents_remaining: 0,
            phase: GamePhase::Start,
            gravity: Vec2::new(0.0, -9.81),
            timestamp: 0.0,
            history: AttemptHistory::default(),
        }
    }

    /// Same snapshot carrying the given attempt history
    #[must_use]
    pub fn with_history(mut self, history: AttemptHistory) -> Self {
        self.history = history;
        self
    }

    /// Nearest live target and its distance from the agent
    #[must_use]
    pub fn nearest_target(&self) -> Option<(Vec2, f64)> {
        self.targets
            .iter()
            .map(|t| (*t, self.agent_position.distance(t)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_to() {
        let origin = Vec2::new(0.0, 0.0);
        assert!((origin.angle_to(&Vec2::new(1.0, 1.0)) - 45.0).abs() < 1e-9);
        assert!((origin.angle_to(&Vec2::new(-1.0, 0.0)) - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_attempt_history_rates() {
        let mut history = AttemptHistory::default();
        assert_eq!(history.success_rate(), 0.0);
        assert_eq!(history.average_damage(), 0.0);

        history.record(true, 30.0);
        history.record(false, 0.0);
        assert!((history.success_rate() - 0.5).abs() < 1e-12);
        assert!((history.average_damage() - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_nearest_target() {
        let mut snapshot = Snapshot::empty();
        assert!(snapshot.nearest_target().is_none());

        snapshot.targets = vec![Vec2::new(30.0, 0.0), Vec2::new(0.0, 10.0)];
        let (target, distance) = snapshot.nearest_target().unwrap();
        assert_eq!(target, Vec2::new(0.0, 10.0));
        assert!((distance - 10.0).abs() < 1e-12);
    }
}
