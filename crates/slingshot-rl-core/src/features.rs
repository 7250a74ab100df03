//! Feature extraction: Snapshot → FeatureSet → NormalizedFeatureSet
//!
//! Extraction is a pure function of the snapshot (including the attempt
//! history carried on it). Empty target or obstacle lists produce sentinel
//! values, never NaN.

use serde::{Deserialize, Serialize};

use crate::snapshot::{Snapshot, Vec2};

/// Distance reported when there is no target to measure against
pub const MAX_RANGE: f64 = 50.0;

/// Margin added around the agent→target box for the in-path test
pub const PATH_MARGIN: f64 = 2.0;

/// Raw scalar features of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Distance to the nearest target
    pub nearest_target_distance: f64,
    /// Distance to the farthest target
    pub farthest_target_distance: f64,
    /// Mean distance to all targets
    pub average_target_distance: f64,
    /// Angle in degrees toward the nearest target
    pub nearest_target_angle: f64,
    /// Angle in degrees toward the farthest target
    pub farthest_target_angle: f64,
    /// Inverse mean pairwise obstacle distance
    pub obstacle_density: f64,
    /// Obstacles inside the agent→nearest-target box
    pub obstacles_in_path: f64,
    /// Lowest obstacle health
    pub weakest_obstacle_health: f64,
    /// Highest obstacle health
    pub strongest_obstacle_health: f64,
    /// Live targets
    pub target_count: f64,
    /// Inverse mean pairwise target distance
    pub target_clustering: f64,
    /// Highest target y
    pub highest_target_y: f64,
    /// Lowest target y
    pub lowest_target_y: f64,
    /// Projectile kind
    pub agent_type: f64,
    /// Projectiles left
    pub agents_remaining: f64,
    /// Launch x
    pub agent_x: f64,
    /// Launch y
    pub agent_y: f64,
    /// Shots taken this episode
    pub previous_attempts: f64,
    /// Fraction of shots that hit
    pub previous_success_rate: f64,
    /// Mean damage per shot
    pub previous_average_damage: f64,
    /// Magnitude of the gravity vector
    pub gravity_magnitude: f64,
}

/// Number of features copied into the state vector
pub const CORE_FEATURES: usize = 20;

/// How a raw feature is mapped into its normalized range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureRange {
    /// `raw / scale` clipped into [0, 1]
    Unit(f64),
    /// `raw / scale` clipped into [-1, 1]
    Signed(f64),
}

impl FeatureRange {
    /// Apply the map; non-finite input maps to 0
    #[must_use]
    pub fn apply(self, raw: f64) -> f64 {
        if !raw.is_finite() {
            return 0.0;
        }
        match self {
            Self::Unit(scale) => (raw / scale).clamp(0.0, 1.0),
            Self::Signed(scale) => (raw / scale).clamp(-1.0, 1.0),
        }
    }

    /// Lower bound of the normalized range
    #[must_use]
    pub fn low(self) -> f64 {
        match self {
            Self::Unit(_) => 0.0,
            Self::Signed(_) => -1.0,
        }
    }
}

/// Fixed normalization constants, in state-vector order
pub const NORMALIZATION: [(&str, FeatureRange); CORE_FEATURES] = [
    ("nearest_target_distance", FeatureRange::Unit(MAX_RANGE)),
    ("farthest_target_distance", FeatureRange::Unit(MAX_RANGE)),
    ("average_target_distance", FeatureRange::Unit(MAX_RANGE)),
    ("nearest_target_angle", FeatureRange::Signed(180.0)),
    ("farthest_target_angle", FeatureRange::Signed(180.0)),
    ("obstacle_density", FeatureRange::Unit(1.0)),
    ("obstacles_in_path", FeatureRange::Unit(10.0)),
    ("weakest_obstacle_health", FeatureRange::Unit(100.0)),
    ("strongest_obstacle_health", FeatureRange::Unit(100.0)),
    ("target_count", FeatureRange::Unit(10.0)),
    ("target_clustering", FeatureRange::Unit(1.0)),
    ("highest_target_y", FeatureRange::Signed(20.0)),
    ("lowest_target_y", FeatureRange::Signed(20.0)),
    ("agent_type", FeatureRange::Unit(5.0)),
    ("agents_remaining", FeatureRange::Unit(5.0)),
    ("agent_x", FeatureRange::Signed(MAX_RANGE)),
    ("agent_y", FeatureRange::Signed(MAX_RANGE)),
    ("previous_attempts", FeatureRange::Unit(10.0)),
    ("previous_success_rate", FeatureRange::Unit(1.0)),
    ("previous_average_damage", FeatureRange::Unit(100.0)),
];

/// Range used for gravity, which is logged but not encoded
pub const GRAVITY_RANGE: FeatureRange = FeatureRange::Unit(20.0);

impl FeatureSet {
    /// Raw values of the encoded features, in state-vector order
    #[must_use]
    pub fn core_values(&self) -> [f64; CORE_FEATURES] {
        [
            self.nearest_target_distance,
            self.farthest_target_distance,
            self.average_target_distance,
            self.nearest_target_angle,
            self.farthest_target_angle,
            self.obstacle_density,
            self.obstacles_in_path,
            self.weakest_obstacle_health,
            self.strongest_obstacle_health,
            self.target_count,
            self.target_clustering,
            self.highest_target_y,
            self.lowest_target_y,
            self.agent_type,
            self.agents_remaining,
            self.agent_x,
            self.agent_y,
            self.previous_attempts,
            self.previous_success_rate,
            self.previous_average_damage,
        ]
    }

    /// Map every field through the fixed normalization table
    #[must_use]
    pub fn normalize(&self) -> NormalizedFeatureSet {
        let raw = self.core_values();
        let mut core = [0.0; CORE_FEATURES];
        for (slot, (value, (_, range))) in core.iter_mut().zip(raw.iter().zip(NORMALIZATION.iter())) {
            *slot = range.apply(*value);
        }
        NormalizedFeatureSet {
            core,
            gravity_magnitude: GRAVITY_RANGE.apply(self.gravity_magnitude),
        }
    }
}

/// Normalized features, each within its documented range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFeatureSet {
    /// Encoded features in state-vector order (see [`NORMALIZATION`])
    pub core: [f64; CORE_FEATURES],
    /// Normalized gravity magnitude
    pub gravity_magnitude: f64,
}

impl NormalizedFeatureSet {
    /// Look up a normalized feature by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        if name == "gravity_magnitude" {
            return Some(self.gravity_magnitude);
        }
        NORMALIZATION
            .iter()
            .position(|(n, _)| *n == name)
            .map(|i| self.core[i])
    }
}

/// Turns snapshots into feature sets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureExtractor {
    /// Sentinel distance when no target exists
    pub max_range: f64,
    /// Margin for the in-path bounding box
    pub path_margin: f64,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self {
            max_range: MAX_RANGE,
            path_margin: PATH_MARGIN,
        }
    }
}

impl FeatureExtractor {
    /// Extract the raw feature set from a snapshot
    #[must_use]
    pub fn extract(&self, snapshot: &Snapshot) -> FeatureSet {
        let agent = snapshot.agent_position;
        let targets = &snapshot.targets;

        let mut nearest: Option<(Vec2, f64)> = None;
        let mut farthest: Option<(Vec2, f64)> = None;
        let mut total_distance = 0.0;
        for target in targets {
            let d = agent.distance(target);
            total_distance += d;
            if nearest.map_or(true, |(_, best)| d < best) {
                nearest = Some((*target, d));
            }
            if farthest.map_or(true, |(_, best)| d > best) {
                farthest = Some((*target, d));
            }
        }

        let (nearest_target_distance, nearest_target_angle) = nearest
            .map_or((self.max_range, 0.0), |(t, d)| (d, agent.angle_to(&t)));
        let (farthest_target_distance, farthest_target_angle) = farthest
            .map_or((self.max_range, 0.0), |(t, d)| (d, agent.angle_to(&t)));
        let average_target_distance = if targets.is_empty() {
            self.max_range
        } else {
            total_distance / targets.len() as f64
        };

        let highest_target_y = targets.iter().map(|t| t.y).fold(None, |acc: Option<f64>, y| {
            Some(acc.map_or(y, |a| a.max(y)))
        });
        let lowest_target_y = targets.iter().map(|t| t.y).fold(None, |acc: Option<f64>, y| {
            Some(acc.map_or(y, |a| a.min(y)))
        });

        let obstacle_positions: Vec<Vec2> = snapshot.obstacles.iter().map(|o| o.position).collect();
        let obstacles_in_path = nearest
            .map_or(0, |(target, _)| self.count_in_path(agent, target, &obstacle_positions));

        let healths = snapshot.obstacles.iter().map(|o| o.health);
        let weakest_obstacle_health = healths.clone().fold(None, |acc: Option<f64>, h| {
            Some(acc.map_or(h, |a| a.min(h)))
        });
        let strongest_obstacle_health = healths.fold(None, |acc: Option<f64>, h| {
            Some(acc.map_or(h, |a| a.max(h)))
        });

        let history = &snapshot.history;

        FeatureSet {
            nearest_target_distance,
            farthest_target_distance,
            average_target_distance,
            nearest_target_angle,
            farthest_target_angle,
            obstacle_density: inverse_mean_pairwise_distance(&obstacle_positions),
            obstacles_in_path: obstacles_in_path as f64,
            weakest_obstacle_health: finite_or_zero(weakest_obstacle_health),
            strongest_obstacle_health: finite_or_zero(strongest_obstacle_health),
            target_count: targets.len() as f64,
            target_clustering: inverse_mean_pairwise_distance(targets),
            highest_target_y: finite_or_zero(highest_target_y),
            lowest_target_y: finite_or_zero(lowest_target_y),
            agent_type: f64::from(snapshot.agent_type),
            agents_remaining: f64::from(snapshot.agents_remaining),
            agent_x: agent.x,
            agent_y: agent.y,
            previous_attempts: f64::from(history.attempts),
            previous_success_rate: history.success_rate(),
            previous_average_damage: history.average_damage(),
            gravity_magnitude: snapshot.gravity.length(),
        }
    }

    /// Count obstacles whose centre lies in the inclusive box spanned by
    /// `from` and `to`, grown by the path margin on every side.
    ///
    /// This is a bounding-box approximation of line of sight, not a ray cast:
    /// obstacles near the box corners count even when the straight line
    /// misses them, and a tall obstacle whose centre is outside the box is
    /// not counted.
    #[must_use]
    pub fn count_in_path(&self, from: Vec2, to: Vec2, obstacles: &[Vec2]) -> usize {
        let min_x = from.x.min(to.x) - self.path_margin;
        let max_x = from.x.max(to.x) + self.path_margin;
        let min_y = from.y.min(to.y) - self.path_margin;
        let max_y = from.y.max(to.y) + self.path_margin;
        obstacles
            .iter()
            .filter(|p| p.x >= min_x && p.x <= max_x && p.y >= min_y && p.y <= max_y)
            .count()
    }
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// `1 / mean pairwise distance`; 0 for fewer than two points or when every
/// point coincides.
fn inverse_mean_pairwise_distance(points: &[Vec2]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            total += a.distance(b);
            pairs += 1;
        }
    }
    let mean = total / pairs as f64;
    if mean.is_finite() && mean > 0.0 {
        1.0 / mean
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{AttemptHistory, Obstacle};
    use proptest::prelude::*;

    fn obstacle(x: f64, y: f64, health: f64) -> Obstacle {
        Obstacle {
            position: Vec2::new(x, y),
            rotation: 0.0,
            scale: Vec2::new(1.0, 1.0),
            health,
            max_health: 100.0,
            kind: 0,
        }
    }

    #[test]
    fn test_empty_snapshot_uses_sentinels() {
        let features = FeatureExtractor::default().extract(&Snapshot::empty());

        assert_eq!(features.nearest_target_distance, MAX_RANGE);
        assert_eq!(features.farthest_target_distance, MAX_RANGE);
        assert_eq!(features.average_target_distance, MAX_RANGE);
        assert_eq!(features.nearest_target_angle, 0.0);
        assert_eq!(features.obstacle_density, 0.0);
        assert_eq!(features.obstacles_in_path, 0.0);
        assert_eq!(features.target_clustering, 0.0);
        assert!(features.core_values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_distances_and_angles() {
        let mut snapshot = Snapshot::empty();
        snapshot.targets = vec![Vec2::new(10.0, 0.0), Vec2::new(0.0, 30.0)];

        let features = FeatureExtractor::default().extract(&snapshot);
        assert!((features.nearest_target_distance - 10.0).abs() < 1e-9);
        assert!((features.farthest_target_distance - 30.0).abs() < 1e-9);
        assert!((features.average_target_distance - 20.0).abs() < 1e-9);
        assert!(features.nearest_target_angle.abs() < 1e-9);
        assert!((features.farthest_target_angle - 90.0).abs() < 1e-9);
        assert_eq!(features.highest_target_y, 30.0);
        assert_eq!(features.lowest_target_y, 0.0);
        // Two targets √1000 apart.
        assert!((features.target_clustering - 1.0 / 1000f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_obstacles_in_path_box() {
        let mut snapshot = Snapshot::empty();
        snapshot.targets = vec![Vec2::new(20.0, 0.0)];
        snapshot.obstacles = vec![
            obstacle(10.0, 0.0, 40.0),
            // On the margin edge: inclusive
            obstacle(10.0, 2.0, 80.0),
            obstacle(10.0, 2.5, 60.0),
            obstacle(-3.0, 0.0, 60.0),
        ];

        let features = FeatureExtractor::default().extract(&snapshot);
        assert_eq!(features.obstacles_in_path, 2.0);
        assert_eq!(features.weakest_obstacle_health, 40.0);
        assert_eq!(features.strongest_obstacle_health, 80.0);
        assert!(features.obstacle_density > 0.0);
    }

    #[test]
    fn test_tight_groups_are_not_flattened() {
        let mut snapshot = Snapshot::empty();
        snapshot.targets = vec![Vec2::new(10.0, 0.0), Vec2::new(10.5, 0.0)];
        snapshot.obstacles = vec![obstacle(5.0, 0.0, 50.0), obstacle(5.0, 0.25, 50.0)];
        let features = FeatureExtractor::default().extract(&snapshot);
        assert!((features.target_clustering - 2.0).abs() < 1e-12);
        assert!((features.obstacle_density - 4.0).abs() < 1e-12);

        snapshot.targets = vec![Vec2::new(10.0, 0.0); 3];
        let features = FeatureExtractor::default().extract(&snapshot);
        assert_eq!(features.target_clustering, 0.0);
    }

    #[test]
    fn test_history_features() {
        let mut history = AttemptHistory::default();
        history.record(true, 50.0);
        history.record(false, 0.0);
        let snapshot = Snapshot::empty().with_history(history);

        let features = FeatureExtractor::default().extract(&snapshot);
        assert_eq!(features.previous_attempts, 2.0);
        assert!((features.previous_success_rate - 0.5).abs() < 1e-12);
        assert!((features.previous_average_damage - 25.0).abs() < 1e-12);
        assert!((features.gravity_magnitude - 9.81).abs() < 1e-12);
    }

    #[test]
    fn test_normalization_clips_out_of_range() {
        let mut snapshot = Snapshot::empty();
        snapshot.targets = vec![Vec2::new(500.0, -400.0)];
        snapshot.agents_remaining = 99;
        let normalized = FeatureExtractor::default().extract(&snapshot).normalize();

        assert_eq!(normalized.get("nearest_target_distance"), Some(1.0));
        assert_eq!(normalized.get("lowest_target_y"), Some(-1.0));
        assert_eq!(normalized.get("agents_remaining"), Some(1.0));
        for (value, (_, range)) in normalized.core.iter().zip(NORMALIZATION.iter()) {
            assert!(*value >= range.low() && *value <= 1.0);
        }
    }

    #[test]
    fn test_non_finite_maps_to_zero() {
        assert_eq!(FeatureRange::Unit(10.0).apply(f64::NAN), 0.0);
        assert_eq!(FeatureRange::Signed(10.0).apply(f64::NEG_INFINITY), 0.0);
        assert_eq!(FeatureRange::Signed(10.0).apply(-5.0), -0.5);
    }

    fn from_values(v: [f64; 21]) -> FeatureSet {
        FeatureSet {
            nearest_target_distance: v[0],
            farthest_target_distance: v[1],
            average_target_distance: v[2],
            nearest_target_angle: v[3],
            farthest_target_angle: v[4],
            obstacle_density: v[5],
            obstacles_in_path: v[6],
            weakest_obstacle_health: v[7],
            strongest_obstacle_health: v[8],
            target_count: v[9],
            target_clustering: v[10],
            highest_target_y: v[11],
            lowest_target_y: v[12],
            agent_type: v[13],
            agents_remaining: v[14],
            agent_x: v[15],
            agent_y: v[16],
            previous_attempts: v[17],
            previous_success_rate: v[18],
            previous_average_damage: v[19],
            gravity_magnitude: v[20],
        }
    }

    fn finite() -> impl Strategy<Value = f64> {
        prop_oneof![
            prop::num::f64::NORMAL | prop::num::f64::SUBNORMAL | prop::num::f64::ZERO,
            -1e6..1e6f64,
        ]
    }

    proptest! {
        #[test]
        fn prop_normalize_stays_in_range(values in prop::array::uniform21(finite())) {
            let normalized = from_values(values).normalize();
            for (value, (name, range)) in normalized.core.iter().zip(NORMALIZATION.iter()) {
                prop_assert!(value.is_finite(), "{} is {}", name, value);
                prop_assert!(*value >= range.low() && *value <= 1.0, "{} is {}", name, value);
            }
            prop_assert!((0.0..=1.0).contains(&normalized.gravity_magnitude));
        }
    }
}
