//! Fixed-length state vectors for the policy network
//!
//! Layout (default caps, 64 values):
//!
//! | slots   | content                                              |
//! |---------|------------------------------------------------------|
//! | 0..20   | normalized core features (see [`NORMALIZATION`])     |
//! | 20..40  | up to 10 targets as `(x, y)`, zero padded            |
//! | 40..64  | up to 8 obstacles as `(x, y, health fraction)`       |
//!
//! Entries beyond a cap are dropped in input order. A trained network's input
//! layer depends on this ordering, so it must not change.
//!
//! [`NORMALIZATION`]: crate::features::NORMALIZATION

use serde::{Deserialize, Serialize};

use crate::error::{RLError, Result};
use crate::features::{FeatureRange, FeatureSet, NormalizedFeatureSet, CORE_FEATURES, MAX_RANGE};
use crate::snapshot::Snapshot;

/// Default number of encoded targets
pub const DEFAULT_MAX_TARGETS: usize = 10;
/// Default number of encoded obstacles
pub const DEFAULT_MAX_OBSTACLES: usize = 8;
/// Length of the state vector with default caps
pub const STATE_DIM: usize = CORE_FEATURES + 2 * DEFAULT_MAX_TARGETS + 3 * DEFAULT_MAX_OBSTACLES;

const POSITION_RANGE: FeatureRange = FeatureRange::Signed(MAX_RANGE);

/// Fixed-length numeric encoding of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVector(pub Vec<f32>);

impl StateVector {
    /// All-zero vector of the given length
    #[must_use]
    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    /// Number of values
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the vector holds no values
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the values
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Fail unless the vector has exactly `expected` values
    pub fn check_len(&self, expected: usize) -> Result<()> {
        if self.0.len() == expected {
            Ok(())
        } else {
            Err(RLError::DimensionMismatch {
                expected,
                actual: self.0.len(),
            })
        }
    }
}

/// Caps on how many targets and obstacles are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EncoderConfig {
    /// Targets encoded before truncation
    pub max_targets: usize,
    /// Obstacles encoded before truncation
    pub max_obstacles: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            max_targets: DEFAULT_MAX_TARGETS,
            max_obstacles: DEFAULT_MAX_OBSTACLES,
        }
    }
}

/// Packs features and positions into a [`StateVector`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StateEncoder {
    config: EncoderConfig,
}

impl StateEncoder {
    /// Create an encoder with the given caps
    #[must_use]
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// Length of every vector this encoder produces
    #[must_use]
    pub fn len(&self) -> usize {
        CORE_FEATURES + 2 * self.config.max_targets + 3 * self.config.max_obstacles
    }

    /// Always false; kept alongside [`StateEncoder::len`]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Encoder caps
    #[must_use]
    pub fn config(&self) -> EncoderConfig {
        self.config
    }

    /// Encode already-normalized features plus the snapshot's entities
    #[must_use]
    pub fn encode(&self, features: &NormalizedFeatureSet, snapshot: &Snapshot) -> StateVector {
        if snapshot.targets.len() > self.config.max_targets
            || snapshot.obstacles.len() > self.config.max_obstacles
        {
            tracing::trace!(
                targets = snapshot.targets.len(),
                obstacles = snapshot.obstacles.len(),
                "truncating entities beyond encoder caps"
            );
        }

        let mut values = Vec::with_capacity(self.len());

        values.extend(features.core.iter().map(|v| *v as f32));

        for slot in 0..self.config.max_targets {
            match snapshot.targets.get(slot) {
                Some(target) => {
                    values.push(POSITION_RANGE.apply(target.x) as f32);
                    values.push(POSITION_RANGE.apply(target.y) as f32);
                }
                None => values.extend_from_slice(&[0.0, 0.0]),
            }
        }

        for slot in 0..self.config.max_obstacles {
            match snapshot.obstacles.get(slot) {
                Some(obstacle) => {
                    values.push(POSITION_RANGE.apply(obstacle.position.x) as f32);
                    values.push(POSITION_RANGE.apply(obstacle.position.y) as f32);
                    values.push(obstacle.health_fraction() as f32);
                }
                None => values.extend_from_slice(&[0.0, 0.0, 0.0]),
            }
        }

        debug_assert_eq!(values.len(), self.len());
        StateVector(values)
    }

    /// Normalize a raw feature set and encode it
    #[must_use]
    pub fn encode_features(&self, features: &FeatureSet, snapshot: &Snapshot) -> StateVector {
        self.encode(&features.normalize(), snapshot)
    }
}
