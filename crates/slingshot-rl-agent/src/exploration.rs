//! Per-step action selection
//!
//! Precedence of [`ActionSource`]: heuristic > random > learned policy.
//! Only the learned-policy source is epsilon-greedy; the other two are
//! forced modes that ignore the exploration rate.

use metrics::increment_counter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use slingshot_rl_core::action::MIN_ANGLE;
use slingshot_rl_core::features::MAX_RANGE;
use slingshot_rl_core::{Action, ActionSpace, FeatureSet, StateVector};

use crate::learner::Learner;

/// Where actions come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionSource {
    /// Closed-form aimed shot with jitter
    Heuristic,
    /// Uniform random shot
    Random,
    /// Learner action, epsilon-greedy against random
    #[default]
    LearnedPolicy,
}

impl ActionSource {
    /// Resolve legacy on/off switches using the documented precedence
    #[must_use]
    pub fn from_flags(heuristic: bool, random: bool) -> Self {
        if heuristic {
            Self::Heuristic
        } else if random {
            Self::Random
        } else {
            Self::LearnedPolicy
        }
    }
}

/// How a particular action was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Heuristic shot
    Heuristic,
    /// Random shot, by mode or by epsilon draw
    Random,
    /// Learner action
    Policy,
    /// Random shot because the learner was unavailable
    Fallback,
}

/// Selected action plus its provenance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Action to execute
    pub action: Action,
    /// How it was chosen
    pub kind: DecisionKind,
}

/// Inputs available when choosing an action
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    /// Encoded state for the learner
    pub state: &'a StateVector,
    /// Raw features for the heuristic
    pub features: &'a FeatureSet,
}

/// Parameters of the aimed heuristic shot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeuristicConfig {
    /// Degrees added above the line to the nearest target
    pub upward_bias: f64,
    /// Lowest allowed launch angle
    pub min_angle: f64,
    /// Highest allowed launch angle
    pub max_angle: f64,
    /// Force at zero distance
    pub min_force: f64,
    /// Force at `max_range` and beyond
    pub max_force: f64,
    /// Distance mapped to `max_force`
    pub max_range: f64,
    /// Uniform angle jitter half-width in degrees
    pub angle_jitter: f64,
    /// Uniform force jitter half-width
    pub force_jitter: f64,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            upward_bias: 15.0,
            min_angle: 10.0,
            max_angle: 70.0,
            min_force: 0.4,
            max_force: 1.0,
            max_range: MAX_RANGE,
            angle_jitter: 2.0,
            force_jitter: 0.05,
        }
    }
}

impl HeuristicConfig {
    /// Aim at the nearest target
    pub fn aim<R: Rng + ?Sized>(&self, features: &FeatureSet, rng: &mut R) -> Action {
        let angle = (features.nearest_target_angle + self.upward_bias)
            .clamp(self.min_angle, self.max_angle);
        let reach = (features.nearest_target_distance / self.max_range).clamp(0.0, 1.0);
        let force = (self.min_force + (self.max_force - self.min_force) * reach)
            .clamp(self.min_force, self.max_force);

        let angle = (angle + jitter(rng, self.angle_jitter)).clamp(self.min_angle, self.max_angle);
        let force = (force + jitter(rng, self.force_jitter)).clamp(self.min_force, self.max_force);
        Action::new(angle, force)
    }
}

fn jitter<R: Rng + ?Sized>(rng: &mut R, half_width: f64) -> f64 {
    if half_width > 0.0 {
        rng.gen_range(-half_width..=half_width)
    } else {
        0.0
    }
}

/// Range of the random shot
pub const RANDOM_SPACE: ActionSpace = ActionSpace::new((MIN_ANGLE, 90.0), (0.3, 1.0));

/// Chooses one action per step
pub struct ExplorationController {
    source: ActionSource,
    heuristic: HeuristicConfig,
    rng: StdRng,
    learner_down: bool,
    fallbacks: u64,
}

impl ExplorationController {
    /// Create a controller
    #[must_use]
    pub fn new(source: ActionSource, heuristic: HeuristicConfig, seed: Option<u64>) -> Self {
        Self {
            source,
            heuristic,
            rng: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
            learner_down: false,
            fallbacks: 0,
        }
    }

    /// Configured source
    #[must_use]
    pub fn source(&self) -> ActionSource {
        self.source
    }

    /// Random shots taken because the learner was unavailable
    #[must_use]
    pub fn fallbacks(&self) -> u64 {
        self.fallbacks
    }

    fn random(&mut self, kind: DecisionKind) -> Decision {
        Decision {
            action: RANDOM_SPACE.sample(&mut self.rng),
            kind,
        }
    }

    /// Choose the action for this step
    ///
    /// `learner` is consulted only in learned-policy mode when the epsilon
    /// draw picks the policy. Any learner error degrades to a random shot;
    /// one warning is logged per outage and one info line on recovery.
    pub async fn choose_action(
        &mut self,
        ctx: &DecisionContext<'_>,
        rate: f64,
        learner: Option<&mut (dyn Learner + '_)>,
    ) -> Decision {
        match self.source {
            ActionSource::Heuristic => Decision {
                action: self.heuristic.aim(ctx.features, &mut self.rng),
                kind: DecisionKind::Heuristic,
            },
            ActionSource::Random => self.random(DecisionKind::Random),
            ActionSource::LearnedPolicy => {
                if self.rng.gen::<f64>() < rate {
                    return self.random(DecisionKind::Random);
                }

                let Some(learner) = learner else {
                    return self.fallback("no learner configured");
                };

                match learner.request_action(ctx.state).await {
                    Ok(action) => {
                        if self.learner_down {
                            info!(learner = learner.name(), "learner available again");
                            self.learner_down = false;
                        }
                        Decision {
                            action,
                            kind: DecisionKind::Policy,
                        }
                    }
                    Err(e) => self.fallback(&e.to_string()),
                }
            }
        }
    }

    fn fallback(&mut self, reason: &str) -> Decision {
        self.fallbacks += 1;
        increment_counter!("slingshot_learner_fallbacks_total");
        if self.learner_down {
            debug!(reason, "learner still unavailable, using random action");
        } else {
            warn!(
                reason,
                "learner unavailable, falling back to random actions; start `slingshot serve` or set actionSource to heuristic/random"
            );
            self.learner_down = true;
        }
        self.random(DecisionKind::Fallback)
    }
}
