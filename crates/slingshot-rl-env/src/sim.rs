//! Deterministic ballistic stand-in for the game engine

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use slingshot_rl_core::{
    Action, AttemptHistory, Environment, GamePhase, Obstacle, Outcome, RLError, Result, Snapshot,
    Vec2,
};

use crate::level::{LevelGenerator, LevelLayout};

/// Where a level's contents come from on every reset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LevelSource {
    /// Same layout every episode
    Fixed {
        /// Layout to restore
        layout: LevelLayout,
    },
    /// Fresh random layout every episode
    Generated {
        /// Generation parameters
        generator: LevelGenerator,
    },
}

impl Default for LevelSource {
    fn default() -> Self {
        Self::Generated {
            generator: LevelGenerator::default(),
        }
    }
}

/// Simulation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimConfig {
    /// Launch point
    pub launch_position: Vec2,
    /// Downward acceleration
    pub gravity: f64,
    /// Launch speed at force 1.0
    pub max_speed: f64,
    /// Projectiles per episode
    pub projectiles: u32,
    /// Projectile kind reported in snapshots
    pub projectile_kind: u32,
    /// Contact radius of a target
    pub target_radius: f64,
    /// Contact radius of the projectile
    pub projectile_radius: f64,
    /// Obstacle damage per unit of impact speed
    pub impact_damage: f64,
    /// `is_settled` polls before a launch resolves
    pub settle_polls: u32,
    /// Flight ends below this height
    pub ground_y: f64,
    /// Flight ends after this long
    pub max_flight_secs: f64,
    /// Integration step
    pub time_step: f64,
    /// Game-clock time added per shot on top of the flight
    pub shot_overhead_secs: f64,
    /// Level contents
    pub level: LevelSource,
    /// Seed for level generation
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            launch_position: Vec2::new(0.0, 0.0),
            gravity: 9.81,
            max_speed: 27.0,
            projectiles: 3,
            projectile_kind: 0,
            target_radius: 1.5,
            projectile_radius: 0.3,
            impact_damage: 4.0,
            settle_polls: 2,
            ground_y: -2.0,
            max_flight_secs: 10.0,
            time_step: 0.01,
            shot_overhead_secs: 1.0,
            level: LevelSource::default(),
            seed: None,
        }
    }
}

impl SimConfig {
    /// Fixed single-target level
    #[must_use]
    pub fn single_target(target: Vec2) -> Self {
        Self {
            level: LevelSource::Fixed {
                layout: LevelLayout::single_target(target),
            },
            ..Self::default()
        }
    }

    /// Reject parameters that would stall or break the flight integration
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("timeStep", self.time_step),
            ("maxFlightSecs", self.max_flight_secs),
            ("maxSpeed", self.max_speed),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(RLError::Config(format!("{name} must be positive, got {value}")));
            }
        }

        let finite = [
            ("launchPosition.x", self.launch_position.x),
            ("launchPosition.y", self.launch_position.y),
            ("gravity", self.gravity),
            ("targetRadius", self.target_radius),
            ("projectileRadius", self.projectile_radius),
            ("impactDamage", self.impact_damage),
            ("groundY", self.ground_y),
            ("shotOverheadSecs", self.shot_overhead_secs),
        ];
        if let Some((name, value)) = finite.iter().find(|(_, value)| !value.is_finite()) {
            return Err(RLError::Config(format!("{name} must be finite, got {value}")));
        }

        if self.projectiles == 0 {
            return Err(RLError::Config("projectiles must be at least 1".to_string()));
        }
        if let LevelSource::Generated { generator } = &self.level {
            generator.validate()?;
        }
        Ok(())
    }
}

/// What the projectile struck first
#[derive(Debug, Clone, Copy, PartialEq)]
enum Contact {
    Target(usize),
    Obstacle { index: usize, damage: f64 },
    Ground,
}

#[derive(Debug, Clone, Copy)]
struct Flight {
    contact: Contact,
    outcome: Outcome,
    polls_left: u32,
}

/// Simulated target level
pub struct ProjectileSim {
    config: SimConfig,
    rng: StdRng,
    targets: Vec<Vec2>,
    obstacles: Vec<Obstacle>,
    remaining: u32,
    phase: GamePhase,
    clock: f64,
    history: AttemptHistory,
    flight: Option<Flight>,
    settled: Option<Outcome>,
    resets: u64,
}

impl ProjectileSim {
    /// Create a simulator in the `Start` phase; call `reset` to load the level
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            config,
            rng,
            targets: Vec::new(),
            obstacles: Vec::new(),
            remaining: 0,
            phase: GamePhase::Start,
            clock: 0.0,
            history: AttemptHistory::default(),
            flight: None,
            settled: None,
            resets: 0,
        }
    }

    /// Number of level reloads so far
    #[must_use]
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Simulation parameters
    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    fn load_level(&mut self) {
        let layout = match &self.config.level {
            LevelSource::Fixed { layout } => layout.clone(),
            LevelSource::Generated { generator } => LevelLayout::generate(generator, &mut self.rng),
        };
        self.targets = layout.targets;
        self.obstacles = layout.obstacles;
    }

    fn current_snapshot(&self) -> Snapshot {
        Snapshot {
            agent_position: self.config.launch_position,
            agent_type: self.config.projectile_kind,
            targets: self.targets.clone(),
            obstacles: self.obstacles.clone(),
            agents_remaining: self.remaining,
            phase: self.phase,
            gravity: Vec2::new(0.0, -self.config.gravity),
            timestamp: self.clock,
            history: self.history,
        }
    }

    /// Integrate the flight until the first contact
    fn fly(&self, action: Action) -> (Contact, Outcome) {
        let cfg = &self.config;
        let theta = action.angle.to_radians();
        let speed = action.force * cfg.max_speed;
        let (vx, vy) = (speed * theta.cos(), speed * theta.sin());
        let origin = cfg.launch_position;

        let mut t = 0.0;
        let mut position = origin;
        while t < cfg.max_flight_secs {
            t += cfg.time_step;
            position = Vec2::new(
                origin.x + vx * t,
                origin.y + vy * t - 0.5 * cfg.gravity * t * t,
            );

            let reach = cfg.target_radius + cfg.projectile_radius;
            if let Some(index) = self.targets.iter().position(|target| position.distance(target) <= reach) {
                let outcome = Outcome {
                    hit: true,
                    targets_destroyed: 1,
                    impact_point: position,
                    time_to_impact: t,
                    ..Outcome::default()
                };
                return (Contact::Target(index), outcome);
            }

            let struck = self.obstacles.iter().position(|o| {
                (position.x - o.position.x).abs() <= o.scale.x / 2.0 + cfg.projectile_radius
                    && (position.y - o.position.y).abs() <= o.scale.y / 2.0 + cfg.projectile_radius
            });
            if let Some(index) = struck {
                let impact_speed = vx.hypot(vy - cfg.gravity * t);
                let damage = (cfg.impact_damage * impact_speed).min(self.obstacles[index].health);
                let destroyed = damage >= self.obstacles[index].health;
                let outcome = Outcome {
                    hit: true,
                    damage,
                    obstacles_destroyed: u32::from(destroyed),
                    impact_point: position,
                    time_to_impact: t,
                    ..Outcome::default()
                };
                return (Contact::Obstacle { index, damage }, outcome);
            }

            if position.y < cfg.ground_y {
                break;
            }
        }

        let outcome = Outcome {
            impact_point: position,
            time_to_impact: t,
            ..Outcome::miss()
        };
        (Contact::Ground, outcome)
    }

    fn resolve(&mut self, flight: Flight) {
        match flight.contact {
            Contact::Target(index) => {
                self.targets.remove(index);
            }
            Contact::Obstacle { index, damage } => {
                let obstacle = &mut self.obstacles[index];
                obstacle.health -= damage;
                if obstacle.health <= 0.0 {
                    self.obstacles.remove(index);
                }
            }
            Contact::Ground => {}
        }

        self.clock += flight.outcome.time_to_impact + self.config.shot_overhead_secs;
        self.history.record(flight.outcome.hit, flight.outcome.damage);

        self.phase = if self.targets.is_empty() {
            GamePhase::Won
        } else if self.remaining == 0 {
            GamePhase::Lost
        } else {
            GamePhase::Playing
        };
        debug!(
            hit = flight.outcome.hit,
            targets_left = self.targets.len(),
            remaining = self.remaining,
            phase = ?self.phase,
            "shot resolved"
        );
        self.settled = Some(flight.outcome);
    }
}

#[async_trait]
impl Environment for ProjectileSim {
    async fn snapshot(&mut self) -> Result<Snapshot> {
        Ok(self.current_snapshot())
    }

    async fn execute_action(&mut self, action: Action) -> Result<()> {
        if self.phase.is_terminal() {
            return Err(RLError::Environment(format!(
                "cannot launch in phase {:?}; reset the level first",
                self.phase
            )));
        }
        if self.flight.is_some() {
            return Err(RLError::Environment(
                "previous launch has not settled yet".to_string(),
            ));
        }
        if self.remaining == 0 {
            return Err(RLError::Environment("no projectiles left".to_string()));
        }

        self.phase = GamePhase::Playing;
        self.remaining -= 1;
        self.settled = None;

        let (contact, outcome) = self.fly(action);
        trace!(?action, ?contact, "launched");
        self.flight = Some(Flight {
            contact,
            outcome,
            polls_left: self.config.settle_polls,
        });
        Ok(())
    }

    async fn is_settled(&mut self) -> Result<bool> {
        let Some(mut flight) = self.flight.take() else {
            return Ok(true);
        };
        if flight.polls_left > 0 {
            flight.polls_left -= 1;
            self.flight = Some(flight);
            return Ok(false);
        }
        self.resolve(flight);
        Ok(true)
    }

    async fn phase(&mut self) -> Result<GamePhase> {
        Ok(self.phase)
    }

    async fn outcome(&mut self) -> Result<Option<Outcome>> {
        Ok(self.settled.take())
    }

    async fn reset(&mut self) -> Result<()> {
        self.config.validate()?;
        self.load_level();
        self.remaining = self.config.projectiles;
        self.phase = GamePhase::Playing;
        self.clock = 0.0;
        self.history = AttemptHistory::default();
        self.flight = None;
        self.settled = None;
        self.resets += 1;
        debug!(
            targets = self.targets.len(),
            obstacles = self.obstacles.len(),
            resets = self.resets,
            "level reset"
        );
        Ok(())
    }
}
