//! Environment seam and episode records

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::{Action, Outcome};
use crate::snapshot::{GamePhase, Snapshot};

/// Physics/game engine as seen by the training loop
///
/// `execute_action` only starts the shot; the caller polls `is_settled`
/// and then reads `outcome`. `reset` reloads the level without touching
/// anything the caller owns.
#[async_trait]
pub trait Environment: Send {
    /// Read the current world state
    async fn snapshot(&mut self) -> crate::Result<Snapshot>;

    /// Launch a projectile
    async fn execute_action(&mut self, action: Action) -> crate::Result<()>;

    /// Whether physics has come to rest since the last launch
    async fn is_settled(&mut self) -> crate::Result<bool>;

    /// Current game phase
    async fn phase(&mut self) -> crate::Result<GamePhase>;

    /// Outcome of the last settled launch, taken at most once
    async fn outcome(&mut self) -> crate::Result<Option<Outcome>>;

    /// Reload the level
    async fn reset(&mut self) -> crate::Result<()>;

    /// Close the environment
    async fn close(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

/// Summary of a finished episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Episode index, starting at 1
    pub index: u64,
    /// Whether the level was won
    pub success: bool,
    /// Total reward, terminal bonus included
    pub total_reward: f64,
    /// Shots taken
    pub steps: usize,
    /// Wall-clock duration in seconds
    pub duration_secs: f64,
    /// Start time
    pub start_time: chrono::DateTime<chrono::Utc>,
    /// End time
    pub end_time: chrono::DateTime<chrono::Utc>,
}
