//! Checkpoint, report and log persistence
//!
//! JSON records are written atomically: the body goes to a sibling `.tmp`
//! file which is then renamed over the target, so a crash mid-write leaves
//! either the old file or the new one. Network parameters are stored next to
//! the checkpoint as gzip-compressed bincode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use slingshot_rl_core::{RLError, Result};

use crate::config::Mode;

/// Training progress at a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    /// Last finished episode
    pub episode: u64,
    /// Episodes won so far
    pub successful_episodes: u64,
    /// Rolling average episode reward
    pub average_reward: f64,
    /// Best episode reward so far
    pub best_reward: f64,
    /// Shots taken so far
    pub total_steps: u64,
    /// When the record was written
    pub timestamp: DateTime<Utc>,
    /// Exploration rate after the last decay
    #[serde(default = "default_exploration_rate")]
    pub exploration_rate: f64,
    /// Run that wrote the record
    #[serde(default)]
    pub run_id: Option<Uuid>,
    /// Parameter file, relative to the checkpoint's directory
    #[serde(default)]
    pub parameters_file: Option<String>,
}

fn default_exploration_rate() -> f64 {
    1.0
}

impl CheckpointRecord {
    /// Check that the counters describe a run that can be continued
    pub fn check_consistency(&self, max_episodes: u64) -> std::result::Result<(), String> {
        if self.successful_episodes > self.episode {
            return Err(format!(
                "{} successful episodes recorded for {} episodes",
                self.successful_episodes, self.episode
            ));
        }
        if self.total_steps < self.episode {
            return Err(format!(
                "{} steps cannot cover {} episodes",
                self.total_steps, self.episode
            ));
        }
        if self.episode >= max_episodes {
            return Err(format!(
                "checkpoint is at episode {} but the run stops at {max_episodes}",
                self.episode
            ));
        }
        if !(self.exploration_rate > 0.0 && self.exploration_rate <= 1.0) {
            return Err(format!("exploration rate {} out of range", self.exploration_rate));
        }
        if !self.average_reward.is_finite() || !self.best_reward.is_finite() {
            return Err("non-finite reward statistics".to_string());
        }
        Ok(())
    }
}

/// End-of-run summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    /// Run identifier
    pub run_id: Uuid,
    /// Run mode
    pub mode: Mode,
    /// Episodes finished
    pub episodes: u64,
    /// Episodes won
    pub successful_episodes: u64,
    /// Won / finished
    pub success_rate: f64,
    /// Average reward over the last 100 episodes
    pub average_reward: f64,
    /// Best episode reward
    pub best_reward: f64,
    /// Shots taken
    pub total_steps: u64,
    /// Average reward over the first 100 episodes of this run
    pub first_100_average: f64,
    /// Average reward over the last 100 episodes
    pub last_100_average: f64,
    /// `last_100_average - first_100_average`
    pub improvement: f64,
    /// Random shots caused by an unavailable learner
    pub learner_fallbacks: u64,
    /// Policy updates during this run
    #[serde(default)]
    pub policy_updates: u64,
    /// Total loss of the most recent update
    #[serde(default)]
    pub latest_loss: Option<f64>,
    /// Mean total loss over this run's updates
    #[serde(default)]
    pub mean_loss: Option<f64>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: DateTime<Utc>,
}

impl SummaryRecord {
    /// Plain-text rendering for humans
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Slingshot training summary ({:?})", self.mode);
        let _ = writeln!(out, "run:               {}", self.run_id);
        let _ = writeln!(out, "started:           {}", self.started_at.to_rfc3339());
        let _ = writeln!(out, "finished:          {}", self.finished_at.to_rfc3339());
        let _ = writeln!(out, "episodes:          {}", self.episodes);
        let _ = writeln!(
            out,
            "success rate:      {:.1}% ({} won)",
            self.success_rate * 100.0,
            self.successful_episodes
        );
        let _ = writeln!(out, "average reward:    {:.2}", self.average_reward);
        let _ = writeln!(out, "best reward:       {:.2}", self.best_reward);
        let _ = writeln!(out, "total steps:       {}", self.total_steps);
        let _ = writeln!(
            out,
            "first/last 100:    {:.2} -> {:.2} ({:+.2})",
            self.first_100_average, self.last_100_average, self.improvement
        );
        let _ = writeln!(out, "learner fallbacks: {}", self.learner_fallbacks);
        if let (Some(latest), Some(mean)) = (self.latest_loss, self.mean_loss) {
            let _ = writeln!(
                out,
                "policy loss:       {latest:.4} latest, {mean:.4} mean over {} updates",
                self.policy_updates
            );
        } else {
            let _ = writeln!(out, "policy loss:       no updates");
        }
        out
    }
}

/// Where checkpoints, reports and logs go
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Atomically write a checkpoint record as JSON
    async fn write_checkpoint(&self, path: &Path, record: &CheckpointRecord) -> Result<()>;

    /// Read a checkpoint record
    async fn read_checkpoint(&self, path: &Path) -> Result<CheckpointRecord>;

    /// Write a summary as JSON plus a `.txt` rendering next to it
    async fn write_report(&self, path: &Path, summary: &SummaryRecord) -> Result<()>;

    /// Append one timestamped line
    async fn append_log(&self, path: &Path, line: &str) -> Result<()>;

    /// Atomically write network parameters
    async fn write_parameters(&self, path: &Path, params: &[f32]) -> Result<()>;

    /// Read network parameters
    async fn read_parameters(&self, path: &Path) -> Result<Vec<f32>>;
}

/// Filesystem-backed persistence
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStore;

fn persistence_error(path: &Path, what: &str, err: impl std::fmt::Display) -> RLError {
    RLError::Persistence(format!("{what} {}: {err}", path.display()))
}

/// Temporary sibling used for atomic writes
#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| persistence_error(parent, "cannot create directory", e))?;
    }
    Ok(())
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path).await?;
    let tmp = temp_path(path);

    let mut file = fs::File::create(&tmp)
        .await
        .map_err(|e| persistence_error(&tmp, "cannot create", e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| persistence_error(&tmp, "cannot write", e))?;
    file.sync_all()
        .await
        .map_err(|e| persistence_error(&tmp, "cannot sync", e))?;
    drop(file);

    fs::rename(&tmp, path)
        .await
        .map_err(|e| persistence_error(path, "cannot replace", e))
}

#[async_trait]
impl Persistence for FileStore {
    async fn write_checkpoint(&self, path: &Path, record: &CheckpointRecord) -> Result<()> {
        let body = serde_json::to_vec_pretty(record)?;
        write_atomic(path, &body).await
    }

    async fn read_checkpoint(&self, path: &Path) -> Result<CheckpointRecord> {
        let raw = fs::read(path)
            .await
            .map_err(|e| persistence_error(path, "cannot read checkpoint", e))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn write_report(&self, path: &Path, summary: &SummaryRecord) -> Result<()> {
        let body = serde_json::to_vec_pretty(summary)?;
        write_atomic(path, &body).await?;
        write_atomic(&path.with_extension("txt"), summary.render_text().as_bytes()).await
    }

    async fn append_log(&self, path: &Path, line: &str) -> Result<()> {
        ensure_parent(path).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| persistence_error(path, "cannot open log", e))?;
        let entry = format!("{} {line}\n", Utc::now().to_rfc3339());
        file.write_all(entry.as_bytes())
            .await
            .map_err(|e| persistence_error(path, "cannot append to", e))?;
        file.flush()
            .await
            .map_err(|e| persistence_error(path, "cannot flush", e))
    }

    async fn write_parameters(&self, path: &Path, params: &[f32]) -> Result<()> {
        let data = bincode::serialize(params).map_err(|e| persistence_error(path, "cannot encode", e))?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data)?;
        let compressed = encoder.finish()?;

        write_atomic(path, &compressed).await
    }

    async fn read_parameters(&self, path: &Path) -> Result<Vec<f32>> {
        let compressed = fs::read(path)
            .await
            .map_err(|e| persistence_error(path, "cannot read parameters", e))?;

        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut data = Vec::new();
        decoder
            .read_to_end(&mut data)
            .map_err(|e| persistence_error(path, "cannot decompress", e))?;

        bincode::deserialize(&data).map_err(|e| persistence_error(path, "cannot decode", e))
    }
}
