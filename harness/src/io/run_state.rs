//! Run state storage: the authoritative, persisted completion ledger.
//!
//! `run_state.json` is the durable record of which cells completed or
//! failed, which cell is currently executing, and the recent stage timing
//! windows. It is mutated exclusively by the run driver and read by the
//! dashboard and `status`/`validate` commands. Every mutation is flushed
//! to disk (atomic temp-file + rename) before returning, so a crash loses
//! at most work that was never acknowledged.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::matrix::{self, CompletedMap, ProgressSummary};
use crate::core::timing::StageTimings;
use crate::core::types::StageName;

/// Failure error text is truncated to this many characters before being
/// recorded, to keep the state file bounded.
pub const MAX_ERROR_LEN: usize = 500;

/// Descriptor of the single in-flight cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentCell {
    pub behavior: String,
    pub turn_count: u32,
    /// Stage currently executing; `None` between cell start and the first
    /// stage dispatch.
    pub stage: Option<StageName>,
    pub started_at: String,
}

/// One recorded cell failure. Append-only: a behavior may appear multiple
/// times if it is re-run manually and fails again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub behavior: String,
    pub turn_count: u32,
    pub error: String,
    pub timestamp: String,
}

/// Echo of the run configuration, recorded for provenance. Fixed for the
/// lifetime of the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfigEcho {
    pub understanding_model: String,
    pub ideation_model: String,
    pub rollout_model: String,
    pub judgment_model: String,
    pub target_model: String,
    /// SHA-256 of the taxonomy file the behavior list was derived from.
    pub taxonomy_sha256: String,
}

/// Persisted run state (`run_state.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    /// Identifier of the most recent driver invocation against this state.
    pub run_id: Option<String>,
    pub started_at: String,
    /// Refreshed on every save; monotonically non-decreasing.
    pub last_updated: String,
    pub total_behaviors: usize,
    pub turn_counts: Vec<u32>,
    /// Behavior slug → turn counts completed for it (sorted, no
    /// duplicates). A cell appears here iff its outcome is completed.
    pub completed: CompletedMap,
    /// At most one in-flight cell; `None` when no cell is executing.
    pub current: Option<CurrentCell>,
    pub failed: Vec<FailureRecord>,
    pub config: RunConfigEcho,
    pub stage_timings: StageTimings,
}

impl Default for RunState {
    fn default() -> Self {
        let now = now_rfc3339();
        Self {
            run_id: None,
            started_at: now.clone(),
            last_updated: now,
            total_behaviors: 0,
            turn_counts: Vec::new(),
            completed: BTreeMap::new(),
            current: None,
            failed: Vec::new(),
            config: RunConfigEcho::default(),
            stage_timings: StageTimings::default(),
        }
    }
}

impl RunState {
    /// True iff `(behavior, turn_count)` has a completed outcome.
    pub fn is_completed(&self, behavior: &str, turn_count: u32) -> bool {
        matrix::is_completed(&self.completed, behavior, turn_count)
    }

    pub fn completed_count(&self) -> usize {
        matrix::completed_count(&self.completed)
    }

    pub fn total_cells(&self) -> usize {
        self.total_behaviors * self.turn_counts.len()
    }

    pub fn progress_summary(&self) -> ProgressSummary {
        ProgressSummary::compute(self.completed_count(), self.total_cells(), self.failed.len())
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Load run state from disk. A present-but-unparseable file is an error:
/// silently treating it as fresh could re-run completed cells.
pub fn load_run_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    let state: RunState = serde_json::from_str(&contents)
        .with_context(|| format!("parse run state {}", path.display()))?;
    debug!(
        run_id = ?state.run_id,
        completed = state.completed_count(),
        "run state loaded"
    );
    Ok(state)
}

/// Atomically write run state to disk (temp file + rename).
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Handle over the persisted run state.
///
/// Every mutating method is read-modify-write against the in-memory copy
/// followed by a flush to durable storage before returning. A save failure
/// is fatal to the caller: losing the ability to record progress makes
/// future resumption unsafe.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: RunState,
}

impl StateStore {
    /// Open the store at `path`, loading existing state or initializing a
    /// fresh one when no file exists.
    pub fn open(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            load_run_state(path)?
        } else {
            debug!(path = %path.display(), "no persisted state, starting fresh");
            RunState::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the current state to disk, refreshing `last_updated`.
    pub fn save(&mut self) -> Result<()> {
        self.state.last_updated = now_rfc3339();
        write_run_state(&self.path, &self.state)
    }

    /// Record the run configuration echo. Called once per driver start.
    pub fn set_config(
        &mut self,
        run_id: &str,
        total_behaviors: usize,
        turn_counts: &[u32],
        config: RunConfigEcho,
    ) -> Result<()> {
        self.state.run_id = Some(run_id.to_string());
        self.state.total_behaviors = total_behaviors;
        self.state.turn_counts = turn_counts.to_vec();
        self.state.config = config;
        self.save()
    }

    /// Set `current` to a fresh in-flight descriptor for the cell.
    /// Overwrites any prior descriptor; single-cell-in-flight is a driver
    /// invariant, not checked here.
    pub fn mark_started(&mut self, behavior: &str, turn_count: u32) -> Result<()> {
        self.state.current = Some(CurrentCell {
            behavior: behavior.to_string(),
            turn_count,
            stage: None,
            started_at: now_rfc3339(),
        });
        self.save()
    }

    /// Update the stage of the in-flight cell. No-op when no cell is in
    /// flight.
    pub fn update_stage(&mut self, stage: StageName) -> Result<()> {
        if let Some(current) = self.state.current.as_mut() {
            current.stage = Some(stage);
            return self.save();
        }
        Ok(())
    }

    /// Record a stage duration into its bounded window.
    pub fn add_stage_timing(&mut self, stage: StageName, duration_secs: f64) -> Result<()> {
        self.state.stage_timings.record(stage, duration_secs);
        self.save()
    }

    /// Add the cell to the completion ledger (idempotent) and clear
    /// `current`.
    pub fn mark_completed(&mut self, behavior: &str, turn_count: u32) -> Result<()> {
        let turns = self.state.completed.entry(behavior.to_string()).or_default();
        if !turns.contains(&turn_count) {
            turns.push(turn_count);
            turns.sort_unstable();
        }
        self.state.current = None;
        self.save()
    }

    /// Append a failure record (error truncated) and clear `current`.
    /// Never touches the completion ledger.
    pub fn mark_failed(&mut self, behavior: &str, turn_count: u32, error: &str) -> Result<()> {
        self.state.failed.push(FailureRecord {
            behavior: behavior.to_string(),
            turn_count,
            error: truncate_error(error),
            timestamp: now_rfc3339(),
        });
        self.state.current = None;
        self.save()
    }
}

fn truncate_error(error: &str) -> String {
    if error.chars().count() <= MAX_ERROR_LEN {
        return error.to_string();
    }
    error.chars().take(MAX_ERROR_LEN).collect()
}
