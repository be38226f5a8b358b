//! Harness configuration (`harness.toml`).
//!
//! This file is intended to be edited by humans and must remain stable and
//! automatable. Missing fields default to sensible values; every field is
//! named and typed, and the whole document is validated at load time.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::StageName;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Conversation lengths tested per behavior, in run order.
    pub turn_counts: Vec<u32>,

    /// Behavior slugs to run. Empty means the whole taxonomy.
    pub selected: Vec<String>,

    /// Limit to the first N behaviors after selection filtering.
    pub max_behaviors: Option<usize>,

    /// Seconds between control-file polls while paused.
    pub poll_interval_secs: u64,

    pub models: ModelsConfig,

    pub pipeline: PipelineConfig,
}

/// Model identifiers per pipeline stage, plus the model under evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelsConfig {
    pub understanding: String,
    pub ideation: String,
    pub rollout: String,
    pub judgment: String,
    /// The assistant model whose responses are being probed.
    pub target: String,
}

/// How pipeline stages are invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base command for stage invocation (e.g. `["pipeline"]`); the stage
    /// name and cell paths are appended as arguments.
    pub command: Vec<String>,

    /// Wall-clock budget per stage in seconds.
    pub stage_timeout_secs: u64,

    /// Truncate stage stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            turn_counts: vec![4, 5, 6, 7, 8],
            selected: Vec::new(),
            max_behaviors: None,
            poll_interval_secs: 2,
            models: ModelsConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            understanding: "gemini-3-pro-preview".to_string(),
            ideation: "gemini-3-pro-preview".to_string(),
            rollout: "gemini-3-pro-preview".to_string(),
            judgment: "gemini-3-pro-preview".to_string(),
            target: "gemini-3-flash-preview".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            command: vec!["pipeline".to_string()],
            stage_timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl ModelsConfig {
    pub fn model_for(&self, stage: StageName) -> &str {
        match stage {
            StageName::Understanding => &self.understanding,
            StageName::Ideation => &self.ideation,
            StageName::Rollout => &self.rollout,
            StageName::Judgment => &self.judgment,
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.turn_counts.is_empty() {
            return Err(anyhow!("turn_counts must be non-empty"));
        }
        if self.turn_counts.iter().any(|&tc| tc == 0) {
            return Err(anyhow!("turn_counts entries must be > 0"));
        }
        let mut seen = self.turn_counts.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.turn_counts.len() {
            return Err(anyhow!("turn_counts must not contain duplicates"));
        }
        if self.selected.iter().any(|slug| slug.trim().is_empty()) {
            return Err(anyhow!("selected entries must be non-empty slugs"));
        }
        if self.max_behaviors == Some(0) {
            return Err(anyhow!("max_behaviors must be > 0 when set"));
        }
        if self.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be > 0"));
        }
        for stage in StageName::ALL {
            if self.models.model_for(stage).trim().is_empty() {
                return Err(anyhow!("models.{stage} must be non-empty"));
            }
        }
        if self.models.target.trim().is_empty() {
            return Err(anyhow!("models.target must be non-empty"));
        }
        if self.pipeline.command.is_empty() || self.pipeline.command[0].trim().is_empty() {
            return Err(anyhow!("pipeline.command must be a non-empty array"));
        }
        if self.pipeline.stage_timeout_secs == 0 {
            return Err(anyhow!("pipeline.stage_timeout_secs must be > 0"));
        }
        if self.pipeline.output_limit_bytes == 0 {
            return Err(anyhow!("pipeline.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HarnessConfig::default()`.
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    if !path.exists() {
        let cfg = HarnessConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HarnessConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
