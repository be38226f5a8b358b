//! Stage execution abstraction.
//!
//! The [`StageRunner`] trait decouples the run driver from the actual
//! pipeline backend. Each stage is an opaque, blocking, potentially-failing
//! call; the production implementation spawns the configured pipeline
//! command as a subprocess, and tests use scripted runners that return
//! predetermined outcomes without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::StageName;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Parameters for one stage invocation.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub stage: StageName,
    /// Behavior slug under evaluation.
    pub behavior: String,
    pub turn_count: u32,
    /// Directory holding the cell's seed file and stage artifacts.
    pub cell_dir: PathBuf,
    /// Seed file written by the driver before stage 1.
    pub seed_path: PathBuf,
    /// Maximum time to wait for the stage to complete.
    pub timeout: Duration,
    /// Truncate stage output logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Abstraction over pipeline stage backends.
pub trait StageRunner {
    /// Run one stage for one cell. Artifacts land in `request.cell_dir`.
    fn run(&self, request: &StageRequest) -> Result<()>;
}

/// Stage runner that spawns the configured pipeline command.
///
/// Invocation shape: `<command...> <stage> --seed <seed.toml> --cell-dir
/// <dir>`, run from the cell directory.
pub struct ProcessStageRunner {
    command: Vec<String>,
}

impl ProcessStageRunner {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl StageRunner for ProcessStageRunner {
    #[instrument(skip_all, fields(stage = %request.stage, behavior = %request.behavior, turn_count = request.turn_count))]
    fn run(&self, request: &StageRequest) -> Result<()> {
        info!(cell_dir = %request.cell_dir.display(), "starting pipeline stage");

        if !request.seed_path.exists() {
            return Err(anyhow!("missing seed file {}", request.seed_path.display()));
        }

        let (program, base_args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("pipeline command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(base_args)
            .arg(request.stage.as_str())
            .arg("--seed")
            .arg(&request.seed_path)
            .arg("--cell-dir")
            .arg(&request.cell_dir)
            .current_dir(&request.cell_dir);

        let output = run_command_with_timeout(cmd, request.timeout, request.output_limit_bytes)
            .with_context(|| format!("run pipeline stage {}", request.stage))?;

        write_stage_log(&stage_log_path(&request.cell_dir, request.stage), &output)?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "stage timed out");
            return Err(anyhow!(
                "stage {} timed out after {:?}",
                request.stage,
                request.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "stage failed");
            return Err(anyhow!(
                "stage {} failed with status {:?}",
                request.stage,
                output.status.code()
            ));
        }

        debug!("stage completed");
        Ok(())
    }
}

/// Path of the captured stdout/stderr log for a stage.
pub fn stage_log_path(cell_dir: &Path, stage: StageName) -> PathBuf {
    cell_dir.join(format!("{stage}.log"))
}

fn write_stage_log(path: &Path, output: &CommandOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create stage log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str(&output.stdout_truncated_notice("stage"));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice("stage"));
    if output.timed_out {
        buf.push_str("\n[stage timed out]\n");
    }
    fs::write(path, buf).with_context(|| format!("write stage log {}", path.display()))
}
