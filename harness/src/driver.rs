//! Run driver: the state machine that executes the pending test matrix.
//!
//! The driver is single-threaded and strictly sequential: cells run one at
//! a time, and the four stages within a cell run in fixed order. The only
//! blocking points are stage execution and the pause poll loop. Control
//! signals are checked at cell boundaries only; an in-flight stage always
//! runs to completion before a pause or stop takes effect.
//!
//! Failure containment: a stage error fails its cell and the run moves on.
//! Only state-persistence errors abort the run, since continuing without
//! durable progress tracking would make future resumption unsafe.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use tracing::{info, instrument, warn};

use crate::core::matrix::{MatrixPlanner, ProgressSummary};
use crate::core::types::{BehaviorCell, StageName};
use crate::io::config::HarnessConfig;
use crate::io::control::{acknowledge_exit, check_pause_or_stop, wait_for_resume};
use crate::io::pipeline::{StageRequest, StageRunner};
use crate::io::results::ResultsPaths;
use crate::io::run_state::{RunConfigEcho, StateStore};
use crate::io::seed::write_seed;
use crate::io::taxonomy::Behavior;

/// Inputs for one driver invocation.
#[derive(Debug)]
pub struct RunRequest<'a> {
    pub paths: &'a ResultsPaths,
    pub config: &'a HarnessConfig,
    /// Behaviors to evaluate, already selection-filtered, in matrix order.
    pub behaviors: &'a [Behavior],
    pub run_id: String,
    /// SHA-256 of the taxonomy file, recorded in the state for provenance.
    pub taxonomy_sha256: String,
}

/// Why the driver exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStop {
    /// The pending matrix was exhausted (individual cells may have failed).
    Completed,
    /// A stop signal was honored at a cell boundary; state is resumable.
    Stopped,
}

/// Summary of a driver invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverOutcome {
    pub run_id: String,
    pub summary: ProgressSummary,
    pub stop: DriverStop,
}

/// Cell/stage lifecycle notifications for progress reporting.
#[derive(Debug)]
pub enum DriverEvent<'a> {
    CellStarted {
        cell: &'a BehaviorCell,
        /// Zero-based position in this invocation's pending list.
        index: usize,
        pending: usize,
    },
    StageStarted {
        stage: StageName,
    },
    StageCompleted {
        stage: StageName,
        duration_secs: f64,
    },
    CellCompleted {
        cell: &'a BehaviorCell,
        summary: ProgressSummary,
        eta_secs: f64,
    },
    CellFailed {
        cell: &'a BehaviorCell,
        error: &'a str,
    },
    BehaviorCompleted {
        behavior: &'a str,
    },
    Paused,
    Resumed,
}

enum CellStatus {
    Completed,
    Failed(String),
}

/// Generate a run id: timestamp plus a short random suffix so repeated
/// starts within one second stay distinct.
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut rng = rand::thread_rng();
    let suffix: String = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("{timestamp}_{suffix}")
}

/// Execute every pending cell of the matrix, honoring pause/stop signals
/// at cell boundaries.
///
/// Returns `Ok` for both completion and a clean stop; `Err` only for fatal
/// conditions (invalid inputs, state persistence failure).
#[instrument(skip_all, fields(run_id = %request.run_id))]
pub fn run_matrix<R: StageRunner, F: FnMut(&DriverEvent<'_>)>(
    request: &RunRequest<'_>,
    runner: &R,
    mut on_event: F,
) -> Result<DriverOutcome> {
    let config = request.config;
    config.validate()?;
    if request.behaviors.is_empty() {
        bail!("behavior list is empty");
    }

    let control_path = request.paths.control_path();
    let poll_interval = Duration::from_secs(config.poll_interval_secs);

    let mut store = StateStore::open(&request.paths.state_path())?;
    store.set_config(
        &request.run_id,
        request.behaviors.len(),
        &config.turn_counts,
        config_echo(config, &request.taxonomy_sha256),
    )?;

    let by_slug: BTreeMap<&str, &Behavior> = request
        .behaviors
        .iter()
        .map(|behavior| (behavior.slug.as_str(), behavior))
        .collect();
    let slugs: Vec<String> = request
        .behaviors
        .iter()
        .map(|behavior| behavior.slug.clone())
        .collect();
    let planner = MatrixPlanner::new(&slugs, &config.turn_counts);
    let pending = planner.pending_cells(&store.state().completed);
    let pending_total = pending.len();

    info!(
        pending = pending_total,
        total = planner.total(),
        "run starting"
    );

    let mut stopped = false;
    for (index, cell) in pending.iter().enumerate() {
        let (should_pause, should_stop) = check_pause_or_stop(&control_path);
        if should_stop {
            info!("stop signal observed, exiting at cell boundary");
            stopped = true;
            break;
        }
        if should_pause {
            on_event(&DriverEvent::Paused);
            if !wait_for_resume(&control_path, poll_interval) {
                info!("stop signal observed while paused");
                stopped = true;
                break;
            }
            on_event(&DriverEvent::Resumed);
        }

        let behavior = by_slug
            .get(cell.behavior.as_str())
            .copied()
            .ok_or_else(|| anyhow!("behavior {} missing from selection", cell.behavior))?;

        on_event(&DriverEvent::CellStarted {
            cell,
            index,
            pending: pending_total,
        });
        store.mark_started(&cell.behavior, cell.turn_count)?;

        let cell_dir = request
            .paths
            .cell_dir(&request.run_id, &cell.behavior, cell.turn_count);

        match execute_cell(&mut store, runner, behavior, cell, &cell_dir, config, &mut on_event)? {
            CellStatus::Completed => {
                store.mark_completed(&cell.behavior, cell.turn_count)?;
                let remaining = pending_total - index - 1;
                let eta_secs = store
                    .state()
                    .stage_timings
                    .estimate_remaining(remaining, None);
                on_event(&DriverEvent::CellCompleted {
                    cell,
                    summary: store.state().progress_summary(),
                    eta_secs,
                });
            }
            CellStatus::Failed(error) => {
                warn!(cell = %cell, error = %error, "cell failed");
                store.mark_failed(&cell.behavior, cell.turn_count, &error)?;
                on_event(&DriverEvent::CellFailed { cell, error: &error });
            }
        }

        if planner.is_behavior_complete(&store.state().completed, &cell.behavior) {
            on_event(&DriverEvent::BehaviorCompleted {
                behavior: &cell.behavior,
            });
        }

        if let Err(err) = request.paths.archive_state(&request.run_id) {
            warn!(error = %err, "state archival failed");
        }
    }

    // Final flush + archival on every exit path.
    store.save()?;
    if let Err(err) = request.paths.archive_state(&request.run_id) {
        warn!(error = %err, "final state archival failed");
    }
    if let Err(err) = acknowledge_exit(&control_path) {
        warn!(error = %err, "control acknowledgment failed");
    }

    let summary = store.state().progress_summary();
    let stop = if stopped {
        DriverStop::Stopped
    } else {
        DriverStop::Completed
    };
    info!(
        completed = summary.completed,
        failed = summary.failed,
        stopped,
        "run finished"
    );
    Ok(DriverOutcome {
        run_id: request.run_id.clone(),
        summary,
        stop,
    })
}

/// Run the four stages for one cell.
///
/// Stage and seed errors are contained as a failed cell; state-store
/// errors propagate as fatal.
fn execute_cell<R: StageRunner, F: FnMut(&DriverEvent<'_>)>(
    store: &mut StateStore,
    runner: &R,
    behavior: &Behavior,
    cell: &BehaviorCell,
    cell_dir: &Path,
    config: &HarnessConfig,
    on_event: &mut F,
) -> Result<CellStatus> {
    let seed_path = match write_seed(cell_dir, behavior, cell.turn_count, &config.models) {
        Ok(path) => path,
        Err(err) => return Ok(CellStatus::Failed(format!("seed: {err:#}"))),
    };

    for stage in StageName::ALL {
        store.update_stage(stage)?;
        on_event(&DriverEvent::StageStarted { stage });

        let stage_request = StageRequest {
            stage,
            behavior: cell.behavior.clone(),
            turn_count: cell.turn_count,
            cell_dir: cell_dir.to_path_buf(),
            seed_path: seed_path.clone(),
            timeout: Duration::from_secs(config.pipeline.stage_timeout_secs),
            output_limit_bytes: config.pipeline.output_limit_bytes,
        };

        let start = Instant::now();
        match runner.run(&stage_request) {
            Ok(()) => {
                let duration_secs = start.elapsed().as_secs_f64();
                store.add_stage_timing(stage, duration_secs)?;
                on_event(&DriverEvent::StageCompleted {
                    stage,
                    duration_secs,
                });
            }
            Err(err) => return Ok(CellStatus::Failed(format!("{stage}: {err:#}"))),
        }
    }

    Ok(CellStatus::Completed)
}

fn config_echo(config: &HarnessConfig, taxonomy_sha256: &str) -> RunConfigEcho {
    RunConfigEcho {
        understanding_model: config.models.understanding.clone(),
        ideation_model: config.models.ideation.clone(),
        rollout_model: config.models.rollout.clone(),
        judgment_model: config.models.judgment.clone(),
        target_model: config.models.target.clone(),
        taxonomy_sha256: taxonomy_sha256.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedStageRunner, TempResults, behavior_fixture};

    #[test]
    fn empty_behavior_list_fails_fast() {
        let results = TempResults::new().expect("temp results");
        let config = HarnessConfig::default();
        let request = RunRequest {
            paths: &results.paths,
            config: &config,
            behaviors: &[],
            run_id: "run-1".to_string(),
            taxonomy_sha256: String::new(),
        };

        let err = run_matrix(&request, &ScriptedStageRunner::new(), |_| {}).unwrap_err();
        assert!(err.to_string().contains("behavior list is empty"));
        assert!(!results.paths.state_path().exists());
    }

    #[test]
    fn invalid_config_fails_fast_without_state_mutation() {
        let results = TempResults::new().expect("temp results");
        let config = HarnessConfig {
            turn_counts: vec![0],
            ..HarnessConfig::default()
        };
        let behaviors = [behavior_fixture("a")];
        let request = RunRequest {
            paths: &results.paths,
            config: &config,
            behaviors: &behaviors,
            run_id: "run-1".to_string(),
            taxonomy_sha256: String::new(),
        };

        assert!(run_matrix(&request, &ScriptedStageRunner::new(), |_| {}).is_err());
        assert!(!results.paths.state_path().exists());
    }

    #[test]
    fn run_id_has_timestamp_and_suffix() {
        let id = generate_run_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 6);
    }
}
