//! HTTP route handlers for the dashboard API.
//!
//! Every view here is a pure derivation over the persisted run state and
//! result artifacts: any reader can recompute them without coordinating
//! with the driver. The control endpoints are the only writers, and they
//! touch only the control-signal file.

use std::collections::BTreeMap;
use std::fs;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use walkdir::WalkDir;

use harness::core::types::StageName;
use harness::io::control::{
    ControlCommand, ControlSignal, ControlStatus, read_control, write_control,
};
use harness::io::run_state::{RunState, load_run_state};
use harness::io::taxonomy::load_taxonomy;

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(get_status))
        .route("/stats", get(get_stats))
        .route("/behaviors", get(get_behaviors))
        .route("/control", get(get_control))
        .route("/control/pause", post(post_pause))
        .route("/control/resume", post(post_resume))
        .route("/control/stop", post(post_stop))
}

async fn health() -> &'static str {
    "ok"
}

/// Load run state if the file exists; `None` means no run has ever started.
fn load_state_opt(state: &AppState) -> Result<Option<RunState>, StatusCode> {
    let path = state.paths.state_path();
    if !path.exists() {
        return Ok(None);
    }
    load_run_state(&path).map(Some).map_err(|err| {
        warn!(error = %err, "run state unreadable");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[derive(Debug, Serialize)]
pub struct StageProgress {
    pub name: String,
    pub status: String,
    pub avg_duration: f64,
}

#[derive(Debug, Default, Serialize)]
pub struct RunStatus {
    pub is_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    pub total_tests: usize,
    pub completed_tests: usize,
    pub failed_tests: usize,
    pub pending_tests: usize,
    pub progress_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_behavior: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_turn_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    pub total_behaviors: usize,
    pub turn_counts: Vec<u32>,
    pub stages: Vec<StageProgress>,
    pub current_test_number: usize,
    pub stage_timings: BTreeMap<String, f64>,
}

/// GET /api/status - live progress derived from the run state.
async fn get_status(State(state): State<AppState>) -> Result<Json<RunStatus>, StatusCode> {
    let Some(run_state) = load_state_opt(&state)? else {
        return Ok(Json(RunStatus::default()));
    };
    Ok(Json(run_status(&run_state)))
}

fn run_status(state: &RunState) -> RunStatus {
    let summary = state.progress_summary();
    let current = state.current.as_ref();
    let is_running = current.is_some();
    let current_stage = current.and_then(|cell| cell.stage);

    let avg_times: BTreeMap<String, f64> = StageName::ALL
        .iter()
        .map(|&stage| (stage.to_string(), state.stage_timings.average_for(stage)))
        .collect();

    // A cell's earlier stages count as completed relative to the one in
    // flight; before the first stage dispatch nothing is completed yet.
    let current_index = current_stage.map(StageName::index).unwrap_or(0);
    let stages = StageName::ALL
        .iter()
        .map(|&stage| {
            let status = if !is_running {
                "pending"
            } else if current_stage == Some(stage) {
                "running"
            } else if stage.index() < current_index {
                "completed"
            } else {
                "pending"
            };
            StageProgress {
                name: stage.to_string(),
                status: status.to_string(),
                avg_duration: state.stage_timings.average_for(stage),
            }
        })
        .collect();

    let eta_seconds = is_running.then(|| {
        state
            .stage_timings
            .estimate_remaining(summary.pending, current_stage)
    });

    RunStatus {
        is_running,
        run_id: state.run_id.clone(),
        started_at: Some(state.started_at.clone()),
        last_updated: Some(state.last_updated.clone()),
        total_tests: summary.total,
        completed_tests: summary.completed,
        failed_tests: summary.failed,
        pending_tests: summary.pending,
        progress_pct: summary.progress_pct,
        current_behavior: current.map(|cell| cell.behavior.clone()),
        current_turn_count: current.map(|cell| cell.turn_count),
        current_stage: current_stage.map(|stage| stage.to_string()),
        eta_seconds,
        total_behaviors: state.total_behaviors,
        turn_counts: state.turn_counts.clone(),
        stages,
        current_test_number: if is_running {
            summary.completed + 1
        } else {
            summary.completed
        },
        stage_timings: avg_times,
    }
}

#[derive(Debug, Default, Serialize)]
pub struct StatsResponse {
    pub total_behaviors: usize,
    pub total_tests: usize,
    pub completed_tests: usize,
    pub failed_tests: usize,
    pub behaviors_completed: usize,
    pub behaviors_in_progress: usize,
    pub behaviors_pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_score: Option<f64>,
}

/// GET /api/stats - behavior-level rollup plus judgment score average.
async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, StatusCode> {
    let Some(run_state) = load_state_opt(&state)? else {
        return Ok(Json(StatsResponse::default()));
    };

    let summary = run_state.progress_summary();
    let turn_count_total = run_state.turn_counts.len();
    let behaviors_completed = run_state
        .completed
        .values()
        .filter(|turns| turns.len() == turn_count_total && turn_count_total > 0)
        .count();
    let behaviors_in_progress = run_state
        .completed
        .values()
        .filter(|turns| !turns.is_empty() && turns.len() < turn_count_total)
        .count();

    Ok(Json(StatsResponse {
        total_behaviors: run_state.total_behaviors,
        total_tests: summary.total,
        completed_tests: summary.completed,
        failed_tests: summary.failed,
        behaviors_completed,
        behaviors_in_progress,
        behaviors_pending: run_state
            .total_behaviors
            .saturating_sub(behaviors_completed + behaviors_in_progress),
        average_score: average_judgment_score(&state),
    }))
}

/// Mean of `summary_statistics.average_score` across all judgment.json
/// artifacts under the results directory. `None` when no scores exist.
fn average_judgment_score(state: &AppState) -> Option<f64> {
    let mut scores = Vec::new();
    for entry in WalkDir::new(state.paths.results_dir())
        .into_iter()
        .filter_map(Result::ok)
    {
        if entry.file_name() != "judgment.json" || !entry.file_type().is_file() {
            continue;
        }
        let Ok(contents) = fs::read_to_string(entry.path()) else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(&contents) else {
            continue;
        };
        if let Some(score) = value
            .get("summary_statistics")
            .and_then(|stats| stats.get("average_score"))
            .and_then(Value::as_f64)
        {
            scores.push(score);
        }
    }
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

#[derive(Debug, Serialize)]
pub struct BehaviorStatus {
    pub slug: String,
    /// `completed`, `partial`, `in_progress`, or `pending`.
    pub status: String,
    pub completed_turns: Vec<u32>,
}

#[derive(Debug, Serialize)]
pub struct BehaviorsResponse {
    pub turn_counts: Vec<u32>,
    pub behaviors: Vec<BehaviorStatus>,
}

/// GET /api/behaviors - per-behavior completion status.
///
/// The behavior universe is the taxonomy when configured, otherwise every
/// behavior the state has seen.
async fn get_behaviors(
    State(state): State<AppState>,
) -> Result<Json<BehaviorsResponse>, StatusCode> {
    let run_state = load_state_opt(&state)?.unwrap_or_default();

    let mut slugs: Vec<String> = Vec::new();
    if let Some(taxonomy_path) = &state.taxonomy {
        let taxonomy = load_taxonomy(taxonomy_path).map_err(|err| {
            warn!(error = %err, "taxonomy unreadable");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        slugs.extend(taxonomy.into_iter().map(|behavior| behavior.slug));
    }
    for slug in run_state.completed.keys() {
        if !slugs.contains(slug) {
            slugs.push(slug.clone());
        }
    }
    for record in &run_state.failed {
        if !slugs.contains(&record.behavior) {
            slugs.push(record.behavior.clone());
        }
    }
    if let Some(current) = &run_state.current
        && !slugs.contains(&current.behavior)
    {
        slugs.push(current.behavior.clone());
    }

    let behaviors = slugs
        .into_iter()
        .map(|slug| {
            let completed_turns = run_state
                .completed
                .get(&slug)
                .cloned()
                .unwrap_or_default();
            let in_progress = run_state
                .current
                .as_ref()
                .is_some_and(|cell| cell.behavior == slug);
            let all_done = !run_state.turn_counts.is_empty()
                && run_state
                    .turn_counts
                    .iter()
                    .all(|turn| completed_turns.contains(turn));
            let status = if in_progress {
                "in_progress"
            } else if all_done {
                "completed"
            } else if !completed_turns.is_empty() {
                "partial"
            } else {
                "pending"
            };
            BehaviorStatus {
                slug,
                status: status.to_string(),
                completed_turns,
            }
        })
        .collect();

    Ok(Json(BehaviorsResponse {
        turn_counts: run_state.turn_counts,
        behaviors,
    }))
}

/// GET /api/control - current control signal (default when absent).
async fn get_control(State(state): State<AppState>) -> Json<ControlSignal> {
    Json(read_control(&state.paths.control_path()))
}

/// POST /api/control/pause - request a pause at the next cell boundary.
async fn post_pause(State(state): State<AppState>) -> Result<Json<ControlSignal>, StatusCode> {
    set_control_for_active_run(&state, ControlStatus::Paused, ControlCommand::Pause)
}

/// POST /api/control/stop - request a stop at the next cell boundary.
async fn post_stop(State(state): State<AppState>) -> Result<Json<ControlSignal>, StatusCode> {
    set_control_for_active_run(&state, ControlStatus::Stopping, ControlCommand::Stop)
}

/// POST /api/control/resume - resume a paused run.
async fn post_resume(State(state): State<AppState>) -> Result<Json<ControlSignal>, StatusCode> {
    let run_state = load_state_opt(&state)?;
    let signal = ControlSignal {
        status: ControlStatus::Running,
        command: Some(ControlCommand::Resume),
        run_id: run_state.and_then(|s| s.run_id),
    };
    write_signal(&state, signal)
}

/// Pause/stop only make sense against an in-flight run.
fn set_control_for_active_run(
    state: &AppState,
    status: ControlStatus,
    command: ControlCommand,
) -> Result<Json<ControlSignal>, StatusCode> {
    let run_state = load_state_opt(state)?.ok_or(StatusCode::CONFLICT)?;
    if run_state.current.is_none() {
        return Err(StatusCode::CONFLICT);
    }
    let signal = ControlSignal {
        status,
        command: Some(command),
        run_id: run_state.run_id,
    };
    write_signal(state, signal)
}

fn write_signal(state: &AppState, signal: ControlSignal) -> Result<Json<ControlSignal>, StatusCode> {
    write_control(&state.paths.control_path(), &signal).map_err(|err| {
        warn!(error = %err, "control write failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(signal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness::io::run_state::{RunConfigEcho, StateStore};

    fn app_state(temp: &tempfile::TempDir) -> AppState {
        AppState::new(temp.path().to_path_buf(), None)
    }

    fn seeded_store(state: &AppState) -> StateStore {
        let mut store = StateStore::open(&state.paths.state_path()).expect("open");
        store
            .set_config("run-1", 2, &[4, 5], RunConfigEcho::default())
            .expect("config");
        store
    }

    #[tokio::test]
    async fn status_defaults_when_no_state_exists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let Json(status) = get_status(State(app_state(&temp))).await.expect("status");
        assert!(!status.is_running);
        assert_eq!(status.total_tests, 0);
        assert_eq!(status.progress_pct, 0.0);
    }

    #[tokio::test]
    async fn status_reports_progress_and_stage_states() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = app_state(&temp);
        let mut store = seeded_store(&app);
        store.mark_completed("a", 4).expect("complete");
        store.mark_started("a", 5).expect("start");
        store
            .update_stage(StageName::Rollout)
            .expect("stage");

        let Json(status) = get_status(State(app)).await.expect("status");
        assert!(status.is_running);
        assert_eq!(status.total_tests, 4);
        assert_eq!(status.completed_tests, 1);
        assert_eq!(status.current_behavior.as_deref(), Some("a"));
        assert_eq!(status.current_stage.as_deref(), Some("rollout"));
        assert_eq!(status.current_test_number, 2);

        let statuses: Vec<&str> = status
            .stages
            .iter()
            .map(|stage| stage.status.as_str())
            .collect();
        assert_eq!(statuses, vec!["completed", "completed", "running", "pending"]);

        // 3 pending cells, rollout in flight: defaults 30+60+120+90 per
        // cell minus the in-flight cell's understanding+ideation.
        assert_eq!(status.eta_seconds, Some(3.0 * 300.0 - 90.0));
    }

    #[tokio::test]
    async fn stats_rolls_up_behavior_completion_and_scores() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = app_state(&temp);
        let mut store = seeded_store(&app);
        store.mark_completed("a", 4).expect("a4");
        store.mark_completed("a", 5).expect("a5");
        store.mark_completed("b", 4).expect("b4");

        let cell_dir = temp.path().join("run_run-1/a/turns_4");
        fs::create_dir_all(&cell_dir).expect("cell dir");
        fs::write(
            cell_dir.join("judgment.json"),
            "{\"summary_statistics\": {\"average_score\": 7.0}}",
        )
        .expect("judgment");

        let Json(stats) = get_stats(State(app)).await.expect("stats");
        assert_eq!(stats.behaviors_completed, 1);
        assert_eq!(stats.behaviors_in_progress, 1);
        assert_eq!(stats.behaviors_pending, 0);
        assert_eq!(stats.average_score, Some(7.0));
    }

    #[tokio::test]
    async fn behaviors_listing_classifies_each_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = app_state(&temp);
        let mut store = seeded_store(&app);
        store.mark_completed("done", 4).expect("d4");
        store.mark_completed("done", 5).expect("d5");
        store.mark_completed("half", 4).expect("h4");
        store.mark_failed("broken", 4, "boom").expect("fail");
        store.mark_started("active", 4).expect("start");

        let Json(listing) = get_behaviors(State(app)).await.expect("behaviors");
        let status_of = |slug: &str| {
            listing
                .behaviors
                .iter()
                .find(|behavior| behavior.slug == slug)
                .map(|behavior| behavior.status.clone())
                .expect("behavior present")
        };
        assert_eq!(status_of("done"), "completed");
        assert_eq!(status_of("half"), "partial");
        assert_eq!(status_of("broken"), "pending");
        assert_eq!(status_of("active"), "in_progress");
    }

    #[tokio::test]
    async fn pause_requires_an_active_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = app_state(&temp);

        // No state file at all.
        let err = post_pause(State(app.clone())).await.unwrap_err();
        assert_eq!(err, StatusCode::CONFLICT);

        // State exists but nothing in flight.
        let _store = seeded_store(&app);
        let err = post_pause(State(app.clone())).await.unwrap_err();
        assert_eq!(err, StatusCode::CONFLICT);

        // Active cell: pause lands in the control file.
        let mut store = StateStore::open(&app.paths.state_path()).expect("open");
        store.mark_started("a", 4).expect("start");
        let Json(signal) = post_pause(State(app.clone())).await.expect("pause");
        assert_eq!(signal.command, Some(ControlCommand::Pause));
        assert_eq!(signal.status, ControlStatus::Paused);
        assert_eq!(read_control(&app.paths.control_path()), signal);
    }

    #[tokio::test]
    async fn resume_clears_into_running_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let app = app_state(&temp);
        let _store = seeded_store(&app);

        let Json(signal) = post_resume(State(app.clone())).await.expect("resume");
        assert_eq!(signal.command, Some(ControlCommand::Resume));
        assert_eq!(signal.status, ControlStatus::Running);
        assert_eq!(signal.run_id.as_deref(), Some("run-1"));
    }
}
