//! Resumable evaluation harness CLI.
//!
//! Drives the four-stage behavior evaluation pipeline over a taxonomy of
//! distress behaviors. Progress persists to `run_state.json` so an
//! interrupted run resumes from where it left off; pause/resume/stop are
//! honored between cells via `run_control.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use harness::core::matrix::MatrixPlanner;
use harness::core::timing::format_eta;
use harness::driver::{self, DriverEvent, DriverStop, RunRequest};
use harness::exit_codes;
use harness::io::config::load_config;
use harness::io::pipeline::ProcessStageRunner;
use harness::io::results::{ResultsPaths, file_sha256};
use harness::io::run_state::{StateStore, load_run_state};
use harness::io::taxonomy::{load_taxonomy, select_behaviors};
use harness::validate::validate_state_file;

#[derive(Parser)]
#[command(
    name = "harness",
    version,
    about = "Resumable evaluation harness for distress-behavior probing"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all pending cells, resuming from persisted state.
    Run {
        /// Harness configuration file.
        #[arg(long, default_value = "harness.toml")]
        config: PathBuf,
        /// Behavior taxonomy CSV.
        #[arg(long)]
        taxonomy: PathBuf,
        /// Directory for state, control, and run artifacts.
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,
        /// Comma-separated turn counts overriding the config.
        #[arg(long)]
        turns: Option<String>,
        /// Comma-separated behavior slugs to run (default: all).
        #[arg(long)]
        selected: Option<String>,
        /// Limit to the first N behaviors.
        #[arg(long)]
        behaviors: Option<usize>,
        /// Custom run id (default: timestamp plus random suffix).
        #[arg(long)]
        run_id: Option<String>,
        /// Show what would run without executing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the progress summary from the persisted state.
    Status {
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,
    },
    /// Check the persisted state file against schema and invariants.
    Validate {
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,
    },
    /// Remove persisted state and control files.
    Reset {
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,
        /// Required: resets discard all completion bookkeeping.
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    harness::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            taxonomy,
            results_dir,
            turns,
            selected,
            behaviors,
            run_id,
            dry_run,
        } => cmd_run(RunArgs {
            config,
            taxonomy,
            results_dir,
            turns,
            selected,
            behaviors,
            run_id,
            dry_run,
        }),
        Command::Status { results_dir } => cmd_status(&results_dir),
        Command::Validate { results_dir } => cmd_validate(&results_dir),
        Command::Reset { results_dir, force } => cmd_reset(&results_dir, force),
    }
}

struct RunArgs {
    config: PathBuf,
    taxonomy: PathBuf,
    results_dir: PathBuf,
    turns: Option<String>,
    selected: Option<String>,
    behaviors: Option<usize>,
    run_id: Option<String>,
    dry_run: bool,
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let mut config = load_config(&args.config).context("load config")?;
    if let Some(turns) = &args.turns {
        config.turn_counts = parse_turns(turns)?;
    }
    if let Some(selected) = &args.selected {
        config.selected = selected
            .split(',')
            .map(str::trim)
            .filter(|slug| !slug.is_empty())
            .map(str::to_string)
            .collect();
    }
    if args.behaviors.is_some() {
        config.max_behaviors = args.behaviors;
    }
    config.validate()?;

    let taxonomy = load_taxonomy(&args.taxonomy)?;
    let behaviors = select_behaviors(taxonomy, &config.selected, config.max_behaviors)?;

    let paths = ResultsPaths::new(&args.results_dir);
    fs::create_dir_all(paths.results_dir())
        .with_context(|| format!("create results dir {}", args.results_dir.display()))?;

    if args.dry_run {
        return cmd_dry_run(&paths, &config.turn_counts, &behaviors);
    }

    let run_id = args.run_id.unwrap_or_else(driver::generate_run_id);
    let taxonomy_sha256 = file_sha256(&args.taxonomy)?;

    println!(
        "run: id={} behaviors={} turn_counts={:?}",
        run_id,
        behaviors.len(),
        config.turn_counts
    );
    println!("run: results={}", paths.run_dir(&run_id).display());

    let runner = ProcessStageRunner::new(config.pipeline.command.clone());
    let request = RunRequest {
        paths: &paths,
        config: &config,
        behaviors: &behaviors,
        run_id,
        taxonomy_sha256,
    };
    let outcome = driver::run_matrix(&request, &runner, print_event)?;

    println!(
        "run: finished completed={}/{} failed={} stopped={}",
        outcome.summary.completed,
        outcome.summary.total,
        outcome.summary.failed,
        outcome.stop == DriverStop::Stopped
    );

    Ok(match outcome.stop {
        DriverStop::Stopped => exit_codes::STOPPED,
        DriverStop::Completed if outcome.summary.failed > 0 => exit_codes::COMPLETED_WITH_FAILURES,
        DriverStop::Completed => exit_codes::OK,
    })
}

fn print_event(event: &DriverEvent<'_>) {
    match event {
        DriverEvent::CellStarted {
            cell,
            index,
            pending,
        } => println!("cell: {} [{}/{}]", cell, index + 1, pending),
        DriverEvent::StageStarted { .. } => {}
        DriverEvent::StageCompleted {
            stage,
            duration_secs,
        } => println!("  stage: {stage} {duration_secs:.1}s"),
        DriverEvent::CellCompleted {
            cell,
            summary,
            eta_secs,
        } => println!(
            "cell: {} outcome=completed progress={}/{} ({:.1}%) eta={}",
            cell,
            summary.completed,
            summary.total,
            summary.progress_pct,
            format_eta(*eta_secs)
        ),
        DriverEvent::CellFailed { cell, error } => {
            println!("cell: {cell} outcome=failed error={error}");
        }
        DriverEvent::BehaviorCompleted { behavior } => {
            println!("behavior complete: {behavior}");
        }
        DriverEvent::Paused => println!("run paused, waiting for resume signal"),
        DriverEvent::Resumed => println!("run resumed"),
    }
}

fn cmd_dry_run(
    paths: &ResultsPaths,
    turn_counts: &[u32],
    behaviors: &[harness::io::taxonomy::Behavior],
) -> Result<i32> {
    let store = StateStore::open(&paths.state_path())?;
    let slugs: Vec<String> = behaviors.iter().map(|b| b.slug.clone()).collect();
    let planner = MatrixPlanner::new(&slugs, turn_counts);
    let pending = planner.pending_cells(&store.state().completed);

    println!(
        "dry-run: behaviors={} turn_counts={:?} total={} pending={}",
        behaviors.len(),
        turn_counts,
        planner.total(),
        pending.len()
    );
    for cell in pending.iter().take(10) {
        println!("  - {cell}");
    }
    if pending.len() > 10 {
        println!("  ... and {} more", pending.len() - 10);
    }
    Ok(exit_codes::OK)
}

fn cmd_status(results_dir: &Path) -> Result<i32> {
    let paths = ResultsPaths::new(results_dir);
    let state_path = paths.state_path();
    if !state_path.exists() {
        println!("status: no run state at {}", state_path.display());
        return Ok(exit_codes::OK);
    }

    let state = load_run_state(&state_path)?;
    let summary = state.progress_summary();
    println!(
        "status: run_id={} completed={}/{} ({:.1}%) failed={} pending={}",
        state.run_id.as_deref().unwrap_or("-"),
        summary.completed,
        summary.total,
        summary.progress_pct,
        summary.failed,
        summary.pending
    );

    let in_flight = state.current.as_ref().and_then(|current| current.stage);
    if let Some(current) = &state.current {
        println!(
            "status: current={} ({} turns) stage={}",
            current.behavior,
            current.turn_count,
            current
                .stage
                .map(|stage| stage.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    let eta = state
        .stage_timings
        .estimate_remaining(summary.pending, in_flight);
    println!("status: eta={}", format_eta(eta));
    Ok(exit_codes::OK)
}

fn cmd_validate(results_dir: &Path) -> Result<i32> {
    let paths = ResultsPaths::new(results_dir);
    let state_path = paths.state_path();
    if !state_path.exists() {
        bail!("no run state at {}", state_path.display());
    }
    let state = validate_state_file(&state_path)?;
    println!(
        "validate: ok ({} completed cells, {} failures)",
        state.completed_count(),
        state.failed.len()
    );
    Ok(exit_codes::OK)
}

fn cmd_reset(results_dir: &Path, force: bool) -> Result<i32> {
    if !force {
        bail!("reset discards all completion bookkeeping; pass --force to confirm");
    }
    let paths = ResultsPaths::new(results_dir);
    for path in [paths.state_path(), paths.control_path()] {
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            println!("reset: removed {}", path.display());
        }
    }
    Ok(exit_codes::OK)
}

fn parse_turns(turns: &str) -> Result<Vec<u32>> {
    turns
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .with_context(|| format!("invalid turn count '{part}'"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["harness", "run", "--taxonomy", "tax.csv"]);
        match cli.command {
            Command::Run {
                taxonomy,
                results_dir,
                dry_run,
                ..
            } => {
                assert_eq!(taxonomy, PathBuf::from("tax.csv"));
                assert_eq!(results_dir, PathBuf::from("results"));
                assert!(!dry_run);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn parse_turns_accepts_comma_list() {
        assert_eq!(parse_turns("4, 5,6").expect("parse"), vec![4, 5, 6]);
        assert!(parse_turns("4,x").is_err());
    }

    #[test]
    fn parse_reset_requires_explicit_force_flag() {
        let cli = Cli::parse_from(["harness", "reset", "--force"]);
        assert!(matches!(
            cli.command,
            Command::Reset { force: true, .. }
        ));
    }
}
