//! Test-only helpers for driving the harness with scripted collaborators.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};

use crate::core::types::StageName;
use crate::io::control::{ControlCommand, ControlSignal, ControlStatus, write_control};
use crate::io::pipeline::{StageRequest, StageRunner};
use crate::io::results::ResultsPaths;
use crate::io::taxonomy::Behavior;

/// Temporary results directory, removed on drop.
pub struct TempResults {
    _temp: tempfile::TempDir,
    pub paths: ResultsPaths,
}

impl TempResults {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp results dir")?;
        let paths = ResultsPaths::new(temp.path());
        Ok(Self { _temp: temp, paths })
    }
}

/// One recorded stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub behavior: String,
    pub turn_count: u32,
    pub stage: StageName,
}

/// Stage runner returning scripted outcomes without spawning processes.
///
/// Records every invocation; optionally fails configured cells at a given
/// stage, and can write a stop signal into a control file once a number of
/// cells have finished their judgment stage (the stop is then observed at
/// the next cell boundary).
#[derive(Default)]
pub struct ScriptedStageRunner {
    calls: Mutex<Vec<RecordedCall>>,
    failures: HashMap<(String, u32), StageName>,
    stop_after_cells: Option<(usize, PathBuf)>,
}

impl ScriptedStageRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `(behavior, turn_count)` when it reaches `stage`.
    pub fn fail_at(mut self, behavior: &str, turn_count: u32, stage: StageName) -> Self {
        self.failures
            .insert((behavior.to_string(), turn_count), stage);
        self
    }

    /// Write a stop command to `control_path` after `cells` cells complete.
    pub fn stop_after_cells(mut self, cells: usize, control_path: PathBuf) -> Self {
        self.stop_after_cells = Some((cells, control_path));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Number of cells that started (counted by understanding-stage calls).
    pub fn cells_started(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.stage == StageName::Understanding)
            .count()
    }
}

impl StageRunner for ScriptedStageRunner {
    fn run(&self, request: &StageRequest) -> Result<()> {
        let mut calls = self.calls.lock().expect("calls lock");
        calls.push(RecordedCall {
            behavior: request.behavior.clone(),
            turn_count: request.turn_count,
            stage: request.stage,
        });

        if let Some((cells, control_path)) = &self.stop_after_cells
            && request.stage == StageName::Judgment
        {
            let finished = calls
                .iter()
                .filter(|call| call.stage == StageName::Judgment)
                .count();
            if finished == *cells {
                write_control(
                    control_path,
                    &ControlSignal {
                        status: ControlStatus::Stopping,
                        command: Some(ControlCommand::Stop),
                        run_id: None,
                    },
                )
                .expect("write stop signal");
            }
        }
        drop(calls);

        let key = (request.behavior.clone(), request.turn_count);
        if self.failures.get(&key) == Some(&request.stage) {
            return Err(anyhow!("scripted failure at {}", request.stage));
        }
        Ok(())
    }
}

/// Deterministic taxonomy entry for tests.
pub fn behavior_fixture(slug: &str) -> Behavior {
    Behavior {
        path: format!("Distress > {slug}"),
        slug: slug.to_string(),
        definition: format!("{slug} definition"),
    }
}
