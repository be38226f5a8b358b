//! Shared application state for the dashboard server.

use std::path::PathBuf;

use harness::io::results::ResultsPaths;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Path helpers over the harness results directory.
    pub paths: ResultsPaths,
    /// Optional taxonomy CSV; when present, behavior listings include
    /// never-attempted behaviors as `pending`.
    pub taxonomy: Option<PathBuf>,
}

impl AppState {
    pub fn new(results_dir: PathBuf, taxonomy: Option<PathBuf>) -> Self {
        Self {
            paths: ResultsPaths::new(results_dir),
            taxonomy,
        }
    }
}
