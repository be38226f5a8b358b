//! Results directory layout and run archival.
//!
//! All harness artifacts live under a single results directory:
//!
//! ```text
//! results/
//!   run_state.json          authoritative state (shared across runs)
//!   run_control.json        control-signal mailbox
//!   run_<id>/
//!     run_state.json        archival copy for this run
//!     <behavior>/turns_<n>/ per-cell seed, stage logs, artifacts
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Path helpers over the results directory.
#[derive(Debug, Clone)]
pub struct ResultsPaths {
    results_dir: PathBuf,
}

impl ResultsPaths {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Authoritative state file, shared across runs for resumability.
    pub fn state_path(&self) -> PathBuf {
        self.results_dir.join("run_state.json")
    }

    /// Control-signal mailbox.
    pub fn control_path(&self) -> PathBuf {
        self.results_dir.join("run_control.json")
    }

    /// Per-run directory holding cell artifacts and the archival state copy.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.results_dir.join(format!("run_{run_id}"))
    }

    /// Directory for one cell's seed, logs, and stage artifacts.
    pub fn cell_dir(&self, run_id: &str, behavior: &str, turn_count: u32) -> PathBuf {
        self.run_dir(run_id)
            .join(behavior)
            .join(format!("turns_{turn_count}"))
    }

    /// Copy the live state file into the run directory. Called after each
    /// cell and on driver exit so the run directory is self-contained.
    pub fn archive_state(&self, run_id: &str) -> Result<()> {
        let src = self.state_path();
        if !src.exists() {
            return Ok(());
        }
        let run_dir = self.run_dir(run_id);
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("create run dir {}", run_dir.display()))?;
        let dst = run_dir.join("run_state.json");
        fs::copy(&src, &dst)
            .with_context(|| format!("archive state to {}", dst.display()))?;
        Ok(())
    }
}

/// SHA-256 of a file, hex-encoded. Recorded in the run configuration echo
/// for reproducibility tracking.
pub fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_dir_is_stable() {
        let paths = ResultsPaths::new("/tmp/results");
        assert_eq!(
            paths.cell_dir("20260805_101500_ab12cd", "acute-shock", 5),
            PathBuf::from("/tmp/results/run_20260805_101500_ab12cd/acute-shock/turns_5")
        );
    }

    #[test]
    fn archive_copies_live_state_into_run_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ResultsPaths::new(temp.path());
        fs::create_dir_all(paths.results_dir()).expect("results dir");
        fs::write(paths.state_path(), "{}\n").expect("state");

        paths.archive_state("run-1").expect("archive");
        assert!(paths.run_dir("run-1").join("run_state.json").exists());
    }

    #[test]
    fn archive_is_a_noop_without_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ResultsPaths::new(temp.path().join("results"));
        paths.archive_state("run-1").expect("archive");
        assert!(!paths.run_dir("run-1").exists());
    }

    #[test]
    fn sha256_matches_known_digest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("taxonomy.csv");
        fs::write(&path, "abc").expect("write");
        assert_eq!(
            file_sha256(&path).expect("hash"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
