//! Control-signal mailbox between the dashboard and the run driver.
//!
//! `run_control.json` has a lifecycle independent of the run state:
//! external writers (the dashboard's control endpoints) set a one-shot
//! `command` plus a `status`, and the driver is the sole reader that acts
//! on commands, consuming them once handled. Control-plane unavailability
//! must never block data-plane work, so reads degrade to a default signal
//! instead of failing.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::io::run_state::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    Idle,
    Running,
    Paused,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    Pause,
    Resume,
    Stop,
}

/// Persisted control signal (`run_control.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSignal {
    /// Driver-acknowledged state, not just the last command issued.
    pub status: ControlStatus,
    /// One-shot instruction, cleared back to `None` once acted upon.
    pub command: Option<ControlCommand>,
    pub run_id: Option<String>,
}

impl Default for ControlSignal {
    fn default() -> Self {
        Self {
            status: ControlStatus::Running,
            command: None,
            run_id: None,
        }
    }
}

impl ControlSignal {
    pub fn should_stop(&self) -> bool {
        self.command == Some(ControlCommand::Stop) || self.status == ControlStatus::Stopping
    }

    pub fn should_pause(&self) -> bool {
        self.command == Some(ControlCommand::Pause) || self.status == ControlStatus::Paused
    }
}

/// Read the control signal, returning the default (`running`, no command)
/// when the file is missing, unreadable, or unparseable.
pub fn read_control(path: &Path) -> ControlSignal {
    if !path.exists() {
        return ControlSignal::default();
    }
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "control file unreadable, assuming running");
            return ControlSignal::default();
        }
    };
    match serde_json::from_str(&contents) {
        Ok(signal) => signal,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "control file unparseable, assuming running");
            ControlSignal::default()
        }
    }
}

/// Atomically write the control signal.
pub fn write_control(path: &Path, signal: &ControlSignal) -> Result<()> {
    let mut buf =
        serde_json::to_string_pretty(signal).context("serialize control signal")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Check for pause/stop requests. Returns `(should_pause, should_stop)`.
pub fn check_pause_or_stop(path: &Path) -> (bool, bool) {
    let signal = read_control(path);
    (signal.should_pause(), signal.should_stop())
}

/// Clear the one-shot command and acknowledge the driver as running.
pub fn consume_command(path: &Path) -> Result<()> {
    let mut signal = read_control(path);
    signal.command = None;
    signal.status = ControlStatus::Running;
    write_control(path, &signal)
}

/// Acknowledge driver exit: clear any command and mark the channel idle.
pub fn acknowledge_exit(path: &Path) -> Result<()> {
    let mut signal = read_control(path);
    signal.command = None;
    signal.status = ControlStatus::Idle;
    write_control(path, &signal)
}

/// Block until a resume or stop signal arrives, polling on a fixed
/// interval. Returns `true` to continue (the resume command is consumed),
/// `false` when the run should stop.
pub fn wait_for_resume(path: &Path, poll_interval: Duration) -> bool {
    info!("run paused, waiting for resume signal");
    loop {
        std::thread::sleep(poll_interval);
        let signal = read_control(path);

        if signal.should_stop() {
            return false;
        }

        if signal.command == Some(ControlCommand::Resume)
            || signal.status == ControlStatus::Running
        {
            info!("resume signal observed");
            if let Err(err) = consume_command(path) {
                warn!(error = %err, "failed to clear resume command");
            }
            return true;
        }
        debug!("still paused");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let signal = read_control(&temp.path().join("run_control.json"));
        assert_eq!(signal, ControlSignal::default());
        assert!(!signal.should_pause());
        assert!(!signal.should_stop());
    }

    #[test]
    fn corrupt_file_reads_as_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run_control.json");
        fs::write(&path, "{{{").expect("write");
        assert_eq!(read_control(&path), ControlSignal::default());
    }

    #[test]
    fn stop_detected_from_command_or_status() {
        let by_command = ControlSignal {
            command: Some(ControlCommand::Stop),
            ..ControlSignal::default()
        };
        assert!(by_command.should_stop());

        let by_status = ControlSignal {
            status: ControlStatus::Stopping,
            ..ControlSignal::default()
        };
        assert!(by_status.should_stop());
    }

    #[test]
    fn pause_detected_from_command_or_status() {
        let by_command = ControlSignal {
            command: Some(ControlCommand::Pause),
            ..ControlSignal::default()
        };
        assert!(by_command.should_pause());

        let by_status = ControlSignal {
            status: ControlStatus::Paused,
            command: None,
            run_id: None,
        };
        assert!(by_status.should_pause());
    }

    #[test]
    fn consume_resets_command_and_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run_control.json");
        write_control(
            &path,
            &ControlSignal {
                status: ControlStatus::Paused,
                command: Some(ControlCommand::Resume),
                run_id: Some("run-1".to_string()),
            },
        )
        .expect("write");

        consume_command(&path).expect("consume");
        let signal = read_control(&path);
        assert_eq!(signal.command, None);
        assert_eq!(signal.status, ControlStatus::Running);
        assert_eq!(signal.run_id.as_deref(), Some("run-1"));
    }

    #[test]
    fn wait_for_resume_returns_false_on_stop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run_control.json");
        write_control(
            &path,
            &ControlSignal {
                status: ControlStatus::Paused,
                command: None,
                run_id: None,
            },
        )
        .expect("write");

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            write_control(
                &writer_path,
                &ControlSignal {
                    status: ControlStatus::Stopping,
                    command: Some(ControlCommand::Stop),
                    run_id: None,
                },
            )
            .expect("write stop");
        });

        assert!(!wait_for_resume(&path, Duration::from_millis(10)));
        writer.join().expect("join");
    }

    #[test]
    fn wait_for_resume_consumes_resume_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run_control.json");
        write_control(
            &path,
            &ControlSignal {
                status: ControlStatus::Paused,
                command: None,
                run_id: None,
            },
        )
        .expect("write");

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            write_control(
                &writer_path,
                &ControlSignal {
                    status: ControlStatus::Paused,
                    command: Some(ControlCommand::Resume),
                    run_id: None,
                },
            )
            .expect("write resume");
        });

        assert!(wait_for_resume(&path, Duration::from_millis(10)));
        writer.join().expect("join");
        let signal = read_control(&path);
        assert_eq!(signal.command, None);
        assert_eq!(signal.status, ControlStatus::Running);
    }
}
