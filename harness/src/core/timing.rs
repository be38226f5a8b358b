//! Stage timing windows and ETA estimation.
//!
//! Each pipeline stage keeps a bounded window of recent wall-clock
//! durations. Averages are computed over the retained window only, so the
//! estimate adapts to recent pipeline performance instead of a lifetime
//! mean. Stages with no samples fall back to fixed per-stage defaults.

use serde::{Deserialize, Serialize};

use crate::core::types::StageName;

/// Number of samples retained per stage; older samples are discarded.
pub const TIMING_WINDOW: usize = 20;

/// Per-stage duration windows, persisted inside the run state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimings {
    pub understanding: Vec<f64>,
    pub ideation: Vec<f64>,
    pub rollout: Vec<f64>,
    pub judgment: Vec<f64>,
}

/// Fallback estimate in seconds when a stage has no recorded samples.
pub fn default_estimate_secs(stage: StageName) -> f64 {
    match stage {
        StageName::Understanding => 30.0,
        StageName::Ideation => 60.0,
        StageName::Rollout => 120.0,
        StageName::Judgment => 90.0,
    }
}

impl StageTimings {
    pub fn samples(&self, stage: StageName) -> &[f64] {
        match stage {
            StageName::Understanding => &self.understanding,
            StageName::Ideation => &self.ideation,
            StageName::Rollout => &self.rollout,
            StageName::Judgment => &self.judgment,
        }
    }

    fn samples_mut(&mut self, stage: StageName) -> &mut Vec<f64> {
        match stage {
            StageName::Understanding => &mut self.understanding,
            StageName::Ideation => &mut self.ideation,
            StageName::Rollout => &mut self.rollout,
            StageName::Judgment => &mut self.judgment,
        }
    }

    /// Append a duration and truncate the window to the most recent
    /// [`TIMING_WINDOW`] samples.
    pub fn record(&mut self, stage: StageName, duration_secs: f64) {
        let samples = self.samples_mut(stage);
        samples.push(duration_secs);
        if samples.len() > TIMING_WINDOW {
            let excess = samples.len() - TIMING_WINDOW;
            samples.drain(..excess);
        }
    }

    /// Arithmetic mean of the retained window, or the per-stage default
    /// when no samples exist.
    pub fn average_for(&self, stage: StageName) -> f64 {
        let samples = self.samples(stage);
        if samples.is_empty() {
            return default_estimate_secs(stage);
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    /// Estimated seconds for one complete cell (all four stages).
    pub fn cell_average(&self) -> f64 {
        StageName::ALL
            .iter()
            .map(|&stage| self.average_for(stage))
            .sum()
    }

    /// Estimated seconds to finish `pending_cells` cells.
    ///
    /// When a stage is in flight, the in-flight cell is assumed to be one
    /// of the pending cells and only its remaining stages are counted
    /// (the in-flight stage itself is counted whole).
    pub fn estimate_remaining(&self, pending_cells: usize, in_flight: Option<StageName>) -> f64 {
        let mut eta = pending_cells as f64 * self.cell_average();
        if pending_cells > 0
            && let Some(stage) = in_flight
        {
            let already_done: f64 = stage
                .preceding()
                .iter()
                .map(|&done| self.average_for(done))
                .sum();
            eta -= already_done;
        }
        eta.max(0.0)
    }
}

/// Render an ETA in coarse human units: hours above an hour, minutes above
/// a minute, otherwise seconds.
pub fn format_eta(seconds: f64) -> String {
    if seconds > 3600.0 {
        format!("{:.1}h", seconds / 3600.0)
    } else if seconds > 60.0 {
        format!("{:.0}m", seconds / 60.0)
    } else {
        format!("{seconds:.0}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_uses_samples_when_present_and_default_otherwise() {
        let mut timings = StageTimings::default();
        timings.record(StageName::Understanding, 30.0);
        timings.record(StageName::Understanding, 30.0);
        timings.record(StageName::Ideation, 60.0);

        assert_eq!(timings.average_for(StageName::Understanding), 30.0);
        assert_eq!(timings.average_for(StageName::Ideation), 60.0);
        assert_eq!(timings.average_for(StageName::Rollout), 120.0);
        assert_eq!(timings.average_for(StageName::Judgment), 90.0);
    }

    #[test]
    fn window_keeps_most_recent_samples() {
        let mut timings = StageTimings::default();
        for sample in 0..(TIMING_WINDOW + 5) {
            timings.record(StageName::Rollout, sample as f64);
        }
        let samples = timings.samples(StageName::Rollout);
        assert_eq!(samples.len(), TIMING_WINDOW);
        assert_eq!(samples[0], 5.0);
        assert_eq!(*samples.last().expect("non-empty"), (TIMING_WINDOW + 4) as f64);
    }

    #[test]
    fn estimate_without_in_flight_cell_counts_whole_cells() {
        let mut timings = StageTimings::default();
        timings.record(StageName::Understanding, 30.0);
        timings.record(StageName::Understanding, 30.0);
        timings.record(StageName::Ideation, 60.0);

        // 30 + 60 + 120 (default) + 90 (default) = 300 per cell.
        assert_eq!(timings.estimate_remaining(3, None), 900.0);
    }

    #[test]
    fn estimate_subtracts_stages_already_done_for_in_flight_cell() {
        let mut timings = StageTimings::default();
        timings.record(StageName::Understanding, 30.0);
        timings.record(StageName::Ideation, 60.0);

        // Rollout in flight: understanding + ideation of that cell are done.
        let eta = timings.estimate_remaining(3, Some(StageName::Rollout));
        assert_eq!(eta, 900.0 - 90.0);
    }

    #[test]
    fn estimate_is_zero_when_nothing_pending() {
        let timings = StageTimings::default();
        assert_eq!(timings.estimate_remaining(0, Some(StageName::Judgment)), 0.0);
    }

    #[test]
    fn eta_formatting_picks_coarsest_unit() {
        assert_eq!(format_eta(45.0), "45s");
        assert_eq!(format_eta(600.0), "10m");
        assert_eq!(format_eta(5400.0), "1.5h");
    }
}
