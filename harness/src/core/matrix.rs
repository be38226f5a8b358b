//! Test matrix planning over the behavior × turn-count grid.
//!
//! The planner derives the full set of cells from configuration and, given
//! the completion ledger, computes the pending subset in a deterministic
//! order. Resuming a run therefore processes cells in the same relative
//! order, just skipping the ones already completed.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::types::BehaviorCell;

/// Completion ledger shape: behavior slug → turn counts completed for it.
pub type CompletedMap = BTreeMap<String, Vec<u32>>;

/// Planner over a fixed behavior list and turn-count list.
///
/// Both lists keep their configured order; the Cartesian product is emitted
/// behavior-first, then turn count.
#[derive(Debug, Clone)]
pub struct MatrixPlanner<'a> {
    behaviors: &'a [String],
    turn_counts: &'a [u32],
}

impl<'a> MatrixPlanner<'a> {
    pub fn new(behaviors: &'a [String], turn_counts: &'a [u32]) -> Self {
        Self {
            behaviors,
            turn_counts,
        }
    }

    /// Total number of cells in the matrix.
    pub fn total(&self) -> usize {
        self.behaviors.len() * self.turn_counts.len()
    }

    /// Cells not yet completed, in behavior-then-turn-count order.
    ///
    /// Failed cells are not excluded: a failure leaves the cell pending
    /// until a later attempt completes it.
    pub fn pending_cells(&self, completed: &CompletedMap) -> Vec<BehaviorCell> {
        let mut pending = Vec::new();
        for behavior in self.behaviors {
            for &turn_count in self.turn_counts {
                if !is_completed(completed, behavior, turn_count) {
                    pending.push(BehaviorCell::new(behavior.clone(), turn_count));
                }
            }
        }
        pending
    }

    /// True iff every configured turn count for `behavior` is completed.
    pub fn is_behavior_complete(&self, completed: &CompletedMap, behavior: &str) -> bool {
        let done = completed.get(behavior).map(Vec::as_slice).unwrap_or(&[]);
        self.turn_counts.iter().all(|tc| done.contains(tc))
    }

    /// Number of behaviors whose every turn count is completed.
    pub fn completed_behaviors(&self, completed: &CompletedMap) -> usize {
        self.behaviors
            .iter()
            .filter(|behavior| self.is_behavior_complete(completed, behavior))
            .count()
    }
}

/// True iff `(behavior, turn_count)` appears in the completion ledger.
pub fn is_completed(completed: &CompletedMap, behavior: &str, turn_count: u32) -> bool {
    completed
        .get(behavior)
        .is_some_and(|turns| turns.contains(&turn_count))
}

/// Total completed cells across all behaviors.
pub fn completed_count(completed: &CompletedMap) -> usize {
    completed.values().map(Vec::len).sum()
}

/// Overall progress counters derived from the completion ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSummary {
    pub completed: usize,
    pub total: usize,
    pub failed: usize,
    pub pending: usize,
    pub progress_pct: f64,
}

impl ProgressSummary {
    pub fn compute(completed: usize, total: usize, failed: usize) -> Self {
        let progress_pct = if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            completed,
            total,
            failed,
            pending: total.saturating_sub(completed),
            progress_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(entries: &[(&str, &[u32])]) -> CompletedMap {
        entries
            .iter()
            .map(|(behavior, turns)| (behavior.to_string(), turns.to_vec()))
            .collect()
    }

    fn slugs(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn pending_is_full_product_for_empty_state() {
        let behaviors = slugs(&["a", "b"]);
        let turns = [4, 5];
        let planner = MatrixPlanner::new(&behaviors, &turns);

        let pending = planner.pending_cells(&CompletedMap::new());
        let expected = vec![
            BehaviorCell::new("a", 4),
            BehaviorCell::new("a", 5),
            BehaviorCell::new("b", 4),
            BehaviorCell::new("b", 5),
        ];
        assert_eq!(pending, expected);
        assert_eq!(planner.total(), 4);
    }

    #[test]
    fn completed_cells_are_skipped_but_failed_cells_remain() {
        let behaviors = slugs(&["a", "b"]);
        let turns = [4, 5];
        let planner = MatrixPlanner::new(&behaviors, &turns);

        // (a,4) completed; (a,5) failed earlier, so it only exists outside
        // the completion ledger and must still be pending.
        let done = completed(&[("a", &[4])]);
        let pending = planner.pending_cells(&done);
        let expected = vec![
            BehaviorCell::new("a", 5),
            BehaviorCell::new("b", 4),
            BehaviorCell::new("b", 5),
        ];
        assert_eq!(pending, expected);
        assert!(!planner.is_behavior_complete(&done, "a"));
    }

    #[test]
    fn behavior_completion_is_order_independent() {
        let behaviors = slugs(&["a"]);
        let turns = [4, 5, 6];
        let planner = MatrixPlanner::new(&behaviors, &turns);

        let done = completed(&[("a", &[6, 4, 5])]);
        assert!(planner.is_behavior_complete(&done, "a"));
        assert_eq!(planner.completed_behaviors(&done), 1);
    }

    #[test]
    fn unknown_behavior_is_incomplete() {
        let behaviors = slugs(&["a"]);
        let turns = [4];
        let planner = MatrixPlanner::new(&behaviors, &turns);
        assert!(!planner.is_behavior_complete(&CompletedMap::new(), "a"));
    }

    #[test]
    fn summary_counts_and_percentage() {
        let summary = ProgressSummary::compute(3, 4, 1);
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.failed, 1);
        assert!((summary.progress_pct - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_handles_empty_matrix() {
        let summary = ProgressSummary::compute(0, 0, 0);
        assert_eq!(summary.progress_pct, 0.0);
        assert_eq!(summary.pending, 0);
    }

    #[test]
    fn completed_count_sums_all_behaviors() {
        let done = completed(&[("a", &[4, 5]), ("b", &[4])]);
        assert_eq!(completed_count(&done), 3);
    }
}
