//! Shared deterministic types for harness core logic.
//!
//! These types define stable contracts between core components. They should
//! not depend on external state or I/O and must remain deterministic across
//! runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the four ordered pipeline stages that make up a cell.
///
/// The declaration order is the execution order: judgment depends on
/// rollout's transcripts, rollout on ideation's scenarios, and so on. The
/// derived `Ord` follows declaration order, which keeps serialized maps
/// keyed by stage in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Understanding,
    Ideation,
    Rollout,
    Judgment,
}

impl StageName {
    /// All stages in execution order.
    pub const ALL: [StageName; 4] = [
        StageName::Understanding,
        StageName::Ideation,
        StageName::Rollout,
        StageName::Judgment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Understanding => "understanding",
            StageName::Ideation => "ideation",
            StageName::Rollout => "rollout",
            StageName::Judgment => "judgment",
        }
    }

    /// Zero-based position in the execution order.
    pub fn index(self) -> usize {
        match self {
            StageName::Understanding => 0,
            StageName::Ideation => 1,
            StageName::Rollout => 2,
            StageName::Judgment => 3,
        }
    }

    /// Stages that come before this one in the execution order.
    pub fn preceding(self) -> &'static [StageName] {
        &Self::ALL[..self.index()]
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one unit of evaluation work: a behavior evaluated at a
/// specific conversation length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorCell {
    /// Stable slug identifying the behavior in the taxonomy.
    pub behavior: String,
    /// Number of conversational exchanges to simulate.
    pub turn_count: u32,
}

impl BehaviorCell {
    pub fn new(behavior: impl Into<String>, turn_count: u32) -> Self {
        Self {
            behavior: behavior.into(),
            turn_count,
        }
    }
}

impl fmt::Display for BehaviorCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} turns)", self.behavior, self.turn_count)
    }
}
