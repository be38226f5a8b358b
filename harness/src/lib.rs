//! Resumable evaluation harness for distress-behavior probing.
//!
//! This crate drives a four-stage evaluation pipeline (understanding →
//! ideation → rollout → judgment) over a matrix of (behavior, turn-count)
//! cells, persisting progress after every mutation so an interrupted run can
//! be resumed from where it left off. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (matrix planning, timing/ETA
//!   math). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (state persistence, control
//!   signals, taxonomy loading, pipeline subprocess execution). Isolated to
//!   enable mocking in tests.
//!
//! Orchestration modules ([`driver`], [`validate`]) coordinate core logic
//! with I/O to implement CLI commands.

pub mod core;
pub mod driver;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
