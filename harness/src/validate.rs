//! State file validation: schema conformance plus semantic invariants.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;

use crate::core::timing::TIMING_WINDOW;
use crate::io::run_state::RunState;

const STATE_SCHEMA: &str = include_str!("../schemas/run_state.schema.json");

/// Validate the persisted state file at `path`.
///
/// Returns the parsed [`RunState`] on success, or an error describing
/// schema or invariant violations.
pub fn validate_state_file(path: &Path) -> Result<RunState> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    validate_state(&raw)
}

/// Parse and validate raw state JSON: schema conformance + invariants.
pub fn validate_state(raw: &str) -> Result<RunState> {
    let instance: Value = serde_json::from_str(raw).context("parse state json")?;
    let schema: Value = serde_json::from_str(STATE_SCHEMA).context("parse state schema")?;
    validate_schema(&instance, &schema)?;
    let state: RunState = serde_json::from_str(raw).context("parse state as struct")?;
    let errors = validate_invariants(&state);
    if !errors.is_empty() {
        bail!("invariant violations:\n- {}", errors.join("\n- "));
    }
    Ok(state)
}

/// Validate JSON instance against a JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

/// Semantic invariants the schema cannot express.
pub fn validate_invariants(state: &RunState) -> Vec<String> {
    let mut errors = Vec::new();

    let mut seen = state.turn_counts.clone();
    seen.sort_unstable();
    seen.dedup();
    if seen.len() != state.turn_counts.len() {
        errors.push("turn_counts must not contain duplicates".to_string());
    }

    for (behavior, turns) in &state.completed {
        if !turns.windows(2).all(|pair| pair[0] < pair[1]) {
            errors.push(format!(
                "completed[{behavior}] must be sorted without duplicates"
            ));
        }
        if !state.turn_counts.is_empty() {
            for turn in turns {
                if !state.turn_counts.contains(turn) {
                    errors.push(format!(
                        "completed[{behavior}] contains unconfigured turn count {turn}"
                    ));
                }
            }
        }
    }

    for record in &state.failed {
        if record.error.trim().is_empty() {
            errors.push(format!(
                "failed record for {} ({} turns) has an empty error",
                record.behavior, record.turn_count
            ));
        }
    }

    for (stage, samples) in [
        ("understanding", &state.stage_timings.understanding),
        ("ideation", &state.stage_timings.ideation),
        ("rollout", &state.stage_timings.rollout),
        ("judgment", &state.stage_timings.judgment),
    ] {
        if samples.len() > TIMING_WINDOW {
            errors.push(format!(
                "stage_timings.{stage} exceeds the {TIMING_WINDOW}-sample window"
            ));
        }
    }

    errors
}
