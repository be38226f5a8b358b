//! Per-cell seed file rendering.
//!
//! Before a cell's first stage runs, the driver writes a `seed.toml` into
//! the cell directory describing the behavior under test, the conversation
//! length, and the model assignments. The pipeline stages consume this
//! file; the harness never reads it back. The behavior definition text is
//! rendered from an embedded template so every cell carries the full
//! hierarchical context of its taxonomy entry.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::io::config::ModelsConfig;
use crate::io::taxonomy::{Behavior, behavior_name};

const DEFINITION_TEMPLATE: &str = include_str!("../../templates/behavior_definition.j2");

/// Seed document written to `<cell_dir>/seed.toml`.
#[derive(Debug, Clone, Serialize)]
pub struct SeedFile {
    pub behavior: SeedBehavior,
    pub understanding: SeedStage,
    pub ideation: SeedStage,
    pub rollout: SeedRollout,
    pub judgment: SeedStage,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeedBehavior {
    pub slug: String,
    pub definition: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeedStage {
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeedRollout {
    pub model: String,
    pub target: String,
    pub max_turns: u32,
}

/// Render the enriched behavior definition for a taxonomy entry.
pub fn render_definition(behavior: &Behavior) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("definition", DEFINITION_TEMPLATE)
        .context("compile definition template")?;
    let template = env.get_template("definition").context("load template")?;

    let name = behavior_name(&behavior.path);
    let rendered = template
        .render(context! {
            path_readable => behavior.path.replace('>', "→"),
            name => name,
            name_lower => name.to_lowercase(),
            definition => behavior.definition,
        })
        .with_context(|| format!("render definition for {}", behavior.slug))?;
    Ok(rendered)
}

/// Write the seed file for one cell. Returns the seed path.
pub fn write_seed(
    cell_dir: &Path,
    behavior: &Behavior,
    turn_count: u32,
    models: &ModelsConfig,
) -> Result<PathBuf> {
    let seed = SeedFile {
        behavior: SeedBehavior {
            slug: behavior.slug.clone(),
            definition: render_definition(behavior)?,
        },
        understanding: SeedStage {
            model: models.understanding.clone(),
        },
        ideation: SeedStage {
            model: models.ideation.clone(),
        },
        rollout: SeedRollout {
            model: models.rollout.clone(),
            target: models.target.clone(),
            max_turns: turn_count,
        },
        judgment: SeedStage {
            model: models.judgment.clone(),
        },
    };

    fs::create_dir_all(cell_dir)
        .with_context(|| format!("create cell dir {}", cell_dir.display()))?;
    let path = cell_dir.join("seed.toml");
    let mut buf = toml::to_string_pretty(&seed).context("serialize seed toml")?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write seed {}", path.display()))?;
    Ok(path)
}
