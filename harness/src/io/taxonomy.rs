//! Behavior taxonomy loading.
//!
//! The taxonomy is a CSV export with a hierarchical `Comments` column
//! (`Category > Subcategory > Behavior`) and an optional `Definition`
//! column. Each row becomes a [`Behavior`] identified by a stable slug
//! derived from the last path segment.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;

/// One taxonomy entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Behavior {
    /// Full hierarchical path, `>`-separated.
    pub path: String,
    /// Stable slug derived from the last path segment.
    pub slug: String,
    /// Raw definition text from the taxonomy (may be empty).
    pub definition: String,
}

/// Derive a slug from a behavior name: lowercase, runs of
/// non-alphanumerics collapsed to a single dash, leading/trailing dashes
/// trimmed.
pub fn slugify(name: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));
    re.replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Last segment of a `>`-separated taxonomy path.
pub fn behavior_name(path: &str) -> &str {
    path.rsplit('>').next().unwrap_or(path).trim()
}

/// Load behaviors from the taxonomy CSV, preserving row order.
///
/// Rows with an empty `Comments` path are skipped.
pub fn load_taxonomy(path: &Path) -> Result<Vec<Behavior>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read taxonomy {}", path.display()))?;
    parse_taxonomy(&contents).with_context(|| format!("parse taxonomy {}", path.display()))
}

fn parse_taxonomy(contents: &str) -> Result<Vec<Behavior>> {
    let rows = parse_csv(contents)?;
    let mut rows = rows.into_iter();
    let header = rows.next().ok_or_else(|| anyhow!("taxonomy is empty"))?;

    let comments_col = column_index(&header, "Comments")
        .ok_or_else(|| anyhow!("taxonomy missing 'Comments' column"))?;
    let definition_col = column_index(&header, "Definition");

    let mut behaviors = Vec::new();
    for row in rows {
        let path = row.get(comments_col).map(String::as_str).unwrap_or("").trim();
        if path.is_empty() {
            continue;
        }
        let definition = definition_col
            .and_then(|col| row.get(col))
            .map(|text| text.trim().to_string())
            .unwrap_or_default();
        let slug = slugify(behavior_name(path));
        if slug.is_empty() {
            bail!("taxonomy row {:?} yields an empty slug", path);
        }
        behaviors.push(Behavior {
            path: path.to_string(),
            slug,
            definition,
        });
    }
    Ok(behaviors)
}

fn column_index(header: &[String], name: &str) -> Option<usize> {
    header.iter().position(|col| col.trim() == name)
}

/// Apply selection filtering: keep `selected` slugs (empty = all), then
/// limit to the first `max_behaviors`. Duplicate slugs in the result are a
/// configuration error.
pub fn select_behaviors(
    behaviors: Vec<Behavior>,
    selected: &[String],
    max_behaviors: Option<usize>,
) -> Result<Vec<Behavior>> {
    let mut result: Vec<Behavior> = if selected.is_empty() {
        behaviors
    } else {
        behaviors
            .into_iter()
            .filter(|behavior| selected.iter().any(|slug| slug == &behavior.slug))
            .collect()
    };

    if let Some(max) = max_behaviors {
        result.truncate(max);
    }

    if result.is_empty() {
        bail!("behavior selection is empty");
    }

    let mut slugs: Vec<&str> = result.iter().map(|behavior| behavior.slug.as_str()).collect();
    slugs.sort_unstable();
    for pair in slugs.windows(2) {
        if pair[0] == pair[1] {
            bail!("duplicate behavior slug {}", pair[0]);
        }
    }

    Ok(result)
}

/// Minimal RFC 4180-style CSV parsing: quoted fields, doubled-quote
/// escapes, CRLF or LF row separators. Quoted fields may span lines.
fn parse_csv(contents: &str) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = contents.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' => in_quotes = true,
            ',' => {
                row.push(std::mem::take(&mut field));
            }
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(ch),
        }
    }
    if in_quotes {
        bail!("unterminated quoted field");
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_non_alphanumeric_runs() {
        assert_eq!(slugify("Acute Crisis"), "acute-crisis");
        assert_eq!(slugify("Self-harm / Ideation"), "self-harm-ideation");
        assert_eq!(slugify("  Emotional_Breakdown  "), "emotional-breakdown");
    }

    #[test]
    fn behavior_name_takes_last_path_segment() {
        assert_eq!(
            behavior_name("Distress > Self-harm > Acute Crisis"),
            "Acute Crisis"
        );
        assert_eq!(behavior_name("Standalone"), "Standalone");
    }

    #[test]
    fn parses_taxonomy_rows_with_quoted_definitions() {
        let csv = "\
Comments,Definition
Distress > Acute Shock,\"Sudden, overwhelming distress\"
Distress > Emotional Breakdown,
,ignored row without a path
";
        let behaviors = parse_taxonomy(csv).expect("parse");
        assert_eq!(behaviors.len(), 2);
        assert_eq!(behaviors[0].slug, "acute-shock");
        assert_eq!(behaviors[0].definition, "Sudden, overwhelming distress");
        assert_eq!(behaviors[1].slug, "emotional-breakdown");
        assert_eq!(behaviors[1].definition, "");
    }

    #[test]
    fn quoted_fields_may_contain_newlines_and_escaped_quotes() {
        let rows = parse_csv("a,\"line one\nline \"\"two\"\"\",c\n").expect("parse");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], "line one\nline \"two\"");
    }

    #[test]
    fn missing_comments_column_is_an_error() {
        let err = parse_taxonomy("Name,Definition\nfoo,bar\n").unwrap_err();
        assert!(err.to_string().contains("Comments"));
    }

    #[test]
    fn selection_filters_and_limits_in_order() {
        let behaviors = vec![
            Behavior {
                path: "a".to_string(),
                slug: "a".to_string(),
                definition: String::new(),
            },
            Behavior {
                path: "b".to_string(),
                slug: "b".to_string(),
                definition: String::new(),
            },
            Behavior {
                path: "c".to_string(),
                slug: "c".to_string(),
                definition: String::new(),
            },
        ];

        let selected = select_behaviors(
            behaviors.clone(),
            &["c".to_string(), "a".to_string()],
            None,
        )
        .expect("select");
        let slugs: Vec<&str> = selected.iter().map(|b| b.slug.as_str()).collect();
        assert_eq!(slugs, vec!["a", "c"]);

        let limited = select_behaviors(behaviors, &[], Some(2)).expect("limit");
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn empty_selection_is_an_error() {
        let err = select_behaviors(Vec::new(), &[], None).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn duplicate_slugs_are_rejected() {
        let behaviors = vec![
            Behavior {
                path: "X > Panic".to_string(),
                slug: "panic".to_string(),
                definition: String::new(),
            },
            Behavior {
                path: "Y > Panic".to_string(),
                slug: "panic".to_string(),
                definition: String::new(),
            },
        ];
        let err = select_behaviors(behaviors, &[], None).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
