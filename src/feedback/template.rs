//! Feedback policies described by a TOML file.
//!
//! ```toml
//! name = "project-1"
//! key_column = "REPO_ID"
//! notes_prefix = "NOTE-"
//! template = """
//! Hi @{GHU}, your final mark is **{MARKS-F}**.
//!
//! Notes: {NOTES}
//! """
//! footer = "This concludes the assessment."
//!
//! [[skip]]
//! column = "COMMIT"
//! when = "empty"
//! message = "Dear @{REPO_ID}: no submission tag found, so nothing to mark."
//!
//! [[skip]]
//! column = "CERTIFICATION"
//! when = "not_equal"
//! value = "yes"
//! message = "Dear @{REPO_ID}: no certification found."
//! ```
//!
//! `{COLUMN}` is replaced by the row's value for `COLUMN`; `{{` and `}}` are
//! literal braces.

use crate::feedback::{MarkingRow, SkipDecision, SubmissionPolicy};
use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use serde_derive::Deserialize;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};

/// Placeholder holding the joined note columns when `notes_prefix` is set.
pub const NOTES_PLACEHOLDER: &str = "NOTES";

/// Separator between the feedback body and the footer.
const FOOTER_SEPARATOR: &str = "\n\n-------------------------\n";

/// When a skip rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipWhen {
    /// The column is absent or blank.
    Empty,
    /// The column has a value.
    Nonempty,
    /// The column differs from `value`, ignoring case.
    NotEqual,
}

/// One `[[skip]]` rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkipRule {
    /// Column inspected.
    pub column: String,
    /// Condition on the column.
    pub when: SkipWhen,
    /// Value compared against by `not_equal`.
    #[serde(default)]
    pub value: String,
    /// Message left instead of the feedback; may use placeholders.
    #[serde(default)]
    pub message: Option<String>,
}

impl SkipRule {
    /// Whether the rule applies to `row`.
    #[must_use]
    pub fn matches(&self, row: &MarkingRow) -> bool {
        let cell = row.get(&self.column).unwrap_or_default();
        match self.when {
            SkipWhen::Empty => cell.is_empty(),
            SkipWhen::Nonempty => !cell.is_empty(),
            SkipWhen::NotEqual => !cell.eq_ignore_ascii_case(self.value.trim()),
        }
    }
}

/// Layout of a policy file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    name: Option<String>,
    key_column: Option<String>,
    notes_prefix: Option<String>,
    template: Option<String>,
    template_file: Option<PathBuf>,
    footer: Option<String>,
    #[serde(default)]
    skip: Vec<SkipRule>,
}

/// Policy rendering a template over the marking row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePolicy {
    /// Name used in logs.
    name: String,
    /// Column identifying the repository.
    key_column: Option<String>,
    /// Columns starting with this prefix are joined into `{NOTES}`.
    notes_prefix: Option<String>,
    /// Feedback body.
    template: String,
    /// Text appended after a separator.
    footer: Option<String>,
    /// Skip rules, first match wins.
    skip: Vec<SkipRule>,
}

impl TemplatePolicy {
    /// Load a policy file. `template_file` is relative to the policy file.
    ///
    /// # Errors
    /// Errors if a file can't be read, the TOML is invalid, or the policy has
    /// no template or two of them.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = read_to_string(path)
            .with_context(|| format!("Could not read policy file {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let default_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_toml(&text, base_dir, &default_name)
            .with_context(|| format!("Invalid policy file {}", path.display()))
    }

    /// Parse a policy from TOML text.
    ///
    /// # Errors
    /// Errors if the TOML is invalid or the policy has no template or two of
    /// them.
    pub fn from_toml(text: &str, base_dir: &Path, default_name: &str) -> anyhow::Result<Self> {
        let file: PolicyFile = toml::from_str(text)?;
        let template = match (file.template, file.template_file) {
            (Some(template), None) => template,
            (None, Some(template_file)) => {
                let template_path = base_dir.join(template_file);
                read_to_string(&template_path).with_context(|| {
                    format!("Could not read template {}", template_path.display())
                })?
            }
            (Some(_), Some(_)) => anyhow::bail!("Set only one of `template` and `template_file`"),
            (None, None) => anyhow::bail!("One of `template` or `template_file` is required"),
        };
        Ok(Self {
            name: file.name.unwrap_or_else(|| default_name.to_owned()),
            key_column: file.key_column,
            notes_prefix: file.notes_prefix,
            template,
            footer: file.footer,
            skip: file.skip,
        })
    }

    /// `row` plus the `{NOTES}` column when a notes prefix is configured.
    fn with_notes(&self, row: &MarkingRow) -> MarkingRow {
        let mut row = row.clone();
        if let Some(prefix) = &self.notes_prefix {
            let notes: Vec<&str> = row
                .iter()
                .filter(|(column, value)| column.starts_with(prefix.as_str()) && !value.is_empty())
                .map(|(_, value)| value)
                .collect();
            let notes = notes.join(". ");
            row.insert_missing(NOTES_PLACEHOLDER, notes);
        }
        row
    }
}

impl SubmissionPolicy for TemplatePolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_column(&self) -> Option<&str> {
        self.key_column.as_deref()
    }

    fn render_feedback(&self, row: &MarkingRow) -> anyhow::Result<String> {
        let row = self.with_notes(row);
        let mut feedback = render_template(&self.template, &row)?;
        if let Some(footer) = &self.footer {
            feedback.push_str(FOOTER_SEPARATOR);
            feedback.push_str(&render_template(footer, &row)?);
        }
        Ok(feedback)
    }

    fn should_skip(&self, row: &MarkingRow) -> SkipDecision {
        let Some(rule) = self.skip.iter().find(|rule| rule.matches(row)) else {
            return SkipDecision::proceed();
        };
        let message = rule.message.as_ref().map(|message| {
            render_template(message, &self.with_notes(row)).unwrap_or_else(|err| {
                tracing::warn!(policy = %self.name, "Skip message left unrendered: {err:#}");
                message.clone()
            })
        });
        SkipDecision::skip(message)
    }
}

/// Replace `{COLUMN}` placeholders in `template` with values from `row`.
///
/// # Errors
/// Errors on a placeholder naming a column the row doesn't have.
pub fn render_template(template: &str, row: &MarkingRow) -> anyhow::Result<String> {
    lazy_static! {
        static ref PLACEHOLDER: Regex =
            Regex::new(r"\{\{|\}\}|\{([^{}]*)\}").expect("Failed to compile regex!?!");
    }
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        rendered.push_str(&template[last..whole.start()]);
        match (whole.as_str(), caps.get(1)) {
            ("{{", _) => rendered.push('{'),
            ("}}", _) => rendered.push('}'),
            (_, Some(column)) => {
                let column = column.as_str().trim();
                let value = row
                    .get(column)
                    .with_context(|| format!("Unknown column `{column}` in template"))?;
                rendered.push_str(value);
            }
            (other, None) => rendered.push_str(other),
        }
        last = whole.end();
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}
