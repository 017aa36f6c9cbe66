//! Feedback rendering from marking spreadsheets.
//!
//! A [`SubmissionPolicy`] decides, for every row of a marking CSV, whether the
//! submission gets feedback and what that feedback says. Policies are either
//! built in (see [`ledger::LedgerSummaryPolicy`]) or read from a TOML file (see
//! [`template::TemplatePolicy`]).

pub mod ledger;
pub mod template;

use crate::submissions::roster::RosterFilter;
use crate::utils::paths::file_name_for_key;
use anyhow::Context;
use std::fmt;
use std::fs;
use std::path::Path;

/// Column holding the repository id when neither the policy nor the command
/// line names one.
pub const DEFAULT_KEY_COLUMN: &str = "REPO_ID";

/// One row of a marking CSV: column names and values in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkingRow {
    /// `(column, value)` pairs.
    columns: Vec<(String, String)>,
}

impl MarkingRow {
    /// Build a row from `(column, value)` pairs.
    #[must_use]
    pub fn new<K: Into<String>, V: Into<String>>(columns: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|(column, value)| (column.into(), value.into()))
                .collect(),
        }
    }

    /// Value of `column`. An exact name match wins over a case-insensitive one.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .or_else(|| {
                self.columns
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(column))
            })
            .map(|(_, value)| value.as_str())
    }

    /// Iterate over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(|(column, value)| (column.as_str(), value.as_str()))
    }

    /// Add `column`, unless the row already has it.
    pub fn insert_missing(&mut self, column: &str, value: String) {
        if self.get(column).is_none() {
            self.columns.push((column.to_owned(), value));
        }
    }
}

/// Whether a row is skipped, and what to tell the student if so.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipDecision {
    /// Message written instead of the feedback.
    pub message: Option<String>,
    /// Whether the feedback is skipped.
    pub skip: bool,
}

impl SkipDecision {
    /// Render feedback for the row.
    #[must_use]
    pub const fn proceed() -> Self {
        Self {
            message: None,
            skip: false,
        }
    }

    /// Skip the row, optionally leaving `message` instead.
    #[must_use]
    pub const fn skip(message: Option<String>) -> Self {
        Self {
            message,
            skip: true,
        }
    }
}

/// Capability deciding and rendering feedback for one marking row.
pub trait SubmissionPolicy {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Column identifying the repository, when the policy expects a specific one.
    fn key_column(&self) -> Option<&str> {
        None
    }

    /// Render the feedback for `row`.
    ///
    /// # Errors
    /// Errors if the row lacks data the feedback needs.
    fn render_feedback(&self, row: &MarkingRow) -> anyhow::Result<String>;

    /// Decide whether `row` is skipped.
    fn should_skip(&self, row: &MarkingRow) -> SkipDecision;
}

/// Select a policy: the name of a built-in policy or the path of a TOML policy
/// file.
///
/// # Errors
/// Errors if the policy file can't be read or is invalid.
pub fn load_policy(name_or_path: &str) -> anyhow::Result<Box<dyn SubmissionPolicy>> {
    if name_or_path == ledger::LedgerSummaryPolicy::NAME {
        return Ok(Box::new(ledger::LedgerSummaryPolicy));
    }
    Ok(Box::new(template::TemplatePolicy::load(Path::new(
        name_or_path,
    ))?))
}

/// Read every row of a marking CSV.
///
/// # Errors
/// Errors if the file can't be read or isn't valid CSV.
pub fn load_rows(path: &Path) -> anyhow::Result<Vec<MarkingRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Could not read marking file {}", path.display()))?;
    let headers = reader.headers()?.clone();
    reader
        .records()
        .map(|record| -> anyhow::Result<MarkingRow> {
            let record = record
                .with_context(|| format!("Could not parse marking file {}", path.display()))?;
            Ok(MarkingRow::new(headers.iter().zip(record.iter())))
        })
        .collect()
}

/// Counts of a feedback run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackReport {
    /// Keys with rendered feedback.
    pub rendered: Vec<String>,
    /// Keys skipped by the policy.
    pub skipped: Vec<String>,
    /// Keys (or row numbers) whose feedback couldn't be rendered.
    pub failed: Vec<String>,
}

impl fmt::Display for FeedbackReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "RENDERED: {}", self.rendered.len())?;
        writeln!(f, "SKIPPED: {}", self.skipped.len())?;
        for key in &self.skipped {
            writeln!(f, "\t{key}")?;
        }
        write!(f, "FAILED: {}", self.failed.len())?;
        for key in &self.failed {
            write!(f, "\n\t{key}")?;
        }
        Ok(())
    }
}

/// Render feedback for every row accepted by `filter` into `<out_dir>/<key>.md`.
///
/// A skipped row leaves its skip message, or no file when there is none. A row
/// that fails to render is logged and counted, and the batch carries on.
///
/// # Errors
/// Errors if the output folder or a feedback file can't be written.
pub fn render_all(
    policy: &dyn SubmissionPolicy,
    rows: &[MarkingRow],
    key_column: &str,
    filter: &RosterFilter,
    out_dir: &Path,
) -> anyhow::Result<FeedbackReport> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Could not create {}", out_dir.display()))?;
    let mut report = FeedbackReport::default();
    for (position, row) in (1_usize..).zip(rows) {
        let Some(key) = row.get(key_column).filter(|key| !key.is_empty()) else {
            tracing::warn!(row = position, "No `{key_column}` value; skipping row");
            report.failed.push(format!("row {position}"));
            continue;
        };
        if !filter.accepts(key) {
            continue;
        }
        let decision = policy.should_skip(row);
        let text = if decision.skip {
            tracing::warn!(key, policy = policy.name(), "Feedback skipped");
            report.skipped.push(key.to_owned());
            match decision.message {
                Some(message) => message,
                None => continue,
            }
        } else {
            match policy.render_feedback(row) {
                Ok(text) => {
                    report.rendered.push(key.to_owned());
                    text
                }
                Err(err) => {
                    tracing::error!(key, policy = policy.name(), "Could not render feedback: {err:#}");
                    report.failed.push(key.to_owned());
                    continue;
                }
            }
        };
        let out_path = out_dir.join(file_name_for_key(key, "md"));
        fs::write(&out_path, text)
            .with_context(|| format!("Could not write {}", out_path.display()))?;
        tracing::debug!(key, "Wrote {}", out_path.display());
    }
    Ok(report)
}
