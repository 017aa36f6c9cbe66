//! Built-in policy summarizing a timestamp ledger row.

use crate::feedback::template::render_template;
use crate::feedback::{MarkingRow, SkipDecision, SubmissionPolicy};
use crate::submissions::ledger::Status;

/// Summary table rendered for every ledger row with a commit.
const SUMMARY: &str = "## Submission summary for {repo_id}

|                        |                  |
|:-----------------------|-----------------:|
|**Reference:**          | {reference}      |
|**Commit:**             | {commit_id}      |
|**Submitted at:**       | {submitted_at}   |
|**Tagged at:**          | {tagged_at}      |
|**Number of commits:**  | {commit_count}   |
|**Status:**             | {status}         |
";

/// Renders the timestamp ledger as feedback, one summary per repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSummaryPolicy;

impl LedgerSummaryPolicy {
    /// Name selecting this policy on the command line.
    pub const NAME: &'static str = "ledger";
}

impl SubmissionPolicy for LedgerSummaryPolicy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn key_column(&self) -> Option<&str> {
        Some("repo_id")
    }

    fn render_feedback(&self, row: &MarkingRow) -> anyhow::Result<String> {
        render_template(SUMMARY, row)
    }

    fn should_skip(&self, row: &MarkingRow) -> SkipDecision {
        let status = row.get("status").unwrap_or_default();
        let absent = [Status::Missing, Status::NoTag]
            .iter()
            .any(|status_absent| status_absent.to_string() == status);
        if !absent {
            return SkipDecision::proceed();
        }
        let repo_id = row.get("repo_id").unwrap_or_default();
        let reference = row.get("reference").unwrap_or_default();
        SkipDecision::skip(Some(format!(
            "Dear @{repo_id}: no submission found for `{reference}`, so there is nothing to mark."
        )))
    }
}
