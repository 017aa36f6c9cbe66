//! Batch reconciliation of a whole roster.

use crate::submissions::context::RunContext;
use crate::submissions::ledger::{LedgerRow, Preserve, Status};
use crate::submissions::roster::{RepoRosterEntry, Roster, RosterFilter};
use crate::submissions::sync::{sync, SyncOutcome, SyncReference};
use crate::utils::interrupt::Interrupted;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

/// Rule line framing the report.
const RULE: &str = "========================================";

/// Repository ids grouped by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    /// Ids per status, in processing order.
    buckets: BTreeMap<Status, Vec<String>>,
    /// Roster rows that had no usable id.
    unusable: Vec<String>,
}

impl Report {
    /// Record the outcome of one repository.
    pub fn record(&mut self, status: Status, repo_id: &str) {
        self.buckets
            .entry(status)
            .or_default()
            .push(repo_id.to_owned());
    }

    /// Ids recorded with `status`.
    #[must_use]
    pub fn ids(&self, status: Status) -> &[String] {
        self.buckets
            .get(&status)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of repositories recorded with `status`.
    #[must_use]
    pub fn count(&self, status: Status) -> usize {
        self.ids(status).len()
    }

    /// Roster rows without a usable id.
    #[must_use]
    pub fn unusable(&self) -> &[String] {
        &self.unusable
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{RULE}")?;
        let sections = [
            ("NEW", self.ids(Status::New)),
            ("UPDATED", self.ids(Status::Updated)),
            ("UNCHANGED", self.ids(Status::Unchanged)),
            ("MISSING (or not cloned successfully)", self.ids(Status::Missing)),
            ("NO TAG", self.ids(Status::NoTag)),
            ("WITHOUT USABLE ID", self.unusable()),
        ];
        for (label, ids) in sections {
            writeln!(f, "{label}: {}", ids.len())?;
            for id in ids {
                writeln!(f, "\t{id}")?;
            }
        }
        write!(f, "{RULE}")
    }
}

/// Result of reconciling a roster: the report and the fresh ledger rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Outcomes grouped for display.
    pub report: Report,
    /// One ledger row per processed repository, in processing order.
    pub rows: Vec<LedgerRow>,
}

/// Which existing ledger rows a run keeps.
///
/// `--add-timestamps` keeps every row without a fresh one. A `--repos` or
/// `--ignore` filter keeps the rows of every id it rejects. Otherwise the run
/// replaces the ledger.
#[must_use]
pub fn preserve_for(filter: &RosterFilter, add_timestamps: bool) -> Preserve {
    if add_timestamps {
        Preserve::Untouched
    } else if filter.is_active() {
        Preserve::RejectedBy(filter.clone())
    } else {
        Preserve::Nothing
    }
}

/// Synchronize every roster entry with `reference` below `dest_root`.
///
/// Entries run in case-insensitive id order. A failure in one repository is
/// recorded as `missing` and the batch carries on.
///
/// # Errors
/// Errors with [`Interrupted`] when the run is interrupted. Nothing has been
/// written to the ledger at that point.
pub fn reconcile(
    ctx: &RunContext,
    roster: Roster,
    reference: &SyncReference,
    dest_root: &Path,
) -> anyhow::Result<Reconciliation> {
    let Roster {
        mut entries,
        unusable,
    } = roster;
    entries.sort_by_cached_key(|entry| entry.repo_id.to_lowercase());
    let mut seen = HashSet::new();
    entries.retain(|entry| {
        let first = seen.insert(entry.repo_id.to_lowercase());
        if !first {
            tracing::warn!(repo_id = %entry.repo_id, "Duplicate roster entry; skipping");
        }
        first
    });

    let mut reconciliation = Reconciliation {
        report: Report {
            unusable,
            ..Report::default()
        },
        rows: Vec::with_capacity(entries.len()),
    };
    let total = entries.len();
    tracing::info!(reference = %reference, "Reconciling {total} repositories");
    for (index, entry) in entries.iter().enumerate() {
        ctx.interrupt.check()?;
        let outcome = match sync(ctx, entry, reference, dest_root) {
            Ok(outcome) => outcome,
            Err(err) if err.is::<Interrupted>() => return Err(err),
            Err(err) => {
                tracing::error!(repo_id = %entry.repo_id, "Unexpected failure: {err:#}");
                SyncOutcome::Missing(format!("{err:#}"))
            }
        };
        log_outcome(entry, reference, &outcome);
        reconciliation
            .report
            .record(outcome.status(), &entry.repo_id);
        reconciliation
            .rows
            .push(ledger_row(ctx, entry, reference, &outcome));
        ctx.pace(index + 1, total);
    }
    Ok(reconciliation)
}

/// Ledger row for one outcome.
fn ledger_row(
    ctx: &RunContext,
    entry: &RepoRosterEntry,
    reference: &SyncReference,
    outcome: &SyncOutcome,
) -> LedgerRow {
    match outcome.commit() {
        Some(commit) => LedgerRow::resolved(
            ctx,
            &entry.repo_id,
            reference.name(),
            commit,
            outcome.status(),
        ),
        None => LedgerRow::absent(&entry.repo_id, reference.name(), outcome.status()),
    }
}

///
fn log_outcome(entry: &RepoRosterEntry, reference: &SyncReference, outcome: &SyncOutcome) {
    let repo_id = entry.repo_id.as_str();
    let reference = reference.name();
    match outcome {
        SyncOutcome::New(commit) => tracing::info!(
            repo_id,
            reference,
            commit = %commit.commit_id,
            "Cloned new submission"
        ),
        SyncOutcome::Updated(commit) => tracing::info!(
            repo_id,
            reference,
            commit = %commit.commit_id,
            "Submission updated"
        ),
        SyncOutcome::Unchanged(_) => tracing::info!(repo_id, reference, "No changes"),
        SyncOutcome::Missing(reason) => tracing::warn!(
            repo_id,
            reference,
            url = %entry.link(),
            "Missing: {reason}"
        ),
        SyncOutcome::NoTag => tracing::warn!(
            repo_id,
            reference,
            url = %entry.link(),
            "Reference not found; working copy removed"
        ),
    }
}
