//! The timestamp ledger: one row per repository with the state of its last
//! reconciliation.
//!
//! Storage sits behind [`LedgerStore`]. [`CsvLedger`] is the only
//! implementation; it keeps the ledger as a CSV file next to the working copies.

use crate::submissions::context::RunContext;
use crate::submissions::roster::RosterFilter;
use crate::utils::git::ResolvedCommit;
use crate::utils::paths::{free_backup_path, with_suffix};
use anyhow::Context;
use derive_more::Display;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Ledger columns, in file order.
pub const LEDGER_HEADER: [&str; 7] = [
    "repo_id",
    "submitted_at",
    "commit_id",
    "reference",
    "tagged_at",
    "commit_count",
    "status",
];

/// Outcome of reconciling one repository.
///
/// Ordered the way outcomes are listed in reports.
#[derive(
    Debug, Display, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Cloned for the first time.
    #[display(fmt = "new")]
    New,
    /// The reference now points at a commit with a different time.
    #[display(fmt = "updated")]
    Updated,
    /// Nothing changed since the previous run.
    #[default]
    #[display(fmt = "unchanged")]
    Unchanged,
    /// Couldn't be cloned or updated, or the reference disappeared upstream.
    #[display(fmt = "missing")]
    Missing,
    /// Cloned, but the reference doesn't exist.
    #[display(fmt = "no_tag")]
    NoTag,
}

/// One ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    /// Repository id, as written in the roster.
    pub repo_id: String,
    /// Commit time of the resolved reference, blank without a commit.
    #[serde(default)]
    pub submitted_at: String,
    /// Hex id of the resolved commit, blank without a commit.
    #[serde(default)]
    pub commit_id: String,
    /// Branch or tag the repository was reconciled against.
    #[serde(default)]
    pub reference: String,
    /// Tag creation time (commit time for lightweight tags and branches).
    #[serde(default)]
    pub tagged_at: String,
    /// Commits reachable from the resolved commit.
    #[serde(default)]
    pub commit_count: Option<usize>,
    /// Outcome of the run that wrote this row.
    #[serde(default)]
    pub status: Status,
}

impl LedgerRow {
    /// Row for a repository whose reference resolved to `commit`.
    #[must_use]
    pub fn resolved(
        ctx: &RunContext,
        repo_id: &str,
        reference: &str,
        commit: &ResolvedCommit,
        status: Status,
    ) -> Self {
        Self {
            repo_id: repo_id.to_owned(),
            submitted_at: ctx.format_time(commit.commit_time),
            commit_id: commit.commit_id.clone(),
            reference: reference.to_owned(),
            tagged_at: ctx.format_time(commit.tagged_time),
            commit_count: Some(commit.commit_count),
            status,
        }
    }

    /// Row for a repository without a resolved commit. Commit columns stay
    /// blank so stale data is never carried forward.
    #[must_use]
    pub fn absent(repo_id: &str, reference: &str, status: Status) -> Self {
        Self {
            repo_id: repo_id.to_owned(),
            submitted_at: String::new(),
            commit_id: String::new(),
            reference: reference.to_owned(),
            tagged_at: String::new(),
            commit_count: None,
            status,
        }
    }

    /// Case-insensitive identity of the row.
    #[must_use]
    pub fn key(&self) -> String {
        self.repo_id.to_lowercase()
    }
}

/// Which existing ledger rows survive a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preserve {
    /// The fresh rows replace the ledger.
    Nothing,
    /// Rows for ids the filter rejects are kept, so a `--repos` or
    /// `--ignore` run only replaces rows it could have reprocessed.
    RejectedBy(RosterFilter),
    /// Every row without a fresh replacement is kept.
    Untouched,
}

/// Merge `fresh` rows into `existing` ones.
///
/// The result has one row per case-insensitive id, sorted by lowercased id. A
/// fresh row always wins over an existing one.
#[must_use]
pub fn merge(existing: Vec<LedgerRow>, fresh: Vec<LedgerRow>, preserve: &Preserve) -> Vec<LedgerRow> {
    let mut merged: BTreeMap<String, LedgerRow> = BTreeMap::new();
    for row in existing {
        let key = row.key();
        let keep = match preserve {
            Preserve::Nothing => false,
            Preserve::RejectedBy(filter) => !filter.accepts(&key),
            Preserve::Untouched => true,
        };
        if keep {
            merged.insert(key, row);
        }
    }
    for row in fresh {
        merged.insert(row.key(), row);
    }
    merged.into_values().collect()
}

/// Persistence of ledger rows.
pub trait LedgerStore {
    /// Read every stored row. An absent ledger has no rows.
    ///
    /// # Errors
    /// Errors if the ledger exists but can't be read or parsed.
    fn load(&self) -> anyhow::Result<Vec<LedgerRow>>;

    /// Copy the current ledger aside, labelled with `stamp`.
    ///
    /// Returns where the copy went, or `None` when there was nothing to copy.
    ///
    /// # Errors
    /// Errors if the copy can't be written.
    fn backup(&self, stamp: &str) -> anyhow::Result<Option<PathBuf>>;

    /// Replace the stored rows with `rows`.
    ///
    /// # Errors
    /// Errors if the rows can't be written.
    fn write(&self, rows: &[LedgerRow]) -> anyhow::Result<()>;

    /// Back up the ledger, merge `fresh` into it and write the result.
    ///
    /// # Errors
    /// Errors if any of loading, backing up or writing fails. The ledger is
    /// left untouched when loading or backing up fails.
    fn save(
        &self,
        fresh: Vec<LedgerRow>,
        preserve: &Preserve,
        stamp: &str,
    ) -> anyhow::Result<Option<PathBuf>> {
        let existing = self.load()?;
        let backup = self.backup(stamp)?;
        if let Some(backup_path) = &backup {
            tracing::info!("Backed up ledger to {}", backup_path.display());
        }
        self.write(&merge(existing, fresh, preserve))?;
        Ok(backup)
    }
}

/// Ledger kept in a CSV file.
#[derive(Debug, Clone)]
pub struct CsvLedger {
    /// Path of the ledger file.
    path: PathBuf,
}

impl CsvLedger {
    /// Ledger stored at `path`.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_owned(),
        }
    }

    /// Path of the ledger file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for CsvLedger {
    fn load(&self) -> anyhow::Result<Vec<LedgerRow>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .with_context(|| format!("Could not read ledger {}", self.path.display()))?;
        let rows = reader
            .deserialize::<LedgerRow>()
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Could not parse ledger {}", self.path.display()))?;
        Ok(rows)
    }

    fn backup(&self, stamp: &str) -> anyhow::Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let backup_path = free_backup_path(&self.path, stamp);
        fs::copy(&self.path, &backup_path).with_context(|| {
            format!(
                "Could not back up ledger {} to {}",
                self.path.display(),
                backup_path.display()
            )
        })?;
        Ok(Some(backup_path))
    }

    fn write(&self, rows: &[LedgerRow]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = with_suffix(&self.path, ".tmp");
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_path(&tmp_path)
                .with_context(|| format!("Could not create {}", tmp_path.display()))?;
            writer.write_record(LEDGER_HEADER)?;
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!("Could not replace ledger {}", self.path.display())
        })?;
        Ok(())
    }
}
