//! The roster: the CSV file listing the repositories to process.
//!
//! Column names follow either the lowercase form (`repo_id`, `git_url`,
//! `http_url`, `no`) or the uppercase form used by the course spreadsheets
//! (`REPO_ID`, `REPO_URL`, `REPO_HTTP`, `NO`). Other columns are ignored.

use crate::utils::paths::is_safe_repo_id;
use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use serde_derive::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// One repository listed in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoRosterEntry {
    /// Unique, case-insensitive key. Also the working copy directory name.
    #[serde(alias = "REPO_ID", default)]
    pub repo_id: String,
    /// Clone URL (SSH or HTTPS).
    #[serde(alias = "REPO_URL", default)]
    pub git_url: String,
    /// Browsable URL; derived from `git_url` when the roster doesn't give one.
    #[serde(alias = "REPO_HTTP", default)]
    pub http_url: Option<String>,
    /// Ordinal; the 1-based row position when the roster doesn't give one.
    #[serde(alias = "NO", default)]
    pub no: Option<u32>,
}

impl RepoRosterEntry {
    /// Build an entry from an id and clone URL.
    #[must_use]
    pub fn new(repo_id: &str, git_url: &str) -> Self {
        Self {
            repo_id: repo_id.to_owned(),
            git_url: git_url.to_owned(),
            http_url: derive_http_url(git_url),
            no: None,
        }
    }

    /// Link to show in logs: the browsable URL if known, else the clone URL.
    #[must_use]
    pub fn link(&self) -> &str {
        self.http_url.as_deref().unwrap_or(&self.git_url)
    }
}

/// Roster rows split into usable entries and rows that can't be processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    /// Entries with a usable id.
    pub entries: Vec<RepoRosterEntry>,
    /// Rows with an empty or unsafe id, described by row number and URL.
    pub unusable: Vec<String>,
}

impl Roster {
    /// Load a roster CSV.
    ///
    /// # Errors
    /// Errors if the file can't be read or a row can't be parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Could not read roster {}", path.display()))?;
        Self::from_reader(reader)
            .with_context(|| format!("Could not parse roster {}", path.display()))
    }

    /// Parse roster rows from any CSV reader.
    ///
    /// # Errors
    /// Errors if a row can't be parsed.
    pub fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> anyhow::Result<Self> {
        let mut roster = Self::default();
        for (position, record) in (1_u32..).zip(reader.deserialize::<RepoRosterEntry>()) {
            let mut entry = record?;
            if entry.no.is_none() {
                entry.no = Some(position);
            }
            if entry.http_url.is_none() {
                entry.http_url = derive_http_url(&entry.git_url);
            }
            if is_safe_repo_id(&entry.repo_id) {
                roster.entries.push(entry);
            } else {
                tracing::warn!(
                    row = position,
                    url = %entry.git_url,
                    "Roster row has no usable repo id `{}`; skipping",
                    entry.repo_id
                );
                roster
                    .unusable
                    .push(format!("row {position} ({})", entry.link()));
            }
        }
        Ok(roster)
    }

    /// Keep only the entries accepted by `filter`.
    #[must_use]
    pub fn select(mut self, filter: &RosterFilter) -> Self {
        self.entries.retain(|entry| filter.accepts(&entry.repo_id));
        self
    }
}

/// Case-insensitive selection of roster entries by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterFilter {
    /// If set, only these ids are processed.
    only: Option<HashSet<String>>,
    /// Ids never processed.
    ignore: HashSet<String>,
}

impl RosterFilter {
    /// Build a filter from `--repos` and `--ignore` style id lists.
    #[must_use]
    pub fn new(only: Option<&[String]>, ignore: &[String]) -> Self {
        Self {
            only: only.map(lowercase_set),
            ignore: lowercase_set(ignore),
        }
    }

    /// Whether `repo_id` is processed.
    #[must_use]
    pub fn accepts(&self, repo_id: &str) -> bool {
        let key = repo_id.to_lowercase();
        !self.ignore.contains(&key)
            && self.only.as_ref().map_or(true, |only| only.contains(&key))
    }

    /// Whether the filter rejects any id at all.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.only.is_some() || !self.ignore.is_empty()
    }
}

/// Lowercase a list of ids into a set.
fn lowercase_set(ids: &[String]) -> HashSet<String> {
    ids.iter().map(|id| id.trim().to_lowercase()).collect()
}

/// Derive a browsable `https://` URL from a clone URL.
///
/// `git@github.com:org/name.git` and `ssh://git@github.com/org/name.git` become
/// `https://github.com/org/name`; HTTPS URLs lose their `.git` suffix. Other
/// URLs (local paths, `file://`) have no browsable form.
#[must_use]
pub fn derive_http_url(git_url: &str) -> Option<String> {
    lazy_static! {
        static ref SCP_LIKE: Regex =
            Regex::new(r"^[\w.-]+@([\w.-]+):/?(.+?)(?:\.git)?/?$").expect("Failed to compile regex!?!");
        static ref SSH: Regex =
            Regex::new(r"^ssh://(?:[\w.-]+@)?([\w.-]+)(?::\d+)?/(.+?)(?:\.git)?/?$")
                .expect("Failed to compile regex!?!");
        static ref HTTP: Regex =
            Regex::new(r"^(https?://.+?)(?:\.git)?/?$").expect("Failed to compile regex!?!");
    }
    let git_url = git_url.trim();
    if let Some(caps) = SCP_LIKE.captures(git_url).or_else(|| SSH.captures(git_url)) {
        return Some(format!("https://{}/{}", &caps[1], &caps[2]));
    }
    HTTP.captures(git_url).map(|caps| caps[1].to_owned())
}
