//! Bring one working copy in line with a branch or tag.

use crate::submissions::context::RunContext;
use crate::submissions::ledger::Status;
use crate::submissions::roster::RepoRosterEntry;
use crate::utils::git::{Repo, ResolvedCommit};
use crate::utils::paths::working_copy_dir;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::convert::Infallible;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Branch names that always track the latest commit.
const TRACKED_BRANCHES: [&str; 2] = ["main", "master"];
/// Tag name standing for whatever the working copy has checked out.
const HEAD: &str = "head";

/// The reference a batch is reconciled against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReference {
    /// A mutable branch, followed to its latest commit.
    Branch(String),
    /// An immutable submission tag.
    Tag(String),
}

impl SyncReference {
    /// `main` and `master` are branches, anything else is a tag.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        if TRACKED_BRANCHES.contains(&name) {
            Self::Branch(name.to_owned())
        } else {
            Self::Tag(name.to_owned())
        }
    }

    /// The branch or tag name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Branch(name) | Self::Tag(name) => name,
        }
    }

    /// `"branch"` or `"tag"`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Branch(_) => "branch",
            Self::Tag(_) => "tag",
        }
    }
}

impl FromStr for SyncReference {
    type Err = Infallible;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(name))
    }
}

impl fmt::Display for SyncReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What happened to one working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Cloned for the first time.
    New(ResolvedCommit),
    /// The reference moved to a commit with a different time.
    Updated(ResolvedCommit),
    /// The reference still points at a commit with the same time.
    Unchanged(ResolvedCommit),
    /// Couldn't be cloned or updated; the working copy is gone.
    Missing(String),
    /// Cloned, but the reference doesn't exist; the working copy is gone.
    NoTag,
}

impl SyncOutcome {
    /// Ledger status for the outcome.
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::New(_) => Status::New,
            Self::Updated(_) => Status::Updated,
            Self::Unchanged(_) => Status::Unchanged,
            Self::Missing(_) => Status::Missing,
            Self::NoTag => Status::NoTag,
        }
    }

    /// The resolved commit, if the outcome has one.
    #[must_use]
    pub const fn commit(&self) -> Option<&ResolvedCommit> {
        match self {
            Self::New(commit) | Self::Updated(commit) | Self::Unchanged(commit) => Some(commit),
            Self::Missing(_) | Self::NoTag => None,
        }
    }
}

/// Resolve `reference` in an open working copy without changing it.
///
/// Branches, and the literal tag name `head`, resolve to the commit checked out.
///
/// # Errors
/// Errors on git failures other than the reference being absent.
pub fn resolve(repo: &Repo, reference: &SyncReference) -> anyhow::Result<Option<ResolvedCommit>> {
    match reference {
        SyncReference::Branch(_) => repo.resolve_head().map(Some),
        SyncReference::Tag(name) if is_head(name) => repo.resolve_head().map(Some),
        SyncReference::Tag(name) => repo.find_tag(name),
    }
}

/// Clone or update the working copy of `entry` below `dest_root` and check out
/// `reference`.
///
/// Network, authentication and git failures are reported as
/// [`SyncOutcome::Missing`] and leave no working copy behind.
///
/// # Errors
/// Errors with [`Interrupted`](crate::utils::interrupt::Interrupted) when the
/// run is interrupted, or if a broken working copy can't be removed.
pub fn sync(
    ctx: &RunContext,
    entry: &RepoRosterEntry,
    reference: &SyncReference,
    dest_root: &Path,
) -> anyhow::Result<SyncOutcome> {
    ctx.interrupt.check()?;
    let local_dir = working_copy_dir(dest_root, &entry.repo_id);
    if local_dir.exists() {
        update_existing(ctx, reference, &local_dir)
    } else {
        clone_new(ctx, entry, reference, &local_dir)
    }
}

/// First clone of a working copy.
fn clone_new(
    ctx: &RunContext,
    entry: &RepoRosterEntry,
    reference: &SyncReference,
    local_dir: &Path,
) -> anyhow::Result<SyncOutcome> {
    tracing::debug!(repo_id = %entry.repo_id, "Cloning {}", entry.link());
    let repo = match Repo::clone_remote(&entry.git_url, local_dir, &ctx.auth) {
        Ok(repo) => repo,
        Err(err) => {
            remove_working_copy(local_dir)?;
            ctx.interrupt.check()?;
            return Ok(SyncOutcome::Missing(format!("clone failed: {err:#}")));
        }
    };
    let checked_out = ctx
        .interrupt
        .check()
        .and_then(|()| checkout_reference(&repo, reference));
    drop(repo);
    match checked_out {
        Ok(Some(commit)) => Ok(SyncOutcome::New(commit)),
        Ok(None) => {
            remove_working_copy(local_dir)?;
            Ok(SyncOutcome::NoTag)
        }
        Err(err) => {
            remove_working_copy(local_dir)?;
            ctx.interrupt.check()?;
            Ok(SyncOutcome::Missing(format!("checkout failed: {err:#}")))
        }
    }
}

/// Fetch and check out an existing working copy. The copy is destroyed when
/// the reference is gone upstream or any git step fails.
fn update_existing(
    ctx: &RunContext,
    reference: &SyncReference,
    local_dir: &Path,
) -> anyhow::Result<SyncOutcome> {
    let outcome = match refresh(ctx, reference, local_dir) {
        Ok(Some((previous, commit))) => {
            return Ok(if commit.commit_time == previous {
                SyncOutcome::Unchanged(commit)
            } else {
                SyncOutcome::Updated(commit)
            });
        }
        Ok(None) => SyncOutcome::Missing(format!("{} removed", reference.kind())),
        Err(err) => {
            ctx.interrupt.check()?;
            SyncOutcome::Missing(format!("{err:#}"))
        }
    };
    remove_working_copy(local_dir)?;
    Ok(outcome)
}

/// Open, fetch and check out. Returns the commit time checked out before the
/// fetch along with the newly resolved commit, or `None` if the reference is
/// gone.
fn refresh(
    ctx: &RunContext,
    reference: &SyncReference,
    local_dir: &Path,
) -> anyhow::Result<Option<(DateTime<Utc>, ResolvedCommit)>> {
    let repo = Repo::open(local_dir)?;
    let previous = repo.resolve_head()?.commit_time;
    repo.fetch(&ctx.auth)?;
    ctx.interrupt.check()?;
    Ok(checkout_reference(&repo, reference)?.map(|commit| (previous, commit)))
}

/// Check out `reference` and resolve it. `None` if the remote doesn't have it.
fn checkout_reference(
    repo: &Repo,
    reference: &SyncReference,
) -> anyhow::Result<Option<ResolvedCommit>> {
    match reference {
        SyncReference::Branch(name) => {
            if repo.checkout_branch(name)? {
                resolve(repo, reference)
            } else {
                Ok(None)
            }
        }
        SyncReference::Tag(name) if is_head(name) => resolve(repo, reference),
        SyncReference::Tag(name) => {
            let Some(commit) = repo.find_tag(name)? else {
                return Ok(None);
            };
            repo.checkout_detached(&commit.commit_id)?;
            Ok(Some(commit))
        }
    }
}

/// Whether a tag name means the checked-out commit.
fn is_head(name: &str) -> bool {
    name.eq_ignore_ascii_case(HEAD)
}

/// Delete a working copy, if there is one.
fn remove_working_copy(local_dir: &Path) -> anyhow::Result<()> {
    if local_dir.exists() {
        tracing::debug!("Removing working copy {}", local_dir.display());
        fs::remove_dir_all(local_dir)
            .with_context(|| format!("Could not remove {}", local_dir.display()))?;
    }
    Ok(())
}
