//! The git module wraps a local working copy with the handful of operations the
//! submission synchronizer needs: clone, fetch, checkout and commit resolution.
//!
//! "Not found" is a normal answer here. Looking up a tag or a remote branch
//! that doesn't exist returns `None`, and only genuine git failures are errors.
use crate::utils::interrupt::Interrupt;
use anyhow::Context;
use chrono::{DateTime, Utc};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    AutotagOption, Cred, CredentialType, Direction, ErrorCode, FetchOptions, Oid, RemoteCallbacks,
    Repository,
};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the remote every working copy is cloned from.
pub const REMOTE: &str = "origin";

/// Refspecs used to refresh a working copy. Both are forced: remote tags are
/// authoritative and a resubmission may move a tag to a new commit.
const FETCH_REFSPECS: [&str; 2] = [
    "+refs/heads/*:refs/remotes/origin/*",
    "+refs/tags/*:refs/tags/*",
];

/// A reference resolved to a concrete commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommit {
    /// Hex id of the commit.
    pub commit_id: String,
    /// Commit timestamp.
    pub commit_time: DateTime<Utc>,
    /// Tagger timestamp of an annotated tag, otherwise the commit timestamp.
    pub tagged_time: DateTime<Utc>,
    /// Number of commits reachable from the commit, itself included.
    pub commit_count: usize,
}

/// Credentials and cancellation used for every network operation.
#[derive(Debug, Clone, Default)]
pub struct GitAuth {
    /// Token used for HTTPS remotes.
    token: Option<String>,
    /// Cancels transfers when the run is interrupted.
    interrupt: Interrupt,
}

impl GitAuth {
    /// Create the auth settings for a run.
    #[must_use]
    pub const fn new(token: Option<String>, interrupt: Interrupt) -> Self {
        Self { token, interrupt }
    }

    /// Build libgit2 callbacks.
    ///
    /// Each credential kind is offered once. libgit2 keeps asking for
    /// credentials as long as the callback returns some, so repeating a rejected
    /// credential would loop forever.
    fn remote_callbacks(&self) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();
        let mut tried_agent = false;
        let mut tried_token = false;
        let mut tried_default = false;
        callbacks.credentials(move |_url, username, allowed| {
            if allowed.contains(CredentialType::USERNAME) {
                return Cred::username(username.unwrap_or("git"));
            }
            if allowed.contains(CredentialType::SSH_KEY) && !tried_agent {
                tried_agent = true;
                return Cred::ssh_key_from_agent(username.unwrap_or("git"));
            }
            if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) && !tried_token {
                tried_token = true;
                if let Some(token) = self.token.as_deref() {
                    return Cred::userpass_plaintext("x-access-token", token);
                }
            }
            if allowed.contains(CredentialType::DEFAULT) && !tried_default {
                tried_default = true;
                return Cred::default();
            }
            Err(git2::Error::from_str("no usable credentials for remote"))
        });
        let interrupt = self.interrupt.clone();
        callbacks.transfer_progress(move |_progress| !interrupt.is_set());
        callbacks
    }

    /// Fetch options carrying the callbacks and fetching every tag.
    fn fetch_options(&self) -> FetchOptions<'_> {
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(self.remote_callbacks());
        fetch_options.download_tags(AutotagOption::All);
        fetch_options
    }
}

/// A local working copy of a submission repository.
pub struct Repo {
    /// Path to the working copy.
    path: PathBuf,
    /// git2 repository opened at `path`.
    repo: Repository,
}

impl fmt::Debug for Repo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Repo at {}", self.path.display())
    }
}

impl Repo {
    /// Open an existing working copy.
    ///
    /// # Errors
    /// Errors if there is no git repository at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        tracing::debug!("Opening working copy at {}", path.display());
        Ok(Self {
            path: path.to_owned(),
            repo: Repository::open(path)?,
        })
    }

    /// Clone `url` into `path`, fetching all tags.
    ///
    /// # Errors
    /// Errors on network, authentication or filesystem failures. A partially
    /// written `path` is left for the caller to remove.
    pub fn clone_remote(url: &str, path: &Path, auth: &GitAuth) -> anyhow::Result<Self> {
        tracing::debug!(url, "Cloning into {}", path.display());
        let repo = RepoBuilder::new()
            .fetch_options(auth.fetch_options())
            .clone(url, path)?;
        Ok(Self {
            path: path.to_owned(),
            repo,
        })
    }

    /// Force-fetch all branches and tags from `origin`, then delete local tags
    /// and remote-tracking branches that the remote no longer advertises.
    ///
    /// # Errors
    /// Errors if the remote is missing or unreachable.
    pub fn fetch(&self, auth: &GitAuth) -> anyhow::Result<()> {
        let mut remote = self
            .repo
            .find_remote(REMOTE)
            .with_context(|| format!("No `{REMOTE}` remote in {}", self.path.display()))?;
        let connection =
            remote.connect_auth(Direction::Fetch, Some(auth.remote_callbacks()), None)?;
        let advertised: HashSet<String> = connection
            .list()?
            .iter()
            .map(|head| head.name().to_owned())
            .collect();
        drop(connection);
        remote.fetch(&FETCH_REFSPECS, Some(&mut auth.fetch_options()), None)?;
        self.prune_refs(&advertised)
    }

    /// Delete local tags and `origin/*` branches absent from `advertised`
    /// remote ref names.
    fn prune_refs(&self, advertised: &HashSet<String>) -> anyhow::Result<()> {
        let tracking_prefix = format!("refs/remotes/{REMOTE}/");
        let mut stale = Vec::new();
        for reference in self.repo.references()? {
            let reference = reference?;
            let Some(refname) = reference.name() else {
                continue;
            };
            let upstream = if refname.starts_with("refs/tags/") {
                refname.to_owned()
            } else if let Some(branch) = refname.strip_prefix(&tracking_prefix) {
                if branch == "HEAD" {
                    continue;
                }
                format!("refs/heads/{branch}")
            } else {
                continue;
            };
            if !advertised.contains(&upstream) {
                stale.push(refname.to_owned());
            }
        }
        for refname in stale {
            tracing::debug!(reference = %refname, "Pruning reference removed from remote");
            self.repo.find_reference(&refname)?.delete()?;
        }
        Ok(())
    }

    /// Resolve the commit currently checked out.
    ///
    /// # Errors
    /// Errors if HEAD is unborn or does not point to a commit.
    pub fn resolve_head(&self) -> anyhow::Result<ResolvedCommit> {
        let commit = self
            .repo
            .head()
            .with_context(|| format!("No HEAD in {}", self.path.display()))?
            .peel_to_commit()?;
        let commit_time = to_utc(commit.time())?;
        Ok(ResolvedCommit {
            commit_id: commit.id().to_string(),
            commit_time,
            tagged_time: commit_time,
            commit_count: self.count_commits(commit.id())?,
        })
    }

    /// Resolve the tag `name` (exact, case-sensitive).
    ///
    /// Returns `None` when no such tag exists.
    ///
    /// # Errors
    /// Errors if the tag exists but can't be peeled to a commit.
    pub fn find_tag(&self, name: &str) -> anyhow::Result<Option<ResolvedCommit>> {
        let reference = match self.repo.find_reference(&format!("refs/tags/{name}")) {
            Ok(reference) => reference,
            Err(err) if is_absent(&err) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let commit = reference.peel_to_commit()?;
        let commit_time = to_utc(commit.time())?;
        let tagger_time = reference
            .target()
            .and_then(|oid| self.repo.find_tag(oid).ok())
            .and_then(|tag| tag.tagger().map(|signature| signature.when()));
        let tagged_time = match tagger_time {
            Some(when) => to_utc(when)?,
            None => commit_time,
        };
        Ok(Some(ResolvedCommit {
            commit_id: commit.id().to_string(),
            commit_time,
            tagged_time,
            commit_count: self.count_commits(commit.id())?,
        }))
    }

    /// Check out `commit_id` with a detached HEAD, discarding local changes.
    ///
    /// # Errors
    /// Errors if the commit doesn't exist or the checkout fails.
    pub fn checkout_detached(&self, commit_id: &str) -> anyhow::Result<()> {
        let oid = Oid::from_str(commit_id)?;
        let commit = self.repo.find_commit(oid)?;
        // The tree goes first: moving HEAD beforehand would make files of the
        // old commit look untracked and they would be left behind.
        self.repo
            .checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
        self.repo.set_head_detached(oid)?;
        Ok(())
    }

    /// Point the local branch `name` at `origin/<name>` and check it out,
    /// discarding local changes.
    ///
    /// Returns `false` when the remote has no such branch.
    ///
    /// # Errors
    /// Errors if the checkout or reference update fails.
    pub fn checkout_branch(&self, name: &str) -> anyhow::Result<bool> {
        let remote_ref = match self
            .repo
            .find_reference(&format!("refs/remotes/{REMOTE}/{name}"))
        {
            Ok(reference) => reference,
            Err(err) if is_absent(&err) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let commit = remote_ref.peel_to_commit()?;
        self.repo
            .checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
        let local = format!("refs/heads/{name}");
        self.repo
            .reference(&local, commit.id(), true, "hw-submissions: track remote branch")?;
        self.repo.set_head(&local)?;
        Ok(true)
    }

    /// Count the commits reachable from `oid`.
    fn count_commits(&self, oid: Oid) -> anyhow::Result<usize> {
        let mut walk = self.repo.revwalk()?;
        walk.push(oid)?;
        let mut count = 0;
        for step in walk {
            step?;
            count += 1;
        }
        Ok(count)
    }
}

/// Whether a lookup error means the reference is simply not there.
fn is_absent(err: &git2::Error) -> bool {
    matches!(err.code(), ErrorCode::NotFound | ErrorCode::InvalidSpec)
}

/// Convert a git timestamp to UTC.
fn to_utc(time: git2::Time) -> anyhow::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(time.seconds(), 0)
        .with_context(|| format!("Git timestamp {} is out of range", time.seconds()))
}
