use crate::repo_testtools::GitRepository;
use hw_submissions::submissions::config::{Config, Throttle};
use hw_submissions::submissions::context::RunContext;
use hw_submissions::submissions::roster::{RepoRosterEntry, Roster};
use hw_submissions::utils::interrupt::Interrupt;
use std::path::PathBuf;
use std::sync::Once;
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Base of the commit timestamps used in tests (2024-03-01T00:00:00Z).
pub const T0: i64 = 1_709_251_200;

pub fn initialize() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// Run context rendering times in UTC, with pacing disabled.
pub fn context() -> RunContext {
    let config = Config {
        timezone: "UTC".to_owned(),
        throttle: Throttle {
            every: 0,
            pause_secs: 0,
        },
        ..Config::default()
    };
    RunContext::new(&config, None, Interrupt::default()).unwrap()
}

/// Temporary layout holding student remotes, working copies and the ledger.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        initialize();
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn remotes_dir(&self) -> PathBuf {
        self.dir.path().join("remotes")
    }

    /// Folder holding the working copies.
    pub fn out_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.path().join("submissions_timestamps.csv")
    }

    pub fn working_copy(&self, repo_id: &str) -> PathBuf {
        self.out_dir().join(repo_id)
    }

    /// A remote with one commit at `T0` on `main`.
    pub fn remote(&self, name: &str) -> GitRepository {
        let remote = GitRepository::init(&self.remotes_dir().join(name)).unwrap();
        remote
            .commit_file("README.md", &format!("# {name}\n"), "Initial commit", T0)
            .unwrap();
        remote
    }

    /// Backup files written next to the ledger.
    pub fn backups(&self) -> Vec<PathBuf> {
        let mut backups: Vec<PathBuf> = std::fs::read_dir(self.dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "bak"))
            .collect();
        backups.sort();
        backups
    }
}

pub fn entry(repo_id: &str, remote: &GitRepository) -> RepoRosterEntry {
    RepoRosterEntry::new(repo_id, &remote.url())
}

pub fn roster(entries: Vec<RepoRosterEntry>) -> Roster {
    Roster {
        entries,
        unusable: Vec::new(),
    }
}
