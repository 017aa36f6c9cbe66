use anyhow::Result;
use git2::{Oid, Repository, RepositoryInitOptions, Signature, Time};
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// A student repository acting as the remote of the working copies under test.
pub struct GitRepository {
    pub repo: Repository,
    pub path: PathBuf,
}

impl GitRepository {
    /// Create an empty repository whose default branch is `main`.
    pub fn init(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let mut options = RepositoryInitOptions::new();
        options.initial_head("main");
        let repo = Repository::init_opts(path, &options)?;
        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    /// Clone URL of the repository.
    pub fn url(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Signature with a fixed timestamp, so commit times are deterministic.
    pub fn signature(secs: i64) -> Signature<'static> {
        Signature::new("Student", "student@example.com", &Time::new(secs, 0)).unwrap()
    }

    /// Write `content` to `file_name` and commit it on HEAD at `secs`.
    pub fn commit_file(&self, file_name: &str, content: &str, commit_msg: &str, secs: i64) -> Result<Oid> {
        std::fs::write(self.path.join(file_name), content)?;
        let mut index = self.repo.index()?;
        index.add_path(Path::new(file_name))?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = Self::signature(secs);

        let parents = self
            .repo
            .head()
            .ok()
            .and_then(|head| head.target())
            .and_then(|target_id| self.repo.find_commit(target_id).ok())
            .map(|parent_commit| vec![parent_commit])
            .unwrap_or_default();
        let parents: Vec<_> = parents.iter().collect();

        Ok(self
            .repo
            .commit(Some("HEAD"), &sig, &sig, commit_msg, &tree, &parents)?)
    }

    /// Create or move the annotated tag `name` to `target`, tagged at `secs`.
    pub fn tag_annotated(&self, name: &str, target: Oid, secs: i64) -> Result<Oid> {
        let object = self.repo.find_object(target, None)?;
        let tagger = Self::signature(secs);
        Ok(self
            .repo
            .tag(name, &object, &tagger, &format!("Submission {name}"), true)?)
    }

    /// Create or move the lightweight tag `name` to `target`.
    pub fn tag_lightweight(&self, name: &str, target: Oid) -> Result<()> {
        let object = self.repo.find_object(target, None)?;
        self.repo.tag_lightweight(name, &object, true)?;
        Ok(())
    }

    /// Create the branch `name` at the current HEAD commit.
    pub fn create_branch(&self, name: &str) -> Result<()> {
        let head = self.repo.head()?.peel_to_commit()?;
        self.repo.branch(name, &head, true)?;
        Ok(())
    }

    /// Delete the local branch `name`.
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        self.repo
            .find_branch(name, git2::BranchType::Local)?
            .delete()?;
        Ok(())
    }

    /// Delete the tag `name`.
    pub fn delete_tag(&self, name: &str) -> Result<()> {
        self.repo.tag_delete(name)?;
        Ok(())
    }
}

impl Deref for GitRepository {
    type Target = Repository;

    fn deref(&self) -> &Self::Target {
        &self.repo
    }
}
