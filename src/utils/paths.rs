//! Utility functions for working with paths
use std::path::{Component, Path, PathBuf};

/// Whether `repo_id` can be used as a directory name below an output folder.
///
/// Ids may contain `/` to nest working copies (e.g. `workshop-6/alice`), but
/// must stay inside the output folder.
#[must_use]
pub fn is_safe_repo_id(repo_id: &str) -> bool {
    !repo_id.trim().is_empty()
        && Path::new(repo_id)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

/// Location of the working copy for `repo_id`.
#[must_use]
pub fn working_copy_dir(dest_root: &Path, repo_id: &str) -> PathBuf {
    dest_root.join(repo_id)
}

/// Append `suffix` to the file name of `path`, keeping its directory.
#[must_use]
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut file_name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    file_name.push(suffix);
    path.with_file_name(file_name)
}

/// First backup path for `path` at `stamp` that doesn't exist yet:
/// `<path>-<stamp>.bak`, then `<path>-<stamp>-1.bak` and so on.
#[must_use]
pub fn free_backup_path(path: &Path, stamp: &str) -> PathBuf {
    let mut candidate = with_suffix(path, &format!("-{stamp}.bak"));
    let mut attempt = 0_u32;
    while candidate.exists() {
        attempt += 1;
        candidate = with_suffix(path, &format!("-{stamp}-{attempt}.bak"));
    }
    candidate
}

/// A single file name derived from a key that may contain path separators.
#[must_use]
pub fn file_name_for_key(key: &str, extension: &str) -> String {
    let stem: String = key
        .trim()
        .chars()
        .map(|ch| if matches!(ch, '/' | '\\' | ':') { '_' } else { ch })
        .collect();
    format!("{stem}.{extension}")
}
