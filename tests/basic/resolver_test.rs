use crate::common::{self, Fixture, T0};
use hw_submissions::submissions::sync::{resolve, SyncReference};
use hw_submissions::utils::git::Repo;

#[test]
fn test_find_tag_when_annotated_expect_tagger_time() {
    let fixture = Fixture::new();
    let remote = fixture.remote("alice");
    let head = remote.commit_file("a.py", "print(1)\n", "Solve", T0 + 60).unwrap();
    remote.tag_annotated("submission", head, T0 + 3600).unwrap();
    let repo = Repo::open(&remote.path).unwrap();

    let actual = repo.find_tag("submission").unwrap().unwrap();

    assert_eq!(actual.commit_id, head.to_string());
    assert_eq!(actual.commit_time.timestamp(), T0 + 60);
    assert_eq!(actual.tagged_time.timestamp(), T0 + 3600);
    assert_eq!(actual.commit_count, 2);
}

#[test]
fn test_find_tag_when_lightweight_expect_commit_time() {
    let fixture = Fixture::new();
    let remote = fixture.remote("alice");
    let head = remote.commit_file("a.py", "print(1)\n", "Solve", T0 + 60).unwrap();
    remote.tag_lightweight("submission", head).unwrap();
    let repo = Repo::open(&remote.path).unwrap();

    let actual = repo.find_tag("submission").unwrap().unwrap();

    assert_eq!(actual.tagged_time, actual.commit_time);
    assert_eq!(actual.commit_time.timestamp(), T0 + 60);
}

#[test]
fn test_find_tag_when_absent_expect_none() {
    let fixture = Fixture::new();
    let remote = fixture.remote("alice");
    let repo = Repo::open(&remote.path).unwrap();
    assert!(repo.find_tag("submission").unwrap().is_none());
}

#[test]
fn test_find_tag_when_case_differs_expect_none() {
    let fixture = Fixture::new();
    let remote = fixture.remote("alice");
    let head = remote.head().unwrap().target().unwrap();
    remote.tag_lightweight("submission", head).unwrap();
    let repo = Repo::open(&remote.path).unwrap();
    assert!(repo.find_tag("Submission").unwrap().is_none());
}

#[test]
fn test_find_tag_when_invalid_name_expect_none() {
    let fixture = Fixture::new();
    let remote = fixture.remote("alice");
    let repo = Repo::open(&remote.path).unwrap();
    assert!(repo.find_tag("bad..name").unwrap().is_none());
}

#[test]
fn test_resolve_when_branch_or_head_expect_checked_out_commit() {
    let fixture = Fixture::new();
    let remote = fixture.remote("alice");
    let head = remote.commit_file("a.py", "print(1)\n", "Solve", T0 + 60).unwrap();
    let repo = Repo::open(&remote.path).unwrap();

    let branch = resolve(&repo, &SyncReference::parse("main")).unwrap().unwrap();
    let literal = resolve(&repo, &SyncReference::parse("head")).unwrap().unwrap();

    assert_eq!(branch.commit_id, head.to_string());
    assert_eq!(literal, branch);
    assert_eq!(branch.commit_count, 2);
}

#[test]
fn test_open_when_not_a_repository_expect_error() {
    common::initialize();
    let dir = tempfile::tempdir().unwrap();
    assert!(Repo::open(dir.path()).is_err());
}
