use crate::common::{self, Fixture, T0};
use hw_submissions::submissions::ledger::Status;
use hw_submissions::submissions::roster::RepoRosterEntry;
use hw_submissions::submissions::sync::{sync, SyncOutcome, SyncReference};
use hw_submissions::utils::interrupt::Interrupted;

fn submission() -> SyncReference {
    SyncReference::parse("submission")
}

#[test]
fn test_sync_when_first_clone_expect_new_at_tag() {
    let fixture = Fixture::new();
    let remote = fixture.remote("alice");
    let tagged = remote.commit_file("a.py", "print(1)\n", "Solve", T0 + 60).unwrap();
    remote.tag_annotated("submission", tagged, T0 + 120).unwrap();
    // Work after the deadline must not be checked out.
    remote.commit_file("a.py", "print(2)\n", "Late", T0 + 7200).unwrap();
    let ctx = common::context();

    let actual = sync(&ctx, &common::entry("alice", &remote), &submission(), &fixture.out_dir()).unwrap();

    let SyncOutcome::New(commit) = actual else {
        panic!("expected a new outcome, got {actual:?}");
    };
    assert_eq!(commit.commit_id, tagged.to_string());
    let checked_out = std::fs::read_to_string(fixture.working_copy("alice").join("a.py")).unwrap();
    assert_eq!(checked_out, "print(1)\n");
}

#[test]
fn test_sync_when_nothing_changed_expect_unchanged() {
    let fixture = Fixture::new();
    let remote = fixture.remote("alice");
    let head = remote.head().unwrap().target().unwrap();
    remote.tag_lightweight("submission", head).unwrap();
    let ctx = common::context();
    let entry = common::entry("alice", &remote);

    let first = sync(&ctx, &entry, &submission(), &fixture.out_dir()).unwrap();
    let second = sync(&ctx, &entry, &submission(), &fixture.out_dir()).unwrap();

    assert_eq!(first.status(), Status::New);
    assert_eq!(second.status(), Status::Unchanged);
    assert_eq!(first.commit(), second.commit());
}

#[test]
fn test_sync_when_tag_moved_expect_updated() {
    let fixture = Fixture::new();
    let remote = fixture.remote("alice");
    let first_commit = remote.head().unwrap().target().unwrap();
    remote.tag_annotated("submission", first_commit, T0 + 10).unwrap();
    let ctx = common::context();
    let entry = common::entry("alice", &remote);
    sync(&ctx, &entry, &submission(), &fixture.out_dir()).unwrap();

    let resubmitted = remote.commit_file("a.py", "print(2)\n", "Fix", T0 + 600).unwrap();
    remote.tag_annotated("submission", resubmitted, T0 + 700).unwrap();
    let actual = sync(&ctx, &entry, &submission(), &fixture.out_dir()).unwrap();

    let SyncOutcome::Updated(commit) = actual else {
        panic!("expected an updated outcome, got {actual:?}");
    };
    assert_eq!(commit.commit_id, resubmitted.to_string());
    assert_eq!(commit.tagged_time.timestamp(), T0 + 700);
    assert!(fixture.working_copy("alice").join("a.py").exists());
}

#[test]
fn test_sync_when_tag_deleted_upstream_expect_missing_and_directory_removed() {
    let fixture = Fixture::new();
    let remote = fixture.remote("bob");
    let head = remote.head().unwrap().target().unwrap();
    remote.tag_annotated("submission", head, T0 + 10).unwrap();
    let ctx = common::context();
    let entry = common::entry("bob", &remote);
    sync(&ctx, &entry, &submission(), &fixture.out_dir()).unwrap();
    assert!(fixture.working_copy("bob").exists());

    remote.delete_tag("submission").unwrap();
    let actual = sync(&ctx, &entry, &submission(), &fixture.out_dir()).unwrap();

    assert_eq!(actual, SyncOutcome::Missing("tag removed".to_owned()));
    assert!(!fixture.working_copy("bob").exists());
}

#[test]
fn test_sync_when_tag_never_pushed_expect_no_tag_and_no_directory() {
    let fixture = Fixture::new();
    let remote = fixture.remote("carol");
    let ctx = common::context();

    let actual = sync(&ctx, &common::entry("carol", &remote), &submission(), &fixture.out_dir()).unwrap();

    assert_eq!(actual, SyncOutcome::NoTag);
    assert!(!fixture.working_copy("carol").exists());
}

#[test]
fn test_sync_when_bad_url_expect_missing_and_no_directory() {
    let fixture = Fixture::new();
    let ctx = common::context();
    let missing_remote = fixture.remotes_dir().join("nobody.git");
    let entry = RepoRosterEntry::new("nobody", &missing_remote.to_string_lossy());

    let actual = sync(&ctx, &entry, &submission(), &fixture.out_dir()).unwrap();

    assert_eq!(actual.status(), Status::Missing);
    assert!(!fixture.working_copy("nobody").exists());
}

#[test]
fn test_sync_when_branch_advances_expect_updated_to_latest() {
    let fixture = Fixture::new();
    let remote = fixture.remote("alice");
    let ctx = common::context();
    let entry = common::entry("alice", &remote);
    let main = SyncReference::parse("main");
    let first = sync(&ctx, &entry, &main, &fixture.out_dir()).unwrap();
    assert_eq!(first.status(), Status::New);

    let latest = remote.commit_file("b.py", "pass\n", "More work", T0 + 900).unwrap();
    let actual = sync(&ctx, &entry, &main, &fixture.out_dir()).unwrap();

    let SyncOutcome::Updated(commit) = actual else {
        panic!("expected an updated outcome, got {actual:?}");
    };
    assert_eq!(commit.commit_id, latest.to_string());
    assert_eq!(commit.commit_count, 2);
    assert!(fixture.working_copy("alice").join("b.py").exists());
}

#[test]
fn test_sync_when_branch_deleted_upstream_expect_missing_and_directory_removed() {
    let fixture = Fixture::new();
    let remote = fixture.remote("alice");
    remote.create_branch("master").unwrap();
    let ctx = common::context();
    let entry = common::entry("alice", &remote);
    let master = SyncReference::parse("master");
    let first = sync(&ctx, &entry, &master, &fixture.out_dir()).unwrap();
    assert_eq!(first.status(), Status::New);

    remote.delete_branch("master").unwrap();
    let actual = sync(&ctx, &entry, &master, &fixture.out_dir()).unwrap();

    assert_eq!(actual, SyncOutcome::Missing("branch removed".to_owned()));
    assert!(!fixture.working_copy("alice").exists());
}

#[test]
fn test_sync_when_reference_is_head_expect_checked_out_commit() {
    let fixture = Fixture::new();
    let remote = fixture.remote("alice");
    let latest = remote.commit_file("a.py", "print(1)\n", "Solve", T0 + 60).unwrap();
    let ctx = common::context();
    let entry = common::entry("alice", &remote);
    let head = SyncReference::parse("head");

    let first = sync(&ctx, &entry, &head, &fixture.out_dir()).unwrap();
    let second = sync(&ctx, &entry, &head, &fixture.out_dir()).unwrap();

    let SyncOutcome::New(commit) = first else {
        panic!("expected a new outcome, got {first:?}");
    };
    assert_eq!(commit.commit_id, latest.to_string());
    assert_eq!(commit.tagged_time, commit.commit_time);
    assert_eq!(second.status(), Status::Unchanged);
}

#[test]
fn test_sync_when_working_copy_corrupt_expect_missing_and_removed() {
    let fixture = Fixture::new();
    let remote = fixture.remote("alice");
    let local = fixture.working_copy("alice");
    std::fs::create_dir_all(&local).unwrap();
    std::fs::write(local.join("notes.txt"), "not a repository").unwrap();
    let ctx = common::context();

    let actual = sync(&ctx, &common::entry("alice", &remote), &submission(), &fixture.out_dir()).unwrap();

    assert_eq!(actual.status(), Status::Missing);
    assert!(!local.exists());
}

#[test]
fn test_sync_when_interrupted_expect_interrupted_error_and_nothing_cloned() {
    let fixture = Fixture::new();
    let remote = fixture.remote("alice");
    let ctx = common::context();
    ctx.interrupt.trigger();

    let actual = sync(&ctx, &common::entry("alice", &remote), &submission(), &fixture.out_dir()).unwrap_err();

    assert!(actual.is::<Interrupted>());
    assert!(!fixture.working_copy("alice").exists());
}
