// Copyright 2024 The SnowFS Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs;

use assert_matches::assert_matches;
use snowfs_lib::refs::Head;
use snowfs_lib::refs::RefType;
use snowfs_lib::repository::CommitOrder;
use snowfs_lib::repository::InitOptions;
use snowfs_lib::repository::RepoError;
use snowfs_lib::repository::Repository;
use snowfs_lib::tree::TreeEntry;
use testutils::random_bytes;
use testutils::TestRepo;

#[test]
fn commit_lifecycle() {
    let mut test_repo = TestRepo::init();
    test_repo.write_file("foo", &random_bytes(2048));
    test_repo.write_file("subdir/bar", b"bar contents");
    let add_hash = test_repo.commit_files(&["foo", "subdir/bar"], "Add Foo");
    let delete_hash = test_repo.commit_deletions(&["foo"], "Delete Foo");

    // Genesis plus the two commits above.
    let versions: Vec<_> = fs::read_dir(test_repo.repo.common_dir().join("versions"))
        .unwrap()
        .collect();
    assert_eq!(versions.len(), 3);

    let add_commit = test_repo.repo.find_commit_by_hash(&add_hash).unwrap();
    assert!(add_commit.root.find("foo").is_some());
    assert!(add_commit.root.find("subdir/bar").is_some());

    let delete_commit = test_repo.repo.find_commit_by_hash(&delete_hash).unwrap();
    assert_eq!(delete_commit.root.children.len(), 1);
    assert_matches!(
        delete_commit.root.children.first(),
        Some(TreeEntry::Dir(dir)) if dir.path == "subdir"
    );
    assert_eq!(delete_commit.parents, vec![add_hash.clone()]);
}

#[test]
fn open_is_idempotent() {
    let mut test_repo = TestRepo::init();
    test_repo.write_file("asset.bin", &random_bytes(512));
    test_repo.commit_files(&["asset.bin"], "Add asset");

    let first = Repository::open(test_repo.workdir()).unwrap();
    let second = Repository::open(test_repo.workdir()).unwrap();
    // Genesis plus one commit.
    assert_eq!(first.commit_map().len(), 2);
    assert_eq!(first.commit_map().len(), second.commit_map().len());
    let first_refs: Vec<_> = first.references().map(|r| r.name.clone()).collect();
    let second_refs: Vec<_> = second.references().map(|r| r.name.clone()).collect();
    assert_eq!(first_refs, second_refs);
    assert_eq!(first.head(), second.head());
    assert_eq!(
        first.head_commit().unwrap().hash,
        second.head_commit().unwrap().hash
    );
}

#[test]
fn temp_files_are_ignored_on_open() {
    let mut test_repo = TestRepo::init();
    test_repo.write_file("a", b"a");
    test_repo.commit_files(&["a"], "Add a");
    let common_dir = test_repo.repo.common_dir().to_path_buf();
    let before = Repository::open(test_repo.workdir()).unwrap();

    fs::write(common_dir.join("versions").join(".stale"), b"junk").unwrap();
    fs::write(common_dir.join("versions").join("x.9f3a2b.tmp"), b"junk").unwrap();
    fs::write(common_dir.join("refs").join(".partial"), b"junk").unwrap();
    fs::write(common_dir.join("refs").join("old.abc123.tmp"), b"junk").unwrap();

    let after = Repository::open(test_repo.workdir()).unwrap();
    assert_eq!(before.commit_map().len(), after.commit_map().len());
    assert_eq!(
        before.references().count(),
        after.references().count()
    );
}

#[test]
fn stale_state_marker_is_cleared_on_open() {
    let test_repo = TestRepo::init();
    let marker = test_repo.repo.common_dir().join("state");
    fs::write(&marker, b"").unwrap();
    Repository::open(test_repo.workdir()).unwrap();
    assert!(!marker.exists());
}

#[test]
fn stale_staged_objects_are_cleared_on_open() {
    let mut test_repo = TestRepo::init();
    test_repo.write_file("a", b"a");
    test_repo.commit_files(&["a"], "Add a");

    // A crash mid-materialisation leaves a temp body behind.
    let staged = test_repo
        .repo
        .common_dir()
        .join("objects")
        .join("tmp")
        .join("deadbeef00112233");
    fs::write(&staged, b"partial body").unwrap();

    let reopened = Repository::open(test_repo.workdir()).unwrap();
    assert!(!staged.exists());
    // Committed objects are untouched.
    assert_eq!(reopened.commit_map().len(), 2);
}

#[test]
fn multi_parent_commits_are_traversable() {
    use snowfs_lib::commit::Commit;
    use snowfs_lib::object_db::ObjectDb;

    let mut test_repo = TestRepo::init();
    test_repo.write_file("left.bin", b"left");
    let left_tip = test_repo.commit_files(&["left.bin"], "left work");
    let genesis = test_repo
        .repo
        .find_commit_by_hash("Main~1")
        .unwrap()
        .clone();

    // A merged history carries commits with several parents; the record
    // format and the traversal must both cope.
    let merge_commit = Commit::new(
        "merged histories",
        genesis.root.clone(),
        vec![left_tip.clone(), genesis.hash.clone()],
    );
    let merge_hash = merge_commit.hash.clone();
    ObjectDb::new(test_repo.repo.common_dir())
        .write_commit(&merge_commit)
        .unwrap();

    let reopened = Repository::open(test_repo.workdir()).unwrap();
    assert_eq!(reopened.commit_map().len(), 3);
    let loaded = reopened.find_commit_by_hash(&merge_hash).unwrap();
    assert_eq!(loaded.parents.len(), 2);
    // `~1` walks the first parent.
    assert_eq!(
        reopened
            .find_commit_by_hash(&format!("{merge_hash}~1"))
            .unwrap()
            .hash,
        left_tip
    );
    // Topological order places the merge commit after both parents.
    let ordered: Vec<_> = reopened
        .get_all_commits(CommitOrder::OldestFirst)
        .into_iter()
        .map(|commit| commit.hash.clone())
        .collect();
    assert_eq!(ordered.last(), Some(&merge_hash));
}

#[test]
fn staged_file_missing_from_disk_fails_the_commit() {
    let mut test_repo = TestRepo::init();
    test_repo.write_file("ghost.bin", b"soon gone");
    test_repo.repo.add_files(["ghost.bin"]).unwrap();
    test_repo.delete_file("ghost.bin");

    let error = test_repo
        .repo
        .commit(
            "cannot land",
            &snowfs_lib::repository::CommitOptions::default(),
            &snowfs_lib::hash::HashOptions::default(),
        )
        .unwrap_err();
    assert_matches!(error, RepoError::Io(_));
    assert_eq!(test_repo.repo.commit_map().len(), 1);
    assert!(!test_repo.repo.common_dir().join("state").exists());
}

#[test]
fn commit_spec_navigation() {
    let mut test_repo = TestRepo::init();
    test_repo.write_file("one", b"1");
    let first = test_repo.commit_files(&["one"], "first");
    test_repo.write_file("two", b"2");
    let second = test_repo.commit_files(&["two"], "second");

    let repo = &test_repo.repo;
    assert_eq!(repo.find_commit_by_hash("HEAD").unwrap().hash, second);
    assert_eq!(repo.find_commit_by_hash("HEAD~1").unwrap().hash, first);
    assert_eq!(repo.find_commit_by_hash("Main~1").unwrap().hash, first);
    assert_eq!(
        repo.find_commit_by_hash(&format!("{second}~1")).unwrap().hash,
        first
    );
    assert_eq!(
        repo.find_commit_by_hash("HEAD~1~1").unwrap().message,
        "Created Project"
    );

    let error = repo.find_commit_by_hash("HEAD~9").unwrap_err();
    assert_eq!(error.to_string(), "commit hash 'HEAD~9' out of history");
    let error = repo.find_commit_by_hash("deadbeef").unwrap_err();
    assert_eq!(error.to_string(), "invalid commit-hash 'deadbeef'");
}

#[test]
fn commit_orders_are_deterministic() {
    let mut test_repo = TestRepo::init();
    test_repo.write_file("one", b"1");
    let first = test_repo.commit_files(&["one"], "first");
    test_repo.write_file("two", b"2");
    let second = test_repo.commit_files(&["two"], "second");

    let repo = &test_repo.repo;
    let oldest: Vec<_> = repo
        .get_all_commits(CommitOrder::OldestFirst)
        .into_iter()
        .map(|commit| commit.hash.clone())
        .collect();
    assert_eq!(oldest.last(), Some(&second));
    assert_eq!(oldest[1], first);
    assert_eq!(oldest[0], repo.find_commit_by_hash("HEAD~2").unwrap().hash);

    let newest: Vec<_> = repo
        .get_all_commits(CommitOrder::NewestFirst)
        .into_iter()
        .map(|commit| commit.hash.clone())
        .collect();
    let reversed: Vec<_> = oldest.iter().rev().cloned().collect();
    assert_eq!(newest, reversed);
}

#[test]
fn empty_commit_requires_allow_empty() {
    let mut test_repo = TestRepo::init();
    let error = test_repo
        .repo
        .commit(
            "nothing",
            &snowfs_lib::repository::CommitOptions::default(),
            &snowfs_lib::hash::HashOptions::default(),
        )
        .unwrap_err();
    assert_eq!(error.to_string(), "no changes to commit");

    let options = snowfs_lib::repository::CommitOptions {
        allow_empty: true,
        ..Default::default()
    };
    let commit = test_repo
        .repo
        .commit(
            "empty snapshot",
            &options,
            &snowfs_lib::hash::HashOptions::default(),
        )
        .unwrap();
    assert_eq!(commit.message, "empty snapshot");
}

#[test]
fn reference_crud() {
    let mut test_repo = TestRepo::init();
    test_repo.write_file("a", b"a");
    let tip = test_repo.commit_files(&["a"], "Add a");
    let repo = &mut test_repo.repo;

    repo.create_new_reference(RefType::Branch, "feature", &tip)
        .unwrap();
    assert!(repo.find_reference("feature").is_some());
    assert!(repo.common_dir().join("refs").join("feature").is_file());

    let error = repo
        .create_new_reference(RefType::Branch, "feature", &tip)
        .unwrap_err();
    assert_matches!(error, RepoError::AlreadyExists(_));
    let error = repo
        .create_new_reference(RefType::Branch, "bad/name", &tip)
        .unwrap_err();
    assert_matches!(error, RepoError::InvalidArgument(_));
    let error = repo
        .create_new_reference(RefType::Branch, "orphan", &"0".repeat(64))
        .unwrap_err();
    assert_matches!(error, RepoError::NotFound(_));

    repo.create_new_reference(RefType::Tag, "approved v1", &tip)
        .unwrap();
    assert_eq!(
        repo.find_reference("approved v1").unwrap().ref_type,
        RefType::Tag
    );

    repo.rename_reference("feature", "feature 2.0").unwrap();
    assert!(repo.find_reference("feature").is_none());
    assert!(repo.find_reference("feature 2.0").is_some());
    assert!(!repo.common_dir().join("refs").join("feature").exists());

    repo.delete_reference("feature 2.0").unwrap();
    assert!(repo.find_reference("feature 2.0").is_none());

    let error = repo.delete_reference("HEAD").unwrap_err();
    assert_eq!(error.to_string(), "HEAD cannot be deleted");
}

#[test]
fn committing_on_a_detached_head_advances_head_only() {
    let mut test_repo = TestRepo::init();
    test_repo.write_file("a", b"a");
    let branch_tip = test_repo.commit_files(&["a"], "on branch");

    test_repo
        .repo
        .checkout(
            "Main",
            snowfs_lib::repository::ResetMode::DETACH,
            &snowfs_lib::hash::HashOptions::default(),
        )
        .unwrap();
    test_repo.write_file("b", b"b");
    let detached_tip = test_repo.commit_files(&["b"], "detached work");

    assert_eq!(test_repo.repo.head(), &Head::Detached(detached_tip.clone()));
    // The branch did not move.
    assert_eq!(
        test_repo.repo.find_reference("Main").unwrap().target,
        branch_tip
    );
    let detached = test_repo.repo.find_commit_by_hash(&detached_tip).unwrap();
    assert_eq!(detached.parents, vec![branch_tip]);
}

#[test]
fn deleting_the_checked_out_branch_detaches_head() {
    let mut test_repo = TestRepo::init();
    test_repo.write_file("a", b"a");
    let tip = test_repo.commit_files(&["a"], "Add a");
    let repo = &mut test_repo.repo;

    repo.delete_reference("Main").unwrap();
    assert_eq!(repo.head(), &Head::Detached(tip));
}

#[test]
fn named_indexes_are_created_on_demand() {
    let mut test_repo = TestRepo::init();
    let index = test_repo.repo.named_index_mut("render-pass");
    index.add_files(["frames/frame-0001.exr"]);
    assert!(index.add_set().contains("frames/frame-0001.exr"));
    // The main index is a separate staging buffer.
    assert!(test_repo.repo.index_mut().is_empty());
}

#[test]
fn custom_default_branch_name() {
    let options = InitOptions {
        default_branch_name: Some("trunk".to_string()),
        ..InitOptions::default()
    };
    let test_repo = TestRepo::init_with_options(&options);
    assert_eq!(test_repo.repo.head(), &Head::Attached("trunk".to_string()));
    assert!(test_repo.repo.find_reference("trunk").is_some());

    let bad = InitOptions {
        default_branch_name: Some(".bad".to_string()),
        ..InitOptions::default()
    };
    let temp = testutils::new_temp_dir();
    let error = Repository::init_ext(&temp.path().join("repo"), &bad).unwrap_err();
    assert_matches!(error, RepoError::InvalidArgument(_));
}

#[test]
fn commits_survive_reopen_with_tags_and_user_data() {
    let mut test_repo = TestRepo::init();
    test_repo.write_file("a", b"a");
    test_repo.repo.add_files(["a"]).unwrap();
    let options = snowfs_lib::repository::CommitOptions {
        tags: vec!["milestone".to_string()],
        user_data: [(
            "artist".to_string(),
            serde_json::Value::String("amber".to_string()),
        )]
        .into_iter()
        .collect(),
        allow_empty: false,
    };
    let hash = test_repo
        .repo
        .commit(
            "tagged \"quoted\"\nmultiline",
            &options,
            &snowfs_lib::hash::HashOptions::default(),
        )
        .unwrap()
        .hash
        .clone();

    let reopened = Repository::open(test_repo.workdir()).unwrap();
    let commit = reopened.find_commit_by_hash(&hash).unwrap();
    assert_eq!(commit.message, "tagged \"quoted\"\nmultiline");
    assert_eq!(commit.tags, vec!["milestone".to_string()]);
    assert_eq!(
        commit.user_data.get("artist"),
        Some(&serde_json::Value::String("amber".to_string()))
    );
}

#[test]
fn mutating_operations_fail_fast_while_busy() {
    let mut test_repo = TestRepo::init();
    test_repo.write_file("a", b"a");
    test_repo.repo.add_files(["a"]).unwrap();

    // Another process is mid-mutation: the marker exists.
    let marker = test_repo.repo.common_dir().join("state");
    fs::write(&marker, b"").unwrap();
    let error = test_repo
        .repo
        .commit(
            "blocked",
            &snowfs_lib::repository::CommitOptions::default(),
            &snowfs_lib::hash::HashOptions::default(),
        )
        .unwrap_err();
    assert_matches!(error, RepoError::RepositoryBusy);
    assert_eq!(error.to_string(), "repository busy");

    fs::remove_file(&marker).unwrap();
    test_repo
        .repo
        .commit(
            "unblocked",
            &snowfs_lib::repository::CommitOptions::default(),
            &snowfs_lib::hash::HashOptions::default(),
        )
        .unwrap();
    // The operation released its own marker.
    assert!(!marker.exists());
}

#[test]
fn cancelled_commit_leaves_no_commit_behind() {
    let mut test_repo = TestRepo::init();
    test_repo.write_file("a", &random_bytes(8192));
    test_repo.repo.add_files(["a"]).unwrap();

    let options = snowfs_lib::hash::HashOptions::default();
    options.cancel.cancel();
    let error = test_repo
        .repo
        .commit(
            "never lands",
            &snowfs_lib::repository::CommitOptions::default(),
            &options,
        )
        .unwrap_err();
    assert_matches!(error, RepoError::Cancelled(_));

    // Only the genesis commit exists, the marker is released, and the
    // staged paths are still pending.
    assert_eq!(test_repo.repo.commit_map().len(), 1);
    assert!(!test_repo.repo.common_dir().join("state").exists());
    let reopened = Repository::open(test_repo.workdir()).unwrap();
    assert_eq!(reopened.commit_map().len(), 1);

    // A fresh token lets the same staged change land.
    test_repo
        .repo
        .commit(
            "lands now",
            &snowfs_lib::repository::CommitOptions::default(),
            &snowfs_lib::hash::HashOptions::default(),
        )
        .unwrap();
    assert_eq!(test_repo.repo.commit_map().len(), 2);
}

#[test]
fn mainlog_records_mutating_operations() {
    let mut test_repo = TestRepo::init();
    test_repo.write_file("a", b"a");
    test_repo.commit_files(&["a"], "Add a");
    let log = fs::read_to_string(
        test_repo
            .repo
            .common_dir()
            .join("logs")
            .join("mainlog"),
    )
    .unwrap();
    assert!(log.lines().any(|line| line.contains("init")));
    assert!(log.lines().any(|line| line.contains("commit")));
}
