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

use crate::common::stderr_of;
use crate::common::stdout_of;
use crate::common::TestEnvironment;

#[test]
fn branch_create_list_delete() {
    let env = TestEnvironment::new();
    let repo = env.init_repo();
    env.write_file(&repo, "a.bin", b"a");
    env.commit_files(&repo, &["a.bin"], "base");

    env.snow_in(&repo, &["branch", "feature"]).assert().success();
    let assert = env.snow_in(&repo, &["branch"]).assert().success();
    let listing = stdout_of(&assert);
    assert!(listing.contains("* Main"));
    assert!(listing.contains("  feature"));

    env.snow_in(&repo, &["branch", "-d", "feature"])
        .assert()
        .success();
    let assert = env.snow_in(&repo, &["branch"]).assert().success();
    assert!(!stdout_of(&assert).contains("feature"));
}

#[test]
fn branch_with_start_point() {
    let env = TestEnvironment::new();
    let repo = env.init_repo();
    env.write_file(&repo, "a.bin", b"a");
    env.commit_files(&repo, &["a.bin"], "first");
    env.write_file(&repo, "b.bin", b"b");
    env.commit_files(&repo, &["b.bin"], "second");

    env.snow_in(&repo, &["branch", "from-first", "HEAD~1"])
        .assert()
        .success();
    env.snow_in(&repo, &["checkout", "from-first"])
        .assert()
        .success();
    assert!(repo.join("a.bin").exists());
    assert!(!repo.join("b.bin").exists());
}

#[test]
fn invalid_branch_name_is_a_user_error() {
    let env = TestEnvironment::new();
    let repo = env.init_repo();
    let assert = env
        .snow_in(&repo, &["branch", "nope/slash"])
        .assert()
        .failure()
        .code(1);
    assert!(stderr_of(&assert).contains("invalid reference name"));
}

#[test]
fn checkout_switches_between_branches() {
    let env = TestEnvironment::new();
    let repo = env.init_repo();
    env.write_file(&repo, "base.bin", b"base");
    env.commit_files(&repo, &["base.bin"], "base");

    env.snow_in(&repo, &["branch", "side"]).assert().success();
    env.snow_in(&repo, &["checkout", "side"]).assert().success();
    env.write_file(&repo, "side.bin", b"side work");
    env.commit_files(&repo, &["side.bin"], "side work");

    let assert = env
        .snow_in(&repo, &["checkout", "Main"])
        .assert()
        .success();
    assert!(stdout_of(&assert).contains("Switched to branch 'Main'"));
    assert!(!repo.join("side.bin").exists());

    env.snow_in(&repo, &["checkout", "side"]).assert().success();
    assert!(repo.join("side.bin").exists());
}

#[test]
fn checkout_detach_reports_hash() {
    let env = TestEnvironment::new();
    let repo = env.init_repo();
    env.write_file(&repo, "a.bin", b"a");
    env.commit_files(&repo, &["a.bin"], "base");

    let assert = env
        .snow_in(&repo, &["checkout", "Main", "--detach"])
        .assert()
        .success();
    assert!(stdout_of(&assert).contains("HEAD is now at "));
}

#[test]
fn checkout_discard_flag_is_required_for_dirty_trees() {
    let env = TestEnvironment::new();
    let repo = env.init_repo();
    env.write_file(&repo, "a.txt", b"v1");
    env.commit_files(&repo, &["a.txt"], "first");
    env.write_file(&repo, "a.txt", b"v2 different size");
    env.commit_files(&repo, &["a.txt"], "second");

    env.write_file(&repo, "a.txt", b"local edits here");
    let assert = env
        .snow_in(&repo, &["checkout", "HEAD~1"])
        .assert()
        .failure()
        .code(1);
    assert!(stderr_of(&assert).contains("would overwrite local changes"));

    env.snow_in(&repo, &["checkout", "HEAD~1", "--discard"])
        .assert()
        .success();
    assert_eq!(std::fs::read(repo.join("a.txt")).unwrap(), b"v1");
}
