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

use snowfs_lib::io_context::AccessMode;
use snowfs_lib::io_context::IoContext;
use testutils::new_temp_dir;
use testutils::random_bytes;

#[test]
fn copy_file_is_content_faithful() {
    let temp_dir = new_temp_dir();
    let src = temp_dir.path().join("src.bin");
    let dst = temp_dir.path().join("dst.bin");
    let contents = random_bytes(5 * 1024 * 1024 + 17);
    fs::write(&src, &contents).unwrap();

    let context = IoContext::init();
    context.copy_file(&src, &dst).unwrap();
    assert_eq!(fs::read(&dst).unwrap(), contents);

    // Overwriting an existing destination replaces it entirely.
    let smaller = random_bytes(1024);
    fs::write(&src, &smaller).unwrap();
    context.copy_file(&src, &dst).unwrap();
    assert_eq!(fs::read(&dst).unwrap(), smaller);
}

#[test]
fn access_check_passes_and_skips_missing() {
    let temp_dir = new_temp_dir();
    fs::write(temp_dir.path().join("idle.bin"), b"idle").unwrap();
    let context = IoContext::init();
    context
        .perform_file_access_check(
            temp_dir.path(),
            ["idle.bin", "not-there.bin"],
            AccessMode::Write,
        )
        .unwrap();
    context
        .perform_file_access_check(temp_dir.path(), ["idle.bin"], AccessMode::Read)
        .unwrap();
}

#[cfg(unix)]
#[test]
fn access_check_reports_contended_files() {
    use rustix::fs::flock;
    use rustix::fs::FlockOperation;

    let temp_dir = new_temp_dir();
    let busy_path = temp_dir.path().join("busy.bin");
    fs::write(&busy_path, b"held").unwrap();
    fs::write(temp_dir.path().join("free.bin"), b"free").unwrap();

    // Hold an exclusive advisory lock on a separate descriptor for the
    // duration of the probe.
    let holder = fs::File::open(&busy_path).unwrap();
    flock(&holder, FlockOperation::NonBlockingLockExclusive).unwrap();

    let context = IoContext::init();
    let error = context
        .perform_file_access_check(
            temp_dir.path(),
            ["busy.bin", "free.bin"],
            AccessMode::Write,
        )
        .unwrap_err();
    assert_eq!(error.errors.len(), 1);
    assert_eq!(
        error.errors[0].to_string(),
        "File 'busy.bin' is being written by another process"
    );

    flock(&holder, FlockOperation::Unlock).unwrap();
    context
        .perform_file_access_check(temp_dir.path(), ["busy.bin"], AccessMode::Write)
        .unwrap();
}

#[test]
fn mount_table_is_queryable() {
    let context = IoContext::init();
    // The table itself is platform-dependent; the lookup contract is not:
    // any absolute path resolves to at most one mount, and nested paths
    // resolve to the same or a deeper mount than their ancestors.
    let temp_dir = new_temp_dir();
    let shallow = context.mount_for(temp_dir.path());
    let deep = context.mount_for(&temp_dir.path().join("a/b/c"));
    match (shallow, deep) {
        (Some(shallow), Some(deep)) => {
            assert!(deep.path.starts_with(&shallow.path) || shallow.path == deep.path);
        }
        (None, None) => {}
        other => panic!("inconsistent mount lookup: {other:?}"),
    }
}
