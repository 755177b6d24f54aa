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
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use rand::RngCore as _;
use snowfs_lib::hash;
use snowfs_lib::hash::Fingerprint;
use snowfs_lib::hash::HashOptions;
use snowfs_lib::path_util;
use snowfs_lib::repository::CommitOptions;
use snowfs_lib::repository::InitOptions;
use snowfs_lib::repository::Repository;
use snowfs_lib::tree;
use snowfs_lib::tree::TreeEntry;
use tempfile::TempDir;

pub mod proptest;

pub fn new_temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("snowfs-test-")
        .tempdir()
        .unwrap()
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// A repository in a fresh temp dir. The temp dir lives as long as the
/// value.
pub struct TestRepo {
    _temp_dir: TempDir,
    pub repo: Repository,
}

impl TestRepo {
    pub fn init() -> Self {
        Self::init_with_options(&InitOptions::default())
    }

    pub fn init_with_options(options: &InitOptions) -> Self {
        let temp_dir = new_temp_dir();
        let repo = Repository::init_ext(&temp_dir.path().join("repo"), options).unwrap();
        Self {
            _temp_dir: temp_dir,
            repo,
        }
    }

    pub fn workdir(&self) -> &Path {
        self.repo.workdir()
    }

    /// Root of the temp dir, for placing things next to the repo.
    pub fn env_root(&self) -> PathBuf {
        self._temp_dir.path().to_path_buf()
    }

    pub fn write_file(&self, rel_path: &str, contents: &[u8]) {
        write_workdir_file(self.repo.workdir(), rel_path, contents);
    }

    pub fn delete_file(&self, rel_path: &str) {
        fs::remove_file(path_util::to_os_path(self.repo.workdir(), rel_path)).unwrap();
    }

    /// Stages `rel_paths` and commits them, returning the commit hash.
    pub fn commit_files(&mut self, rel_paths: &[&str], message: &str) -> String {
        self.repo.add_files(rel_paths.iter().copied()).unwrap();
        self.repo
            .commit(message, &CommitOptions::default(), &HashOptions::default())
            .unwrap()
            .hash
            .clone()
    }

    /// Stages deletions and commits them, returning the commit hash.
    pub fn commit_deletions(&mut self, rel_paths: &[&str], message: &str) -> String {
        self.repo.delete_files(rel_paths.iter().copied()).unwrap();
        self.repo
            .commit(message, &CommitOptions::default(), &HashOptions::default())
            .unwrap()
            .hash
            .clone()
    }
}

pub fn write_workdir_file(workdir: &Path, rel_path: &str, contents: &[u8]) {
    let path = path_util::to_os_path(workdir, rel_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .unwrap();
    file.write_all(contents).unwrap();
}

/// Builds the tree of a workdir with every file hashed, and returns the
/// aggregate root fingerprint. This is the reference computation checkout
/// restoration is verified against.
pub fn hash_workdir_tree(workdir: &Path) -> Fingerprint {
    let mut root = tree::construct_tree(workdir).unwrap();
    hash_tree_files(workdir, &mut root);
    root.rehash().unwrap()
}

fn hash_tree_files(workdir: &Path, dir: &mut snowfs_lib::tree::TreeDir) {
    for child in &mut dir.children {
        match child {
            TreeEntry::File(file) => {
                let abs_path = path_util::to_os_path(workdir, &file.path);
                file.hash = Some(
                    hash::hash_file(&abs_path, &HashOptions::default())
                        .unwrap()
                        .hash,
                );
            }
            TreeEntry::Dir(subdir) => hash_tree_files(workdir, subdir),
        }
    }
}
