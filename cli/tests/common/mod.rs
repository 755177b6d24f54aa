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

use std::path::Path;
use std::path::PathBuf;

use assert_cmd::assert::Assert;
use assert_cmd::Command;
use tempfile::TempDir;

/// Decodes a finished command's stderr for substring assertions.
pub fn stderr_of(assert: &Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stderr).into_owned()
}

/// Decodes a finished command's stdout for substring assertions.
pub fn stdout_of(assert: &Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stdout).into_owned()
}

/// A scratch environment for driving the `snow` binary.
pub struct TestEnvironment {
    temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: testutils::new_temp_dir(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn repo_path(&self) -> PathBuf {
        self.temp_dir.path().join("repo")
    }

    /// A `snow` invocation with the banner suppressed, running in `dir`.
    pub fn snow_in(&self, dir: &Path, args: &[&str]) -> Command {
        let mut command = Command::cargo_bin("snow").unwrap();
        command
            .current_dir(dir)
            .env("SUPPRESS_BANNER", "true")
            .args(args);
        command
    }

    /// Creates a repository under `repo/` and returns its path.
    pub fn init_repo(&self) -> PathBuf {
        self.snow_in(self.root(), &["init", "repo"])
            .assert()
            .success();
        self.repo_path()
    }

    pub fn write_file(&self, repo: &Path, rel_path: &str, contents: &[u8]) {
        let path = repo.join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    /// Runs add + commit for the given paths.
    pub fn commit_files(&self, repo: &Path, paths: &[&str], message: &str) {
        let mut args = vec!["add"];
        args.extend_from_slice(paths);
        self.snow_in(repo, &args).assert().success();
        self.snow_in(repo, &["commit", "-m", message])
            .assert()
            .success();
    }

    /// Parses stdout of a successful command as JSON.
    pub fn json_output(&self, repo: &Path, args: &[&str]) -> serde_json::Value {
        let output = self.snow_in(repo, args).assert().success();
        serde_json::from_slice(&output.get_output().stdout).unwrap()
    }
}
