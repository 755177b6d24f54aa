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

use snowfs_lib::path_util;
use snowfs_lib::repository::RepoError;

use crate::cli_util;

/// Stage files for the next commit
#[derive(clap::Args, Debug)]
pub struct AddArgs {
    /// Paths to stage
    #[arg(required = true)]
    paths: Vec<String>,
}

pub fn run(args: &AddArgs) -> Result<(), RepoError> {
    let mut repo = cli_util::open_cwd_repo()?;
    let mut rel_paths = Vec::new();
    for path in &args.paths {
        let rel_path = cli_util::workdir_relative(&repo, path)?;
        let abs_path = path_util::to_os_path(repo.workdir(), &rel_path);
        if !abs_path.is_file() {
            return Err(RepoError::NotFound(format!("no such file: '{path}'")));
        }
        rel_paths.push(rel_path);
    }
    repo.add_files(rel_paths.iter().map(String::as_str))?;
    for rel_path in &rel_paths {
        println!("add '{rel_path}'");
    }
    Ok(())
}
