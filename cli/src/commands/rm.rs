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

use snowfs_lib::repository::RepoError;

use crate::cli_util;

/// Stage files for deletion
#[derive(clap::Args, Debug)]
pub struct RmArgs {
    /// Paths to stage for deletion
    #[arg(required = true)]
    paths: Vec<String>,
}

pub fn run(args: &RmArgs) -> Result<(), RepoError> {
    let mut repo = cli_util::open_cwd_repo()?;
    let mut rel_paths = Vec::new();
    for path in &args.paths {
        let rel_path = cli_util::workdir_relative(&repo, path)?;
        if repo.head_commit()?.root.find(&rel_path).is_none() {
            return Err(RepoError::NotFound(format!(
                "'{path}' is not tracked by the current snapshot"
            )));
        }
        rel_paths.push(rel_path);
    }
    repo.delete_files(rel_paths.iter().map(String::as_str))?;
    for rel_path in &rel_paths {
        println!("rm '{rel_path}'");
    }
    Ok(())
}
