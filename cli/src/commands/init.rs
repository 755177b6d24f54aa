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

use std::path::PathBuf;

use snowfs_lib::repository::InitOptions;
use snowfs_lib::repository::RepoError;
use snowfs_lib::repository::Repository;

/// Create a new repository
#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Directory to create and track
    path: PathBuf,
    /// Store repository metadata outside the workdir
    #[arg(long)]
    commondir: Option<PathBuf>,
    /// Name of the initial branch
    #[arg(long)]
    default_branch_name: Option<String>,
}

pub fn run(args: &InitArgs) -> Result<(), RepoError> {
    let options = InitOptions {
        commondir: args.commondir.clone(),
        default_branch_name: args.default_branch_name.clone(),
    };
    let repo = Repository::init_ext(&args.path, &options)?;
    println!(
        "Initialized empty SnowFS repository in {}",
        repo.workdir().display()
    );
    Ok(())
}
