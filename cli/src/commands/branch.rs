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

use snowfs_lib::refs::Head;
use snowfs_lib::refs::RefType;
use snowfs_lib::repository::RepoError;

use crate::cli_util;

/// Create, delete or list branches
#[derive(clap::Args, Debug)]
pub struct BranchArgs {
    /// Branch to create; lists branches when omitted
    name: Option<String>,
    /// Commit to start the branch at (defaults to HEAD)
    start: Option<String>,
    /// Delete the named branch
    #[arg(short = 'd', long = "delete", value_name = "NAME")]
    delete: Option<String>,
}

pub fn run(args: &BranchArgs) -> Result<(), RepoError> {
    let mut repo = cli_util::open_cwd_repo()?;

    if let Some(name) = &args.delete {
        repo.delete_reference(name)?;
        println!("Deleted branch '{name}'");
        return Ok(());
    }

    let Some(name) = &args.name else {
        let current = match repo.head() {
            Head::Attached(branch) => Some(branch.clone()),
            Head::Detached(_) => None,
        };
        for reference in repo.references() {
            if reference.ref_type == RefType::Branch {
                let marker = if Some(&reference.name) == current.as_ref() {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {} {}",
                    reference.name,
                    cli_util::short_hash(&reference.target)
                );
            }
        }
        return Ok(());
    };

    let start_spec = args.start.as_deref().unwrap_or("HEAD");
    let start_hash = repo.find_commit_by_hash(start_spec)?.hash.clone();
    repo.create_new_reference(RefType::Branch, name, &start_hash)?;
    println!(
        "Created branch '{name}' at {}",
        cli_util::short_hash(&start_hash)
    );
    Ok(())
}
