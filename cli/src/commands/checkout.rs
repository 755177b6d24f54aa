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

use snowfs_lib::hash::HashOptions;
use snowfs_lib::repository::RepoError;
use snowfs_lib::repository::ResetMode;

use crate::cli_util;

/// Switch the workdir to another snapshot
#[derive(clap::Args, Debug)]
pub struct CheckoutArgs {
    /// Reference name or commit hash (suffix `~<n>` walks parents)
    target: String,
    /// Detach HEAD even when the target is a branch
    #[arg(long)]
    detach: bool,
    /// Discard local modifications to tracked files
    #[arg(long)]
    discard: bool,
    /// Restore files deleted locally
    #[arg(long)]
    restore_deleted: bool,
    /// Delete untracked files
    #[arg(long)]
    delete_new: bool,
}

pub fn run(args: &CheckoutArgs) -> Result<(), RepoError> {
    let mut repo = cli_util::open_cwd_repo()?;
    let mut reset = ResetMode::DEFAULT;
    if args.detach {
        reset = reset | ResetMode::DETACH;
    }
    if args.discard {
        reset = reset | ResetMode::DISCARD_CHANGES;
    }
    if args.restore_deleted {
        reset = reset | ResetMode::RESTORE_DELETED_FILES;
    }
    if args.delete_new {
        reset = reset | ResetMode::DELETE_NEW_FILES;
    }
    repo.checkout(&args.target, reset, &HashOptions::default())?;
    match repo.head() {
        snowfs_lib::refs::Head::Attached(branch) => {
            println!("Switched to branch '{branch}'");
        }
        snowfs_lib::refs::Head::Detached(hash) => {
            println!("HEAD is now at {}", cli_util::short_hash(hash));
        }
    }
    Ok(())
}
