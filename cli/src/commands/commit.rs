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

use indexmap::IndexMap;
use snowfs_lib::hash::HashOptions;
use snowfs_lib::repository::CommitOptions;
use snowfs_lib::repository::RepoError;

use crate::cli_util;

/// Create a commit from the staged changes
#[derive(clap::Args, Debug)]
pub struct CommitArgs {
    /// Commit message
    #[arg(short, long)]
    message: String,
    /// Allow a commit with nothing staged
    #[arg(long)]
    allow_empty: bool,
    /// Tag the commit
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<String>,
    /// Attach key=value user data
    #[arg(long = "user-data", value_name = "K=V")]
    user_data: Vec<String>,
}

fn parse_user_data(pairs: &[String]) -> Result<IndexMap<String, serde_json::Value>, RepoError> {
    let mut user_data = IndexMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(RepoError::InvalidArgument(format!(
                "invalid user-data '{pair}', expected key=value"
            )));
        };
        user_data.insert(
            key.to_string(),
            serde_json::Value::String(value.to_string()),
        );
    }
    Ok(user_data)
}

pub fn run(args: &CommitArgs) -> Result<(), RepoError> {
    let mut repo = cli_util::open_cwd_repo()?;
    let options = CommitOptions {
        tags: args.tags.clone(),
        user_data: parse_user_data(&args.user_data)?,
        allow_empty: args.allow_empty,
    };
    let commit = repo.commit(&args.message, &options, &HashOptions::default())?;
    let hash = commit.hash.clone();
    let message = commit.message.clone();
    println!(
        "[{} {}] {message}",
        cli_util::head_label(&repo),
        cli_util::short_hash(&hash)
    );
    Ok(())
}
