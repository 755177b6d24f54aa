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

use snowfs_lib::repository::CommitOrder;

use crate::cli_util;
use crate::commands::status::OutputFormat;

/// Print the commit graph, newest first
#[derive(clap::Args, Debug)]
pub struct LogArgs {
    /// Machine-readable output
    #[arg(long, value_enum)]
    output: Option<OutputFormat>,
    /// Include tags, user data and snapshot sizes
    #[arg(short, long)]
    verbose: bool,
}

pub fn run(args: &LogArgs) -> Result<(), snowfs_lib::repository::RepoError> {
    let repo = cli_util::open_cwd_repo()?;
    let commits = repo.get_all_commits(CommitOrder::NewestFirst);

    if args.output == Some(OutputFormat::Json) {
        let json: Vec<serde_json::Value> = commits
            .iter()
            .map(|commit| {
                serde_json::json!({
                    "hash": commit.hash,
                    "parents": commit.parents,
                    "date": commit.date.0,
                    "message": commit.message,
                    "tags": commit.tags,
                    "userData": commit.user_data,
                })
            })
            .collect();
        cli_util::print_json(&serde_json::Value::Array(json));
        return Ok(());
    }

    let head_hash = repo.head_commit()?.hash.clone();
    for commit in commits {
        let marker = if commit.hash == head_hash { " (HEAD)" } else { "" };
        println!("commit {}{marker}", commit.hash);
        println!("Date:   {}", cli_util::format_date(commit.date.0));
        if args.verbose {
            if !commit.tags.is_empty() {
                println!("Tags:   {}", commit.tags.join(", "));
            }
            for (key, value) in &commit.user_data {
                println!("Data:   {key}={value}");
            }
            println!("Size:   {} bytes", commit.root.stats.size);
        }
        println!();
        for line in commit.message.lines() {
            println!("    {line}");
        }
        println!();
    }
    Ok(())
}
