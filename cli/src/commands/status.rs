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
use snowfs_lib::status::Filter;

use crate::cli_util;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Json,
}

/// Show the workdir state versus the current snapshot
#[derive(clap::Args, Debug)]
pub struct StatusArgs {
    /// Machine-readable output
    #[arg(long, value_enum)]
    output: Option<OutputFormat>,
    /// Include unmodified entries and directories
    #[arg(long)]
    all: bool,
    /// Include ignored entries
    #[arg(long)]
    ignored: bool,
}

pub fn run(args: &StatusArgs) -> Result<(), snowfs_lib::repository::RepoError> {
    let repo = cli_util::open_cwd_repo()?;
    let mut filter = if args.all {
        Filter::ALL
    } else {
        Filter::DEFAULT
    };
    if args.ignored {
        filter = filter | Filter::INCLUDE_IGNORED;
    }
    let entries = repo.get_status(filter, &HashOptions::default())?;

    if args.output == Some(OutputFormat::Json) {
        let json: Vec<serde_json::Value> = entries
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "path": entry.path,
                    "isdir": entry.is_dir,
                    "status": entry.status.label(),
                    "size": entry.size,
                })
            })
            .collect();
        cli_util::print_json(&serde_json::Value::Array(json));
        return Ok(());
    }

    println!("On {}", cli_util::head_label(&repo));
    if entries.is_empty() {
        println!("nothing to commit, working directory clean");
        return Ok(());
    }
    for entry in &entries {
        let suffix = if entry.is_dir { "/" } else { "" };
        println!("  {:>10}: {}{suffix}", entry.status.label(), entry.path);
    }
    Ok(())
}
