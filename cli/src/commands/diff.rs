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

use snowfs_lib::status::Diff;
use snowfs_lib::status::DiffEntry;

use crate::cli_util;
use crate::commands::status::OutputFormat;

/// Compare two snapshots
#[derive(clap::Args, Debug)]
pub struct DiffArgs {
    /// The older snapshot (reference or hash)
    old: String,
    /// The newer snapshot (reference or hash)
    new: String,
    /// Machine-readable output
    #[arg(long, value_enum)]
    output: Option<OutputFormat>,
}

fn entry_json(entry: &DiffEntry) -> serde_json::Value {
    serde_json::json!({
        "path": entry.path,
        "hash": entry.hash.map(|hash| hash.hex()),
        "size": entry.size,
        "isdir": entry.is_dir,
    })
}

pub fn run(args: &DiffArgs) -> Result<(), snowfs_lib::repository::RepoError> {
    let repo = cli_util::open_cwd_repo()?;
    let old = repo.find_commit_by_hash(&args.old)?;
    let new = repo.find_commit_by_hash(&args.new)?;
    let diff = Diff::new(&new.root, &old.root, false);

    if args.output == Some(OutputFormat::Json) {
        cli_util::print_json(&serde_json::json!({
            "added": diff.added().map(entry_json).collect::<Vec<_>>(),
            "modified": diff.modified().map(entry_json).collect::<Vec<_>>(),
            "deleted": diff.deleted().map(entry_json).collect::<Vec<_>>(),
            "nonModified": diff.non_modified().map(entry_json).collect::<Vec<_>>(),
        }));
        return Ok(());
    }

    for entry in diff.added() {
        println!("A  {}", entry.path);
    }
    for entry in diff.modified() {
        println!("M  {}", entry.path);
    }
    for entry in diff.deleted() {
        println!("D  {}", entry.path);
    }
    Ok(())
}
