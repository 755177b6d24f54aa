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

//! Shared plumbing of the `snow` commands.

use snowfs_lib::path_util;
use snowfs_lib::refs::Head;
use snowfs_lib::repository::RepoError;
use snowfs_lib::repository::Repository;
use tracing_subscriber::EnvFilter;

/// Filter environment variable for engine logging.
pub const LOG_ENV_VAR: &str = "SNOW_LOG";

/// Set to `true` to suppress the startup banner.
pub const SUPPRESS_BANNER_ENV_VAR: &str = "SUPPRESS_BANNER";

pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Prints the one-line banner to stderr, so machine-readable stdout stays
/// clean.
pub fn print_banner() {
    let suppressed = std::env::var(SUPPRESS_BANNER_ENV_VAR)
        .map(|value| value == "true")
        .unwrap_or(false);
    if !suppressed {
        eprintln!(
            "SnowFS {} - snapshots for large binary assets",
            env!("CARGO_PKG_VERSION")
        );
    }
}

/// Opens the repository containing the current directory.
pub fn open_cwd_repo() -> Result<Repository, RepoError> {
    let cwd = std::env::current_dir().map_err(|error| {
        RepoError::InvalidArgument(format!("cannot determine current directory: {error}"))
    })?;
    let repo = Repository::open(&cwd)?;
    tracing::debug!(workdir = %repo.workdir().display(), "opened repository");
    Ok(repo)
}

/// Maps a user-supplied path (relative to the current directory) to a
/// workdir-relative engine path.
pub fn workdir_relative(repo: &Repository, user_path: &str) -> Result<String, RepoError> {
    path_util::ensure_valid(user_path)
        .map_err(|error| RepoError::InvalidArgument(error.to_string()))?;
    let cwd = std::env::current_dir().map_err(|error| {
        RepoError::InvalidArgument(format!("cannot determine current directory: {error}"))
    })?;
    let absolute = if path_util::is_absolute(user_path) {
        path_util::normalize(user_path)
    } else {
        path_util::join(&[&path_util::to_unix_string(&cwd), user_path])
    };
    let workdir = path_util::to_unix_string(repo.workdir());
    let relative = path_util::relative(&workdir, &absolute);
    if relative.starts_with("..") {
        return Err(RepoError::InvalidArgument(format!(
            "path '{user_path}' is outside the repository"
        )));
    }
    Ok(relative)
}

/// A short human label for where `HEAD` currently points.
pub fn head_label(repo: &Repository) -> String {
    match repo.head() {
        Head::Attached(branch) => branch.clone(),
        Head::Detached(hash) => format!("detached at {}", short_hash(hash)),
    }
}

pub fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}

/// Formats a commit date for human output.
pub fn format_date(millis: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis)
        .map(|date| date.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| millis.to_string())
}

/// Pretty-prints a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}
