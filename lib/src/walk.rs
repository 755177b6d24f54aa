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

//! Workdir enumeration with filter flags.
//!
//! The walker tolerates concurrent mutation of the tree it traverses:
//! entries that vanish mid-walk are skipped, transient errors are retried
//! once, and whatever remains observable is yielded.

use std::fs;
use std::io;
use std::ops::BitOr;
use std::path::Path;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::path_util;

/// Basenames skipped unconditionally.
const ALWAYS_SKIPPED: &[&str] = &[".DS_Store", "thumbs.db"];

/// Repository markers pruned unless `BROWSE_REPOS` is set.
const REPO_MARKERS: &[&str] = &[".snow", ".git"];

const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Walk filter flags, OR-able.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalkFlags(u32);

impl WalkFlags {
    /// Yield directory entries.
    pub const DIRS: WalkFlags = WalkFlags(1 << 0);
    /// Yield file entries.
    pub const FILES: WalkFlags = WalkFlags(1 << 1);
    /// Include entries whose basename starts with `.`.
    pub const HIDDEN: WalkFlags = WalkFlags(1 << 2);
    /// Descend into `.snow` and `.git` subtrees.
    pub const BROWSE_REPOS: WalkFlags = WalkFlags(1 << 3);

    pub fn contains(self, other: WalkFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for WalkFlags {
    type Output = WalkFlags;

    fn bitor(self, rhs: WalkFlags) -> WalkFlags {
        WalkFlags(self.0 | rhs.0)
    }
}

/// One observed entry of the walked subtree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkEntry {
    pub abs_path: PathBuf,
    /// Path relative to the walk root, forward-slash form.
    pub rel_path: String,
    pub is_dir: bool,
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::ResourceBusy
    )
}

fn read_dir_tolerant(dir: &Path) -> io::Result<Option<fs::ReadDir>> {
    match fs::read_dir(dir) {
        Ok(entries) => Ok(Some(entries)),
        // Renamed or removed mid-walk: yield nothing for this subtree.
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) if is_transient(&error) => {
            thread::sleep(RETRY_BACKOFF);
            match fs::read_dir(dir) {
                Ok(entries) => Ok(Some(entries)),
                Err(retry_error) if retry_error.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(retry_error) => Err(retry_error),
            }
        }
        Err(error) => Err(error),
    }
}

/// Enumerates the subtree under `root`.
///
/// A missing root is an error; anything disappearing below it afterwards is
/// not. Entries are yielded in deterministic order (sorted per directory).
pub fn walk(root: &Path, flags: WalkFlags) -> Result<Vec<WalkEntry>, PathError> {
    root.metadata().context(root)?;
    let mut out = Vec::new();
    let mut pending: Vec<(PathBuf, String)> = vec![(root.to_path_buf(), String::new())];
    while let Some((dir, rel_prefix)) = pending.pop() {
        let Some(entries) = read_dir_tolerant(&dir).context(&dir)? else {
            continue;
        };
        let mut observed: Vec<(String, PathBuf, bool)> = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    debug!(dir = %dir.display(), %error, "skipping unreadable directory entry");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            // A vanished entry has no file type; skip it.
            let Ok(file_type) = entry.file_type() else {
                debug!(dir = %dir.display(), name, "entry vanished mid-walk");
                continue;
            };
            observed.push((name, entry.path(), file_type.is_dir()));
        }
        observed.sort_by(|(a, _, _), (b, _, _)| a.cmp(b));

        for (name, abs_path, is_dir) in observed {
            if ALWAYS_SKIPPED
                .iter()
                .any(|skip| name.eq_ignore_ascii_case(skip))
            {
                continue;
            }
            if !flags.contains(WalkFlags::BROWSE_REPOS) && REPO_MARKERS.contains(&name.as_str()) {
                continue;
            }
            if !flags.contains(WalkFlags::HIDDEN) && name.starts_with('.') {
                continue;
            }
            let rel_path = if rel_prefix.is_empty() {
                name.clone()
            } else {
                path_util::join(&[&rel_prefix, &name])
            };
            if is_dir {
                if flags.contains(WalkFlags::DIRS) {
                    out.push(WalkEntry {
                        abs_path: abs_path.clone(),
                        rel_path: rel_path.clone(),
                        is_dir: true,
                    });
                }
                pending.push((abs_path, rel_path));
            } else if flags.contains(WalkFlags::FILES) {
                out.push(WalkEntry {
                    abs_path,
                    rel_path,
                    is_dir: false,
                });
            }
        }
    }
    Ok(out)
}
