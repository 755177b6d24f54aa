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

//! Status and diff primitives.
//!
//! `Diff` partitions two snapshot trees by path: present in the new root
//! only is added, in the old root only is deleted, in both with differing
//! hashes is modified, otherwise non-modified. Status entries carry a
//! bitfield so one entry can describe the workdir state of a path.

use std::collections::BTreeMap;
use std::ops::BitOr;

use crate::hash::Fingerprint;
use crate::tree::path_cmp;
use crate::tree::TreeDir;
use crate::tree::TreeEntry;

/// Per-entry status bitfield.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Status(u32);

impl Status {
    pub const WT_NEW: Status = Status(1 << 0);
    pub const WT_MODIFIED: Status = Status(1 << 1);
    pub const WT_DELETED: Status = Status(1 << 2);
    pub const WT_UNMODIFIED: Status = Status(1 << 3);
    pub const IGNORED: Status = Status(1 << 4);

    pub fn contains(self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    /// Stable label used by the JSON output schema.
    pub fn label(self) -> &'static str {
        if self.contains(Status::IGNORED) {
            "ignored"
        } else if self.contains(Status::WT_NEW) {
            "new"
        } else if self.contains(Status::WT_MODIFIED) {
            "modified"
        } else if self.contains(Status::WT_DELETED) {
            "deleted"
        } else {
            "unmodified"
        }
    }
}

impl BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        Status(self.0 | rhs.0)
    }
}

/// Filter flags for `Repository::get_status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Filter(u32);

impl Filter {
    pub const INCLUDE_UNTRACKED: Filter = Filter(1 << 0);
    pub const INCLUDE_MODIFIED: Filter = Filter(1 << 1);
    pub const INCLUDE_DELETED: Filter = Filter(1 << 2);
    pub const INCLUDE_UNMODIFIED: Filter = Filter(1 << 3);
    pub const INCLUDE_IGNORED: Filter = Filter(1 << 4);
    pub const INCLUDE_DIRECTORIES: Filter = Filter(1 << 5);
    pub const SORT_CASE_SENSITIVELY: Filter = Filter(1 << 6);

    /// Untracked + modified + deleted; no ignored, no unmodified.
    pub const DEFAULT: Filter = Filter(
        Filter::INCLUDE_UNTRACKED.0 | Filter::INCLUDE_MODIFIED.0 | Filter::INCLUDE_DELETED.0,
    );

    /// Everything.
    pub const ALL: Filter = Filter(
        Filter::DEFAULT.0
            | Filter::INCLUDE_UNMODIFIED.0
            | Filter::INCLUDE_IGNORED.0
            | Filter::INCLUDE_DIRECTORIES.0,
    );

    pub fn contains(self, other: Filter) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Filter {
    type Output = Filter;

    fn bitor(self, rhs: Filter) -> Filter {
        Filter(self.0 | rhs.0)
    }
}

/// One entry of a status report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    pub status: Status,
    pub is_dir: bool,
    pub size: u64,
}

/// Sorts deterministically: byte-lexicographic under the case-sensitive
/// flag, otherwise case-insensitive (locale-independent) with parents
/// preceding their children.
pub fn sort_entries(entries: &mut [StatusEntry], case_sensitive: bool) {
    if case_sensitive {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
    } else {
        entries.sort_by(|a, b| {
            path_cmp(&a.path.to_lowercase(), &b.path.to_lowercase())
                .then_with(|| a.path.cmp(&b.path))
        });
    }
}

/// One entry of a snapshot diff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    pub path: String,
    pub hash: Option<Fingerprint>,
    pub size: u64,
    pub is_dir: bool,
}

impl DiffEntry {
    fn from_tree_entry(entry: &TreeEntry) -> Self {
        Self {
            path: entry.path().to_string(),
            hash: entry.hash().copied(),
            size: entry.size(),
            is_dir: entry.is_dir(),
        }
    }
}

/// Partition of two snapshot roots. The sequences are deterministic and
/// sorted with the path-aware comparator.
#[derive(Clone, Debug, Default)]
pub struct Diff {
    added: Vec<DiffEntry>,
    modified: Vec<DiffEntry>,
    non_modified: Vec<DiffEntry>,
    deleted: Vec<DiffEntry>,
}

impl Diff {
    /// Diffs `new_root` against `old_root`. With `include_dirs`, directory
    /// entries participate, and a directory counts as modified iff its
    /// aggregate hash differs.
    pub fn new(new_root: &TreeDir, old_root: &TreeDir, include_dirs: bool) -> Self {
        let new_entries = index_entries(new_root, include_dirs);
        let old_entries = index_entries(old_root, include_dirs);
        let mut diff = Diff::default();
        for (path, new_entry) in &new_entries {
            match old_entries.get(path) {
                None => diff.added.push(DiffEntry::from_tree_entry(new_entry)),
                Some(old_entry) => {
                    if new_entry.hash() == old_entry.hash() {
                        diff.non_modified
                            .push(DiffEntry::from_tree_entry(new_entry));
                    } else {
                        diff.modified.push(DiffEntry::from_tree_entry(new_entry));
                    }
                }
            }
        }
        for (path, old_entry) in &old_entries {
            if !new_entries.contains_key(path) {
                diff.deleted.push(DiffEntry::from_tree_entry(old_entry));
            }
        }
        for bucket in [
            &mut diff.added,
            &mut diff.modified,
            &mut diff.non_modified,
            &mut diff.deleted,
        ] {
            bucket.sort_by(|a, b| path_cmp(&a.path, &b.path));
        }
        diff
    }

    pub fn added(&self) -> impl Iterator<Item = &DiffEntry> {
        self.added.iter()
    }

    pub fn modified(&self) -> impl Iterator<Item = &DiffEntry> {
        self.modified.iter()
    }

    pub fn non_modified(&self) -> impl Iterator<Item = &DiffEntry> {
        self.non_modified.iter()
    }

    pub fn deleted(&self) -> impl Iterator<Item = &DiffEntry> {
        self.deleted.iter()
    }
}

fn index_entries<'a>(root: &'a TreeDir, include_dirs: bool) -> BTreeMap<String, &'a TreeEntry> {
    let mut out: BTreeMap<String, &'a TreeEntry> = BTreeMap::new();
    collect_entries(&root.children, include_dirs, &mut out);
    out
}

fn collect_entries<'a>(
    children: &'a [TreeEntry],
    include_dirs: bool,
    out: &mut BTreeMap<String, &'a TreeEntry>,
) {
    for child in children {
        match child {
            TreeEntry::Dir(dir) => {
                if include_dirs {
                    out.insert(dir.path.clone(), child);
                }
                collect_entries(&dir.children, include_dirs, out);
            }
            TreeEntry::File(file) => {
                out.insert(file.path.clone(), child);
            }
        }
    }
}
