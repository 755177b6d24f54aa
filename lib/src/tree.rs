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

//! The in-memory snapshot tree.
//!
//! A [`TreeDir`] exclusively owns its children; parent linkage is derived
//! from the entry path, so deep cloning is a plain `Clone` and hashing never
//! follows a back-edge. A directory's hash is the SHA-256 of its children's
//! hash hex strings concatenated after sorting children with the path-aware
//! comparator, which makes the root hash a stable function of the file set
//! regardless of insertion order.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::fs::Metadata;
use std::path::Path;
use std::time::UNIX_EPOCH;

use once_cell::sync::Lazy;
use sha2::Digest as _;
use sha2::Sha256;
use thiserror::Error;

use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::hash;
use crate::hash::Fingerprint;
use crate::hash::HashError;
use crate::hash::HashOptions;
use crate::path_util;

/// Extensions treated as text for the DEFAULT modification-detection mode.
pub static TEXT_FILE_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        ".txt", ".html", ".htm", ".css", ".js", ".jsx", ".ts", ".less", ".scss", ".wasm", ".php",
        ".c", ".cc", ".cpp", ".cxx", ".h", ".hh", ".hpp", ".cs", ".clj", ".class", ".el", ".go",
        ".java", ".lua", ".m", ".m4", ".pl", ".po", ".py", ".rb", ".rs", ".sh", ".swift", ".vb",
        ".vcxproj", ".xcodeproj", ".xml", ".plist", ".diff", ".patch",
    ]
    .into_iter()
    .collect()
});

/// Milliseconds since the Unix epoch.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct MillisSinceEpoch(pub i64);

impl MillisSinceEpoch {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    fn from_system_time(time: std::time::SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(duration) => Self(duration.as_millis() as i64),
            Err(before_epoch) => Self(-(before_epoch.duration().as_millis() as i64)),
        }
    }
}

/// The stats subset retained per workdir entry, millisecond resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileStats {
    pub size: u64,
    pub ctime: MillisSinceEpoch,
    pub mtime: MillisSinceEpoch,
    #[serde(default)]
    pub birthtime: MillisSinceEpoch,
}

impl FileStats {
    pub fn zeroed() -> Self {
        Self::default()
    }

    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime = metadata
            .modified()
            .map(MillisSinceEpoch::from_system_time)
            .unwrap_or_default();
        #[cfg(unix)]
        let ctime = {
            use std::os::unix::fs::MetadataExt as _;
            MillisSinceEpoch(metadata.ctime() * 1000 + metadata.ctime_nsec() / 1_000_000)
        };
        #[cfg(not(unix))]
        let ctime = mtime;
        let birthtime = metadata
            .created()
            .map(MillisSinceEpoch::from_system_time)
            .unwrap_or(mtime);
        Self {
            size: metadata.len(),
            ctime,
            mtime,
            birthtime,
        }
    }
}

/// Compares paths segment-wise, so `foo` sorts relative to `foo/bar` by
/// prefix rather than by the raw byte value of `/`.
pub fn path_cmp(a: &str, b: &str) -> Ordering {
    a.split('/').cmp(b.split('/'))
}

mod optional_hash {
    use serde::Deserialize as _;

    use super::Fingerprint;

    pub fn serialize<S: serde::Serializer>(
        hash: &Option<Fingerprint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match hash {
            Some(fingerprint) => serializer.serialize_str(&fingerprint.hex()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Fingerprint>, D::Error> {
        let hex_str = String::deserialize(deserializer)?;
        if hex_str.is_empty() {
            return Ok(None);
        }
        hex_str.parse().map(Some).map_err(serde::de::Error::custom)
    }
}

/// A file entry. `hash` stays unset until the body has been materialised
/// into the object database.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TreeFile {
    #[serde(with = "optional_hash")]
    pub hash: Option<Fingerprint>,
    pub path: String,
    pub ext: String,
    pub stats: FileStats,
}

/// A directory entry owning its children.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TreeDir {
    #[serde(with = "optional_hash")]
    pub hash: Option<Fingerprint>,
    pub path: String,
    pub stats: FileStats,
    pub children: Vec<TreeEntry>,
}

/// Tagged tree node. The JSON form distinguishes the variants by shape:
/// directories carry `children`, files carry `ext`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum TreeEntry {
    Dir(TreeDir),
    File(TreeFile),
}

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("tree entry '{path}' has no fingerprint")]
    UnhashedFile { path: String },
}

impl TreeEntry {
    pub fn path(&self) -> &str {
        match self {
            TreeEntry::Dir(dir) => &dir.path,
            TreeEntry::File(file) => &file.path,
        }
    }

    pub fn hash(&self) -> Option<&Fingerprint> {
        match self {
            TreeEntry::Dir(dir) => dir.hash.as_ref(),
            TreeEntry::File(file) => file.hash.as_ref(),
        }
    }

    pub fn stats(&self) -> &FileStats {
        match self {
            TreeEntry::Dir(dir) => &dir.stats,
            TreeEntry::File(file) => &file.stats,
        }
    }

    pub fn size(&self) -> u64 {
        self.stats().size
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, TreeEntry::Dir(_))
    }

    /// Preorder traversal: the entry itself, then its children.
    pub fn walk(&self, callback: &mut dyn FnMut(&TreeEntry)) {
        callback(self);
        if let TreeEntry::Dir(dir) = self {
            for child in &dir.children {
                child.walk(callback);
            }
        }
    }
}

impl TreeFile {
    pub fn new(path: String, stats: FileStats) -> Self {
        let ext = path_util::extname(&path);
        Self {
            hash: None,
            path,
            ext,
            stats,
        }
    }
}

impl TreeDir {
    /// An empty root: empty path, zeroed stats, no hash yet.
    pub fn new_root() -> Self {
        Self {
            hash: None,
            path: String::new(),
            stats: FileStats::zeroed(),
            children: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Preorder traversal of the children (the directory itself excluded
    /// when it is the root).
    pub fn walk(&self, callback: &mut dyn FnMut(&TreeEntry)) {
        for child in &self.children {
            child.walk(callback);
        }
    }

    /// Linear search for the entry at `rel_path`.
    pub fn find(&self, rel_path: &str) -> Option<&TreeEntry> {
        let mut found: Option<&TreeEntry> = None;
        find_in(&self.children, rel_path, &mut found);
        found
    }

    /// All file entries, preorder.
    pub fn files(&self) -> Vec<&TreeFile> {
        let mut files = Vec::new();
        collect_files(&self.children, &mut files);
        files
    }

    /// Removes entries matching `predicate` at every depth. Recursion
    /// descends first, so removing an ancestor cannot shadow the removal of
    /// one of its children.
    pub fn remove(&mut self, predicate: &dyn Fn(&TreeEntry) -> bool) {
        for child in &mut self.children {
            if let TreeEntry::Dir(dir) = child {
                dir.remove(predicate);
            }
        }
        self.children.retain(|child| !predicate(child));
    }

    /// Returns the directory at `rel_path`, creating missing intermediate
    /// directories with zeroed stats.
    pub fn ensure_dir(&mut self, rel_path: &str) -> &mut TreeDir {
        if rel_path.is_empty() {
            return self;
        }
        let mut current = self;
        let mut prefix = String::new();
        for segment in rel_path.split('/') {
            let child_path = if prefix.is_empty() {
                segment.to_string()
            } else {
                format!("{prefix}/{segment}")
            };
            prefix = child_path.clone();
            let position = current
                .children
                .iter()
                .position(|child| child.path() == child_path);
            let index = match position {
                Some(index) => {
                    if !current.children[index].is_dir() {
                        current.children[index] = TreeEntry::Dir(TreeDir {
                            hash: None,
                            path: child_path.clone(),
                            stats: FileStats::zeroed(),
                            children: Vec::new(),
                        });
                    }
                    index
                }
                None => {
                    current.children.push(TreeEntry::Dir(TreeDir {
                        hash: None,
                        path: child_path.clone(),
                        stats: FileStats::zeroed(),
                        children: Vec::new(),
                    }));
                    current.children.len() - 1
                }
            };
            current = match &mut current.children[index] {
                TreeEntry::Dir(dir) => dir,
                TreeEntry::File(_) => unreachable!("just ensured a directory"),
            };
        }
        current
    }

    /// Inserts `entry` into this directory, replacing any same-path child.
    pub fn insert(&mut self, entry: TreeEntry) {
        match self
            .children
            .iter_mut()
            .find(|child| child.path() == entry.path())
        {
            Some(existing) => *existing = entry,
            None => self.children.push(entry),
        }
    }

    /// Recomputes aggregate hashes and sizes bottom-up and returns the
    /// directory's own hash. Children are sorted with the path-aware
    /// comparator first, which is what makes the result independent of
    /// insertion order.
    pub fn rehash(&mut self) -> Result<Fingerprint, TreeError> {
        self.children
            .sort_by(|a, b| path_cmp(a.path(), b.path()));
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        for child in &mut self.children {
            let child_hash = match child {
                TreeEntry::Dir(dir) => dir.rehash()?,
                TreeEntry::File(file) => file.hash.ok_or_else(|| TreeError::UnhashedFile {
                    path: file.path.clone(),
                })?,
            };
            hasher.update(child_hash.hex().as_bytes());
            size += child.size();
        }
        self.stats.size = size;
        let fingerprint = Fingerprint::from_bytes(hasher.finalize().into());
        self.hash = Some(fingerprint);
        Ok(fingerprint)
    }

    /// Set-merges `source` into a clone of `target` keyed by path.
    ///
    /// On conflict `target` wins, two directories merge recursively, and a
    /// file beats a directory from either side (the directory's subtree is
    /// discarded). `source` is never mutated; hashes and sizes of the result
    /// are recomputed bottom-up.
    pub fn merge(source: &TreeDir, target: &TreeDir) -> Result<TreeDir, TreeError> {
        let mut merged = target.clone();
        merge_into(source, &mut merged);
        merged.rehash()?;
        Ok(merged)
    }
}

fn find_in<'a>(children: &'a [TreeEntry], rel_path: &str, found: &mut Option<&'a TreeEntry>) {
    for child in children {
        if found.is_some() {
            return;
        }
        if child.path() == rel_path {
            *found = Some(child);
            return;
        }
        if let TreeEntry::Dir(dir) = child {
            find_in(&dir.children, rel_path, found);
        }
    }
}

fn collect_files<'a>(children: &'a [TreeEntry], out: &mut Vec<&'a TreeFile>) {
    for child in children {
        match child {
            TreeEntry::File(file) => out.push(file),
            TreeEntry::Dir(dir) => collect_files(&dir.children, out),
        }
    }
}

fn merge_into(source: &TreeDir, target: &mut TreeDir) {
    for source_child in &source.children {
        let existing = target
            .children
            .iter_mut()
            .find(|child| child.path() == source_child.path());
        match existing {
            None => target.children.push(source_child.clone()),
            Some(existing) => match source_child {
                TreeEntry::Dir(source_dir) => {
                    if let TreeEntry::Dir(target_dir) = existing {
                        merge_into(source_dir, target_dir);
                    }
                    // Target file vs. source dir: the file wins, the
                    // directory's subtree is discarded.
                }
                TreeEntry::File(source_file) => {
                    if existing.is_dir() {
                        *existing = TreeEntry::File(source_file.clone());
                    }
                    // Target file vs. source file: target wins.
                }
            },
        }
    }
}

/// Names never recorded into a tree.
fn skipped_basename(name: &str) -> bool {
    name == ".snow" || name == ".git" || name == ".DS_Store" || name.eq_ignore_ascii_case("thumbs.db")
}

/// Builds a [`TreeDir`] from a directory on disk. Stats are attached per
/// entry; file hashes stay unset until the index materialises the bodies.
pub fn construct_tree(dir_path: &Path) -> Result<TreeDir, PathError> {
    let mut root = TreeDir::new_root();
    root.stats = FileStats::from_metadata(&dir_path.metadata().context(dir_path)?);
    root.stats.size = construct_into(dir_path, "", &mut root)?;
    Ok(root)
}

fn construct_into(abs_dir: &Path, rel_dir: &str, dir: &mut TreeDir) -> Result<u64, PathError> {
    let mut total_size = 0u64;
    let mut entries: Vec<(String, std::path::PathBuf, Metadata)> = Vec::new();
    for entry in fs::read_dir(abs_dir).context(abs_dir)? {
        let Ok(entry) = entry else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if skipped_basename(&name) {
            continue;
        }
        // An entry may vanish between enumeration and stat; skip it.
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        entries.push((name, entry.path(), metadata));
    }
    entries.sort_by(|(a, _, _), (b, _, _)| a.cmp(b));
    for (name, abs_path, metadata) in entries {
        let rel_path = if rel_dir.is_empty() {
            name
        } else {
            format!("{rel_dir}/{name}")
        };
        let stats = FileStats::from_metadata(&metadata);
        if metadata.is_dir() {
            let mut child = TreeDir {
                hash: None,
                path: rel_path.clone(),
                stats,
                children: Vec::new(),
            };
            child.stats.size = construct_into(&abs_path, &rel_path, &mut child)?;
            total_size += child.stats.size;
            dir.children.push(TreeEntry::Dir(child));
        } else {
            total_size += stats.size;
            dir.children.push(TreeEntry::File(TreeFile::new(rel_path, stats)));
        }
    }
    Ok(total_size)
}

/// Modification-detection heuristics for [`is_file_modified`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DetectionMode {
    OnlySizeAndMkTime,
    SizeAndHashForSmallFiles,
    #[default]
    Default,
    SizeAndHashForAllFiles,
}

/// Decides whether the workdir copy of `file` differs from the committed
/// entry.
///
/// Size difference is always a modification; an mtime within 1 ms of the
/// committed one is never one. Beyond that the mode decides how much
/// re-hashing is worth it: text files (by extension) are cheap enough to
/// hash, multi-gigabyte renders are not.
pub fn is_file_modified(
    file: &TreeFile,
    workdir: &Path,
    mode: DetectionMode,
    options: &HashOptions,
) -> Result<bool, HashError> {
    let abs_path = path_util::to_os_path(workdir, &file.path);
    let metadata = abs_path.metadata().context(&abs_path)?;
    let disk = FileStats::from_metadata(&metadata);
    if disk.size != file.stats.size {
        return Ok(true);
    }
    if (file.stats.mtime.0 - disk.mtime.0).abs() < 1 {
        return Ok(false);
    }
    let hash_check = match mode {
        DetectionMode::OnlySizeAndMkTime => false,
        DetectionMode::SizeAndHashForSmallFiles => disk.size < hash::BLOCK_SPLIT_THRESHOLD,
        DetectionMode::Default => {
            TEXT_FILE_EXTENSIONS.contains(file.ext.as_str())
                && disk.size < hash::BLOCK_SPLIT_THRESHOLD
        }
        DetectionMode::SizeAndHashForAllFiles => true,
    };
    if !hash_check {
        return Ok(true);
    }
    let Some(expected) = &file.hash else {
        return Ok(true);
    };
    let actual = hash::hash_file(&abs_path, options)?;
    Ok(actual.hash != *expected)
}
