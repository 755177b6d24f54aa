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

//! The staging buffer between workdir and commit.
//!
//! An index holds the set of paths to add and delete. `write_files`
//! materialises the added bodies into the object database and caches the
//! resulting fingerprints by rel-path; creating the commit consumes the
//! index. An index is single-producer; concurrent mutation is the caller's
//! responsibility.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use rayon::prelude::*;
use tracing::debug;

use crate::file_util::IoResultExt as _;
use crate::hash::FileHash;
use crate::hash::HashOptions;
use crate::io_context::IoContext;
use crate::object_db::ObjectDb;
use crate::object_db::OdbError;
use crate::path_util;

/// File basename of the main (unnamed) index.
const MAIN_INDEX_FILE: &str = "index";

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Index {
    pub id: String,
    #[serde(rename = "addSet")]
    add_set: BTreeSet<String>,
    #[serde(rename = "delSet")]
    del_set: BTreeSet<String>,
    pub processed: bool,
    /// Fingerprints produced by `write_files`, keyed by rel-path.
    #[serde(default)]
    fingerprints: BTreeMap<String, FileHash>,
}

impl Index {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    fn file_name(&self) -> String {
        if self.id.is_empty() {
            MAIN_INDEX_FILE.to_string()
        } else {
            format!("{MAIN_INDEX_FILE}.{}", self.id)
        }
    }

    pub fn add_set(&self) -> &BTreeSet<String> {
        &self.add_set
    }

    pub fn del_set(&self) -> &BTreeSet<String> {
        &self.del_set
    }

    pub fn fingerprints(&self) -> &BTreeMap<String, FileHash> {
        &self.fingerprints
    }

    pub fn is_empty(&self) -> bool {
        self.add_set.is_empty() && self.del_set.is_empty()
    }

    /// Stages paths for the next commit. A path staged for deletion stops
    /// being staged for deletion.
    pub fn add_files<I>(&mut self, paths: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for path in paths {
            let normalized = path_util::normalize(path.as_ref());
            if normalized.is_empty() {
                continue;
            }
            self.del_set.remove(&normalized);
            self.add_set.insert(normalized);
        }
    }

    /// Stages paths for deletion. A path staged for addition stops being
    /// staged for addition.
    pub fn delete_files<I>(&mut self, paths: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for path in paths {
            let normalized = path_util::normalize(path.as_ref());
            if normalized.is_empty() {
                continue;
            }
            self.add_set.remove(&normalized);
            self.del_set.insert(normalized);
        }
    }

    /// Materialises every staged body into the object database. Fingerprints
    /// are cached by rel-path and the index is persisted as processed.
    pub fn write_files(
        &mut self,
        workdir: &Path,
        odb: &ObjectDb,
        io: &IoContext,
        options: &HashOptions,
    ) -> Result<(), OdbError> {
        let written: Vec<(String, FileHash)> = self
            .add_set
            .par_iter()
            .map(|rel_path| {
                options.cancel.check().map_err(crate::hash::HashError::from)?;
                let abs_path = path_util::to_os_path(workdir, rel_path);
                let file_hash = odb.write_object(&abs_path, io, options)?;
                debug!(path = %rel_path, hash = %file_hash.hash, "staged object");
                Ok::<_, OdbError>((rel_path.clone(), file_hash))
            })
            .collect::<Result<_, _>>()?;
        self.fingerprints.extend(written);
        self.processed = true;
        self.save(odb)?;
        Ok(())
    }

    pub fn save(&self, odb: &ObjectDb) -> Result<(), OdbError> {
        let path = odb.indexes_dir().join(self.file_name());
        let encoded = serde_json::to_vec(self).map_err(|error| OdbError::Corrupt {
            path: path.clone(),
            message: error.to_string(),
        })?;
        crate::file_util::write_safe(&path, &encoded)?;
        Ok(())
    }

    /// Drops the staged state, on disk and in memory.
    pub fn invalidate(&mut self, odb: &ObjectDb) -> Result<(), OdbError> {
        let path = odb.indexes_dir().join(self.file_name());
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(OdbError::Io(crate::file_util::PathError { path, error }));
            }
        }
        self.add_set.clear();
        self.del_set.clear();
        self.fingerprints.clear();
        self.processed = false;
        Ok(())
    }

    /// Loads every persisted index of the repository.
    pub fn load_all(odb: &ObjectDb) -> Result<Vec<Index>, OdbError> {
        let dir = odb.indexes_dir();
        let mut indexes = Vec::new();
        for entry in fs::read_dir(&dir).context(&dir)? {
            let entry = entry.context(&dir)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if crate::refs::is_temp_basename(&name) || !name.starts_with(MAIN_INDEX_FILE) {
                continue;
            }
            let path = entry.path();
            let contents = fs::read_to_string(&path).context(&path)?;
            let index: Index =
                serde_json::from_str(&contents).map_err(|error| OdbError::Corrupt {
                    path: path.clone(),
                    message: error.to_string(),
                })?;
            indexes.push(index);
        }
        indexes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(indexes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_odb() -> (tempfile::TempDir, ObjectDb) {
        let dir = tempfile::Builder::new()
            .prefix("snowfs-test-")
            .tempdir()
            .unwrap();
        let odb = ObjectDb::new(dir.path().join("repo"));
        odb.init().unwrap();
        (dir, odb)
    }

    #[test]
    fn add_and_delete_sets_exclude_each_other() {
        let mut index = Index::new("");
        index.add_files(["foo", "subdir/bar"]);
        index.delete_files(["foo"]);
        assert!(!index.add_set().contains("foo"));
        assert!(index.del_set().contains("foo"));
        index.add_files(["foo"]);
        assert!(index.add_set().contains("foo"));
        assert!(!index.del_set().contains("foo"));
    }

    #[test]
    fn paths_are_normalized_on_staging() {
        let mut index = Index::new("");
        index.add_files(["./subdir//bar", "subdir\\baz"]);
        assert!(index.add_set().contains("subdir/bar"));
        assert!(index.add_set().contains("subdir/baz"));
    }

    #[test]
    fn write_files_materialises_objects() {
        let (dir, odb) = new_odb();
        let workdir = dir.path().join("workdir");
        fs::create_dir_all(workdir.join("subdir")).unwrap();
        fs::write(workdir.join("foo"), b"foo body").unwrap();
        fs::write(workdir.join("subdir/bar"), b"bar body").unwrap();

        let mut index = Index::new("");
        index.add_files(["foo", "subdir/bar"]);
        index
            .write_files(&workdir, &odb, &IoContext::init(), &HashOptions::default())
            .unwrap();

        assert!(index.processed);
        let foo_hash = &index.fingerprints()["foo"];
        assert!(odb.has_object(&foo_hash.hash));
        let bar_hash = &index.fingerprints()["subdir/bar"];
        assert!(odb.has_object(&bar_hash.hash));
    }

    #[test]
    fn index_persists_and_invalidates() {
        let (_dir, odb) = new_odb();
        let mut index = Index::new("");
        index.add_files(["foo"]);
        index.save(&odb).unwrap();

        let loaded = Index::load_all(&odb).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].add_set().contains("foo"));

        index.invalidate(&odb).unwrap();
        assert!(index.is_empty());
        assert!(Index::load_all(&odb).unwrap().is_empty());
    }

    #[test]
    fn named_indexes_store_separately() {
        let (_dir, odb) = new_odb();
        let mut main = Index::new("");
        main.add_files(["a"]);
        main.save(&odb).unwrap();
        let mut named = Index::new("render-pass");
        named.add_files(["b"]);
        named.save(&odb).unwrap();

        let loaded = Index::load_all(&odb).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "");
        assert_eq!(loaded[1].id, "render-pass");
    }
}
