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

//! The on-disk object database under a repository's commondir.
//!
//! File bodies live under `objects/<fingerprint>` and are immutable once
//! written; in-flight bodies stage under `objects/tmp/` and reach their
//! final name by rename, so concurrent writers of the same body are
//! idempotent. Commits and references are durable JSON files under
//! `versions/` and `refs/`; basenames starting with `.` or ending in
//! `.tmp` are stale temp files and are ignored on load.

use std::fs;
use std::fs::File;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use indexmap::IndexMap;
use rand::Rng as _;
use thiserror::Error;
use tracing::debug;

use crate::commit::Commit;
use crate::file_util;
use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::hash;
use crate::hash::FileHash;
use crate::hash::Fingerprint;
use crate::hash::HashError;
use crate::hash::HashOptions;
use crate::io_context::IoContext;
use crate::refs;
use crate::refs::Reference;

#[derive(Debug, Error)]
pub enum OdbError {
    #[error(transparent)]
    Io(#[from] PathError),
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error("corrupt record {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("object {hash} not found")]
    ObjectNotFound { hash: String },
}

/// Handle to the commondir layout. Owns no file state beyond the paths.
#[derive(Clone, Debug)]
pub struct ObjectDb {
    common_dir: PathBuf,
}

impl ObjectDb {
    pub fn new(common_dir: impl Into<PathBuf>) -> Self {
        Self {
            common_dir: common_dir.into(),
        }
    }

    pub fn common_dir(&self) -> &Path {
        &self.common_dir
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.common_dir.join("objects")
    }

    pub fn objects_tmp_dir(&self) -> PathBuf {
        self.objects_dir().join("tmp")
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.common_dir.join("versions")
    }

    pub fn refs_dir(&self) -> PathBuf {
        self.common_dir.join("refs")
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.common_dir.join("indexes")
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.common_dir.join("hooks")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.common_dir.join("logs")
    }

    pub fn main_log_path(&self) -> PathBuf {
        self.logs_dir().join("mainlog")
    }

    pub fn head_path(&self) -> PathBuf {
        self.common_dir.join("HEAD")
    }

    pub fn config_path(&self) -> PathBuf {
        self.common_dir.join("config")
    }

    pub fn object_path(&self, hash: &Fingerprint) -> PathBuf {
        self.objects_dir().join(hash.hex())
    }

    pub fn commit_path(&self, hash: &str) -> PathBuf {
        self.versions_dir().join(hash)
    }

    pub fn reference_path(&self, name: &str) -> PathBuf {
        self.refs_dir().join(name)
    }

    /// Creates the commondir layout.
    pub fn init(&self) -> Result<(), PathError> {
        for dir in [
            self.common_dir.clone(),
            self.objects_dir(),
            self.objects_tmp_dir(),
            self.versions_dir(),
            self.refs_dir(),
            self.indexes_dir(),
            self.logs_dir(),
            self.hooks_dir(),
        ] {
            fs::create_dir_all(&dir).context(&dir)?;
        }
        Ok(())
    }

    /// Removes crash residue from `objects/tmp/`. In-flight writes stage
    /// here and leave by rename, so anything still present belongs to no
    /// live operation. Best effort, called on open.
    pub fn clear_stale_temp_files(&self) {
        let dir = self.objects_tmp_dir();
        let Ok(entries) = fs::read_dir(&dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                debug!(path = %path.display(), "removing stale staged object");
                fs::remove_file(&path).ok();
            }
        }
    }

    fn stage_path(&self) -> PathBuf {
        let mut rng = rand::thread_rng();
        let nonce: String = (0..16)
            .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap())
            .collect();
        self.objects_tmp_dir().join(nonce)
    }

    fn promote_staged(
        &self,
        staged: &Path,
        file_hash: FileHash,
    ) -> Result<FileHash, OdbError> {
        let destination = self.object_path(&file_hash.hash);
        if destination.exists() {
            // Content-addressed: an existing body is identical by
            // construction, so the staged copy is redundant.
            fs::remove_file(staged).ok();
            debug!(hash = %file_hash.hash, "object already present");
            return Ok(file_hash);
        }
        match fs::rename(staged, &destination) {
            Ok(()) => {
                debug!(hash = %file_hash.hash, "object written");
                Ok(file_hash)
            }
            Err(error) => {
                fs::remove_file(staged).ok();
                Err(PathError {
                    path: destination,
                    error,
                }
                .into())
            }
        }
    }

    /// Materialises the file at `src_path` as a content-addressed object.
    /// Returns the fingerprint, blockwise parts included.
    pub fn write_object(
        &self,
        src_path: &Path,
        io: &IoContext,
        options: &HashOptions,
    ) -> Result<FileHash, OdbError> {
        let staged = self.stage_path();
        io.copy_file(src_path, &staged)?;
        let file_hash = match hash::hash_file(&staged, options) {
            Ok(file_hash) => file_hash,
            Err(error) => {
                fs::remove_file(&staged).ok();
                return Err(error.into());
            }
        };
        self.promote_staged(&staged, file_hash)
    }

    /// Materialises an in-memory buffer as a content-addressed object.
    pub fn write_object_bytes(&self, bytes: &[u8]) -> Result<FileHash, OdbError> {
        let staged = self.stage_path();
        fs::write(&staged, bytes).context(&staged)?;
        let file_hash = FileHash {
            hash: Fingerprint::of_bytes(bytes),
            parts: vec![],
        };
        self.promote_staged(&staged, file_hash)
    }

    pub fn has_object(&self, hash: &Fingerprint) -> bool {
        self.object_path(hash).exists()
    }

    /// Opens an object body for streaming.
    pub fn read_object(&self, hash: &Fingerprint) -> Result<File, OdbError> {
        let path = self.object_path(hash);
        match File::open(&path) {
            Ok(file) => Ok(file),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Err(OdbError::ObjectNotFound {
                hash: hash.hex(),
            }),
            Err(error) => Err(PathError { path, error }.into()),
        }
    }

    /// Serialises the commit as durable JSON under `versions/<hash>`.
    pub fn write_commit(&self, commit: &Commit) -> Result<(), OdbError> {
        let encoded = serde_json::to_vec(commit).map_err(|error| OdbError::Corrupt {
            path: self.commit_path(&commit.hash),
            message: error.to_string(),
        })?;
        debug!(hash = %commit.hash, "writing commit");
        file_util::write_safe(&self.commit_path(&commit.hash), &encoded)?;
        Ok(())
    }

    /// Serialises the reference as durable JSON under `refs/<name>`.
    pub fn write_reference(&self, reference: &Reference) -> Result<(), OdbError> {
        let encoded = serde_json::to_vec(reference).map_err(|error| OdbError::Corrupt {
            path: self.reference_path(&reference.name),
            message: error.to_string(),
        })?;
        debug!(name = %reference.name, target = %reference.target, "writing reference");
        file_util::write_safe(&self.reference_path(&reference.name), &encoded)?;
        Ok(())
    }

    pub fn remove_reference(&self, name: &str) -> Result<(), OdbError> {
        let path = self.reference_path(name);
        fs::remove_file(&path).context(&path)?;
        Ok(())
    }

    fn load_records<T: serde::de::DeserializeOwned>(
        &self,
        dir: &Path,
    ) -> Result<Vec<(String, T)>, OdbError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(dir).context(dir)? {
            let entry = entry.context(dir)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if refs::is_temp_basename(&name) {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let contents = fs::read_to_string(&path).context(&path)?;
            let record: T =
                serde_json::from_str(&contents).map_err(|error| OdbError::Corrupt {
                    path: path.clone(),
                    message: error.to_string(),
                })?;
            records.push((name, record));
        }
        Ok(records)
    }

    /// Loads every commit and reference. Temp-suffix basenames are skipped;
    /// anything else that fails to parse is corruption and aborts the load.
    /// The returned maps are deterministically ordered.
    pub fn load_all(&self) -> Result<(IndexMap<String, Commit>, IndexMap<String, Reference>), OdbError>
    {
        let mut commits: Vec<(String, Commit)> = self.load_records(&self.versions_dir())?;
        commits.sort_by(|(_, a), (_, b)| a.date.cmp(&b.date).then_with(|| a.hash.cmp(&b.hash)));
        let mut refs: Vec<(String, Reference)> = self.load_records(&self.refs_dir())?;
        refs.sort_by(|(a, _), (b, _)| a.cmp(b));
        debug!(
            commits = commits.len(),
            refs = refs.len(),
            "loaded repository records"
        );
        Ok((
            commits.into_iter().collect(),
            refs.into_iter().collect(),
        ))
    }
}
