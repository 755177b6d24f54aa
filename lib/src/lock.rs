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

//! The on-disk `state` marker serialising mutating repository operations.
//!
//! The marker is the only process-wide coordination primitive. It is
//! created atomically when a mutating operation starts and removed when the
//! operation finishes or fails; a marker left behind by a crash is cleared
//! on the next `open`.

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

use crate::file_util::PathError;

/// Basename of the marker file under the commondir.
pub const STATE_FILE_NAME: &str = "state";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("repository busy")]
    Busy,
    #[error(transparent)]
    Io(#[from] PathError),
}

/// Held for the duration of one mutating operation. Dropping releases the
/// marker (best effort), so an early `?` return cannot leave the repository
/// wedged.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    armed: bool,
}

impl StateLock {
    pub fn acquire(common_dir: &Path) -> Result<Self, LockError> {
        let path = common_dir.join(STATE_FILE_NAME);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path, armed: true }),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => Err(LockError::Busy),
            Err(error) => Err(LockError::Io(PathError { path, error })),
        }
    }

    pub fn release(mut self) {
        self.unlink();
    }

    fn unlink(&mut self) {
        if self.armed {
            fs::remove_file(&self.path).ok();
            self.armed = false;
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        self.unlink();
    }
}

/// Whether a mutating operation currently holds the marker.
pub fn is_held(common_dir: &Path) -> bool {
    common_dir.join(STATE_FILE_NAME).exists()
}

/// Clears a marker left behind by a crashed process. Called on `open`;
/// committed commits and references are never affected, only the marker and
/// temp files are crash residue.
pub fn clear_stale(common_dir: &Path) {
    let path = common_dir.join(STATE_FILE_NAME);
    if path.exists() {
        warn!(path = %path.display(), "clearing stale state marker");
        fs::remove_file(&path).ok();
    }
}
