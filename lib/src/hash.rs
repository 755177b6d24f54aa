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

//! Chunked SHA-256 fingerprints of file bodies.
//!
//! Files below [`BLOCK_SPLIT_THRESHOLD`] are hashed whole. Larger files are
//! partitioned into fixed [`BLOCK_SIZE`] blocks (the tail block may be
//! shorter); each block hashes independently and the file fingerprint is the
//! SHA-256 of the concatenated per-block hex digests. Block fingerprints are
//! retained so later verification can re-hash only mismatching blocks.

use std::fmt;
use std::fs::File;
use std::io::Read as _;
use std::io::Seek as _;
use std::io::SeekFrom;
use std::path::Path;
use std::str::FromStr;

use rayon::prelude::*;
use sha2::Digest as _;
use sha2::Sha256;
use thiserror::Error;
use tracing::warn;

use crate::cancel::CancelToken;
use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;

/// Files at or above this size are hashed blockwise.
pub const BLOCK_SPLIT_THRESHOLD: u64 = 20 * 1024 * 1024;

/// Fixed block size for blockwise hashing.
pub const BLOCK_SIZE: u64 = 100 * 1024 * 1024;

/// Default streaming buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug, Error)]
#[error("invalid fingerprint {hex:?}")]
pub struct FingerprintParseError {
    pub hex: String,
}

/// A 32-byte SHA-256 value, rendered as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The canonical fingerprint of empty input.
    pub fn of_empty_input() -> Self {
        Self(Sha256::digest([]).into())
    }

    pub fn of_bytes(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.hex())
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| FingerprintParseError { hex: s.to_string() })?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| FingerprintParseError { hex: s.to_string() })?;
        Ok(Self(bytes))
    }
}

impl serde::Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> serde::Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex_str = String::deserialize(deserializer)?;
        hex_str.parse().map_err(serde::de::Error::custom)
    }
}

/// Fingerprint of one byte range of a file.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PartHash {
    pub hash: Fingerprint,
    pub start: u64,
    pub end: u64,
}

/// Fingerprint of a whole file. `parts` is empty below the block threshold.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileHash {
    pub hash: Fingerprint,
    pub parts: Vec<PartHash>,
}

/// Streaming options shared by the hashing entry points.
#[derive(Clone, Debug)]
pub struct HashOptions {
    pub buffer_size: usize,
    pub cancel: CancelToken,
}

impl Default for HashOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            cancel: CancelToken::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HashError {
    #[error(transparent)]
    Io(#[from] PathError),
    #[error(transparent)]
    Cancelled(#[from] crate::cancel::Cancelled),
}

/// Stream-hashes the byte range `[start, end)` of the file with SHA-256.
pub fn hash_part(
    path: &Path,
    start: u64,
    end: u64,
    options: &HashOptions,
) -> Result<PartHash, HashError> {
    let mut file = File::open(path).context(path)?;
    file.seek(SeekFrom::Start(start)).context(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; options.buffer_size.max(1)];
    let mut remaining = end - start;
    while remaining > 0 {
        options.cancel.check()?;
        let want = remaining.min(buffer.len() as u64) as usize;
        let got = file.read(&mut buffer[..want]).context(path)?;
        if got == 0 {
            // The file shrank under us; hash what we could observe.
            break;
        }
        hasher.update(&buffer[..got]);
        remaining -= got as u64;
    }
    Ok(PartHash {
        hash: Fingerprint(hasher.finalize().into()),
        start,
        end,
    })
}

fn block_ranges(size: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < size {
        let end = (start + BLOCK_SIZE).min(size);
        ranges.push((start, end));
        start = end;
    }
    ranges
}

fn aggregate_of_parts(parts: &[PartHash]) -> Fingerprint {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.hash.hex().as_bytes());
    }
    Fingerprint(hasher.finalize().into())
}

/// Fingerprints a file, blockwise when it is at or above the threshold.
///
/// Blocks hash in parallel; the per-block results are retained in the
/// returned value in ascending range order.
pub fn hash_file(path: &Path, options: &HashOptions) -> Result<FileHash, HashError> {
    let size = path.metadata().context(path)?.len();
    if size < BLOCK_SPLIT_THRESHOLD {
        let part = hash_part(path, 0, size, options)?;
        return Ok(FileHash {
            hash: part.hash,
            parts: vec![],
        });
    }
    let parts = block_ranges(size)
        .into_par_iter()
        .map(|(start, end)| hash_part(path, start, end, options))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FileHash {
        hash: aggregate_of_parts(&parts),
        parts,
    })
}

/// Re-hashes a file against an expected fingerprint, short-circuiting on the
/// first mismatching block.
///
/// Supplying block fingerprints for a file below the threshold, or omitting
/// them for a file above it, is tolerated with a warning and a full re-hash.
pub fn verify_hash(
    path: &Path,
    expected: &Fingerprint,
    expected_parts: Option<&[PartHash]>,
    options: &HashOptions,
) -> Result<bool, HashError> {
    let size = path.metadata().context(path)?.len();
    let blockwise = size >= BLOCK_SPLIT_THRESHOLD;
    let parts = match expected_parts {
        Some(_) if !blockwise => {
            warn!(
                path = %path.display(),
                "block fingerprints supplied for a file below the block threshold"
            );
            None
        }
        None if blockwise => {
            warn!(
                path = %path.display(),
                "no block fingerprints for a file above the block threshold"
            );
            None
        }
        other => other.filter(|parts| !parts.is_empty()),
    };
    match parts {
        Some(parts) => {
            for part in parts {
                options.cancel.check()?;
                let actual = hash_part(path, part.start, part.end.min(size), options)?;
                if actual.hash != part.hash {
                    return Ok(false);
                }
            }
            Ok(aggregate_of_parts(parts) == *expected)
        }
        None => {
            let actual = hash_file(path, options)?;
            Ok(actual.hash == *expected)
        }
    }
}
