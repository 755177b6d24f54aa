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

//! Commit records.
//!
//! A commit's hash is 32 *random* bytes rendered as hex, minted at creation.
//! Unlike object bodies, commits are not content-addressed: the random hash
//! is the stable identity of the snapshot across clones and merges.

use indexmap::IndexMap;
use rand::RngCore as _;

use crate::tree::MillisSinceEpoch;
use crate::tree::TreeDir;

/// Message of the commit every repository starts from.
pub const GENESIS_MESSAGE: &str = "Created Project";

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Commit {
    pub hash: String,
    pub message: String,
    pub date: MillisSinceEpoch,
    pub root: TreeDir,
    pub parents: Vec<String>,
    pub tags: Vec<String>,
    #[serde(rename = "userData", default)]
    pub user_data: IndexMap<String, serde_json::Value>,
}

/// Mints a fresh random commit hash.
pub fn random_hash() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl Commit {
    pub fn new(message: impl Into<String>, root: TreeDir, parents: Vec<String>) -> Self {
        Self {
            hash: random_hash(),
            message: message.into(),
            date: MillisSinceEpoch::now(),
            root,
            parents,
            tags: Vec::new(),
            user_data: IndexMap::new(),
        }
    }

    /// The empty genesis commit: no parents, an empty (hashed) root tree.
    pub fn genesis() -> Self {
        let mut root = TreeDir::new_root();
        root.rehash().expect("empty tree always hashes");
        Self::new(GENESIS_MESSAGE, root, vec![])
    }
}
