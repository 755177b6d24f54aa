// Copyright 2025 The SnowFS Authors
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

//! Proptest strategies over snapshot trees.

use std::collections::BTreeMap;

use proptest::collection::btree_map;
use proptest::prelude::*;
use snowfs_lib::hash::Fingerprint;

/// A flat description of a file set: rel-path to content seed. Path
/// components are biased towards collisions (alpha-delta) so nested
/// directories and shared prefixes show up often. A path nested under
/// another *file* path is dropped, so every set builds into a tree without
/// file/directory conflicts.
pub fn arb_file_set() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    btree_map(
        arb_rel_path(),
        proptest::collection::vec(any::<u8>(), 0..64),
        1..16,
    )
    .prop_map(|files| {
        let paths: Vec<String> = files.keys().cloned().collect();
        files
            .into_iter()
            .filter(|(path, _)| {
                !paths
                    .iter()
                    .any(|other| other != path && path.starts_with(&format!("{other}/")))
            })
            .collect()
    })
}

fn arb_path_component() -> impl Strategy<Value = String> {
    "(alpha|beta|gamma|delta|[a-z]{1,8})"
}

fn arb_rel_path() -> impl Strategy<Value = String> {
    proptest::collection::vec(arb_path_component(), 1..4).prop_map(|components| components.join("/"))
}

/// The fingerprint a file body would have, without touching disk.
pub fn fingerprint_of(contents: &[u8]) -> Fingerprint {
    Fingerprint::of_bytes(contents)
}
