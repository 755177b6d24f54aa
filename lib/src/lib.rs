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

//! SnowFS: a content-addressed version-control engine for large binary
//! assets.
//!
//! The crate identifies, stores, snapshots, restores and compares a working
//! directory of potentially multi-gigabyte files: chunked SHA-256
//! fingerprints, an in-memory tree with stable aggregate hashes, a durable
//! on-disk repository with atomic mutations, status/diff computation,
//! checkout with reset modes, an ignore matcher, and a merge operator over
//! commit graphs.

pub mod cancel;
pub mod commit;
pub mod file_util;
pub mod hash;
pub mod ignore;
pub mod index;
pub mod io_context;
pub mod lock;
pub mod object_db;
pub mod path_util;
pub mod refs;
pub mod repository;
pub mod status;
pub mod tree;
pub mod walk;
