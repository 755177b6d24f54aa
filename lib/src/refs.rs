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

//! References: named, mutable pointers into the commit graph.

use once_cell::sync::Lazy;
use regex::Regex;

/// The distinguished reference naming the checked-out snapshot.
pub const HEAD_NAME: &str = "HEAD";

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Branch,
    Tag,
    Detached,
}

/// A reference record, stored as JSON under `refs/<name>`.
///
/// `target` is a commit hash or the name of another reference; `start`
/// remembers the commit the reference was created at.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Reference {
    pub name: String,
    pub target: String,
    #[serde(rename = "type")]
    pub ref_type: RefType,
    #[serde(default)]
    pub start: Option<String>,
}

impl Reference {
    pub fn branch(name: impl Into<String>, start_hash: impl Into<String>) -> Self {
        let start_hash = start_hash.into();
        Self {
            name: name.into(),
            target: start_hash.clone(),
            ref_type: RefType::Branch,
            start: Some(start_hash),
        }
    }
}

/// The checked-out state recorded in the `HEAD` file: either attached to a
/// branch (`ref: <branchName>`) or detached at a commit (`<commitHash>`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Head {
    Attached(String),
    Detached(String),
}

impl Head {
    pub fn to_file_contents(&self) -> String {
        match self {
            Head::Attached(branch) => format!("ref: {branch}\n"),
            Head::Detached(hash) => format!("{hash}\n"),
        }
    }

    pub fn from_file_contents(contents: &str) -> Self {
        let trimmed = contents.trim();
        match trimmed.strip_prefix("ref: ") {
            Some(branch) => Head::Attached(branch.trim().to_string()),
            None => Head::Detached(trimmed.to_string()),
        }
    }
}

static BRANCH_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_ .-]+$").unwrap());

/// Branch names are one run of word characters, digits, spaces, dots and
/// dashes, and must survive being a file basename under `refs/`: names
/// starting with `.` or ending with `.tmp` would be skipped on load.
pub fn is_valid_branch_name(name: &str) -> bool {
    BRANCH_NAME_RE.is_match(name) && !name.starts_with('.') && !name.ends_with(".tmp")
}

/// Whether a basename under `refs/` or `versions/` is a stale temp file to
/// be ignored on load.
pub fn is_temp_basename(name: &str) -> bool {
    name.starts_with('.') || name.ends_with(".tmp")
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("Main", true ; "default branch")]
    #[test_case("feature 1.2", true ; "spaces and dots")]
    #[test_case("with-dash_under", true ; "dash underscore")]
    #[test_case(".hidden", false ; "leading dot")]
    #[test_case("stale.tmp", false ; "tmp suffix")]
    #[test_case("bad/slash", false ; "slash")]
    #[test_case("", false ; "empty")]
    #[test_case("unicode-ß", false ; "non ascii")]
    fn branch_name_validation(name: &str, expected: bool) {
        assert_eq!(is_valid_branch_name(name), expected);
    }

    #[test]
    fn head_file_round_trip() {
        let attached = Head::Attached("Main".to_string());
        assert_eq!(
            Head::from_file_contents(&attached.to_file_contents()),
            attached
        );
        let detached = Head::Detached("ab".repeat(32));
        assert_eq!(
            Head::from_file_contents(&detached.to_file_contents()),
            detached
        );
    }

    #[test]
    fn reference_json_uses_type_key() {
        let reference = Reference::branch("Main", "00".repeat(32));
        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json["type"], "branch");
        assert_eq!(json["name"], "Main");
        assert_eq!(json["target"], json["start"]);
        let parsed: Reference = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, reference);
    }

    #[test]
    fn temp_basenames() {
        assert!(is_temp_basename(".partial"));
        assert!(is_temp_basename("ref.123abc.tmp"));
        assert!(!is_temp_basename("Main"));
    }
}
