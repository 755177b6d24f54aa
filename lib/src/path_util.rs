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

//! Path algebra over forward-slash strings.
//!
//! Every path handed around the engine is a `/`-separated string: workdir
//! relative paths use `""` for the root and never carry a trailing
//! separator. These helpers keep that form closed under composition.

use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid path argument: {message}")]
pub struct InvalidPathError {
    pub message: String,
}

/// Rejects path arguments the engine cannot represent (interior NUL bytes).
pub fn ensure_valid(path: &str) -> Result<&str, InvalidPathError> {
    if path.contains('\0') {
        return Err(InvalidPathError {
            message: format!("path contains a NUL byte: {:?}", path),
        });
    }
    Ok(path)
}

fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Normalizes to forward slashes, resolves `.`/`..`, and strips trailing
/// separators. `""` and `"."` normalize to `""`; a single `/` is preserved.
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match out.last() {
                Some(&"..") | None => {
                    if !absolute {
                        out.push("..");
                    }
                }
                Some(last) if is_drive_prefix(last) => {}
                Some(_) => {
                    out.pop();
                }
            },
            _ => out.push(segment),
        }
    }
    if out.is_empty() {
        return if absolute { "/".to_string() } else { String::new() };
    }
    let joined = out.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Joins parts with `/` and normalizes the result.
pub fn join(parts: &[&str]) -> String {
    normalize(&parts.join("/"))
}

/// Everything before the last segment. The parent of a single segment is the
/// root (`""`), and the parent of `/foo` is `/`.
pub fn dirname(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rfind('/') {
        None => String::new(),
        Some(0) => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
    }
}

/// The last segment of the path, or `""` for the root.
pub fn basename(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rfind('/') {
        None => normalized,
        Some(idx) => normalized[idx + 1..].to_string(),
    }
}

/// The lowercased extension including the leading dot, or `""`. A leading
/// dot alone (dotfiles) does not count as an extension.
pub fn extname(path: &str) -> String {
    let name = basename(path);
    match name.rfind('.') {
        None | Some(0) => String::new(),
        Some(idx) => name[idx..].to_ascii_lowercase(),
    }
}

/// Whether the path is absolute (`/…` or a Windows drive prefix).
pub fn is_absolute(path: &str) -> bool {
    let unified = path.replace('\\', "/");
    if unified.starts_with('/') {
        return true;
    }
    let bytes = unified.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Resolves parts right-to-left into an absolute normalized path, rooted at
/// the current directory when no part is absolute.
pub fn resolve(parts: &[&str]) -> String {
    let mut stack: Vec<&str> = Vec::new();
    let mut rooted = false;
    for part in parts.iter().rev() {
        stack.insert(0, *part);
        if is_absolute(part) {
            rooted = true;
            break;
        }
    }
    let mut all: Vec<String> = Vec::new();
    if !rooted {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        all.push(to_unix_string(&cwd));
    }
    all.extend(stack.iter().map(|part| part.to_string()));
    normalize(&all.join("/"))
}

/// Turns `to` into a path relative to `from`. Both are normalized first;
/// `..` segments bridge disjoint prefixes.
pub fn relative(from: &str, to: &str) -> String {
    let from = normalize(from);
    let to = normalize(to);
    if from == to {
        return String::new();
    }
    let from_segments: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
    let to_segments: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();
    let common = from_segments
        .iter()
        .zip(to_segments.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out: Vec<&str> = Vec::new();
    for _ in common..from_segments.len() {
        out.push("..");
    }
    out.extend(&to_segments[common..]);
    out.join("/")
}

/// Converts an OS path to the engine's forward-slash string form.
pub fn to_unix_string(path: &Path) -> String {
    normalize(&path.to_string_lossy())
}

/// Converts a workdir-relative string path back to an OS path under `root`.
pub fn to_os_path(root: &Path, rel_path: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for segment in rel_path.split('/').filter(|s| !s.is_empty()) {
        out.push(segment);
    }
    out
}
