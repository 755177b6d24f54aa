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

//! Repository lifecycle and the operations tying the engine together.
//!
//! Mutating operations run inside the on-disk `state` marker and write in a
//! fixed order: object bodies, then the commit record, then the reference,
//! then `HEAD`. A reader that observes a reference change therefore sees
//! the referenced commit and all of its objects.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fs;
use std::fs::FileTimes;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::UNIX_EPOCH;

use indexmap::IndexMap;
use itertools::Itertools as _;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::instrument;
use tracing::warn;

use crate::cancel::Cancelled;
use crate::commit::Commit;
use crate::file_util;
use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::hash::HashError;
use crate::hash::HashOptions;
use crate::ignore::IgnoreMatcher;
use crate::index::Index;
use crate::io_context::AccessCheckError;
use crate::io_context::AccessMode;
use crate::io_context::IoContext;
use crate::lock;
use crate::lock::LockError;
use crate::lock::StateLock;
use crate::object_db::ObjectDb;
use crate::object_db::OdbError;
use crate::path_util;
use crate::refs;
use crate::refs::Head;
use crate::refs::RefType;
use crate::refs::Reference;
use crate::status;
use crate::status::Diff;
use crate::status::Filter;
use crate::status::Status;
use crate::status::StatusEntry;
use crate::tree;
use crate::tree::DetectionMode;
use crate::tree::FileStats;
use crate::tree::TreeDir;
use crate::tree::TreeEntry;
use crate::tree::TreeError;
use crate::walk;
use crate::walk::WalkFlags;

/// Branch name used when `init` is given none.
pub const DEFAULT_BRANCH_NAME: &str = "Main";

/// Name of the workdir marker (directory or pointer file).
pub const REPO_MARKER: &str = ".snow";

const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Corruption(String),
    #[error("repository busy")]
    RepositoryBusy,
    #[error("refusing to merge unrelated histories")]
    UnrelatedHistories,
    #[error("{0}")]
    WouldOverwriteWorkingCopy(String),
    #[error(transparent)]
    AggregateFileAccess(#[from] AccessCheckError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error(transparent)]
    Io(#[from] PathError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RepoError {
    /// User errors exit with code 1; anything else is an unexpected
    /// internal failure (exit code 2).
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            RepoError::Io(_) | RepoError::Corruption(_) | RepoError::Internal(_)
        )
    }
}

impl From<OdbError> for RepoError {
    fn from(error: OdbError) -> Self {
        match error {
            OdbError::Io(io) => RepoError::Io(io),
            OdbError::Hash(hash) => hash.into(),
            OdbError::Corrupt { path, message } => {
                RepoError::Corruption(format!("corrupt record {}: {message}", path.display()))
            }
            OdbError::ObjectNotFound { hash } => {
                RepoError::NotFound(format!("object {hash} not found"))
            }
        }
    }
}

impl From<HashError> for RepoError {
    fn from(error: HashError) -> Self {
        match error {
            HashError::Io(io) => RepoError::Io(io),
            HashError::Cancelled(cancelled) => RepoError::Cancelled(cancelled),
        }
    }
}

impl From<TreeError> for RepoError {
    fn from(error: TreeError) -> Self {
        RepoError::Internal(error.to_string())
    }
}

impl From<LockError> for RepoError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::Busy => RepoError::RepositoryBusy,
            LockError::Io(io) => RepoError::Io(io),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Repository configuration, stored as JSON in `<commondir>/config`.
/// Unknown keys round-trip through `extra`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RepoConfig {
    pub version: u32,
    #[serde(rename = "defaultBranchName")]
    pub default_branch_name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub nodefaultignore: bool,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl RepoConfig {
    fn new(default_branch_name: String) -> Self {
        Self {
            version: CONFIG_VERSION,
            default_branch_name,
            nodefaultignore: false,
            extra: IndexMap::new(),
        }
    }
}

/// Options for [`Repository::init_ext`].
#[derive(Clone, Debug, Default)]
pub struct InitOptions {
    /// Metadata directory outside the workdir. Defaults to
    /// `<workdir>/.snow`.
    pub commondir: Option<PathBuf>,
    pub default_branch_name: Option<String>,
}

/// Options for [`Repository::commit`].
#[derive(Clone, Debug, Default)]
pub struct CommitOptions {
    pub tags: Vec<String>,
    pub user_data: IndexMap<String, serde_json::Value>,
    pub allow_empty: bool,
}

/// Traversal orders for [`Repository::get_all_commits`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CommitOrder {
    #[default]
    Undefined,
    OldestFirst,
    NewestFirst,
}

/// Reset flags for [`Repository::checkout`], OR-able.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResetMode(u32);

impl ResetMode {
    pub const DEFAULT: ResetMode = ResetMode(0);
    pub const DETACH: ResetMode = ResetMode(1 << 0);
    pub const RESTORE_DELETED_FILES: ResetMode = ResetMode(1 << 1);
    pub const DISCARD_CHANGES: ResetMode = ResetMode(1 << 2);
    pub const DELETE_NEW_FILES: ResetMode = ResetMode(1 << 3);

    pub fn contains(self, other: ResetMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ResetMode {
    type Output = ResetMode;

    fn bitor(self, rhs: ResetMode) -> ResetMode {
        ResetMode(self.0 | rhs.0)
    }
}

/// Result of the pure repository merge operator.
#[derive(Clone, Debug)]
pub struct MergeResult {
    pub commits: IndexMap<String, Commit>,
    pub refs: IndexMap<String, Reference>,
}

/// An opened repository: workdir plus the loaded commondir state.
#[derive(Debug)]
pub struct Repository {
    workdir: PathBuf,
    common_dir: PathBuf,
    config: RepoConfig,
    odb: ObjectDb,
    io: IoContext,
    commits: IndexMap<String, Commit>,
    refs: IndexMap<String, Reference>,
    head: Head,
    indexes: Vec<Index>,
}

static COMMIT_SPEC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<base>[^~]+)(?P<tilde>(?:~[0-9]+)*)$").unwrap());

fn is_full_hex_hash(candidate: &str) -> bool {
    candidate.len() == 64
        && candidate
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

fn absolute(path: &Path) -> Result<PathBuf, RepoError> {
    std::path::absolute(path).context(path).map_err(Into::into)
}

impl Repository {
    /// Creates a new repository at `workdir`.
    ///
    /// The workdir must not exist yet. An explicit commondir must not exist
    /// either and must lie outside the workdir; in that case
    /// `<workdir>/.snow` becomes a one-line pointer file naming it.
    #[instrument(skip(options))]
    pub fn init_ext(workdir: &Path, options: &InitOptions) -> Result<Repository, RepoError> {
        if workdir.exists() {
            return Err(RepoError::AlreadyExists("workdir already exists".to_string()));
        }
        let abs_workdir = absolute(workdir)?;
        let (common_dir, external_commondir) = match &options.commondir {
            Some(commondir) => {
                if commondir.exists() {
                    return Err(RepoError::AlreadyExists(
                        "commondir already exists".to_string(),
                    ));
                }
                let abs_commondir = absolute(commondir)?;
                if abs_commondir.starts_with(&abs_workdir) {
                    return Err(RepoError::InvalidArgument(
                        "commondir must be outside repository".to_string(),
                    ));
                }
                (abs_commondir, true)
            }
            None => (abs_workdir.join(REPO_MARKER), false),
        };
        let branch_name = options
            .default_branch_name
            .clone()
            .unwrap_or_else(|| DEFAULT_BRANCH_NAME.to_string());
        if !refs::is_valid_branch_name(&branch_name) {
            return Err(RepoError::InvalidArgument(format!(
                "invalid branch name '{branch_name}'"
            )));
        }

        fs::create_dir_all(&abs_workdir).context(&abs_workdir)?;
        let odb = ObjectDb::new(common_dir.clone());
        odb.init()?;
        if external_commondir {
            let pointer = abs_workdir.join(REPO_MARKER);
            file_util::write_safe(&pointer, format!("{}\n", common_dir.display()).as_bytes())?;
        }

        let config = RepoConfig::new(branch_name.clone());
        let encoded = serde_json::to_vec_pretty(&config)
            .map_err(|error| RepoError::Internal(error.to_string()))?;
        file_util::write_safe(&odb.config_path(), &encoded)?;

        let genesis = Commit::genesis();
        odb.write_commit(&genesis)?;
        let branch = Reference::branch(branch_name.clone(), genesis.hash.clone());
        odb.write_reference(&branch)?;
        let head = Head::Attached(branch_name.clone());
        file_util::write_safe(&odb.head_path(), head.to_file_contents().as_bytes())?;

        let mut commits = IndexMap::new();
        commits.insert(genesis.hash.clone(), genesis);
        let mut refs_map = IndexMap::new();
        refs_map.insert(branch_name, branch);

        let repo = Repository {
            workdir: abs_workdir,
            common_dir,
            config,
            odb,
            io: IoContext::init(),
            commits,
            refs: refs_map,
            head,
            indexes: Vec::new(),
        };
        repo.append_main_log("init");
        Ok(repo)
    }

    /// Opens the repository containing `path`, walking *up* the hierarchy
    /// until a `.snow` marker is found. Never modifies the workdir.
    #[instrument]
    pub fn open(path: &Path) -> Result<Repository, RepoError> {
        let start = absolute(path)?;
        let mut found: Option<(PathBuf, PathBuf)> = None;
        for ancestor in start.ancestors() {
            let marker = ancestor.join(REPO_MARKER);
            if marker.is_dir() {
                found = Some((ancestor.to_path_buf(), marker));
                break;
            }
            if marker.is_file() {
                let contents = fs::read_to_string(&marker).context(&marker)?;
                let target = contents.lines().next().unwrap_or("").trim();
                if target.is_empty() {
                    return Err(RepoError::Corruption(format!(
                        "empty commondir pointer {}",
                        marker.display()
                    )));
                }
                found = Some((ancestor.to_path_buf(), PathBuf::from(target)));
                break;
            }
        }
        let Some((workdir, common_dir)) = found else {
            return Err(RepoError::NotFound(format!(
                "not a snowfs repository (or any of the parent directories): '{}'",
                path.display()
            )));
        };
        let workdir = dunce::canonicalize(&workdir).context(&workdir)?;
        let common_dir = dunce::canonicalize(&common_dir).context(&common_dir)?;

        lock::clear_stale(&common_dir);

        let odb = ObjectDb::new(common_dir.clone());
        odb.clear_stale_temp_files();
        let config_contents =
            fs::read_to_string(odb.config_path()).context(odb.config_path())?;
        let config: RepoConfig = serde_json::from_str(&config_contents).map_err(|error| {
            RepoError::Corruption(format!(
                "corrupt record {}: {error}",
                odb.config_path().display()
            ))
        })?;
        if config.version > CONFIG_VERSION {
            return Err(RepoError::Corruption(format!(
                "unsupported repository version {}",
                config.version
            )));
        }

        let (commits, refs) = odb.load_all()?;
        let head_contents = fs::read_to_string(odb.head_path()).context(odb.head_path())?;
        let head = Head::from_file_contents(&head_contents);
        let indexes = Index::load_all(&odb)?;

        let repo = Repository {
            workdir,
            common_dir,
            config,
            odb,
            io: IoContext::init(),
            commits,
            refs,
            head,
            indexes,
        };
        // Every reference must resolve into the loaded commit graph.
        repo.head_commit()?;
        Ok(repo)
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn common_dir(&self) -> &Path {
        &self.common_dir
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn head(&self) -> &Head {
        &self.head
    }

    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.refs.values()
    }

    pub fn find_reference(&self, name: &str) -> Option<&Reference> {
        self.refs.get(name)
    }

    pub fn commit_map(&self) -> &IndexMap<String, Commit> {
        &self.commits
    }

    /// Follows a reference's target chain to its commit.
    fn resolve_target<'a>(&'a self, target: &str) -> Option<&'a Commit> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = target;
        loop {
            if let Some(commit) = self.commits.get(current) {
                return Some(commit);
            }
            if !visited.insert(current) {
                return None;
            }
            current = &self.refs.get(current)?.target;
        }
    }

    /// The commit `HEAD` points at, through the branch when attached.
    pub fn head_commit(&self) -> Result<&Commit, RepoError> {
        let target = match &self.head {
            Head::Attached(branch) => {
                let reference = self.refs.get(branch).ok_or_else(|| {
                    RepoError::Corruption(format!("HEAD points at unknown branch '{branch}'"))
                })?;
                reference.target.as_str()
            }
            Head::Detached(hash) => hash.as_str(),
        };
        self.resolve_target(target).ok_or_else(|| {
            RepoError::Corruption(format!("HEAD resolves to unknown commit '{target}'"))
        })
    }

    fn commit_depth<'a>(&'a self, hash: &'a str, memo: &mut HashMap<&'a str, usize>) -> usize {
        if let Some(&depth) = memo.get(hash) {
            return depth;
        }
        // Break on unknown parents (possible after a partial merge import).
        let depth = match self.commits.get(hash) {
            None => 0,
            Some(commit) => {
                memo.insert(hash, 0);
                1 + commit
                    .parents
                    .iter()
                    .map(|parent| self.commit_depth(parent, memo))
                    .max()
                    .unwrap_or(0)
            }
        };
        memo.insert(hash, depth);
        depth
    }

    /// All commits, in the requested order. Topological depth orders first,
    /// with the commit date and hash as tiebreakers, so the result is
    /// deterministic.
    pub fn get_all_commits(&self, order: CommitOrder) -> Vec<&Commit> {
        let mut commits: Vec<&Commit> = self.commits.values().collect();
        match order {
            CommitOrder::Undefined => commits,
            CommitOrder::OldestFirst | CommitOrder::NewestFirst => {
                let mut memo = HashMap::new();
                let mut keyed: Vec<(usize, &Commit)> = commits
                    .drain(..)
                    .map(|commit| (self.commit_depth(&commit.hash, &mut memo), commit))
                    .collect();
                keyed.sort_by(|(depth_a, a), (depth_b, b)| {
                    depth_a
                        .cmp(depth_b)
                        .then_with(|| a.date.cmp(&b.date))
                        .then_with(|| a.hash.cmp(&b.hash))
                });
                let mut ordered: Vec<&Commit> =
                    keyed.into_iter().map(|(_, commit)| commit).collect();
                if order == CommitOrder::NewestFirst {
                    ordered.reverse();
                }
                ordered
            }
        }
    }

    /// Resolves a commit spec: a full hex hash, a reference name (including
    /// `HEAD`), optionally followed by `~<n>` suffixes walking back through
    /// first parents.
    pub fn find_commit_by_hash(&self, spec: &str) -> Result<&Commit, RepoError> {
        let invalid =
            || RepoError::InvalidArgument(format!("invalid commit-hash '{spec}'"));
        let out_of_history =
            || RepoError::NotFound(format!("commit hash '{spec}' out of history"));
        let captures = COMMIT_SPEC_RE.captures(spec).ok_or_else(invalid)?;
        let base = captures.name("base").ok_or_else(invalid)?.as_str();
        let tilde = captures.name("tilde").map(|m| m.as_str()).unwrap_or("");

        let mut current = if base == refs::HEAD_NAME {
            self.head_commit()?
        } else if let Some(reference) = self.refs.get(base) {
            self.resolve_target(&reference.target)
                .ok_or_else(out_of_history)?
        } else if is_full_hex_hash(base) {
            self.commits.get(base).ok_or_else(out_of_history)?
        } else {
            return Err(invalid());
        };

        for suffix in tilde.split('~').skip(1) {
            let steps: usize = suffix.parse().map_err(|_| invalid())?;
            for _ in 0..steps {
                let parent = current.parents.first().ok_or_else(out_of_history)?;
                current = self.commits.get(parent).ok_or_else(out_of_history)?;
            }
        }
        Ok(current)
    }

    fn disk_stats(&self, rel_path: &str) -> Option<FileStats> {
        let abs_path = path_util::to_os_path(&self.workdir, rel_path);
        abs_path
            .metadata()
            .ok()
            .map(|metadata| FileStats::from_metadata(&metadata))
    }

    /// Computes per-entry status of the workdir versus the HEAD snapshot.
    #[instrument(skip(self, options))]
    pub fn get_status(
        &self,
        filter: Filter,
        options: &HashOptions,
    ) -> Result<Vec<StatusEntry>, RepoError> {
        let head_root = &self.head_commit()?.root;
        let matcher = IgnoreMatcher::load(&self.workdir, self.config.nodefaultignore)?;
        let entries = walk::walk(&self.workdir, WalkFlags::FILES | WalkFlags::DIRS)?;

        let head_files: HashMap<&str, &crate::tree::TreeFile> = head_root
            .files()
            .into_iter()
            .map(|file| (file.path.as_str(), file))
            .collect();
        let mut seen_files: HashSet<&str> = HashSet::new();
        let mut out: Vec<StatusEntry> = Vec::new();
        let mut modified_under: HashSet<String> = HashSet::new();

        for entry in &entries {
            options.cancel.check()?;
            if entry.is_dir {
                continue;
            }
            let rel_path = entry.rel_path.as_str();
            seen_files.insert(rel_path);
            let disk_size = self
                .disk_stats(rel_path)
                .map(|stats| stats.size)
                .unwrap_or(0);
            match head_files.get(rel_path) {
                Some(file) => {
                    let modified = tree::is_file_modified(
                        file,
                        &self.workdir,
                        DetectionMode::Default,
                        options,
                    )?;
                    if modified {
                        mark_ancestors(&mut modified_under, rel_path);
                        if filter.contains(Filter::INCLUDE_MODIFIED) {
                            out.push(StatusEntry {
                                path: rel_path.to_string(),
                                status: Status::WT_MODIFIED,
                                is_dir: false,
                                size: disk_size,
                            });
                        }
                    } else if filter.contains(Filter::INCLUDE_UNMODIFIED) {
                        out.push(StatusEntry {
                            path: rel_path.to_string(),
                            status: Status::WT_UNMODIFIED,
                            is_dir: false,
                            size: disk_size,
                        });
                    }
                }
                None => {
                    if matcher.is_ignored(rel_path) {
                        if filter.contains(Filter::INCLUDE_IGNORED) {
                            out.push(StatusEntry {
                                path: rel_path.to_string(),
                                status: Status::IGNORED,
                                is_dir: false,
                                size: disk_size,
                            });
                        }
                    } else {
                        mark_ancestors(&mut modified_under, rel_path);
                        if filter.contains(Filter::INCLUDE_UNTRACKED) {
                            out.push(StatusEntry {
                                path: rel_path.to_string(),
                                status: Status::WT_NEW,
                                is_dir: false,
                                size: disk_size,
                            });
                        }
                    }
                }
            }
        }

        if filter.contains(Filter::INCLUDE_DELETED) {
            for (path, file) in &head_files {
                if !seen_files.contains(path) {
                    mark_ancestors(&mut modified_under, path);
                    out.push(StatusEntry {
                        path: path.to_string(),
                        status: Status::WT_DELETED,
                        is_dir: false,
                        size: file.stats.size,
                    });
                }
            }
        }

        if filter.contains(Filter::INCLUDE_DIRECTORIES) {
            for entry in &entries {
                if !entry.is_dir {
                    continue;
                }
                let rel_path = entry.rel_path.as_str();
                let tracked = matches!(head_root.find(rel_path), Some(TreeEntry::Dir(_)));
                let status = if tracked {
                    if modified_under.contains(rel_path) {
                        Status::WT_MODIFIED
                    } else {
                        Status::WT_UNMODIFIED
                    }
                } else if matcher.is_ignored(rel_path) {
                    Status::IGNORED
                } else {
                    Status::WT_NEW
                };
                let included = match status {
                    Status::WT_MODIFIED => filter.contains(Filter::INCLUDE_MODIFIED),
                    Status::WT_UNMODIFIED => filter.contains(Filter::INCLUDE_UNMODIFIED),
                    Status::IGNORED => filter.contains(Filter::INCLUDE_IGNORED),
                    _ => filter.contains(Filter::INCLUDE_UNTRACKED),
                };
                if included {
                    out.push(StatusEntry {
                        path: rel_path.to_string(),
                        status,
                        is_dir: true,
                        size: self
                            .disk_stats(rel_path)
                            .map(|stats| stats.size)
                            .unwrap_or(0),
                    });
                }
            }
        }

        status::sort_entries(&mut out, filter.contains(Filter::SORT_CASE_SENSITIVELY));
        Ok(out)
    }

    /// Returns the main index, creating it in memory when staging begins.
    pub fn index_mut(&mut self) -> &mut Index {
        if !self.indexes.iter().any(|index| index.id.is_empty()) {
            self.indexes.push(Index::new(""));
        }
        self.indexes
            .iter_mut()
            .find(|index| index.id.is_empty())
            .expect("main index just ensured")
    }

    /// Returns a named index, creating it when staging begins.
    pub fn named_index_mut(&mut self, id: &str) -> &mut Index {
        if !self.indexes.iter().any(|index| index.id == id) {
            self.indexes.push(Index::new(id));
        }
        self.indexes
            .iter_mut()
            .find(|index| index.id == id)
            .expect("index just ensured")
    }

    /// Stages paths for addition on the main index.
    pub fn add_files<I>(&mut self, paths: I) -> Result<(), RepoError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let odb = self.odb.clone();
        let index = self.index_mut();
        index.add_files(paths);
        index.save(&odb)?;
        Ok(())
    }

    /// Stages paths for deletion on the main index.
    pub fn delete_files<I>(&mut self, paths: I) -> Result<(), RepoError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let odb = self.odb.clone();
        let index = self.index_mut();
        index.delete_files(paths);
        index.save(&odb)?;
        Ok(())
    }

    /// Creates a commit from the main index.
    ///
    /// Within the operation, writes hit the filesystem in order: object
    /// bodies, commit record, reference, `HEAD`.
    #[instrument(skip(self, options, hash_options))]
    pub fn commit(
        &mut self,
        message: &str,
        options: &CommitOptions,
        hash_options: &HashOptions,
    ) -> Result<&Commit, RepoError> {
        if self.index_mut().is_empty() && !options.allow_empty {
            return Err(RepoError::InvalidArgument("no changes to commit".to_string()));
        }
        let _state = StateLock::acquire(&self.common_dir)?;

        let parent = self.head_commit()?.clone();
        let workdir = self.workdir.clone();
        let odb = self.odb.clone();
        let io = self.io.clone();
        let index = self
            .indexes
            .iter_mut()
            .find(|index| index.id.is_empty())
            .expect("main index exists while committing");
        index.write_files(&workdir, &odb, &io, hash_options)?;

        let mut root = parent.root.clone();
        for deleted in index.del_set().clone() {
            root.remove(&|entry| entry.path() == deleted);
        }
        // Prune directories emptied by the removals above.
        root.remove(&|entry| matches!(entry, TreeEntry::Dir(dir) if dir.children.is_empty()));

        for added in index.add_set().clone() {
            let Some(file_hash) = index.fingerprints().get(&added) else {
                return Err(RepoError::Internal(format!(
                    "staged file '{added}' has no fingerprint"
                )));
            };
            let abs_path = path_util::to_os_path(&workdir, &added);
            let stats = FileStats::from_metadata(&abs_path.metadata().context(&abs_path)?);
            let mut file = crate::tree::TreeFile::new(added.clone(), stats);
            file.hash = Some(file_hash.hash);

            let parent_dir = path_util::dirname(&added);
            let dir = root.ensure_dir(&parent_dir);
            dir.insert(TreeEntry::File(file));
        }
        // Directory stats come from disk where the directory exists; every
        // ancestor created for an added file is covered.
        let mut dir_paths: HashSet<String> = HashSet::new();
        for path in index.add_set() {
            mark_ancestors(&mut dir_paths, path);
        }
        root.rehash()?;

        let mut commit = Commit::new(message, root, vec![parent.hash.clone()]);
        commit.tags = options.tags.clone();
        commit.user_data = options.user_data.clone();
        for dir_path in &dir_paths {
            if let Some(stats) = self.disk_stats(dir_path) {
                if let Some(TreeEntry::Dir(_)) = commit.root.find(dir_path) {
                    set_dir_stats(&mut commit.root, dir_path, stats);
                }
            }
        }

        odb.write_commit(&commit)?;

        match self.head.clone() {
            Head::Attached(branch) => {
                let reference = self.refs.get_mut(&branch).ok_or_else(|| {
                    RepoError::Corruption(format!("HEAD points at unknown branch '{branch}'"))
                })?;
                reference.target = commit.hash.clone();
                let reference = reference.clone();
                odb.write_reference(&reference)?;
            }
            Head::Detached(_) => {
                self.head = Head::Detached(commit.hash.clone());
                self.write_head()?;
            }
        }

        let index = self
            .indexes
            .iter_mut()
            .find(|index| index.id.is_empty())
            .expect("main index exists while committing");
        index.invalidate(&odb)?;

        self.append_main_log(&format!("commit {} {}", commit.hash, commit.message));
        let hash = commit.hash.clone();
        self.commits.insert(hash.clone(), commit);
        Ok(self.commits.get(&hash).expect("commit just inserted"))
    }

    fn write_head(&self) -> Result<(), RepoError> {
        file_util::write_safe(
            &self.odb.head_path(),
            self.head.to_file_contents().as_bytes(),
        )?;
        Ok(())
    }

    /// Switches the workdir to another snapshot.
    #[instrument(skip(self, options))]
    pub fn checkout(
        &mut self,
        target_spec: &str,
        reset: ResetMode,
        options: &HashOptions,
    ) -> Result<(), RepoError> {
        let target = self.find_commit_by_hash(target_spec)?.clone();
        let target_branch = self
            .refs
            .get(target_spec)
            .filter(|reference| reference.ref_type == RefType::Branch)
            .map(|reference| reference.name.clone());
        let _state = StateLock::acquire(&self.common_dir)?;

        let current_root = self.head_commit()?.root.clone();
        let snapshot = self.get_status(Filter::DEFAULT, options)?;
        let modified: Vec<&StatusEntry> = snapshot
            .iter()
            .filter(|entry| entry.status.contains(Status::WT_MODIFIED))
            .collect();
        if !reset.contains(ResetMode::DISCARD_CHANGES) {
            if let Some(entry) = modified.first() {
                return Err(RepoError::WouldOverwriteWorkingCopy(format!(
                    "checkout would overwrite local changes in '{}'",
                    entry.path
                )));
            }
        }

        let plan = Diff::new(&target.root, &current_root, true);

        if !reset.contains(ResetMode::DELETE_NEW_FILES) {
            for entry in plan.added().filter(|entry| !entry.is_dir) {
                let abs_path = path_util::to_os_path(&self.workdir, &entry.path);
                if abs_path.exists() {
                    return Err(RepoError::WouldOverwriteWorkingCopy(format!(
                        "untracked file '{}' would be overwritten by checkout",
                        entry.path
                    )));
                }
            }
        }

        // Probe everything the checkout is about to touch before touching
        // anything.
        let touched: Vec<&str> = plan
            .added()
            .chain(plan.modified())
            .chain(plan.deleted())
            .filter(|entry| !entry.is_dir)
            .map(|entry| entry.path.as_str())
            .collect();
        self.io
            .perform_file_access_check(&self.workdir, touched.iter().copied(), AccessMode::Write)?;

        // Deletions first: files, then directories once they are empty,
        // deepest first.
        for entry in plan.deleted().filter(|entry| !entry.is_dir) {
            options.cancel.check()?;
            let abs_path = path_util::to_os_path(&self.workdir, &entry.path);
            match fs::remove_file(&abs_path) {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    return Err(RepoError::Io(PathError {
                        path: abs_path,
                        error,
                    }));
                }
            }
        }
        let mut deleted_dirs: Vec<&str> = plan
            .deleted()
            .filter(|entry| entry.is_dir)
            .map(|entry| entry.path.as_str())
            .collect();
        deleted_dirs.sort_by_key(|path| std::cmp::Reverse(path.matches('/').count()));
        for dir in deleted_dirs {
            let abs_path = path_util::to_os_path(&self.workdir, dir);
            fs::remove_dir(&abs_path).ok();
        }

        // Added directories may be empty in the target tree; create them
        // explicitly.
        for entry in plan.added().filter(|entry| entry.is_dir) {
            options.cancel.check()?;
            let abs_path = path_util::to_os_path(&self.workdir, &entry.path);
            fs::create_dir_all(&abs_path).context(&abs_path)?;
        }

        for entry in plan.added().chain(plan.modified()) {
            options.cancel.check()?;
            if entry.is_dir {
                continue;
            }
            self.restore_file(&target.root, &entry.path)?;
        }

        if reset.contains(ResetMode::DISCARD_CHANGES) {
            // Locally modified files that agree between the two snapshots
            // are not part of the plan; discarding still restores them.
            for entry in &modified {
                options.cancel.check()?;
                if target.root.find(&entry.path).is_some() {
                    self.restore_file(&target.root, &entry.path)?;
                }
            }
        }

        if reset.contains(ResetMode::RESTORE_DELETED_FILES) {
            for entry in snapshot
                .iter()
                .filter(|entry| entry.status.contains(Status::WT_DELETED))
            {
                options.cancel.check()?;
                if target.root.find(&entry.path).is_some() {
                    self.restore_file(&target.root, &entry.path)?;
                }
            }
        }

        if reset.contains(ResetMode::DELETE_NEW_FILES) {
            for entry in snapshot
                .iter()
                .filter(|entry| entry.status.contains(Status::WT_NEW))
            {
                options.cancel.check()?;
                // An untracked path that exists in the target snapshot was
                // just restored; only genuinely untracked leftovers go.
                if target.root.find(&entry.path).is_some() {
                    continue;
                }
                let abs_path = path_util::to_os_path(&self.workdir, &entry.path);
                fs::remove_file(&abs_path).ok();
            }
        }

        self.head = match target_branch {
            Some(branch) if !reset.contains(ResetMode::DETACH) => Head::Attached(branch),
            _ => Head::Detached(target.hash.clone()),
        };
        self.write_head()?;
        self.append_main_log(&format!("checkout {target_spec}"));
        Ok(())
    }

    /// Streams one file out of the object store into the workdir and stamps
    /// the committed mtime so the next status compares cleanly.
    fn restore_file(&self, root: &TreeDir, rel_path: &str) -> Result<(), RepoError> {
        let Some(TreeEntry::File(file)) = root.find(rel_path) else {
            return Err(RepoError::Internal(format!(
                "checkout plan references unknown file '{rel_path}'"
            )));
        };
        let Some(hash) = &file.hash else {
            return Err(RepoError::Internal(format!(
                "committed file '{rel_path}' has no fingerprint"
            )));
        };
        let abs_path = path_util::to_os_path(&self.workdir, rel_path);
        file_util::create_parent_dirs(&abs_path)?;
        let object_path = self.odb.object_path(hash);
        if !object_path.exists() {
            return Err(RepoError::Corruption(format!(
                "object {} for '{rel_path}' missing from object store",
                hash.hex()
            )));
        }
        self.io.copy_file(&object_path, &abs_path)?;

        let mtime = UNIX_EPOCH + Duration::from_millis(file.stats.mtime.0.max(0) as u64);
        let times = FileTimes::new().set_modified(mtime);
        let handle = OpenOptions::new()
            .write(true)
            .open(&abs_path)
            .context(&abs_path)?;
        handle.set_times(times).context(&abs_path)?;
        Ok(())
    }

    /// Creates a reference of the given type.
    pub fn create_new_reference(
        &mut self,
        ref_type: RefType,
        name: &str,
        start_hash: &str,
    ) -> Result<&Reference, RepoError> {
        if !refs::is_valid_branch_name(name) {
            return Err(RepoError::InvalidArgument(format!(
                "invalid reference name '{name}'"
            )));
        }
        if name == refs::HEAD_NAME || self.refs.contains_key(name) {
            return Err(RepoError::AlreadyExists(format!(
                "reference '{name}' already exists"
            )));
        }
        if !self.commits.contains_key(start_hash) {
            return Err(RepoError::NotFound(format!(
                "commit '{start_hash}' does not exist"
            )));
        }
        let _state = StateLock::acquire(&self.common_dir)?;
        let reference = Reference {
            name: name.to_string(),
            target: start_hash.to_string(),
            ref_type,
            start: Some(start_hash.to_string()),
        };
        self.odb.write_reference(&reference)?;
        self.append_main_log(&format!("create-ref {name} {start_hash}"));
        self.refs.insert(name.to_string(), reference);
        Ok(self.refs.get(name).expect("reference just inserted"))
    }

    /// Deletes a reference. `HEAD` cannot be deleted; deleting the branch
    /// `HEAD` is attached to detaches `HEAD` at its commit first.
    pub fn delete_reference(&mut self, name: &str) -> Result<(), RepoError> {
        if name == refs::HEAD_NAME {
            return Err(RepoError::InvalidArgument(
                "HEAD cannot be deleted".to_string(),
            ));
        }
        if !self.refs.contains_key(name) {
            return Err(RepoError::NotFound(format!("reference '{name}' not found")));
        }
        let _state = StateLock::acquire(&self.common_dir)?;
        if let Head::Attached(branch) = &self.head {
            if branch == name {
                let commit_hash = self.head_commit()?.hash.clone();
                self.head = Head::Detached(commit_hash);
                self.write_head()?;
            }
        }
        self.odb.remove_reference(name)?;
        self.refs.shift_remove(name);
        self.append_main_log(&format!("delete-ref {name}"));
        Ok(())
    }

    /// Renames a reference: the new record is durably written before the
    /// old file is unlinked.
    pub fn rename_reference(&mut self, old_name: &str, new_name: &str) -> Result<(), RepoError> {
        if !refs::is_valid_branch_name(new_name) {
            return Err(RepoError::InvalidArgument(format!(
                "invalid reference name '{new_name}'"
            )));
        }
        if self.refs.contains_key(new_name) || new_name == refs::HEAD_NAME {
            return Err(RepoError::AlreadyExists(format!(
                "reference '{new_name}' already exists"
            )));
        }
        let Some(mut reference) = self.refs.get(old_name).cloned() else {
            return Err(RepoError::NotFound(format!(
                "reference '{old_name}' not found"
            )));
        };
        let _state = StateLock::acquire(&self.common_dir)?;
        reference.name = new_name.to_string();
        self.odb.write_reference(&reference)?;
        self.odb.remove_reference(old_name)?;
        self.refs.shift_remove(old_name);
        self.refs.insert(new_name.to_string(), reference);
        if let Head::Attached(branch) = &self.head {
            if branch == old_name {
                self.head = Head::Attached(new_name.to_string());
                self.write_head()?;
            }
        }
        self.append_main_log(&format!("rename-ref {old_name} {new_name}"));
        Ok(())
    }

    /// Pure merge of two repositories' commit graphs and reference sets.
    ///
    /// Nothing is written. Commits are unioned by hash (equal hashes are
    /// identical records by construction); references are unioned by name,
    /// and a name whose two sides diverge keeps both, the right side under
    /// a collision-avoiding suffix. The result is deterministic regardless
    /// of input iteration order.
    pub fn merge(repo_a: &Repository, repo_b: &Repository) -> Result<MergeResult, RepoError> {
        let related = repo_a
            .commits
            .keys()
            .any(|hash| repo_b.commits.contains_key(hash));
        if !related {
            return Err(RepoError::UnrelatedHistories);
        }

        let mut commits: Vec<&Commit> = repo_a.commits.values().collect();
        for commit in repo_b.commits.values() {
            if !repo_a.commits.contains_key(&commit.hash) {
                commits.push(commit);
            }
        }
        commits.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.hash.cmp(&b.hash)));
        let merged_commits: IndexMap<String, Commit> = commits
            .into_iter()
            .map(|commit| (commit.hash.clone(), commit.clone()))
            .collect();

        let names: Vec<&String> = repo_a
            .refs
            .keys()
            .chain(repo_b.refs.keys())
            .sorted()
            .dedup()
            .collect();
        let mut merged_refs: IndexMap<String, Reference> = IndexMap::new();
        for name in names {
            match (repo_a.refs.get(name), repo_b.refs.get(name)) {
                (Some(a), None) => {
                    merged_refs.insert(name.clone(), a.clone());
                }
                (None, Some(b)) => {
                    merged_refs.insert(name.clone(), b.clone());
                }
                (Some(a), Some(b)) => {
                    let a_commit = repo_a.resolve_target(&a.target).map(|c| c.hash.clone());
                    let b_commit = repo_b.resolve_target(&b.target).map(|c| c.hash.clone());
                    merged_refs.insert(name.clone(), a.clone());
                    if a_commit != b_commit {
                        let tag = b_commit
                            .as_deref()
                            .map(|hash| hash[..6].to_string())
                            .unwrap_or_else(|| "orphan".to_string());
                        let mut renamed = format!("{name}_{tag}");
                        let mut counter = 1;
                        while merged_refs.contains_key(&renamed)
                            || repo_a.refs.contains_key(&renamed)
                        {
                            renamed = format!("{name}_{tag}_{counter}");
                            counter += 1;
                        }
                        let mut b_ref = b.clone();
                        b_ref.name = renamed.clone();
                        merged_refs.insert(renamed, b_ref);
                    }
                }
                (None, None) => unreachable!("name came from one of the maps"),
            }
        }
        merged_refs.sort_keys();

        Ok(MergeResult {
            commits: merged_commits,
            refs: merged_refs,
        })
    }

    /// Appends one line to `logs/mainlog`. Best effort: the log is an audit
    /// trail, not a correctness dependency.
    fn append_main_log(&self, operation: &str) {
        let line = format!(
            "{} {operation}\n",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        );
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.odb.main_log_path())
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(error) = result {
            warn!(%error, "failed to append to mainlog");
        }
    }
}

fn mark_ancestors(set: &mut HashSet<String>, rel_path: &str) {
    let mut dir = path_util::dirname(rel_path);
    while !dir.is_empty() {
        if !set.insert(dir.clone()) {
            break;
        }
        dir = path_util::dirname(&dir);
    }
}

fn set_dir_stats(root: &mut TreeDir, rel_path: &str, stats: FileStats) {
    fn recurse(dir: &mut TreeDir, rel_path: &str, stats: FileStats) {
        for child in &mut dir.children {
            if let TreeEntry::Dir(child_dir) = child {
                if child_dir.path == rel_path {
                    let size = child_dir.stats.size;
                    child_dir.stats = stats;
                    child_dir.stats.size = size;
                    return;
                }
                if rel_path.starts_with(&format!("{}/", child_dir.path)) {
                    recurse(child_dir, rel_path, stats);
                    return;
                }
            }
        }
    }
    recurse(root, rel_path, stats);
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn new_temp_dir() -> tempfile::TempDir {
        tempfile::Builder::new()
            .prefix("snowfs-test-")
            .tempdir()
            .unwrap()
    }

    #[test]
    fn init_creates_layout_and_genesis() {
        let dir = new_temp_dir();
        let workdir = dir.path().join("repo");
        let repo = Repository::init_ext(&workdir, &InitOptions::default()).unwrap();

        let common = workdir.join(".snow");
        for sub in ["objects", "objects/tmp", "versions", "refs", "indexes", "logs", "hooks"] {
            assert!(common.join(sub).is_dir(), "{sub} missing");
        }
        assert!(common.join("HEAD").is_file());
        assert!(common.join("config").is_file());
        assert_eq!(repo.commit_map().len(), 1);
        let genesis = repo.head_commit().unwrap();
        assert_eq!(genesis.message, "Created Project");
        assert_eq!(repo.head(), &Head::Attached("Main".to_string()));
    }

    #[test]
    fn init_refuses_existing_workdir() {
        let dir = new_temp_dir();
        let workdir = dir.path().join("repo");
        fs::create_dir(&workdir).unwrap();
        let error = Repository::init_ext(&workdir, &InitOptions::default()).unwrap_err();
        assert_eq!(error.to_string(), "workdir already exists");
    }

    #[test]
    fn init_refuses_commondir_inside_workdir() {
        let dir = new_temp_dir();
        let workdir = dir.path().join("repo");
        let options = InitOptions {
            commondir: Some(workdir.join("meta")),
            ..InitOptions::default()
        };
        let error = Repository::init_ext(&workdir, &options).unwrap_err();
        assert_eq!(error.to_string(), "commondir must be outside repository");
    }

    #[test]
    fn external_commondir_uses_pointer_file() {
        let dir = new_temp_dir();
        let workdir = dir.path().join("repo");
        let commondir = dir.path().join("meta");
        let options = InitOptions {
            commondir: Some(commondir.clone()),
            ..InitOptions::default()
        };
        Repository::init_ext(&workdir, &options).unwrap();
        let pointer = fs::read_to_string(workdir.join(".snow")).unwrap();
        assert_eq!(pointer.trim(), commondir.to_string_lossy());

        let reopened = Repository::open(&workdir).unwrap();
        assert_eq!(reopened.common_dir(), dunce::canonicalize(&commondir).unwrap());
    }

    #[test]
    fn open_walks_up_from_subdirectory() {
        let dir = new_temp_dir();
        let workdir = dir.path().join("repo");
        Repository::init_ext(&workdir, &InitOptions::default()).unwrap();
        let nested = workdir.join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        let repo = Repository::open(&nested).unwrap();
        assert_eq!(repo.workdir(), dunce::canonicalize(&workdir).unwrap());
    }

    #[test]
    fn open_outside_any_repository_fails() {
        let dir = new_temp_dir();
        let error = Repository::open(dir.path()).unwrap_err();
        assert_matches!(error, RepoError::NotFound(_));
    }

    #[test]
    fn commit_spec_parsing_errors() {
        let dir = new_temp_dir();
        let repo =
            Repository::init_ext(&dir.path().join("repo"), &InitOptions::default()).unwrap();
        let error = repo.find_commit_by_hash("no such branch!").unwrap_err();
        assert_eq!(
            error.to_string(),
            "invalid commit-hash 'no such branch!'"
        );
        let error = repo.find_commit_by_hash("HEAD~5").unwrap_err();
        assert_eq!(error.to_string(), "commit hash 'HEAD~5' out of history");
    }

    #[test]
    fn merge_requires_shared_history() {
        let dir = new_temp_dir();
        let repo_a =
            Repository::init_ext(&dir.path().join("a"), &InitOptions::default()).unwrap();
        let repo_b =
            Repository::init_ext(&dir.path().join("b"), &InitOptions::default()).unwrap();
        let error = Repository::merge(&repo_a, &repo_b).unwrap_err();
        assert_eq!(error.to_string(), "refusing to merge unrelated histories");
    }
}
