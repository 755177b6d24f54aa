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

//! Filesystem-aware I/O: mountpoint table, reflink-accelerated copy, and
//! batched access probing.
//!
//! The access probe answers one question per file: is another process
//! holding an incompatible handle right now? The probe opens the file in
//! the requested mode just long enough to observe contention and never
//! takes a lasting lock.

use std::fmt;
use std::fs::File;
use std::io;
use std::io::Read as _;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::hash::DEFAULT_BUFFER_SIZE;
use crate::path_util;

/// Probe mode for [`IoContext::perform_file_access_check`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// One mounted filesystem and its type tag (`ext4`, `apfs`, `ntfs`, …).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mountpoint {
    pub path: PathBuf,
    pub filesystem: String,
}

impl Mountpoint {
    /// Whether the filesystem is known to support constant-time reflink
    /// copies (APFS clonefile, ReFS block cloning, Linux `FICLONE`).
    pub fn supports_reflink(&self) -> bool {
        matches!(
            self.filesystem.as_str(),
            "apfs" | "refs" | "btrfs" | "xfs" | "bcachefs"
        )
    }
}

/// Contention report for one probed file. The message shape is stable;
/// callers and tests rely on it verbatim.
#[derive(Debug, Error)]
#[error("File '{rel_path}' is being written by another process")]
pub struct FileAccessError {
    pub rel_path: String,
    #[source]
    pub error: io::Error,
}

/// Aggregate of every per-file probe failure in one batch.
#[derive(Debug, Default)]
pub struct AccessCheckError {
    pub errors: Vec<FileAccessError>,
}

impl fmt::Display for AccessCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.errors {
            if !first {
                writeln!(f)?;
            }
            write!(f, "{error}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for AccessCheckError {}

/// Process-wide filesystem context, initialised once per repository.
#[derive(Clone, Debug, Default)]
pub struct IoContext {
    mounts: Vec<Mountpoint>,
}

impl IoContext {
    /// Enumerates mountpoints. A platform without an enumerable mount table
    /// yields an empty table, which disables reflink detection but nothing
    /// else.
    pub fn init() -> Self {
        let mounts = platform::enumerate_mounts().unwrap_or_else(|error| {
            debug!(%error, "mountpoint enumeration failed");
            Vec::new()
        });
        Self { mounts }
    }

    #[cfg(test)]
    fn with_mounts(mounts: Vec<Mountpoint>) -> Self {
        Self { mounts }
    }

    pub fn mounts(&self) -> &[Mountpoint] {
        &self.mounts
    }

    /// The mountpoint holding `path`: the longest mount prefix wins.
    pub fn mount_for(&self, path: &Path) -> Option<&Mountpoint> {
        self.mounts
            .iter()
            .filter(|mount| path.starts_with(&mount.path))
            .max_by_key(|mount| mount.path.as_os_str().len())
    }

    fn reflink_candidate(&self, src: &Path, dst: &Path) -> bool {
        let (Some(src_mount), Some(dst_mount)) = (self.mount_for(src), self.mount_for(dst)) else {
            return false;
        };
        src_mount.path == dst_mount.path && src_mount.supports_reflink()
    }

    /// Copies `src` to `dst`, reflinking when both ends share a
    /// reflink-capable mount and falling back to a streaming copy. The two
    /// paths are behaviourally identical; only performance differs.
    pub fn copy_file(&self, src: &Path, dst: &Path) -> Result<(), PathError> {
        if self.reflink_candidate(src, dst) {
            match platform::try_reflink(src, dst) {
                Ok(()) => return Ok(()),
                Err(error) => {
                    debug!(
                        src = %src.display(),
                        dst = %dst.display(),
                        %error,
                        "reflink failed, falling back to streaming copy"
                    );
                }
            }
        }
        stream_copy(src, dst)
    }

    /// Probes every file in `rel_paths` for read/write contention without
    /// taking a lasting lock. Missing files are not failures (the caller may
    /// be about to create them); every other failure is collected into one
    /// aggregate error.
    pub fn perform_file_access_check<'a, I>(
        &self,
        root: &Path,
        rel_paths: I,
        mode: AccessMode,
    ) -> Result<(), AccessCheckError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut errors = Vec::new();
        for rel_path in rel_paths {
            let abs_path = path_util::to_os_path(root, rel_path);
            match platform::probe_access(&abs_path, mode) {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => errors.push(FileAccessError {
                    rel_path: rel_path.to_string(),
                    error,
                }),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AccessCheckError { errors })
        }
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::ResourceBusy
    )
}

fn stream_copy(src: &Path, dst: &Path) -> Result<(), PathError> {
    let mut reader = File::open(src).context(src)?;
    let mut writer = File::create(dst).context(dst)?;
    let mut buffer = vec![0u8; DEFAULT_BUFFER_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(read) => read,
            Err(error) if is_transient(&error) => {
                thread::sleep(Duration::from_millis(10));
                reader.read(&mut buffer).context(src)?
            }
            Err(error) => return Err(PathError {
                path: src.to_path_buf(),
                error,
            }),
        };
        if read == 0 {
            break;
        }
        writer.write_all(&buffer[..read]).context(dst)?;
    }
    writer.flush().context(dst)?;
    Ok(())
}

#[cfg(unix)]
mod platform {
    use std::fs::File;
    use std::fs::OpenOptions;
    use std::io;
    use std::path::Path;

    use rustix::fs::flock;
    use rustix::fs::FlockOperation;

    use super::AccessMode;
    use super::Mountpoint;

    /// Open in the requested mode, take a non-blocking advisory lock long
    /// enough to observe contention, release immediately.
    pub fn probe_access(path: &Path, mode: AccessMode) -> io::Result<()> {
        let file = match mode {
            AccessMode::Read => File::open(path)?,
            AccessMode::Write => OpenOptions::new().write(true).open(path)?,
        };
        let operation = match mode {
            AccessMode::Read => FlockOperation::NonBlockingLockShared,
            AccessMode::Write => FlockOperation::NonBlockingLockExclusive,
        };
        flock(&file, operation).map_err(io::Error::from)?;
        flock(&file, FlockOperation::Unlock).ok();
        Ok(())
    }

    #[cfg(target_os = "linux")]
    pub fn try_reflink(src: &Path, dst: &Path) -> io::Result<()> {
        let source = File::open(src)?;
        let dest = File::create(dst)?;
        rustix::fs::ioctl_ficlone(&dest, &source).map_err(io::Error::from)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn try_reflink(_src: &Path, _dst: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "reflink not supported on this platform",
        ))
    }

    #[cfg(target_os = "linux")]
    pub fn enumerate_mounts() -> io::Result<Vec<Mountpoint>> {
        let contents = std::fs::read_to_string("/proc/self/mounts")?;
        Ok(super::parse_mount_table(&contents))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn enumerate_mounts() -> io::Result<Vec<Mountpoint>> {
        Ok(Vec::new())
    }
}

#[cfg(windows)]
mod platform {
    use std::fs::OpenOptions;
    use std::io;
    use std::os::windows::fs::OpenOptionsExt as _;
    use std::path::Path;

    use super::AccessMode;
    use super::Mountpoint;

    /// Open with share mode 0: the open itself fails if any other process
    /// holds a handle, which is exactly the contention signal we want. The
    /// handle is dropped immediately.
    pub fn probe_access(path: &Path, mode: AccessMode) -> io::Result<()> {
        let mut options = OpenOptions::new();
        match mode {
            AccessMode::Read => options.read(true),
            AccessMode::Write => options.write(true),
        };
        options.share_mode(0).open(path).map(|_| ())
    }

    pub fn try_reflink(_src: &Path, _dst: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "reflink not supported on this platform",
        ))
    }

    pub fn enumerate_mounts() -> io::Result<Vec<Mountpoint>> {
        Ok(Vec::new())
    }
}

/// Parses a `/proc/self/mounts`-shaped table: one mount per line,
/// whitespace-separated `device mountpoint fstype options …` fields with
/// octal escapes in the mountpoint.
fn parse_mount_table(contents: &str) -> Vec<Mountpoint> {
    let mut mounts = Vec::new();
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let _device = fields.next();
        let (Some(mountpoint), Some(fstype)) = (fields.next(), fields.next()) else {
            continue;
        };
        mounts.push(Mountpoint {
            path: PathBuf::from(unescape_mount_path(mountpoint)),
            filesystem: fstype.to_ascii_lowercase(),
        });
    }
    mounts
}

fn unescape_mount_path(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let digits: String = chars.clone().take(3).collect();
        if digits.len() == 3 {
            if let Ok(code) = u8::from_str_radix(&digits, 8) {
                out.push(code as char);
                chars.nth(2);
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn new_temp_dir() -> tempfile::TempDir {
        tempfile::Builder::new()
            .prefix("snowfs-test-")
            .tempdir()
            .unwrap()
    }

    #[test]
    fn copy_file_preserves_contents() {
        let dir = new_temp_dir();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        let contents: Vec<u8> = (0..100_000u32).flat_map(|n| n.to_le_bytes()).collect();
        fs::write(&src, &contents).unwrap();

        let context = IoContext::init();
        context.copy_file(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), contents);
    }

    #[test]
    fn access_check_passes_on_idle_files() {
        let dir = new_temp_dir();
        fs::write(dir.path().join("a"), b"a").unwrap();
        fs::write(dir.path().join("b"), b"b").unwrap();

        let context = IoContext::init();
        context
            .perform_file_access_check(dir.path(), ["a", "b"], AccessMode::Read)
            .unwrap();
        context
            .perform_file_access_check(dir.path(), ["a", "b"], AccessMode::Write)
            .unwrap();
    }

    #[test]
    fn access_check_ignores_missing_files() {
        let dir = new_temp_dir();
        let context = IoContext::init();
        context
            .perform_file_access_check(dir.path(), ["does-not-exist"], AccessMode::Write)
            .unwrap();
    }

    #[test]
    fn aggregate_error_message_is_stable() {
        let error = AccessCheckError {
            errors: vec![
                FileAccessError {
                    rel_path: "renders/shot1.exr".to_string(),
                    error: io::Error::new(io::ErrorKind::WouldBlock, "locked"),
                },
                FileAccessError {
                    rel_path: "scene.blend".to_string(),
                    error: io::Error::new(io::ErrorKind::WouldBlock, "locked"),
                },
            ],
        };
        assert_eq!(
            error.to_string(),
            "File 'renders/shot1.exr' is being written by another process\n\
             File 'scene.blend' is being written by another process"
        );
    }

    #[test]
    fn mount_table_parsing() {
        let table = "sysfs /sys sysfs rw 0 0\n\
                     /dev/sda1 / ext4 rw,relatime 0 0\n\
                     /dev/sdb1 /mnt/media\\040pool btrfs rw 0 0\n\
                     broken-line\n";
        let mounts = parse_mount_table(table);
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[1].path, PathBuf::from("/"));
        assert_eq!(mounts[1].filesystem, "ext4");
        assert!(!mounts[1].supports_reflink());
        assert_eq!(mounts[2].path, PathBuf::from("/mnt/media pool"));
        assert!(mounts[2].supports_reflink());
    }

    #[test]
    fn longest_mount_prefix_wins() {
        let context = IoContext::with_mounts(vec![
            Mountpoint {
                path: PathBuf::from("/"),
                filesystem: "ext4".to_string(),
            },
            Mountpoint {
                path: PathBuf::from("/mnt/assets"),
                filesystem: "btrfs".to_string(),
            },
        ]);
        let mount = context
            .mount_for(Path::new("/mnt/assets/scenes/a.blend"))
            .unwrap();
        assert_eq!(mount.filesystem, "btrfs");
        let root = context.mount_for(Path::new("/home/user")).unwrap();
        assert_eq!(root.filesystem, "ext4");
    }
}
