//! Declarative mount entries applied inside a child's mount namespace before
//! `exec`. Modeled after the bind-mount builder pattern used by isolate-style
//! sandboxes, narrowed down to the two kinds the judge core actually needs:
//! creating an empty file to bind a test artifact onto, and bind-mounting a
//! host path (read-only or read-write) into the sandboxed view.

use std::path::{Path, PathBuf};

use nix::mount::MsFlags;

use super::{Error, ErrorKind, Result};

/// A single mount entry to apply inside the child's mount namespace.
#[derive(Clone, Debug)]
pub enum Mount {
    /// Create an empty, writable file at `inside_path` before `exec`. Used so
    /// a later bind-mount target exists, or so the judgee can write its
    /// output through a pre-created node.
    CreateFile {
        /// Path inside the sandbox where the file is created.
        inside_path: PathBuf
    },

    /// Bind-mount `source` (a path on the host) onto `dest` (a path inside
    /// the sandbox).
    BindMount {
        /// Host-side path supplying the mount's content.
        source: PathBuf,

        /// Sandbox-side path the content is exposed at.
        dest: PathBuf,

        /// Whether the bind mount should remain writable. Checker/interactor
        /// inputs are always mounted read-only; a judgee's own working
        /// directory may be writable.
        read_write: bool
    }
}

impl Mount {
    /// Create a `Mount::CreateFile` entry.
    pub fn create_file<P: Into<PathBuf>>(inside_path: P) -> Mount {
        Mount::CreateFile { inside_path: inside_path.into() }
    }

    /// Create a read-only `Mount::BindMount` entry.
    pub fn bind_read_only<P: Into<PathBuf>, Q: Into<PathBuf>>(source: P, dest: Q) -> Mount {
        Mount::BindMount { source: source.into(), dest: dest.into(), read_write: false }
    }

    /// Create a read-write `Mount::BindMount` entry.
    pub fn bind_read_write<P: Into<PathBuf>, Q: Into<PathBuf>>(source: P, dest: Q) -> Mount {
        Mount::BindMount { source: source.into(), dest: dest.into(), read_write: true }
    }

    fn inside(&self) -> &Path {
        match self {
            Mount::CreateFile { inside_path } => inside_path,
            Mount::BindMount { dest, .. } => dest
        }
    }
}

/// Rootfs-wide constraints applied alongside the mount list.
#[derive(Clone, Copy, Debug, Default)]
pub struct RootfsOptions {
    /// Maximum number of inodes the sandbox's private tmpfs root may hold.
    /// `None` means no inode accounting is enforced.
    pub inode_limit: Option<u64>
}

/// Apply `mounts` inside the calling process, which must already have called
/// `unshare(CLONE_NEWNS)`. Must run after `chdir` target resolution but
/// before `execve`. Every `BindMount` requires its `inside_path` to already
/// exist as a file or directory of the matching kind; `CreateFile` entries
/// should precede any `BindMount` entry that targets the same path.
pub fn apply_mounts(mounts: &[Mount]) -> Result<()> {
    for mount in mounts {
        match mount {
            Mount::CreateFile { inside_path } => {
                if let Some(parent) = inside_path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::from(ErrorKind::MountFailed(
                            inside_path.display().to_string(), e.to_string()))
                    })?;
                }
                std::fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .open(inside_path)
                    .map_err(|e| Error::from(
                        ErrorKind::MountFailed(inside_path.display().to_string(), e.to_string())))?;
            },
            Mount::BindMount { source, dest, read_write } => {
                let mut flags = MsFlags::MS_BIND;
                nix::mount::mount(
                    Some(source.as_path()),
                    dest.as_path(),
                    None::<&str>,
                    flags,
                    None::<&str>
                ).map_err(|e| Error::from(
                    ErrorKind::MountFailed(mount.inside().display().to_string(), e.to_string())))?;

                if !read_write {
                    flags = MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY;
                    nix::mount::mount(
                        None::<&str>,
                        dest.as_path(),
                        None::<&str>,
                        flags,
                        None::<&str>
                    ).map_err(|e| Error::from(
                        ErrorKind::MountFailed(mount.inside().display().to_string(), e.to_string())))?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Mount;

    #[test]
    fn create_file_mount_targets_given_path() {
        let m = Mount::create_file("/sandbox/out");
        match m {
            Mount::CreateFile { inside_path } => assert_eq!(inside_path.to_str(), Some("/sandbox/out")),
            _ => panic!("expected CreateFile")
        }
    }

    #[test]
    fn bind_mount_defaults_match_read_write_flag() {
        let ro = Mount::bind_read_only("/host/in", "/sandbox/in");
        let rw = Mount::bind_read_write("/host/work", "/sandbox/work");
        match ro {
            Mount::BindMount { read_write, .. } => assert!(!read_write),
            _ => panic!("expected BindMount")
        }
        match rw {
            Mount::BindMount { read_write, .. } => assert!(read_write),
            _ => panic!("expected BindMount")
        }
    }
}
