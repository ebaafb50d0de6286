//! Ownership normalization of build output.
//!
//! Build containers usually run as root, so the packages they write land on
//! the host owned by root. The normalizer hands every file (and directory)
//! under the architecture subdirectories over to a caller-chosen uid/gid.
//! Entries that already have the target ownership are left alone, which
//! makes a second run a no-op.

use std::fmt;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::container::{is_rootless, ContainerInvocation, InvocationError};
use crate::output;
use crate::process::{ProcessError, ProcessRunner};

const CONTAINER_OUTPUT_DIR: &str = "/drb/rpms";

/// Owner and group to apply to build output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnershipTarget {
    pub uid: u32,
    pub gid: u32,
}

impl OwnershipTarget {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// The real uid/gid of this process.
    pub fn current() -> Self {
        // SAFETY: getuid/getgid cannot fail and touch no memory.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self { uid, gid }
    }

    fn matches(&self, metadata: &std::fs::Metadata) -> bool {
        metadata.uid() == self.uid && metadata.gid() == self.gid
    }
}

impl fmt::Display for OwnershipTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ownership '{0}', expected <uid>:<gid> with numeric ids")]
pub struct ParseOwnershipError(String);

impl FromStr for OwnershipTarget {
    type Err = ParseOwnershipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseOwnershipError(s.to_string());
        let (uid, gid) = s.split_once(':').ok_or_else(err)?;
        Ok(Self {
            uid: uid.trim().parse().map_err(|_| err())?,
            gid: gid.trim().parse().map_err(|_| err())?,
        })
    }
}

#[derive(Debug, Error)]
pub enum OwnershipError {
    #[error("failed to scan build output {}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to change ownership of {} to {target}", .path.display())]
    Chown {
        path: PathBuf,
        target: OwnershipTarget,
        #[source]
        source: io::Error,
    },

    #[error("failed to change ownership to {target} inside a container")]
    Container {
        target: OwnershipTarget,
        #[source]
        source: ProcessError,
    },

    #[error("{0}")]
    Invocation(String),
}

/// Applies an ownership change to a set of paths below `root`.
pub trait ChangeOwner {
    fn change_owner(
        &self,
        root: &Path,
        paths: &[PathBuf],
        target: OwnershipTarget,
    ) -> Result<(), OwnershipError>;
}

/// `chown` from this process. Needs privileges unless the target is the
/// current user and the files already belong to it.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostChown;

impl ChangeOwner for HostChown {
    fn change_owner(
        &self,
        _root: &Path,
        paths: &[PathBuf],
        target: OwnershipTarget,
    ) -> Result<(), OwnershipError> {
        for path in paths {
            std::os::unix::fs::chown(path, Some(target.uid), Some(target.gid)).map_err(
                |source| OwnershipError::Chown {
                    path: path.clone(),
                    target,
                    source,
                },
            )?;
        }
        Ok(())
    }
}

/// `chown` run as root inside a throwaway container with `root` mounted.
///
/// Lets an unprivileged caller take ownership of files the build container
/// created as root. With a rootless runtime the files already belong to the
/// caller's user, so the change is made from the host instead.
pub struct ContainerChown<'a, R: ProcessRunner + ?Sized> {
    runner: &'a R,
    runtime: &'a str,
    image: &'a str,
}

impl<'a, R: ProcessRunner + ?Sized> ContainerChown<'a, R> {
    pub fn new(runner: &'a R, runtime: &'a str, image: &'a str) -> Self {
        Self {
            runner,
            runtime,
            image,
        }
    }
}

impl<R: ProcessRunner + ?Sized> ChangeOwner for ContainerChown<'_, R> {
    fn change_owner(
        &self,
        root: &Path,
        paths: &[PathBuf],
        target: OwnershipTarget,
    ) -> Result<(), OwnershipError> {
        if is_rootless(self.runner, self.runtime) {
            // Container root is this user; a chown in there would land on
            // subordinate ids.
            debug!(runtime = %self.runtime, "rootless runtime, changing ownership from the host");
            return HostChown.change_owner(root, paths, target);
        }

        let mut args = vec![target.to_string(), "--".to_string()];
        for path in paths {
            let relative = path.strip_prefix(root).map_err(|_| {
                OwnershipError::Invocation(format!(
                    "{} is not under {}",
                    path.display(),
                    root.display()
                ))
            })?;
            args.push(if relative.as_os_str().is_empty() {
                ".".to_string()
            } else {
                relative.to_string_lossy().into_owned()
            });
        }

        ContainerInvocation::new()
            .with_auto_remove()
            .with_bind_mount(root, CONTAINER_OUTPUT_DIR)
            .with_workdir(CONTAINER_OUTPUT_DIR)
            .with_image(self.image)
            .with_command_and_args("chown", args)
            .run(self.runner, self.runtime)
            .map(|_| ())
            .map_err(|e| match e {
                InvocationError::Process(source) => OwnershipError::Container { target, source },
                other => OwnershipError::Invocation(other.to_string()),
            })
    }
}

/// Walks build output and hands it over to a target owner.
pub struct OwnershipNormalizer<C: ChangeOwner> {
    chown: C,
}

impl<C: ChangeOwner> OwnershipNormalizer<C> {
    pub fn new(chown: C) -> Self {
        Self { chown }
    }

    /// Change ownership of everything under the architecture subdirectories
    /// of `output_dir`. Returns how many entries were changed.
    pub fn normalize(&self, output_dir: &Path, target: OwnershipTarget) -> Result<usize, OwnershipError> {
        let pending = pending_entries(output_dir, target)?;
        if pending.is_empty() {
            debug!(%target, "build output already has target ownership");
            return Ok(0);
        }

        info!(%target, entries = pending.len(), "normalizing ownership");
        self.chown.change_owner(output_dir, &pending, target)?;
        Ok(pending.len())
    }
}

/// Regular files and directories under the architecture subdirectories whose
/// owner or group differs from `target`.
pub fn pending_entries(output_dir: &Path, target: OwnershipTarget) -> Result<Vec<PathBuf>, OwnershipError> {
    let scan_err = |path: &Path, source: io::Error| OwnershipError::Scan {
        path: path.to_path_buf(),
        source,
    };

    let mut pending = Vec::new();
    for dir in output::architecture_dirs(output_dir).map_err(|e| scan_err(output_dir, e))? {
        for entry in WalkDir::new(&dir) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir.as_path()).to_path_buf();
                scan_err(&path, e.into())
            })?;
            let file_type = entry.file_type();
            if !(file_type.is_file() || file_type.is_dir()) {
                continue;
            }
            let metadata = entry.metadata().map_err(|e| scan_err(entry.path(), e.into()))?;
            if !target.matches(&metadata) {
                pending.push(entry.into_path());
            }
        }
    }
    Ok(pending)
}
