//! Container invocation builder.
//!
//! A [`ContainerInvocation`] accumulates the options of one `<runtime> run`
//! call. Each `with_*` method consumes the invocation and returns the updated
//! value, so callers can assemble mounts and flags conditionally:
//!
//! ```rust,ignore
//! let mut invocation = ContainerInvocation::new()
//!     .with_auto_remove()
//!     .with_bind_mount(&output_dir, "/drb/rpms");
//! if let Some(key) = &signing_key {
//!     invocation = invocation.with_read_only_bind_mount(key, "/drb/signing/private.key");
//! }
//! invocation
//!     .with_image("almalinux:9")
//!     .with_command_and_args("/bin/bash", ["/drb/work/build.sh"])
//!     .run(&runner, "docker")?;
//! ```
//!
//! `run` takes the invocation by value, so a finalized invocation cannot be
//! run a second time by accident.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::process::{Cmd, ExecutionResult, ProcessError, ProcessRunner};

/// A host directory (or file) exposed inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl BindMount {
    fn volume_arg(&self) -> String {
        let mut arg = format!("{}:{}", self.host_path.display(), self.container_path);
        if self.read_only {
            arg.push_str(":ro");
        }
        arg
    }
}

/// Errors from finalizing an invocation.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("container invocation has no image")]
    MissingImage,

    #[error("container invocation has no command")]
    MissingCommand,

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Options for a single `run` of the container runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInvocation {
    auto_remove: bool,
    pull_always: bool,
    bind_mounts: Vec<BindMount>,
    workdir: Option<String>,
    env: Vec<(String, String)>,
    extra_options: Vec<String>,
    image: Option<String>,
    command: Option<String>,
    args: Vec<String>,
}

impl ContainerInvocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove the container once it exits.
    pub fn with_auto_remove(mut self) -> Self {
        self.auto_remove = true;
        self
    }

    /// Pull the image before running, even if a local copy exists.
    pub fn with_pull_always(mut self) -> Self {
        self.pull_always = true;
        self
    }

    /// Mount `host_path` read-write at `container_path`.
    ///
    /// A later mount for the same container path replaces the earlier one.
    pub fn with_bind_mount(self, host_path: impl AsRef<Path>, container_path: impl AsRef<str>) -> Self {
        self.push_mount(BindMount {
            host_path: host_path.as_ref().to_path_buf(),
            container_path: container_path.as_ref().to_string(),
            read_only: false,
        })
    }

    /// Mount `host_path` read-only at `container_path`.
    pub fn with_read_only_bind_mount(
        self,
        host_path: impl AsRef<Path>,
        container_path: impl AsRef<str>,
    ) -> Self {
        self.push_mount(BindMount {
            host_path: host_path.as_ref().to_path_buf(),
            container_path: container_path.as_ref().to_string(),
            read_only: true,
        })
    }

    fn push_mount(mut self, mount: BindMount) -> Self {
        match self
            .bind_mounts
            .iter_mut()
            .find(|m| m.container_path == mount.container_path)
        {
            Some(existing) => {
                tracing::debug!(
                    container_path = %mount.container_path,
                    "replacing existing bind mount"
                );
                *existing = mount;
            }
            None => self.bind_mounts.push(mount),
        }
        self
    }

    /// Working directory for the command inside the container.
    pub fn with_workdir(mut self, path: impl AsRef<str>) -> Self {
        self.workdir = Some(path.as_ref().to_string());
        self
    }

    /// Environment variable visible to the command inside the container.
    pub fn with_env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Raw options passed to the runtime's `run` before the image reference.
    pub fn with_extra_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extra_options
            .extend(options.into_iter().map(|o| o.as_ref().to_string()));
        self
    }

    pub fn with_image(mut self, reference: impl AsRef<str>) -> Self {
        self.image = Some(reference.as_ref().to_string());
        self
    }

    pub fn with_command_and_args<I, S>(mut self, command: impl AsRef<str>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.command = Some(command.as_ref().to_string());
        self.args = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        self
    }

    pub fn bind_mounts(&self) -> &[BindMount] {
        &self.bind_mounts
    }

    /// Render the runtime command line.
    ///
    /// Every option goes before the image reference; anything after it is
    /// handed to the command inside the container.
    pub fn to_cmd(&self, runtime: &str) -> Result<Cmd, InvocationError> {
        let image = self.image.as_ref().ok_or(InvocationError::MissingImage)?;
        let command = self.command.as_ref().ok_or(InvocationError::MissingCommand)?;

        let mut cmd = Cmd::new(runtime).arg("run");

        if self.auto_remove {
            cmd = cmd.arg("--rm");
        }
        if self.pull_always {
            cmd = cmd.args(["--pull", "always"]);
        }
        for mount in &self.bind_mounts {
            cmd = cmd.arg("-v").arg(mount.volume_arg());
        }
        if let Some(ref workdir) = self.workdir {
            cmd = cmd.arg("-w").arg(workdir);
        }
        for (key, value) in &self.env {
            cmd = cmd.arg("-e").arg(format!("{}={}", key, value));
        }

        Ok(cmd
            .args(&self.extra_options)
            .arg(image)
            .arg(command)
            .args(&self.args))
    }

    /// Run the container and wait for it to exit.
    pub fn run<R: ProcessRunner + ?Sized>(
        self,
        runner: &R,
        runtime: &str,
    ) -> Result<ExecutionResult, InvocationError> {
        let cmd = self.to_cmd(runtime)?;
        Ok(cmd.run_with(runner)?)
    }
}

/// Whether `runtime` runs containers rootless. Root inside such a container
/// is the invoking user on the host, and other uids map to subordinate ids.
///
/// Asks in podman's terms first, then in docker's. A runtime that answers
/// neither is treated as rootful.
pub fn is_rootless<R: ProcessRunner + ?Sized>(runner: &R, runtime: &str) -> bool {
    let podman = Cmd::new(runtime).args(["info", "--format", "{{.Host.Security.Rootless}}"]);
    if let Ok(result) = podman.run_with(runner) {
        match result.output_trimmed() {
            "true" => return true,
            "false" => return false,
            _ => {}
        }
    }

    let docker = Cmd::new(runtime).args(["info", "--format", "{{.SecurityOptions}}"]);
    match docker.run_with(runner) {
        Ok(result) => result.output.contains("name=rootless"),
        Err(e) => {
            debug!(%runtime, error = %e, "cannot query runtime mode, assuming rootful");
            false
        }
    }
}
