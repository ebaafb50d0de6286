//! Shared test utilities for drb tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use drb::process::{Cmd, ExecutionResult, ProcessError, ProcessRunner, SpawnedProcessError};
use tempfile::TempDir;

pub const TMUX_SPEC: &str = include_str!("fixtures/tmux.spec");
pub const TMUX_SPECTEMPLATE: &str = include_str!("fixtures/tmux.spectemplate");
pub const SIGN_PRIV: &str = include_str!("fixtures/sign.gpg");
pub const SIGN_PUB: &str = include_str!("fixtures/sign.pub");

pub const ARCH: &str = "x86_64";
pub const PACKAGES: [&str; 2] = [
    "tmux-1.6-3.el7.x86_64.rpm",
    "tmux-debuginfo-1.6-3.el7.x86_64.rpm",
];

/// Test environment with source, spec-override and output directories.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub src: PathBuf,
    pub specs: PathBuf,
    pub rpm: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let src = base.join("src");
        let specs = base.join("specs");
        let rpm = base.join("rpm");
        for dir in [&src, &specs, &rpm] {
            fs::create_dir_all(dir).expect("Failed to create test dir");
        }

        Self {
            _temp_dir: temp_dir,
            src,
            specs,
            rpm,
        }
    }

    pub fn write_src(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.src.join(name);
        fs::write(&path, contents).expect("Failed to write source file");
        path
    }

    pub fn write_spec_override(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.specs.join(name);
        fs::write(&path, contents).expect("Failed to write spec");
        path
    }

    pub fn arch_dir(&self) -> PathBuf {
        self.rpm.join(ARCH)
    }

    /// Names of the files under `<rpm>/<arch>/`, sorted.
    pub fn built_files(&self) -> Vec<String> {
        list_names(&self.arch_dir())
    }
}

pub fn list_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// What kind of container a recorded command started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launched {
    Build,
    Sign,
    Chown,
    /// `<runtime> info`, not a container.
    Info,
    Other,
}

pub fn launched(cmd: &Cmd) -> Launched {
    let args = cmd.get_args();
    if args.first().is_some_and(|a| a == "info") {
        Launched::Info
    } else if args.iter().any(|a| a == "/drb/work/build.sh") {
        Launched::Build
    } else if args.iter().any(|a| a == "/drb/work/sign.sh") {
        Launched::Sign
    } else if args.iter().any(|a| a == "chown") {
        Launched::Chown
    } else {
        Launched::Other
    }
}

/// Host path mounted at `container_path` by a `-v host:container[:ro]` arg.
pub fn mount_for(cmd: &Cmd, container_path: &str) -> Option<PathBuf> {
    let args = cmd.get_args();
    args.windows(2)
        .filter(|w| w[0] == "-v")
        .find_map(|w| {
            let spec = w[1].strip_suffix(":ro").unwrap_or(&w[1]);
            spec.strip_suffix(container_path)
                .and_then(|host| host.strip_suffix(':'))
                .map(PathBuf::from)
        })
}

/// Value of a `-e KEY=VALUE` arg.
pub fn env_for(cmd: &Cmd, key: &str) -> Option<String> {
    let prefix = format!("{}=", key);
    cmd.get_args()
        .windows(2)
        .filter(|w| w[0] == "-e")
        .find_map(|w| w[1].strip_prefix(&prefix).map(str::to_string))
}

pub fn ok(output: &str) -> Result<ExecutionResult, ProcessError> {
    Ok(ExecutionResult {
        exit_code: 0,
        output: output.to_string(),
    })
}

pub fn exited(cmd: &Cmd, exit_code: i32, output: &str) -> Result<ExecutionResult, ProcessError> {
    Err(ProcessError::Exited(SpawnedProcessError {
        command: cmd.program().to_string(),
        args: cmd.get_args().to_vec(),
        exit_code,
        output: output.to_string(),
    }))
}

/// Simulates what the build container leaves behind: two packages under
/// `<rpms mount>/<arch>/`.
pub fn write_packages(cmd: &Cmd) {
    let out = mount_for(cmd, "/drb/rpms").expect("build has no output mount");
    let arch = out.join(ARCH);
    fs::create_dir_all(&arch).unwrap();
    for name in PACKAGES {
        fs::write(arch.join(name), b"rpm").unwrap();
    }
}

type Handler = Box<dyn Fn(&Cmd) -> Result<ExecutionResult, ProcessError>>;

/// Records every command and answers with a scripted handler instead of
/// spawning anything.
pub struct FakeRunner {
    handler: Handler,
    calls: RefCell<Vec<Cmd>>,
}

impl FakeRunner {
    pub fn new(handler: impl Fn(&Cmd) -> Result<ExecutionResult, ProcessError> + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// A runner whose containers all succeed; the build container writes
    /// packages. The runtime reports itself as rootful.
    pub fn succeeding() -> Self {
        Self::with_rootless(false)
    }

    pub fn with_rootless(rootless: bool) -> Self {
        Self::new(move |cmd| match launched(cmd) {
            Launched::Build => {
                write_packages(cmd);
                ok("")
            }
            Launched::Info => ok(if rootless { "true\n" } else { "false\n" }),
            _ => ok(""),
        })
    }

    pub fn calls(&self) -> Vec<Cmd> {
        self.calls.borrow().clone()
    }

    pub fn launched(&self) -> Vec<Launched> {
        self.calls.borrow().iter().map(launched).collect()
    }
}

impl ProcessRunner for FakeRunner {
    fn execute(&self, cmd: &Cmd) -> Result<ExecutionResult, ProcessError> {
        self.calls.borrow_mut().push(cmd.clone());
        (self.handler)(cmd)
    }
}
