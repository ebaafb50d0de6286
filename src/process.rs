//! Centralized command execution with consistent error handling.
//!
//! Every external program drb touches (the container runtime, and through it
//! `rpmbuild`, `rpm` and `gpg`) goes through a [`ProcessRunner`]. The runner
//! captures stdout and stderr through a single pipe so the captured output
//! keeps the interleaving the program produced, and turns a non-zero exit
//! into a [`SpawnedProcessError`] carrying everything needed for a
//! post-mortem.

use std::fmt;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::debug;

const MASKED_VALUE: &str = "***";

/// Result of a command that exited successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code (always 0 when returned from [`ProcessRunner::execute`]).
    pub exit_code: i32,
    /// Combined stdout and stderr, in the order produced.
    pub output: String,
}

impl ExecutionResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get the combined output, trimmed of whitespace.
    pub fn output_trimmed(&self) -> &str {
        self.output.trim()
    }
}

/// An external process terminated with a non-zero exit status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} failed (exit code {exit_code}){}", display_command(.command, .args), display_output(.output))]
pub struct SpawnedProcessError {
    pub command: String,
    pub args: Vec<String>,
    /// Exit code, or -1 if the process was terminated by a signal.
    pub exit_code: i32,
    /// Full combined output of the process.
    pub output: String,
}

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to execute '{program}'. Is it installed?")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to capture output of '{program}'")]
    Capture {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Exited(#[from] SpawnedProcessError),
}

impl ProcessError {
    /// The non-zero exit, if that is what happened.
    pub fn as_exited(&self) -> Option<&SpawnedProcessError> {
        match self {
            ProcessError::Exited(e) => Some(e),
            _ => None,
        }
    }
}

/// Description of a command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Set an environment variable for the child process.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.envs
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Run the command through `runner`.
    pub fn run_with<R: ProcessRunner + ?Sized>(
        &self,
        runner: &R,
    ) -> Result<ExecutionResult, ProcessError> {
        runner.execute(self)
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&display_command(&self.program, &self.args))
    }
}

/// Spawns external commands.
///
/// Implementations block until the command terminates. A non-zero exit must
/// be reported as [`ProcessError::Exited`], never as a successful result.
pub trait ProcessRunner {
    fn execute(&self, cmd: &Cmd) -> Result<ExecutionResult, ProcessError>;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for &R {
    fn execute(&self, cmd: &Cmd) -> Result<ExecutionResult, ProcessError> {
        (**self).execute(cmd)
    }
}

/// Runs commands as real OS processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    /// Echo output to stderr as it is produced.
    echo: bool,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream the child's output to the terminal while capturing it.
    pub fn verbose(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    fn collect_output(&self, reader: io::PipeReader) -> io::Result<String> {
        let mut reader = BufReader::new(reader);
        let mut output = String::new();
        let mut line = Vec::new();
        let stderr = io::stderr();

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let text = String::from_utf8_lossy(&line);
            if self.echo {
                let mut handle = stderr.lock();
                let _ = handle.write_all(text.as_bytes());
                let _ = handle.flush();
            }
            output.push_str(&text);
        }

        Ok(output)
    }
}

impl ProcessRunner for SystemRunner {
    fn execute(&self, cmd: &Cmd) -> Result<ExecutionResult, ProcessError> {
        debug!(command = %cmd, "spawning process");

        let spawn_err = |source| ProcessError::Spawn {
            program: cmd.program.clone(),
            source,
        };

        let (reader, writer) = io::pipe().map_err(spawn_err)?;

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .envs(cmd.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stderr(writer.try_clone().map_err(spawn_err)?)
            .stdout(writer);

        if let Some(ref dir) = cmd.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(spawn_err)?;
        // The command still holds the write ends of the pipe; reading would
        // never hit EOF while they are open.
        drop(command);

        let output = self
            .collect_output(reader)
            .map_err(|source| ProcessError::Capture {
                program: cmd.program.clone(),
                source,
            })?;
        let status = child.wait().map_err(|source| ProcessError::Capture {
            program: cmd.program.clone(),
            source,
        })?;

        let exit_code = status.code().unwrap_or(-1);
        debug!(program = %cmd.program, exit_code, "process finished");

        if !status.success() {
            return Err(SpawnedProcessError {
                command: cmd.program.clone(),
                args: cmd.args.clone(),
                exit_code,
                output,
            }
            .into());
        }

        Ok(ExecutionResult { exit_code, output })
    }
}

/// Command line for logs and error messages. Values of `-e KEY=VALUE`
/// arguments are masked since they may carry credentials.
fn display_command(program: &str, args: &[String]) -> String {
    let mut line = String::from("'");
    line.push_str(program);
    let mut env_value_next = false;
    for arg in args {
        line.push(' ');
        let shown = if env_value_next {
            mask_env_value(arg)
        } else {
            arg.clone()
        };
        env_value_next = arg == "-e" || arg == "--env";

        if shown.is_empty() || shown.chars().any(|c| c.is_whitespace() || c == '\'') {
            line.push('"');
            line.push_str(&shown.replace('"', "\\\""));
            line.push('"');
        } else {
            line.push_str(&shown);
        }
    }
    line.push('\'');
    line
}

fn mask_env_value(arg: &str) -> String {
    match arg.split_once('=') {
        Some((key, _)) => format!("{}={}", key, MASKED_VALUE),
        None => arg.to_string(),
    }
}

fn display_output(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(":\n{}", trimmed)
    }
}

/// Runner that answers commands from a script, for unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        answers: RefCell<VecDeque<Result<ExecutionResult, ProcessError>>>,
        pub(crate) seen: RefCell<Vec<Cmd>>,
    }

    impl ScriptedRunner {
        pub(crate) fn ok(self, output: &str) -> Self {
            self.answers.borrow_mut().push_back(Ok(ExecutionResult {
                exit_code: 0,
                output: output.to_string(),
            }));
            self
        }

        pub(crate) fn fail(self, output: &str) -> Self {
            self.answers
                .borrow_mut()
                .push_back(Err(ProcessError::Exited(SpawnedProcessError {
                    command: "runtime".into(),
                    args: Vec::new(),
                    exit_code: 125,
                    output: output.to_string(),
                })));
            self
        }
    }

    impl ProcessRunner for ScriptedRunner {
        fn execute(&self, cmd: &Cmd) -> Result<ExecutionResult, ProcessError> {
            self.seen.borrow_mut().push(cmd.clone());
            self.answers
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected command: {}", cmd))
        }
    }
}
