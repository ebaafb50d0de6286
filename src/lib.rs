//! drb library exports.
//!
//! Builds binary RPMs from a spec file inside a disposable container. The
//! [`orchestrator`] module ties the pieces together; the binary in `main.rs`
//! is a thin command-line front-end over it.

pub mod config;
pub mod container;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod ownership;
pub mod process;
pub mod signing;
pub mod spec;
pub mod timing;

pub use config::Config;
pub use container::ContainerInvocation;
pub use error::BuildError;
pub use orchestrator::{BuildOrchestrator, BuildOutcome, BuildRequest, BuildStage};
pub use ownership::OwnershipTarget;
pub use process::{Cmd, ExecutionResult, ProcessError, ProcessRunner, SpawnedProcessError, SystemRunner};
