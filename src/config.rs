//! Configuration management for drb.
//!
//! Reads configuration from environment variables. `main` loads a `.env`
//! file into the environment first, so values there apply too; variables
//! already set in the environment take precedence.

use std::collections::HashMap;

use tracing::debug;

/// Runtimes tried, in order, when none is configured.
pub const KNOWN_RUNTIMES: &[&str] = &["docker", "podman"];

/// Runtime used when none is configured and none is found on `PATH`.
pub const DEFAULT_RUNTIME: &str = "docker";

/// Environment variable naming the container runtime binary.
pub const RUNTIME_VAR: &str = "DRB_CONTAINER_RUNTIME";

/// drb configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Container runtime binary (e.g. "docker", "podman", "/usr/bin/docker")
    pub container_runtime: String,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Self {
        Self::from_vars(std::env::vars(), |name| which::which(name).is_ok())
    }

    /// Build configuration from explicit variables.
    ///
    /// `on_path` reports whether a runtime binary can be found; it is only
    /// consulted when `DRB_CONTAINER_RUNTIME` is unset or empty.
    pub fn from_vars<I, F>(vars: I, on_path: F) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
        F: Fn(&str) -> bool,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        let container_runtime = vars
            .get(RUNTIME_VAR)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                KNOWN_RUNTIMES
                    .iter()
                    .find(|name| on_path(name))
                    .copied()
                    .unwrap_or(DEFAULT_RUNTIME)
                    .to_string()
            });

        let config = Self { container_runtime };
        debug!(?config, "loaded configuration");
        config
    }
}
