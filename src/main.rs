//! drb - build binary RPMs from a spec file inside a disposable container.
//!
//! The host only needs a container runtime; `rpmbuild` and friends come from
//! the image.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use drb::{BuildOrchestrator, BuildRequest, Config, OwnershipTarget, SystemRunner};

#[derive(Parser)]
#[command(name = "drb")]
#[command(about = "Build binary RPMs inside a disposable container")]
#[command(
    after_help = "EXAMPLE:\n  drb dir almalinux:9 ./tmux ./rpms --download-sources\n\nThe container runtime is taken from DRB_CONTAINER_RUNTIME, or the first of\ndocker/podman found on PATH."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the .spec or .spectemplate found in a source directory
    Dir {
        /// Image with rpmbuild installed
        reference_image: String,

        /// Directory with the spec and local sources (mounted read-only)
        source_dir: PathBuf,

        /// Packages are written to <OUTPUT_DIR>/<arch>/
        output_dir: PathBuf,

        /// Fetch remote Source/Patch URLs inside the container
        #[arg(long)]
        download_sources: bool,

        /// Take the spec from this directory instead of SOURCE_DIR
        #[arg(long, value_name = "DIR")]
        spec_directory_override: Option<PathBuf>,

        /// Sign the packages with this armored GPG private key
        #[arg(long, value_name = "PRIVATE_KEY_FILE")]
        sign_with: Option<PathBuf>,

        /// Hand the packages over to this owner after the build
        #[arg(long, value_name = "UID:GID")]
        target_ownership: Option<OwnershipTarget>,

        /// Stream build output and log debug details
        #[arg(short, long)]
        verbose: bool,

        /// Variable for the build container and spec template placeholders
        #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
        env: Vec<(String, String)>,

        /// Pull the image even if a local copy exists
        #[arg(long)]
        always_pull: bool,

        /// Extra options for the runtime's `run`, split on whitespace
        #[arg(long, value_name = "OPTIONS", allow_hyphen_values = true)]
        additional_docker_options: Option<String>,
    },
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Dir {
            reference_image,
            source_dir,
            output_dir,
            download_sources,
            spec_directory_override,
            sign_with,
            target_ownership,
            verbose,
            env,
            always_pull,
            additional_docker_options,
        } => {
            init_logging(verbose);

            let mut request = BuildRequest::new(reference_image, source_dir.clone(), output_dir)?
                .with_download_sources(download_sources)
                .with_verbose(verbose)
                .with_always_pull(always_pull);
            if let Some(dir) = spec_directory_override {
                request = request.with_spec_override_dir(dir);
            }
            if let Some(key) = sign_with {
                request = request.with_signing_key(key);
            }
            if let Some(target) = target_ownership {
                request = request.with_target_ownership(target);
            }
            for (key, value) in env {
                request = request.with_env(key, value);
            }
            if let Some(options) = additional_docker_options {
                request = request.with_extra_runtime_options(options.split_whitespace());
            }

            let config = Config::load();
            let runner = SystemRunner::new().verbose(verbose);
            let orchestrator = BuildOrchestrator::new(runner, config.container_runtime);

            let outcome = orchestrator
                .run(&request)
                .with_context(|| format!("failed to build RPMs from {}", source_dir.display()))?;

            for package in &outcome.packages {
                println!("{}", package.display());
            }
            Ok(())
        }
    }
}
