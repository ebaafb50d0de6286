//! Build orchestration.
//!
//! One build walks through these stages, stopping at the first failure:
//!
//! ```text
//! ResolvingSpec -> Building -> [Signing] -> [NormalizingOwnership] -> Done
//! ```
//!
//! Signing only happens when a key was supplied, ownership normalization only
//! when a target was supplied. A failure in any stage fails the whole build;
//! packages already written stay on disk as they are.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::container::ContainerInvocation;
use crate::error::BuildError;
use crate::output::PackageSnapshot;
use crate::ownership::{ContainerChown, HostChown, OwnershipNormalizer, OwnershipTarget};
use crate::process::ProcessRunner;
use crate::signing::SigningPipeline;
use crate::spec::{self, sources, template, ResolvedSpec, SpecKind};
use crate::timing::Timer;

pub const CONTAINER_SOURCE_DIR: &str = "/drb/src";
pub const CONTAINER_SPEC_DIR: &str = "/drb/spec";
pub const CONTAINER_RPMS_DIR: &str = "/drb/rpms";
pub const CONTAINER_WORK_DIR: &str = "/drb/work";

const BUILD_SCRIPT_NAME: &str = "build.sh";
const BUILD_SCRIPT: &str = include_str!("../scripts/build-in-container.sh");

/// Everything needed for one build. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    image: String,
    source_dir: PathBuf,
    output_dir: PathBuf,
    spec_override_dir: Option<PathBuf>,
    download_sources: bool,
    signing_key: Option<PathBuf>,
    target_ownership: Option<OwnershipTarget>,
    verbose: bool,
    env: Vec<(String, String)>,
    always_pull: bool,
    extra_runtime_options: Vec<String>,
}

impl BuildRequest {
    pub fn new(
        image: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, BuildError> {
        let image = image.into();
        let source_dir = source_dir.into();
        let output_dir = output_dir.into();

        if image.trim().is_empty() {
            return Err(BuildError::InvalidRequest("image reference is empty".into()));
        }
        if source_dir.as_os_str().is_empty() {
            return Err(BuildError::InvalidRequest("source directory is empty".into()));
        }
        if output_dir.as_os_str().is_empty() {
            return Err(BuildError::InvalidRequest("output directory is empty".into()));
        }

        Ok(Self {
            image,
            source_dir,
            output_dir,
            spec_override_dir: None,
            download_sources: false,
            signing_key: None,
            target_ownership: None,
            verbose: false,
            env: Vec::new(),
            always_pull: false,
            extra_runtime_options: Vec::new(),
        })
    }

    /// Look for the spec here instead of in the source directory.
    pub fn with_spec_override_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spec_override_dir = Some(dir.into());
        self
    }

    pub fn with_download_sources(mut self, download: bool) -> Self {
        self.download_sources = download;
        self
    }

    pub fn with_signing_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.signing_key = Some(key.into());
        self
    }

    pub fn with_target_ownership(mut self, target: OwnershipTarget) -> Self {
        self.target_ownership = Some(target);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Variable passed to the build container and to template placeholders.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_always_pull(mut self, always_pull: bool) -> Self {
        self.always_pull = always_pull;
        self
    }

    pub fn with_extra_runtime_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_runtime_options
            .extend(options.into_iter().map(Into::into));
        self
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn spec_override_dir(&self) -> Option<&Path> {
        self.spec_override_dir.as_deref()
    }

    pub fn download_sources(&self) -> bool {
        self.download_sources
    }

    pub fn signing_key(&self) -> Option<&Path> {
        self.signing_key.as_deref()
    }

    pub fn target_ownership(&self) -> Option<OwnershipTarget> {
        self.target_ownership
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }
}

/// Stages of a build, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    ResolvingSpec,
    Building,
    Signing,
    NormalizingOwnership,
    Done,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::ResolvingSpec => "resolving spec",
            BuildStage::Building => "building",
            BuildStage::Signing => "signing",
            BuildStage::NormalizingOwnership => "normalizing ownership",
            BuildStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// A successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Packages under `<output>/<arch>/` written by this build.
    pub packages: Vec<PathBuf>,
    /// Stages the build went through, ending with [`BuildStage::Done`].
    pub stages: Vec<BuildStage>,
}

/// Spec prepared for mounting into the build container.
struct PreparedSpec {
    /// Host directory mounted as the spec directory.
    dir: PathBuf,
    file_name: String,
    text: String,
}

/// Host paths of a request, made absolute for bind mounts.
struct HostPaths {
    source_dir: PathBuf,
    output_dir: PathBuf,
    spec_override_dir: Option<PathBuf>,
    signing_key: Option<PathBuf>,
}

/// Runs builds. Holds its process runner and runtime name; there is no
/// shared state between orchestrators.
pub struct BuildOrchestrator<R: ProcessRunner> {
    runner: R,
    runtime: String,
}

impl<R: ProcessRunner> BuildOrchestrator<R> {
    pub fn new(runner: R, runtime: impl Into<String>) -> Self {
        Self {
            runner,
            runtime: runtime.into(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run one build to completion.
    pub fn run(&self, request: &BuildRequest) -> Result<BuildOutcome, BuildError> {
        let mut stages = Vec::new();
        let result = self.run_stages(request, &mut stages);

        match &result {
            Ok(outcome) => info!(packages = outcome.packages.len(), "build succeeded"),
            Err(e) => {
                let stage = stages.last().copied().unwrap_or(BuildStage::ResolvingSpec);
                warn!(%stage, error = %e, "build failed");
            }
        }
        result
    }

    fn run_stages(
        &self,
        request: &BuildRequest,
        stages: &mut Vec<BuildStage>,
    ) -> Result<BuildOutcome, BuildError> {
        enter(stages, BuildStage::ResolvingSpec);
        let timer = Timer::start(BuildStage::ResolvingSpec.to_string());
        let paths = host_paths(request)?;
        let resolved = spec::resolve(&paths.source_dir, paths.spec_override_dir.as_deref())?;

        // Removed on every exit path when dropped.
        let work_dir = TempDir::new().map_err(|source| BuildError::Io {
            context: "failed to create build work directory".into(),
            source,
        })?;
        let prepared = prepare_spec(&resolved, request, work_dir.path())?;
        check_sources(&prepared, &paths.source_dir, request.download_sources())?;
        write_file(&work_dir.path().join(BUILD_SCRIPT_NAME), BUILD_SCRIPT)?;
        timer.finish();

        enter(stages, BuildStage::Building);
        let timer = Timer::start(BuildStage::Building.to_string());
        let list_err = |source: std::io::Error| BuildError::Io {
            context: format!("failed to list packages in {}", paths.output_dir.display()),
            source,
        };
        let existing = PackageSnapshot::take(&paths.output_dir).map_err(list_err)?;
        if !existing.is_empty() {
            debug!(packages = existing.len(), "output directory already holds packages");
        }

        self.build_invocation(request, &paths, &prepared, work_dir.path())
            .run(&self.runner, &self.runtime)?;

        // Only what this build wrote is signed and reported.
        let packages = existing
            .produced_since(&paths.output_dir)
            .map_err(list_err)?;
        if packages.is_empty() {
            return Err(BuildError::NoPackagesProduced {
                output_dir: paths.output_dir.clone(),
            });
        }
        for package in &packages {
            info!(package = %package.display(), "built");
        }
        timer.finish();

        if let Some(ref key) = paths.signing_key {
            enter(stages, BuildStage::Signing);
            let timer = Timer::start(BuildStage::Signing.to_string());
            SigningPipeline::new(&self.runner, &self.runtime, request.image())
                .sign(&paths.output_dir, &packages, key)?;
            timer.finish();
        }

        if let Some(target) = request.target_ownership() {
            enter(stages, BuildStage::NormalizingOwnership);
            let timer = Timer::start(BuildStage::NormalizingOwnership.to_string());
            if running_as_root() {
                OwnershipNormalizer::new(HostChown).normalize(&paths.output_dir, target)?;
            } else {
                OwnershipNormalizer::new(ContainerChown::new(
                    &self.runner,
                    &self.runtime,
                    request.image(),
                ))
                .normalize(&paths.output_dir, target)?;
            }
            timer.finish();
        }

        enter(stages, BuildStage::Done);
        Ok(BuildOutcome {
            packages,
            stages: stages.clone(),
        })
    }

    fn build_invocation(
        &self,
        request: &BuildRequest,
        paths: &HostPaths,
        spec: &PreparedSpec,
        work_dir: &Path,
    ) -> ContainerInvocation {
        let mut invocation = ContainerInvocation::new().with_auto_remove();
        if request.always_pull {
            invocation = invocation.with_pull_always();
        }

        invocation = invocation
            .with_read_only_bind_mount(&paths.source_dir, CONTAINER_SOURCE_DIR)
            .with_read_only_bind_mount(&spec.dir, CONTAINER_SPEC_DIR)
            .with_bind_mount(&paths.output_dir, CONTAINER_RPMS_DIR)
            .with_read_only_bind_mount(work_dir, CONTAINER_WORK_DIR)
            .with_workdir(CONTAINER_SOURCE_DIR)
            .with_env("DRB_SPEC", format!("{}/{}", CONTAINER_SPEC_DIR, spec.file_name))
            .with_env(
                "DRB_DOWNLOAD_SOURCES",
                if request.download_sources() { "1" } else { "0" },
            )
            .with_env("DRB_VERBOSE", if request.verbose() { "1" } else { "0" });

        for (key, value) in request.env() {
            invocation = invocation.with_env(key, value);
        }

        invocation
            .with_extra_options(&request.extra_runtime_options)
            .with_image(request.image())
            .with_command_and_args(
                "/bin/bash",
                [format!("{}/{}", CONTAINER_WORK_DIR, BUILD_SCRIPT_NAME)],
            )
    }
}

fn enter(stages: &mut Vec<BuildStage>, stage: BuildStage) {
    info!(%stage, "entering stage");
    stages.push(stage);
}

fn running_as_root() -> bool {
    // SAFETY: geteuid cannot fail.
    unsafe { libc::geteuid() == 0 }
}

fn host_paths(request: &BuildRequest) -> Result<HostPaths, BuildError> {
    let source_dir = canonical_dir(request.source_dir(), "source directory")?;
    let spec_override_dir = match request.spec_override_dir() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            Some(canonical_dir(dir, "spec override directory")?)
        }
        _ => None,
    };

    fs::create_dir_all(request.output_dir()).map_err(|source| BuildError::Io {
        context: format!(
            "failed to create output directory {}",
            request.output_dir().display()
        ),
        source,
    })?;
    let output_dir = canonical_dir(request.output_dir(), "output directory")?;

    let signing_key = match request.signing_key() {
        Some(key) if key.is_file() => Some(canonicalize(key)?),
        Some(key) => {
            return Err(BuildError::InvalidRequest(format!(
                "signing key {} is not a file",
                key.display()
            )))
        }
        None => None,
    };

    Ok(HostPaths {
        source_dir,
        output_dir,
        spec_override_dir,
        signing_key,
    })
}

fn canonical_dir(path: &Path, what: &str) -> Result<PathBuf, BuildError> {
    if !path.is_dir() {
        return Err(BuildError::InvalidRequest(format!(
            "{} {} does not exist or is not a directory",
            what,
            path.display()
        )));
    }
    canonicalize(path)
}

fn canonicalize(path: &Path) -> Result<PathBuf, BuildError> {
    fs::canonicalize(path).map_err(|source| BuildError::Io {
        context: format!("failed to resolve {}", path.display()),
        source,
    })
}

fn prepare_spec(
    resolved: &ResolvedSpec,
    request: &BuildRequest,
    work_dir: &Path,
) -> Result<PreparedSpec, BuildError> {
    let text = fs::read_to_string(&resolved.path).map_err(|source| BuildError::Io {
        context: format!("failed to read {}", resolved.path.display()),
        source,
    })?;

    match resolved.kind {
        SpecKind::Spec => {
            let dir = resolved
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            Ok(PreparedSpec {
                dir,
                file_name: resolved.spec_file_name(),
                text,
            })
        }
        SpecKind::SpecTemplate => {
            let rendered = template::render(&text, &template_context(request));
            for name in &rendered.unresolved {
                warn!(placeholder = %name, template = %resolved.path.display(), "placeholder has no value, left as is");
            }

            let dir = work_dir.join("spec");
            fs::create_dir_all(&dir).map_err(|source| BuildError::Io {
                context: format!("failed to create {}", dir.display()),
                source,
            })?;
            let file_name = resolved.spec_file_name();
            write_file(&dir.join(&file_name), &rendered.text)?;
            debug!(spec = %file_name, "rendered spec template");

            Ok(PreparedSpec {
                dir,
                file_name,
                text: rendered.text,
            })
        }
    }
}

/// Values for `@NAME@` placeholders. Request variables override the
/// built-in ones.
fn template_context(request: &BuildRequest) -> template::TemplateContext {
    let mut context = template::TemplateContext::new();
    context.insert("PWD".into(), CONTAINER_SOURCE_DIR.into());
    context.insert("SRCDIR".into(), CONTAINER_SOURCE_DIR.into());
    context.insert("SPECDIR".into(), CONTAINER_SPEC_DIR.into());
    for (key, value) in request.env() {
        context.insert(key.clone(), value.clone());
    }
    context
}

/// Fail before any container starts when a declared source cannot be had:
/// it is missing locally and either downloads are off or it is not remote.
fn check_sources(spec: &PreparedSpec, source_dir: &Path, download: bool) -> Result<(), BuildError> {
    let missing: Vec<String> = sources::missing_sources(&spec.text, source_dir)
        .into_iter()
        .filter(|s| !download || !s.is_remote())
        .map(|s| s.file_name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(BuildError::SourcesUnavailable {
            source_dir: source_dir.to_path_buf(),
            missing,
        })
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), BuildError> {
    fs::write(path, contents).map_err(|source| BuildError::Io {
        context: format!("failed to write {}", path.display()),
        source,
    })
}
