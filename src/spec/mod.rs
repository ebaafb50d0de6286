//! Spec file resolution.
//!
//! A build is driven by exactly one spec source: either a plain `.spec`
//! file, used verbatim, or a `.spectemplate` whose `@NAME@` placeholders are
//! filled in before the build (see [`template`]). The source is looked up in
//! the override directory when one is given, otherwise in the source
//! directory.

pub mod sources;
pub mod template;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::BuildError;

pub const SPEC_EXTENSION: &str = "spec";
pub const SPEC_TEMPLATE_EXTENSION: &str = "spectemplate";

/// How a resolved spec source has to be treated before the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecKind {
    /// Used verbatim.
    Spec,
    /// Placeholders are substituted first.
    SpecTemplate,
}

impl SpecKind {
    fn extension(self) -> &'static str {
        match self {
            SpecKind::Spec => SPEC_EXTENSION,
            SpecKind::SpecTemplate => SPEC_TEMPLATE_EXTENSION,
        }
    }
}

/// The spec source chosen for a build. The path exists when returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSpec {
    pub path: PathBuf,
    pub kind: SpecKind,
}

impl ResolvedSpec {
    /// File name the spec must have inside the build (`foo.spectemplate`
    /// becomes `foo.spec`).
    pub fn spec_file_name(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "package".to_string());
        format!("{}.{}", stem, SPEC_EXTENSION)
    }
}

/// Pick the spec source for a build.
///
/// `.spec` wins over `.spectemplate` when both exist. More than one file of
/// the winning kind is ambiguous.
pub fn resolve(source_dir: &Path, override_dir: Option<&Path>) -> Result<ResolvedSpec, BuildError> {
    let dir = effective_dir(source_dir, override_dir);
    debug!(dir = %dir.display(), "resolving spec");

    let entries = fs::read_dir(dir).map_err(|source| BuildError::Io {
        context: format!("failed to read spec directory {}", dir.display()),
        source,
    })?;

    let mut specs = Vec::new();
    let mut templates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| BuildError::Io {
            context: format!("failed to read spec directory {}", dir.display()),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(SPEC_EXTENSION) => specs.push(path),
            Some(SPEC_TEMPLATE_EXTENSION) => templates.push(path),
            _ => {}
        }
    }

    let (kind, mut candidates) = if !specs.is_empty() {
        (SpecKind::Spec, specs)
    } else if !templates.is_empty() {
        (SpecKind::SpecTemplate, templates)
    } else {
        return Err(BuildError::NoSpecFound {
            dir: dir.to_path_buf(),
        });
    };

    if candidates.len() > 1 {
        candidates.sort();
        return Err(BuildError::AmbiguousSpec {
            dir: dir.to_path_buf(),
            extension: kind.extension(),
            candidates,
        });
    }

    let path = candidates.remove(0);
    debug!(spec = %path.display(), ?kind, "resolved spec");
    Ok(ResolvedSpec { path, kind })
}

fn effective_dir<'a>(source_dir: &'a Path, override_dir: Option<&'a Path>) -> &'a Path {
    match override_dir {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => source_dir,
    }
}
