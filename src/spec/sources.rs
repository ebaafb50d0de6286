//! Source availability check.
//!
//! When source downloads are disabled, every file the spec declares through
//! a `SourceN:` or `PatchN:` tag has to be present in the source directory
//! already. Checking that on the host lets a build fail before any container
//! is started.
//!
//! Only the spec preamble is looked at: simple `Tag: value` lines and
//! `%define`/`%global` macros are collected so that `%{name}`-style
//! references in source URLs can be expanded. Anything more involved is left
//! to rpmbuild. That includes everything inside `%if`/`%ifarch` blocks, since
//! which branch applies is only known inside the build image.

use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Maximum nesting depth when expanding macros that reference macros.
const MAX_EXPANSION_DEPTH: usize = 8;

const CONDITIONAL_OPENERS: &[&str] = &["%if", "%ifarch", "%ifnarch", "%ifos", "%ifnos"];

/// A `SourceN:` or `PatchN:` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    /// Tag as written, e.g. `Source0`.
    pub tag: String,
    /// Value after macro expansion.
    pub location: String,
    /// File name rpmbuild will look for in `%_sourcedir`.
    pub file_name: String,
}

impl SourceRef {
    /// Whether rpm tools can fetch this source over the network.
    pub fn is_remote(&self) -> bool {
        self.location.contains("://")
    }
}

/// Collect the sources and patches declared by `spec`.
///
/// Declarations inside a conditional block, and declarations whose value
/// uses a macro that cannot be expanded from the preamble, are skipped.
pub fn declared_sources(spec: &str) -> Vec<SourceRef> {
    let mut macros: HashMap<String, String> = HashMap::new();
    // Macros and tags set inside a conditional; their value is unknown.
    let mut conditional: HashSet<String> = HashSet::new();
    let mut raw = Vec::new();
    let mut depth = 0usize;

    for line in spec.lines() {
        let line = line.trim();

        match line.split_whitespace().next() {
            Some(keyword) if CONDITIONAL_OPENERS.contains(&keyword) => {
                depth += 1;
                continue;
            }
            Some("%endif") => {
                depth = depth.saturating_sub(1);
                continue;
            }
            _ => {}
        }

        if let Some(rest) = line
            .strip_prefix("%define")
            .or_else(|| line.strip_prefix("%global"))
        {
            let mut parts = rest.trim().splitn(2, char::is_whitespace);
            if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
                if depth > 0 {
                    conditional.insert(name.to_string());
                } else {
                    macros.insert(name.to_string(), value.trim().to_string());
                }
            }
            continue;
        }

        let Some((tag, value)) = line.split_once(':') else {
            continue;
        };
        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
            continue;
        }
        let value = value.trim();

        let lower = tag.to_ascii_lowercase();
        if is_source_tag(&lower) {
            if depth == 0 {
                raw.push((tag.to_string(), value.to_string()));
            }
        } else if depth > 0 {
            conditional.insert(lower);
        } else {
            macros.entry(lower).or_insert_with(|| value.to_string());
        }
    }
    macros.retain(|name, _| !conditional.contains(name));

    raw.into_iter()
        .filter_map(|(tag, value)| {
            let location = expand(&value, &macros, 0)?;
            let file_name = file_name_of(&location)?;
            Some(SourceRef {
                tag,
                location,
                file_name,
            })
        })
        .collect()
}

/// Declared sources whose file is not present in `source_dir`.
pub fn missing_sources(spec: &str, source_dir: &Path) -> Vec<SourceRef> {
    declared_sources(spec)
        .into_iter()
        .filter(|s| !source_dir.join(&s.file_name).is_file())
        .collect()
}

fn is_source_tag(tag: &str) -> bool {
    ["source", "patch"].iter().any(|prefix| {
        tag.strip_prefix(prefix)
            .is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
    })
}

fn expand(value: &str, macros: &HashMap<String, String>, depth: usize) -> Option<String> {
    if depth > MAX_EXPANSION_DEPTH {
        return None;
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        if let Some(stripped) = after.strip_prefix('%') {
            out.push('%');
            rest = stripped;
            continue;
        }

        let (name, consumed, conditional) = if let Some(braced) = after.strip_prefix('{') {
            let end = braced.find('}')?;
            let inner = &braced[..end];
            match inner.strip_prefix('?') {
                Some(name) => (name, end + 2, true),
                None => (inner, end + 2, false),
            }
        } else {
            let len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..len], len, false)
        };

        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }

        match macros.get(name) {
            Some(v) => out.push_str(&expand(v, macros, depth + 1)?),
            None if conditional => {}
            None => return None,
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);

    Some(out)
}

fn file_name_of(location: &str) -> Option<String> {
    // `https://host/archive/v1.tar.gz#/name-1.tar.gz` names the download.
    if let Some((_, renamed)) = location.rsplit_once("#/") {
        return non_empty(renamed);
    }
    non_empty(location.rsplit('/').next()?)
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
