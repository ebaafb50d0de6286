//! Layout of the build output directory.
//!
//! rpmbuild writes binary packages to `<output>/<arch>/<name>.rpm`. These
//! helpers find what a build produced. The output directory may already hold
//! packages from earlier runs, so a [`PackageSnapshot`] taken before the
//! build tells them apart from fresh ones.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const RPM_EXTENSION: &str = "rpm";

/// Subdirectories of `output_dir` that contain at least one package.
pub fn architecture_dirs(output_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(output_dir)? {
        let path = entry?.path();
        if path.is_dir() && !packages_in(&path)?.is_empty() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Every package under the architecture subdirectories of `output_dir`.
pub fn packages(output_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut packages = Vec::new();
    for dir in architecture_dirs(output_dir)? {
        packages.extend(packages_in(&dir)?);
    }
    Ok(packages)
}

/// Packages present in an output directory at one point in time.
#[derive(Debug, Clone, Default)]
pub struct PackageSnapshot {
    modified: HashMap<PathBuf, SystemTime>,
}

impl PackageSnapshot {
    pub fn take(output_dir: &Path) -> io::Result<Self> {
        let mut modified = HashMap::new();
        for package in packages(output_dir)? {
            let mtime = fs::metadata(&package)?.modified()?;
            modified.insert(package, mtime);
        }
        Ok(Self { modified })
    }

    pub fn len(&self) -> usize {
        self.modified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modified.is_empty()
    }

    /// Packages in `output_dir` that are new, or were rewritten, since the
    /// snapshot was taken.
    pub fn produced_since(&self, output_dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut produced = Vec::new();
        for package in packages(output_dir)? {
            let mtime = fs::metadata(&package)?.modified()?;
            if self.modified.get(&package) != Some(&mtime) {
                produced.push(package);
            }
        }
        Ok(produced)
    }
}

fn packages_in(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_rpm(&path) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn is_rpm(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(RPM_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_finds_packages_per_architecture() {
        let out = TempDir::new().unwrap();
        let x86 = out.path().join("x86_64");
        let noarch = out.path().join("noarch");
        let empty = out.path().join("empty");
        for dir in [&x86, &noarch, &empty] {
            fs::create_dir(dir).unwrap();
        }
        fs::write(x86.join("tmux-1.6-3.x86_64.rpm"), b"").unwrap();
        fs::write(x86.join("tmux-debuginfo-1.6-3.x86_64.rpm"), b"").unwrap();
        fs::write(x86.join("notes.txt"), b"").unwrap();
        fs::write(noarch.join("docs-1.0-1.noarch.rpm"), b"").unwrap();
        fs::write(out.path().join("sign.pub"), b"").unwrap();
        fs::write(out.path().join("stray.rpm"), b"").unwrap();

        assert_eq!(architecture_dirs(out.path()).unwrap(), vec![noarch.clone(), x86.clone()]);
        assert_eq!(
            packages(out.path()).unwrap(),
            vec![
                noarch.join("docs-1.0-1.noarch.rpm"),
                x86.join("tmux-1.6-3.x86_64.rpm"),
                x86.join("tmux-debuginfo-1.6-3.x86_64.rpm"),
            ]
        );
    }

    fn set_mtime(path: &Path, mtime: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    #[test]
    fn test_snapshot_ignores_packages_from_earlier_runs() {
        let out = TempDir::new().unwrap();
        let x86 = out.path().join("x86_64");
        fs::create_dir(&x86).unwrap();
        let old = x86.join("old-0.1-1.x86_64.rpm");
        fs::write(&old, b"").unwrap();

        let snapshot = PackageSnapshot::take(out.path()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.produced_since(out.path()).unwrap().is_empty());

        let fresh = x86.join("tmux-1.6-3.x86_64.rpm");
        fs::write(&fresh, b"").unwrap();
        assert_eq!(snapshot.produced_since(out.path()).unwrap(), vec![fresh]);
    }

    #[test]
    fn test_snapshot_reports_rewritten_packages() {
        let out = TempDir::new().unwrap();
        let x86 = out.path().join("x86_64");
        fs::create_dir(&x86).unwrap();
        let package = x86.join("tmux-1.6-3.x86_64.rpm");
        fs::write(&package, b"old").unwrap();
        set_mtime(&package, SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000));

        let snapshot = PackageSnapshot::take(out.path()).unwrap();
        set_mtime(&package, SystemTime::now());

        assert_eq!(snapshot.produced_since(out.path()).unwrap(), vec![package]);
    }

    #[test]
    fn test_empty_output() {
        let out = TempDir::new().unwrap();
        assert!(packages(out.path()).unwrap().is_empty());
    }
}
