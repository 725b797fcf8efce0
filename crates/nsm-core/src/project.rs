use crate::CoreError;
use nsm_schema::{
    contains_package, convert_shell_to_flake, extract_packages, inject_packages,
    remove_packages, template_for, validate_package_name, Dialect,
};
use nsm_store::{FileStore, StoreError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Descriptors are ordinary project files.
pub const DESCRIPTOR_MODE: u32 = 0o644;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddOutcome {
    pub added: Vec<String>,
    pub already_present: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoveOutcome {
    pub removed: Vec<String>,
    pub not_found: Vec<String>,
    /// Entries dropped from the package section.
    pub lines_removed: usize,
}

fn check_names<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>, CoreError> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref().trim();
        validate_package_name(name).map_err(|reason| CoreError::InvalidPackage {
            name: name.to_owned(),
            reason,
        })?;
        if !out.iter().any(|n| n == name) {
            out.push(name.to_owned());
        }
    }
    Ok(out)
}

/// A `shell.nix` or `flake.nix` in a project directory.
///
/// Every mutation is a locked read-modify-write through the shared
/// [`FileStore`], so concurrent `add`/`remove` calls on one file serialize.
#[derive(Debug, Clone)]
pub struct ProjectDescriptor {
    path: PathBuf,
    dialect: Dialect,
    files: FileStore,
}

impl ProjectDescriptor {
    pub fn new(path: impl Into<PathBuf>, dialect: Dialect, files: FileStore) -> Self {
        Self {
            path: path.into(),
            dialect,
            files,
        }
    }

    /// The conventional file for `dialect` in `dir`, whether or not it exists.
    pub fn at(dir: &Path, dialect: Dialect, files: FileStore) -> Self {
        Self::new(dir.join(dialect.file_name()), dialect, files)
    }

    /// The existing descriptor in `dir`; `shell.nix` wins over `flake.nix`.
    pub fn detect(dir: &Path, files: FileStore) -> Option<Self> {
        Dialect::ALL
            .into_iter()
            .find(|d| dir.join(d.file_name()).is_file())
            .map(|d| Self::at(dir, d, files))
    }

    /// Write a fresh descriptor from the template. Refuses to overwrite.
    pub fn init<S: AsRef<str>>(
        dir: &Path,
        dialect: Dialect,
        packages: &[S],
        channel: &str,
        files: FileStore,
    ) -> Result<Self, CoreError> {
        let packages = check_names(packages)?;
        let descriptor = Self::at(dir, dialect, files);
        descriptor.files.update(&descriptor.path, DESCRIPTOR_MODE, |current| {
            if current.is_some() {
                return Err(CoreError::DescriptorExists(descriptor.path.clone()));
            }
            Ok(Some(template_for(dialect, &packages, channel)))
        })?;
        info!("created {}", descriptor.path.display());
        Ok(descriptor)
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn read(&self) -> Result<String, CoreError> {
        self.files.read_to_string(&self.path).map_err(|e| match e {
            StoreError::NotFound(_) => self.missing(),
            other => other.into(),
        })
    }

    fn missing(&self) -> CoreError {
        CoreError::NoDescriptor(
            self.path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        )
    }

    /// Package names in file order. A file without a package section lists
    /// nothing.
    pub fn list(&self) -> Result<Vec<String>, CoreError> {
        Ok(extract_packages(&self.read()?, self.dialect))
    }

    /// Whether the file has a package section that edits can target.
    pub fn is_editable(&self) -> Result<bool, CoreError> {
        Ok(nsm_schema::section_bounds(&self.read()?, self.dialect).is_some())
    }

    /// Add packages not already present (exact name match).
    pub fn add<S: AsRef<str>>(&self, names: &[S]) -> Result<AddOutcome, CoreError> {
        let names = check_names(names)?;
        let mut outcome = AddOutcome::default();
        self.files.update::<CoreError, _>(&self.path, DESCRIPTOR_MODE, |current| {
            let content = current.ok_or_else(|| self.missing())?;
            let (present, fresh): (Vec<_>, Vec<_>) = names
                .iter()
                .cloned()
                .partition(|n| contains_package(&content, self.dialect, n));
            outcome.already_present = present;
            if fresh.is_empty() {
                return Ok(None);
            }
            let updated = inject_packages(&content, self.dialect, &fresh)?;
            outcome.added = fresh;
            Ok(Some(updated))
        })?;
        debug!(
            "{}: added {:?}, already present {:?}",
            self.path.display(),
            outcome.added,
            outcome.already_present
        );
        Ok(outcome)
    }

    /// Remove packages by exact name. A name counts as removed only when
    /// it is gone from the rewritten list.
    pub fn remove<S: AsRef<str>>(&self, names: &[S]) -> Result<RemoveOutcome, CoreError> {
        let names = check_names(names)?;
        let mut outcome = RemoveOutcome::default();
        self.files.update::<CoreError, _>(&self.path, DESCRIPTOR_MODE, |current| {
            let content = current.ok_or_else(|| self.missing())?;
            let present: Vec<&String> = names
                .iter()
                .filter(|n| contains_package(&content, self.dialect, n))
                .collect();
            if present.is_empty() {
                outcome.not_found.clone_from(&names);
                return Ok(None);
            }
            let (updated, entries) = remove_packages(&content, self.dialect, &present);
            let left = extract_packages(&updated, self.dialect);
            let (removed, not_found): (Vec<_>, Vec<_>) = names
                .iter()
                .cloned()
                .partition(|n| present.contains(&n) && !left.contains(n));
            outcome.removed = removed;
            outcome.not_found = not_found;
            outcome.lines_removed = entries;
            Ok((updated != content).then_some(updated))
        })?;
        debug!(
            "{}: removed {:?}, not found {:?}",
            self.path.display(),
            outcome.removed,
            outcome.not_found
        );
        Ok(outcome)
    }

    /// Write `flake.nix` in `dir` from the package list of its `shell.nix`.
    pub fn convert_to_flake(dir: &Path, channel: &str, files: FileStore) -> Result<Self, CoreError> {
        let shell = Self::at(dir, Dialect::Shell, files.clone());
        let content = shell.read()?;
        let flake = Self::at(dir, Dialect::Flake, files);
        flake.files.update(&flake.path, DESCRIPTOR_MODE, |current| {
            if current.is_some() {
                return Err(CoreError::DescriptorExists(flake.path.clone()));
            }
            Ok(Some(convert_shell_to_flake(&content, channel)))
        })?;
        info!("converted {} to {}", shell.path.display(), flake.path.display());
        Ok(flake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SHELL: &str = "{ pkgs ? import <nixpkgs> {} }:\npkgs.mkShell {\n  packages = with pkgs; [\n    gcc\n    python3\n  ];\n}\n";

    fn project(content: &str) -> (tempfile::TempDir, ProjectDescriptor) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("shell.nix"), content).unwrap();
        let p = ProjectDescriptor::detect(dir.path(), FileStore::default()).unwrap();
        (dir, p)
    }

    #[test]
    fn detect_prefers_shell() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ProjectDescriptor::detect(dir.path(), FileStore::default()).is_none());
        fs::write(dir.path().join("flake.nix"), "{}").unwrap();
        let d = ProjectDescriptor::detect(dir.path(), FileStore::default()).unwrap();
        assert_eq!(d.dialect(), Dialect::Flake);
        fs::write(dir.path().join("shell.nix"), SHELL).unwrap();
        let d = ProjectDescriptor::detect(dir.path(), FileStore::default()).unwrap();
        assert_eq!(d.dialect(), Dialect::Shell);
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let d = ProjectDescriptor::init(
            dir.path(),
            Dialect::Shell,
            &["git"],
            "nixos-unstable",
            FileStore::default(),
        )
        .unwrap();
        assert_eq!(d.list().unwrap(), ["git"]);
        let err = ProjectDescriptor::init(
            dir.path(),
            Dialect::Shell,
            &["jq"],
            "nixos-unstable",
            FileStore::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::DescriptorExists(_)));
        assert_eq!(d.list().unwrap(), ["git"]);
    }

    #[test]
    fn add_reports_duplicates_by_exact_name() {
        let (_dir, p) = project(&SHELL.replace("python3", "golang"));
        let out = p.add(&["go", "golang", "nodejs"]).unwrap();
        assert_eq!(out.added, ["go", "nodejs"]);
        assert_eq!(out.already_present, ["golang"]);
        assert_eq!(p.list().unwrap(), ["gcc", "golang", "go", "nodejs"]);
    }

    #[test]
    fn add_of_present_package_does_not_write() {
        let (dir, p) = project(SHELL);
        let out = p.add(&["gcc"]).unwrap();
        assert!(out.added.is_empty());
        let backups = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".backup"))
            .count();
        assert_eq!(backups, 0);
    }

    #[test]
    fn add_rejects_invalid_names_before_touching_file() {
        let (_dir, p) = project(SHELL);
        let err = p.add(&["ok", "rm -rf /"]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPackage { .. }));
        assert_eq!(p.list().unwrap(), ["gcc", "python3"]);
    }

    #[test]
    fn add_without_section_is_format_error() {
        let (_dir, p) = project("{ pkgs ? import <nixpkgs> {} }: pkgs.mkShell { }\n");
        let err = p.add(&["git"]).unwrap_err();
        assert!(matches!(err, CoreError::Descriptor(_)));
    }

    #[test]
    fn remove_reports_missing_names() {
        let (_dir, p) = project(SHELL);
        let out = p.remove(&["gcc", "rustc"]).unwrap();
        assert_eq!(out.removed, ["gcc"]);
        assert_eq!(out.not_found, ["rustc"]);
        assert_eq!(out.lines_removed, 1);
        assert_eq!(p.list().unwrap(), ["python3"]);
    }

    #[test]
    fn remove_second_entry_on_a_shared_line() {
        let (_dir, p) = project(&SHELL.replace("    gcc\n", "    gcc cmake\n"));
        assert_eq!(p.list().unwrap(), ["gcc", "cmake", "python3"]);
        let out = p.remove(&["cmake"]).unwrap();
        assert_eq!(out.removed, ["cmake"]);
        assert!(out.not_found.is_empty());
        assert_eq!(p.list().unwrap(), ["gcc", "python3"]);
    }

    #[test]
    fn remove_of_absent_package_does_not_write() {
        let (dir, p) = project(SHELL);
        let out = p.remove(&["rustc"]).unwrap();
        assert!(out.removed.is_empty());
        assert_eq!(out.not_found, ["rustc"]);
        assert_eq!(fs::read_to_string(dir.path().join("shell.nix")).unwrap(), SHELL);
    }

    #[test]
    fn operations_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = ProjectDescriptor::at(dir.path(), Dialect::Shell, FileStore::default());
        assert!(matches!(p.list(), Err(CoreError::NoDescriptor(_))));
        assert!(matches!(p.add(&["git"]), Err(CoreError::NoDescriptor(_))));
        assert!(!p.exists());
    }

    #[test]
    fn convert_writes_flake_with_same_packages() {
        let (dir, _) = project(SHELL);
        let flake =
            ProjectDescriptor::convert_to_flake(dir.path(), "nixos-24.05", FileStore::default())
                .unwrap();
        assert_eq!(flake.dialect(), Dialect::Flake);
        assert_eq!(flake.list().unwrap(), ["gcc", "python3"]);
        assert!(fs::read_to_string(flake.path())
            .unwrap()
            .contains("nixos-24.05"));

        let again =
            ProjectDescriptor::convert_to_flake(dir.path(), "nixos-24.05", FileStore::default());
        assert!(matches!(again, Err(CoreError::DescriptorExists(_))));
    }
}
