use crate::doctor::{DiagnosticResult, Doctor, DoctorContext, FixReport};
use crate::project::{AddOutcome, ProjectDescriptor, RemoveOutcome};
use crate::settings::{SettingsMigration, SettingsStore};
use crate::CoreError;
use nsm_schema::{validate_package_name, validate_version, Dialect};
use nsm_store::FileStore;
use nsm_toolchain::NixToolchain;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Result of `nsm clean`.
#[derive(Debug, Clone, Serialize)]
pub struct CleanReport {
    pub summary: String,
}

/// One descriptor package and whether the user's Nix profile has it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageStatus {
    pub name: String,
    /// `None` when the profile could not be queried.
    pub installed: Option<bool>,
}

/// Result of `nsm info`.
#[derive(Debug, Clone, Serialize)]
pub struct InfoReport {
    pub nix: BTreeMap<String, String>,
    pub settings_path: PathBuf,
    pub schema_version: Option<String>,
    pub channel: Option<String>,
    pub descriptor: Option<PathBuf>,
    pub package_count: Option<usize>,
    pub pin_count: Option<usize>,
}

/// Entry point for every NSM operation.
///
/// One engine shares a single [`FileStore`] (and so one lock registry)
/// between the settings file and the project descriptors it touches.
#[derive(Debug, Clone)]
pub struct Engine {
    files: FileStore,
    settings: SettingsStore,
    project_dir: PathBuf,
    toolchain: NixToolchain,
    nix_root: PathBuf,
}

impl Engine {
    pub fn new(
        settings_path: impl Into<PathBuf>,
        project_dir: impl Into<PathBuf>,
        toolchain: NixToolchain,
    ) -> Self {
        let files = FileStore::default();
        Self {
            settings: SettingsStore::new(settings_path, files.clone()),
            files,
            project_dir: project_dir.into(),
            toolchain,
            nix_root: PathBuf::from("/nix"),
        }
    }

    #[must_use]
    pub fn with_nix_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.nix_root = root.into();
        self
    }

    #[inline]
    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    #[inline]
    pub fn toolchain(&self) -> &NixToolchain {
        &self.toolchain
    }

    #[inline]
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// The descriptor in the project directory.
    pub fn project(&self) -> Result<ProjectDescriptor, CoreError> {
        ProjectDescriptor::detect(&self.project_dir, self.files.clone())
            .ok_or_else(|| CoreError::NoDescriptor(self.project_dir.clone()))
    }

    /// Create a descriptor. The dialect defaults to the configured format and
    /// the configured default packages come first.
    pub fn init(
        &self,
        dialect: Option<Dialect>,
        packages: &[String],
    ) -> Result<ProjectDescriptor, CoreError> {
        let settings = self.settings.load()?;
        let dialect = dialect
            .or_else(|| settings.dialect())
            .unwrap_or(Dialect::Shell);
        let mut all: Vec<String> = settings.default_packages().to_vec();
        for p in packages {
            if !all.contains(p) {
                all.push(p.clone());
            }
        }
        ProjectDescriptor::init(
            &self.project_dir,
            dialect,
            &all,
            &settings.channel.url,
            self.files.clone(),
        )
    }

    pub fn list(&self) -> Result<Vec<String>, CoreError> {
        self.project()?.list()
    }

    /// [`list`](Self::list) annotated with profile membership. The profile
    /// query is best-effort: without Nix every status is unknown.
    pub fn list_with_status(&self) -> Result<Vec<PackageStatus>, CoreError> {
        let names = self.list()?;
        let profile = match self.toolchain.installed_packages() {
            Ok(pkgs) => Some(pkgs),
            Err(e) => {
                debug!("profile query failed: {e}");
                None
            }
        };
        Ok(names
            .into_iter()
            .map(|name| PackageStatus {
                installed: profile
                    .as_ref()
                    .map(|pkgs| pkgs.iter().any(|p| p.provides(&name))),
                name,
            })
            .collect())
    }

    pub fn add(&self, names: &[String]) -> Result<AddOutcome, CoreError> {
        self.project()?.add(names)
    }

    pub fn remove(&self, names: &[String]) -> Result<RemoveOutcome, CoreError> {
        self.project()?.remove(names)
    }

    pub fn convert(&self) -> Result<ProjectDescriptor, CoreError> {
        let settings = self.settings.load()?;
        ProjectDescriptor::convert_to_flake(
            &self.project_dir,
            &settings.channel.url,
            self.files.clone(),
        )
    }

    /// Pin `package`, querying the toolchain when no version is given.
    pub fn pin(&self, package: &str, version: Option<&str>) -> Result<String, CoreError> {
        validate_package_name(package).map_err(|reason| CoreError::InvalidPackage {
            name: package.to_owned(),
            reason,
        })?;
        let version = match version {
            Some(v) => v.to_owned(),
            None => self.toolchain.package_version(package)?,
        };
        validate_version(&version).map_err(|reason| CoreError::InvalidVersion {
            version: version.clone(),
            reason,
        })?;
        self.settings.pin(package, &version)?;
        info!("pinned {package} to {version}");
        Ok(version)
    }

    pub fn unpin(&self, package: &str) -> Result<String, CoreError> {
        Ok(self.settings.unpin(package)?)
    }

    pub fn pins(&self) -> Result<BTreeMap<String, String>, CoreError> {
        Ok(self.settings.pins()?)
    }

    pub fn migrate(&self) -> Result<Option<SettingsMigration>, CoreError> {
        Ok(self.settings.migrate()?)
    }

    pub fn doctor_context(&self) -> DoctorContext {
        DoctorContext {
            settings: self.settings.clone(),
            project_dir: self.project_dir.clone(),
            toolchain: self.toolchain.clone(),
            files: self.files.clone(),
            nix_root: self.nix_root.clone(),
        }
    }

    pub fn diagnose(&self, doctor: &Doctor) -> Vec<DiagnosticResult> {
        doctor.run(&self.doctor_context())
    }

    pub fn fix(&self, doctor: &Doctor, results: &[DiagnosticResult]) -> FixReport {
        doctor.fix(&self.doctor_context(), results)
    }

    /// Garbage-collect the Nix store.
    pub fn clean(&self) -> Result<CleanReport, CoreError> {
        let summary = self.toolchain.collect_garbage()?;
        Ok(CleanReport { summary })
    }

    /// Update subscribed channels.
    pub fn upgrade(&self) -> Result<(), CoreError> {
        self.toolchain.update_channels()?;
        info!("channels updated");
        Ok(())
    }

    /// Best-effort summary; nothing here fails the whole report.
    pub fn info(&self) -> InfoReport {
        let settings = self.settings.load_existing().ok();
        let project = ProjectDescriptor::detect(&self.project_dir, self.files.clone());
        InfoReport {
            nix: self.toolchain.system_info(),
            settings_path: self.settings.path().to_path_buf(),
            schema_version: settings.as_ref().map(|s| s.schema_version.clone()),
            channel: settings.as_ref().map(|s| s.channel.url.clone()),
            pin_count: settings.as_ref().map(|s| s.pins.len()),
            package_count: project.as_ref().and_then(|p| p.list().ok()).map(|l| l.len()),
            descriptor: project.map(|p| p.path().to_path_buf()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsm_toolchain::{MockExecutor, RetryPolicy};
    use std::sync::Arc;
    use std::time::Duration;

    fn engine(mock: MockExecutor) -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let nix = NixToolchain::new(Arc::new(mock)).with_retry(RetryPolicy {
            initial_backoff: Duration::ZERO,
            ..RetryPolicy::default()
        });
        let project = dir.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        let engine = Engine::new(dir.path().join("config.toml"), project, nix)
            .with_nix_root(dir.path().join("nix"));
        (dir, engine)
    }

    #[test]
    fn init_uses_configured_format_and_defaults() {
        let (_dir, engine) = engine(MockExecutor::new());
        engine
            .settings()
            .set(crate::SettingKey::DescriptorFormat, "flake")
            .unwrap();
        engine
            .settings()
            .set(crate::SettingKey::DefaultPackages, "git")
            .unwrap();
        let p = engine.init(None, &["jq".to_owned(), "git".to_owned()]).unwrap();
        assert_eq!(p.dialect(), Dialect::Flake);
        assert_eq!(p.list().unwrap(), ["git", "jq"]);
    }

    #[test]
    fn list_with_status_marks_profile_packages() {
        let (_dir, engine) = engine(MockExecutor::new().respond(
            "nix-env -q --json",
            r#"{"ripgrep-14.1.0": {"name": "ripgrep-14.1.0", "pname": "ripgrep", "version": "14.1.0"}}"#,
        ));
        engine
            .init(Some(Dialect::Shell), &["ripgrep".to_owned(), "fd".to_owned()])
            .unwrap();
        let status = engine.list_with_status().unwrap();
        assert_eq!(
            status,
            [
                PackageStatus {
                    name: "ripgrep".to_owned(),
                    installed: Some(true)
                },
                PackageStatus {
                    name: "fd".to_owned(),
                    installed: Some(false)
                },
            ]
        );
    }

    #[test]
    fn list_with_status_without_nix_is_unknown() {
        let (_dir, engine) = engine(MockExecutor::new());
        engine.init(Some(Dialect::Shell), &["jq".to_owned()]).unwrap();
        let status = engine.list_with_status().unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].installed, None);
    }

    #[test]
    fn add_list_remove_round_trip() {
        let (_dir, engine) = engine(MockExecutor::new());
        engine.init(Some(Dialect::Shell), &[]).unwrap();
        engine.add(&["ripgrep".to_owned(), "fd".to_owned()]).unwrap();
        assert_eq!(engine.list().unwrap(), ["ripgrep", "fd"]);
        engine.remove(&["ripgrep".to_owned()]).unwrap();
        assert_eq!(engine.list().unwrap(), ["fd"]);
    }

    #[test]
    fn pin_looks_up_version_when_omitted() {
        let (_dir, engine) = engine(MockExecutor::new().respond(
            "nix-env -qa --json hello",
            r#"{"nixpkgs.hello": {"pname": "hello", "version": "2.12.1"}}"#,
        ));
        assert_eq!(engine.pin("hello", None).unwrap(), "2.12.1");
        assert_eq!(engine.pin("jq", Some("1.7.1")).unwrap(), "1.7.1");
        assert_eq!(engine.pins().unwrap().len(), 2);
        assert!(matches!(
            engine.pin("jq", Some("")),
            Err(CoreError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn clean_and_upgrade_use_toolchain() {
        let (_dir, engine) = engine(
            MockExecutor::new()
                .respond("nix-collect-garbage -d", "3 store paths deleted\n")
                .respond("nix-channel --update", ""),
        );
        assert_eq!(engine.clean().unwrap().summary, "3 store paths deleted");
        engine.upgrade().unwrap();
    }

    #[test]
    fn info_tolerates_missing_everything() {
        let (_dir, engine) = engine(MockExecutor::new());
        let info = engine.info();
        assert!(info.schema_version.is_none());
        assert!(info.descriptor.is_none());
        assert_eq!(info.nix.get("flakes_enabled").map(String::as_str), Some("false"));
        assert!(!engine.settings().exists());
    }
}
