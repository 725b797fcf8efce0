//! Environment diagnostics.
//!
//! A [`Doctor`] runs an ordered list of independent [`DiagnosticCheck`]s.
//! Each check yields exactly one [`DiagnosticResult`]; an error or panic
//! inside a check becomes an `unknown` result and the remaining checks
//! still run. Checks may offer an automatic fix; everything else is
//! reported as a manual remediation hint.

use crate::migration::{CURRENT_SCHEMA, KNOWN_VERSIONS};
use crate::project::ProjectDescriptor;
use crate::settings::{validate, SettingsStore};
use crate::{CoreError, SettingsError};
use nsm_schema::Dialect;
use nsm_store::FileStore;
use nsm_toolchain::{NixToolchain, ToolchainError};
use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use tracing::{debug, warn};

const NIX_INSTALL_FIX: &str = "Install Nix using: sh <(curl -L https://nixos.org/nix/install) --daemon";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticStatus {
    Ok,
    Warning,
    Error,
    Unknown,
}

impl DiagnosticStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticStatus::Ok => "ok",
            DiagnosticStatus::Warning => "warning",
            DiagnosticStatus::Error => "error",
            DiagnosticStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DiagnosticStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticResult {
    pub name: String,
    pub description: String,
    pub status: DiagnosticStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

impl DiagnosticResult {
    fn with_status(check: &dyn DiagnosticCheck, status: DiagnosticStatus, message: String) -> Self {
        Self {
            name: check.name().to_owned(),
            description: check.description().to_owned(),
            status,
            message,
            fix: None,
        }
    }

    pub fn ok(check: &dyn DiagnosticCheck, message: impl Into<String>) -> Self {
        Self::with_status(check, DiagnosticStatus::Ok, message.into())
    }

    pub fn warning(check: &dyn DiagnosticCheck, message: impl Into<String>) -> Self {
        Self::with_status(check, DiagnosticStatus::Warning, message.into())
    }

    pub fn error(check: &dyn DiagnosticCheck, message: impl Into<String>) -> Self {
        Self::with_status(check, DiagnosticStatus::Error, message.into())
    }

    pub fn unknown(check: &dyn DiagnosticCheck, message: impl Into<String>) -> Self {
        Self::with_status(check, DiagnosticStatus::Unknown, message.into())
    }

    #[must_use]
    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

/// Everything a check may look at.
#[derive(Debug, Clone)]
pub struct DoctorContext {
    pub settings: SettingsStore,
    pub project_dir: PathBuf,
    pub toolchain: NixToolchain,
    pub files: FileStore,
    /// Root of the Nix installation, normally `/nix`.
    pub nix_root: PathBuf,
}

pub trait DiagnosticCheck: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn run(&self, ctx: &DoctorContext) -> Result<DiagnosticResult, CoreError>;

    /// Attempt an automatic fix for `result`. `None` means the issue needs
    /// manual attention; `Some(Ok(msg))` describes what was done.
    fn fix(&self, _ctx: &DoctorContext, _result: &DiagnosticResult) -> Option<Result<String, CoreError>> {
        None
    }
}

/// Outcome of [`Doctor::fix`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FixReport {
    pub applied: Vec<String>,
    pub failed: Vec<String>,
    pub manual: Vec<String>,
}

pub struct Doctor {
    checks: Vec<Box<dyn DiagnosticCheck>>,
}

impl fmt::Debug for Doctor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.checks.iter().map(|c| c.name()))
            .finish()
    }
}

impl Default for Doctor {
    fn default() -> Self {
        Self::new(default_checks())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

impl Doctor {
    pub fn new(checks: Vec<Box<dyn DiagnosticCheck>>) -> Self {
        Self { checks }
    }

    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run every check in order. Always returns one result per check.
    pub fn run(&self, ctx: &DoctorContext) -> Vec<DiagnosticResult> {
        self.checks
            .iter()
            .map(|check| {
                let check = check.as_ref();
                debug!("running check {}", check.name());
                match catch_unwind(AssertUnwindSafe(|| check.run(ctx))) {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => DiagnosticResult::unknown(check, format!("check failed: {e}")),
                    Err(payload) => {
                        let msg = panic_message(payload.as_ref());
                        warn!("check {} panicked: {msg}", check.name());
                        DiagnosticResult::unknown(check, format!("check panicked: {msg}"))
                    }
                }
            })
            .collect()
    }

    /// Apply automatic fixes for the non-ok entries of `results`, which must
    /// come from [`run`](Self::run) on this doctor.
    pub fn fix(&self, ctx: &DoctorContext, results: &[DiagnosticResult]) -> FixReport {
        let mut report = FixReport::default();
        for (check, result) in self.checks.iter().zip(results) {
            if result.status == DiagnosticStatus::Ok {
                continue;
            }
            match check.fix(ctx, result) {
                Some(Ok(done)) => report.applied.push(done),
                Some(Err(e)) => report.failed.push(format!("{}: {e}", check.name())),
                None => {
                    if let Some(hint) = &result.fix {
                        report.manual.push(format!("{}: {hint}", check.name()));
                    }
                }
            }
        }
        report
    }
}

/// The standard battery, in reporting order.
pub fn default_checks() -> Vec<Box<dyn DiagnosticCheck>> {
    #[cfg_attr(not(unix), allow(unused_mut))]
    let mut checks: Vec<Box<dyn DiagnosticCheck>> = vec![
        Box::new(NixInstalledCheck),
        Box::new(ChannelsCheck),
        Box::new(FlakesCheck),
        Box::new(SettingsCheck),
        Box::new(DescriptorCheck),
    ];
    #[cfg(unix)]
    {
        checks.push(Box::new(unix::StorePermissionsCheck));
        checks.push(Box::new(unix::DiskSpaceCheck::default()));
    }
    checks
}

pub struct NixInstalledCheck;

impl DiagnosticCheck for NixInstalledCheck {
    fn name(&self) -> &str {
        "nix"
    }

    fn description(&self) -> &str {
        "Nix installation"
    }

    fn run(&self, ctx: &DoctorContext) -> Result<DiagnosticResult, CoreError> {
        Ok(match ctx.toolchain.version() {
            Ok(version) => DiagnosticResult::ok(self, format!("Nix {version} is installed")),
            Err(ToolchainError::NotInstalled(_)) => {
                DiagnosticResult::error(self, "Nix is not installed or not on PATH")
                    .with_fix(NIX_INSTALL_FIX)
            }
            Err(e) => DiagnosticResult::error(self, format!("Nix is not working: {e}"))
                .with_fix("Reinstall Nix or check your PATH configuration"),
        })
    }
}

pub struct ChannelsCheck;

impl DiagnosticCheck for ChannelsCheck {
    fn name(&self) -> &str {
        "channels"
    }

    fn description(&self) -> &str {
        "Nix channels"
    }

    fn run(&self, ctx: &DoctorContext) -> Result<DiagnosticResult, CoreError> {
        let channels = ctx.toolchain.channels()?;
        if channels.is_empty() {
            return Ok(DiagnosticResult::warning(self, "No channels are subscribed").with_fix(
                "nix-channel --add https://nixos.org/channels/nixos-unstable nixpkgs && nix-channel --update",
            ));
        }
        let names: Vec<_> = channels.iter().map(|c| c.name.as_str()).collect();
        Ok(DiagnosticResult::ok(
            self,
            format!("{} channel(s): {}", channels.len(), names.join(", ")),
        ))
    }
}

pub struct FlakesCheck;

impl DiagnosticCheck for FlakesCheck {
    fn name(&self) -> &str {
        "flakes"
    }

    fn description(&self) -> &str {
        "Flakes support"
    }

    fn run(&self, ctx: &DoctorContext) -> Result<DiagnosticResult, CoreError> {
        Ok(if ctx.toolchain.flakes_supported() {
            DiagnosticResult::ok(self, "Flakes are enabled")
        } else {
            DiagnosticResult::warning(self, "Flakes are not enabled").with_fix(
                "Add 'experimental-features = nix-command flakes' to ~/.config/nix/nix.conf",
            )
        })
    }
}

pub struct SettingsCheck;

impl DiagnosticCheck for SettingsCheck {
    fn name(&self) -> &str {
        "settings"
    }

    fn description(&self) -> &str {
        "NSM settings file"
    }

    fn run(&self, ctx: &DoctorContext) -> Result<DiagnosticResult, CoreError> {
        let path = ctx.settings.path().display().to_string();
        if !ctx.settings.exists() {
            return Ok(DiagnosticResult::warning(
                self,
                format!("No settings file at {path}; defaults are in effect"),
            )
            .with_fix("nsm doctor --fix"));
        }

        let version = match ctx.settings.stored_version() {
            Ok(v) => v,
            Err(SettingsError::Validation(v)) => {
                let detail: Vec<_> = v.iter().map(ToString::to_string).collect();
                return Ok(DiagnosticResult::error(
                    self,
                    format!("{path} cannot be read: {}", detail.join("; ")),
                )
                .with_fix("nsm config reset"));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(v) = version {
            if !KNOWN_VERSIONS.contains(&v) {
                return Ok(DiagnosticResult::unknown(
                    self,
                    format!("Schema version {v} is not known to this build (latest {CURRENT_SCHEMA})"),
                ));
            }
        }

        let doc = match ctx.settings.load_existing() {
            Ok(doc) => doc,
            Err(SettingsError::Validation(v)) => {
                let detail: Vec<_> = v.iter().map(ToString::to_string).collect();
                return Ok(DiagnosticResult::error(self, detail.join("; "))
                    .with_fix("nsm config reset"));
            }
            Err(e) => return Err(e.into()),
        };

        let violations = validate(&doc);
        if !violations.is_empty() {
            let detail: Vec<_> = violations.iter().map(ToString::to_string).collect();
            return Ok(DiagnosticResult::error(
                self,
                format!("{} invalid setting(s): {}", violations.len(), detail.join("; ")),
            )
            .with_fix("nsm config set <key> <value>, or nsm config reset"));
        }

        if version != Some(CURRENT_SCHEMA) {
            let from = version.map_or_else(|| "unversioned".to_owned(), |v| v.to_string());
            return Ok(DiagnosticResult::warning(
                self,
                format!("Schema {from} is older than {CURRENT_SCHEMA}"),
            )
            .with_fix("nsm migrate"));
        }

        let missing = ctx.settings.missing_fields()?;
        if !missing.is_empty() {
            return Ok(DiagnosticResult::warning(
                self,
                format!("{path} lacks {}; defaults are in effect", missing.join(", ")),
            )
            .with_fix("nsm migrate"));
        }

        Ok(DiagnosticResult::ok(self, format!("{path} is valid")))
    }

    fn fix(&self, ctx: &DoctorContext, result: &DiagnosticResult) -> Option<Result<String, CoreError>> {
        if result.status != DiagnosticStatus::Warning {
            return None;
        }
        if !ctx.settings.exists() {
            return Some(
                ctx.settings
                    .load()
                    .map(|_| format!("Created default settings at {}", ctx.settings.path().display()))
                    .map_err(Into::into),
            );
        }
        Some(match ctx.settings.migrate() {
            Ok(Some(m)) if m.steps.is_empty() => {
                Ok(format!("Filled missing settings: {}", m.filled.join(", ")))
            }
            Ok(Some(m)) => Ok(format!(
                "Migrated settings to {} ({} step(s))",
                m.to,
                m.steps.len()
            )),
            Ok(None) => Ok("Settings already current".to_owned()),
            Err(e) => Err(e.into()),
        })
    }
}

pub struct DescriptorCheck;

impl DiagnosticCheck for DescriptorCheck {
    fn name(&self) -> &str {
        "descriptor"
    }

    fn description(&self) -> &str {
        "Project descriptor"
    }

    fn run(&self, ctx: &DoctorContext) -> Result<DiagnosticResult, CoreError> {
        let Some(project) = ProjectDescriptor::detect(&ctx.project_dir, ctx.files.clone()) else {
            return Ok(DiagnosticResult::warning(
                self,
                format!("No shell.nix or flake.nix in {}", ctx.project_dir.display()),
            )
            .with_fix("nsm init"));
        };
        let file = project.dialect().file_name();
        if !project.is_editable()? {
            return Ok(DiagnosticResult::warning(
                self,
                format!("{file} has no package list NSM can edit"),
            )
            .with_fix(format!(
                "Add a 'packages = with pkgs; [ ];' list to {file}, or recreate it with nsm init"
            )));
        }
        let count = project.list()?.len();
        Ok(DiagnosticResult::ok(self, format!("{file} lists {count} package(s)")))
    }

    fn fix(&self, ctx: &DoctorContext, _result: &DiagnosticResult) -> Option<Result<String, CoreError>> {
        if ProjectDescriptor::detect(&ctx.project_dir, ctx.files.clone()).is_some() {
            return None;
        }
        let doc = match ctx.settings.load() {
            Ok(doc) => doc,
            Err(e) => return Some(Err(e.into())),
        };
        let dialect = doc.dialect().unwrap_or(Dialect::Shell);
        Some(
            ProjectDescriptor::init(
                &ctx.project_dir,
                dialect,
                doc.default_packages(),
                &doc.channel.url,
                ctx.files.clone(),
            )
            .map(|p| format!("Created {}", p.path().display())),
        )
    }
}

#[cfg(unix)]
pub mod unix {
    //! Checks that need POSIX filesystem calls.

    use super::{DiagnosticCheck, DiagnosticResult, DoctorContext, NIX_INSTALL_FIX};
    use crate::CoreError;
    use nsm_store::StoreError;
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    /// 1 GiB.
    pub const MIN_FREE_BYTES: u64 = 1 << 30;

    fn c_path(path: &Path) -> Result<CString, CoreError> {
        CString::new(path.as_os_str().as_bytes()).map_err(|e| {
            StoreError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            }
            .into()
        })
    }

    fn accessible(path: &Path, mode: libc::c_int) -> Result<bool, CoreError> {
        let c = c_path(path)?;
        // SAFETY: access() only reads the NUL-terminated path.
        #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
        let ret = unsafe { libc::access(c.as_ptr(), mode) };
        Ok(ret == 0)
    }

    /// Bytes available to unprivileged users on the filesystem holding `path`.
    pub fn available_bytes(path: &Path) -> Result<u64, CoreError> {
        let c = c_path(path)?;
        // SAFETY: zeroed statvfs is a valid initial state for the struct.
        #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: valid NUL-terminated path and a stack-allocated output
        // struct that is only read after the call succeeds.
        #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
        let ret = unsafe { libc::statvfs(c.as_ptr(), &raw mut stat) };
        if ret != 0 {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::last_os_error(),
            }
            .into());
        }
        #[allow(clippy::useless_conversion)]
        let free = u64::from(stat.f_bavail) * u64::from(stat.f_frsize);
        Ok(free)
    }

    pub struct StorePermissionsCheck;

    impl DiagnosticCheck for StorePermissionsCheck {
        fn name(&self) -> &str {
            "store-permissions"
        }

        fn description(&self) -> &str {
            "Nix store access"
        }

        fn run(&self, ctx: &DoctorContext) -> Result<DiagnosticResult, CoreError> {
            let root = &ctx.nix_root;
            if !root.is_dir() {
                return Ok(DiagnosticResult::error(
                    self,
                    format!("{} does not exist", root.display()),
                )
                .with_fix(NIX_INSTALL_FIX));
            }
            let store = root.join("store");
            if !store.is_dir() {
                return Ok(DiagnosticResult::error(
                    self,
                    format!("{} does not exist", store.display()),
                )
                .with_fix(NIX_INSTALL_FIX));
            }
            if !accessible(&store, libc::R_OK | libc::X_OK)? {
                // SAFETY: getuid() has no preconditions.
                #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
                let uid = unsafe { libc::getuid() };
                return Ok(DiagnosticResult::error(
                    self,
                    format!("{} is not readable", store.display()),
                )
                .with_fix(format!(
                    "As root, restore read access to {} for uid {uid} (or reinstall Nix)",
                    store.display()
                )));
            }
            Ok(DiagnosticResult::ok(
                self,
                format!("{} is readable", store.display()),
            ))
        }
    }

    pub struct DiskSpaceCheck {
        pub min_free: u64,
    }

    impl Default for DiskSpaceCheck {
        fn default() -> Self {
            Self {
                min_free: MIN_FREE_BYTES,
            }
        }
    }

    impl DiagnosticCheck for DiskSpaceCheck {
        fn name(&self) -> &str {
            "disk-space"
        }

        fn description(&self) -> &str {
            "Free disk space"
        }

        fn run(&self, ctx: &DoctorContext) -> Result<DiagnosticResult, CoreError> {
            let target = if ctx.nix_root.is_dir() {
                ctx.nix_root.as_path()
            } else {
                ctx.project_dir.as_path()
            };
            let free = available_bytes(target)?;
            let free_mib = free / (1024 * 1024);
            if free < self.min_free {
                return Ok(DiagnosticResult::warning(
                    self,
                    format!("Only {free_mib} MiB free on {}", target.display()),
                )
                .with_fix("nsm clean"));
            }
            Ok(DiagnosticResult::ok(
                self,
                format!("{} GiB free on {}", free_mib / 1024, target.display()),
            ))
        }
    }
}
