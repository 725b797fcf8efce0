//! Core of NSM: settings, project descriptors, and diagnostics.
//!
//! This crate ties the atomic file store, the descriptor text layer, and the
//! Nix toolchain together. `SettingsStore` owns the versioned settings file
//! (load, validate, migrate, typed get/set, pins), `ProjectDescriptor` edits
//! `shell.nix`/`flake.nix` under the file's lock, `Doctor` runs the
//! diagnostics battery with an opt-in auto-fix, and `Engine` is the facade
//! the CLI talks to.

pub mod doctor;
pub mod engine;
pub mod migration;
pub mod project;
pub mod settings;

pub use doctor::{
    default_checks, DiagnosticCheck, DiagnosticResult, DiagnosticStatus, Doctor, DoctorContext,
    FixReport,
};
pub use engine::{CleanReport, Engine, InfoReport, PackageStatus};
pub use migration::{AppliedStep, CURRENT_SCHEMA, KNOWN_VERSIONS};
pub use project::{AddOutcome, ProjectDescriptor, RemoveOutcome, DESCRIPTOR_MODE};
pub use settings::{
    validate, ChannelRef, SettingKey, SettingsDocument, SettingsMigration, SettingsStore,
    Violation, DEFAULT_CHANNEL, DEFAULT_FORMAT,
};

use nsm_schema::SchemaVersion;
use std::path::PathBuf;
use thiserror::Error;

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings: {}", join_violations(.0))]
    Validation(Vec<Violation>),
    #[error(
        "unknown setting '{0}' (expected one of: channel.url, descriptor.format, default.packages, schema_version)"
    )]
    UnknownSetting(String),
    #[error("setting '{0}' is read-only")]
    ReadOnly(String),
    #[error("settings schema '{found}' is not supported (this build knows up to {supported})")]
    UnsupportedVersion {
        found: String,
        supported: SchemaVersion,
    },
    #[error("package '{0}' is not pinned")]
    NotPinned(String),
    #[error("settings store error: {0}")]
    Store(#[from] nsm_store::StoreError),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Settings(#[from] SettingsError),
    #[error("store error: {0}")]
    Store(#[from] nsm_store::StoreError),
    #[error("descriptor error: {0}")]
    Descriptor(#[from] nsm_schema::DescriptorError),
    #[error("toolchain error: {0}")]
    Toolchain(#[from] nsm_toolchain::ToolchainError),
    #[error("no shell.nix or flake.nix in {}; run 'nsm init' first", .0.display())]
    NoDescriptor(PathBuf),
    #[error("{} already exists", .0.display())]
    DescriptorExists(PathBuf),
    #[error("invalid package name '{name}': {reason}")]
    InvalidPackage {
        name: String,
        reason: nsm_schema::NameError,
    },
    #[error("invalid version '{version}': {reason}")]
    InvalidVersion {
        version: String,
        reason: nsm_schema::NameError,
    },
}
