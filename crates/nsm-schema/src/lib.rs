//! Descriptor scanning, templates, and name validation for NSM.
//!
//! This crate defines the text layer: the two descriptor [`Dialect`]s,
//! extraction/injection/removal of package names inside a `shell.nix` or
//! `flake.nix` package list (`descriptor`), starter templates and
//! shell-to-flake conversion (`template`), and the validators shared by the
//! settings store (`validate`).

pub mod descriptor;
pub mod dialect;
pub mod template;
pub mod validate;

pub use descriptor::{
    contains_package, extract_packages, inject_packages, remove_packages, section_bounds,
    DescriptorError,
};
pub use dialect::{Dialect, UnknownDialect};
pub use template::{convert_shell_to_flake, flake_template, shell_template, template_for};
pub use validate::{
    validate_channel, validate_package_name, validate_version, NameError, SchemaVersion,
    CHANNEL_PREFIXES, MAX_PACKAGE_NAME_LEN, MAX_VERSION_LEN,
};
