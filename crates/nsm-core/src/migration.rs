//! Settings schema migration.
//!
//! Each step is a pure function over the raw TOML table, keyed by the
//! version it upgrades from. Steps run in order until the document reaches
//! [`CURRENT_SCHEMA`]. A document already at the current version still gets
//! any field it lacks filled in. Versions outside [`KNOWN_VERSIONS`] are
//! never touched.

use crate::settings::{Violation, DEFAULT_CHANNEL, DEFAULT_FORMAT};
use crate::SettingsError;
use nsm_schema::SchemaVersion;
use serde::Serialize;
use std::fmt;
use toml::{Table, Value};
use tracing::info;

pub const SCHEMA_1_0_0: SchemaVersion = SchemaVersion::new(1, 0, 0);
pub const SCHEMA_1_1_0: SchemaVersion = SchemaVersion::new(1, 1, 0);

/// Strictly increasing.
pub const KNOWN_VERSIONS: [SchemaVersion; 2] = [SCHEMA_1_0_0, SCHEMA_1_1_0];
pub const CURRENT_SCHEMA: SchemaVersion = SCHEMA_1_1_0;

struct MigrationStep {
    /// `None` is a document without `schema_version`.
    from: Option<SchemaVersion>,
    to: SchemaVersion,
    apply: fn(Table) -> Table,
}

const STEPS: &[MigrationStep] = &[
    MigrationStep {
        from: None,
        to: SCHEMA_1_0_0,
        apply: introduce_missing_fields,
    },
    MigrationStep {
        from: Some(SCHEMA_1_0_0),
        to: SCHEMA_1_1_0,
        apply: nest_channel,
    },
];

/// One applied step, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppliedStep {
    pub from: Option<SchemaVersion>,
    pub to: SchemaVersion,
}

impl fmt::Display for AppliedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.from {
            Some(v) => write!(f, "{v} -> {}", self.to),
            None => write!(f, "unversioned -> {}", self.to),
        }
    }
}

/// Read `schema_version` from a raw document.
pub fn version_of(table: &Table) -> Result<Option<SchemaVersion>, SettingsError> {
    match table.get("schema_version") {
        None => Ok(None),
        Some(Value::String(s)) => s.parse().map(Some).map_err(|e| {
            SettingsError::Validation(vec![Violation::new(
                "schema_version",
                format!("'{s}' {e}"),
            )])
        }),
        Some(other) => Err(SettingsError::Validation(vec![Violation::new(
            "schema_version",
            format!("must be a string, found {}", other.type_str()),
        )])),
    }
}

/// Upgrade `table` to [`CURRENT_SCHEMA`], returning the steps applied.
///
/// An already-current document comes back with no steps, its missing
/// fields (see [`missing_fields`]) filled with defaults. A version newer
/// than current, or one this build has no step for, is
/// [`SettingsError::UnsupportedVersion`] and the table is not modified.
pub fn migrate_table(mut table: Table) -> Result<(Table, Vec<AppliedStep>), SettingsError> {
    let mut applied = Vec::new();
    loop {
        let version = version_of(&table)?;
        if version == Some(CURRENT_SCHEMA) {
            return Ok((fill_current_fields(table), applied));
        }
        let Some(step) = STEPS.iter().find(|s| s.from == version) else {
            return Err(SettingsError::UnsupportedVersion {
                found: version.map_or_else(String::new, |v| v.to_string()),
                supported: CURRENT_SCHEMA,
            });
        };
        table = (step.apply)(table);
        table.insert(
            "schema_version".to_owned(),
            Value::String(step.to.to_string()),
        );
        let done = AppliedStep {
            from: step.from,
            to: step.to,
        };
        info!("settings migration step {done}");
        applied.push(done);
    }
}

/// Fields a current document should carry but `table` lacks, in file order.
/// A `[channel]` table without `url` counts as a missing `channel.url`.
pub fn missing_fields(table: &Table) -> Vec<&'static str> {
    let mut out: Vec<&'static str> = ["descriptor_format", "default_packages"]
        .into_iter()
        .filter(|k| !table.contains_key(*k))
        .collect();
    match table.get("channel") {
        None => out.push("channel"),
        Some(Value::Table(t)) if !t.contains_key("url") => out.push("channel.url"),
        Some(_) => {}
    }
    if !table.contains_key("pins") {
        out.push("pins");
    }
    out
}

fn fill_current_fields(table: Table) -> Table {
    let missing = missing_fields(&table);
    if missing.is_empty() {
        return table;
    }
    let mut table = introduce_missing_fields(table);
    if let Value::Table(channel) = table
        .entry("channel")
        .or_insert_with(|| Value::Table(Table::new()))
    {
        channel
            .entry("url")
            .or_insert_with(|| Value::String(DEFAULT_CHANNEL.to_owned()));
    }
    info!("filled missing settings fields: {}", missing.join(", "));
    table
}

/// unversioned -> 1.0.0
fn introduce_missing_fields(mut table: Table) -> Table {
    table
        .entry("descriptor_format")
        .or_insert_with(|| Value::String(DEFAULT_FORMAT.to_owned()));
    table
        .entry("default_packages")
        .or_insert_with(|| Value::Array(Vec::new()));
    table
        .entry("pins")
        .or_insert_with(|| Value::Table(Table::new()));
    table
}

/// 1.0.0 -> 1.1.0: flat `channel = "x"` becomes `[channel] url = "x"`.
fn nest_channel(mut table: Table) -> Table {
    let channel = match table.remove("channel") {
        Some(Value::String(url)) => {
            let mut t = Table::new();
            t.insert("url".to_owned(), Value::String(url));
            t
        }
        Some(Value::Table(mut t)) => {
            t.entry("url")
                .or_insert_with(|| Value::String(DEFAULT_CHANNEL.to_owned()));
            t
        }
        // Anything else is left for validation to reject.
        Some(other) => {
            table.insert("channel".to_owned(), other);
            return normalize_format(table);
        }
        None => {
            let mut t = Table::new();
            t.insert("url".to_owned(), Value::String(DEFAULT_CHANNEL.to_owned()));
            t
        }
    };
    table.insert("channel".to_owned(), Value::Table(channel));
    normalize_format(table)
}

fn normalize_format(mut table: Table) -> Table {
    if let Some(Value::String(format)) = table.get_mut("descriptor_format") {
        if let Some(stripped) = format.strip_suffix(".nix") {
            if stripped == "shell" || stripped == "flake" {
                *format = stripped.to_owned();
            }
        }
    }
    table
}
