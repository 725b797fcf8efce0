use crate::migration::{
    migrate_table, missing_fields, version_of, AppliedStep, CURRENT_SCHEMA, KNOWN_VERSIONS,
    SCHEMA_1_0_0,
};
use crate::SettingsError;
use nsm_schema::{
    validate_channel, validate_package_name, validate_version, Dialect, SchemaVersion,
};
use nsm_store::{FileStore, StoreError, OWNER_ONLY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use toml::Table;
use tracing::{debug, info};

pub const DEFAULT_CHANNEL: &str = "nixos-unstable";
pub const DEFAULT_FORMAT: &str = "shell";

/// `[channel]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub url: String,
}

/// The typed settings document. Field order matters for TOML output:
/// plain values first, tables last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsDocument {
    pub schema_version: String,
    pub descriptor_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_packages: Option<Vec<String>>,
    pub channel: ChannelRef,
    pub pins: BTreeMap<String, String>,
}

impl Default for SettingsDocument {
    /// Fresh defaults, stamped at the current schema version.
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA.to_string(),
            descriptor_format: DEFAULT_FORMAT.to_owned(),
            default_packages: Some(Vec::new()),
            channel: ChannelRef {
                url: DEFAULT_CHANNEL.to_owned(),
            },
            pins: BTreeMap::new(),
        }
    }
}

/// Accepts both `channel = "x"` (pre-1.1.0) and `[channel] url = "x"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawChannel {
    Flat(String),
    Nested {
        #[serde(default)]
        url: Option<String>,
    },
}

/// On-disk shape with every field optional; defaults are filled in by
/// [`SettingsDocument::from_raw`].
#[derive(Deserialize)]
struct RawSettings {
    schema_version: Option<String>,
    descriptor_format: Option<String>,
    default_packages: Option<Vec<String>>,
    channel: Option<RawChannel>,
    pins: Option<BTreeMap<String, String>>,
}

impl SettingsDocument {
    fn from_raw(raw: RawSettings) -> Self {
        let url = match raw.channel {
            Some(RawChannel::Flat(url)) => url,
            Some(RawChannel::Nested { url: Some(url) }) => url,
            Some(RawChannel::Nested { url: None }) | None => DEFAULT_CHANNEL.to_owned(),
        };
        Self {
            schema_version: raw
                .schema_version
                .unwrap_or_else(|| SCHEMA_1_0_0.to_string()),
            descriptor_format: raw
                .descriptor_format
                .unwrap_or_else(|| DEFAULT_FORMAT.to_owned()),
            default_packages: Some(raw.default_packages.unwrap_or_default()),
            channel: ChannelRef { url },
            pins: raw.pins.unwrap_or_default(),
        }
    }

    /// Parse TOML text, filling defaults for missing fields. Syntax and
    /// type errors are a single-entry [`SettingsError::Validation`].
    pub fn parse(text: &str) -> Result<Self, SettingsError> {
        let raw: RawSettings = toml::from_str(text).map_err(|e| {
            SettingsError::Validation(vec![Violation::new(
                "file",
                format!("not valid settings TOML: {}", e.message()),
            )])
        })?;
        Ok(Self::from_raw(raw))
    }

    fn from_table(table: Table) -> Result<Self, SettingsError> {
        let raw: RawSettings = toml::Value::Table(table).try_into().map_err(
            |e: toml::de::Error| {
                SettingsError::Validation(vec![Violation::new(
                    "file",
                    format!("not valid settings TOML: {}", e.message()),
                )])
            },
        )?;
        Ok(Self::from_raw(raw))
    }

    pub fn to_toml(&self) -> Result<String, SettingsError> {
        toml::to_string(self).map_err(|e| {
            SettingsError::Validation(vec![Violation::new("file", e.to_string())])
        })
    }

    /// The descriptor dialect, if `descriptor_format` names one.
    pub fn dialect(&self) -> Option<Dialect> {
        self.descriptor_format.parse().ok()
    }

    pub fn default_packages(&self) -> &[String] {
        self.default_packages.as_deref().unwrap_or_default()
    }
}

/// One broken validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every rule and return all violations; an empty list means valid.
pub fn validate(doc: &SettingsDocument) -> Vec<Violation> {
    let mut out = Vec::new();

    if let Err(e) = validate_channel(&doc.channel.url) {
        out.push(Violation::new(
            "channel.url",
            format!("'{}' {e}", doc.channel.url),
        ));
    }
    if let Err(e) = doc.descriptor_format.parse::<Dialect>() {
        out.push(Violation::new("descriptor_format", e.to_string()));
    }
    match &doc.default_packages {
        None => out.push(Violation::new("default_packages", "is required")),
        Some(pkgs) => {
            for (i, pkg) in pkgs.iter().enumerate() {
                if let Err(e) = validate_package_name(pkg) {
                    out.push(Violation::new(
                        format!("default_packages[{i}]"),
                        format!("'{pkg}' {e}"),
                    ));
                }
            }
        }
    }
    if let Err(e) = doc.schema_version.parse::<SchemaVersion>() {
        out.push(Violation::new(
            "schema_version",
            format!("'{}' {e}", doc.schema_version),
        ));
    }
    for (pkg, version) in &doc.pins {
        if let Err(e) = validate_package_name(pkg) {
            out.push(Violation::new(format!("pins.{pkg}"), format!("name {e}")));
        }
        if let Err(e) = validate_version(version) {
            out.push(Violation::new(
                format!("pins.{pkg}"),
                format!("version '{version}' {e}"),
            ));
        }
    }
    out
}

/// Settings addressable by `nsm config get/set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    ChannelUrl,
    DescriptorFormat,
    DefaultPackages,
    SchemaVersion,
}

impl SettingKey {
    pub const ALL: [SettingKey; 4] = [
        SettingKey::ChannelUrl,
        SettingKey::DescriptorFormat,
        SettingKey::DefaultPackages,
        SettingKey::SchemaVersion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::ChannelUrl => "channel.url",
            SettingKey::DescriptorFormat => "descriptor.format",
            SettingKey::DefaultPackages => "default.packages",
            SettingKey::SchemaVersion => "schema_version",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SettingKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| SettingsError::UnknownSetting(s.to_owned()))
    }
}

/// Result of [`SettingsStore::migrate`] when something changed.
#[derive(Debug, Clone, Serialize)]
pub struct SettingsMigration {
    pub from: Option<SchemaVersion>,
    pub to: SchemaVersion,
    pub steps: Vec<AppliedStep>,
    /// Fields a current-version file lacked and got defaults for.
    pub filled: Vec<String>,
    pub backup_path: Option<PathBuf>,
}

fn parse_table(text: &str) -> Result<Table, SettingsError> {
    text.parse().map_err(|e: toml::de::Error| {
        SettingsError::Validation(vec![Violation::new(
            "file",
            format!("not valid settings TOML: {}", e.message()),
        )])
    })
}

/// Writes must not downgrade a file from a schema this build does not know.
fn ensure_known_version(table: &Table) -> Result<(), SettingsError> {
    match version_of(table)? {
        Some(v) if !KNOWN_VERSIONS.contains(&v) => Err(SettingsError::UnsupportedVersion {
            found: v.to_string(),
            supported: CURRENT_SCHEMA,
        }),
        _ => Ok(()),
    }
}

/// The settings file, read and written through a shared [`FileStore`].
///
/// Every mutation takes the file's lock for the whole read-modify-write, so
/// a `migrate` and a `set` on the same file never interleave.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    files: FileStore,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>, files: FileStore) -> Self {
        Self {
            path: path.into(),
            files,
        }
    }

    /// `<config dir>/nsm/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("nsm").join("config.toml"))
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn read_unlocked(&self) -> Result<Option<String>, SettingsError> {
        match self.files.read_to_string(&self.path) {
            Ok(s) => Ok(Some(s)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_unlocked(&self, doc: &SettingsDocument) -> Result<Option<PathBuf>, SettingsError> {
        let violations = validate(doc);
        if !violations.is_empty() {
            return Err(SettingsError::Validation(violations));
        }
        let text = doc.to_toml()?;
        Ok(self.files.write(&self.path, text.as_bytes(), OWNER_ONLY)?)
    }

    fn read_table_unlocked(&self) -> Result<Option<Table>, SettingsError> {
        self.read_unlocked()?.as_deref().map(parse_table).transpose()
    }

    /// Write `doc` over `base`, keeping keys of `base` the document does
    /// not model.
    fn write_merged_unlocked(
        &self,
        base: Option<Table>,
        doc: &SettingsDocument,
    ) -> Result<Option<PathBuf>, SettingsError> {
        let Some(mut table) = base else {
            return self.write_unlocked(doc);
        };
        let violations = validate(doc);
        if !violations.is_empty() {
            return Err(SettingsError::Validation(violations));
        }
        let toml::Value::Table(known) = toml::Value::try_from(doc).map_err(|e| {
            SettingsError::Validation(vec![Violation::new("file", e.to_string())])
        })?
        else {
            return Err(SettingsError::Validation(vec![Violation::new(
                "file",
                "settings did not serialize to a table",
            )]));
        };
        table.extend(known);
        let text = toml::to_string(&table).map_err(|e| {
            SettingsError::Validation(vec![Violation::new("file", e.to_string())])
        })?;
        Ok(self.files.write(&self.path, text.as_bytes(), OWNER_ONLY)?)
    }

    fn load_unlocked(&self) -> Result<SettingsDocument, SettingsError> {
        match self.read_unlocked()? {
            Some(text) => SettingsDocument::parse(&text),
            None => {
                let doc = SettingsDocument::default();
                self.write_unlocked(&doc)?;
                info!("created default settings at {}", self.path.display());
                Ok(doc)
            }
        }
    }

    /// Current settings. A missing file is created with defaults; missing
    /// fields of an existing file are filled in memory only.
    pub fn load(&self) -> Result<SettingsDocument, SettingsError> {
        self.files.with_lock(&self.path, || self.load_unlocked())
    }

    /// Like [`load`](Self::load) but never creates the file.
    pub fn load_existing(&self) -> Result<SettingsDocument, SettingsError> {
        self.files.with_lock(&self.path, || match self.read_unlocked()? {
            Some(text) => SettingsDocument::parse(&text),
            None => Err(StoreError::NotFound(self.path.clone()).into()),
        })
    }

    /// Validate and persist. Nothing is written when any rule fails, or
    /// when the file on disk carries a schema version this build does not
    /// know. Keys the document does not model are kept.
    pub fn save(&self, doc: &SettingsDocument) -> Result<(), SettingsError> {
        self.files
            .with_lock(&self.path, || {
                let base = self.read_table_unlocked()?;
                if let Some(table) = &base {
                    ensure_known_version(table)?;
                }
                self.write_merged_unlocked(base, doc)
            })
            .map(drop)
    }

    /// Locked load-modify-save.
    ///
    /// A file at an unknown schema version is refused with
    /// [`SettingsError::UnsupportedVersion`] before `f` runs. Keys the
    /// document does not model survive the write.
    pub fn update<F>(&self, f: F) -> Result<SettingsDocument, SettingsError>
    where
        F: FnOnce(&mut SettingsDocument) -> Result<(), SettingsError>,
    {
        self.files.with_lock(&self.path, || {
            let base = self.read_table_unlocked()?;
            let mut doc = match &base {
                Some(table) => {
                    ensure_known_version(table)?;
                    SettingsDocument::from_table(table.clone())?
                }
                None => SettingsDocument::default(),
            };
            let before = doc.clone();
            f(&mut doc)?;
            if base.is_none() || doc != before {
                self.write_merged_unlocked(base, &doc)?;
            }
            Ok(doc)
        })
    }

    /// Upgrade the file to the current schema.
    ///
    /// A file already at the current version has its missing fields filled
    /// in. `Ok(None)` when there is nothing to do (already current and
    /// complete, or no file); no write happens in that case. All steps are
    /// computed in memory and persisted once, behind a backup of the
    /// previous content. Keys the document does not model are kept.
    pub fn migrate(&self) -> Result<Option<SettingsMigration>, SettingsError> {
        self.files.with_lock(&self.path, || {
            let Some(table) = self.read_table_unlocked()? else {
                debug!("no settings file at {}; nothing to migrate", self.path.display());
                return Ok(None);
            };
            let from = version_of(&table)?;
            let filled: Vec<String> = if from == Some(CURRENT_SCHEMA) {
                missing_fields(&table).into_iter().map(str::to_owned).collect()
            } else {
                Vec::new()
            };
            let (migrated, steps) = migrate_table(table)?;
            if steps.is_empty() && filled.is_empty() {
                return Ok(None);
            }
            let doc = SettingsDocument::from_table(migrated.clone())?;
            let backup_path = self.write_merged_unlocked(Some(migrated), &doc)?;
            info!(
                "migrated settings {} from {} to {CURRENT_SCHEMA}",
                self.path.display(),
                from.map_or_else(|| "unversioned".to_owned(), |v| v.to_string()),
            );
            Ok(Some(SettingsMigration {
                from,
                to: CURRENT_SCHEMA,
                steps,
                filled,
                backup_path,
            }))
        })
    }

    /// Schema version of the file as written, without defaults applied.
    /// `None` for an absent file or one without `schema_version`.
    pub fn stored_version(&self) -> Result<Option<SchemaVersion>, SettingsError> {
        match self.files.with_lock(&self.path, || self.read_table_unlocked())? {
            Some(table) => version_of(&table),
            None => Ok(None),
        }
    }

    /// Fields the file as written lacks; empty for an absent file.
    pub fn missing_fields(&self) -> Result<Vec<String>, SettingsError> {
        Ok(self
            .files
            .with_lock(&self.path, || self.read_table_unlocked())?
            .map(|table| missing_fields(&table).into_iter().map(str::to_owned).collect())
            .unwrap_or_default())
    }

    pub fn get(&self, key: SettingKey) -> Result<String, SettingsError> {
        let doc = self.load()?;
        Ok(match key {
            SettingKey::ChannelUrl => doc.channel.url,
            SettingKey::DescriptorFormat => doc.descriptor_format,
            SettingKey::DefaultPackages => doc.default_packages().join(","),
            SettingKey::SchemaVersion => doc.schema_version,
        })
    }

    /// Set one value. `default.packages` takes a comma-separated list.
    pub fn set(&self, key: SettingKey, value: &str) -> Result<SettingsDocument, SettingsError> {
        self.update(|doc| {
            match key {
                SettingKey::ChannelUrl => doc.channel.url = value.trim().to_owned(),
                SettingKey::DescriptorFormat => doc.descriptor_format = value.trim().to_owned(),
                SettingKey::DefaultPackages => {
                    doc.default_packages = Some(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|p| !p.is_empty())
                            .map(str::to_owned)
                            .collect(),
                    );
                }
                SettingKey::SchemaVersion => {
                    return Err(SettingsError::ReadOnly(key.as_str().to_owned()))
                }
            }
            Ok(())
        })
    }

    pub fn pin(&self, package: &str, version: &str) -> Result<(), SettingsError> {
        self.update(|doc| {
            doc.pins.insert(package.to_owned(), version.to_owned());
            Ok(())
        })
        .map(drop)
    }

    pub fn unpin(&self, package: &str) -> Result<String, SettingsError> {
        let mut removed = None;
        self.update(|doc| {
            removed = doc.pins.remove(package);
            Ok(())
        })?;
        removed.ok_or_else(|| SettingsError::NotPinned(package.to_owned()))
    }

    pub fn pins(&self) -> Result<BTreeMap<String, String>, SettingsError> {
        Ok(self.load()?.pins)
    }

    /// Overwrite with defaults. This is the recovery path for a file that no
    /// longer parses; the previous content is kept as a backup.
    pub fn reset(&self) -> Result<(SettingsDocument, Option<PathBuf>), SettingsError> {
        self.files.with_lock(&self.path, || {
            let doc = SettingsDocument::default();
            let backup = self.write_unlocked(&doc)?;
            info!("reset settings at {}", self.path.display());
            Ok((doc, backup))
        })
    }
}
