use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two environment-descriptor formats NSM knows how to edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `shell.nix` evaluated by `nix-shell`.
    Shell,
    /// `flake.nix` evaluated by `nix develop`.
    Flake,
}

impl Dialect {
    pub const ALL: [Dialect; 2] = [Dialect::Shell, Dialect::Flake];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Shell => "shell",
            Dialect::Flake => "flake",
        }
    }

    /// Conventional file name in a project directory.
    #[inline]
    pub fn file_name(self) -> &'static str {
        match self {
            Dialect::Shell => "shell.nix",
            Dialect::Flake => "flake.nix",
        }
    }

    /// Attribute names that introduce a package list, most preferred first.
    pub(crate) fn list_attributes(self) -> &'static [&'static str] {
        match self {
            Dialect::Shell => &["packages", "buildInputs", "nativeBuildInputs"],
            Dialect::Flake => &["buildInputs", "packages", "nativeBuildInputs"],
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown descriptor format '{0}', expected 'shell' or 'flake'")]
pub struct UnknownDialect(pub String);

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shell" => Ok(Dialect::Shell),
            "flake" => Ok(Dialect::Flake),
            other => Err(UnknownDialect(other.to_owned())),
        }
    }
}
