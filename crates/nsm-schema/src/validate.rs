use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MAX_PACKAGE_NAME_LEN: usize = 128;
pub const MAX_VERSION_LEN: usize = 64;

/// Accepted prefixes for a channel reference (`nixos-unstable`, `nixpkgs-24.05`, ...).
pub const CHANNEL_PREFIXES: [&str; 2] = ["nixos-", "nixpkgs-"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("must not be empty")]
    Empty,
    #[error("must be at most {max} characters")]
    TooLong { max: usize },
    #[error("contains invalid character {0:?}")]
    InvalidChar(char),
    #[error("must start with a letter or digit")]
    BadStart,
    #[error("must start with 'nixos-' or 'nixpkgs-'")]
    BadChannelPrefix,
    #[error("must be three dot-separated non-negative integers")]
    NotSemver,
}

fn check_chars(s: &str, max: usize, extra: &[char]) -> Result<(), NameError> {
    if s.is_empty() {
        return Err(NameError::Empty);
    }
    if s.chars().count() > max {
        return Err(NameError::TooLong { max });
    }
    match s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || extra.contains(c)))
    {
        Some(bad) => Err(NameError::InvalidChar(bad)),
        None => Ok(()),
    }
}

/// Package attribute names: `[A-Za-z0-9._-]{1,128}`.
pub fn validate_package_name(name: &str) -> Result<(), NameError> {
    check_chars(name, MAX_PACKAGE_NAME_LEN, &['-', '_', '.'])
}

/// Pinned version strings such as `2.12.1`, `1.0rc2` or `unstable-2024-01-01`.
pub fn validate_version(version: &str) -> Result<(), NameError> {
    check_chars(version, MAX_VERSION_LEN, &['-', '_', '.', '+'])?;
    if version.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(NameError::BadStart)
    }
}

pub fn validate_channel(channel: &str) -> Result<(), NameError> {
    if channel.is_empty() {
        return Err(NameError::Empty);
    }
    let rest = CHANNEL_PREFIXES
        .iter()
        .find_map(|p| channel.strip_prefix(p))
        .ok_or(NameError::BadChannelPrefix)?;
    check_chars(rest, MAX_PACKAGE_NAME_LEN, &['-', '_', '.'])
}

/// `major.minor.patch`, ordered numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SchemaVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for SchemaVersion {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = || -> Result<u64, NameError> {
            let part = parts.next().ok_or(NameError::NotSemver)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(NameError::NotSemver);
            }
            part.parse().map_err(|_| NameError::NotSemver)
        };
        let version = SchemaVersion::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(NameError::NotSemver);
        }
        Ok(version)
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = NameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SchemaVersion> for String {
    fn from(v: SchemaVersion) -> Self {
        v.to_string()
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_names() {
        assert!(validate_package_name("python3").is_ok());
        assert!(validate_package_name("nodePackages.typescript").is_ok());
        assert!(validate_package_name("gcc_12-wrapper").is_ok());
        assert_eq!(validate_package_name(""), Err(NameError::Empty));
        assert_eq!(
            validate_package_name("rm -rf"),
            Err(NameError::InvalidChar(' '))
        );
        assert_eq!(
            validate_package_name(&"a".repeat(129)),
            Err(NameError::TooLong { max: 128 })
        );
        assert!(validate_package_name(&"a".repeat(128)).is_ok());
    }

    #[test]
    fn versions() {
        assert!(validate_version("2.12.1").is_ok());
        assert!(validate_version("1.0rc2").is_ok());
        assert!(validate_version("unstable-2024-01-01").is_ok());
        assert!(validate_version("1.2.3+build4").is_ok());
        assert_eq!(validate_version("-1"), Err(NameError::BadStart));
        assert_eq!(validate_version("1 2"), Err(NameError::InvalidChar(' ')));
        assert_eq!(validate_version(""), Err(NameError::Empty));
    }

    #[test]
    fn channels() {
        assert!(validate_channel("nixos-unstable").is_ok());
        assert!(validate_channel("nixpkgs-24.05").is_ok());
        assert_eq!(validate_channel(""), Err(NameError::Empty));
        assert_eq!(validate_channel("unstable"), Err(NameError::BadChannelPrefix));
        assert_eq!(validate_channel("nixos-"), Err(NameError::Empty));
        assert_eq!(
            validate_channel("nixos-un stable"),
            Err(NameError::InvalidChar(' '))
        );
    }

    #[test]
    fn schema_version_parsing() {
        assert_eq!(
            "1.10.0".parse::<SchemaVersion>().unwrap(),
            SchemaVersion::new(1, 10, 0)
        );
        for bad in ["", "1", "1.0", "1.0.0.0", "v1.0.0", "1.-1.0", "1..0", "a.b.c"] {
            assert!(bad.parse::<SchemaVersion>().is_err(), "{bad} must be rejected");
        }
    }

    #[test]
    fn schema_versions_order_numerically() {
        let a: SchemaVersion = "1.9.0".parse().unwrap();
        let b: SchemaVersion = "1.10.0".parse().unwrap();
        assert!(a < b);
        assert_eq!(b.to_string(), "1.10.0");
    }

    #[test]
    fn schema_version_serde_as_string() {
        let v = SchemaVersion::new(1, 1, 0);
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"1.1.0\"");
        let back: SchemaVersion = serde_json::from_str("\"1.1.0\"").unwrap();
        assert_eq!(back, v);
        assert!(serde_json::from_str::<SchemaVersion>("\"1.1\"").is_err());
    }
}
