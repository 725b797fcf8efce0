//! Nix toolchain invocation for NSM.
//!
//! This crate is the only place that spawns external processes. It provides
//! the `CommandExecutor` seam (a real `SystemExecutor` with per-command
//! timeouts and a `MockExecutor` for tests), transient-failure retry with
//! jittered exponential backoff, the `NixToolchain` wrapper that turns
//! `nix`/`nix-env`/`nix-channel` output into typed values, and a prerequisite
//! check for the binaries NSM expects on `PATH`.

pub mod command;
pub mod executor;
pub mod mock;
pub mod nix;
pub mod prereq;
pub mod retry;

pub use command::{ToolCommand, DEFAULT_TIMEOUT, LONG_TIMEOUT, PROBE_TIMEOUT};
pub use executor::{CommandExecutor, SystemExecutor};
pub use mock::MockExecutor;
pub use nix::{
    parse_channels, parse_installed, parse_nix_version, parse_package_version, Channel,
    InstalledPackage, NixToolchain,
};
pub use prereq::{check_nix_prereqs, find_on_path, format_missing, MissingPrereq};
pub use retry::{run_with_retry, RetryPolicy};

use std::time::Duration;
use thiserror::Error;

/// Substrings (lowercase) of stderr that indicate a network or
/// availability problem worth retrying.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timed out",
    "could not resolve host",
    "temporary failure in name resolution",
    "network is unreachable",
    "unable to download",
    "http error 5",
    "service unavailable",
    "too many requests",
];

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("'{0}' is not installed or not on PATH")]
    NotInstalled(String),
    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{command}' failed ({status}): {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("'{command}' timed out after {}s", .after.as_secs())]
    Timeout { command: String, after: Duration },
    #[error("unexpected output from '{command}': {reason}")]
    Parse { command: String, reason: String },
    #[error("'{command}' still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        command: String,
        attempts: u32,
        #[source]
        last: Box<ToolchainError>,
    },
}

impl ToolchainError {
    /// Timeouts and network-shaped failures may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ToolchainError::Timeout { .. } => true,
            ToolchainError::Failed { stderr, .. } => {
                let lower = stderr.to_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> ToolchainError {
        ToolchainError::Failed {
            command: "nix-channel --update".to_owned(),
            status: "exit status: 1".to_owned(),
            stderr: stderr.to_owned(),
        }
    }

    #[test]
    fn network_failures_are_transient() {
        assert!(failed("error: unable to download 'https://nixos.org/channels/x': HTTP error 503").is_transient());
        assert!(failed("Could not resolve host: cache.nixos.org").is_transient());
        assert!(ToolchainError::Timeout {
            command: "nix-channel --update".to_owned(),
            after: Duration::from_secs(120),
        }
        .is_transient());
    }

    #[test]
    fn other_failures_are_permanent() {
        assert!(!failed("error: attribute 'nope' missing").is_transient());
        assert!(!ToolchainError::NotInstalled("nix".to_owned()).is_transient());
        assert!(!ToolchainError::Parse {
            command: "nix --version".to_owned(),
            reason: "empty".to_owned(),
        }
        .is_transient());
    }

    #[test]
    fn timeout_display_in_seconds() {
        let e = ToolchainError::Timeout {
            command: "nix --version".to_owned(),
            after: Duration::from_secs(5),
        };
        assert_eq!(e.to_string(), "'nix --version' timed out after 5s");
    }
}
