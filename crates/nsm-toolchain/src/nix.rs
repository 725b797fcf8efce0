use crate::command::{ToolCommand, LONG_TIMEOUT, PROBE_TIMEOUT};
use crate::executor::{CommandExecutor, SystemExecutor};
use crate::retry::{run_with_retry, RetryPolicy};
use crate::ToolchainError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A subscribed channel from `nix-channel --list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub url: String,
}

/// One entry of `nix-env -q --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub attr: String,
    pub name: String,
    pub version: Option<String>,
}

impl InstalledPackage {
    /// Whether this entry provides the descriptor package `name`, by
    /// package name or attribute path.
    pub fn provides(&self, name: &str) -> bool {
        self.name == name
            || self.attr == name
            || self
                .attr
                .rsplit_once('.')
                .is_some_and(|(_, last)| last == name)
    }
}

#[derive(Deserialize)]
struct EnvEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    pname: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

fn parse_error(command: &str, reason: impl Into<String>) -> ToolchainError {
    ToolchainError::Parse {
        command: command.to_owned(),
        reason: reason.into(),
    }
}

/// `nix (Nix) 2.18.1` -> `2.18.1`.
pub fn parse_nix_version(output: &str) -> Result<String, ToolchainError> {
    output
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().last())
        .filter(|v| v.starts_with(|c: char| c.is_ascii_digit()))
        .map(str::to_owned)
        .ok_or_else(|| parse_error("nix --version", format!("no version in {output:?}")))
}

/// Lines of `<name> <url>`; blank lines are ignored.
pub fn parse_channels(output: &str) -> Result<Vec<Channel>, ToolchainError> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(name), Some(url)) => Ok(Channel {
                    name: name.to_owned(),
                    url: url.to_owned(),
                }),
                _ => Err(parse_error(
                    "nix-channel --list",
                    format!("malformed line {line:?}"),
                )),
            }
        })
        .collect()
}

fn parse_env_json(command: &str, output: &str) -> Result<BTreeMap<String, EnvEntry>, ToolchainError> {
    if output.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(output).map_err(|e| parse_error(command, e.to_string()))
}

pub fn parse_installed(output: &str) -> Result<Vec<InstalledPackage>, ToolchainError> {
    Ok(parse_env_json("nix-env -q --json", output)?
        .into_iter()
        .map(|(attr, entry)| InstalledPackage {
            name: entry.pname.or(entry.name).unwrap_or_else(|| attr.clone()),
            attr,
            version: entry.version.filter(|v| !v.is_empty()),
        })
        .collect())
}

/// Pick the version of `package` from `nix-env -qa --json <package>`.
///
/// The query may match several attributes; an entry whose `pname` or
/// attribute suffix equals `package` wins over the first match.
pub fn parse_package_version(output: &str, package: &str) -> Result<String, ToolchainError> {
    let command = format!("nix-env -qa --json {package}");
    let entries = parse_env_json(&command, output)?;
    let suffix = format!(".{package}");
    let exact = entries.iter().find(|(attr, e)| {
        e.pname.as_deref() == Some(package) || attr.as_str() == package || attr.ends_with(&suffix)
    });
    exact
        .into_iter()
        .chain(entries.iter())
        .find_map(|(_, e)| e.version.clone().filter(|v| !v.is_empty()))
        .ok_or_else(|| parse_error(&command, format!("no version found for '{package}'")))
}

/// Typed access to the Nix command-line tools through a [`CommandExecutor`].
#[derive(Clone)]
pub struct NixToolchain {
    executor: Arc<dyn CommandExecutor>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for NixToolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NixToolchain")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl NixToolchain {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            retry: RetryPolicy::default(),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemExecutor))
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn run(&self, command: &ToolCommand) -> Result<String, ToolchainError> {
        self.executor.run(command)
    }

    fn run_retried(&self, command: &ToolCommand) -> Result<String, ToolchainError> {
        run_with_retry(&self.retry, &command.to_string(), || self.run(command))
    }

    pub fn version(&self) -> Result<String, ToolchainError> {
        let out = self.run(&ToolCommand::new("nix", ["--version"]).timeout(PROBE_TIMEOUT))?;
        parse_nix_version(&out)
    }

    pub fn flakes_supported(&self) -> bool {
        match self.run(&ToolCommand::new("nix", ["flake", "--version"]).timeout(PROBE_TIMEOUT)) {
            Ok(_) => true,
            Err(e) => {
                debug!("flakes not available: {e}");
                false
            }
        }
    }

    pub fn channels(&self) -> Result<Vec<Channel>, ToolchainError> {
        let out = self.run(&ToolCommand::new("nix-channel", ["--list"]).timeout(PROBE_TIMEOUT))?;
        parse_channels(&out)
    }

    pub fn update_channels(&self) -> Result<(), ToolchainError> {
        self.run_retried(&ToolCommand::new("nix-channel", ["--update"]).timeout(LONG_TIMEOUT))
            .map(drop)
    }

    /// `nix-collect-garbage -d`; returns the tool's summary output.
    pub fn collect_garbage(&self) -> Result<String, ToolchainError> {
        let out = self
            .run_retried(&ToolCommand::new("nix-collect-garbage", ["-d"]).timeout(LONG_TIMEOUT))?;
        Ok(out.trim().to_owned())
    }

    /// Packages in the user's profile.
    pub fn installed_packages(&self) -> Result<Vec<InstalledPackage>, ToolchainError> {
        let out = self.run(&ToolCommand::new("nix-env", ["-q", "--json"]))?;
        parse_installed(&out)
    }

    pub fn package_version(&self, package: &str) -> Result<String, ToolchainError> {
        let out = self.run_retried(&ToolCommand::new("nix-env", ["-qa", "--json", package]))?;
        parse_package_version(&out, package)
    }

    /// `builtins.currentSystem`, e.g. `x86_64-linux`.
    pub fn current_system(&self) -> Result<String, ToolchainError> {
        let out = self.run(
            &ToolCommand::new(
                "nix",
                ["eval", "--impure", "--raw", "--expr", "builtins.currentSystem"],
            )
            .timeout(PROBE_TIMEOUT),
        )?;
        let system = out.trim().trim_matches('"');
        if system.is_empty() {
            return Err(parse_error("nix eval builtins.currentSystem", "empty output"));
        }
        Ok(system.to_owned())
    }

    /// Best-effort summary for `nsm info`; probes that fail are omitted.
    pub fn system_info(&self) -> BTreeMap<String, String> {
        let mut info = BTreeMap::new();
        match self.version() {
            Ok(v) => {
                info.insert("nix_version".to_owned(), v);
            }
            Err(e) => debug!("nix version unavailable: {e}"),
        }
        match self.current_system() {
            Ok(s) => {
                info.insert("system".to_owned(), s);
            }
            Err(e) => debug!("current system unavailable: {e}"),
        }
        info.insert(
            "flakes_enabled".to_owned(),
            self.flakes_supported().to_string(),
        );
        info.insert(
            "in_nix_shell".to_owned(),
            std::env::var_os("IN_NIX_SHELL").is_some().to_string(),
        );
        info
    }
}
