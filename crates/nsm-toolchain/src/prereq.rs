use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

const NIX_INSTALL_HINT: &str = "sh <(curl -L https://nixos.org/nix/install) --daemon";

const NIX_TOOLS: [(&str, &str); 4] = [
    ("nix", "evaluating descriptors and probing flake support"),
    ("nix-env", "querying package versions"),
    ("nix-store", "store maintenance"),
    ("nix-channel", "listing and updating channels"),
];

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// First executable named `name` in `dirs`.
pub(crate) fn find_in<I, P>(dirs: I, name: &str) -> Option<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    dirs.into_iter()
        .map(|d| d.as_ref().join(name))
        .find(|candidate| is_executable(candidate))
}

/// Resolve `name` against `$PATH`.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    find_in(env::split_paths(&path), name)
}

/// Check that the Nix command-line tools are installed.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_nix_prereqs() -> Vec<MissingPrereq> {
    NIX_TOOLS
        .iter()
        .filter(|(name, _)| find_on_path(name).is_none())
        .map(|&(name, purpose)| MissingPrereq {
            name,
            purpose,
            install_hint: NIX_INSTALL_HINT,
        })
        .collect()
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nNSM drives the Nix package manager; install Nix and reopen your shell.");
    msg
}
