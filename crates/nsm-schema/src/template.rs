//! Starter descriptors written by `nsm init` and `nsm convert`.

use crate::descriptor::extract_packages;
use crate::dialect::Dialect;

fn entries<S: AsRef<str>>(packages: &[S], indent: &str) -> String {
    packages
        .iter()
        .map(|p| format!("{indent}{}\n", p.as_ref()))
        .collect()
}

/// `shell.nix` with a `packages = with pkgs; [ ... ];` list.
pub fn shell_template<S: AsRef<str>>(packages: &[S]) -> String {
    format!(
        r#"{{ pkgs ? import <nixpkgs> {{}} }}:

pkgs.mkShell {{
  name = "nsm-managed-shell";

  packages = with pkgs; [
{}  ];

  shellHook = ''
    echo "Welcome to your Nix development environment!"
    echo "Use 'nsm add <package>' to add more packages"
  '';
}}
"#,
        entries(packages, "    ")
    )
}

/// `flake.nix` with a default dev shell tracking `channel`.
pub fn flake_template<S: AsRef<str>>(packages: &[S], channel: &str) -> String {
    format!(
        r#"{{
  description = "NSM managed development environment";

  inputs.nixpkgs.url = "github:nixos/nixpkgs/{channel}";
  inputs.flake-utils.url = "github:numtide/flake-utils";

  outputs = {{ self, nixpkgs, flake-utils }}:
    flake-utils.lib.eachDefaultSystem (system:
      let
        pkgs = nixpkgs.legacyPackages.${{system}};
      in
      {{
        devShells.default = pkgs.mkShell {{
          buildInputs = with pkgs; [
{}          ];
        }};
      }});
}}
"#,
        entries(packages, "            ")
    )
}

pub fn template_for<S: AsRef<str>>(dialect: Dialect, packages: &[S], channel: &str) -> String {
    match dialect {
        Dialect::Shell => shell_template(packages),
        Dialect::Flake => flake_template(packages, channel),
    }
}

/// Build a `flake.nix` carrying over the package list of a `shell.nix`.
///
/// Only the package list survives; a hand-written `shellHook` or extra
/// attributes have no flake equivalent generated here.
pub fn convert_shell_to_flake(shell_content: &str, channel: &str) -> String {
    let packages = extract_packages(shell_content, Dialect::Shell);
    flake_template(&packages, channel)
}
