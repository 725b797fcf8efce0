//! Package-list scanning for `shell.nix` and `flake.nix`.
//!
//! This is not a Nix parser. A package list is the bracketed
//! list following `packages =`, `buildInputs =` or `nativeBuildInputs =`
//! (optionally through `with pkgs;`). Everything outside that list is
//! opaque text and is never touched: every edit here splices bytes inside
//! the list and copies the rest verbatim.

use crate::dialect::Dialect;
use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;
use thiserror::Error;

static LIST_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(packages|buildInputs|nativeBuildInputs)\s*=\s*(?:with\s+[A-Za-z0-9_.']+\s*;\s*)?\[",
    )
    .expect("valid package-list pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("no package list found in {}", .dialect.file_name())]
    MissingSection { dialect: Dialect },
}

/// Byte range strictly between the `[` and `]` of the package list.
///
/// `None` when the file has no recognizable list or the list is never
/// closed. Brackets nested inside the list, `#` comments and string
/// literals are skipped when looking for the closing `]`.
pub fn section_bounds(content: &str, dialect: Dialect) -> Option<Range<usize>> {
    let open = find_opener(content, dialect)?;
    let close = find_closer(content, open)?;
    Some(open + 1..close)
}

fn find_opener(content: &str, dialect: Dialect) -> Option<usize> {
    let found: Vec<(&str, usize)> = LIST_OPENER
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            if is_commented(content, whole.start()) {
                return None;
            }
            Some((caps.get(1)?.as_str(), whole.end() - 1))
        })
        .collect();

    dialect.list_attributes().iter().find_map(|attr| {
        found
            .iter()
            .find(|(name, _)| name == attr)
            .map(|&(_, bracket)| bracket)
    })
}

fn is_commented(content: &str, at: usize) -> bool {
    let line_start = content[..at].rfind('\n').map_or(0, |i| i + 1);
    content[line_start..at].contains('#')
}

fn find_closer(content: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_comment = false;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in content[open + 1..].char_indices() {
        if in_comment {
            in_comment = ch != '\n';
            continue;
        }
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '#' => in_comment = true,
            '"' => in_string = true,
            '[' => depth += 1,
            ']' if depth == 0 => return Some(open + 1 + i),
            ']' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn strip_comment(line: &str) -> &str {
    line.find('#').map_or(line, |i| &line[..i])
}

fn package_token(token: &str) -> &str {
    token.trim_end_matches([',', ';'])
}

fn entry_tokens(line: &str) -> impl Iterator<Item = &str> {
    strip_comment(line)
        .split_whitespace()
        .map(package_token)
        .filter(|t| !t.is_empty())
}

/// Package names listed in the descriptor, in file order.
///
/// A missing or unterminated list yields an empty list: a descriptor that
/// predates package management simply has no packages yet. Duplicates are
/// returned as they appear.
pub fn extract_packages(content: &str, dialect: Dialect) -> Vec<String> {
    let Some(range) = section_bounds(content, dialect) else {
        return Vec::new();
    };
    content[range]
        .lines()
        .flat_map(entry_tokens)
        .map(str::to_owned)
        .collect()
}

/// Exact-token membership test against the package list.
///
/// `go` does not match `golang`.
pub fn contains_package(content: &str, dialect: Dialect, name: &str) -> bool {
    section_bounds(content, dialect).is_some_and(|range| {
        content[range]
            .lines()
            .flat_map(entry_tokens)
            .any(|t| t == name)
    })
}

/// Insert `packages` at the end of the package list.
///
/// Multi-line lists get one line per package, indented like the existing
/// entries, placed immediately before the line holding the closing `]`.
/// Single-line lists (`[ gcc python3 ]`) are extended in place. No
/// deduplication happens here.
pub fn inject_packages<S: AsRef<str>>(
    content: &str,
    dialect: Dialect,
    packages: &[S],
) -> Result<String, DescriptorError> {
    let range = section_bounds(content, dialect).ok_or(DescriptorError::MissingSection { dialect })?;
    if packages.is_empty() {
        return Ok(content.to_owned());
    }

    let (start, end) = (range.start, range.end);
    let inner = &content[range];
    let names = packages.iter().map(AsRef::as_ref);

    let (at, insertion) = if inner.contains('\n') {
        let close_line = content[..end].rfind('\n').map_or(0, |i| i + 1);
        let indent = entry_indent(inner)
            .map_or_else(|| format!("{}  ", leading_ws(&content[close_line..])), str::to_owned);

        if content[close_line..end].trim().is_empty() {
            let block: String = names.map(|n| format!("{indent}{n}\n")).collect();
            (close_line, block)
        } else {
            // `]` shares a line with the last entry.
            let at = start + inner.trim_end().len();
            let block: String = names.map(|n| format!("\n{indent}{n}")).collect();
            (at, block)
        }
    } else {
        let head = inner.trim_end();
        let at = start + head.len();
        let mut inline: String = names.map(|n| format!(" {n}")).collect();
        if head.is_empty() && at == end {
            inline.push(' ');
        }
        (at, inline)
    };

    let mut out = String::with_capacity(content.len() + insertion.len());
    out.push_str(&content[..at]);
    out.push_str(&insertion);
    out.push_str(&content[at..]);
    Ok(out)
}

fn leading_ws(s: &str) -> &str {
    &s[..s.len() - s.trim_start_matches([' ', '\t']).len()]
}

fn entry_indent(inner: &str) -> Option<&str> {
    inner
        .split('\n')
        .skip(1)
        .find(|line| {
            let t = line.trim();
            !t.is_empty() && !t.starts_with('#')
        })
        .map(leading_ws)
}

/// Drop `names` from the package list, returning the rewritten content and
/// how many entries were removed.
///
/// Matching entries are removed token by token, so names sharing a line
/// with other entries or with `[` and `]` leave their neighbours intact.
/// A line inside the list that holds nothing but the removed entries (and
/// perhaps a trailing comment) is dropped whole. The count is the number
/// of entries removed; zero means nothing matched.
pub fn remove_packages<S: AsRef<str>>(
    content: &str,
    dialect: Dialect,
    names: &[S],
) -> (String, usize) {
    let Some(range) = section_bounds(content, dialect) else {
        return (content.to_owned(), 0);
    };
    let wanted: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();
    let inner = &content[range.clone()];

    let segments: Vec<&str> = inner.split('\n').collect();
    let last = segments.len() - 1;
    let mut removed = 0;
    let mut kept: Vec<String> = Vec::with_capacity(segments.len());

    for (i, segment) in segments.iter().enumerate() {
        if i == 0 || i == last {
            let (rewritten, n) = drop_tokens(segment, &wanted);
            removed += n;
            kept.push(rewritten);
        } else {
            let (rewritten, n) = drop_entry_line(segment, &wanted);
            removed += n;
            kept.extend(rewritten);
        }
    }

    if removed == 0 {
        return (content.to_owned(), 0);
    }

    let mut out = String::with_capacity(content.len());
    out.push_str(&content[..range.start]);
    out.push_str(&kept.join("\n"));
    out.push_str(&content[range.end..]);
    (out, removed)
}

/// Remove matching tokens from a line inside the list, keeping its
/// indentation. `None` when no entry is left on the line.
fn drop_entry_line(segment: &str, wanted: &HashSet<&str>) -> (Option<String>, usize) {
    let (rewritten, n) = drop_tokens(segment, wanted);
    if n == 0 {
        return (Some(segment.to_owned()), 0);
    }
    if strip_comment(&rewritten).trim().is_empty() {
        return (None, n);
    }
    let indent = leading_ws(segment);
    (Some(format!("{indent}{}", rewritten.trim_start())), n)
}

/// Remove matching tokens from a partial line, taking each one's preceding
/// whitespace with it. Comments are left alone.
fn drop_tokens(segment: &str, wanted: &HashSet<&str>) -> (String, usize) {
    let code_end = segment.find('#').unwrap_or(segment.len());
    let code = &segment[..code_end];

    let mut out = String::with_capacity(segment.len());
    let mut copied = 0;
    let mut removed = 0;
    for (start, token) in token_spans(code) {
        if wanted.contains(package_token(token)) {
            let ws_start = code[..start].trim_end().len().max(copied);
            out.push_str(&code[copied..ws_start]);
            copied = start + token.len();
            removed += 1;
        }
    }
    out.push_str(&code[copied..]);
    out.push_str(&segment[code_end..]);
    (out, removed)
}

fn token_spans(s: &str) -> Vec<(usize, &str)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, ch) in s.char_indices() {
        match (ch.is_whitespace(), start) {
            (true, Some(st)) => {
                spans.push((st, &s[st..i]));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(st) = start {
        spans.push((st, &s[st..]));
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHELL: &str = "packages = with pkgs; [\n    gcc\n    python3\n];";

    const SHELL_FILE: &str = r#"{ pkgs ? import <nixpkgs> {} }:

pkgs.mkShell {
  name = "demo";

  packages = with pkgs; [
    gcc # the compiler
    python3
    # nodejs
  ];

  shellHook = ''
    echo "hi [there]"
  '';
}
"#;

    const FLAKE_FILE: &str = r#"{
  inputs.nixpkgs.url = "github:nixos/nixpkgs/nixos-unstable";
  outputs = { self, nixpkgs }: {
    devShell.x86_64-linux = nixpkgs.legacyPackages.x86_64-linux.mkShell {
      buildInputs = [ gcc go ];
    };
  };
}
"#;

    fn outside(content: &str, dialect: Dialect) -> (String, String) {
        let r = section_bounds(content, dialect).unwrap();
        (content[..r.start].to_owned(), content[r.end..].to_owned())
    }

    #[test]
    fn extracts_example_list() {
        assert_eq!(extract_packages(SHELL, Dialect::Shell), ["gcc", "python3"]);
    }

    #[test]
    fn extract_skips_comments_and_trailing_comments() {
        assert_eq!(
            extract_packages(SHELL_FILE, Dialect::Shell),
            ["gcc", "python3"]
        );
    }

    #[test]
    fn extract_handles_single_line_flake_list() {
        assert_eq!(extract_packages(FLAKE_FILE, Dialect::Flake), ["gcc", "go"]);
    }

    #[test]
    fn extract_handles_multiple_packages_per_line() {
        let content = "buildInputs = with pkgs; [\n  gcc cmake,\n  ninja;\n];";
        assert_eq!(
            extract_packages(content, Dialect::Flake),
            ["gcc", "cmake", "ninja"]
        );
    }

    #[test]
    fn extract_without_marker_is_empty() {
        assert!(extract_packages("{ pkgs }: pkgs.mkShell {}", Dialect::Shell).is_empty());
        assert!(extract_packages("", Dialect::Flake).is_empty());
    }

    #[test]
    fn extract_unterminated_list_is_empty() {
        assert!(extract_packages("packages = with pkgs; [\n gcc\n", Dialect::Shell).is_empty());
    }

    #[test]
    fn extract_ignores_commented_out_marker() {
        let content = "# packages = with pkgs; [ old ];\npackages = [ new ];";
        assert_eq!(extract_packages(content, Dialect::Shell), ["new"]);
    }

    #[test]
    fn dialect_prefers_its_own_attribute() {
        let content = "buildInputs = [ a ];\npackages = with pkgs; [ b ];";
        assert_eq!(extract_packages(content, Dialect::Shell), ["b"]);
        assert_eq!(extract_packages(content, Dialect::Flake), ["a"]);
    }

    #[test]
    fn flake_accepts_with_and_bare_forms() {
        let with = "buildInputs = with pkgs; [ ripgrep ];";
        let bare = "buildInputs = [ pkgs.ripgrep ];";
        assert_eq!(extract_packages(with, Dialect::Flake), ["ripgrep"]);
        assert_eq!(extract_packages(bare, Dialect::Flake), ["pkgs.ripgrep"]);
    }

    #[test]
    fn nested_brackets_do_not_close_the_list() {
        let content = "packages = with pkgs; [\n  (python3.withPackages (ps: [ ps.numpy ]))\n  gcc\n];";
        let pkgs = extract_packages(content, Dialect::Shell);
        assert_eq!(pkgs.last().map(String::as_str), Some("gcc"));
    }

    #[test]
    fn injects_before_closing_line() {
        let out = inject_packages(SHELL, Dialect::Shell, &["nodejs"]).unwrap();
        assert_eq!(
            out,
            "packages = with pkgs; [\n    gcc\n    python3\n    nodejs\n];"
        );
    }

    #[test]
    fn inject_keeps_indentation_of_entries() {
        let out = inject_packages(SHELL_FILE, Dialect::Shell, &["nodejs", "yarn"]).unwrap();
        assert!(out.contains("    # nodejs\n    nodejs\n    yarn\n  ];"));
        assert_eq!(
            extract_packages(&out, Dialect::Shell),
            ["gcc", "python3", "nodejs", "yarn"]
        );
    }

    #[test]
    fn inject_into_empty_multiline_list_uses_default_indent() {
        let content = "  packages = with pkgs; [\n  ];\n";
        let out = inject_packages(content, Dialect::Shell, &["git"]).unwrap();
        assert_eq!(out, "  packages = with pkgs; [\n    git\n  ];\n");
    }

    #[test]
    fn inject_into_single_line_list() {
        let out = inject_packages(FLAKE_FILE, Dialect::Flake, &["rustc"]).unwrap();
        assert!(out.contains("buildInputs = [ gcc go rustc ];"));
    }

    #[test]
    fn inject_into_empty_brackets() {
        let out = inject_packages("packages = [];", Dialect::Shell, &["git"]).unwrap();
        assert_eq!(out, "packages = [ git ];");
    }

    #[test]
    fn inject_when_closer_shares_last_line() {
        let content = "packages = with pkgs; [\n    gcc\n    python3 ];";
        let out = inject_packages(content, Dialect::Shell, &["nodejs"]).unwrap();
        assert_eq!(out, "packages = with pkgs; [\n    gcc\n    python3\n    nodejs ];");
    }

    #[test]
    fn inject_without_section_is_format_error() {
        let err = inject_packages("{ }", Dialect::Flake, &["git"]).unwrap_err();
        assert_eq!(
            err,
            DescriptorError::MissingSection {
                dialect: Dialect::Flake
            }
        );
        assert!(err.to_string().contains("flake.nix"));
    }

    #[test]
    fn inject_does_not_deduplicate() {
        let out = inject_packages(SHELL, Dialect::Shell, &["gcc"]).unwrap();
        assert_eq!(extract_packages(&out, Dialect::Shell), ["gcc", "python3", "gcc"]);
    }

    #[test]
    fn round_trip_preserves_bytes_outside_section() {
        for (content, dialect) in [
            (SHELL, Dialect::Shell),
            (SHELL_FILE, Dialect::Shell),
            (FLAKE_FILE, Dialect::Flake),
        ] {
            let pkgs = extract_packages(content, dialect);
            let out = inject_packages(content, dialect, &pkgs).unwrap();
            assert_eq!(outside(content, dialect), outside(&out, dialect));
        }
    }

    #[test]
    fn removes_example_package() {
        let (out, n) = remove_packages(SHELL, Dialect::Shell, &["gcc"]);
        assert_eq!(n, 1);
        assert_eq!(out, "packages = with pkgs; [\n    python3\n];");
    }

    #[test]
    fn remove_matches_first_token_exactly() {
        let content = "packages = with pkgs; [\n  golang\n  go # toolchain\n];";
        let (out, n) = remove_packages(content, Dialect::Shell, &["go"]);
        assert_eq!(n, 1);
        assert_eq!(out, "packages = with pkgs; [\n  golang\n];");
    }

    #[test]
    fn remove_keeps_entries_sharing_a_line() {
        let content = "packages = with pkgs; [\n    gcc cmake\n    python3\n];";
        let (out, n) = remove_packages(content, Dialect::Shell, &["gcc"]);
        assert_eq!(n, 1);
        assert_eq!(out, "packages = with pkgs; [\n    cmake\n    python3\n];");

        let (out, n) = remove_packages(content, Dialect::Shell, &["cmake"]);
        assert_eq!(n, 1);
        assert_eq!(out, "packages = with pkgs; [\n    gcc\n    python3\n];");

        let (out, n) = remove_packages(content, Dialect::Shell, &["gcc", "cmake"]);
        assert_eq!(n, 2);
        assert_eq!(out, "packages = with pkgs; [\n    python3\n];");
    }

    #[test]
    fn remove_nothing_matched_returns_input() {
        let (out, n) = remove_packages(SHELL, Dialect::Shell, &["ruby"]);
        assert_eq!(n, 0);
        assert_eq!(out, SHELL);
    }

    #[test]
    fn remove_from_single_line_list() {
        let (out, n) = remove_packages(FLAKE_FILE, Dialect::Flake, &["gcc"]);
        assert_eq!(n, 1);
        assert!(out.contains("buildInputs = [ go ];"));

        let (out, n) = remove_packages(FLAKE_FILE, Dialect::Flake, &["gcc", "go"]);
        assert_eq!(n, 2);
        assert!(out.contains("buildInputs = [ ];"));
    }

    #[test]
    fn remove_preserves_surroundings() {
        let (out, _) = remove_packages(SHELL_FILE, Dialect::Shell, &["python3"]);
        assert_eq!(outside(SHELL_FILE, Dialect::Shell), outside(&out, Dialect::Shell));
        assert_eq!(extract_packages(&out, Dialect::Shell), ["gcc"]);
    }

    #[test]
    fn remove_without_section_is_noop() {
        let (out, n) = remove_packages("{ }", Dialect::Shell, &["gcc"]);
        assert_eq!((out.as_str(), n), ("{ }", 0));
    }

    #[test]
    fn contains_is_exact() {
        let content = "packages = [ golang ];";
        assert!(contains_package(content, Dialect::Shell, "golang"));
        assert!(!contains_package(content, Dialect::Shell, "go"));
    }
}
