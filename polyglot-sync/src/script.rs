//! Remote digest computation.
//!
//! The remote host may not have a matching build of this workspace, so the
//! digest is computed by a POSIX shell script generated from the same
//! [`HashSpec`] the local [`CodebaseHasher`](crate::CodebaseHasher) uses.
//! The script reproduces the framing and ordering exactly and prints the
//! hex digest on stdout. Exit codes: 2 setup failure, 3 symlink found,
//! 4 read failure.

use polyglot_core::HashSpec;

use crate::hasher::FILE_SEPARATOR;
use crate::shell;

/// Always single-quoted, so glob characters in a spec entry stay literal.
fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn alternatives(prefix: &str, items: &[String], suffix: &str) -> String {
    items
        .iter()
        .map(|item| format!("{prefix}{}{suffix}", literal(item)))
        .collect::<Vec<_>>()
        .join("|")
}

/// The script body, meant to run under `sh`.
pub fn remote_digest_script(spec: &HashSpec, remote_dir: &str) -> String {
    let mut s = String::new();
    s.push_str("set -u\n");
    s.push_str(&format!("cd {} || exit 2\n", shell::quote(remote_dir)));
    s.push_str("tmp=$(mktemp -d) || exit 2\n");
    s.push_str("trap 'rm -rf \"$tmp\"' EXIT\n");

    s.push_str("emit() {\n  f=$1\n");
    if !spec.excludes.is_empty() {
        s.push_str(&format!(
            "  case \"$f\" in {}) return 0;; esac\n",
            alternatives("*", &spec.excludes, "*")
        ));
    }
    s.push_str("  if [ -L \"$f\" ]; then echo \"symlink in hashed tree: $f\" >&2; exit 3; fi\n");
    if spec.extensions.is_empty() {
        s.push_str("  return 0\n");
    } else {
        s.push_str(&format!(
            "  case \"$f\" in {}) ;; *) return 0;; esac\n",
            alternatives("*", &spec.extensions, "")
        ));
    }
    s.push_str("  size=$(wc -c < \"$f\") || exit 4\n");
    s.push_str("  size=$(echo $size)\n");
    s.push_str("  printf 'file:%s\\nsize:%s\\n' \"$f\" \"$size\"\n");
    s.push_str("  cat -- \"$f\" || exit 4\n");
    s.push_str(&format!("  printf '%s\\n' {}\n", literal(FILE_SEPARATOR)));
    s.push_str("}\n");

    s.push_str(": > \"$tmp/list\"\n");
    if !spec.roots.is_empty() {
        let roots = spec
            .roots
            .iter()
            .map(|r| literal(r))
            .collect::<Vec<_>>()
            .join(" ");
        s.push_str(&format!("for root in {roots}; do\n"));
        s.push_str("  if [ -L \"$root\" ]; then echo \"symlink in hashed tree: $root\" >&2; exit 3; fi\n");
        s.push_str("  [ -d \"$root\" ] || continue\n");
        s.push_str("  find \"$root\" \\( -type f -o -type l \\) > \"$tmp/found\" || exit 4\n");
        s.push_str("  LC_ALL=C sort \"$tmp/found\" >> \"$tmp/list\" || exit 4\n");
        s.push_str("done\n");
    }
    s.push_str(
        "find . -mindepth 1 -maxdepth 1 \\( -type f -o -type l \\) > \"$tmp/found\" || exit 4\n",
    );
    s.push_str("sed 's|^\\./||' \"$tmp/found\" | LC_ALL=C sort > \"$tmp/rootfiles\" || exit 4\n");

    s.push_str("while IFS= read -r f; do emit \"$f\"; done < \"$tmp/list\" > \"$tmp/stream\"\n");
    s.push_str("while IFS= read -r f; do\n");
    if !spec.roots.is_empty() {
        s.push_str(&format!(
            "  case \"$f\" in {}) continue;; esac\n",
            alternatives("", &spec.roots, "")
        ));
    }
    s.push_str("  emit \"$f\"\n");
    s.push_str("done < \"$tmp/rootfiles\" >> \"$tmp/stream\"\n");

    s.push_str("if command -v sha256sum >/dev/null 2>&1; then\n");
    s.push_str("  sha256sum \"$tmp/stream\" | cut -d' ' -f1\n");
    s.push_str("else\n");
    s.push_str("  shasum -a 256 \"$tmp/stream\" | cut -d' ' -f1\n");
    s.push_str("fi\n");
    s
}

/// Shell loop deleting the root-level files the digest would cover, leaving
/// `keep` and everything else alone. Run in the remote directory before
/// extracting an archive so files deleted locally do not survive a repair.
/// `None` when no root-level file can be hashed.
pub fn clear_root_files_command(spec: &HashSpec, keep: &str) -> Option<String> {
    if spec.extensions.is_empty() {
        return None;
    }
    let mut s = String::from("for f in * .[!.]* ..?*; do [ -f \"$f\" ] || [ -L \"$f\" ] || continue; ");
    s.push_str(&format!("case \"$f\" in {}) continue;; esac; ", literal(keep)));
    if !spec.roots.is_empty() {
        s.push_str(&format!(
            "case \"$f\" in {}) continue;; esac; ",
            alternatives("", &spec.roots, "")
        ));
    }
    if !spec.excludes.is_empty() {
        s.push_str(&format!(
            "case \"$f\" in {}) continue;; esac; ",
            alternatives("*", &spec.excludes, "*")
        ));
    }
    s.push_str(&format!(
        "case \"$f\" in {}) rm -f -- \"$f\" || exit 4;; esac; done",
        alternatives("*", &spec.extensions, "")
    ));
    Some(s)
}

/// One-line command suitable for `ExecuteCommand`: `sh -c '<script>'`.
pub fn remote_digest_command(spec: &HashSpec, remote_dir: &str) -> String {
    format!("sh -c {}", literal(&remote_digest_script(spec, remote_dir)))
}

/// Parse the script's stdout into a digest, rejecting anything that is not
/// 64 lowercase hex characters.
pub fn parse_digest(stdout: &str) -> Option<String> {
    let digest = stdout.trim();
    let valid = digest.len() == 64
        && digest
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    valid.then(|| digest.to_string())
}
