//! Packaging a source tree for upload to a drifted worker.
//!
//! The archive always carries every file the digest covers. A clean git
//! worktree whose index tracks all of those files is packed with
//! `git archive HEAD`; otherwise `tar` packs exactly the hasher's file list,
//! so gitignored files under a hashed root still make the trip.
//! The archive lives in a private temp directory that is removed when the
//! [`PackagedTree`] is dropped, whether the upload succeeded or not.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use polyglot_core::HashSpec;

use crate::error::{io_err, SyncError};
use crate::hasher::CodebaseHasher;

pub const ARCHIVE_NAME: &str = "codebase.tar.gz";
const MEMBER_LIST: &str = "members.lst";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMethod {
    GitArchive,
    Tar,
}

impl ArchiveMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveMethod::GitArchive => "git archive",
            ArchiveMethod::Tar => "tar",
        }
    }
}

/// A gzipped tarball on local disk; deleted on drop.
#[derive(Debug)]
pub struct PackagedTree {
    _dir: TempDir,
    path: PathBuf,
    method: ArchiveMethod,
}

impl PackagedTree {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn method(&self) -> ArchiveMethod {
        self.method
    }

    pub fn read(&self) -> Result<Vec<u8>, SyncError> {
        fs::read(&self.path).map_err(|e| io_err(&self.path, e))
    }
}

/// Pack `root` into a fresh tarball.
pub fn package_tree(root: &Path, spec: &HashSpec) -> Result<PackagedTree, SyncError> {
    let files = CodebaseHasher::new(root, spec.clone()).included_files()?;
    if files.is_empty() {
        return Err(SyncError::EmptyTree {
            root: root.to_path_buf(),
        });
    }

    let dir = tempfile::Builder::new()
        .prefix("polyglot-archive-")
        .tempdir()
        .map_err(|e| io_err(std::env::temp_dir(), e))?;
    let path = dir.path().join(ARCHIVE_NAME);

    let method = if is_clean_git_tree(root) && git_tracks_all(root, &files) {
        let out = path.to_string_lossy().into_owned();
        run(
            Command::new("git")
                .arg("-C")
                .arg(root)
                .args(["archive", "--format=tar.gz", "-o", &out, "HEAD"]),
            "git archive",
        )?;
        ArchiveMethod::GitArchive
    } else {
        let list = dir.path().join(MEMBER_LIST);
        fs::write(&list, member_list(&files)).map_err(|e| io_err(&list, e))?;
        run(
            Command::new("tar")
                .current_dir(root)
                .arg("-czf")
                .arg(&path)
                .arg("--null")
                .arg("-T")
                .arg(&list),
            "tar -czf",
        )?;
        ArchiveMethod::Tar
    };

    tracing::info!(
        "packaged {} file(s) from {} via {} into {}",
        files.len(),
        root.display(),
        method.as_str(),
        path.display()
    );
    Ok(PackagedTree {
        _dir: dir,
        path,
        method,
    })
}

/// `.git` present and `git status --porcelain` prints nothing.
///
/// Ignored files never show up here; [`git_tracks_all`] covers them.
fn is_clean_git_tree(root: &Path) -> bool {
    if !root.join(".git").exists() {
        return false;
    }
    match Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["status", "--porcelain"])
        .output()
    {
        Ok(output) => output.status.success() && output.stdout.iter().all(u8::is_ascii_whitespace),
        Err(err) => {
            tracing::debug!("git status unavailable: {err}");
            false
        }
    }
}

/// Every hashed file is in the git index, so `git archive HEAD` of a clean
/// tree reproduces them all.
fn git_tracks_all(root: &Path, files: &[String]) -> bool {
    let output = match Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["ls-files", "-z"])
        .output()
    {
        Ok(output) if output.status.success() => output,
        Ok(_) => return false,
        Err(err) => {
            tracing::debug!("git ls-files unavailable: {err}");
            return false;
        }
    };
    let tracked: HashSet<&[u8]> = output
        .stdout
        .split(|b| *b == 0)
        .filter(|p| !p.is_empty())
        .collect();
    let missing = files
        .iter()
        .filter(|f| !tracked.contains(f.as_bytes()))
        .count();
    if missing > 0 {
        tracing::debug!("{missing} hashed file(s) not tracked by git, packing with tar");
    }
    missing == 0
}

/// NUL-separated `./`-prefixed names for `tar --null -T`; the prefix keeps
/// names such as `-notes.md` from reading as options.
fn member_list(files: &[String]) -> Vec<u8> {
    let mut list = Vec::new();
    for file in files {
        list.extend_from_slice(b"./");
        list.extend_from_slice(file.as_bytes());
        list.push(0);
    }
    list
}

fn run(cmd: &mut Command, label: &str) -> Result<(), SyncError> {
    let output = cmd.output().map_err(|e| io_err(label, e))?;
    if output.status.success() {
        return Ok(());
    }
    Err(SyncError::Archive {
        command: label.to_string(),
        message: format!(
            "status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> HashSpec {
        HashSpec {
            roots: vec!["src".into(), "docs".into()],
            extensions: vec![".rs".into(), ".toml".into(), ".md".into()],
            excludes: vec!["target".into(), ".git".into()],
        }
    }

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn git(root: &Path, args: &[&str]) -> bool {
        Command::new("git")
            .arg("-C")
            .arg(root)
            .args(["-c", "user.name=polyglot", "-c", "user.email=polyglot@localhost"])
            .args(args)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn archive_listing(packaged: &PackagedTree) -> Vec<String> {
        let out = Command::new("tar")
            .arg("-tzf")
            .arg(packaged.path())
            .output()
            .unwrap();
        assert!(out.status.success());
        let mut names: Vec<String> = String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(|l| l.trim_start_matches("./").to_string())
            .filter(|l| !l.ends_with('/'))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn member_list_prefixes_and_separates() {
        let list = member_list(&["src/lib.rs".into(), "-notes.md".into()]);
        assert_eq!(list, b"./src/lib.rs\0./-notes.md\0".to_vec());
    }

    #[test]
    fn plain_directory_is_not_a_clean_git_tree() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_clean_git_tree(tmp.path()));
    }

    #[test]
    fn empty_tree_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = package_tree(tmp.path(), &spec()).unwrap_err();
        assert!(matches!(err, SyncError::EmptyTree { .. }), "got {err}");
    }

    #[cfg(unix)]
    #[test]
    fn tar_packs_exactly_the_hashed_files() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "src/lib.rs", "pub fn f() {}\n");
        write(tmp.path(), "src/target/gen.rs", "// excluded\n");
        write(tmp.path(), "src/logo.png", "png");
        write(tmp.path(), "Cargo.toml", "[package]\n");
        write(tmp.path(), "-notes.md", "dash\n");
        write(tmp.path(), "notes.bin", "x");

        let packaged = package_tree(tmp.path(), &spec()).unwrap();
        assert_eq!(packaged.method(), ArchiveMethod::Tar);
        assert_eq!(
            archive_listing(&packaged),
            vec!["-notes.md", "Cargo.toml", "src/lib.rs"]
        );

        let path = packaged.path().to_path_buf();
        drop(packaged);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn ignored_hashed_file_forces_tar() {
        let tmp = tempfile::tempdir().unwrap();
        if !git(tmp.path(), &["init", "-q"]) {
            return;
        }
        write(tmp.path(), "src/lib.rs", "pub fn f() {}\n");
        write(tmp.path(), ".gitignore", "docs/local.md\n");
        assert!(git(tmp.path(), &["add", "."]));
        assert!(git(tmp.path(), &["commit", "-q", "-m", "init"]));

        let packaged = package_tree(tmp.path(), &spec()).unwrap();
        assert_eq!(packaged.method(), ArchiveMethod::GitArchive);

        write(tmp.path(), "docs/local.md", "# not in git\n");
        assert!(is_clean_git_tree(tmp.path()));
        let packaged = package_tree(tmp.path(), &spec()).unwrap();
        assert_eq!(packaged.method(), ArchiveMethod::Tar);
        assert_eq!(archive_listing(&packaged), vec!["docs/local.md", "src/lib.rs"]);
    }
}
