//! Codebase digest: SHA-256 over a filtered subset of a source tree.
//!
//! ## Framing
//!
//! For every included file, in order, the hasher is fed:
//!
//! ```text
//! file:<relative/path>\n
//! size:<bytes>\n
//! <raw file bytes>
//! ---FILE_SEPARATOR---\n
//! ```
//!
//! ## Order
//!
//! 1. Each configured root, in configured order; files inside one root are
//!    sorted by the byte order of their relative path (what `LC_ALL=C sort`
//!    produces for the remote script).
//! 2. Root-level files, sorted by name, skipping names equal to a root.
//!
//! Missing roots are skipped. Symlinks, unreadable entries, and names that
//! are not UTF-8 or contain a newline abort the whole computation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use polyglot_core::HashSpec;

use crate::error::{io_err, SyncError};

pub const FILE_SEPARATOR: &str = "---FILE_SEPARATOR---";

/// Computes the digest of the tree rooted at `root` according to `spec`.
#[derive(Debug, Clone)]
pub struct CodebaseHasher {
    root: PathBuf,
    spec: HashSpec,
}

impl CodebaseHasher {
    pub fn new(root: impl Into<PathBuf>, spec: HashSpec) -> Self {
        Self {
            root: root.into(),
            spec,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn spec(&self) -> &HashSpec {
        &self.spec
    }

    /// Hex-encoded SHA-256 of the framed file stream.
    pub fn calculate_hash(&self) -> Result<String, SyncError> {
        let files = self.included_files()?;
        let mut hasher = Sha256::new();
        for rel in &files {
            self.add_file(&mut hasher, rel)?;
        }
        let digest = hex::encode(hasher.finalize());
        tracing::debug!(
            "hashed {} file(s) under {}: {}",
            files.len(),
            self.root.display(),
            digest
        );
        Ok(digest)
    }

    /// Relative paths fed to the digest, in hashing order.
    pub fn included_files(&self) -> Result<Vec<String>, SyncError> {
        let mut ordered = Vec::new();

        for root in &self.spec.roots {
            let dir = self.root.join(root);
            let meta = match fs::symlink_metadata(&dir) {
                Ok(meta) => meta,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(io_err(&dir, err)),
            };
            if meta.file_type().is_symlink() {
                return Err(SyncError::Symlink { path: dir });
            }
            if !meta.is_dir() {
                continue;
            }

            let mut files = Vec::new();
            self.collect(&dir, root, &mut files)?;
            files.sort();
            ordered.extend(files);
        }

        ordered.extend(self.root_files()?);
        Ok(ordered)
    }

    /// Digest equality; digests are compared verbatim.
    pub fn compare_versions(local: &str, remote: &str) -> bool {
        !local.is_empty() && local == remote
    }

    fn collect(&self, dir: &Path, rel_dir: &str, out: &mut Vec<String>) -> Result<(), SyncError> {
        for entry in sorted_entries(dir)? {
            let name = checked_name(&entry.path())?;
            let rel = format!("{rel_dir}/{name}");
            if self.spec.is_excluded(&rel) {
                continue;
            }

            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
            if file_type.is_symlink() {
                return Err(SyncError::Symlink { path });
            }
            if file_type.is_dir() {
                self.collect(&path, &rel, out)?;
            } else if file_type.is_file() && self.spec.has_included_suffix(&rel) {
                out.push(rel);
            }
        }
        Ok(())
    }

    fn root_files(&self) -> Result<Vec<String>, SyncError> {
        let mut files = Vec::new();
        for entry in sorted_entries(&self.root)? {
            let path = entry.path();
            let name = checked_name(&path)?;
            if self.spec.is_excluded(&name) {
                continue;
            }
            let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
            if file_type.is_dir() {
                continue;
            }
            if file_type.is_symlink() {
                return Err(SyncError::Symlink { path });
            }
            if file_type.is_file() && self.spec.has_included_suffix(&name) && !self.spec.is_root(&name)
            {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }

    fn add_file(&self, hasher: &mut Sha256, rel: &str) -> Result<(), SyncError> {
        let path = self.root.join(rel);
        let mut file = fs::File::open(&path).map_err(|e| io_err(&path, e))?;
        let size = file.metadata().map_err(|e| io_err(&path, e))?.len();

        hasher.update(format!("file:{rel}\nsize:{size}\n").as_bytes());
        let copied = io::copy(&mut file, hasher).map_err(|e| io_err(&path, e))?;
        if copied != size {
            return Err(io_err(
                &path,
                io::Error::other(format!("file changed while hashing ({size} → {copied} bytes)")),
            ));
        }
        hasher.update(FILE_SEPARATOR.as_bytes());
        hasher.update(b"\n");
        Ok(())
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<fs::DirEntry>, SyncError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        entries.push(entry.map_err(|e| io_err(dir, e))?);
    }
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

fn checked_name(path: &Path) -> Result<String, SyncError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SyncError::UnsupportedPath {
            path: path.to_path_buf(),
        })?;
    if name.contains('\n') {
        return Err(SyncError::UnsupportedPath {
            path: path.to_path_buf(),
        });
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec() -> HashSpec {
        HashSpec {
            roots: vec!["src".into(), "docs".into()],
            extensions: vec![".rs".into(), ".md".into(), "Makefile".into()],
            excludes: vec!["target".into(), ".git".into()],
        }
    }

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn order_is_roots_then_root_files() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Makefile", "all:\n");
        write(tmp.path(), "docs/guide.md", "# guide\n");
        write(tmp.path(), "src/main.rs", "fn main() {}\n");
        write(tmp.path(), "src/a/b.rs", "\n");
        write(tmp.path(), "src/a.rs", "\n");

        let files = CodebaseHasher::new(tmp.path(), spec()).included_files().unwrap();
        assert_eq!(
            files,
            vec!["src/a.rs", "src/a/b.rs", "src/main.rs", "docs/guide.md", "Makefile"]
        );
    }

    #[test]
    fn excluded_and_unmatched_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "src/lib.rs", "pub fn f() {}\n");
        write(tmp.path(), "src/target/gen.rs", "// generated\n");
        write(tmp.path(), "src/logo.png", "png");

        let files = CodebaseHasher::new(tmp.path(), spec()).included_files().unwrap();
        assert_eq!(files, vec!["src/lib.rs"]);
    }

    #[test]
    fn missing_roots_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let digest = CodebaseHasher::new(tmp.path(), spec()).calculate_hash().unwrap();
        // SHA-256 of the empty stream.
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn root_file_named_like_a_root_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let mut spec = spec();
        spec.roots.push("notes.md".into());
        write(tmp.path(), "notes.md", "root file sharing a root name\n");

        let files = CodebaseHasher::new(tmp.path(), spec).included_files().unwrap();
        assert!(files.is_empty(), "got {files:?}");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_aborts_hashing() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "src/real.rs", "\n");
        std::os::unix::fs::symlink(tmp.path().join("src/real.rs"), tmp.path().join("src/link.rs"))
            .unwrap();

        let err = CodebaseHasher::new(tmp.path(), spec()).calculate_hash().unwrap_err();
        assert!(matches!(err, SyncError::Symlink { .. }), "got {err}");
    }

    #[test]
    fn compare_versions_rejects_empty_digests() {
        assert!(CodebaseHasher::compare_versions("abc", "abc"));
        assert!(!CodebaseHasher::compare_versions("abc", "abd"));
        assert!(!CodebaseHasher::compare_versions("", ""));
    }
}
