#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use polyglot_core::{EventKind, HashSpec, ProgressEvent};
use polyglot_remote::{
    transfer, CodebaseSync, CommandResult, LocalShell, RemoteError, RemoteShell,
};
use polyglot_sync::CodebaseHasher;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
    fs::write(path, body).expect("write file");
}

fn spec() -> HashSpec {
    HashSpec {
        roots: vec!["src".into(), "docs".into()],
        extensions: vec![".rs".into(), ".toml".into(), ".md".into()],
        excludes: vec!["target".into(), ".git".into()],
    }
}

fn local_tree() -> TempDir {
    let tmp = TempDir::new().expect("local tree");
    write(tmp.path(), "Cargo.toml", "[package]\nname = \"worker\"\n");
    write(tmp.path(), "src/lib.rs", "pub fn translate() {}\n");
    write(tmp.path(), "src/nested/mod.rs", "// nested\n");
    write(tmp.path(), "docs/README.md", "# worker\n");
    write(tmp.path(), "src/target/junk.rs", "// excluded\n");
    tmp
}

/// A worker whose transport is down.
struct UnreachableShell;

#[async_trait]
impl RemoteShell for UnreachableShell {
    fn remote_dir(&self) -> &str {
        "/srv/worker"
    }

    fn label(&self) -> String {
        "unreachable".to_string()
    }

    async fn execute(
        &self,
        _cancel: &CancellationToken,
        _command: &str,
    ) -> Result<CommandResult, RemoteError> {
        Err(RemoteError::Connect {
            host: "worker:22".into(),
            message: "connection refused".into(),
        })
    }
}

#[tokio::test]
async fn chunked_upload_reconstructs_binary_payload() {
    let remote = TempDir::new().expect("remote");
    let shell = LocalShell::new(remote.path());
    let cancel = CancellationToken::new();

    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    let target = remote.path().join("nested/dir/blob.bin");
    let target_str = target.to_str().expect("utf-8 path");

    transfer::upload_data_chunked(&shell, &cancel, &payload, target_str, 256)
        .await
        .expect("upload");
    assert_eq!(fs::read(&target).expect("read back"), payload);

    // A second upload truncates instead of appending to the old content.
    transfer::upload_data_chunked(&shell, &cancel, b"short", target_str, 256)
        .await
        .expect("re-upload");
    assert_eq!(fs::read(&target).expect("read back"), b"short");
}

#[tokio::test]
async fn empty_upload_creates_empty_file() {
    let remote = TempDir::new().expect("remote");
    let shell = LocalShell::new(remote.path());
    let target = remote.path().join("empty.bin");

    transfer::upload_data(
        &shell,
        &CancellationToken::new(),
        &[],
        target.to_str().expect("utf-8 path"),
    )
    .await
    .expect("upload");
    assert_eq!(fs::read(&target).expect("read back").len(), 0);
}

#[tokio::test]
async fn upload_file_and_download_text() {
    let remote = TempDir::new().expect("remote");
    let local = TempDir::new().expect("local");
    let shell = LocalShell::new(remote.path());
    let cancel = CancellationToken::new();

    let source = local.path().join("chapter.md");
    fs::write(&source, "# Chapter 1\n\nIt was a quiet night.\n").expect("write source");
    let remote_path = remote.path().join("jobs/chapter.md");
    let remote_str = remote_path.to_str().expect("utf-8 path");

    transfer::upload_file(&shell, &cancel, &source, remote_str)
        .await
        .expect("upload");
    let copy = local.path().join("copy.md");
    transfer::download_file(&shell, &cancel, remote_str, &copy)
        .await
        .expect("download");
    assert_eq!(
        fs::read_to_string(copy).expect("read copy"),
        "# Chapter 1\n\nIt was a quiet night.\n"
    );
}

#[tokio::test]
async fn download_of_missing_file_fails() {
    let remote = TempDir::new().expect("remote");
    let shell = LocalShell::new(remote.path());
    let err = transfer::download_file(
        &shell,
        &CancellationToken::new(),
        "/nonexistent/polyglot/file.md",
        &remote.path().join("out.md"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, RemoteError::CommandFailed { .. }), "got {err}");
}

#[tokio::test]
async fn verify_reports_local_digest_when_remote_fails() {
    let local = local_tree();
    let sync = CodebaseSync::new(Arc::new(UnreachableShell), local.path(), spec());

    let check = sync
        .verify_codebase_version(&CancellationToken::new())
        .await
        .expect("verify still succeeds");
    let expected = CodebaseHasher::new(local.path(), spec())
        .calculate_hash()
        .expect("local digest");

    assert!(!check.equal);
    assert_eq!(check.local, expected);
    assert!(check.remote.is_empty());
    assert!(check.remote_error.is_some());
}

#[tokio::test]
async fn ensure_parity_repairs_drift_once() {
    let local = local_tree();
    let remote = TempDir::new().expect("remote");
    write(remote.path(), "src/stale.rs", "// deleted locally\n");

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let sync = CodebaseSync::new(
        Arc::new(LocalShell::new(remote.path())),
        local.path(),
        spec(),
    )
    .with_build_command("true")
    .with_events(Arc::new(tx), Some("session-7".into()));

    let check = sync
        .ensure_parity(&CancellationToken::new())
        .await
        .expect("parity");
    assert!(check.equal);
    assert_eq!(check.local, check.remote);
    assert!(!remote.path().join("src/stale.rs").exists());
    assert!(remote.path().join("src/nested/mod.rs").exists());
    assert!(!remote.path().join("codebase.tar.gz").exists());

    let first = rx.recv().await.expect("drift event");
    assert_eq!(first.kind, EventKind::DriftDetected);
    assert_eq!(first.session_id.as_deref(), Some("session-7"));
    let second = rx.recv().await.expect("repair event");
    assert_eq!(second.kind, EventKind::DriftRepaired);
}

#[tokio::test]
async fn ensure_parity_skips_repair_when_equal() {
    let local = local_tree();
    let remote = local_tree();
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let sync = CodebaseSync::new(
        Arc::new(LocalShell::new(remote.path())),
        local.path(),
        spec(),
    )
    .with_build_command("exit 1")
    .with_events(Arc::new(tx), None);

    let check = sync
        .ensure_parity(&CancellationToken::new())
        .await
        .expect("parity");
    assert!(check.equal);
    assert_eq!(rx.recv().await.expect("event").kind, EventKind::ParityVerified);
}

#[tokio::test]
async fn drift_that_survives_repair_is_fatal() {
    let local = local_tree();
    let remote = TempDir::new().expect("remote");
    let sync = CodebaseSync::new(
        Arc::new(LocalShell::new(remote.path())),
        local.path(),
        spec(),
    )
    // The "build" leaves an extra hashed file behind.
    .with_build_command("echo '// generated' > src/generated.rs");

    let err = sync
        .ensure_parity(&CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        RemoteError::DriftUnrepairable { local, remote } => {
            assert!(!local.is_empty());
            assert!(!remote.is_empty());
            assert_ne!(local, remote);
        }
        other => panic!("expected DriftUnrepairable, got {other}"),
    }
}

#[tokio::test]
async fn failed_build_aborts_repair() {
    let local = local_tree();
    let remote = TempDir::new().expect("remote");
    let sync = CodebaseSync::new(
        Arc::new(LocalShell::new(remote.path())),
        local.path(),
        spec(),
    )
    .with_build_command("exit 9");

    let err = sync
        .ensure_parity(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, RemoteError::CommandFailed { exit_code: 9, .. }),
        "got {err}"
    );
}

fn git(root: &Path, args: &[&str]) -> bool {
    std::process::Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["-c", "user.name=polyglot", "-c", "user.email=polyglot@localhost"])
        .args(args)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn repair_ships_gitignored_hashed_files() {
    let local = TempDir::new().expect("local tree");
    if !git(local.path(), &["init", "-q"]) {
        return;
    }
    write(local.path(), "src/lib.rs", "pub fn translate() {}\n");
    write(local.path(), ".gitignore", "docs/local.md\n");
    assert!(git(local.path(), &["add", "."]));
    assert!(git(local.path(), &["commit", "-q", "-m", "init"]));
    write(local.path(), "docs/local.md", "# kept out of git\n");

    let remote = TempDir::new().expect("remote");
    let sync = CodebaseSync::new(
        Arc::new(LocalShell::new(remote.path())),
        local.path(),
        spec(),
    );

    let check = sync
        .ensure_parity(&CancellationToken::new())
        .await
        .expect("parity");
    assert!(check.equal);
    assert_eq!(
        fs::read_to_string(remote.path().join("docs/local.md")).expect("ignored file shipped"),
        "# kept out of git\n"
    );
}

#[tokio::test]
async fn repair_removes_stale_root_level_files() {
    let local = TempDir::new().expect("local tree");
    write(local.path(), "src/lib.rs", "pub fn translate() {}\n");

    let remote = TempDir::new().expect("remote");
    write(remote.path(), "CHANGELOG.md", "# deleted locally\n");
    write(remote.path(), "notes.bin", "not hashed");

    let spec = HashSpec {
        roots: vec!["src".into()],
        extensions: vec![".rs".into(), ".md".into()],
        excludes: vec![],
    };
    let sync = CodebaseSync::new(
        Arc::new(LocalShell::new(remote.path())),
        local.path(),
        spec,
    );

    let check = sync
        .ensure_parity(&CancellationToken::new())
        .await
        .expect("parity");
    assert!(check.equal);
    assert!(!remote.path().join("CHANGELOG.md").exists());
    assert!(remote.path().join("notes.bin").exists());
    assert!(remote.path().join("src/lib.rs").exists());
}
