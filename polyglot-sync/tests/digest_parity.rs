#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::Command;

use polyglot_core::HashSpec;
use polyglot_sync::{script, CodebaseHasher};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write(root: &Path, rel: &str, body: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
    fs::write(path, body).expect("write file");
}

fn sample_tree() -> TempDir {
    let tmp = TempDir::new().expect("tempdir");
    let root = tmp.path();
    write(root, "Cargo.toml", b"[workspace]\nmembers = [\"crates/a\"]\n");
    write(root, "Makefile", b"all:\n\tcargo build\n");
    write(root, "README.md", b"# readme\n");
    write(root, "crates/a/Cargo.toml", b"[package]\nname = \"a\"\n");
    write(root, "crates/a/src/lib.rs", b"pub fn a() -> u8 { 1 }\n");
    write(root, "crates/a/src/Z.rs", b"// upper-case sorts first\n");
    write(root, "crates/a/target/debug/out.rs", b"// build output\n");
    write(root, "src/main.rs", b"fn main() {}\n");
    write(root, "src/with space.rs", b"// spaces in names\n");
    write(root, "scripts/deploy.sh", b"#!/bin/sh\necho deploy\n");
    write(root, "docs/notes.txt", b"no trailing newline");
    write(root, "docs/image.png", b"\x89PNG");
    write(root, "server.log", b"excluded\n");
    write(root, ".env", b"SECRET=1\n");
    tmp
}

fn remote_digest(root: &Path, spec: &HashSpec) -> String {
    let dir = root.to_str().expect("utf-8 temp path");
    let output = Command::new("sh")
        .arg("-c")
        .arg(script::remote_digest_script(spec, dir))
        .output()
        .expect("run digest script");
    assert!(
        output.status.success(),
        "script failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    script::parse_digest(&String::from_utf8_lossy(&output.stdout)).expect("digest on stdout")
}

#[test]
fn shell_script_matches_local_digest() {
    init_logging();
    let tree = sample_tree();
    let spec = HashSpec::default();

    let local = CodebaseHasher::new(tree.path(), spec.clone())
        .calculate_hash()
        .expect("local digest");
    let remote = remote_digest(tree.path(), &spec);
    assert_eq!(local, remote);
}

#[test]
fn root_file_named_like_an_option_is_hashed() {
    init_logging();
    let tree = sample_tree();
    write(tree.path(), "-notes.md", b"leading dash\n");
    let spec = HashSpec::default();

    let local = CodebaseHasher::new(tree.path(), spec.clone())
        .calculate_hash()
        .expect("local digest");
    assert_eq!(local, remote_digest(tree.path(), &spec));

    fs::remove_file(tree.path().join("-notes.md")).expect("remove");
    let without = CodebaseHasher::new(tree.path(), spec)
        .calculate_hash()
        .expect("local digest");
    assert_ne!(local, without);
}

#[test]
fn wrapped_command_matches_plain_script() {
    let tree = sample_tree();
    let spec = HashSpec::default();
    let dir = tree.path().to_str().expect("utf-8 temp path");

    let output = Command::new("sh")
        .arg("-c")
        .arg(script::remote_digest_command(&spec, dir))
        .output()
        .expect("run wrapped command");
    assert!(output.status.success());
    let wrapped = script::parse_digest(&String::from_utf8_lossy(&output.stdout)).expect("digest");
    assert_eq!(wrapped, remote_digest(tree.path(), &spec));
}

#[test]
fn unchanged_tree_keeps_its_digest() {
    let tree = sample_tree();
    let hasher = CodebaseHasher::new(tree.path(), HashSpec::default());
    assert_eq!(
        hasher.calculate_hash().expect("first"),
        hasher.calculate_hash().expect("second")
    );
}

#[test]
fn editing_an_included_file_changes_the_digest() {
    let tree = sample_tree();
    let hasher = CodebaseHasher::new(tree.path(), HashSpec::default());
    let before = hasher.calculate_hash().expect("before");

    write(tree.path(), "src/main.rs", b"fn main() { println!(\"hi\"); }\n");
    let after = hasher.calculate_hash().expect("after");
    assert_ne!(before, after);
    assert_eq!(after, remote_digest(tree.path(), hasher.spec()));
}

#[test]
fn editing_an_excluded_file_keeps_the_digest() {
    let tree = sample_tree();
    let hasher = CodebaseHasher::new(tree.path(), HashSpec::default());
    let before = hasher.calculate_hash().expect("before");

    write(tree.path(), "crates/a/target/debug/out.rs", b"// rebuilt\n");
    write(tree.path(), "server.log", b"more log lines\n");
    write(tree.path(), "docs/image.png", b"different pixels");
    assert_eq!(before, hasher.calculate_hash().expect("after"));
}

#[test]
fn script_fails_closed_on_symlinks() {
    let tree = sample_tree();
    std::os::unix::fs::symlink(
        tree.path().join("src/main.rs"),
        tree.path().join("src/alias.rs"),
    )
    .expect("symlink");

    let dir = tree.path().to_str().expect("utf-8 temp path");
    let status = Command::new("sh")
        .arg("-c")
        .arg(script::remote_digest_script(&HashSpec::default(), dir))
        .output()
        .expect("run digest script")
        .status;
    assert_eq!(status.code(), Some(3));
    assert!(CodebaseHasher::new(tree.path(), HashSpec::default())
        .calculate_hash()
        .is_err());
}

#[test]
fn missing_directory_exits_with_setup_failure() {
    let tree = TempDir::new().expect("tempdir");
    let missing = tree.path().join("nope");
    let output = Command::new("sh")
        .arg("-c")
        .arg(script::remote_digest_script(
            &HashSpec::default(),
            missing.to_str().expect("utf-8"),
        ))
        .output()
        .expect("run digest script");
    assert_eq!(output.status.code(), Some(2));
}
