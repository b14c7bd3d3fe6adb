//! # polyglot-sync
//!
//! Deterministic codebase digest and the local half of drift repair.
//!
//! [`CodebaseHasher`] computes the digest of a source tree;
//! [`script::remote_digest_command`] produces a shell command that computes
//! the byte-identical digest on a remote host; [`archive::package_tree`]
//! packs the tree for upload when the two disagree.

pub mod archive;
pub mod error;
pub mod hasher;
pub mod script;
pub mod shell;

pub use archive::{package_tree, ArchiveMethod, PackagedTree};
pub use error::SyncError;
pub use hasher::{CodebaseHasher, FILE_SEPARATOR};
