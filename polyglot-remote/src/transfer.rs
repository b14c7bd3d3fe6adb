//! Binary-safe file transfer over a text command channel.
//!
//! Uploads are base64-encoded and written through `base64 -d`; the encoded
//! text is split into chunks so no single command line grows unbounded.
//! The first chunk truncates the destination, later chunks append. A failed
//! chunk aborts the upload and leaves a partial remote file behind.
//!
//! Downloads are `cat` of the remote file and therefore text-only.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio_util::sync::CancellationToken;

use polyglot_sync::shell::quote;

use crate::error::{io_err, RemoteError};
use crate::shell::RemoteShell;

/// Encoded bytes per upload command.
pub const CHUNK_SIZE: usize = 50_000;

/// Split the base64 form of `data` into pieces that each decode on their
/// own. `chunk_size` is rounded down to a multiple of four.
pub fn encode_chunks(data: &[u8], chunk_size: usize) -> Vec<String> {
    let size = (chunk_size / 4).max(1) * 4;
    let encoded = STANDARD.encode(data);
    encoded
        .as_bytes()
        .chunks(size)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}

pub async fn upload_data<S: RemoteShell + ?Sized>(
    shell: &S,
    cancel: &CancellationToken,
    data: &[u8],
    remote_path: &str,
) -> Result<(), RemoteError> {
    upload_data_chunked(shell, cancel, data, remote_path, CHUNK_SIZE).await
}

pub async fn upload_data_chunked<S: RemoteShell + ?Sized>(
    shell: &S,
    cancel: &CancellationToken,
    data: &[u8],
    remote_path: &str,
    chunk_size: usize,
) -> Result<(), RemoteError> {
    let target = quote(remote_path);
    if let Some((parent, _)) = remote_path.rsplit_once('/') {
        if !parent.is_empty() {
            shell
                .execute_checked(cancel, &format!("mkdir -p {}", quote(parent)))
                .await?;
        }
    }

    let chunks = encode_chunks(data, chunk_size);
    if chunks.is_empty() {
        shell
            .execute_checked(cancel, &format!(": > {target}"))
            .await?;
        return Ok(());
    }

    let total = chunks.len();
    for (index, chunk) in chunks.iter().enumerate() {
        let redirect = if index == 0 { ">" } else { ">>" };
        let command = format!("printf '%s' {} | base64 -d {redirect} {target}", quote(chunk));
        let result = shell.execute(cancel, &command).await?;
        if !result.success() {
            let message = result
                .error
                .clone()
                .unwrap_or_else(|| format!("exit {}: {}", result.exit_code, result.stderr.trim()));
            return Err(RemoteError::ChunkFailed {
                path: remote_path.to_string(),
                chunk: index + 1,
                total,
                message,
            });
        }
        tracing::debug!(chunk = index + 1, total, path = remote_path, "chunk uploaded");
    }

    tracing::info!(
        shell = %shell.label(),
        path = remote_path,
        bytes = data.len(),
        chunks = total,
        "upload complete"
    );
    Ok(())
}

pub async fn upload_file<S: RemoteShell + ?Sized>(
    shell: &S,
    cancel: &CancellationToken,
    local_path: &Path,
    remote_path: &str,
) -> Result<(), RemoteError> {
    let data = tokio::fs::read(local_path)
        .await
        .map_err(|e| io_err(local_path, e))?;
    upload_data(shell, cancel, &data, remote_path).await
}

/// Copy a remote text file to `local_path` via `cat`.
pub async fn download_file<S: RemoteShell + ?Sized>(
    shell: &S,
    cancel: &CancellationToken,
    remote_path: &str,
    local_path: &Path,
) -> Result<(), RemoteError> {
    let result = shell
        .execute_checked(cancel, &format!("cat {}", quote(remote_path)))
        .await?;
    tokio::fs::write(local_path, result.stdout.as_bytes())
        .await
        .map_err(|e| io_err(local_path, e))?;
    Ok(())
}
