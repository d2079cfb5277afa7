use std::{
    collections::HashSet,
    io,
    path::{Path, PathBuf},
};

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::paths::{PathError, local_path_for};
use super::traverse::RemoteEntry;

const CONTENT_HASH_BLOCK: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("download integrity check failed for {path}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// One file written during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedFile {
    pub file_name: String,
    pub file_path: String,
    pub size_bytes: u64,
}

/// Writes downloaded bytes below a local root.
pub struct Mirror {
    root: PathBuf,
    written: HashSet<PathBuf>,
}

impl Mirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            written: HashSet::new(),
        }
    }

    pub async fn materialize(
        &mut self,
        entry: &RemoteEntry,
        bytes: &[u8],
    ) -> Result<DownloadedFile, MirrorError> {
        let target = local_path_for(&self.root, &entry.relative_path)?;
        self.write(target, &entry.name, bytes, entry.content_hash.as_deref())
            .await
    }

    pub async fn materialize_single(
        &mut self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<DownloadedFile, MirrorError> {
        let target = local_path_for(&self.root, file_name)?;
        self.write(target, file_name, bytes, None).await
    }

    async fn write(
        &mut self,
        target: PathBuf,
        file_name: &str,
        bytes: &[u8],
        expected_hash: Option<&str>,
    ) -> Result<DownloadedFile, MirrorError> {
        if let Some(expected) = expected_hash {
            let actual = content_hash(bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(MirrorError::IntegrityMismatch {
                    path: target,
                    expected: expected.to_ascii_lowercase(),
                    actual,
                });
            }
        }

        if !self.written.insert(target.clone()) {
            tracing::warn!(
                path = %target.display(),
                "local path already written in this run, overwriting"
            );
        }

        let partial = partial_path(&target);
        if let Err(source) = write_atomically(&target, &partial, bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(MirrorError::Io {
                path: target,
                source,
            });
        }

        tracing::debug!(path = %target.display(), size = bytes.len(), "file saved");
        Ok(DownloadedFile {
            file_name: file_name.to_string(),
            file_path: target.to_string_lossy().into_owned(),
            size_bytes: bytes.len() as u64,
        })
    }
}

async fn write_atomically(target: &Path, partial: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(partial).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(partial, target).await
}

/// Dropbox content hash: SHA-256 over the concatenated SHA-256 digests of
/// each 4 MiB block.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut overall = Sha256::new();
    for block in bytes.chunks(CONTENT_HASH_BLOCK) {
        overall.update(Sha256::digest(block));
    }
    format!("{:x}", overall.finalize())
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
