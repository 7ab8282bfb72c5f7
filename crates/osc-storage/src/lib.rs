//! Durable checkpoint storage, tabular inputs and HTTP fetch utilities for the OSC pipeline.

use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub mod checkpoint;
pub mod http;
pub mod ids;
pub mod tabular;

pub use checkpoint::{
    CheckpointError, CheckpointStore, CheckpointWrite, LoadedCheckpoint, CHECKPOINT_COLUMNS,
};
pub use http::{FetchError, HttpClientConfig, HttpFetcher};
pub use ids::{load_entity_ids, IdListing, IdSourceOptions};
pub use tabular::{decode_bytes, parse_rows, read_table, write_row, Table};

pub const CRATE_NAME: &str = "osc-storage";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Result of one atomic file replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub byte_size: usize,
    pub content_hash: String,
}

/// Replaces `path` with `bytes` atomically: the bytes go to a temp file in the same
/// directory, are synced, and the temp file is renamed over the target. Readers see either
/// the old file or the new one, never a partial write.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<WrittenFile> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
    let written = async {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("syncing temp file {}", temp_path.display()))?;
        drop(file);

        fs::rename(&temp_path, path).await.with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        })
    }
    .await;

    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }

    Ok(WrittenFile {
        path: path.to_path_buf(),
        byte_size: bytes.len(),
        content_hash: sha256_hex(bytes),
    })
}
