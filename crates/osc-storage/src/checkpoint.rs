//! Checkpoint persistence for harvested records.
//!
//! A checkpoint is the full record set written as one delimited file with fixed columns.
//! Every save replaces the file atomically and must not shrink it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use osc_core::{EntityId, EntityRecord};
use thiserror::Error;
use tracing::{info, warn};

use crate::tabular::{decode_bytes, parse_rows, write_row, Table};
use crate::write_atomic;

pub const CHECKPOINT_COLUMNS: [&str; 7] = [
    "id",
    "name",
    "email",
    "address",
    "phone",
    "legal_nature",
    "registration_status",
];

const SEPARATOR: char = ',';

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("refusing to shrink checkpoint {path}: {records} records would replace {previous}")]
    Regression {
        path: PathBuf,
        previous: usize,
        records: usize,
    },
    #[error("checkpoint {path} has no id column")]
    MissingIdColumn { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointWrite {
    pub path: PathBuf,
    pub records: usize,
    pub bytes: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedCheckpoint {
    pub records: Vec<EntityRecord>,
    /// Rows dropped because their id could not be parsed.
    pub malformed: usize,
    /// Rows dropped because an earlier row had the same id.
    pub duplicates: usize,
}

#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    last_count: usize,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_count: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records in the most recent checkpoint this store loaded or wrote.
    pub fn last_count(&self) -> usize {
        self.last_count
    }

    /// Loads the existing checkpoint. A missing file is an empty checkpoint.
    pub async fn load(&mut self) -> anyhow::Result<LoadedCheckpoint> {
        if !tokio::fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking checkpoint {}", self.path.display()))?
        {
            info!(path = %self.path.display(), "no checkpoint found, starting fresh");
            return Ok(LoadedCheckpoint::default());
        }

        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading checkpoint {}", self.path.display()))?;
        let text = decode_bytes(&bytes, "utf-8")?;
        let loaded = self.parse(&text)?;

        self.last_count = loaded.records.len();
        if loaded.malformed > 0 || loaded.duplicates > 0 {
            warn!(
                path = %self.path.display(),
                malformed = loaded.malformed,
                duplicates = loaded.duplicates,
                "skipped checkpoint rows"
            );
        }
        info!(
            path = %self.path.display(),
            records = loaded.records.len(),
            "checkpoint loaded"
        );
        Ok(loaded)
    }

    fn parse(&self, text: &str) -> Result<LoadedCheckpoint, CheckpointError> {
        let table = Table::from_rows(parse_rows(text, SEPARATOR));
        if table.headers.is_empty() {
            return Ok(LoadedCheckpoint::default());
        }

        let column = |name: &str| {
            table
                .headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let id_col = column("id").ok_or_else(|| CheckpointError::MissingIdColumn {
            path: self.path.clone(),
        })?;
        let cols: Vec<Option<usize>> = CHECKPOINT_COLUMNS[1..].iter().map(|c| column(c)).collect();

        let mut loaded = LoadedCheckpoint::default();
        let mut seen = HashSet::new();
        for row in &table.rows {
            let Some(id) = row.get(id_col).and_then(|raw| raw.parse::<EntityId>().ok()) else {
                loaded.malformed += 1;
                continue;
            };
            if !seen.insert(id) {
                loaded.duplicates += 1;
                continue;
            }
            let cell = |idx: usize| {
                cols[idx]
                    .and_then(|c| row.get(c))
                    .map(|v| v.trim().to_string())
                    .unwrap_or_default()
            };
            loaded.records.push(EntityRecord {
                name: cell(0),
                email: cell(1),
                address: cell(2),
                phone: cell(3),
                legal_nature: cell(4),
                registration_status: cell(5),
                ..EntityRecord::blank(id)
            });
        }
        Ok(loaded)
    }

    /// Atomically replaces the checkpoint with `records`, which must be at least as many as
    /// the previous checkpoint.
    pub async fn save<'a, I>(&mut self, records: I) -> anyhow::Result<CheckpointWrite>
    where
        I: IntoIterator<Item = &'a EntityRecord>,
    {
        let mut buf = Vec::new();
        let headers: Vec<String> = CHECKPOINT_COLUMNS.iter().map(|c| c.to_string()).collect();
        write_row(&mut buf, &headers, SEPARATOR).context("encoding checkpoint header")?;

        let mut count = 0usize;
        for record in records {
            let row = [
                record.id.to_string(),
                record.name.clone(),
                record.email.clone(),
                record.address.clone(),
                record.phone.clone(),
                record.legal_nature.clone(),
                record.registration_status.clone(),
            ];
            write_row(&mut buf, &row, SEPARATOR).context("encoding checkpoint row")?;
            count += 1;
        }

        if count < self.last_count {
            return Err(CheckpointError::Regression {
                path: self.path.clone(),
                previous: self.last_count,
                records: count,
            }
            .into());
        }

        let written = write_atomic(&self.path, &buf)
            .await
            .with_context(|| format!("saving checkpoint {}", self.path.display()))?;
        self.last_count = count;

        info!(
            path = %written.path.display(),
            records = count,
            bytes = written.byte_size,
            sha256 = %written.content_hash,
            "checkpoint saved"
        );
        Ok(CheckpointWrite {
            path: written.path,
            records: count,
            bytes: written.byte_size,
            sha256: written.content_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(id: u64, name: &str) -> EntityRecord {
        EntityRecord {
            name: name.to_string(),
            address: "Rua XV de Novembro, 100, Centro".to_string(),
            phone: "(41) 3333-4444".to_string(),
            ..EntityRecord::blank(EntityId(id))
        }
    }

    #[tokio::test]
    async fn save_then_load_restores_records() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("osc_details.csv");
        let records = vec![
            record(2, "Instituto \"Boa Vista\""),
            record(10, "Associação de Moradores"),
            EntityRecord::blank(EntityId(11)),
        ];

        let mut store = CheckpointStore::new(&path);
        let write = store.save(&records).await.expect("save");
        assert_eq!(write.records, 3);
        assert_eq!(write.bytes, std::fs::metadata(&path).unwrap().len() as usize);
        assert_eq!(write.sha256.len(), 64);

        let mut reopened = CheckpointStore::new(&path);
        let loaded = reopened.load().await.expect("load");
        assert_eq!(loaded.records, records);
        assert_eq!(loaded.malformed, 0);
        assert_eq!(loaded.duplicates, 0);
        assert_eq!(reopened.last_count(), 3);
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempdir().expect("tempdir");
        let mut store = CheckpointStore::new(dir.path().join("absent.csv"));
        let loaded = store.load().await.expect("load");
        assert!(loaded.records.is_empty());
        assert_eq!(store.last_count(), 0);
    }

    #[tokio::test]
    async fn shrinking_save_is_rejected_and_file_kept() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("osc_details.csv");
        let mut store = CheckpointStore::new(&path);
        store
            .save(&[record(1, "A"), record(2, "B")])
            .await
            .expect("first save");
        let before = std::fs::read(&path).unwrap();

        let err = store.save(&[record(1, "A")]).await.unwrap_err();
        match err.downcast_ref::<CheckpointError>() {
            Some(CheckpointError::Regression { previous, records, .. }) => {
                assert_eq!((*previous, *records), (2, 1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_and_columns_matched_by_name() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("legacy.csv");
        std::fs::write(
            &path,
            "\u{feff}name,id,phone\nCasa A,538421.0,(44) 1234-5678\nBroken,abc,\nCasa B,7,\nCasa A bis,538421,\n",
        )
        .unwrap();

        let mut store = CheckpointStore::new(&path);
        let loaded = store.load().await.expect("load");
        assert_eq!(loaded.malformed, 1);
        assert_eq!(loaded.duplicates, 1);
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(store.last_count(), 2);
        assert_eq!(loaded.records[0].id, EntityId(538421));
        assert_eq!(loaded.records[0].name, "Casa A");
        assert_eq!(loaded.records[0].phone, "(44) 1234-5678");
        assert_eq!(loaded.records[1].email, "");
    }

    #[tokio::test]
    async fn file_without_id_column_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "nome,email\nx,y\n").unwrap();
        let mut store = CheckpointStore::new(&path);
        assert!(store.load().await.is_err());
    }
}
