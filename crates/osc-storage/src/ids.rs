use std::path::Path;

use anyhow::{bail, Context};
use osc_core::EntityId;
use tracing::{info, warn};

use crate::tabular::read_table;

/// How to read the upstream organization export.
#[derive(Debug, Clone)]
pub struct IdSourceOptions {
    pub encoding: String,
    pub delimiter: char,
    /// Substring that identifies the id column header.
    pub id_column: String,
}

impl Default for IdSourceOptions {
    fn default() -> Self {
        Self {
            encoding: "latin1".to_string(),
            delimiter: ';',
            id_column: "id_osc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdListing {
    /// Ids in file order, duplicates included.
    pub ids: Vec<EntityId>,
    /// Rows without a parseable id.
    pub skipped: usize,
}

/// Reads entity ids from the upstream export. Rows with a missing or non-numeric id are
/// skipped and counted.
pub async fn load_entity_ids(path: &Path, options: &IdSourceOptions) -> anyhow::Result<IdListing> {
    let table = read_table(path, &options.encoding, options.delimiter)
        .await
        .with_context(|| format!("loading entity ids from {}", path.display()))?;

    let Some(col) = table.find_column(&options.id_column) else {
        bail!(
            "no column containing {:?} in {} (headers: {:?})",
            options.id_column,
            path.display(),
            table.headers
        );
    };

    let mut listing = IdListing::default();
    for row in &table.rows {
        match row.get(col).map(|raw| raw.parse::<EntityId>()) {
            Some(Ok(id)) => listing.ids.push(id),
            _ => listing.skipped += 1,
        }
    }

    if listing.skipped > 0 {
        warn!(path = %path.display(), skipped = listing.skipped, "skipped rows without a valid id");
    }
    info!(
        path = %path.display(),
        ids = listing.ids.len(),
        column = %table.headers[col],
        "entity ids loaded"
    );
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reads_latin1_semicolon_export_with_bom_header() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ocs_PR.CSV");
        let mut bytes = b"\xef\xbb\xbfid_osc;tx_nome_osc;edmu_nm_municipio\n".to_vec();
        bytes.extend_from_slice(b"547149;Associa\xe7\xe3o A;Curitiba\n");
        bytes.extend_from_slice(b"538421.0;Instituto B;S\xe3o Jos\xe9 dos Pinhais\n");
        bytes.extend_from_slice(b";sem id;Londrina\n");
        bytes.extend_from_slice(b"abc;texto;Maring\xe1\n");
        bytes.extend_from_slice(b"547149;Associa\xe7\xe3o A;Curitiba\n");
        std::fs::write(&path, bytes).unwrap();

        let listing = load_entity_ids(&path, &IdSourceOptions::default())
            .await
            .expect("load ids");
        assert_eq!(
            listing.ids,
            vec![EntityId(547149), EntityId(538421), EntityId(547149)]
        );
        assert_eq!(listing.skipped, 2);
    }

    #[tokio::test]
    async fn missing_id_column_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ids.csv");
        std::fs::write(&path, "nome;cidade\nA;B\n").unwrap();
        let err = load_entity_ids(&path, &IdSourceOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("id_osc"));
    }

    #[tokio::test]
    async fn short_rows_are_skipped() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ids.csv");
        std::fs::write(&path, "nome,id_osc\nA,1\nB\n").unwrap();
        let options = IdSourceOptions {
            encoding: "utf-8".to_string(),
            delimiter: ',',
            ..IdSourceOptions::default()
        };
        let listing = load_entity_ids(&path, &options).await.expect("load ids");
        assert_eq!(listing.ids, vec![EntityId(1)]);
        assert_eq!(listing.skipped, 1);
    }
}
