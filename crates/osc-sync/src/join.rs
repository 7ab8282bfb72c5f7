//! Attaches the upstream municipality name to harvested records.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use osc_core::{EncodingRepair, EntityId, EntityRecord};
use osc_storage::tabular::{parse_rows, write_row, Table};
use osc_storage::{decode_bytes, write_atomic, WrittenFile, CHECKPOINT_COLUMNS};
use tracing::{info, warn};

pub const DEFAULT_MUNICIPALITY_COLUMN: &str = "edmu_nm_municipio";
pub const MUNICIPALITY_NAME_COLUMN: &str = "municipality_name";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinOutcome {
    pub records: Vec<EntityRecord>,
    pub joined: usize,
    /// Records whose id is absent from the upstream table or has no municipality there.
    pub missing: usize,
    /// Municipality names the repair filter changed.
    pub repaired: usize,
}

/// Fills `raw_municipality_name` from the upstream table, matching on id. The first row for
/// an id wins. Names go through the repair filter.
pub fn join_municipalities(
    records: Vec<EntityRecord>,
    upstream: &Table,
    id_column: &str,
    municipality_column: &str,
    repair: &EncodingRepair,
) -> Result<JoinOutcome> {
    let Some(id_col) = upstream.find_column(id_column) else {
        bail!("upstream table has no column containing {id_column:?}");
    };
    let Some(name_col) = upstream.find_column(municipality_column) else {
        bail!("upstream table has no column containing {municipality_column:?}");
    };

    let mut names: HashMap<EntityId, &str> = HashMap::with_capacity(upstream.rows.len());
    for row in &upstream.rows {
        let id = row.get(id_col).and_then(|raw| raw.parse::<EntityId>().ok());
        if let (Some(id), Some(name)) = (id, row.get(name_col)) {
            names.entry(id).or_insert(name.trim());
        }
    }

    let mut outcome = JoinOutcome::default();
    outcome.records.reserve(records.len());
    for mut record in records {
        match names.get(&record.id).filter(|name| !name.is_empty()) {
            Some(name) => {
                let fixed = repair.repair(name);
                if fixed != *name {
                    outcome.repaired += 1;
                }
                record.raw_municipality_name = fixed;
                outcome.joined += 1;
            }
            None => {
                record.raw_municipality_name.clear();
                outcome.missing += 1;
            }
        }
        outcome.records.push(record);
    }

    if outcome.missing > 0 {
        warn!(missing = outcome.missing, "records without an upstream municipality");
    }
    info!(
        joined = outcome.joined,
        repaired = outcome.repaired,
        "municipality join complete"
    );
    Ok(outcome)
}

/// Writes records with the checkpoint columns plus `municipality_name`.
pub async fn write_joined(path: &Path, records: &[EntityRecord]) -> Result<WrittenFile> {
    let mut buf = Vec::new();
    let mut headers: Vec<String> = CHECKPOINT_COLUMNS.iter().map(|c| c.to_string()).collect();
    headers.push(MUNICIPALITY_NAME_COLUMN.to_string());
    write_row(&mut buf, &headers, ',').context("encoding joined header")?;
    for record in records {
        let row = [
            record.id.to_string(),
            record.name.clone(),
            record.email.clone(),
            record.address.clone(),
            record.phone.clone(),
            record.legal_nature.clone(),
            record.registration_status.clone(),
            record.raw_municipality_name.clone(),
        ];
        write_row(&mut buf, &row, ',').context("encoding joined row")?;
    }
    write_atomic(path, &buf)
        .await
        .with_context(|| format!("writing joined records {}", path.display()))
}

/// Reads a file written by [`write_joined`]. Rows without a valid id are skipped.
pub async fn read_joined(path: &Path) -> Result<Vec<EntityRecord>> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading joined records {}", path.display()))?;
    let table = Table::from_rows(parse_rows(&decode_bytes(&bytes, "utf-8")?, ','));
    let column = |name: &str| table.headers.iter().position(|h| h.trim() == name);

    let Some(id_col) = column(CHECKPOINT_COLUMNS[0]) else {
        bail!("{} has no id column", path.display());
    };
    let Some(name_col) = column(MUNICIPALITY_NAME_COLUMN) else {
        bail!("{} has no {MUNICIPALITY_NAME_COLUMN} column", path.display());
    };
    let fields: Vec<Option<usize>> = CHECKPOINT_COLUMNS[1..].iter().map(|c| column(c)).collect();

    let mut records = Vec::with_capacity(table.rows.len());
    let mut skipped = 0usize;
    for row in &table.rows {
        let Some(id) = row.get(id_col).and_then(|raw| raw.parse::<EntityId>().ok()) else {
            skipped += 1;
            continue;
        };
        let cell = |col: Option<usize>| {
            col.and_then(|c| row.get(c))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        records.push(EntityRecord {
            name: cell(fields[0]),
            email: cell(fields[1]),
            address: cell(fields[2]),
            phone: cell(fields[3]),
            legal_nature: cell(fields[4]),
            registration_status: cell(fields[5]),
            raw_municipality_name: cell(Some(name_col)),
            ..EntityRecord::blank(id)
        });
    }
    if skipped > 0 {
        warn!(path = %path.display(), skipped, "joined rows without a valid id");
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn upstream() -> Table {
        Table::from_rows(vec![
            vec!["\u{ef}\u{bb}\u{bf}id_osc".into(), "tx_nome".into(), "edmu_nm_municipio".into()],
            vec!["1".into(), "A".into(), "Curitiba".into()],
            vec!["2".into(), "B".into(), "S\u{c3}\u{a3}o Jos\u{c3}\u{a9} dos Pinhais".into()],
            vec!["2".into(), "B bis".into(), "Londrina".into()],
            vec!["3".into(), "C".into(), "".into()],
        ])
    }

    #[test]
    fn joins_by_id_and_repairs_names() {
        let records = (1..=4).map(|id| EntityRecord::blank(EntityId(id))).collect();
        let outcome = join_municipalities(
            records,
            &upstream(),
            "id_osc",
            DEFAULT_MUNICIPALITY_COLUMN,
            &EncodingRepair::default(),
        )
        .expect("join");

        let names: Vec<_> = outcome
            .records
            .iter()
            .map(|r| r.raw_municipality_name.as_str())
            .collect();
        assert_eq!(names, vec!["Curitiba", "São José dos Pinhais", "", ""]);
        assert_eq!(outcome.joined, 2);
        assert_eq!(outcome.missing, 2);
        assert_eq!(outcome.repaired, 1);
    }

    #[test]
    fn missing_columns_are_errors() {
        let records = vec![EntityRecord::blank(EntityId(1))];
        let repair = EncodingRepair::default();
        assert!(join_municipalities(
            records.clone(),
            &upstream(),
            "cd_osc",
            DEFAULT_MUNICIPALITY_COLUMN,
            &repair
        )
        .is_err());
        assert!(
            join_municipalities(records, &upstream(), "id_osc", "municipio_x", &repair).is_err()
        );
    }

    #[tokio::test]
    async fn joined_file_reads_back() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("joined.csv");
        let mut records = Vec::new();
        for (id, name) in [(1, "Curitiba"), (2, "Curitiba"), (3, "Ponta Grossa, PR"), (4, "")] {
            let mut record = EntityRecord::blank(EntityId(id));
            record.name = format!("Org \"{id}\"");
            record.raw_municipality_name = name.to_string();
            records.push(record);
        }
        write_joined(&path, &records).await.expect("write");

        let read = read_joined(&path).await.expect("read");
        assert_eq!(read, records);
    }
}
