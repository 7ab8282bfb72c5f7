use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use osc_adapters::DirectoryDetailSource;
use osc_core::{BoundaryRecord, EntityId, EntityRecord, MatchKind};
use osc_storage::{CheckpointStore, IdSourceOptions};
use osc_sync::{
    reconcile_counts, run_harvest, run_join, run_reconcile, HarvestConfig, HarvestOptions,
    MunicipalityMatcher, ReconcileConfig, DEFAULT_NAME_PROPERTY, NO_MATCH_STATUS,
};
use tempfile::tempdir;

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures")
        .join("mapaosc")
}

fn harvest_config(root: &Path) -> HarvestConfig {
    HarvestConfig {
        ids_path: root.join("ocs_PR.CSV"),
        ids: IdSourceOptions::default(),
        detail_url_template: "unused/{id}".to_string(),
        checkpoint_path: root.join("osc_details.csv"),
        user_agent: "osc-test".to_string(),
        options: HarvestOptions {
            concurrency: 2,
            ..HarvestOptions::default()
        },
        workspace_root: root.to_path_buf(),
    }
}

fn reconcile_config(root: &Path) -> ReconcileConfig {
    ReconcileConfig {
        boundary_name_property: DEFAULT_NAME_PROPERTY.to_string(),
        match_threshold: 0.6,
        municipality_column: "edmu_nm_municipio".to_string(),
        workspace_root: root.to_path_buf(),
    }
}

#[test]
fn counts_reconcile_against_boundary_spellings() {
    let counts = BTreeMap::from([
        ("Curitiba".to_string(), 120),
        ("Coronel Domingos Soares".to_string(), 36),
    ]);
    let boundaries: Vec<BoundaryRecord> = ["CURITIBA", "CORONEL DOMINGO SOARES"]
        .into_iter()
        .map(|name| BoundaryRecord {
            municipality_name: name.to_string(),
            geometry_id: None,
        })
        .collect();

    let report = reconcile_counts(&counts, &boundaries, &MunicipalityMatcher::default());

    let by_source: BTreeMap<_, _> = report
        .results
        .iter()
        .map(|r| (r.result.source_name.as_str(), &r.result))
        .collect();
    let curitiba = by_source["Curitiba"];
    assert_eq!(curitiba.matched_name.as_deref(), Some("CURITIBA"));
    assert_eq!(curitiba.kind, MatchKind::Exact);
    assert_eq!(curitiba.score, 1.0);

    let coronel = by_source["Coronel Domingos Soares"];
    assert_eq!(coronel.matched_name.as_deref(), Some("CORONEL DOMINGO SOARES"));
    assert_eq!(coronel.kind, MatchKind::TokenOverlap);
    assert!(coronel.score >= 0.6);

    assert_eq!(report.totals_by_boundary["CURITIBA"], 120);
    assert_eq!(report.totals_by_boundary["CORONEL DOMINGO SOARES"], 36);
    assert!(report.unmatched.is_empty());
}

#[tokio::test]
async fn harvest_from_saved_pages_writes_checkpoint_and_report() {
    let dir = tempdir().expect("tempdir");
    let config = harvest_config(dir.path());
    std::fs::write(
        &config.ids_path,
        b"id_osc;tx_nome_osc\n547149;A\n538421;B\n999;C\n;D\n",
    )
    .unwrap();

    let run = run_harvest(&config, Arc::new(DirectoryDetailSource::new(fixtures_dir())))
        .await
        .expect("harvest");

    assert_eq!(run.ids_skipped, 1);
    assert_eq!(run.outcome.requested, 3);
    assert_eq!(run.outcome.fetched, 2);
    assert_eq!(run.outcome.failed, 1);
    assert_eq!(run.outcome.records[0].registration_status, "Ativa");
    assert!(run.outcome.records[2].is_blank());
    assert_eq!(run.outcome.coverage.phone, 2);
    assert!(run.reports_dir.join("harvest.json").exists());
    assert!(run.reports_dir.join("harvest_brief.md").exists());

    let loaded = CheckpointStore::new(&config.checkpoint_path).load().await.expect("reload");
    assert_eq!(loaded.records.len(), 3);
}

#[tokio::test]
async fn join_and_reconcile_from_files() {
    let dir = tempdir().expect("tempdir");
    let harvest = harvest_config(dir.path());
    let reconcile = reconcile_config(dir.path());

    let records: Vec<EntityRecord> = (1..=5)
        .map(|id| {
            let mut record = EntityRecord::blank(EntityId(id));
            record.name = format!("Org {id}");
            record
        })
        .collect();
    CheckpointStore::new(&harvest.checkpoint_path)
        .save(&records)
        .await
        .expect("seed checkpoint");

    // latin1 export: 0xE1 is 'á'
    let mut upstream = b"id_osc;tx_nome_osc;edmu_nm_municipio\n".to_vec();
    upstream.extend_from_slice(b"1;Org 1;Curitiba\n2;Org 2;Curitiba\n3;Org 3;Maring\xe1\n");
    upstream.extend_from_slice(b"4;Org 4;Coronel Domingos Soares\n");
    std::fs::write(&harvest.ids_path, upstream).unwrap();

    let joined_path = dir.path().join("joined.csv");
    let outcome = run_join(
        &harvest.checkpoint_path,
        &harvest.ids_path,
        &joined_path,
        &harvest,
        &reconcile,
    )
    .await
    .expect("join");
    assert_eq!(outcome.joined, 4);
    assert_eq!(outcome.missing, 1);
    assert_eq!(outcome.records[2].raw_municipality_name, "Maringá");

    let boundaries_path = dir.path().join("municipios.geojson");
    std::fs::write(
        &boundaries_path,
        r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"CD_MUN": "4106902", "NM_MUN": "CURITIBA"}},
            {"type": "Feature", "properties": {"CD_MUN": "4115200", "NM_MUN": "MARINGÁ"}},
            {"type": "Feature", "properties": {"CD_MUN": "4106571", "NM_MUN": "CORONEL DOMINGO SOARES"}}
        ]}"#,
    )
    .unwrap();

    let output_path = dir.path().join("reconciled.csv");
    let run = run_reconcile(&joined_path, &boundaries_path, &output_path, &reconcile)
        .await
        .expect("reconcile");
    let report = &run.report;

    assert_eq!(report.matched_count, 4);
    assert_eq!(report.unmatched_count, 0);
    assert_eq!(report.totals_by_boundary["CURITIBA"], 2);
    assert_eq!(report.totals_by_boundary["MARINGÁ"], 1);
    assert_eq!(report.totals_by_boundary["CORONEL DOMINGO SOARES"], 1);
    assert_eq!(run.reports_dir, dir.path().join("reports").join(report.run_id.to_string()));
    assert!(run.reports_dir.join("reconciliation.json").exists());
    assert!(run.reports_dir.join("reconciliation_brief.md").exists());

    // id 5 had no upstream municipality
    assert_eq!(run.flagged, 1);
    let text = std::fs::read_to_string(&output_path).unwrap();
    let mut lines = text.lines();
    let header: Vec<&str> = lines.next().unwrap().split(',').collect();
    let reconciled_col = header.iter().position(|h| *h == "reconciled_municipality").unwrap();
    let status_col = header.iter().position(|h| *h == "match_status").unwrap();
    let boundary_names = ["CURITIBA", "MARINGÁ", "CORONEL DOMINGO SOARES"];
    let mut statuses = Vec::new();
    for line in lines {
        let cells: Vec<&str> = line.split(',').collect();
        let status = cells[status_col];
        if status == NO_MATCH_STATUS {
            assert_eq!(cells[reconciled_col], "");
        } else {
            assert!(boundary_names.contains(&cells[reconciled_col]), "{line}");
        }
        statuses.push(status.to_string());
    }
    assert_eq!(statuses, vec!["exact", "exact", "exact", "token_overlap", NO_MATCH_STATUS]);
}
