//! Harvest orchestration, municipality join and boundary reconciliation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use osc_adapters::{CatalogDetailSource, DetailParser, DetailSource};
use osc_storage::{load_entity_ids, read_table, CheckpointStore, HttpFetcher};
use tracing::info;

pub mod boundaries;
pub mod config;
pub mod harvest;
pub mod join;
pub mod matcher;
pub mod reconcile;
pub mod rules;

pub use boundaries::{load_boundaries, parse_boundaries, DEFAULT_NAME_PROPERTY};
pub use config::{HarvestConfig, ReconcileConfig};
pub use harvest::{
    write_harvest_report, FieldCoverage, HarvestOptions, HarvestOutcome, Harvester,
};
pub use join::{join_municipalities, read_joined, write_joined, JoinOutcome};
pub use matcher::{
    default_overrides, similarity, CandidateSet, MunicipalityMatcher, NameOverride, Suggestion,
    DEFAULT_MATCH_THRESHOLD,
};
pub use reconcile::{
    apply_reconciliation, count_by_municipality, reconcile_counts, render_brief,
    write_reconciled, write_reconciliation_report, ReconciledCount, ReconciledRecord,
    ReconciliationReport, UnmatchedName, NO_MATCH_STATUS,
};
pub use rules::RuleSet;

pub const CRATE_NAME: &str = "osc-sync";

#[derive(Debug, Clone)]
pub struct HarvestRun {
    pub outcome: HarvestOutcome,
    /// Rows of the id file without a usable id.
    pub ids_skipped: usize,
    pub checkpoint_path: PathBuf,
    pub reports_dir: PathBuf,
}

/// Loads the id list, harvests it from `source` into the configured checkpoint and writes
/// the run report.
pub async fn run_harvest(
    config: &HarvestConfig,
    source: Arc<dyn DetailSource>,
) -> Result<HarvestRun> {
    let listing = load_entity_ids(&config.ids_path, &config.ids).await?;
    let rules = RuleSet::from_workspace_root(&config.workspace_root)?;
    let parser = DetailParser::new().context("building detail parser")?;

    let harvester = Harvester::new(
        source,
        Arc::new(parser),
        Arc::new(rules.encoding_repair()),
        config.options.clone(),
    );
    let mut store = CheckpointStore::new(&config.checkpoint_path);
    let outcome = harvester.run(&listing.ids, &mut store).await?;
    let reports_dir = write_harvest_report(&config.workspace_root, &outcome).await?;

    Ok(HarvestRun {
        outcome,
        ids_skipped: listing.skipped,
        checkpoint_path: config.checkpoint_path.clone(),
        reports_dir,
    })
}

/// Harvests the live catalog with settings from the environment.
pub async fn run_harvest_from_env() -> Result<HarvestRun> {
    let config = HarvestConfig::from_env();
    let http = HttpFetcher::new(config.http_client_config())?;
    let source = CatalogDetailSource::new(http, config.detail_url_template.clone())?;
    run_harvest(&config, Arc::new(source)).await
}

/// Joins the checkpointed records with the upstream export and writes the joined file.
pub async fn run_join(
    checkpoint_path: &Path,
    upstream_path: &Path,
    output_path: &Path,
    harvest: &HarvestConfig,
    reconcile: &ReconcileConfig,
) -> Result<JoinOutcome> {
    let loaded = CheckpointStore::new(checkpoint_path).load().await?;
    let upstream = read_table(upstream_path, &harvest.ids.encoding, harvest.ids.delimiter).await?;
    let rules = RuleSet::from_workspace_root(&reconcile.workspace_root)?;

    let outcome = join_municipalities(
        loaded.records,
        &upstream,
        &harvest.ids.id_column,
        &reconcile.municipality_column,
        &rules.encoding_repair(),
    )?;
    let written = write_joined(output_path, &outcome.records).await?;
    info!(
        path = %written.path.display(),
        bytes = written.byte_size,
        sha256 = %written.content_hash,
        "joined records written"
    );
    Ok(outcome)
}

#[derive(Debug, Clone)]
pub struct ReconcileRun {
    pub report: ReconciliationReport,
    pub reports_dir: PathBuf,
    pub output_path: PathBuf,
    /// Records flagged as no match in the output.
    pub flagged: usize,
}

/// Reconciles the municipalities of a joined file against the boundary names, writes every
/// record with its reconciled boundary name to `output_path` and writes the report.
pub async fn run_reconcile(
    joined_path: &Path,
    boundaries_path: &Path,
    output_path: &Path,
    config: &ReconcileConfig,
) -> Result<ReconcileRun> {
    let records = read_joined(joined_path).await?;
    let boundaries = load_boundaries(boundaries_path, &config.boundary_name_property).await?;
    let rules = RuleSet::from_workspace_root(&config.workspace_root)?;

    let matcher = MunicipalityMatcher::new(rules.overrides, config.match_threshold);
    let report = reconcile_counts(&count_by_municipality(&records), &boundaries, &matcher);

    let reconciled = apply_reconciliation(records, &report);
    let flagged = reconciled
        .iter()
        .filter(|r| r.reconciled_municipality.is_none())
        .count();
    let written = write_reconciled(output_path, &reconciled).await?;
    info!(
        path = %written.path.display(),
        records = reconciled.len(),
        flagged,
        "reconciled records written"
    );

    let reports_dir = write_reconciliation_report(&config.workspace_root, &report).await?;
    Ok(ReconcileRun {
        report,
        reports_dir,
        output_path: written.path,
        flagged,
    })
}
