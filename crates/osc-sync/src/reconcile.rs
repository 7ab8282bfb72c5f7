//! Reconciliation of per-municipality counts against boundary names, and its reports.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use osc_core::{BoundaryRecord, EntityRecord, MatchKind, MatchResult};
use osc_storage::{write_atomic, write_row, WrittenFile, CHECKPOINT_COLUMNS};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::join::MUNICIPALITY_NAME_COLUMN;
use crate::matcher::{CandidateSet, MunicipalityMatcher, Suggestion};

pub const RECONCILED_MUNICIPALITY_COLUMN: &str = "reconciled_municipality";
pub const MATCH_STATUS_COLUMN: &str = "match_status";
pub const NO_MATCH_STATUS: &str = "no match";

#[derive(Debug, Clone, Serialize)]
pub struct ReconciledCount {
    #[serde(flatten)]
    pub result: MatchResult,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnmatchedName {
    pub source_name: String,
    pub count: u64,
    pub best_score: f64,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub threshold: f64,
    pub boundary_names: usize,
    pub results: Vec<ReconciledCount>,
    /// Summed counts per matched boundary name.
    pub totals_by_boundary: BTreeMap<String, u64>,
    pub unmatched: Vec<UnmatchedName>,
    pub matched_count: u64,
    pub unmatched_count: u64,
}

/// Organizations per municipality name, ignoring blank names.
pub fn count_by_municipality<'a>(
    records: impl IntoIterator<Item = &'a EntityRecord>,
) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for record in records {
        let name = record.raw_municipality_name.trim();
        if !name.is_empty() {
            *counts.entry(name.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

/// Matches every counted name against the boundary names and aggregates counts per boundary.
pub fn reconcile_counts(
    counts: &BTreeMap<String, u64>,
    boundaries: &[BoundaryRecord],
    matcher: &MunicipalityMatcher,
) -> ReconciliationReport {
    let candidates = CandidateSet::new(boundaries.iter().map(|b| b.municipality_name.clone()));

    let mut results = Vec::with_capacity(counts.len());
    let mut totals_by_boundary: BTreeMap<String, u64> = BTreeMap::new();
    let mut unmatched = Vec::new();
    let (mut matched_count, mut unmatched_count) = (0u64, 0u64);

    for (name, &count) in counts {
        let result = matcher.match_name(name, &candidates);
        match &result.matched_name {
            Some(boundary) => {
                *totals_by_boundary.entry(boundary.clone()).or_insert(0) += count;
                matched_count += count;
            }
            None => {
                unmatched_count += count;
                unmatched.push(UnmatchedName {
                    source_name: name.clone(),
                    count,
                    best_score: result.score,
                    suggestions: matcher.suggestions(name, &candidates),
                });
            }
        }
        results.push(ReconciledCount { result, count });
    }

    if !unmatched.is_empty() {
        warn!(
            unmatched = unmatched.len(),
            organizations = unmatched_count,
            "municipality names without a boundary match"
        );
    }
    info!(
        names = counts.len(),
        boundaries = candidates.len(),
        matched_organizations = matched_count,
        "reconciliation complete"
    );

    ReconciliationReport {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        threshold: matcher.threshold(),
        boundary_names: candidates.len(),
        results,
        totals_by_boundary,
        unmatched,
        matched_count,
        unmatched_count,
    }
}

/// One record with the boundary name its municipality reconciled to.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledRecord {
    pub record: EntityRecord,
    /// A boundary name verbatim, or `None` when the record is flagged as no match.
    pub reconciled_municipality: Option<String>,
    pub kind: MatchKind,
    pub via_override: bool,
}

impl ReconciledRecord {
    pub fn match_status(&self) -> &'static str {
        match self.kind {
            _ if self.reconciled_municipality.is_none() => NO_MATCH_STATUS,
            _ if self.via_override => "override",
            MatchKind::Exact => "exact",
            MatchKind::Containment => "containment",
            MatchKind::TokenOverlap => "token_overlap",
            MatchKind::None => NO_MATCH_STATUS,
        }
    }
}

/// Assigns every record the boundary name its municipality matched in `report`. Records with
/// a blank or unreported municipality are flagged as no match.
pub fn apply_reconciliation(
    records: Vec<EntityRecord>,
    report: &ReconciliationReport,
) -> Vec<ReconciledRecord> {
    let by_source: HashMap<&str, &MatchResult> = report
        .results
        .iter()
        .map(|r| (r.result.source_name.as_str(), &r.result))
        .collect();

    records
        .into_iter()
        .map(|record| {
            let result = by_source.get(record.raw_municipality_name.trim()).copied();
            ReconciledRecord {
                reconciled_municipality: result.and_then(|r| r.matched_name.clone()),
                kind: result.map_or(MatchKind::None, |r| r.kind),
                via_override: result.is_some_and(|r| r.via_override),
                record,
            }
        })
        .collect()
}

/// Writes the joined columns plus the reconciled boundary name and the match status.
pub async fn write_reconciled(path: &Path, records: &[ReconciledRecord]) -> Result<WrittenFile> {
    let mut headers: Vec<String> = CHECKPOINT_COLUMNS.iter().map(|c| c.to_string()).collect();
    headers.extend(
        [MUNICIPALITY_NAME_COLUMN, RECONCILED_MUNICIPALITY_COLUMN, MATCH_STATUS_COLUMN]
            .map(String::from),
    );
    let mut buf = Vec::new();
    write_row(&mut buf, &headers, ',').context("encoding reconciled header")?;
    for reconciled in records {
        let record = &reconciled.record;
        let row = [
            record.id.to_string(),
            record.name.clone(),
            record.email.clone(),
            record.address.clone(),
            record.phone.clone(),
            record.legal_nature.clone(),
            record.registration_status.clone(),
            record.raw_municipality_name.clone(),
            reconciled.reconciled_municipality.clone().unwrap_or_default(),
            reconciled.match_status().to_string(),
        ];
        write_row(&mut buf, &row, ',').context("encoding reconciled row")?;
    }
    write_atomic(path, &buf)
        .await
        .with_context(|| format!("writing reconciled records {}", path.display()))
}

/// Markdown summary for reviewers.
pub fn render_brief(report: &ReconciliationReport) -> String {
    let mut lines = vec![
        "# Municipality Reconciliation".to_string(),
        String::new(),
        format!("- Run ID: `{}`", report.run_id),
        format!("- Generated: {}", report.generated_at),
        format!("- Threshold: {:.2}", report.threshold),
        format!("- Boundary names: {}", report.boundary_names),
        format!("- Source names: {}", report.results.len()),
        format!("- Organizations matched: {}", report.matched_count),
        format!("- Organizations unmatched: {}", report.unmatched_count),
        String::new(),
        "## Non-exact matches".to_string(),
    ];
    let approximate: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.result.is_match() && (r.result.score < 1.0 || r.result.via_override))
        .collect();
    if approximate.is_empty() {
        lines.push("- none".to_string());
    }
    for r in approximate {
        lines.push(format!(
            "- {} -> {} ({:?}, {:.2}{})",
            r.result.source_name,
            r.result.matched_name.as_deref().unwrap_or_default(),
            r.result.kind,
            r.result.score,
            if r.result.via_override { ", override" } else { "" }
        ));
    }

    lines.push(String::new());
    lines.push("## Unmatched".to_string());
    if report.unmatched.is_empty() {
        lines.push("- none".to_string());
    }
    for u in &report.unmatched {
        let hint = if u.suggestions.is_empty() {
            String::new()
        } else {
            format!(
                "; may correspond to: {}",
                u.suggestions
                    .iter()
                    .map(|s| format!("{} ({:.2})", s.name, s.similarity))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };
        lines.push(format!(
            "- {} ({} organizations, best score {:.2}){hint}",
            u.source_name, u.count, u.best_score
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Writes `reports/<run_id>/reconciliation.json` and `reconciliation_brief.md`.
pub async fn write_reconciliation_report(
    workspace_root: &Path,
    report: &ReconciliationReport,
) -> Result<PathBuf> {
    let reports_dir = workspace_root.join("reports").join(report.run_id.to_string());

    let json = serde_json::to_vec_pretty(report).context("serializing reconciliation report")?;
    write_atomic(&reports_dir.join("reconciliation.json"), &json)
        .await
        .context("writing reconciliation.json")?;
    write_atomic(&reports_dir.join("reconciliation_brief.md"), render_brief(report).as_bytes())
        .await
        .context("writing reconciliation_brief.md")?;

    info!(reports_dir = %reports_dir.display(), "reconciliation report written");
    Ok(reports_dir)
}
