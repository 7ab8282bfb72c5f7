//! Resumable, bounded-concurrency harvest of organization detail pages.
//!
//! A fixed pool of worker tasks drains a shared id queue. Each worker fetches one page under a
//! timeout, parses it and repairs its text on the blocking pool, then sends the record to a
//! single coordinator over a channel. The coordinator owns the record set and the checkpoint
//! ticker. Any failure for an id becomes a blank record for that id, so a run over N ids
//! always ends with N records.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use osc_adapters::{AdapterError, DetailParser, DetailSource};
use osc_core::{EncodingRepair, EntityId, EntityRecord};
use osc_storage::{write_atomic, CheckpointStore};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    pub checkpoint_interval: Duration,
    pub progress_every: usize,
    /// Re-fetch ids whose checkpointed record is blank instead of treating them as done.
    pub retry_blank_records: bool,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            concurrency: 15,
            fetch_timeout: Duration::from_secs(30),
            checkpoint_interval: Duration::from_secs(60),
            progress_every: 100,
            retry_blank_records: false,
        }
    }
}

/// How many records carry each field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldCoverage {
    pub name: usize,
    pub email: usize,
    pub phone: usize,
    pub address: usize,
    pub legal_nature: usize,
    pub registration_status: usize,
    pub blank: usize,
}

impl FieldCoverage {
    pub fn of<'a>(records: impl IntoIterator<Item = &'a EntityRecord>) -> Self {
        let mut coverage = Self::default();
        for record in records {
            coverage.name += usize::from(!record.name.is_empty());
            coverage.email += usize::from(!record.email.is_empty());
            coverage.phone += usize::from(!record.phone.is_empty());
            coverage.address += usize::from(!record.address.is_empty());
            coverage.legal_nature += usize::from(!record.legal_nature.is_empty());
            coverage.registration_status += usize::from(!record.registration_status.is_empty());
            coverage.blank += usize::from(record.is_blank());
        }
        coverage
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestOutcome {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Distinct requested ids.
    pub requested: usize,
    /// Requested ids already present in the checkpoint and not fetched again.
    pub resumed: usize,
    pub fetched: usize,
    pub failed: usize,
    pub checkpoints_written: usize,
    pub coverage: FieldCoverage,
    /// One record per requested id, in requested order.
    #[serde(skip)]
    pub records: Vec<EntityRecord>,
}

enum WorkerResult {
    Parsed(EntityRecord),
    Failed(EntityId),
}

pub struct Harvester {
    source: Arc<dyn DetailSource>,
    parser: Arc<DetailParser>,
    repair: Arc<EncodingRepair>,
    options: HarvestOptions,
}

impl Harvester {
    pub fn new(
        source: Arc<dyn DetailSource>,
        parser: Arc<DetailParser>,
        repair: Arc<EncodingRepair>,
        options: HarvestOptions,
    ) -> Self {
        Self {
            source,
            parser,
            repair,
            options,
        }
    }

    /// Harvests `requested` ids, resuming from and checkpointing into `store`.
    pub async fn run(
        &self,
        requested: &[EntityId],
        store: &mut CheckpointStore,
    ) -> Result<HarvestOutcome> {
        let run_id = Uuid::new_v4();
        let span = info_span!("harvest", %run_id, source = self.source.source_id());
        self.run_inner(run_id, requested, store).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        requested: &[EntityId],
        store: &mut CheckpointStore,
    ) -> Result<HarvestOutcome> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut seen = HashSet::with_capacity(requested.len());
        let requested: Vec<EntityId> = requested
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        let loaded = store.load().await?;
        let mut accumulated: BTreeMap<EntityId, EntityRecord> = BTreeMap::new();
        for record in loaded.records {
            accumulated.entry(record.id).or_insert(record);
        }

        let remaining: Vec<EntityId> = requested
            .iter()
            .copied()
            .filter(|id| match accumulated.get(id) {
                None => true,
                Some(record) => self.options.retry_blank_records && record.is_blank(),
            })
            .collect();
        let resumed = requested.len() - remaining.len();
        info!(
            requested = requested.len(),
            resumed,
            remaining = remaining.len(),
            concurrency = self.options.concurrency,
            "harvest starting"
        );

        let total = remaining.len();
        let queue = Arc::new(Mutex::new(remaining.iter().copied().collect::<VecDeque<_>>()));
        let width = self.options.concurrency.max(1).min(total);
        let (tx, mut rx) = mpsc::channel::<WorkerResult>(width.max(1) * 2);

        let mut workers = JoinSet::new();
        for worker in 0..width {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let source = Arc::clone(&self.source);
            let parser = Arc::clone(&self.parser);
            let repair = Arc::clone(&self.repair);
            let timeout = self.options.fetch_timeout;
            workers.spawn(
                async move {
                    loop {
                        // the lock is released before the fetch starts
                        let next = queue.lock().await.pop_front();
                        let Some(id) = next else { break };
                        let result = harvest_one(
                            source.as_ref(),
                            Arc::clone(&parser),
                            Arc::clone(&repair),
                            id,
                            timeout,
                        )
                        .await;
                        if tx.send(result).await.is_err() {
                            break;
                        }
                    }
                }
                .instrument(info_span!("harvest_worker", worker)),
            );
        }
        drop(tx);

        let period = self.options.checkpoint_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut received: HashSet<EntityId> = HashSet::with_capacity(total);
        let mut fetched = 0usize;
        let mut failed = 0usize;
        let mut checkpoints_written = 0usize;
        let progress_every = self.options.progress_every.max(1);

        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(message) = message else { break };
                    let record = match message {
                        WorkerResult::Parsed(record) => {
                            fetched += 1;
                            record
                        }
                        WorkerResult::Failed(id) => {
                            failed += 1;
                            EntityRecord::blank(id)
                        }
                    };
                    received.insert(record.id);
                    accumulated.insert(record.id, record);

                    let completed = fetched + failed;
                    if completed % progress_every == 0 || completed == total {
                        log_progress(completed, total, clock.elapsed());
                    }
                }
                _ = ticker.tick() => {
                    store.save(accumulated.values()).await?;
                    checkpoints_written += 1;
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!(%err, "harvest worker stopped unexpectedly");
            }
        }

        // ids a dead worker never reported still get their one record
        for id in &remaining {
            if !received.contains(id) {
                warn!(%id, "no result received, recording blank");
                failed += 1;
                accumulated.insert(*id, EntityRecord::blank(*id));
            }
        }

        store.save(accumulated.values()).await?;
        checkpoints_written += 1;

        let records: Vec<EntityRecord> = requested
            .iter()
            .map(|id| {
                accumulated
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| EntityRecord::blank(*id))
            })
            .collect();
        let coverage = FieldCoverage::of(&records);
        let finished_at = Utc::now();

        info!(
            requested = requested.len(),
            resumed,
            fetched,
            failed,
            checkpoints_written,
            with_phone = coverage.phone,
            with_registration_status = coverage.registration_status,
            elapsed_secs = clock.elapsed().as_secs_f64(),
            "harvest finished"
        );

        Ok(HarvestOutcome {
            run_id,
            started_at,
            finished_at,
            requested: requested.len(),
            resumed,
            fetched,
            failed,
            checkpoints_written,
            coverage,
            records,
        })
    }
}

async fn harvest_one(
    source: &dyn DetailSource,
    parser: Arc<DetailParser>,
    repair: Arc<EncodingRepair>,
    id: EntityId,
    timeout: Duration,
) -> WorkerResult {
    let html = match tokio::time::timeout(timeout, source.fetch_detail(id)).await {
        Ok(Ok(html)) => html,
        Ok(Err(err)) => {
            let timed_out = matches!(&err, AdapterError::Fetch(fetch) if fetch.is_timeout());
            warn!(%id, url = %source.detail_url(id), timed_out, %err, "fetch failed");
            return WorkerResult::Failed(id);
        }
        Err(_) => {
            warn!(
                %id,
                url = %source.detail_url(id),
                timeout_secs = timeout.as_secs_f64(),
                "fetch timed out"
            );
            return WorkerResult::Failed(id);
        }
    };

    // html parsing is CPU-bound
    let parsed = tokio::task::spawn_blocking(move || {
        let mut record = parser.parse(id, &html);
        let repaired = record.repair_text(&repair);
        (record, repaired)
    })
    .await;
    match parsed {
        Ok((record, repaired)) => {
            if repaired > 0 {
                debug!(%id, repaired, "repaired text fields");
            }
            WorkerResult::Parsed(record)
        }
        Err(err) => {
            warn!(%id, %err, "parse task failed");
            WorkerResult::Failed(id)
        }
    }
}

/// Writes `reports/<run_id>/harvest.json` and `harvest_brief.md`.
pub async fn write_harvest_report(
    workspace_root: &Path,
    outcome: &HarvestOutcome,
) -> Result<PathBuf> {
    let reports_dir = workspace_root.join("reports").join(outcome.run_id.to_string());
    let json = serde_json::to_vec_pretty(outcome).context("serializing harvest report")?;
    write_atomic(&reports_dir.join("harvest.json"), &json)
        .await
        .context("writing harvest.json")?;

    let c = &outcome.coverage;
    let brief = [
        "# Harvest Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", outcome.run_id),
        format!("- Started: {}", outcome.started_at),
        format!("- Finished: {}", outcome.finished_at),
        format!("- Requested: {}", outcome.requested),
        format!("- Resumed from checkpoint: {}", outcome.resumed),
        format!("- Fetched: {}", outcome.fetched),
        format!("- Failed: {}", outcome.failed),
        format!("- Checkpoints written: {}", outcome.checkpoints_written),
        String::new(),
        "## Field coverage".to_string(),
        format!("- name: {}", c.name),
        format!("- email: {}", c.email),
        format!("- phone: {}", c.phone),
        format!("- address: {}", c.address),
        format!("- legal nature: {}", c.legal_nature),
        format!("- registration status: {}", c.registration_status),
        format!("- blank records: {}", c.blank),
        String::new(),
    ]
    .join("\n");
    write_atomic(&reports_dir.join("harvest_brief.md"), brief.as_bytes())
        .await
        .context("writing harvest_brief.md")?;
    Ok(reports_dir)
}

fn log_progress(completed: usize, total: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 { completed as f64 / secs } else { 0.0 };
    let eta_secs = if rate > 0.0 {
        (total - completed) as f64 / rate
    } else {
        0.0
    };
    let percent = if total > 0 {
        completed as f64 * 100.0 / total as f64
    } else {
        100.0
    };
    info!(
        completed,
        total,
        percent = %format!("{percent:.1}"),
        items_per_sec = %format!("{rate:.2}"),
        eta_secs = %format!("{eta_secs:.0}"),
        "harvest progress"
    );
}
