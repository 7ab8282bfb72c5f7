use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use osc_adapters::{CatalogDetailSource, DetailSource, DirectoryDetailSource};
use osc_core::TextTable;
use osc_storage::{read_table, write_atomic, HttpFetcher, Table};
use osc_sync::{HarvestConfig, ReconcileConfig, RuleSet};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "osc-cli")]
#[command(about = "OSC catalog harvester and municipality reconciler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch detail pages for every id in the upstream export, resuming from the checkpoint.
    Harvest(HarvestArgs),
    /// Attach upstream municipality names to checkpointed records.
    Join(JoinArgs),
    /// Match municipality names in a joined file against boundary names.
    Reconcile(ReconcileArgs),
    /// Repair double-encoded text in every text column of a delimited file.
    Repair(RepairArgs),
}

#[derive(Debug, Default, Args)]
struct HarvestArgs {
    #[arg(long)]
    ids: Option<PathBuf>,
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long)]
    checkpoint_interval_secs: Option<u64>,
    /// Re-fetch ids whose checkpointed record is blank.
    #[arg(long)]
    retry_blank: bool,
    #[arg(long)]
    url_template: Option<String>,
    /// Read saved `detail_<id>.html` pages from this directory instead of the network.
    #[arg(long)]
    pages_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct JoinArgs {
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Upstream export carrying the municipality column; defaults to the id file.
    #[arg(long)]
    upstream: Option<PathBuf>,
    #[arg(long, default_value = "osc_details_joined.csv")]
    output: PathBuf,
    #[arg(long)]
    municipality_column: Option<String>,
}

#[derive(Debug, Args)]
struct ReconcileArgs {
    #[arg(long, default_value = "osc_details_joined.csv")]
    joined: PathBuf,
    #[arg(long)]
    boundaries: PathBuf,
    /// Joined records with their reconciled boundary name and match status.
    #[arg(long, default_value = "osc_details_reconciled.csv")]
    output: PathBuf,
    #[arg(long)]
    threshold: Option<f64>,
    #[arg(long)]
    name_property: Option<String>,
}

#[derive(Debug, Args)]
struct RepairArgs {
    input: PathBuf,
    output: PathBuf,
    #[arg(long, default_value = "utf-8")]
    encoding: String,
    #[arg(long, default_value_t = ',')]
    delimiter: char,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,html5ever=warn,selectors=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli
        .command
        .unwrap_or_else(|| Commands::Harvest(HarvestArgs::default()))
    {
        Commands::Harvest(args) => harvest(args).await?,
        Commands::Join(args) => {
            let harvest = HarvestConfig::from_env();
            let mut reconcile = ReconcileConfig::from_env();
            if let Some(column) = args.municipality_column {
                reconcile.municipality_column = column;
            }
            let checkpoint = args.checkpoint.unwrap_or_else(|| harvest.checkpoint_path.clone());
            let upstream = args.upstream.unwrap_or_else(|| harvest.ids_path.clone());
            let outcome =
                osc_sync::run_join(&checkpoint, &upstream, &args.output, &harvest, &reconcile)
                    .await?;
            println!(
                "join complete: records={} joined={} missing={} repaired={} output={}",
                outcome.records.len(),
                outcome.joined,
                outcome.missing,
                outcome.repaired,
                args.output.display()
            );
        }
        Commands::Reconcile(args) => {
            let mut config = ReconcileConfig::from_env();
            if let Some(threshold) = args.threshold {
                anyhow::ensure!(
                    (0.0..=1.0).contains(&threshold),
                    "threshold must be within 0..=1, got {threshold}"
                );
                config.match_threshold = threshold;
            }
            if let Some(property) = args.name_property {
                config.boundary_name_property = property;
            }
            let run =
                osc_sync::run_reconcile(&args.joined, &args.boundaries, &args.output, &config)
                    .await?;
            println!(
                "reconcile complete: run_id={} names={} matched={} unmatched={} flagged={} \
                 output={} reports={}",
                run.report.run_id,
                run.report.results.len(),
                run.report.matched_count,
                run.report.unmatched_count,
                run.flagged,
                run.output_path.display(),
                run.reports_dir.display()
            );
        }
        Commands::Repair(args) => repair(args).await?,
    }

    Ok(())
}

async fn harvest(args: HarvestArgs) -> Result<()> {
    let mut config = HarvestConfig::from_env();
    if let Some(ids) = args.ids {
        config.ids_path = ids;
    }
    if let Some(checkpoint) = args.checkpoint {
        config.checkpoint_path = checkpoint;
    }
    if let Some(concurrency) = args.concurrency {
        config.options.concurrency = concurrency;
    }
    if let Some(secs) = args.timeout_secs {
        config.options.fetch_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.checkpoint_interval_secs {
        config.options.checkpoint_interval = Duration::from_secs(secs);
    }
    if args.retry_blank {
        config.options.retry_blank_records = true;
    }
    if let Some(template) = args.url_template {
        config.detail_url_template = template;
    }

    let source: Arc<dyn DetailSource> = match args.pages_dir {
        Some(dir) => Arc::new(DirectoryDetailSource::new(dir)),
        None => {
            let http = HttpFetcher::new(config.http_client_config())?;
            Arc::new(CatalogDetailSource::new(http, config.detail_url_template.clone())?)
        }
    };

    let run = osc_sync::run_harvest(&config, source).await?;
    let outcome = &run.outcome;
    println!(
        "harvest complete: run_id={} requested={} resumed={} fetched={} failed={} \
         with_phone={} with_status={} checkpoint={} reports={}",
        outcome.run_id,
        outcome.requested,
        outcome.resumed,
        outcome.fetched,
        outcome.failed,
        outcome.coverage.phone,
        outcome.coverage.registration_status,
        run.checkpoint_path.display(),
        run.reports_dir.display()
    );
    if run.ids_skipped > 0 {
        eprintln!("{} id rows were skipped as malformed", run.ids_skipped);
    }
    Ok(())
}

async fn repair(args: RepairArgs) -> Result<()> {
    let workspace_root = ReconcileConfig::from_env().workspace_root;
    let filter = RuleSet::from_workspace_root(&workspace_root)?.encoding_repair();

    let table = read_table(&args.input, &args.encoding, args.delimiter).await?;
    let mut text = TextTable::from_raw_rows(table.headers, &table.rows);
    let audits = filter.repair_columns(&mut text);

    let repaired = Table {
        rows: text.to_raw_rows(),
        headers: text.headers,
    };
    let bytes = repaired
        .to_bytes(args.delimiter)
        .context("encoding repaired table")?;
    let written = write_atomic(&args.output, &bytes)
        .await
        .with_context(|| format!("writing repaired table {}", args.output.display()))?;
    info!(path = %written.path.display(), bytes = written.byte_size, "repaired table written");

    for audit in &audits {
        if audit.text_typed {
            println!("{}: {} cells repaired", audit.column, audit.changed);
        } else {
            println!("{}: not a text column", audit.column);
        }
    }
    Ok(())
}
