//! Environment-driven settings for the harvest and reconcile stages.

use std::path::PathBuf;
use std::time::Duration;

use osc_adapters::DEFAULT_DETAIL_URL_TEMPLATE;
use osc_storage::{HttpClientConfig, IdSourceOptions};

use crate::boundaries::DEFAULT_NAME_PROPERTY;
use crate::harvest::HarvestOptions;
use crate::join::DEFAULT_MUNICIPALITY_COLUMN;
use crate::matcher::DEFAULT_MATCH_THRESHOLD;

pub const DEFAULT_USER_AGENT: &str = "osc-harvest/0.1";

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub ids_path: PathBuf,
    pub ids: IdSourceOptions,
    pub detail_url_template: String,
    pub checkpoint_path: PathBuf,
    pub user_agent: String,
    pub options: HarvestOptions,
    pub workspace_root: PathBuf,
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        let defaults = HarvestOptions::default();
        let id_defaults = IdSourceOptions::default();
        Self {
            ids_path: std::env::var("OSC_IDS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./ocs_PR.CSV")),
            ids: IdSourceOptions {
                encoding: std::env::var("OSC_IDS_ENCODING").unwrap_or(id_defaults.encoding),
                delimiter: std::env::var("OSC_IDS_DELIMITER")
                    .ok()
                    .and_then(|v| v.chars().next())
                    .unwrap_or(id_defaults.delimiter),
                id_column: std::env::var("OSC_ID_COLUMN").unwrap_or(id_defaults.id_column),
            },
            detail_url_template: std::env::var("OSC_DETAIL_URL_TEMPLATE")
                .unwrap_or_else(|_| DEFAULT_DETAIL_URL_TEMPLATE.to_string()),
            checkpoint_path: std::env::var("OSC_CHECKPOINT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./osc_details.csv")),
            user_agent: std::env::var("OSC_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            options: HarvestOptions {
                concurrency: env_parse("OSC_CONCURRENCY").unwrap_or(defaults.concurrency),
                fetch_timeout: env_parse("OSC_FETCH_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.fetch_timeout),
                checkpoint_interval: env_parse("OSC_CHECKPOINT_INTERVAL_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.checkpoint_interval),
                progress_every: env_parse("OSC_PROGRESS_EVERY").unwrap_or(defaults.progress_every),
                retry_blank_records: std::env::var("OSC_RETRY_BLANK_RECORDS")
                    .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                    .unwrap_or(defaults.retry_blank_records),
            },
            workspace_root: workspace_root_from_env(),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.options.fetch_timeout,
            user_agent: Some(self.user_agent.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub boundary_name_property: String,
    pub match_threshold: f64,
    pub municipality_column: String,
    pub workspace_root: PathBuf,
}

impl ReconcileConfig {
    pub fn from_env() -> Self {
        Self {
            boundary_name_property: std::env::var("OSC_BOUNDARY_NAME_PROPERTY")
                .unwrap_or_else(|_| DEFAULT_NAME_PROPERTY.to_string()),
            match_threshold: env_parse::<f64>("OSC_MATCH_THRESHOLD")
                .filter(|t| (0.0..=1.0).contains(t))
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            municipality_column: std::env::var("OSC_MUNICIPALITY_COLUMN")
                .unwrap_or_else(|_| DEFAULT_MUNICIPALITY_COLUMN.to_string()),
            workspace_root: workspace_root_from_env(),
        }
    }
}

fn workspace_root_from_env() -> PathBuf {
    std::env::var("OSC_WORKSPACE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
