//! Detail page sources and the detail page parser for the OSC catalog.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use osc_core::EntityId;
use osc_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tracing::debug;

pub mod parser;

pub use parser::{DetailFields, DetailParser};

pub const CRATE_NAME: &str = "osc-adapters";

pub const DEFAULT_DETAIL_URL_TEMPLATE: &str = "https://mapaosc.ipea.gov.br/detalhar/{id}";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Where detail pages come from. The harvester only sees this seam, so it can run against
/// the live catalog, saved pages, or a simulated source in tests.
#[async_trait]
pub trait DetailSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Location of the detail page for `id`, for logs and reports.
    fn detail_url(&self, id: EntityId) -> String;

    async fn fetch_detail(&self, id: EntityId) -> Result<String, AdapterError>;
}

/// Live catalog over HTTP.
#[derive(Debug, Clone)]
pub struct CatalogDetailSource {
    http: HttpFetcher,
    url_template: String,
}

impl CatalogDetailSource {
    pub fn new(http: HttpFetcher, url_template: impl Into<String>) -> Result<Self, AdapterError> {
        let url_template = url_template.into();
        if !url_template.contains("{id}") {
            return Err(AdapterError::Message(format!(
                "detail url template {url_template:?} has no {{id}} placeholder"
            )));
        }
        Ok(Self { http, url_template })
    }
}

#[async_trait]
impl DetailSource for CatalogDetailSource {
    fn source_id(&self) -> &'static str {
        "mapaosc"
    }

    fn detail_url(&self, id: EntityId) -> String {
        self.url_template.replace("{id}", &id.to_string())
    }

    async fn fetch_detail(&self, id: EntityId) -> Result<String, AdapterError> {
        let url = self.detail_url(id);
        debug!(%id, %url, "fetching detail page");
        Ok(self.http.fetch_text(&url).await?)
    }
}

/// Saved detail pages on disk, one `detail_<id>.html` per organization.
#[derive(Debug, Clone)]
pub struct DirectoryDetailSource {
    root: PathBuf,
}

impl DirectoryDetailSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn page_path(&self, id: EntityId) -> PathBuf {
        self.root.join(format!("detail_{id}.html"))
    }
}

#[async_trait]
impl DetailSource for DirectoryDetailSource {
    fn source_id(&self) -> &'static str {
        "directory"
    }

    fn detail_url(&self, id: EntityId) -> String {
        self.page_path(id).display().to_string()
    }

    async fn fetch_detail(&self, id: EntityId) -> Result<String, AdapterError> {
        let path = self.page_path(id);
        debug!(%id, path = %path.display(), "reading saved detail page");
        let html = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading saved detail page {}", path.display()))?;
        Ok(html)
    }
}
