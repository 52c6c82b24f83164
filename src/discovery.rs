//! Builds the unit catalog from the paginated annotations and assemblies
//! APIs.
//!
//! Assemblies are prefetched in bulk into an [`AssemblyIndex`] that lives
//! only for one catalog build. Any page that cannot be fetched or decoded
//! aborts the build; a partial catalog is never written.

use crate::catalog::Catalog;
use crate::config::DiscoveryConfig;
use crate::error::{BatchError, Result};
use busco_protocol::Unit;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Something that can return the raw JSON body of one page.
pub trait PageSource {
    fn fetch_page(&self, endpoint: &str, offset: usize, limit: usize) -> Result<String>;
}

pub struct HttpPageSource {
    client: reqwest::blocking::Client,
}

impl HttpPageSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BatchError::Discovery(format!("Could not build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl PageSource for HttpPageSource {
    fn fetch_page(&self, endpoint: &str, offset: usize, limit: usize) -> Result<String> {
        let url = format!("{endpoint}?offset={offset}&limit={limit}");
        tracing::debug!("GET {url}");
        self.client
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(|e| BatchError::Discovery(format!("Could not fetch '{url}': {e}")))
    }
}

#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct AssemblyEntry {
    #[serde(default)]
    pub assembly_accession: String,
    #[serde(default)]
    pub download_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SourceFileInfo {
    #[serde(default)]
    pub url_path: String,
}

#[derive(Debug, Deserialize)]
pub struct AnnotationEntry {
    #[serde(default)]
    pub annotation_id: String,
    #[serde(default)]
    pub assembly_accession: String,
    #[serde(default)]
    pub source_file_info: SourceFileInfo,
}

pub fn parse_page<T: DeserializeOwned>(endpoint: &str, offset: usize, body: &str) -> Result<Page<T>> {
    serde_json::from_str(body).map_err(|e| {
        BatchError::Discovery(format!(
            "Could not parse page at offset {offset} of '{endpoint}': {e}"
        ))
    })
}

/// Every record behind `endpoint`, page by page, until `total` records were
/// seen or a page comes back empty.
pub fn fetch_all<T: DeserializeOwned>(
    source: &dyn PageSource,
    endpoint: &str,
    page_size: usize,
) -> Result<Vec<T>> {
    let mut records = vec![];
    let mut offset = 0;
    loop {
        let body = source.fetch_page(endpoint, offset, page_size)?;
        let page: Page<T> = parse_page(endpoint, offset, &body)?;
        if page.results.is_empty() {
            break;
        }
        records.extend(page.results);
        tracing::info!(
            "Fetched {} of {} records from {endpoint}",
            records.len(),
            page.total
        );
        if records.len() >= page.total {
            break;
        }
        offset += page_size;
    }
    Ok(records)
}

/// Accession to download URL, built once per catalog build.
#[derive(Debug, Default)]
pub struct AssemblyIndex {
    urls: HashMap<String, String>,
}

impl AssemblyIndex {
    pub fn from_entries(entries: impl IntoIterator<Item = AssemblyEntry>) -> Self {
        let urls = entries
            .into_iter()
            .filter(|entry| !entry.assembly_accession.is_empty())
            .map(|entry| (entry.assembly_accession, entry.download_url))
            .collect();
        Self { urls }
    }

    pub fn prefetch(source: &dyn PageSource, config: &DiscoveryConfig) -> Result<Self> {
        let entries: Vec<AssemblyEntry> =
            fetch_all(source, &config.assemblies_api, config.page_size)?;
        let index = Self::from_entries(entries);
        tracing::info!("Built assembly index with {} entries", index.len());
        Ok(index)
    }

    pub fn lookup(&self, accession: &str) -> Option<&str> {
        self.urls
            .get(accession)
            .map(String::as_str)
            .filter(|url| !url.is_empty())
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[derive(Debug)]
pub struct DiscoveredCatalog {
    pub catalog: Catalog,
    /// Accessions referenced by an annotation but absent from the index.
    pub missing_assemblies: BTreeSet<String>,
}

/// Joins annotations to assembly URLs. Annotations whose assembly is unknown
/// keep an empty assembly URL and fail validation when executed.
pub fn build_catalog(annotations: Vec<AnnotationEntry>, index: &AssemblyIndex) -> DiscoveredCatalog {
    let mut missing_assemblies = BTreeSet::new();
    let mut units = Vec::with_capacity(annotations.len());
    for annotation in annotations {
        if annotation.annotation_id.is_empty() {
            tracing::warn!("Skipping annotation without an id");
            continue;
        }
        let assembly_url = match index.lookup(&annotation.assembly_accession) {
            Some(url) => url.to_string(),
            None => {
                if !annotation.assembly_accession.is_empty() {
                    missing_assemblies.insert(annotation.assembly_accession.clone());
                }
                String::new()
            }
        };
        units.push(Unit {
            id: annotation.annotation_id,
            annotation_url: annotation.source_file_info.url_path,
            assembly_url,
        });
    }
    DiscoveredCatalog {
        catalog: Catalog::from_units(units),
        missing_assemblies,
    }
}

pub fn discover_catalog(source: &dyn PageSource, config: &DiscoveryConfig) -> Result<DiscoveredCatalog> {
    let index = AssemblyIndex::prefetch(source, config)?;
    if index.is_empty() {
        return Err(BatchError::Discovery(
            "No assemblies found, cannot build catalog".to_string(),
        ));
    }
    let annotations: Vec<AnnotationEntry> =
        fetch_all(source, &config.annotations_api, config.page_size)?;
    if annotations.is_empty() {
        return Err(BatchError::Discovery(
            "No annotations found in API response".to_string(),
        ));
    }
    tracing::info!("Found {} annotations", annotations.len());

    let discovered = build_catalog(annotations, &index);
    if !discovered.missing_assemblies.is_empty() {
        tracing::warn!(
            "Could not find assembly URLs for {} assemblies",
            discovered.missing_assemblies.len()
        );
    }
    Ok(discovered)
}
