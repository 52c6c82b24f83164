//! Pipeline configuration, optionally loaded from a JSON file.
//!
//! Every field has a default, so an empty object (or no file at all) is a
//! valid configuration.

use crate::error::{BatchError, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

pub const DEFAULT_LINEAGE: &str = "eukaryota_odb12";
pub const DEFAULT_MESSAGE_LIMIT: usize = 500;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ANNOTATIONS_API: &str = "https://genome.crg.es/annotrieve/api/v0/annotations";
pub const DEFAULT_ASSEMBLIES_API: &str = "https://genome.crg.es/annotrieve/api/v0/assemblies";
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Per-tool executable paths; unset tools fall back to their environment
/// variable, then to `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolOverrides {
    pub annocli: Option<String>,
    pub agat_longest_isoform: Option<String>,
    pub agat_extract_sequences: Option<String>,
    pub busco: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub annotations_api: String,
    pub assemblies_api: String,
    pub page_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            annotations_api: DEFAULT_ANNOTATIONS_API.to_string(),
            assemblies_api: DEFAULT_ASSEMBLIES_API.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// BUSCO lineage dataset name, passed as-is when no local copy exists.
    pub lineage: String,
    /// Directories probed, in order, for a pre-downloaded lineage dataset.
    pub lineage_dirs: Vec<String>,
    /// Maximum characters of a stage's error message kept for logging.
    pub message_limit: usize,
    pub http_timeout_secs: u64,
    pub tools: ToolOverrides,
    pub discovery: DiscoveryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lineage: DEFAULT_LINEAGE.to_string(),
            lineage_dirs: vec![
                format!("busco_downloads/lineages/{DEFAULT_LINEAGE}"),
                DEFAULT_LINEAGE.to_string(),
            ],
            message_limit: DEFAULT_MESSAGE_LIMIT,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            tools: ToolOverrides::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            BatchError::Config(format!(
                "Could not read configuration '{}': {e}",
                path.display()
            ))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            BatchError::Config(format!(
                "Could not parse configuration '{}': {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration from `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_json_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.lineage.trim().is_empty() {
            return Err(BatchError::Config("lineage must not be empty".to_string()));
        }
        if self.message_limit == 0 {
            return Err(BatchError::Config(
                "message_limit must be greater than zero".to_string(),
            ));
        }
        if self.discovery.page_size == 0 {
            return Err(BatchError::Config(
                "discovery.page_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http_timeout_secs)
    }
}
