use std::path::{Path, PathBuf};

/// Errors that abort a whole trigger (planning, a chunk run or an
/// aggregation pass). Per-unit failures never surface here; see
/// [`crate::stage::StageError`].
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Catalog not found: '{}'", path.display())]
    CatalogMissing { path: PathBuf },

    #[error("Malformed catalog '{}': {reason}", path.display())]
    MalformedCatalog { path: PathBuf, reason: String },

    #[error("Artifacts directory not found: '{}'", path.display())]
    ArtifactsMissing { path: PathBuf },

    #[error("Invalid chunk plan: {0}")]
    InvalidPlan(String),

    #[error("Could not {action} ledger '{}': {source}", path.display())]
    Ledger {
        path: PathBuf,
        action: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("Could not {action} '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed fragment '{}': {reason}", path.display())]
    MalformedFragment { path: PathBuf, reason: String },

    #[error("Catalog discovery failed: {0}")]
    Discovery(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BatchError>;

impl BatchError {
    pub(crate) fn io(path: &Path, action: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Io {
            path,
            action,
            source,
        }
    }

    pub(crate) fn ledger(path: &Path, action: &'static str) -> impl FnOnce(csv::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Ledger {
            path,
            action,
            source,
        }
    }
}
