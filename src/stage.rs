//! The per-unit stage contract.
//!
//! A stage is one named, fallible step of a unit's pipeline. Stages share a
//! [`StageContext`] holding the unit, its private working directory and the
//! artifacts earlier stages produced; each stage reads its inputs from there
//! and records its own output artifact.

use busco_protocol::{ResultRecord, Unit};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Step recorded when a stage panics instead of returning an error.
pub const UNEXPECTED_STEP: &str = "unexpected_error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageErrorKind {
    /// The unit's source references are incomplete.
    Validation,
    /// A download failed.
    Transfer,
    /// An external tool could not be started or exited non-zero.
    ExternalTool,
    /// An expected artifact is missing or unreadable.
    Parse,
    Unexpected,
}

impl fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validation => "validation error",
            Self::Transfer => "transfer error",
            Self::ExternalTool => "external tool error",
            Self::Parse => "parse error",
            Self::Unexpected => "unexpected error",
        };
        f.write_str(label)
    }
}

/// Failure of one stage: the step name ends up in the Log Ledger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Step '{step}' failed ({kind}): {message}")]
pub struct StageError {
    pub step: String,
    pub kind: StageErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(step: &str, kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            kind,
            message: message.into(),
        }
    }

    pub fn validation(step: &str, message: impl Into<String>) -> Self {
        Self::new(step, StageErrorKind::Validation, message)
    }

    pub fn transfer(step: &str, message: impl Into<String>) -> Self {
        Self::new(step, StageErrorKind::Transfer, message)
    }

    pub fn external_tool(step: &str, message: impl Into<String>) -> Self {
        Self::new(step, StageErrorKind::ExternalTool, message)
    }

    pub fn parse(step: &str, message: impl Into<String>) -> Self {
        Self::new(step, StageErrorKind::Parse, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(UNEXPECTED_STEP, StageErrorKind::Unexpected, message)
    }

    /// Keeps at most `limit` characters of the message.
    pub fn truncated(mut self, limit: usize) -> Self {
        if self.message.chars().count() > limit {
            self.message = self.message.chars().take(limit).collect();
        }
        self
    }
}

/// Files a unit's pipeline produces along the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Artifact {
    Annotation,
    Assembly,
    AliasedAnnotation,
    LongestIsoform,
    Proteins,
    BuscoOutput,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Annotation => "annotation file",
            Self::Assembly => "assembly file",
            Self::AliasedAnnotation => "aliased annotation",
            Self::LongestIsoform => "longest-isoform annotation",
            Self::Proteins => "protein FASTA",
            Self::BuscoOutput => "BUSCO output directory",
        };
        f.write_str(label)
    }
}

/// State one unit's stages share.
#[derive(Debug)]
pub struct StageContext {
    pub unit: Unit,
    workdir: PathBuf,
    artifacts: BTreeMap<Artifact, PathBuf>,
    result: Option<ResultRecord>,
}

impl StageContext {
    pub fn new(unit: Unit, workdir: &Path) -> Self {
        Self {
            unit,
            workdir: workdir.to_path_buf(),
            artifacts: BTreeMap::new(),
            result: None,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn record(&mut self, artifact: Artifact, path: PathBuf) {
        self.artifacts.insert(artifact, path);
    }

    /// Path of an artifact an earlier stage must have produced.
    ///
    /// Missing or vanished artifacts fail `step` with a parse error.
    pub fn require(&self, artifact: Artifact, step: &str) -> Result<PathBuf, StageError> {
        let path = self.artifacts.get(&artifact).ok_or_else(|| {
            StageError::parse(step, format!("No {artifact} was produced before this step"))
        })?;
        if !path.exists() {
            return Err(StageError::parse(
                step,
                format!("Expected {artifact} not found: {}", path.display()),
            ));
        }
        Ok(path.clone())
    }

    pub fn set_result(&mut self, result: ResultRecord) {
        self.result = Some(result);
    }

    pub fn take_result(&mut self) -> Option<ResultRecord> {
        self.result.take()
    }
}

/// One named, fallible step of the per-unit pipeline.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, ctx: &mut StageContext) -> Result<(), StageError>;
}
