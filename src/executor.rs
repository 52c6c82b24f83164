//! Runs one unit's stages in a private, disposable workspace and records the
//! outcome as a result fragment plus a log fragment.

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::ledger::write_fragment;
use crate::pipeline::busco_stages;
use crate::stage::{Stage, StageContext, StageError, StageErrorKind};
use busco_protocol::{LOG_LEDGER, LogRecord, RESULT_LEDGER, RUN_AT_FORMAT, ResultRecord, Unit};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

/// Step recorded when the unit's workspace cannot be created.
pub const STEP_WORKSPACE: &str = "create_workspace";

/// Step recorded when every stage succeeded but none produced a result.
pub const STEP_NO_RESULT: &str = "no_result";

#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Success(ResultRecord),
    Failed(StageError),
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// What one unit left behind in the artifact directory.
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub outcome: UnitOutcome,
    pub result_fragment: PathBuf,
    pub log_fragment: PathBuf,
}

pub fn now_run_at() -> String {
    chrono::Local::now().format(RUN_AT_FORMAT).to_string()
}

fn workspace_prefix(unit_id: &str) -> String {
    let safe: String = unit_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("busco_{safe}_")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub struct UnitExecutor {
    stages: Vec<Box<dyn Stage>>,
    message_limit: usize,
}

impl UnitExecutor {
    pub fn new(stages: Vec<Box<dyn Stage>>, message_limit: usize) -> Self {
        Self {
            stages,
            message_limit,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(busco_stages(config), config.message_limit)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs every stage for `unit`, stopping at the first failure.
    ///
    /// Never returns an error: every failure, including a panicking stage,
    /// becomes [`UnitOutcome::Failed`]. The workspace is removed when this
    /// returns or unwinds.
    pub fn execute(&self, unit: &Unit) -> UnitOutcome {
        let workspace = match tempfile::Builder::new()
            .prefix(&workspace_prefix(&unit.id))
            .tempdir()
        {
            Ok(dir) => dir,
            Err(e) => {
                return UnitOutcome::Failed(
                    StageError::new(
                        STEP_WORKSPACE,
                        StageErrorKind::Unexpected,
                        format!("Could not create working directory: {e}"),
                    )
                    .truncated(self.message_limit),
                );
            }
        };
        tracing::info!("Working directory for {}: {}", unit.id, workspace.path().display());

        let mut ctx = StageContext::new(unit.clone(), workspace.path());
        let outcome = self.run_stages(&mut ctx);

        let workdir = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            tracing::warn!("Could not remove working directory '{}': {e}", workdir.display());
        }
        outcome
    }

    fn run_stages(&self, ctx: &mut StageContext) -> UnitOutcome {
        for stage in &self.stages {
            tracing::info!("{}: {}", ctx.unit.id, stage.name());
            let result = catch_unwind(AssertUnwindSafe(|| stage.run(ctx)));
            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(payload) => StageError::unexpected(format!(
                    "Stage '{}' panicked: {}",
                    stage.name(),
                    panic_message(payload.as_ref())
                )),
            };
            tracing::warn!("{} failed at {}: {}", ctx.unit.id, error.step, error.message);
            return UnitOutcome::Failed(error.truncated(self.message_limit));
        }
        match ctx.take_result() {
            Some(record) => UnitOutcome::Success(record),
            None => UnitOutcome::Failed(StageError::parse(
                STEP_NO_RESULT,
                "Pipeline finished without producing a result",
            )),
        }
    }

    /// Executes `unit` and writes `result_<id>.tsv` and `log_<id>.tsv` into
    /// `output_dir`. The log fragment always has a data row; the result
    /// fragment has one only on success.
    pub fn execute_to_fragments(&self, unit: &Unit, output_dir: &Path) -> Result<UnitReport> {
        let outcome = self.execute(unit);
        let run_at = now_run_at();
        let (result_row, log) = match &outcome {
            UnitOutcome::Success(record) => {
                (Some(record.to_row()), LogRecord::success(&unit.id, &run_at))
            }
            UnitOutcome::Failed(error) => (None, LogRecord::failure(&unit.id, &run_at, &error.step)),
        };

        let result_fragment = output_dir.join(RESULT_LEDGER.fragment_file_name(&unit.id));
        let log_fragment = output_dir.join(LOG_LEDGER.fragment_file_name(&unit.id));
        write_fragment(&result_fragment, &RESULT_LEDGER, result_row.as_deref())?;
        write_fragment(&log_fragment, &LOG_LEDGER, Some(&log.to_row()))?;

        Ok(UnitReport {
            outcome,
            result_fragment,
            log_fragment,
        })
    }
}
