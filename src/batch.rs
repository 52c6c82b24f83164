//! One chunk worker: recompute the pending set, take this chunk's slice and
//! run every unit in it, one after another.
//!
//! A unit failure never stops the chunk. The only errors returned are the
//! ones that prevent the chunk from running at all (missing catalog, bad
//! chunk index, unusable output directory).

use crate::error::{BatchError, Result};
use crate::executor::{UnitExecutor, UnitOutcome, now_run_at};
use crate::ledger::write_fragment;
use crate::pending::pending_from_paths;
use crate::planner::slice_chunk;
use crate::stage::UNEXPECTED_STEP;
use busco_protocol::{LOG_LEDGER, LogRecord, RESULT_LEDGER};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub catalog_path: PathBuf,
    pub log_path: PathBuf,
    pub chunk_index: usize,
    pub chunk_count: usize,
    pub output_dir: PathBuf,
    pub max_per_job: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChunkReport {
    pub chunk_index: usize,
    pub chunk_count: usize,
    pub assigned: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_ids: Vec<String>,
}

/// Last-resort fragments when the executor could not record the unit.
///
/// The result fragment is reset to header-only first, so a success row
/// written before the log fragment failed never reaches the Result Ledger.
fn write_fallback_fragments(output_dir: &Path, unit_id: &str) -> Result<()> {
    let result_path = output_dir.join(RESULT_LEDGER.fragment_file_name(unit_id));
    if let Err(e) = write_fragment(&result_path, &RESULT_LEDGER, None) {
        tracing::error!("  Could not reset result fragment for {unit_id}: {e}");
        if result_path.exists() {
            fs::remove_file(&result_path).map_err(BatchError::io(&result_path, "remove"))?;
        }
    }
    let record = LogRecord::failure(unit_id, &now_run_at(), UNEXPECTED_STEP);
    write_fragment(
        &output_dir.join(LOG_LEDGER.fragment_file_name(unit_id)),
        &LOG_LEDGER,
        Some(&record.to_row()),
    )
}

pub fn run_chunk(request: &ChunkRequest, executor: &UnitExecutor) -> Result<ChunkReport> {
    fs::create_dir_all(&request.output_dir)
        .map_err(BatchError::io(&request.output_dir, "create output directory"))?;

    let (catalog, pending) = pending_from_paths(&request.catalog_path, &request.log_path)?;
    let slice = slice_chunk(
        &pending.ids,
        request.chunk_index,
        request.chunk_count,
        request.max_per_job,
    )?;
    tracing::info!(
        "Chunk {}/{}: {} annotations to process",
        request.chunk_index,
        request.chunk_count,
        slice.len()
    );

    let mut report = ChunkReport {
        chunk_index: request.chunk_index,
        chunk_count: request.chunk_count,
        assigned: slice.len(),
        ..ChunkReport::default()
    };

    for (i, unit_id) in slice.iter().enumerate() {
        let Some(unit) = catalog.get(unit_id) else {
            continue;
        };
        tracing::info!("[{}/{}] Processing {}", i + 1, slice.len(), unit_id);

        match executor.execute_to_fragments(unit, &request.output_dir) {
            Ok(unit_report) => match unit_report.outcome {
                UnitOutcome::Success(_) => {
                    report.succeeded += 1;
                    tracing::info!("  ok {unit_id}");
                }
                UnitOutcome::Failed(error) => {
                    report.failed += 1;
                    report.failed_ids.push(unit_id.clone());
                    tracing::warn!("  failed {unit_id} at {}", error.step);
                }
            },
            Err(e) => {
                report.failed += 1;
                report.failed_ids.push(unit_id.clone());
                tracing::error!("  failed {unit_id}: could not record outcome: {e}");
                if let Err(write_err) = write_fallback_fragments(&request.output_dir, unit_id) {
                    tracing::error!("  Could not write log fragment for {unit_id}: {write_err}");
                }
            }
        }
    }

    tracing::info!(
        "Chunk {} complete: {} succeeded, {} failed out of {}",
        request.chunk_index,
        report.succeeded,
        report.failed,
        report.assigned
    );
    Ok(report)
}
