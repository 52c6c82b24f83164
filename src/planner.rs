//! Chunk planning and slicing.
//!
//! The planner decides how many parallel chunks a trigger starts; the slicer
//! decides which pending ids each chunk owns. Both are pure functions of the
//! pending set and the limits, so every worker can recompute its own slice
//! from the same catalog and Log Ledger snapshot without talking to the
//! others.

use crate::error::{BatchError, Result};
use crate::pending::PendingSet;
use busco_protocol::MatrixPlan;

pub const DEFAULT_MAX_CHUNKS: usize = 256;

/// Parallelism ceiling plus the optional per-trigger throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub max_chunks: usize,
    pub max_per_job: Option<usize>,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            max_chunks: DEFAULT_MAX_CHUNKS,
            max_per_job: None,
        }
    }
}

impl PlanLimits {
    pub fn new(max_chunks: usize, max_per_job: Option<usize>) -> Result<Self> {
        if max_chunks == 0 {
            return Err(BatchError::InvalidPlan(
                "max_chunks must be greater than zero".to_string(),
            ));
        }
        if max_per_job == Some(0) {
            return Err(BatchError::InvalidPlan(
                "max_per_job must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            max_chunks,
            max_per_job,
        })
    }

    /// How many pending units this trigger admits; the rest wait for the
    /// next trigger.
    pub fn scheduled_count(&self, pending_count: usize) -> usize {
        match self.max_per_job {
            Some(per_job) => self
                .max_chunks
                .saturating_mul(per_job)
                .min(pending_count),
            None => pending_count,
        }
    }

    pub fn chunk_count(&self, pending_count: usize) -> usize {
        if pending_count == 0 {
            return 0;
        }
        match self.max_per_job {
            Some(per_job) => {
                let scheduled = self.scheduled_count(pending_count);
                self.max_chunks.min(scheduled.div_ceil(per_job))
            }
            None => self.max_chunks.min(pending_count),
        }
    }
}

/// Builds the orchestrator-facing plan for `pending_count` units.
pub fn build_matrix(pending_count: usize, limits: &PlanLimits) -> MatrixPlan {
    let chunk_count = limits.chunk_count(pending_count);
    let scheduled_count = limits.scheduled_count(pending_count);
    MatrixPlan {
        chunk_count,
        chunk_indices: (0..chunk_count).collect(),
        pending_count,
        scheduled_count,
        deferred_count: pending_count - scheduled_count,
    }
}

/// Plans a trigger from a resolved pending set, logging the decision.
pub fn plan_trigger(pending: &PendingSet, limits: &PlanLimits) -> MatrixPlan {
    let plan = build_matrix(pending.len(), limits);
    if plan.pending_count == 0 {
        tracing::info!("No pending annotations; the matrix is empty");
    } else if limits.max_per_job.is_some() {
        tracing::info!(
            "Annotations this trigger: {} ({} deferred to the next run)",
            plan.scheduled_count,
            plan.deferred_count
        );
    }
    tracing::info!("Chunks to create: {}", plan.chunk_count);
    plan
}

/// One chunk's members. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub members: Vec<String>,
}

/// Members of chunk `index` out of `count`: every `count`-th id of the
/// sorted pending list starting at `index`, capped at `max_per_job`.
///
/// `sorted_ids` must already be in lexicographic order (as
/// [`PendingSet::ids`] is).
pub fn slice_chunk(
    sorted_ids: &[String],
    index: usize,
    count: usize,
    max_per_job: Option<usize>,
) -> Result<Vec<String>> {
    if count == 0 {
        return Err(BatchError::InvalidPlan(
            "chunk count must be greater than zero".to_string(),
        ));
    }
    if index >= count {
        return Err(BatchError::InvalidPlan(format!(
            "chunk index {index} is out of range for {count} chunk(s)"
        )));
    }
    let cap = max_per_job.unwrap_or(usize::MAX);
    Ok(sorted_ids
        .iter()
        .skip(index)
        .step_by(count)
        .take(cap)
        .cloned()
        .collect())
}

/// All `count` chunks of the sorted pending list.
pub fn slice_all(sorted_ids: &[String], count: usize, max_per_job: Option<usize>) -> Vec<Chunk> {
    (0..count)
        .filter_map(|index| {
            slice_chunk(sorted_ids, index, count, max_per_job)
                .ok()
                .map(|members| Chunk { index, members })
        })
        .collect()
}
