//! Drives full triggers (plan, every chunk, aggregate) with stand-in stages
//! and checks the ledgers converge.

use busco_batch::aggregate::aggregate;
use busco_batch::batch::{ChunkRequest, run_chunk};
use busco_batch::catalog::Catalog;
use busco_batch::executor::UnitExecutor;
use busco_batch::ledger::Ledger;
use busco_batch::pending::pending_from_paths;
use busco_batch::planner::{PlanLimits, plan_trigger};
use busco_batch::protocol::{LOG_LEDGER, RESULT_LEDGER, ResultRecord, Unit};
use busco_batch::stage::{Stage, StageContext, StageError};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

struct FakeBusco {
    failing: Vec<&'static str>,
}

impl Stage for FakeBusco {
    fn name(&self) -> &str {
        "run_busco"
    }

    fn run(&self, ctx: &mut StageContext) -> Result<(), StageError> {
        if self.failing.contains(&ctx.unit.id.as_str()) {
            return Err(StageError::external_tool("run_busco", "busco exited with status 1"));
        }
        ctx.set_result(ResultRecord {
            id: ctx.unit.id.clone(),
            lineage: "eukaryota_odb12".to_string(),
            busco_count: 129,
            complete: 90.0,
            single: 89.5,
            duplicated: 0.5,
            fragmented: 4.0,
            missing: 6.0,
        });
        Ok(())
    }
}

fn executor(failing: Vec<&'static str>) -> UnitExecutor {
    UnitExecutor::new(vec![Box::new(FakeBusco { failing })], 500)
}

fn write_catalog(path: &Path, ids: &[&str]) {
    Catalog::from_units(ids.iter().map(|id| Unit {
        id: id.to_string(),
        annotation_url: format!("https://x/{id}.gff.gz"),
        assembly_url: format!("https://x/{id}.fna.gz"),
    }))
    .write(path)
    .unwrap();
}

/// One trigger; returns the chunk count it planned.
fn trigger(root: &Path, run: usize, limits: &PlanLimits, executor: &UnitExecutor) -> usize {
    let catalog = root.join("annotations.tsv");
    let log = root.join("log.tsv");
    let (_, pending) = pending_from_paths(&catalog, &log).unwrap();
    let plan = plan_trigger(&pending, limits);
    let artifacts = root.join(format!("artifacts_{run}"));
    fs::create_dir_all(&artifacts).unwrap();
    for index in plan.chunk_indices.iter().copied() {
        run_chunk(
            &ChunkRequest {
                catalog_path: catalog.clone(),
                log_path: log.clone(),
                chunk_index: index,
                chunk_count: plan.chunk_count,
                output_dir: artifacts.join(format!("chunk_{index}")),
                max_per_job: limits.max_per_job,
            },
            executor,
        )
        .unwrap();
    }
    aggregate(&artifacts, &root.join("result.tsv"), &log).unwrap();
    plan.chunk_count
}

#[test]
fn one_trigger_clears_the_catalog() {
    let td = tempdir().unwrap();
    write_catalog(&td.path().join("annotations.tsv"), &["a", "b", "c", "d", "e", "f", "g", "h"]);
    let limits = PlanLimits::new(4, None).unwrap();
    let executor = executor(vec!["x"]);

    assert_eq!(trigger(td.path(), 0, &limits, &executor), 4);

    let results = Ledger::new(td.path().join("result.tsv"), RESULT_LEDGER)
        .load_ids()
        .unwrap();
    assert_eq!(results.len(), 8);
    let logs = Ledger::new(td.path().join("log.tsv"), LOG_LEDGER)
        .load_ids()
        .unwrap();
    assert_eq!(logs.len(), 8);

    assert_eq!(trigger(td.path(), 1, &limits, &executor), 0);
}

#[test]
fn throttled_triggers_converge_and_failures_stay_logged() {
    let td = tempdir().unwrap();
    let ids: Vec<String> = (0..10).map(|i| format!("ann_{i:02}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    write_catalog(&td.path().join("annotations.tsv"), &id_refs);
    let limits = PlanLimits::new(2, Some(2)).unwrap();
    let executor = executor(vec!["ann_03"]);

    let pending_after = [6, 2, 0];
    let mut triggers = 0;
    while trigger(td.path(), triggers, &limits, &executor) > 0 {
        triggers += 1;
        let (_, pending) = pending_from_paths(
            &td.path().join("annotations.tsv"),
            &td.path().join("log.tsv"),
        )
        .unwrap();
        assert_eq!(pending.len(), pending_after[triggers - 1]);
    }
    assert_eq!(triggers, 3);

    let log = fs::read_to_string(td.path().join("log.tsv")).unwrap();
    assert_eq!(log.lines().count(), 11);
    let failed: Vec<&str> = log.lines().filter(|l| l.contains("\tfail\t")).collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].starts_with("ann_03\t"));
    assert!(failed[0].ends_with("\trun_busco"));

    let results = Ledger::new(td.path().join("result.tsv"), RESULT_LEDGER)
        .load_ids()
        .unwrap();
    assert_eq!(results.len(), 9);
    assert!(!results.contains("ann_03"));
}

#[test]
fn missing_catalog_fails_before_planning() {
    let td = tempdir().unwrap();
    assert!(pending_from_paths(&td.path().join("annotations.tsv"), &td.path().join("log.tsv")).is_err());
}
