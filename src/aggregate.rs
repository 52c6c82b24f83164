//! Folds the fragments left by chunk workers into the two shared ledgers.
//!
//! Only this module writes ledgers, and only by appending. It assumes it is
//! the single writer: concurrent aggregation runs against the same ledgers
//! must be serialized by whoever schedules them.

use crate::error::{BatchError, Result};
use crate::ledger::{Ledger, LedgerRow, read_fragment};
use busco_protocol::{LOG_LEDGER, LedgerSchema, RESULT_LEDGER};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateReport {
    pub existing_results: usize,
    pub existing_logs: usize,
    pub result_fragments: usize,
    pub log_fragments: usize,
    pub appended_results: usize,
    pub appended_logs: usize,
    pub skipped_duplicates: usize,
    pub skipped_malformed: usize,
}

/// Fragment files for `schema` anywhere below `root`, in sorted path order.
/// Unfinished `.part` files never match.
fn collect_fragments(root: &Path, schema: &LedgerSchema) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under '{}': {e}", root.display());
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| schema.is_fragment_file_name(name))
        })
        .map(|entry| entry.into_path())
        .collect();
    paths.sort();
    paths
}

struct Merge {
    rows: Vec<LedgerRow>,
    duplicates: usize,
    malformed: usize,
}

/// Reads every fragment in parallel, then accepts rows in path order so the
/// appended block is identical for an identical fragment set.
fn merge_fragments(
    paths: &[PathBuf],
    schema: &LedgerSchema,
    mut seen: BTreeSet<String>,
) -> Merge {
    let parsed: Vec<(&PathBuf, Result<Vec<LedgerRow>>)> = paths
        .par_iter()
        .map(|path| (path, read_fragment(path, schema)))
        .collect();

    let mut merge = Merge {
        rows: vec![],
        duplicates: 0,
        malformed: 0,
    };
    for (path, rows) in parsed {
        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Skipping {} fragment '{}': {e}", schema.name, path.display());
                merge.malformed += 1;
                continue;
            }
        };
        for row in rows {
            if seen.insert(row[0].clone()) {
                merge.rows.push(row);
            } else {
                merge.duplicates += 1;
            }
        }
    }
    merge
}

pub fn aggregate(artifacts_dir: &Path, result_path: &Path, log_path: &Path) -> Result<AggregateReport> {
    if !artifacts_dir.is_dir() {
        return Err(BatchError::ArtifactsMissing {
            path: artifacts_dir.to_path_buf(),
        });
    }

    let result_ledger = Ledger::new(result_path, RESULT_LEDGER);
    let log_ledger = Ledger::new(log_path, LOG_LEDGER);
    let existing_results = result_ledger.load_ids()?;
    let existing_logs = log_ledger.load_ids()?;
    result_ledger.ensure_header()?;
    log_ledger.ensure_header()?;

    let mut report = AggregateReport {
        existing_results: existing_results.len(),
        existing_logs: existing_logs.len(),
        ..AggregateReport::default()
    };

    let result_paths = collect_fragments(artifacts_dir, &RESULT_LEDGER);
    let log_paths = collect_fragments(artifacts_dir, &LOG_LEDGER);
    report.result_fragments = result_paths.len();
    report.log_fragments = log_paths.len();
    tracing::info!(
        "Found {} result and {} log fragments under '{}'",
        result_paths.len(),
        log_paths.len(),
        artifacts_dir.display()
    );

    let results = merge_fragments(&result_paths, &RESULT_LEDGER, existing_results);
    let logs = merge_fragments(&log_paths, &LOG_LEDGER, existing_logs);

    result_ledger.append_rows(&results.rows)?;
    log_ledger.append_rows(&logs.rows)?;

    report.appended_results = results.rows.len();
    report.appended_logs = logs.rows.len();
    report.skipped_duplicates = results.duplicates + logs.duplicates;
    report.skipped_malformed = results.malformed + logs.malformed;
    tracing::info!(
        "Appended {} result rows and {} log rows ({} duplicates, {} malformed fragments skipped)",
        report.appended_results,
        report.appended_logs,
        report.skipped_duplicates,
        report.skipped_malformed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::{scripted_executor, unit};
    use crate::pending::pending_from_paths;
    use crate::catalog::Catalog;
    use std::fs;
    use tempfile::tempdir;

    const RESULT_HEADER: &str =
        "annotation_id\tlineage\tbusco_count\tcomplete\tsingle\tduplicated\tfragmented\tmissing\n";
    const LOG_HEADER: &str = "annotation_id\trun_at\tresult\tstep\n";

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn missing_artifacts_dir_is_fatal() {
        let td = tempdir().unwrap();
        let err = aggregate(
            &td.path().join("artifacts"),
            &td.path().join("result.tsv"),
            &td.path().join("log.tsv"),
        )
        .unwrap_err();
        assert!(matches!(err, BatchError::ArtifactsMissing { .. }));
        assert!(!td.path().join("log.tsv").exists());
    }

    #[test]
    fn empty_artifacts_dir_creates_header_only_ledgers() {
        let td = tempdir().unwrap();
        let artifacts = td.path().join("artifacts");
        fs::create_dir(&artifacts).unwrap();
        let report = aggregate(
            &artifacts,
            &td.path().join("result.tsv"),
            &td.path().join("log.tsv"),
        )
        .unwrap();
        assert_eq!(report.appended_logs, 0);
        assert_eq!(
            fs::read_to_string(td.path().join("result.tsv")).unwrap(),
            RESULT_HEADER
        );
        assert_eq!(fs::read_to_string(td.path().join("log.tsv")).unwrap(), LOG_HEADER);
    }

    #[test]
    fn second_run_over_same_fragments_changes_nothing() {
        let td = tempdir().unwrap();
        let artifacts = td.path().join("artifacts");
        let executor = scripted_executor(&["b"], &[]);
        for (chunk, id) in [(0, "a"), (1, "b"), (0, "c")] {
            executor
                .execute_to_fragments(&unit(id), &artifacts.join(format!("chunk_{chunk}")))
                .unwrap();
        }
        let result_path = td.path().join("result.tsv");
        let log_path = td.path().join("log.tsv");

        let first = aggregate(&artifacts, &result_path, &log_path).unwrap();
        assert_eq!(first.appended_results, 2);
        assert_eq!(first.appended_logs, 3);
        let results_after_first = fs::read(&result_path).unwrap();
        let logs_after_first = fs::read(&log_path).unwrap();

        let second = aggregate(&artifacts, &result_path, &log_path).unwrap();
        assert_eq!(second.appended_results, 0);
        assert_eq!(second.appended_logs, 0);
        assert_eq!(second.skipped_duplicates, 5);
        assert_eq!(fs::read(&result_path).unwrap(), results_after_first);
        assert_eq!(fs::read(&log_path).unwrap(), logs_after_first);
    }

    #[test]
    fn duplicate_fragments_in_nested_dirs_yield_one_row() {
        let td = tempdir().unwrap();
        let artifacts = td.path().join("artifacts");
        write(
            &artifacts.join("job_0/log_a.tsv"),
            &format!("{LOG_HEADER}a\t2025-01-01 00:00:00\tsuccess\tNA\n"),
        );
        write(
            &artifacts.join("job_1/nested/log_a.tsv"),
            &format!("{LOG_HEADER}a\t2025-01-02 00:00:00\tfail\trun_busco\n"),
        );
        write(&artifacts.join("job_1/log_b.tsv.part"), "partial");

        let log_path = td.path().join("log.tsv");
        let report = aggregate(&artifacts, &td.path().join("result.tsv"), &log_path).unwrap();
        assert_eq!(report.log_fragments, 2);
        assert_eq!(report.appended_logs, 1);
        assert_eq!(report.skipped_duplicates, 1);
        assert_eq!(
            fs::read_to_string(&log_path).unwrap(),
            format!("{LOG_HEADER}a\t2025-01-01 00:00:00\tsuccess\tNA\n")
        );
    }

    #[test]
    fn malformed_fragment_is_skipped_and_rows_keep_existing_content() {
        let td = tempdir().unwrap();
        let artifacts = td.path().join("artifacts");
        write(&artifacts.join("log_bad.tsv"), "annotation_id\tresult\nbad\tfail\n");
        write(
            &artifacts.join("log_ok.tsv"),
            &format!("{LOG_HEADER}ok\t2025-01-01 00:00:00\tsuccess\tNA\n"),
        );
        let log_path = td.path().join("log.tsv");
        write(&log_path, &format!("{LOG_HEADER}old\t2024-01-01 00:00:00\tfail\trun_busco"));

        let report = aggregate(&artifacts, &td.path().join("result.tsv"), &log_path).unwrap();
        assert_eq!(report.existing_logs, 1);
        assert_eq!(report.skipped_malformed, 1);
        assert_eq!(report.appended_logs, 1);
        assert_eq!(
            fs::read_to_string(&log_path).unwrap(),
            format!(
                "{LOG_HEADER}old\t2024-01-01 00:00:00\tfail\trun_busco\nok\t2025-01-01 00:00:00\tsuccess\tNA\n"
            )
        );
    }

    #[test]
    fn failed_unit_is_logged_but_never_retried() {
        let td = tempdir().unwrap();
        let catalog_path = td.path().join("annotations.tsv");
        Catalog::from_units(["x", "y"].map(unit)).write(&catalog_path).unwrap();
        let artifacts = td.path().join("artifacts");
        let executor = scripted_executor(&["x"], &[]);
        executor.execute_to_fragments(&unit("x"), &artifacts).unwrap();

        let result_path = td.path().join("result.tsv");
        let log_path = td.path().join("log.tsv");
        aggregate(&artifacts, &result_path, &log_path).unwrap();

        assert!(Ledger::new(&result_path, RESULT_LEDGER)
            .load_ids()
            .unwrap()
            .is_empty());
        let log = fs::read_to_string(&log_path).unwrap();
        let x_rows: Vec<&str> = log.lines().filter(|l| l.starts_with("x\t")).collect();
        assert_eq!(x_rows.len(), 1);
        assert!(x_rows[0].ends_with("\tfail\trun_busco"));

        let (_, pending) = pending_from_paths(&catalog_path, &log_path).unwrap();
        assert_eq!(pending.ids, vec!["y"]);
    }
}
