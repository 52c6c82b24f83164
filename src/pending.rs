//! Which catalog units still need an attempt.
//!
//! A unit is done as soon as the Log Ledger holds a row for it, whatever the
//! outcome. Failed units stay out of the pending set until their log row is
//! removed by hand.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::ledger::Ledger;
use busco_protocol::LOG_LEDGER;
use std::collections::BTreeSet;
use std::path::Path;

/// Snapshot of the pending computation for one trigger.
#[derive(Debug, Clone, Default)]
pub struct PendingSet {
    pub catalog_count: usize,
    pub logged_count: usize,
    /// Pending ids in lexicographic order.
    pub ids: Vec<String>,
}

impl PendingSet {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// `catalog ids − logged ids`, sorted.
pub fn resolve_pending(catalog: &Catalog, logged: &BTreeSet<String>) -> PendingSet {
    let ids: Vec<String> = catalog
        .ids()
        .filter(|id| !logged.contains(*id))
        .map(ToString::to_string)
        .collect();
    PendingSet {
        catalog_count: catalog.len(),
        logged_count: logged.len(),
        ids,
    }
}

/// Loads the catalog and Log Ledger from disk and resolves the pending set.
///
/// A missing Log Ledger counts as empty; a missing catalog is fatal.
pub fn pending_from_paths(catalog_path: &Path, log_path: &Path) -> Result<(Catalog, PendingSet)> {
    let catalog = Catalog::load(catalog_path)?;
    let logged = Ledger::new(log_path, LOG_LEDGER).load_ids()?;
    let pending = resolve_pending(&catalog, &logged);
    tracing::info!(
        "Catalog: {} units, already logged: {}, pending: {}",
        pending.catalog_count,
        pending.logged_count,
        pending.len()
    );
    Ok((catalog, pending))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchError;
    use busco_protocol::Unit;
    use std::fs;
    use tempfile::tempdir;

    fn catalog(ids: &[&str]) -> Catalog {
        Catalog::from_units(ids.iter().map(|id| Unit {
            id: id.to_string(),
            annotation_url: format!("https://x/{id}.gff.gz"),
            assembly_url: format!("https://x/{id}.fna.gz"),
        }))
    }

    #[test]
    fn empty_log_means_everything_pending() {
        let pending = resolve_pending(&catalog(&["c", "a", "b"]), &BTreeSet::new());
        assert_eq!(pending.ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn logged_ids_are_excluded_regardless_of_outcome() {
        let td = tempdir().unwrap();
        let catalog_path = td.path().join("annotations.tsv");
        let log_path = td.path().join("log.tsv");
        catalog(&["a", "b", "c"]).write(&catalog_path).unwrap();
        fs::write(
            &log_path,
            "annotation_id\trun_at\tresult\tstep\n\
             a\tt\tsuccess\tNA\n\
             c\tt\tfail\trun_busco\n\
             zz\tt\tsuccess\tNA\n",
        )
        .unwrap();

        let (_, pending) = pending_from_paths(&catalog_path, &log_path).unwrap();
        assert_eq!(pending.ids, vec!["b"]);
        assert_eq!(pending.catalog_count, 3);
        assert_eq!(pending.logged_count, 3);
    }

    #[test]
    fn missing_log_ledger_is_empty() {
        let td = tempdir().unwrap();
        let catalog_path = td.path().join("annotations.tsv");
        catalog(&["a"]).write(&catalog_path).unwrap();
        let (_, pending) =
            pending_from_paths(&catalog_path, &td.path().join("absent.tsv")).unwrap();
        assert_eq!(pending.ids, vec!["a"]);
    }

    #[test]
    fn missing_catalog_is_distinct_from_empty_catalog() {
        let td = tempdir().unwrap();
        let log_path = td.path().join("log.tsv");
        let err = pending_from_paths(&td.path().join("absent.tsv"), &log_path).unwrap_err();
        assert!(matches!(err, BatchError::CatalogMissing { .. }));

        let empty = td.path().join("annotations.tsv");
        fs::write(&empty, "annotation_id\tannotation_url\tassembly_url\n").unwrap();
        let (catalog, pending) = pending_from_paths(&empty, &log_path).unwrap();
        assert!(catalog.is_empty());
        assert!(pending.is_empty());
    }

    #[test]
    fn once_logged_an_id_never_returns() {
        let catalog = catalog(&["a", "b", "c", "d"]);
        let mut logged = BTreeSet::new();
        let mut previous = resolve_pending(&catalog, &logged).ids;
        for id in ["c", "a", "d", "b"] {
            logged.insert(id.to_string());
            let now = resolve_pending(&catalog, &logged).ids;
            assert!(!now.contains(&id.to_string()));
            assert!(now.iter().all(|p| previous.contains(p)));
            previous = now;
        }
        assert!(previous.is_empty());
    }
}
