//! The unit catalog (`annotations.tsv`): one row per genome annotation with
//! the URLs of its annotation and assembly files.

use crate::error::{BatchError, Result};
use crate::ledger::{header_index, read_records};
use busco_protocol::{CATALOG_COLUMNS, ID_COLUMN, Unit};
use csv::WriterBuilder;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;

/// Units of one trigger, keyed (and therefore ordered) by id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    units: BTreeMap<String, Unit>,
}

impl Catalog {
    pub fn from_units(units: impl IntoIterator<Item = Unit>) -> Self {
        Self {
            units: units.into_iter().map(|u| (u.id.clone(), u)).collect(),
        }
    }

    /// Loads a catalog TSV.
    ///
    /// A missing file is [`BatchError::CatalogMissing`]; a zero-byte or
    /// header-only file is an empty catalog. Files without a header are read
    /// positionally as `id, annotation_url, assembly_url`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BatchError::CatalogMissing {
                path: path.to_path_buf(),
            });
        }
        let records = read_records(path)?;
        let Some(first) = records.first() else {
            return Ok(Self::default());
        };

        let (indices, skip) = match header_index(first, ID_COLUMN) {
            Some(id_idx) => {
                let column = |name: &str| first.iter().position(|cell| cell.trim() == name);
                (
                    [Some(id_idx), column(CATALOG_COLUMNS[1]), column(CATALOG_COLUMNS[2])],
                    1,
                )
            }
            None => ([Some(0), Some(1), Some(2)], 0),
        };
        if indices[1].is_none() && indices[2].is_none() {
            return Err(BatchError::MalformedCatalog {
                path: path.to_path_buf(),
                reason: format!(
                    "header names neither '{}' nor '{}'",
                    CATALOG_COLUMNS[1], CATALOG_COLUMNS[2]
                ),
            });
        }

        let cell = |record: &csv::StringRecord, idx: Option<usize>| -> String {
            idx.and_then(|i| record.get(i))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };

        let mut units = BTreeMap::new();
        for record in records.iter().skip(skip) {
            let id = cell(record, indices[0]);
            if id.is_empty() {
                continue;
            }
            let unit = Unit {
                id: id.clone(),
                annotation_url: cell(record, indices[1]),
                assembly_url: cell(record, indices[2]),
            };
            if units.insert(id.clone(), unit).is_some() {
                tracing::warn!("Catalog '{}' lists '{id}' more than once; keeping the last row", path.display());
            }
        }
        Ok(Self { units })
    }

    /// Writes the catalog with its header, replacing any existing file.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(BatchError::io(parent, "create directory"))?;
            }
        }
        let file = File::create(path).map_err(BatchError::io(path, "create"))?;
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(file);
        writer
            .write_record(CATALOG_COLUMNS)
            .map_err(BatchError::ledger(path, "write header of"))?;
        for unit in self.units.values() {
            writer
                .write_record(unit.to_row())
                .map_err(BatchError::ledger(path, "write"))?;
        }
        writer.flush().map_err(BatchError::io(path, "flush"))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Unit> {
        self.units.get(id)
    }

    /// Ids in lexicographic order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }
}
