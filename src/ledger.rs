//! Tab-separated ledger and fragment I/O.
//!
//! A ledger is append-only: rows are never rewritten or reordered, new rows
//! are appended after the last line. A fragment is a ledger in miniature
//! (header plus at most one row) written once by one unit's execution.

use crate::error::{BatchError, Result};
use busco_protocol::LedgerSchema;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub type LedgerRow = Vec<String>;

/// Reads every record of a tab-separated file without interpreting a header.
pub(crate) fn read_records(path: &Path) -> Result<Vec<StringRecord>> {
    let file = File::open(path).map_err(BatchError::io(path, "open"))?;
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_reader(file);
    let mut records = vec![];
    for record in reader.records() {
        records.push(record.map_err(BatchError::ledger(path, "read"))?);
    }
    Ok(records)
}

/// Column index of `column` when the first record is a header naming it.
///
/// Returns `None` for headerless legacy files, whose first column is the id.
pub(crate) fn header_index(first: &StringRecord, column: &str) -> Option<usize> {
    if first.get(0).map(str::trim) != Some(column) {
        return None;
    }
    first.iter().position(|cell| cell.trim() == column)
}

fn tsv_writer<W: Write>(inner: W) -> csv::Writer<W> {
    WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(inner)
}

fn part_path(path: &Path) -> PathBuf {
    let mut tmp_os: OsString = path.as_os_str().to_os_string();
    tmp_os.push(".part");
    PathBuf::from(tmp_os)
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(BatchError::io(parent, "create directory"))?;
        }
    }
    Ok(())
}

/// One of the two shared ledgers.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    schema: LedgerSchema,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>, schema: LedgerSchema) -> Self {
        Self {
            path: path.into(),
            schema,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &LedgerSchema {
        &self.schema
    }

    /// Ids already recorded. An absent or empty ledger has none.
    pub fn load_ids(&self) -> Result<BTreeSet<String>> {
        if !self.path.exists() {
            return Ok(BTreeSet::new());
        }
        let records = read_records(&self.path)?;
        let Some(first) = records.first() else {
            return Ok(BTreeSet::new());
        };
        let (id_idx, skip) = match header_index(first, self.schema.id_column()) {
            Some(idx) => (idx, 1),
            None => {
                tracing::debug!(
                    "{} ledger '{}' has no header; reading ids from the first column",
                    self.schema.name,
                    self.path.display()
                );
                (0, 0)
            }
        };
        Ok(records
            .iter()
            .skip(skip)
            .filter_map(|record| record.get(id_idx))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    /// Writes the header row when the ledger does not exist yet (or is a
    /// zero-byte file). Returns whether a header was written.
    pub fn ensure_header(&self) -> Result<bool> {
        let needs_header = match fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };
        if !needs_header {
            return Ok(false);
        }
        create_parent_dir(&self.path)?;
        let file = File::create(&self.path).map_err(BatchError::io(&self.path, "create"))?;
        let mut writer = tsv_writer(file);
        writer
            .write_record(self.schema.columns)
            .map_err(BatchError::ledger(&self.path, "write header of"))?;
        writer
            .flush()
            .map_err(BatchError::io(&self.path, "flush"))?;
        Ok(true)
    }

    /// Appends rows after the existing content. Existing rows are untouched.
    pub fn append_rows(&self, rows: &[LedgerRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(BatchError::io(&self.path, "open for append"))?;
        if !ends_with_newline(&mut file).map_err(BatchError::io(&self.path, "inspect"))? {
            file.write_all(b"\n")
                .map_err(BatchError::io(&self.path, "append to"))?;
        }
        let mut writer = tsv_writer(file);
        for row in rows {
            writer
                .write_record(row)
                .map_err(BatchError::ledger(&self.path, "append to"))?;
        }
        writer
            .flush()
            .map_err(BatchError::io(&self.path, "flush"))?;
        Ok(())
    }
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Writes a fragment: the schema header plus `row` when one is given.
///
/// The file appears under its final name only once complete, so a worker
/// killed mid-write leaves at most a `.part` file the aggregator ignores.
pub fn write_fragment(path: &Path, schema: &LedgerSchema, row: Option<&[String]>) -> Result<()> {
    create_parent_dir(path)?;
    let tmp_path = part_path(path);
    let file = File::create(&tmp_path).map_err(BatchError::io(&tmp_path, "create"))?;
    let mut writer = tsv_writer(file);
    writer
        .write_record(schema.columns)
        .map_err(BatchError::ledger(&tmp_path, "write header of"))?;
    if let Some(row) = row {
        writer
            .write_record(row)
            .map_err(BatchError::ledger(&tmp_path, "write"))?;
    }
    writer.flush().map_err(BatchError::io(&tmp_path, "flush"))?;
    drop(writer);
    fs::rename(&tmp_path, path).map_err(BatchError::io(path, "finalize"))?;
    Ok(())
}

/// Reads the data rows of a fragment, reordered to the schema's columns.
///
/// A header that lacks any schema column makes the whole fragment malformed;
/// individual rows too short to hold every column, or without an id, are
/// dropped.
pub fn read_fragment(path: &Path, schema: &LedgerSchema) -> Result<Vec<LedgerRow>> {
    let records = read_records(path)?;
    let Some(header) = records.first() else {
        return Ok(vec![]);
    };
    let mut indices = Vec::with_capacity(schema.columns.len());
    let mut missing = vec![];
    for column in schema.columns {
        match header.iter().position(|cell| cell.trim() == *column) {
            Some(idx) => indices.push(idx),
            None => missing.push(*column),
        }
    }
    if !missing.is_empty() {
        return Err(BatchError::MalformedFragment {
            path: path.to_path_buf(),
            reason: format!("missing column(s) {}", missing.join(", ")),
        });
    }

    let mut rows = vec![];
    for record in records.iter().skip(1) {
        let row: Option<LedgerRow> = indices
            .iter()
            .map(|idx| record.get(*idx).map(ToString::to_string))
            .collect();
        let Some(mut row) = row else {
            continue;
        };
        row[0] = row[0].trim().to_string();
        if row[0].is_empty() {
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}
