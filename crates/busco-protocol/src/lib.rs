//! Record types and ledger schemas shared by the busco-batch planner, chunk
//! workers and the fragment aggregator.
//!
//! Everything here is plain data. The two ledgers are tab-separated files
//! whose first row is the header listed in [`RESULT_LEDGER`] and
//! [`LOG_LEDGER`]; the first column of both is the unit id.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Column holding the unit id in the catalog and in both ledgers.
pub const ID_COLUMN: &str = "annotation_id";

/// `step` value written for units that completed every stage.
pub const NO_STEP: &str = "NA";

/// Timestamp layout of the `run_at` column.
pub const RUN_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fixed column layout of one tab-separated ledger or fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSchema {
    pub name: &'static str,
    pub fragment_prefix: &'static str,
    pub columns: &'static [&'static str],
}

impl LedgerSchema {
    pub fn id_column(&self) -> &'static str {
        self.columns[0]
    }

    /// File name of the fragment one unit writes for this ledger.
    ///
    /// The id is percent-encoded (see [`encode_file_component`]) so the
    /// fragment always lands directly in the artifact directory. The id
    /// itself is read back from the row, never from the name.
    pub fn fragment_file_name(&self, unit_id: &str) -> String {
        format!(
            "{}{}.tsv",
            self.fragment_prefix,
            encode_file_component(unit_id)
        )
    }

    pub fn is_fragment_file_name(&self, file_name: &str) -> bool {
        file_name.starts_with(self.fragment_prefix) && file_name.ends_with(".tsv")
    }
}

/// Encodes every byte outside `[A-Za-z0-9._-]` as `%XX`, so path
/// separators, `..` segments and NUL cannot survive into a file name.
/// Distinct ids stay distinct because `%` itself is encoded.
pub fn encode_file_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-') {
            out.push(byte as char);
        } else if byte == b'.' && !out.ends_with('.') {
            out.push('.');
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

pub const RESULT_LEDGER: LedgerSchema = LedgerSchema {
    name: "result",
    fragment_prefix: "result_",
    columns: &[
        ID_COLUMN,
        "lineage",
        "busco_count",
        "complete",
        "single",
        "duplicated",
        "fragmented",
        "missing",
    ],
};

pub const LOG_LEDGER: LedgerSchema = LedgerSchema {
    name: "log",
    fragment_prefix: "log_",
    columns: &[ID_COLUMN, "run_at", "result", "step"],
};

pub const CATALOG_COLUMNS: &[&str] = &[ID_COLUMN, "annotation_url", "assembly_url"];

/// One analysis unit: a genome annotation and the assembly it refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    pub annotation_url: String,
    pub assembly_url: String,
}

impl Unit {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.annotation_url.clone(),
            self.assembly_url.clone(),
        ]
    }
}

/// Completeness figures for one successfully analysed unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    pub lineage: String,
    pub busco_count: u64,
    pub complete: f64,
    pub single: f64,
    pub duplicated: f64,
    pub fragmented: f64,
    pub missing: f64,
}

impl ResultRecord {
    /// Row in [`RESULT_LEDGER`] column order.
    ///
    /// Percentages use the shortest round-tripping representation with a
    /// mandatory fractional part (`0.0`, `95.2`).
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.lineage.clone(),
            self.busco_count.to_string(),
            format!("{:?}", self.complete),
            format!("{:?}", self.single),
            format!("{:?}", self.duplicated),
            format!("{:?}", self.fragmented),
            format!("{:?}", self.missing),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Fail,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "success" => Ok(Self::Success),
            "fail" => Ok(Self::Fail),
            other => Err(format!("Unknown outcome '{other}', expected 'success' or 'fail'")),
        }
    }
}

/// One attempt of one unit, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    pub run_at: String,
    pub outcome: Outcome,
    pub step: String,
}

impl LogRecord {
    pub fn success(id: &str, run_at: &str) -> Self {
        Self {
            id: id.to_string(),
            run_at: run_at.to_string(),
            outcome: Outcome::Success,
            step: NO_STEP.to_string(),
        }
    }

    pub fn failure(id: &str, run_at: &str, step: &str) -> Self {
        Self {
            id: id.to_string(),
            run_at: run_at.to_string(),
            outcome: Outcome::Fail,
            step: step.to_string(),
        }
    }

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.run_at.clone(),
            self.outcome.to_string(),
            self.step.clone(),
        ]
    }
}

/// Answer to "how many parallel jobs should this trigger start".
///
/// `chunk_indices` is always `0..chunk_count`; it is spelled out because CI
/// matrix generators consume it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixPlan {
    pub chunk_count: usize,
    pub chunk_indices: Vec<usize>,
    pub pending_count: usize,
    pub scheduled_count: usize,
    pub deferred_count: usize,
}

impl MatrixPlan {
    pub fn empty() -> Self {
        Self {
            chunk_count: 0,
            chunk_indices: vec![],
            pending_count: 0,
            scheduled_count: 0,
            deferred_count: 0,
        }
    }

    /// The `matrix` value as a compact JSON array, e.g. `[0,1,2]`.
    pub fn matrix_json(&self) -> String {
        serde_json::to_string(&self.chunk_indices).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_row_keeps_fractional_zero() {
        let record = ResultRecord {
            id: "GCF_1".to_string(),
            lineage: "eukaryota_odb12".to_string(),
            busco_count: 129,
            complete: 95.3,
            single: 94.1,
            duplicated: 1.2,
            fragmented: 0.0,
            missing: 4.7,
        };
        assert_eq!(
            record.to_row(),
            vec!["GCF_1", "eukaryota_odb12", "129", "95.3", "94.1", "1.2", "0.0", "4.7"]
        );
    }

    #[test]
    fn outcome_parses_only_known_values() {
        assert_eq!("success".parse::<Outcome>().unwrap(), Outcome::Success);
        assert_eq!(" fail ".parse::<Outcome>().unwrap(), Outcome::Fail);
        assert!("skipped".parse::<Outcome>().is_err());
    }

    #[test]
    fn fragment_names_follow_schema_prefix() {
        assert_eq!(RESULT_LEDGER.fragment_file_name("x"), "result_x.tsv");
        assert_eq!(LOG_LEDGER.fragment_file_name("x"), "log_x.tsv");
        assert!(LOG_LEDGER.is_fragment_file_name("log_x.tsv"));
        assert!(!LOG_LEDGER.is_fragment_file_name("result_x.tsv"));
        assert!(!RESULT_LEDGER.is_fragment_file_name("result_x.tsv.part"));
    }

    #[test]
    fn fragment_names_never_leave_the_directory() {
        assert_eq!(
            LOG_LEDGER.fragment_file_name("GCF_000001405.40"),
            "log_GCF_000001405.40.tsv"
        );
        assert_eq!(LOG_LEDGER.fragment_file_name("GCF_1/v2"), "log_GCF_1%2Fv2.tsv");
        let escaping = RESULT_LEDGER.fragment_file_name("../../etc/x");
        assert!(!escaping.contains('/'));
        assert!(!escaping.contains(".."));
        assert!(RESULT_LEDGER.is_fragment_file_name(&escaping));
        assert_ne!(
            encode_file_component("a%2Fb"),
            encode_file_component("a/b")
        );
        assert_eq!(encode_file_component("a\\b\0"), "a%5Cb%00");
    }

    #[test]
    fn empty_plan_serializes_empty_matrix() {
        let plan = MatrixPlan::empty();
        assert_eq!(plan.matrix_json(), "[]");
        assert_eq!(plan.chunk_count, 0);
    }
}
