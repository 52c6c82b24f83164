//! Best-effort parsing of BUSCO `short_summary.*.txt` files.
//!
//! The summary is free text whose layout changes between BUSCO releases, so
//! every field is optional: a field whose pattern does not match keeps its
//! zero/empty default instead of failing the unit.

use busco_protocol::ResultRecord;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static LINEAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"lineage dataset is: (\S+)").expect("valid lineage regex"));
static COMPLETE_RE: LazyLock<Regex> = LazyLock::new(|| percent_regex('C'));
static SINGLE_RE: LazyLock<Regex> = LazyLock::new(|| percent_regex('S'));
static DUPLICATED_RE: LazyLock<Regex> = LazyLock::new(|| percent_regex('D'));
static FRAGMENTED_RE: LazyLock<Regex> = LazyLock::new(|| percent_regex('F'));
static MISSING_RE: LazyLock<Regex> = LazyLock::new(|| percent_regex('M'));
static COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+total BUSCO").expect("valid count regex"));

fn percent_regex(letter: char) -> Regex {
    Regex::new(&format!(r"{letter}:(\d+(?:\.\d+)?)%")).expect("valid percentage regex")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuscoSummary {
    pub lineage: String,
    pub busco_count: u64,
    pub complete: f64,
    pub single: f64,
    pub duplicated: f64,
    pub fragmented: f64,
    pub missing: f64,
}

impl BuscoSummary {
    pub fn into_record(self, id: &str) -> ResultRecord {
        ResultRecord {
            id: id.to_string(),
            lineage: self.lineage,
            busco_count: self.busco_count,
            complete: self.complete,
            single: self.single,
            duplicated: self.duplicated,
            fragmented: self.fragmented,
            missing: self.missing,
        }
    }
}

fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn percent(re: &Regex, text: &str) -> f64 {
    capture(re, text)
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0)
}

pub fn parse_summary(text: &str) -> BuscoSummary {
    BuscoSummary {
        lineage: capture(&LINEAGE_RE, text).unwrap_or_default().to_string(),
        busco_count: capture(&COUNT_RE, text)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0),
        complete: percent(&COMPLETE_RE, text),
        single: percent(&SINGLE_RE, text),
        duplicated: percent(&DUPLICATED_RE, text),
        fragmented: percent(&FRAGMENTED_RE, text),
        missing: percent(&MISSING_RE, text),
    }
}

/// First `short_summary.*.txt` (by name) directly inside `dir`.
pub fn find_summary_file(dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("short_summary.") && n.ends_with(".txt"))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SUMMARY: &str = "# BUSCO version is: 5.8.2
# The lineage dataset is: eukaryota_odb12 (Creation date: 2024-11-14, number of genomes: 1669, number of BUSCOs: 129)
# Summarized benchmarking in BUSCO notation for file proteins.faa
# BUSCO was run in mode: proteins

\t***** Results: *****

\tC:95.3%[S:94.6%,D:0.7%],F:2.3%,M:2.4%,n:129
\t123\tComplete BUSCOs (C)
\t122\tComplete and single-copy BUSCOs (S)
\t1\tComplete and duplicated BUSCOs (D)
\t3\tFragmented BUSCOs (F)
\t3\tMissing BUSCOs (M)
\t129\tTotal BUSCO groups searched
";

    #[test]
    fn parses_every_field() {
        let summary = parse_summary(SUMMARY);
        assert_eq!(summary.lineage, "eukaryota_odb12");
        assert_eq!(summary.busco_count, 129);
        assert_eq!(summary.complete, 95.3);
        assert_eq!(summary.single, 94.6);
        assert_eq!(summary.duplicated, 0.7);
        assert_eq!(summary.fragmented, 2.3);
        assert_eq!(summary.missing, 2.4);
    }

    #[test]
    fn absent_fields_default_to_zero() {
        let summary = parse_summary("C:88%[S:88%,D:0%]\nsomething else entirely\n");
        assert_eq!(summary.complete, 88.0);
        assert_eq!(summary.fragmented, 0.0);
        assert_eq!(summary.lineage, "");
        assert_eq!(summary.busco_count, 0);

        assert_eq!(parse_summary(""), BuscoSummary::default());
    }

    #[test]
    fn finds_summary_by_name() {
        let td = tempdir().unwrap();
        assert!(find_summary_file(td.path()).is_none());
        fs::write(td.path().join("short_summary.specific.eukaryota_odb12.busco_output.txt"), SUMMARY)
            .unwrap();
        fs::write(td.path().join("short_summary.json"), "{}").unwrap();
        let found = find_summary_file(td.path()).unwrap();
        assert!(found.to_string_lossy().ends_with(".busco_output.txt"));
    }
}
