//! Consumer SNP chip export parsing: records, QC statistics, and the
//! streaming file parser.

pub mod parser;

pub use parser::{genotype_total_bytes, list_zip_txt_members, parse_genotype_file};

/// Version tag recorded in import provenance rows.
pub const PARSER_VERSION: &str = "1.0";

/// One normalized marker row from a raw genotype export.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ParsedRecord {
    pub rsid: String,
    pub chrom: String,
    pub pos: i64,
    /// Canonical genotype call; `None` for no-reads.
    pub genotype: Option<String>,
}

/// Aggregate statistics collected over one parse pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseStats {
    pub total_markers: u64,
    pub missing_calls: u64,
    pub duplicates: u64,
    pub malformed_rows: u64,
    pub warnings: Vec<String>,
    pub x_calls: u64,
    pub y_calls: u64,
}

impl ParseStats {
    /// Fraction of markers with a usable call; 0.0 for an empty file.
    pub fn call_rate(&self) -> f64 {
        if self.total_markers == 0 {
            0.0
        } else {
            (self.total_markers - self.missing_calls) as f64 / self.total_markers as f64
        }
    }

    /// Heuristic sex consistency check from X/Y call presence.
    pub fn sex_check(&self) -> String {
        if self.y_calls > 0 {
            String::from("Y markers present (XY pattern likely)")
        } else if self.x_calls > 0 {
            String::from("No Y markers detected (XX pattern likely)")
        } else {
            String::from("Insufficient X/Y data for a consistency check")
        }
    }
}

/// Per-import quality control report derived from [`ParseStats`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QcReport {
    pub total_markers: u64,
    pub missing_calls: u64,
    pub call_rate: f64,
    pub duplicates: u64,
    pub malformed_rows: u64,
    pub sex_check: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl From<&ParseStats> for QcReport {
    fn from(stats: &ParseStats) -> Self {
        Self {
            total_markers: stats.total_markers,
            missing_calls: stats.missing_calls,
            call_rate: stats.call_rate(),
            duplicates: stats.duplicates,
            malformed_rows: stats.malformed_rows,
            sex_check: stats.sex_check(),
            warnings: stats.warnings.clone(),
        }
    }
}
