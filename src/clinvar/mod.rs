//! ClinVar snapshot reading: VCF and `variant_summary.txt` formats, the
//! local cache, and incremental sync into a profile database.

pub mod cache;
pub mod summary;
pub mod sync;
pub mod vcf;

use std::collections::HashSet;
use std::path::Path;

use crate::common::cancel::CancelToken;
use crate::err::Error;

/// Byte interval between progress reports while streaming a snapshot.
pub const BYTE_MILESTONE: u64 = 512 * 1024;

/// One normalized ClinVar variant record.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClinvarVariant {
    pub rsid: String,
    pub chrom: String,
    pub pos: i64,
    pub reference: String,
    pub alternative: String,
    pub clinical_significance: String,
    pub review_status: String,
    pub conditions: String,
    pub last_evaluated: String,
}

/// Recognized ClinVar snapshot file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClinvarFormat {
    /// `clinvar.vcf[.gz]` as distributed on the ClinVar FTP site.
    Vcf,
    /// Tab-separated `variant_summary.txt[.gz]`.
    VariantSummary,
}

/// Decide which reader handles `path`.
///
/// `.vcf` anywhere in the file name selects the VCF reader. A `.txt` or
/// `.txt.gz` file must have a recognizable `variant_summary` header; a
/// file that has neither is rejected rather than guessed at.
pub fn detect_format<P>(path: P) -> Result<ClinvarFormat, anyhow::Error>
where
    P: AsRef<Path>,
{
    let name = path
        .as_ref()
        .file_name()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.contains(".vcf") {
        return Ok(ClinvarFormat::Vcf);
    }
    if name.ends_with(".txt") || name.ends_with(".txt.gz") {
        summary::sniff_header(path.as_ref())?;
        return Ok(ClinvarFormat::VariantSummary);
    }
    Err(Error::Format(format!(
        "unrecognized ClinVar file name {:?}; expected .vcf[.gz] or variant_summary .txt[.gz]",
        name
    ))
    .into())
}

/// Filters applied while streaming a snapshot.
#[derive(Debug, Default)]
pub struct ReadOptions<'a> {
    /// Only emit variants whose rsID is in this set.
    pub rsid_filter: Option<&'a HashSet<String>>,
    /// Only emit variants with a high-confidence pathogenic or likely
    /// pathogenic assertion.
    pub pathogenic_only: bool,
}

/// Stream a ClinVar snapshot, invoking `on_variant` for each retained record.
///
/// Returns the number of variants emitted. Format detection happens here so
/// callers never dispatch on file names themselves.
pub fn read_clinvar_file<P>(
    path: P,
    options: &ReadOptions<'_>,
    on_variant: &mut dyn FnMut(ClinvarVariant) -> Result<(), anyhow::Error>,
    progress: Option<&mut dyn FnMut(u8, u64, f64)>,
    cancel: &CancelToken,
) -> Result<u64, anyhow::Error>
where
    P: AsRef<Path>,
{
    match detect_format(path.as_ref())? {
        ClinvarFormat::Vcf => vcf::read_vcf(path, options, on_variant, progress, cancel),
        ClinvarFormat::VariantSummary => {
            summary::read_variant_summary(path, options, on_variant, progress, cancel)
        }
    }
}

/// Split a multi-valued ClinVar field on any of `|`, `,`, `;`, `/`.
pub fn split_values(raw: &str) -> Vec<String> {
    raw.split(['|', ',', ';', '/'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Lower-case a ClinVar label and join words with underscores.
pub fn norm_token(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}

const HIGH_CONFIDENCE_REVSTAT: [&str; 2] = ["practice_guideline", "reviewed_by_expert_panel"];
const PATHOGENIC_LABELS: [&str; 2] = ["pathogenic", "likely_pathogenic"];

/// Whether a review status string carries ClinVar's highest review tiers.
pub fn is_high_confidence(review_status: &str) -> bool {
    split_values(review_status)
        .iter()
        .any(|v| HIGH_CONFIDENCE_REVSTAT.contains(&norm_token(v).as_str()))
}

/// Whether a clinical significance string asserts pathogenicity.
///
/// A significance that mentions conflicting interpretations never counts,
/// regardless of which labels accompany it.
pub fn is_pathogenic(clinical_significance: &str) -> bool {
    let values: Vec<String> = split_values(clinical_significance)
        .iter()
        .map(|v| norm_token(v))
        .collect();
    if values
        .iter()
        .any(|v| v == "conflicting_interpretations_of_pathogenicity")
    {
        return false;
    }
    values
        .iter()
        .any(|v| PATHOGENIC_LABELS.contains(&v.as_str()))
}

/// Review confidence tiers derived from the ClinVar review status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Moderate,
    Low,
    Unknown,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Confidence::High => "high",
            Confidence::Moderate => "moderate",
            Confidence::Low => "low",
            Confidence::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Confidence tier plus conflict flag for one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Classification {
    pub confidence: Confidence,
    pub conflict: bool,
}

/// Grade a variant's review status and flag conflicting interpretations.
pub fn classify_clinvar(clinical_significance: &str, review_status: &str) -> Classification {
    let review = norm_token(review_status);
    let confidence = if review.contains("practice_guideline") || review.contains("expert_panel") {
        Confidence::High
    } else if review.contains("multiple_submitters") {
        Confidence::Moderate
    } else if review.contains("single_submitter") || review.contains("no_assertion") {
        Confidence::Low
    } else {
        Confidence::Unknown
    };
    let sig = norm_token(clinical_significance);
    let conflict =
        sig.contains("conflicting") || (review.contains("conflict") && !review.contains("no_conflicts"));
    Classification {
        confidence,
        conflict,
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Pathogenic|Likely_benign", vec!["Pathogenic", "Likely_benign"])]
    #[case("a, b; c/d", vec!["a", "b", "c", "d"])]
    #[case("", vec![])]
    #[case(" | , ", vec![])]
    fn split_values_cases(#[case] raw: &str, #[case] expected: Vec<&str>) {
        assert_eq!(split_values(raw), expected);
    }

    #[rstest]
    #[case("Practice Guideline", "practice_guideline")]
    #[case("  Reviewed by expert panel ", "reviewed_by_expert_panel")]
    fn norm_token_cases(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(norm_token(raw), expected);
    }

    #[rstest]
    #[case("practice_guideline", true)]
    #[case("reviewed_by_expert_panel", true)]
    #[case("criteria_provided,_multiple_submitters", false)]
    #[case("", false)]
    fn high_confidence_cases(#[case] review: &str, #[case] expected: bool) {
        assert_eq!(is_high_confidence(review), expected);
    }

    #[rstest]
    #[case("Pathogenic", true)]
    #[case("Likely_pathogenic", true)]
    #[case("Pathogenic/Likely_pathogenic", true)]
    #[case("Benign", false)]
    #[case("Conflicting_interpretations_of_pathogenicity|Pathogenic", false)]
    #[case("", false)]
    fn pathogenic_cases(#[case] sig: &str, #[case] expected: bool) {
        assert_eq!(is_pathogenic(sig), expected);
    }

    #[rstest]
    #[case("Pathogenic", "practice_guideline", Confidence::High, false)]
    #[case("Pathogenic", "reviewed_by_expert_panel", Confidence::High, false)]
    #[case(
        "Pathogenic",
        "criteria_provided,_multiple_submitters,_no_conflicts",
        Confidence::Moderate,
        false
    )]
    #[case(
        "Pathogenic",
        "criteria_provided,_single_submitter",
        Confidence::Low,
        false
    )]
    #[case("Pathogenic", "no_assertion_criteria_provided", Confidence::Low, false)]
    #[case("Pathogenic", "", Confidence::Unknown, false)]
    #[case(
        "Conflicting_interpretations_of_pathogenicity",
        "criteria_provided,_conflicting_interpretations",
        Confidence::Unknown,
        true
    )]
    fn classify_cases(
        #[case] sig: &str,
        #[case] review: &str,
        #[case] confidence: Confidence,
        #[case] conflict: bool,
    ) {
        let got = classify_clinvar(sig, review);
        assert_eq!(got.confidence, confidence);
        assert_eq!(got.conflict, conflict);
    }

    #[test]
    fn no_conflicts_suffix_is_not_a_conflict() {
        let got = classify_clinvar(
            "Pathogenic",
            "criteria_provided,_multiple_submitters,_no_conflicts",
        );
        assert!(!got.conflict);
    }

    #[test]
    fn detect_format_by_name() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let vcf = tmp_dir.path().join("clinvar.vcf.gz");
        std::fs::write(&vcf, b"")?;
        assert_eq!(detect_format(&vcf)?, ClinvarFormat::Vcf);

        let other = tmp_dir.path().join("snapshot.bin");
        std::fs::write(&other, b"")?;
        assert!(detect_format(&other).is_err());

        Ok(())
    }
}
