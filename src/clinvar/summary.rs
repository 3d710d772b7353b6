//! Streaming reader for tab-delimited ClinVar `variant_summary.txt` exports.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::Ordering;

use crate::clinvar::{
    is_high_confidence, is_pathogenic, ClinvarVariant, ReadOptions, BYTE_MILESTONE,
};
use crate::common::cancel::CancelToken;
use crate::common::io::{open_read_maybe_gz, open_tracked};
use crate::common::progress::{percent_of, RateMeter};
use crate::err::Error;

/// Column indexes resolved once from the header row.
///
/// Rows are split only up to `max_index`, which keeps very wide
/// `variant_summary` files cheap to scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumns {
    pub rsid: usize,
    pub clinical_significance: usize,
    pub review_status: usize,
    pub chrom: Option<usize>,
    pub pos: Option<usize>,
    pub reference: Option<usize>,
    pub alternative: Option<usize>,
    pub conditions: Option<usize>,
    pub last_evaluated: Option<usize>,
    pub assembly: Option<usize>,
    pub max_index: usize,
}

fn find_column(by_name: &HashMap<String, usize>, candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|name| by_name.get(*name).copied())
}

/// Resolve column positions from a `variant_summary` header line.
pub fn resolve_columns(header: &str) -> Result<ResolvedColumns, Error> {
    let by_name: HashMap<String, usize> = header
        .trim_end()
        .trim_start_matches('#')
        .split('\t')
        .enumerate()
        .map(|(index, name)| (name.trim().to_string(), index))
        .collect();

    let rsid = find_column(&by_name, &["RS# (dbSNP)", "RS#"]);
    let clinical_significance = find_column(&by_name, &["ClinicalSignificance"]);
    let review_status = find_column(&by_name, &["ReviewStatus"]);
    let (Some(rsid), Some(clinical_significance), Some(review_status)) =
        (rsid, clinical_significance, review_status)
    else {
        return Err(Error::Format(String::from(
            "variant_summary header lacks RS#, ClinicalSignificance, or ReviewStatus columns",
        )));
    };

    let chrom = find_column(&by_name, &["Chromosome"]);
    let pos = find_column(&by_name, &["PositionVCF", "Start"]);
    let reference = find_column(&by_name, &["ReferenceAlleleVCF", "ReferenceAllele"]);
    let alternative = find_column(&by_name, &["AlternateAlleleVCF", "AlternateAllele"]);
    let conditions = find_column(&by_name, &["PhenotypeList"]);
    let last_evaluated = find_column(&by_name, &["LastEvaluated"]);
    let assembly = find_column(&by_name, &["Assembly"]);

    let max_index = [
        Some(rsid),
        Some(clinical_significance),
        Some(review_status),
        chrom,
        pos,
        reference,
        alternative,
        conditions,
        last_evaluated,
        assembly,
    ]
    .into_iter()
    .flatten()
    .max()
    .unwrap_or(0);

    Ok(ResolvedColumns {
        rsid,
        clinical_significance,
        review_status,
        chrom,
        pos,
        reference,
        alternative,
        conditions,
        last_evaluated,
        assembly,
        max_index,
    })
}

/// Check that the first line of `path` is a resolvable header.
///
/// Used by format detection; a `.txt` file whose header does not resolve
/// is a hard error rather than a silent skip.
pub fn sniff_header<P>(path: P) -> Result<ResolvedColumns, anyhow::Error>
where
    P: AsRef<Path>,
{
    let mut reader = open_read_maybe_gz(path.as_ref())?;
    let mut header = String::new();
    reader.read_line(&mut header)?;
    Ok(resolve_columns(&header)?)
}

/// Accept `rs`-prefixed and bare numeric rsIDs; reject `-1`, empty, and
/// anything else.
fn normalize_rsid(raw: &str) -> Option<String> {
    if raw.is_empty() || raw == "-1" {
        return None;
    }
    if raw.starts_with("rs") {
        return Some(raw.to_string());
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("rs{}", raw));
    }
    None
}

/// Stream a `variant_summary` export, emitting retained rows through
/// `on_variant`.
///
/// Rows whose assembly column is neither empty nor GRCh37 are skipped
/// rather than rejected, since a single `variant_summary` file legitimately
/// interleaves rows for both assemblies.
pub fn read_variant_summary<P>(
    path: P,
    options: &ReadOptions<'_>,
    on_variant: &mut dyn FnMut(ClinvarVariant) -> Result<(), anyhow::Error>,
    mut progress: Option<&mut dyn FnMut(u8, u64, f64)>,
    cancel: &CancelToken,
) -> Result<u64, anyhow::Error>
where
    P: AsRef<Path>,
{
    let mut tracked = open_tracked(path.as_ref())?;
    let meter = RateMeter::start();
    let mut emitted = 0u64;
    let mut last_milestone = 0u64;

    let mut header = String::new();
    if tracked.reader.read_line(&mut header)? == 0 {
        return Err(Error::Format(String::from("variant_summary file is empty")).into());
    }
    let columns = resolve_columns(&header)?;

    let mut line = String::new();
    loop {
        line.clear();
        if tracked.reader.read_line(&mut line)? == 0 {
            break;
        }
        cancel.check()?;

        if let Some(report) = progress.as_deref_mut() {
            let offset = tracked.offset.load(Ordering::Relaxed);
            if offset - last_milestone >= BYTE_MILESTONE {
                last_milestone = offset;
                report(
                    percent_of(offset, tracked.total_bytes),
                    offset,
                    meter.eta_seconds(offset, tracked.total_bytes),
                );
            }
        }

        let fields: Vec<&str> = line
            .trim_end_matches(['\n', '\r'])
            .splitn(columns.max_index + 2, '\t')
            .collect();
        let field = |index: Option<usize>| -> &str {
            index.and_then(|i| fields.get(i).copied()).unwrap_or("").trim()
        };

        if let Some(assembly_index) = columns.assembly {
            let assembly = field(Some(assembly_index));
            if !(assembly.is_empty() || assembly.starts_with("GRCh37")) {
                continue;
            }
        }

        let Some(rsid) = normalize_rsid(field(Some(columns.rsid))) else {
            continue;
        };
        if let Some(filter) = options.rsid_filter {
            if !filter.contains(&rsid) {
                continue;
            }
        }

        let clinical_significance = field(Some(columns.clinical_significance)).to_string();
        let review_status = field(Some(columns.review_status)).to_string();
        if options.pathogenic_only
            && !(is_high_confidence(&review_status) && is_pathogenic(&clinical_significance))
        {
            continue;
        }

        let pos = field(columns.pos).parse::<i64>().unwrap_or(0);
        on_variant(ClinvarVariant {
            rsid,
            chrom: field(columns.chrom).to_string(),
            pos,
            reference: field(columns.reference).to_string(),
            alternative: field(columns.alternative).to_string(),
            clinical_significance,
            review_status,
            conditions: field(columns.conditions).to_string(),
            last_evaluated: field(columns.last_evaluated).to_string(),
        })?;
        emitted += 1;
    }

    if let Some(report) = progress.as_deref_mut() {
        let offset = tracked.offset.load(Ordering::Relaxed);
        report(100, offset, 0.0);
    }

    Ok(emitted)
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    const HEADER: &str = "#AlleleID\tType\tName\tGeneSymbol\tClinicalSignificance\tRS# (dbSNP)\tPhenotypeList\tAssembly\tChromosome\tPositionVCF\tReferenceAlleleVCF\tAlternateAlleleVCF\tReviewStatus\tLastEvaluated\n";

    fn write_summary(dir: &tempfile::TempDir, rows: &[&str]) -> PathBuf {
        let path = dir.path().join("variant_summary.txt");
        let mut contents = String::from(HEADER);
        for row in rows {
            contents.push_str(row);
            contents.push('\n');
        }
        std::fs::write(&path, contents).expect("write fixture");
        path
    }

    #[test]
    fn resolve_columns_finds_named_positions() -> Result<(), Error> {
        let columns = resolve_columns(HEADER)?;
        assert_eq!(columns.clinical_significance, 4);
        assert_eq!(columns.rsid, 5);
        assert_eq!(columns.review_status, 12);
        assert_eq!(columns.conditions, Some(6));
        assert_eq!(columns.assembly, Some(7));
        assert_eq!(columns.pos, Some(9));
        assert_eq!(columns.max_index, 13);
        Ok(())
    }

    #[test]
    fn resolve_columns_accepts_bare_rs_header() -> Result<(), Error> {
        let columns = resolve_columns("RS#\tClinicalSignificance\tReviewStatus\n")?;
        assert_eq!(columns.rsid, 0);
        assert_eq!(columns.clinical_significance, 1);
        assert_eq!(columns.review_status, 2);
        assert_eq!(columns.assembly, None);
        Ok(())
    }

    #[test]
    fn resolve_columns_rejects_headers_without_required_names() {
        let err = resolve_columns("Name\tGeneSymbol\tChromosome\n").unwrap_err();
        assert!(err.to_string().contains("header lacks"));
    }

    #[rstest]
    #[case("rs123", Some("rs123"))]
    #[case("123", Some("rs123"))]
    #[case("-1", None)]
    #[case("", None)]
    #[case("na", None)]
    fn normalize_rsid_cases(#[case] raw: &str, #[case] expected: Option<&str>) {
        assert_eq!(normalize_rsid(raw).as_deref(), expected);
    }

    #[test]
    fn grch38_rows_are_skipped_not_rejected() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let path = write_summary(
            &tmp_dir,
            &[
                "100\tSNV\tname\tGENE1\tPathogenic\t123\tCondition A\tGRCh37\t1\t1001\tA\tG\tpractice_guideline\t2024-01-01",
                "100\tSNV\tname\tGENE1\tPathogenic\t123\tCondition A\tGRCh38\t1\t2001\tA\tG\tpractice_guideline\t2024-01-01",
                "101\tSNV\tname\tGENE2\tPathogenic\t-1\tCondition B\tGRCh37\t2\t3001\tC\tT\treviewed by expert panel\t2024-02-02",
                "102\tSNV\tname\tGENE3\tBenign\t456\tCondition C\tGRCh37\t3\t4001\tG\tA\tpractice_guideline\t2024-03-03",
            ],
        );

        let mut seen = Vec::new();
        let options = ReadOptions {
            pathogenic_only: true,
            ..Default::default()
        };
        let mut on_variant = |v: ClinvarVariant| -> Result<(), anyhow::Error> {
            seen.push(v);
            Ok(())
        };
        let emitted =
            read_variant_summary(&path, &options, &mut on_variant, None, &CancelToken::new())?;

        // GRCh38 copy, missing rsID, and the benign row all drop out.
        assert_eq!(emitted, 1);
        assert_eq!(seen[0].rsid, "rs123");
        assert_eq!(seen[0].pos, 1001);
        assert_eq!(seen[0].conditions, "Condition A");

        Ok(())
    }

    #[test]
    fn sniff_header_accepts_valid_and_rejects_invalid() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let good = write_summary(&tmp_dir, &[]);
        assert!(sniff_header(&good).is_ok());

        let bad = tmp_dir.path().join("notes.txt");
        std::fs::write(&bad, "just some text\n")?;
        assert!(sniff_header(&bad).is_err());

        Ok(())
    }
}
