//! Streaming reader for ClinVar VCF snapshots.

use std::path::Path;
use std::sync::atomic::Ordering;

use crate::clinvar::{
    is_high_confidence, is_pathogenic, ClinvarVariant, ReadOptions, BYTE_MILESTONE,
};
use crate::common::cancel::CancelToken;
use crate::common::io::open_tracked;
use crate::common::progress::{percent_of, RateMeter};
use crate::err::Error;

/// Parse a semicolon-delimited VCF `INFO` column into key/value pairs.
///
/// Flag entries without `=` map to an empty value.
fn parse_info(info: &str) -> Vec<(String, String)> {
    info.split(';')
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (item.to_string(), String::new()),
        })
        .collect()
}

fn info_get<'a>(info: &'a [(String, String)], key: &str) -> Option<&'a str> {
    info.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Stream a ClinVar VCF, emitting retained variants through `on_variant`.
///
/// Header lines are scanned for a GRCh38/hg38 assembly marker before any
/// variant is emitted; the whole file is rejected when one is found since
/// all stored genotypes are GRCh37.
pub fn read_vcf<P>(
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

        let trimmed = line.trim_end();
        if let Some(header) = trimmed.strip_prefix("##") {
            let lower = header.to_lowercase();
            if lower.contains("grch38") || lower.contains("hg38") {
                return Err(Error::Format(String::from(
                    "VCF header declares GRCh38; only GRCh37 snapshots are supported",
                ))
                .into());
            }
            continue;
        }
        if trimmed.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = trimmed.split('\t').collect();
        if parts.len() < 8 {
            continue;
        }
        let (chrom, pos, rsid, reference, alternative, info) =
            (parts[0], parts[1], parts[2], parts[3], parts[4], parts[7]);
        if !rsid.starts_with("rs") {
            continue;
        }
        let Ok(pos) = pos.parse::<i64>() else {
            continue;
        };
        if let Some(filter) = options.rsid_filter {
            if !filter.contains(rsid) {
                continue;
            }
        }

        let info = parse_info(info);
        let clinical_significance = info_get(&info, "CLNSIG").unwrap_or_default().to_string();
        let review_status = info_get(&info, "CLNREVSTAT").unwrap_or_default().to_string();
        if options.pathogenic_only
            && !(is_high_confidence(&review_status) && is_pathogenic(&clinical_significance))
        {
            continue;
        }

        let conditions = info_get(&info, "CLNDN")
            .filter(|v| !v.is_empty())
            .or_else(|| info_get(&info, "CLNDISDB").filter(|v| !v.is_empty()))
            .unwrap_or_default()
            .to_string();
        let last_evaluated = info_get(&info, "CLNDATE").unwrap_or_default().to_string();

        on_variant(ClinvarVariant {
            rsid: rsid.to_string(),
            chrom: chrom.to_string(),
            pos,
            reference: reference.to_string(),
            alternative: alternative.to_string(),
            clinical_significance,
            review_status,
            conditions,
            last_evaluated,
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
    use std::collections::HashSet;
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::*;

    const VCF: &str = "\
##fileformat=VCFv4.1\n\
##reference=GRCh37\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
1\t1001\trs100\tA\tG\t.\t.\tCLNSIG=Pathogenic;CLNREVSTAT=practice_guideline;CLNDN=Condition_A;CLNDATE=2024-01-01\n\
1\t1002\trs101\tC\tT\t.\t.\tCLNSIG=Benign;CLNREVSTAT=practice_guideline\n\
1\t1003\trs102\tG\tA\t.\t.\tCLNSIG=Pathogenic;CLNREVSTAT=criteria_provided,_single_submitter\n\
2\t2001\trs103\tT\tC\t.\t.\tCLNSIG=Likely_pathogenic;CLNREVSTAT=reviewed_by_expert_panel;CLNDISDB=MedGen:C123\n\
2\t2002\t12345\tT\tC\t.\t.\tCLNSIG=Pathogenic;CLNREVSTAT=practice_guideline\n\
3\tnotanumber\trs104\tA\tC\t.\t.\tCLNSIG=Pathogenic;CLNREVSTAT=practice_guideline\n\
";

    fn write_vcf(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("clinvar.vcf");
        std::fs::write(&path, contents).expect("write fixture");
        path
    }

    #[test]
    fn pathogenic_only_keeps_high_confidence_rows() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let path = write_vcf(&tmp_dir, VCF);

        let mut seen = Vec::new();
        let options = ReadOptions {
            pathogenic_only: true,
            ..Default::default()
        };
        let mut on_variant = |v: ClinvarVariant| -> Result<(), anyhow::Error> {
            seen.push(v);
            Ok(())
        };
        let emitted = read_vcf(&path, &options, &mut on_variant, None, &CancelToken::new())?;

        assert_eq!(emitted, 2);
        assert_eq!(seen[0].rsid, "rs100");
        assert_eq!(seen[0].conditions, "Condition_A");
        assert_eq!(seen[0].last_evaluated, "2024-01-01");
        // Falls back to CLNDISDB when CLNDN is absent.
        assert_eq!(seen[1].rsid, "rs103");
        assert_eq!(seen[1].conditions, "MedGen:C123");

        Ok(())
    }

    #[test]
    fn rsid_filter_restricts_rows() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let path = write_vcf(&tmp_dir, VCF);

        let filter: HashSet<String> = [String::from("rs101")].into();
        let options = ReadOptions {
            rsid_filter: Some(&filter),
            pathogenic_only: false,
        };
        let mut seen = Vec::new();
        let mut on_variant = |v: ClinvarVariant| -> Result<(), anyhow::Error> {
            seen.push(v.rsid);
            Ok(())
        };
        let emitted = read_vcf(&path, &options, &mut on_variant, None, &CancelToken::new())?;

        assert_eq!(emitted, 1);
        assert_eq!(seen, vec![String::from("rs101")]);

        Ok(())
    }

    #[test]
    fn grch38_header_is_rejected_before_any_row() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let path = write_vcf(
            &tmp_dir,
            "##reference=GRCh38\n\
             1\t1001\trs100\tA\tG\t.\t.\tCLNSIG=Pathogenic;CLNREVSTAT=practice_guideline\n",
        );

        let mut calls = 0u64;
        let mut on_variant = |_v: ClinvarVariant| -> Result<(), anyhow::Error> {
            calls += 1;
            Ok(())
        };
        let err = read_vcf(
            &path,
            &ReadOptions::default(),
            &mut on_variant,
            None,
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(err.to_string().contains("GRCh38"));
        assert_eq!(calls, 0);

        Ok(())
    }

    #[test]
    fn parse_info_handles_flags_and_values() {
        let info = parse_info("CLNSIG=Pathogenic;SOMATIC;CLNDN=A|B");
        assert_eq!(info_get(&info, "CLNSIG"), Some("Pathogenic"));
        assert_eq!(info_get(&info, "SOMATIC"), Some(""));
        assert_eq!(info_get(&info, "CLNDN"), Some("A|B"));
        assert_eq!(info_get(&info, "MISSING"), None);
    }
}
