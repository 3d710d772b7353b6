//! Streaming parser for AncestryDNA-style raw genotype exports, plain text
//! or zip-wrapped.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::common::cancel::CancelToken;
use crate::common::{canonical_genotype, normalize_chrom};
use crate::err::Error;

use super::{ParsedRecord, ParseStats};

/// Byte-offset progress cadence over the decoded text.
const BYTE_MILESTONE: u64 = 256 * 1024;
/// Row-count progress cadence.
const ROW_MILESTONE: u64 = 10_000;
/// Vendor-token sniffing stops after this many leading lines.
const HEADER_SCAN_LINES: u64 = 20;

/// Allele values that mean "no read" before canonicalization.
const NO_READ_ALLELES: [&str; 3] = ["0", "-", "--"];

fn is_zip(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

fn txt_members<R: std::io::Read + std::io::Seek>(archive: &zip::ZipArchive<R>) -> Vec<String> {
    archive
        .file_names()
        .filter(|name| name.to_lowercase().ends_with(".txt"))
        .map(str::to_owned)
        .collect()
}

/// List the `.txt` members of a zip upload, for caller-side member choice.
pub fn list_zip_txt_members(path: &Path) -> Result<Vec<String>, anyhow::Error> {
    let archive = zip::ZipArchive::new(File::open(path)?)?;
    Ok(txt_members(&archive))
}

fn select_member(members: &[String], requested: Option<&str>) -> Result<String, Error> {
    if members.is_empty() {
        return Err(Error::Format(String::from(
            "zip file does not contain a .txt raw data export",
        )));
    }
    match requested {
        Some(member) => Ok(member.to_owned()),
        None if members.len() == 1 => Ok(members[0].clone()),
        None => Err(Error::Format(String::from(
            "zip file contains multiple .txt files; choose one",
        ))),
    }
}

/// Uncompressed size of the genotype text stream, used as a progress
/// denominator. Returns 0 when it cannot be determined.
pub fn genotype_total_bytes(path: &Path, member: Option<&str>) -> u64 {
    if is_zip(path) {
        let Ok(file) = File::open(path) else {
            return 0;
        };
        let Ok(mut archive) = zip::ZipArchive::new(file) else {
            return 0;
        };
        let members = txt_members(&archive);
        let Ok(member) = select_member(&members, member) else {
            return 0;
        };
        archive
            .by_name(&member)
            .map(|entry| entry.size())
            .unwrap_or(0)
    } else {
        std::fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
    }
}

/// Parse a raw genotype export from disk.
///
/// Zip uploads must contain exactly one `.txt` member or the caller must
/// name one; empty/ambiguous archives fail before any row is read.
pub fn parse_genotype_file(
    path: &Path,
    zip_member: Option<&str>,
    on_record: &mut dyn FnMut(ParsedRecord) -> Result<(), anyhow::Error>,
    on_rows: Option<&mut dyn FnMut(u64)>,
    on_bytes: Option<&mut dyn FnMut(u64)>,
    cancel: &CancelToken,
) -> Result<ParseStats, anyhow::Error> {
    if is_zip(path) {
        let mut archive = zip::ZipArchive::new(File::open(path)?)?;
        let members = txt_members(&archive);
        let member = select_member(&members, zip_member)?;
        let entry = archive.by_name(&member)?;
        parse_genotype_stream(BufReader::new(entry), on_record, on_rows, on_bytes, cancel)
    } else {
        let reader = BufReader::new(File::open(path)?);
        parse_genotype_stream(reader, on_record, on_rows, on_bytes, cancel)
    }
}

/// Parse an already-opened genotype text stream.
///
/// Records are delivered in file order through `on_record`. `on_rows` fires
/// every 10_000 markers and once at the end; `on_bytes` fires at 256 KiB
/// deltas of decoded text and once at the end. Cancellation is checked once
/// per line.
pub fn parse_genotype_stream<R: BufRead>(
    mut reader: R,
    on_record: &mut dyn FnMut(ParsedRecord) -> Result<(), anyhow::Error>,
    mut on_rows: Option<&mut dyn FnMut(u64)>,
    mut on_bytes: Option<&mut dyn FnMut(u64)>,
    cancel: &CancelToken,
) -> Result<ParseStats, anyhow::Error> {
    let mut stats = ParseStats::default();
    let mut seen_rsids: HashSet<String> = HashSet::new();
    let mut header_checked = false;
    let mut header_has_vendor = false;

    let mut bytes_read = 0u64;
    let mut line = String::new();
    let mut line_number = 0u64;
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        line_number += 1;
        cancel.check()?;

        if let Some(cb) = on_bytes.as_deref_mut() {
            bytes_read += line.len() as u64;
            if bytes_read % BYTE_MILESTONE < line.len() as u64 {
                cb(bytes_read);
            }
        }

        if line.starts_with('#') {
            if !header_checked && line.to_lowercase().contains("ancestry") {
                header_has_vendor = true;
            }
            if line_number > HEADER_SCAN_LINES {
                header_checked = true;
            }
            continue;
        }
        if !header_checked && line_number > HEADER_SCAN_LINES {
            header_checked = true;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            stats.malformed_rows += 1;
            continue;
        }
        let (rsid, chrom_raw, pos_raw) = (parts[0], parts[1], parts[2]);
        let Ok(pos) = pos_raw.parse::<i64>() else {
            stats.malformed_rows += 1;
            continue;
        };

        let chrom = normalize_chrom(chrom_raw);
        let allele1 = parts[3].trim().to_uppercase();
        let allele2 = parts[4].trim().to_uppercase();
        let genotype = if NO_READ_ALLELES.contains(&allele1.as_str())
            || NO_READ_ALLELES.contains(&allele2.as_str())
        {
            None
        } else {
            canonical_genotype(&format!("{}{}", allele1, allele2))
        };

        if !seen_rsids.insert(rsid.to_owned()) {
            stats.duplicates += 1;
        }

        stats.total_markers += 1;
        match &genotype {
            None => stats.missing_calls += 1,
            Some(_) => {
                if chrom == "X" {
                    stats.x_calls += 1;
                } else if chrom == "Y" {
                    stats.y_calls += 1;
                }
            }
        }

        on_record(ParsedRecord {
            rsid: rsid.to_owned(),
            chrom,
            pos,
            genotype,
        })?;

        if stats.total_markers % ROW_MILESTONE == 0 {
            if let Some(cb) = on_rows.as_deref_mut() {
                cb(stats.total_markers);
            }
        }
    }

    if let Some(cb) = on_rows.as_deref_mut() {
        cb(stats.total_markers);
    }
    if let Some(cb) = on_bytes.as_deref_mut() {
        cb(bytes_read);
    }
    if !header_has_vendor {
        stats.warnings.push(String::from(
            "Header does not mention AncestryDNA; verify file source.",
        ));
    }
    Ok(stats)
}

#[cfg(test)]
mod test {
    use std::io::Write as _;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::genotypes::QcReport;

    const FIXTURE: &str = "\
#AncestryDNA raw data download
#rsid\tchromosome\tposition\tallele1\tallele2
rs1001 1 101 A G
rs1002 1 102 C T
rs1002 1 102 T C
rs1003 23 103 G G
rs1004 24 104 0 0
badrow 1
rs1005 25 105 T T
";

    fn collect(input: &str) -> Result<(Vec<ParsedRecord>, ParseStats), anyhow::Error> {
        let mut records = Vec::new();
        let mut on_record = |record: ParsedRecord| -> Result<(), anyhow::Error> {
            records.push(record);
            Ok(())
        };
        let stats = parse_genotype_stream(
            std::io::Cursor::new(input),
            &mut on_record,
            None,
            None,
            &CancelToken::new(),
        )?;
        Ok((records, stats))
    }

    #[test]
    fn six_marker_fixture_accounting() -> Result<(), anyhow::Error> {
        let (records, stats) = collect(FIXTURE)?;
        assert_eq!(stats.total_markers, 6);
        assert_eq!(stats.malformed_rows, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.missing_calls, 1);
        assert!((stats.call_rate() - 5.0 / 6.0).abs() < 1e-9);
        assert!(stats.warnings.is_empty());

        assert_eq!(records.len(), 6);
        assert_eq!(
            records[0],
            ParsedRecord {
                rsid: String::from("rs1001"),
                chrom: String::from("1"),
                pos: 101,
                genotype: Some(String::from("AG")),
            }
        );
        // Allele order does not matter.
        assert_eq!(records[1].genotype, records[2].genotype);
        // Numeric 23/24/25 normalize to X/Y/MT.
        assert_eq!(records[3].chrom, "X");
        assert_eq!(records[4].chrom, "Y");
        assert_eq!(records[5].chrom, "MT");
        // "0" alleles are no-reads.
        assert_eq!(records[4].genotype, None);

        let qc = QcReport::from(&stats);
        assert_eq!(qc.sex_check, "No Y markers detected (XX pattern likely)");
        Ok(())
    }

    #[test]
    fn vendor_warning_when_header_missing() -> Result<(), anyhow::Error> {
        let (_, stats) = collect("# generic export\nrs1 1 1 A A\n")?;
        assert_eq!(
            stats.warnings,
            vec![String::from(
                "Header does not mention AncestryDNA; verify file source."
            )]
        );
        Ok(())
    }

    #[test]
    fn byte_callback_reports_final_offset() -> Result<(), anyhow::Error> {
        let input = "rs1 1 1 A A\n";
        let mut last = 0u64;
        let mut on_bytes = |bytes: u64| last = bytes;
        let mut on_record = |_record: ParsedRecord| -> Result<(), anyhow::Error> { Ok(()) };
        parse_genotype_stream(
            std::io::Cursor::new(input),
            &mut on_record,
            None,
            Some(&mut on_bytes),
            &CancelToken::new(),
        )?;
        assert_eq!(last, input.len() as u64);
        Ok(())
    }

    #[test]
    fn cancellation_mid_stream() {
        let cancel = CancelToken::new();
        let mut seen = 0u64;
        {
            let mut on_record = |_record: ParsedRecord| -> Result<(), anyhow::Error> {
                seen += 1;
                if seen == 2 {
                    cancel.cancel();
                }
                Ok(())
            };
            let err = parse_genotype_stream(
                std::io::Cursor::new("rs1 1 1 A A\nrs2 1 2 C C\nrs3 1 3 G G\n"),
                &mut on_record,
                None,
                None,
                &cancel,
            )
            .unwrap_err();
            assert!(crate::err::is_cancelled(&err));
        }
        assert_eq!(seen, 2);
    }

    fn write_zip(path: &std::path::Path, members: &[(&str, &str)]) -> Result<(), anyhow::Error> {
        let file = File::create(path)?;
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in members {
            writer.start_file(*name, zip::write::SimpleFileOptions::default())?;
            writer.write_all(contents.as_bytes())?;
        }
        writer.finish()?;
        Ok(())
    }

    #[test]
    fn zip_single_member_parses() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("export.zip");
        write_zip(&path, &[("AncestryDNA.txt", FIXTURE)])?;

        assert_eq!(
            list_zip_txt_members(&path)?,
            vec![String::from("AncestryDNA.txt")]
        );
        assert_eq!(genotype_total_bytes(&path, None), FIXTURE.len() as u64);

        let mut count = 0u64;
        let mut on_record = |_record: ParsedRecord| -> Result<(), anyhow::Error> {
            count += 1;
            Ok(())
        };
        let stats =
            parse_genotype_file(&path, None, &mut on_record, None, None, &CancelToken::new())?;
        assert_eq!(stats.total_markers, 6);
        assert_eq!(count, 6);
        Ok(())
    }

    #[test]
    fn zip_without_txt_member_is_a_format_error() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("export.zip");
        write_zip(&path, &[("readme.md", "no data here")])?;

        let mut on_record = |_record: ParsedRecord| -> Result<(), anyhow::Error> { Ok(()) };
        let err = parse_genotype_file(&path, None, &mut on_record, None, None, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Format(_))
        ));
        Ok(())
    }

    #[test]
    fn zip_with_multiple_txt_members_requires_a_choice() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("export.zip");
        write_zip(&path, &[("a.txt", "rs1 1 1 A A\n"), ("b.txt", FIXTURE)])?;

        let mut on_record = |_record: ParsedRecord| -> Result<(), anyhow::Error> { Ok(()) };
        let err = parse_genotype_file(&path, None, &mut on_record, None, None, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Format(_))
        ));

        let stats = parse_genotype_file(
            &path,
            Some("b.txt"),
            &mut on_record,
            None,
            None,
            &CancelToken::new(),
        )?;
        assert_eq!(stats.total_markers, 6);
        Ok(())
    }
}
