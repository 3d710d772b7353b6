//! Genotype import orchestration: provenance rows, raw-file retention,
//! staged genotype inserts, and insight generation in one pass.

pub mod guard;
pub mod vault;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::common::cancel::CancelToken;
use crate::common::io::sha256_file;
use crate::db::{self, ImportStatus, NewImport, Store};
use crate::err::is_cancelled;
use crate::genotypes::{parse_genotype_file, ParsedRecord, ParseStats, QcReport, PARSER_VERSION};
use crate::import::vault::{retain_raw_upload, Cipher};
use crate::insights::{self, KnowledgeModule};

/// Source tag recorded for every genotype import.
pub const GENOTYPE_SOURCE: &str = "ancestry";
/// Reference build the supported exports are called against.
pub const GENOME_BUILD: &str = "GRCh37";
/// Strand convention of the supported exports.
pub const STRAND: &str = "+";

/// Curated rows buffered between transaction-local inserts.
const CURATED_BATCH: usize = 500;
/// Full rows buffered between transaction-local inserts.
const FULL_BATCH: usize = 1_000;
/// Persisted error messages are cut off at this many characters.
const ERROR_MESSAGE_LIMIT: usize = 500;

/// Which genotype tables an import populates.
///
/// Curated keeps only knowledge-base rsIDs; full additionally retains every
/// marker of the export.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    clap::ValueEnum,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    #[default]
    Curated,
    Full,
}

/// Caller-side knobs of one import run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions<'a> {
    pub mode: ImportMode,
    pub zip_member: Option<&'a str>,
}

/// Provenance and outcome of one completed import.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ImportSummary {
    pub import_id: String,
    pub profile_id: String,
    pub source: String,
    pub file_hash_sha256: String,
    pub imported_at: String,
    pub parser_version: String,
    pub build: String,
    pub strand: String,
    pub qc_report: QcReport,
    pub insight_count: usize,
    pub kb_version: String,
    pub curated_mode: bool,
    pub full_mode: bool,
}

fn truncate_message(message: &str) -> String {
    message.chars().take(ERROR_MESSAGE_LIMIT).collect()
}

/// Parse the export and stage its rows inside one transaction.
///
/// A parse or insert error drops the transaction, so a failed import leaves
/// no partial genotype rows behind.
fn stage_genotypes(
    store: &mut Store,
    profile_id: &str,
    file_path: &Path,
    curated_set: &HashSet<String>,
    options: &ImportOptions<'_>,
    on_rows: Option<&mut dyn FnMut(u64)>,
    cancel: &CancelToken,
) -> Result<(ParseStats, HashMap<String, ParsedRecord>), anyhow::Error> {
    let tx = store.transaction()?;
    let full_mode = options.mode == ImportMode::Full;
    let mut curated_map: HashMap<String, ParsedRecord> = HashMap::new();
    let mut curated_batch: Vec<ParsedRecord> = Vec::with_capacity(CURATED_BATCH);
    let mut full_batch: Vec<ParsedRecord> = Vec::with_capacity(FULL_BATCH);

    let stats = {
        let mut on_record = |record: ParsedRecord| -> Result<(), anyhow::Error> {
            if curated_set.contains(&record.rsid) {
                curated_map.insert(record.rsid.clone(), record.clone());
                curated_batch.push(record.clone());
                if curated_batch.len() >= CURATED_BATCH {
                    db::insert_genotypes_curated(&tx, profile_id, &curated_batch)?;
                    curated_batch.clear();
                }
            }
            if full_mode {
                full_batch.push(record);
                if full_batch.len() >= FULL_BATCH {
                    db::insert_genotypes_full(&tx, profile_id, &full_batch)?;
                    full_batch.clear();
                }
            }
            Ok(())
        };
        parse_genotype_file(
            file_path,
            options.zip_member,
            &mut on_record,
            on_rows,
            None,
            cancel,
        )?
    };

    if !curated_batch.is_empty() {
        db::insert_genotypes_curated(&tx, profile_id, &curated_batch)?;
    }
    if !full_batch.is_empty() {
        db::insert_genotypes_full(&tx, profile_id, &full_batch)?;
    }
    tx.commit()?;

    Ok((stats, curated_map))
}

/// Run one genotype import end to end.
///
/// The import row is registered as `running` first, then the raw upload is
/// retained, rows are staged, and insights are evaluated; the row ends as
/// `ok`, `failed`, or `cancelled`.
#[allow(clippy::too_many_arguments)]
pub fn import_genotype_file(
    store: &mut Store,
    data_dir: &Path,
    profile_id: &str,
    file_path: &Path,
    modules: &[KnowledgeModule],
    kb_version: &str,
    opt_in_categories: &HashMap<String, bool>,
    options: &ImportOptions<'_>,
    cipher: &dyn Cipher,
    on_rows: Option<&mut dyn FnMut(u64)>,
    cancel: &CancelToken,
) -> Result<ImportSummary, anyhow::Error> {
    anyhow::ensure!(
        store.get_profile(profile_id)?.is_some(),
        "no profile with id {}",
        profile_id
    );
    if cipher.is_enabled() && !cipher.has_key() {
        anyhow::bail!("encryption is enabled but no key is loaded");
    }

    let file_hash_sha256 = sha256_file(file_path)?;
    let new_import = NewImport {
        profile_id,
        source: GENOTYPE_SOURCE,
        file_hash_sha256: &file_hash_sha256,
        parser_version: PARSER_VERSION,
        build: GENOME_BUILD,
        strand: STRAND,
        zip_member: options.zip_member,
    };
    let (import_id, imported_at) = store.add_import(&new_import, ImportStatus::Running)?;
    tracing::info!(
        "Import {} started for profile {} from {:?}",
        import_id,
        profile_id,
        file_path
    );

    if let Err(err) = retain_raw_upload(data_dir, &import_id, file_path, cipher) {
        store.update_import_status(
            &import_id,
            ImportStatus::Failed,
            Some(&truncate_message(&err.to_string())),
        )?;
        return Err(err);
    }

    let curated_set = insights::curated_rsids(modules);
    let (stats, curated_map) = match stage_genotypes(
        store,
        profile_id,
        file_path,
        &curated_set,
        options,
        on_rows,
        cancel,
    ) {
        Ok(staged) => staged,
        Err(err) => {
            let (status, message) = if is_cancelled(&err) {
                (ImportStatus::Cancelled, None)
            } else {
                (
                    ImportStatus::Failed,
                    Some(truncate_message(&err.to_string())),
                )
            };
            store.update_import_status(&import_id, status, message.as_deref())?;
            tracing::warn!("Import {} ended as {}: {}", import_id, status, err);
            return Err(err);
        }
    };

    let qc_report = QcReport::from(&stats);
    let mut results = insights::evaluate_modules(&curated_map, modules, opt_in_categories);
    results.push(insights::build_qc_result(&qc_report));
    store.store_insight_results(profile_id, &results, kb_version)?;
    store.update_import_status(&import_id, ImportStatus::Ok, None)?;
    tracing::info!(
        "Import {} finished: {} markers, {} insights",
        import_id,
        qc_report.total_markers,
        results.len()
    );

    Ok(ImportSummary {
        import_id,
        profile_id: profile_id.to_string(),
        source: String::from(GENOTYPE_SOURCE),
        file_hash_sha256,
        imported_at,
        parser_version: String::from(PARSER_VERSION),
        build: String::from(GENOME_BUILD),
        strand: String::from(STRAND),
        qc_report,
        insight_count: results.len(),
        kb_version: kb_version.to_string(),
        curated_mode: true,
        full_mode: options.mode == ImportMode::Full,
    })
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::import::vault::PassthroughCipher;
    use crate::insights::{EvidenceLevel, ModuleRule};

    const FIXTURE: &str = "\
#AncestryDNA raw data download
rs762551 15 75041917 C A
rs9939609 16 53820527 T T
rs4988235 2 136608646 0 0
";

    fn caffeine_module() -> KnowledgeModule {
        KnowledgeModule {
            module_id: String::from("caffeine"),
            category: String::from("lifestyle"),
            display_name: String::from("Caffeine metabolism"),
            rsids: vec![String::from("rs762551")],
            rules: vec![ModuleRule {
                rsid: String::from("rs762551"),
                genotypes: vec![String::from("AC"), String::from("CC")],
                summary: String::from("Slow metabolizer"),
            }],
            default_summary: String::from("No call for this marker"),
            suggestion: None,
            evidence_level: EvidenceLevel {
                grade: String::from("B"),
                summary: String::from("Replicated association"),
            },
            limitations: String::from("Lifestyle marker only"),
            references: vec![String::from("PMID:16522833")],
        }
    }

    fn write_fixture(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("export.txt");
        std::fs::write(&path, FIXTURE).expect("write fixture");
        path
    }

    #[test]
    fn curated_import_stores_rows_and_insights() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = write_fixture(&tmp_dir);
        let mut store = Store::open_in_memory()?;
        let profile = store.create_profile("Alice", None)?;

        let summary = import_genotype_file(
            &mut store,
            tmp_dir.path(),
            &profile.id,
            &file_path,
            &[caffeine_module()],
            "2026.1",
            &HashMap::new(),
            &ImportOptions::default(),
            &PassthroughCipher,
            None,
            &CancelToken::new(),
        )?;

        assert_eq!(summary.source, "ancestry");
        assert_eq!(summary.build, "GRCh37");
        assert_eq!(summary.qc_report.total_markers, 3);
        assert_eq!(summary.qc_report.missing_calls, 1);
        assert!(summary.curated_mode);
        assert!(!summary.full_mode);

        // Only the knowledge-base rsID lands in the curated table.
        let curated = store.get_curated_genotypes(&profile.id)?;
        assert_eq!(curated.len(), 1);
        assert_eq!(curated["rs762551"].genotype.as_deref(), Some("AC"));
        assert!(!store.has_full_genotypes(&profile.id)?);

        let import = store.get_latest_import(&profile.id)?.expect("import row");
        assert_eq!(import.id, summary.import_id);
        assert_eq!(import.status, ImportStatus::Ok);

        // Module result plus the QC pseudo-insight.
        let insights = store.get_latest_insights(&profile.id)?;
        assert_eq!(summary.insight_count, 2);
        assert_eq!(insights.len(), 2);
        assert!(insights
            .iter()
            .any(|result| result.summary == "Slow metabolizer"));
        assert!(insights.iter().any(|result| result.module_id == "qc_summary"));

        // The raw upload is retained under raw/ with its extension.
        let retained = tmp_dir
            .path()
            .join("raw")
            .join(format!("{}.txt", summary.import_id));
        assert!(retained.exists());

        Ok(())
    }

    #[test]
    fn full_mode_also_fills_the_full_table() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = write_fixture(&tmp_dir);
        let mut store = Store::open_in_memory()?;
        let profile = store.create_profile("Bob", None)?;

        let options = ImportOptions {
            mode: ImportMode::Full,
            zip_member: None,
        };
        let summary = import_genotype_file(
            &mut store,
            tmp_dir.path(),
            &profile.id,
            &file_path,
            &[caffeine_module()],
            "2026.1",
            &HashMap::new(),
            &options,
            &PassthroughCipher,
            None,
            &CancelToken::new(),
        )?;

        assert!(summary.full_mode);
        assert!(store.has_full_genotypes(&profile.id)?);
        assert_eq!(
            store.get_variant(&profile.id, "rs9939609")?.map(|r| r.pos),
            Some(53820527)
        );

        Ok(())
    }

    #[test]
    fn parse_failure_marks_the_import_failed() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = tmp_dir.path().join("export.zip");
        {
            use std::io::Write as _;
            let mut writer = zip::ZipWriter::new(std::fs::File::create(&file_path)?);
            writer.start_file("readme.md", zip::write::SimpleFileOptions::default())?;
            writer.write_all(b"no data")?;
            writer.finish()?;
        }
        let mut store = Store::open_in_memory()?;
        let profile = store.create_profile("Carol", None)?;

        let err = import_genotype_file(
            &mut store,
            tmp_dir.path(),
            &profile.id,
            &file_path,
            &[],
            "2026.1",
            &HashMap::new(),
            &ImportOptions::default(),
            &PassthroughCipher,
            None,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains(".txt"));

        let import = store.get_latest_import(&profile.id)?.expect("import row");
        assert_eq!(import.status, ImportStatus::Failed);
        assert!(import.error_message.expect("message").contains(".txt"));
        assert!(store.get_curated_genotypes(&profile.id)?.is_empty());

        Ok(())
    }

    #[test]
    fn cancellation_marks_the_import_cancelled() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = write_fixture(&tmp_dir);
        let mut store = Store::open_in_memory()?;
        let profile = store.create_profile("Dan", None)?;

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = import_genotype_file(
            &mut store,
            tmp_dir.path(),
            &profile.id,
            &file_path,
            &[caffeine_module()],
            "2026.1",
            &HashMap::new(),
            &ImportOptions::default(),
            &PassthroughCipher,
            None,
            &cancel,
        )
        .unwrap_err();
        assert!(crate::err::is_cancelled(&err));

        let import = store.get_latest_import(&profile.id)?.expect("import row");
        assert_eq!(import.status, ImportStatus::Cancelled);
        assert_eq!(import.error_message, None);
        assert!(store.get_curated_genotypes(&profile.id)?.is_empty());

        // A fresh attempt after cancellation goes through normally.
        let summary = import_genotype_file(
            &mut store,
            tmp_dir.path(),
            &profile.id,
            &file_path,
            &[caffeine_module()],
            "2026.1",
            &HashMap::new(),
            &ImportOptions::default(),
            &PassthroughCipher,
            None,
            &CancelToken::new(),
        )?;
        let latest = store.get_latest_import(&profile.id)?.expect("import row");
        assert_eq!(latest.id, summary.import_id);
        assert_eq!(latest.status, ImportStatus::Ok);
        assert!(!store.get_curated_genotypes(&profile.id)?.is_empty());

        Ok(())
    }

    #[test]
    fn enabled_cipher_without_key_fails_before_any_row() -> Result<(), anyhow::Error> {
        struct KeylessCipher;
        impl Cipher for KeylessCipher {
            fn is_enabled(&self) -> bool {
                true
            }
            fn has_key(&self) -> bool {
                false
            }
            fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
                Ok(data.to_vec())
            }
            fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
                Ok(data.to_vec())
            }
        }

        let tmp_dir = tempfile::tempdir()?;
        let file_path = write_fixture(&tmp_dir);
        let mut store = Store::open_in_memory()?;
        let profile = store.create_profile("Eve", None)?;

        let err = import_genotype_file(
            &mut store,
            tmp_dir.path(),
            &profile.id,
            &file_path,
            &[],
            "2026.1",
            &HashMap::new(),
            &ImportOptions::default(),
            &KeylessCipher,
            None,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no key is loaded"));

        // Refused before any provenance row was written.
        assert_eq!(store.get_latest_import(&profile.id)?, None);

        Ok(())
    }

    #[test]
    fn missing_profile_is_rejected() -> Result<(), anyhow::Error> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = write_fixture(&tmp_dir);
        let mut store = Store::open_in_memory()?;

        let err = import_genotype_file(
            &mut store,
            tmp_dir.path(),
            "missing",
            &file_path,
            &[],
            "2026.1",
            &HashMap::new(),
            &ImportOptions::default(),
            &PassthroughCipher,
            None,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no profile"));

        Ok(())
    }
}
