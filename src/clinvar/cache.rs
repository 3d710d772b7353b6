//! Local ClinVar cache: a standalone SQLite file built once from a full
//! snapshot, then used to answer per-profile syncs without re-reading the
//! multi-gigabyte reference file.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::clinvar::{read_clinvar_file, ReadOptions};
use crate::common::cancel::CancelToken;
use crate::common::io::sha256_file;
use crate::db::{self, utc_now_iso};

/// Default file name of the cache inside the data directory.
pub const CLINVAR_CACHE_FILENAME: &str = "clinvar_cache.sqlite3";

/// Rows buffered between upserts while building the cache.
const CACHE_BATCH: usize = 5_000;

/// Metadata row describing a built cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMeta {
    pub file_hash_sha256: String,
    pub variant_count: i64,
    pub source_path: String,
    pub built_at: String,
}

/// Result of one cache build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheBuildSummary {
    pub file_hash_sha256: String,
    pub variant_count: u64,
    pub output_path: PathBuf,
}

fn cache_ddl(conn: &Connection) -> Result<(), anyhow::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS clinvar_variants (
             rsid TEXT PRIMARY KEY,
             chrom TEXT NOT NULL,
             pos INTEGER NOT NULL,
             ref TEXT NOT NULL,
             alt TEXT NOT NULL,
             clinical_significance TEXT,
             review_status TEXT,
             conditions TEXT,
             last_evaluated TEXT
         );

         CREATE TABLE IF NOT EXISTS clinvar_cache_meta (
             id INTEGER PRIMARY KEY CHECK (id = 1),
             file_hash_sha256 TEXT NOT NULL,
             variant_count INTEGER NOT NULL,
             source_path TEXT NOT NULL,
             built_at TEXT NOT NULL
         );",
    )?;
    Ok(())
}

/// Build (or rebuild) the cache at `output` from the snapshot at `input`.
///
/// All retained rows and the metadata row are written in one transaction,
/// so a failed or cancelled build leaves any previous cache untouched.
pub fn build_clinvar_cache<P, Q>(
    input: P,
    output: Q,
    progress: Option<&mut dyn FnMut(u8, u64, f64)>,
    cancel: &CancelToken,
) -> Result<CacheBuildSummary, anyhow::Error>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let file_hash_sha256 = sha256_file(input.as_ref())?;
    if let Some(parent) = output.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut conn = Connection::open(output.as_ref())?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
    cache_ddl(&conn)?;

    let tx = conn.transaction()?;
    tx.execute("DELETE FROM clinvar_variants", [])?;
    tx.execute("DELETE FROM clinvar_cache_meta", [])?;

    let mut batch = Vec::with_capacity(CACHE_BATCH);
    let variant_count = {
        let mut on_variant = |variant: crate::clinvar::ClinvarVariant| -> Result<(), anyhow::Error> {
            batch.push(variant);
            if batch.len() >= CACHE_BATCH {
                db::upsert_clinvar_variants(&tx, &batch)?;
                batch.clear();
            }
            Ok(())
        };
        read_clinvar_file(
            input.as_ref(),
            &ReadOptions::default(),
            &mut on_variant,
            progress,
            cancel,
        )?
    };
    if !batch.is_empty() {
        db::upsert_clinvar_variants(&tx, &batch)?;
    }

    tx.execute(
        "INSERT INTO clinvar_cache_meta (id, file_hash_sha256, variant_count, source_path, built_at) \
         VALUES (1, ?1, ?2, ?3, ?4)",
        (
            &file_hash_sha256,
            variant_count as i64,
            input.as_ref().to_string_lossy(),
            utc_now_iso(),
        ),
    )?;
    tx.commit()?;

    tracing::info!(
        "ClinVar cache built with {} variants at {:?}",
        variant_count,
        output.as_ref()
    );
    Ok(CacheBuildSummary {
        file_hash_sha256,
        variant_count,
        output_path: output.as_ref().to_path_buf(),
    })
}

/// Read the metadata row of a cache file, `None` when the file does not
/// exist or was never fully built.
pub fn read_cache_meta<P>(path: P) -> Result<Option<CacheMeta>, anyhow::Error>
where
    P: AsRef<Path>,
{
    if !path.as_ref().exists() {
        return Ok(None);
    }
    let conn = Connection::open_with_flags(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let meta = conn
        .query_row(
            "SELECT file_hash_sha256, variant_count, source_path, built_at \
             FROM clinvar_cache_meta WHERE id = 1",
            [],
            |row| {
                Ok(CacheMeta {
                    file_hash_sha256: row.get(0)?,
                    variant_count: row.get(1)?,
                    source_path: row.get(2)?,
                    built_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(meta)
}
