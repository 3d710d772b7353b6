//! Incremental ClinVar synchronization.
//!
//! Both entry points bound their work with the `clinvar_checked` set: only
//! rsIDs never resolved against the current snapshot are looked up again,
//! and a source hash change invalidates the whole set.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;

use crate::clinvar::cache::read_cache_meta;
use crate::clinvar::{read_clinvar_file, ClinvarVariant, ReadOptions};
use crate::common::cancel::CancelToken;
use crate::common::io::sha256_file;
use crate::common::progress::{percent_of, RateMeter, SubRange};
use crate::db::{self, Store};
use crate::err::Error;

/// rsIDs processed per short transaction during a cache sync.
const SYNC_CHUNK: usize = 1_000;

/// Working-set inserts between progress reports.
const STAGE_REPORT_EVERY: usize = 500;

/// Provenance hash recorded for the built-in seed variants.
pub const SEED_SOURCE_HASH: &str = "builtin-seed-v1";

/// Why a sync finished without touching the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyImported,
    NoRsids,
    AlreadyChecked,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyImported => "already_imported",
            SkipReason::NoRsids => "no_rsids",
            SkipReason::AlreadyChecked => "already_checked",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one sync or snapshot import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Imported {
        file_hash_sha256: String,
        variant_count: u64,
    },
    Skipped {
        reason: SkipReason,
    },
}

/// Import high-confidence pathogenic variants from a ClinVar snapshot file.
///
/// With an `rsid_filter`, only filtered rsIDs are considered and every one
/// of them is marked checked afterwards, misses included, so the next sync
/// skips them. Batches of matches commit as they stream, but the
/// provenance row is written only once the whole file has been read.
pub fn import_clinvar_snapshot<P>(
    store: &Store,
    path: P,
    rsid_filter: Option<&HashSet<String>>,
    progress: Option<&mut dyn FnMut(u8, u64, f64)>,
    cancel: &CancelToken,
) -> Result<SyncOutcome, anyhow::Error>
where
    P: AsRef<Path>,
{
    if let Some(filter) = rsid_filter {
        if filter.is_empty() {
            return Ok(SyncOutcome::Skipped {
                reason: SkipReason::NoRsids,
            });
        }
    }

    let file_hash_sha256 = sha256_file(path.as_ref())?;
    let conn = store.connection();
    let same_hash = store
        .get_latest_clinvar_import()?
        .is_some_and(|latest| latest.file_hash_sha256 == file_hash_sha256);
    if !same_hash {
        // New source file, so previous lookup results no longer apply.
        db::clear_clinvar_checked(conn)?;
    }

    let needed: Option<HashSet<String>> = match rsid_filter {
        Some(filter) => {
            let checked = store.get_clinvar_checked_rsids()?;
            let needed: HashSet<String> = filter.difference(&checked).cloned().collect();
            if same_hash && needed.is_empty() {
                return Ok(SyncOutcome::Skipped {
                    reason: SkipReason::AlreadyImported,
                });
            }
            Some(needed)
        }
        None => {
            if same_hash {
                return Ok(SyncOutcome::Skipped {
                    reason: SkipReason::AlreadyImported,
                });
            }
            None
        }
    };

    let options = ReadOptions {
        rsid_filter: needed.as_ref(),
        pathogenic_only: true,
    };
    let mut batch: Vec<ClinvarVariant> = Vec::with_capacity(SYNC_CHUNK);
    let variant_count = {
        let mut on_variant = |variant: ClinvarVariant| -> Result<(), anyhow::Error> {
            batch.push(variant);
            if batch.len() >= SYNC_CHUNK {
                let tx = conn.unchecked_transaction()?;
                db::upsert_clinvar_variants(&tx, &batch)?;
                tx.commit()?;
                batch.clear();
            }
            Ok(())
        };
        read_clinvar_file(path.as_ref(), &options, &mut on_variant, progress, cancel)?
    };

    let tx = conn.unchecked_transaction()?;
    if !batch.is_empty() {
        db::upsert_clinvar_variants(&tx, &batch)?;
    }
    if let Some(needed) = &needed {
        db::mark_clinvar_checked(&tx, needed.iter().map(String::as_str))?;
    }
    db::add_clinvar_import(&tx, &file_hash_sha256, variant_count)?;
    tx.commit()?;

    tracing::info!(
        "ClinVar snapshot import done, {} variants merged",
        variant_count
    );
    Ok(SyncOutcome::Imported {
        file_hash_sha256,
        variant_count,
    })
}

/// Polls the cancel token and interrupts any running statement on the
/// watched connection once it fires.
struct InterruptWatcher {
    done: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl InterruptWatcher {
    fn spawn(conn: &Connection, cancel: &CancelToken) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let interrupt = conn.get_interrupt_handle();
        let cancel = cancel.clone();
        let thread_done = done.clone();
        let handle = std::thread::spawn(move || loop {
            if thread_done.load(Ordering::Relaxed) {
                break;
            }
            if cancel.is_cancelled() {
                interrupt.interrupt();
                break;
            }
            std::thread::sleep(Duration::from_millis(250));
        });
        Self {
            done,
            handle: Some(handle),
        }
    }
}

impl Drop for InterruptWatcher {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Detaches the cache database and drops the temp working set.
struct AttachGuard<'a> {
    conn: &'a Connection,
}

impl Drop for AttachGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .conn
            .execute_batch("DROP TABLE IF EXISTS sync_needed; DETACH DATABASE cache;");
    }
}

fn map_interrupt(err: anyhow::Error, cancel: &CancelToken) -> anyhow::Error {
    if cancel.is_cancelled() {
        if let Some(rusqlite::Error::SqliteFailure(e, _)) = err.downcast_ref::<rusqlite::Error>() {
            if e.code == rusqlite::ErrorCode::OperationInterrupted {
                return Error::Cancelled.into();
            }
        }
    }
    err
}

/// Synchronize a profile database against a prebuilt ClinVar cache.
///
/// Runs in two phases: staging the needed rsIDs into a temp working set
/// (0-20% of reported progress), then copying matches and marking rsIDs
/// checked chunk by chunk (20-95%), each chunk in its own short
/// transaction so partial progress survives a crash.
pub fn sync_from_cache<P>(
    store: &Store,
    cache_path: P,
    progress: Option<&mut dyn FnMut(u8, u64, f64)>,
    cancel: &CancelToken,
) -> Result<SyncOutcome, anyhow::Error>
where
    P: AsRef<Path>,
{
    let Some(meta) = read_cache_meta(cache_path.as_ref())? else {
        return Err(Error::Format(String::from(
            "ClinVar cache has no metadata; build it first",
        ))
        .into());
    };

    let profile_rsids = store.get_all_rsids()?;
    if profile_rsids.is_empty() {
        return Ok(SyncOutcome::Skipped {
            reason: SkipReason::NoRsids,
        });
    }

    let conn = store.connection();
    let same_hash = store
        .get_latest_clinvar_import()?
        .is_some_and(|latest| latest.file_hash_sha256 == meta.file_hash_sha256);
    if !same_hash {
        db::clear_clinvar_checked(conn)?;
    }
    let checked = store.get_clinvar_checked_rsids()?;
    let mut needed: Vec<String> = profile_rsids.difference(&checked).cloned().collect();
    if needed.is_empty() {
        return Ok(SyncOutcome::Skipped {
            reason: SkipReason::AlreadyChecked,
        });
    }
    needed.sort_unstable();

    let mut noop = |_percent: u8, _units: u64, _eta: f64| {};
    let outer: &mut dyn FnMut(u8, u64, f64) = match progress {
        Some(report) => report,
        None => &mut noop,
    };

    let _watcher = InterruptWatcher::spawn(conn, cancel);
    let cache_str = cache_path.as_ref().to_string_lossy().into_owned();
    conn.execute("ATTACH DATABASE ?1 AS cache", [cache_str])?;
    let _guard = AttachGuard { conn };

    let variant_count = run_sync_phases(conn, &needed, &mut *outer, cancel)
        .map_err(|err| map_interrupt(err, cancel))?;

    db::add_clinvar_import(conn, &meta.file_hash_sha256, variant_count)?;
    (*outer)(100, needed.len() as u64, 0.0);

    tracing::info!(
        "ClinVar cache sync done, {} of {} rsIDs matched",
        variant_count,
        needed.len()
    );
    Ok(SyncOutcome::Imported {
        file_hash_sha256: meta.file_hash_sha256,
        variant_count,
    })
}

fn run_sync_phases(
    conn: &Connection,
    needed: &[String],
    outer: &mut dyn FnMut(u8, u64, f64),
    cancel: &CancelToken,
) -> Result<u64, anyhow::Error> {
    let total = needed.len() as u64;

    // Phase A: stage the working set.
    {
        let mut sub = SubRange::new(&mut *outer, 0, 20);
        let meter = RateMeter::start();
        conn.execute_batch("CREATE TEMP TABLE sync_needed (rsid TEXT PRIMARY KEY)")?;
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt =
                tx.prepare_cached("INSERT OR IGNORE INTO sync_needed (rsid) VALUES (?1)")?;
            for (index, rsid) in needed.iter().enumerate() {
                cancel.check()?;
                stmt.execute([rsid.as_str()])?;
                if (index + 1) % STAGE_REPORT_EVERY == 0 {
                    let done = (index + 1) as u64;
                    sub.report(percent_of(done, total), done, meter.eta_seconds(done, total));
                }
            }
        }
        tx.commit()?;
        sub.report(100, total, 0.0);
    }

    // Phase B: copy matches and mark everything checked, chunk by chunk.
    let mut matched = 0u64;
    {
        let mut sub = SubRange::new(&mut *outer, 20, 95);
        let meter = RateMeter::start();
        let total_chunks = needed.len().div_ceil(SYNC_CHUNK);
        for chunk_index in 0..total_chunks {
            cancel.check()?;
            let offset = (chunk_index * SYNC_CHUNK) as i64;
            let tx = conn.unchecked_transaction()?;
            let copied = tx.execute(
                "INSERT OR REPLACE INTO main.clinvar_variants \
                     (rsid, chrom, pos, ref, alt, clinical_significance, review_status, \
                      conditions, last_evaluated) \
                 SELECT c.rsid, c.chrom, c.pos, c.ref, c.alt, c.clinical_significance, \
                        c.review_status, c.conditions, c.last_evaluated \
                 FROM cache.clinvar_variants c \
                 JOIN (SELECT rsid FROM sync_needed ORDER BY rsid LIMIT ?1 OFFSET ?2) n \
                   ON n.rsid = c.rsid",
                (SYNC_CHUNK as i64, offset),
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO main.clinvar_checked (rsid) \
                 SELECT rsid FROM sync_needed ORDER BY rsid LIMIT ?1 OFFSET ?2",
                (SYNC_CHUNK as i64, offset),
            )?;
            tx.commit()?;
            matched += copied as u64;

            let done = ((chunk_index + 1) * SYNC_CHUNK).min(needed.len()) as u64;
            sub.report(percent_of(done, total), done, meter.eta_seconds(done, total));
        }
    }

    Ok(matched)
}

/// Summary returned by [`seed_clinvar_if_missing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub seeded: bool,
    pub variant_count: u64,
}

/// Built-in fallback variants used before any snapshot has been imported.
pub fn seed_variants() -> Vec<ClinvarVariant> {
    let variant = |rsid: &str,
                   chrom: &str,
                   pos: i64,
                   reference: &str,
                   alternative: &str,
                   review_status: &str,
                   conditions: &str| ClinvarVariant {
        rsid: rsid.to_string(),
        chrom: chrom.to_string(),
        pos,
        reference: reference.to_string(),
        alternative: alternative.to_string(),
        clinical_significance: String::from("Pathogenic"),
        review_status: review_status.to_string(),
        conditions: conditions.to_string(),
        last_evaluated: String::new(),
    };
    vec![
        variant(
            "rs334",
            "11",
            5248232,
            "T",
            "A",
            "practice_guideline",
            "Sickle cell anemia",
        ),
        variant(
            "rs113993960",
            "7",
            117199644,
            "CTT",
            "C",
            "practice_guideline",
            "Cystic fibrosis",
        ),
        variant(
            "rs1800562",
            "6",
            26093141,
            "G",
            "A",
            "reviewed_by_expert_panel",
            "Hereditary hemochromatosis",
        ),
        variant(
            "rs6025",
            "1",
            169519049,
            "C",
            "T",
            "reviewed_by_expert_panel",
            "Thrombophilia due to factor V Leiden",
        ),
    ]
}

/// Load the built-in variant list when no ClinVar import has ever run.
///
/// Gives fresh installations a handful of well-known pathogenic variants
/// so lookups degrade gracefully before the first real snapshot import.
pub fn seed_clinvar_if_missing(store: &Store) -> Result<SeedSummary, anyhow::Error> {
    if store.get_latest_clinvar_import()?.is_some() {
        return Ok(SeedSummary {
            seeded: false,
            variant_count: 0,
        });
    }
    let variants = seed_variants();
    let conn = store.connection();
    let tx = conn.unchecked_transaction()?;
    db::upsert_clinvar_variants(&tx, &variants)?;
    db::add_clinvar_import(&tx, SEED_SOURCE_HASH, variants.len() as u64)?;
    tx.commit()?;
    tracing::info!("Seeded {} built-in ClinVar variants", variants.len());
    Ok(SeedSummary {
        seeded: true,
        variant_count: variants.len() as u64,
    })
}
