//! SQLite persistence: profiles, genotype tables, import provenance,
//! ClinVar variants, and stored insight results.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use chrono::SecondsFormat;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, ToSql, Transaction};

use crate::clinvar::ClinvarVariant;
use crate::genotypes::ParsedRecord;
use crate::insights::InsightResult;

/// Current `PRAGMA user_version`; migrations run up to this value.
pub const SCHEMA_VERSION: i64 = 4;

/// Current UTC time as an RFC 3339 string with second precision.
pub fn utc_now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Fresh random identifier for database rows.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Lifecycle state of a genotype import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Running,
    Ok,
    Failed,
    Cancelled,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Running => "running",
            ImportStatus::Ok => "ok",
            ImportStatus::Failed => "failed",
            ImportStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ImportStatus {
    type Err = crate::err::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ImportStatus::Running),
            "ok" => Ok(ImportStatus::Ok),
            "failed" => Ok(ImportStatus::Failed),
            "cancelled" => Ok(ImportStatus::Cancelled),
            _ => Err(crate::err::Error::Format(format!(
                "unknown import status {:?}",
                s
            ))),
        }
    }
}

impl FromSql for ImportStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for ImportStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

/// One stored user profile.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    pub notes: Option<String>,
    pub created_at: String,
    pub encryption_enabled: bool,
}

/// Profile plus the timestamp of its most recent import, for listings.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProfileListing {
    #[serde(flatten)]
    pub profile: Profile,
    pub last_imported_at: Option<String>,
}

/// Provenance row for one genotype import.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ImportRecord {
    pub id: String,
    pub profile_id: String,
    pub source: String,
    pub file_hash_sha256: String,
    pub imported_at: String,
    pub parser_version: String,
    pub build: String,
    pub strand: String,
    pub status: ImportStatus,
    pub error_message: Option<String>,
    pub zip_member: Option<String>,
}

/// Fields supplied when registering a new genotype import.
#[derive(Debug, Clone)]
pub struct NewImport<'a> {
    pub profile_id: &'a str,
    pub source: &'a str,
    pub file_hash_sha256: &'a str,
    pub parser_version: &'a str,
    pub build: &'a str,
    pub strand: &'a str,
    pub zip_member: Option<&'a str>,
}

/// Provenance row for one ClinVar snapshot import.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClinvarImportRecord {
    pub id: String,
    pub file_hash_sha256: String,
    pub imported_at: String,
    pub variant_count: i64,
}

/// Join row between a profile's genotypes and stored ClinVar variants.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClinvarMatch {
    pub rsid: String,
    pub genotype: Option<String>,
    pub clinical_significance: String,
    pub review_status: String,
}

/// Handle to the profile database.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating and migrating if needed) the database at `db_path`.
    pub fn open<P>(db_path: P) -> Result<Self, anyhow::Error>
    where
        P: AsRef<Path>,
    {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::debug!("Opening database {:?}", db_path.as_ref());
        let conn = Connection::open(db_path.as_ref())?;
        configure(&conn)?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory database with the full schema, for tests.
    pub fn open_in_memory() -> Result<Self, anyhow::Error> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn transaction(&mut self) -> Result<Transaction<'_>, anyhow::Error> {
        Ok(self.conn.transaction()?)
    }

    pub fn create_profile(
        &self,
        display_name: &str,
        notes: Option<&str>,
    ) -> Result<Profile, anyhow::Error> {
        let profile = Profile {
            id: new_id(),
            display_name: display_name.to_string(),
            notes: notes.map(String::from),
            created_at: utc_now_iso(),
            encryption_enabled: false,
        };
        self.conn.execute(
            "INSERT INTO profiles (id, display_name, notes, created_at, encryption_enabled) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                &profile.id,
                &profile.display_name,
                &profile.notes,
                &profile.created_at,
                profile.encryption_enabled,
            ),
        )?;
        Ok(profile)
    }

    pub fn list_profiles(&self) -> Result<Vec<ProfileListing>, anyhow::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.display_name, p.notes, p.created_at, p.encryption_enabled, \
                    MAX(i.imported_at) AS last_imported_at \
             FROM profiles p \
             LEFT JOIN imports i ON i.profile_id = p.id \
             GROUP BY p.id \
             ORDER BY p.created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ProfileListing {
                profile: Profile {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    notes: row.get(2)?,
                    created_at: row.get(3)?,
                    encryption_enabled: row.get(4)?,
                },
                last_imported_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn get_profile(&self, profile_id: &str) -> Result<Option<Profile>, anyhow::Error> {
        let profile = self
            .conn
            .query_row(
                "SELECT id, display_name, notes, created_at, encryption_enabled \
                 FROM profiles WHERE id = ?1",
                [profile_id],
                |row| {
                    Ok(Profile {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        notes: row.get(2)?,
                        created_at: row.get(3)?,
                        encryption_enabled: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }

    pub fn rename_profile(&self, profile_id: &str, new_name: &str) -> Result<(), anyhow::Error> {
        let changed = self.conn.execute(
            "UPDATE profiles SET display_name = ?1 WHERE id = ?2",
            (new_name, profile_id),
        )?;
        anyhow::ensure!(changed == 1, "no profile with id {}", profile_id);
        Ok(())
    }

    /// Delete a profile and all rows referencing it, in one transaction.
    pub fn delete_profile(&mut self, profile_id: &str) -> Result<(), anyhow::Error> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM genotypes_curated WHERE profile_id = ?1",
            [profile_id],
        )?;
        tx.execute(
            "DELETE FROM genotypes_full WHERE profile_id = ?1",
            [profile_id],
        )?;
        tx.execute(
            "DELETE FROM insight_results WHERE profile_id = ?1",
            [profile_id],
        )?;
        tx.execute("DELETE FROM imports WHERE profile_id = ?1", [profile_id])?;
        let changed = tx.execute("DELETE FROM profiles WHERE id = ?1", [profile_id])?;
        anyhow::ensure!(changed == 1, "no profile with id {}", profile_id);
        tx.commit()?;
        Ok(())
    }

    /// Register a genotype import, returning its id and timestamp.
    pub fn add_import(
        &self,
        import: &NewImport<'_>,
        status: ImportStatus,
    ) -> Result<(String, String), anyhow::Error> {
        let import_id = new_id();
        let imported_at = utc_now_iso();
        self.conn.execute(
            "INSERT INTO imports (id, profile_id, source, file_hash_sha256, imported_at, \
                                  parser_version, build, strand, status, error_message, zip_member) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10)",
            (
                &import_id,
                import.profile_id,
                import.source,
                import.file_hash_sha256,
                &imported_at,
                import.parser_version,
                import.build,
                import.strand,
                status,
                import.zip_member,
            ),
        )?;
        Ok((import_id, imported_at))
    }

    pub fn update_import_status(
        &self,
        import_id: &str,
        status: ImportStatus,
        error_message: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        self.conn.execute(
            "UPDATE imports SET status = ?1, error_message = ?2 WHERE id = ?3",
            (status, error_message, import_id),
        )?;
        Ok(())
    }

    pub fn get_latest_import(
        &self,
        profile_id: &str,
    ) -> Result<Option<ImportRecord>, anyhow::Error> {
        self.latest_import_where(profile_id, "")
    }

    /// Latest import that finished with status `ok`.
    pub fn get_latest_completed_import(
        &self,
        profile_id: &str,
    ) -> Result<Option<ImportRecord>, anyhow::Error> {
        self.latest_import_where(profile_id, "AND status = 'ok' ")
    }

    fn latest_import_where(
        &self,
        profile_id: &str,
        extra: &str,
    ) -> Result<Option<ImportRecord>, anyhow::Error> {
        let sql = format!(
            "SELECT id, profile_id, source, file_hash_sha256, imported_at, parser_version, \
                    build, strand, status, error_message, zip_member \
             FROM imports WHERE profile_id = ?1 {}ORDER BY imported_at DESC LIMIT 1",
            extra
        );
        let record = self
            .conn
            .query_row(&sql, [profile_id], |row| {
                Ok(ImportRecord {
                    id: row.get(0)?,
                    profile_id: row.get(1)?,
                    source: row.get(2)?,
                    file_hash_sha256: row.get(3)?,
                    imported_at: row.get(4)?,
                    parser_version: row.get(5)?,
                    build: row.get(6)?,
                    strand: row.get(7)?,
                    status: row.get(8)?,
                    error_message: row.get(9)?,
                    zip_member: row.get(10)?,
                })
            })
            .optional()?;
        Ok(record)
    }

    /// All curated genotype rows of a profile, keyed by rsID.
    pub fn get_curated_genotypes(
        &self,
        profile_id: &str,
    ) -> Result<HashMap<String, ParsedRecord>, anyhow::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT rsid, chrom, pos, genotype FROM genotypes_curated WHERE profile_id = ?1",
        )?;
        let rows = stmt.query_map([profile_id], |row| {
            Ok(ParsedRecord {
                rsid: row.get(0)?,
                chrom: row.get(1)?,
                pos: row.get(2)?,
                genotype: row.get(3)?,
            })
        })?;
        let mut result = HashMap::new();
        for row in rows {
            let record = row?;
            result.insert(record.rsid.clone(), record);
        }
        Ok(result)
    }

    /// Look up one rsID, preferring the curated table over the full one.
    pub fn get_variant(
        &self,
        profile_id: &str,
        rsid: &str,
    ) -> Result<Option<ParsedRecord>, anyhow::Error> {
        for table in ["genotypes_curated", "genotypes_full"] {
            let sql = format!(
                "SELECT rsid, chrom, pos, genotype FROM {} WHERE profile_id = ?1 AND rsid = ?2",
                table
            );
            let record = self
                .conn
                .query_row(&sql, (profile_id, rsid), |row| {
                    Ok(ParsedRecord {
                        rsid: row.get(0)?,
                        chrom: row.get(1)?,
                        pos: row.get(2)?,
                        genotype: row.get(3)?,
                    })
                })
                .optional()?;
            if record.is_some() {
                return Ok(record);
            }
        }
        Ok(None)
    }

    /// Persist one generation of insight results, returning its timestamp.
    pub fn store_insight_results(
        &self,
        profile_id: &str,
        results: &[InsightResult],
        kb_version: &str,
    ) -> Result<String, anyhow::Error> {
        let generated_at = utc_now_iso();
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO insight_results (id, profile_id, module_id, result_json, generated_at, kb_version) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for result in results {
            stmt.execute((
                new_id(),
                profile_id,
                &result.module_id,
                serde_json::to_string(result)?,
                &generated_at,
                kb_version,
            ))?;
        }
        Ok(generated_at)
    }

    /// All insight results from the most recent generation.
    pub fn get_latest_insights(
        &self,
        profile_id: &str,
    ) -> Result<Vec<InsightResult>, anyhow::Error> {
        let latest: Option<String> = self.conn.query_row(
            "SELECT MAX(generated_at) FROM insight_results WHERE profile_id = ?1",
            [profile_id],
            |row| row.get(0),
        )?;
        let Some(latest) = latest else {
            return Ok(Vec::new());
        };
        let mut stmt = self.conn.prepare(
            "SELECT result_json FROM insight_results \
             WHERE profile_id = ?1 AND generated_at = ?2",
        )?;
        let rows = stmt.query_map((profile_id, &latest), |row| row.get::<_, String>(0))?;
        let mut results = Vec::new();
        for row in rows {
            results.push(serde_json::from_str(&row?)?);
        }
        Ok(results)
    }

    pub fn get_latest_clinvar_import(
        &self,
    ) -> Result<Option<ClinvarImportRecord>, anyhow::Error> {
        let record = self
            .conn
            .query_row(
                "SELECT id, file_hash_sha256, imported_at, variant_count \
                 FROM clinvar_imports ORDER BY imported_at DESC LIMIT 1",
                [],
                |row| {
                    Ok(ClinvarImportRecord {
                        id: row.get(0)?,
                        file_hash_sha256: row.get(1)?,
                        imported_at: row.get(2)?,
                        variant_count: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn get_clinvar_variant(
        &self,
        rsid: &str,
    ) -> Result<Option<ClinvarVariant>, anyhow::Error> {
        let variant = self
            .conn
            .query_row(
                "SELECT rsid, chrom, pos, ref, alt, clinical_significance, review_status, \
                        conditions, last_evaluated \
                 FROM clinvar_variants WHERE rsid = ?1",
                [rsid],
                |row| {
                    Ok(ClinvarVariant {
                        rsid: row.get(0)?,
                        chrom: row.get(1)?,
                        pos: row.get(2)?,
                        reference: row.get(3)?,
                        alternative: row.get(4)?,
                        clinical_significance: row.get(5)?,
                        review_status: row.get(6)?,
                        conditions: row.get(7)?,
                        last_evaluated: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(variant)
    }

    pub fn get_clinvar_checked_rsids(&self) -> Result<HashSet<String>, anyhow::Error> {
        let mut stmt = self.conn.prepare("SELECT rsid FROM clinvar_checked")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Every distinct rsID stored in either genotype table, any profile.
    pub fn get_all_rsids(&self) -> Result<HashSet<String>, anyhow::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT rsid FROM genotypes_full \
             UNION \
             SELECT DISTINCT rsid FROM genotypes_curated",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn has_full_genotypes(&self, profile_id: &str) -> Result<bool, anyhow::Error> {
        let row: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM genotypes_full WHERE profile_id = ?1 LIMIT 1",
                [profile_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    fn match_table(&self, profile_id: &str) -> Result<&'static str, anyhow::Error> {
        Ok(if self.has_full_genotypes(profile_id)? {
            "genotypes_full"
        } else {
            "genotypes_curated"
        })
    }

    /// Sample of the profile's genotypes that appear in `clinvar_variants`.
    pub fn get_clinvar_matches(
        &self,
        profile_id: &str,
        limit: u32,
    ) -> Result<Vec<ClinvarMatch>, anyhow::Error> {
        let sql = format!(
            "SELECT g.rsid, g.genotype, c.clinical_significance, c.review_status \
             FROM {} g \
             JOIN clinvar_variants c ON g.rsid = c.rsid \
             WHERE g.profile_id = ?1 \
             ORDER BY g.rsid \
             LIMIT ?2",
            self.match_table(profile_id)?
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map((profile_id, limit), |row| {
            Ok(ClinvarMatch {
                rsid: row.get(0)?,
                genotype: row.get(1)?,
                clinical_significance: row.get(2)?,
                review_status: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn count_clinvar_matches(&self, profile_id: &str) -> Result<i64, anyhow::Error> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} g \
             JOIN clinvar_variants c ON g.rsid = c.rsid \
             WHERE g.profile_id = ?1",
            self.match_table(profile_id)?
        );
        Ok(self.conn.query_row(&sql, [profile_id], |row| row.get(0))?)
    }
}

fn configure(conn: &Connection) -> Result<(), anyhow::Error> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

/// Bring the schema up to [`SCHEMA_VERSION`] with staged migrations keyed
/// off `PRAGMA user_version`.
fn migrate(conn: &Connection) -> Result<(), anyhow::Error> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS profiles (
                 id TEXT PRIMARY KEY,
                 display_name TEXT NOT NULL,
                 notes TEXT,
                 created_at TEXT NOT NULL,
                 encryption_enabled INTEGER NOT NULL DEFAULT 0
             );

             CREATE TABLE IF NOT EXISTS imports (
                 id TEXT PRIMARY KEY,
                 profile_id TEXT NOT NULL,
                 source TEXT NOT NULL,
                 file_hash_sha256 TEXT NOT NULL,
                 imported_at TEXT NOT NULL,
                 parser_version TEXT NOT NULL,
                 build TEXT NOT NULL,
                 strand TEXT NOT NULL,
                 status TEXT NOT NULL DEFAULT 'ok',
                 error_message TEXT,
                 zip_member TEXT,
                 FOREIGN KEY(profile_id) REFERENCES profiles(id)
             );

             CREATE TABLE IF NOT EXISTS genotypes_curated (
                 profile_id TEXT NOT NULL,
                 rsid TEXT NOT NULL,
                 chrom TEXT NOT NULL,
                 pos INTEGER NOT NULL,
                 genotype TEXT,
                 PRIMARY KEY(profile_id, rsid)
             );

             CREATE TABLE IF NOT EXISTS genotypes_full (
                 profile_id TEXT NOT NULL,
                 rsid TEXT NOT NULL,
                 chrom TEXT NOT NULL,
                 pos INTEGER NOT NULL,
                 genotype TEXT,
                 PRIMARY KEY(profile_id, rsid)
             );

             CREATE INDEX IF NOT EXISTS idx_genotypes_full_profile_rsid
                 ON genotypes_full(profile_id, rsid);

             CREATE INDEX IF NOT EXISTS idx_genotypes_full_profile_chrom_pos
                 ON genotypes_full(profile_id, chrom, pos);

             CREATE TABLE IF NOT EXISTS insight_results (
                 id TEXT PRIMARY KEY,
                 profile_id TEXT NOT NULL,
                 module_id TEXT NOT NULL,
                 result_json TEXT NOT NULL,
                 generated_at TEXT NOT NULL,
                 kb_version TEXT NOT NULL,
                 FOREIGN KEY(profile_id) REFERENCES profiles(id)
             );",
        )?;
    }

    if version < 2 {
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

             CREATE TABLE IF NOT EXISTS clinvar_imports (
                 id TEXT PRIMARY KEY,
                 file_hash_sha256 TEXT NOT NULL,
                 imported_at TEXT NOT NULL,
                 variant_count INTEGER NOT NULL
             );",
        )?;
    }

    if version < 3 {
        // Databases from before the status columns existed are upgraded in
        // place; column presence is introspected rather than versioned.
        let mut stmt = conn.prepare("PRAGMA table_info(imports)")?;
        let existing: HashSet<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;
        if !existing.contains("status") {
            conn.execute_batch(
                "ALTER TABLE imports ADD COLUMN status TEXT NOT NULL DEFAULT 'ok'",
            )?;
        }
        if !existing.contains("error_message") {
            conn.execute_batch("ALTER TABLE imports ADD COLUMN error_message TEXT")?;
        }
        if !existing.contains("zip_member") {
            conn.execute_batch("ALTER TABLE imports ADD COLUMN zip_member TEXT")?;
        }
    }

    if version < 4 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS clinvar_checked (
                 rsid TEXT PRIMARY KEY
             );",
        )?;
    }

    if version < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Upsert curated genotype rows; callers batch these inside a transaction.
pub fn insert_genotypes_curated(
    conn: &Connection,
    profile_id: &str,
    records: &[ParsedRecord],
) -> Result<(), anyhow::Error> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO genotypes_curated (profile_id, rsid, chrom, pos, genotype) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for record in records {
        stmt.execute((
            profile_id,
            &record.rsid,
            &record.chrom,
            record.pos,
            &record.genotype,
        ))?;
    }
    Ok(())
}

/// Upsert full genotype rows; callers batch these inside a transaction.
pub fn insert_genotypes_full(
    conn: &Connection,
    profile_id: &str,
    records: &[ParsedRecord],
) -> Result<(), anyhow::Error> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO genotypes_full (profile_id, rsid, chrom, pos, genotype) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for record in records {
        stmt.execute((
            profile_id,
            &record.rsid,
            &record.chrom,
            record.pos,
            &record.genotype,
        ))?;
    }
    Ok(())
}

/// Upsert ClinVar variant rows, keyed by rsID.
pub fn upsert_clinvar_variants(
    conn: &Connection,
    variants: &[ClinvarVariant],
) -> Result<(), anyhow::Error> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO clinvar_variants \
             (rsid, chrom, pos, ref, alt, clinical_significance, review_status, conditions, last_evaluated) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for variant in variants {
        stmt.execute((
            &variant.rsid,
            &variant.chrom,
            variant.pos,
            &variant.reference,
            &variant.alternative,
            &variant.clinical_significance,
            &variant.review_status,
            &variant.conditions,
            &variant.last_evaluated,
        ))?;
    }
    Ok(())
}

/// Record rsIDs as checked against the current ClinVar snapshot.
pub fn mark_clinvar_checked<'a, I>(conn: &Connection, rsids: I) -> Result<(), anyhow::Error>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut stmt =
        conn.prepare_cached("INSERT OR IGNORE INTO clinvar_checked (rsid) VALUES (?1)")?;
    for rsid in rsids {
        stmt.execute([rsid])?;
    }
    Ok(())
}

pub fn clear_clinvar_checked(conn: &Connection) -> Result<(), anyhow::Error> {
    conn.execute("DELETE FROM clinvar_checked", [])?;
    Ok(())
}

pub fn clear_clinvar_variants(conn: &Connection) -> Result<(), anyhow::Error> {
    conn.execute("DELETE FROM clinvar_variants", [])?;
    Ok(())
}

/// Record provenance for one ClinVar snapshot import.
pub fn add_clinvar_import(
    conn: &Connection,
    file_hash_sha256: &str,
    variant_count: u64,
) -> Result<String, anyhow::Error> {
    let import_id = new_id();
    conn.execute(
        "INSERT INTO clinvar_imports (id, file_hash_sha256, imported_at, variant_count) \
         VALUES (?1, ?2, ?3, ?4)",
        (&import_id, file_hash_sha256, utc_now_iso(), variant_count as i64),
    )?;
    Ok(import_id)
}
