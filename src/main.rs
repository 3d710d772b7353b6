//! Main entry point for the SnpVault CLI.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use snpvault::clinvar::cache::{build_clinvar_cache, CLINVAR_CACHE_FILENAME};
use snpvault::clinvar::classify_clinvar;
use snpvault::clinvar::sync::{self, SyncOutcome};
use snpvault::common::{self, cancel::CancelToken, progress::format_eta};
use snpvault::db::Store;
use snpvault::import::guard::{OperationGuard, OperationKind};
use snpvault::import::vault::PassthroughCipher;
use snpvault::import::{self, ImportMode, ImportOptions};
use snpvault::insights;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Local-only consumer genotype vault and insight engine"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// Directory holding the database, retained uploads, and caches
    #[arg(long, default_value = "snpvault-data")]
    data_dir: PathBuf,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Profile-related commands.
    Profile(Profile),
    /// Genotype file commands.
    Genotypes(Genotypes),
    /// ClinVar snapshot commands.
    Clinvar(Clinvar),
    /// Insight engine commands.
    Insights(Insights),
}

/// Parsing of "profile *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Profile {
    /// The sub command to run
    #[command(subcommand)]
    command: ProfileCommands,
}

/// Enum supporting the parsing of "profile *" sub commands.
#[derive(Debug, Subcommand)]
enum ProfileCommands {
    Create(ProfileCreateArgs),
    List(ProfileListArgs),
    Rename(ProfileRenameArgs),
    Delete(ProfileDeleteArgs),
}

/// Parsing of "profile create" arguments.
#[derive(Debug, Args)]
struct ProfileCreateArgs {
    /// Display name of the new profile
    #[arg(long)]
    name: String,
    /// Free-form notes
    #[arg(long)]
    notes: Option<String>,
}

/// Parsing of "profile list" arguments.
#[derive(Debug, Args)]
struct ProfileListArgs {}

/// Parsing of "profile rename" arguments.
#[derive(Debug, Args)]
struct ProfileRenameArgs {
    /// Identifier of the profile to rename
    #[arg(long)]
    profile_id: String,
    /// New display name
    #[arg(long)]
    name: String,
}

/// Parsing of "profile delete" arguments.
#[derive(Debug, Args)]
struct ProfileDeleteArgs {
    /// Identifier of the profile to delete
    #[arg(long)]
    profile_id: String,
}

/// Parsing of "genotypes *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Genotypes {
    /// The sub command to run
    #[command(subcommand)]
    command: GenotypesCommands,
}

/// Enum supporting the parsing of "genotypes *" sub commands.
#[derive(Debug, Subcommand)]
enum GenotypesCommands {
    Import(GenotypesImportArgs),
    Lookup(GenotypesLookupArgs),
}

/// Parsing of "genotypes import" arguments.
#[derive(Debug, Args)]
struct GenotypesImportArgs {
    /// Identifier of the profile to import into
    #[arg(long)]
    profile_id: String,
    /// Path to the raw export, plain text or zip
    #[arg(long)]
    path: PathBuf,
    /// Which genotype tables to populate
    #[arg(long, value_enum, default_value_t = ImportMode::Curated)]
    mode: ImportMode,
    /// Member to read when the zip contains several .txt files
    #[arg(long)]
    zip_member: Option<String>,
    /// Knowledge base directory
    #[arg(long, default_value = "kb")]
    kb_dir: PathBuf,
    /// Sensitive category to opt into; can be given multiple times
    #[arg(long = "opt-in")]
    opt_in: Vec<String>,
}

/// Parsing of "genotypes lookup" arguments.
#[derive(Debug, Args)]
struct GenotypesLookupArgs {
    /// Identifier of the profile to query
    #[arg(long)]
    profile_id: String,
    /// rsID to look up
    #[arg(long)]
    rsid: String,
}

/// Parsing of "clinvar *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Clinvar {
    /// The sub command to run
    #[command(subcommand)]
    command: ClinvarCommands,
}

/// Enum supporting the parsing of "clinvar *" sub commands.
#[derive(Debug, Subcommand)]
enum ClinvarCommands {
    Import(ClinvarImportArgs),
    Sync(ClinvarSyncArgs),
    BuildCache(ClinvarBuildCacheArgs),
}

/// Parsing of "clinvar import" arguments.
#[derive(Debug, Args)]
struct ClinvarImportArgs {
    /// Path to a ClinVar VCF or variant_summary snapshot
    #[arg(long)]
    path: PathBuf,
    /// Import every retained variant instead of only stored rsIDs
    #[arg(long)]
    unfiltered: bool,
}

/// Parsing of "clinvar sync" arguments.
#[derive(Debug, Args)]
struct ClinvarSyncArgs {
    /// Prebuilt cache to sync from; defaults to the one in the data directory
    #[arg(long)]
    cache: Option<PathBuf>,
    /// Sync from a flat snapshot file instead of a cache
    #[arg(long, conflicts_with = "cache")]
    path: Option<PathBuf>,
}

/// Parsing of "clinvar build-cache" arguments.
#[derive(Debug, Args)]
struct ClinvarBuildCacheArgs {
    /// Path to the ClinVar snapshot to read
    #[arg(long)]
    input: PathBuf,
    /// Output path; defaults to the cache location in the data directory
    #[arg(long)]
    output: Option<PathBuf>,
}

/// Parsing of "insights *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Insights {
    /// The sub command to run
    #[command(subcommand)]
    command: InsightsCommands,
}

/// Enum supporting the parsing of "insights *" sub commands.
#[derive(Debug, Subcommand)]
enum InsightsCommands {
    Run(InsightsRunArgs),
}

/// Parsing of "insights run" arguments.
#[derive(Debug, Args)]
struct InsightsRunArgs {
    /// Identifier of the profile to evaluate
    #[arg(long)]
    profile_id: String,
    /// Knowledge base directory
    #[arg(long, default_value = "kb")]
    kb_dir: PathBuf,
    /// Sensitive category to opt into; can be given multiple times
    #[arg(long = "opt-in")]
    opt_in: Vec<String>,
}

fn store_path(data_dir: &Path) -> PathBuf {
    data_dir.join("snpvault.sqlite3")
}

fn default_cache_path(data_dir: &Path) -> PathBuf {
    data_dir.join("clinvar").join(CLINVAR_CACHE_FILENAME)
}

fn opt_in_map(categories: &[String]) -> HashMap<String, bool> {
    categories
        .iter()
        .map(|category| (category.clone(), true))
        .collect()
}

/// Progress reporter that logs each new percent value once.
fn log_progress(label: &'static str) -> impl FnMut(u8, u64, f64) {
    let mut last_percent = u8::MAX;
    move |percent, units, eta_seconds| {
        if percent == last_percent {
            return;
        }
        last_percent = percent;
        tracing::info!(
            "{}: {:3}% ({} units done, ETA {})",
            label,
            percent,
            units,
            format_eta(eta_seconds)
        );
    }
}

fn report_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Imported {
            file_hash_sha256,
            variant_count,
        } => {
            tracing::info!(
                "Imported {} variants from snapshot {}",
                variant_count,
                file_hash_sha256
            );
        }
        SyncOutcome::Skipped { reason } => {
            tracing::info!("Nothing to import ({})", reason);
        }
    }
}

fn profile_create(data_dir: &Path, args: &ProfileCreateArgs) -> Result<(), anyhow::Error> {
    let store = Store::open(store_path(data_dir))?;
    let profile = store.create_profile(&args.name, args.notes.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

fn profile_list(data_dir: &Path, _args: &ProfileListArgs) -> Result<(), anyhow::Error> {
    let store = Store::open(store_path(data_dir))?;
    let listings = store.list_profiles()?;
    println!("{}", serde_json::to_string_pretty(&listings)?);
    Ok(())
}

fn profile_rename(data_dir: &Path, args: &ProfileRenameArgs) -> Result<(), anyhow::Error> {
    let store = Store::open(store_path(data_dir))?;
    store.rename_profile(&args.profile_id, &args.name)?;
    tracing::info!("Renamed profile {} to {:?}", args.profile_id, args.name);
    Ok(())
}

fn profile_delete(data_dir: &Path, args: &ProfileDeleteArgs) -> Result<(), anyhow::Error> {
    let mut store = Store::open(store_path(data_dir))?;
    store.delete_profile(&args.profile_id)?;
    tracing::info!("Deleted profile {} and all of its data", args.profile_id);
    Ok(())
}

fn genotypes_import(
    guard: &OperationGuard,
    data_dir: &Path,
    args: &GenotypesImportArgs,
) -> Result<(), anyhow::Error> {
    let _slot = guard.try_acquire(OperationKind::GenotypeImport)?;
    let mut store = Store::open(store_path(data_dir))?;
    let manifest = insights::load_manifest(&args.kb_dir)?;
    let modules = insights::load_modules(&args.kb_dir, &manifest)?;
    let options = ImportOptions {
        mode: args.mode,
        zip_member: args.zip_member.as_deref(),
    };

    let mut on_rows = |rows: u64| tracing::info!("genotype import: {} markers staged", rows);
    let summary = import::import_genotype_file(
        &mut store,
        data_dir,
        &args.profile_id,
        &args.path,
        &modules,
        &manifest.kb_version,
        &opt_in_map(&args.opt_in),
        &options,
        &PassthroughCipher,
        Some(&mut on_rows),
        &CancelToken::new(),
    )?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn genotypes_lookup(data_dir: &Path, args: &GenotypesLookupArgs) -> Result<(), anyhow::Error> {
    let store = Store::open(store_path(data_dir))?;
    sync::seed_clinvar_if_missing(&store)?;

    let genotype = store.get_variant(&args.profile_id, &args.rsid)?;
    let clinvar = store.get_clinvar_variant(&args.rsid)?;
    let classification = clinvar.as_ref().map(|variant| {
        let classification =
            classify_clinvar(&variant.clinical_significance, &variant.review_status);
        serde_json::json!({
            "confidence": classification.confidence.to_string(),
            "conflict": classification.conflict,
        })
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "rsid": args.rsid,
            "genotype": genotype,
            "clinvar": clinvar,
            "classification": classification,
        }))?
    );
    Ok(())
}

fn clinvar_import(
    guard: &OperationGuard,
    data_dir: &Path,
    args: &ClinvarImportArgs,
) -> Result<(), anyhow::Error> {
    let _slot = guard.try_acquire(OperationKind::ClinvarSync)?;
    let store = Store::open(store_path(data_dir))?;

    let filter = if args.unfiltered {
        None
    } else {
        let rsids = store.get_all_rsids()?;
        tracing::info!("Restricting import to {} stored rsIDs", rsids.len());
        Some(rsids)
    };
    let mut progress = log_progress("clinvar import");
    let outcome = sync::import_clinvar_snapshot(
        &store,
        &args.path,
        filter.as_ref(),
        Some(&mut progress),
        &CancelToken::new(),
    )?;
    report_outcome(&outcome);
    Ok(())
}

fn clinvar_sync(
    guard: &OperationGuard,
    data_dir: &Path,
    args: &ClinvarSyncArgs,
) -> Result<(), anyhow::Error> {
    let _slot = guard.try_acquire(OperationKind::ClinvarSync)?;
    let store = Store::open(store_path(data_dir))?;
    let seeded = sync::seed_clinvar_if_missing(&store)?;
    if seeded.seeded {
        tracing::info!("Seeded {} built-in ClinVar variants", seeded.variant_count);
    }

    let mut progress = log_progress("clinvar sync");
    let outcome = if let Some(path) = &args.path {
        let filter = store.get_all_rsids()?;
        sync::import_clinvar_snapshot(
            &store,
            path,
            Some(&filter),
            Some(&mut progress),
            &CancelToken::new(),
        )?
    } else {
        let cache = args
            .cache
            .clone()
            .unwrap_or_else(|| default_cache_path(data_dir));
        sync::sync_from_cache(&store, &cache, Some(&mut progress), &CancelToken::new())?
    };
    report_outcome(&outcome);
    Ok(())
}

fn clinvar_build_cache(data_dir: &Path, args: &ClinvarBuildCacheArgs) -> Result<(), anyhow::Error> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_cache_path(data_dir));
    let mut progress = log_progress("cache build");
    let summary = build_clinvar_cache(
        &args.input,
        &output,
        Some(&mut progress),
        &CancelToken::new(),
    )?;
    tracing::info!(
        "Cache holds {} variants at {:?}",
        summary.variant_count,
        summary.output_path
    );
    Ok(())
}

fn insights_run(data_dir: &Path, args: &InsightsRunArgs) -> Result<(), anyhow::Error> {
    let store = Store::open(store_path(data_dir))?;
    sync::seed_clinvar_if_missing(&store)?;
    let manifest = insights::load_manifest(&args.kb_dir)?;
    let modules = insights::load_modules(&args.kb_dir, &manifest)?;
    let opt_in = opt_in_map(&args.opt_in);

    let genotype_map = store.get_curated_genotypes(&args.profile_id)?;
    let mut results = insights::evaluate_modules(&genotype_map, &modules, &opt_in);
    if opt_in.get("clinical").copied().unwrap_or(false) {
        let match_count = store.count_clinvar_matches(&args.profile_id)?;
        let sample = store.get_clinvar_matches(&args.profile_id, 5)?;
        let import_meta = store.get_latest_clinvar_import()?;
        results.push(insights::build_clinvar_summary(
            match_count,
            &sample,
            import_meta.as_ref(),
        ));
    }
    let generated_at = store.store_insight_results(&args.profile_id, &results, &manifest.kb_version)?;
    tracing::info!("Stored {} insight results at {}", results.len(), generated_at);
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    tracing::subscriber::with_default(collector, || {
        tracing::info!("SnpVault {} startup -- unlocking the vault...", common::version());

        let guard = OperationGuard::new();
        match &cli.command {
            Commands::Profile(profile) => match &profile.command {
                ProfileCommands::Create(args) => profile_create(&cli.data_dir, args)?,
                ProfileCommands::List(args) => profile_list(&cli.data_dir, args)?,
                ProfileCommands::Rename(args) => profile_rename(&cli.data_dir, args)?,
                ProfileCommands::Delete(args) => profile_delete(&cli.data_dir, args)?,
            },
            Commands::Genotypes(genotypes) => match &genotypes.command {
                GenotypesCommands::Import(args) => {
                    genotypes_import(&guard, &cli.data_dir, args)?
                }
                GenotypesCommands::Lookup(args) => genotypes_lookup(&cli.data_dir, args)?,
            },
            Commands::Clinvar(clinvar) => match &clinvar.command {
                ClinvarCommands::Import(args) => clinvar_import(&guard, &cli.data_dir, args)?,
                ClinvarCommands::Sync(args) => clinvar_sync(&guard, &cli.data_dir, args)?,
                ClinvarCommands::BuildCache(args) => clinvar_build_cache(&cli.data_dir, args)?,
            },
            Commands::Insights(insights) => match &insights.command {
                InsightsCommands::Run(args) => insights_run(&cli.data_dir, args)?,
            },
        }

        tracing::info!("All done. Have a nice day!");

        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}
