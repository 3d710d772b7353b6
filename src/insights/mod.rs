//! Knowledge base loading and rule-matching over curated genotypes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::common::canonical_genotype;
use crate::db::{ClinvarImportRecord, ClinvarMatch};
use crate::genotypes::{ParsedRecord, QcReport};

/// Categories that require explicit opt-in before evaluation.
pub const SENSITIVE_CATEGORIES: [&str; 2] = ["clinical", "pgx"];

/// Manifest file name inside a knowledge base directory.
pub const KB_MANIFEST_FILENAME: &str = "kb_manifest.json";

/// One genotype-to-summary rule; first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ModuleRule {
    pub rsid: String,
    pub genotypes: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EvidenceLevel {
    pub grade: String,
    pub summary: String,
}

/// One interpretation module from the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KnowledgeModule {
    pub module_id: String,
    pub category: String,
    pub display_name: String,
    pub rsids: Vec<String>,
    pub rules: Vec<ModuleRule>,
    pub default_summary: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    pub evidence_level: EvidenceLevel,
    pub limitations: String,
    pub references: Vec<String>,
}

/// Top-level manifest of a knowledge base directory.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KnowledgeBaseManifest {
    pub kb_version: String,
    pub build: String,
    pub strand: String,
    #[serde(default)]
    pub module_files: Vec<String>,
}

/// One evaluated insight, as persisted to `insight_results`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InsightResult {
    pub module_id: String,
    pub category: String,
    pub display_name: String,
    pub summary: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    pub evidence_level: EvidenceLevel,
    pub limitations: String,
    pub references: Vec<String>,
    pub genotypes: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub rule_matched: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qc: Option<QcReport>,
}

/// Load the manifest from `kb_dir`.
pub fn load_manifest<P>(kb_dir: P) -> Result<KnowledgeBaseManifest, anyhow::Error>
where
    P: AsRef<Path>,
{
    let path = kb_dir.as_ref().join(KB_MANIFEST_FILENAME);
    tracing::debug!("Loading knowledge base manifest {:?}", &path);
    let data = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Load all modules listed in the manifest from `kb_dir/modules/`.
pub fn load_modules<P>(
    kb_dir: P,
    manifest: &KnowledgeBaseManifest,
) -> Result<Vec<KnowledgeModule>, anyhow::Error>
where
    P: AsRef<Path>,
{
    let mut modules = Vec::with_capacity(manifest.module_files.len());
    for module_file in &manifest.module_files {
        let path = kb_dir.as_ref().join("modules").join(module_file);
        let data = std::fs::read_to_string(&path)?;
        modules.push(serde_json::from_str(&data)?);
    }
    Ok(modules)
}

/// Union of all rsIDs any module cares about.
pub fn curated_rsids(modules: &[KnowledgeModule]) -> HashSet<String> {
    modules
        .iter()
        .flat_map(|module| module.rsids.iter().cloned())
        .collect()
}

/// First rule whose genotype matches, else the module's default summary.
fn match_rule(
    module: &KnowledgeModule,
    genotypes: &BTreeMap<String, Option<String>>,
) -> (String, Option<String>) {
    for rule in &module.rules {
        let Some(Some(genotype)) = genotypes.get(&rule.rsid) else {
            continue;
        };
        if let Some(canonical) = canonical_genotype(genotype) {
            if rule.genotypes.contains(&canonical) {
                return (rule.summary.clone(), Some(rule.rsid.clone()));
            }
        }
    }
    (module.default_summary.clone(), None)
}

/// Evaluate every opted-in module against a profile's curated genotypes.
///
/// Modules in a sensitive category are skipped unless that category was
/// explicitly opted into.
pub fn evaluate_modules(
    genotype_map: &HashMap<String, ParsedRecord>,
    modules: &[KnowledgeModule],
    opt_in_categories: &HashMap<String, bool>,
) -> Vec<InsightResult> {
    let mut results = Vec::new();
    for module in modules {
        if SENSITIVE_CATEGORIES.contains(&module.category.as_str())
            && !opt_in_categories
                .get(&module.category)
                .copied()
                .unwrap_or(false)
        {
            tracing::debug!(
                "Skipping module {} (category {} not opted in)",
                module.module_id,
                module.category
            );
            continue;
        }

        let module_genotypes: BTreeMap<String, Option<String>> = module
            .rsids
            .iter()
            .map(|rsid| {
                let genotype = genotype_map
                    .get(rsid)
                    .and_then(|record| record.genotype.clone());
                (rsid.clone(), genotype)
            })
            .collect();

        let (summary, rule_matched) = match_rule(module, &module_genotypes);
        results.push(InsightResult {
            module_id: module.module_id.clone(),
            category: module.category.clone(),
            display_name: module.display_name.clone(),
            summary,
            suggestion: module.suggestion.clone(),
            evidence_level: module.evidence_level.clone(),
            limitations: module.limitations.clone(),
            references: module.references.clone(),
            genotypes: module_genotypes,
            rule_matched,
            qc: None,
        });
    }
    results
}

/// Wrap a QC report as a pseudo-insight so it displays with the rest.
pub fn build_qc_result(qc: &QcReport) -> InsightResult {
    InsightResult {
        module_id: String::from("qc_summary"),
        category: String::from("qc"),
        display_name: String::from("Quality checks"),
        summary: format!(
            "Call rate {:.2}% across {} markers. Duplicates {}, malformed rows {}. Sex check: {}.",
            qc.call_rate * 100.0,
            qc.total_markers,
            qc.duplicates,
            qc.malformed_rows,
            qc.sex_check,
        ),
        suggestion: None,
        evidence_level: EvidenceLevel {
            grade: String::from("A"),
            summary: String::from("Derived directly from file parsing."),
        },
        limitations: String::from(
            "QC is a data consistency check, not an identity or medical assessment.",
        ),
        references: Vec::new(),
        genotypes: BTreeMap::new(),
        rule_matched: None,
        qc: Some(qc.clone()),
    }
}

/// Summarize how a profile's rsIDs intersect the stored ClinVar variants.
pub fn build_clinvar_summary(
    match_count: i64,
    sample: &[ClinvarMatch],
    import_meta: Option<&ClinvarImportRecord>,
) -> InsightResult {
    let sample_text = if sample.is_empty() {
        String::from("None")
    } else {
        sample
            .iter()
            .map(|item| item.rsid.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let import_note = import_meta
        .map(|meta| format!(" ClinVar snapshot imported {}.", meta.imported_at))
        .unwrap_or_default();
    InsightResult {
        module_id: String::from("clinical_summary"),
        category: String::from("clinical"),
        display_name: String::from("Clinical references (ClinVar, opt-in)"),
        summary: format!(
            "Found {} rsIDs in your data that appear in the ClinVar snapshot. \
             Example matches: {}.{}",
            match_count, sample_text, import_note,
        ),
        suggestion: Some(String::from(
            "Do not change medical care based on this app. Discuss any concerns with a clinician.",
        )),
        evidence_level: EvidenceLevel {
            grade: String::from("A"),
            summary: String::from("ClinVar listing reference only."),
        },
        limitations: String::from(
            "SNP chip results can be wrong and do not confirm clinical significance. \
             Only high-confidence ClinVar entries are shown, and clinical confirmation is required.",
        ),
        references: vec![String::from("ClinVar (NCBI) snapshot")],
        genotypes: BTreeMap::new(),
        rule_matched: None,
        qc: None,
    }
}
