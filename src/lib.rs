//! SnpVault library main entry point.

pub mod clinvar;
pub mod common;
pub mod db;
pub mod err;
pub mod genotypes;
pub mod import;
pub mod insights;
