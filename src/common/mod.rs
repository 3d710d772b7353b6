//! Commonly used code.

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

pub mod cancel;
pub mod io;
pub mod progress;

/// Commonly used command line arguments.
#[derive(Parser, Debug, Default)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

/// The version of the `snpvault` package.
#[cfg(not(test))]
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// This allows us to override the version to `0.0.0` in tests.
pub fn version() -> &'static str {
    #[cfg(test)]
    return "0.0.0";
    #[cfg(not(test))]
    return VERSION;
}

/// Normalize a chromosome token to its canonical label.
///
/// Numeric 23/24/25 map to X/Y/MT; everything else is upper-cased verbatim.
pub fn normalize_chrom(raw: &str) -> String {
    let value = raw.trim().to_uppercase();
    match value.as_str() {
        "23" | "X" => String::from("X"),
        "24" | "Y" => String::from("Y"),
        "25" | "MT" | "M" => String::from("MT"),
        _ => value,
    }
}

/// Canonicalize a genotype call so allele order does not matter.
///
/// Strips spaces and upper-cases; `""`, `"-"`, `"--"`, and `"00"` are
/// no-reads and map to `None`; two-character calls are sorted so `"TC"` and
/// `"CT"` store identically.
pub fn canonical_genotype(genotype: &str) -> Option<String> {
    let cleaned = genotype.replace(' ', "").to_uppercase();
    match cleaned.as_str() {
        "" | "--" | "-" | "00" => None,
        _ => {
            if cleaned.chars().count() == 2 {
                let mut chars: Vec<char> = cleaned.chars().collect();
                chars.sort_unstable();
                Some(chars.into_iter().collect())
            } else {
                Some(cleaned)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn version_is_pinned_in_tests() {
        assert_eq!(version(), "0.0.0");
    }

    #[rstest]
    #[case("1", "1")]
    #[case("chr7", "CHR7")]
    #[case("23", "X")]
    #[case("x", "X")]
    #[case("24", "Y")]
    #[case(" y ", "Y")]
    #[case("25", "MT")]
    #[case("m", "MT")]
    #[case("mt", "MT")]
    fn normalize_chrom_cases(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_chrom(raw), expected);
    }

    #[rstest]
    #[case("CT", Some("CT"))]
    #[case("TC", Some("CT"))]
    #[case("tc", Some("CT"))]
    #[case("A G", Some("AG"))]
    #[case("A", Some("A"))]
    #[case("", None)]
    #[case("-", None)]
    #[case("--", None)]
    #[case("00", None)]
    #[case("DEL", Some("DEL"))]
    fn canonical_genotype_cases(#[case] raw: &str, #[case] expected: Option<&str>) {
        assert_eq!(canonical_genotype(raw).as_deref(), expected);
    }
}
