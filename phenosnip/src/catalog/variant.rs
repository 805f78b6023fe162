use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(2R|2L|3R|3L|4|X)_\d+_(SNP|MNP|INS|DEL)$").expect("valid identifier regex"));
static SINGLE_BASE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[ATGC]$").expect("valid allele regex"));
static ONE_OR_MORE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[ATGC]+$").expect("valid allele regex"));
static TWO_OR_MORE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[ATGC]{2,}$").expect("valid allele regex"));

/// Polymorphism kind. Only display and identifier validation depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VariantKind {
    #[serde(rename = "SNP")]
    Snp,
    #[serde(rename = "INS")]
    Ins,
    #[serde(rename = "DEL")]
    Del,
    #[serde(rename = "MNP")]
    Mnp,
}

impl VariantKind {
    pub fn tag(&self) -> &'static str {
        match self {
            VariantKind::Snp => "SNP",
            VariantKind::Ins => "INS",
            VariantKind::Del => "DEL",
            VariantKind::Mnp => "MNP",
        }
    }

    fn allele_patterns(&self) -> (&'static Regex, &'static Regex) {
        match self {
            VariantKind::Snp => (&*SINGLE_BASE, &*SINGLE_BASE),
            VariantKind::Ins => (&*ONE_OR_MORE, &*TWO_OR_MORE),
            VariantKind::Del => (&*TWO_OR_MORE, &*ONE_OR_MORE),
            VariantKind::Mnp => (&*TWO_OR_MORE, &*TWO_OR_MORE),
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for VariantKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "SNP" => Ok(VariantKind::Snp),
            "INS" => Ok(VariantKind::Ins),
            "DEL" => Ok(VariantKind::Del),
            "MNP" => Ok(VariantKind::Mnp),
            other => Err(format!("unknown variant kind '{}'", other)),
        }
    }
}

/// A gene possibly affected by a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantEffect {
    pub gene_id: String,
    pub variant_id: String,
    pub gene_symbol: String,
    pub relative_position: String,
    pub effect_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub variant_id: String,
    pub chromosome: String,
    pub position: u64,
    pub ref_allele: String,
    pub alt_allele: String,
    pub ref_count: u32,
    pub alt_count: u32,
    kind: VariantKind,
    /// Lines carrying the alternate allele.
    pub carrier_lines: BTreeSet<String>,
    pub effects: Vec<VariantEffect>,
}

impl Variant {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        variant_id: impl Into<String>,
        chromosome: impl Into<String>,
        position: u64,
        ref_allele: impl Into<String>,
        alt_allele: impl Into<String>,
        ref_count: u32,
        alt_count: u32,
        kind: VariantKind,
    ) -> Self {
        Variant {
            variant_id: variant_id.into(),
            chromosome: chromosome.into(),
            position,
            ref_allele: ref_allele.into(),
            alt_allele: alt_allele.into(),
            ref_count,
            alt_count,
            kind,
            carrier_lines: BTreeSet::new(),
            effects: Vec::new(),
        }
    }

    pub fn kind(&self) -> VariantKind {
        self.kind
    }

    /// Checks the identifier pattern and that its suffix agrees with `kind`.
    pub fn check_identifier(&self) -> Result<(), String> {
        let caps = IDENTIFIER_PATTERN
            .captures(&self.variant_id)
            .ok_or_else(|| format!("identifier '{}' does not match <chrom>_<pos>_<kind>", self.variant_id))?;
        if &caps[2] != self.kind.tag() {
            return Err(format!(
                "identifier '{}' declares {} but the record kind is {}",
                self.variant_id, &caps[2], self.kind
            ));
        }
        Ok(())
    }

    pub fn check_alleles(&self) -> Result<(), String> {
        let (ref_pattern, alt_pattern) = self.kind.allele_patterns();
        if !ref_pattern.is_match(&self.ref_allele) {
            return Err(format!("reference allele '{}' is not valid for a {}", self.ref_allele, self.kind));
        }
        if !alt_pattern.is_match(&self.alt_allele) {
            return Err(format!("alternative allele '{}' is not valid for a {}", self.alt_allele, self.kind));
        }
        Ok(())
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} : {}\nPosition : {}\nChrom :  {}\nRef count : {}\nAlt count : {}",
            self.kind, self.variant_id, self.position, self.chromosome, self.ref_count, self.alt_count
        )
    }
}
