// src/models.rs

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Descriptive statistic used to collapse the measurements of one strain
/// into its reference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SummaryMethod {
    #[serde(rename = "MEAN")]
    Mean,
    #[serde(rename = "MEDIAN")]
    Median,
    /// Mean of the values inside the inter-quartile range.
    #[serde(rename = "IQR")]
    Iqr,
    /// Mean of the values inside the 1.5 x IQR Tukey fences.
    #[serde(rename = "1.5IQR")]
    Iqr15,
}

impl SummaryMethod {
    pub const ALL: [SummaryMethod; 4] = [
        SummaryMethod::Mean,
        SummaryMethod::Median,
        SummaryMethod::Iqr,
        SummaryMethod::Iqr15,
    ];

    pub fn keyword(&self) -> &'static str {
        match self {
            SummaryMethod::Mean => "MEAN",
            SummaryMethod::Median => "MEDIAN",
            SummaryMethod::Iqr => "IQR",
            SummaryMethod::Iqr15 => "1.5IQR",
        }
    }
}

impl fmt::Display for SummaryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for SummaryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SummaryMethod::ALL
            .iter()
            .find(|m| m.keyword().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown summary method '{}' (expected MEAN, MEDIAN, IQR or 1.5IQR)", s))
    }
}

/// Tail membership of a strain inside its phenotype group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExtremityClass {
    Low,
    High,
}

impl fmt::Display for ExtremityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtremityClass::Low => f.write_str("LOW"),
            ExtremityClass::High => f.write_str("HIGH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "m")]
    Male,
    #[serde(rename = "f")]
    Female,
}

impl FromStr for Sex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "m" | "M" => Ok(Sex::Male),
            "f" | "F" => Ok(Sex::Female),
            other => Err(format!("sex must be one of m/M/f/F, got '{}'", other)),
        }
    }
}

/// Identity of one (phenotype, method, age) analysis group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhenotypeKey {
    pub phenotype_name: String,
    pub method: SummaryMethod,
    pub age: u32,
}

impl PhenotypeKey {
    pub fn new(phenotype_name: impl Into<String>, method: SummaryMethod, age: u32) -> Self {
        PhenotypeKey {
            phenotype_name: phenotype_name.into(),
            method,
            age,
        }
    }
}

impl fmt::Display for PhenotypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}W", self.phenotype_name, self.method, self.age)
    }
}

/// Significance threshold. Totally ordered so it can take part in keys.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Alpha(pub f64);

impl Alpha {
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl PartialEq for Alpha {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Alpha {}

impl PartialOrd for Alpha {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Alpha {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Alpha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One raw measurement, owned by its [`Individual`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhenotypeData {
    pub id: u64,
    pub phenotype_name: String,
    /// `None` when the raw table holds no value for this phenotype.
    pub value: Option<f64>,
    pub age: u32,
    pub individual_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub name: String,
    pub strain_number: String,
    pub age: u32,
    pub sex: Sex,
    pub date: Option<String>,
    pub measurements: Vec<PhenotypeData>,
}

/// Phenotyping unit. Owns its individuals; removing a strain removes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strain {
    pub number: String,
    pub is_control: bool,
    pub individuals: Vec<Individual>,
}

impl Strain {
    pub fn new(number: impl Into<String>, is_control: bool) -> Self {
        Strain {
            number: number.into(),
            is_control,
            individuals: Vec::new(),
        }
    }

    /// Usable values recorded for `phenotype_name` at `age`, in insertion order.
    pub fn values_for(&self, phenotype_name: &str, age: u32) -> Vec<f64> {
        self.individuals
            .iter()
            .flat_map(|ind| ind.measurements.iter())
            .filter(|m| m.phenotype_name == phenotype_name && m.age == age)
            .filter_map(|m| m.value)
            .filter(|v| v.is_finite())
            .collect()
    }
}

/// Per-group summary of one strain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedStrain {
    pub phenotype_name: String,
    pub method: SummaryMethod,
    pub age: u32,
    pub strain_number: String,
    pub reference_value: f64,
    /// Dense 1..N position of `reference_value` inside the group.
    pub rank: u32,
    pub extremity_class: Option<ExtremityClass>,
}

impl ProcessedStrain {
    pub fn key(&self) -> PhenotypeKey {
        PhenotypeKey::new(self.phenotype_name.clone(), self.method, self.age)
    }
}

/// Score of one variant inside one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedMutation {
    pub phenotype_name: String,
    pub method: SummaryMethod,
    pub age: u32,
    pub variant_id: String,
    pub weight: f64,
    pub rank: u32,
    /// Empirical one-sided proportion of other variants at least as extreme.
    pub ratio: f64,
    pub fdr: Option<f64>,
    pub carrier_count: usize,
}

impl ProcessedMutation {
    pub fn key(&self) -> PhenotypeKey {
        PhenotypeKey::new(self.phenotype_name.clone(), self.method, self.age)
    }
}

/// Parent of every derived row for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedPhenotype {
    pub key: PhenotypeKey,
    pub strains: Vec<ProcessedStrain>,
    pub mutations: Vec<ProcessedMutation>,
    pub analyses: Vec<AnalyzedPhenotype>,
}

impl ProcessedPhenotype {
    pub fn new(key: PhenotypeKey) -> Self {
        ProcessedPhenotype {
            key,
            strains: Vec::new(),
            mutations: Vec::new(),
            analyses: Vec::new(),
        }
    }

    pub fn analysis(&self, alpha: Alpha) -> Option<&AnalyzedPhenotype> {
        self.analyses.iter().find(|a| a.alpha == alpha)
    }
}

/// Coarse grouping of effect types, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectCategory {
    AffectingProtein,
    InsideGene,
    OutsideGene,
    Undefined,
}

const AFFECTING_PROTEIN: &[&str] = &[
    "NON_SYNONYMOUS_START",
    "EXON_DELETED",
    "NON_SYNONYMOUS_CODING",
    "START_GAINED",
    "STOP_GAINED",
    "START_LOST",
    "STOP_LOST",
    "CODON_DELETION",
    "FRAME_SHIFT",
    "CODON_INSERTION",
    "CODON_CHANGE_PLUS_CODON_INSERTION",
    "CODON_CHANGE_PLUS_CODON_DELETION",
];

const INSIDE_GENE: &[&str] = &[
    "CODON_CHANGE",
    "EXON",
    "SYNONYMOUS_STOP",
    "UTR_3_PRIME",
    "INTRON",
    "SYNONYMOUS_CODING",
    "UTR_5_PRIME",
];

const OUTSIDE_GENE: &[&str] = &["DOWNSTREAM", "UPSTREAM"];

impl EffectCategory {
    pub fn of(effect_type: &str) -> Self {
        let t = effect_type.trim();
        if AFFECTING_PROTEIN.contains(&t) {
            EffectCategory::AffectingProtein
        } else if INSIDE_GENE.contains(&t) {
            EffectCategory::InsideGene
        } else if OUTSIDE_GENE.contains(&t) {
            EffectCategory::OutsideGene
        } else {
            EffectCategory::Undefined
        }
    }
}

impl fmt::Display for EffectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EffectCategory::AffectingProtein => "AFFECTING_PROTEIN",
            EffectCategory::InsideGene => "INSIDE_GENE",
            EffectCategory::OutsideGene => "OUTSIDE_GENE",
            EffectCategory::Undefined => "UNDEFINED",
        };
        f.write_str(s)
    }
}

/// Alpha-thresholded result for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedPhenotype {
    pub name: String,
    pub method: SummaryMethod,
    pub age: u32,
    pub alpha: Alpha,
    pub genes: Vec<AnalyzedGene>,
}

impl AnalyzedPhenotype {
    pub fn key(&self) -> PhenotypeKey {
        PhenotypeKey::new(self.name.clone(), self.method, self.age)
    }

    pub fn gene(&self, flybase_id: &str) -> Option<&AnalyzedGene> {
        self.genes.iter().find(|g| g.flybase_id == flybase_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedGene {
    pub flybase_id: String,
    pub gene_symbol: String,
    pub category: EffectCategory,
    pub best_rank: u32,
    pub significant_mutation_count: usize,
    pub carrier_count_in_analysis: usize,
    pub carrier_count_in_catalog: usize,
    pub detected_by_gwas: bool,
    pub detected_by_rnai: bool,
    pub mutations: Vec<AnalyzedMutation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedMutation {
    pub variant_id: String,
    pub rank: u32,
    pub weight: f64,
    pub ratio: f64,
    pub carrier_count: usize,
}
