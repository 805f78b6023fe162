use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PhenosnipError, Result};
use crate::models::SummaryMethod;

/// How strains are assigned to the low/high tails of a group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TailPolicy {
    /// The `k` lowest ranks are LOW, the `k` highest are HIGH.
    Count { k: usize },
    /// Same as `Count` with `k = floor(N * percent / 100)`.
    Percent { percent: f64 },
    /// Values beyond `z` sample standard deviations from the mean.
    ZScore { z: f64 },
}

impl Default for TailPolicy {
    fn default() -> Self {
        TailPolicy::Percent { percent: 10.0 }
    }
}

/// Which statistic an alpha threshold is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignificancePolicy {
    #[default]
    Ratio,
    Fdr,
    RatioOrFdr,
}

/// Effect columns emitted for each side of an annotated pair row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairEffectPolicy {
    /// One output row per pair, using each variant's first catalog effect.
    #[default]
    FirstEffect,
    /// One output row per combination of both variants' effects.
    CrossProduct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineNaming {
    /// Prefix the genotype source uses for line ids (e.g. `dgrp21`).
    pub catalog_prefix: String,
    /// Canonical prefix shared by catalog lines and strains (e.g. `line_21`).
    pub line_prefix: String,
}

impl Default for LineNaming {
    fn default() -> Self {
        LineNaming {
            catalog_prefix: "dgrp".to_string(),
            line_prefix: "line_".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub validate_alleles: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig { validate_alleles: true }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub default_method: Option<SummaryMethod>,
    pub tail_policy: TailPolicy,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub significance: SignificancePolicy,
}

/// Layout of one association-result file shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultLayout {
    pub delimiter: char,
    /// Header names the variant id columns; one entry for single-variant
    /// results, two for pairs.
    pub id_columns: Vec<String>,
    pub skip_before_header: usize,
    pub skip_after_header: usize,
}

impl ResultLayout {
    pub fn single() -> Self {
        ResultLayout {
            delimiter: '\t',
            id_columns: vec!["SNP".to_string()],
            skip_before_header: 0,
            skip_after_header: 0,
        }
    }

    pub fn pair() -> Self {
        ResultLayout {
            delimiter: ' ',
            id_columns: vec!["1_SNP".to_string(), "2_SNP".to_string()],
            skip_before_header: 1,
            skip_after_header: 1,
        }
    }
}

impl Default for ResultLayout {
    fn default() -> Self {
        ResultLayout::single()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub single: ResultLayout,
    pub pair: ResultLayout,
    pub pair_effects: PairEffectPolicy,
    pub annotated_suffix: String,
    pub missing_suffix: String,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        AnnotationConfig {
            single: ResultLayout::single(),
            pair: ResultLayout::pair(),
            pair_effects: PairEffectPolicy::default(),
            annotated_suffix: "_genemap.txt".to_string(),
            missing_suffix: "_genemap_missing.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnpSetConfig {
    pub min_allele_count: u32,
}

impl Default for SnpSetConfig {
    fn default() -> Self {
        SnpSetConfig { min_allele_count: 10 }
    }
}

/// Every tunable of a run. All sections fall back to their defaults, so a
/// partial JSON file is valid.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub lines: LineNaming,
    pub catalog: CatalogConfig,
    pub scoring: ScoringConfig,
    pub threshold: ThresholdConfig,
    pub annotation: AnnotationConfig,
    pub snp_sets: SnpSetConfig,
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Reading configuration from {}", path.display());
        let raw = fs::read_to_string(path).map_err(|e| PhenosnipError::io(path, e))?;
        let config: PipelineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        debug!("Configuration: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.scoring.tail_policy {
            TailPolicy::Percent { percent } if !(0.0..=50.0).contains(&percent) => {
                return Err(PhenosnipError::Config(format!(
                    "tail percent must lie in [0, 50], got {}",
                    percent
                )))
            }
            TailPolicy::ZScore { z } if !(z.is_finite() && z >= 0.0) => {
                return Err(PhenosnipError::Config(format!("z threshold must be a non-negative number, got {}", z)))
            }
            _ => {}
        }
        if self.annotation.single.id_columns.len() != 1 {
            return Err(PhenosnipError::Config("single-variant layout needs exactly one id column".into()));
        }
        if self.annotation.pair.id_columns.len() != 2 {
            return Err(PhenosnipError::Config("pair layout needs exactly two id columns".into()));
        }
        if self.lines.line_prefix.is_empty() {
            return Err(PhenosnipError::Config("line prefix must not be empty".into()));
        }
        Ok(())
    }

    /// Writes the configuration as pretty JSON, creating parent folders.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PhenosnipError::io(parent, e))?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?).map_err(|e| PhenosnipError::io(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{ "scoring": { "tail_policy": { "kind": "count", "k": 3 } } }"#).unwrap();
        assert_eq!(cfg.scoring.tail_policy, TailPolicy::Count { k: 3 });
        assert_eq!(cfg.lines, LineNaming::default());
        assert_eq!(cfg.annotation.pair.id_columns, vec!["1_SNP", "2_SNP"]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn written_config_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/config.json");
        let mut cfg = PipelineConfig::default();
        cfg.threshold.significance = SignificancePolicy::RatioOrFdr;
        cfg.write_json(&path).unwrap();
        assert_eq!(PipelineConfig::from_json_file(&path).unwrap(), cfg);
    }

    #[test]
    fn out_of_range_tail_percent_is_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.scoring.tail_policy = TailPolicy::Percent { percent: 75.0 };
        assert!(matches!(cfg.validate(), Err(PhenosnipError::Config(_))));
    }
}
