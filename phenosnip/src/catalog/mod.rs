//! Variant catalog: variants, their carrier lines and their gene effects.
//!
//! Lookups are bulk operations over a set of distinct ids. An id unknown to
//! the catalog resolves to no effects and no carriers; callers decide how to
//! report it.

pub mod variant;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PhenosnipError, Result};
pub use variant::{Variant, VariantEffect, VariantKind};

/// Everything the annotation join needs to know about one variant id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub effects: Vec<VariantEffect>,
    pub carriers_in_catalog: usize,
    pub carriers_in_analysis: usize,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        !self.effects.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantCatalog {
    variants: BTreeMap<String, Variant>,
    /// Every line that appears in at least one carrier set.
    lines: BTreeSet<String>,
}

impl VariantCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn get(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.get(variant_id)
    }

    pub fn contains(&self, variant_id: &str) -> bool {
        self.variants.contains_key(variant_id)
    }

    /// Variants in identifier order.
    pub fn variants(&self) -> impl Iterator<Item = &Variant> {
        self.variants.values()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn add_variant(&mut self, variant: Variant) -> Result<()> {
        if self.variants.contains_key(&variant.variant_id) {
            return Err(PhenosnipError::integrity(&variant.variant_id, "variant is already in the catalog"));
        }
        for line in &variant.carrier_lines {
            self.lines.insert(line.clone());
        }
        self.variants.insert(variant.variant_id.clone(), variant);
        Ok(())
    }

    /// Records that `line_id` carries the alternate allele. Returns `false`
    /// when the pair was already known.
    pub fn add_carrier(&mut self, variant_id: &str, line_id: &str) -> Result<bool> {
        let variant = self
            .variants
            .get_mut(variant_id)
            .ok_or_else(|| PhenosnipError::integrity(variant_id, format!("carrier line {} references an unknown variant", line_id)))?;
        let inserted = variant.carrier_lines.insert(line_id.to_string());
        self.lines.insert(line_id.to_string());
        Ok(inserted)
    }

    pub fn add_effect(&mut self, effect: VariantEffect) -> Result<()> {
        let variant = self.variants.get_mut(&effect.variant_id).ok_or_else(|| {
            PhenosnipError::integrity(&effect.variant_id, format!("effect on gene {} references an unknown variant", effect.gene_id))
        })?;
        if variant.effects.iter().any(|e| e.gene_id == effect.gene_id) {
            return Err(PhenosnipError::integrity(
                format!("{}/{}", effect.variant_id, effect.gene_id),
                "duplicate variant effect",
            ));
        }
        variant.effects.push(effect);
        Ok(())
    }

    /// Effects of every id in `ids`; unknown ids map to an empty list.
    pub fn lookup_effects<'a, I>(&self, ids: I) -> HashMap<String, Vec<VariantEffect>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        ids.into_iter()
            .map(|id| {
                let effects = self.variants.get(id).map(|v| v.effects.clone()).unwrap_or_default();
                (id.to_string(), effects)
            })
            .collect()
    }

    pub fn carrier_lines(&self, variant_id: &str) -> Option<&BTreeSet<String>> {
        self.variants.get(variant_id).map(|v| &v.carrier_lines)
    }

    /// Number of carrier lines, optionally restricted to `restrict_to`.
    pub fn carrier_count(&self, variant_id: &str, restrict_to: Option<&HashSet<String>>) -> usize {
        match (self.variants.get(variant_id), restrict_to) {
            (None, _) => 0,
            (Some(v), None) => v.carrier_lines.len(),
            (Some(v), Some(allowed)) => v.carrier_lines.iter().filter(|l| allowed.contains(*l)).count(),
        }
    }

    /// Distinct lines over all carrier sets.
    pub fn total_line_count(&self) -> usize {
        self.lines.len()
    }

    /// Resolves effects and both carrier counts for each distinct id once.
    pub fn resolve<'a, I>(&self, ids: I, used_lines: &HashSet<String>) -> HashMap<String, Resolution>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let distinct: BTreeSet<&str> = ids.into_iter().collect();
        let effects = self.lookup_effects(distinct.iter().copied());
        let resolved: HashMap<String, Resolution> = effects
            .into_iter()
            .map(|(id, effects)| {
                let res = Resolution {
                    carriers_in_catalog: self.carrier_count(&id, None),
                    carriers_in_analysis: self.carrier_count(&id, Some(used_lines)),
                    effects,
                };
                (id, res)
            })
            .collect();
        debug!(
            "Resolved {} distinct variant ids, {} with at least one effect",
            resolved.len(),
            resolved.values().filter(|r| r.is_resolved()).count()
        );
        resolved
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn effect(variant_id: &str, gene_id: &str, symbol: &str) -> VariantEffect {
        VariantEffect {
            gene_id: gene_id.to_string(),
            variant_id: variant_id.to_string(),
            gene_symbol: symbol.to_string(),
            relative_position: "0".to_string(),
            effect_type: "INTRON".to_string(),
        }
    }

    pub(crate) fn snp(id: &str, carriers: &[&str]) -> Variant {
        let mut parts = id.split('_');
        let chrom = parts.next().unwrap_or("2L").to_string();
        let pos = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1);
        let mut v = Variant::new(id, chrom, pos, "A", "T", 10, carriers.len() as u32, VariantKind::Snp);
        v.carrier_lines = carriers.iter().map(|c| c.to_string()).collect();
        v
    }

    fn sample_catalog() -> VariantCatalog {
        let mut catalog = VariantCatalog::new();
        catalog.add_variant(snp("2L_100_SNP", &["line_1", "line_2"])).unwrap();
        catalog.add_variant(snp("2L_200_SNP", &["line_2", "line_3", "line_4"])).unwrap();
        catalog.add_effect(effect("2L_200_SNP", "FBgn0001", "abc")).unwrap();
        catalog.add_effect(effect("2L_200_SNP", "FBgn0002", "xyz")).unwrap();
        catalog
    }

    #[test]
    fn unknown_ids_resolve_to_nothing() {
        let catalog = sample_catalog();
        let effects = catalog.lookup_effects(["3R_5_SNP", "2L_200_SNP"]);
        assert!(effects["3R_5_SNP"].is_empty());
        assert_eq!(effects["2L_200_SNP"].len(), 2);
        assert_eq!(catalog.carrier_count("3R_5_SNP", None), 0);
    }

    #[test]
    fn carrier_counts_respect_restriction() {
        let catalog = sample_catalog();
        let used: HashSet<String> = ["line_2", "line_9"].iter().map(|s| s.to_string()).collect();
        assert_eq!(catalog.carrier_count("2L_200_SNP", None), 3);
        assert_eq!(catalog.carrier_count("2L_200_SNP", Some(&used)), 1);
        assert_eq!(catalog.total_line_count(), 4);
    }

    #[test]
    fn carrier_sets_ignore_duplicate_pairs() {
        let mut catalog = sample_catalog();
        assert!(!catalog.add_carrier("2L_100_SNP", "line_1").unwrap());
        assert!(catalog.add_carrier("2L_100_SNP", "line_7").unwrap());
        assert_eq!(catalog.carrier_count("2L_100_SNP", None), 3);
        assert_eq!(catalog.total_line_count(), 5);
        assert_eq!(
            catalog.lines().collect::<Vec<_>>(),
            vec!["line_1", "line_2", "line_3", "line_4", "line_7"]
        );
    }

    #[test]
    fn children_of_unknown_variants_are_rejected() {
        let mut catalog = sample_catalog();
        assert!(matches!(
            catalog.add_carrier("X_1_SNP", "line_1"),
            Err(PhenosnipError::ReferentialIntegrity { .. })
        ));
        assert!(catalog.add_effect(effect("X_1_SNP", "FBgn9", "q")).is_err());
        assert!(catalog.add_effect(effect("2L_200_SNP", "FBgn0001", "abc")).is_err());
    }

    #[test]
    fn resolve_handles_each_distinct_id_once() {
        let catalog = sample_catalog();
        let used: HashSet<String> = ["line_3".to_string()].into_iter().collect();
        let res = catalog.resolve(["2L_200_SNP", "2L_100_SNP", "2L_200_SNP"], &used);
        assert_eq!(res.len(), 2);
        assert!(res["2L_200_SNP"].is_resolved());
        assert_eq!(res["2L_200_SNP"].carriers_in_analysis, 1);
        assert!(!res["2L_100_SNP"].is_resolved());
        assert_eq!(res["2L_100_SNP"].carriers_in_catalog, 2);
    }
}
