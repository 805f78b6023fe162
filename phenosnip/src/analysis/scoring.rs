//! Rank-weighted tail enrichment of each variant's carrier strains.

use std::collections::HashMap;

use tracing::{debug, info, info_span};

use crate::config::LineNaming;
use crate::error::{PhenosnipError, Result};
use crate::models::{ExtremityClass, PhenotypeKey, ProcessedMutation, ProcessedStrain};
use crate::store::Database;

/// Multiple-testing correction over the ratios of one group.
pub trait FdrEstimator {
    /// One value per entry of `ratios`, in the same order.
    fn estimate(&self, ratios: &[f64]) -> Vec<Option<f64>>;
}

/// Leaves `fdr` unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFdr;

impl FdrEstimator for NoFdr {
    fn estimate(&self, ratios: &[f64]) -> Vec<Option<f64>> {
        vec![None; ratios.len()]
    }
}

fn contribution(strain: &ProcessedStrain) -> f64 {
    let magnitude = strain.reference_value * strain.rank as f64;
    match strain.extremity_class {
        Some(ExtremityClass::Low) => -magnitude,
        Some(ExtremityClass::High) => magnitude,
        None => 0.0,
    }
}

/// Mean contribution of the carrier strains, `None` without carriers.
pub fn weight_of(carriers: &[&ProcessedStrain]) -> Option<f64> {
    if carriers.is_empty() {
        return None;
    }
    let total: f64 = carriers.iter().map(|s| contribution(s)).sum();
    Some(total / carriers.len() as f64)
}

/// Share of the other weights at least as extreme in the direction of
/// `weight`. `sorted` holds every weight of the group, ascending.
fn empirical_ratio(weight: f64, sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n <= 1 || weight == 0.0 {
        return 1.0;
    }
    let as_extreme = if weight > 0.0 {
        n - sorted.partition_point(|w| *w < weight)
    } else {
        sorted.partition_point(|w| *w <= weight)
    };
    (as_extreme - 1) as f64 / (n - 1) as f64
}

/// Scores every catalog variant with at least one carrier among the
/// group's strains. Variants without carriers in the group are skipped.
pub fn score_group(
    db: &Database,
    key: &PhenotypeKey,
    naming: &LineNaming,
    fdr: &dyn FdrEstimator,
) -> Result<Vec<ProcessedMutation>> {
    let group = db
        .phenotype(key)
        .ok_or_else(|| PhenosnipError::integrity(key, "no strain summaries to score against"))?;
    let by_line: HashMap<String, &ProcessedStrain> = group
        .strains
        .iter()
        .map(|s| (naming.line_for_strain(&s.strain_number), s))
        .collect();

    let mut scored: Vec<(String, f64, usize)> = Vec::new();
    for variant in db.catalog().variants() {
        let carriers: Vec<&ProcessedStrain> = variant
            .carrier_lines
            .iter()
            .filter_map(|line| by_line.get(line).copied())
            .collect();
        if let Some(weight) = weight_of(&carriers) {
            scored.push((variant.variant_id.clone(), weight, carriers.len()));
        }
    }
    debug!(
        "{} of {} variants have carriers among the {} strains of {}",
        scored.len(),
        db.catalog().len(),
        group.strains.len(),
        key
    );

    let mut order: Vec<usize> = (0..scored.len()).collect();
    order.sort_by(|a, b| scored[*a].1.total_cmp(&scored[*b].1));
    let mut ranks = vec![0u32; scored.len()];
    for (pos, idx) in order.iter().enumerate() {
        ranks[*idx] = pos as u32 + 1;
    }
    let sorted: Vec<f64> = order.iter().map(|idx| scored[*idx].1).collect();
    let ratios: Vec<f64> = scored.iter().map(|(_, w, _)| empirical_ratio(*w, &sorted)).collect();
    let fdrs = fdr.estimate(&ratios);

    let rows = scored
        .into_iter()
        .enumerate()
        .map(|(i, (variant_id, weight, carrier_count))| ProcessedMutation {
            phenotype_name: key.phenotype_name.clone(),
            method: key.method,
            age: key.age,
            variant_id,
            weight,
            rank: ranks[i],
            ratio: ratios[i],
            fdr: fdrs.get(i).copied().flatten(),
            carrier_count,
        })
        .collect();
    Ok(rows)
}

/// Stored score of one variant in `key`. Ranks and ratios only exist
/// relative to the whole group, so the group must have been scored with
/// [`run_scoring`]. `None` when it was not, or when the variant has no
/// carrier among the group's strains.
pub fn score<'a>(db: &'a Database, variant_id: &str, key: &PhenotypeKey) -> Option<&'a ProcessedMutation> {
    db.phenotype(key)?.mutations.iter().find(|m| m.variant_id == variant_id)
}

/// Recomputes and stores the variant scores of `key`.
pub fn run_scoring(db: &mut Database, key: &PhenotypeKey, naming: &LineNaming, fdr: &dyn FdrEstimator) -> Result<usize> {
    let _span = info_span!("score", key = %key).entered();
    let rows = score_group(db, key, naming, fdr)?;
    let n = rows.len();
    db.replace_processed_mutations(key, rows)?;
    info!("Stored {} variant scores for {}", n, key);
    Ok(n)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analysis::aggregation::run_aggregation;
    use crate::analysis::aggregation::tests::{hp_key, three_strain_db};
    use crate::catalog::tests::snp;
    use crate::catalog::VariantCatalog;
    use crate::config::TailPolicy;

    /// Three strains ranked 1..3 (LOW, -, HIGH) and four variants.
    pub(crate) fn scored_db() -> Database {
        let mut db = three_strain_db();
        let mut catalog = VariantCatalog::new();
        catalog.add_variant(snp("2L_10_SNP", &["line_3"])).unwrap();
        catalog.add_variant(snp("2L_20_SNP", &["line_1", "line_3"])).unwrap();
        catalog.add_variant(snp("2L_30_SNP", &["line_1"])).unwrap();
        catalog.add_variant(snp("2L_40_SNP", &["line_2"])).unwrap();
        catalog.add_variant(snp("2L_50_SNP", &["line_99"])).unwrap();
        db.replace_catalog(catalog);
        run_aggregation(&mut db, &hp_key(), TailPolicy::Count { k: 1 }).unwrap();
        run_scoring(&mut db, &hp_key(), &LineNaming::default(), &NoFdr).unwrap();
        db
    }

    fn row<'a>(rows: &'a [ProcessedMutation], id: &str) -> &'a ProcessedMutation {
        rows.iter().find(|r| r.variant_id == id).unwrap()
    }

    #[test]
    fn weights_follow_carrier_extremity() {
        let db = scored_db();
        let rows = &db.phenotype(&hp_key()).unwrap().mutations;
        assert_eq!(row(rows, "2L_10_SNP").weight, 27.0);
        assert_eq!(row(rows, "2L_20_SNP").weight, 13.0);
        assert_eq!(row(rows, "2L_30_SNP").weight, -1.0);
        assert_eq!(row(rows, "2L_40_SNP").weight, 0.0);
        assert_eq!(row(rows, "2L_20_SNP").carrier_count, 2);
        assert!(rows.iter().all(|r| r.variant_id != "2L_50_SNP"));
    }

    #[test]
    fn ranks_and_ratios() {
        let db = scored_db();
        let rows = &db.phenotype(&hp_key()).unwrap().mutations;
        let mut ranks: Vec<u32> = rows.iter().map(|r| r.rank).collect();
        ranks.sort();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
        assert_eq!(row(rows, "2L_30_SNP").rank, 1);
        assert_eq!(row(rows, "2L_10_SNP").rank, 4);

        assert!(rows.iter().all(|r| (0.0..=1.0).contains(&r.ratio)));
        assert_eq!(row(rows, "2L_10_SNP").ratio, 0.0);
        assert!((row(rows, "2L_20_SNP").ratio - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(row(rows, "2L_30_SNP").ratio, 0.0);
        assert_eq!(row(rows, "2L_40_SNP").ratio, 1.0);
        assert!(rows.iter().all(|r| r.fdr.is_none()));
    }

    #[test]
    fn single_variant_lookup_reads_the_stored_row() {
        let db = scored_db();
        let stored = score(&db, "2L_20_SNP", &hp_key()).unwrap();
        assert_eq!(stored.weight, 13.0);
        assert_eq!(stored.carrier_count, 2);
        assert!(score(&db, "2L_50_SNP", &hp_key()).is_none());
        let other = PhenotypeKey::new("HP", hp_key().method, 5);
        assert!(score(&db, "2L_20_SNP", &other).is_none());
    }

    #[test]
    fn scoring_is_idempotent() {
        let mut db = scored_db();
        let first = db.phenotype(&hp_key()).unwrap().mutations.clone();
        run_scoring(&mut db, &hp_key(), &LineNaming::default(), &NoFdr).unwrap();
        assert_eq!(db.phenotype(&hp_key()).unwrap().mutations, first);
    }

    struct Halving;

    impl FdrEstimator for Halving {
        fn estimate(&self, ratios: &[f64]) -> Vec<Option<f64>> {
            ratios.iter().map(|r| Some(r / 2.0)).collect()
        }
    }

    #[test]
    fn fdr_comes_from_the_estimator() {
        let db = scored_db();
        let rows = score_group(&db, &hp_key(), &LineNaming::default(), &Halving).unwrap();
        assert_eq!(row(&rows, "2L_40_SNP").fdr, Some(0.5));
    }

    #[test]
    fn scoring_an_unknown_group_is_rejected() {
        let db = Database::new();
        assert!(matches!(
            score_group(&db, &hp_key(), &LineNaming::default(), &NoFdr),
            Err(PhenosnipError::ReferentialIntegrity { .. })
        ));
    }
}
