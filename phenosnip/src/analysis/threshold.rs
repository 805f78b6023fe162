//! Alpha-filtered rollup of variant scores into genes.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, info, info_span};

use crate::config::{LineNaming, SignificancePolicy};
use crate::error::{PhenosnipError, Result};
use crate::models::{
    Alpha, AnalyzedGene, AnalyzedMutation, AnalyzedPhenotype, EffectCategory, PhenotypeKey, ProcessedMutation,
};
use crate::store::Database;

/// Genes implicated by independent screens.
#[derive(Debug, Clone, Default)]
pub struct ExternalEvidence {
    pub gwas_genes: HashSet<String>,
    pub rnai_genes: HashSet<String>,
}

pub fn is_significant(mutation: &ProcessedMutation, alpha: Alpha, policy: SignificancePolicy) -> bool {
    let by_ratio = mutation.ratio <= alpha.value();
    let by_fdr = mutation.fdr.is_some_and(|f| f <= alpha.value());
    match policy {
        SignificancePolicy::Ratio => by_ratio,
        SignificancePolicy::Fdr => by_fdr,
        SignificancePolicy::RatioOrFdr => by_ratio || by_fdr,
    }
}

struct GeneAccumulator<'a> {
    symbol: &'a str,
    category: EffectCategory,
    carriers: BTreeSet<&'a str>,
    mutations: Vec<&'a ProcessedMutation>,
}

pub fn analyze(
    db: &Database,
    key: &PhenotypeKey,
    alpha: Alpha,
    policy: SignificancePolicy,
    naming: &LineNaming,
    evidence: &ExternalEvidence,
) -> Result<AnalyzedPhenotype> {
    let group = db
        .phenotype(key)
        .ok_or_else(|| PhenosnipError::integrity(key, "processed phenotype does not exist"))?;
    let group_lines: HashSet<String> = group
        .strains
        .iter()
        .map(|s| naming.line_for_strain(&s.strain_number))
        .collect();
    let catalog = db.catalog();

    let significant: Vec<&ProcessedMutation> =
        group.mutations.iter().filter(|m| is_significant(m, alpha, policy)).collect();

    let mut genes: BTreeMap<&str, GeneAccumulator> = BTreeMap::new();
    let mut unmapped = 0usize;
    for mutation in significant.iter().copied() {
        let Some(variant) = catalog.get(&mutation.variant_id) else {
            unmapped += 1;
            continue;
        };
        if variant.effects.is_empty() {
            unmapped += 1;
        }
        for effect in &variant.effects {
            let category = EffectCategory::of(&effect.effect_type);
            let acc = genes.entry(effect.gene_id.as_str()).or_insert_with(|| GeneAccumulator {
                symbol: effect.gene_symbol.as_str(),
                category,
                carriers: BTreeSet::new(),
                mutations: Vec::new(),
            });
            acc.category = acc.category.min(category);
            acc.carriers.extend(variant.carrier_lines.iter().map(String::as_str));
            acc.mutations.push(mutation);
        }
    }
    debug!(
        "{} of {} variants significant at alpha {}, {} without gene effect",
        significant.len(),
        group.mutations.len(),
        alpha,
        unmapped
    );

    let mut analyzed: Vec<AnalyzedGene> = genes
        .into_iter()
        .map(|(gene_id, acc)| {
            let mut mutations: Vec<AnalyzedMutation> = acc
                .mutations
                .iter()
                .map(|m| AnalyzedMutation {
                    variant_id: m.variant_id.clone(),
                    rank: m.rank,
                    weight: m.weight,
                    ratio: m.ratio,
                    carrier_count: m.carrier_count,
                })
                .collect();
            mutations.sort_by_key(|m| m.rank);
            AnalyzedGene {
                flybase_id: gene_id.to_string(),
                gene_symbol: acc.symbol.to_string(),
                category: acc.category,
                best_rank: mutations.iter().map(|m| m.rank).min().unwrap_or_default(),
                significant_mutation_count: mutations.len(),
                carrier_count_in_analysis: acc.carriers.iter().filter(|l| group_lines.contains(**l)).count(),
                carrier_count_in_catalog: acc.carriers.len(),
                detected_by_gwas: evidence.gwas_genes.contains(gene_id),
                detected_by_rnai: evidence.rnai_genes.contains(gene_id),
                mutations,
            }
        })
        .collect();
    analyzed.sort_by(|a, b| a.best_rank.cmp(&b.best_rank).then_with(|| a.flybase_id.cmp(&b.flybase_id)));

    Ok(AnalyzedPhenotype {
        name: key.phenotype_name.clone(),
        method: key.method,
        age: key.age,
        alpha,
        genes: analyzed,
    })
}

/// Computes and stores the analysis of `key` at `alpha`, replacing a
/// previous analysis at the same alpha.
pub fn run_analysis(
    db: &mut Database,
    key: &PhenotypeKey,
    alpha: Alpha,
    policy: SignificancePolicy,
    naming: &LineNaming,
    evidence: &ExternalEvidence,
) -> Result<AnalyzedPhenotype> {
    let _span = info_span!("analyze", key = %key, alpha = %alpha).entered();
    let analysis = analyze(db, key, alpha, policy, naming, evidence)?;
    db.replace_analysis(analysis.clone())?;
    info!("Stored {} significant genes for {} at alpha {}", analysis.genes.len(), key, alpha);
    Ok(analysis)
}
