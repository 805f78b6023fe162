//! The run session: owns every persisted table and enforces the key
//! hierarchy between them.
//!
//! Replace operations validate the complete replacement set before touching
//! any existing row, so a rejected call leaves the database unchanged.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::VariantCatalog;
use crate::error::{PhenosnipError, Result};
use crate::helper_functions::{write_atomically, StagedFile};
use crate::models::{
    Alpha, AnalyzedPhenotype, Individual, PhenotypeKey, ProcessedMutation, ProcessedPhenotype, ProcessedStrain,
    Strain,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Database {
    strains: BTreeMap<String, Strain>,
    catalog: VariantCatalog,
    /// Sorted by key.
    phenotypes: Vec<ProcessedPhenotype>,
    next_measurement_id: u64,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening database snapshot {}", path.display());
        let file = File::open(path).map_err(|e| PhenosnipError::io(path, e))?;
        let db: Database = serde_json::from_reader(BufReader::new(file))?;
        debug!(
            "Loaded {} strains, {} variants, {} processed phenotypes",
            db.strains.len(),
            db.catalog.len(),
            db.phenotypes.len()
        );
        Ok(db)
    }

    /// Opens `path` when it exists, otherwise starts an empty database.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!("No snapshot at {}, starting an empty database", path.display());
            Ok(Self::new())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_atomically(path, |file| {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self)?;
            writer.flush().map_err(|e| PhenosnipError::io(path, e))
        })?;
        info!("Saved database snapshot to {}", path.display());
        Ok(())
    }

    // ── phenotype side ──────────────────────────────────────────────────

    pub fn strains(&self) -> impl Iterator<Item = &Strain> {
        self.strains.values()
    }

    pub fn strain(&self, number: &str) -> Option<&Strain> {
        self.strains.get(number)
    }

    /// Inserts a strain without individuals; an existing strain is kept.
    pub fn ensure_strain(&mut self, number: &str, is_control: bool) {
        self.strains
            .entry(number.to_string())
            .or_insert_with(|| Strain::new(number, is_control));
    }

    /// Attaches an individual to its strain and numbers its measurements.
    pub fn add_individual(&mut self, mut individual: Individual) -> Result<()> {
        if self.find_individual(&individual.name).is_some() {
            return Err(PhenosnipError::integrity(&individual.name, "individual already recorded"));
        }
        let strain = self.strains.get_mut(&individual.strain_number).ok_or_else(|| {
            PhenosnipError::integrity(&individual.name, format!("strain {} does not exist", individual.strain_number))
        })?;
        for m in individual.measurements.iter_mut() {
            self.next_measurement_id += 1;
            m.id = self.next_measurement_id;
            m.individual_name = individual.name.clone();
        }
        strain.individuals.push(individual);
        Ok(())
    }

    pub fn find_individual(&self, name: &str) -> Option<&Individual> {
        self.strains
            .values()
            .flat_map(|s| s.individuals.iter())
            .find(|i| i.name == name)
    }

    /// Removes a strain together with its individuals and every summary
    /// computed for it. Groups that lose a summary are re-ranked 1..N in
    /// their previous order, and their scores and analyses are cleared.
    /// Extremity classes are kept until the group is aggregated again.
    pub fn remove_strain(&mut self, number: &str) -> Option<Strain> {
        let removed = self.strains.remove(number)?;
        for group in self.phenotypes.iter_mut() {
            let before = group.strains.len();
            group.strains.retain(|ps| ps.strain_number != number);
            if group.strains.len() == before {
                continue;
            }
            group.strains.sort_by_key(|ps| ps.rank);
            for (rank, ps) in (1u32..).zip(group.strains.iter_mut()) {
                ps.rank = rank;
            }
            if !group.mutations.is_empty() || !group.analyses.is_empty() {
                warn!("Strain {} removed, clearing scores and analyses of {}", number, group.key);
            }
            group.mutations.clear();
            group.analyses.clear();
            debug!("Dropped summary of strain {} from {}, re-aggregate to refresh extremity classes", number, group.key);
        }
        Some(removed)
    }

    // ── catalog ─────────────────────────────────────────────────────────

    pub fn catalog(&self) -> &VariantCatalog {
        &self.catalog
    }

    /// Swaps in a freshly loaded catalog. Scores computed against the old
    /// catalog are dropped with it.
    pub fn replace_catalog(&mut self, catalog: VariantCatalog) {
        let stale = self.phenotypes.iter().filter(|p| !p.mutations.is_empty()).count();
        if stale > 0 {
            warn!("Catalog replaced, clearing scores of {} processed phenotypes", stale);
        }
        for group in self.phenotypes.iter_mut() {
            group.mutations.clear();
            group.analyses.clear();
        }
        self.catalog = catalog;
    }

    // ── processed tables ────────────────────────────────────────────────

    pub fn phenotypes(&self) -> impl Iterator<Item = &ProcessedPhenotype> {
        self.phenotypes.iter()
    }

    pub fn phenotype(&self, key: &PhenotypeKey) -> Option<&ProcessedPhenotype> {
        self.phenotypes
            .binary_search_by(|p| p.key.cmp(key))
            .ok()
            .map(|idx| &self.phenotypes[idx])
    }

    pub fn processed_summaries(&self, strain_number: &str) -> Vec<&ProcessedStrain> {
        self.phenotypes
            .iter()
            .flat_map(|p| p.strains.iter())
            .filter(|ps| ps.strain_number == strain_number)
            .collect()
    }

    /// Replaces the strain summaries of `key`, creating the group if needed.
    /// Scores and analyses derived from the previous summaries are cleared.
    pub fn replace_processed_strains(&mut self, key: &PhenotypeKey, rows: Vec<ProcessedStrain>) -> Result<()> {
        let mut seen = HashSet::new();
        for row in &rows {
            if &row.key() != key {
                return Err(PhenosnipError::integrity(key, format!("summary of strain {} belongs to {}", row.strain_number, row.key())));
            }
            if !self.strains.contains_key(&row.strain_number) {
                return Err(PhenosnipError::integrity(key, format!("strain {} does not exist", row.strain_number)));
            }
            if !seen.insert(row.strain_number.as_str()) {
                return Err(PhenosnipError::integrity(key, format!("strain {} summarized twice", row.strain_number)));
            }
        }
        check_ranks(key, rows.iter().map(|r| r.rank))?;

        let group = self.group_entry(key);
        group.strains = rows;
        group.mutations.clear();
        group.analyses.clear();
        Ok(())
    }

    /// Replaces the variant scores of an existing group. Analyses derived
    /// from the previous scores are cleared.
    pub fn replace_processed_mutations(&mut self, key: &PhenotypeKey, rows: Vec<ProcessedMutation>) -> Result<()> {
        let idx = self.group_index(key)?;
        let mut seen = HashSet::new();
        for row in &rows {
            if &row.key() != key {
                return Err(PhenosnipError::integrity(key, format!("score of {} belongs to {}", row.variant_id, row.key())));
            }
            if !self.catalog.contains(&row.variant_id) {
                return Err(PhenosnipError::integrity(key, format!("variant {} is not in the catalog", row.variant_id)));
            }
            if !seen.insert(row.variant_id.as_str()) {
                return Err(PhenosnipError::integrity(key, format!("variant {} scored twice", row.variant_id)));
            }
            if !(0.0..=1.0).contains(&row.ratio) {
                return Err(PhenosnipError::integrity(key, format!("ratio {} of {} is outside [0, 1]", row.ratio, row.variant_id)));
            }
        }
        check_ranks(key, rows.iter().map(|r| r.rank))?;

        let group = &mut self.phenotypes[idx];
        group.mutations = rows;
        group.analyses.clear();
        Ok(())
    }

    /// Stores an analysis, replacing any previous one with the same alpha.
    pub fn replace_analysis(&mut self, analysis: AnalyzedPhenotype) -> Result<()> {
        let key = analysis.key();
        let idx = self.group_index(&key)?;
        let group = &mut self.phenotypes[idx];
        let previous = group.analyses.iter().position(|a| a.alpha == analysis.alpha);
        match previous {
            Some(pos) => {
                debug!("Replacing analysis {} at alpha {}", key, analysis.alpha);
                group.analyses[pos] = analysis;
            }
            None => {
                group.analyses.push(analysis);
                group.analyses.sort_by(|a, b| a.alpha.cmp(&b.alpha));
            }
        }
        Ok(())
    }

    pub fn remove_analysis(&mut self, key: &PhenotypeKey, alpha: Alpha) -> Option<AnalyzedPhenotype> {
        let idx = self.group_index(key).ok()?;
        let group = &mut self.phenotypes[idx];
        let pos = group.analyses.iter().position(|a| a.alpha == alpha)?;
        Some(group.analyses.remove(pos))
    }

    fn group_index(&self, key: &PhenotypeKey) -> Result<usize> {
        self.phenotypes
            .binary_search_by(|p| p.key.cmp(key))
            .map_err(|_| PhenosnipError::integrity(key, "processed phenotype does not exist"))
    }

    fn group_entry(&mut self, key: &PhenotypeKey) -> &mut ProcessedPhenotype {
        let idx = match self.phenotypes.binary_search_by(|p| p.key.cmp(key)) {
            Ok(idx) => idx,
            Err(idx) => {
                self.phenotypes.insert(idx, ProcessedPhenotype::new(key.clone()));
                idx
            }
        };
        &mut self.phenotypes[idx]
    }

    // ── export ──────────────────────────────────────────────────────────

    /// Writes every table as a headed CSV file into `dir`.
    pub fn export_tables(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| PhenosnipError::io(dir, e))?;

        let strains = self.strains.values().map(|s| StrainRow {
            number: &s.number,
            is_control: s.is_control,
        });
        let individuals = self.individuals().map(|i| IndividualRow {
            name: &i.name,
            strain_number: &i.strain_number,
            age: i.age,
            sex: i.sex,
            date: i.date.as_deref(),
        });
        let data = self.individuals().flat_map(|i| i.measurements.iter());
        let processed_strains = self.phenotypes.iter().flat_map(|p| p.strains.iter());
        let processed_mutations = self.phenotypes.iter().flat_map(|p| p.mutations.iter());
        let analyses = || self.phenotypes.iter().flat_map(|p| p.analyses.iter());
        let genes = analyses().flat_map(|a| {
            a.genes.iter().map(move |g| AnalyzedGeneRow {
                name: &a.name,
                method: a.method.keyword(),
                age: a.age,
                alpha: a.alpha.value(),
                flybase_id: &g.flybase_id,
                gene_symbol: &g.gene_symbol,
                category: g.category.to_string(),
                best_rank: g.best_rank,
                significant_mutation_count: g.significant_mutation_count,
                carrier_count_in_analysis: g.carrier_count_in_analysis,
                carrier_count_in_catalog: g.carrier_count_in_catalog,
                detected_by_gwas: g.detected_by_gwas,
                detected_by_rnai: g.detected_by_rnai,
            })
        });
        let mutations = analyses().flat_map(|a| {
            a.genes.iter().flat_map(move |g| {
                g.mutations.iter().map(move |m| AnalyzedMutationRow {
                    name: &a.name,
                    method: a.method.keyword(),
                    age: a.age,
                    alpha: a.alpha.value(),
                    flybase_id: &g.flybase_id,
                    variant_id: &m.variant_id,
                    rank: m.rank,
                    weight: m.weight,
                    ratio: m.ratio,
                    carrier_count: m.carrier_count,
                })
            })
        });

        let written = vec![
            write_table(dir, "strain", strains)?,
            write_table(dir, "individual", individuals)?,
            write_table(dir, "phenotype_data", data)?,
            write_table(dir, "processed_strain", processed_strains)?,
            write_table(dir, "processed_mutation", processed_mutations)?,
            write_table(dir, "analyzed_gene", genes)?,
            write_table(dir, "analyzed_mutation", mutations)?,
        ];
        info!("Exported {} tables to {}", written.len(), dir.display());
        Ok(written)
    }

    fn individuals(&self) -> impl Iterator<Item = &Individual> {
        self.strains.values().flat_map(|s| s.individuals.iter())
    }
}

/// Ranks must form the permutation 1..N.
fn check_ranks(key: &PhenotypeKey, ranks: impl Iterator<Item = u32>) -> Result<()> {
    let mut ranks: Vec<u32> = ranks.collect();
    ranks.sort_unstable();
    for (expected, rank) in (1u32..).zip(ranks.iter()) {
        if *rank != expected {
            return Err(PhenosnipError::integrity(key, format!("ranks are not a permutation of 1..{}", ranks.len())));
        }
    }
    Ok(())
}

fn write_table<T, I>(dir: &Path, name: &str, rows: I) -> Result<PathBuf>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut staged = StagedFile::new(dir.join(format!("{}.csv", name)))?;
    {
        let mut writer = csv::Writer::from_writer(staged.writer());
        let mut count = 0usize;
        for row in rows {
            writer.serialize(row)?;
            count += 1;
        }
        writer.flush().map_err(|e| PhenosnipError::io(dir.join(name), e))?;
        debug!("TABLE={} rows={}", name, count);
    }
    staged.commit()
}

#[derive(Serialize)]
struct StrainRow<'a> {
    number: &'a str,
    is_control: bool,
}

#[derive(Serialize)]
struct IndividualRow<'a> {
    name: &'a str,
    strain_number: &'a str,
    age: u32,
    sex: crate::models::Sex,
    date: Option<&'a str>,
}

#[derive(Serialize)]
struct AnalyzedGeneRow<'a> {
    name: &'a str,
    method: &'static str,
    age: u32,
    alpha: f64,
    flybase_id: &'a str,
    gene_symbol: &'a str,
    category: String,
    best_rank: u32,
    significant_mutation_count: usize,
    carrier_count_in_analysis: usize,
    carrier_count_in_catalog: usize,
    detected_by_gwas: bool,
    detected_by_rnai: bool,
}

#[derive(Serialize)]
struct AnalyzedMutationRow<'a> {
    name: &'a str,
    method: &'static str,
    age: u32,
    alpha: f64,
    flybase_id: &'a str,
    variant_id: &'a str,
    rank: u32,
    weight: f64,
    ratio: f64,
    carrier_count: usize,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::tests::snp;
    use crate::models::{PhenotypeData, Sex, SummaryMethod};

    pub(crate) fn individual(name: &str, strain: &str, phenotype: &str, values: &[f64]) -> Individual {
        Individual {
            name: name.to_string(),
            strain_number: strain.to_string(),
            age: 1,
            sex: Sex::Female,
            date: None,
            measurements: values
                .iter()
                .map(|v| PhenotypeData {
                    id: 0,
                    phenotype_name: phenotype.to_string(),
                    value: Some(*v),
                    age: 1,
                    individual_name: String::new(),
                })
                .collect(),
        }
    }

    fn summary(key: &PhenotypeKey, strain: &str, value: f64, rank: u32) -> ProcessedStrain {
        ProcessedStrain {
            phenotype_name: key.phenotype_name.clone(),
            method: key.method,
            age: key.age,
            strain_number: strain.to_string(),
            reference_value: value,
            rank,
            extremity_class: None,
        }
    }

    fn score(key: &PhenotypeKey, variant: &str, rank: u32) -> ProcessedMutation {
        ProcessedMutation {
            phenotype_name: key.phenotype_name.clone(),
            method: key.method,
            age: key.age,
            variant_id: variant.to_string(),
            weight: rank as f64,
            rank,
            ratio: 0.5,
            fdr: None,
            carrier_count: 1,
        }
    }

    fn analysis_at(alpha: f64) -> AnalyzedPhenotype {
        AnalyzedPhenotype {
            name: "HP".into(),
            method: SummaryMethod::Mean,
            age: 1,
            alpha: Alpha(alpha),
            genes: vec![],
        }
    }

    fn seeded() -> (Database, PhenotypeKey) {
        let mut db = Database::new();
        for s in ["1", "2"] {
            db.ensure_strain(s, false);
        }
        db.add_individual(individual("i1", "1", "HP", &[1.0, 2.0])).unwrap();
        db.add_individual(individual("i2", "2", "HP", &[3.0])).unwrap();
        let mut catalog = VariantCatalog::new();
        catalog.add_variant(snp("2L_1_SNP", &["line_1"])).unwrap();
        db.replace_catalog(catalog);
        (db, PhenotypeKey::new("HP", SummaryMethod::Mean, 1))
    }

    #[test]
    fn measurements_get_unique_ids() {
        let (db, _) = seeded();
        let ids: Vec<u64> = db.individuals().flat_map(|i| i.measurements.iter().map(|m| m.id)).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(db.find_individual("i1").unwrap().measurements[0].individual_name, "i1");
    }

    #[test]
    fn individuals_need_an_existing_strain() {
        let (mut db, _) = seeded();
        assert!(db.add_individual(individual("i9", "77", "HP", &[1.0])).is_err());
        assert!(db.add_individual(individual("i1", "2", "HP", &[1.0])).is_err());
    }

    #[test]
    fn orphan_children_are_rejected_before_any_write() {
        let (mut db, key) = seeded();
        let err = db.replace_processed_mutations(&key, vec![score(&key, "2L_1_SNP", 1)]);
        assert!(matches!(err, Err(PhenosnipError::ReferentialIntegrity { .. })));

        let err = db.replace_processed_strains(&key, vec![summary(&key, "1", 1.5, 1), summary(&key, "42", 3.0, 2)]);
        assert!(err.is_err());
        assert!(db.phenotype(&key).is_none());

        db.replace_processed_strains(&key, vec![summary(&key, "1", 1.5, 1), summary(&key, "2", 3.0, 2)])
            .unwrap();
        let bad = db.replace_processed_mutations(&key, vec![score(&key, "X_9_SNP", 1)]);
        assert!(bad.is_err());
        assert!(db.phenotype(&key).unwrap().mutations.is_empty());
    }

    #[test]
    fn ranks_must_be_a_permutation() {
        let (mut db, key) = seeded();
        let err = db.replace_processed_strains(&key, vec![summary(&key, "1", 1.5, 1), summary(&key, "2", 3.0, 3)]);
        assert!(err.is_err());
    }

    #[test]
    fn rescoring_replaces_rows_and_clears_derived_analyses() {
        let (mut db, key) = seeded();
        db.replace_processed_strains(&key, vec![summary(&key, "1", 1.5, 1), summary(&key, "2", 3.0, 2)])
            .unwrap();
        db.replace_processed_mutations(&key, vec![score(&key, "2L_1_SNP", 1)]).unwrap();
        db.replace_analysis(analysis_at(0.05)).unwrap();
        assert_eq!(db.phenotype(&key).unwrap().analyses.len(), 1);

        db.replace_processed_mutations(&key, vec![score(&key, "2L_1_SNP", 1)]).unwrap();
        assert!(db.phenotype(&key).unwrap().analyses.is_empty());
        assert_eq!(db.phenotype(&key).unwrap().mutations.len(), 1);
    }

    #[test]
    fn removing_a_strain_cascades() {
        let (mut db, key) = seeded();
        db.replace_processed_strains(&key, vec![summary(&key, "1", 1.5, 1), summary(&key, "2", 3.0, 2)])
            .unwrap();
        db.replace_processed_mutations(&key, vec![score(&key, "2L_1_SNP", 1)]).unwrap();
        db.replace_analysis(analysis_at(0.05)).unwrap();

        let removed = db.remove_strain("1").unwrap();
        assert_eq!(removed.individuals.len(), 1);
        assert!(db.find_individual("i1").is_none());
        assert!(db.processed_summaries("1").is_empty());
        let left = db.processed_summaries("2");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].rank, 1);

        let group = db.phenotype(&key).unwrap();
        assert!(group.mutations.is_empty());
        assert!(group.analyses.is_empty());
        assert!(db.remove_strain("1").is_none());
    }

    #[test]
    fn remaining_ranks_stay_a_permutation_after_removal() {
        let (mut db, key) = seeded();
        db.ensure_strain("3", false);
        db.replace_processed_strains(
            &key,
            vec![summary(&key, "2", 3.0, 3), summary(&key, "1", 1.5, 1), summary(&key, "3", 2.0, 2)],
        )
        .unwrap();
        db.remove_strain("3");
        let got: Vec<(String, u32)> = db
            .phenotype(&key)
            .unwrap()
            .strains
            .iter()
            .map(|ps| (ps.strain_number.clone(), ps.rank))
            .collect();
        assert_eq!(got, vec![("1".to_string(), 1), ("2".to_string(), 2)]);
        assert!(check_ranks(&key, got.iter().map(|(_, r)| *r)).is_ok());
    }

    #[test]
    fn analyses_are_kept_per_alpha() {
        let (mut db, key) = seeded();
        db.replace_processed_strains(&key, vec![summary(&key, "1", 1.5, 1), summary(&key, "2", 3.0, 2)])
            .unwrap();
        db.replace_analysis(analysis_at(0.1)).unwrap();
        db.replace_analysis(analysis_at(0.05)).unwrap();
        db.replace_analysis(analysis_at(0.05)).unwrap();
        let alphas: Vec<Alpha> = db.phenotype(&key).unwrap().analyses.iter().map(|a| a.alpha).collect();
        assert_eq!(alphas, vec![Alpha(0.05), Alpha(0.1)]);

        assert_eq!(db.remove_analysis(&key, Alpha(0.05)).map(|a| a.alpha), Some(Alpha(0.05)));
        assert!(db.remove_analysis(&key, Alpha(0.05)).is_none());
        assert!(db.phenotype(&key).unwrap().analysis(Alpha(0.1)).is_some());
    }

    #[test]
    fn snapshot_round_trips_and_exports() {
        let (mut db, key) = seeded();
        db.replace_processed_strains(&key, vec![summary(&key, "1", 1.5, 1), summary(&key, "2", 3.0, 2)])
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        db.save(&path).unwrap();
        assert_eq!(Database::load(&path).unwrap(), db);

        let written = db.export_tables(dir.path().join("export")).unwrap();
        assert_eq!(written.len(), 7);
        let strains = fs::read_to_string(dir.path().join("export/processed_strain.csv")).unwrap();
        assert!(strains.starts_with("phenotype_name,method,age,strain_number,reference_value,rank,extremity_class"));
        assert!(strains.contains("HP,MEAN,1,2,3.0,2,"));
    }
}
