//! SNP sets handed to the epistasis tool: a focus set taken from annotated
//! single-variant reports and a test set of common SNPs plus the focus.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use tracing::{info, info_span};

use crate::catalog::{VariantCatalog, VariantKind};
use crate::error::{PhenosnipError, Result};
use crate::helper_functions::write_atomically;
use crate::models::SummaryMethod;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnpSets {
    /// Set A.
    pub focus: BTreeSet<String>,
    /// Set B: the common SNPs together with set A.
    pub kept: BTreeSet<String>,
}

/// SNP ids of the `ID` column of an annotated single-variant report.
pub fn read_focus_ids(path: &Path) -> Result<BTreeSet<String>> {
    let source = path.display().to_string();
    let file = File::open(path).map_err(|e| PhenosnipError::io(path, e))?;
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .quoting(false)
        .from_reader(file);
    let id_column = rdr
        .headers()?
        .iter()
        .position(|h| h.trim() == "ID")
        .ok_or_else(|| PhenosnipError::malformed(&source, 1, "missing column 'ID'"))?;

    let mut ids = BTreeSet::new();
    for record in rdr.records() {
        let record = record?;
        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
        let id = record
            .get(id_column)
            .ok_or_else(|| PhenosnipError::malformed(&source, line, "row has no ID field"))?
            .trim();
        if id.contains(VariantKind::Snp.tag()) {
            ids.insert(id.to_string());
        }
    }
    Ok(ids)
}

/// Common SNPs (both allele counts at least `min_allele_count`) plus the
/// SNPs named by `focus_reports`.
pub fn prepare_snp_sets(catalog: &VariantCatalog, focus_reports: &[PathBuf], min_allele_count: u32) -> Result<SnpSets> {
    let _span = info_span!("prepare_snp_sets", reports = focus_reports.len()).entered();
    let mut kept: BTreeSet<String> = catalog
        .variants()
        .filter(|v| v.kind() == VariantKind::Snp)
        .filter(|v| v.ref_count >= min_allele_count && v.alt_count >= min_allele_count)
        .map(|v| v.variant_id.clone())
        .collect();
    let common = kept.len();

    let mut focus = BTreeSet::new();
    for report in focus_reports {
        focus.extend(read_focus_ids(report)?);
    }
    kept.extend(focus.iter().cloned());
    info!("{} common SNPs, {} focus SNPs, {} SNPs kept", common, focus.len(), kept.len());
    Ok(SnpSets { focus, kept })
}

/// Writes `snpkept_<age>W_<method>.txt` and `snpsets_<age>W_<method>.txt`.
pub fn write_snp_sets(sets: &SnpSets, out_dir: &Path, age: u32, method: SummaryMethod) -> Result<(PathBuf, PathBuf)> {
    let kept_path = out_dir.join(format!("snpkept_{}W_{}.txt", age, method.keyword()));
    let sets_path = out_dir.join(format!("snpsets_{}W_{}.txt", age, method.keyword()));

    write_atomically(&kept_path, |f| {
        for id in &sets.kept {
            writeln!(f, "{}", id).map_err(|e| PhenosnipError::io(&kept_path, e))?;
        }
        Ok(())
    })?;
    write_atomically(&sets_path, |f| {
        let mut body = String::from("SET_A\n");
        for id in &sets.focus {
            body.push_str(id);
            body.push('\n');
        }
        body.push_str("END\nSET_B\n");
        for id in &sets.kept {
            body.push_str(id);
            body.push('\n');
        }
        body.push_str("END\n");
        f.write_all(body.as_bytes()).map_err(|e| PhenosnipError::io(&sets_path, e))
    })?;
    info!("SNP sets written to {}", out_dir.display());
    Ok((kept_path, sets_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::snp;
    use crate::catalog::Variant;
    use std::fs;

    fn catalog() -> VariantCatalog {
        let mut catalog = VariantCatalog::new();
        let mut common = snp("2L_1_SNP", &[]);
        common.alt_count = 12;
        catalog.add_variant(common).unwrap();
        let mut rare = snp("2L_2_SNP", &[]);
        rare.alt_count = 3;
        catalog.add_variant(rare).unwrap();
        catalog
            .add_variant(Variant::new("2L_3_DEL", "2L", 3, "AT", "A", 40, 40, VariantKind::Del))
            .unwrap();
        catalog
    }

    #[test]
    fn focus_snps_join_the_common_set() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("hp_genemap.txt");
        fs::write(
            &report,
            "ID\tFlybaseID\tSNP\tPValue\n2L_2_SNP\tFBgn1\t2L_2_SNP\t0.01\n2L_3_DEL\tFBgn2\t2L_3_DEL\t0.02\n",
        )
        .unwrap();
        let sets = prepare_snp_sets(&catalog(), &[report], 10).unwrap();
        assert_eq!(sets.focus.iter().collect::<Vec<_>>(), vec!["2L_2_SNP"]);
        assert_eq!(sets.kept.iter().collect::<Vec<_>>(), vec!["2L_1_SNP", "2L_2_SNP"]);

        let (kept, both) = write_snp_sets(&sets, dir.path(), 1, SummaryMethod::Mean).unwrap();
        assert!(kept.ends_with("snpkept_1W_MEAN.txt"));
        assert_eq!(fs::read_to_string(kept).unwrap(), "2L_1_SNP\n2L_2_SNP\n");
        assert_eq!(
            fs::read_to_string(both).unwrap(),
            "SET_A\n2L_2_SNP\nEND\nSET_B\n2L_1_SNP\n2L_2_SNP\nEND\n"
        );
    }

    #[test]
    fn report_without_id_column_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("bad.txt");
        fs::write(&report, "SNP\tPValue\n2L_2_SNP\t0.01\n").unwrap();
        assert!(matches!(read_focus_ids(&report), Err(PhenosnipError::MalformedInput { .. })));
    }
}
