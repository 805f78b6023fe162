//! Joins association results against the variant catalog.
//!
//! Every distinct variant id of a result file is resolved once. Rows whose
//! ids all resolve to at least one gene effect are annotated; the others are
//! copied unchanged to the missing-mapping report.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, WriterBuilder};
use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::catalog::{Resolution, VariantCatalog, VariantEffect};
use crate::config::{AnnotationConfig, PairEffectPolicy};
use crate::data_handling::association_results::{AnnotationMode, ResultFile, ResultTable};
use crate::data_handling::Dataset;
use crate::error::{PhenosnipError, Result};
use crate::helper_functions::{output_basename, output_stem, StagedFile};

const ANNOTATION_COLUMNS: [&str; 8] = [
    "ID",
    "FlybaseID",
    "GeneSymbol",
    "Position",
    "Type",
    "NbOfLinesForMutationInAnalysis",
    "NbOfLinesForMutationInDB",
    "TotalNbOfLinesInDB",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationSummary {
    pub distinct_ids: usize,
    pub resolved_ids: usize,
    pub annotated_rows: usize,
    pub missing_rows: usize,
    pub total_lines: usize,
}

impl fmt::Display for AnnotationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} distinct ids, {} resolved, {} annotated rows, {} missing rows, {} lines in catalog",
            self.distinct_ids, self.resolved_ids, self.annotated_rows, self.missing_rows, self.total_lines
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub header: Vec<String>,
    pub annotated: Vec<Vec<String>>,
    /// Header of the missing-mapping report: the original header.
    pub missing_header: Vec<String>,
    pub missing: Vec<Vec<String>>,
    pub summary: AnnotationSummary,
}

fn prefixed_columns(prefix: &str) -> impl Iterator<Item = String> + '_ {
    ANNOTATION_COLUMNS.iter().map(move |c| format!("{}{}", prefix, c))
}

fn effect_columns(effect: &VariantEffect, resolution: &Resolution, total_lines: usize) -> Vec<String> {
    vec![
        effect.variant_id.clone(),
        effect.gene_id.clone(),
        effect.gene_symbol.clone(),
        effect.relative_position.clone(),
        effect.effect_type.clone(),
        resolution.carriers_in_analysis.to_string(),
        resolution.carriers_in_catalog.to_string(),
        total_lines.to_string(),
    ]
}

pub fn annotate(
    table: &ResultTable,
    catalog: &VariantCatalog,
    used_lines: &HashSet<String>,
    pair_effects: PairEffectPolicy,
) -> Annotation {
    let sides = table.mode.id_column_count();
    let ids = table
        .rows
        .iter()
        .flat_map(|row| (0..sides).map(move |side| table.variant_id(row, side)));
    let resolved = catalog.resolve(ids, used_lines);
    let total_lines = catalog.total_line_count();

    let header: Vec<String> = match table.mode {
        AnnotationMode::Single => prefixed_columns("").chain(table.header.iter().cloned()).collect(),
        AnnotationMode::Pair => prefixed_columns("1_")
            .chain(table.header.iter().cloned())
            .chain(prefixed_columns("2_"))
            .collect(),
    };

    let mut annotated = Vec::new();
    let mut missing = Vec::new();
    for row in &table.rows {
        let resolutions: Vec<&Resolution> = (0..sides)
            .filter_map(|side| resolved.get(table.variant_id(row, side)))
            .filter(|r| r.is_resolved())
            .collect();
        if resolutions.len() != sides {
            missing.push(row.fields.clone());
            continue;
        }
        match table.mode {
            AnnotationMode::Single => {
                let res = resolutions[0];
                for effect in &res.effects {
                    let mut out = effect_columns(effect, res, total_lines);
                    out.extend(row.fields.iter().cloned());
                    annotated.push(out);
                }
            }
            AnnotationMode::Pair => {
                let (first, second) = (resolutions[0], resolutions[1]);
                let combinations: Vec<(&VariantEffect, &VariantEffect)> = match pair_effects {
                    PairEffectPolicy::FirstEffect => vec![(&first.effects[0], &second.effects[0])],
                    PairEffectPolicy::CrossProduct => first
                        .effects
                        .iter()
                        .flat_map(|a| second.effects.iter().map(move |b| (a, b)))
                        .collect(),
                };
                for (a, b) in combinations {
                    let mut out = effect_columns(a, first, total_lines);
                    out.extend(row.fields.iter().cloned());
                    out.extend(effect_columns(b, second, total_lines));
                    annotated.push(out);
                }
            }
        }
    }

    let summary = AnnotationSummary {
        distinct_ids: resolved.len(),
        resolved_ids: resolved.values().filter(|r| r.is_resolved()).count(),
        annotated_rows: annotated.len(),
        missing_rows: missing.len(),
        total_lines,
    };
    Annotation {
        header,
        annotated,
        missing_header: table.header.clone(),
        missing,
        summary,
    }
}

/// Where the reports derived from `input` are written. SINGLE reports drop
/// the input's extension, PAIR reports keep the full file name.
pub fn report_paths(input: &Path, out_dir: &Path, mode: AnnotationMode, config: &AnnotationConfig) -> (PathBuf, PathBuf) {
    let stem = match mode {
        AnnotationMode::Single => output_stem(input),
        AnnotationMode::Pair => output_basename(input),
    };
    (
        out_dir.join(format!("{}{}", stem, config.annotated_suffix)),
        out_dir.join(format!("{}{}", stem, config.missing_suffix)),
    )
}

fn fill_report(staged: &mut StagedFile, header: &[String], rows: &[Vec<String>]) -> Result<()> {
    let target = staged.target().to_path_buf();
    let mut wtr = WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(QuoteStyle::Never)
        .flexible(true)
        .from_writer(staged.writer());
    wtr.write_record(header)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush().map_err(|e| PhenosnipError::io(&target, e))?;
    Ok(())
}

/// Writes both reports. Neither file appears unless both were filled.
pub fn write_reports(annotation: &Annotation, annotated_path: &Path, missing_path: &Path) -> Result<()> {
    let mut annotated = StagedFile::new(annotated_path)?;
    let mut missing = StagedFile::new(missing_path)?;
    fill_report(&mut annotated, &annotation.header, &annotation.annotated)?;
    fill_report(&mut missing, &annotation.missing_header, &annotation.missing)?;
    annotated.commit()?;
    missing.commit()?;
    Ok(())
}

/// Reads one result file, joins it and writes its reports into `out_dir`.
pub fn run_annotation(
    catalog: &VariantCatalog,
    input: &Path,
    mode: AnnotationMode,
    used_lines: &HashSet<String>,
    out_dir: &Path,
    config: &AnnotationConfig,
) -> Result<AnnotationSummary> {
    let _span = info_span!("annotate", input = %input.display(), mode = %mode).entered();
    let layout = match mode {
        AnnotationMode::Single => config.single.clone(),
        AnnotationMode::Pair => config.pair.clone(),
    };
    let table = ResultFile {
        path: input.to_path_buf(),
        layout,
        mode,
    }
    .load()?;
    let annotation = annotate(&table, catalog, used_lines, config.pair_effects);
    if annotation.summary.missing_rows > 0 {
        warn!("{} rows reference variants without a gene mapping", annotation.summary.missing_rows);
    }
    let (annotated_path, missing_path) = report_paths(input, out_dir, mode, config);
    write_reports(&annotation, &annotated_path, &missing_path)?;
    info!("{}", annotation.summary);
    info!("Reports written to {} and {}", annotated_path.display(), missing_path.display());
    Ok(annotation.summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::{effect, snp};
    use crate::config::ResultLayout;
    use std::fs;

    fn catalog() -> VariantCatalog {
        let mut catalog = VariantCatalog::new();
        catalog.add_variant(snp("2L_100_SNP", &["line_1", "line_2"])).unwrap();
        catalog.add_variant(snp("2L_200_SNP", &["line_2", "line_3", "line_4"])).unwrap();
        catalog.add_variant(snp("3R_5_SNP", &["line_1"])).unwrap();
        catalog.add_effect(effect("2L_200_SNP", "FBgn0001", "abc")).unwrap();
        catalog.add_effect(effect("2L_200_SNP", "FBgn0002", "xyz")).unwrap();
        catalog.add_effect(effect("3R_5_SNP", "FBgn0003", "klm")).unwrap();
        catalog
    }

    fn used() -> HashSet<String> {
        ["line_2", "line_4"].iter().map(|s| s.to_string()).collect()
    }

    fn single(text: &str) -> ResultTable {
        ResultTable::from_reader(text.as_bytes(), "gwas", &ResultLayout::single(), AnnotationMode::Single).unwrap()
    }

    fn pair(text: &str) -> ResultTable {
        ResultTable::from_reader(text.as_bytes(), "pairs", &ResultLayout::pair(), AnnotationMode::Pair).unwrap()
    }

    #[test]
    fn unmapped_single_row_goes_to_missing_verbatim() {
        let table = single("SNP\tPValue\n2L_100_SNP\t0.01\n");
        let result = annotate(&table, &catalog(), &used(), PairEffectPolicy::FirstEffect);
        assert!(result.annotated.is_empty());
        assert_eq!(result.missing, vec![vec!["2L_100_SNP".to_string(), "0.01".to_string()]]);
        assert_eq!(result.missing_header, vec!["SNP", "PValue"]);
    }

    #[test]
    fn multi_gene_variant_fans_out() {
        let table = single("SNP\tPValue\n2L_200_SNP\t0.01\n3R_5_SNP\t0.2\n2L_200_SNP\t0.3\n");
        let result = annotate(&table, &catalog(), &used(), PairEffectPolicy::FirstEffect);
        assert_eq!(result.annotated.len(), 5);
        assert_eq!(result.header[..2], ["ID".to_string(), "FlybaseID".to_string()]);
        assert_eq!(result.header.len(), 10);
        assert_eq!(
            result.annotated[0],
            vec!["2L_200_SNP", "FBgn0001", "abc", "0", "INTRON", "2", "3", "4", "2L_200_SNP", "0.01"]
        );
        assert_eq!(result.summary.distinct_ids, 2);
        assert_eq!(result.summary.resolved_ids, 2);
        for row in &result.annotated {
            let in_analysis: usize = row[5].parse().unwrap();
            let in_catalog: usize = row[6].parse().unwrap();
            assert!(in_analysis <= in_catalog);
        }
    }

    const PAIRS: &str = "tests\nCHR SNP N_SIG CHR SNP\n---\n2L 2L_200_SNP 1 3R 3R_5_SNP\n2L 2L_200_SNP 1 2L 2L_100_SNP\n";

    #[test]
    fn pair_with_one_unresolved_side_is_missing() {
        let table = pair(PAIRS);
        let result = annotate(&table, &catalog(), &used(), PairEffectPolicy::FirstEffect);
        assert_eq!(result.annotated.len(), 1);
        assert_eq!(result.missing, vec![vec!["2L", "2L_200_SNP", "1", "2L", "2L_100_SNP"]]);
        assert_eq!(result.annotated[0].len(), 8 + 5 + 8);
        assert_eq!(result.annotated[0][1], "FBgn0001");
        assert_eq!(result.annotated[0][14], "FBgn0003");
        assert_eq!(result.header[0], "1_ID");
        assert_eq!(result.header[13], "2_ID");
    }

    #[test]
    fn cross_product_pairs_every_effect() {
        let table = pair(PAIRS);
        let result = annotate(&table, &catalog(), &used(), PairEffectPolicy::CrossProduct);
        assert_eq!(result.annotated.len(), 2);
        assert_eq!(result.summary.missing_rows, 1);
    }

    #[test]
    fn reports_are_written_next_to_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("hp_1W_MEAN.assoc.txt");
        fs::write(&input, "SNP\tPValue\n2L_100_SNP\t0.01\n3R_5_SNP\t0.2\n").unwrap();
        let out = dir.path().join("out");
        let config = AnnotationConfig::default();
        let summary = run_annotation(&catalog(), &input, AnnotationMode::Single, &used(), &out, &config).unwrap();
        assert_eq!(summary.annotated_rows, 1);
        assert_eq!(summary.missing_rows, 1);

        let missing = fs::read_to_string(out.join("hp_1W_MEAN.assoc_genemap_missing.txt")).unwrap();
        assert_eq!(missing, "SNP\tPValue\n2L_100_SNP\t0.01\n");
        let annotated = fs::read_to_string(out.join("hp_1W_MEAN.assoc_genemap.txt")).unwrap();
        assert!(annotated.starts_with("ID\tFlybaseID\tGeneSymbol"));
        assert!(annotated.contains("3R_5_SNP\tFBgn0003\tklm\t0\tINTRON\t0\t1\t4\t3R_5_SNP\t0.2"));
    }

    #[test]
    fn pair_reports_keep_the_input_extension() {
        let config = AnnotationConfig::default();
        let out = Path::new("out");
        let input = Path::new("runs/hp_1W_MEAN.epi.txt");
        let (annotated, missing) = report_paths(input, out, AnnotationMode::Pair, &config);
        assert_eq!(annotated, out.join("hp_1W_MEAN.epi.txt_genemap.txt"));
        assert_eq!(missing, out.join("hp_1W_MEAN.epi.txt_genemap_missing.txt"));
        let (annotated, _) = report_paths(input, out, AnnotationMode::Single, &config);
        assert_eq!(annotated, out.join("hp_1W_MEAN.epi_genemap.txt"));
    }

    #[test]
    fn malformed_input_leaves_no_report() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.txt");
        fs::write(&input, "SNP\tPValue\n2L_100_SNP\t0.01\n3R_5_SNP\n").unwrap();
        let out = dir.path().join("out");
        let result = run_annotation(&catalog(), &input, AnnotationMode::Single, &used(), &out, &AnnotationConfig::default());
        assert!(matches!(result, Err(PhenosnipError::MalformedInput { line: 3, .. })));
        assert!(!out.join("broken_genemap.txt").exists());
        assert!(!out.join("broken_genemap_missing.txt").exists());
    }
}
