//! Result files written by the external association tools.
//!
//! Single-variant files have one header line and one row per tested variant.
//! Pair files carry a preamble line, repeat the id and chromosome columns for
//! each side, and pad columns with runs of spaces.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ResultLayout;
use crate::data_handling::Dataset;
use crate::error::{PhenosnipError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnnotationMode {
    Single,
    Pair,
}

impl AnnotationMode {
    pub fn id_column_count(&self) -> usize {
        match self {
            AnnotationMode::Single => 1,
            AnnotationMode::Pair => 2,
        }
    }
}

impl fmt::Display for AnnotationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationMode::Single => write!(f, "SINGLE"),
            AnnotationMode::Pair => write!(f, "PAIR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    /// 1-based line in the source file.
    pub line: usize,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    pub source_name: String,
    pub mode: AnnotationMode,
    pub header: Vec<String>,
    /// Positions of the variant id columns in `header`, one per side.
    pub id_columns: Vec<usize>,
    pub rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn from_reader<R: Read>(reader: R, source_name: &str, layout: &ResultLayout, mode: AnnotationMode) -> Result<Self> {
        if layout.id_columns.len() != mode.id_column_count() {
            return Err(PhenosnipError::Config(format!(
                "{} results need {} id column(s), the layout names {}",
                mode,
                mode.id_column_count(),
                layout.id_columns.len()
            )));
        }
        let delimiter = u8::try_from(layout.delimiter)
            .map_err(|_| PhenosnipError::Config(format!("delimiter '{}' is not a single byte", layout.delimiter)))?;
        let remove_holes = layout.delimiter == ' ';

        let mut rdr = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut header: Option<(usize, Vec<String>)> = None;
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
            let fields = split_fields(&record, remove_holes);
            if fields.iter().all(|f| f.is_empty()) {
                continue;
            }
            let Some((header_line, names)) = &header else {
                if line > layout.skip_before_header {
                    header = Some((line, fields));
                }
                continue;
            };
            if line <= header_line + layout.skip_after_header {
                continue;
            }
            if fields.len() != names.len() {
                return Err(PhenosnipError::malformed(
                    source_name,
                    line,
                    format!("expected {} fields, found {}", names.len(), fields.len()),
                ));
            }
            rows.push(ResultRow { line, fields });
        }

        let (header_line, raw_header) =
            header.ok_or_else(|| PhenosnipError::malformed(source_name, 1, "no header line"))?;
        let header = match mode {
            AnnotationMode::Single => {
                let mut seen = HashSet::new();
                if let Some(dup) = raw_header.iter().find(|h| !seen.insert(h.as_str())) {
                    return Err(PhenosnipError::malformed(source_name, header_line, format!("duplicate column '{}'", dup)));
                }
                raw_header
            }
            AnnotationMode::Pair => disambiguate_header(raw_header),
        };
        let id_columns = layout
            .id_columns
            .iter()
            .map(|name| {
                header.iter().position(|h| h == name).ok_or_else(|| {
                    PhenosnipError::malformed(source_name, header_line, format!("missing id column '{}'", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Parsed {} {} result rows from {}", rows.len(), mode, source_name);
        Ok(ResultTable {
            source_name: source_name.to_string(),
            mode,
            header,
            id_columns,
            rows,
        })
    }

    /// Variant id of `row` on `side` (0 for single results).
    pub fn variant_id<'a>(&self, row: &'a ResultRow, side: usize) -> &'a str {
        &row.fields[self.id_columns[side]]
    }
}

fn split_fields(record: &StringRecord, remove_holes: bool) -> Vec<String> {
    record
        .iter()
        .map(str::trim)
        .filter(|f| !remove_holes || !f.is_empty())
        .map(str::to_string)
        .collect()
}

/// Prefixes every repeated header name with `1_`, `2_`, ... by occurrence.
/// Names that occur once are kept as they are.
fn disambiguate_header(raw: Vec<String>) -> Vec<String> {
    let mut totals: HashMap<String, usize> = HashMap::new();
    for name in &raw {
        *totals.entry(name.clone()).or_default() += 1;
    }
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.into_iter()
        .map(|name| {
            if totals[&name] > 1 {
                let n = seen.entry(name.clone()).or_default();
                *n += 1;
                format!("{}_{}", n, name)
            } else {
                name
            }
        })
        .collect()
}

/// An association-result file on disk.
pub struct ResultFile {
    pub path: PathBuf,
    pub layout: ResultLayout,
    pub mode: AnnotationMode,
}

impl Dataset for ResultFile {
    type Output = ResultTable;

    fn load(&self) -> Result<ResultTable> {
        info!("Reading {} association results from {}", self.mode, self.path.display());
        let file = File::open(&self.path).map_err(|e| PhenosnipError::io(&self.path, e))?;
        ResultTable::from_reader(file, &self.path.display().to_string(), &self.layout, self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIR: &str = "\
 Number of tests 3
  CHR       SNP   N_SIG  N_TOT  PROP   CHISQ  CHR  SNP
 ---
   2L  2L_100_SNP   1   10   0.1    16.2    3R  3R_5_SNP
   2L  2L_200_SNP   2   10   0.2    20.1    X   X_9_SNP

";

    #[test]
    fn pair_header_is_disambiguated_by_occurrence() {
        let table = ResultTable::from_reader(PAIR.as_bytes(), "pairs", &ResultLayout::pair(), AnnotationMode::Pair).unwrap();
        assert_eq!(
            table.header,
            vec!["1_CHR", "1_SNP", "N_SIG", "N_TOT", "PROP", "CHISQ", "2_CHR", "2_SNP"]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.variant_id(&table.rows[1], 0), "2L_200_SNP");
        assert_eq!(table.variant_id(&table.rows[1], 1), "X_9_SNP");
        assert_eq!(table.rows[0].line, 4);
    }

    #[test]
    fn short_pair_row_is_malformed() {
        let text = "preamble\nCHR SNP P CHR SNP\n---\n2L 2L_1_SNP 0.1 3R\n";
        match ResultTable::from_reader(text.as_bytes(), "pairs", &ResultLayout::pair(), AnnotationMode::Pair) {
            Err(PhenosnipError::MalformedInput { line, .. }) => assert_eq!(line, 4),
            other => panic!("expected malformed input, got {:?}", other),
        }
    }

    #[test]
    fn single_results_keep_header_and_skip_blank_lines() {
        let text = "SNP\tCHR\tPValue\n2L_100_SNP\t2L\t0.001\n\n3R_5_SNP\t3R\t0.02\n";
        let table = ResultTable::from_reader(text.as_bytes(), "gwas", &ResultLayout::single(), AnnotationMode::Single).unwrap();
        assert_eq!(table.header, vec!["SNP", "CHR", "PValue"]);
        assert_eq!(table.id_columns, vec![0]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1].fields, vec!["3R_5_SNP", "3R", "0.02"]);
    }

    #[test]
    fn single_header_problems_are_malformed() {
        let dup = "SNP\tP\tP\n2L_1_SNP\t0.1\t0.2\n";
        assert!(ResultTable::from_reader(dup.as_bytes(), "gwas", &ResultLayout::single(), AnnotationMode::Single).is_err());
        let no_id = "ID\tP\n2L_1_SNP\t0.1\n";
        assert!(matches!(
            ResultTable::from_reader(no_id.as_bytes(), "gwas", &ResultLayout::single(), AnnotationMode::Single),
            Err(PhenosnipError::MalformedInput { .. })
        ));
    }
}
