use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, error, info};

use crate::data_handling::{parse_cell, required_cell, string_columns, Dataset};
use crate::error::{PhenosnipError, Result};
use crate::helper_functions::{read_table, require_columns};
use crate::models::{Individual, PhenotypeData, Sex};
use crate::store::Database;

const REQUIRED: [&str; 6] = ["individual_name", "strain_number", "age", "sex", "phenotype_name", "value"];
const DATE_COLUMN: &str = "date";
const CONTROL_COLUMN: &str = "is_control";

/// One row of the raw phenotype table.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMeasurement {
    pub line: usize,
    pub individual_name: String,
    pub strain_number: String,
    pub age: u32,
    pub sex: Sex,
    pub phenotype_name: String,
    pub value: Option<f64>,
    pub date: Option<String>,
    pub is_control: bool,
}

/// Tab-separated table of individual measurements, one measurement per row.
pub struct PhenotypeTable {
    pub path: PathBuf,
}

impl Dataset for PhenotypeTable {
    type Output = Vec<RawMeasurement>;

    fn load(&self) -> Result<Vec<RawMeasurement>> {
        let source = self.path.display().to_string();
        info!("Reading phenotype data from {}", source);
        let df = match read_table(&self.path, b'\t') {
            Ok(df) => df,
            Err(e) => {
                error!("Failed to read phenotype table: {}", e);
                return Err(e);
            }
        };
        require_columns(&df, &source, &REQUIRED)?;
        let has_date = df.get_column_names().iter().any(|c| c.as_str() == DATE_COLUMN);
        let has_control = df.get_column_names().iter().any(|c| c.as_str() == CONTROL_COLUMN);

        let mut wanted: Vec<&str> = REQUIRED.to_vec();
        if has_date {
            wanted.push(DATE_COLUMN);
        }
        if has_control {
            wanted.push(CONTROL_COLUMN);
        }
        let df = string_columns(&df, &wanted)?;
        debug!("Loaded {} phenotype rows", df.height());

        let names = df.column("individual_name")?.str()?;
        let strains = df.column("strain_number")?.str()?;
        let ages = df.column("age")?.str()?;
        let sexes = df.column("sex")?.str()?;
        let phenotypes = df.column("phenotype_name")?.str()?;
        let values = df.column("value")?.str()?;
        let dates = if has_date { Some(df.column(DATE_COLUMN)?.str()?) } else { None };
        let controls = if has_control { Some(df.column(CONTROL_COLUMN)?.str()?) } else { None };

        let mut rows = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let age_raw = required_cell(ages, i, &source, "age")?;
            let sex_raw = required_cell(sexes, i, &source, "sex")?;
            let sex = sex_raw
                .parse::<Sex>()
                .map_err(|reason| PhenosnipError::malformed(&source, i + 2, reason))?;
            let value = match values.get(i).map(str::trim) {
                None | Some("") | Some("NaN") | Some("nan") => None,
                Some(raw) => Some(parse_cell::<f64>(raw, i, &source, "value")?),
            };
            let is_control = match controls.and_then(|c| c.get(i)).map(str::trim) {
                None | Some("") => false,
                Some(raw) => parse_flag(raw).ok_or_else(|| {
                    PhenosnipError::malformed(&source, i + 2, format!("cannot parse '{}' as a boolean", raw))
                })?,
            };
            rows.push(RawMeasurement {
                line: i + 2,
                individual_name: required_cell(names, i, &source, "individual_name")?.to_string(),
                strain_number: required_cell(strains, i, &source, "strain_number")?.to_string(),
                age: parse_cell(age_raw, i, &source, "age")?,
                sex,
                phenotype_name: required_cell(phenotypes, i, &source, "phenotype_name")?.to_string(),
                value,
                date: dates
                    .and_then(|d| d.get(i))
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty()),
                is_control,
            });
        }
        Ok(rows)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw {
        "True" | "TRUE" | "T" | "true" | "t" | "1" => Some(true),
        "False" | "FALSE" | "F" | "false" | "f" | "0" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub strains: usize,
    pub individuals: usize,
    pub measurements: usize,
}

/// Groups raw rows into individuals and stores them under their strains.
///
/// Every row of an individual must agree on strain, age and sex. The whole
/// batch is checked before the first individual is stored.
pub fn ingest_measurements(db: &mut Database, rows: Vec<RawMeasurement>) -> Result<IngestSummary> {
    let mut individuals: BTreeMap<String, (Individual, bool)> = BTreeMap::new();
    let mut measurements = 0usize;

    for row in rows {
        let entry = individuals.entry(row.individual_name.clone()).or_insert_with(|| {
            (
                Individual {
                    name: row.individual_name.clone(),
                    strain_number: row.strain_number.clone(),
                    age: row.age,
                    sex: row.sex,
                    date: row.date.clone(),
                    measurements: Vec::new(),
                },
                row.is_control,
            )
        });
        let (ind, _) = entry;
        if ind.strain_number != row.strain_number || ind.age != row.age || ind.sex != row.sex {
            return Err(PhenosnipError::malformed(
                "phenotype table",
                row.line,
                format!("individual {} is described inconsistently across rows", row.individual_name),
            ));
        }
        if ind.measurements.iter().any(|m| m.phenotype_name == row.phenotype_name) {
            return Err(PhenosnipError::malformed(
                "phenotype table",
                row.line,
                format!("individual {} has two values for {}", row.individual_name, row.phenotype_name),
            ));
        }
        ind.measurements.push(PhenotypeData {
            id: 0,
            phenotype_name: row.phenotype_name,
            value: row.value,
            age: row.age,
            individual_name: row.individual_name,
        });
        measurements += 1;
    }

    if let Some(existing) = individuals.keys().find(|name| db.find_individual(name).is_some()) {
        return Err(PhenosnipError::integrity(existing, "individual already recorded"));
    }

    let mut strains: Vec<&str> = Vec::new();
    for (ind, is_control) in individuals.values() {
        if db.strain(&ind.strain_number).is_none() && !strains.contains(&ind.strain_number.as_str()) {
            strains.push(ind.strain_number.as_str());
        }
        db.ensure_strain(&ind.strain_number, *is_control);
    }
    let summary = IngestSummary {
        strains: strains.len(),
        individuals: individuals.len(),
        measurements,
    };
    for (_, (ind, _)) in individuals {
        db.add_individual(ind)?;
    }
    info!(
        "Stored {} measurements of {} individuals ({} new strains)",
        summary.measurements, summary.individuals, summary.strains
    );
    Ok(summary)
}
