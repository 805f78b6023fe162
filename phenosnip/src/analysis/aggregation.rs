//! Per-strain summaries of one (phenotype, method, age) group.

use statrs::statistics::{Data, OrderStatistics, Statistics};
use tracing::{debug, info, info_span, warn};

use crate::config::TailPolicy;
use crate::error::Result;
use crate::models::{ExtremityClass, PhenotypeKey, ProcessedStrain, SummaryMethod};
use crate::store::Database;

/// Reference value of a strain. `None` when no value is usable.
pub fn summarize(values: &[f64], method: SummaryMethod) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let value = match method {
        SummaryMethod::Mean => values.iter().mean(),
        SummaryMethod::Median => Data::new(values.to_vec()).median(),
        SummaryMethod::Iqr => trimmed_mean(values, 0.0),
        SummaryMethod::Iqr15 => trimmed_mean(values, 1.5),
    };
    value.is_finite().then_some(value)
}

/// Mean of the values inside `[Q1 - f*IQR, Q3 + f*IQR]`. Falls back to the
/// median when interpolated quartiles leave no value inside the fence.
fn trimmed_mean(values: &[f64], fence: f64) -> f64 {
    let mut data = Data::new(values.to_vec());
    let q1 = data.lower_quartile();
    let q3 = data.upper_quartile();
    let iqr = q3 - q1;
    let (low, high) = (q1 - fence * iqr, q3 + fence * iqr);
    let kept: Vec<f64> = values.iter().copied().filter(|v| *v >= low && *v <= high).collect();
    if kept.is_empty() {
        data.median()
    } else {
        kept.iter().mean()
    }
}

/// Extremity classes for values listed in rank order.
fn classify(sorted_values: &[f64], policy: TailPolicy) -> Vec<Option<ExtremityClass>> {
    let n = sorted_values.len();
    match policy {
        TailPolicy::Count { k } => by_count(n, k),
        TailPolicy::Percent { percent } => by_count(n, (n as f64 * percent / 100.0).floor() as usize),
        TailPolicy::ZScore { z } => {
            if n < 2 {
                return vec![None; n];
            }
            let mean = sorted_values.iter().mean();
            let sd = sorted_values.iter().std_dev();
            sorted_values
                .iter()
                .map(|v| {
                    if *v < mean - z * sd {
                        Some(ExtremityClass::Low)
                    } else if *v > mean + z * sd {
                        Some(ExtremityClass::High)
                    } else {
                        None
                    }
                })
                .collect()
        }
    }
}

fn by_count(n: usize, k: usize) -> Vec<Option<ExtremityClass>> {
    (1..=n)
        .map(|rank| {
            if rank <= k {
                Some(ExtremityClass::Low)
            } else if rank + k > n {
                Some(ExtremityClass::High)
            } else {
                None
            }
        })
        .collect()
}

/// Summaries of every strain with at least one usable value, ranked by
/// ascending reference value. Ties keep strain-number order.
pub fn aggregate_group(db: &Database, key: &PhenotypeKey, policy: TailPolicy) -> Vec<ProcessedStrain> {
    let mut summaries: Vec<(&str, f64)> = db
        .strains()
        .filter_map(|strain| {
            let values = strain.values_for(&key.phenotype_name, key.age);
            summarize(&values, key.method).map(|v| (strain.number.as_str(), v))
        })
        .collect();
    summaries.sort_by(|a, b| a.1.total_cmp(&b.1));

    let sorted: Vec<f64> = summaries.iter().map(|(_, v)| *v).collect();
    let classes = classify(&sorted, policy);
    summaries
        .into_iter()
        .zip(classes)
        .enumerate()
        .map(|(i, ((strain_number, reference_value), extremity_class))| ProcessedStrain {
            phenotype_name: key.phenotype_name.clone(),
            method: key.method,
            age: key.age,
            strain_number: strain_number.to_string(),
            reference_value,
            rank: i as u32 + 1,
            extremity_class,
        })
        .collect()
}

/// Recomputes and stores the strain summaries of `key`.
pub fn run_aggregation(db: &mut Database, key: &PhenotypeKey, policy: TailPolicy) -> Result<usize> {
    let _span = info_span!("aggregate", key = %key).entered();
    let rows = aggregate_group(db, key, policy);
    if rows.is_empty() {
        warn!("No strain has a usable value for {}", key);
    }
    let low = rows.iter().filter(|r| r.extremity_class == Some(ExtremityClass::Low)).count();
    let high = rows.iter().filter(|r| r.extremity_class == Some(ExtremityClass::High)).count();
    debug!("{} LOW and {} HIGH strains under {:?}", low, high, policy);
    let n = rows.len();
    db.replace_processed_strains(key, rows)?;
    info!("Stored {} strain summaries for {}", n, key);
    Ok(n)
}
