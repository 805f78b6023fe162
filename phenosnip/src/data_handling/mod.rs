pub mod association_results;
pub mod catalog_tables;
pub mod id_lists;
pub mod phenotype_table;

use polars::prelude::*;

use crate::error::{PhenosnipError, Result};

/// A tabular source that loads into typed records.
pub trait Dataset {
    type Output;

    fn load(&self) -> Result<Self::Output>;
}

/// String view of every requested column, in the requested order.
///
/// All columns are cast to strings so that numeric parsing (and its error
/// reporting) happens row by row with line numbers.
pub(crate) fn string_columns(df: &DataFrame, columns: &[&str]) -> Result<DataFrame> {
    let exprs: Vec<Expr> = columns.iter().map(|c| col(*c).cast(DataType::String)).collect();
    let df = df.clone().lazy().select(exprs).collect()?;
    Ok(df)
}

/// Value of a required cell, trimmed.
pub(crate) fn required_cell<'a>(
    values: &'a StringChunked,
    row: usize,
    source_name: &str,
    column: &str,
) -> Result<&'a str> {
    match values.get(row).map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(PhenosnipError::malformed(source_name, row + 2, format!("empty '{}'", column))),
    }
}

pub(crate) fn parse_cell<T>(raw: &str, row: usize, source_name: &str, column: &str) -> Result<T>
where
    T: std::str::FromStr,
{
    raw.parse::<T>().map_err(|_| {
        PhenosnipError::malformed(source_name, row + 2, format!("cannot parse '{}' in column '{}'", raw, column))
    })
}
