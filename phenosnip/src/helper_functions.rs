use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use polars::frame::DataFrame;
use polars::prelude::{CsvParseOptions, CsvReadOptions, NullValues, SerReader};
use tempfile::NamedTempFile;

use crate::config::LineNaming;
use crate::error::{PhenosnipError, Result};

pub fn project_root() -> PathBuf {
    match env::var_os("PROJECT_ROOT") {
        Some(val) => PathBuf::from(val),
        None => {
            // Fall back to current directory if PROJECT_ROOT not set
            env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        }
    }
}

/// Reads a delimited table with a header row. Every column is read as text;
/// `NA` and empty cells are null.
pub fn read_table(file_path: &Path, separator: u8) -> Result<DataFrame> {
    if !file_path.exists() {
        return Err(PhenosnipError::io(
            file_path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "table not found"),
        ));
    }
    let parse_options = CsvParseOptions::default()
        .with_separator(separator)
        .with_null_values(Some(NullValues::AllColumnsSingle("NA".into())));
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .with_parse_options(parse_options)
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// Fails with a malformed-input error naming the first absent column.
pub fn require_columns(df: &DataFrame, source_name: &str, columns: &[&str]) -> Result<()> {
    for &wanted in columns {
        if !df.get_column_names().iter().any(|c| c.as_str() == wanted) {
            return Err(PhenosnipError::malformed(source_name, 1, format!("missing column '{}'", wanted)));
        }
    }
    Ok(())
}

impl LineNaming {
    /// Canonical id of a catalog line, e.g. `dgrp21` -> `line_21`.
    pub fn normalize_catalog_line(&self, raw: &str) -> String {
        let raw = raw.trim();
        match raw.strip_prefix(self.catalog_prefix.as_str()) {
            Some(rest) if !self.catalog_prefix.is_empty() => format!("{}{}", self.line_prefix, rest),
            _ => raw.to_string(),
        }
    }

    /// Line genotyped for a phenotyping strain, e.g. `21` -> `line_21`.
    pub fn line_for_strain(&self, strain_number: &str) -> String {
        let number = strain_number.trim();
        if number.starts_with(self.line_prefix.as_str()) {
            number.to_string()
        } else {
            format!("{}{}", self.line_prefix, number)
        }
    }
}

/// Output file written next to its destination and moved into place only on
/// [`StagedFile::commit`]. Dropping it uncommitted removes the temporary.
pub struct StagedFile {
    target: PathBuf,
    tmp: NamedTempFile,
}

impl StagedFile {
    pub fn new(target: impl Into<PathBuf>) -> Result<Self> {
        let target = target.into();
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| PhenosnipError::io(&dir, e))?;
        let tmp = NamedTempFile::new_in(&dir).map_err(|e| PhenosnipError::io(&dir, e))?;
        Ok(StagedFile { target, tmp })
    }

    pub fn writer(&mut self) -> &mut fs::File {
        self.tmp.as_file_mut()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn commit(mut self) -> Result<PathBuf> {
        self.tmp.as_file_mut().flush().map_err(|e| PhenosnipError::io(&self.target, e))?;
        let target = self.target;
        self.tmp.persist(&target).map_err(|e| PhenosnipError::io(&target, e.error))?;
        Ok(target)
    }
}

/// All-or-nothing write of a single file.
pub fn write_atomically<F>(target: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut fs::File) -> Result<()>,
{
    let mut staged = StagedFile::new(target)?;
    fill(staged.writer())?;
    staged.commit()?;
    Ok(())
}

/// File stem used to name reports derived from `input`.
pub fn output_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "result".to_string())
}

/// Full file name of `input`, extension included.
pub fn output_basename(input: &Path) -> String {
    input
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "result".to_string())
}
