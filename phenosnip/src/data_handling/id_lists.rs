use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use csv::ReaderBuilder;
use tracing::info;

use crate::config::LineNaming;
use crate::error::{PhenosnipError, Result};

fn first_fields(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|e| PhenosnipError::io(path, e))?;
    let mut rdr = ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(file);
    let mut ids = Vec::new();
    for record in rdr.records() {
        let record = record?;
        if let Some(id) = record.iter().map(str::trim).find(|f| !f.is_empty()) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

/// Lines a test run was computed on: the first field of every row (a plink
/// family file qualifies), normalized to canonical line ids.
pub fn read_used_lines(path: &Path, naming: &LineNaming) -> Result<HashSet<String>> {
    let lines: HashSet<String> = first_fields(path)?
        .iter()
        .map(|raw| naming.normalize_catalog_line(raw))
        .collect();
    info!("{} lines used by {}", lines.len(), path.display());
    Ok(lines)
}

/// Gene ids implicated by an independent screen, one per row.
pub fn read_gene_ids(path: &Path) -> Result<HashSet<String>> {
    let genes: HashSet<String> = first_fields(path)?.into_iter().collect();
    info!("{} gene ids read from {}", genes.len(), path.display());
    Ok(genes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn used_lines_take_the_first_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.fam");
        fs::write(&path, "line_21 line_21 0 0 0 -9\ndgrp28  dgrp28 0 0 0 -9\n\nline_21 x\n").unwrap();
        let lines = read_used_lines(&path, &LineNaming::default()).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines.contains("line_28"));
    }

    #[test]
    fn missing_gene_list_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_gene_ids(&dir.path().join("absent.txt")),
            Err(PhenosnipError::Io { .. })
        ));
    }
}
