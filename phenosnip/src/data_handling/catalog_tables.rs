use std::path::PathBuf;

use tracing::{info, warn};

use crate::catalog::{Variant, VariantCatalog, VariantEffect, VariantKind};
use crate::config::{CatalogConfig, LineNaming};
use crate::data_handling::{parse_cell, required_cell, string_columns, Dataset};
use crate::error::{PhenosnipError, Result};
use crate::helper_functions::{read_table, require_columns};

const VARIANT_COLUMNS: [&str; 8] = [
    "variant_id",
    "chromosome",
    "position",
    "ref_allele",
    "alt_allele",
    "ref_count",
    "alt_count",
    "kind",
];
const CARRIER_COLUMNS: [&str; 2] = ["variant_id", "line_id"];
const EFFECT_COLUMNS: [&str; 5] = ["variant_id", "gene_id", "gene_symbol", "relative_position", "effect_type"];

/// The three tab-separated bulk tables a catalog is built from.
pub struct CatalogTables {
    pub variants: PathBuf,
    pub carriers: PathBuf,
    pub effects: PathBuf,
    pub lines: LineNaming,
    pub validation: CatalogConfig,
}

impl Dataset for CatalogTables {
    type Output = VariantCatalog;

    fn load(&self) -> Result<VariantCatalog> {
        let mut catalog = VariantCatalog::new();
        self.load_variants(&mut catalog)?;
        let carriers = self.load_carriers(&mut catalog)?;
        let effects = self.load_effects(&mut catalog)?;
        info!(
            "Catalog holds {} variants, {} carrier pairs over {} lines, {} effects",
            catalog.len(),
            carriers,
            catalog.total_line_count(),
            effects
        );
        Ok(catalog)
    }
}

impl CatalogTables {
    fn load_variants(&self, catalog: &mut VariantCatalog) -> Result<()> {
        let source = self.variants.display().to_string();
        info!("Reading variants from {}", source);
        let df = read_table(&self.variants, b'\t')?;
        require_columns(&df, &source, &VARIANT_COLUMNS)?;
        let df = string_columns(&df, &VARIANT_COLUMNS)?;

        let ids = df.column("variant_id")?.str()?;
        let chroms = df.column("chromosome")?.str()?;
        let positions = df.column("position")?.str()?;
        let refs = df.column("ref_allele")?.str()?;
        let alts = df.column("alt_allele")?.str()?;
        let ref_counts = df.column("ref_count")?.str()?;
        let alt_counts = df.column("alt_count")?.str()?;
        let kinds = df.column("kind")?.str()?;

        for i in 0..df.height() {
            let kind = required_cell(kinds, i, &source, "kind")?
                .parse::<VariantKind>()
                .map_err(|reason| PhenosnipError::malformed(&source, i + 2, reason))?;
            let variant = Variant::new(
                required_cell(ids, i, &source, "variant_id")?,
                required_cell(chroms, i, &source, "chromosome")?,
                parse_cell(required_cell(positions, i, &source, "position")?, i, &source, "position")?,
                required_cell(refs, i, &source, "ref_allele")?,
                required_cell(alts, i, &source, "alt_allele")?,
                parse_cell(required_cell(ref_counts, i, &source, "ref_count")?, i, &source, "ref_count")?,
                parse_cell(required_cell(alt_counts, i, &source, "alt_count")?, i, &source, "alt_count")?,
                kind,
            );
            variant
                .check_identifier()
                .map_err(|reason| PhenosnipError::malformed(&source, i + 2, reason))?;
            if self.validation.validate_alleles {
                variant
                    .check_alleles()
                    .map_err(|reason| PhenosnipError::malformed(&source, i + 2, reason))?;
            }
            catalog.add_variant(variant)?;
        }
        Ok(())
    }

    fn load_carriers(&self, catalog: &mut VariantCatalog) -> Result<usize> {
        let source = self.carriers.display().to_string();
        info!("Reading carrier lines from {}", source);
        let df = read_table(&self.carriers, b'\t')?;
        require_columns(&df, &source, &CARRIER_COLUMNS)?;
        let df = string_columns(&df, &CARRIER_COLUMNS)?;
        let ids = df.column("variant_id")?.str()?;
        let lines = df.column("line_id")?.str()?;

        let mut added = 0;
        let mut repeated = 0;
        for i in 0..df.height() {
            let variant_id = required_cell(ids, i, &source, "variant_id")?;
            let line_id = self.lines.normalize_catalog_line(required_cell(lines, i, &source, "line_id")?);
            if catalog.add_carrier(variant_id, &line_id)? {
                added += 1;
            } else {
                repeated += 1;
            }
        }
        if repeated > 0 {
            warn!("{} repeated carrier pairs in {} were ignored", repeated, source);
        }
        Ok(added)
    }

    fn load_effects(&self, catalog: &mut VariantCatalog) -> Result<usize> {
        let source = self.effects.display().to_string();
        info!("Reading variant effects from {}", source);
        let df = read_table(&self.effects, b'\t')?;
        require_columns(&df, &source, &EFFECT_COLUMNS)?;
        let df = string_columns(&df, &EFFECT_COLUMNS)?;
        let ids = df.column("variant_id")?.str()?;
        let genes = df.column("gene_id")?.str()?;
        let symbols = df.column("gene_symbol")?.str()?;
        let positions = df.column("relative_position")?.str()?;
        let types = df.column("effect_type")?.str()?;

        for i in 0..df.height() {
            catalog.add_effect(VariantEffect {
                gene_id: required_cell(genes, i, &source, "gene_id")?.to_string(),
                variant_id: required_cell(ids, i, &source, "variant_id")?.to_string(),
                gene_symbol: symbols.get(i).map(str::trim).unwrap_or_default().to_string(),
                relative_position: positions.get(i).map(str::trim).unwrap_or_default().to_string(),
                effect_type: required_cell(types, i, &source, "effect_type")?.to_string(),
            })?;
        }
        Ok(df.height())
    }
}
