pub mod aggregation;
pub mod gene_mapping;
pub mod scoring;
pub mod snp_sets;
pub mod threshold;

pub use aggregation::{aggregate_group, run_aggregation, summarize};
pub use gene_mapping::{annotate, write_reports, Annotation, AnnotationSummary};
pub use scoring::{run_scoring, score, score_group, FdrEstimator, NoFdr};
pub use snp_sets::{prepare_snp_sets, SnpSets};
pub use threshold::{analyze, run_analysis, ExternalEvidence};
