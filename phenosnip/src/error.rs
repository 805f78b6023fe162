use polars::error::PolarsError;

/// Errors raised by the ingestion, analysis and reporting layers.
///
/// A variant id missing from the catalog is never an error: the annotation
/// join routes such rows to the missing-mapping report instead.
#[derive(Debug, thiserror::Error)]
pub enum PhenosnipError {
    #[error("malformed input in {source_name} (line {line}): {reason}")]
    MalformedInput {
        source_name: String,
        line: usize,
        reason: String,
    },

    #[error("referential integrity violation for {key}: {reason}")]
    ReferentialIntegrity { key: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

pub type Result<T> = std::result::Result<T, PhenosnipError>;

impl PhenosnipError {
    pub fn malformed(source_name: impl Into<String>, line: usize, reason: impl Into<String>) -> Self {
        PhenosnipError::MalformedInput {
            source_name: source_name.into(),
            line,
            reason: reason.into(),
        }
    }

    pub fn integrity(key: impl ToString, reason: impl Into<String>) -> Self {
        PhenosnipError::ReferentialIntegrity {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        PhenosnipError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}
