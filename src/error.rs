//! Error types for the VEP flattening library.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort processing of one input file.
#[derive(Error, Debug)]
pub enum VepFlatError {
    /// Input or output file could not be opened, read or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A tab-separated table could not be read.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A VCF data line is missing required columns or has unparsable values.
    #[error("Malformed VCF line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },

    /// A field name was resolved against a schema that does not define it.
    #[error("Unknown field '{field}' in {schema} schema")]
    UnknownField { field: String, schema: &'static str },

    /// A tabular input lacks a column the pipeline depends on.
    #[error("Missing column '{column}' in {}", path.display())]
    MissingColumn { column: String, path: PathBuf },

    /// Conflicting or unusable command line options.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl VepFlatError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VepFlatError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for VEP flattening operations.
pub type Result<T> = std::result::Result<T, VepFlatError>;
