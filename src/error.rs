//! Error types for conversion runs.
//!
//! Everything that can go wrong before a row moves is a [`ConvertError`] and
//! aborts the run. Failures of a single insert are not errors at this level;
//! the import pipeline counts them (see [`crate::import::RowFailure`]).

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = ConvertError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Unsupported column type '{0}'")]
    UnsupportedType(String),

    #[error("Geometry format must be one of XY, WKT or WKB; got '{0}'")]
    InvalidGeometryFormat(String),

    #[error("Geometry type must be one of [{allowed}]; got '{given}'")]
    InvalidGeometryType { given: String, allowed: String },

    #[error("Geometry column '{0}' is not present in the input columns")]
    MissingGeometryColumn(String),

    #[error("'{0}' does not carry geometry metadata (no 'geo' key)")]
    NotGeospatial(PathBuf),

    #[error("Inconsistent geometry metadata: {0}")]
    InconsistentGeometry(String),

    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("Coordinate reference system cannot be resolved: {0}")]
    UnsupportedCrs(String),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Invalid partition filter: {0}")]
    InvalidPartitionFilter(String),

    #[error("A partition filter cannot be combined with the single part file '{0}'")]
    AmbiguousPartitionRequest(PathBuf),

    #[error("No parquet part files found under '{0}' for the requested partitions")]
    NoPartFiles(PathBuf),

    #[error("Partition column '{0}' has a null value")]
    NullPartitionValue(String),

    #[error("Column '{0}' appears more than once in the output schema")]
    DuplicateColumn(String),

    #[error("Could not assemble row {row} of '{part}': {message}")]
    RowAssembly {
        part: PathBuf,
        row: usize,
        message: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Geometry(#[from] geozero::error::GeozeroError),

    #[error(transparent)]
    GeoJson(#[from] geojson::Error),

    #[error(transparent)]
    Config(#[from] ::config::ConfigError),
}

/// Errors raised by a data store driver.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Table or container '{0}' not found")]
    NotFound(String),

    #[error("Container '{0}' already exists")]
    AlreadyExists(String),

    #[error("Field '{field}' already exists in '{container}'")]
    FieldExists { container: String, field: String },

    #[error("Column '{column}' is not a field of '{container}'")]
    UnknownColumn { container: String, column: String },

    #[error("Row has {got} values but the cursor has {expected} columns")]
    ColumnCount { expected: usize, got: usize },

    #[error("Value for '{field}' does not fit type {expected}: {value}")]
    TypeMismatch {
        field: String,
        expected: String,
        value: String,
    },

    #[error("Field '{0}' is not nullable")]
    NullViolation(String),

    #[error("Geometry rejected: {0}")]
    Geometry(String),
}
