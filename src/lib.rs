//! Conversion between feature store tables and (partitioned) GeoParquet
//! datasets.

pub mod config;
pub mod error;
pub mod export;
pub mod geometry;
pub mod import;
pub mod metadata;
pub mod partition;
pub mod schema;
pub mod storage;
pub mod utils;
