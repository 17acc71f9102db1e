use serde::Deserialize;
use std::path::Path;

use crate::error::Result;
use crate::export::ExportOptions;
use crate::import::ImportOptions;

/// Job file holding default options for both directions.
///
/// ```yaml
/// export:
///   geometry_format: WKT
///   partition_columns: [country]
/// import:
///   sample_count: 1000
///   build_spatial_index: true
/// ```
///
/// Any section or key left out keeps its default.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub export: ExportOptions,
    pub import: ImportOptions,
}

impl JobConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()?;
        let job: JobConfig = settings.try_deserialize()?;
        tracing::info!("Loaded job configuration from {:?}", path);
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::PartCompression;
    use crate::geometry::GeometryColumnRef;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_partial_yaml() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            file,
            "export:\n  geometry_format: WKT\n  compression: zstd\n  partition_columns: [country]\nimport:\n  sample_count: 25\n  compact: false"
        )
        .unwrap();
        let job = JobConfig::load(file.path()).unwrap();
        assert_eq!(job.export.geometry_format, "WKT");
        assert_eq!(job.export.compression, PartCompression::Zstd);
        assert_eq!(job.export.partition_columns, vec!["country".to_string()]);
        assert!(job.export.include_geometry);
        assert_eq!(job.import.sample_count, Some(25));
        assert!(!job.import.compact);
        assert_eq!(job.import.read_batch_size, 8_192);
    }

    #[test]
    fn geometry_column_is_parsed_at_load_time() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "import:\n  geometry_column: lon,lat").unwrap();
        let job = JobConfig::load(file.path()).unwrap();
        assert_eq!(
            job.import.geometry_column,
            Some(GeometryColumnRef::Pair("lon".into(), "lat".into()))
        );

        let mut bad = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(bad, "import:\n  geometry_column: a,b,c").unwrap();
        let err = JobConfig::load(bad.path()).unwrap_err();
        assert!(matches!(err, crate::error::ConvertError::Config(_)));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = JobConfig::load(Path::new("/nonexistent/job.yaml")).unwrap_err();
        assert!(matches!(err, crate::error::ConvertError::Config(_)));
    }
}
