use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use geoparcel::config::JobConfig;
use geoparcel::export::{ExportOptions, ExportSummary, PartCompression, export_table};
use geoparcel::geometry::GeometryColumnRef;
use geoparcel::import::{ImportOptions, ImportSummary, import_dataset};
use geoparcel::partition::partition_strings;
use geoparcel::schema::create_schema_file;
use geoparcel::storage::MemoryStore;
use geoparcel::storage::geojson::{load_feature_collection, save_feature_collection};
use geoparcel::utils::CancellationToken;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Job configuration file (YAML) with export/import defaults
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Export a GeoJSON feature table to (partitioned) GeoParquet
    Export(ExportArgs),
    /// Import (partitioned) GeoParquet and write the resulting table as GeoJSON
    Import(ImportArgs),
    /// Write the attribute schema of a GeoJSON feature table as an override file
    Schema(SchemaArgs),
    /// List the partitions of a partitioned dataset
    Partitions(PartitionsArgs),
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CompressionArg {
    Snappy,
    Zstd,
    None,
}

impl From<CompressionArg> for PartCompression {
    fn from(value: CompressionArg) -> Self {
        match value {
            CompressionArg::Snappy => PartCompression::Snappy,
            CompressionArg::Zstd => PartCompression::Zstd,
            CompressionArg::None => PartCompression::None,
        }
    }
}

#[derive(Args)]
pub struct ExportArgs {
    /// Input GeoJSON file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output dataset directory
    #[arg(short, long)]
    pub output: PathBuf,

    /// Geometry encoding: XY, WKT or WKB
    #[arg(long)]
    pub geometry_format: Option<String>,

    /// Leave geometry out of the part files
    #[arg(long)]
    pub no_geometry: bool,

    /// Partition column (repeatable, outermost first)
    #[arg(long = "partition")]
    pub partitions: Vec<String>,

    /// Rows per part file
    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long, value_enum)]
    pub compression: Option<CompressionArg>,
}

#[derive(Args)]
pub struct ImportArgs {
    /// Input part file or dataset directory
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output GeoJSON file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Name of the created container
    #[arg(long, default_value = "imported")]
    pub container: String,

    /// Geometry type (read from the dataset's geo metadata if omitted)
    #[arg(long)]
    pub geometry_type: Option<String>,

    /// Geometry column, or `x,y` columns for COORDINATES
    #[arg(long, value_parser = parse_geometry_column)]
    pub geometry_column: Option<GeometryColumnRef>,

    /// Spatial reference, e.g. 4326 or EPSG:3857
    #[arg(long)]
    pub spatial_reference: Option<String>,

    /// Only read part files whose path contains this text (repeatable)
    #[arg(long = "partition")]
    pub partitions: Vec<String>,

    /// Stop after this many inserted rows
    #[arg(long)]
    pub sample_count: Option<u64>,

    /// Schema override file (CSV)
    #[arg(long)]
    pub schema_override: Option<PathBuf>,

    /// Build a spatial index on the container
    #[arg(long)]
    pub spatial_index: bool,
}

#[derive(Args)]
pub struct SchemaArgs {
    /// Input GeoJSON file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output schema file (CSV)
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct PartitionsArgs {
    /// Dataset directory
    #[arg(short, long)]
    pub input: PathBuf,

    /// List every intermediate partition level as well
    #[arg(long)]
    pub all_combinations: bool,
}

fn parse_geometry_column(value: &str) -> std::result::Result<GeometryColumnRef, String> {
    value
        .parse()
        .map_err(|err: geoparcel::error::ConvertError| err.to_string())
}

/// Name given to the table a GeoJSON input is loaded into.
const SOURCE_TABLE: &str = "features";

fn load_job(path: Option<&Path>) -> Result<JobConfig> {
    match path {
        Some(path) => JobConfig::load(path)
            .with_context(|| format!("CLI: Failed to load job configuration {:?}", path)),
        None => Ok(JobConfig::default()),
    }
}

fn load_source(input: &Path) -> Result<MemoryStore> {
    let mut store = MemoryStore::new();
    load_feature_collection(&mut store, SOURCE_TABLE, input)
        .with_context(|| format!("CLI: Failed to read features from {:?}", input))?;
    Ok(store)
}

pub fn export_options(args: &ExportArgs, defaults: ExportOptions) -> ExportOptions {
    let mut options = defaults;
    if let Some(format) = &args.geometry_format {
        options.geometry_format = format.clone();
    }
    if args.no_geometry {
        options.include_geometry = false;
    }
    if !args.partitions.is_empty() {
        options.partition_columns = args.partitions.clone();
    }
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size;
    }
    if let Some(compression) = args.compression {
        options.compression = compression.into();
    }
    options
}

pub fn import_options(args: &ImportArgs, defaults: ImportOptions) -> ImportOptions {
    let mut options = defaults;
    if args.geometry_type.is_some() {
        options.geometry_type = args.geometry_type.clone();
    }
    if args.geometry_column.is_some() {
        options.geometry_column = args.geometry_column.clone();
    }
    if args.spatial_reference.is_some() {
        options.spatial_reference = args.spatial_reference.clone();
    }
    if !args.partitions.is_empty() {
        options.partitions = args.partitions.clone();
    }
    if args.sample_count.is_some() {
        options.sample_count = args.sample_count;
    }
    if args.schema_override.is_some() {
        options.schema_override = args.schema_override.clone();
    }
    if args.spatial_index {
        options.build_spatial_index = true;
    }
    options
}

pub fn run_export(args: &ExportArgs, config: Option<&Path>) -> Result<ExportSummary> {
    let job = load_job(config)?;
    let options = export_options(args, job.export);
    let store = load_source(&args.input)?;
    let summary = export_table(
        &store,
        SOURCE_TABLE,
        &args.output,
        &options,
        &CancellationToken::new(),
    )
    .context("Pipeline: Export failed")?;
    tracing::info!(
        "Export: {} rows in {} part files",
        summary.rows,
        summary.parts.len()
    );
    Ok(summary)
}

pub fn run_import(args: &ImportArgs, config: Option<&Path>) -> Result<ImportSummary> {
    let job = load_job(config)?;
    let options = import_options(args, job.import);
    let mut store = MemoryStore::new().with_max_field_name_length(options.max_field_name_length);
    let summary = import_dataset(
        &mut store,
        &args.input,
        &args.container,
        &options,
        &CancellationToken::new(),
    )
    .context("Pipeline: Import failed")?;
    save_feature_collection(&store, &summary.container, &args.output)
        .with_context(|| format!("CLI: Failed to write {:?}", args.output))?;
    if summary.failed > 0 {
        tracing::warn!("{} rows could not be inserted", summary.failed);
    }
    Ok(summary)
}

pub fn run_schema(args: &SchemaArgs) -> Result<()> {
    let store = load_source(&args.input)?;
    create_schema_file(&store, SOURCE_TABLE, &args.output)
        .with_context(|| format!("CLI: Failed to write schema file {:?}", args.output))?;
    Ok(())
}

pub fn run_partitions(args: &PartitionsArgs) -> Result<Vec<String>> {
    partition_strings(&args.input, args.all_combinations)
        .with_context(|| format!("CLI: Failed to list partitions of {:?}", args.input))
}
