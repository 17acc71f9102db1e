//! (Partitioned) GeoParquet to a store container.
//!
//! The import runs through fixed stages: part files are validated and
//! selected, the target schema is resolved, the container is created, rows
//! are inserted one at a time, and the container is finalized. A row the
//! store refuses is counted and skipped; a row that cannot even be built
//! from the part file stops the run.

use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, Int64Type, TimestampSecondType};
use arrow_array::{Array, ArrayRef, RecordBatch, StringArray};
use arrow_cast::cast;
use arrow_cast::display::{ArrayFormatter, FormatOptions};
use arrow_schema::{ArrowError, DataType, SchemaRef, TimeUnit};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::error::{ConvertError, Result, StoreError};
use crate::geometry::{GeometryColumnRef, GeometryType, GeometryValue, InsertChannel};
use crate::metadata::{GeoMetadata, SpatialReference};
use crate::partition::{
    Partition, PartitionValue, discover_part_files, partition_of_part, validate_partition_filter,
};
use crate::schema::{
    DEFAULT_MAX_FIELD_NAME_LENGTH, DEFAULT_TEXT_LENGTH, FieldDef, FieldNamer, NativeType,
    SchemaOverride, map_to_native, sanitize_field_name,
};
use crate::storage::{ContainerSpec, FeatureTarget, InsertColumn, InsertCursor, InsertRow, Value};
use crate::utils::{CancellationToken, ProgressCounter};

/// Processed rows between cancellation polls.
pub const CANCEL_POLL_INTERVAL: u64 = 1_000;
/// Inserted rows between rate reports.
pub const RATE_REPORT_INTERVAL: u64 = 10_000;

const DEFAULT_READ_BATCH_SIZE: usize = 8_192;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// One of the geometry type table entries. Read from the dataset's geo
    /// metadata when absent.
    pub geometry_type: Option<String>,
    /// `name` or `x_name,y_name`. Defaults to the metadata's primary column,
    /// `wkb`, or the `geometry_X,geometry_Y` pair for COORDINATES.
    pub geometry_column: Option<GeometryColumnRef>,
    pub spatial_reference: Option<String>,
    /// Substrings every selected part path must contain.
    pub partitions: Vec<String>,
    pub sample_count: Option<u64>,
    pub schema_override: Option<PathBuf>,
    pub compact: bool,
    pub build_spatial_index: bool,
    pub read_batch_size: usize,
    pub max_field_name_length: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            geometry_type: None,
            geometry_column: None,
            spatial_reference: None,
            partitions: Vec::new(),
            sample_count: None,
            schema_override: None,
            compact: true,
            build_spatial_index: false,
            read_batch_size: DEFAULT_READ_BATCH_SIZE,
            max_field_name_length: DEFAULT_MAX_FIELD_NAME_LENGTH,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportStage {
    Validating,
    SchemaResolving,
    Creating,
    Inserting,
    Finalizing,
    Done,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportStage::Validating => "validating",
            ImportStage::SchemaResolving => "resolving schema",
            ImportStage::Creating => "creating container",
            ImportStage::Inserting => "inserting",
            ImportStage::Finalizing => "finalizing",
            ImportStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImportSummary {
    pub container: String,
    pub inserted: u64,
    pub failed: u64,
    pub cancelled: bool,
    /// The run stopped because `sample_count` rows were inserted.
    pub sampled: bool,
    pub stage: ImportStage,
}

/// Outcome of a row that did not make it into the container.
#[derive(Debug)]
pub enum RowFailure {
    /// The row could not be built from the part file.
    Unassembled(String),
    /// The store refused the assembled row.
    Rejected { row: InsertRow, error: StoreError },
}

/// Where the value of a target field comes from.
#[derive(Clone, Debug, PartialEq)]
enum FieldSource {
    Column(String),
    Partition(String),
    Absent,
}

#[derive(Clone, Debug)]
struct PlannedField {
    def: FieldDef,
    source: FieldSource,
}

/// Everything the insert stage needs to know about the input.
struct ImportPlan {
    root: PathBuf,
    parts: Vec<PathBuf>,
    geometry_type: GeometryType,
    geometry_column: GeometryColumnRef,
    channel: InsertChannel,
    spatial_reference: SpatialReference,
    fields: Vec<PlannedField>,
}

fn enter(stage: &mut ImportStage, next: ImportStage) {
    *stage = next;
    tracing::info!("Import: {}", next);
}

fn relative_text(root: &Path, part: &Path) -> String {
    part.strip_prefix(root)
        .unwrap_or(part)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Part files of `input` after partition filtering, plus the dataset root.
pub fn select_parts(input: &Path, partitions: &[String]) -> Result<(PathBuf, Vec<PathBuf>)> {
    validate_partition_filter(partitions)?;
    if !input.exists() {
        return Err(ConvertError::InvalidPath {
            path: input.to_path_buf(),
            reason: "does not exist".to_string(),
        });
    }
    if input.is_file() {
        if !partitions.is_empty() {
            return Err(ConvertError::AmbiguousPartitionRequest(input.to_path_buf()));
        }
        let root = input.parent().map(Path::to_path_buf).unwrap_or_default();
        return Ok((root, vec![input.to_path_buf()]));
    }

    let parts: Vec<PathBuf> = discover_part_files(input)?
        .into_iter()
        .filter(|part| {
            let text = relative_text(input, part);
            partitions.iter().all(|token| text.contains(token.as_str()))
        })
        .collect();
    if parts.is_empty() {
        return Err(ConvertError::NoPartFiles(input.to_path_buf()));
    }
    Ok((input.to_path_buf(), parts))
}

/// Geo metadata of the selected parts merged into one document.
///
/// `None` when no part carries a document; an error when only some do.
fn dataset_metadata(parts: &[PathBuf]) -> Result<Option<GeoMetadata>> {
    let mut documents = Vec::with_capacity(parts.len());
    let mut missing = Vec::new();
    for part in parts {
        match GeoMetadata::read(part) {
            Ok(document) => documents.push(document),
            Err(ConvertError::NotGeospatial(path)) => missing.push(path),
            Err(err) => return Err(err),
        }
    }
    match (documents.is_empty(), missing.first()) {
        (true, _) => Ok(None),
        (false, Some(path)) => Err(ConvertError::InconsistentGeometry(format!(
            "{:?} has no geo metadata while other parts do",
            path
        ))),
        (false, None) => GeoMetadata::merge(&documents).map(Some),
    }
}

fn read_schema(part: &Path) -> Result<SchemaRef> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(part)?)?;
    Ok(builder.schema().clone())
}

fn is_string_like(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View
    ) || matches!(data_type, DataType::Dictionary(_, value) if is_string_like(value))
}

/// Longest value, in characters, of every string or nested column across
/// `parts`. Nested values are measured in their flattened text form.
pub fn max_string_lengths(parts: &[PathBuf]) -> Result<BTreeMap<String, usize>> {
    let mut lengths: BTreeMap<String, usize> = BTreeMap::new();
    for part in parts {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(part)?)?;
        let indices: Vec<usize> = builder
            .schema()
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| is_string_like(f.data_type()) || f.data_type().is_nested())
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            continue;
        }
        let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
        let reader = builder.with_projection(mask).build()?;
        for batch in reader {
            let batch = batch?;
            let schema = batch.schema();
            for (field, column) in schema.fields().iter().zip(batch.columns()) {
                let text = canonical_column(column, NativeType::String)?;
                let Some(text) = text.as_string_opt::<i32>() else {
                    continue;
                };
                let longest = text.iter().flatten().map(|v| v.chars().count()).max();
                if let Some(longest) = longest {
                    let entry = lengths.entry(field.name().clone()).or_default();
                    *entry = (*entry).max(longest);
                }
            }
        }
    }
    Ok(lengths)
}

fn resolve_inputs(
    parts: &[PathBuf],
    options: &ImportOptions,
) -> Result<(GeometryType, GeometryColumnRef, SpatialReference)> {
    let requested_type = options
        .geometry_type
        .as_deref()
        .map(str::parse::<GeometryType>)
        .transpose()?;
    let requested_column = options.geometry_column.clone();
    let requested_reference = options
        .spatial_reference
        .as_deref()
        .map(str::parse::<SpatialReference>)
        .transpose()?;

    // read even when every option is given: mixed parts must still fail
    let metadata = dataset_metadata(parts)?;

    let geometry_type = match (requested_type, &metadata) {
        (Some(geometry_type), _) => geometry_type,
        (None, Some(metadata)) => metadata.geometry_type()?,
        (None, None) => {
            let first = parts.first().cloned().unwrap_or_default();
            return Err(ConvertError::NotGeospatial(first));
        }
    };
    let geometry_column = match (requested_column, &metadata) {
        (Some(column), _) => column,
        (None, _) if geometry_type == GeometryType::Coordinates => GeometryColumnRef::Pair(
            crate::geometry::COORDINATE_X_COLUMN.to_string(),
            crate::geometry::COORDINATE_Y_COLUMN.to_string(),
        ),
        (None, Some(metadata)) => GeometryColumnRef::Single(metadata.primary_column.clone()),
        (None, None) => GeometryColumnRef::default(),
    };
    let spatial_reference = match (requested_reference, &metadata) {
        (Some(reference), _) => reference,
        (None, Some(metadata)) => metadata.spatial_reference()?,
        (None, None) => SpatialReference::WGS84,
    };

    let paired = matches!(geometry_column, GeometryColumnRef::Pair(..));
    if paired != (geometry_type == GeometryType::Coordinates) {
        return Err(ConvertError::MissingGeometryColumn(format!(
            "{geometry_column} (COORDINATES reads an x,y column pair, other types a single column)"
        )));
    }
    Ok((geometry_type, geometry_column, spatial_reference))
}

fn select_channel(
    schema: &SchemaRef,
    geometry_type: GeometryType,
    geometry_column: &GeometryColumnRef,
) -> Result<InsertChannel> {
    for name in geometry_column.names() {
        if schema.field_with_name(name).is_err() {
            return Err(ConvertError::MissingGeometryColumn(name.to_string()));
        }
    }
    let data_type = match geometry_column {
        GeometryColumnRef::Single(name) => schema
            .field_with_name(name)
            .ok()
            .map(|field| field.data_type().clone()),
        GeometryColumnRef::Pair(x, y) => {
            for name in [x, y] {
                let data_type = schema.field_with_name(name)?.data_type();
                if !data_type.is_numeric() {
                    return Err(ConvertError::UnsupportedType(format!(
                        "coordinate column '{name}' has type {data_type}"
                    )));
                }
            }
            None
        }
    };
    InsertChannel::select(geometry_type, data_type.as_ref()).ok_or_else(|| {
        ConvertError::UnsupportedType(format!(
            "column '{geometry_column}' of type {} cannot hold {geometry_type} geometry",
            data_type.map(|t| t.to_string()).unwrap_or_default()
        ))
    })
}

/// Introspected fields in column order, then partition keys not present as
/// columns. Names are the source names; the naming policy runs later.
fn introspect_fields(
    root: &Path,
    parts: &[PathBuf],
    schema: &SchemaRef,
    geometry_column: &GeometryColumnRef,
) -> Result<Vec<PlannedField>> {
    let string_lengths = max_string_lengths(parts)?;
    let mut fields = Vec::new();
    for field in schema.fields() {
        if geometry_column.contains(field.name()) {
            continue;
        }
        let native = map_to_native(field.data_type())?;
        let mut def = FieldDef::new(field.name().clone(), native).with_alias(field.name().clone());
        if native.is_text() {
            let observed = string_lengths.get(field.name()).copied().unwrap_or(0);
            def = def.with_length(observed.max(DEFAULT_TEXT_LENGTH as usize) as u32);
        }
        fields.push(PlannedField {
            def,
            source: FieldSource::Column(field.name().clone()),
        });
    }

    let mut keys: Vec<(String, NativeType)> = Vec::new();
    for part in parts {
        for (key, value) in partition_of_part(root, part).iter() {
            if schema.field_with_name(key).is_ok() {
                continue;
            }
            let native = value.native_type();
            match keys.iter_mut().find(|(k, _)| k == key) {
                Some((_, existing)) if *existing != native => {
                    *existing = match (*existing, native) {
                        (NativeType::Integer, NativeType::Double)
                        | (NativeType::Double, NativeType::Integer) => NativeType::Double,
                        _ => NativeType::String,
                    };
                }
                Some(_) => {}
                None => keys.push((key.to_string(), native)),
            }
        }
    }
    for (key, native) in keys {
        fields.push(PlannedField {
            def: FieldDef::new(key.clone(), native).with_alias(key.clone()),
            source: FieldSource::Partition(key),
        });
    }
    Ok(fields)
}

/// Swaps in override definitions and appends the ones nothing matched.
///
/// An override entry matches a column by its source name or by the name the
/// naming policy gives that column (`2020 pop` or `c2020_pop`).
fn apply_overrides(
    fields: Vec<PlannedField>,
    overrides: &mut SchemaOverride,
    max_field_name_length: usize,
) -> Vec<PlannedField> {
    let mut resolved: Vec<PlannedField> = fields
        .into_iter()
        .map(|planned| {
            let source_name = planned.def.alias.clone().unwrap_or_else(|| planned.def.name.clone());
            let taken = overrides.take(&source_name).or_else(|| {
                overrides.take(&sanitize_field_name(&source_name, max_field_name_length))
            });
            match taken {
                Some(mut def) => {
                    if def.alias.is_none() {
                        def.alias = Some(source_name);
                    }
                    PlannedField {
                        def,
                        source: planned.source,
                    }
                }
                None => planned,
            }
        })
        .collect();
    for def in overrides.remaining() {
        tracing::warn!(
            "Field definition '{}' from the schema override was not detected in the input data; adding it anyway",
            def.name
        );
        resolved.push(PlannedField {
            def: def.clone(),
            source: FieldSource::Absent,
        });
    }
    resolved
}

/// Creates the container and its fields, returning the created name and
/// the created field name of every planned field.
fn create_container(
    target: &mut dyn FeatureTarget,
    container: &str,
    plan: &mut ImportPlan,
    max_field_name_length: usize,
) -> Result<(String, Vec<String>)> {
    let spec = ContainerSpec {
        name: container.to_string(),
        category: plan.geometry_type.category(),
        spatial_reference: plan.spatial_reference,
        has_m: plan.geometry_type.has_m(),
        has_z: plan.geometry_type.has_z(),
    };
    let created = target.create_container(&spec)?;

    let mut namer = FieldNamer::new(max_field_name_length);
    for existing in target.list_fields(&created)? {
        namer.reserve(&existing.name);
    }
    for planned in &mut plan.fields {
        planned.def.name = namer.assign(&planned.def.name);
        target.add_field(&created, &planned.def)?;
    }

    let actual = target.list_fields(&created)?;
    let mut names = Vec::with_capacity(plan.fields.len());
    for planned in &plan.fields {
        let alias = planned.def.alias.as_deref();
        let found = actual
            .iter()
            .find(|info| alias.is_some() && info.alias.as_deref() == alias)
            .or_else(|| actual.iter().find(|info| info.name == planned.def.name))
            .or_else(|| {
                actual
                    .iter()
                    .find(|info| info.name.eq_ignore_ascii_case(&planned.def.name))
            })
            .ok_or_else(|| StoreError::UnknownColumn {
                container: created.clone(),
                column: planned.def.name.clone(),
            })?;
        names.push(found.name.clone());
    }
    Ok((created, names))
}

/// Store type every column is converted to before values are read.
fn canonical_type(native: NativeType) -> DataType {
    match native {
        NativeType::ObjectId
        | NativeType::SmallInteger
        | NativeType::Integer
        | NativeType::BigInteger => DataType::Int64,
        NativeType::Single | NativeType::Double => DataType::Float64,
        NativeType::Date => DataType::Timestamp(TimeUnit::Second, None),
        NativeType::Blob => DataType::LargeBinary,
        _ => DataType::Utf8,
    }
}

fn flatten_nested(array: &ArrayRef) -> std::result::Result<ArrayRef, ArrowError> {
    let options = FormatOptions::default();
    let formatter = ArrayFormatter::try_new(array.as_ref(), &options)?;
    let values: StringArray = (0..array.len())
        .map(|i| (!array.is_null(i)).then(|| formatter.value(i).to_string()))
        .collect();
    Ok(Arc::new(values))
}

fn canonical_column(array: &ArrayRef, native: NativeType) -> std::result::Result<ArrayRef, ArrowError> {
    let target = canonical_type(native);
    if target == DataType::Utf8 && array.data_type().is_nested() {
        return flatten_nested(array);
    }
    if array.data_type() == &target {
        return Ok(array.clone());
    }
    cast(array.as_ref(), &target)
}

fn cell(array: &ArrayRef, native: NativeType, row: usize) -> std::result::Result<Value, String> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }
    let value = match canonical_type(native) {
        DataType::Int64 => array
            .as_primitive_opt::<Int64Type>()
            .map(|a| Value::Integer(a.value(row))),
        DataType::Float64 => array
            .as_primitive_opt::<Float64Type>()
            .map(|a| Value::Double(a.value(row))),
        DataType::Timestamp(_, _) => match array.as_primitive_opt::<TimestampSecondType>() {
            Some(a) => Some(Value::Date(
                OffsetDateTime::from_unix_timestamp(a.value(row)).map_err(|e| e.to_string())?,
            )),
            None => None,
        },
        DataType::LargeBinary => array
            .as_binary_opt::<i64>()
            .map(|a| Value::Blob(a.value(row).to_vec())),
        _ => array
            .as_string_opt::<i32>()
            .map(|a| Value::Text(a.value(row).to_string())),
    };
    value.ok_or_else(|| format!("column has unexpected type {}", array.data_type()))
}

/// Geometry columns of one record batch, converted for reading.
enum GeometryColumns {
    Single(ArrayRef, InsertChannel),
    Pair(ArrayRef, ArrayRef),
}

impl GeometryColumns {
    fn prepare(
        batch: &RecordBatch,
        column: &GeometryColumnRef,
        channel: InsertChannel,
    ) -> std::result::Result<Self, String> {
        let lookup = |name: &str| {
            batch
                .column_by_name(name)
                .cloned()
                .ok_or_else(|| format!("geometry column '{name}' is missing"))
        };
        let prepared = match column {
            GeometryColumnRef::Single(name) => {
                let array = lookup(name)?;
                let target = match channel {
                    InsertChannel::Wkb => DataType::LargeBinary,
                    _ => DataType::Utf8,
                };
                let array = if array.data_type() == &target {
                    array
                } else {
                    cast(array.as_ref(), &target).map_err(|e| e.to_string())?
                };
                GeometryColumns::Single(array, channel)
            }
            GeometryColumnRef::Pair(x, y) => {
                let x = cast(lookup(x)?.as_ref(), &DataType::Float64).map_err(|e| e.to_string())?;
                let y = cast(lookup(y)?.as_ref(), &DataType::Float64).map_err(|e| e.to_string())?;
                GeometryColumns::Pair(x, y)
            }
        };
        Ok(prepared)
    }

    fn value(&self, row: usize) -> std::result::Result<Option<GeometryValue>, String> {
        let unexpected = |array: &ArrayRef| format!("geometry column has type {}", array.data_type());
        match self {
            GeometryColumns::Single(array, _) if array.is_null(row) => Ok(None),
            GeometryColumns::Single(array, InsertChannel::Wkb) => array
                .as_binary_opt::<i64>()
                .map(|a| Some(GeometryValue::Wkb(a.value(row).to_vec())))
                .ok_or_else(|| unexpected(array)),
            GeometryColumns::Single(array, channel) => {
                let text = array
                    .as_string_opt::<i32>()
                    .map(|a| a.value(row).to_string())
                    .ok_or_else(|| unexpected(array))?;
                Ok(Some(match channel {
                    InsertChannel::Cell => GeometryValue::Cell(text),
                    _ => GeometryValue::Wkt(text),
                }))
            }
            GeometryColumns::Pair(x, y) => {
                if x.is_null(row) || y.is_null(row) {
                    return Ok(None);
                }
                let xs = x.as_primitive_opt::<Float64Type>().ok_or_else(|| unexpected(x))?;
                let ys = y.as_primitive_opt::<Float64Type>().ok_or_else(|| unexpected(y))?;
                Ok(Some(GeometryValue::Xy(xs.value(row), ys.value(row))))
            }
        }
    }
}

/// Attribute and geometry columns of one record batch, ready for row
/// assembly.
struct PreparedBatch {
    columns: Vec<Option<ArrayRef>>,
    geometry: GeometryColumns,
}

impl PreparedBatch {
    fn prepare(plan: &ImportPlan, batch: &RecordBatch) -> std::result::Result<Self, String> {
        let mut columns = Vec::with_capacity(plan.fields.len());
        for planned in &plan.fields {
            let column = match &planned.source {
                FieldSource::Column(name) => match batch.column_by_name(name) {
                    Some(array) => Some(
                        canonical_column(array, planned.def.native_type)
                            .map_err(|e| format!("column '{name}': {e}"))?,
                    ),
                    None => None,
                },
                FieldSource::Partition(_) | FieldSource::Absent => None,
            };
            columns.push(column);
        }
        let geometry = GeometryColumns::prepare(batch, &plan.geometry_column, plan.channel)?;
        Ok(Self { columns, geometry })
    }

    fn assemble(
        &self,
        plan: &ImportPlan,
        partition: &Partition,
        row: usize,
    ) -> std::result::Result<InsertRow, String> {
        let mut values = Vec::with_capacity(plan.fields.len());
        for (planned, column) in plan.fields.iter().zip(&self.columns) {
            let value = match (&planned.source, column) {
                (FieldSource::Column(_), Some(array)) => cell(array, planned.def.native_type, row)?,
                (FieldSource::Partition(key), _) => partition
                    .get(key)
                    .map(PartitionValue::to_value)
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            };
            values.push(value);
        }
        Ok(InsertRow {
            values,
            geometry: self.geometry.value(row)?,
        })
    }
}

fn insert_one(
    cursor: &mut dyn InsertCursor,
    prepared: &PreparedBatch,
    plan: &ImportPlan,
    partition: &Partition,
    row: usize,
) -> std::result::Result<(), RowFailure> {
    let assembled = prepared
        .assemble(plan, partition, row)
        .map_err(RowFailure::Unassembled)?;
    cursor
        .insert(&assembled)
        .map_err(|error| RowFailure::Rejected {
            row: assembled,
            error,
        })
}

/// Imports the part files at `input` into a new container named `container`.
pub fn import_dataset(
    target: &mut dyn FeatureTarget,
    input: &Path,
    container: &str,
    options: &ImportOptions,
    cancel: &CancellationToken,
) -> Result<ImportSummary> {
    let mut stage = ImportStage::Validating;
    tracing::info!("Import: {}", stage);
    let (root, parts) = select_parts(input, &options.partitions)?;
    let (geometry_type, geometry_column, spatial_reference) = resolve_inputs(&parts, options)?;
    tracing::info!(
        "Importing {} part files as {} from '{}' ({})",
        parts.len(),
        geometry_type,
        geometry_column,
        spatial_reference
    );

    enter(&mut stage, ImportStage::SchemaResolving);
    let schema = read_schema(&parts[0])?;
    let channel = select_channel(&schema, geometry_type, &geometry_column)?;
    let fields = introspect_fields(&root, &parts, &schema, &geometry_column)?;
    let fields = match &options.schema_override {
        Some(path) => apply_overrides(
            fields,
            &mut SchemaOverride::load(path)?,
            options.max_field_name_length,
        ),
        None => fields,
    };
    let mut plan = ImportPlan {
        root,
        parts,
        geometry_type,
        geometry_column,
        channel,
        spatial_reference,
        fields,
    };

    enter(&mut stage, ImportStage::Creating);
    let (created, field_names) =
        create_container(target, container, &mut plan, options.max_field_name_length)?;
    let mut columns: Vec<InsertColumn> = field_names.into_iter().map(InsertColumn::Field).collect();
    columns.push(InsertColumn::Geometry(plan.channel));

    enter(&mut stage, ImportStage::Inserting);
    let mut inserted = 0u64;
    let mut failed = 0u64;
    let mut processed = 0u64;
    let mut cancelled = false;
    let mut sampled = options.sample_count == Some(0);
    let mut progress = ProgressCounter::new("Import", RATE_REPORT_INTERVAL);
    {
        let mut cursor = target.open_insert_cursor(&created, &columns)?;
        'parts: for part in &plan.parts {
            if sampled {
                break;
            }
            let partition = partition_of_part(&plan.root, part);
            let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(part)?)?
                .with_batch_size(options.read_batch_size.max(1))
                .build()?;
            tracing::debug!("Reading {:?}", part);
            let mut offset = 0usize;
            for batch in reader {
                let batch = batch?;
                let prepared = PreparedBatch::prepare(&plan, &batch).map_err(|message| {
                    ConvertError::RowAssembly {
                        part: part.clone(),
                        row: offset,
                        message,
                    }
                })?;
                for row in 0..batch.num_rows() {
                    match insert_one(cursor.as_mut(), &prepared, &plan, &partition, row) {
                        Ok(()) => {
                            inserted += 1;
                            progress.inc(1);
                        }
                        Err(RowFailure::Rejected { row: values, error }) => {
                            failed += 1;
                            tracing::warn!(
                                "Row {} of {:?} was not inserted: {}; values: {}",
                                offset + row,
                                part,
                                error,
                                values
                            );
                        }
                        Err(RowFailure::Unassembled(message)) => {
                            return Err(ConvertError::RowAssembly {
                                part: part.clone(),
                                row: offset + row,
                                message,
                            });
                        }
                    }
                    processed += 1;
                    if options.sample_count.is_some_and(|limit| inserted >= limit) {
                        sampled = true;
                        break 'parts;
                    }
                    if processed % CANCEL_POLL_INTERVAL == 0 && cancel.is_cancelled() {
                        tracing::warn!("Import cancelled after {} rows", processed);
                        cancelled = true;
                        break 'parts;
                    }
                }
                offset += batch.num_rows();
            }
        }
    }
    progress.finish();

    enter(&mut stage, ImportStage::Finalizing);
    if options.compact {
        target.compact(&created)?;
    }
    if options.build_spatial_index {
        target.build_spatial_index(&created)?;
    }

    enter(&mut stage, ImportStage::Done);
    tracing::info!(
        "Inserted {} rows into {} ({} failed)",
        inserted,
        created,
        failed
    );
    Ok(ImportSummary {
        container: created,
        inserted,
        failed,
        cancelled,
        sampled,
        stage,
    })
}
