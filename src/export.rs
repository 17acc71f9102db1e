//! Store table to (partitioned) GeoParquet.
//!
//! Rows stream from the source cursor into a [`RowBatch`] per partition
//! directory. A batch is written as one part file once it holds
//! `batch_size` rows, and whatever is left is written at the end of the
//! stream.

use arrow_array::{
    ArrayRef, BinaryArray, Float32Array, Float64Array, Int16Array, Int64Array, LargeBinaryArray,
    RecordBatch, StringArray, TimestampSecondArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use geo_types::Geometry;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{ConvertError, Result};
use crate::geometry::{Bounds, EncodedGeometry, GeometryCategory, GeometryFormat, encode};
use crate::metadata::{GeoMetadata, SpatialReference};
use crate::partition::PartitionValue;
use crate::schema::{NativeType, map_to_columnar};
use crate::storage::{FeatureSource, TableDescription, Value};
use crate::utils::{CancellationToken, ProgressCounter};

pub const DEFAULT_BATCH_SIZE: usize = 300_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartCompression {
    #[default]
    Snappy,
    Zstd,
    None,
}

impl PartCompression {
    /// Codec token used in part file names.
    pub fn file_token(&self) -> &'static str {
        match self {
            PartCompression::Snappy => "snappy",
            PartCompression::Zstd => "zstd",
            PartCompression::None => "uncompressed",
        }
    }

    fn codec(&self) -> Compression {
        match self {
            PartCompression::Snappy => Compression::SNAPPY,
            PartCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
            PartCompression::None => Compression::UNCOMPRESSED,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub include_geometry: bool,
    pub geometry_format: String,
    pub batch_size: usize,
    pub compression: PartCompression,
    pub partition_columns: Vec<String>,
    /// Rows between progress reports and cancellation polls. Defaults to one
    /// percent of the table.
    pub progress_interval: Option<u64>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_geometry: true,
            geometry_format: GeometryFormat::Wkb.as_str().to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            compression: PartCompression::default(),
            partition_columns: Vec::new(),
            progress_interval: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExportSummary {
    pub parts: Vec<PathBuf>,
    pub rows: u64,
    pub cancelled: bool,
}

/// Column buffers of one part file in the making.
pub struct RowBatch {
    schema: SchemaRef,
    buffers: Vec<ColumnBuffer>,
    attribute_count: usize,
    format: Option<GeometryFormat>,
    bounds: Bounds,
    first_category: Option<GeometryCategory>,
    rows: usize,
}

enum ColumnBuffer {
    String(Vec<Option<String>>),
    Int16(Vec<Option<i16>>),
    Int64(Vec<Option<i64>>),
    Float32(Vec<Option<f32>>),
    Float64(Vec<Option<f64>>),
    Timestamp(Vec<Option<i64>>),
    LargeBinary(Vec<Option<Vec<u8>>>),
    Binary(Vec<Option<Vec<u8>>>),
}

impl ColumnBuffer {
    fn for_type(data_type: &DataType) -> Self {
        match data_type {
            DataType::Int16 => ColumnBuffer::Int16(Vec::new()),
            DataType::Int64 => ColumnBuffer::Int64(Vec::new()),
            DataType::Float32 => ColumnBuffer::Float32(Vec::new()),
            DataType::Float64 => ColumnBuffer::Float64(Vec::new()),
            DataType::Timestamp(_, _) => ColumnBuffer::Timestamp(Vec::new()),
            DataType::LargeBinary => ColumnBuffer::LargeBinary(Vec::new()),
            DataType::Binary => ColumnBuffer::Binary(Vec::new()),
            _ => ColumnBuffer::String(Vec::new()),
        }
    }

    fn push(&mut self, value: &Value) {
        match self {
            ColumnBuffer::String(values) => values.push(coerce_string(value)),
            ColumnBuffer::Int16(values) => values.push(coerce_i64(value).and_then(|v| i16::try_from(v).ok())),
            ColumnBuffer::Int64(values) => values.push(coerce_i64(value)),
            ColumnBuffer::Float32(values) => values.push(coerce_f64(value).map(|v| v as f32)),
            ColumnBuffer::Float64(values) => values.push(coerce_f64(value)),
            ColumnBuffer::Timestamp(values) => values.push(coerce_timestamp(value)),
            ColumnBuffer::LargeBinary(values) | ColumnBuffer::Binary(values) => {
                values.push(coerce_bytes(value))
            }
        }
    }

    fn take_array(&mut self) -> ArrayRef {
        match self {
            ColumnBuffer::String(values) => Arc::new(StringArray::from(std::mem::take(values))),
            ColumnBuffer::Int16(values) => Arc::new(Int16Array::from(std::mem::take(values))),
            ColumnBuffer::Int64(values) => Arc::new(Int64Array::from(std::mem::take(values))),
            ColumnBuffer::Float32(values) => Arc::new(Float32Array::from(std::mem::take(values))),
            ColumnBuffer::Float64(values) => Arc::new(Float64Array::from(std::mem::take(values))),
            ColumnBuffer::Timestamp(values) => {
                Arc::new(TimestampSecondArray::from(std::mem::take(values)))
            }
            ColumnBuffer::LargeBinary(values) => {
                let values = std::mem::take(values);
                Arc::new(LargeBinaryArray::from_opt_vec(
                    values.iter().map(|v| v.as_deref()).collect(),
                ))
            }
            ColumnBuffer::Binary(values) => {
                let values = std::mem::take(values);
                Arc::new(BinaryArray::from_opt_vec(
                    values.iter().map(|v| v.as_deref()).collect(),
                ))
            }
        }
    }

    fn clear(&mut self) {
        match self {
            ColumnBuffer::String(values) => values.clear(),
            ColumnBuffer::Int16(values) => values.clear(),
            ColumnBuffer::Int64(values) => values.clear(),
            ColumnBuffer::Float32(values) => values.clear(),
            ColumnBuffer::Float64(values) => values.clear(),
            ColumnBuffer::Timestamp(values) => values.clear(),
            ColumnBuffer::LargeBinary(values) | ColumnBuffer::Binary(values) => values.clear(),
        }
    }
}

impl RowBatch {
    pub fn new(schema: SchemaRef, attribute_count: usize, format: Option<GeometryFormat>) -> Self {
        let buffers = schema
            .fields()
            .iter()
            .map(|field| ColumnBuffer::for_type(field.data_type()))
            .collect();
        Self {
            schema,
            buffers,
            attribute_count,
            format,
            bounds: Bounds::new(),
            first_category: None,
            rows: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn bbox(&self) -> Option<[f64; 4]> {
        self.bounds.to_bbox()
    }

    /// Appends one row: attribute values in schema order, then the geometry.
    pub fn push(&mut self, attributes: &[Value], geometry: Option<&Value>) -> Result<()> {
        for (buffer, value) in self.buffers[..self.attribute_count]
            .iter_mut()
            .zip(attributes)
        {
            buffer.push(value);
        }
        if let Some(format) = self.format {
            let shape = match geometry {
                Some(Value::Shape(shape)) => Some(shape),
                _ => None,
            };
            self.push_geometry(format, shape)?;
        }
        self.rows += 1;
        Ok(())
    }

    fn push_geometry(&mut self, format: GeometryFormat, shape: Option<&Geometry<f64>>) -> Result<()> {
        let encoded = match shape {
            Some(shape) => encode(shape, format)?,
            None => None,
        };
        if let Some(shape) = shape {
            self.bounds.add(shape);
            if self.first_category.is_none() {
                self.first_category = GeometryCategory::of(shape);
            }
        }
        let geometry_buffers = &mut self.buffers[self.attribute_count..];
        match (encoded, geometry_buffers) {
            (Some(EncodedGeometry::Xy(x, y)), [ColumnBuffer::Float64(xs), ColumnBuffer::Float64(ys)]) => {
                xs.push(Some(x));
                ys.push(Some(y));
            }
            (Some(EncodedGeometry::Wkt(text)), [ColumnBuffer::String(values)]) => {
                values.push(Some(text));
            }
            (Some(EncodedGeometry::Wkb(bytes)), [ColumnBuffer::Binary(values)]) => {
                values.push(Some(bytes));
            }
            (None, buffers) => {
                for buffer in buffers {
                    buffer.push(&Value::Null);
                }
            }
            (Some(_), _) => {
                return Err(ConvertError::InvalidGeometryFormat(format.to_string()));
            }
        }
        Ok(())
    }

    /// Drains the buffers into a record batch.
    pub fn take_record_batch(&mut self) -> Result<RecordBatch> {
        let arrays: Vec<ArrayRef> = self.buffers.iter_mut().map(ColumnBuffer::take_array).collect();
        let batch = RecordBatch::try_new(self.schema.clone(), arrays)?;
        self.reset();
        Ok(batch)
    }

    /// Drops buffered rows without writing them.
    pub fn reset(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
        self.bounds.reset();
        self.first_category = None;
        self.rows = 0;
    }
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Integer(n) => Some(n.to_string()),
        Value::Double(n) => Some(n.to_string()),
        Value::Date(d) => d.format(&Rfc3339).ok(),
        Value::Null | Value::Blob(_) | Value::Shape(_) => None,
    }
}

fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(n) => Some(*n),
        Value::Double(n) => Some(*n as i64),
        Value::Text(s) => s.parse::<i64>().ok(),
        _ => None,
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Double(n) => Some(*n),
        Value::Integer(n) => Some(*n as f64),
        Value::Text(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn coerce_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Date(d) => Some(d.unix_timestamp()),
        Value::Text(s) => OffsetDateTime::parse(s, &Rfc3339).ok().map(|d| d.unix_timestamp()),
        Value::Integer(n) => Some(*n),
        _ => None,
    }
}

fn coerce_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Blob(bytes) => Some(bytes.clone()),
        Value::Text(s) => Some(s.as_bytes().to_vec()),
        _ => None,
    }
}

/// Directory segment text of a partition value.
///
/// Values are rendered so that [`PartitionValue::parse`] reads back the same
/// value. Text that would split or break a `key=value` segment is refused.
fn partition_segment(column: &str, value: &Value) -> Result<String> {
    let text = match value {
        Value::Null => return Err(ConvertError::NullPartitionValue(column.to_string())),
        Value::Integer(n) => PartitionValue::Int(*n).to_string(),
        Value::Double(n) => PartitionValue::Float(*n).to_string(),
        Value::Text(s) => s.clone(),
        Value::Date(d) => d
            .format(&Rfc3339)
            .map_err(|err| ConvertError::UnsupportedType(err.to_string()))?,
        Value::Blob(_) | Value::Shape(_) => {
            return Err(ConvertError::UnsupportedType(format!(
                "partition column '{column}' must hold scalar values"
            )));
        }
    };
    if text.is_empty() || text.contains(['/', '\\', '=']) {
        return Err(ConvertError::InvalidPartitionFilter(format!(
            "value {text:?} of partition column '{column}' cannot be used as a directory name"
        )));
    }
    Ok(text)
}

/// Layout of the exported columns.
struct ExportPlan {
    schema: SchemaRef,
    attributes: Vec<String>,
    partition_columns: Vec<String>,
    geometry_field: Option<String>,
    format: Option<GeometryFormat>,
}

impl ExportPlan {
    fn build(description: &TableDescription, table: &str, options: &ExportOptions) -> Result<Self> {
        let requested = if options.include_geometry {
            Some(options.geometry_format.parse::<GeometryFormat>()?)
        } else {
            None
        };
        // tables without a geometry field export their attributes only
        let format = requested.filter(|_| description.geometry_field.is_some());
        if requested.is_some() && format.is_none() {
            tracing::info!("{} has no geometry field; exporting attributes only", table);
        }

        for column in &options.partition_columns {
            if description.field(column).is_none() {
                return Err(ConvertError::InvalidPartitionFilter(format!(
                    "partition column '{column}' is not a field of '{table}'"
                )));
            }
        }

        let mut excluded: HashSet<&str> = options.partition_columns.iter().map(String::as_str).collect();
        if let Some(geometry) = &description.geometry_field {
            excluded.insert(geometry);
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        let mut attributes = Vec::new();
        for field in &description.fields {
            if excluded.contains(field.name.as_str())
                || description.is_system_field(&field.name)
                || matches!(field.native_type, NativeType::Raster | NativeType::Geometry)
            {
                continue;
            }
            if !seen.insert(field.name.clone()) {
                return Err(ConvertError::DuplicateColumn(field.name.clone()));
            }
            fields.push(Field::new(&field.name, map_to_columnar(field.native_type), true));
            attributes.push(field.name.clone());
        }

        let geometry_field = match (format, &description.geometry_field) {
            (Some(format), Some(geometry)) => {
                for field in format.output_fields() {
                    if !seen.insert(field.name().clone()) {
                        return Err(ConvertError::DuplicateColumn(field.name().clone()));
                    }
                    fields.push(field);
                }
                Some(geometry.clone())
            }
            _ => None,
        };

        Ok(Self {
            schema: Arc::new(Schema::new(fields)),
            attributes,
            partition_columns: options.partition_columns.clone(),
            geometry_field,
            format,
        })
    }

    /// Columns requested from the read cursor.
    fn cursor_columns(&self) -> Vec<String> {
        let mut columns = self.attributes.clone();
        columns.extend(self.partition_columns.iter().cloned());
        columns.extend(self.geometry_field.iter().cloned());
        columns
    }
}

struct PartWriter<'a> {
    root: &'a Path,
    compression: PartCompression,
    geometry_type: Option<GeometryCategory>,
    spatial_reference: SpatialReference,
    next_index: usize,
    parts: Vec<PathBuf>,
    rows: u64,
}

impl PartWriter<'_> {
    fn write(&mut self, partition: &str, batch: &mut RowBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let bbox = batch.bbox();
        let category = self.geometry_type.or(batch.first_category);
        let geo = match (batch.format, category) {
            (Some(GeometryFormat::Wkb), Some(category)) => Some(GeoMetadata::build(
                "wkb",
                category.metadata_name(),
                GeometryFormat::Wkb.as_str(),
                self.spatial_reference,
                bbox.as_ref().map(|b| &b[..]),
            )?),
            (Some(GeometryFormat::Wkb), None) => {
                tracing::warn!("No geometry type known for part; writing it without geo metadata");
                None
            }
            _ => None,
        };

        let mut properties = WriterProperties::builder().set_compression(self.compression.codec());
        if let Some(geo) = geo {
            properties = properties.set_key_value_metadata(Some(vec![geo.to_key_value()?]));
        }

        let dir = if partition.is_empty() {
            self.root.to_path_buf()
        } else {
            self.root.join(partition)
        };
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!(
            "part-{}-{:05}.{}.parquet",
            uuid::Uuid::new_v4().simple(),
            self.next_index,
            self.compression.file_token()
        ));

        let rows = batch.len() as u64;
        let record_batch = batch.take_record_batch()?;
        let file = File::create(&path)?;
        let mut writer = ArrowWriter::try_new(file, record_batch.schema(), Some(properties.build()))?;
        writer.write(&record_batch)?;
        writer.close()?;

        tracing::debug!("Wrote {} rows to {:?}", rows, path);
        self.next_index += 1;
        self.rows += rows;
        self.parts.push(path);
        Ok(())
    }
}

/// Exports `table` to part files below `output`.
pub fn export_table(
    source: &dyn FeatureSource,
    table: &str,
    output: &Path,
    options: &ExportOptions,
    cancel: &CancellationToken,
) -> Result<ExportSummary> {
    let description = source.describe(table)?;
    let plan = ExportPlan::build(&description, table, options)?;
    let batch_size = options.batch_size.max(1);
    let total = source.count(table)?;
    tracing::info!(
        "Exporting {} rows of {} ({} columns) to {:?}",
        total,
        table,
        plan.schema.fields().len(),
        output
    );

    fs::create_dir_all(output).map_err(|err| ConvertError::InvalidPath {
        path: output.to_path_buf(),
        reason: err.to_string(),
    })?;

    let mut writer = PartWriter {
        root: output,
        compression: options.compression,
        geometry_type: description.shape_type,
        spatial_reference: description.spatial_reference.unwrap_or(SpatialReference::Unknown),
        next_index: 0,
        parts: Vec::new(),
        rows: 0,
    };
    let mut progress = match options.progress_interval {
        Some(interval) => ProgressCounter::new("Export", interval),
        None => ProgressCounter::with_total("Export", total),
    };
    let mut batches: BTreeMap<String, RowBatch> = BTreeMap::new();
    let attribute_count = plan.attributes.len();
    let partition_count = plan.partition_columns.len();
    let mut cancelled = false;

    let cursor = source.open_read_cursor(table, &plan.cursor_columns())?;
    for row in cursor {
        let row = row?;
        let partition = plan
            .partition_columns
            .iter()
            .zip(&row[attribute_count..attribute_count + partition_count])
            .map(|(column, value)| Ok(format!("{column}={}", partition_segment(column, value)?)))
            .collect::<Result<Vec<_>>>()?
            .join("/");

        let batch = batches
            .entry(partition.clone())
            .or_insert_with(|| RowBatch::new(plan.schema.clone(), attribute_count, plan.format));
        batch.push(&row[..attribute_count], row.get(attribute_count + partition_count))?;
        if batch.len() >= batch_size {
            writer.write(&partition, batch)?;
        }

        if progress.inc(1) && cancel.is_cancelled() {
            tracing::warn!("Export cancelled after {} rows", progress.count());
            cancelled = true;
            break;
        }
    }

    if cancelled {
        for batch in batches.values_mut() {
            batch.reset();
        }
    } else {
        for (partition, batch) in batches.iter_mut() {
            writer.write(partition, batch)?;
        }
    }
    progress.finish();

    tracing::info!("Wrote {} rows in {} parts", writer.rows, writer.parts.len());
    Ok(ExportSummary {
        parts: writer.parts,
        rows: writer.rows,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;
    use crate::storage::MemoryStore;
    use geo_types::point;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::TempDir;

    fn store_with_rows(count: usize) -> MemoryStore {
        let mut store = MemoryStore::new();
        let description = TableDescription {
            fields: vec![
                FieldDef::new("OBJECTID", NativeType::ObjectId),
                FieldDef::new("name", NativeType::String),
                FieldDef::new("region", NativeType::String),
                FieldDef::new("score", NativeType::Single),
                FieldDef::new("Shape_Length", NativeType::Double),
                FieldDef::new("SHAPE", NativeType::Geometry),
            ],
            identity_field: Some("OBJECTID".into()),
            geometry_field: Some("SHAPE".into()),
            length_field: Some("Shape_Length".into()),
            shape_type: Some(GeometryCategory::Point),
            spatial_reference: Some(SpatialReference::WGS84),
            ..Default::default()
        };
        store.create_table("places", description).unwrap();
        for i in 0..count {
            store
                .push_row(
                    "places",
                    vec![
                        Value::Integer(i as i64 + 1),
                        Value::Text(format!("place {i}")),
                        Value::Text(if i % 2 == 0 { "north" } else { "south" }.into()),
                        Value::Double(i as f64 / 2.0),
                        Value::Double(0.0),
                        Value::Shape(Geometry::Point(point!(x: i as f64, y: -(i as f64)))),
                    ],
                )
                .unwrap();
        }
        store
    }

    fn count_rows(parts: &[PathBuf]) -> usize {
        parts
            .iter()
            .map(|part| {
                let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(part).unwrap())
                    .unwrap()
                    .build()
                    .unwrap();
                reader.map(|batch| batch.unwrap().num_rows()).sum::<usize>()
            })
            .sum()
    }

    #[test]
    fn coerce_helpers() {
        assert_eq!(coerce_string(&Value::Integer(-42)), Some("-42".to_string()));
        assert_eq!(coerce_string(&Value::Null), None);
        assert_eq!(coerce_i64(&Value::Double(3.9)), Some(3));
        assert_eq!(coerce_i64(&Value::Text(" 1 ".into())), None);
        assert_eq!(coerce_f64(&Value::Text("2.5".into())), Some(2.5));
        assert_eq!(coerce_timestamp(&Value::Text("1970-01-02T00:00:00Z".into())), Some(86_400));
        assert_eq!(coerce_bytes(&Value::Integer(1)), None);
    }

    #[test]
    fn schema_excludes_system_and_geometry_fields() {
        let store = store_with_rows(0);
        let description = store.describe("places").unwrap();
        let plan = ExportPlan::build(&description, "places", &ExportOptions::default()).unwrap();
        let names: Vec<_> = plan.schema.fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(names, vec!["name", "region", "score", "wkb"]);
        assert_eq!(plan.schema.field(2).data_type(), &DataType::Float32);

        let xy = ExportOptions {
            geometry_format: "xy".into(),
            ..Default::default()
        };
        let plan = ExportPlan::build(&description, "places", &xy).unwrap();
        assert_eq!(plan.schema.fields().len(), 5);
        assert_eq!(plan.cursor_columns().last().map(String::as_str), Some("SHAPE"));

        let bad = ExportOptions {
            geometry_format: "geojson".into(),
            ..Default::default()
        };
        assert!(matches!(
            ExportPlan::build(&description, "places", &bad),
            Err(ConvertError::InvalidGeometryFormat(_))
        ));
    }

    #[test]
    fn writes_bounded_parts_with_geo_metadata() {
        let store = store_with_rows(25);
        let dir = TempDir::new().unwrap();
        let options = ExportOptions {
            batch_size: 10,
            ..Default::default()
        };
        let summary =
            export_table(&store, "places", dir.path(), &options, &CancellationToken::new()).unwrap();
        assert_eq!(summary.parts.len(), 3);
        assert_eq!(summary.rows, 25);
        assert!(!summary.cancelled);
        assert_eq!(count_rows(&summary.parts), 25);

        let name = summary.parts[2].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("part-"));
        assert!(name.ends_with("-00002.snappy.parquet"));
        assert_eq!(name.len(), "part-".len() + 32 + "-00002.snappy.parquet".len());

        let geo = GeoMetadata::read(&summary.parts[0]).unwrap();
        assert_eq!(geo.primary_column, "wkb");
        assert_eq!(geo.bbox(), Some(&[0.0, -9.0, 9.0, 0.0][..]));
        let merged = GeoMetadata::merge(
            &summary
                .parts
                .iter()
                .map(|p| GeoMetadata::read(p).unwrap())
                .collect::<Vec<_>>(),
        )
        .unwrap();
        assert_eq!(merged.bbox(), Some(&[0.0, -24.0, 24.0, 0.0][..]));
    }

    #[test]
    fn partitions_route_rows_into_directories() {
        let store = store_with_rows(6);
        let dir = TempDir::new().unwrap();
        let options = ExportOptions {
            partition_columns: vec!["region".into()],
            ..Default::default()
        };
        let summary =
            export_table(&store, "places", dir.path(), &options, &CancellationToken::new()).unwrap();
        assert_eq!(summary.parts.len(), 2);
        assert!(summary.parts[0].starts_with(dir.path().join("region=north")));
        assert!(summary.parts[1].starts_with(dir.path().join("region=south")));
        assert_eq!(count_rows(&summary.parts), 6);

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&summary.parts[0]).unwrap())
            .unwrap();
        assert!(reader.schema().field_with_name("region").is_err());
    }

    #[test]
    fn cancellation_discards_unflushed_rows() {
        let store = store_with_rows(1000);
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = ExportOptions {
            batch_size: 4,
            ..Default::default()
        };
        let summary = export_table(&store, "places", dir.path(), &options, &cancel).unwrap();
        assert!(summary.cancelled);
        // polled after row 10: two full parts written, two buffered rows dropped
        assert_eq!(summary.parts.len(), 2);
        assert_eq!(summary.rows, 8);
    }

    #[test]
    fn tables_without_geometry_export_attributes() {
        let mut store = MemoryStore::new();
        let description = TableDescription {
            fields: vec![
                FieldDef::new("OBJECTID", NativeType::ObjectId),
                FieldDef::new("name", NativeType::String),
            ],
            identity_field: Some("OBJECTID".into()),
            ..Default::default()
        };
        store.create_table("plain", description).unwrap();
        for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
            store
                .push_row("plain", vec![Value::Integer(i as i64 + 1), Value::Text(name.into())])
                .unwrap();
        }
        let dir = TempDir::new().unwrap();
        let summary = export_table(
            &store,
            "plain",
            dir.path(),
            &ExportOptions::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(summary.rows, 3);
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&summary.parts[0]).unwrap())
            .unwrap();
        let names: Vec<_> = reader.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(names, vec!["name"]);
        assert!(matches!(
            GeoMetadata::read(&summary.parts[0]),
            Err(ConvertError::NotGeospatial(_))
        ));
    }

    #[test]
    fn partition_segments_parse_back_to_the_same_value() {
        assert_eq!(partition_segment("score", &Value::Double(2.0)).unwrap(), "2.0");
        assert_eq!(
            PartitionValue::parse(&partition_segment("score", &Value::Double(2.0)).unwrap()),
            PartitionValue::Float(2.0)
        );
        assert_eq!(partition_segment("year", &Value::Integer(2020)).unwrap(), "2020");
        for bad in ["north/east", "a=b", "", "c:\\x"] {
            assert!(matches!(
                partition_segment("region", &Value::Text(bad.into())),
                Err(ConvertError::InvalidPartitionFilter(_))
            ));
        }
    }

    #[test]
    fn null_partition_value_is_fatal() {
        let mut store = store_with_rows(1);
        store
            .push_row(
                "places",
                vec![
                    Value::Integer(9),
                    Value::Text("x".into()),
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    Value::Null,
                ],
            )
            .unwrap();
        let dir = TempDir::new().unwrap();
        let options = ExportOptions {
            partition_columns: vec!["region".into()],
            ..Default::default()
        };
        assert!(matches!(
            export_table(&store, "places", dir.path(), &options, &CancellationToken::new()),
            Err(ConvertError::NullPartitionValue(column)) if column == "region"
        ));
    }
}
