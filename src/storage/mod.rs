//! Feature store contracts.
//!
//! Pipelines only ever talk to a store through [`FeatureSource`] (export
//! side) and [`FeatureTarget`] (import side). Cursors are plain values that
//! release whatever they hold when dropped, so every exit path closes them.

use geo_types::Geometry;
use std::fmt;
use time::OffsetDateTime;

use crate::error::StoreError;
use crate::geometry::{GeometryCategory, GeometryValue, InsertChannel};
use crate::metadata::SpatialReference;
use crate::schema::FieldDef;

pub mod geojson;
pub mod memory;

pub use self::memory::MemoryStore;

/// One cell of a store row.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Double(f64),
    Text(String),
    Date(OffsetDateTime),
    Blob(Vec<u8>),
    Shape(Geometry<f64>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::Date(v) => write!(f, "{v}"),
            Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
            Value::Shape(_) => f.write_str("<geometry>"),
        }
    }
}

pub type Row = Vec<Value>;

pub type RowCursor<'a> = Box<dyn Iterator<Item = Result<Row, StoreError>> + 'a>;

/// What a store reports about one of its tables.
#[derive(Clone, Debug, Default)]
pub struct TableDescription {
    pub fields: Vec<FieldDef>,
    pub identity_field: Option<String>,
    pub geometry_field: Option<String>,
    pub length_field: Option<String>,
    pub area_field: Option<String>,
    pub shape_type: Option<GeometryCategory>,
    pub spatial_reference: Option<SpatialReference>,
}

impl TableDescription {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Fields a store maintains on its own and that are never exported.
    pub fn is_system_field(&self, name: &str) -> bool {
        [&self.identity_field, &self.length_field, &self.area_field]
            .into_iter()
            .flatten()
            .any(|system| system == name)
    }
}

pub trait FeatureSource {
    fn describe(&self, table: &str) -> Result<TableDescription, StoreError>;

    fn count(&self, table: &str) -> Result<u64, StoreError>;

    /// Rows of `table` restricted to `columns`, in that order. The geometry
    /// field yields [`Value::Shape`].
    fn open_read_cursor(&self, table: &str, columns: &[String]) -> Result<RowCursor<'_>, StoreError>;
}

/// Parameters of a new output container.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub category: GeometryCategory,
    pub spatial_reference: SpatialReference,
    pub has_m: bool,
    pub has_z: bool,
}

/// Name and alias of a field as the store created it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub alias: Option<String>,
}

/// Column of an insert cursor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertColumn {
    Field(String),
    Geometry(InsertChannel),
}

impl fmt::Display for InsertColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertColumn::Field(name) => f.write_str(name),
            InsertColumn::Geometry(channel) => f.write_str(channel.token()),
        }
    }
}

/// A row on its way into a container, ordered like the cursor's columns.
#[derive(Clone, Debug, PartialEq)]
pub struct InsertRow {
    pub values: Vec<Value>,
    pub geometry: Option<GeometryValue>,
}

impl fmt::Display for InsertRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", values.join(", "))?;
        if let Some(geometry) = &self.geometry {
            match geometry {
                GeometryValue::Xy(x, y) => write!(f, " ({x}, {y})")?,
                GeometryValue::Wkb(bytes) => write!(f, " <wkb {} bytes>", bytes.len())?,
                GeometryValue::Wkt(text) => write!(f, " {text}")?,
                GeometryValue::Cell(cell) => write!(f, " cell {cell}")?,
            }
        }
        Ok(())
    }
}

pub trait InsertCursor {
    fn insert(&mut self, row: &InsertRow) -> Result<(), StoreError>;
}

pub trait FeatureTarget {
    /// Creates an empty container and returns its name.
    fn create_container(&mut self, spec: &ContainerSpec) -> Result<String, StoreError>;

    fn add_field(&mut self, container: &str, field: &FieldDef) -> Result<(), StoreError>;

    fn open_insert_cursor<'a>(
        &'a mut self,
        container: &str,
        columns: &[InsertColumn],
    ) -> Result<Box<dyn InsertCursor + 'a>, StoreError>;

    fn list_fields(&self, container: &str) -> Result<Vec<FieldInfo>, StoreError>;

    fn compact(&mut self, container: &str) -> Result<(), StoreError>;

    fn build_spatial_index(&mut self, container: &str) -> Result<(), StoreError>;
}
