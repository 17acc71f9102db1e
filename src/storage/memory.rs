//! In-memory feature store.
//!
//! Behaves like a small file geodatabase: every container gets an
//! `OBJECTID` identity and a `SHAPE` geometry field, polygon containers keep
//! a computed `Shape_Area`, field names are cut to a maximum length on
//! creation and inserts are type checked.

use geo::Area;
use geo_types::{Geometry, MultiPoint};
use std::collections::BTreeMap;

use super::{
    ContainerSpec, FeatureSource, FeatureTarget, FieldInfo, InsertColumn, InsertCursor, InsertRow,
    Row, RowCursor, TableDescription, Value,
};
use crate::error::StoreError;
use crate::geometry::{GeometryCategory, GeometryValue, InsertChannel};
use crate::schema::{FieldDef, NativeType};

pub const IDENTITY_FIELD: &str = "OBJECTID";
pub const SHAPE_FIELD: &str = "SHAPE";
pub const AREA_FIELD: &str = "Shape_Area";

const DEFAULT_MAX_NAME_LENGTH: usize = 64;

#[derive(Clone, Debug)]
pub struct MemoryTable {
    description: TableDescription,
    rows: Vec<Row>,
    next_oid: i64,
    has_m: bool,
    has_z: bool,
    compacted: bool,
    indexed: bool,
}

impl MemoryTable {
    fn new(description: TableDescription) -> Self {
        Self {
            description,
            rows: Vec::new(),
            next_oid: 1,
            has_m: false,
            has_z: false,
            compacted: false,
            indexed: false,
        }
    }

    pub fn description(&self) -> &TableDescription {
        &self.description
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn has_m(&self) -> bool {
        self.has_m
    }

    pub fn has_z(&self) -> bool {
        self.has_z
    }

    pub fn is_compacted(&self) -> bool {
        self.compacted
    }

    pub fn has_spatial_index(&self) -> bool {
        self.indexed
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.description.fields.iter().position(|f| f.name == name)
    }

    /// Values of `field` in row order.
    pub fn column(&self, field: &str) -> Option<Vec<&Value>> {
        let index = self.index_of(field)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    tables: BTreeMap<String, MemoryTable>,
    max_field_name_length: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            max_field_name_length: DEFAULT_MAX_NAME_LENGTH,
        }
    }

    pub fn with_max_field_name_length(mut self, max: usize) -> Self {
        self.max_field_name_length = max.max(1);
        self
    }

    /// Registers a table whose rows are supplied with [`MemoryStore::push_row`].
    pub fn create_table(&mut self, name: &str, description: TableDescription) -> Result<(), StoreError> {
        if self.tables.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        self.tables
            .insert(name.to_string(), MemoryTable::new(description));
        Ok(())
    }

    /// Appends a raw row, one value per described field.
    pub fn push_row(&mut self, name: &str, row: Row) -> Result<(), StoreError> {
        let table = self.table_mut(name)?;
        let expected = table.description.fields.len();
        if row.len() != expected {
            return Err(StoreError::ColumnCount {
                expected,
                got: row.len(),
            });
        }
        table.rows.push(row);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    fn table_ref(&self, name: &str) -> Result<&MemoryTable, StoreError> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, StoreError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }
}

impl FeatureSource for MemoryStore {
    fn describe(&self, table: &str) -> Result<TableDescription, StoreError> {
        Ok(self.table_ref(table)?.description.clone())
    }

    fn count(&self, table: &str) -> Result<u64, StoreError> {
        Ok(self.table_ref(table)?.rows.len() as u64)
    }

    fn open_read_cursor(&self, table: &str, columns: &[String]) -> Result<RowCursor<'_>, StoreError> {
        let data = self.table_ref(table)?;
        let indices = columns
            .iter()
            .map(|column| {
                data.index_of(column).ok_or_else(|| StoreError::UnknownColumn {
                    container: table.to_string(),
                    column: column.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Box::new(data.rows.iter().map(move |row| -> Result<Row, StoreError> {
            Ok(indices.iter().map(|&i| row[i].clone()).collect())
        })))
    }
}

impl FeatureTarget for MemoryStore {
    fn create_container(&mut self, spec: &ContainerSpec) -> Result<String, StoreError> {
        let mut fields = vec![
            FieldDef::new(IDENTITY_FIELD, NativeType::ObjectId).not_null(),
            FieldDef::new(SHAPE_FIELD, NativeType::Geometry),
        ];
        let mut area_field = None;
        if spec.category == GeometryCategory::Polygon {
            fields.push(FieldDef::new(AREA_FIELD, NativeType::Double));
            area_field = Some(AREA_FIELD.to_string());
        }
        let description = TableDescription {
            fields,
            identity_field: Some(IDENTITY_FIELD.to_string()),
            geometry_field: Some(SHAPE_FIELD.to_string()),
            length_field: None,
            area_field,
            shape_type: Some(spec.category),
            spatial_reference: Some(spec.spatial_reference),
        };
        self.create_table(&spec.name, description)?;
        let table = self.table_mut(&spec.name)?;
        table.has_m = spec.has_m;
        table.has_z = spec.has_z;
        tracing::debug!("Created container {} ({})", spec.name, spec.category);
        Ok(spec.name.clone())
    }

    fn add_field(&mut self, container: &str, field: &FieldDef) -> Result<(), StoreError> {
        let max_len = self.max_field_name_length;
        let table = self.table_mut(container)?;
        let name: String = field.name.chars().take(max_len).collect();
        if table
            .description
            .fields
            .iter()
            .any(|existing| existing.name.eq_ignore_ascii_case(&name))
        {
            return Err(StoreError::FieldExists {
                container: container.to_string(),
                field: name,
            });
        }
        let mut created = field.clone();
        created.alias = Some(field.alias.clone().unwrap_or_else(|| field.name.clone()));
        created.name = name;
        table.description.fields.push(created);
        for row in &mut table.rows {
            row.push(Value::Null);
        }
        Ok(())
    }

    fn open_insert_cursor<'a>(
        &'a mut self,
        container: &str,
        columns: &[InsertColumn],
    ) -> Result<Box<dyn InsertCursor + 'a>, StoreError> {
        let table = self.table_mut(container)?;
        let mut targets = Vec::new();
        let mut geometry = None;
        for column in columns {
            match column {
                InsertColumn::Field(name) => {
                    let index = table.index_of(name).ok_or_else(|| StoreError::UnknownColumn {
                        container: container.to_string(),
                        column: name.clone(),
                    })?;
                    targets.push(index);
                }
                InsertColumn::Geometry(channel) => geometry = Some(*channel),
            }
        }
        Ok(Box::new(MemoryInsertCursor {
            table,
            targets,
            geometry,
        }))
    }

    fn list_fields(&self, container: &str) -> Result<Vec<FieldInfo>, StoreError> {
        Ok(self
            .table_ref(container)?
            .description
            .fields
            .iter()
            .map(|field| FieldInfo {
                name: field.name.clone(),
                alias: field.alias.clone(),
            })
            .collect())
    }

    fn compact(&mut self, container: &str) -> Result<(), StoreError> {
        self.table_mut(container)?.compacted = true;
        Ok(())
    }

    fn build_spatial_index(&mut self, container: &str) -> Result<(), StoreError> {
        self.table_mut(container)?.indexed = true;
        Ok(())
    }
}

struct MemoryInsertCursor<'a> {
    table: &'a mut MemoryTable,
    targets: Vec<usize>,
    geometry: Option<InsertChannel>,
}

impl MemoryInsertCursor<'_> {
    fn shape(&self, value: Option<&GeometryValue>) -> Result<Option<Geometry<f64>>, StoreError> {
        let Some(value) = value else {
            return Ok(None);
        };
        if self.geometry != Some(value.channel()) {
            return Err(StoreError::Geometry(format!(
                "cursor does not accept {} values",
                value.channel().token()
            )));
        }
        let geometry = value
            .to_geometry()
            .map_err(|err| StoreError::Geometry(err.to_string()))?;
        let category = self.table.description.shape_type;
        match (category, GeometryCategory::of(&geometry)) {
            (Some(GeometryCategory::Multipoint), Some(GeometryCategory::Point)) => match geometry {
                Geometry::Point(point) => Ok(Some(Geometry::MultiPoint(MultiPoint::new(vec![point])))),
                other => Ok(Some(other)),
            },
            (Some(expected), Some(actual)) if expected == actual => Ok(Some(geometry)),
            (expected, _) => Err(StoreError::Geometry(format!(
                "geometry does not match container type {}",
                expected.map(|c| c.as_str()).unwrap_or("NONE")
            ))),
        }
    }
}

fn check_value(field: &FieldDef, value: Value) -> Result<Value, StoreError> {
    let mismatch = |value: &Value| StoreError::TypeMismatch {
        field: field.name.clone(),
        expected: field.native_type.keyword().to_string(),
        value: value.to_string(),
    };
    match (field.native_type, value) {
        (_, Value::Null) if !field.nullable => Err(StoreError::NullViolation(field.name.clone())),
        (_, Value::Null) => Ok(Value::Null),
        (NativeType::SmallInteger, Value::Integer(v)) => {
            if i16::try_from(v).is_ok() {
                Ok(Value::Integer(v))
            } else {
                Err(mismatch(&Value::Integer(v)))
            }
        }
        (NativeType::Integer | NativeType::BigInteger, Value::Integer(v)) => Ok(Value::Integer(v)),
        (NativeType::Single | NativeType::Double, Value::Integer(v)) => Ok(Value::Double(v as f64)),
        (NativeType::Single | NativeType::Double, Value::Double(v)) => Ok(Value::Double(v)),
        (native, value) if native.is_text() => {
            let text = match value {
                Value::Text(text) => text,
                Value::Integer(v) => v.to_string(),
                Value::Double(v) => v.to_string(),
                other => return Err(mismatch(&other)),
            };
            match field.length {
                Some(length) if text.chars().count() > length as usize => {
                    Err(mismatch(&Value::Text(text)))
                }
                _ => Ok(Value::Text(text)),
            }
        }
        (NativeType::Date, Value::Date(v)) => Ok(Value::Date(v)),
        (NativeType::Blob, Value::Blob(v)) => Ok(Value::Blob(v)),
        (_, other) => Err(mismatch(&other)),
    }
}

impl InsertCursor for MemoryInsertCursor<'_> {
    fn insert(&mut self, row: &InsertRow) -> Result<(), StoreError> {
        if row.values.len() != self.targets.len() {
            return Err(StoreError::ColumnCount {
                expected: self.targets.len(),
                got: row.values.len(),
            });
        }
        let shape = self.shape(row.geometry.as_ref())?;

        let description = &self.table.description;
        let mut stored = vec![Value::Null; description.fields.len()];
        for (&index, value) in self.targets.iter().zip(&row.values) {
            stored[index] = check_value(&description.fields[index], value.clone())?;
        }
        for (index, field) in description.fields.iter().enumerate() {
            if field.native_type != NativeType::ObjectId
                && !self.targets.contains(&index)
                && !field.nullable
            {
                return Err(StoreError::NullViolation(field.name.clone()));
            }
        }

        if let Some(index) = self.table.index_of(AREA_FIELD)
            && let Some(shape) = &shape
        {
            stored[index] = Value::Double(shape.unsigned_area());
        }
        if let Some(index) = self.table.index_of(SHAPE_FIELD) {
            stored[index] = shape.map(Value::Shape).unwrap_or(Value::Null);
        }
        if let Some(index) = self.table.index_of(IDENTITY_FIELD) {
            stored[index] = Value::Integer(self.table.next_oid);
        }
        self.table.next_oid += 1;
        self.table.rows.push(stored);
        Ok(())
    }
}
