//! GeoJSON files as feature tables.
//!
//! A FeatureCollection is loaded into a [`MemoryStore`] table with inferred
//! field types, and a table can be written back out as a FeatureCollection.

use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use serde_json::Value as JsonValue;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;

use super::memory::{IDENTITY_FIELD, SHAPE_FIELD};
use super::{MemoryStore, TableDescription, Value};
use crate::error::{ConvertError, Result};
use crate::geometry::GeometryCategory;
use crate::metadata::SpatialReference;
use crate::schema::{FieldDef, NativeType};

/// Property type seen so far for one key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Inferred {
    Unknown,
    Boolean,
    Integer,
    Double,
    Text,
}

impl Inferred {
    fn widen(self, value: &JsonValue) -> Self {
        let seen = match value {
            JsonValue::Null => return self,
            JsonValue::Bool(_) => Inferred::Boolean,
            JsonValue::Number(n) if n.is_i64() => Inferred::Integer,
            JsonValue::Number(_) => Inferred::Double,
            _ => Inferred::Text,
        };
        match (self, seen) {
            (Inferred::Unknown, seen) => seen,
            (current, seen) if current == seen => current,
            (Inferred::Integer, Inferred::Double) | (Inferred::Double, Inferred::Integer) => {
                Inferred::Double
            }
            _ => Inferred::Text,
        }
    }

    fn native_type(self) -> NativeType {
        match self {
            Inferred::Boolean => NativeType::SmallInteger,
            Inferred::Integer => NativeType::Integer,
            Inferred::Double => NativeType::Double,
            Inferred::Unknown | Inferred::Text => NativeType::String,
        }
    }
}

fn convert_property(native: NativeType, value: Option<&JsonValue>) -> Value {
    match (native, value) {
        (_, None | Some(JsonValue::Null)) => Value::Null,
        (NativeType::SmallInteger, Some(JsonValue::Bool(b))) => Value::Integer(i64::from(*b)),
        (NativeType::Integer, Some(JsonValue::Number(n))) => {
            n.as_i64().map(Value::Integer).unwrap_or(Value::Null)
        }
        (NativeType::Double, Some(JsonValue::Number(n))) => {
            n.as_f64().map(Value::Double).unwrap_or(Value::Null)
        }
        (_, Some(JsonValue::String(s))) => Value::Text(s.clone()),
        (_, Some(other)) => Value::Text(other.to_string()),
    }
}

fn read_collection(path: &Path) -> Result<FeatureCollection> {
    let text = fs::read_to_string(path)?;
    match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => Ok(collection),
        GeoJson::Feature(feature) => Ok(FeatureCollection {
            bbox: None,
            features: vec![feature],
            foreign_members: None,
        }),
        GeoJson::Geometry(_) => Err(ConvertError::InvalidPath {
            path: path.to_path_buf(),
            reason: "expected a FeatureCollection, found a bare geometry".to_string(),
        }),
    }
}

/// Loads the features of `path` into a new table named `table`.
///
/// Returns the number of rows loaded.
pub fn load_feature_collection(store: &mut MemoryStore, table: &str, path: &Path) -> Result<usize> {
    let collection = read_collection(path)?;

    let mut keys: Vec<(String, Inferred)> = Vec::new();
    for feature in &collection.features {
        for (key, value) in feature.properties.iter().flatten() {
            if key.eq_ignore_ascii_case(IDENTITY_FIELD) || key.eq_ignore_ascii_case(SHAPE_FIELD) {
                continue;
            }
            match keys.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = entry.1.widen(value),
                None => keys.push((key.clone(), Inferred::Unknown.widen(value))),
            }
        }
    }

    let mut geometries = Vec::with_capacity(collection.features.len());
    for feature in &collection.features {
        let geometry = match &feature.geometry {
            Some(geometry) => Some(geo_types::Geometry::<f64>::try_from(geometry.clone())?),
            None => None,
        };
        geometries.push(geometry);
    }
    let shape_type = geometries
        .iter()
        .flatten()
        .find_map(GeometryCategory::of);

    let mut fields = vec![FieldDef::new(IDENTITY_FIELD, NativeType::ObjectId).not_null()];
    fields.extend(
        keys.iter()
            .map(|(key, inferred)| FieldDef::new(key.clone(), inferred.native_type())),
    );
    fields.push(FieldDef::new(SHAPE_FIELD, NativeType::Geometry));
    let description = TableDescription {
        fields,
        identity_field: Some(IDENTITY_FIELD.to_string()),
        geometry_field: Some(SHAPE_FIELD.to_string()),
        shape_type,
        spatial_reference: Some(SpatialReference::WGS84),
        ..Default::default()
    };
    store.create_table(table, description)?;

    let count = collection.features.len();
    for (oid, (feature, geometry)) in collection.features.iter().zip(geometries).enumerate() {
        let mut row = Vec::with_capacity(keys.len() + 2);
        row.push(Value::Integer(oid as i64 + 1));
        for (key, inferred) in &keys {
            let value = feature.properties.as_ref().and_then(|p| p.get(key));
            row.push(convert_property(inferred.native_type(), value));
        }
        row.push(geometry.map(Value::Shape).unwrap_or(Value::Null));
        store.push_row(table, row)?;
    }
    tracing::info!("Loaded {} features from {:?} into {}", count, path, table);
    Ok(count)
}

fn to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null | Value::Shape(_) => JsonValue::Null,
        Value::Integer(v) => JsonValue::from(*v),
        Value::Double(v) => JsonValue::from(*v),
        Value::Text(v) => JsonValue::String(v.clone()),
        Value::Date(v) => v
            .format(&Rfc3339)
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
        Value::Blob(v) => JsonValue::String(v.iter().map(|b| format!("{b:02x}")).collect()),
    }
}

/// Writes `table` as a FeatureCollection. Properties are keyed by field
/// alias when one is set. Returns the number of features written.
pub fn save_feature_collection(store: &MemoryStore, table: &str, path: &Path) -> Result<usize> {
    let data = store
        .table(table)
        .ok_or_else(|| crate::error::StoreError::NotFound(table.to_string()))?;
    let description = data.description();
    let geometry_index = description
        .geometry_field
        .as_ref()
        .and_then(|name| description.fields.iter().position(|f| &f.name == name));
    let attributes: Vec<(usize, &FieldDef)> = description
        .fields
        .iter()
        .enumerate()
        .filter(|(i, field)| Some(*i) != geometry_index && !description.is_system_field(&field.name))
        .collect();

    let mut features = Vec::with_capacity(data.rows().len());
    for row in data.rows() {
        let mut properties = JsonObject::new();
        for (index, field) in &attributes {
            properties.insert(field.display_name().to_string(), to_json(&row[*index]));
        }
        let geometry = geometry_index.and_then(|i| match &row[i] {
            Value::Shape(shape) => Some(geojson::Geometry::from(shape)),
            _ => None,
        });
        features.push(Feature {
            bbox: None,
            geometry,
            id: None,
            properties: Some(properties),
            foreign_members: None,
        });
    }

    let count = features.len();
    let collection = GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    });
    let file = File::create(path).map_err(|err| ConvertError::InvalidPath {
        path: PathBuf::from(path),
        reason: err.to_string(),
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &collection)?;
    writer.flush()?;
    Ok(count)
}
