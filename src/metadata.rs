//! GeoParquet `geo` metadata documents.
//!
//! Every part file of a WKB export carries its own document. A dataset is
//! only usable when all of its documents agree on everything but the bounding
//! box, which is merged into the union of the per-file boxes.

use parquet::file::metadata::KeyValue;
use parquet::file::reader::{FileReader, SerializedFileReader};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ConvertError, Result};
use crate::geometry::{GeometryType, resolve_geometry_type};

pub const GEO_METADATA_KEY: &str = "geo";
pub const GEOPARQUET_VERSION: &str = "1.0.0";

const CANONICAL_GEOMETRY_TYPES: [&str; 6] = [
    "Point",
    "MultiPoint",
    "LineString",
    "MultiLineString",
    "Polygon",
    "MultiPolygon",
];

/// Spatial reference of a dataset, identified by EPSG code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpatialReference {
    Epsg(u32),
    Unknown,
}

impl SpatialReference {
    pub const WGS84: SpatialReference = SpatialReference::Epsg(4326);

    /// EPSG code, 0 when unknown.
    pub fn code(&self) -> u32 {
        match self {
            SpatialReference::Epsg(code) => *code,
            SpatialReference::Unknown => 0,
        }
    }

    /// PROJJSON-shaped CRS object, `None` for an unknown reference.
    pub fn to_projjson(&self) -> Option<Value> {
        match self {
            SpatialReference::Epsg(4326) => Some(wgs84_projjson()),
            SpatialReference::Epsg(code) => Some(json!({
                "id": { "authority": "EPSG", "code": code }
            })),
            SpatialReference::Unknown => None,
        }
    }

    /// Resolves the `crs` member of a column's metadata.
    ///
    /// An absent CRS is unknown. A CRS without an `id` is taken as WGS84.
    /// `OGC:CRS84` maps to EPSG:4326. Any other authority cannot be looked up.
    pub fn from_crs(crs: Option<&Value>) -> Result<Self> {
        let Some(crs) = crs else {
            return Ok(SpatialReference::Unknown);
        };
        match crs {
            Value::Null => Ok(SpatialReference::Unknown),
            Value::String(text) => text.parse(),
            Value::Object(object) => match object.get("id") {
                Some(id) => {
                    let authority = id.get("authority").and_then(Value::as_str);
                    let code = id.get("code");
                    match (authority, code) {
                        (Some("OGC"), Some(Value::String(code))) if code == "CRS84" => {
                            Ok(SpatialReference::WGS84)
                        }
                        (Some("EPSG"), Some(code)) => epsg_code(code)
                            .map(SpatialReference::Epsg)
                            .ok_or_else(|| ConvertError::UnsupportedCrs(id.to_string())),
                        _ => Err(ConvertError::UnsupportedCrs(id.to_string())),
                    }
                }
                None => {
                    tracing::warn!(
                        "The coordinate reference system has no id; defaulting to EPSG:4326"
                    );
                    Ok(SpatialReference::WGS84)
                }
            },
            other => Err(ConvertError::UnsupportedCrs(other.to_string())),
        }
    }
}

fn epsg_code(code: &Value) -> Option<u32> {
    match code {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Default for SpatialReference {
    fn default() -> Self {
        SpatialReference::WGS84
    }
}

impl fmt::Display for SpatialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpatialReference::Epsg(code) => write!(f, "EPSG:{code}"),
            SpatialReference::Unknown => f.write_str("unknown"),
        }
    }
}

impl FromStr for SpatialReference {
    type Err = ConvertError;

    /// Accepts `4326`, `EPSG:4326`, `OGC:CRS84`, or `unknown`/`0`.
    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper == "UNKNOWN" || upper == "0" {
            return Ok(SpatialReference::Unknown);
        }
        if upper == "OGC:CRS84" || upper == "CRS84" {
            return Ok(SpatialReference::WGS84);
        }
        let code = upper.strip_prefix("EPSG:").unwrap_or(&upper);
        code.parse::<u32>()
            .map(SpatialReference::Epsg)
            .map_err(|_| ConvertError::UnsupportedCrs(trimmed.to_string()))
    }
}

fn wgs84_projjson() -> Value {
    json!({
        "type": "GeographicCRS",
        "name": "WGS 84",
        "datum": {
            "type": "GeodeticReferenceFrame",
            "name": "World Geodetic System 1984",
            "ellipsoid": {
                "name": "WGS 84",
                "semi_major_axis": 6378137.0,
                "inverse_flattening": 298.257223563
            },
            "prime_meridian": { "name": "Greenwich", "longitude": 0.0 },
            "id": { "authority": "EPSG", "code": 6326 }
        },
        "coordinate_system": {
            "subtype": "ellipsoidal",
            "axis": [
                { "name": "Geodetic latitude", "abbreviation": "Lat", "direction": "north", "unit": "degree" },
                { "name": "Geodetic longitude", "abbreviation": "Lon", "direction": "east", "unit": "degree" }
            ]
        },
        "area": "World",
        "bbox": {
            "south_latitude": -90.0,
            "west_longitude": -180.0,
            "north_latitude": 90.0,
            "east_longitude": 180.0
        },
        "id": { "authority": "EPSG", "code": 4326 }
    })
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoMetadata {
    pub version: String,
    pub primary_column: String,
    pub columns: BTreeMap<String, GeoColumnMetadata>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoColumnMetadata {
    pub encoding: String,
    pub geometry_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crs: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
}

impl GeoMetadata {
    /// Builds a single-column document.
    ///
    /// `Line` and `Polyline` are written as `LineString`; other names are
    /// matched case-insensitively against the GeoParquet geometry types.
    pub fn build(
        primary_column: &str,
        geometry_type: &str,
        encoding: &str,
        spatial_reference: SpatialReference,
        bbox: Option<&[f64]>,
    ) -> Result<Self> {
        let geometry_type = canonical_geometry_type(geometry_type)?;
        let bbox = bbox.map(validate_bbox).transpose()?;
        let column = GeoColumnMetadata {
            encoding: encoding.to_ascii_uppercase(),
            geometry_types: vec![geometry_type.to_string()],
            crs: spatial_reference.to_projjson(),
            bbox: bbox.map(|b| b.to_vec()),
        };
        Ok(Self {
            version: GEOPARQUET_VERSION.to_string(),
            primary_column: primary_column.to_string(),
            columns: BTreeMap::from([(primary_column.to_string(), column)]),
        })
    }

    /// Reads the document of one parquet file.
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let key_value = reader.metadata().file_metadata().key_value_metadata();
        let raw = key_value
            .and_then(|entries| {
                entries
                    .iter()
                    .find(|kv| kv.key == GEO_METADATA_KEY)
                    .and_then(|kv| kv.value.clone())
            })
            .ok_or_else(|| ConvertError::NotGeospatial(path.to_path_buf()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Merges the documents of a multi-file dataset.
    pub fn merge(documents: &[GeoMetadata]) -> Result<Self> {
        let (first, rest) = documents.split_first().ok_or_else(|| {
            ConvertError::InconsistentGeometry("no documents to merge".to_string())
        })?;
        let reference = first.without_bbox();
        let mut merged = first.clone();
        for document in rest {
            if document.without_bbox() != reference {
                return Err(ConvertError::InconsistentGeometry(describe_difference(
                    &reference,
                    &document.without_bbox(),
                )));
            }
            merged.union_bbox(document)?;
        }
        Ok(merged)
    }

    pub fn primary(&self) -> Result<&GeoColumnMetadata> {
        self.columns
            .get(&self.primary_column)
            .ok_or_else(|| ConvertError::MissingGeometryColumn(self.primary_column.clone()))
    }

    pub fn geometry_type(&self) -> Result<GeometryType> {
        resolve_geometry_type(&self.primary()?.geometry_types)
    }

    pub fn spatial_reference(&self) -> Result<SpatialReference> {
        SpatialReference::from_crs(self.primary()?.crs.as_ref())
    }

    pub fn bbox(&self) -> Option<&[f64]> {
        self.columns
            .get(&self.primary_column)
            .and_then(|column| column.bbox.as_deref())
    }

    pub fn to_key_value(&self) -> Result<KeyValue> {
        Ok(KeyValue::new(
            GEO_METADATA_KEY.to_string(),
            Some(serde_json::to_string(self)?),
        ))
    }

    fn without_bbox(&self) -> GeoMetadata {
        let mut stripped = self.clone();
        for column in stripped.columns.values_mut() {
            column.bbox = None;
        }
        stripped
    }

    fn union_bbox(&mut self, other: &GeoMetadata) -> Result<()> {
        for (name, column) in self.columns.iter_mut() {
            let Some(other_bbox) = other.columns.get(name).and_then(|c| c.bbox.as_ref()) else {
                continue;
            };
            let other_bbox = validate_bbox(other_bbox)?;
            column.bbox = Some(match column.bbox.as_deref() {
                Some(bbox) => {
                    let bbox = validate_bbox(bbox)?;
                    vec![
                        bbox[0].min(other_bbox[0]),
                        bbox[1].min(other_bbox[1]),
                        bbox[2].max(other_bbox[2]),
                        bbox[3].max(other_bbox[3]),
                    ]
                }
                None => other_bbox.to_vec(),
            });
        }
        Ok(())
    }
}

fn describe_difference(left: &GeoMetadata, right: &GeoMetadata) -> String {
    if left.version != right.version {
        return format!("versions differ ({} vs {})", left.version, right.version);
    }
    if left.primary_column != right.primary_column {
        return format!(
            "primary columns differ ({} vs {})",
            left.primary_column, right.primary_column
        );
    }
    for (name, l) in &left.columns {
        let Some(r) = right.columns.get(name) else {
            return format!("column '{name}' is missing from some files");
        };
        if l.encoding != r.encoding {
            return format!("column '{name}' has more than one encoding");
        }
        if l.geometry_types != r.geometry_types {
            return format!("column '{name}' has more than one set of geometry types");
        }
        if l.crs != r.crs {
            return format!("column '{name}' has more than one spatial reference");
        }
    }
    "geometry columns differ between files".to_string()
}

fn canonical_geometry_type(name: &str) -> Result<&'static str> {
    let lowered = name.trim().to_ascii_lowercase();
    if lowered == "line" || lowered == "polyline" {
        return Ok("LineString");
    }
    CANONICAL_GEOMETRY_TYPES
        .into_iter()
        .find(|canonical| canonical.to_ascii_lowercase() == lowered)
        .ok_or_else(|| ConvertError::InvalidGeometryType {
            given: name.to_string(),
            allowed: CANONICAL_GEOMETRY_TYPES.join(", "),
        })
}

/// Checks `[minx, miny, maxx, maxy]`.
pub fn validate_bbox(bbox: &[f64]) -> Result<[f64; 4]> {
    let [minx, miny, maxx, maxy] = <[f64; 4]>::try_from(bbox).map_err(|_| {
        ConvertError::InvalidBoundingBox(format!("expected 4 values, got {}", bbox.len()))
    })?;
    if [minx, miny, maxx, maxy].iter().any(|v| !v.is_finite()) {
        return Err(ConvertError::InvalidBoundingBox(format!("{bbox:?}")));
    }
    if minx > maxx {
        return Err(ConvertError::InvalidBoundingBox(format!(
            "minx {minx} is greater than maxx {maxx}"
        )));
    }
    if miny > maxy {
        return Err(ConvertError::InvalidBoundingBox(format!(
            "miny {miny} is greater than maxy {maxy}"
        )));
    }
    Ok([minx, miny, maxx, maxy])
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{BinaryArray, RecordBatch};
    use arrow_schema::{DataType, Field, Schema};
    use parquet::arrow::ArrowWriter;
    use parquet::file::properties::WriterProperties;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn doc(bbox: [f64; 4], code: u32) -> GeoMetadata {
        GeoMetadata::build(
            "wkb",
            "Point",
            "WKB",
            SpatialReference::Epsg(code),
            Some(&bbox),
        )
        .unwrap()
    }

    #[test]
    fn merge_unions_bounding_boxes() {
        let merged =
            GeoMetadata::merge(&[doc([0.0, 0.0, 10.0, 10.0], 4326), doc([5.0, 5.0, 20.0, 20.0], 4326)])
                .unwrap();
        assert_eq!(merged.bbox(), Some(&[0.0, 0.0, 20.0, 20.0][..]));
    }

    #[test]
    fn merge_rejects_differing_crs() {
        let err =
            GeoMetadata::merge(&[doc([0.0, 0.0, 1.0, 1.0], 4326), doc([0.0, 0.0, 1.0, 1.0], 3857)])
                .unwrap_err();
        assert!(matches!(err, ConvertError::InconsistentGeometry(msg) if msg.contains("spatial reference")));
    }

    #[test]
    fn merge_of_nothing_fails() {
        assert!(GeoMetadata::merge(&[]).is_err());
    }

    #[test]
    fn bbox_validation() {
        assert!(validate_bbox(&[0.0, 0.0, 1.0, 1.0]).is_ok());
        assert!(validate_bbox(&[0.0, 0.0, 0.0, 0.0]).is_ok());
        assert!(validate_bbox(&[2.0, 0.0, 1.0, 1.0]).is_err());
        assert!(validate_bbox(&[0.0, 2.0, 1.0, 1.0]).is_err());
        assert!(validate_bbox(&[0.0, 0.0, 1.0]).is_err());
        assert!(validate_bbox(&[0.0, f64::NAN, 1.0, 1.0]).is_err());
    }

    #[test]
    fn build_normalizes_line_aliases() {
        let meta =
            GeoMetadata::build("wkb", "Polyline", "wkb", SpatialReference::WGS84, None).unwrap();
        let column = meta.primary().unwrap();
        assert_eq!(column.geometry_types, vec!["LineString"]);
        assert_eq!(column.encoding, "WKB");
        assert_eq!(meta.version, "1.0.0");
        assert!(matches!(
            GeoMetadata::build("wkb", "Line", "WKB", SpatialReference::WGS84, Some(&[1.0, 0.0, 0.0, 1.0])),
            Err(ConvertError::InvalidBoundingBox(_))
        ));
    }

    #[test]
    fn spatial_reference_from_crs_ids() {
        let wgs84 = SpatialReference::WGS84.to_projjson();
        assert_eq!(
            SpatialReference::from_crs(wgs84.as_ref()).unwrap(),
            SpatialReference::WGS84
        );
        let crs84 = json!({"id": {"authority": "OGC", "code": "CRS84"}});
        assert_eq!(SpatialReference::from_crs(Some(&crs84)).unwrap(), SpatialReference::WGS84);
        let string_code = json!({"id": {"authority": "EPSG", "code": "3857"}});
        assert_eq!(
            SpatialReference::from_crs(Some(&string_code)).unwrap(),
            SpatialReference::Epsg(3857)
        );
        let no_id = json!({"type": "GeographicCRS"});
        assert_eq!(SpatialReference::from_crs(Some(&no_id)).unwrap(), SpatialReference::WGS84);
        assert_eq!(SpatialReference::from_crs(None).unwrap(), SpatialReference::Unknown);
        let other = json!({"id": {"authority": "ESRI", "code": 102003}});
        assert!(matches!(
            SpatialReference::from_crs(Some(&other)),
            Err(ConvertError::UnsupportedCrs(_))
        ));
    }

    #[test]
    fn spatial_reference_parses_from_text() {
        assert_eq!("4326".parse::<SpatialReference>().unwrap(), SpatialReference::WGS84);
        assert_eq!(
            "epsg:2263".parse::<SpatialReference>().unwrap(),
            SpatialReference::Epsg(2263)
        );
        assert_eq!("0".parse::<SpatialReference>().unwrap(), SpatialReference::Unknown);
        assert!("mercator".parse::<SpatialReference>().is_err());
    }

    #[test]
    fn read_requires_geo_key() {
        let schema = Arc::new(Schema::new(vec![Field::new("wkb", DataType::Binary, true)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(BinaryArray::from_iter_values([b"x".to_vec()]))],
        )
        .unwrap();

        let plain = NamedTempFile::with_suffix(".parquet").unwrap();
        let mut writer = ArrowWriter::try_new(File::create(plain.path()).unwrap(), schema.clone(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        assert!(matches!(
            GeoMetadata::read(plain.path()),
            Err(ConvertError::NotGeospatial(_))
        ));

        let tagged = NamedTempFile::with_suffix(".parquet").unwrap();
        let expected = doc([1.0, 2.0, 3.0, 4.0], 4326);
        let props = WriterProperties::builder()
            .set_key_value_metadata(Some(vec![expected.to_key_value().unwrap()]))
            .build();
        let mut writer = ArrowWriter::try_new(File::create(tagged.path()).unwrap(), schema, Some(props)).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        assert_eq!(GeoMetadata::read(tagged.path()).unwrap(), expected);
    }
}
