//! Geometry encoding for export and reconstruction for import.
//!
//! Export turns a store geometry into one of the on-disk encodings
//! ([`GeometryFormat`]). Import never decodes geometry itself: it picks the
//! source column(s) and hands the raw value to the target store through an
//! [`InsertChannel`], which is what the store's geometry constructor
//! understands.

use arrow_schema::{DataType, Field};
use geo::{BoundingRect, Centroid};
use geo_types::{Geometry, Point};
use geozero::wkb::Wkb;
use geozero::wkt::Wkt;
use geozero::{CoordDimensions, ToGeo, ToWkb, ToWkt};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{ConvertError, Result};

pub const COORDINATE_X_COLUMN: &str = "geometry_X";
pub const COORDINATE_Y_COLUMN: &str = "geometry_Y";

/// On-disk geometry encoding requested for an export.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryFormat {
    /// Two float columns holding the point (or centroid) coordinates.
    Xy,
    Wkt,
    Wkb,
}

impl GeometryFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryFormat::Xy => "XY",
            GeometryFormat::Wkt => "WKT",
            GeometryFormat::Wkb => "WKB",
        }
    }

    /// Columns this encoding adds to the output schema.
    pub fn output_fields(&self) -> Vec<Field> {
        match self {
            GeometryFormat::Xy => vec![
                Field::new(COORDINATE_X_COLUMN, DataType::Float64, true),
                Field::new(COORDINATE_Y_COLUMN, DataType::Float64, true),
            ],
            GeometryFormat::Wkt => vec![Field::new("wkt", DataType::Utf8, true)],
            GeometryFormat::Wkb => vec![Field::new("wkb", DataType::Binary, true)],
        }
    }
}

impl fmt::Display for GeometryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeometryFormat {
    type Err = ConvertError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "XY" => Ok(GeometryFormat::Xy),
            "WKT" => Ok(GeometryFormat::Wkt),
            "WKB" => Ok(GeometryFormat::Wkb),
            _ => Err(ConvertError::InvalidGeometryFormat(value.to_string())),
        }
    }
}

/// Geometry category of a store table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GeometryCategory {
    Point,
    Multipoint,
    Polyline,
    Polygon,
}

impl GeometryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryCategory::Point => "POINT",
            GeometryCategory::Multipoint => "MULTIPOINT",
            GeometryCategory::Polyline => "POLYLINE",
            GeometryCategory::Polygon => "POLYGON",
        }
    }

    /// Geometry type name used in geometry metadata documents.
    pub fn metadata_name(&self) -> &'static str {
        match self {
            GeometryCategory::Point => "Point",
            GeometryCategory::Multipoint => "MultiPoint",
            GeometryCategory::Polyline => "LineString",
            GeometryCategory::Polygon => "Polygon",
        }
    }

    pub fn of(geometry: &Geometry<f64>) -> Option<Self> {
        match geometry {
            Geometry::Point(_) => Some(GeometryCategory::Point),
            Geometry::MultiPoint(_) => Some(GeometryCategory::Multipoint),
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                Some(GeometryCategory::Polyline)
            }
            Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => Some(GeometryCategory::Polygon),
            Geometry::GeometryCollection(_) => None,
        }
    }
}

impl fmt::Display for GeometryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometry type requested for an import.
///
/// Each entry determines the category of the created container and whether
/// it carries M or Z values. `Coordinates` reads a point from two columns,
/// `H3` passes a cell identifier through to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryType {
    Coordinates,
    H3,
    Point,
    PointM,
    PointZ,
    Polyline,
    PolylineM,
    PolylineZ,
    Polygon,
    PolygonM,
    PolygonZ,
    Multipoint,
    MultipointM,
    MultipointZ,
}

impl GeometryType {
    pub const ALL: [GeometryType; 14] = [
        GeometryType::Coordinates,
        GeometryType::H3,
        GeometryType::Point,
        GeometryType::PointM,
        GeometryType::PointZ,
        GeometryType::Polyline,
        GeometryType::PolylineM,
        GeometryType::PolylineZ,
        GeometryType::Polygon,
        GeometryType::PolygonM,
        GeometryType::PolygonZ,
        GeometryType::Multipoint,
        GeometryType::MultipointM,
        GeometryType::MultipointZ,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Coordinates => "COORDINATES",
            GeometryType::H3 => "H3",
            GeometryType::Point => "POINT",
            GeometryType::PointM => "POINT M",
            GeometryType::PointZ => "POINT Z",
            GeometryType::Polyline => "POLYLINE",
            GeometryType::PolylineM => "POLYLINE M",
            GeometryType::PolylineZ => "POLYLINE Z",
            GeometryType::Polygon => "POLYGON",
            GeometryType::PolygonM => "POLYGON M",
            GeometryType::PolygonZ => "POLYGON Z",
            GeometryType::Multipoint => "MULTIPOINT",
            GeometryType::MultipointM => "MULTIPOINT M",
            GeometryType::MultipointZ => "MULTIPOINT Z",
        }
    }

    pub fn category(&self) -> GeometryCategory {
        use GeometryType::*;
        match self {
            Coordinates | Point | PointM | PointZ => GeometryCategory::Point,
            Polyline | PolylineM | PolylineZ => GeometryCategory::Polyline,
            H3 | Polygon | PolygonM | PolygonZ => GeometryCategory::Polygon,
            Multipoint | MultipointM | MultipointZ => GeometryCategory::Multipoint,
        }
    }

    pub fn has_m(&self) -> bool {
        use GeometryType::*;
        matches!(self, PointM | PolylineM | PolygonM | MultipointM)
    }

    pub fn has_z(&self) -> bool {
        use GeometryType::*;
        matches!(self, PointZ | PolylineZ | PolygonZ | MultipointZ)
    }

    fn with_dimension(category: GeometryCategory, has_m: bool, has_z: bool) -> Self {
        use GeometryType::*;
        match (category, has_m, has_z) {
            (GeometryCategory::Point, _, true) => PointZ,
            (GeometryCategory::Point, true, false) => PointM,
            (GeometryCategory::Point, false, false) => Point,
            (GeometryCategory::Polyline, _, true) => PolylineZ,
            (GeometryCategory::Polyline, true, false) => PolylineM,
            (GeometryCategory::Polyline, false, false) => Polyline,
            (GeometryCategory::Polygon, _, true) => PolygonZ,
            (GeometryCategory::Polygon, true, false) => PolygonM,
            (GeometryCategory::Polygon, false, false) => Polygon,
            (GeometryCategory::Multipoint, _, true) => MultipointZ,
            (GeometryCategory::Multipoint, true, false) => MultipointM,
            (GeometryCategory::Multipoint, false, false) => Multipoint,
        }
    }

    fn allowed() -> String {
        GeometryType::ALL
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeometryType {
    type Err = ConvertError;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        GeometryType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ConvertError::InvalidGeometryType {
                given: value.to_string(),
                allowed: GeometryType::allowed(),
            })
    }
}

/// Picks the store geometry type for a set of metadata geometry types.
///
/// Multipoint wins over point, point over (multi)linestring, and
/// (multi)linestring over (multi)polygon. A ` Z` or ` M` suffix on any entry
/// carries over to the result.
pub fn resolve_geometry_type<S: AsRef<str>>(geometry_types: &[S]) -> Result<GeometryType> {
    if geometry_types.is_empty() {
        return Err(ConvertError::InvalidGeometryType {
            given: "[]".to_string(),
            allowed: "Point, MultiPoint, LineString, MultiLineString, Polygon, MultiPolygon"
                .to_string(),
        });
    }

    let mut bases = Vec::with_capacity(geometry_types.len());
    let mut has_m = false;
    let mut has_z = false;
    for entry in geometry_types {
        let lowered = entry.as_ref().trim().to_ascii_lowercase();
        let (base, suffix) = lowered.split_once(' ').unwrap_or((lowered.as_str(), ""));
        has_z |= suffix.contains('z');
        has_m |= suffix.contains('m');
        bases.push(base.to_string());
    }
    let contains = |name: &str| bases.iter().any(|b| b == name);

    let category = if contains("multipoint") {
        GeometryCategory::Multipoint
    } else if contains("point") {
        GeometryCategory::Point
    } else if contains("multilinestring") || contains("linestring") {
        GeometryCategory::Polyline
    } else if contains("multipolygon") || contains("polygon") {
        GeometryCategory::Polygon
    } else {
        return Err(ConvertError::InvalidGeometryType {
            given: bases.join(", "),
            allowed: "Point, MultiPoint, LineString, MultiLineString, Polygon, MultiPolygon"
                .to_string(),
        });
    };
    Ok(GeometryType::with_dimension(category, has_m, has_z))
}

/// Where the geometry of an imported row comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeometryColumnRef {
    Single(String),
    /// x (longitude) and y (latitude) columns.
    Pair(String, String),
}

impl GeometryColumnRef {
    pub fn names(&self) -> Vec<&str> {
        match self {
            GeometryColumnRef::Single(name) => vec![name.as_str()],
            GeometryColumnRef::Pair(x, y) => vec![x.as_str(), y.as_str()],
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.names().contains(&column)
    }
}

impl Default for GeometryColumnRef {
    fn default() -> Self {
        GeometryColumnRef::Single("wkb".to_string())
    }
}

impl fmt::Display for GeometryColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryColumnRef::Single(name) => f.write_str(name),
            GeometryColumnRef::Pair(x, y) => write!(f, "{x},{y}"),
        }
    }
}

impl FromStr for GeometryColumnRef {
    type Err = ConvertError;

    /// `name` or `x_name,y_name`.
    fn from_str(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [single] if !single.is_empty() => Ok(GeometryColumnRef::Single(single.to_string())),
            [x, y] if !x.is_empty() && !y.is_empty() => {
                Ok(GeometryColumnRef::Pair(x.to_string(), y.to_string()))
            }
            _ => Err(ConvertError::MissingGeometryColumn(value.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for GeometryColumnRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Export-side representation of one geometry value.
#[derive(Clone, Debug, PartialEq)]
pub enum EncodedGeometry {
    Xy(f64, f64),
    Wkt(String),
    Wkb(Vec<u8>),
}

/// Encodes a store geometry.
///
/// `XY` writes the point itself, or the centroid of anything that is not a
/// point. An empty geometry has no centroid and encodes as `None`.
pub fn encode(geometry: &Geometry<f64>, format: GeometryFormat) -> Result<Option<EncodedGeometry>> {
    let encoded = match format {
        GeometryFormat::Xy => {
            let point: Option<Point<f64>> = match geometry {
                Geometry::Point(point) => Some(*point),
                other => other.centroid(),
            };
            point.map(|p| EncodedGeometry::Xy(p.x(), p.y()))
        }
        GeometryFormat::Wkt => Some(EncodedGeometry::Wkt(geometry.to_wkt()?)),
        GeometryFormat::Wkb => Some(EncodedGeometry::Wkb(
            geometry.to_wkb(CoordDimensions::xy())?,
        )),
    };
    Ok(encoded)
}

/// How a target store receives the geometry of an inserted row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertChannel {
    Xy,
    Wkb,
    Wkt,
    Cell,
}

impl InsertChannel {
    /// Channel for a geometry type reading from a column of `data_type`.
    ///
    /// `None` when the column cannot feed the geometry type.
    pub fn select(geometry_type: GeometryType, data_type: Option<&DataType>) -> Option<Self> {
        match geometry_type {
            GeometryType::Coordinates => Some(InsertChannel::Xy),
            GeometryType::H3 => match data_type? {
                DataType::Utf8
                | DataType::LargeUtf8
                | DataType::Utf8View
                | DataType::Int64
                | DataType::UInt64 => Some(InsertChannel::Cell),
                _ => None,
            },
            _ => match data_type? {
                DataType::Binary | DataType::LargeBinary | DataType::BinaryView => {
                    Some(InsertChannel::Wkb)
                }
                DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
                    Some(InsertChannel::Wkt)
                }
                _ => None,
            },
        }
    }

    /// Column token a store uses for this channel in an insert column list.
    pub fn token(&self) -> &'static str {
        match self {
            InsertChannel::Xy => "SHAPE@XY",
            InsertChannel::Wkb => "SHAPE@WKB",
            InsertChannel::Wkt => "SHAPE@WKT",
            InsertChannel::Cell => "SHAPE@CELL",
        }
    }
}

/// Geometry of a row on its way into a target store.
#[derive(Clone, Debug, PartialEq)]
pub enum GeometryValue {
    Xy(f64, f64),
    Wkb(Vec<u8>),
    Wkt(String),
    Cell(String),
}

impl GeometryValue {
    pub fn channel(&self) -> InsertChannel {
        match self {
            GeometryValue::Xy(..) => InsertChannel::Xy,
            GeometryValue::Wkb(_) => InsertChannel::Wkb,
            GeometryValue::Wkt(_) => InsertChannel::Wkt,
            GeometryValue::Cell(_) => InsertChannel::Cell,
        }
    }

    /// Decodes into a planar geometry.
    ///
    /// Cell identifiers need a cell grid to be materialized and fail here.
    pub fn to_geometry(&self) -> Result<Geometry<f64>> {
        let geometry = match self {
            GeometryValue::Xy(x, y) => Geometry::Point(Point::new(*x, *y)),
            GeometryValue::Wkb(bytes) => Wkb(bytes.to_vec()).to_geo()?,
            GeometryValue::Wkt(text) => Wkt(text.to_string()).to_geo()?,
            GeometryValue::Cell(cell) => {
                return Err(ConvertError::UnsupportedType(format!(
                    "cell identifier '{cell}' cannot be decoded without a cell grid"
                )));
            }
        };
        Ok(geometry)
    }
}

/// Running bounding box over encoded geometries.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    extent: Option<[f64; 4]>,
}

impl Bounds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, geometry: &Geometry<f64>) {
        let Some(rect) = geometry.bounding_rect() else {
            return;
        };
        let (min, max) = (rect.min(), rect.max());
        self.extent = Some(match self.extent {
            Some([minx, miny, maxx, maxy]) => [
                minx.min(min.x),
                miny.min(min.y),
                maxx.max(max.x),
                maxy.max(max.y),
            ],
            None => [min.x, min.y, max.x, max.y],
        });
    }

    /// `[minx, miny, maxx, maxy]`, or `None` if nothing with an extent was added.
    pub fn to_bbox(&self) -> Option<[f64; 4]> {
        self.extent
    }

    pub fn reset(&mut self) {
        self.extent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{LineString, Polygon, line_string, point, polygon};

    #[test]
    fn geometry_format_is_validated() {
        assert_eq!("wkb".parse::<GeometryFormat>().unwrap(), GeometryFormat::Wkb);
        assert_eq!(" Xy ".parse::<GeometryFormat>().unwrap(), GeometryFormat::Xy);
        assert!(matches!(
            "GEOJSON".parse::<GeometryFormat>(),
            Err(ConvertError::InvalidGeometryFormat(_))
        ));
    }

    #[test]
    fn output_fields_follow_encoding() {
        let xy: Vec<_> = GeometryFormat::Xy
            .output_fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(xy, vec!["geometry_X", "geometry_Y"]);
        let wkb = GeometryFormat::Wkb.output_fields();
        assert_eq!(wkb[0].name(), "wkb");
        assert_eq!(wkb[0].data_type(), &DataType::Binary);
        let wkt = GeometryFormat::Wkt.output_fields();
        assert_eq!(wkt[0].name(), "wkt");
        assert_eq!(wkt[0].data_type(), &DataType::Utf8);
    }

    #[test]
    fn geometry_type_table() {
        let t: GeometryType = "polyline  z".parse().unwrap();
        assert_eq!(t, GeometryType::PolylineZ);
        assert_eq!(t.category(), GeometryCategory::Polyline);
        assert!(t.has_z());
        assert!(!t.has_m());
        assert_eq!(GeometryType::H3.category(), GeometryCategory::Polygon);
        assert_eq!(GeometryType::Coordinates.category(), GeometryCategory::Point);
        let err = "CIRCLE".parse::<GeometryType>().unwrap_err();
        assert!(err.to_string().contains("POINT M"));
    }

    #[test]
    fn resolution_prefers_most_specific_category() {
        assert_eq!(
            resolve_geometry_type(&["Point", "MultiPoint"]).unwrap(),
            GeometryType::Multipoint
        );
        assert_eq!(
            resolve_geometry_type(&["Polygon", "Point"]).unwrap(),
            GeometryType::Point
        );
        assert_eq!(
            resolve_geometry_type(&["MultiLineString", "Polygon"]).unwrap(),
            GeometryType::Polyline
        );
        assert_eq!(
            resolve_geometry_type(&["MultiPolygon Z"]).unwrap(),
            GeometryType::PolygonZ
        );
    }

    #[test]
    fn resolution_rejects_empty_and_unknown() {
        let empty: [&str; 0] = [];
        assert!(resolve_geometry_type(&empty).is_err());
        assert!(resolve_geometry_type(&["GeometryCollection"]).is_err());
    }

    #[test]
    fn column_ref_parses_single_and_pair() {
        assert_eq!(
            "wkb".parse::<GeometryColumnRef>().unwrap(),
            GeometryColumnRef::Single("wkb".into())
        );
        let pair: GeometryColumnRef = "longitude, latitude".parse().unwrap();
        assert_eq!(pair, GeometryColumnRef::Pair("longitude".into(), "latitude".into()));
        assert!(pair.contains("latitude"));
        assert!("a,b,c".parse::<GeometryColumnRef>().is_err());
    }

    #[test]
    fn xy_uses_point_or_centroid() {
        let pt = Geometry::Point(point!(x: 1.5, y: -2.0));
        assert_eq!(
            encode(&pt, GeometryFormat::Xy).unwrap(),
            Some(EncodedGeometry::Xy(1.5, -2.0))
        );
        let square = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 0.0, y: 2.0),
        ]);
        assert_eq!(
            encode(&square, GeometryFormat::Xy).unwrap(),
            Some(EncodedGeometry::Xy(1.0, 1.0))
        );
        let empty = Geometry::Polygon(Polygon::new(LineString::new(vec![]), vec![]));
        assert_eq!(encode(&empty, GeometryFormat::Xy).unwrap(), None);
    }

    #[test]
    fn wkb_and_wkt_decode_back() {
        let line = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 3.0, y: 4.0)]);
        let Some(EncodedGeometry::Wkb(bytes)) = encode(&line, GeometryFormat::Wkb).unwrap() else {
            panic!("expected wkb");
        };
        assert_eq!(GeometryValue::Wkb(bytes).to_geometry().unwrap(), line);

        let Some(EncodedGeometry::Wkt(text)) = encode(&line, GeometryFormat::Wkt).unwrap() else {
            panic!("expected wkt");
        };
        assert!(text.starts_with("LINESTRING"));
        assert_eq!(GeometryValue::Wkt(text).to_geometry().unwrap(), line);
    }

    #[test]
    fn cell_values_are_not_decoded() {
        let cell = GeometryValue::Cell("8928308280fffff".into());
        assert_eq!(cell.channel(), InsertChannel::Cell);
        assert!(cell.to_geometry().is_err());
    }

    #[test]
    fn insert_channel_follows_column_type() {
        assert_eq!(
            InsertChannel::select(GeometryType::Point, Some(&DataType::Binary)),
            Some(InsertChannel::Wkb)
        );
        assert_eq!(
            InsertChannel::select(GeometryType::Polygon, Some(&DataType::Utf8)),
            Some(InsertChannel::Wkt)
        );
        assert_eq!(
            InsertChannel::select(GeometryType::H3, Some(&DataType::Utf8)),
            Some(InsertChannel::Cell)
        );
        assert_eq!(
            InsertChannel::select(GeometryType::Coordinates, None),
            Some(InsertChannel::Xy)
        );
        assert_eq!(
            InsertChannel::select(GeometryType::Point, Some(&DataType::Float64)),
            None
        );
    }

    #[test]
    fn bounds_accumulate_extent() {
        let mut bounds = Bounds::new();
        assert_eq!(bounds.to_bbox(), None);
        bounds.add(&Geometry::Point(point!(x: 5.0, y: 5.0)));
        bounds.add(&Geometry::LineString(line_string![
            (x: -1.0, y: 2.0),
            (x: 3.0, y: 10.0)
        ]));
        assert_eq!(bounds.to_bbox(), Some([-1.0, 2.0, 5.0, 10.0]));
        bounds.reset();
        assert_eq!(bounds.to_bbox(), None);
    }
}
