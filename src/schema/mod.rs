//! Field model shared by both sides of a conversion.
//!
//! A store describes its attributes as [`FieldDef`]s typed with a
//! [`NativeType`]; the columnar side uses arrow `DataType`s. The
//! [`mapping`] module translates between the two and [`overrides`] lets a
//! caller pin down field properties that introspection would guess.

mod mapping;
mod overrides;

pub use mapping::{map_to_columnar, map_to_native};
pub use overrides::{SchemaOverride, create_schema_file};

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::ConvertError;

/// Length given to text fields when nothing better is known.
pub const DEFAULT_TEXT_LENGTH: u32 = 512;

/// Longest field name the default naming policy produces.
pub const DEFAULT_MAX_FIELD_NAME_LENGTH: usize = 64;

/// Field types as a feature store reports them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NativeType {
    ObjectId,
    SmallInteger,
    Integer,
    BigInteger,
    Single,
    Double,
    String,
    Date,
    Blob,
    Guid,
    GlobalId,
    Geometry,
    Raster,
}

impl NativeType {
    /// Name a store reports in a table description.
    pub fn as_str(&self) -> &'static str {
        match self {
            NativeType::ObjectId => "OID",
            NativeType::SmallInteger => "SmallInteger",
            NativeType::Integer => "Integer",
            NativeType::BigInteger => "BigInteger",
            NativeType::Single => "Single",
            NativeType::Double => "Double",
            NativeType::String => "String",
            NativeType::Date => "Date",
            NativeType::Blob => "Blob",
            NativeType::Guid => "Guid",
            NativeType::GlobalId => "GlobalID",
            NativeType::Geometry => "Geometry",
            NativeType::Raster => "Raster",
        }
    }

    /// Keyword a store accepts when a field is added.
    pub fn keyword(&self) -> &'static str {
        match self {
            NativeType::ObjectId => "OID",
            NativeType::SmallInteger => "SHORT",
            NativeType::Integer => "LONG",
            NativeType::BigInteger => "BIGINTEGER",
            NativeType::Single => "FLOAT",
            NativeType::Double => "DOUBLE",
            NativeType::String => "TEXT",
            NativeType::Date => "DATE",
            NativeType::Blob => "BLOB",
            NativeType::Guid => "GUID",
            NativeType::GlobalId => "GLOBALID",
            NativeType::Geometry => "GEOMETRY",
            NativeType::Raster => "RASTER",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, NativeType::String | NativeType::Guid | NativeType::GlobalId)
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NativeType {
    type Err = ConvertError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let native = match value.trim().to_ascii_uppercase().as_str() {
            "OID" | "OBJECTID" => NativeType::ObjectId,
            "SMALLINTEGER" | "SHORT" => NativeType::SmallInteger,
            "INTEGER" | "LONG" => NativeType::Integer,
            "BIGINTEGER" => NativeType::BigInteger,
            "SINGLE" | "FLOAT" => NativeType::Single,
            "DOUBLE" => NativeType::Double,
            "STRING" | "TEXT" => NativeType::String,
            "DATE" => NativeType::Date,
            "BLOB" => NativeType::Blob,
            "GUID" => NativeType::Guid,
            "GLOBALID" => NativeType::GlobalId,
            "GEOMETRY" => NativeType::Geometry,
            "RASTER" => NativeType::Raster,
            other => return Err(ConvertError::UnsupportedType(other.to_string())),
        };
        Ok(native)
    }
}

/// One attribute field of a store table.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub native_type: NativeType,
    pub alias: Option<String>,
    pub nullable: bool,
    pub required: bool,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub domain: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, native_type: NativeType) -> Self {
        let length = native_type.is_text().then_some(DEFAULT_TEXT_LENGTH);
        Self {
            name: name.into(),
            native_type,
            alias: None,
            nullable: true,
            required: false,
            length,
            precision: None,
            scale: None,
            domain: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Alias if set, otherwise the field name.
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Deterministic field naming for stores that restrict names.
///
/// Characters outside `[A-Za-z0-9_]` become `_`, names starting with a
/// digit or with `delta` get a `c` prefix, names are cut to `max_len`, and a
/// name already handed out gets a `_N` suffix that still fits in `max_len`.
pub struct FieldNamer {
    max_len: usize,
    used: HashSet<String>,
}

impl FieldNamer {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(4),
            used: HashSet::new(),
        }
    }

    /// Marks a name as taken without transforming it.
    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_ascii_lowercase());
    }

    pub fn assign(&mut self, source: &str) -> String {
        let base = sanitize_field_name(source, self.max_len);
        let mut candidate = base.clone();
        let mut suffix = 1;
        while self.used.contains(&candidate.to_ascii_lowercase()) {
            let tail = format!("_{suffix}");
            let keep = self.max_len.saturating_sub(tail.len()).min(base.len());
            candidate = format!("{}{}", &base[..keep], tail);
            suffix += 1;
        }
        self.used.insert(candidate.to_ascii_lowercase());
        candidate
    }
}

pub fn sanitize_field_name(source: &str, max_len: usize) -> String {
    let mut name: String = source
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() {
        name.push_str("field");
    }
    let starts_with_digit = name.chars().next().is_some_and(|c| c.is_ascii_digit());
    if starts_with_digit || name.to_ascii_lowercase().starts_with("delta") {
        name.insert(0, 'c');
    }
    name.truncate(max_len);
    name
}
