//! Schema override files.
//!
//! An override file is a CSV table with one row per field:
//!
//! ```text
//! field_name,field_type,field_precision,field_scale,field_length,field_alias,field_is_nullable,field_is_required,field_domain
//! ```
//!
//! The same format is produced by [`create_schema_file`], so a table can be
//! used as the template for the schema of a later import.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::{FieldDef, NativeType};
use crate::error::Result;
use crate::storage::FeatureSource;

/// Generic text marker some stores report; add-field calls want `TEXT`.
const GENERIC_TEXT_MARKER: &str = "String";

#[derive(Debug, Deserialize, Serialize)]
struct SchemaRecord {
    field_name: String,
    field_type: String,
    #[serde(default)]
    field_precision: Option<u32>,
    #[serde(default)]
    field_scale: Option<u32>,
    #[serde(default)]
    field_length: Option<u32>,
    #[serde(default)]
    field_alias: Option<String>,
    #[serde(default)]
    field_is_nullable: Option<String>,
    #[serde(default)]
    field_is_required: Option<String>,
    #[serde(default)]
    field_domain: Option<String>,
}

impl SchemaRecord {
    fn into_field(self) -> Result<FieldDef> {
        let type_name = if self.field_type == GENERIC_TEXT_MARKER {
            NativeType::String.keyword().to_string()
        } else {
            self.field_type
        };
        let native_type = type_name.parse::<NativeType>()?;
        Ok(FieldDef {
            name: self.field_name,
            native_type,
            alias: self.field_alias.filter(|alias| !alias.is_empty()),
            nullable: parse_flag(self.field_is_nullable.as_deref(), true),
            required: parse_flag(self.field_is_required.as_deref(), false),
            length: self.field_length,
            precision: self.field_precision,
            scale: self.field_scale,
            domain: self.field_domain.filter(|domain| !domain.is_empty()),
        })
    }

    fn from_field(field: &FieldDef) -> Self {
        Self {
            field_name: field.name.clone(),
            field_type: field.native_type.as_str().to_string(),
            field_precision: field.precision,
            field_scale: field.scale,
            field_length: field.length,
            field_alias: field.alias.clone(),
            field_is_nullable: Some(field.nullable.to_string()),
            field_is_required: Some(field.required.to_string()),
            field_domain: field.domain.clone(),
        }
    }
}

fn parse_flag(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_uppercase()) {
        Some(v) if v == "TRUE" || v == "NULLABLE" || v == "REQUIRED" || v == "1" => true,
        Some(v) if v == "FALSE" || v == "NON_NULLABLE" || v == "NON_REQUIRED" || v == "0" => {
            false
        }
        _ => default,
    }
}

/// Field definitions that take precedence over introspected ones.
///
/// Each entry is handed out at most once through [`SchemaOverride::take`];
/// whatever is never taken is reported by [`SchemaOverride::remaining`] so
/// the caller can still add it.
#[derive(Debug, Default)]
pub struct SchemaOverride {
    entries: Vec<FieldDef>,
    consumed: HashSet<String>,
}

impl SchemaOverride {
    pub fn new(entries: Vec<FieldDef>) -> Self {
        Self {
            entries,
            consumed: HashSet::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut entries = Vec::new();
        for record in reader.deserialize::<SchemaRecord>() {
            entries.push(record?.into_field()?);
        }
        tracing::info!("Loaded {} field overrides from {:?}", entries.len(), path);
        Ok(Self::new(entries))
    }

    pub fn take(&mut self, name: &str) -> Option<FieldDef> {
        if self.consumed.contains(name) {
            return None;
        }
        let field = self.entries.iter().find(|field| field.name == name)?.clone();
        self.consumed.insert(field.name.clone());
        Some(field)
    }

    pub fn remaining(&self) -> impl Iterator<Item = &FieldDef> {
        self.entries
            .iter()
            .filter(|field| !self.consumed.contains(&field.name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Writes the attribute schema of `table` as an override file.
///
/// Identity and geometry fields are left out since they are never added
/// through an override.
pub fn create_schema_file(source: &dyn FeatureSource, table: &str, output: &Path) -> Result<()> {
    let description = source.describe(table)?;
    let mut writer = csv::Writer::from_path(output)?;
    let mut written = 0usize;
    for field in description.fields.iter().filter(|field| {
        !matches!(
            field.native_type,
            NativeType::ObjectId | NativeType::Geometry
        )
    }) {
        writer.serialize(SchemaRecord::from_field(field))?;
        written += 1;
    }
    writer.flush()?;
    tracing::info!("Wrote {} field definitions to {:?}", written, output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_overrides_and_normalizes_text_marker() {
        let file = write_csv(
            "field_name,field_type,field_precision,field_scale,field_length,field_alias,field_is_nullable,field_is_required,field_domain\n\
             name,String,,,80,Place Name,True,False,\n\
             pop,LONG,,,,,False,False,\n",
        );
        let overrides = SchemaOverride::load(file.path()).unwrap();
        assert_eq!(overrides.len(), 2);
        let fields: Vec<_> = overrides.remaining().cloned().collect();
        assert_eq!(fields[0].native_type, NativeType::String);
        assert_eq!(fields[0].length, Some(80));
        assert_eq!(fields[0].alias.as_deref(), Some("Place Name"));
        assert_eq!(fields[1].native_type, NativeType::Integer);
        assert!(!fields[1].nullable);
    }

    #[test]
    fn entries_are_consumed_once() {
        let mut overrides = SchemaOverride::new(vec![
            FieldDef::new("a", NativeType::Double),
            FieldDef::new("b", NativeType::String),
        ]);
        assert!(overrides.take("a").is_some());
        assert!(overrides.take("a").is_none());
        let left: Vec<_> = overrides.remaining().map(|f| f.name.as_str()).collect();
        assert_eq!(left, vec!["b"]);
    }

    #[test]
    fn rejects_unknown_field_type() {
        let file = write_csv("field_name,field_type\nodd,HYPERCUBE\n");
        assert!(matches!(
            SchemaOverride::load(file.path()),
            Err(ConvertError::UnsupportedType(_))
        ));
    }
}
