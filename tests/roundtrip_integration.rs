use geo_types::{Geometry, Point};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use geoparcel::error::ConvertError;
use geoparcel::export::{ExportOptions, export_table};
use geoparcel::geometry::GeometryCategory;
use geoparcel::import::{ImportOptions, import_dataset};
use geoparcel::metadata::{GeoMetadata, SpatialReference};
use geoparcel::partition::{discover_part_files, partition_strings};
use geoparcel::schema::{FieldDef, NativeType};
use geoparcel::storage::memory::MemoryTable;
use geoparcel::storage::{MemoryStore, TableDescription, Value};
use geoparcel::utils::CancellationToken;

const ROWS: usize = 1000;
const LONG_LABEL_ROW: usize = 500;

fn source_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    let description = TableDescription {
        fields: vec![
            FieldDef::new("OBJECTID", NativeType::ObjectId).not_null(),
            FieldDef::new("label", NativeType::String),
            FieldDef::new("value", NativeType::Double),
            FieldDef::new("zone", NativeType::String),
            FieldDef::new("SHAPE", NativeType::Geometry),
        ],
        identity_field: Some("OBJECTID".into()),
        geometry_field: Some("SHAPE".into()),
        shape_type: Some(GeometryCategory::Point),
        spatial_reference: Some(SpatialReference::WGS84),
        ..Default::default()
    };
    store.create_table("sites", description).unwrap();
    for i in 0..ROWS {
        let label = if i == LONG_LABEL_ROW {
            "x".repeat(20)
        } else {
            format!("site {i}")
        };
        let zone = if i % 2 == 0 { "a" } else { "b" };
        store
            .push_row(
                "sites",
                vec![
                    Value::Integer(i as i64 + 1),
                    Value::Text(label),
                    Value::Double(i as f64 / 10.0),
                    Value::Text(zone.into()),
                    Value::Shape(Geometry::Point(Point::new(i as f64 / 100.0, 45.0))),
                ],
            )
            .unwrap();
    }
    store
}

fn export_zoned(output: &Path) {
    let options = ExportOptions {
        batch_size: 300,
        partition_columns: vec!["zone".into()],
        ..Default::default()
    };
    let summary = export_table(
        &source_store(),
        "sites",
        output,
        &options,
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(summary.rows, ROWS as u64);
    // 500 rows per zone in batches of 300
    assert_eq!(summary.parts.len(), 4);
}

fn write_label_override(path: &Path) {
    fs::write(path, "field_name,field_type,field_length\nlabel,TEXT,10\n").unwrap();
}

#[test]
fn partitioned_round_trip_keeps_going_past_rejected_rows() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("sites");
    export_zoned(&dataset);

    assert_eq!(
        partition_strings(&dataset, false).unwrap(),
        vec!["zone=a".to_string(), "zone=b".to_string()]
    );
    let parts = discover_part_files(&dataset).unwrap();
    let merged = GeoMetadata::merge(
        &parts
            .iter()
            .map(|p| GeoMetadata::read(p).unwrap())
            .collect::<Vec<_>>(),
    )
    .unwrap();
    assert_eq!(merged.bbox().unwrap(), &[0.0, 45.0, 9.99, 45.0]);

    let override_file = dir.path().join("schema.csv");
    write_label_override(&override_file);
    let options = ImportOptions {
        schema_override: Some(override_file),
        ..Default::default()
    };
    let mut target = MemoryStore::new();
    let summary = import_dataset(
        &mut target,
        &dataset,
        "sites_copy",
        &options,
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(summary.inserted, ROWS as u64 - 1);
    assert_eq!(summary.failed, 1);
    assert!(!summary.cancelled);

    let table = target.table("sites_copy").unwrap();
    let description = table.description();
    assert_eq!(description.shape_type, Some(GeometryCategory::Point));
    assert_eq!(description.spatial_reference, Some(SpatialReference::WGS84));
    assert_eq!(description.field("label").unwrap().length, Some(10));
    let zones = table.column("zone").unwrap();
    assert_eq!(zones.iter().filter(|z| ***z == Value::Text("a".into())).count(), 499);
    assert_eq!(zones.iter().filter(|z| ***z == Value::Text("b".into())).count(), 500);
}

#[test]
fn partition_filter_and_sample_count() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("sites");
    export_zoned(&dataset);

    let mut target = MemoryStore::new();
    let only_b = ImportOptions {
        partitions: vec!["zone=b".into()],
        ..Default::default()
    };
    let summary =
        import_dataset(&mut target, &dataset, "b", &only_b, &CancellationToken::new()).unwrap();
    assert_eq!(summary.inserted, 500);
    assert_eq!(summary.failed, 0);

    let sample = ImportOptions {
        sample_count: Some(10),
        ..Default::default()
    };
    let summary =
        import_dataset(&mut target, &dataset, "s", &sample, &CancellationToken::new()).unwrap();
    assert_eq!(summary.inserted, 10);
    assert!(summary.sampled);
    assert_eq!(target.table("s").unwrap().rows().len(), 10);

    let missing = ImportOptions {
        partitions: vec!["zone=c".into()],
        ..Default::default()
    };
    assert!(matches!(
        import_dataset(&mut target, &dataset, "c", &missing, &CancellationToken::new()),
        Err(ConvertError::NoPartFiles(_))
    ));
}

#[test]
fn coordinate_columns_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("xy");
    let options = ExportOptions {
        geometry_format: "XY".into(),
        ..Default::default()
    };
    export_table(
        &source_store(),
        "sites",
        &dataset,
        &options,
        &CancellationToken::new(),
    )
    .unwrap();
    let part = &discover_part_files(&dataset).unwrap()[0];
    assert!(matches!(
        GeoMetadata::read(part),
        Err(ConvertError::NotGeospatial(_))
    ));

    let options = ImportOptions {
        geometry_type: Some("COORDINATES".into()),
        ..Default::default()
    };
    let mut target = MemoryStore::new();
    let summary =
        import_dataset(&mut target, &dataset, "pts", &options, &CancellationToken::new()).unwrap();
    assert_eq!(summary.inserted, ROWS as u64);
    let table = target.table("pts").unwrap();
    assert_eq!(
        table.column("SHAPE").unwrap()[1],
        &Value::Shape(Geometry::Point(Point::new(0.01, 45.0)))
    );
    assert!(table.description().field("geometry_X").is_none());
}

/// `label` → (`value`, `zone`, `SHAPE`) for every row of a table.
fn rows_by_label(table: &MemoryTable) -> HashMap<String, (Value, Value, Value)> {
    let labels = table.column("label").unwrap();
    let values = table.column("value").unwrap();
    let zones = table.column("zone").unwrap();
    let shapes = table.column("SHAPE").unwrap();
    labels
        .into_iter()
        .zip(values)
        .zip(zones)
        .zip(shapes)
        .map(|(((label, value), zone), shape)| match label {
            Value::Text(label) => (label.clone(), (value.clone(), zone.clone(), shape.clone())),
            other => panic!("unexpected label {other:?}"),
        })
        .collect()
}

#[test]
fn partitioned_round_trip_keeps_field_values() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("sites");
    export_zoned(&dataset);

    let mut target = MemoryStore::new();
    let summary = import_dataset(
        &mut target,
        &dataset,
        "copy",
        &ImportOptions::default(),
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(summary.inserted, ROWS as u64);
    assert_eq!(summary.failed, 0);

    let source = source_store();
    let expected = rows_by_label(source.table("sites").unwrap());
    let imported = rows_by_label(target.table("copy").unwrap());
    assert_eq!(imported.len(), ROWS);
    assert_eq!(imported, expected);
}

#[test]
fn wkt_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("wkt");
    let options = ExportOptions {
        geometry_format: "WKT".into(),
        ..Default::default()
    };
    export_table(
        &source_store(),
        "sites",
        &dataset,
        &options,
        &CancellationToken::new(),
    )
    .unwrap();
    for part in discover_part_files(&dataset).unwrap() {
        assert!(matches!(
            GeoMetadata::read(&part),
            Err(ConvertError::NotGeospatial(_))
        ));
    }

    let options = ImportOptions {
        geometry_type: Some("POINT".into()),
        geometry_column: Some("wkt".parse().unwrap()),
        ..Default::default()
    };
    let mut target = MemoryStore::new();
    let summary =
        import_dataset(&mut target, &dataset, "pts", &options, &CancellationToken::new()).unwrap();
    assert_eq!(summary.inserted, ROWS as u64);
    let table = target.table("pts").unwrap();
    assert!(table.description().field("wkt").is_none());
    let imported = rows_by_label(table);
    for (label, (_, _, shape)) in rows_by_label(source_store().table("sites").unwrap()) {
        let (_, _, restored) = &imported[&label];
        match (shape, restored) {
            (Value::Shape(Geometry::Point(a)), Value::Shape(Geometry::Point(b))) => {
                assert!((a.x() - b.x()).abs() < 1e-9, "{label}: {a:?} != {b:?}");
                assert!((a.y() - b.y()).abs() < 1e-9, "{label}: {a:?} != {b:?}");
            }
            other => panic!("{label}: unexpected shapes {other:?}"),
        }
    }
}
