//! Hive-style partition keys (`column=value` directory segments).

use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{ConvertError, Result};
use crate::schema::NativeType;
use crate::storage::Value;

/// Value of a partition key, coerced from its directory text.
#[derive(Clone, Debug, PartialEq)]
pub enum PartitionValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl PartitionValue {
    /// Float if the text has exactly one `.` and parses as a float, else an
    /// integer if it parses as one, else the text itself.
    pub fn parse(raw: &str) -> Self {
        if raw.matches('.').count() == 1 {
            if let Ok(value) = raw.parse::<f64>() {
                return PartitionValue::Float(value);
            }
        }
        match raw.parse::<i64>() {
            Ok(value) => PartitionValue::Int(value),
            Err(_) => PartitionValue::Str(raw.to_string()),
        }
    }

    pub fn native_type(&self) -> NativeType {
        match self {
            PartitionValue::Int(_) => NativeType::Integer,
            PartitionValue::Float(_) => NativeType::Double,
            PartitionValue::Str(_) => NativeType::String,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            PartitionValue::Int(v) => Value::Integer(*v),
            PartitionValue::Float(v) => Value::Double(*v),
            PartitionValue::Str(v) => Value::Text(v.clone()),
        }
    }
}

impl fmt::Display for PartitionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionValue::Int(v) => write!(f, "{v}"),
            PartitionValue::Float(v) if v.fract() == 0.0 => write!(f, "{v:.1}"),
            PartitionValue::Float(v) => write!(f, "{v}"),
            PartitionValue::Str(v) => f.write_str(v),
        }
    }
}

/// Ordered set of partition keys, outermost directory first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Partition {
    entries: Vec<(String, PartitionValue)>,
}

impl Partition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, keeping its position if it is already present.
    pub fn insert(&mut self, key: impl Into<String>, value: PartitionValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&PartitionValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PartitionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn project(&self, keys: &[&str]) -> Partition {
        let mut projected = Partition::new();
        for key in keys {
            if let Some(value) = self.get(key) {
                projected.insert(*key, value.clone());
            }
        }
        projected
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&partition_path_from_dict(self))
    }
}

fn clean(text: &str) -> &str {
    text.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim()
}

/// Parses `(key == "value") and (other == 3)` into a partition.
pub fn parse_partition_expression(expr: &str) -> Result<Partition> {
    let mut partition = Partition::new();
    for clause in clean(expr).split(" and ") {
        let (key, value) = clause.split_once("==").ok_or_else(|| {
            ConvertError::InvalidPartitionFilter(format!("'{}' is not a key == value clause", clause.trim()))
        })?;
        let key = clean(key);
        let value = clean(value).trim_matches(|c| c == '\'' || c == '"');
        if key.is_empty() {
            return Err(ConvertError::InvalidPartitionFilter(format!(
                "clause '{}' has no key",
                clause.trim()
            )));
        }
        partition.insert(key, PartitionValue::parse(value));
    }
    Ok(partition)
}

/// Every key prefix of every partition, de-duplicated.
///
/// Key order is taken from the first partition. All prefixes of length one
/// come first, then length two, and so on.
pub fn generate_combinations(partitions: &[Partition]) -> Vec<Partition> {
    let Some(first) = partitions.first() else {
        return Vec::new();
    };
    let keys: Vec<&str> = first.keys().collect();
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();
    for depth in 1..=keys.len() {
        for partition in partitions {
            let prefix = partition.project(&keys[..depth]);
            if seen.insert(partition_path_from_dict(&prefix)) {
                result.push(prefix);
            }
        }
    }
    result
}

pub fn partition_path_from_dict(partition: &Partition) -> String {
    partition
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("/")
}

/// Inverse of [`partition_path_from_dict`]; every segment must be `key=value`.
pub fn partition_dict_from_path(path: &str) -> Result<Partition> {
    let mut partition = Partition::new();
    for segment in path.split(['/', '\\']).filter(|s| !s.is_empty()) {
        let (key, value) = segment.split_once('=').ok_or_else(|| ConvertError::InvalidPath {
            path: PathBuf::from(path),
            reason: format!("segment '{segment}' is not key=value"),
        })?;
        partition.insert(key, PartitionValue::parse(value));
    }
    Ok(partition)
}

/// Partition keys of the directories between `root` and `part`.
///
/// Segments that are not `key=value` are ignored.
pub fn partition_of_part(root: &Path, part: &Path) -> Partition {
    let mut partition = Partition::new();
    let Some(parent) = part.parent() else {
        return partition;
    };
    let relative = parent.strip_prefix(root).unwrap_or(parent);
    for component in relative.components() {
        if let Component::Normal(segment) = component {
            if let Some((key, value)) = segment.to_string_lossy().split_once('=') {
                partition.insert(key, PartitionValue::parse(value));
            }
        }
    }
    partition
}

/// Rejects partition filters containing empty tokens.
pub fn validate_partition_filter(filters: &[String]) -> Result<()> {
    if let Some(position) = filters.iter().position(|f| f.trim().is_empty()) {
        return Err(ConvertError::InvalidPartitionFilter(format!(
            "entry {position} is empty"
        )));
    }
    Ok(())
}

fn is_part_file(path: &Path) -> bool {
    let visible = path
        .file_name()
        .map(|name| {
            let name = name.to_string_lossy();
            !name.starts_with('_') && !name.starts_with('.')
        })
        .unwrap_or(false);
    visible && path.extension().is_some_and(|ext| ext == "parquet")
}

/// All parquet part files below `root`, sorted by path.
pub fn discover_part_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut parts = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_part_file(&path) {
                parts.push(path);
            }
        }
    }
    parts.sort();
    Ok(parts)
}

/// Partitions present in a partitioned dataset directory.
///
/// With `all_combinations`, every intermediate directory level is listed as
/// well (see [`generate_combinations`]).
pub fn list_partitions(root: &Path, all_combinations: bool) -> Result<Vec<Partition>> {
    let mut seen = std::collections::HashSet::new();
    let mut partitions = Vec::new();
    for part in discover_part_files(root)? {
        let partition = partition_of_part(root, &part);
        if !partition.is_empty() && seen.insert(partition_path_from_dict(&partition)) {
            partitions.push(partition);
        }
    }
    if all_combinations {
        partitions = generate_combinations(&partitions);
    }
    Ok(partitions)
}

pub fn partition_strings(root: &Path, all_combinations: bool) -> Result<Vec<String>> {
    Ok(list_partitions(root, all_combinations)?
        .iter()
        .map(partition_path_from_dict)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn partition(pairs: &[(&str, PartitionValue)]) -> Partition {
        let mut p = Partition::new();
        for (k, v) in pairs {
            p.insert(*k, v.clone());
        }
        p
    }

    fn s(v: &str) -> PartitionValue {
        PartitionValue::Str(v.to_string())
    }

    #[test]
    fn coercion_rule() {
        assert_eq!(PartitionValue::parse("12"), PartitionValue::Int(12));
        assert_eq!(PartitionValue::parse("-3"), PartitionValue::Int(-3));
        assert_eq!(PartitionValue::parse("1.5"), PartitionValue::Float(1.5));
        assert_eq!(PartitionValue::parse("1.2.3"), s("1.2.3"));
        assert_eq!(PartitionValue::parse("mx"), s("mx"));
        assert_eq!(PartitionValue::Float(2.0).to_string(), "2.0");
    }

    #[test]
    fn parses_partition_expressions() {
        let p = parse_partition_expression("((country == \"mx\") and (year == 2020))").unwrap();
        assert_eq!(p, partition(&[("country", s("mx")), ("year", PartitionValue::Int(2020))]));
        let single = parse_partition_expression("region == 'baja'").unwrap();
        assert_eq!(single.get("region"), Some(&s("baja")));
        assert!(parse_partition_expression("region = baja").is_err());
    }

    #[test]
    fn combinations_are_prefixes_deduplicated() {
        let rows = vec![
            partition(&[("a", s("1x")), ("b", s("p")), ("c", s("u"))]),
            partition(&[("a", s("1x")), ("b", s("p")), ("c", s("v"))]),
        ];
        let combos: Vec<String> = generate_combinations(&rows)
            .iter()
            .map(partition_path_from_dict)
            .collect();
        assert_eq!(
            combos,
            vec!["a=1x", "a=1x/b=p", "a=1x/b=p/c=u", "a=1x/b=p/c=v"]
        );
        assert!(generate_combinations(&[]).is_empty());
    }

    #[test]
    fn path_round_trip() {
        let p = partition_dict_from_path("country=mx/region=baja").unwrap();
        assert_eq!(p, partition(&[("country", s("mx")), ("region", s("baja"))]));
        assert_eq!(
            partition_path_from_dict(&partition(&[("country", s("mx"))])),
            "country=mx"
        );
        assert!(partition_dict_from_path("country=mx/part.parquet").is_err());
    }

    #[test]
    fn filter_tokens_must_not_be_empty() {
        assert!(validate_partition_filter(&["country=mx".into()]).is_ok());
        assert!(matches!(
            validate_partition_filter(&["country=mx".into(), " ".into()]),
            Err(ConvertError::InvalidPartitionFilter(_))
        ));
    }

    #[test]
    fn discovers_parts_and_partitions() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for sub in ["country=mx/year=2020", "country=mx/year=2021", "country=us/year=2020"] {
            fs::create_dir_all(root.join(sub)).unwrap();
            fs::write(root.join(sub).join("part-a-00000.snappy.parquet"), b"").unwrap();
        }
        fs::write(root.join("_SUCCESS"), b"").unwrap();
        fs::write(root.join("country=mx").join(".hidden.parquet"), b"").unwrap();

        let parts = discover_part_files(root).unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts.windows(2).all(|w| w[0] < w[1]));

        let year = partition_of_part(root, &parts[0]);
        assert_eq!(year.get("year"), Some(&PartitionValue::Int(2020)));

        let full = partition_strings(root, false).unwrap();
        assert_eq!(full, vec!["country=mx/year=2020", "country=mx/year=2021", "country=us/year=2020"]);
        let all = partition_strings(root, true).unwrap();
        assert_eq!(
            all,
            vec![
                "country=mx",
                "country=us",
                "country=mx/year=2020",
                "country=mx/year=2021",
                "country=us/year=2020"
            ]
        );
    }
}
