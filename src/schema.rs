//! Table-driven description of the telegram fields we care about.
//!
//! Every rule is keyed by its OBIS-style identifier (`1-0:32.7.0`) and says
//! where the decoded value goes (destination + tag), how to pull it out of the
//! line (a regex with capture groups), how to cast and scale it, and how often
//! it may be published.

use regex::Regex;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Key that every batch carries implicitly.
pub const TIMESTAMP_TAG: &str = "timestamp";

// Column layout of a rule tuple
const DESCRIPTION: usize = 0;
const DESTINATION: usize = 1;
const TAG: usize = 2;
const PATTERN: usize = 3;
const DATATYPE: usize = 4;
const VALIDATION: usize = 5;
const SCALE: usize = 6;
const MAX_RATE: usize = 7;
const HA_DISCOVERY: usize = 8;
const HA_ICON: usize = 9;
const VALUE_GROUP: usize = 10;

const REQUIRED_COLUMNS: usize = 8;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("duplicate field identifier '{0}'")]
    DuplicateId(String),
    #[error("destination '{destination}' has tag '{tag}' twice (fields '{first}' and '{second}')")]
    DuplicateTag {
        destination: String,
        tag: String,
        first: String,
        second: String,
    },
    #[error("field '{id}': expected at least 8 columns, found {found}")]
    MissingColumns { id: String, found: usize },
    #[error("field '{id}': invalid {column} '{value}'")]
    InvalidColumn {
        id: String,
        column: &'static str,
        value: String,
    },
    #[error("field '{id}': invalid pattern: {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },
    #[error("field '{id}': pattern has no capture group")]
    NoCaptureGroup { id: String },
    #[error("field '{id}': value group {group} but pattern has {available} groups")]
    ValueGroupOutOfRange {
        id: String,
        group: usize,
        available: usize,
    },
    #[error("field '{id}': tag 'timestamp' is reserved for the batch time")]
    ReservedTag { id: String },
    #[error("cannot read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed schema file: {0}")]
    Json(#[from] serde_json::Error),
}

/// The closed set of types a field value is cast to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Integer,
    Float,
    Text,
}

impl ValueType {
    fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "int" => Some(ValueType::Integer),
            "float" => Some(ValueType::Float),
            "str" => Some(ValueType::Text),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, ValueType::Text)
    }
}

/// Extraction rule for a single field identifier. Immutable once built.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub id: String,
    pub description: String,
    pub destination: String,
    pub tag: String,
    pub pattern: Regex,
    pub value_type: ValueType,
    /// Multiplier for numeric types; ignored for text.
    pub scale: f64,
    pub zero_allowed: bool,
    /// 0 means the value is never published.
    pub max_emits_per_hour: u32,
    pub include_in_discovery: bool,
    pub icon: String,
    /// 1-based index of the capture group that holds the payload.
    pub value_group: usize,
}

impl FieldRule {
    /// Builds a rule from a schema tuple.
    ///
    /// The first eight columns are required. Trailing optional columns
    /// (discovery flag, icon, value group) default to `"0"`, `""` and `"1"`,
    /// so tables written for older schema layouts load unchanged.
    pub fn from_columns<S: AsRef<str>>(id: &str, columns: &[S]) -> Result<Self, SchemaError> {
        if columns.len() < REQUIRED_COLUMNS {
            return Err(SchemaError::MissingColumns {
                id: id.to_string(),
                found: columns.len(),
            });
        }
        let column = |index: usize, default: &'static str| column_or(columns, index, default);
        let invalid = |column: &'static str, value: &str| SchemaError::InvalidColumn {
            id: id.to_string(),
            column,
            value: value.to_string(),
        };

        let pattern_text = column(PATTERN, "");
        let pattern = Regex::new(pattern_text).map_err(|source| SchemaError::InvalidPattern {
            id: id.to_string(),
            source,
        })?;

        let datatype = column(DATATYPE, "");
        let value_type = ValueType::from_name(datatype).ok_or_else(|| invalid("type", datatype))?;

        let validation = column(VALIDATION, "0");
        let zero_rejected =
            parse_flag(validation).ok_or_else(|| invalid("validation", validation))?;

        let scale_text = column(SCALE, "1");
        let scale = scale_text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|s| s.is_finite())
            .ok_or_else(|| invalid("scale", scale_text))?;
        if value_type == ValueType::Integer && scale.fract() != 0.0 {
            return Err(invalid("scale", scale_text));
        }

        let rate_text = column(MAX_RATE, "0");
        let max_emits_per_hour: u32 = rate_text
            .trim()
            .parse()
            .map_err(|_| invalid("max rate", rate_text))?;

        let discovery = column(HA_DISCOVERY, "0");
        let include_in_discovery =
            parse_flag(discovery).ok_or_else(|| invalid("discovery flag", discovery))?;

        let group_text = column(VALUE_GROUP, "1");
        let value_group = group_text
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|g| *g > 0)
            .ok_or_else(|| invalid("value group", group_text))?;

        let rule = Self {
            id: id.to_string(),
            description: column(DESCRIPTION, "").to_string(),
            destination: column(DESTINATION, "").to_string(),
            tag: column(TAG, "").to_string(),
            pattern,
            value_type,
            scale,
            zero_allowed: !zero_rejected,
            max_emits_per_hour,
            include_in_discovery,
            icon: column(HA_ICON, "").to_string(),
            value_group,
        };
        rule.validate()?;
        Ok(rule)
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let available = self.capture_groups();
        if available == 0 {
            if !self.is_informational() {
                return Err(SchemaError::NoCaptureGroup {
                    id: self.id.clone(),
                });
            }
        } else if self.value_group > available {
            return Err(SchemaError::ValueGroupOutOfRange {
                id: self.id.clone(),
                group: self.value_group,
                available,
            });
        }
        if self.tag == TIMESTAMP_TAG && !self.is_informational() {
            return Err(SchemaError::ReservedTag {
                id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// Number of explicit capture groups in the pattern.
    pub fn capture_groups(&self) -> usize {
        self.pattern.captures_len() - 1
    }

    /// Rules that are never published; they only exist for metadata.
    pub fn is_informational(&self) -> bool {
        self.max_emits_per_hour == 0
    }

    /// Unit of measure, taken from a trailing `[unit]` in the description.
    pub fn unit(&self) -> Option<&str> {
        let description = self.description.trim_end();
        let inner = description.strip_suffix(']')?;
        let start = inner.rfind('[')?;
        Some(inner[start + 1..].trim())
    }

    /// Description without the unit suffix.
    pub fn name(&self) -> &str {
        match self.description.rfind('[') {
            Some(start) if self.unit().is_some() => self.description[..start].trim_end(),
            _ => self.description.trim(),
        }
    }
}

fn column_or<'a, S: AsRef<str>>(columns: &'a [S], index: usize, default: &'a str) -> &'a str {
    columns.get(index).map(|c| c.as_ref()).unwrap_or(default)
}

fn parse_flag(text: &str) -> Option<bool> {
    match text.trim() {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

/// Immutable lookup table from field identifier to [`FieldRule`].
///
/// Built once at start-up and shared behind an `Arc` by the pipeline and the
/// discovery announcer.
#[derive(Debug, Clone)]
pub struct Schema {
    rules: BTreeMap<String, FieldRule>,
}

impl Schema {
    pub fn new(rules: impl IntoIterator<Item = FieldRule>) -> Result<Self, SchemaError> {
        let mut by_id: BTreeMap<String, FieldRule> = BTreeMap::new();
        let mut tags: HashMap<(String, String), String> = HashMap::new();

        for rule in rules {
            if by_id.contains_key(&rule.id) {
                return Err(SchemaError::DuplicateId(rule.id));
            }
            let key = (rule.destination.clone(), rule.tag.clone());
            if let Some(first) = tags.get(&key) {
                return Err(SchemaError::DuplicateTag {
                    destination: rule.destination,
                    tag: rule.tag,
                    first: first.clone(),
                    second: rule.id,
                });
            }
            tags.insert(key, rule.id.clone());
            by_id.insert(rule.id.clone(), rule);
        }

        Ok(Self { rules: by_id })
    }

    /// Builds a schema from a static table such as [`crate::dsmr50::DEFINITION`].
    pub fn from_table(table: &[(&str, &[&str])]) -> Result<Self, SchemaError> {
        let rules = table
            .iter()
            .map(|(id, columns)| FieldRule::from_columns(id, columns))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(rules)
    }

    /// Parses a JSON object mapping identifiers to rule tuples.
    ///
    /// Cells may be strings or numbers. A key that appears twice is reported
    /// as [`SchemaError::DuplicateId`] rather than silently overwritten.
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let entries: RuleEntries = serde_json::from_str(json)?;
        let mut rules = Vec::with_capacity(entries.0.len());
        for (id, cells) in entries.0 {
            let columns = cells
                .iter()
                .map(|cell| cell_to_string(&id, cell))
                .collect::<Result<Vec<_>, _>>()?;
            rules.push(FieldRule::from_columns(&id, &columns)?);
        }
        Self::new(rules)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, SchemaError> {
        let json = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn lookup(&self, id: &str) -> Option<&FieldRule> {
        self.rules.get(id)
    }

    pub fn rules(&self) -> impl Iterator<Item = &FieldRule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn cell_to_string(id: &str, cell: &Value) -> Result<String, SchemaError> {
    match cell {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        other => Err(SchemaError::InvalidColumn {
            id: id.to_string(),
            column: "cell",
            value: other.to_string(),
        }),
    }
}

/// Object entries in file order, keeping duplicate keys.
struct RuleEntries(Vec<(String, Vec<Value>)>);

impl<'de> Deserialize<'de> for RuleEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RuleEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of field identifier to rule tuple")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((id, cells)) = map.next_entry::<String, Vec<Value>>()? {
                    entries.push((id, cells));
                }
                Ok(RuleEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, columns: &[&str]) -> FieldRule {
        FieldRule::from_columns(id, columns).expect("valid rule")
    }

    #[test]
    fn test_short_tuple_defaults_optional_columns() {
        let r = rule(
            "1-0:32.7.0",
            &["Voltage L1 [V]", "elec", "V_L1", r"^.*\((.*)\*V\)", "float", "0", "1", "60"],
        );
        assert_eq!(r.value_type, ValueType::Float);
        assert!(r.zero_allowed);
        assert!(!r.include_in_discovery);
        assert_eq!(r.icon, "");
        assert_eq!(r.value_group, 1);
        assert_eq!(r.max_emits_per_hour, 60);
        assert_eq!(r.unit(), Some("V"));
        assert_eq!(r.name(), "Voltage L1");
    }

    #[test]
    fn test_missing_required_columns() {
        let err = FieldRule::from_columns("1-0:1.7.0", &["Power", "elec", "P"]).unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumns { found: 3, .. }));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = FieldRule::from_columns(
            "1-0:1.7.0",
            &["Power", "elec", "P", r"\((.*)\)", "double", "0", "1", "60"],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidColumn { column: "type", .. }));
    }

    #[test]
    fn test_integer_rule_needs_integral_scale() {
        let err = FieldRule::from_columns(
            "0-0:96.7.21",
            &["Failures", "elec", "failures", r"\((.*)\)", "int", "0", "0.5", "12"],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidColumn { column: "scale", .. }));
    }

    #[test]
    fn test_pattern_without_group_only_for_informational_rules() {
        let err = FieldRule::from_columns(
            "1-3:0.2.8",
            &["Version", "system", "version", r"^1-3:0\.2\.8", "int", "0", "1", "12"],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::NoCaptureGroup { .. }));

        let r = rule(
            "1-3:0.2.8",
            &["Version", "system", "version", r"^1-3:0\.2\.8", "int", "0", "1", "0"],
        );
        assert!(r.is_informational());
    }

    #[test]
    fn test_value_group_must_exist() {
        let err = FieldRule::from_columns(
            "0-1:24.2.1",
            &[
                "Gas [m3]", "gas", "gas", r"\((\d+)\)\((.*)\)", "float", "1", "1000", "60", "1",
                "mdi:counter", "3",
            ],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::ValueGroupOutOfRange {
                group: 3,
                available: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_timestamp_tag_is_reserved_for_emitted_rules() {
        let err = FieldRule::from_columns(
            "0-0:1.0.0",
            &["Time", "elec", "timestamp", r"\((\d+)W\)", "int", "1", "1", "60"],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::ReservedTag { .. }));
    }

    #[test]
    fn test_duplicate_tag_per_destination_is_rejected() {
        let table: &[(&str, &[&str])] = &[
            ("1-0:32.7.0", &["V1", "elec", "V", r"\((.*)\*V\)", "float", "0", "1", "60"]),
            ("1-0:52.7.0", &["V2", "elec", "V", r"\((.*)\*V\)", "float", "0", "1", "60"]),
        ];
        let err = Schema::from_table(table).unwrap_err();
        match err {
            SchemaError::DuplicateTag { destination, tag, .. } => {
                assert_eq!(destination, "elec");
                assert_eq!(tag, "V");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_same_tag_in_different_destinations_is_fine() {
        let table: &[(&str, &[&str])] = &[
            ("0-0:96.1.1", &["Serial", "elec", "serial", r"\((.*)\)", "str", "1", "1", "60"]),
            ("0-1:96.1.0", &["Serial", "gas", "serial", r"\((.*)\)", "str", "1", "1", "60"]),
        ];
        let schema = Schema::from_table(table).unwrap();
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let table: &[(&str, &[&str])] = &[
            ("1-0:32.7.0", &["V1", "elec", "V_L1", r"\((.*)\*V\)", "float", "0", "1", "60"]),
            ("1-0:32.7.0", &["V1", "elec", "V_L1b", r"\((.*)\*V\)", "float", "0", "1", "60"]),
        ];
        let err = Schema::from_table(table).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateId(id) if id == "1-0:32.7.0"));
    }

    #[test]
    fn test_json_schema_with_numbers_and_short_rows() {
        let json = r#"{
            "1-0:1.7.0": [
                "Total power consumption [W]", "elec", "P_consumed", "^.*\\((.*)\\*kW\\)",
                "float", 0, 1000, 60, 1, "mdi:gauge"
            ],
            "0-0:96.14.0": [
                "Tariff indicator", "elec", "tariff", "^.*\\((.*)\\)", "int", "0", "1", "0"
            ]
        }"#;
        let schema = Schema::from_json_str(json).unwrap();
        let power = schema.lookup("1-0:1.7.0").unwrap();
        assert_eq!(power.scale, 1000.0);
        assert!(power.include_in_discovery);
        assert_eq!(power.icon, "mdi:gauge");
        assert!(schema.lookup("0-0:96.14.0").unwrap().is_informational());
    }

    #[test]
    fn test_json_duplicate_keys_are_reported() {
        let json = r#"{
            "1-0:1.7.0": ["P [W]", "elec", "P", "\\((.*)\\*kW\\)", "float", "0", "1000", "60"],
            "1-0:1.7.0": ["P [W]", "elec", "P2", "\\((.*)\\*kW\\)", "float", "0", "1000", "60"]
        }"#;
        let err = Schema::from_json_str(json).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateId(_)));
    }

    #[test]
    fn test_lookup_is_stable() {
        let schema = Schema::from_table(crate::dsmr50::DEFINITION).unwrap();
        let first = schema.lookup("1-0:32.7.0").unwrap() as *const FieldRule;
        let second = schema.lookup("1-0:32.7.0").unwrap() as *const FieldRule;
        assert_eq!(first, second);
        assert!(schema.lookup("9-9:9.9.9").is_none());
    }
}
