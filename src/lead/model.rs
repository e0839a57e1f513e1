//! Lead schema and records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ExtractionError;

/// One field collected for a lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadField {
    pub name: String,
    /// Shown to the model in the extraction schema.
    pub description: String,
}

impl LeadField {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

const KNOWN_FIELDS: &[(&str, &str)] = &[
    ("name", "the name of the individual"),
    ("email", "the email address of the individual"),
    ("phone", "the phone number of the individual"),
    ("company", "the company the individual works for"),
    ("company_size", "the size of the company the individual works for"),
    ("industry", "the industry of the company the individual works for"),
    ("role", "the position or occupation of the individual"),
    ("interest", "what kind of service the individual is interested in"),
    ("pain", "what pain points the individual is experiencing"),
    ("budget", "the budget the individual has for the service"),
    ("additional_info", "any additional information the individual has provided"),
];

const DEFAULT_FIELDS: &[&str] = &[
    "name",
    "email",
    "phone",
    "company",
    "company_size",
    "role",
    "interest",
    "pain",
    "budget",
    "additional_info",
];

/// Ordered list of lead fields.
///
/// The order is the order of every emitted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadSchema {
    fields: Vec<LeadField>,
}

impl Default for LeadSchema {
    fn default() -> Self {
        Self::from_names(DEFAULT_FIELDS.iter().copied())
    }
}

impl LeadSchema {
    pub fn new(fields: Vec<LeadField>) -> Self {
        Self { fields }
    }

    /// Build a schema from field names, using the built-in description for
    /// known names. Duplicates are dropped.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut fields: Vec<LeadField> = Vec::new();
        for name in names {
            let name = name.trim();
            if name.is_empty() || fields.iter().any(|f| f.name == name) {
                continue;
            }
            let description = KNOWN_FIELDS
                .iter()
                .find(|(known, _)| *known == name)
                .map(|(_, d)| (*d).to_string())
                .unwrap_or_else(|| format!("the {} of the individual", name.replace('_', " ")));
            fields.push(LeadField::new(name, description));
        }
        Self { fields }
    }

    /// Parse a comma-separated field list. `None` if it names no field.
    pub fn from_csv(list: &str) -> Option<Self> {
        let schema = Self::from_names(list.split(','));
        (!schema.fields.is_empty()).then_some(schema)
    }

    pub fn fields(&self) -> &[LeadField] {
        &self.fields
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON schema for the extraction function. Every field is required and
    /// nullable.
    pub fn json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for field in &self.fields {
            properties.insert(
                field.name.clone(),
                serde_json::json!({
                    "type": ["string", "null"],
                    "description": field.description,
                }),
            );
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.names().collect::<Vec<_>>(),
        })
    }
}

/// Lead field values in schema order. Every schema key is present.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeadFields {
    entries: Vec<(String, Option<String>)>,
}

impl LeadFields {
    /// All schema keys set to `None`.
    pub fn empty(schema: &LeadSchema) -> Self {
        Self {
            entries: schema.names().map(|n| (n.to_string(), None)).collect(),
        }
    }

    /// Build from model output.
    ///
    /// Missing keys become `None`, keys outside the schema are dropped and
    /// every value goes through [`normalize_value`].
    pub fn from_json(schema: &LeadSchema, value: &serde_json::Value) -> Result<Self, ExtractionError> {
        let object = value.as_object().ok_or_else(|| {
            ExtractionError::Parsing(format!("expected a JSON object, got {value}"))
        })?;
        let extra: Vec<&str> = object
            .keys()
            .map(String::as_str)
            .filter(|k| !schema.contains(k))
            .collect();
        if !extra.is_empty() {
            tracing::debug!(?extra, "Dropping lead keys outside the schema");
        }
        let entries = schema
            .names()
            .map(|name| {
                let v = object.get(name).and_then(normalize_value);
                (name.to_string(), v)
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Set a schema key. Unknown keys are ignored; returns whether it was set.
    pub fn set(&mut self, name: &str, value: Option<String>) -> bool {
        match self.entries.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => {
                entry.1 = value.and_then(|v| normalize_str(&v));
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Number of fields with a value.
    pub fn filled(&self) -> usize {
        self.entries.iter().filter(|(_, v)| v.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for LeadFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for LeadFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = LeadFields;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of lead fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<LeadFields, A::Error> {
                let mut entries = Vec::new();
                while let Some((k, v)) = access.next_entry::<String, Option<String>>()? {
                    entries.push((k, v));
                }
                Ok(LeadFields { entries })
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}

/// A lead extracted from one conversation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub conversation_id: String,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub fields: LeadFields,
}

impl LeadRecord {
    pub fn new(conversation_id: impl Into<String>, user_id: Option<String>, fields: LeadFields) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id,
            created_at: Utc::now(),
            fields,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name)
    }

    /// One `key: value` line per filled field, for prompts.
    pub fn summary(&self) -> String {
        self.fields
            .iter()
            .filter_map(|(k, v)| v.map(|v| format!("{k}: {v}")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Placeholders models write for "unknown".
const NULL_SENTINELS: &[&str] = &["none", "null", "n/a", "na", "nil", "unknown", "-"];

/// Normalize a model-produced field value to `Option<String>`.
///
/// Numbers and booleans become strings, arrays are joined with `", "`,
/// placeholders and empty strings become `None`.
pub fn normalize_value(value: &serde_json::Value) -> Option<String> {
    use serde_json::Value;
    match value {
        Value::Null => None,
        Value::String(s) => normalize_str(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(normalize_value).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Object(_) => Some(value.to_string()),
    }
}

fn normalize_str(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if NULL_SENTINELS.contains(&lower.as_str()) {
        return None;
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn default_schema_has_ten_fields_in_order() {
        let schema = LeadSchema::default();
        let names: Vec<&str> = schema.names().collect();
        assert_eq!(
            names,
            [
                "name",
                "email",
                "phone",
                "company",
                "company_size",
                "role",
                "interest",
                "pain",
                "budget",
                "additional_info"
            ]
        );
    }

    #[test]
    fn csv_schema_drops_duplicates_and_blanks() {
        let schema = LeadSchema::from_csv("name, industry,,name,email").unwrap();
        let names: Vec<&str> = schema.names().collect();
        assert_eq!(names, ["name", "industry", "email"]);
        assert!(schema.fields()[1].description.contains("industry"));
        assert!(LeadSchema::from_csv(" , ").is_none());
    }

    #[test]
    fn json_schema_requires_every_field() {
        let schema = LeadSchema::default();
        let js = schema.json_schema();
        assert_eq!(js["required"].as_array().unwrap().len(), 10);
        assert_eq!(js["properties"]["email"]["type"], json!(["string", "null"]));
    }

    #[test]
    fn partial_output_keeps_every_key() {
        let schema = LeadSchema::default();
        let fields = LeadFields::from_json(&schema, &json!({"name": "Merten"})).unwrap();
        let keys: Vec<&str> = fields.keys().collect();
        let expected: Vec<&str> = schema.names().collect();
        assert_eq!(keys, expected);
        assert_eq!(fields.get("name"), Some("Merten"));
        assert_eq!(fields.filled(), 1);
    }

    #[test]
    fn extra_keys_are_dropped() {
        let schema = LeadSchema::default();
        let fields =
            LeadFields::from_json(&schema, &json!({"name": "A", "favourite_color": "blue"})).unwrap();
        assert_eq!(fields.len(), 10);
        assert!(fields.keys().all(|k| k != "favourite_color"));
    }

    #[test]
    fn sentinels_and_numbers_are_normalized() {
        let schema = LeadSchema::default();
        let fields = LeadFields::from_json(
            &schema,
            &json!({
                "name": "None",
                "email": " n/A ",
                "phone": "",
                "company": "TCW GmbH",
                "company_size": 50,
                "interest": ["Lean", "None", "Einkauf"],
                "pain": "NULL",
            }),
        )
        .unwrap();
        assert_eq!(fields.get("name"), None);
        assert_eq!(fields.get("email"), None);
        assert_eq!(fields.get("phone"), None);
        assert_eq!(fields.get("company"), Some("TCW GmbH"));
        assert_eq!(fields.get("company_size"), Some("50"));
        assert_eq!(fields.get("interest"), Some("Lean, Einkauf"));
        assert_eq!(fields.get("pain"), None);
    }

    #[test]
    fn non_object_output_is_a_parsing_error() {
        let schema = LeadSchema::default();
        let err = LeadFields::from_json(&schema, &json!(["name"])).unwrap_err();
        assert!(matches!(err, ExtractionError::Parsing(_)));
    }

    #[test]
    fn reextracting_serialized_fields_never_yields_none_string() {
        let schema = LeadSchema::default();
        let first = LeadFields::from_json(
            &schema,
            &json!({"name": "Merten", "email": "None", "budget": "none"}),
        )
        .unwrap();
        let text = serde_json::to_string(&first).unwrap();
        let again: serde_json::Value = serde_json::from_str(&text).unwrap();
        let second = LeadFields::from_json(&schema, &again).unwrap();
        assert_eq!(first, second);
        assert!(second.iter().all(|(_, v)| v != Some("None")));
        assert!(!text.contains("\"None\""));
    }

    #[test]
    fn serialization_preserves_schema_order() {
        let schema = LeadSchema::from_names(["role", "name", "email"]);
        let mut fields = LeadFields::empty(&schema);
        assert!(fields.set("name", Some("Merten".into())));
        assert!(!fields.set("unknown", Some("x".into())));
        let text = serde_json::to_string(&fields).unwrap();
        assert_eq!(text, r#"{"role":null,"name":"Merten","email":null}"#);
        let parsed: LeadFields = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, fields);
    }

    #[test]
    fn record_summary_lists_filled_fields() {
        let schema = LeadSchema::default();
        let fields =
            LeadFields::from_json(&schema, &json!({"name": "Merten", "company": "TCW GmbH"})).unwrap();
        let record = LeadRecord::new("conv-1", None, fields);
        assert_eq!(record.summary(), "name: Merten\ncompany: TCW GmbH");
    }
}
