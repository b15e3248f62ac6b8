use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sheetbind_spec::PathSegment;

use crate::error::BindError;

pub const INVOICE_INFO: &str = "invoice_info";
pub const CUSTOMER_INFO: &str = "customer_info";
pub const STANDARD_AGGREGATION: &str = "standard_aggregation_results";
pub const CUSTOM_AGGREGATION: &str = "custom_aggregation_results";
pub const PROCESSED_TABLES: &str = "processed_tables_data";

/// The raw invoice dataset. Shape varies by producer, so only the top-level
/// field names are fixed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceData(Map<String, JsonValue>);

impl InvoiceData {
    pub fn new(fields: Map<String, JsonValue>) -> Self {
        Self(fields)
    }

    pub fn from_value(value: JsonValue) -> Result<Self, BindError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self, BindError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, BindError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| BindError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn fields(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn invoice_info(&self) -> Option<&Map<String, JsonValue>> {
        self.get(INVOICE_INFO).and_then(JsonValue::as_object)
    }

    pub fn processed_tables(&self) -> Option<&Map<String, JsonValue>> {
        self.get(PROCESSED_TABLES).and_then(JsonValue::as_object)
    }

    /// Walk a key/index path from the root. Objects are entered by key (an
    /// index segment is read as its decimal key), lists by index (a key
    /// segment must parse as one).
    pub fn resolve_path(&self, path: &[PathSegment]) -> Option<&JsonValue> {
        let (first, rest) = path.split_first()?;
        let root = match first {
            PathSegment::Key(key) => self.0.get(key)?,
            PathSegment::Index(idx) => self.0.get(&idx.to_string())?,
        };
        rest.iter().try_fold(root, step)
    }

    pub fn into_value(self) -> JsonValue {
        JsonValue::Object(self.0)
    }
}

fn step<'a>(current: &'a JsonValue, segment: &PathSegment) -> Option<&'a JsonValue> {
    match (current, segment) {
        (JsonValue::Object(map), PathSegment::Key(key)) => map.get(key),
        (JsonValue::Object(map), PathSegment::Index(idx)) => map.get(&idx.to_string()),
        (JsonValue::Array(items), PathSegment::Index(idx)) => {
            items.get(usize::try_from(*idx).ok()?)
        }
        (JsonValue::Array(items), PathSegment::Key(key)) => {
            items.get(key.trim().parse::<usize>().ok()?)
        }
        _ => None,
    }
}

impl From<Map<String, JsonValue>> for InvoiceData {
    fn from(fields: Map<String, JsonValue>) -> Self {
        Self(fields)
    }
}
