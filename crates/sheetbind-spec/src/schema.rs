use serde_json::Value as JsonValue;

use crate::bundle::ConfigBundle;
use crate::sheet::SheetConfigDocument;

/// JSON Schema of the config bundle file.
pub fn generate_schema_value() -> JsonValue {
    serde_json::to_value(schemars::schema_for!(ConfigBundle)).unwrap_or(JsonValue::Null)
}

pub fn generate_schema_json_pretty() -> String {
    serde_json::to_string_pretty(&generate_schema_value()).unwrap_or_default()
}

/// JSON Schema of a single assembled sheet config.
pub fn generate_sheet_schema_value() -> JsonValue {
    serde_json::to_value(schemars::schema_for!(SheetConfigDocument)).unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_schema_lists_sections() {
        let schema = generate_schema_value();
        let props = schema["properties"]
            .as_object()
            .expect("bundle schema should have properties");
        for key in ["_meta", "processing", "styling_bundle", "layout_bundle", "context"] {
            assert!(props.contains_key(key), "missing {key}");
        }
        assert!(!props.contains_key("template_layout"));
    }

    #[test]
    fn sheet_schema_is_object() {
        assert!(generate_sheet_schema_value().is_object());
    }
}
