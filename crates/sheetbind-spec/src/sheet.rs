use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::validation::ConfigIssue;

/// Column id used by the static content overlay and excluded from auto-mapping.
pub const STATIC_COLUMN_ID: &str = "col_static";

/// Declared origin of a sheet's rows inside the invoice dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub enum DataSourceKind {
    /// Grouped records in `standard_aggregation_results`.
    #[default]
    #[serde(rename = "aggregation")]
    Aggregation,
    /// DAF presentation of the standard aggregation.
    #[serde(rename = "DAF_aggregation")]
    DafAggregation,
    /// Grouped records in `custom_aggregation_results`.
    #[serde(rename = "custom_aggregation")]
    CustomAggregation,
    /// A single table of `processed_tables_data`.
    #[serde(rename = "processed_tables")]
    ProcessedTables,
    /// Every table of `processed_tables_data`, rendered one after another.
    #[serde(rename = "processed_tables_multi")]
    ProcessedTablesMulti,
}

impl DataSourceKind {
    pub const ALL: [DataSourceKind; 5] = [
        DataSourceKind::Aggregation,
        DataSourceKind::DafAggregation,
        DataSourceKind::CustomAggregation,
        DataSourceKind::ProcessedTables,
        DataSourceKind::ProcessedTablesMulti,
    ];

    /// Parse a config tag; unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataSourceKind::Aggregation => "aggregation",
            DataSourceKind::DafAggregation => "DAF_aggregation",
            DataSourceKind::CustomAggregation => "custom_aggregation",
            DataSourceKind::ProcessedTables => "processed_tables",
            DataSourceKind::ProcessedTablesMulti => "processed_tables_multi",
        }
    }

    /// Top-level invoice field holding this kind of data.
    pub fn invoice_field(self) -> &'static str {
        match self {
            DataSourceKind::Aggregation | DataSourceKind::DafAggregation => {
                "standard_aggregation_results"
            }
            DataSourceKind::CustomAggregation => "custom_aggregation_results",
            DataSourceKind::ProcessedTables | DataSourceKind::ProcessedTablesMulti => {
                "processed_tables_data"
            }
        }
    }

    pub fn is_table_based(self) -> bool {
        matches!(
            self,
            DataSourceKind::ProcessedTables | DataSourceKind::ProcessedTablesMulti
        )
    }
}

impl fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared column of a sheet header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnDef {
    /// Stable column id referenced by mapping rules. Defaults to `col_<index>`.
    #[serde(default)]
    pub id: Option<String>,
    /// Display label written in the header row.
    #[serde(default)]
    pub header: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Physical cells occupied by a column without children.
    #[serde(default = "default_colspan")]
    pub colspan: u32,
    /// Sub-columns under a merged parent header (one level only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ColumnDef>,
    #[serde(default)]
    pub skip_in_daf: bool,
    #[serde(default)]
    pub skip_in_custom: bool,
}

fn default_colspan() -> u32 {
    1
}

fn default_header_row() -> u32 {
    1
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Map::new())
}

impl ColumnDef {
    pub fn new(id: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            header: header.into(),
            format: None,
            colspan: 1,
            children: Vec::new(),
            skip_in_daf: false,
            skip_in_custom: false,
        }
    }

    pub fn with_colspan(mut self, colspan: u32) -> Self {
        self.colspan = colspan;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_children(mut self, children: Vec<ColumnDef>) -> Self {
        self.children = children;
        self
    }

    pub fn skip_in_daf(mut self) -> Self {
        self.skip_in_daf = true;
        self
    }

    pub fn skip_in_custom(mut self) -> Self {
        self.skip_in_custom = true;
        self
    }
}

/// Header block of a sheet layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Structure {
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    /// 1-based row holding the (first) header line.
    #[serde(default = "default_header_row")]
    pub header_row: u32,
}

impl Default for Structure {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            header_row: default_header_row(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DataFlow {
    /// Raw column mapping rules keyed by rule name; parsed by the runtime.
    #[serde(default = "empty_object")]
    pub mappings: JsonValue,
}

impl Default for DataFlow {
    fn default() -> Self {
        Self {
            mappings: empty_object(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Content {
    /// Column id to ordered values overlaid onto the leading data rows.
    #[serde(default, rename = "static")]
    pub static_content: Map<String, JsonValue>,
}

/// Per-sheet layout declaration (`layout_bundle.<sheet>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LayoutConfig {
    #[serde(default)]
    pub structure: Structure,
    #[serde(default)]
    pub data_flow: DataFlow,
    #[serde(default = "empty_object")]
    pub footer: JsonValue,
    #[serde(default = "empty_object")]
    pub blanks: JsonValue,
    #[serde(default = "empty_object")]
    pub merge_rules: JsonValue,
    #[serde(default)]
    pub content: Content,
    /// Any further keys are carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            structure: Structure::default(),
            data_flow: DataFlow::default(),
            footer: empty_object(),
            blanks: empty_object(),
            merge_rules: empty_object(),
            content: Content::default(),
            extra: Map::new(),
        }
    }
}

/// Styling declaration, resolved once when the sheet config is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum StylingFormat {
    /// Newer form: column styles plus row contexts, passed through verbatim.
    Inline {
        columns: JsonValue,
        row_contexts: JsonValue,
    },
    /// Legacy flat `styling_config` object.
    Legacy(Map<String, JsonValue>),
}

impl Default for StylingFormat {
    fn default() -> Self {
        StylingFormat::Legacy(Map::new())
    }
}

impl StylingFormat {
    pub fn is_inline(&self) -> bool {
        matches!(self, StylingFormat::Inline { .. })
    }
}

/// Wire shape of a sheet config: styling may arrive either as a nested
/// `styling_config` or as top-level `columns` + `row_contexts`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SheetConfigDocument {
    #[serde(default)]
    pub data_source: DataSourceKind,
    #[serde(default)]
    pub layout_config: LayoutConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styling_config: Option<Map<String, JsonValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_contexts: Option<JsonValue>,
}

/// Immutable, fully resolved per-sheet declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "SheetConfigDocument", into = "SheetConfigDocument")]
pub struct SheetConfig {
    pub data_source: DataSourceKind,
    pub layout_config: LayoutConfig,
    pub styling: StylingFormat,
}

impl From<SheetConfigDocument> for SheetConfig {
    fn from(doc: SheetConfigDocument) -> Self {
        let styling = match (doc.columns, doc.row_contexts) {
            (Some(columns), Some(row_contexts)) => StylingFormat::Inline {
                columns,
                row_contexts,
            },
            _ => StylingFormat::Legacy(doc.styling_config.unwrap_or_default()),
        };
        Self {
            data_source: doc.data_source,
            layout_config: doc.layout_config,
            styling,
        }
    }
}

impl From<SheetConfig> for SheetConfigDocument {
    fn from(config: SheetConfig) -> Self {
        let (styling_config, columns, row_contexts) = match config.styling {
            StylingFormat::Inline {
                columns,
                row_contexts,
            } => (None, Some(columns), Some(row_contexts)),
            StylingFormat::Legacy(map) => (Some(map), None, None),
        };
        Self {
            data_source: config.data_source,
            layout_config: config.layout_config,
            styling_config,
            columns,
            row_contexts,
        }
    }
}

impl SheetConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Append structural issues for this sheet under `prefix`.
    pub fn collect_issues(&self, prefix: &str, issues: &mut Vec<ConfigIssue>) {
        self.layout_config.collect_issues(prefix, issues);
    }
}

impl LayoutConfig {
    pub fn collect_issues(&self, prefix: &str, issues: &mut Vec<ConfigIssue>) {
        let id_pattern =
            Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").expect("column id regex must compile");

        if self.structure.header_row == 0 {
            issues.push(ConfigIssue::new(
                format!("{prefix}.structure.header_row"),
                "header_row is 1-based and must be at least 1",
            ));
        }

        let mut seen = HashSet::new();
        for (idx, column) in self.structure.columns.iter().enumerate() {
            let path = format!("{prefix}.structure.columns[{idx}]");
            check_column(column, &path, &id_pattern, &mut seen, issues);

            if !column.children.is_empty() && column.colspan > 1 {
                issues.push(ConfigIssue::new(
                    format!("{path}.colspan"),
                    "colspan is derived from children and must not be set on a parent column",
                ));
            }

            for (child_idx, child) in column.children.iter().enumerate() {
                let child_path = format!("{path}.children[{child_idx}]");
                check_column(child, &child_path, &id_pattern, &mut seen, issues);
                if !child.children.is_empty() {
                    issues.push(ConfigIssue::new(
                        format!("{child_path}.children"),
                        "columns may only nest one level deep",
                    ));
                }
            }
        }

        if !(self.data_flow.mappings.is_object() || self.data_flow.mappings.is_null()) {
            issues.push(ConfigIssue::new(
                format!("{prefix}.data_flow.mappings"),
                "mappings must be an object keyed by rule name",
            ));
        } else if let Some(data_map) = self.data_flow.mappings.get("data_map") {
            if !data_map.is_object() {
                issues.push(ConfigIssue::new(
                    format!("{prefix}.data_flow.mappings.data_map"),
                    "data_map must be an object of dynamic rules",
                ));
            }
        }

        for (column_id, values) in &self.content.static_content {
            if !values.is_array() {
                issues.push(ConfigIssue::new(
                    format!("{prefix}.content.static.{column_id}"),
                    "static content must be an ordered list of values",
                ));
            }
        }
    }
}

fn check_column(
    column: &ColumnDef,
    path: &str,
    id_pattern: &Regex,
    seen: &mut HashSet<String>,
    issues: &mut Vec<ConfigIssue>,
) {
    if column.colspan == 0 {
        issues.push(ConfigIssue::new(
            format!("{path}.colspan"),
            "colspan must be at least 1",
        ));
    }
    let Some(id) = column.id.as_deref() else {
        return;
    };
    if !id_pattern.is_match(id) {
        issues.push(ConfigIssue::new(
            format!("{path}.id"),
            format!("column id `{id}` must be alphanumeric with '_', '.' or '-'"),
        ));
    }
    if !seen.insert(id.to_string()) {
        issues.push(ConfigIssue::new(
            format!("{path}.id"),
            format!("duplicate column id `{id}`"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inline_styling_wins_over_legacy() {
        let config: SheetConfig = serde_json::from_value(json!({
            "data_source": "processed_tables_multi",
            "styling_config": { "header_font": { "bold": true } },
            "columns": { "col_po": { "width": 12 } },
            "row_contexts": { "header": {} }
        }))
        .unwrap();
        assert_eq!(config.data_source, DataSourceKind::ProcessedTablesMulti);
        assert!(config.styling.is_inline());
    }

    #[test]
    fn missing_styling_defaults_to_empty_legacy() {
        let config: SheetConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.styling, StylingFormat::Legacy(Map::new()));
        assert_eq!(config.layout_config.structure.header_row, 1);
    }

    #[test]
    fn only_one_inline_key_stays_legacy() {
        let config: SheetConfig = serde_json::from_value(json!({
            "columns": { "col_po": {} },
            "styling_config": { "default_font": { "size": 9 } }
        }))
        .unwrap();
        match config.styling {
            StylingFormat::Legacy(map) => assert!(map.contains_key("default_font")),
            other => panic!("unexpected styling: {other:?}"),
        }
    }

    #[test]
    fn data_source_tags_round_trip() {
        for kind in DataSourceKind::ALL {
            assert_eq!(DataSourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(DataSourceKind::parse("pivot"), None);
        assert_eq!(
            DataSourceKind::DafAggregation.invoice_field(),
            "standard_aggregation_results"
        );
    }

    #[test]
    fn layout_issues_cover_nesting_and_duplicates() {
        let layout: LayoutConfig = serde_json::from_value(json!({
            "structure": {
                "header_row": 0,
                "columns": [
                    { "id": "col_po", "header": "P.O" },
                    { "id": "col_qty", "header": "Quantity", "children": [
                        { "id": "col_po", "header": "PCS" },
                        { "id": "col_sf", "header": "SF", "children": [{ "id": "deep" }] }
                    ]},
                    { "id": "bad id", "colspan": 0 }
                ]
            },
            "data_flow": { "mappings": [] }
        }))
        .unwrap();

        let mut issues = Vec::new();
        layout.collect_issues("layout_bundle.Invoice", &mut issues);
        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"layout_bundle.Invoice.structure.header_row"));
        assert!(paths.contains(&"layout_bundle.Invoice.structure.columns[1].children[0].id"));
        assert!(
            paths.contains(&"layout_bundle.Invoice.structure.columns[1].children[1].children")
        );
        assert!(paths.contains(&"layout_bundle.Invoice.structure.columns[2].colspan"));
        assert!(paths.contains(&"layout_bundle.Invoice.structure.columns[2].id"));
        assert!(paths.contains(&"layout_bundle.Invoice.data_flow.mappings"));
    }
}
