use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use sheetbind_spec::STATIC_COLUMN_ID;
use tracing::warn;

use crate::error::MappingError;
use crate::header::HeaderInfo;
use crate::value::is_numeric_format;

/// Rule key whose object holds only dynamic rules.
pub const DATA_MAP_KEY: &str = "data_map";

/// Where a dynamic rule looks for its value in a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LookupKey {
    /// A field name (record field or table column).
    Field(String),
    /// An element of the record's tuple key.
    Position(usize),
}

impl LookupKey {
    fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(s) if !s.is_empty() => Some(LookupKey::Field(s.clone())),
            JsonValue::Number(n) => n
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .map(LookupKey::Position),
            _ => None,
        }
    }
}

/// Values used when a dynamic lookup finds nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FallbackValues {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_none: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_daf: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub any: Option<JsonValue>,
}

impl FallbackValues {
    fn from_rule(rule: &Map<String, JsonValue>) -> Self {
        Self {
            on_none: rule.get("fallback_on_none").cloned(),
            on_daf: rule.get("fallback_on_DAF").cloned(),
            any: rule.get("fallback").cloned(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.on_none.is_none() && self.on_daf.is_none() && self.any.is_none()
    }

    /// The mode-specific fallback first, then the shared one, then the
    /// non-DAF one whatever the mode. Null fallbacks count as absent.
    pub fn pick(&self, daf_mode: bool) -> Option<&JsonValue> {
        let mode_specific = if daf_mode {
            self.on_daf.as_ref()
        } else {
            self.on_none.as_ref()
        };
        [mode_specific, self.any.as_ref(), self.on_none.as_ref()]
            .into_iter()
            .flatten()
            .find(|value| !value.is_null())
    }
}

/// Per-row extraction from the data source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DynamicRule {
    pub rule_key: String,
    pub column_id: Option<String>,
    /// Tried in order; the first key present in the record wins.
    pub lookup: Vec<LookupKey>,
    #[serde(skip_serializing_if = "FallbackValues::is_empty")]
    pub fallback: FallbackValues,
}

impl DynamicRule {
    fn from_rule(rule_key: &str, rule: &Map<String, JsonValue>) -> Self {
        let column_id = target_column(rule);
        let mut lookup = Vec::new();
        let mut push = |key: Option<LookupKey>| {
            if let Some(key) = key {
                if !lookup.contains(&key) {
                    lookup.push(key);
                }
            }
        };
        push(rule.get("source_value").and_then(LookupKey::from_json));
        push(rule.get("source_key").and_then(LookupKey::from_json));
        push(column_id.clone().map(LookupKey::Field));
        push(Some(LookupKey::Field(rule_key.to_string())));

        Self {
            rule_key: rule_key.to_string(),
            column_id,
            lookup,
            fallback: FallbackValues::from_rule(rule),
        }
    }

    /// Implicit rule for a column with no explicit mapping.
    pub fn auto(column_id: &str) -> Self {
        Self {
            rule_key: column_id.to_string(),
            column_id: Some(column_id.to_string()),
            lookup: vec![LookupKey::Field(column_id.to_string())],
            fallback: FallbackValues::default(),
        }
    }
}

/// A formula left for the renderer: a template over other columns' ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormulaRule {
    pub template: Option<String>,
    pub inputs: Vec<String>,
}

impl FormulaRule {
    fn from_rule(rule: &Map<String, JsonValue>) -> Self {
        Self {
            template: rule
                .get("formula_template")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            inputs: rule
                .get("inputs")
                .and_then(JsonValue::as_array)
                .map(|inputs| {
                    inputs
                        .iter()
                        .filter_map(JsonValue::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MappingRule {
    Dynamic(DynamicRule),
    Static {
        rule_key: String,
        column_id: Option<String>,
        value: JsonValue,
    },
    Formula {
        rule_key: String,
        column_id: Option<String>,
        formula: FormulaRule,
    },
    /// Fixed labels down one column at the top of the table.
    InitialStaticRows {
        rule_key: String,
        column_id: String,
        values: Vec<JsonValue>,
        formula: FormulaRule,
    },
}

impl MappingRule {
    pub fn column_id(&self) -> Option<&str> {
        match self {
            MappingRule::Dynamic(rule) => rule.column_id.as_deref(),
            MappingRule::Static { column_id, .. } | MappingRule::Formula { column_id, .. } => {
                column_id.as_deref()
            }
            MappingRule::InitialStaticRows { column_id, .. } => Some(column_id),
        }
    }

    pub fn rule_key(&self) -> &str {
        match self {
            MappingRule::Dynamic(rule) => &rule.rule_key,
            MappingRule::Static { rule_key, .. }
            | MappingRule::Formula { rule_key, .. }
            | MappingRule::InitialStaticRows { rule_key, .. } => rule_key,
        }
    }
}

fn target_column(rule: &Map<String, JsonValue>) -> Option<String> {
    ["column", "id"]
        .iter()
        .filter_map(|key| rule.get(*key).and_then(JsonValue::as_str))
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

/// Typed form of `data_flow.mappings`, independent of any header layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MappingRuleSet {
    rules: Vec<MappingRule>,
}

impl MappingRuleSet {
    pub fn parse(mappings: &JsonValue) -> Result<Self, MappingError> {
        let entries = match mappings {
            JsonValue::Null => return Ok(Self::default()),
            JsonValue::Object(entries) => entries,
            _ => return Err(MappingError::MappingsNotObject),
        };

        let mut rules = Vec::new();
        for (rule_key, rule_value) in entries {
            if rule_key == DATA_MAP_KEY {
                let data_map = rule_value
                    .as_object()
                    .ok_or(MappingError::DataMapNotObject)?;
                for (key, rule) in data_map {
                    match rule.as_object() {
                        Some(rule) => {
                            rules.push(MappingRule::Dynamic(DynamicRule::from_rule(key, rule)))
                        }
                        None => warn!(rule = %key, "skipping non-object data_map rule"),
                    }
                }
                continue;
            }

            let Some(rule) = rule_value.as_object() else {
                warn!(rule = %rule_key, "skipping non-object mapping rule");
                continue;
            };
            rules.push(parse_rule(rule_key, rule)?);
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[MappingRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolve column ids against a header layout and add implicit rules
    /// for uncovered columns.
    pub fn bind(&self, header: &HeaderInfo) -> ResolvedMappings {
        let mut resolved = ResolvedMappings::default();
        let mut covered: BTreeSet<&str> = BTreeSet::new();

        for rule in &self.rules {
            if let Some(column_id) = rule.column_id() {
                covered.insert(column_id);
            }
            let index = rule.column_id().and_then(|id| header.index_of(id));

            match rule {
                MappingRule::InitialStaticRows {
                    column_id,
                    values,
                    formula,
                    ..
                } => {
                    let Some(index) = index else {
                        warn!(column = %column_id, "initial static rows column not found");
                        continue;
                    };
                    resolved.static_info = StaticInfo {
                        col1_index: Some(index),
                        num_static_labels: values.len(),
                        initial_static_col1_values: values.clone(),
                        static_column_header_name: header.header_at(index).map(str::to_string),
                        apply_special_border_rule: false,
                    };
                    resolved.formula_rules.insert(index, formula.clone());
                }
                MappingRule::Formula { formula, .. } => match index {
                    Some(index) => {
                        resolved.formula_rules.insert(index, formula.clone());
                    }
                    None => warn_unplaced(rule, "formula"),
                },
                MappingRule::Static { value, .. } => match index {
                    Some(index) => {
                        resolved.static_values.insert(index, value.clone());
                    }
                    None => warn_unplaced(rule, "static_value"),
                },
                MappingRule::Dynamic(dynamic) => match index {
                    Some(index) => resolved.dynamic.push(bind_dynamic(dynamic, index, header)),
                    None => warn_unplaced(rule, "dynamic"),
                },
            }
        }

        for (column_id, index) in &header.column_id_map {
            if column_id == STATIC_COLUMN_ID || covered.contains(column_id.as_str()) {
                continue;
            }
            let rule = DynamicRule::auto(column_id);
            resolved.dynamic.push(bind_dynamic(&rule, *index, header));
        }
        resolved
    }
}

fn parse_rule(rule_key: &str, rule: &Map<String, JsonValue>) -> Result<MappingRule, MappingError> {
    match rule.get("type").and_then(JsonValue::as_str) {
        Some("initial_static_rows") => {
            let column_id = rule
                .get("column_header_id")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| MappingError::StaticRowsWithoutColumn {
                    rule: rule_key.to_string(),
                })?;
            Ok(MappingRule::InitialStaticRows {
                rule_key: rule_key.to_string(),
                column_id: column_id.to_string(),
                values: rule
                    .get("values")
                    .and_then(JsonValue::as_array)
                    .cloned()
                    .unwrap_or_default(),
                formula: FormulaRule::from_rule(rule),
            })
        }
        Some("formula") => {
            let formula = FormulaRule::from_rule(rule);
            if formula.template.is_none() {
                return Err(MappingError::FormulaWithoutTemplate {
                    rule: rule_key.to_string(),
                });
            }
            Ok(MappingRule::Formula {
                rule_key: rule_key.to_string(),
                column_id: target_column(rule),
                formula,
            })
        }
        _ => match rule.get("static_value") {
            Some(value) => Ok(MappingRule::Static {
                rule_key: rule_key.to_string(),
                column_id: target_column(rule),
                value: value.clone(),
            }),
            None => Ok(MappingRule::Dynamic(DynamicRule::from_rule(rule_key, rule))),
        },
    }
}

fn warn_unplaced(rule: &MappingRule, kind: &str) {
    warn!(
        rule = rule.rule_key(),
        column = rule.column_id().unwrap_or("<none>"),
        kind,
        "mapping rule target column not in layout"
    );
}

fn bind_dynamic(rule: &DynamicRule, column_index: usize, header: &HeaderInfo) -> BoundDynamicRule {
    let numeric = rule
        .column_id
        .as_deref()
        .and_then(|id| header.format_of(id))
        .is_some_and(is_numeric_format);
    BoundDynamicRule {
        rule: rule.clone(),
        column_index,
        numeric,
    }
}

/// A dynamic rule placed at a column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundDynamicRule {
    #[serde(flatten)]
    pub rule: DynamicRule,
    pub column_index: usize,
    /// Target column has a numeric format; values are coerced.
    pub numeric: bool,
}

/// Leading static label column of a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StaticInfo {
    pub col1_index: Option<usize>,
    pub num_static_labels: usize,
    pub initial_static_col1_values: Vec<JsonValue>,
    pub static_column_header_name: Option<String>,
    pub apply_special_border_rule: bool,
}

/// Mapping rules placed onto a concrete header layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedMappings {
    pub dynamic: Vec<BoundDynamicRule>,
    pub static_values: BTreeMap<usize, JsonValue>,
    pub formula_rules: BTreeMap<usize, FormulaRule>,
    pub static_info: StaticInfo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::resolve_header;
    use crate::options::ModeFlags;
    use serde_json::json;
    use sheetbind_spec::{ColumnDef, Structure};

    fn header() -> HeaderInfo {
        resolve_header(
            &Structure {
                columns: vec![
                    ColumnDef::new("col_static", "Mark"),
                    ColumnDef::new("col_po", "P.O"),
                    ColumnDef::new("col_desc", "Description"),
                    ColumnDef::new("col_qty", "Qty").with_format("#,##0"),
                    ColumnDef::new("col_amount", "Amount"),
                    ColumnDef::new("col_remark", "Remark"),
                ],
                header_row: 1,
            },
            ModeFlags::STANDARD,
        )
    }

    #[test]
    fn rule_kinds_are_recognised() {
        let set = MappingRuleSet::parse(&json!({
            "po": { "column": "col_po", "source_key": 0 },
            "desc": { "id": "col_desc", "fallback_on_none": "LEATHER" },
            "name": { "column": "col_remark", "static_value": "COW LEATHER" },
            "amount": { "column": "col_amount", "type": "formula",
                        "formula_template": "{col_qty}{row}*2", "inputs": ["col_qty"] },
            "labels": { "type": "initial_static_rows", "column_header_id": "col_static",
                        "values": ["VENDOR#:", "Des:"] },
            "comment": "not a rule"
        }))
        .unwrap();
        assert_eq!(set.rules().len(), 5);

        let MappingRule::Dynamic(po) = &set.rules()[0] else {
            panic!("expected dynamic rule");
        };
        assert_eq!(
            po.lookup,
            vec![
                LookupKey::Position(0),
                LookupKey::Field("col_po".into()),
                LookupKey::Field("po".into())
            ]
        );

        let bound = set.bind(&header());
        assert_eq!(bound.static_values[&5], json!("COW LEATHER"));
        assert_eq!(
            bound.formula_rules[&5].template.as_deref(),
            Some("{col_qty}{row}*2")
        );
        assert_eq!(bound.static_info.col1_index, Some(1));
        assert_eq!(bound.static_info.num_static_labels, 2);
        assert_eq!(bound.static_info.static_column_header_name.as_deref(), Some("Mark"));
        assert!(bound.formula_rules.contains_key(&1));

        let targets: Vec<(&str, usize)> = bound
            .dynamic
            .iter()
            .map(|d| (d.rule.rule_key.as_str(), d.column_index))
            .collect();
        assert_eq!(targets, [("po", 2), ("desc", 3), ("col_qty", 4)]);
        assert!(bound.dynamic[2].numeric);
    }

    #[test]
    fn data_map_rules_are_dynamic() {
        let set = MappingRuleSet::parse(&json!({
            "data_map": {
                "po": { "column": "col_po" },
                "qty": { "column": "col_qty" }
            }
        }))
        .unwrap();
        let bound = set.bind(&header());
        let keys: Vec<&str> = bound.dynamic.iter().map(|d| d.rule.rule_key.as_str()).collect();
        assert_eq!(keys, ["po", "qty", "col_amount", "col_desc", "col_remark"]);
    }

    #[test]
    fn structural_errors_are_hard() {
        assert_eq!(
            MappingRuleSet::parse(&json!([])),
            Err(MappingError::MappingsNotObject)
        );
        assert_eq!(
            MappingRuleSet::parse(&json!({ "data_map": [] })),
            Err(MappingError::DataMapNotObject)
        );
        assert_eq!(
            MappingRuleSet::parse(&json!({ "amount": { "type": "formula", "column": "col_amount" } })),
            Err(MappingError::FormulaWithoutTemplate {
                rule: "amount".into()
            })
        );
        assert!(MappingRuleSet::parse(&JsonValue::Null).unwrap().is_empty());
    }

    #[test]
    fn fallback_order_follows_mode() {
        let fallback = FallbackValues {
            on_none: Some(json!("LEATHER")),
            on_daf: Some(json!("DAF LEATHER")),
            any: Some(json!("GENERIC")),
        };
        assert_eq!(fallback.pick(false), Some(&json!("LEATHER")));
        assert_eq!(fallback.pick(true), Some(&json!("DAF LEATHER")));

        let shared = FallbackValues {
            on_none: Some(json!("LEATHER")),
            on_daf: None,
            any: Some(json!("GENERIC")),
        };
        assert_eq!(shared.pick(true), Some(&json!("GENERIC")));

        let only_none = FallbackValues {
            on_none: Some(json!("LEATHER")),
            ..FallbackValues::default()
        };
        assert_eq!(only_none.pick(true), Some(&json!("LEATHER")));
        assert_eq!(FallbackValues::default().pick(false), None);
    }
}
