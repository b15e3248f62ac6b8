use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use sheetbind_spec::DataSourceKind;
use tracing::{debug, info, warn};

use crate::error::{Diagnostic, record};
use crate::header::HeaderInfo;
use crate::mapping::{BoundDynamicRule, FormulaRule, LookupKey, ResolvedMappings, StaticInfo};
use crate::options::ModeFlags;
use crate::source::{AggregationRecord, SourceData};
use crate::value::CellValue;

/// Column ids probed, in order, for the description column.
pub const DESCRIPTION_COLUMN_IDS: [&str; 3] = ["col_desc", "col_description", "description"];

/// Field carrying the per-row pallet count.
pub const PALLET_COUNT_FIELD: &str = "pallet_count";

/// Column index to value for one rendered row.
pub type DataRow = BTreeMap<usize, CellValue>;

/// Renderer-ready rows for one sheet/table scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableResolution {
    pub data_rows: Vec<DataRow>,
    pub pallet_counts: Vec<u64>,
    pub dynamic_desc_used: bool,
    /// Records in the source, before padding for static labels.
    pub num_data_rows: usize,
    pub static_info: StaticInfo,
    pub formula_rules: BTreeMap<usize, FormulaRule>,
    pub static_content: Map<String, JsonValue>,
    pub leather_summary: Option<JsonValue>,
    pub weight_summary: Option<JsonValue>,
    pub pallet_summary_total: Option<JsonValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Looks up one row's values, whatever the source layout.
enum RowView<'a> {
    Record(&'a AggregationRecord),
    Column {
        columns: &'a Map<String, JsonValue>,
        row: usize,
    },
}

impl RowView<'_> {
    fn lookup(&self, key: &LookupKey) -> Option<CellValue> {
        match (self, key) {
            (RowView::Record(record), LookupKey::Field(field)) => {
                record.fields.get(field).map(CellValue::from_json)
            }
            (RowView::Record(record), LookupKey::Position(idx)) => record
                .key
                .as_ref()
                .and_then(|key| key.atom(*idx))
                .map(|atom| atom.to_cell_value()),
            (RowView::Column { columns, row }, LookupKey::Field(field)) => columns
                .get(field)
                .and_then(JsonValue::as_array)
                .and_then(|values| values.get(*row))
                .map(CellValue::from_json),
            (RowView::Column { .. }, LookupKey::Position(_)) => None,
        }
    }

    /// Value of the first lookup key present in the row, even when that
    /// value is null or blank.
    fn find(&self, keys: &[LookupKey]) -> Option<CellValue> {
        keys.iter().find_map(|key| self.lookup(key))
    }

    fn pallet_count(&self) -> u64 {
        self.lookup(&LookupKey::Field(PALLET_COUNT_FIELD.to_string()))
            .and_then(|value| value.as_f64())
            .filter(|count| *count > 0.0)
            .map_or(0, |count| count.round() as u64)
    }
}

/// Turns a scoped data source into rows using mappings bound to a header.
pub struct RowMaterializer<'a> {
    header: &'a HeaderInfo,
    mappings: &'a ResolvedMappings,
    modes: ModeFlags,
    static_content: Map<String, JsonValue>,
}

impl<'a> RowMaterializer<'a> {
    pub fn new(header: &'a HeaderInfo, mappings: &'a ResolvedMappings, modes: ModeFlags) -> Self {
        Self {
            header,
            mappings,
            modes,
            static_content: Map::new(),
        }
    }

    /// Column id to values written into the leading rows.
    pub fn with_static_content(mut self, static_content: Map<String, JsonValue>) -> Self {
        self.static_content = static_content;
        self
    }

    pub fn materialize(&self, kind: DataSourceKind, scoped: &JsonValue) -> TableResolution {
        let mut diagnostics = Vec::new();
        let source = SourceData::from_scoped(kind, scoped, &mut diagnostics);
        warn_desc_without_fallback(&self.mappings.dynamic);

        let desc_index = DESCRIPTION_COLUMN_IDS
            .iter()
            .find_map(|id| self.header.index_of(id));

        let views: Vec<RowView<'_>> = match &source {
            SourceData::Aggregation(records) => records.iter().map(RowView::Record).collect(),
            SourceData::Table(columns) => (0..source.row_count())
                .map(|row| RowView::Column { columns, row })
                .collect(),
            SourceData::Empty => {
                if !scoped.is_null() && !scoped.is_object() {
                    warn!(%kind, "unexpected data source shape, no rows produced");
                }
                Vec::new()
            }
        };
        debug!(%kind, rows = views.len(), "materializing rows");

        let mut data_rows = Vec::with_capacity(views.len());
        let mut pallet_counts = Vec::with_capacity(views.len());
        let mut dynamic_desc_used = false;
        for (row_idx, view) in views.iter().enumerate() {
            let mut row = DataRow::new();
            for bound in &self.mappings.dynamic {
                let found = view
                    .find(&bound.rule.lookup)
                    .filter(|value| !value.is_empty());
                if found.is_some() && Some(bound.column_index) == desc_index {
                    dynamic_desc_used = true;
                }
                match found {
                    Some(value) => {
                        let cell = self.coerce(bound, value, row_idx, &mut diagnostics);
                        row.insert(bound.column_index, cell);
                    }
                    None if row.get(&bound.column_index).is_none_or(CellValue::is_empty) => {
                        if let Some(fallback) = bound.rule.fallback.pick(self.modes.daf) {
                            row.insert(bound.column_index, CellValue::from_json(fallback));
                        }
                    }
                    None => {}
                }
            }
            for (index, value) in &self.mappings.static_values {
                row.entry(*index).or_insert_with(|| CellValue::from_json(value));
            }
            pallet_counts.push(view.pallet_count());
            data_rows.push(row);
        }

        let num_data_rows = data_rows.len();
        let num_static_labels = self.mappings.static_info.num_static_labels;
        if num_static_labels > data_rows.len() {
            data_rows.resize_with(num_static_labels, DataRow::new);
        }
        overlay_static(&mut data_rows, &self.static_content, self.header);

        let summary = |key: &str| scoped.get(key).filter(|value| !value.is_null()).cloned();
        TableResolution {
            data_rows,
            pallet_counts,
            dynamic_desc_used,
            num_data_rows,
            static_info: self.mappings.static_info.clone(),
            formula_rules: self.mappings.formula_rules.clone(),
            static_content: self.static_content.clone(),
            leather_summary: summary("leather_summary"),
            weight_summary: summary("weight_summary"),
            pallet_summary_total: summary("pallet_summary_total"),
            diagnostics,
        }
    }

    /// Numeric columns get the coerced value; failures leave the cell empty.
    fn coerce(
        &self,
        bound: &BoundDynamicRule,
        value: CellValue,
        row_idx: usize,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> CellValue {
        if !bound.numeric {
            return value;
        }
        value.coerce_numeric().unwrap_or_else(|| {
            record(
                diagnostics,
                Diagnostic::Coercion {
                    column_id: bound
                        .rule
                        .column_id
                        .clone()
                        .unwrap_or_else(|| bound.rule.rule_key.clone()),
                    row: row_idx,
                    value: value.to_string(),
                },
            );
            CellValue::Empty
        })
    }
}

fn warn_desc_without_fallback(rules: &[BoundDynamicRule]) {
    let desc_rule = rules
        .iter()
        .find(|bound| bound.rule.rule_key.to_ascii_lowercase().contains("desc"));
    if let Some(bound) = desc_rule {
        if bound.rule.fallback.is_empty() {
            warn!(
                rule = %bound.rule.rule_key,
                "description mapping has no fallback; rows without a description stay blank"
            );
        }
    }
}

/// Write each static column's values into the first rows, by column id.
/// Never adds rows; applying it twice changes nothing.
pub fn overlay_static(
    data_rows: &mut [DataRow],
    static_content: &Map<String, JsonValue>,
    header: &HeaderInfo,
) {
    for (column_id, values) in static_content {
        let Some(values) = values.as_array() else {
            continue;
        };
        let Some(index) = header.index_of(column_id) else {
            debug!(column = %column_id, "static content column not in layout");
            continue;
        };
        for (row, value) in data_rows.iter_mut().zip(values) {
            row.insert(index, CellValue::from_json(value));
        }
        info!(
            column = %column_id,
            values = values.len(),
            rows = data_rows.len().min(values.len()),
            "merged static values into leading rows"
        );
    }
}
