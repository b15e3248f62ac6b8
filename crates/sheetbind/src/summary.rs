use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::rows::PALLET_COUNT_FIELD;
use crate::value::CellValue;

fn lenient_f64(value: Option<&JsonValue>) -> f64 {
    value
        .map(CellValue::from_json)
        .and_then(|cell| cell.as_f64())
        .unwrap_or(0.0)
}

/// Net and gross weight totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WeightSummary {
    pub net: f64,
    pub gross: f64,
}

impl WeightSummary {
    /// Reads `net`/`gross`; anything non-numeric counts as zero.
    pub fn from_json(value: &JsonValue) -> Self {
        Self {
            net: lenient_f64(value.get("net")),
            gross: lenient_f64(value.get("gross")),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.net == 0.0 && self.gross == 0.0
    }
}

/// Dataset-wide totals across every processed table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GlobalSummaries {
    pub total_net_weight: f64,
    pub total_gross_weight: f64,
    pub total_pallets: u64,
}

impl GlobalSummaries {
    /// Sum each table's summaries. A table's `footer_data` block wins over
    /// its top level; pallets come from `pallet_summary_total` or, failing
    /// that, the sum of the per-row `pallet_count` list.
    ///
    /// The block replaces the top level as a whole: a table whose
    /// `footer_data` lacks `weight_summary` adds no weight, even when its
    /// top level has one.
    pub fn from_tables(tables: &Map<String, JsonValue>) -> Self {
        let mut totals = Self::default();
        for table in tables.values() {
            let summaries = table.get("footer_data").unwrap_or(table);
            if let Some(weights) = summaries.get("weight_summary") {
                let weights = WeightSummary::from_json(weights);
                totals.total_net_weight += weights.net;
                totals.total_gross_weight += weights.gross;
            }
            totals.total_pallets += match summaries.get("pallet_summary_total") {
                Some(total) => lenient_f64(Some(total)).max(0.0) as u64,
                None => table
                    .get(PALLET_COUNT_FIELD)
                    .and_then(JsonValue::as_array)
                    .map_or(0, |counts| {
                        counts
                            .iter()
                            .map(|count| lenient_f64(Some(count)).max(0.0).trunc() as u64)
                            .sum()
                    }),
            };
        }
        debug!(?totals, tables = tables.len(), "aggregated global summaries");
        totals
    }
}

/// Add `summary` (type → column id → number) into `into`, summing leaves.
/// Non-numeric leaves are skipped.
pub fn merge_leather_summary(into: &mut Map<String, JsonValue>, summary: &JsonValue) {
    let Some(types) = summary.as_object() else {
        return;
    };
    for (leather_type, columns) in types {
        let Some(columns) = columns.as_object() else {
            continue;
        };
        let entry = into
            .entry(leather_type.clone())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        let Some(totals) = entry.as_object_mut() else {
            continue;
        };
        for (column_id, value) in columns {
            let Some(value) = CellValue::from_json(value).as_f64() else {
                continue;
            };
            let current = lenient_f64(totals.get(column_id));
            totals.insert(column_id.clone(), JsonValue::from(current + value));
        }
    }
}

/// The summaries a footer renders for one table (or the grand total).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryRecord {
    pub total_pallets: u64,
    pub leather_summary: Option<JsonValue>,
    pub weight_summary: WeightSummary,
}
