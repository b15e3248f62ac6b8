use std::borrow::Cow;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use sheetbind_spec::DataSourceKind;
use tracing::{debug, info, warn};

use crate::invoice::{INVOICE_INFO, InvoiceData};
use crate::value::CellValue;

/// Hidden sheet that carries the resolved metadata for formula references.
pub const HIDDEN_SHEET_NAME: &str = "DeepSheet";

/// Table consulted when `invoice_info` has nothing.
pub const METADATA_TABLE_KEY: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    InvoiceNo,
    Reference,
    Date,
}

impl MetadataField {
    pub const ALL: [MetadataField; 3] = [
        MetadataField::InvoiceNo,
        MetadataField::Reference,
        MetadataField::Date,
    ];

    /// `invoice_info` keys, abbreviated first.
    pub fn info_keys(self) -> [&'static str; 2] {
        match self {
            MetadataField::InvoiceNo => ["inv_no", "col_inv_no"],
            MetadataField::Reference => ["inv_ref", "col_inv_ref"],
            MetadataField::Date => ["inv_date", "col_inv_date"],
        }
    }

    /// Column of the metadata table holding this field.
    pub fn table_column(self) -> &'static str {
        self.info_keys()[1]
    }

    /// Label written above the value on the hidden sheet.
    pub fn hidden_label(self) -> &'static str {
        match self {
            MetadataField::InvoiceNo => "col_invoice_no",
            MetadataField::Reference => "col_ref_no",
            MetadataField::Date => "col_date",
        }
    }
}

fn non_empty_text(value: &JsonValue) -> Option<String> {
    match CellValue::from_json(value) {
        CellValue::Text(s) if s.trim().is_empty() => None,
        CellValue::Boolean(false) | CellValue::Empty => None,
        cell => Some(cell.to_string()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedMetadata {
    pub invoice_no: Option<String>,
    pub reference: Option<String>,
    pub date: Option<String>,
}

impl ResolvedMetadata {
    pub fn get(&self, field: MetadataField) -> Option<&str> {
        match field {
            MetadataField::InvoiceNo => self.invoice_no.as_deref(),
            MetadataField::Reference => self.reference.as_deref(),
            MetadataField::Date => self.date.as_deref(),
        }
    }
}

/// Where a sheet's text rules find invoice metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetadataSource {
    /// Table-based sheet: the dataset already has the table layout.
    Native,
    /// `invoice_info` is present and used directly.
    InvoiceInfo,
    /// `invoice_info` is built on a copy from the given processed table.
    SynthesizedTable { table_key: String },
    Unavailable,
}

/// Label/value table for the hidden metadata sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HiddenMetadata {
    pub sheet_name: &'static str,
    pub labels: [&'static str; 3],
    pub values: [String; 3],
}

/// Resolves invoice number, reference and date across the dataset shapes.
pub struct MetadataFallbackResolver<'a> {
    invoice: &'a InvoiceData,
}

impl<'a> MetadataFallbackResolver<'a> {
    pub fn new(invoice: &'a InvoiceData) -> Self {
        Self { invoice }
    }

    /// First non-empty value: `invoice_info` keys, then the first non-empty
    /// entry of the metadata table's column.
    pub fn resolve_field(&self, field: MetadataField) -> Option<String> {
        let from_info = self.invoice.invoice_info().and_then(|info| {
            field
                .info_keys()
                .iter()
                .find_map(|key| info.get(*key).and_then(non_empty_text))
        });
        from_info.or_else(|| self.from_table(METADATA_TABLE_KEY, field))
    }

    pub fn resolve(&self) -> ResolvedMetadata {
        ResolvedMetadata {
            invoice_no: self.resolve_field(MetadataField::InvoiceNo),
            reference: self.resolve_field(MetadataField::Reference),
            date: self.resolve_field(MetadataField::Date),
        }
    }

    fn from_table(&self, table_key: &str, field: MetadataField) -> Option<String> {
        self.invoice
            .processed_tables()?
            .get(table_key)?
            .get(field.table_column())?
            .as_array()?
            .iter()
            .find_map(non_empty_text)
    }

    /// Decide how a sheet of `kind` reaches metadata.
    pub fn source_for(&self, kind: DataSourceKind, table_key: Option<&str>) -> MetadataSource {
        if kind.is_table_based() {
            return MetadataSource::Native;
        }
        if self.invoice.invoice_info().is_some() {
            return MetadataSource::InvoiceInfo;
        }
        let Some(tables) = self.invoice.processed_tables() else {
            warn!(%kind, "no processed tables; invoice metadata placeholders cannot resolve");
            return MetadataSource::Unavailable;
        };
        let table_key = table_key.unwrap_or(METADATA_TABLE_KEY);
        if !tables.contains_key(table_key) {
            warn!(%kind, table_key, "metadata table not found");
            return MetadataSource::Unavailable;
        }
        MetadataSource::SynthesizedTable {
            table_key: table_key.to_string(),
        }
    }

    /// The dataset as a sheet of `kind` should see it. Only the synthesized
    /// case copies; the copy gains an `invoice_info` built from the table.
    pub fn adapt_for_sheet(
        &self,
        kind: DataSourceKind,
        table_key: Option<&str>,
    ) -> (MetadataSource, Cow<'a, InvoiceData>) {
        let source = self.source_for(kind, table_key);
        let MetadataSource::SynthesizedTable { table_key } = &source else {
            return (source, Cow::Borrowed(self.invoice));
        };

        let mut info = Map::new();
        for field in MetadataField::ALL {
            if let Some(value) = self.from_table(table_key, field) {
                info.insert(field.info_keys()[0].to_string(), JsonValue::String(value));
            }
        }
        debug!(%kind, table_key = %table_key, fields = info.len(), "synthesized invoice_info");
        let mut fields = self.invoice.fields().clone();
        fields.insert(INVOICE_INFO.to_string(), JsonValue::Object(info));
        (source, Cow::Owned(InvoiceData::new(fields)))
    }

    /// Labels and values for the hidden metadata sheet; missing values are
    /// written as empty strings.
    pub fn side_channel(&self) -> HiddenMetadata {
        let resolved = self.resolve();
        let hidden = HiddenMetadata {
            sheet_name: HIDDEN_SHEET_NAME,
            labels: MetadataField::ALL.map(MetadataField::hidden_label),
            values: MetadataField::ALL.map(|field| resolved.get(field).unwrap_or_default().to_string()),
        };
        info!(
            invoice_no = %hidden.values[0],
            reference = %hidden.values[1],
            date = %hidden.values[2],
            "resolved hidden metadata"
        );
        hidden
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invoice(value: JsonValue) -> InvoiceData {
        InvoiceData::from_value(value).unwrap()
    }

    #[test]
    fn invoice_info_beats_first_table() {
        let both = invoice(json!({
            "invoice_info": { "inv_no": "A1" },
            "processed_tables_data": { "1": { "col_inv_no": ["B2"] } }
        }));
        assert_eq!(
            MetadataFallbackResolver::new(&both).resolve_field(MetadataField::InvoiceNo),
            Some("A1".into())
        );

        let table_only = invoice(json!({
            "processed_tables_data": { "1": { "col_inv_no": ["B2"] } }
        }));
        assert_eq!(
            MetadataFallbackResolver::new(&table_only).resolve_field(MetadataField::InvoiceNo),
            Some("B2".into())
        );
    }

    #[test]
    fn blanks_fall_through_each_step() {
        let data = invoice(json!({
            "invoice_info": { "inv_no": "", "col_inv_no": "  ", "col_inv_ref": "REF-9" },
            "processed_tables_data": {
                "1": { "col_inv_no": [null, "", "INV-3"], "col_inv_date": [45292] }
            }
        }));
        let resolved = MetadataFallbackResolver::new(&data).resolve();
        assert_eq!(resolved.invoice_no.as_deref(), Some("INV-3"));
        assert_eq!(resolved.reference.as_deref(), Some("REF-9"));
        assert_eq!(resolved.date.as_deref(), Some("45292"));
    }

    #[test]
    fn aggregation_sheets_get_synthesized_info_on_a_copy() {
        let data = invoice(json!({
            "standard_aggregation_results": {},
            "processed_tables_data": { "1": { "col_inv_no": ["INV-1"], "col_inv_ref": ["R"] } }
        }));
        let resolver = MetadataFallbackResolver::new(&data);

        let (source, adapted) = resolver.adapt_for_sheet(DataSourceKind::Aggregation, None);
        assert_eq!(
            source,
            MetadataSource::SynthesizedTable {
                table_key: "1".into()
            }
        );
        assert_eq!(
            adapted.get("invoice_info"),
            Some(&json!({ "inv_no": "INV-1", "inv_ref": "R" }))
        );
        assert!(!data.contains("invoice_info"));

        let (native, view) = resolver.adapt_for_sheet(DataSourceKind::ProcessedTablesMulti, None);
        assert_eq!(native, MetadataSource::Native);
        assert!(matches!(view, Cow::Borrowed(_)));

        let (missing, _) = resolver.adapt_for_sheet(DataSourceKind::Aggregation, Some("7"));
        assert_eq!(missing, MetadataSource::Unavailable);
    }

    #[test]
    fn side_channel_lists_labels_and_values() {
        let data = invoice(json!({ "invoice_info": { "inv_no": "INV-1", "inv_date": "03/04/2025" } }));
        let hidden = MetadataFallbackResolver::new(&data).side_channel();
        assert_eq!(hidden.sheet_name, "DeepSheet");
        assert_eq!(hidden.labels, ["col_invoice_no", "col_ref_no", "col_date"]);
        assert_eq!(hidden.values, ["INV-1".to_string(), String::new(), "03/04/2025".to_string()]);
    }
}
