use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use sheetbind_spec::{ConfigBundle, DataSourceKind};
use tracing::{error, info, warn};

use crate::error::{BindError, Diagnostic};
use crate::invoice::InvoiceData;
use crate::options::RunOptions;
use crate::resolver::{ConfigBundleResolver, ContextBundle, LayoutWithData, StyleBundle};
use crate::rows::TableResolution;
use crate::source::{is_table_key, sorted_table_keys};
use crate::substitution::column_letters;
use crate::summary::{SummaryRecord, merge_leather_summary};
use crate::value::CellValue;

/// One resolved table, as handed to a [`SheetSink`].
#[derive(Debug, Clone, Serialize)]
pub struct TableOutput<'t> {
    pub table_key: Option<&'t str>,
    pub index: usize,
    pub is_last_table: bool,
    pub resolution: &'t TableResolution,
    pub summary: &'t SummaryRecord,
}

/// Totals row that closes a sheet with several tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrandTotal {
    pub tables: usize,
    pub dynamic_desc_used: bool,
    pub summary: SummaryRecord,
}

/// Rendering collaborator. Processors resolve; sinks draw.
pub trait SheetSink {
    fn write_header(
        &mut self,
        sheet: &str,
        table_key: Option<&str>,
        style: &StyleBundle<'_>,
        context: &ContextBundle<'_>,
        layout: &LayoutWithData<'_>,
    ) -> Result<(), BindError>;

    fn write_table(&mut self, sheet: &str, table: &TableOutput<'_>) -> Result<(), BindError>;

    fn write_grand_total(&mut self, sheet: &str, total: &GrandTotal) -> Result<(), BindError>;
}

pub trait SheetProcessor {
    fn process(&mut self) -> Result<(), BindError>;

    /// Soft failures collected by the last `process` call.
    fn diagnostics(&self) -> &[Diagnostic];
}

/// Pallets of one table: its `pallet_summary_total` when numeric, else the
/// sum of the per-row counts.
fn table_pallets(resolution: &TableResolution) -> u64 {
    resolution
        .pallet_summary_total
        .as_ref()
        .map(CellValue::from_json)
        .and_then(|total| total.as_f64())
        .map(|total| total.max(0.0).trunc() as u64)
        .unwrap_or_else(|| resolution.pallet_counts.iter().sum())
}

/// A sheet fed by one data source: aggregation results, or one processed table.
pub struct SingleTableProcessor<'r, 'a> {
    resolver: &'r ConfigBundleResolver<'a>,
    sink: &'r mut dyn SheetSink,
    diagnostics: Vec<Diagnostic>,
}

impl<'r, 'a> SingleTableProcessor<'r, 'a> {
    pub fn new(resolver: &'r ConfigBundleResolver<'a>, sink: &'r mut dyn SheetSink) -> Self {
        Self {
            resolver,
            sink,
            diagnostics: Vec::new(),
        }
    }

    /// `processed_tables` sheets without a key read the first numeric table.
    fn table_key(&self) -> Result<Option<String>, BindError> {
        if self.resolver.data_source_kind()? != DataSourceKind::ProcessedTables {
            return Ok(None);
        }
        Ok(self.resolver.invoice().processed_tables().and_then(|tables| {
            sorted_table_keys(tables)
                .into_iter()
                .find(|key| is_table_key(key))
        }))
    }
}

impl SheetProcessor for SingleTableProcessor<'_, '_> {
    fn process(&mut self) -> Result<(), BindError> {
        let sheet = self.resolver.sheet_name().to_string();
        let table_key = self.table_key()?;
        info!(sheet = %sheet, table_key = table_key.as_deref().unwrap_or("-"), "processing single-table sheet");

        let (style, context, layout) = self.resolver.layout_bundles_with_data(table_key.as_deref())?;
        self.sink
            .write_header(&sheet, table_key.as_deref(), &style, &context, &layout)?;

        let resolution = self.resolver.resolve_table(table_key.as_deref())?;
        let summary = self.resolver.summary_record(
            None,
            resolution.leather_summary.clone(),
            resolution.weight_summary.as_ref(),
        );
        self.sink.write_table(
            &sheet,
            &TableOutput {
                table_key: table_key.as_deref(),
                index: 0,
                is_last_table: true,
                resolution: &resolution,
                summary: &summary,
            },
        )?;
        self.diagnostics = resolution.diagnostics;
        Ok(())
    }

    fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

/// A sheet that repeats its table block for every processed table, then
/// closes with a grand total when there is more than one.
pub struct MultiTableProcessor<'r, 'a> {
    resolver: &'r ConfigBundleResolver<'a>,
    sink: &'r mut dyn SheetSink,
    diagnostics: Vec<Diagnostic>,
}

impl<'r, 'a> MultiTableProcessor<'r, 'a> {
    pub fn new(resolver: &'r ConfigBundleResolver<'a>, sink: &'r mut dyn SheetSink) -> Self {
        Self {
            resolver,
            sink,
            diagnostics: Vec::new(),
        }
    }
}

impl SheetProcessor for MultiTableProcessor<'_, '_> {
    fn process(&mut self) -> Result<(), BindError> {
        let sheet = self.resolver.sheet_name().to_string();
        self.diagnostics.clear();
        let keys = match self.resolver.invoice().processed_tables() {
            Some(tables) if !tables.is_empty() => sorted_table_keys(tables),
            _ => {
                warn!(sheet = %sheet, "no processed tables; nothing to render");
                return Ok(());
            }
        };
        info!(sheet = %sheet, tables = ?keys, "processing multi-table sheet");

        let mut grand_total_pallets = 0;
        let mut leather = Map::new();
        let mut dynamic_desc_used = false;
        for (index, key) in keys.iter().map(String::as_str).enumerate() {
            let (style, context, layout) = self.resolver.layout_bundles_with_data(Some(key))?;
            self.sink
                .write_header(&sheet, Some(key), &style, &context, &layout)?;

            let mut resolution = self.resolver.resolve_table(Some(key))?;
            let pallets = table_pallets(&resolution);
            let summary = self.resolver.summary_record(
                Some(pallets),
                resolution.leather_summary.clone(),
                resolution.weight_summary.as_ref(),
            );
            self.sink.write_table(
                &sheet,
                &TableOutput {
                    table_key: Some(key),
                    index,
                    is_last_table: index + 1 == keys.len(),
                    resolution: &resolution,
                    summary: &summary,
                },
            )?;

            grand_total_pallets += pallets;
            dynamic_desc_used |= resolution.dynamic_desc_used;
            if let Some(table_leather) = &resolution.leather_summary {
                merge_leather_summary(&mut leather, table_leather);
            }
            self.diagnostics.append(&mut resolution.diagnostics);
        }

        if keys.len() > 1 {
            let leather = (!leather.is_empty()).then_some(JsonValue::Object(leather));
            let total = GrandTotal {
                tables: keys.len(),
                dynamic_desc_used,
                summary: self
                    .resolver
                    .summary_record(Some(grand_total_pallets), leather, None),
            };
            self.sink.write_grand_total(&sheet, &total)?;
        }
        info!(sheet = %sheet, tables = keys.len(), pallets = grand_total_pallets, "multi-table sheet done");
        Ok(())
    }

    fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialFailure,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetFailure {
    pub sheet: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetDiagnostic {
    pub sheet: String,
    #[serde(flatten)]
    pub diagnostic: Diagnostic,
}

/// Outcome of [`run_sheets`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub sheets_processed: Vec<String>,
    pub sheets_failed: Vec<SheetFailure>,
    pub diagnostics: Vec<SheetDiagnostic>,
}

impl RunReport {
    fn finish(
        sheets_processed: Vec<String>,
        sheets_failed: Vec<SheetFailure>,
        diagnostics: Vec<SheetDiagnostic>,
    ) -> Self {
        let status = match (sheets_processed.is_empty(), sheets_failed.is_empty()) {
            (_, true) => RunStatus::Success,
            (true, false) => RunStatus::Failed,
            (false, false) => RunStatus::PartialFailure,
        };
        Self {
            status,
            sheets_processed,
            sheets_failed,
            diagnostics,
        }
    }
}

fn process_sheet(
    config: &ConfigBundle,
    sheet: &str,
    invoice: &InvoiceData,
    options: &RunOptions,
    sink: &mut dyn SheetSink,
) -> Result<Vec<Diagnostic>, BindError> {
    let resolver = ConfigBundleResolver::new(config, sheet, invoice, options);
    let mut processor: Box<dyn SheetProcessor + '_> = match resolver.data_source_kind()? {
        DataSourceKind::ProcessedTablesMulti => {
            Box::new(MultiTableProcessor::new(&resolver, sink))
        }
        _ => Box::new(SingleTableProcessor::new(&resolver, sink)),
    };
    processor.process()?;
    Ok(processor.diagnostics().to_vec())
}

/// Process every configured sheet in order. A failing sheet is recorded and
/// the run moves on to the next one.
pub fn run_sheets(
    config: &ConfigBundle,
    invoice: &InvoiceData,
    options: &RunOptions,
    sink: &mut dyn SheetSink,
) -> RunReport {
    let mut processed = Vec::new();
    let mut failed = Vec::new();
    let mut diagnostics = Vec::new();
    for sheet in config.sheets_to_process() {
        match process_sheet(config, sheet, invoice, options, sink) {
            Ok(sheet_diagnostics) => {
                diagnostics.extend(sheet_diagnostics.into_iter().map(|diagnostic| {
                    SheetDiagnostic {
                        sheet: sheet.clone(),
                        diagnostic,
                    }
                }));
                processed.push(sheet.clone());
            }
            Err(err) => {
                error!(sheet = %sheet, error = %err, "sheet failed");
                failed.push(SheetFailure {
                    sheet: sheet.clone(),
                    error: err.to_string(),
                });
            }
        }
    }
    let report = RunReport::finish(processed, failed, diagnostics);
    info!(
        status = ?report.status,
        processed = report.sheets_processed.len(),
        failed = report.sheets_failed.len(),
        "run finished"
    );
    report
}

/// What a [`RecordingSink`] saw, in call order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SinkEvent {
    Header {
        sheet: String,
        table_key: Option<String>,
        columns: usize,
        first_data_row: u32,
    },
    Table {
        sheet: String,
        table_key: Option<String>,
        index: usize,
        is_last_table: bool,
        rows: Vec<Map<String, JsonValue>>,
        summary: SummaryRecord,
    },
    GrandTotal {
        sheet: String,
        total: GrandTotal,
    },
}

/// Sink that keeps a JSON-friendly record of everything written to it.
/// Rows are keyed by column letter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordingSink {
    pub events: Vec<SinkEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self, sheet: &str) -> impl Iterator<Item = &SinkEvent> {
        self.events.iter().filter(move |event| {
            matches!(event, SinkEvent::Table { sheet: name, .. } if name == sheet)
        })
    }
}

impl SheetSink for RecordingSink {
    fn write_header(
        &mut self,
        sheet: &str,
        table_key: Option<&str>,
        _style: &StyleBundle<'_>,
        _context: &ContextBundle<'_>,
        layout: &LayoutWithData<'_>,
    ) -> Result<(), BindError> {
        self.events.push(SinkEvent::Header {
            sheet: sheet.to_string(),
            table_key: table_key.map(str::to_string),
            columns: layout.header_info.num_columns,
            first_data_row: layout.header_info.second_row_index + 1,
        });
        Ok(())
    }

    fn write_table(&mut self, sheet: &str, table: &TableOutput<'_>) -> Result<(), BindError> {
        let rows = table
            .resolution
            .data_rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|(col, value)| {
                        Ok((
                            column_letters(*col as u32),
                            serde_json::to_value(value)?,
                        ))
                    })
                    .collect::<Result<Map<_, _>, serde_json::Error>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.events.push(SinkEvent::Table {
            sheet: sheet.to_string(),
            table_key: table.table_key.map(str::to_string),
            index: table.index,
            is_last_table: table.is_last_table,
            rows,
            summary: table.summary.clone(),
        });
        Ok(())
    }

    fn write_grand_total(&mut self, sheet: &str, total: &GrandTotal) -> Result<(), BindError> {
        self.events.push(SinkEvent::GrandTotal {
            sheet: sheet.to_string(),
            total: total.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pallet_total_beats_row_counts() {
        let mut resolution = TableResolution {
            pallet_counts: vec![2, 3],
            ..TableResolution::default()
        };
        assert_eq!(table_pallets(&resolution), 5);

        resolution.pallet_summary_total = Some(json!("4"));
        assert_eq!(table_pallets(&resolution), 4);

        resolution.pallet_summary_total = Some(json!("n/a"));
        assert_eq!(table_pallets(&resolution), 5);
    }

    #[test]
    fn report_status_reflects_failures() {
        let failure = || SheetFailure {
            sheet: "Contract".into(),
            error: "boom".into(),
        };
        assert_eq!(
            RunReport::finish(vec!["Invoice".into()], vec![], vec![]).status,
            RunStatus::Success
        );
        assert_eq!(
            RunReport::finish(vec!["Invoice".into()], vec![failure()], vec![]).status,
            RunStatus::PartialFailure
        );
        assert_eq!(
            RunReport::finish(vec![], vec![failure()], vec![]).status,
            RunStatus::Failed
        );
    }

    #[test]
    fn sheet_diagnostics_serialize_flat() {
        let diagnostic = SheetDiagnostic {
            sheet: "Packing list".into(),
            diagnostic: Diagnostic::TableKeyNotFound {
                table_key: "9".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&diagnostic).unwrap(),
            json!({ "sheet": "Packing list", "kind": "table_key_not_found", "table_key": "9" })
        );
    }
}
