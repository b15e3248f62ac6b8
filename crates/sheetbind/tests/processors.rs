use serde_json::json;
use sheetbind::{
    BindError, CellValue, ConfigBundleResolver, ContextBundle, Diagnostic, GrandTotal,
    InvoiceData, LayoutWithData, ModeFlags, MultiTableProcessor, RecordingSink, RunOptions,
    RunStatus, SheetProcessor, SheetSink, SingleTableProcessor, SinkEvent, StyleBundle,
    TableOutput, WeightSummary, run_sheets,
};
use sheetbind_spec::ConfigBundle;

fn config() -> ConfigBundle {
    ConfigBundle::load("tests/fixtures/config.json").unwrap()
}

fn invoice() -> InvoiceData {
    InvoiceData::load("tests/fixtures/invoice.json").unwrap()
}

#[test]
fn multi_table_sheet_renders_tables_in_key_order() {
    let config = config();
    let invoice = invoice();
    let options = RunOptions::default();
    let resolver = ConfigBundleResolver::new(&config, "Packing list", &invoice, &options);
    let mut sink = RecordingSink::new();

    MultiTableProcessor::new(&resolver, &mut sink).process().unwrap();

    let tables: Vec<_> = sink.tables("Packing list").collect();
    assert_eq!(tables.len(), 2);
    let SinkEvent::Table {
        table_key,
        is_last_table,
        rows,
        summary,
        ..
    } = tables[0]
    else {
        unreachable!()
    };
    assert_eq!(table_key.as_deref(), Some("1"));
    assert!(!is_last_table);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["B"], json!("PO-1"));
    assert_eq!(rows[1]["D"], json!("LEATHER"));
    assert_eq!(summary.total_pallets, 3);
    assert_eq!(summary.weight_summary, WeightSummary { net: 38.0, gross: 42.0 });

    let SinkEvent::Table {
        table_key,
        is_last_table,
        summary,
        ..
    } = tables[1]
    else {
        unreachable!()
    };
    assert_eq!(table_key.as_deref(), Some("2"));
    assert!(is_last_table);
    assert_eq!(summary.total_pallets, 1);

    let Some(SinkEvent::GrandTotal { total, .. }) = sink.events.last() else {
        panic!("expected a grand total, got {:?}", sink.events.last());
    };
    assert_eq!(total.tables, 2);
    assert!(total.dynamic_desc_used);
    assert_eq!(total.summary.total_pallets, 4);
    assert_eq!(total.summary.weight_summary, WeightSummary { net: 50.5, gross: 56.0 });
    assert_eq!(
        total.summary.leather_summary,
        Some(json!({
            "COW": { "col_qty_sf": 160.5 },
            "BUFFALO": { "col_qty_pcs": 3.0 }
        }))
    );
}

#[test]
fn single_table_gets_no_grand_total() {
    let config = config();
    let invoice = InvoiceData::from_value(json!({
        "processed_tables_data": {
            "1": { "col_po": ["PO-1"], "pallet_count": [2] }
        }
    }))
    .unwrap();
    let options = RunOptions::default();
    let resolver = ConfigBundleResolver::new(&config, "Packing list", &invoice, &options);
    let mut sink = RecordingSink::new();

    MultiTableProcessor::new(&resolver, &mut sink).process().unwrap();

    assert_eq!(sink.tables("Packing list").count(), 1);
    assert!(
        !sink
            .events
            .iter()
            .any(|event| matches!(event, SinkEvent::GrandTotal { .. }))
    );
}

#[test]
fn single_table_processor_uses_run_pallets() {
    let config = config();
    let invoice = invoice();
    let options = RunOptions::default().with_pallets(9);
    let resolver = ConfigBundleResolver::new(&config, "Invoice", &invoice, &options);
    let mut sink = RecordingSink::new();

    let mut processor = SingleTableProcessor::new(&resolver, &mut sink);
    processor.process().unwrap();
    assert_eq!(processor.diagnostics().len(), 1);

    let SinkEvent::Header {
        table_key,
        columns,
        first_data_row,
        ..
    } = &sink.events[0]
    else {
        panic!("expected a header first");
    };
    assert_eq!(*table_key, None);
    assert_eq!(*columns, 8);
    assert_eq!(*first_data_row, 23);

    let SinkEvent::Table { rows, summary, .. } = &sink.events[1] else {
        panic!("expected a table after the header");
    };
    assert_eq!(rows[0]["A"], json!("VENDOR#:"));
    assert_eq!(rows[0]["G"], json!(1.5));
    assert_eq!(summary.total_pallets, 9);
    assert_eq!(summary.weight_summary, WeightSummary { net: 50.5, gross: 56.0 });
}

#[test]
fn run_reports_every_sheet() {
    let config = config();
    let invoice = invoice();
    let options = RunOptions::new(ModeFlags::daf());
    let mut sink = RecordingSink::new();

    let report = run_sheets(&config, &invoice, &options, &mut sink);

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.sheets_processed, ["Invoice", "Contract", "Packing list"]);
    assert!(report.sheets_failed.is_empty());
    let coercions: Vec<_> = report
        .diagnostics
        .iter()
        .filter(|d| matches!(d.diagnostic, Diagnostic::Coercion { .. }))
        .map(|d| d.sheet.as_str())
        .collect();
    assert_eq!(coercions, ["Invoice", "Contract"]);
}

#[test]
fn failed_sheet_does_not_stop_the_run() {
    let config = ConfigBundle::from_json_str(
        &json!({
            "_meta": { "config_version": "2.1" },
            "processing": {
                "sheets": ["Broken", "Invoice"],
                "data_sources": { "Broken": "aggregation", "Invoice": "aggregation" }
            },
            "layout_bundle": {
                "Broken": {
                    "structure": { "columns": [{ "id": "col_po", "header": "P.O" }] },
                    "data_flow": { "mappings": { "amount": { "type": "formula" } } }
                },
                "Invoice": {
                    "structure": { "columns": [{ "id": "col_po", "header": "P.O" }] },
                    "data_flow": { "mappings": { "po": { "column": "col_po", "source_key": 0 } } }
                }
            }
        })
        .to_string(),
    )
    .unwrap();
    let invoice = invoice();
    let options = RunOptions::default();
    let mut sink = RecordingSink::new();

    let report = run_sheets(&config, &invoice, &options, &mut sink);

    assert_eq!(report.status, RunStatus::PartialFailure);
    assert_eq!(report.sheets_processed, ["Invoice"]);
    assert_eq!(report.sheets_failed.len(), 1);
    assert_eq!(report.sheets_failed[0].sheet, "Broken");
    assert!(report.sheets_failed[0].error.contains("formula_template"));
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["status"], json!("partial_failure"));
}

/// Counts calls and refuses the second table.
#[derive(Default)]
struct FlakySink {
    headers: usize,
    tables: usize,
}

impl SheetSink for FlakySink {
    fn write_header(
        &mut self,
        _sheet: &str,
        _table_key: Option<&str>,
        _style: &StyleBundle<'_>,
        _context: &ContextBundle<'_>,
        _layout: &LayoutWithData<'_>,
    ) -> Result<(), BindError> {
        self.headers += 1;
        Ok(())
    }

    fn write_table(&mut self, sheet: &str, table: &TableOutput<'_>) -> Result<(), BindError> {
        if table.index > 0 {
            return Err(BindError::Sink {
                sheet: sheet.to_string(),
                message: "out of rows".into(),
            });
        }
        assert_eq!(table.resolution.data_rows[0].get(&2), Some(&CellValue::from("PO-1")));
        self.tables += 1;
        Ok(())
    }

    fn write_grand_total(&mut self, _sheet: &str, _total: &GrandTotal) -> Result<(), BindError> {
        unreachable!("grand total after a failed table")
    }
}

#[test]
fn sink_errors_fail_the_sheet() {
    let config = config();
    let invoice = invoice();
    let options = RunOptions::default();
    let resolver = ConfigBundleResolver::new(&config, "Packing list", &invoice, &options);
    let mut sink = FlakySink::default();

    let err = MultiTableProcessor::new(&resolver, &mut sink)
        .process()
        .unwrap_err();
    assert!(matches!(err, BindError::Sink { ref message, .. } if message == "out of rows"));
    assert_eq!(sink.headers, 2);
    assert_eq!(sink.tables, 1);
}
