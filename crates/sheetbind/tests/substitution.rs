use chrono::NaiveDate;
use sheetbind::substitution::{
    MemorySheet, MemoryWorkbook, TextSubstitutionEngine, Window, run_standard_tasks,
};
use sheetbind::{CellValue, DATE_NUMBER_FORMAT, InvoiceData, MetadataFallbackResolver, ModeFlags};
use sheetbind_spec::ConfigBundle;

fn invoice() -> InvoiceData {
    InvoiceData::load("tests/fixtures/invoice.json").unwrap()
}

fn template() -> MemoryWorkbook {
    MemoryWorkbook::new(vec![
        MemorySheet::new("Invoice")
            .with_cell(3, 9, "JFINV")
            .with_cell(4, 9, "JFTIME")
            .with_cell(6, 2, "[[CUSTOMER_NAME]]")
            .with_cell(8, 2, "Port of loading: [[PORT]]")
            .with_cell(12, 2, "FCA: BAVET,SVAYRIENG")
            .with_cell(30, 2, "BINH DUONG")
            .with_cell(31, 2, "PAYMENT CIF"),
    ])
}

#[test]
fn bundle_rules_resolve_against_invoice() {
    let config = ConfigBundle::load("tests/fixtures/config.json").unwrap();
    let rules = config.replacement_rules().unwrap();
    let invoice = invoice();
    let mut book = template();

    let log = TextSubstitutionEngine::new(&rules)
        .with_invoice(&invoice)
        .run(&mut book, Window::HEADER);

    assert_eq!(book.value("Invoice", 3, 9), Some(&CellValue::from("INV-2025-001")));
    assert_eq!(
        book.value("Invoice", 8, 2),
        Some(&CellValue::from("Port of loading: HO CHI MINH"))
    );
    assert_eq!(book.value("Invoice", 4, 9), Some(&CellValue::from("JFTIME")));
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].cell, "I3");
    assert_eq!(log[0].original, "JFINV");
}

#[test]
fn standard_tasks_fill_header_then_daf_area() {
    let invoice = invoice();
    let mut book = template();

    let log = run_standard_tasks(&mut book, &invoice, ModeFlags::daf());

    assert_eq!(book.value("Invoice", 3, 9), Some(&CellValue::from("INV-2025-001")));
    assert_eq!(
        book.value("Invoice", 4, 9),
        Some(&CellValue::Date(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()))
    );
    assert_eq!(
        book.sheet("Invoice").unwrap().number_formats.get(&(4, 9)).map(String::as_str),
        Some(DATE_NUMBER_FORMAT)
    );
    assert_eq!(book.value("Invoice", 6, 2), Some(&CellValue::from("ACME LEATHER")));
    assert_eq!(book.value("Invoice", 12, 2), Some(&CellValue::from("DAF: BAVET")));
    assert_eq!(book.value("Invoice", 30, 2), Some(&CellValue::from("BAVET")));
    assert_eq!(book.value("Invoice", 31, 2), Some(&CellValue::from("PAYMENT DAF")));
    assert_eq!(
        book.value("Invoice", 8, 2),
        Some(&CellValue::from("Port of loading: [[PORT]]"))
    );
    assert_eq!(log.len(), 6);
}

#[test]
fn standard_mode_leaves_place_names() {
    let invoice = invoice();
    let mut book = template();

    let log = run_standard_tasks(&mut book, &invoice, ModeFlags::STANDARD);

    assert_eq!(log.len(), 3);
    assert_eq!(book.value("Invoice", 30, 2), Some(&CellValue::from("BINH DUONG")));
    assert_eq!(
        book.value("Invoice", 12, 2),
        Some(&CellValue::from("FCA: BAVET,SVAYRIENG"))
    );
}

#[test]
fn hidden_metadata_sheet_is_not_rewritten() {
    let invoice = invoice();
    let hidden = MetadataFallbackResolver::new(&invoice).side_channel();
    assert_eq!(hidden.values[0], "INV-2025-001");

    let mut sheet = MemorySheet::new(hidden.sheet_name).hidden();
    for (col, (label, value)) in hidden.labels.iter().zip(&hidden.values).enumerate() {
        let col = col as u32 + 1;
        sheet = sheet.with_cell(1, col, *label).with_cell(2, col, value.as_str());
    }
    sheet = sheet.with_cell(3, 1, "JFINV");
    let mut book = MemoryWorkbook::new(vec![sheet]);

    let log = run_standard_tasks(&mut book, &invoice, ModeFlags::daf());
    assert!(log.is_empty());
    assert_eq!(book.value("DeepSheet", 3, 1), Some(&CellValue::from("JFINV")));
    assert_eq!(book.value("DeepSheet", 2, 3), Some(&CellValue::from("15/03/2025")));
}
