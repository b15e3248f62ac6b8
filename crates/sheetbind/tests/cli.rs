use assert_cmd::Command;
use predicates::prelude::*;

const CONFIG: &str = "tests/fixtures/config.json";
const INVOICE: &str = "tests/fixtures/invoice.json";

fn sheetbind() -> Command {
    Command::cargo_bin("sheetbind").unwrap()
}

fn json_stdout(args: &[&str]) -> serde_json::Value {
    let output = sheetbind()
        .args(["--config", CONFIG, "--invoice", INVOICE])
        .args(args)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn resolve_prints_bundles_and_rows() {
    let value = json_stdout(&["resolve", "Packing list", "--table", "2"]);
    assert_eq!(value["bundles"]["data"]["table_key"], "2");
    assert_eq!(value["bundles"]["data"]["data_source_type"], "processed_tables_multi");
    assert_eq!(value["bundles"]["context"]["sheet_name"], "Packing list");
    assert_eq!(value["table"]["num_data_rows"], 1);
    assert_eq!(value["table"]["pallet_counts"], serde_json::json!([1]));
}

#[test]
fn daf_flag_filters_columns() {
    let standard = json_stdout(&["resolve", "Packing list"]);
    let daf = json_stdout(&["--daf", "resolve", "Packing list"]);
    assert_eq!(standard["bundles"]["data"]["header_info"]["num_columns"], 9);
    assert_eq!(daf["bundles"]["data"]["header_info"]["num_columns"], 7);
    assert_eq!(daf["bundles"]["context"]["modes"]["daf"], true);
}

#[test]
fn metadata_falls_back_to_first_table() {
    let value = json_stdout(&["metadata"]);
    assert_eq!(value["resolved"]["invoice_no"], "INV-2025-001");
    assert_eq!(value["resolved"]["reference"], "REF-77");
    assert_eq!(value["hidden_sheet"]["sheet_name"], "DeepSheet");
}

#[test]
fn run_prints_report_and_events() {
    let value = json_stdout(&["run", "--events"]);
    assert_eq!(value["report"]["status"], "success");
    assert_eq!(
        value["report"]["sheets_processed"],
        serde_json::json!(["Invoice", "Contract", "Packing list"])
    );
    let events = value["events"].as_array().unwrap();
    assert!(events.iter().any(|event| event["event"] == "grand_total"));
}

#[test]
fn unknown_sheet_fails() {
    sheetbind()
        .args(["--config", CONFIG, "--invoice", INVOICE, "resolve", "Contract B"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Contract B"));
}

#[test]
fn missing_invoice_flag_is_reported() {
    sheetbind()
        .args(["--config", CONFIG, "metadata"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--invoice is required"));
}
