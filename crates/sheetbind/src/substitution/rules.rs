use sheetbind_spec::{PathSegment, ReplacementRule, data_path};

use crate::options::ModeFlags;

fn table_fallback(column: &str) -> Vec<PathSegment> {
    let mut path = data_path(["processed_tables_data", "1", column]);
    path.push(PathSegment::Index(0));
    path
}

/// Invoice number, date, reference and customer placeholders of a header.
pub fn standard_rules() -> Vec<ReplacementRule> {
    vec![
        ReplacementRule::from_data("JFINV", data_path(["invoice_info", "inv_no"]))
            .with_fallback(table_fallback("col_inv_no"))
            .exact(),
        ReplacementRule::from_data("JFTIME", data_path(["invoice_info", "inv_date"]))
            .with_fallback(table_fallback("col_inv_date"))
            .as_date()
            .exact(),
        ReplacementRule::from_data("JFREF", data_path(["invoice_info", "inv_ref"]))
            .with_fallback(table_fallback("col_inv_ref"))
            .exact(),
        ReplacementRule::from_data("[[CUSTOMER_NAME]]", data_path(["customer_info", "name"]))
            .exact(),
        ReplacementRule::from_data(
            "[[CUSTOMER_ADDRESS]]",
            data_path(["customer_info", "address"]),
        )
        .exact(),
    ]
}

const DAF_EXACT: [(&str, &str); 12] = [
    ("BINH PHUOC", "BAVET"),
    ("BAVET, SVAY RIENG", "BAVET"),
    ("BAVET,SVAY RIENG", "BAVET"),
    ("BAVET, SVAYRIENG", "BAVET"),
    ("BINH DUONG", "BAVET"),
    ("FCA  BAVET,SVAYRIENG", "DAF BAVET"),
    ("FCA: BAVET,SVAYRIENG", "DAF: BAVET"),
    ("DAF  BAVET,SVAYRIENG", "DAF BAVET"),
    ("DAF: BAVET,SVAYRIENG", "DAF: BAVET"),
    ("SVAY RIENG", "BAVET"),
    ("PORT KLANG", "BAVET"),
    ("HCM", "BAVET"),
];

const DAF_INCOTERMS: [&str; 3] = ["DAP", "FCA", "CIF"];

/// Place-name rewrites and incoterm substitutions for DAF documents.
pub fn daf_rules() -> Vec<ReplacementRule> {
    DAF_EXACT
        .iter()
        .map(|(find, replace)| ReplacementRule::literal(*find, *replace).exact())
        .chain(
            DAF_INCOTERMS
                .iter()
                .map(|term| ReplacementRule::literal(*term, "DAF")),
        )
        .collect()
}

/// Standard rules, followed by the DAF rules when DAF mode is on.
pub fn build_replacement_rules(modes: ModeFlags) -> Vec<ReplacementRule> {
    let mut rules = standard_rules();
    if modes.daf {
        rules.extend(daf_rules());
    }
    rules
}
