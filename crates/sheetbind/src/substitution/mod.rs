//! Bounded find-and-replace over rendered sheet text.
//!
//! Pass one walks every visible sheet inside the window. Each text cell is
//! matched against the non-formula rules and the first match wins; cells
//! whose trimmed text equals some rule's `find` are remembered as
//! placeholder locations. Pass two writes formula rules, replacing every
//! `{TOKEN}` of a template with the A1 address where `TOKEN` was found.

mod grid;
mod rules;

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sheetbind_spec::{MatchMode, ReplacementRule};
use tracing::{debug, info, warn};

use crate::invoice::InvoiceData;
use crate::options::ModeFlags;
use crate::value::{CellValue, DATE_NUMBER_FORMAT};

pub use grid::{MemorySheet, MemoryWorkbook, TextGrid, a1, column_letters};
pub use rules::{build_replacement_rules, daf_rules, standard_rules};

static FORMULA_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]+)\}").expect("formula token regex"));

/// Rows `1..=max_row` and columns `1..=max_col` of each sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub max_row: u32,
    pub max_col: u32,
}

impl Window {
    /// Header block of invoice templates (A1:N14).
    pub const HEADER: Window = Window {
        max_row: 14,
        max_col: 14,
    };
    /// Area scanned for DAF place-name rewrites.
    pub const DAF: Window = Window {
        max_row: 200,
        max_col: 16,
    };
}

/// One applied replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplacementLog {
    pub sheet: String,
    pub cell: String,
    pub original: String,
    pub new: String,
    pub term: String,
}

pub struct TextSubstitutionEngine<'a> {
    rules: &'a [ReplacementRule],
    invoice: Option<&'a InvoiceData>,
}

impl<'a> TextSubstitutionEngine<'a> {
    pub fn new(rules: &'a [ReplacementRule]) -> Self {
        Self {
            rules,
            invoice: None,
        }
    }

    /// Dataset for `data_path` rules; without one those rules never match.
    pub fn with_invoice(mut self, invoice: &'a InvoiceData) -> Self {
        self.invoice = Some(invoice);
        self
    }

    pub fn run<G: TextGrid + ?Sized>(&self, grid: &mut G, window: Window) -> Vec<ReplacementLog> {
        info!(
            rules = self.rules.len(),
            max_row = window.max_row,
            max_col = window.max_col,
            "running text substitution"
        );
        let mut log = Vec::new();
        for sheet in grid.sheet_names() {
            if !grid.is_visible(&sheet) {
                debug!(sheet = %sheet, "skipping hidden sheet");
                continue;
            }
            let locations = self.replace_values(grid, &sheet, window, &mut log);
            self.place_formulas(grid, &sheet, &locations, &mut log);
        }
        log
    }

    fn replace_values<G: TextGrid + ?Sized>(
        &self,
        grid: &mut G,
        sheet: &str,
        window: Window,
        log: &mut Vec<ReplacementLog>,
    ) -> HashMap<String, String> {
        let mut locations = HashMap::new();
        for row in 1..=window.max_row {
            for col in 1..=window.max_col {
                let Some(CellValue::Text(text)) = grid.read_cell(sheet, row, col) else {
                    continue;
                };
                if text.is_empty() {
                    continue;
                }
                let trimmed = text.trim();
                if let Some(rule) = self.rules.iter().find(|rule| rule.find == trimmed) {
                    locations.insert(rule.find.clone(), a1(row, col));
                }

                let Some((rule, content)) = self.first_match(&text) else {
                    continue;
                };
                let Some(content) = content else {
                    continue;
                };
                let new_value = if rule.is_date {
                    match content.to_date() {
                        Some(date) => {
                            grid.set_number_format(sheet, row, col, DATE_NUMBER_FORMAT);
                            date
                        }
                        None => content,
                    }
                } else {
                    match rule.match_mode {
                        MatchMode::Exact => content,
                        MatchMode::Substring => {
                            CellValue::Text(text.replace(&rule.find, &content.to_string()))
                        }
                    }
                };
                debug!(sheet, cell = %a1(row, col), term = %rule.find, "replaced");
                log.push(ReplacementLog {
                    sheet: sheet.to_string(),
                    cell: a1(row, col),
                    original: text.clone(),
                    new: new_value.to_string(),
                    term: rule.find.clone(),
                });
                grid.write_cell(sheet, row, col, new_value);
            }
        }
        locations
    }

    /// First non-formula rule matching `text`, with its replacement. `None`
    /// content means the rule matched but has nothing to write.
    fn first_match(&self, text: &str) -> Option<(&'a ReplacementRule, Option<CellValue>)> {
        self.rules
            .iter()
            .filter(|rule| !rule.is_formula() && !rule.find.is_empty())
            .filter(|rule| rule.data_path.is_none() || self.invoice.is_some())
            .find(|rule| match rule.match_mode {
                MatchMode::Exact => text.trim() == rule.find,
                MatchMode::Substring => text.contains(&rule.find),
            })
            .map(|rule| (rule, self.content_for(rule)))
    }

    fn content_for(&self, rule: &ReplacementRule) -> Option<CellValue> {
        if let (Some(path), Some(invoice)) = (&rule.data_path, self.invoice) {
            let found = invoice.resolve_path(path).filter(|value| !value.is_null());
            let found = found.or_else(|| {
                let fallback = rule.fallback_path.as_ref()?;
                warn!(term = %rule.find, "primary data path empty, using fallback");
                invoice.resolve_path(fallback).filter(|value| !value.is_null())
            });
            return Some(found.map(CellValue::from_json).unwrap_or_else(|| {
                warn!(term = %rule.find, "no data for placeholder, writing empty text");
                CellValue::Text(String::new())
            }));
        }
        rule.replace.clone().map(CellValue::Text)
    }

    fn place_formulas<G: TextGrid + ?Sized>(
        &self,
        grid: &mut G,
        sheet: &str,
        locations: &HashMap<String, String>,
        log: &mut Vec<ReplacementLog>,
    ) {
        for rule in self.rules.iter().filter(|rule| rule.is_formula()) {
            let Some(template) = &rule.formula_template else {
                continue;
            };
            let Some(target) = locations.get(&rule.find) else {
                warn!(sheet, term = %rule.find, "formula placeholder not found, skipping");
                continue;
            };
            let mut formula = template.clone();
            let mut complete = true;
            for caps in FORMULA_TOKEN.captures_iter(template) {
                let token = &caps[1];
                match locations.get(token) {
                    Some(address) => formula = formula.replace(&caps[0], address),
                    None => {
                        warn!(sheet, term = %rule.find, dependency = token, "formula dependency not found");
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                continue;
            }
            let Some((row, col)) = parse_a1(target) else {
                continue;
            };
            let formula = format!("={formula}");
            log.push(ReplacementLog {
                sheet: sheet.to_string(),
                cell: target.clone(),
                original: rule.find.clone(),
                new: formula.clone(),
                term: rule.find.clone(),
            });
            grid.write_cell(sheet, row, col, CellValue::Text(formula));
        }
    }
}

fn parse_a1(address: &str) -> Option<(u32, u32)> {
    let split = address.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = address.split_at(split);
    if letters.is_empty() {
        return None;
    }
    let col = letters
        .bytes()
        .try_fold(0u32, |acc, b| Some(acc * 26 + u32::from(b.checked_sub(b'A')?) + 1))?;
    Some((digits.parse().ok()?, col))
}

/// The header placeholder task and, in DAF mode, the DAF rewrite task.
pub fn run_standard_tasks<G: TextGrid + ?Sized>(
    grid: &mut G,
    invoice: &InvoiceData,
    modes: ModeFlags,
) -> Vec<ReplacementLog> {
    let header_rules = standard_rules();
    let mut log = TextSubstitutionEngine::new(&header_rules)
        .with_invoice(invoice)
        .run(grid, Window::HEADER);
    if modes.daf {
        let daf = daf_rules();
        log.extend(TextSubstitutionEngine::new(&daf).run(grid, Window::DAF));
    }
    log
}
