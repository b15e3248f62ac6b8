use std::collections::BTreeMap;

use crate::value::CellValue;

/// Cell access the substitution engine needs from a rendered document.
/// Rows and columns are 1-based.
pub trait TextGrid {
    fn sheet_names(&self) -> Vec<String>;

    /// Hidden sheets are never scanned.
    fn is_visible(&self, sheet: &str) -> bool;

    fn read_cell(&self, sheet: &str, row: u32, col: u32) -> Option<CellValue>;

    fn write_cell(&mut self, sheet: &str, row: u32, col: u32, value: CellValue);

    fn set_number_format(&mut self, sheet: &str, row: u32, col: u32, format: &str);
}

/// Column number (1-based) to letters: 1 → `A`, 28 → `AB`.
pub fn column_letters(col: u32) -> String {
    let mut n = col.max(1) - 1;
    let mut buf = Vec::new();
    loop {
        buf.push(b'A' + (n % 26) as u8);
        n /= 26;
        if n == 0 {
            break;
        }
        n -= 1;
    }
    buf.reverse();
    buf.into_iter().map(char::from).collect()
}

pub fn a1(row: u32, col: u32) -> String {
    format!("{}{row}", column_letters(col))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemorySheet {
    pub name: String,
    pub visible: bool,
    pub cells: BTreeMap<(u32, u32), CellValue>,
    pub number_formats: BTreeMap<(u32, u32), String>,
}

impl MemorySheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visible: true,
            ..Self::default()
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn with_cell(mut self, row: u32, col: u32, value: impl Into<CellValue>) -> Self {
        self.cells.insert((row, col), value.into());
        self
    }
}

/// In-memory workbook, for tests and for callers that render afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryWorkbook {
    pub sheets: Vec<MemorySheet>,
}

impl MemoryWorkbook {
    pub fn new(sheets: Vec<MemorySheet>) -> Self {
        Self { sheets }
    }

    pub fn sheet(&self, name: &str) -> Option<&MemorySheet> {
        self.sheets.iter().find(|sheet| sheet.name == name)
    }

    fn sheet_mut(&mut self, name: &str) -> Option<&mut MemorySheet> {
        self.sheets.iter_mut().find(|sheet| sheet.name == name)
    }

    pub fn value(&self, sheet: &str, row: u32, col: u32) -> Option<&CellValue> {
        self.sheet(sheet)?.cells.get(&(row, col))
    }
}

impl TextGrid for MemoryWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|sheet| sheet.name.clone()).collect()
    }

    fn is_visible(&self, sheet: &str) -> bool {
        self.sheet(sheet).is_some_and(|sheet| sheet.visible)
    }

    fn read_cell(&self, sheet: &str, row: u32, col: u32) -> Option<CellValue> {
        self.value(sheet, row, col).cloned()
    }

    fn write_cell(&mut self, sheet: &str, row: u32, col: u32, value: CellValue) {
        if let Some(sheet) = self.sheet_mut(sheet) {
            sheet.cells.insert((row, col), value);
        }
    }

    fn set_number_format(&mut self, sheet: &str, row: u32, col: u32, format: &str) {
        if let Some(sheet) = self.sheet_mut(sheet) {
            sheet.number_formats.insert((row, col), format.to_string());
        }
    }
}
