use std::fmt::{self, Write as _};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use sheetbind_spec::DataSourceKind;
use tracing::{debug, warn};

use crate::error::{Diagnostic, record};
use crate::invoice::InvoiceData;
use crate::value::CellValue;

/// Top-level keys of a scoped source that carry summaries, not records.
pub const SUMMARY_KEYS: [&str; 4] = [
    "weight_summary",
    "leather_summary",
    "pallet_summary_total",
    "footer_data",
];

static DECIMAL_WRAPPER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"Decimal\(\s*(?:'([^']*)'|"([^"]*)")\s*\)"#).expect("decimal wrapper regex")
});

/// One element of a recovered tuple key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KeyAtom {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    None,
    Tuple(Vec<KeyAtom>),
}

impl KeyAtom {
    pub fn to_cell_value(&self) -> CellValue {
        match self {
            KeyAtom::Int(i) => CellValue::Int(*i),
            KeyAtom::Float(f) => CellValue::Number(*f),
            KeyAtom::Text(s) => CellValue::Text(s.clone()),
            KeyAtom::Bool(b) => CellValue::Boolean(*b),
            KeyAtom::None => CellValue::Empty,
            KeyAtom::Tuple(items) => CellValue::Text(encode_tuple(items)),
        }
    }

    fn write_literal(&self, out: &mut String) {
        match self {
            KeyAtom::Int(i) => {
                let _ = write!(out, "{i}");
            }
            KeyAtom::Float(f) if f.fract() == 0.0 && f.is_finite() => {
                let _ = write!(out, "{f:.1}");
            }
            KeyAtom::Float(f) => {
                let _ = write!(out, "{f}");
            }
            KeyAtom::Text(s) => {
                out.push('\'');
                for ch in s.chars() {
                    match ch {
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        other => out.push(other),
                    }
                }
                out.push('\'');
            }
            KeyAtom::Bool(true) => out.push_str("True"),
            KeyAtom::Bool(false) => out.push_str("False"),
            KeyAtom::None => out.push_str("None"),
            KeyAtom::Tuple(items) => out.push_str(&encode_tuple(items)),
        }
    }
}

/// Grouping identity of an aggregation record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecordKey {
    Text(String),
    Tuple(Vec<KeyAtom>),
}

impl RecordKey {
    /// Element `idx` of a tuple key.
    pub fn atom(&self, idx: usize) -> Option<&KeyAtom> {
        match self {
            RecordKey::Tuple(items) => items.get(idx),
            RecordKey::Text(_) => None,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Text(s) => f.write_str(s),
            RecordKey::Tuple(items) => f.write_str(&encode_tuple(items)),
        }
    }
}

/// Render a tuple the way it looks after a round trip through text, e.g.
/// `('PO-1', 'ITEM-9', 1.5)` or `(7,)`.
pub fn encode_tuple(items: &[KeyAtom]) -> String {
    let mut out = String::from("(");
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        item.write_literal(&mut out);
    }
    if items.len() == 1 {
        out.push(',');
    }
    out.push(')');
    out
}

/// Turn a stringified tuple key back into a tuple. `Decimal('…')` wrappers
/// around numbers are unwrapped first. Keys not shaped like `( … )` stay text.
pub fn recover_key(raw: &str) -> Result<RecordKey, String> {
    if !(raw.starts_with('(') && raw.ends_with(')')) {
        return Ok(RecordKey::Text(raw.to_string()));
    }
    let cleaned = DECIMAL_WRAPPER.replace_all(raw, |caps: &regex::Captures<'_>| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    });
    let mut parser = LiteralParser::new(&cleaned);
    let atom = parser.parse_expr()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(format!("unexpected trailing input at offset {}", parser.pos));
    }
    match atom {
        KeyAtom::Tuple(items) => Ok(RecordKey::Tuple(items)),
        _ => Err("parenthesised value is not a tuple".to_string()),
    }
}

struct LiteralParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn parse_expr(&mut self) -> Result<KeyAtom, String> {
        self.skip_ws();
        match self.peek() {
            Some('(') => self.parse_tuple(),
            Some('\'' | '"') => self.parse_string(false).map(KeyAtom::Text),
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => self.parse_number(),
            Some(c) if c.is_ascii_alphabetic() => self.parse_name(),
            Some(c) => Err(format!("unexpected `{c}` at offset {}", self.pos)),
            None => Err("unexpected end of key".to_string()),
        }
    }

    fn parse_tuple(&mut self) -> Result<KeyAtom, String> {
        self.bump();
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            self.skip_ws();
            if self.peek() == Some(')') {
                self.bump();
                break;
            }
            items.push(self.parse_expr()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => trailing_comma = true,
                Some(')') => {
                    trailing_comma = false;
                    break;
                }
                Some(c) => return Err(format!("expected `,` or `)` but found `{c}`")),
                None => return Err("unterminated tuple".to_string()),
            }
        }
        if items.len() == 1 && !trailing_comma {
            return items.pop().ok_or_else(|| "empty group".to_string());
        }
        Ok(KeyAtom::Tuple(items))
    }

    /// Quoted text. `raw` keeps backslashes as written.
    fn parse_string(&mut self, raw: bool) -> Result<String, String> {
        let quote = self.bump().ok_or("unexpected end of key")?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated string".to_string()),
                Some(c) if c == quote => return Ok(out),
                Some('\\') if raw => {
                    let escaped = self.bump().ok_or("unterminated escape")?;
                    out.push('\\');
                    out.push(escaped);
                }
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c) => out.push(c),
                    None => return Err("unterminated escape".to_string()),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_number(&mut self) -> Result<KeyAtom, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E' | '_'))
        {
            self.bump();
        }
        let text: String = self.src[start..self.pos].chars().filter(|c| *c != '_').collect();
        if let Ok(i) = text.parse::<i64>() {
            return Ok(KeyAtom::Int(i));
        }
        text.parse::<f64>()
            .map(KeyAtom::Float)
            .map_err(|_| format!("invalid number `{text}`"))
    }

    fn parse_name(&mut self) -> Result<KeyAtom, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }
        let name = &self.src[start..self.pos];
        if matches!(self.peek(), Some('\'' | '"')) {
            let prefix = name.to_ascii_lowercase();
            if matches!(prefix.as_str(), "u" | "b" | "r" | "br" | "rb") {
                return self.parse_string(prefix.contains('r')).map(KeyAtom::Text);
            }
        }
        match name {
            "None" => Ok(KeyAtom::None),
            "True" => Ok(KeyAtom::Bool(true)),
            "False" => Ok(KeyAtom::Bool(false)),
            other => Err(format!("unsupported name `{other}`")),
        }
    }
}

/// Keys like "1", "2": all ASCII digits.
pub fn is_table_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_multi_table(map: &Map<String, JsonValue>) -> bool {
    !map.is_empty() && map.keys().all(|k| is_table_key(k))
}

/// Table keys in numeric order; non-numeric keys sort last in their
/// original order.
pub fn sorted_table_keys(map: &Map<String, JsonValue>) -> Vec<String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort_by_key(|k| k.parse::<u64>().ok().map_or((1, 0), |n| (0, n)));
    keys.into_iter().cloned().collect()
}

/// Pick the invoice field for `kind`, then narrow it to `table_key` when the
/// field is keyed by table number. Missing pieces degrade to an empty object.
pub fn select_data_source(
    invoice: &InvoiceData,
    kind: DataSourceKind,
    table_key: Option<&str>,
    diagnostics: &mut Vec<Diagnostic>,
) -> JsonValue {
    let field = kind.invoice_field();
    let Some(data) = invoice.get(field) else {
        record(
            diagnostics,
            Diagnostic::MissingDataSource {
                source: kind,
                field: field.to_string(),
            },
        );
        return JsonValue::Object(Map::new());
    };

    let Some(table_key) = table_key else {
        return data.clone();
    };
    match data {
        JsonValue::Object(map) if map.is_empty() || is_multi_table(map) => match map.get(table_key) {
            Some(table) => {
                debug!(table_key, "extracted table");
                table.clone()
            }
            None => {
                record(
                    diagnostics,
                    Diagnostic::TableKeyNotFound {
                        table_key: table_key.to_string(),
                    },
                );
                JsonValue::Object(Map::new())
            }
        },
        JsonValue::Object(map) if kind.is_table_based() => {
            warn!(
                %kind,
                table_key,
                keys = ?map.keys().collect::<Vec<_>>(),
                "table keys are not all numeric; using the whole source for this table"
            );
            data.clone()
        }
        other => other.clone(),
    }
}

/// One aggregation row: its grouping key (if keyed) and its fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationRecord {
    pub key: Option<RecordKey>,
    pub fields: JsonValue,
}

/// A scoped data source in row-ready form.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceData {
    /// One row per grouping key (or per list entry).
    Aggregation(Vec<AggregationRecord>),
    /// Parallel column arrays; one row per index.
    Table(Map<String, JsonValue>),
    Empty,
}

impl SourceData {
    pub fn from_scoped(
        kind: DataSourceKind,
        scoped: &JsonValue,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Self {
        if kind.is_table_based() {
            return match scoped {
                JsonValue::Object(map) => SourceData::Table(map.clone()),
                _ => SourceData::Empty,
            };
        }
        match scoped {
            JsonValue::Object(map) => SourceData::Aggregation(
                map.iter()
                    .filter(|(key, _)| !SUMMARY_KEYS.contains(&key.as_str()))
                    .map(|(key, fields)| AggregationRecord {
                        key: Some(recover_or_keep(key, diagnostics)),
                        fields: fields.clone(),
                    })
                    .collect(),
            ),
            JsonValue::Array(rows) => SourceData::Aggregation(
                rows.iter()
                    .map(|fields| AggregationRecord {
                        key: None,
                        fields: fields.clone(),
                    })
                    .collect(),
            ),
            _ => SourceData::Empty,
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            SourceData::Aggregation(records) => records.len(),
            SourceData::Table(columns) => table_row_count(columns),
            SourceData::Empty => 0,
        }
    }
}

/// Longest column array in a table.
pub fn table_row_count(columns: &Map<String, JsonValue>) -> usize {
    columns
        .values()
        .filter_map(JsonValue::as_array)
        .map(Vec::len)
        .max()
        .unwrap_or(0)
}

fn recover_or_keep(key: &str, diagnostics: &mut Vec<Diagnostic>) -> RecordKey {
    recover_key(key).unwrap_or_else(|reason| {
        record(
            diagnostics,
            Diagnostic::MalformedEncodedKey {
                key: key.to_string(),
                reason,
            },
        );
        RecordKey::Text(key.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[test]
    fn tuple_keys_round_trip() {
        let original = vec![
            KeyAtom::Text("PO-1".into()),
            KeyAtom::Int(42),
            KeyAtom::Float(1.5),
            KeyAtom::Text("it's".into()),
            KeyAtom::None,
            KeyAtom::Bool(true),
        ];
        let encoded = encode_tuple(&original);
        assert_eq!(encoded, r"('PO-1', 42, 1.5, 'it\'s', None, True)");
        assert_eq!(recover_key(&encoded), Ok(RecordKey::Tuple(original)));

        let single = vec![KeyAtom::Float(3.0)];
        assert_eq!(encode_tuple(&single), "(3.0,)");
        assert_eq!(recover_key("(3.0,)"), Ok(RecordKey::Tuple(single)));
    }

    #[test]
    fn decimal_wrappers_are_unwrapped() {
        let key = recover_key(r#"('PO-1', 'A12', Decimal('1.20'), Decimal("3"))"#).unwrap();
        assert_eq!(key.atom(2), Some(&KeyAtom::Float(1.2)));
        assert_eq!(key.atom(3), Some(&KeyAtom::Int(3)));
    }

    #[test]
    fn prefixed_string_literals_are_text() {
        let key = recover_key(r"(u'a', 1, b'raw', R'C:\dir', rb'x\'y')").unwrap();
        assert_eq!(key.atom(0), Some(&KeyAtom::Text("a".into())));
        assert_eq!(key.atom(1), Some(&KeyAtom::Int(1)));
        assert_eq!(key.atom(2), Some(&KeyAtom::Text("raw".into())));
        assert_eq!(key.atom(3), Some(&KeyAtom::Text(r"C:\dir".into())));
        assert_eq!(key.atom(4), Some(&KeyAtom::Text(r"x\'y".into())));
        assert!(recover_key("(f'a', 1)").is_err());
    }

    #[test]
    fn malformed_keys_stay_text() {
        assert!(recover_key("('PO-1', ").is_err());
        assert!(recover_key("(PO-1, ITEM)").is_err());
        assert!(recover_key("(7)").is_err());
        assert_eq!(recover_key("PO-1"), Ok(RecordKey::Text("PO-1".into())));

        let mut diags = Vec::new();
        let data = SourceData::from_scoped(
            DataSourceKind::Aggregation,
            &json!({
                "(unclosed, 1)": {},
                "('A', 1)": { "sqft_sum": 2 },
                "weight_summary": {}
            }),
            &mut diags,
        );
        let SourceData::Aggregation(records) = data else {
            panic!("expected aggregation records");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, Some(RecordKey::Text("(unclosed, 1)".into())));
        assert_eq!(
            records[1].key,
            Some(RecordKey::Tuple(vec![KeyAtom::Text("A".into()), KeyAtom::Int(1)]))
        );
        assert_eq!(diags.len(), 1);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn non_numeric_table_keys_are_warned_about() {
        let invoice = InvoiceData::from_value(json!({
            "processed_tables_data": {
                "1": { "po": ["A"] },
                "2": { "po": ["B"] },
                "summary": { "net": 1 }
            }
        }))
        .unwrap();
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();

        let mut diags = Vec::new();
        let scoped = tracing::subscriber::with_default(subscriber, || {
            select_data_source(
                &invoice,
                DataSourceKind::ProcessedTablesMulti,
                Some("1"),
                &mut diags,
            )
        });

        assert_eq!(&scoped, invoice.get("processed_tables_data").unwrap());
        assert!(diags.is_empty());
        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("table keys are not all numeric"), "{output}");
        assert!(output.contains("summary"), "{output}");
    }

    #[test]
    fn table_key_extraction_requires_numeric_keys() {
        let invoice = InvoiceData::from_value(json!({
            "processed_tables_data": { "1": { "po": ["A"] }, "2": { "po": ["B"] } },
            "custom_aggregation_results": { "po": ["C"] }
        }))
        .unwrap();
        let mut diags = Vec::new();

        let table = select_data_source(
            &invoice,
            DataSourceKind::ProcessedTablesMulti,
            Some("2"),
            &mut diags,
        );
        assert_eq!(table, json!({ "po": ["B"] }));

        let unchanged = select_data_source(
            &invoice,
            DataSourceKind::CustomAggregation,
            Some("1"),
            &mut diags,
        );
        assert_eq!(unchanged, json!({ "po": ["C"] }));
        assert!(diags.is_empty());

        let missing =
            select_data_source(&invoice, DataSourceKind::ProcessedTables, Some("9"), &mut diags);
        assert_eq!(missing, json!({}));
        assert_eq!(
            diags,
            vec![Diagnostic::TableKeyNotFound {
                table_key: "9".into()
            }]
        );

        let absent = select_data_source(&invoice, DataSourceKind::Aggregation, None, &mut diags);
        assert_eq!(absent, json!({}));
        assert!(matches!(diags[1], Diagnostic::MissingDataSource { .. }));
    }

    #[test]
    fn table_keys_sort_numerically() {
        let map = json!({ "10": {}, "2": {}, "extra": {}, "1": {} });
        let keys = sorted_table_keys(map.as_object().unwrap());
        assert_eq!(keys, ["1", "2", "10", "extra"]);
        assert!(!is_multi_table(map.as_object().unwrap()));
    }
}
