use chrono::{Duration as ChronoDur, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt::{self, Display};

/* Excel 1900 date serials: serial 1 = 1900-01-01, serial 60 is the phantom
1900-02-29, serial 61 = 1900-03-01. Fractions are time of day. */

const EXCEL_EPOCH: Option<NaiveDate> = NaiveDate::from_ymd_opt(1899, 12, 31);
const PHANTOM_LEAP_SERIAL: i64 = 60;

/// Number format written alongside date substitutions.
pub const DATE_NUMBER_FORMAT: &str = "dd/mm/yyyy";

pub fn datetime_to_serial(dt: &NaiveDateTime) -> f64 {
    let Some(epoch) = EXCEL_EPOCH else {
        return 0.0;
    };
    let days = (dt.date() - epoch).num_days();
    let serial_days = if days >= PHANTOM_LEAP_SERIAL {
        days + 1
    } else {
        days
    };
    let secs = dt.time().num_seconds_from_midnight() as f64;
    serial_days as f64 + secs / 86_400.0
}

/// Convert a 1900-system serial into a date-time. `None` below serial 1 or
/// past chrono's range.
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let days = serial.trunc() as i64;
    let frac_secs = (serial.fract() * 86_400.0).round() as i64;

    let date = if days == PHANTOM_LEAP_SERIAL {
        NaiveDate::from_ymd_opt(1900, 2, 28)?
    } else {
        let offset = if days < PHANTOM_LEAP_SERIAL {
            days
        } else {
            days - 1
        };
        EXCEL_EPOCH?.checked_add_signed(ChronoDur::try_days(offset)?)?
    };
    let time =
        NaiveTime::from_num_seconds_from_midnight_opt(frac_secs.rem_euclid(86_400) as u32, 0)?;
    Some(date.and_time(time))
}

/// A value bound to a cell by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Int(i64),
    Number(f64),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    #[default]
    Empty,
}

impl Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Int(i) => write!(f, "{i}"),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Boolean(b) => write!(f, "{b}"),
            CellValue::Date(d) => write!(f, "{d}"),
            CellValue::DateTime(dt) => write!(f, "{dt}"),
            CellValue::Empty => Ok(()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        CellValue::Int(i)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl CellValue {
    /// Scalars map directly; arrays and objects are kept as their JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => CellValue::Empty,
            JsonValue::Bool(b) => CellValue::Boolean(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => CellValue::Int(i),
                None => CellValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => CellValue::Text(s.clone()),
            other => CellValue::Text(other.to_string()),
        }
    }

    /// Empty cells and blank text.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Numeric view for numeric columns. Text has thousands separators
    /// stripped and parses as an integer unless it has a decimal point; blank
    /// text becomes `Empty`. `None` means the value is not numeric.
    pub fn coerce_numeric(&self) -> Option<CellValue> {
        match self {
            CellValue::Int(_) | CellValue::Number(_) | CellValue::Empty => Some(self.clone()),
            CellValue::Boolean(b) => Some(CellValue::Int(i64::from(*b))),
            CellValue::Text(s) => {
                let cleaned = s.replace(',', "");
                let cleaned = cleaned.trim();
                if cleaned.is_empty() {
                    Some(CellValue::Empty)
                } else if cleaned.contains('.') {
                    cleaned.parse::<f64>().ok().map(CellValue::Number)
                } else {
                    match cleaned.parse::<i64>() {
                        Ok(i) => Some(CellValue::Int(i)),
                        Err(_) => cleaned.parse::<f64>().ok().map(CellValue::Number),
                    }
                }
            }
            CellValue::Date(_) | CellValue::DateTime(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.coerce_numeric()? {
            CellValue::Int(i) => Some(i as f64),
            CellValue::Number(n) if n.is_finite() => Some(n),
            _ => None,
        }
    }

    pub fn as_serial_number(&self) -> Option<f64> {
        match self {
            CellValue::Date(d) => Some(datetime_to_serial(&d.and_time(NaiveTime::MIN))),
            CellValue::DateTime(dt) => Some(datetime_to_serial(dt)),
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Interpret the value as a date: date/time text (day first) or a
    /// serial number of at least 1.
    pub fn to_date(&self) -> Option<CellValue> {
        match self {
            CellValue::Date(_) | CellValue::DateTime(_) => Some(self.clone()),
            CellValue::Int(i) => Self::from_serial_number(*i as f64),
            CellValue::Number(n) => Self::from_serial_number(*n),
            CellValue::Text(s) => parse_date_text(s),
            CellValue::Boolean(_) | CellValue::Empty => None,
        }
    }

    pub fn from_serial_number(serial: f64) -> Option<CellValue> {
        let dt = serial_to_datetime(serial)?;
        if dt.time() == NaiveTime::MIN {
            Some(CellValue::Date(dt.date()))
        } else {
            Some(CellValue::DateTime(dt))
        }
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d/%m/%y", "%d %b %Y", "%d %B %Y",
    "%b %d, %Y", "%B %d, %Y", "%Y/%m/%d",
];

/// Day-first date parsing over the formats invoices arrive in.
pub fn parse_date_text(text: &str) -> Option<CellValue> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(if dt.time() == NaiveTime::MIN {
                CellValue::Date(dt.date())
            } else {
                CellValue::DateTime(dt)
            });
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .map(CellValue::Date)
}

/// Whether an Excel number format renders numbers (as opposed to dates or text).
pub fn is_numeric_format(format: &str) -> bool {
    if format == "@" {
        return false;
    }
    let lower = format.to_ascii_lowercase();
    let looks_like_date = ["yy", "dd", "mmm", "h:mm", "mm/", "/mm"]
        .iter()
        .any(|token| lower.contains(token));
    !looks_like_date && (format.contains('0') || format.contains('#'))
}
