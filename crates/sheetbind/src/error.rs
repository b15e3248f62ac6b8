use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use sheetbind_spec::{ConfigError, DataSourceKind};
use thiserror::Error;

/// Structural problems in `data_flow.mappings` that make a table unresolvable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("mappings must be an object keyed by rule name")]
    MappingsNotObject,
    #[error("data_map must be an object of dynamic rules")]
    DataMapNotObject,
    #[error("formula rule `{rule}` has no string formula_template")]
    FormulaWithoutTemplate { rule: String },
    #[error("initial_static_rows rule `{rule}` has no column_header_id")]
    StaticRowsWithoutColumn { rule: String },
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("table data for sheet `{sheet}` cannot be resolved: {source}")]
    TableDataAdapter {
        sheet: String,
        #[source]
        source: MappingError,
    },
    #[error("invalid invoice data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("renderer failed on sheet `{sheet}`: {message}")]
    Sink { sheet: String, message: String },
}

impl BindError {
    pub fn table_data(sheet: impl Into<String>, source: MappingError) -> Self {
        BindError::TableDataAdapter {
            sheet: sheet.into(),
            source,
        }
    }
}

/// A soft failure: recorded, logged, and resolution carries on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// The invoice has no field for the sheet's declared source.
    MissingDataSource {
        source: DataSourceKind,
        field: String,
    },
    /// A table key was requested from a multi-table source that lacks it.
    TableKeyNotFound { table_key: String },
    /// A tuple-shaped record key could not be parsed and was kept as text.
    MalformedEncodedKey { key: String, reason: String },
    /// A value in a numeric column could not be coerced; the cell is left empty.
    Coercion {
        column_id: String,
        row: usize,
        value: String,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MissingDataSource { source, field } => {
                write!(f, "data source `{source}` is missing (`{field}` not in invoice)")
            }
            Diagnostic::TableKeyNotFound { table_key } => {
                write!(f, "table `{table_key}` not found, using an empty table")
            }
            Diagnostic::MalformedEncodedKey { key, reason } => {
                write!(f, "kept key {key:?} as text: {reason}")
            }
            Diagnostic::Coercion {
                column_id,
                row,
                value,
            } => write!(f, "{column_id} row {row}: {value:?} is not numeric"),
        }
    }
}

/// Log a diagnostic and keep it for the caller.
pub(crate) fn record(diagnostics: &mut Vec<Diagnostic>, diagnostic: Diagnostic) {
    match &diagnostic {
        Diagnostic::Coercion { .. } => tracing::debug!(%diagnostic, "numeric coercion failed"),
        _ => tracing::warn!(%diagnostic, "degraded resolution"),
    }
    diagnostics.push(diagnostic);
}
