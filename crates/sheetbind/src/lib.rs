//! Sheetbind runtime.
//!
//! Resolves a [`sheetbind_spec::ConfigBundle`] against one invoice dataset:
//! header layouts with mode-dependent column filtering, data source
//! selection, mapping rules, renderer-ready rows, metadata fallbacks and the
//! per-sheet style/context/layout/data bundles a renderer consumes. The
//! [`substitution`] module rewrites placeholder text in an already rendered
//! document.

mod error;
mod header;
mod invoice;
mod mapping;
mod metadata;
mod options;
mod processor;
mod resolver;
mod rows;
mod source;
pub mod substitution;
mod summary;
mod value;

pub use error::{BindError, Diagnostic, MappingError};
pub use header::{HeaderInfo, resolve_header};
pub use invoice::{
    CUSTOM_AGGREGATION, CUSTOMER_INFO, INVOICE_INFO, InvoiceData, PROCESSED_TABLES,
    STANDARD_AGGREGATION,
};
pub use mapping::{
    BoundDynamicRule, DATA_MAP_KEY, DynamicRule, FallbackValues, FormulaRule, LookupKey,
    MappingRule, MappingRuleSet, ResolvedMappings, StaticInfo,
};
pub use metadata::{
    HIDDEN_SHEET_NAME, HiddenMetadata, METADATA_TABLE_KEY, MetadataFallbackResolver,
    MetadataField, MetadataSource, ResolvedMetadata,
};
pub use options::{ModeFlags, RunOptions};
pub use processor::{
    GrandTotal, MultiTableProcessor, RecordingSink, RunReport, RunStatus, SheetDiagnostic,
    SheetFailure, SheetProcessor, SheetSink, SingleTableProcessor, SinkEvent, TableOutput,
    run_sheets,
};
pub use resolver::{
    ConfigBundleResolver, ContextBundle, DataBundle, FooterContext, FooterData, FooterRequest,
    LayoutBundle, LayoutWithData, ResolvedBundle, StyleBundle,
};
pub use rows::{
    DESCRIPTION_COLUMN_IDS, DataRow, PALLET_COUNT_FIELD, RowMaterializer, TableResolution,
    overlay_static,
};
pub use source::{
    AggregationRecord, KeyAtom, RecordKey, SUMMARY_KEYS, SourceData, encode_tuple,
    is_multi_table, is_table_key, recover_key, select_data_source, sorted_table_keys,
    table_row_count,
};
pub use summary::{GlobalSummaries, SummaryRecord, WeightSummary, merge_leather_summary};
pub use value::{
    CellValue, DATE_NUMBER_FORMAT, datetime_to_serial, is_numeric_format, parse_date_text,
    serial_to_datetime,
};
