//! Declarative configuration for sheetbind: the config bundle file, per-sheet
//! layouts and column definitions, text replacement rules, structural
//! validation and JSON Schema generation.

pub mod bundle;
pub mod replacement;
pub mod schema;
pub mod sheet;
pub mod validation;

pub use bundle::{
    BUNDLED_CONFIG_VERSION_PREFIX, BundleMeta, ConfigBundle, ConfigError, Processing,
    flatten_legacy_styling, sibling_template_path,
};
pub use replacement::{DataPath, MatchMode, PathSegment, ReplacementRule, data_path};
pub use schema::{generate_schema_json_pretty, generate_schema_value, generate_sheet_schema_value};
pub use sheet::{
    ColumnDef, Content, DataFlow, DataSourceKind, LayoutConfig, STATIC_COLUMN_ID, SheetConfig,
    SheetConfigDocument, Structure, StylingFormat,
};
pub use validation::{ConfigIssue, ValidationError};
