use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::replacement::ReplacementRule;
use crate::sheet::{DataSourceKind, LayoutConfig, SheetConfig};
use crate::validation::{ConfigIssue, ValidationError};

/// Bundle format version that introduced the sectioned layout.
pub const BUNDLED_CONFIG_VERSION_PREFIX: &str = "2.1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("sheet `{0}` is not declared in layout_bundle")]
    UnknownSheet(String),
    #[error("sheet `{sheet}` has an invalid {section}: {source}")]
    Sheet {
        sheet: String,
        section: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BundleMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Which sheets run and where each one reads its rows from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Processing {
    #[serde(default, alias = "processing_order")]
    pub sheets: Vec<String>,
    /// Sheet name to data source tag. Tags are kept as text so unknown ones
    /// can be reported instead of rejected at parse time.
    #[serde(default, alias = "sheet_processing_types")]
    pub data_sources: BTreeMap<String, String>,
}

/// A whole config bundle file: metadata, processing plan and the per-sheet
/// styling/layout/data sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(
    title = "Sheetbind config bundle",
    description = "Per-sheet layout, column mapping, styling and text replacement configuration for invoice workbooks."
)]
pub struct ConfigBundle {
    #[serde(rename = "_meta", default)]
    pub meta: BundleMeta,
    #[serde(default)]
    pub processing: Processing,
    /// Per-sheet styling, plus an optional `defaults` entry shared by all sheets.
    #[serde(default)]
    pub styling_bundle: Map<String, JsonValue>,
    /// Per-sheet [`LayoutConfig`] documents.
    #[serde(default)]
    pub layout_bundle: Map<String, JsonValue>,
    #[serde(default)]
    pub data_bundle: Map<String, JsonValue>,
    #[serde(default)]
    pub context: Map<String, JsonValue>,
    #[serde(default)]
    pub features: Map<String, JsonValue>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
    /// Contents of the sibling `*_template.json`, when one was found on load.
    #[serde(skip)]
    pub template_layout: Option<JsonValue>,
}

impl ConfigBundle {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load a bundle from disk. `.yaml`/`.yml` files are read as YAML, anything
    /// else as JSON. A sibling template file is picked up when present.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading config bundle");
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
        let mut bundle = if is_yaml {
            Self::from_yaml_str(&text)?
        } else {
            Self::from_json_str(&text)?
        };

        info!(
            version = bundle.version(),
            customer = bundle.customer(),
            "config bundle loaded"
        );
        bundle.template_layout = load_sibling_template(path);
        Ok(bundle)
    }

    pub fn version(&self) -> &str {
        self.meta.config_version.as_deref().unwrap_or("unknown")
    }

    pub fn customer(&self) -> &str {
        self.meta.customer.as_deref().unwrap_or("unknown")
    }

    pub fn is_bundled_config(&self) -> bool {
        self.version().starts_with(BUNDLED_CONFIG_VERSION_PREFIX)
    }

    pub fn sheets_to_process(&self) -> &[String] {
        &self.processing.sheets
    }

    /// Declared source kind for a sheet; absent or unrecognised tags fall back
    /// to [`DataSourceKind::Aggregation`].
    pub fn data_source_kind(&self, sheet: &str) -> DataSourceKind {
        match self.processing.data_sources.get(sheet) {
            None => DataSourceKind::default(),
            Some(tag) => DataSourceKind::parse(tag).unwrap_or_else(|| {
                warn!(sheet, tag = %tag, "unknown data source tag, using aggregation");
                DataSourceKind::default()
            }),
        }
    }

    /// All sheets' raw layouts, for cross-sheet lookups.
    pub fn layout_bundle(&self) -> &Map<String, JsonValue> {
        &self.layout_bundle
    }

    pub fn layout_config(&self, sheet: &str) -> Result<LayoutConfig, ConfigError> {
        let raw = self
            .layout_bundle
            .get(sheet)
            .ok_or_else(|| ConfigError::UnknownSheet(sheet.to_string()))?;
        LayoutConfig::deserialize(raw).map_err(|source| ConfigError::Sheet {
            sheet: sheet.to_string(),
            section: "layout_config",
            source,
        })
    }

    pub fn data_config(&self, sheet: &str) -> Option<&JsonValue> {
        self.data_bundle.get(sheet)
    }

    /// Assemble the resolved [`SheetConfig`] for one sheet.
    pub fn sheet_config(&self, sheet: &str) -> Result<SheetConfig, ConfigError> {
        let layout_config = self.layout_config(sheet)?;
        let mut doc = Map::new();
        doc.insert(
            "data_source".into(),
            JsonValue::String(self.data_source_kind(sheet).as_str().into()),
        );
        for (key, value) in self.styling_document(sheet) {
            doc.insert(key, value);
        }
        let mut config =
            SheetConfig::deserialize(JsonValue::Object(doc)).map_err(|source| {
                ConfigError::Sheet {
                    sheet: sheet.to_string(),
                    section: "styling",
                    source,
                }
            })?;
        config.layout_config = layout_config;
        Ok(config)
    }

    /// Styling keys for the sheet document: inline `columns` + `row_contexts`
    /// verbatim, or a flattened legacy `styling_config`.
    fn styling_document(&self, sheet: &str) -> Map<String, JsonValue> {
        let empty = Map::new();
        let sheet_styling = self
            .styling_bundle
            .get(sheet)
            .and_then(JsonValue::as_object)
            .unwrap_or(&empty);

        let mut doc = Map::new();
        if let (Some(columns), Some(row_contexts)) =
            (sheet_styling.get("columns"), sheet_styling.get("row_contexts"))
        {
            debug!(sheet, "inline styling format");
            doc.insert("columns".into(), columns.clone());
            doc.insert("row_contexts".into(), row_contexts.clone());
            return doc;
        }

        debug!(sheet, "legacy styling format, flattening");
        let defaults = self
            .styling_bundle
            .get("defaults")
            .and_then(JsonValue::as_object)
            .unwrap_or(&empty);
        doc.insert(
            "styling_config".into(),
            JsonValue::Object(flatten_legacy_styling(sheet_styling, defaults)),
        );
        doc
    }

    /// `context.replacements`, either a list of rules or a `find -> replace`
    /// object of literal substitutions.
    pub fn replacement_rules(&self) -> Result<Vec<ReplacementRule>, ConfigError> {
        match self.context.get("replacements") {
            None | Some(JsonValue::Null) => Ok(Vec::new()),
            Some(JsonValue::Object(map)) => Ok(map
                .iter()
                .map(|(find, replace)| {
                    let text = match replace {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    ReplacementRule::literal(find.clone(), text)
                })
                .collect()),
            Some(other) => Ok(Vec::<ReplacementRule>::deserialize(other)?),
        }
    }

    /// Feature flags; non-boolean entries read as `false`.
    pub fn features(&self) -> BTreeMap<String, bool> {
        self.features
            .iter()
            .map(|(name, value)| (name.clone(), value.as_bool().unwrap_or(false)))
            .collect()
    }

    pub fn feature_enabled(&self, name: &str) -> bool {
        self.features
            .get(name)
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
    }

    /// Raw serialized form, for callers that need sections this model does
    /// not type.
    pub fn raw(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        for (idx, sheet) in self.processing.sheets.iter().enumerate() {
            if !self.layout_bundle.contains_key(sheet) {
                issues.push(ConfigIssue::new(
                    format!("processing.sheets[{idx}]"),
                    format!("sheet `{sheet}` has no entry in layout_bundle"),
                ));
            }
        }

        for (sheet, tag) in &self.processing.data_sources {
            if DataSourceKind::parse(tag).is_none() {
                issues.push(ConfigIssue::new(
                    format!("processing.data_sources.{sheet}"),
                    format!("unknown data source `{tag}`"),
                ));
            }
        }

        for (sheet, raw) in &self.layout_bundle {
            let prefix = format!("layout_bundle.{sheet}");
            match LayoutConfig::deserialize(raw) {
                Ok(layout) => layout.collect_issues(&prefix, &mut issues),
                Err(err) => issues.push(ConfigIssue::new(prefix, err.to_string())),
            }
        }

        if let Err(err) = self.replacement_rules() {
            issues.push(ConfigIssue::new("context.replacements", err.to_string()));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(issues))
        }
    }
}

impl std::str::FromStr for ConfigBundle {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_json_str(s)
    }
}

/// Flatten the nested legacy styling layout (`header.font`, `data.alignment`,
/// ...) into the flat key set renderers read.
pub fn flatten_legacy_styling(
    sheet_styling: &Map<String, JsonValue>,
    defaults: &Map<String, JsonValue>,
) -> Map<String, JsonValue> {
    let mut flat = Map::new();
    let mut row_heights = Map::new();

    let section = |name: &str| sheet_styling.get(name).and_then(JsonValue::as_object);

    if let Some(header) = section("header") {
        copy_key(header, "font", &mut flat, "header_font");
        copy_key(header, "alignment", &mut flat, "header_alignment");
        copy_key(header, "row_height", &mut row_heights, "header");
    }
    if let Some(data) = section("data") {
        copy_key(data, "font", &mut flat, "default_font");
        copy_key(data, "alignment", &mut flat, "default_alignment");
        copy_key(data, "row_height", &mut row_heights, "data_default");
    }
    if let Some(footer) = section("footer") {
        copy_key(footer, "row_height", &mut row_heights, "footer");
    }
    if !row_heights.is_empty() {
        flat.insert("row_heights".into(), JsonValue::Object(row_heights));
    }
    if let Some(column_specific) = sheet_styling.get("column_specific") {
        flat.insert("column_id_styles".into(), column_specific.clone());
    }
    if let Some(dimensions) = section("dimensions") {
        copy_key(dimensions, "column_widths", &mut flat, "column_id_widths");
    }
    if let Some(borders) = defaults.get("borders") {
        flat.insert("borders".into(), borders.clone());
    }
    flat
}

fn copy_key(
    from: &Map<String, JsonValue>,
    key: &str,
    into: &mut Map<String, JsonValue>,
    as_key: &str,
) {
    if let Some(value) = from.get(key) {
        into.insert(as_key.to_string(), value.clone());
    }
}

/// `X_config.json` pairs with `X_template.json`; any other stem with
/// `<stem>_template.json`.
pub fn sibling_template_path(config_path: &Path) -> Option<PathBuf> {
    let stem = config_path.file_stem()?.to_str()?;
    let name = match stem.strip_suffix("_config") {
        Some(base) => format!("{base}_template.json"),
        None => format!("{stem}_template.json"),
    };
    Some(config_path.with_file_name(name))
}

fn load_sibling_template(config_path: &Path) -> Option<JsonValue> {
    let template_path = sibling_template_path(config_path)?;
    if !template_path.exists() {
        debug!(path = %template_path.display(), "no sibling template");
        return None;
    }
    let parsed = std::fs::read_to_string(&template_path)
        .map_err(|err| err.to_string())
        .and_then(|text| {
            serde_json::from_str::<JsonValue>(&text).map_err(|err| err.to_string())
        });
    match parsed {
        Ok(mut raw) => {
            info!(path = %template_path.display(), "loaded sibling template");
            Some(
                raw.get_mut("template_layout")
                    .map(JsonValue::take)
                    .unwrap_or_else(|| JsonValue::Object(Map::new())),
            )
        }
        Err(err) => {
            warn!(path = %template_path.display(), error = %err, "failed to load sibling template");
            None
        }
    }
}
