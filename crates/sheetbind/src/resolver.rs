use std::borrow::Cow;

use once_cell::unsync::OnceCell;
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use serde_json::{Map, Value as JsonValue};
use sheetbind_spec::{ConfigBundle, DataSourceKind, LayoutConfig, SheetConfig, StylingFormat};
use tracing::debug;

use crate::error::{BindError, Diagnostic};
use crate::header::{HeaderInfo, resolve_header};
use crate::invoice::InvoiceData;
use crate::mapping::MappingRuleSet;
use crate::metadata::{MetadataFallbackResolver, MetadataSource};
use crate::options::{ModeFlags, RunOptions};
use crate::rows::{RowMaterializer, TableResolution};
use crate::source::select_data_source;
use crate::summary::{GlobalSummaries, SummaryRecord, WeightSummary};

#[derive(Debug, Clone, Serialize)]
pub struct StyleBundle<'a> {
    pub styling_config: &'a StylingFormat,
}

/// Runtime values for one sheet/table scope.
///
/// Serializes as one flat map. Keys in `extra` replace base entries of the
/// same name.
#[derive(Debug, Clone)]
pub struct ContextBundle<'a> {
    pub sheet_name: Cow<'a, str>,
    pub modes: ModeFlags,
    /// The dataset as this sheet sees it (see [`MetadataSource`]).
    pub invoice_data: Cow<'a, InvoiceData>,
    pub metadata_source: MetadataSource,
    pub pallets: u64,
    pub all_sheet_configs: &'a Map<String, JsonValue>,
    pub processed_tables_data: Option<&'a Map<String, JsonValue>>,
    pub totals: Option<GlobalSummaries>,
    /// Run overrides plus caller-supplied values without a typed field.
    pub extra: Map<String, JsonValue>,
}

impl ContextBundle<'_> {
    /// Sets `key`, taking precedence over the base value. Keys backed by a
    /// typed field update that field when the value has the matching type.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.set(key.into(), value.into());
        self
    }

    fn set(&mut self, key: String, value: JsonValue) {
        let applied = match (key.as_str(), &value) {
            ("sheet_name", JsonValue::String(name)) => {
                self.sheet_name = Cow::Owned(name.clone());
                true
            }
            ("pallets", JsonValue::Number(n)) => n.as_u64().map(|n| self.pallets = n).is_some(),
            ("total_net_weight", JsonValue::Number(n)) => n
                .as_f64()
                .map(|n| self.totals_mut().total_net_weight = n)
                .is_some(),
            ("total_gross_weight", JsonValue::Number(n)) => n
                .as_f64()
                .map(|n| self.totals_mut().total_gross_weight = n)
                .is_some(),
            ("total_pallets", JsonValue::Number(n)) => n
                .as_u64()
                .map(|n| self.totals_mut().total_pallets = n)
                .is_some(),
            _ => false,
        };
        if applied {
            self.extra.remove(&key);
        } else {
            self.extra.insert(key, value);
        }
    }

    fn totals_mut(&mut self) -> &mut GlobalSummaries {
        self.totals.get_or_insert_with(GlobalSummaries::default)
    }
}

impl Serialize for ContextBundle<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        let shadowed = |key: &str| self.extra.contains_key(key);
        if !shadowed("sheet_name") {
            map.serialize_entry("sheet_name", &self.sheet_name)?;
        }
        if !shadowed("modes") {
            map.serialize_entry("modes", &self.modes)?;
        }
        if !shadowed("invoice_data") {
            map.serialize_entry("invoice_data", &self.invoice_data)?;
        }
        if !shadowed("metadata_source") {
            map.serialize_entry("metadata_source", &self.metadata_source)?;
        }
        if !shadowed("pallets") {
            map.serialize_entry("pallets", &self.pallets)?;
        }
        if !shadowed("all_sheet_configs") {
            map.serialize_entry("all_sheet_configs", self.all_sheet_configs)?;
        }
        if let Some(tables) = self.processed_tables_data {
            if !shadowed("processed_tables_data") {
                map.serialize_entry("processed_tables_data", tables)?;
            }
        }
        if let Some(totals) = &self.totals {
            if !shadowed("total_net_weight") {
                map.serialize_entry("total_net_weight", &totals.total_net_weight)?;
            }
            if !shadowed("total_gross_weight") {
                map.serialize_entry("total_gross_weight", &totals.total_gross_weight)?;
            }
            if !shadowed("total_pallets") {
                map.serialize_entry("total_pallets", &totals.total_pallets)?;
            }
        }
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutBundle<'a> {
    pub sheet_config: &'a LayoutConfig,
    pub blanks: &'a JsonValue,
    pub static_content: &'a Map<String, JsonValue>,
    pub merge_rules: &'a JsonValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataBundle<'a> {
    pub data_source: JsonValue,
    pub data_source_type: DataSourceKind,
    pub header_info: &'a HeaderInfo,
    pub mapping_rules: &'a MappingRuleSet,
    pub table_key: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Layout bundle with the data bundle's fields merged in.
#[derive(Debug, Clone, Serialize)]
pub struct LayoutWithData<'a> {
    #[serde(flatten)]
    pub layout: LayoutBundle<'a>,
    pub data_source: JsonValue,
    pub data_source_type: DataSourceKind,
    pub header_info: &'a HeaderInfo,
    pub mapping_rules: &'a MappingRuleSet,
}

/// All four bundles for one sheet/table scope.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedBundle<'a> {
    pub style: StyleBundle<'a>,
    pub context: ContextBundle<'a>,
    pub layout: LayoutBundle<'a>,
    pub data: DataBundle<'a>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FooterRequest {
    pub sum_ranges: Vec<String>,
    /// Defaults to the run's pallet count.
    pub pallet_count: Option<u64>,
    pub is_last_table: bool,
    pub dynamic_desc_used: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FooterContext<'a> {
    #[serde(flatten)]
    pub context: ContextBundle<'a>,
    pub pallet_count: u64,
    pub is_last_table: bool,
    pub dynamic_desc_used: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FooterData<'a> {
    #[serde(flatten)]
    pub data: DataBundle<'a>,
    pub sum_ranges: Vec<String>,
    pub footer_config: &'a JsonValue,
    #[serde(rename = "DAF_mode")]
    pub daf_mode: bool,
}

/// Produces the style/context/layout/data bundles of one sheet.
///
/// The assembled [`SheetConfig`], the typed mapping rules, the header layout
/// and the cross-table totals are computed on first use and kept. The caches
/// are not synchronised: use one resolver per thread.
pub struct ConfigBundleResolver<'a> {
    config: &'a ConfigBundle,
    sheet_name: String,
    invoice: &'a InvoiceData,
    options: &'a RunOptions,
    sheet_config: OnceCell<SheetConfig>,
    mapping_rules: OnceCell<MappingRuleSet>,
    header_info: OnceCell<HeaderInfo>,
    totals: OnceCell<Option<GlobalSummaries>>,
}

impl<'a> ConfigBundleResolver<'a> {
    pub fn new(
        config: &'a ConfigBundle,
        sheet_name: impl Into<String>,
        invoice: &'a InvoiceData,
        options: &'a RunOptions,
    ) -> Self {
        Self {
            config,
            sheet_name: sheet_name.into(),
            invoice,
            options,
            sheet_config: OnceCell::new(),
            mapping_rules: OnceCell::new(),
            header_info: OnceCell::new(),
            totals: OnceCell::new(),
        }
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn invoice(&self) -> &'a InvoiceData {
        self.invoice
    }

    pub fn modes(&self) -> ModeFlags {
        self.options.modes
    }

    pub fn sheet_config(&self) -> Result<&SheetConfig, BindError> {
        self.sheet_config.get_or_try_init(|| -> Result<_, BindError> {
            debug!(sheet = %self.sheet_name, "loading sheet config");
            Ok(self.config.sheet_config(&self.sheet_name)?)
        })
    }

    pub fn data_source_kind(&self) -> Result<DataSourceKind, BindError> {
        Ok(self.sheet_config()?.data_source)
    }

    pub fn header_info(&self) -> Result<&HeaderInfo, BindError> {
        self.header_info.get_or_try_init(|| -> Result<_, BindError> {
            let structure = &self.sheet_config()?.layout_config.structure;
            Ok(resolve_header(structure, self.options.modes))
        })
    }

    /// Typed mapping rules. Structural problems are the one hard failure of
    /// table resolution.
    pub fn mapping_rules(&self) -> Result<&MappingRuleSet, BindError> {
        self.mapping_rules.get_or_try_init(|| {
            let mappings = &self.sheet_config()?.layout_config.data_flow.mappings;
            MappingRuleSet::parse(mappings)
                .map_err(|source| BindError::table_data(&self.sheet_name, source))
        })
    }

    /// Totals across every processed table; `None` without processed tables.
    pub fn global_summaries(&self) -> Option<GlobalSummaries> {
        *self.totals.get_or_init(|| {
            self.invoice
                .processed_tables()
                .map(GlobalSummaries::from_tables)
        })
    }

    pub fn all_sheet_configs(&self) -> &'a Map<String, JsonValue> {
        self.config.layout_bundle()
    }

    pub fn style_bundle(&self) -> Result<StyleBundle<'_>, BindError> {
        Ok(StyleBundle {
            styling_config: &self.sheet_config()?.styling,
        })
    }

    pub fn context_bundle(&self, table_key: Option<&str>) -> Result<ContextBundle<'_>, BindError> {
        let kind = self.data_source_kind()?;
        let (metadata_source, invoice_data) =
            MetadataFallbackResolver::new(self.invoice).adapt_for_sheet(kind, table_key);
        let mut context = ContextBundle {
            sheet_name: Cow::Borrowed(&self.sheet_name),
            modes: self.options.modes,
            invoice_data,
            metadata_source,
            pallets: self.options.pallets,
            all_sheet_configs: self.all_sheet_configs(),
            processed_tables_data: self.invoice.processed_tables(),
            totals: self.global_summaries(),
            extra: Map::new(),
        };
        for (key, value) in &self.options.overrides {
            context.set(key.clone(), value.clone());
        }
        Ok(context)
    }

    pub fn layout_bundle(&self) -> Result<LayoutBundle<'_>, BindError> {
        let layout = &self.sheet_config()?.layout_config;
        Ok(LayoutBundle {
            sheet_config: layout,
            blanks: &layout.blanks,
            static_content: &layout.content.static_content,
            merge_rules: &layout.merge_rules,
        })
    }

    pub fn data_bundle(&self, table_key: Option<&str>) -> Result<DataBundle<'_>, BindError> {
        let kind = self.data_source_kind()?;
        let mut diagnostics = Vec::new();
        let data_source = select_data_source(self.invoice, kind, table_key, &mut diagnostics);
        Ok(DataBundle {
            data_source,
            data_source_type: kind,
            header_info: self.header_info()?,
            mapping_rules: self.mapping_rules()?,
            table_key: table_key.map(str::to_string),
            diagnostics,
        })
    }

    pub fn resolve(&self, table_key: Option<&str>) -> Result<ResolvedBundle<'_>, BindError> {
        Ok(ResolvedBundle {
            style: self.style_bundle()?,
            context: self.context_bundle(table_key)?,
            layout: self.layout_bundle()?,
            data: self.data_bundle(table_key)?,
        })
    }

    /// Style, context and layout: what a header writer needs.
    pub fn header_bundles(
        &self,
    ) -> Result<(StyleBundle<'_>, ContextBundle<'_>, LayoutBundle<'_>), BindError> {
        Ok((
            self.style_bundle()?,
            self.context_bundle(None)?,
            self.layout_bundle()?,
        ))
    }

    /// All four bundles, for a table writer.
    #[allow(clippy::type_complexity)]
    pub fn datatable_bundles(
        &self,
        table_key: Option<&str>,
    ) -> Result<
        (
            StyleBundle<'_>,
            ContextBundle<'_>,
            LayoutBundle<'_>,
            DataBundle<'_>,
        ),
        BindError,
    > {
        Ok((
            self.style_bundle()?,
            self.context_bundle(None)?,
            self.layout_bundle()?,
            self.data_bundle(table_key)?,
        ))
    }

    /// Style, table-scoped context and the merged layout view.
    pub fn layout_bundles_with_data(
        &self,
        table_key: Option<&str>,
    ) -> Result<(StyleBundle<'_>, ContextBundle<'_>, LayoutWithData<'_>), BindError> {
        let data = self.data_bundle(table_key)?;
        let merged = LayoutWithData {
            layout: self.layout_bundle()?,
            data_source: data.data_source,
            data_source_type: data.data_source_type,
            header_info: data.header_info,
            mapping_rules: data.mapping_rules,
        };
        Ok((self.style_bundle()?, self.context_bundle(table_key)?, merged))
    }

    pub fn footer_bundles(
        &self,
        request: FooterRequest,
    ) -> Result<(StyleBundle<'_>, FooterContext<'_>, FooterData<'_>), BindError> {
        let context = self.context_bundle(None)?;
        let context = FooterContext {
            pallet_count: request.pallet_count.unwrap_or(context.pallets),
            context,
            is_last_table: request.is_last_table,
            dynamic_desc_used: request.dynamic_desc_used,
        };
        let data = FooterData {
            data: self.data_bundle(None)?,
            sum_ranges: request.sum_ranges,
            footer_config: &self.sheet_config()?.layout_config.footer,
            daf_mode: self.options.modes.daf,
        };
        Ok((self.style_bundle()?, context, data))
    }

    /// Rows for one table scope. Selection diagnostics come first in the
    /// result's diagnostics.
    pub fn resolve_table(&self, table_key: Option<&str>) -> Result<TableResolution, BindError> {
        let data = self.data_bundle(table_key)?;
        let bound = data.mapping_rules.bind(data.header_info);
        let static_content = self.layout_bundle()?.static_content.clone();
        let mut resolution = RowMaterializer::new(data.header_info, &bound, self.options.modes)
            .with_static_content(static_content)
            .materialize(data.data_source_type, &data.data_source);

        let mut diagnostics = data.diagnostics;
        diagnostics.append(&mut resolution.diagnostics);
        resolution.diagnostics = diagnostics;
        debug!(
            sheet = %self.sheet_name,
            table_key = table_key.unwrap_or("-"),
            rows = resolution.data_rows.len(),
            "table resolved"
        );
        Ok(resolution)
    }

    /// Footer summaries with the weights defaulted: a non-zero `weight_summary`
    /// is used as given, otherwise the dataset-wide totals.
    pub fn summary_record(
        &self,
        pallet_count: Option<u64>,
        leather_summary: Option<JsonValue>,
        weight_summary: Option<&JsonValue>,
    ) -> SummaryRecord {
        let mut weights = weight_summary
            .map(WeightSummary::from_json)
            .unwrap_or_default();
        if weights.is_zero() {
            if let Some(totals) = self.global_summaries() {
                weights = WeightSummary {
                    net: totals.total_net_weight,
                    gross: totals.total_gross_weight,
                };
            }
        }
        SummaryRecord {
            total_pallets: pallet_count.unwrap_or(self.options.pallets),
            leather_summary,
            weight_summary: weights,
        }
    }
}
