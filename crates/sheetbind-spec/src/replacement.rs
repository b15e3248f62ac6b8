use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How a rule's `find` text is compared against a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// The trimmed cell text must equal `find`.
    Exact,
    /// Every occurrence of `find` inside the cell text is replaced.
    #[default]
    Substring,
}

/// One step into the invoice dataset: an object key or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PathSegment {
    Index(u64),
    Key(String),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<u64> for PathSegment {
    fn from(index: u64) -> Self {
        PathSegment::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(idx) => write!(f, "[{idx}]"),
            PathSegment::Key(key) => f.write_str(key),
        }
    }
}

/// Ordered path from the invoice root to a value.
pub type DataPath = Vec<PathSegment>;

/// Build a [`DataPath`] from string keys.
pub fn data_path<I, S>(segments: I) -> DataPath
where
    I: IntoIterator<Item = S>,
    S: Into<PathSegment>,
{
    segments.into_iter().map(Into::into).collect()
}

/// A text-substitution rule: either a literal replacement, a dataset lookup
/// (with optional fallback path), or a formula template evaluated after the
/// first pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReplacementRule {
    pub find: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<DataPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_path: Option<DataPath>,
    #[serde(default)]
    pub is_date: bool,
    #[serde(default)]
    pub match_mode: MatchMode,
    /// Template with `{placeholder}` tokens resolved against other rules' values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula_template: Option<String>,
}

impl ReplacementRule {
    pub fn literal(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: Some(replace.into()),
            data_path: None,
            fallback_path: None,
            is_date: false,
            match_mode: MatchMode::Substring,
            formula_template: None,
        }
    }

    pub fn from_data(find: impl Into<String>, path: DataPath) -> Self {
        Self {
            find: find.into(),
            replace: None,
            data_path: Some(path),
            fallback_path: None,
            is_date: false,
            match_mode: MatchMode::Substring,
            formula_template: None,
        }
    }

    pub fn formula(find: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: None,
            data_path: None,
            fallback_path: None,
            is_date: false,
            match_mode: MatchMode::Substring,
            formula_template: Some(template.into()),
        }
    }

    pub fn with_fallback(mut self, path: DataPath) -> Self {
        self.fallback_path = Some(path);
        self
    }

    pub fn exact(mut self) -> Self {
        self.match_mode = MatchMode::Exact;
        self
    }

    pub fn as_date(mut self) -> Self {
        self.is_date = true;
        self
    }

    pub fn is_formula(&self) -> bool {
        self.formula_template.is_some()
    }
}
