use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

/// Presentation modes. Each one can drop columns (`skip_in_daf`,
/// `skip_in_custom`) and DAF also switches on its own text substitutions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ModeFlags {
    pub daf: bool,
    pub custom: bool,
}

impl ModeFlags {
    pub const STANDARD: ModeFlags = ModeFlags {
        daf: false,
        custom: false,
    };

    pub fn new(daf: bool, custom: bool) -> Self {
        Self { daf, custom }
    }

    pub fn daf() -> Self {
        Self::new(true, false)
    }

    pub fn custom() -> Self {
        Self::new(false, true)
    }
}

/// Everything a run needs besides the config bundle and the invoice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub modes: ModeFlags,
    /// Pallet count used when a footer does not supply its own.
    pub pallets: u64,
    /// Extra context values merged last into every context bundle.
    pub overrides: Map<String, JsonValue>,
}

impl RunOptions {
    pub fn new(modes: ModeFlags) -> Self {
        Self {
            modes,
            ..Self::default()
        }
    }

    pub fn with_pallets(mut self, pallets: u64) -> Self {
        self.pallets = pallets;
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.overrides.insert(key.into(), value);
        self
    }
}
