//! Bridge configuration

use serde::{Deserialize, Serialize};

use crate::defaults::{DEFAULT_MAX_PARAMS, DEFAULT_PAINT_METHOD, ENV_MAX_PARAMS, ENV_PAINT_METHOD};

/// Options shared by the descriptor cache and the dispatch hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Name of the method the render callback invokes
    pub paint_method: String,
    /// Maximum number of parameters a method may declare
    pub max_params: usize,
    /// Whether methods may return more than one value
    pub multiple_results: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            paint_method: DEFAULT_PAINT_METHOD.to_string(),
            max_params: DEFAULT_MAX_PARAMS,
            multiple_results: true,
        }
    }
}

impl BridgeOptions {
    /// Defaults with environment overrides applied.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(raw) = std::env::var(ENV_MAX_PARAMS) {
            match raw.trim().parse::<usize>() {
                Ok(n) => options.max_params = n,
                Err(e) => tracing::warn!(value = %raw, error = %e, "ignoring {}", ENV_MAX_PARAMS),
            }
        }
        if let Ok(name) = std::env::var(ENV_PAINT_METHOD) {
            if !name.is_empty() {
                options.paint_method = name;
            }
        }
        options
    }

    /// Set the paint method name
    pub fn with_paint_method(mut self, name: impl Into<String>) -> Self {
        self.paint_method = name.into();
        self
    }

    /// Set the maximum parameter count
    pub fn with_max_params(mut self, max: usize) -> Self {
        self.max_params = max;
        self
    }
}
