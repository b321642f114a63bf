//! Engine configuration.
//!
//! [`EngineConfig`] is plain serde data. Hosts typically deserialize it from
//! their own configuration file and then layer environment overrides on top:
//!
//! ```
//! use hookwire_core::config::EngineConfig;
//!
//! let config: EngineConfig = serde_json::from_str(r#"{
//!     "cache_enabled": true,
//!     "context": "admin|cli",
//!     "globals": { "site": "example.org" }
//! }"#).unwrap();
//! let config = config.apply_env();
//! # let _ = config;
//! ```
//!
//! | Variable              | Field           |
//! |-----------------------|-----------------|
//! | `HOOKWIRE_CACHE`      | `cache_enabled` |
//! | `HOOKWIRE_CACHE_PATH` | `cache_path`    |
//! | `HOOKWIRE_CONTEXT`    | `context`       |
//! | `HOOKWIRE_DEBUG`      | `debug`         |

use std::path::{Path, PathBuf};

use hookwire_system::context::{CONTEXT_ENV, Context, ContextEvaluator};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::DEFAULT_CACHE_FILE;

/// Enables the definition cache.
pub const CACHE_ENV: &str = "HOOKWIRE_CACHE";
/// Overrides the cache file location.
pub const CACHE_PATH_ENV: &str = "HOOKWIRE_CACHE_PATH";
/// Enables lifecycle debug logging.
pub const DEBUG_ENV: &str = "HOOKWIRE_DEBUG";

/// Settings for an [`App`](crate::app::App).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Whether definition maps are cached between runs.
    pub cache_enabled: bool,
    /// Cache file location. Defaults to [`DEFAULT_CACHE_FILE`].
    pub cache_path: Option<PathBuf>,
    /// Forced execution context. Detected from the environment when unset.
    #[serde(with = "context_names")]
    pub context: Option<Context>,
    /// Logs every lifecycle step, including context rejections.
    pub debug: bool,
    /// Values injectable through `Param::Global`.
    pub globals: IndexMap<String, Value>,
    /// Values injectable through `Param::Constant`.
    pub constants: IndexMap<String, Value>,
    /// Whether [`App::teardown`](crate::app::App::teardown) applies a deferred decompile.
    pub decompile_on_shutdown: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_enabled: false,
            cache_path: None,
            context: None,
            debug: false,
            globals: IndexMap::new(),
            constants: IndexMap::new(),
            decompile_on_shutdown: true,
        }
    }
}

impl EngineConfig {
    /// Creates a config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default settings with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Applies `HOOKWIRE_*` environment overrides.
    #[must_use]
    pub fn apply_env(self) -> Self {
        self.apply_lookup(|name| std::env::var(name).ok())
    }

    fn apply_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(CACHE_ENV) {
            match parse_flag(&raw) {
                Some(enabled) => self.cache_enabled = enabled,
                None => tracing::warn!(value = %raw, "ignoring {CACHE_ENV}"),
            }
        }
        if let Some(raw) = lookup(CACHE_PATH_ENV)
            && !raw.is_empty()
        {
            self.cache_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup(CONTEXT_ENV) {
            match raw.parse::<Context>() {
                Ok(context) => self.context = Some(context),
                Err(err) => tracing::warn!(value = %raw, "ignoring {CONTEXT_ENV}: {err}"),
            }
        }
        if let Some(raw) = lookup(DEBUG_ENV) {
            match parse_flag(&raw) {
                Some(debug) => self.debug = debug,
                None => tracing::warn!(value = %raw, "ignoring {DEBUG_ENV}"),
            }
        }
        self
    }

    /// Enables or disables the definition cache.
    #[must_use]
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Sets the cache file location.
    #[must_use]
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Forces the execution context.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    /// Enables lifecycle debug logging.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Adds a global value.
    #[must_use]
    pub fn with_global(mut self, name: impl Into<String>, value: Value) -> Self {
        self.globals.insert(name.into(), value);
        self
    }

    /// Adds a constant value.
    #[must_use]
    pub fn with_constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.constants.insert(name.into(), value);
        self
    }

    /// Sets whether teardown applies a deferred decompile.
    #[must_use]
    pub fn with_decompile_on_shutdown(mut self, enabled: bool) -> Self {
        self.decompile_on_shutdown = enabled;
        self
    }

    /// The effective cache file location.
    #[must_use]
    pub fn cache_path(&self) -> &Path {
        self.cache_path
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_CACHE_FILE))
    }

    /// The context evaluator: forced if configured, detected otherwise.
    #[must_use]
    pub fn context_evaluator(&self) -> ContextEvaluator {
        match self.context {
            Some(context) => ContextEvaluator::new(context),
            None => ContextEvaluator::detect(),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Contexts as `|`-separated names in config files.
mod context_names {
    use hookwire_system::context::Context;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        context: &Option<Context>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match context {
            Some(context) => serializer.serialize_some(&context.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Context>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| raw.parse::<Context>().map_err(serde::de::Error::custom))
            .transpose()
    }
}
