//! Execution context classification.
//!
//! Every load and invoke decision is gated on the current execution context.
//! Handlers and callbacks declare a [`Context`] mask; the [`ContextEvaluator`]
//! knows which single context the process is running in and tests masks
//! against it.
//!
//! # Example
//!
//! ```
//! use hookwire_system::context::{Context, ContextEvaluator};
//!
//! let evaluator = ContextEvaluator::new(Context::ADMIN);
//! assert!(evaluator.matches(Context::ADMIN | Context::CLI));
//! assert!(evaluator.matches(Context::GLOBAL));
//! assert!(!evaluator.matches(Context::FRONTEND));
//! ```

use bitflags::bitflags;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Environment variable consulted by [`ContextEvaluator::detect`].
pub const CONTEXT_ENV: &str = "HOOKWIRE_CONTEXT";

bitflags! {
    /// A set of execution contexts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Context: u32 {
        /// Public-facing request.
        const FRONTEND = 1 << 0;
        /// Administrative request.
        const ADMIN = 1 << 1;
        /// Scheduled background job.
        const CRON = 1 << 2;
        /// Asynchronous request.
        const AJAX = 1 << 3;
        /// Programmatic API request.
        const REST = 1 << 4;
        /// Command line invocation.
        const CLI = 1 << 5;

        /// Every context.
        const GLOBAL = Self::FRONTEND.bits()
            | Self::ADMIN.bits()
            | Self::CRON.bits()
            | Self::AJAX.bits()
            | Self::REST.bits()
            | Self::CLI.bits();
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::GLOBAL
    }
}

/// Error returned when a context name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown execution context '{0}'")]
pub struct UnknownContext(pub String);

impl FromStr for Context {
    type Err = UnknownContext;

    /// Parses a single name or a `|`-separated list of names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('|')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(Self::empty(), |acc, part| {
                let flag = match part.to_ascii_lowercase().as_str() {
                    "frontend" => Self::FRONTEND,
                    "admin" => Self::ADMIN,
                    "cron" => Self::CRON,
                    "ajax" => Self::AJAX,
                    "rest" => Self::REST,
                    "cli" => Self::CLI,
                    "global" | "all" | "*" => Self::GLOBAL,
                    _ => return Err(UnknownContext(part.to_string())),
                };
                Ok(acc | flag)
            })
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::GLOBAL {
            return f.write_str("global");
        }
        let names: Vec<String> = self
            .iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect();
        f.write_str(&names.join("|"))
    }
}

impl From<u32> for Context {
    fn from(bits: u32) -> Self {
        Self::from_bits_truncate(bits)
    }
}

impl Serialize for Context {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for Context {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = u32::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits))
    }
}

/// Classifies the running process and matches declared context masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextEvaluator {
    current: Context,
}

impl Default for ContextEvaluator {
    fn default() -> Self {
        Self::new(Context::FRONTEND)
    }
}

impl ContextEvaluator {
    /// Creates an evaluator for a known current context.
    #[must_use]
    pub fn new(current: Context) -> Self {
        Self { current }
    }

    /// Detects the current context from the `HOOKWIRE_CONTEXT` environment variable.
    ///
    /// Falls back to [`Context::FRONTEND`] when the variable is unset or unparsable.
    #[must_use]
    pub fn detect() -> Self {
        let current = std::env::var(CONTEXT_ENV)
            .ok()
            .and_then(|raw| match raw.parse::<Context>() {
                Ok(ctx) => Some(ctx),
                Err(err) => {
                    tracing::warn!(value = %raw, "ignoring {CONTEXT_ENV}: {err}");
                    None
                }
            })
            .unwrap_or(Context::FRONTEND);
        Self::new(current)
    }

    /// Returns the current execution context.
    #[must_use]
    pub fn current(&self) -> Context {
        self.current
    }

    /// Returns true if `mask` includes the current context.
    #[must_use]
    pub fn matches(&self, mask: Context) -> bool {
        mask.intersects(self.current)
    }
}
