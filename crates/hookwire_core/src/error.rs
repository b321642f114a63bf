//! Error taxonomy for the lifecycle engine.
//!
//! Structural faults ([`HookwireError::CircularDependency`] and
//! [`HookwireError::InvalidDefinition`]) mean the module graph is misconfigured
//! and always surface to the integrator. Context rejections are not errors and
//! have no variant here.

use std::path::PathBuf;

use hookwire_system::error::{ContainerError, DispatchError, InvocationError};

/// Errors raised while building, resolving or driving handlers.
#[derive(Debug, thiserror::Error)]
pub enum HookwireError {
    /// A token was re-entered while still on the active build or resolve stack.
    #[error("circular dependency: {}", .chain.join(" -> "))]
    CircularDependency {
        /// The stack from the first occurrence of the token, ending with the re-entered token.
        chain: Vec<String>,
    },

    /// A referenced class or token does not exist, or its recipe is malformed.
    #[error("invalid definition for '{token}': {reason}")]
    InvalidDefinition {
        /// The offending token.
        token: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A handler could not be constructed.
    #[error("failed to construct '{token}': {source}")]
    Construction {
        /// The handler token.
        token: String,
        /// The underlying failure.
        #[source]
        source: InvocationError,
    },

    /// A handler's `can_initialize` predicate failed.
    #[error("initialization predicate of '{token}' failed: {source}")]
    Predicate {
        /// The handler token.
        token: String,
        /// The underlying failure.
        #[source]
        source: InvocationError,
    },

    /// A callback or lifecycle hook failed.
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    /// The host dispatcher rejected a registration or a firing failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A container lookup failed.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// The definition cache could not be used.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl HookwireError {
    /// Convenience constructor for [`HookwireError::InvalidDefinition`].
    #[must_use]
    pub fn invalid(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            token: token.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for faults that indicate a misconfigured module graph.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::CircularDependency { .. } | Self::InvalidDefinition { .. }
        )
    }
}

impl From<HookwireError> for InvocationError {
    fn from(err: HookwireError) -> Self {
        match err {
            HookwireError::Invocation(inner) => inner,
            other => InvocationError::other(other),
        }
    }
}

/// Errors raised by the definition cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No usable cache exists (missing file or caching disabled).
    #[error("no definition cache at {}", .0.display())]
    NotFound(PathBuf),

    /// The cache was written for another entry module or format version.
    #[error("definition cache at {} is stale: {reason}", .path.display())]
    Stale {
        /// The cache file.
        path: PathBuf,
        /// Why it was discarded.
        reason: String,
    },

    /// The cache file could not be read or written.
    #[error("definition cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The cache file could not be encoded or decoded.
    #[error("definition cache is malformed: {0}")]
    Format(#[from] serde_json::Error),
}

/// Convenience alias used throughout the engine.
pub type Result<T, E = HookwireError> = core::result::Result<T, E>;
