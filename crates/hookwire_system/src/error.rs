//! Errors raised at the container and dispatcher boundary.

/// Errors that can occur while resolving tokens from the [`Container`](crate::container::Container).
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// No binding exists for the requested token.
    #[error("no binding for token '{0}'")]
    NotFound(String),

    /// A factory re-entered its own token while it was being constructed.
    #[error("circular binding: {}", .chain.join(" -> "))]
    Circular {
        /// The tokens on the construction stack, ending with the re-entered token.
        chain: Vec<String>,
    },

    /// The bound value is not of the requested type.
    #[error("binding '{token}' is not a {expected}")]
    TypeMismatch {
        /// The token that was looked up.
        token: String,
        /// The expected Rust type name.
        expected: &'static str,
    },

    /// A factory failed to construct its service.
    #[error("failed to construct '{token}': {message}")]
    Factory {
        /// The token being constructed.
        token: String,
        /// Description of the failure.
        message: String,
    },
}

/// Errors raised inside, or while preparing, a callback invocation.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    /// The target reported a failure.
    #[error("{target} failed: {message}")]
    Failed {
        /// The failing target (class or callback token).
        target: String,
        /// Description of the failure.
        message: String,
    },

    /// The target exposes no hookable method with this name.
    #[error("{target} has no hookable method '{method}'")]
    UnknownMethod {
        /// The class that was called.
        target: String,
        /// The requested method name.
        method: String,
    },

    /// A positional argument could not be read as the requested type.
    #[error("argument {index}: {message}")]
    Argument {
        /// Zero-based argument position.
        index: usize,
        /// Description of the conversion failure.
        message: String,
    },

    /// A container lookup failed.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// A nested dispatch failed.
    #[error(transparent)]
    Dispatch(#[from] Box<DispatchError>),

    /// Any other failure surfaced by user code or the engine.
    #[error(transparent)]
    Other(Box<dyn core::error::Error + Send + Sync>),
}

impl InvocationError {
    /// Convenience constructor for [`InvocationError::Failed`].
    #[must_use]
    pub fn failed(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Wraps an arbitrary error.
    #[must_use]
    pub fn other(err: impl core::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Box::new(err))
    }
}

/// Errors that can occur when registering or firing events.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A target with this id is already registered on the event.
    #[error("target '{id}' already registered for event '{event}'")]
    DuplicateTarget {
        /// The event name.
        event: String,
        /// The duplicate target id.
        id: String,
    },

    /// A registered target failed while the event was firing.
    #[error("target '{target}' failed during '{event}': {source}")]
    Callback {
        /// The event being fired.
        event: String,
        /// The id of the failing target.
        target: String,
        /// The underlying failure.
        #[source]
        source: InvocationError,
    },
}

impl From<DispatchError> for InvocationError {
    fn from(err: DispatchError) -> Self {
        Self::Dispatch(Box::new(err))
    }
}
