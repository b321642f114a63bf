//! Collaborator primitives for hookwire (Layer 1).
//!
//! `hookwire_system` provides the services the lifecycle engine rides on:
//!
//! - [`context`] - Execution-context classification and mask matching
//! - [`container`] - Token-keyed dependency-injection container
//! - [`dispatcher`] - Host event dispatcher boundary and an in-memory implementation
//! - [`args`] - Argument bags handed to callback targets
//! - [`error`] - Errors raised at this boundary
//!
//! # Architecture
//!
//! - **Layer 1** (`hookwire_system`): container, dispatcher, context (this crate)
//! - **Layer 2** (`hookwire_core`): scanning, caching, resolution and the lifecycle driver
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use hookwire_system::dispatcher::{Dispatcher, EventDispatcher, HookTarget};
//! use serde_json::{Value, json};
//!
//! let dispatcher = EventDispatcher::new();
//! dispatcher
//!     .register("the_title", 10, 1, HookTarget::new("shout", |args: Vec<Value>| {
//!         let title = args[0].as_str().unwrap_or_default().to_uppercase();
//!         Ok(Value::String(title))
//!     }))
//!     .unwrap();
//!
//! let title = dispatcher.fire("the_title", vec![json!("hello")]).unwrap();
//! assert_eq!(title, json!("HELLO"));
//! ```

/// Argument bags passed to callback targets.
pub mod args;

/// Token-keyed dependency-injection container.
pub mod container;

/// Execution context evaluation.
pub mod context;

/// Host event dispatcher boundary.
pub mod dispatcher;

/// Errors raised by the container and dispatcher.
pub mod error;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::args::{CallArgs, Injected};
    pub use crate::container::{Bindings, Container, Definition, Service};
    pub use crate::context::{Context, ContextEvaluator};
    pub use crate::dispatcher::{Dispatcher, EventDispatcher, HookFn, HookTarget};
    pub use crate::error::{ContainerError, DispatchError, InvocationError};
}
