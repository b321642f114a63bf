//! The hookwire lifecycle engine (Layer 2).
//!
//! Applications declare **modules** that import other modules and own
//! **handlers**. Handlers declare **callbacks** bound to host events. The engine
//! walks the module graph into a cacheable definition map, resolves live
//! descriptors from it and drives every handler through its state machine,
//! registering callbacks with the host dispatcher at the moment its strategy
//! calls for.
//!
//! - [`reflect`] - `Module` / `Handler` traits and attribute records
//! - [`token`] - Token scheme and event-name templates
//! - [`definition`] - The serializable definition map
//! - [`scanner`] - Builds a definition map from an entry module
//! - [`cache`] - Persists definition maps between runs
//! - [`descriptor`] - Live module, handler and callback descriptors
//! - [`resolver`] - Produces descriptors from the map or live reflection
//! - [`invoker`] - The lifecycle driver
//! - [`app`] - One engine instance with bootstrap and teardown
//! - [`config`] - Engine settings
//! - [`logging`] - Tracing subscriber setup
//! - [`error`] - Error taxonomy
//!
//! # Architecture
//!
//! - **Layer 1** (`hookwire_system`): container, dispatcher, context
//! - **Layer 2** (`hookwire_core`): scanning, caching, resolution and the lifecycle driver (this crate)

/// One engine instance.
pub mod app;

/// Definition cache.
pub mod cache;

/// Engine configuration.
pub mod config;

/// The serializable definition map.
pub mod definition;

/// Live descriptors.
pub mod descriptor;

/// Error taxonomy.
pub mod error;

/// The lifecycle driver.
pub mod invoker;

/// Tracing subscriber setup.
pub mod logging;

/// Class introspection.
pub mod reflect;

/// Descriptor resolution.
pub mod resolver;

/// Definition map construction.
pub mod scanner;

/// Tokens and event names.
pub mod token;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::app::App;
    pub use crate::cache::Decompile;
    pub use crate::config::EngineConfig;
    pub use crate::descriptor::HandlerState;
    pub use crate::error::{CacheError, HookwireError};
    pub use crate::reflect::{
        CallbackAttrs, CallbackKind, ClassRef, ClassRegistry, Handler, HandlerAttrs, HandlerClass,
        Injectable, InvokeFlags, Module, ModuleAttrs, ModuleClass, Param, Strategy,
    };
    pub use hookwire_system::prelude::*;
}
