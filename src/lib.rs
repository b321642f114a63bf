//! A declarative lifecycle engine for hook-based hosts.
//!
//! Re-exports the hookwire crates for convenience.

/// Layer 1: container, dispatcher and request context.
pub use hookwire_system;

/// Layer 2: scanning, caching, resolution and the lifecycle driver.
pub use hookwire_core;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use hookwire_core::prelude::*;
    pub use hookwire_core::logging::{TracingConfig, TracingFormat, init_tracing};
}
