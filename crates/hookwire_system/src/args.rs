//! Argument bags handed to callback targets.
//!
//! A target receives the positional arguments delivered by the dispatcher,
//! followed by any extra parameters injected by the engine (configuration
//! values, container services, the owning handler). Both travel in a
//! [`CallArgs`], which also exposes the [`Container`] so targets can resolve
//! further dependencies on demand.

use core::any::Any;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::container::{Container, Service};
use crate::error::{ContainerError, InvocationError};

/// An extra parameter appended after the positional arguments.
#[derive(Clone)]
pub enum Injected {
    /// A JSON value (literal, global or constant).
    Value(Value),
    /// A service resolved from the container.
    Service(Service),
}

impl core::fmt::Debug for Injected {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Service(_) => f.write_str("Service(..)"),
        }
    }
}

/// Arguments for a single target invocation.
pub struct CallArgs<'a> {
    positional: Vec<Value>,
    injected: Vec<Injected>,
    container: &'a Container,
}

impl<'a> CallArgs<'a> {
    /// Creates an argument bag with positional arguments only.
    #[must_use]
    pub fn new(container: &'a Container, positional: Vec<Value>) -> Self {
        Self {
            positional,
            injected: Vec::new(),
            container,
        }
    }

    /// Appends injected parameters.
    #[must_use]
    pub fn with_injected(mut self, injected: Vec<Injected>) -> Self {
        self.injected.extend(injected);
        self
    }

    /// Returns the positional argument at `index`.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Deserializes the positional argument at `index` into `T`.
    ///
    /// A missing argument is read as `null`, so `Option<T>` targets accept it.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationError::Argument`] if the value does not fit `T`.
    pub fn arg_as<T: DeserializeOwned>(&self, index: usize) -> Result<T, InvocationError> {
        let value = self.positional.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|err| InvocationError::Argument {
            index,
            message: err.to_string(),
        })
    }

    /// Returns the first positional argument, or `null`.
    #[must_use]
    pub fn first(&self) -> Value {
        self.positional.first().cloned().unwrap_or(Value::Null)
    }

    /// Returns all positional arguments.
    #[must_use]
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// Mutable access to the positional arguments.
    pub fn positional_mut(&mut self) -> &mut Vec<Value> {
        &mut self.positional
    }

    /// Total number of arguments, positional plus injected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positional.len() + self.injected.len()
    }

    /// Returns true if there are no arguments at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the injected parameter at `index`.
    #[must_use]
    pub fn injected(&self, index: usize) -> Option<&Injected> {
        self.injected.get(index)
    }

    /// Returns the injected parameter at `index` if it is a value.
    #[must_use]
    pub fn injected_value(&self, index: usize) -> Option<&Value> {
        match self.injected.get(index)? {
            Injected::Value(value) => Some(value),
            Injected::Service(service) => service.downcast_ref::<Value>(),
        }
    }

    /// Returns the injected parameter at `index` downcast to `T`.
    #[must_use]
    pub fn injected_service<T: Any + Send + Sync>(&self, index: usize) -> Option<Arc<T>> {
        match self.injected.get(index)? {
            Injected::Service(service) => Arc::clone(service).downcast::<T>().ok(),
            Injected::Value(_) => None,
        }
    }

    /// The container the call is bound to.
    #[must_use]
    pub fn container(&self) -> &'a Container {
        self.container
    }

    /// Resolves a typed service from the container.
    ///
    /// # Errors
    ///
    /// Propagates the container's lookup error.
    pub fn resolve<T: Any + Send + Sync>(&self, token: &str) -> Result<Arc<T>, ContainerError> {
        self.container.get_as::<T>(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Clock {
        now: u64,
    }

    #[test]
    fn arg_as_deserializes_positional() {
        let container = Container::new();
        let args = CallArgs::new(&container, vec![json!(3), json!({"name": "x"})]);

        assert_eq!(args.arg_as::<u32>(0).unwrap(), 3);
        assert_eq!(args.arg_as::<Option<u32>>(5).unwrap(), None);
        let err = args.arg_as::<u32>(1).unwrap_err();
        assert!(matches!(err, InvocationError::Argument { index: 1, .. }));
    }

    #[test]
    fn injected_parameters_follow_positional() {
        let container = Container::new();
        let clock: Service = Arc::new(Clock { now: 99 });
        let args = CallArgs::new(&container, vec![json!("a")])
            .with_injected(vec![Injected::Value(json!(true)), Injected::Service(clock)]);

        assert_eq!(args.len(), 3);
        assert_eq!(args.injected_value(0), Some(&json!(true)));
        assert_eq!(args.injected_service::<Clock>(1).unwrap().now, 99);
        assert!(args.injected_service::<Clock>(0).is_none());
    }

    #[test]
    fn first_defaults_to_null() {
        let container = Container::new();
        let args = CallArgs::new(&container, Vec::new());
        assert_eq!(args.first(), Value::Null);
        assert!(args.is_empty());
    }

    #[test]
    fn resolve_goes_through_container() {
        let container = Container::new();
        container.set("clock", Clock { now: 1 });
        let args = CallArgs::new(&container, Vec::new());
        assert_eq!(args.resolve::<Clock>("clock").unwrap().now, 1);
    }
}
