//! Token-keyed dependency-injection container.
//!
//! The [`Container`] maps string tokens to bindings. A binding is one of:
//!
//! - an **instance** (a shared, type-erased service),
//! - a **value** (a JSON literal),
//! - a **factory** (constructed on first [`get`](Container::get), then memoized),
//! - an **alias** (an indirection to another token).
//!
//! The engine treats the container as an opaque `Resolve(token) -> value`
//! service: descriptors, handler instances and configuration values all live
//! here under their tokens.
//!
//! # Example
//!
//! ```
//! use hookwire_system::container::Container;
//! use serde_json::json;
//!
//! struct Mailer { from: String }
//!
//! let container = Container::new();
//! container.set_value("mail.from", json!("noreply@example.com"));
//! container.bind("mailer", |c: &Container| {
//!     let from = c.value("mail.from").and_then(|v| v.as_str().map(str::to_string));
//!     Ok(Mailer { from: from.unwrap_or_default() })
//! });
//!
//! let mailer = container.get_as::<Mailer>("mailer").unwrap();
//! assert_eq!(mailer.from, "noreply@example.com");
//! ```

use core::any::Any;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use hashbrown::HashMap;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::args::{CallArgs, Injected};
use crate::error::{ContainerError, InvocationError};

/// A shared, type-erased service stored in the container.
pub type Service = Arc<dyn Any + Send + Sync>;

/// Factory that constructs a service on first access.
type Factory = Arc<dyn Fn(&Container) -> Result<Service, ContainerError> + Send + Sync>;

/// Maximum alias hops before a lookup is treated as circular.
const MAX_ALIAS_DEPTH: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Definitions
// ─────────────────────────────────────────────────────────────────────────────

/// A serializable container binding.
///
/// Configuration functions return these; unlike factories they survive a
/// round-trip through the definition cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Definition {
    /// A literal JSON value.
    Value(Value),
    /// An indirection to another token.
    Alias(String),
}

/// An ordered set of serializable bindings.
///
/// # Example
///
/// ```
/// use hookwire_system::container::Bindings;
/// use serde_json::json;
///
/// let bindings = Bindings::new()
///     .value("shop.currency", json!("EUR"))
///     .alias("currency", "shop.currency");
/// assert_eq!(bindings.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bindings(IndexMap<String, Definition>);

impl Bindings {
    /// Creates an empty binding set.
    #[must_use]
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Adds a literal value binding.
    #[must_use]
    pub fn value(mut self, token: impl Into<String>, value: Value) -> Self {
        self.0.insert(token.into(), Definition::Value(value));
        self
    }

    /// Adds an alias binding.
    #[must_use]
    pub fn alias(mut self, token: impl Into<String>, target: impl Into<String>) -> Self {
        self.0.insert(token.into(), Definition::Alias(target.into()));
        self
    }

    /// Inserts a definition, replacing any previous one for the token.
    pub fn insert(&mut self, token: impl Into<String>, definition: Definition) {
        self.0.insert(token.into(), definition);
    }

    /// Appends every binding from `other`; later bindings win.
    pub fn extend(&mut self, other: Bindings) {
        self.0.extend(other.0);
    }

    /// Returns the definition bound to `token`.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<&Definition> {
        self.0.get(token)
    }

    /// Iterates bindings in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Definition)> {
        self.0.iter()
    }

    /// Returns the number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for Bindings {
    type Item = (String, Definition);
    type IntoIter = indexmap::map::IntoIter<String, Definition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Container
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Binding {
    Instance(Service),
    Value(Value),
    Factory(Factory),
    Alias(String),
}

/// The dependency-injection container.
///
/// # Thread Safety
///
/// Bindings sit behind a [`RwLock`]. Locks are never held while a factory
/// runs, so factories may resolve their own dependencies through the same
/// container. A factory that re-enters its own token on the same thread is
/// reported as [`ContainerError::Circular`] instead of deadlocking.
#[derive(Default)]
pub struct Container {
    bindings: RwLock<HashMap<String, Binding>>,
    constructing: Mutex<HashMap<ThreadId, Vec<String>>>,
}

impl Container {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Follows aliases until a concrete binding (or nothing) is found.
    fn lookup(&self, token: &str) -> Result<Option<(String, Binding)>, ContainerError> {
        let bindings = self.bindings.read();
        let mut current = token.to_string();
        let mut hops = vec![current.clone()];

        for _ in 0..MAX_ALIAS_DEPTH {
            match bindings.get(&current) {
                Some(Binding::Alias(target)) => {
                    if hops.contains(target) {
                        hops.push(target.clone());
                        return Err(ContainerError::Circular { chain: hops });
                    }
                    hops.push(target.clone());
                    current = target.clone();
                }
                Some(binding) => return Ok(Some((current, binding.clone()))),
                None => return Ok(None),
            }
        }

        Err(ContainerError::Circular { chain: hops })
    }

    /// Returns true if `token` resolves to a binding.
    #[must_use]
    pub fn has(&self, token: &str) -> bool {
        matches!(self.lookup(token), Ok(Some(_)))
    }

    /// Resolves `token`, constructing and memoizing factory bindings.
    ///
    /// Literal values are returned as a shared [`Value`].
    ///
    /// # Errors
    ///
    /// - [`ContainerError::NotFound`] if nothing is bound to `token`
    /// - [`ContainerError::Circular`] if a factory re-enters its own token
    /// - Any error returned by the factory
    pub fn get(&self, token: &str) -> Result<Service, ContainerError> {
        let (resolved, binding) = self
            .lookup(token)?
            .ok_or_else(|| ContainerError::NotFound(token.to_string()))?;

        match binding {
            Binding::Instance(service) => Ok(service),
            Binding::Value(value) => Ok(Arc::new(value) as Service),
            Binding::Factory(factory) => self.construct(&resolved, &factory),
            Binding::Alias(target) => Err(ContainerError::NotFound(target)),
        }
    }

    fn construct(&self, token: &str, factory: &Factory) -> Result<Service, ContainerError> {
        let thread = thread::current().id();
        {
            let mut stacks = self.constructing.lock();
            let stack = stacks.entry(thread).or_default();
            if let Some(pos) = stack.iter().position(|t| t == token) {
                let mut chain: Vec<String> = stack[pos..].to_vec();
                chain.push(token.to_string());
                return Err(ContainerError::Circular { chain });
            }
            stack.push(token.to_string());
        }

        let result = factory(self);
        {
            let mut stacks = self.constructing.lock();
            if let Some(stack) = stacks.get_mut(&thread) {
                stack.retain(|t| t != token);
                if stack.is_empty() {
                    stacks.remove(&thread);
                }
            }
        }
        let service = result?;

        // A factory may have bound the token itself while running; keep the first instance.
        let mut bindings = self.bindings.write();
        match bindings.get(token) {
            Some(Binding::Instance(existing)) => Ok(Arc::clone(existing)),
            _ => {
                bindings.insert(token.to_string(), Binding::Instance(Arc::clone(&service)));
                tracing::trace!(token, "container constructed service");
                Ok(service)
            }
        }
    }

    /// Resolves `token` and downcasts it to `T`.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get), plus [`ContainerError::TypeMismatch`] if the
    /// bound service is not a `T`.
    pub fn get_as<T: Any + Send + Sync>(&self, token: &str) -> Result<Arc<T>, ContainerError> {
        self.get(token)?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                token: token.to_string(),
                expected: core::any::type_name::<T>(),
            })
    }

    /// Binds a concrete instance under `token`, replacing any previous binding.
    pub fn set<T: Any + Send + Sync>(&self, token: impl Into<String>, instance: T) {
        self.set_shared(token, Arc::new(instance));
    }

    /// Binds an already shared service under `token`.
    pub fn set_shared(&self, token: impl Into<String>, service: Service) {
        self.bindings
            .write()
            .insert(token.into(), Binding::Instance(service));
    }

    /// Binds a literal JSON value under `token`.
    pub fn set_value(&self, token: impl Into<String>, value: Value) {
        self.bindings
            .write()
            .insert(token.into(), Binding::Value(value));
    }

    /// Returns the literal value bound to `token`, following aliases.
    ///
    /// Instances that are themselves a [`Value`] are returned too.
    #[must_use]
    pub fn value(&self, token: &str) -> Option<Value> {
        match self.lookup(token).ok()?? {
            (_, Binding::Value(value)) => Some(value),
            (_, Binding::Instance(service)) => service.downcast_ref::<Value>().cloned(),
            _ => None,
        }
    }

    /// Binds a factory that constructs a `T` on first access.
    pub fn bind<T, F>(&self, token: impl Into<String>, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Container) -> Result<T, ContainerError> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |c: &Container| -> Result<Service, ContainerError> {
            Ok(Arc::new(factory(c)?) as Service)
        });
        self.bindings
            .write()
            .insert(token.into(), Binding::Factory(factory));
    }

    /// Binds a factory that already produces a type-erased [`Service`].
    pub fn bind_service<F>(&self, token: impl Into<String>, factory: F)
    where
        F: Fn(&Container) -> Result<Service, ContainerError> + Send + Sync + 'static,
    {
        self.bindings
            .write()
            .insert(token.into(), Binding::Factory(Arc::new(factory)));
    }

    /// Makes `token` an alias of `target`.
    pub fn alias(&self, token: impl Into<String>, target: impl Into<String>) {
        self.bindings
            .write()
            .insert(token.into(), Binding::Alias(target.into()));
    }

    /// Merges serializable bindings, replacing existing tokens.
    pub fn merge(&self, bindings: Bindings) {
        let mut store = self.bindings.write();
        for (token, definition) in bindings {
            let binding = match definition {
                Definition::Value(value) => Binding::Value(value),
                Definition::Alias(target) => Binding::Alias(target),
            };
            store.insert(token, binding);
        }
    }

    /// Invokes `target` with positional arguments followed by injected extras.
    ///
    /// The closure receives a [`CallArgs`] bound to this container, so it can
    /// resolve further dependencies by token while it runs.
    ///
    /// # Errors
    ///
    /// Returns whatever the target returns.
    pub fn call<F>(
        &self,
        name: &str,
        positional: Vec<Value>,
        injected: Vec<Injected>,
        target: F,
    ) -> Result<Value, InvocationError>
    where
        F: FnOnce(&mut CallArgs<'_>) -> Result<Value, InvocationError>,
    {
        let mut args = CallArgs::new(self, positional).with_injected(injected);
        tracing::trace!(target = name, args = args.len(), "container call");
        target(&mut args)
    }

    /// Removes the binding for `token`, returning true if one existed.
    pub fn remove(&self, token: &str) -> bool {
        self.bindings.write().remove(token).is_some()
    }

    /// Removes every binding.
    pub fn clear(&self) {
        self.bindings.write().clear();
    }

    /// Returns the number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    /// Returns true if there are no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }
}
