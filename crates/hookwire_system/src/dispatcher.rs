//! Host event dispatcher boundary.
//!
//! The lifecycle engine never calls its callbacks directly. It registers
//! [`HookTarget`]s on named events through the [`Dispatcher`] trait and lets the
//! host fire those events. [`EventDispatcher`] is the in-memory implementation
//! used by default.
//!
//! # Ordering
//!
//! Targets on the same event run in ascending priority order. Targets with
//! equal priority run in registration order.
//!
//! # Filter semantics
//!
//! Every event is a filter over its first argument: a target's return value
//! replaces the first argument seen by the next target, and [`Dispatcher::fire`]
//! returns the final first argument. Targets that only observe (actions)
//! return their first argument unchanged.
//!
//! # Re-entrancy
//!
//! No lock is held while a target runs, so targets may register further
//! targets or fire nested events. A target registered during a firing runs in
//! that same firing when its priority sorts after the target currently running.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::error::{DispatchError, InvocationError};

/// The callable behind a [`HookTarget`].
pub type HookFn = Arc<dyn Fn(Vec<Value>) -> Result<Value, InvocationError> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// HookTarget
// ─────────────────────────────────────────────────────────────────────────────

/// A named callable registered on an event.
///
/// The id must be unique per event; it is how duplicates are detected and how
/// failures are reported.
#[derive(Clone)]
pub struct HookTarget {
    id: String,
    callback: HookFn,
}

impl HookTarget {
    /// Creates a target from a closure.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        callback: impl Fn(Vec<Value>) -> Result<Value, InvocationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            callback: Arc::new(callback),
        }
    }

    /// Creates a target from an already shared callable.
    #[must_use]
    pub fn from_fn(id: impl Into<String>, callback: HookFn) -> Self {
        Self {
            id: id.into(),
            callback,
        }
    }

    /// Returns the target id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Invokes the target.
    ///
    /// # Errors
    ///
    /// Returns whatever the target returns.
    pub fn invoke(&self, args: Vec<Value>) -> Result<Value, InvocationError> {
        (self.callback)(args)
    }
}

impl core::fmt::Debug for HookTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HookTarget").field("id", &self.id).finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// The host event dispatcher as seen by the engine.
pub trait Dispatcher: Send + Sync + 'static {
    /// Registers `target` on `event`.
    ///
    /// `arg_count` is the number of positional arguments the target receives.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DuplicateTarget`] if the id is already
    /// registered on the event.
    fn register(
        &self,
        event: &str,
        priority: i32,
        arg_count: usize,
        target: HookTarget,
    ) -> Result<(), DispatchError>;

    /// Fires `event`, threading the first argument through every target.
    ///
    /// Returns the final first argument, or `null` when `args` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Callback`] for the first failing target.
    /// Targets after it do not run.
    fn fire(&self, event: &str, args: Vec<Value>) -> Result<Value, DispatchError>;

    /// Returns the innermost event currently firing.
    fn current_event(&self) -> Option<String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// EventDispatcher
// ─────────────────────────────────────────────────────────────────────────────

struct HookEntry {
    priority: i32,
    seq: u64,
    arg_count: usize,
    target: HookTarget,
}

impl HookEntry {
    fn key(&self) -> (i32, u64) {
        (self.priority, self.seq)
    }
}

#[derive(Default)]
struct Registry {
    events: HashMap<String, Vec<HookEntry>>,
    fired: HashMap<String, usize>,
    next_seq: u64,
}

/// In-memory [`Dispatcher`].
///
/// # Thread Safety
///
/// Registrations live behind a [`RwLock`] and the stack of firing events
/// behind a [`Mutex`]. Neither is held while a target runs.
#[derive(Default)]
pub struct EventDispatcher {
    registry: RwLock<Registry>,
    stack: Mutex<Vec<String>>,
}

/// Pops the event stack when a firing ends, including on error.
struct Firing<'a> {
    stack: &'a Mutex<Vec<String>>,
}

impl Drop for Firing<'_> {
    fn drop(&mut self) {
        self.stack.lock().pop();
    }
}

impl EventDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if any target is registered on `event`.
    #[must_use]
    pub fn has_event(&self, event: &str) -> bool {
        self.registry
            .read()
            .events
            .get(event)
            .is_some_and(|entries| !entries.is_empty())
    }

    /// Returns the number of targets registered on `event`.
    #[must_use]
    pub fn hook_count(&self, event: &str) -> usize {
        self.registry.read().events.get(event).map_or(0, Vec::len)
    }

    /// Checks if a target with the given id is registered on `event`.
    #[must_use]
    pub fn contains_hook(&self, event: &str, id: &str) -> bool {
        self.registry
            .read()
            .events
            .get(event)
            .is_some_and(|entries| entries.iter().any(|entry| entry.target.id() == id))
    }

    /// Returns how many times `event` has been fired.
    #[must_use]
    pub fn fired_count(&self, event: &str) -> usize {
        self.registry.read().fired.get(event).copied().unwrap_or(0)
    }

    /// Returns true if `event` is anywhere on the stack of firing events.
    #[must_use]
    pub fn is_firing(&self, event: &str) -> bool {
        self.stack.lock().iter().any(|e| e == event)
    }

    /// Target ids on `event`, in firing order.
    #[must_use]
    pub fn targets(&self, event: &str) -> Vec<String> {
        self.registry
            .read()
            .events
            .get(event)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| entry.target.id().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes the target `id` from `event`, returning true if it was registered.
    pub fn remove(&self, event: &str, id: &str) -> bool {
        let mut registry = self.registry.write();
        let Some(entries) = registry.events.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.target.id() != id);
        entries.len() != before
    }

    /// The next entry sorting after `cursor`, cloned out of the lock.
    fn next_after(&self, event: &str, cursor: Option<(i32, u64)>) -> Option<(i32, u64, usize, HookTarget)> {
        let registry = self.registry.read();
        registry
            .events
            .get(event)?
            .iter()
            .find(|entry| cursor.is_none_or(|c| entry.key() > c))
            .map(|entry| (entry.priority, entry.seq, entry.arg_count, entry.target.clone()))
    }
}

impl Dispatcher for EventDispatcher {
    fn register(
        &self,
        event: &str,
        priority: i32,
        arg_count: usize,
        target: HookTarget,
    ) -> Result<(), DispatchError> {
        let mut registry = self.registry.write();
        let seq = registry.next_seq;
        registry.next_seq += 1;

        let entries = registry.events.entry(event.to_string()).or_default();
        if entries.iter().any(|entry| entry.target.id() == target.id()) {
            return Err(DispatchError::DuplicateTarget {
                event: event.to_string(),
                id: target.id().to_string(),
            });
        }

        let index = entries.partition_point(|entry| entry.priority <= priority);
        tracing::trace!(event, priority, target = target.id(), "registered hook target");
        entries.insert(
            index,
            HookEntry {
                priority,
                seq,
                arg_count,
                target,
            },
        );
        Ok(())
    }

    fn fire(&self, event: &str, mut args: Vec<Value>) -> Result<Value, DispatchError> {
        *self
            .registry
            .write()
            .fired
            .entry(event.to_string())
            .or_insert(0) += 1;

        self.stack.lock().push(event.to_string());
        let _firing = Firing { stack: &self.stack };

        let mut cursor = None;
        while let Some((priority, seq, arg_count, target)) = self.next_after(event, cursor) {
            cursor = Some((priority, seq));

            let delivered: Vec<Value> = args.iter().take(arg_count).cloned().collect();
            tracing::trace!(event, priority, target = target.id(), "invoking hook target");

            let result = target
                .invoke(delivered)
                .map_err(|source| DispatchError::Callback {
                    event: event.to_string(),
                    target: target.id().to_string(),
                    source,
                })?;

            if arg_count > 0
                && let Some(first) = args.first_mut()
            {
                *first = result;
            }
        }

        Ok(args.into_iter().next().unwrap_or(Value::Null))
    }

    fn current_event(&self) -> Option<String> {
        self.stack.lock().last().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn append(id: &'static str, suffix: &'static str) -> HookTarget {
        HookTarget::new(id, move |args: Vec<Value>| {
            let base = args.first().and_then(Value::as_str).unwrap_or_default();
            Ok(json!(format!("{base}{suffix}")))
        })
    }

    #[test]
    fn fire_without_targets_returns_first_arg() {
        let dispatcher = EventDispatcher::new();
        assert_eq!(dispatcher.fire("nothing", vec![json!(1), json!(2)]).unwrap(), json!(1));
        assert_eq!(dispatcher.fire("nothing", Vec::new()).unwrap(), Value::Null);
        assert_eq!(dispatcher.fired_count("nothing"), 2);
    }

    #[test]
    fn targets_run_in_priority_then_registration_order() {
        let dispatcher = EventDispatcher::new();
        dispatcher.register("title", 20, 1, append("late", "c")).unwrap();
        dispatcher.register("title", 10, 1, append("first", "a")).unwrap();
        dispatcher.register("title", 10, 1, append("second", "b")).unwrap();

        assert_eq!(dispatcher.targets("title"), vec!["first", "second", "late"]);
        assert_eq!(dispatcher.fire("title", vec![json!("")]).unwrap(), json!("abc"));
    }

    #[test]
    fn duplicate_target_is_rejected() {
        let dispatcher = EventDispatcher::new();
        dispatcher.register("init", 10, 1, append("x", "")).unwrap();
        let err = dispatcher.register("init", 5, 1, append("x", "")).unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateTarget { .. }));
        assert_eq!(dispatcher.hook_count("init"), 1);
        // Same id on another event is fine.
        dispatcher.register("other", 10, 1, append("x", "")).unwrap();
    }

    #[test]
    fn zero_arg_targets_do_not_clobber_first_arg() {
        let dispatcher = EventDispatcher::new();
        dispatcher
            .register("save", 10, 0, HookTarget::new("observer", |args: Vec<Value>| {
                assert!(args.is_empty());
                Ok(Value::Null)
            }))
            .unwrap();

        assert_eq!(dispatcher.fire("save", vec![json!(7)]).unwrap(), json!(7));
    }

    #[test]
    fn arg_count_truncates_delivered_args() {
        let dispatcher = EventDispatcher::new();
        dispatcher
            .register("pair", 10, 2, HookTarget::new("sum", |args: Vec<Value>| {
                assert_eq!(args.len(), 2);
                let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
                Ok(json!(sum))
            }))
            .unwrap();

        let out = dispatcher.fire("pair", vec![json!(1), json!(2), json!(100)]).unwrap();
        assert_eq!(out, json!(3));
    }

    #[test]
    fn failure_stops_the_chain() {
        let dispatcher = EventDispatcher::new();
        dispatcher
            .register("boom", 10, 1, HookTarget::new("bad", |_| {
                Err(InvocationError::failed("bad", "nope"))
            }))
            .unwrap();
        dispatcher.register("boom", 20, 1, append("never", "!")).unwrap();

        let err = dispatcher.fire("boom", vec![json!("x")]).unwrap_err();
        match err {
            DispatchError::Callback { event, target, .. } => {
                assert_eq!(event, "boom");
                assert_eq!(target, "bad");
            }
            other => panic!("expected Callback, got {other:?}"),
        }
        assert_eq!(dispatcher.current_event(), None);
    }

    #[test]
    fn current_event_tracks_nesting() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let inner = Arc::clone(&dispatcher);
        dispatcher
            .register("outer", 10, 0, HookTarget::new("nest", move |_| {
                assert_eq!(inner.current_event().as_deref(), Some("outer"));
                inner.fire("inner", Vec::new())?;
                assert_eq!(inner.current_event().as_deref(), Some("outer"));
                Ok(Value::Null)
            }))
            .unwrap();
        let probe = Arc::clone(&dispatcher);
        dispatcher
            .register("inner", 10, 0, HookTarget::new("probe", move |_| {
                assert_eq!(probe.current_event().as_deref(), Some("inner"));
                assert!(probe.is_firing("outer"));
                Ok(Value::Null)
            }))
            .unwrap();

        dispatcher.fire("outer", Vec::new()).unwrap();
        assert_eq!(dispatcher.current_event(), None);
        assert_eq!(dispatcher.fired_count("inner"), 1);
    }

    #[test]
    fn remove_target() {
        let dispatcher = EventDispatcher::new();
        dispatcher.register("e", 10, 1, append("a", "a")).unwrap();
        assert!(dispatcher.remove("e", "a"));
        assert!(!dispatcher.remove("e", "a"));
        assert!(!dispatcher.has_event("e"));
    }
}
