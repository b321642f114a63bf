//! Live descriptors created by the resolver.
//!
//! Descriptors reference each other by token rather than by pointer: a
//! handler lists its callback tokens and a callback names its handler id.
//! The container, keyed by those tokens, is the arena.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use hookwire_system::context::Context;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::definition::{CallbackRecord, HandlerRecord, ModuleRecord};
use crate::reflect::{CallbackKind, DEFAULT_HOOK, Instance, InvokeFlags, Param, Strategy};
use crate::token::{Token, init_event, initialized_event};

// ─────────────────────────────────────────────────────────────────────────────
// ModuleDescriptor
// ─────────────────────────────────────────────────────────────────────────────

/// A resolved module.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    id: String,
    token: Token,
    imports: Vec<String>,
    handlers: Vec<String>,
    services: Vec<String>,
    extendable: bool,
    dynamic: bool,
}

impl ModuleDescriptor {
    pub(crate) fn from_record(record: &ModuleRecord) -> Self {
        Self {
            id: record.id.clone(),
            token: Token::module(&record.id),
            imports: record.imports.clone(),
            handlers: record.handlers.clone(),
            services: record.services.clone(),
            extendable: record.extendable,
            dynamic: record.dynamic,
        }
    }

    /// The module id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The module token.
    #[must_use]
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Imported module ids, in declaration order.
    #[must_use]
    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    /// Handler ids, in declaration order.
    #[must_use]
    pub fn handlers(&self) -> &[String] {
        &self.handlers
    }

    /// Service ids.
    #[must_use]
    pub fn services(&self) -> &[String] {
        &self.services
    }

    /// Whether external imports may be appended.
    #[must_use]
    pub fn is_extendable(&self) -> bool {
        self.extendable
    }

    /// Whether bindings are recomputed on cache load.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HandlerState
// ─────────────────────────────────────────────────────────────────────────────

/// The initialization state of a handler.
///
/// ```text
/// Uninitialized → Queued → Instantiating → Configuring → Ready
///        └──────────────────────────────────────────────→ Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerState {
    /// Not yet registered.
    Uninitialized,
    /// Waiting for its trigger event.
    Queued,
    /// Instance constructed or being constructed.
    Instantiating,
    /// Running the configuration hook.
    Configuring,
    /// Fully initialized.
    Ready,
    /// Context or predicate mismatch; never initializes this run.
    Rejected,
}

impl HandlerState {
    /// Whether an instance can exist in this state.
    #[must_use]
    pub fn is_alive(self) -> bool {
        matches!(self, Self::Instantiating | Self::Configuring | Self::Ready)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HandlerDescriptor
// ─────────────────────────────────────────────────────────────────────────────

/// A resolved handler and its lifecycle state.
pub struct HandlerDescriptor {
    id: String,
    token: Token,
    strategy: Strategy,
    hook: String,
    priority: i32,
    context: Context,
    hookable: bool,
    debug: bool,
    state: Mutex<HandlerState>,
    instance: RwLock<Option<Arc<dyn Instance>>>,
    callbacks: RwLock<Option<Vec<Token>>>,
    init_hook: RwLock<Option<String>>,
    admitted: AtomicBool,
    callbacks_registered: AtomicBool,
    user_supplied: AtomicBool,
    awaiting_init: AtomicBool,
}

impl HandlerDescriptor {
    pub(crate) fn from_record(record: &HandlerRecord) -> Self {
        Self {
            id: record.id.clone(),
            token: Token::handler(&record.id),
            strategy: record.strategy,
            hook: record
                .hook
                .clone()
                .unwrap_or_else(|| DEFAULT_HOOK.to_string()),
            priority: record.priority,
            context: record.context,
            hookable: record.hookable,
            debug: record.debug,
            state: Mutex::new(HandlerState::Uninitialized),
            instance: RwLock::new(None),
            callbacks: RwLock::new(None),
            init_hook: RwLock::new(None),
            admitted: AtomicBool::new(false),
            callbacks_registered: AtomicBool::new(false),
            user_supplied: AtomicBool::new(false),
            awaiting_init: AtomicBool::new(false),
        }
    }

    /// The handler id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The handler token.
    #[must_use]
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// The initialization strategy.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// The trigger event; `init` when none was declared.
    #[must_use]
    pub fn hook(&self) -> &str {
        &self.hook
    }

    /// The trigger priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Contexts the handler initializes in.
    #[must_use]
    pub fn context(&self) -> Context {
        self.context
    }

    /// Whether callbacks are registered at all.
    #[must_use]
    pub fn is_hookable(&self) -> bool {
        self.hookable
    }

    /// Whether lifecycle steps are logged at debug level.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// The internal init event for this handler.
    #[must_use]
    pub fn init_event(&self) -> String {
        init_event(self.strategy, &self.id)
    }

    /// The event fired when this handler reaches `Ready`.
    #[must_use]
    pub fn initialized_event(&self) -> String {
        initialized_event(&self.id)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HandlerState {
        *self.state.lock()
    }

    /// Moves from `from` to `to`. Returns false if the handler was elsewhere.
    pub(crate) fn transition(&self, from: HandlerState, to: HandlerState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    /// Moves to `to` from any of `from`, returning the previous state on success.
    pub(crate) fn transition_any(&self, from: &[HandlerState], to: HandlerState) -> Option<HandlerState> {
        let mut state = self.state.lock();
        let previous = *state;
        if !from.contains(&previous) {
            return None;
        }
        *state = to;
        Some(previous)
    }

    /// The live instance, once constructed or supplied.
    #[must_use]
    pub fn instance(&self) -> Option<Arc<dyn Instance>> {
        self.instance.read().clone()
    }

    pub(crate) fn set_instance(&self, instance: Arc<dyn Instance>) {
        *self.instance.write() = Some(instance);
    }

    /// Callback tokens, or `None` until they have been computed.
    #[must_use]
    pub fn callbacks(&self) -> Option<Vec<Token>> {
        self.callbacks.read().clone()
    }

    /// Stores the callback list if none was stored yet; returns the stored list.
    pub(crate) fn init_callbacks(&self, tokens: Vec<Token>) -> Vec<Token> {
        let mut slot = self.callbacks.write();
        slot.get_or_insert(tokens).clone()
    }

    /// The event that was executing when the instance was constructed.
    #[must_use]
    pub fn init_hook(&self) -> Option<String> {
        self.init_hook.read().clone()
    }

    pub(crate) fn set_init_hook(&self, hook: Option<String>) {
        *self.init_hook.write() = hook;
    }

    /// Whether the context and predicate guard has passed.
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        self.admitted.load(Ordering::Acquire)
    }

    pub(crate) fn admit(&self) {
        self.admitted.store(true, Ordering::Release);
    }

    /// Whether the instance was supplied by user code.
    #[must_use]
    pub fn is_user_supplied(&self) -> bool {
        self.user_supplied.load(Ordering::Acquire)
    }

    pub(crate) fn mark_user_supplied(&self) {
        self.user_supplied.store(true, Ordering::Release);
    }

    /// Whether callbacks have been registered with the dispatcher.
    #[must_use]
    pub fn callbacks_registered(&self) -> bool {
        self.callbacks_registered.load(Ordering::Acquire)
    }

    /// Claims callback registration. Returns false if it was already claimed.
    pub(crate) fn claim_callback_registration(&self) -> bool {
        !self.callbacks_registered.swap(true, Ordering::AcqRel)
    }

    /// Whether an early handler is instantiated and waiting for its init event.
    pub(crate) fn is_awaiting_init(&self) -> bool {
        self.awaiting_init.load(Ordering::Acquire)
    }

    pub(crate) fn set_awaiting_init(&self, awaiting: bool) {
        self.awaiting_init.store(awaiting, Ordering::Release);
    }
}

impl core::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("token", &self.token)
            .field("strategy", &self.strategy)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CallbackDescriptor
// ─────────────────────────────────────────────────────────────────────────────

/// A resolved callback with its once/loop counters.
pub struct CallbackDescriptor {
    token: Token,
    handler: String,
    method: String,
    kind: CallbackKind,
    event: String,
    priority: i32,
    args: usize,
    flags: InvokeFlags,
    params: Vec<Param>,
    context: Context,
    debug: bool,
    fired: AtomicUsize,
    firing: AtomicBool,
}

/// Clears the firing flag when an invocation ends, including on error.
pub struct FiringGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FiringGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl CallbackDescriptor {
    pub(crate) fn from_record(token: Token, record: &CallbackRecord) -> Self {
        Self {
            token,
            handler: record.handler.clone(),
            method: record.method.clone(),
            kind: record.kind,
            event: record.event.clone(),
            priority: record.priority,
            args: record.args,
            flags: record.flags,
            params: record.params.clone(),
            context: record.context,
            debug: record.debug,
            fired: AtomicUsize::new(0),
            firing: AtomicBool::new(false),
        }
    }

    /// The callback token.
    #[must_use]
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// The owning handler id.
    #[must_use]
    pub fn handler(&self) -> &str {
        &self.handler
    }

    /// The method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Action or filter.
    #[must_use]
    pub fn kind(&self) -> CallbackKind {
        self.kind
    }

    /// The declared event name, possibly templated.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Dispatcher priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Positional arguments delivered by the dispatcher.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.args
    }

    /// Invocation flags.
    #[must_use]
    pub fn flags(&self) -> InvokeFlags {
        self.flags
    }

    /// Injected parameters.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Contexts the callback registers in.
    #[must_use]
    pub fn context(&self) -> Context {
        self.context
    }

    /// Whether skips are logged at debug level.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Whether the callback can be registered as a direct call.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        !self.flags.requires_proxy() && self.params.is_empty()
    }

    /// How many times the target has been entered.
    #[must_use]
    pub fn fired(&self) -> usize {
        self.fired.load(Ordering::Acquire)
    }

    /// Whether the target is currently executing.
    #[must_use]
    pub fn is_firing(&self) -> bool {
        self.firing.load(Ordering::Acquire)
    }

    /// Marks the target as executing and counts the entry.
    pub(crate) fn enter(&self) -> FiringGuard<'_> {
        self.firing.store(true, Ordering::Release);
        self.fired.fetch_add(1, Ordering::AcqRel);
        FiringGuard { flag: &self.firing }
    }
}

impl core::fmt::Debug for CallbackDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallbackDescriptor")
            .field("token", &self.token)
            .field("flags", &self.flags)
            .field("fired", &self.fired())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::CallbackAttrs;

    fn handler_record() -> HandlerRecord {
        HandlerRecord {
            id: "app.cart".into(),
            strategy: Strategy::Early,
            hook: Some("init".into()),
            priority: 10,
            context: Context::GLOBAL,
            hookable: true,
            debug: false,
            callbacks: Vec::new(),
        }
    }

    #[test]
    fn transitions_only_from_expected_state() {
        let handler = HandlerDescriptor::from_record(&handler_record());
        assert_eq!(handler.state(), HandlerState::Uninitialized);

        assert!(!handler.transition(HandlerState::Queued, HandlerState::Instantiating));
        assert!(handler.transition(HandlerState::Uninitialized, HandlerState::Queued));
        assert_eq!(
            handler.transition_any(
                &[HandlerState::Uninitialized, HandlerState::Queued],
                HandlerState::Instantiating
            ),
            Some(HandlerState::Queued)
        );
        assert_eq!(handler.state(), HandlerState::Instantiating);
        assert!(handler.state().is_alive());
    }

    #[test]
    fn callback_list_is_computed_once() {
        let handler = HandlerDescriptor::from_record(&handler_record());
        assert!(handler.callbacks().is_none());

        let first = handler.init_callbacks(Vec::new());
        assert!(first.is_empty());
        let second = handler.init_callbacks(vec![Token::from_raw("callback:x")]);
        assert!(second.is_empty());
        assert_eq!(handler.callbacks(), Some(Vec::new()));
    }

    #[test]
    fn event_names_use_strategy_and_id() {
        let handler = HandlerDescriptor::from_record(&handler_record());
        assert_eq!(handler.init_event(), "hookwire/early/app.cart");
        assert_eq!(handler.initialized_event(), "hookwire/app.cart/initialized");
    }

    #[test]
    fn firing_guard_resets_flag() {
        let attrs = CallbackAttrs::filter("total", "cart_total").flags(InvokeFlags::ONCE);
        let record = CallbackRecord::from_attrs("app.cart", &attrs);
        let callback = CallbackDescriptor::from_record(Token::from_raw("callback:t"), &record);

        assert!(!callback.is_direct());
        {
            let _guard = callback.enter();
            assert!(callback.is_firing());
        }
        assert!(!callback.is_firing());
        assert_eq!(callback.fired(), 1);
    }
}
