//! Invoker: drives handler state and registers callbacks with the dispatcher.
//!
//! Each handler moves through
//!
//! ```text
//! Uninitialized → Queued → Instantiating → Configuring → Ready
//! ```
//!
//! or ends in `Rejected` when its context or predicate does not match. How
//! far a handler gets during registration depends on its [`Strategy`]:
//!
//! | Strategy     | At registration  | At trigger event                   | At init event        |
//! |--------------|------------------|------------------------------------|----------------------|
//! | `Immediate`  | full load        |                                    |                      |
//! | `Early`      | queued           | instantiate, register callbacks    | configure, ready     |
//! | `Lazy`       | queued           | register proxied callbacks         | full load            |
//! | `JustInTime` | queued           | register proxied callbacks         | full load            |
//! | `Deferred`   | queued           | full load                          | full load            |
//! | `User`       | ready if supplied|                                    |                      |
//!
//! A lazy handler fires its init event when one of its callbacks is first
//! reached. A just-in-time handler fires it only once a callback has passed
//! its once and loop guards and is about to execute.
//!
//! Closures handed to the dispatcher hold a [`Weak`] reference to the
//! invoker, so dropping the application releases the engine.

use std::sync::{Arc, Weak};

use downcast_rs::DowncastSync;
use hookwire_system::args::{CallArgs, Injected};
use hookwire_system::container::{Container, Service};
use hookwire_system::context::ContextEvaluator;
use hookwire_system::dispatcher::{Dispatcher, HookTarget};
use hookwire_system::error::{ContainerError, InvocationError};
use serde_json::{Value, json};

use crate::descriptor::{CallbackDescriptor, HandlerDescriptor, HandlerState};
use crate::error::{HookwireError, Result};
use crate::reflect::{
    CallbackKind, Handler, Instance, InvokeFlags, Param, Strategy, constant_token, global_token,
};
use crate::resolver::Resolver;
use crate::token::{Token, render_template};

/// The lifecycle driver.
pub struct Invoker {
    me: Weak<Invoker>,
    container: Arc<Container>,
    dispatcher: Arc<dyn Dispatcher>,
    resolver: Arc<Resolver>,
    context: ContextEvaluator,
    debug: bool,
}

impl Invoker {
    /// Creates an invoker. `debug` logs every lifecycle step.
    #[must_use]
    pub fn new(
        container: Arc<Container>,
        dispatcher: Arc<dyn Dispatcher>,
        resolver: Arc<Resolver>,
        context: ContextEvaluator,
        debug: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            container,
            dispatcher,
            resolver,
            context,
            debug,
        })
    }

    /// The container.
    #[must_use]
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// The host dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    /// The resolver.
    #[must_use]
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// The context evaluator.
    #[must_use]
    pub fn context(&self) -> ContextEvaluator {
        self.context
    }

    fn debug_enabled(&self, handler: &HandlerDescriptor) -> bool {
        self.debug || handler.is_debug()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    /// Registers every handler reachable from the module `id`.
    ///
    /// Imported modules are registered before the modules importing them.
    ///
    /// # Errors
    ///
    /// Structural faults and construction failures of immediate handlers.
    pub fn register_module(&self, id: &str) -> Result<()> {
        let modules = self.resolver.walk_modules(id)?;
        for module in &modules {
            self.resolver.bind_services(module)?;
            for handler in module.handlers() {
                self.register_handler(handler)?;
            }
        }
        Ok(())
    }

    /// Registers one handler according to its strategy.
    ///
    /// Registering the same handler twice is a no-op.
    ///
    /// # Errors
    ///
    /// - [`HookwireError::Predicate`] if `can_initialize` fails
    /// - [`HookwireError::Construction`] if an immediate handler cannot be built
    /// - Dispatcher and resolution errors
    pub fn register_handler(&self, id: &str) -> Result<()> {
        let handler = self.resolver.get_handler(id)?;
        if handler.state() != HandlerState::Uninitialized || handler.is_admitted() {
            return Ok(());
        }
        if !self.admit(&handler)? {
            return Ok(());
        }

        match handler.strategy() {
            Strategy::Immediate => self.load(&handler),
            Strategy::User => {
                if handler.instance().is_some() {
                    self.complete(&handler, HandlerState::Uninitialized)
                } else {
                    if self.debug_enabled(&handler) {
                        tracing::debug!(handler = %handler.token(), "waiting for a supplied instance");
                    }
                    Ok(())
                }
            }
            Strategy::Early | Strategy::Lazy | Strategy::JustInTime | Strategy::Deferred => {
                self.queue(&handler)
            }
        }
    }

    /// Context and predicate guard. Returns false when the handler is rejected.
    fn admit(&self, handler: &HandlerDescriptor) -> Result<bool> {
        if !self.context.matches(handler.context()) {
            handler.transition(HandlerState::Uninitialized, HandlerState::Rejected);
            if self.debug_enabled(handler) {
                tracing::debug!(
                    handler = %handler.token(),
                    mask = %handler.context(),
                    current = %self.context.current(),
                    "context rejected"
                );
            }
            return Ok(false);
        }

        let class = self.resolver.handler_class(handler.id())?;
        match class.can_initialize(&self.container) {
            Ok(true) => {
                handler.admit();
                Ok(true)
            }
            Ok(false) => {
                handler.transition(HandlerState::Uninitialized, HandlerState::Rejected);
                if self.debug_enabled(handler) {
                    tracing::debug!(handler = %handler.token(), "predicate rejected");
                }
                Ok(false)
            }
            Err(source) => Err(HookwireError::Predicate {
                token: handler.token().to_string(),
                source,
            }),
        }
    }

    fn queue(&self, handler: &HandlerDescriptor) -> Result<()> {
        if !handler.transition(HandlerState::Uninitialized, HandlerState::Queued) {
            return Ok(());
        }
        self.listen_init(handler)?;

        if self.dispatcher.current_event().as_deref() == Some(handler.hook()) {
            if self.debug_enabled(handler) {
                tracing::debug!(handler = %handler.token(), hook = handler.hook(), "trigger already in flight");
            }
            return self.trigger(handler);
        }

        let me = self.me.clone();
        let id = handler.id().to_string();
        let target = HookTarget::new(format!("{}::trigger", handler.token()), move |_| {
            if let Some(invoker) = me.upgrade() {
                let handler = invoker.resolver.get_handler(&id)?;
                invoker.trigger(&handler)?;
            }
            Ok(Value::Null)
        });
        self.dispatcher
            .register(handler.hook(), handler.priority(), 0, target)?;
        Ok(())
    }

    fn listen_init(&self, handler: &HandlerDescriptor) -> Result<()> {
        let me = self.me.clone();
        let id = handler.id().to_string();
        let target = HookTarget::new(format!("{}::init", handler.token()), move |_| {
            if let Some(invoker) = me.upgrade() {
                let handler = invoker.resolver.get_handler(&id)?;
                invoker.initialize(&handler)?;
            }
            Ok(Value::Null)
        });
        self.dispatcher
            .register(&handler.init_event(), handler.priority(), 0, target)?;
        Ok(())
    }

    /// Runs when a queued handler's trigger event fires.
    fn trigger(&self, handler: &HandlerDescriptor) -> Result<()> {
        match handler.strategy() {
            Strategy::Early => {
                if !handler.transition(HandlerState::Queued, HandlerState::Instantiating) {
                    return Ok(());
                }
                self.instantiate(handler)?;
                handler.set_awaiting_init(true);
                self.register_callbacks(handler)
            }
            Strategy::Lazy | Strategy::JustInTime => {
                if handler.state() == HandlerState::Rejected {
                    return Ok(());
                }
                self.register_callbacks(handler)
            }
            Strategy::Deferred => self.load(handler),
            Strategy::Immediate | Strategy::User => Ok(()),
        }
    }

    /// Runs when a handler's init event fires.
    fn initialize(&self, handler: &HandlerDescriptor) -> Result<()> {
        match handler.state() {
            HandlerState::Queued => self.load(handler),
            HandlerState::Instantiating if handler.is_awaiting_init() => {
                self.complete(handler, HandlerState::Instantiating)
            }
            _ => Ok(()),
        }
    }

    /// Fires the handler's init event and returns the resulting state.
    ///
    /// This is how external code forces a lazy, just-in-time or early handler
    /// to finish initializing.
    ///
    /// # Errors
    ///
    /// Whatever the initialization raises.
    pub fn initialize_handler(&self, id: &str) -> Result<HandlerState> {
        let handler = self.resolver.get_handler(id)?;
        if matches!(
            handler.state(),
            HandlerState::Queued | HandlerState::Instantiating
        ) {
            self.dispatcher.fire(&handler.init_event(), Vec::new())?;
        }
        Ok(handler.state())
    }

    /// Runs the full Instantiating → Configuring → Ready sequence now.
    ///
    /// Unregistered handlers pass the context and predicate guard first.
    ///
    /// # Errors
    ///
    /// Predicate, construction and lifecycle hook failures.
    pub fn load_handler(&self, id: &str) -> Result<HandlerState> {
        let handler = self.resolver.get_handler(id)?;
        if handler.state() == HandlerState::Uninitialized
            && !handler.is_admitted()
            && !self.admit(&handler)?
        {
            return Ok(handler.state());
        }
        if handler.strategy() == Strategy::User {
            if handler.instance().is_some() {
                self.complete(&handler, HandlerState::Uninitialized)?;
            }
        } else {
            self.load(&handler)?;
        }
        Ok(handler.state())
    }

    fn load(&self, handler: &HandlerDescriptor) -> Result<()> {
        if handler
            .transition_any(
                &[HandlerState::Uninitialized, HandlerState::Queued],
                HandlerState::Instantiating,
            )
            .is_none()
        {
            return Ok(());
        }
        self.instantiate(handler)?;
        self.complete(handler, HandlerState::Instantiating)
    }

    fn instantiate(&self, handler: &HandlerDescriptor) -> Result<()> {
        handler.set_init_hook(self.dispatcher.current_event());
        if handler.instance().is_some() {
            return Ok(());
        }

        let class = self.resolver.handler_class(handler.id())?;
        let instance = class
            .construct(&self.container)
            .map_err(|source| HookwireError::Construction {
                token: handler.token().to_string(),
                source,
            })?;
        self.store_instance(handler, instance);

        if self.debug_enabled(handler) {
            tracing::debug!(
                handler = %handler.token(),
                init_hook = ?handler.init_hook(),
                "instantiated"
            );
        }
        Ok(())
    }

    fn store_instance(&self, handler: &HandlerDescriptor, instance: Arc<dyn Instance>) {
        self.container.set_shared(
            Token::instance(handler.id()).as_str(),
            Arc::clone(&instance).into_any_arc(),
        );
        handler.set_instance(instance);
    }

    /// Configuring → Ready, starting from `from`.
    fn complete(&self, handler: &HandlerDescriptor, from: HandlerState) -> Result<()> {
        if !handler.transition(from, HandlerState::Configuring) {
            return Ok(());
        }
        handler.set_awaiting_init(false);
        let instance = handler
            .instance()
            .ok_or_else(|| HookwireError::invalid(handler.token().as_str(), "no instance to configure"))?;

        let bindings = instance.configure(&self.container)?;
        if !bindings.is_empty() {
            self.container.merge(bindings);
        }

        if !handler.is_user_supplied() {
            let mut args = CallArgs::new(&self.container, Vec::new());
            instance.on_initialize(&mut args)?;
        }

        self.register_callbacks(handler)?;
        handler.transition(HandlerState::Configuring, HandlerState::Ready);

        if self.debug_enabled(handler) {
            tracing::debug!(handler = %handler.token(), "ready");
        }
        self.dispatcher.fire(
            &handler.initialized_event(),
            vec![json!(handler.token().as_str())],
        )?;
        Ok(())
    }

    /// Hands a pre-built instance to a user-driven handler.
    ///
    /// If the handler has already been registered it becomes ready immediately;
    /// otherwise it does so when its module is registered.
    ///
    /// # Errors
    ///
    /// [`HookwireError::InvalidDefinition`] if the handler is not user-driven,
    /// already has an instance, or `instance` is of another class.
    pub fn supply(&self, id: &str, instance: Arc<dyn Instance>) -> Result<()> {
        let handler = self.resolver.get_handler(id)?;
        let token = handler.token().to_string();
        if handler.strategy() != Strategy::User {
            return Err(HookwireError::invalid(token, "only user-driven handlers accept a supplied instance"));
        }
        if instance.class_id() != handler.id() {
            return Err(HookwireError::invalid(
                token,
                format!("supplied instance is a '{}'", instance.class_id()),
            ));
        }
        if handler.instance().is_some() {
            return Err(HookwireError::invalid(token, "instance already supplied"));
        }

        handler.mark_user_supplied();
        self.store_instance(&handler, instance);
        if handler.is_admitted() {
            self.complete(&handler, HandlerState::Uninitialized)?;
        }
        Ok(())
    }

    /// The typed instance of `H`, once constructed or supplied.
    #[must_use]
    pub fn instance<H: Handler>(&self) -> Option<Arc<H>> {
        self.container
            .get_as::<H>(Token::instance(H::ID).as_str())
            .ok()
    }

    /// The state of the handler `id`, if it has been resolved.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<HandlerState> {
        let token = Token::handler(id);
        self.container
            .get_as::<HandlerDescriptor>(token.as_str())
            .ok()
            .map(|handler| handler.state())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Callbacks
    // ─────────────────────────────────────────────────────────────────────────

    fn register_callbacks(&self, handler: &HandlerDescriptor) -> Result<()> {
        if !handler.is_hookable() {
            return Ok(());
        }
        if !handler.claim_callback_registration() {
            return Ok(());
        }

        let instance = handler.instance();
        for callback in self.resolver.handler_callbacks(handler)? {
            if !self.context.matches(callback.context()) {
                if self.debug || callback.is_debug() {
                    tracing::debug!(callback = %callback.token(), "callback context rejected");
                }
                continue;
            }

            let event = self.render_event(&callback)?;
            let target = match &instance {
                Some(instance) if callback.is_direct() => self.direct_target(&callback, instance),
                _ => self.proxied_target(&callback),
            };
            self.dispatcher
                .register(&event, callback.priority(), callback.arg_count(), target)?;
        }
        Ok(())
    }

    fn render_event(&self, callback: &CallbackDescriptor) -> Result<String> {
        render_template(callback.event(), |name| {
            self.container.value(name).map(|value| match value {
                Value::String(s) => s,
                other => other.to_string(),
            })
        })
        .map_err(|name| {
            HookwireError::invalid(
                callback.token().as_str(),
                format!("no value bound for event fragment '{{{name}}}'"),
            )
        })
    }

    /// A target bound to `(instance, method)` that bypasses the invoker.
    ///
    /// The container is held weakly: it owns the dispatcher, which owns this
    /// target.
    fn direct_target(&self, callback: &CallbackDescriptor, instance: &Arc<dyn Instance>) -> HookTarget {
        let container = Arc::downgrade(&self.container);
        let instance = Arc::clone(instance);
        let method = callback.method().to_string();
        let kind = callback.kind();

        HookTarget::new(callback.token().to_string(), move |args: Vec<Value>| {
            let first = args.first().cloned().unwrap_or(Value::Null);
            let Some(container) = container.upgrade() else {
                return Ok(first);
            };
            let result = instance.call(&method, &mut CallArgs::new(&container, args))?;
            Ok(match kind {
                CallbackKind::Action => first,
                CallbackKind::Filter => result,
            })
        })
    }

    fn proxied_target(&self, callback: &Arc<CallbackDescriptor>) -> HookTarget {
        let me = self.me.clone();
        let callback = Arc::clone(callback);

        HookTarget::new(callback.token().to_string(), move |args: Vec<Value>| {
            match me.upgrade() {
                Some(invoker) => invoker.invoke_callback(&callback, args),
                None => Ok(args.into_iter().next().unwrap_or(Value::Null)),
            }
        })
    }

    /// The proxied invoke path of a callback.
    ///
    /// Applies lazy initialization, the once and loop guards, injected
    /// parameters and exception safety, then calls the target through the
    /// container.
    ///
    /// # Errors
    ///
    /// The target's error, unless the callback is exception-safe.
    pub fn invoke_callback(
        &self,
        callback: &Arc<CallbackDescriptor>,
        args: Vec<Value>,
    ) -> Result<Value, InvocationError> {
        let first = args.first().cloned().unwrap_or(Value::Null);
        let handler = self.resolver.get_handler(callback.handler())?;
        let flags = callback.flags();

        if handler.strategy() == Strategy::Lazy && handler.instance().is_none() {
            self.fire_init(&handler)?;
        }
        if flags.contains(InvokeFlags::ONCE) && callback.fired() > 0 {
            return Ok(first);
        }
        if flags.contains(InvokeFlags::LOOP) && callback.is_firing() {
            if self.debug || callback.is_debug() {
                tracing::debug!(callback = %callback.token(), "loop guard skipped re-entrant firing");
            }
            return Ok(first);
        }
        if handler.strategy() == Strategy::JustInTime && handler.instance().is_none() {
            self.fire_init(&handler)?;
        }

        let Some(instance) = handler.instance() else {
            if self.debug_enabled(&handler) {
                tracing::debug!(
                    callback = %callback.token(),
                    state = ?handler.state(),
                    "handler has no instance; passing first argument through"
                );
            }
            return Ok(first);
        };

        let _firing = callback.enter();
        let injected = match self.resolve_params(callback, &instance) {
            Ok(injected) => injected,
            Err(err) => return Self::fail(callback, first, err),
        };

        let mut positional = args;
        positional.truncate(callback.arg_count());
        let result = self.container.call(
            callback.token().as_str(),
            positional,
            injected,
            |call| instance.call(callback.method(), call),
        );

        match result {
            Ok(value) => Ok(match callback.kind() {
                CallbackKind::Action => first,
                CallbackKind::Filter => value,
            }),
            Err(err) => Self::fail(callback, first, err),
        }
    }

    fn fire_init(&self, handler: &HandlerDescriptor) -> Result<()> {
        self.dispatcher.fire(&handler.init_event(), Vec::new())?;
        if handler.state() == HandlerState::Queued {
            self.load(handler)?;
        }
        Ok(())
    }

    fn fail(
        callback: &CallbackDescriptor,
        first: Value,
        err: InvocationError,
    ) -> Result<Value, InvocationError> {
        if callback.flags().contains(InvokeFlags::SAFE) {
            tracing::error!(
                callback = %callback.token(),
                error = %err,
                "callback failed; passing first argument through"
            );
            return Ok(first);
        }
        Err(err)
    }

    fn resolve_params(
        &self,
        callback: &Arc<CallbackDescriptor>,
        instance: &Arc<dyn Instance>,
    ) -> Result<Vec<Injected>, InvocationError> {
        callback
            .params()
            .iter()
            .map(|param| {
                Ok(match param {
                    Param::Value(value) => Injected::Value(value.clone()),
                    Param::Global(name) => Injected::Value(
                        self.container
                            .value(&global_token(name))
                            .unwrap_or(Value::Null),
                    ),
                    Param::Constant(name) => {
                        let token = constant_token(name);
                        let value = self
                            .container
                            .value(&token)
                            .ok_or(ContainerError::NotFound(token))?;
                        Injected::Value(value)
                    }
                    Param::Container(token) => Injected::Service(self.container.get(token)?),
                    Param::SelfHandler => Injected::Service(Arc::clone(instance).into_any_arc()),
                    Param::SelfCallback => Injected::Service(Arc::clone(callback) as Service),
                })
            })
            .collect()
    }
}
