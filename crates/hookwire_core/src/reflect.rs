//! The introspection pass: how classes describe themselves to the engine.
//!
//! Modules, handlers and services are ordinary Rust types implementing
//! [`Module`], [`Handler`] or [`Injectable`]. Their associated functions return
//! attribute records ([`ModuleAttrs`], [`HandlerAttrs`], [`CallbackAttrs`])
//! which the scanner turns into a [`DefinitionMap`](crate::definition::DefinitionMap).
//!
//! Because the scanner only sees types through these records, each class is
//! captured once as a set of function pointers ([`ModuleClass`],
//! [`HandlerClass`], [`ServiceClass`]) and indexed by id in a
//! [`ClassRegistry`].
//!
//! # Example
//!
//! ```
//! use hookwire_core::prelude::*;
//! use serde_json::Value;
//!
//! struct Audit;
//!
//! impl Handler for Audit {
//!     const ID: &'static str = "app.audit";
//!
//!     fn attributes() -> HandlerAttrs {
//!         HandlerAttrs::new(Strategy::Immediate)
//!     }
//!
//!     fn callbacks() -> Vec<CallbackAttrs> {
//!         vec![CallbackAttrs::action("record", "save_post").args(2)]
//!     }
//!
//!     fn construct(_: &Container) -> Result<Self, InvocationError> {
//!         Ok(Audit)
//!     }
//!
//!     fn call(&self, method: &str, args: &mut CallArgs<'_>) -> Result<Value, InvocationError> {
//!         match method {
//!             "record" => Ok(args.first()),
//!             other => Err(InvocationError::UnknownMethod {
//!                 target: Self::ID.into(),
//!                 method: other.into(),
//!             }),
//!         }
//!     }
//! }
//!
//! struct Root;
//!
//! impl Module for Root {
//!     const ID: &'static str = "app.root";
//!
//!     fn attributes() -> ModuleAttrs {
//!         ModuleAttrs::new().handler::<Audit>()
//!     }
//! }
//! ```

use std::sync::Arc;

use bitflags::bitflags;
use downcast_rs::{DowncastSync, impl_downcast};
use hookwire_system::args::CallArgs;
use hookwire_system::container::{Bindings, Container, Service};
use hookwire_system::context::Context;
use hookwire_system::error::{ContainerError, InvocationError};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};
use variadics_please::all_tuples;

/// Trigger event used when a queued handler declares none.
pub const DEFAULT_HOOK: &str = "init";

/// Priority used when none is declared.
pub const DEFAULT_PRIORITY: i32 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Class Traits
// ─────────────────────────────────────────────────────────────────────────────

/// A named unit of configuration.
///
/// Modules are never instantiated; they only describe imports, handlers,
/// services and container bindings.
pub trait Module: 'static {
    /// Unique identifier, used to build the module's token.
    const ID: &'static str;

    /// Dynamic modules recompute their bindings on every cache load.
    const DYNAMIC: bool = false;

    /// Declared imports, handlers and services.
    fn attributes() -> ModuleAttrs;

    /// Container bindings contributed by this module.
    fn configure(_container: &Container) -> Bindings {
        Bindings::new()
    }
}

/// A class that groups related event callbacks.
///
/// Lifecycle methods take `&self`; the instance is shared and becomes
/// read-only once initialized, so handlers that need mutable state use
/// interior mutability.
pub trait Handler: Send + Sync + Sized + 'static {
    /// Unique identifier, used to build the handler's tokens.
    const ID: &'static str;

    /// Initialization strategy, trigger and context.
    fn attributes() -> HandlerAttrs;

    /// Hookable methods in declaration order.
    fn callbacks() -> Vec<CallbackAttrs> {
        Vec::new()
    }

    /// Container bindings contributed by this handler class.
    fn definition() -> Bindings {
        Bindings::new()
    }

    /// Builds the instance.
    ///
    /// # Errors
    ///
    /// A failure here is fatal for the handler.
    fn construct(container: &Container) -> Result<Self, InvocationError>;

    /// Whether the handler may initialize in this run.
    ///
    /// # Errors
    ///
    /// An error is fatal; only `Ok(false)` rejects silently.
    fn can_initialize(_container: &Container) -> Result<bool, InvocationError> {
        Ok(true)
    }

    /// Extra bindings registered once the instance is alive.
    ///
    /// # Errors
    ///
    /// Propagates to whoever drove the transition.
    fn configure(&self, _container: &Container) -> Result<Bindings, InvocationError> {
        Ok(Bindings::new())
    }

    /// Runs when the handler becomes ready, unless it was user-supplied.
    ///
    /// # Errors
    ///
    /// Propagates to whoever drove the transition.
    fn on_initialize(&self, _args: &mut CallArgs<'_>) -> Result<(), InvocationError> {
        Ok(())
    }

    /// Dispatches a hookable method by name.
    ///
    /// # Errors
    ///
    /// [`InvocationError::UnknownMethod`] for names the handler does not expose,
    /// otherwise whatever the method returns.
    fn call(&self, method: &str, _args: &mut CallArgs<'_>) -> Result<Value, InvocationError> {
        Err(InvocationError::UnknownMethod {
            target: Self::ID.to_string(),
            method: method.to_string(),
        })
    }
}

/// An auto-wired service declared by a module.
pub trait Injectable: Send + Sync + Sized + 'static {
    /// Unique identifier, used to build the service's token.
    const ID: &'static str;

    /// Builds the service on first access.
    ///
    /// # Errors
    ///
    /// Propagates to the container lookup that triggered construction.
    fn construct(container: &Container) -> Result<Self, ContainerError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Instance
// ─────────────────────────────────────────────────────────────────────────────

/// A constructed handler, erased to the calls the engine makes on it.
pub trait Instance: DowncastSync {
    /// The handler class id.
    fn class_id(&self) -> &'static str;

    /// See [`Handler::configure`].
    ///
    /// # Errors
    ///
    /// Propagates the handler's error.
    fn configure(&self, container: &Container) -> Result<Bindings, InvocationError>;

    /// See [`Handler::on_initialize`].
    ///
    /// # Errors
    ///
    /// Propagates the handler's error.
    fn on_initialize(&self, args: &mut CallArgs<'_>) -> Result<(), InvocationError>;

    /// See [`Handler::call`].
    ///
    /// # Errors
    ///
    /// Propagates the handler's error.
    fn call(&self, method: &str, args: &mut CallArgs<'_>) -> Result<Value, InvocationError>;
}

impl_downcast!(sync Instance);

impl<H: Handler> Instance for H {
    fn class_id(&self) -> &'static str {
        H::ID
    }

    fn configure(&self, container: &Container) -> Result<Bindings, InvocationError> {
        Handler::configure(self, container)
    }

    fn on_initialize(&self, args: &mut CallArgs<'_>) -> Result<(), InvocationError> {
        Handler::on_initialize(self, args)
    }

    fn call(&self, method: &str, args: &mut CallArgs<'_>) -> Result<Value, InvocationError> {
        Handler::call(self, method, args)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Erased Classes
// ─────────────────────────────────────────────────────────────────────────────

/// A [`Module`] type captured as data.
#[derive(Clone, Copy)]
pub struct ModuleClass {
    /// The module id.
    pub id: &'static str,
    /// Whether bindings must be recomputed on every cache load.
    pub dynamic: bool,
    attributes: fn() -> ModuleAttrs,
    configure: fn(&Container) -> Bindings,
}

impl ModuleClass {
    /// Captures `M`.
    #[must_use]
    pub fn of<M: Module>() -> Self {
        Self {
            id: M::ID,
            dynamic: M::DYNAMIC,
            attributes: M::attributes,
            configure: M::configure,
        }
    }

    /// Reflects the module's attributes.
    #[must_use]
    pub fn attributes(&self) -> ModuleAttrs {
        (self.attributes)()
    }

    /// Runs the module's configuration function.
    #[must_use]
    pub fn configure(&self, container: &Container) -> Bindings {
        (self.configure)(container)
    }
}

impl core::fmt::Debug for ModuleClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("ModuleClass").field(&self.id).finish()
    }
}

/// A [`Handler`] type captured as data.
#[derive(Clone, Copy)]
pub struct HandlerClass {
    /// The handler id.
    pub id: &'static str,
    attributes: fn() -> HandlerAttrs,
    callbacks: fn() -> Vec<CallbackAttrs>,
    definition: fn() -> Bindings,
    construct: fn(&Container) -> Result<Arc<dyn Instance>, InvocationError>,
    can_initialize: fn(&Container) -> Result<bool, InvocationError>,
}

fn construct_erased<H: Handler>(container: &Container) -> Result<Arc<dyn Instance>, InvocationError> {
    Ok(Arc::new(H::construct(container)?))
}

impl HandlerClass {
    /// Captures `H`.
    #[must_use]
    pub fn of<H: Handler>() -> Self {
        Self {
            id: H::ID,
            attributes: H::attributes,
            callbacks: H::callbacks,
            definition: H::definition,
            construct: construct_erased::<H>,
            can_initialize: H::can_initialize,
        }
    }

    /// Reflects the handler's attributes.
    #[must_use]
    pub fn attributes(&self) -> HandlerAttrs {
        (self.attributes)()
    }

    /// Reflects the handler's hookable methods.
    #[must_use]
    pub fn callbacks(&self) -> Vec<CallbackAttrs> {
        (self.callbacks)()
    }

    /// The class-level container bindings.
    #[must_use]
    pub fn definition(&self) -> Bindings {
        (self.definition)()
    }

    /// Builds an instance.
    ///
    /// # Errors
    ///
    /// Propagates the handler's construction error.
    pub fn construct(&self, container: &Container) -> Result<Arc<dyn Instance>, InvocationError> {
        (self.construct)(container)
    }

    /// Evaluates the initialization predicate.
    ///
    /// # Errors
    ///
    /// Propagates the predicate's error.
    pub fn can_initialize(&self, container: &Container) -> Result<bool, InvocationError> {
        (self.can_initialize)(container)
    }
}

impl core::fmt::Debug for HandlerClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("HandlerClass").field(&self.id).finish()
    }
}

/// An [`Injectable`] type captured as data.
#[derive(Clone, Copy)]
pub struct ServiceClass {
    /// The service id.
    pub id: &'static str,
    construct: fn(&Container) -> Result<Service, ContainerError>,
}

fn construct_service<S: Injectable>(container: &Container) -> Result<Service, ContainerError> {
    Ok(Arc::new(S::construct(container)?) as Service)
}

impl ServiceClass {
    /// Captures `S`.
    #[must_use]
    pub fn of<S: Injectable>() -> Self {
        Self {
            id: S::ID,
            construct: construct_service::<S>,
        }
    }

    /// Binds the service as a memoized factory under `token`.
    pub fn bind(&self, container: &Container, token: impl Into<String>) {
        container.bind_service(token, self.construct);
    }
}

impl core::fmt::Debug for ServiceClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("ServiceClass").field(&self.id).finish()
    }
}

/// Any captured class.
#[derive(Debug, Clone, Copy)]
pub enum ClassRef {
    /// A module.
    Module(ModuleClass),
    /// A handler.
    Handler(HandlerClass),
    /// A service.
    Service(ServiceClass),
}

impl ClassRef {
    /// Captures a module type.
    #[must_use]
    pub fn module<M: Module>() -> Self {
        Self::Module(ModuleClass::of::<M>())
    }

    /// Captures a handler type.
    #[must_use]
    pub fn handler<H: Handler>() -> Self {
        Self::Handler(HandlerClass::of::<H>())
    }

    /// Captures a service type.
    #[must_use]
    pub fn service<S: Injectable>() -> Self {
        Self::Service(ServiceClass::of::<S>())
    }

    /// The captured class id.
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            Self::Module(class) => class.id,
            Self::Handler(class) => class.id,
            Self::Service(class) => class.id,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tuple Conversions
// ─────────────────────────────────────────────────────────────────────────────

/// Types that can be converted into a list of module classes.
///
/// Implemented for single modules and tuples of modules.
pub trait IntoModules {
    /// Returns the captured classes in declaration order.
    fn module_classes() -> Vec<ModuleClass>;
}

impl<M: Module> IntoModules for M {
    fn module_classes() -> Vec<ModuleClass> {
        vec![ModuleClass::of::<M>()]
    }
}

macro_rules! impl_into_modules_for_tuple {
    ($($M:ident),*) => {
        impl<$($M: Module),*> IntoModules for ($($M,)*) {
            fn module_classes() -> Vec<ModuleClass> {
                vec![$(ModuleClass::of::<$M>()),*]
            }
        }
    };
}

all_tuples!(impl_into_modules_for_tuple, 2, 16, M);

/// Types that can be converted into a list of handler classes.
///
/// Implemented for single handlers and tuples of handlers.
pub trait IntoHandlers {
    /// Returns the captured classes in declaration order.
    fn handler_classes() -> Vec<HandlerClass>;
}

impl<H: Handler> IntoHandlers for H {
    fn handler_classes() -> Vec<HandlerClass> {
        vec![HandlerClass::of::<H>()]
    }
}

macro_rules! impl_into_handlers_for_tuple {
    ($($H:ident),*) => {
        impl<$($H: Handler),*> IntoHandlers for ($($H,)*) {
            fn handler_classes() -> Vec<HandlerClass> {
                vec![$(HandlerClass::of::<$H>()),*]
            }
        }
    };
}

all_tuples!(impl_into_handlers_for_tuple, 2, 16, H);

// ─────────────────────────────────────────────────────────────────────────────
// Attributes
// ─────────────────────────────────────────────────────────────────────────────

/// What a module declares.
#[derive(Debug, Clone, Default)]
pub struct ModuleAttrs {
    /// Imported modules, in declaration order.
    pub imports: Vec<ModuleClass>,
    /// Handlers, in declaration order.
    pub handlers: Vec<HandlerClass>,
    /// Auto-wired services.
    pub services: Vec<ServiceClass>,
    /// Whether external code may append imports.
    pub extendable: bool,
}

impl ModuleAttrs {
    /// An empty declaration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Imports one module.
    #[must_use]
    pub fn import<M: Module>(mut self) -> Self {
        self.imports.push(ModuleClass::of::<M>());
        self
    }

    /// Imports a module or tuple of modules.
    #[must_use]
    pub fn imports<I: IntoModules>(mut self) -> Self {
        self.imports.extend(I::module_classes());
        self
    }

    /// Declares one handler.
    #[must_use]
    pub fn handler<H: Handler>(mut self) -> Self {
        self.handlers.push(HandlerClass::of::<H>());
        self
    }

    /// Declares a handler or tuple of handlers.
    #[must_use]
    pub fn handlers<I: IntoHandlers>(mut self) -> Self {
        self.handlers.extend(I::handler_classes());
        self
    }

    /// Declares an auto-wired service.
    #[must_use]
    pub fn service<S: Injectable>(mut self) -> Self {
        self.services.push(ServiceClass::of::<S>());
        self
    }

    /// Allows external code to append imports.
    #[must_use]
    pub fn extendable(mut self) -> Self {
        self.extendable = true;
        self
    }
}

/// When a handler is constructed relative to host events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Fully initialized during registration.
    Immediate,
    /// Instantiated with callbacks registered at the trigger; finished by the init event.
    Early,
    /// Callbacks registered at the trigger; instantiated by the init event.
    Lazy,
    /// Like `Lazy`, but the init event fires when a callback is about to execute.
    JustInTime,
    /// Fully initialized when the trigger fires.
    Deferred,
    /// Supplied as a pre-existing instance.
    User,
}

impl Strategy {
    /// The lowercase name used in internal event names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Early => "early",
            Self::Lazy => "lazy",
            Self::JustInTime => "just_in_time",
            Self::Deferred => "deferred",
            Self::User => "user",
        }
    }

    /// Whether the strategy waits for a trigger event.
    #[must_use]
    pub fn is_queued(self) -> bool {
        matches!(
            self,
            Self::Early | Self::Lazy | Self::JustInTime | Self::Deferred
        )
    }

    /// Whether construction waits for the init event.
    #[must_use]
    pub fn is_on_demand(self) -> bool {
        matches!(self, Self::Lazy | Self::JustInTime)
    }
}

impl core::fmt::Display for Strategy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a handler declares about itself.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerAttrs {
    /// Initialization strategy.
    pub strategy: Strategy,
    /// Trigger event for queued strategies.
    pub hook: Option<String>,
    /// Trigger priority.
    pub priority: i32,
    /// Contexts the handler may initialize in.
    pub context: Context,
    /// Whether callbacks are registered at all.
    pub hookable: bool,
    /// Log context rejections and lifecycle steps at debug level.
    pub debug: bool,
}

impl HandlerAttrs {
    /// Attributes with the given strategy and defaults for the rest.
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            hook: None,
            priority: DEFAULT_PRIORITY,
            context: Context::GLOBAL,
            hookable: true,
            debug: false,
        }
    }

    /// Sets the trigger event and priority.
    #[must_use]
    pub fn on(mut self, hook: impl Into<String>, priority: i32) -> Self {
        self.hook = Some(hook.into());
        self.priority = priority;
        self
    }

    /// Restricts the contexts the handler initializes in.
    #[must_use]
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Sets the hookable flag.
    #[must_use]
    pub fn hookable(mut self, hookable: bool) -> Self {
        self.hookable = hookable;
        self
    }

    /// Enables debug logging for this handler.
    #[must_use]
    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }
}

bitflags! {
    /// How a callback is dispatched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InvokeFlags: u32 {
        /// Registered as a direct call on the instance.
        const STANDARD = 1 << 0;
        /// Routed through the callback's own invoke path.
        const PROXIED = 1 << 1;
        /// Executes at most once per run.
        const ONCE = 1 << 2;
        /// Ignores re-entrant firings while executing.
        const LOOP = 1 << 3;
        /// Logs failures and passes the first argument through.
        const SAFE = 1 << 4;
    }
}

impl InvokeFlags {
    /// Whether the callback needs the proxied invoke path.
    #[must_use]
    pub fn requires_proxy(self) -> bool {
        self != Self::STANDARD
    }
}

impl Default for InvokeFlags {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl Serialize for InvokeFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for InvokeFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = u32::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits))
    }
}

/// Whether a callback observes or transforms its first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    /// Passes the first argument through regardless of the result.
    #[default]
    Action,
    /// Returns the target's result.
    Filter,
}

/// An extra parameter appended after the host-delivered arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Param {
    /// A literal value.
    Value(Value),
    /// A configured global, `null` when unset.
    Global(String),
    /// A configured constant; missing constants are an error.
    Constant(String),
    /// A container lookup by token.
    Container(String),
    /// The owning handler instance.
    SelfHandler,
    /// The callback descriptor itself.
    SelfCallback,
}

/// Container token under which a global is stored.
#[must_use]
pub fn global_token(name: &str) -> String {
    format!("global:{name}")
}

/// Container token under which a constant is stored.
#[must_use]
pub fn constant_token(name: &str) -> String {
    format!("const:{name}")
}

/// What a hookable method declares.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackAttrs {
    /// The method name passed to [`Handler::call`].
    pub method: String,
    /// Action or filter.
    pub kind: CallbackKind,
    /// Event name, possibly containing `{name}` fragments.
    pub event: String,
    /// Dispatcher priority.
    pub priority: i32,
    /// Positional arguments delivered by the dispatcher.
    pub args: usize,
    /// Invocation strategy.
    pub flags: InvokeFlags,
    /// Injected parameters.
    pub params: Vec<Param>,
    /// Contexts the callback registers in.
    pub context: Context,
    /// Log skips at debug level.
    pub debug: bool,
}

impl CallbackAttrs {
    fn new(kind: CallbackKind, method: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            kind,
            event: event.into(),
            priority: DEFAULT_PRIORITY,
            args: 1,
            flags: InvokeFlags::STANDARD,
            params: Vec::new(),
            context: Context::GLOBAL,
            debug: false,
        }
    }

    /// A callback whose result is ignored.
    #[must_use]
    pub fn action(method: impl Into<String>, event: impl Into<String>) -> Self {
        Self::new(CallbackKind::Action, method, event)
    }

    /// A callback whose result replaces the first argument.
    #[must_use]
    pub fn filter(method: impl Into<String>, event: impl Into<String>) -> Self {
        Self::new(CallbackKind::Filter, method, event)
    }

    /// Sets the dispatcher priority.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the number of delivered positional arguments.
    #[must_use]
    pub fn args(mut self, args: usize) -> Self {
        self.args = args;
        self
    }

    /// Sets the invocation flags.
    #[must_use]
    pub fn flags(mut self, flags: InvokeFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Appends an injected parameter.
    #[must_use]
    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Restricts the contexts the callback registers in.
    #[must_use]
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Enables debug logging for this callback.
    #[must_use]
    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ClassRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Index of every class reachable from an entry module.
///
/// Live reflection falls back to this registry for classes that appear in no
/// definition map.
#[derive(Default)]
pub struct ClassRegistry {
    modules: RwLock<IndexMap<&'static str, ModuleClass>>,
    handlers: RwLock<IndexMap<&'static str, HandlerClass>>,
    services: RwLock<IndexMap<&'static str, ServiceClass>>,
}

impl ClassRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module class. Returns false if the id was already known.
    pub fn register_module(&self, class: ModuleClass) -> bool {
        self.modules.write().insert(class.id, class).is_none()
    }

    /// Registers a handler class. Returns false if the id was already known.
    pub fn register_handler(&self, class: HandlerClass) -> bool {
        self.handlers.write().insert(class.id, class).is_none()
    }

    /// Registers a service class. Returns false if the id was already known.
    pub fn register_service(&self, class: ServiceClass) -> bool {
        self.services.write().insert(class.id, class).is_none()
    }

    /// Registers any captured class.
    pub fn register(&self, class: ClassRef) -> bool {
        match class {
            ClassRef::Module(class) => self.register_module(class),
            ClassRef::Handler(class) => self.register_handler(class),
            ClassRef::Service(class) => self.register_service(class),
        }
    }

    /// Looks up a module class.
    #[must_use]
    pub fn module(&self, id: &str) -> Option<ModuleClass> {
        self.modules.read().get(id).copied()
    }

    /// Looks up a handler class.
    #[must_use]
    pub fn handler(&self, id: &str) -> Option<HandlerClass> {
        self.handlers.read().get(id).copied()
    }

    /// Looks up a service class.
    #[must_use]
    pub fn service(&self, id: &str) -> Option<ServiceClass> {
        self.services.read().get(id).copied()
    }

    /// Registers every class reachable from `entry`, including extensions.
    ///
    /// Cycles are not an error here; the scanner reports them.
    pub fn index(&self, entry: ModuleClass, extensions: &IndexMap<String, Vec<ModuleClass>>) {
        let mut pending = vec![entry];
        while let Some(class) = pending.pop() {
            if !self.register_module(class) {
                continue;
            }
            let attrs = class.attributes();
            for handler in &attrs.handlers {
                self.register_handler(*handler);
            }
            for service in &attrs.services {
                self.register_service(*service);
            }
            pending.extend(attrs.imports.iter().rev().copied());
            if let Some(extra) = extensions.get(class.id) {
                pending.extend(extra.iter().rev().copied());
            }
        }
    }

    /// Number of registered classes of every kind.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.read().len() + self.handlers.read().len() + self.services.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime Module
// ─────────────────────────────────────────────────────────────────────────────

/// Container token of the [`Invoker`](crate::invoker::Invoker).
pub const INVOKER_TOKEN: &str = "hookwire.invoker";
/// Container token of the [`Resolver`](crate::resolver::Resolver).
pub const RESOLVER_TOKEN: &str = "hookwire.resolver";
/// Container token of the host dispatcher.
pub const DISPATCHER_TOKEN: &str = "hookwire.dispatcher";

/// Internal module implicitly imported by every entry module.
pub struct RuntimeModule;

impl Module for RuntimeModule {
    const ID: &'static str = "hookwire.runtime";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new()
    }

    fn configure(_container: &Container) -> Bindings {
        Bindings::new()
            .value("hookwire.version", json!(env!("CARGO_PKG_VERSION")))
            .alias("invoker", INVOKER_TOKEN)
            .alias("resolver", RESOLVER_TOKEN)
            .alias("dispatcher", DISPATCHER_TOKEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    impl Handler for Probe {
        const ID: &'static str = "test.probe";

        fn attributes() -> HandlerAttrs {
            HandlerAttrs::new(Strategy::Lazy).on("wp_loaded", 5)
        }

        fn construct(_: &Container) -> Result<Self, InvocationError> {
            Ok(Probe)
        }
    }

    struct Leaf;

    impl Module for Leaf {
        const ID: &'static str = "test.leaf";

        fn attributes() -> ModuleAttrs {
            ModuleAttrs::new().handler::<Probe>()
        }
    }

    struct Top;

    impl Module for Top {
        const ID: &'static str = "test.top";

        fn attributes() -> ModuleAttrs {
            ModuleAttrs::new().imports::<(Leaf, RuntimeModule)>()
        }
    }

    #[test]
    fn handler_class_captures_attributes() {
        let class = HandlerClass::of::<Probe>();
        assert_eq!(class.id, "test.probe");
        let attrs = class.attributes();
        assert_eq!(attrs.strategy, Strategy::Lazy);
        assert_eq!(attrs.hook.as_deref(), Some("wp_loaded"));
        assert_eq!(attrs.priority, 5);
        assert!(class.callbacks().is_empty());
    }

    #[test]
    fn tuple_imports_keep_declaration_order() {
        let ids: Vec<_> = Top::attributes().imports.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["test.leaf", "hookwire.runtime"]);
    }

    #[test]
    fn registry_indexes_reachable_classes() {
        let registry = ClassRegistry::new();
        registry.index(ModuleClass::of::<Top>(), &IndexMap::new());

        assert!(registry.module("test.leaf").is_some());
        assert!(registry.handler("test.probe").is_some());
        assert!(registry.module("missing").is_none());
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn default_call_is_unknown_method() {
        let container = Container::new();
        let instance = HandlerClass::of::<Probe>().construct(&container).unwrap();
        let mut args = CallArgs::new(&container, Vec::new());
        let err = instance.call("missing", &mut args).unwrap_err();
        assert!(matches!(err, InvocationError::UnknownMethod { .. }));
        assert!(instance.downcast_arc::<Probe>().is_ok());
    }

    #[test]
    fn invoke_flags_proxy_rules() {
        assert!(!InvokeFlags::STANDARD.requires_proxy());
        assert!((InvokeFlags::STANDARD | InvokeFlags::SAFE).requires_proxy());
        assert!(InvokeFlags::ONCE.requires_proxy());
        let json = serde_json::to_string(&(InvokeFlags::ONCE | InvokeFlags::LOOP)).unwrap();
        assert_eq!(json, "12");
    }

    #[test]
    fn params_serialize_tagged() {
        let json = serde_json::to_value(Param::Global("blog_id".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "global", "value": "blog_id"}));
        let back: Param = serde_json::from_value(serde_json::json!({"kind": "self_handler"})).unwrap();
        assert_eq!(back, Param::SelfHandler);
    }

    #[test]
    fn strategy_names() {
        assert_eq!(Strategy::JustInTime.as_str(), "just_in_time");
        assert_eq!(
            serde_json::to_string(&Strategy::JustInTime).unwrap(),
            "\"just_in_time\""
        );
        assert!(Strategy::Deferred.is_queued());
        assert!(!Strategy::User.is_queued());
        assert!(Strategy::Lazy.is_on_demand());
    }
}
