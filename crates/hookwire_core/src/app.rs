//! The application registry.
//!
//! An [`App`] owns one engine instance: container, dispatcher, class registry,
//! resolver, invoker and cache compiler. Nothing is global; two apps in the
//! same process are fully independent.
//!
//! # Lifecycle
//!
//! 1. [`App::new`] wires the components from an [`EngineConfig`].
//! 2. [`App::extend`] and [`App::supply`] may be called before bootstrap.
//! 3. [`App::bootstrap`] loads or builds the definition map, seeds the
//!    container and registers every handler reachable from the entry module.
//! 4. The host fires events through the dispatcher.
//! 5. [`App::teardown`] applies a deferred decompile.
//!
//! # Example
//!
//! ```
//! use hookwire_core::prelude::*;
//! use serde_json::{Value, json};
//!
//! struct Greeter;
//!
//! impl Handler for Greeter {
//!     const ID: &'static str = "demo.greeter";
//!
//!     fn attributes() -> HandlerAttrs {
//!         HandlerAttrs::new(Strategy::Immediate)
//!     }
//!
//!     fn callbacks() -> Vec<CallbackAttrs> {
//!         vec![CallbackAttrs::filter("greet", "greeting")]
//!     }
//!
//!     fn construct(_: &Container) -> Result<Self, InvocationError> {
//!         Ok(Greeter)
//!     }
//!
//!     fn call(&self, _method: &str, args: &mut CallArgs<'_>) -> Result<Value, InvocationError> {
//!         let name: String = args.arg_as(0)?;
//!         Ok(json!(format!("hello, {name}")))
//!     }
//! }
//!
//! struct Demo;
//!
//! impl Module for Demo {
//!     const ID: &'static str = "demo";
//!
//!     fn attributes() -> ModuleAttrs {
//!         ModuleAttrs::new().handler::<Greeter>()
//!     }
//! }
//!
//! let mut app = App::new(EngineConfig::new().with_context(Context::FRONTEND));
//! app.bootstrap::<Demo>().unwrap();
//! assert_eq!(app.fire("greeting", vec![json!("world")]).unwrap(), json!("hello, world"));
//! ```

use std::sync::Arc;

use hookwire_system::container::{Container, Service};
use hookwire_system::dispatcher::{Dispatcher, EventDispatcher};
use indexmap::IndexMap;
use serde_json::Value;

use crate::cache::{CacheCompiler, Decompile};
use crate::config::EngineConfig;
use crate::definition::DefinitionMap;
use crate::descriptor::HandlerState;
use crate::error::{CacheError, HookwireError, Result};
use crate::invoker::Invoker;
use crate::reflect::{
    ClassRegistry, DISPATCHER_TOKEN, Handler, HandlerClass, INVOKER_TOKEN, IntoModules, Module,
    ModuleClass, RESOLVER_TOKEN, RuntimeModule, constant_token, global_token,
};
use crate::resolver::Resolver;
use crate::scanner::{DefinitionBuilder, check_bindings};
use crate::token::Token;

/// Tracks the bootstrap phase of an [`App`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum BootState {
    /// `bootstrap()` has not been called.
    #[default]
    NotStarted,
    /// `bootstrap()` is executing.
    Booting,
    /// `bootstrap()` has returned successfully.
    Booted,
    /// `teardown()` has run.
    TornDown,
}

/// One engine instance.
pub struct App {
    config: EngineConfig,
    container: Arc<Container>,
    dispatcher: Arc<dyn Dispatcher>,
    resolver: Arc<Resolver>,
    invoker: Arc<Invoker>,
    cache: CacheCompiler,
    extensions: IndexMap<String, Vec<ModuleClass>>,
    entry: Option<&'static str>,
    state: BootState,
}

impl App {
    /// Creates an app backed by an in-memory [`EventDispatcher`].
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_dispatcher(config, Arc::new(EventDispatcher::new()))
    }

    /// Creates an app bound to a host dispatcher.
    #[must_use]
    pub fn with_dispatcher(config: EngineConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let container = Arc::new(Container::new());
        let registry = Arc::new(ClassRegistry::new());
        let resolver = Arc::new(Resolver::new(Arc::clone(&container), registry));
        let invoker = Invoker::new(
            Arc::clone(&container),
            Arc::clone(&dispatcher),
            Arc::clone(&resolver),
            config.context_evaluator(),
            config.debug,
        );
        let cache = CacheCompiler::new(config.cache_path(), config.cache_enabled);

        Self {
            config,
            container,
            dispatcher,
            resolver,
            invoker,
            cache,
            extensions: IndexMap::new(),
            entry: None,
            state: BootState::NotStarted,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Setup
    // ─────────────────────────────────────────────────────────────────────────

    /// Appends the modules `I` to the imports of the extendable module `M`.
    ///
    /// Takes effect at [`bootstrap`](Self::bootstrap). A cached map built
    /// without the extension is reused as is; decompile after changing them.
    pub fn extend<M: Module, I: IntoModules>(&mut self) -> &mut Self {
        self.extensions
            .entry(M::ID.to_string())
            .or_default()
            .extend(I::module_classes());
        self
    }

    /// Supplies the instance of a user-driven handler.
    ///
    /// # Errors
    ///
    /// [`HookwireError::InvalidDefinition`] if `H` is not user-driven or
    /// already has an instance.
    pub fn supply<H: Handler>(&self, instance: H) -> Result<()> {
        self.resolver
            .registry()
            .register_handler(HandlerClass::of::<H>());
        self.invoker.supply(H::ID, Arc::new(instance))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Loads the module graph rooted at `M` and registers its handlers.
    ///
    /// # Errors
    ///
    /// - [`HookwireError::CircularDependency`] and
    ///   [`HookwireError::InvalidDefinition`] for a misconfigured graph
    /// - [`HookwireError::Construction`] and [`HookwireError::Predicate`] for
    ///   immediate handlers that fail to initialize
    /// - [`HookwireError::InvalidDefinition`] if the app was already bootstrapped
    pub fn bootstrap<M: Module>(&mut self) -> Result<()> {
        if self.state != BootState::NotStarted {
            return Err(HookwireError::invalid(
                Token::module(M::ID),
                "application was already bootstrapped",
            ));
        }

        self.state = BootState::Booting;
        match self.boot(ModuleClass::of::<M>()) {
            Ok(()) => {
                self.entry = Some(M::ID);
                self.state = BootState::Booted;
                tracing::info!(entry = M::ID, "application bootstrapped");
                Ok(())
            }
            Err(err) => {
                if err.is_structural() {
                    tracing::error!(entry = M::ID, error = %err, "module graph is misconfigured");
                }
                self.state = BootState::NotStarted;
                Err(err)
            }
        }
    }

    fn boot(&self, entry: ModuleClass) -> Result<()> {
        let registry = self.resolver.registry();
        registry.register_module(ModuleClass::of::<RuntimeModule>());
        registry.index(entry, &self.extensions);

        let map = self.load_map(entry)?;
        self.seed(&map)?;
        self.resolver.set_map(map);
        self.invoker.register_module(entry.id)
    }

    fn load_map(&self, entry: ModuleClass) -> Result<DefinitionMap> {
        match self.cache.load(entry.id) {
            Ok(map) => return Ok(map),
            Err(CacheError::NotFound(_)) => {}
            Err(err @ CacheError::Stale { .. }) => {
                tracing::debug!(error = %err, "rebuilding definitions");
            }
            Err(err) => {
                tracing::warn!(error = %err, "definition cache unreadable; rebuilding");
            }
        }

        let map = DefinitionBuilder::new(&self.container)
            .with_extensions(self.extensions.clone())
            .build(entry)?;
        if let Err(err) = self.cache.save(&map) {
            tracing::warn!(path = %self.cache.path().display(), error = %err, "failed to write definition cache");
        }
        Ok(map)
    }

    fn seed(&self, map: &DefinitionMap) -> Result<()> {
        for (token, value) in map.literal_values() {
            self.container.set_value(token, value.clone());
        }
        for (token, target) in &map.aliases {
            self.container.alias(token.as_str(), target.as_str());
        }
        for (name, value) in &self.config.globals {
            self.container.set_value(global_token(name), value.clone());
        }
        for (name, value) in &self.config.constants {
            self.container.set_value(constant_token(name), value.clone());
        }

        self.container
            .set_shared(INVOKER_TOKEN, Arc::clone(&self.invoker) as Service);
        self.container
            .set_shared(RESOLVER_TOKEN, Arc::clone(&self.resolver) as Service);
        self.container
            .set(DISPATCHER_TOKEN, Arc::clone(&self.dispatcher));

        for id in &map.defs {
            let class = self.resolver.registry().module(id).ok_or_else(|| {
                HookwireError::invalid(Token::module(id), "dynamic module class is not registered")
            })?;
            let bindings = class.configure(&self.container);
            check_bindings(&Token::module(id), &bindings)?;
            self.container.merge(bindings);
        }
        Ok(())
    }

    /// Applies a pending deferred decompile when configured to.
    ///
    /// # Errors
    ///
    /// [`HookwireError::Cache`] if the cache file cannot be removed.
    pub fn teardown(&mut self) -> Result<()> {
        if self.config.decompile_on_shutdown && self.cache.flush()? {
            tracing::debug!(path = %self.cache.path().display(), "definition cache removed");
        }
        self.state = BootState::TornDown;
        Ok(())
    }

    /// Requests removal of the definition cache.
    ///
    /// # Errors
    ///
    /// [`HookwireError::Cache`] if an immediate removal fails.
    pub fn decompile(&self, mode: Decompile) -> Result<()> {
        Ok(self.cache.decompile(mode)?)
    }

    /// Fires `event` through the dispatcher.
    ///
    /// # Errors
    ///
    /// [`HookwireError::Dispatch`] if a target fails.
    pub fn fire(&self, event: &str, args: Vec<Value>) -> Result<Value> {
        Ok(self.dispatcher.fire(event, args)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// The configuration this app was created with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The container.
    #[must_use]
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// The dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    /// The resolver.
    #[must_use]
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// The invoker.
    #[must_use]
    pub fn invoker(&self) -> &Arc<Invoker> {
        &self.invoker
    }

    /// The cache compiler.
    #[must_use]
    pub fn cache(&self) -> &CacheCompiler {
        &self.cache
    }

    /// The entry module id, once bootstrapped.
    #[must_use]
    pub fn entry(&self) -> Option<&'static str> {
        self.entry
    }

    /// Returns true between a successful bootstrap and teardown.
    #[must_use]
    pub fn is_booted(&self) -> bool {
        self.state == BootState::Booted
    }

    /// The instance of `H`, once constructed or supplied.
    #[must_use]
    pub fn instance<H: Handler>(&self) -> Option<Arc<H>> {
        self.invoker.instance::<H>()
    }

    /// The state of `H`, if it has been resolved.
    #[must_use]
    pub fn handler_state<H: Handler>(&self) -> Option<HandlerState> {
        self.invoker.state(H::ID)
    }

    /// Every handler in the definition map with its current state.
    #[must_use]
    pub fn states(&self) -> Vec<(String, HandlerState)> {
        self.resolver
            .map()
            .handler_ids()
            .map(|id| {
                let state = self.invoker.state(id).unwrap_or(HandlerState::Uninitialized);
                (id.to_string(), state)
            })
            .collect()
    }
}
