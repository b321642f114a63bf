//! Resolver: turns definition-map entries into live descriptors on demand.
//!
//! Every `get_*` call is idempotent. The first call builds the descriptor and
//! stores it in the container under its token; later calls are container hits.
//! Classes missing from the definition map fall back to live reflection
//! through the [`ClassRegistry`].

use std::sync::Arc;
use std::thread::{self, ThreadId};

use hashbrown::{HashMap, HashSet};
use hookwire_system::container::Container;
use parking_lot::{Mutex, RwLock};

use crate::definition::{CallbackRecord, DefinitionMap, HandlerRecord, ModuleRecord};
use crate::descriptor::{CallbackDescriptor, HandlerDescriptor, ModuleDescriptor};
use crate::error::{HookwireError, Result};
use crate::reflect::{ClassRegistry, Handler, HandlerClass, Module, ModuleClass};
use crate::scanner::{reflect_handler, reflect_module};
use crate::token::Token;

/// Resolves module, handler and callback descriptors.
pub struct Resolver {
    container: Arc<Container>,
    registry: Arc<ClassRegistry>,
    map: RwLock<Arc<DefinitionMap>>,
    live: RwLock<DefinitionMap>,
    resolving: Mutex<HashMap<ThreadId, Vec<String>>>,
}

/// Pops the resolving stack when a resolution ends.
struct Resolving<'a> {
    stacks: &'a Mutex<HashMap<ThreadId, Vec<String>>>,
    thread: ThreadId,
}

impl Drop for Resolving<'_> {
    fn drop(&mut self) {
        let mut stacks = self.stacks.lock();
        if let Some(stack) = stacks.get_mut(&self.thread) {
            stack.pop();
            if stack.is_empty() {
                stacks.remove(&self.thread);
            }
        }
    }
}

impl Resolver {
    /// A resolver with an empty definition map.
    #[must_use]
    pub fn new(container: Arc<Container>, registry: Arc<ClassRegistry>) -> Self {
        Self {
            container,
            registry,
            map: RwLock::new(Arc::new(DefinitionMap::default())),
            live: RwLock::new(DefinitionMap::default()),
            resolving: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the definition map consumed by later resolutions.
    pub fn set_map(&self, map: DefinitionMap) {
        *self.map.write() = Arc::new(map);
    }

    /// The current definition map.
    #[must_use]
    pub fn map(&self) -> Arc<DefinitionMap> {
        Arc::clone(&self.map.read())
    }

    /// The class registry used for live reflection.
    #[must_use]
    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    fn enter(&self, token: &str) -> Result<Resolving<'_>> {
        let thread = thread::current().id();
        let mut stacks = self.resolving.lock();
        let stack = stacks.entry(thread).or_default();
        if let Some(pos) = stack.iter().position(|t| t == token) {
            let mut chain = stack[pos..].to_vec();
            chain.push(token.to_string());
            return Err(HookwireError::CircularDependency { chain });
        }
        stack.push(token.to_string());
        Ok(Resolving {
            stacks: &self.resolving,
            thread,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    fn module_record(&self, id: &str) -> Result<ModuleRecord> {
        if let Some(record) = self.map.read().module(id) {
            return Ok(record.clone());
        }
        if let Some(record) = self.live.read().module(id) {
            return Ok(record.clone());
        }
        let class = self
            .registry
            .module(id)
            .ok_or_else(|| HookwireError::invalid(Token::module(id), "unknown module class"))?;

        tracing::debug!(module = id, "reflecting module outside the definition map");
        let record = reflect_module(class);
        self.live.write().insert_module(record.clone());
        Ok(record)
    }

    fn handler_record(&self, id: &str) -> Result<HandlerRecord> {
        if let Some(record) = self.map.read().handler(id) {
            return Ok(record.clone());
        }
        if let Some(record) = self.live.read().handler(id) {
            return Ok(record.clone());
        }
        let class = self.handler_class(id)?;

        tracing::debug!(handler = id, "reflecting handler outside the definition map");
        let reflected = reflect_handler(class)?;
        self.container.merge(reflected.bindings);
        let mut live = self.live.write();
        live.insert_handler(reflected.record.clone());
        for (token, record) in reflected.callbacks {
            if live.callback(token.as_str()).is_none() {
                live.insert_callback(&token, record);
            }
        }
        Ok(reflected.record)
    }

    fn callback_record(&self, token: &str) -> Result<CallbackRecord> {
        if let Some(record) = self.map.read().callback(token) {
            return Ok(record.clone());
        }
        if let Some(record) = self.live.read().callback(token) {
            return Ok(record.clone());
        }

        // Reflecting the owner records its callbacks.
        let owner = Token::from_raw(token);
        if let Some(handler) = owner.class_id() {
            self.handler_record(handler)?;
            if let Some(record) = self.live.read().callback(token) {
                return Ok(record.clone());
            }
        }
        Err(HookwireError::invalid(token, "unknown callback"))
    }

    /// The handler class registered under `id`.
    ///
    /// # Errors
    ///
    /// [`HookwireError::InvalidDefinition`] if no such class is registered.
    pub fn handler_class(&self, id: &str) -> Result<HandlerClass> {
        self.registry
            .handler(id)
            .ok_or_else(|| HookwireError::invalid(Token::handler(id), "unknown handler class"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Descriptors
    // ─────────────────────────────────────────────────────────────────────────

    fn module_descriptor(&self, id: &str) -> Result<Arc<ModuleDescriptor>> {
        let token = Token::module(id);
        if self.container.has(token.as_str()) {
            return Ok(self.container.get_as::<ModuleDescriptor>(token.as_str())?);
        }
        let descriptor = Arc::new(ModuleDescriptor::from_record(&self.module_record(id)?));
        self.container
            .set_shared(token.as_str(), Arc::clone(&descriptor) as _);
        Ok(descriptor)
    }

    /// Resolves a module descriptor by id.
    ///
    /// # Errors
    ///
    /// - [`HookwireError::InvalidDefinition`] for unknown modules
    /// - [`HookwireError::CircularDependency`] on re-entrant resolution
    pub fn get_module(&self, id: &str) -> Result<Arc<ModuleDescriptor>> {
        let _resolving = self.enter(Token::module(id).as_str())?;
        self.module_descriptor(id)
    }

    /// Resolves the module descriptor of `M`, registering the class if needed.
    ///
    /// # Errors
    ///
    /// See [`get_module`](Self::get_module).
    pub fn get_module_of<M: Module>(&self) -> Result<Arc<ModuleDescriptor>> {
        self.registry.register_module(ModuleClass::of::<M>());
        self.get_module(M::ID)
    }

    /// Resolves a handler descriptor by id.
    ///
    /// # Errors
    ///
    /// - [`HookwireError::InvalidDefinition`] for unknown handlers
    /// - [`HookwireError::CircularDependency`] on re-entrant resolution
    pub fn get_handler(&self, id: &str) -> Result<Arc<HandlerDescriptor>> {
        let token = Token::handler(id);
        if self.container.has(token.as_str()) {
            return Ok(self.container.get_as::<HandlerDescriptor>(token.as_str())?);
        }
        let _resolving = self.enter(token.as_str())?;
        let descriptor = Arc::new(HandlerDescriptor::from_record(&self.handler_record(id)?));
        self.container
            .set_shared(token.as_str(), Arc::clone(&descriptor) as _);
        Ok(descriptor)
    }

    /// Resolves the handler descriptor of `H`, registering the class if needed.
    ///
    /// # Errors
    ///
    /// See [`get_handler`](Self::get_handler).
    pub fn get_handler_of<H: Handler>(&self) -> Result<Arc<HandlerDescriptor>> {
        self.registry.register_handler(HandlerClass::of::<H>());
        self.get_handler(H::ID)
    }

    /// Resolves a callback descriptor by token.
    ///
    /// # Errors
    ///
    /// - [`HookwireError::InvalidDefinition`] for unknown callbacks
    /// - [`HookwireError::CircularDependency`] on re-entrant resolution
    pub fn get_callback(&self, token: &str) -> Result<Arc<CallbackDescriptor>> {
        if self.container.has(token) {
            return Ok(self.container.get_as::<CallbackDescriptor>(token)?);
        }
        let _resolving = self.enter(token)?;
        let record = self.callback_record(token)?;
        let descriptor = Arc::new(CallbackDescriptor::from_record(Token::from_raw(token), &record));
        self.container.set_shared(token, Arc::clone(&descriptor) as _);
        Ok(descriptor)
    }

    /// The callbacks of `handler` in declaration order.
    ///
    /// The token list is computed once per handler; later calls reuse it.
    ///
    /// # Errors
    ///
    /// Propagates callback resolution errors.
    pub fn handler_callbacks(&self, handler: &HandlerDescriptor) -> Result<Vec<Arc<CallbackDescriptor>>> {
        let tokens = match handler.callbacks() {
            Some(tokens) => tokens,
            None => {
                let record = self.handler_record(handler.id())?;
                handler.init_callbacks(record.callbacks)
            }
        };
        tokens
            .iter()
            .map(|token| self.get_callback(token.as_str()))
            .collect()
    }

    /// Every module reachable from `entry`, imports before importers.
    ///
    /// # Errors
    ///
    /// [`HookwireError::CircularDependency`] if the imports form a cycle.
    pub fn walk_modules(&self, entry: &str) -> Result<Vec<Arc<ModuleDescriptor>>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.walk(entry, &mut out, &mut seen)?;
        Ok(out)
    }

    fn walk(
        &self,
        id: &str,
        out: &mut Vec<Arc<ModuleDescriptor>>,
        seen: &mut HashSet<String>,
    ) -> Result<()> {
        let _resolving = self.enter(Token::module(id).as_str())?;
        if seen.contains(id) {
            return Ok(());
        }
        let module = self.module_descriptor(id)?;
        for import in module.imports() {
            self.walk(import, out, seen)?;
        }
        seen.insert(id.to_string());
        out.push(module);
        Ok(())
    }

    /// Binds every service of `module` as a memoized container factory.
    ///
    /// # Errors
    ///
    /// [`HookwireError::InvalidDefinition`] for services with no registered class.
    pub fn bind_services(&self, module: &ModuleDescriptor) -> Result<()> {
        for id in module.services() {
            let token = Token::service(id);
            if self.container.has(token.as_str()) {
                continue;
            }
            let class = self
                .registry
                .service(id)
                .ok_or_else(|| HookwireError::invalid(token.as_str(), "unknown service class"))?;
            class.bind(&self.container, token.as_str());
        }
        Ok(())
    }
}
