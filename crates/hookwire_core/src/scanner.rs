//! Dependency scanner and definition builder.
//!
//! [`DefinitionBuilder::build`] walks the import tree depth-first from an entry
//! module and records every module, handler, callback, service and binding in a
//! [`DefinitionMap`].
//!
//! # Ordering
//!
//! Imports are visited in declaration order before the importing module's own
//! bindings and handlers, handlers in declaration order, and each handler's
//! callbacks in method-declaration order. The map preserves that order.
//!
//! # Cycles
//!
//! A module re-entered while it is still on the walk stack aborts the build
//! with [`HookwireError::CircularDependency`] naming the cycle. A module
//! reached twice through different branches is a diamond, not a cycle, and is
//! recorded once.
//!
//! # Bindings
//!
//! Tokens with an engine prefix (`module:`, `handler:`, `callback:`,
//! `instance:`, `service:`) name engine objects and cannot be bound by modules
//! or handlers.

use hashbrown::HashSet;
use hookwire_system::container::{Bindings, Container, Definition};
use indexmap::IndexMap;

use crate::definition::{CallbackRecord, DefinitionMap, HandlerRecord, ModuleRecord};
use crate::error::{HookwireError, Result};
use crate::reflect::{HandlerClass, ModuleClass, RuntimeModule};
use crate::token::Token;

/// A handler's reflected definition.
#[derive(Debug, Clone)]
pub struct ReflectedHandler {
    /// The handler record.
    pub record: HandlerRecord,
    /// Callback tokens and bags, in method-declaration order.
    pub callbacks: Vec<(Token, CallbackRecord)>,
    /// Class-level bindings.
    pub bindings: Bindings,
}

/// Reflects one handler class into records.
///
/// # Errors
///
/// [`HookwireError::InvalidDefinition`] for callbacks without a method or
/// event, for two callbacks sharing a token, and for definitions binding an
/// engine token.
pub fn reflect_handler(class: HandlerClass) -> Result<ReflectedHandler> {
    let attrs = class.attributes();
    let mut callbacks: Vec<(Token, CallbackRecord)> = Vec::new();

    for callback in class.callbacks() {
        if callback.method.is_empty() {
            return Err(HookwireError::invalid(
                Token::handler(class.id),
                "callback without a method name",
            ));
        }
        if callback.event.is_empty() {
            return Err(HookwireError::invalid(
                Token::handler(class.id),
                format!("callback '{}' has no event", callback.method),
            ));
        }

        let record = CallbackRecord::from_attrs(class.id, &callback);
        let token = record.token();
        if callbacks.iter().any(|(existing, _)| *existing == token) {
            return Err(HookwireError::invalid(token, "declared twice"));
        }
        callbacks.push((token, record));
    }

    let bindings = class.definition();
    check_bindings(&Token::handler(class.id), &bindings)?;

    let tokens = callbacks.iter().map(|(token, _)| token.clone()).collect();
    Ok(ReflectedHandler {
        record: HandlerRecord::from_attrs(class.id, &attrs, tokens),
        callbacks,
        bindings,
    })
}

/// Reflects one module class into a record, without extensions.
#[must_use]
pub fn reflect_module(class: ModuleClass) -> ModuleRecord {
    ModuleRecord::from_attrs(class.id, class.dynamic, &class.attributes())
}

/// Rejects bindings from `owner` that target an engine token.
///
/// # Errors
///
/// [`HookwireError::InvalidDefinition`] naming the first reserved token.
pub fn check_bindings(owner: &Token, bindings: &Bindings) -> Result<()> {
    match bindings
        .iter()
        .find(|(token, _)| Token::from_raw(token.as_str()).kind().is_some())
    {
        Some((token, _)) => Err(HookwireError::invalid(
            owner.as_str(),
            format!("binds reserved token '{token}'"),
        )),
        None => Ok(()),
    }
}

/// Merges container bindings into the map's `values` and `aliases` tables.
///
/// # Errors
///
/// See [`check_bindings`].
pub fn merge_bindings(map: &mut DefinitionMap, owner: &Token, bindings: Bindings) -> Result<()> {
    check_bindings(owner, &bindings)?;
    for (token, definition) in bindings {
        match definition {
            Definition::Value(value) => map.insert_value(token, value),
            Definition::Alias(target) => map.insert_alias(token, target),
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// DefinitionBuilder
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a [`DefinitionMap`] from an entry module.
///
/// # Example
///
/// ```
/// use hookwire_core::prelude::*;
/// use hookwire_core::scanner::DefinitionBuilder;
///
/// struct Root;
///
/// impl Module for Root {
///     const ID: &'static str = "app.root";
///     fn attributes() -> ModuleAttrs {
///         ModuleAttrs::new()
///     }
/// }
///
/// let container = Container::new();
/// let map = DefinitionBuilder::new(&container)
///     .build(ModuleClass::of::<Root>())
///     .unwrap();
///
/// assert_eq!(map.entry, "app.root");
/// assert!(map.module("hookwire.runtime").is_some());
/// ```
pub struct DefinitionBuilder<'a> {
    container: &'a Container,
    extensions: IndexMap<String, Vec<ModuleClass>>,
    runtime: bool,
}

impl<'a> DefinitionBuilder<'a> {
    /// A builder that evaluates module configuration against `container`.
    #[must_use]
    pub fn new(container: &'a Container) -> Self {
        Self {
            container,
            extensions: IndexMap::new(),
            runtime: true,
        }
    }

    /// Appends `import` to the imports of the extendable module `module_id`.
    #[must_use]
    pub fn extend(mut self, module_id: impl Into<String>, import: ModuleClass) -> Self {
        self.extensions.entry(module_id.into()).or_default().push(import);
        self
    }

    /// Replaces every pending extension.
    #[must_use]
    pub fn with_extensions(mut self, extensions: IndexMap<String, Vec<ModuleClass>>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Skips the implicit runtime module import.
    #[must_use]
    pub fn without_runtime(mut self) -> Self {
        self.runtime = false;
        self
    }

    /// Walks the import tree from `entry`.
    ///
    /// # Errors
    ///
    /// - [`HookwireError::CircularDependency`] if a module imports one of its ancestors
    /// - [`HookwireError::InvalidDefinition`] for malformed handlers or for
    ///   extensions of a module that is not extendable
    pub fn build(&self, entry: ModuleClass) -> Result<DefinitionMap> {
        let mut walk = Walk {
            builder: self,
            map: DefinitionMap::new(entry.id),
            stack: Vec::new(),
            done: HashSet::new(),
            handlers: HashSet::new(),
        };
        walk.visit(entry, true)?;

        for module_id in self.extensions.keys() {
            if !walk.done.contains(module_id.as_str()) {
                tracing::warn!(module = %module_id, "extension targets a module outside the graph");
            }
        }

        let map = walk.map;
        tracing::debug!(
            entry = entry.id,
            modules = map.module_ids().count(),
            handlers = map.handler_ids().count(),
            callbacks = map.hooks.len(),
            "definition map built"
        );
        Ok(map)
    }
}

struct Walk<'b, 'a> {
    builder: &'b DefinitionBuilder<'a>,
    map: DefinitionMap,
    stack: Vec<&'static str>,
    done: HashSet<&'static str>,
    handlers: HashSet<&'static str>,
}

impl Walk<'_, '_> {
    fn visit(&mut self, class: ModuleClass, is_entry: bool) -> Result<()> {
        if let Some(pos) = self.stack.iter().position(|id| *id == class.id) {
            let mut chain: Vec<String> = self.stack[pos..].iter().map(|id| (*id).to_string()).collect();
            chain.push(class.id.to_string());
            return Err(HookwireError::CircularDependency { chain });
        }
        if self.done.contains(class.id) {
            return Ok(());
        }

        let mut attrs = class.attributes();
        if let Some(extra) = self.builder.extensions.get(class.id) {
            if !attrs.extendable {
                return Err(HookwireError::invalid(
                    Token::module(class.id),
                    "module is not extendable",
                ));
            }
            attrs.imports.extend(extra.iter().copied());
        }
        if is_entry && self.builder.runtime {
            attrs.imports.push(ModuleClass::of::<RuntimeModule>());
        }

        self.map
            .insert_module(ModuleRecord::from_attrs(class.id, class.dynamic, &attrs));

        self.stack.push(class.id);
        for import in &attrs.imports {
            self.visit(*import, false)?;
        }
        self.stack.pop();
        self.done.insert(class.id);

        if class.dynamic {
            self.map.defs.push(class.id.to_string());
        } else {
            merge_bindings(
                &mut self.map,
                &Token::module(class.id),
                class.configure(self.builder.container),
            )?;
        }

        for service in &attrs.services {
            self.map.insert_service(service.id);
        }

        for handler in &attrs.handlers {
            if !self.handlers.insert(handler.id) {
                continue;
            }
            let reflected = reflect_handler(*handler)?;
            self.map.insert_handler(reflected.record);
            merge_bindings(&mut self.map, &Token::handler(handler.id), reflected.bindings)?;
            for (token, record) in reflected.callbacks {
                self.map.insert_callback(&token, record);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{CallbackAttrs, Handler, HandlerAttrs, Module, ModuleAttrs, Strategy};
    use hookwire_system::error::InvocationError;
    use serde_json::json;

    struct Cart;

    impl Handler for Cart {
        const ID: &'static str = "shop.cart";

        fn attributes() -> HandlerAttrs {
            HandlerAttrs::new(Strategy::Immediate)
        }

        fn callbacks() -> Vec<CallbackAttrs> {
            vec![
                CallbackAttrs::filter("total", "cart_total"),
                CallbackAttrs::action("empty", "logout").args(0),
            ]
        }

        fn definition() -> Bindings {
            Bindings::new().value("shop.cart.max", json!(50))
        }

        fn construct(_: &Container) -> Result<Self, InvocationError> {
            Ok(Cart)
        }
    }

    struct Broken;

    impl Handler for Broken {
        const ID: &'static str = "shop.broken";

        fn attributes() -> HandlerAttrs {
            HandlerAttrs::new(Strategy::Immediate)
        }

        fn callbacks() -> Vec<CallbackAttrs> {
            vec![
                CallbackAttrs::action("save", "save_post"),
                CallbackAttrs::action("save", "save_post"),
            ]
        }

        fn construct(_: &Container) -> Result<Self, InvocationError> {
            Ok(Broken)
        }
    }

    struct Shop;

    impl Module for Shop {
        const ID: &'static str = "shop";

        fn attributes() -> ModuleAttrs {
            ModuleAttrs::new().handler::<Cart>()
        }

        fn configure(_: &Container) -> Bindings {
            Bindings::new().value("shop.currency", json!("EUR"))
        }
    }

    struct Dyn;

    impl Module for Dyn {
        const ID: &'static str = "dyn";
        const DYNAMIC: bool = true;

        fn attributes() -> ModuleAttrs {
            ModuleAttrs::new().handler::<Cart>()
        }

        fn configure(_: &Container) -> Bindings {
            Bindings::new().value("dyn.now", json!(1))
        }
    }

    struct Root;

    impl Module for Root {
        const ID: &'static str = "root";

        fn attributes() -> ModuleAttrs {
            ModuleAttrs::new().imports::<(Shop, Dyn)>()
        }
    }

    struct BrokenRoot;

    impl Module for BrokenRoot {
        const ID: &'static str = "broken";

        fn attributes() -> ModuleAttrs {
            ModuleAttrs::new().handler::<Broken>()
        }
    }

    #[test]
    fn build_records_modules_in_first_sight_order() {
        let container = Container::new();
        let map = DefinitionBuilder::new(&container)
            .build(ModuleClass::of::<Root>())
            .unwrap();

        let modules: Vec<_> = map.module_ids().collect();
        assert_eq!(modules, vec!["root", "shop", "dyn", "hookwire.runtime"]);
        assert_eq!(
            map.module("root").unwrap().imports,
            vec!["shop", "dyn", "hookwire.runtime"]
        );
    }

    #[test]
    fn shared_handler_is_recorded_once() {
        let container = Container::new();
        let map = DefinitionBuilder::new(&container)
            .build(ModuleClass::of::<Root>())
            .unwrap();

        assert_eq!(map.handler_ids().collect::<Vec<_>>(), vec!["shop.cart"]);
        assert_eq!(map.hooks.len(), 2);
        let record = map.handler("shop.cart").unwrap();
        assert_eq!(
            record.callbacks,
            vec![
                Token::callback("shop.cart", "total", "cart_total", 10),
                Token::callback("shop.cart", "empty", "logout", 10),
            ]
        );
    }

    #[test]
    fn bindings_are_merged_and_dynamic_modules_deferred() {
        let container = Container::new();
        let map = DefinitionBuilder::new(&container)
            .build(ModuleClass::of::<Root>())
            .unwrap();

        assert_eq!(map.value("shop.currency"), Some(&json!("EUR")));
        assert_eq!(map.value("shop.cart.max"), Some(&json!(50)));
        assert_eq!(map.value("dyn.now"), None);
        assert_eq!(map.defs, vec!["dyn"]);
        assert_eq!(map.aliases.get("invoker").map(String::as_str), Some("hookwire.invoker"));
    }

    #[test]
    fn duplicate_callback_is_invalid() {
        let container = Container::new();
        let err = DefinitionBuilder::new(&container)
            .build(ModuleClass::of::<BrokenRoot>())
            .unwrap_err();
        assert!(matches!(err, HookwireError::InvalidDefinition { .. }));
    }

    #[test]
    fn extending_closed_module_is_invalid() {
        let container = Container::new();
        let err = DefinitionBuilder::new(&container)
            .extend("shop", ModuleClass::of::<BrokenRoot>())
            .build(ModuleClass::of::<Root>())
            .unwrap_err();
        match err {
            HookwireError::InvalidDefinition { token, .. } => assert_eq!(token, "module:shop"),
            other => panic!("expected InvalidDefinition, got {other:?}"),
        }
    }

    #[test]
    fn without_runtime_skips_internal_import() {
        let container = Container::new();
        let map = DefinitionBuilder::new(&container)
            .without_runtime()
            .build(ModuleClass::of::<Shop>())
            .unwrap();
        assert!(map.module("hookwire.runtime").is_none());
        assert!(map.aliases.is_empty());
    }

    struct Shadow;

    impl Handler for Shadow {
        const ID: &'static str = "shop.shadow";

        fn attributes() -> HandlerAttrs {
            HandlerAttrs::new(Strategy::Immediate)
        }

        fn definition() -> Bindings {
            Bindings::new().alias("instance:shop.cart", "shop.currency")
        }

        fn construct(_: &Container) -> Result<Self, InvocationError> {
            Ok(Shadow)
        }
    }

    #[test]
    fn handler_binding_an_engine_token_is_invalid() {
        let err = reflect_handler(HandlerClass::of::<Shadow>()).unwrap_err();
        match err {
            HookwireError::InvalidDefinition { token, reason } => {
                assert_eq!(token, "handler:shop.shadow");
                assert!(reason.contains("instance:shop.cart"));
            }
            other => panic!("expected InvalidDefinition, got {other:?}"),
        }
    }
}
