//! The serializable definition map produced by the scanner.
//!
//! A [`DefinitionMap`] has four top-level tables:
//!
//! - `aliases`: token → token indirections
//! - `hooks`: callback token → key of its parameter bag in `values`
//! - `values`: key → record (modules, handlers, callback bags, services, and
//!   literals under `value:{token}`)
//! - `defs`: ids of dynamic modules whose configuration is recomputed on load
//!
//! All tables preserve insertion order, which is declaration order. That order
//! survives serialization, so a cached map registers callbacks in the same
//! order as a live scan.

use hookwire_system::context::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reflect::{
    CallbackAttrs, CallbackKind, HandlerAttrs, InvokeFlags, ModuleAttrs, Param, Strategy,
};
use crate::token::Token;

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// A module as recorded in the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// Module id.
    pub id: String,
    /// Imported module ids, runtime module and extensions included.
    pub imports: Vec<String>,
    /// Handler ids in declaration order.
    pub handlers: Vec<String>,
    /// Service ids.
    pub services: Vec<String>,
    /// Whether external imports may be appended.
    #[serde(default)]
    pub extendable: bool,
    /// Whether bindings are recomputed on load.
    #[serde(default)]
    pub dynamic: bool,
}

impl ModuleRecord {
    /// Records a module from its reflected attributes.
    #[must_use]
    pub fn from_attrs(id: &str, dynamic: bool, attrs: &ModuleAttrs) -> Self {
        Self {
            id: id.to_string(),
            imports: attrs.imports.iter().map(|c| c.id.to_string()).collect(),
            handlers: attrs.handlers.iter().map(|c| c.id.to_string()).collect(),
            services: attrs.services.iter().map(|c| c.id.to_string()).collect(),
            extendable: attrs.extendable,
            dynamic,
        }
    }
}

/// A handler as recorded in the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerRecord {
    /// Handler id.
    pub id: String,
    /// Initialization strategy.
    pub strategy: Strategy,
    /// Declared trigger event.
    #[serde(default)]
    pub hook: Option<String>,
    /// Trigger priority.
    pub priority: i32,
    /// Context mask.
    pub context: Context,
    /// Whether callbacks are registered.
    pub hookable: bool,
    /// Debug logging flag.
    #[serde(default)]
    pub debug: bool,
    /// Callback tokens in method-declaration order.
    pub callbacks: Vec<Token>,
}

impl HandlerRecord {
    /// Records a handler from its reflected attributes.
    #[must_use]
    pub fn from_attrs(id: &str, attrs: &HandlerAttrs, callbacks: Vec<Token>) -> Self {
        Self {
            id: id.to_string(),
            strategy: attrs.strategy,
            hook: attrs.hook.clone(),
            priority: attrs.priority,
            context: attrs.context,
            hookable: attrs.hookable,
            debug: attrs.debug,
            callbacks,
        }
    }
}

/// A callback's invocation data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackRecord {
    /// Owning handler id.
    pub handler: String,
    /// Method name.
    pub method: String,
    /// Action or filter.
    pub kind: CallbackKind,
    /// Declared event name.
    pub event: String,
    /// Dispatcher priority.
    pub priority: i32,
    /// Delivered positional arguments.
    pub args: usize,
    /// Invocation flags.
    pub flags: InvokeFlags,
    /// Injected parameters.
    #[serde(default)]
    pub params: Vec<Param>,
    /// Context mask.
    pub context: Context,
    /// Debug logging flag.
    #[serde(default)]
    pub debug: bool,
}

impl CallbackRecord {
    /// Records a callback from its reflected attributes.
    #[must_use]
    pub fn from_attrs(handler: &str, attrs: &CallbackAttrs) -> Self {
        Self {
            handler: handler.to_string(),
            method: attrs.method.clone(),
            kind: attrs.kind,
            event: attrs.event.clone(),
            priority: attrs.priority,
            args: attrs.args,
            flags: attrs.flags,
            params: attrs.params.clone(),
            context: attrs.context,
            debug: attrs.debug,
        }
    }

    /// The callback's token.
    #[must_use]
    pub fn token(&self) -> Token {
        Token::callback(&self.handler, &self.method, &self.event, self.priority)
    }
}

/// An auto-wired service as recorded in the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Service id.
    pub id: String,
}

/// One entry of the `values` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    /// A module.
    Module(ModuleRecord),
    /// A handler.
    Handler(HandlerRecord),
    /// A callback parameter bag.
    Callback(CallbackRecord),
    /// A service.
    Service(ServiceRecord),
    /// A literal container value.
    Value {
        /// The literal.
        value: Value,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// DefinitionMap
// ─────────────────────────────────────────────────────────────────────────────

/// Key prefix of literal values in the `values` table.
pub const VALUE_PREFIX: &str = "value:";

fn value_key(token: &str) -> String {
    format!("{VALUE_PREFIX}{token}")
}

/// The token → construction-recipe dictionary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionMap {
    /// Id of the entry module the map was built from.
    pub entry: String,
    /// Token indirections.
    #[serde(default)]
    pub aliases: IndexMap<String, String>,
    /// Callback token → parameter-bag key.
    #[serde(default)]
    pub hooks: IndexMap<String, String>,
    /// Records by key.
    #[serde(default)]
    pub values: IndexMap<String, Record>,
    /// Dynamic module ids.
    #[serde(default)]
    pub defs: Vec<String>,
}

impl DefinitionMap {
    /// An empty map for `entry`.
    #[must_use]
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            ..Self::default()
        }
    }

    /// Records a module. Returns false if it was already present.
    pub fn insert_module(&mut self, record: ModuleRecord) -> bool {
        let token = Token::module(&record.id);
        if self.values.contains_key(token.as_str()) {
            return false;
        }
        self.values.insert(token.into(), Record::Module(record));
        true
    }

    /// Replaces a module record that is already present.
    pub fn update_module(&mut self, record: ModuleRecord) {
        let token = Token::module(&record.id);
        self.values.insert(token.into(), Record::Module(record));
    }

    /// Records a handler. Returns false if it was already present.
    pub fn insert_handler(&mut self, record: HandlerRecord) -> bool {
        let token = Token::handler(&record.id);
        if self.values.contains_key(token.as_str()) {
            return false;
        }
        self.values.insert(token.into(), Record::Handler(record));
        true
    }

    /// Records a callback bag under a fresh key and indexes it in `hooks`.
    pub fn insert_callback(&mut self, token: &Token, record: CallbackRecord) {
        let key = format!("hook:{}", self.hooks.len());
        self.values.insert(key.clone(), Record::Callback(record));
        self.hooks.insert(token.to_string(), key);
    }

    /// Records a service.
    pub fn insert_service(&mut self, id: &str) {
        self.values.insert(
            Token::service(id).into(),
            Record::Service(ServiceRecord { id: id.to_string() }),
        );
    }

    /// Records a literal value.
    ///
    /// Literals are keyed under [`VALUE_PREFIX`], so a bound token can never
    /// replace a module, handler, callback or service record.
    pub fn insert_value(&mut self, token: impl AsRef<str>, value: Value) {
        self.values.insert(value_key(token.as_ref()), Record::Value { value });
    }

    /// Records an alias.
    pub fn insert_alias(&mut self, token: impl Into<String>, target: impl Into<String>) {
        self.aliases.insert(token.into(), target.into());
    }

    /// Looks up a module record by id.
    #[must_use]
    pub fn module(&self, id: &str) -> Option<&ModuleRecord> {
        match self.values.get(Token::module(id).as_str())? {
            Record::Module(record) => Some(record),
            _ => None,
        }
    }

    /// Looks up a handler record by id.
    #[must_use]
    pub fn handler(&self, id: &str) -> Option<&HandlerRecord> {
        match self.values.get(Token::handler(id).as_str())? {
            Record::Handler(record) => Some(record),
            _ => None,
        }
    }

    /// Looks up a callback bag by callback token.
    #[must_use]
    pub fn callback(&self, token: &str) -> Option<&CallbackRecord> {
        let key = self.hooks.get(token)?;
        match self.values.get(key)? {
            Record::Callback(record) => Some(record),
            _ => None,
        }
    }

    /// Looks up a literal value.
    #[must_use]
    pub fn value(&self, token: &str) -> Option<&Value> {
        match self.values.get(&value_key(token))? {
            Record::Value { value } => Some(value),
            _ => None,
        }
    }

    /// Module ids in first-sight order.
    pub fn module_ids(&self) -> impl Iterator<Item = &str> {
        self.values.values().filter_map(|record| match record {
            Record::Module(module) => Some(module.id.as_str()),
            _ => None,
        })
    }

    /// Handler ids in declaration order.
    pub fn handler_ids(&self) -> impl Iterator<Item = &str> {
        self.values.values().filter_map(|record| match record {
            Record::Handler(handler) => Some(handler.id.as_str()),
            _ => None,
        })
    }

    /// Literal values in insertion order.
    pub fn literal_values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().filter_map(|(key, record)| match record {
            Record::Value { value } => Some((key.strip_prefix(VALUE_PREFIX)?, value)),
            _ => None,
        })
    }

    /// Service ids in insertion order.
    pub fn service_ids(&self) -> impl Iterator<Item = &str> {
        self.values.values().filter_map(|record| match record {
            Record::Service(service) => Some(service.id.as_str()),
            _ => None,
        })
    }
}
