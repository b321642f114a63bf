//! Integration tests for module graph construction: cycles, sharing,
//! extensions, dynamic modules and services.

mod common;

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::Arc;

use common::{Journal, app};
use hookwire_core::error::HookwireError;
use hookwire_core::prelude::*;
use hookwire_core::scanner::DefinitionBuilder;
use hookwire_core::token::Token;
use proptest::prelude::{any, prop, prop_assert, prop_assert_eq, proptest};
use serde_json::{Value, json};

// ─────────────────────────────────────────────────────────────────────────────
// Cycles
// ─────────────────────────────────────────────────────────────────────────────

struct CycleA;

impl Module for CycleA {
    const ID: &'static str = "cycle.a";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new().import::<CycleB>()
    }
}

struct CycleB;

impl Module for CycleB {
    const ID: &'static str = "cycle.b";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new().import::<CycleA>()
    }
}

#[test]
fn import_cycle_names_both_modules() {
    let (mut app, _, _) = app();
    let err = app.bootstrap::<CycleA>().unwrap_err();

    match &err {
        HookwireError::CircularDependency { chain } => {
            assert_eq!(chain, &["cycle.a", "cycle.b", "cycle.a"]);
        }
        other => panic!("expected a circular dependency, got {other:?}"),
    }
    assert_eq!(err.to_string(), "circular dependency: cycle.a -> cycle.b -> cycle.a");
    assert!(!app.is_booted());
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared imports
// ─────────────────────────────────────────────────────────────────────────────

struct Tally;

impl Handler for Tally {
    const ID: &'static str = "shared.tally";

    fn attributes() -> HandlerAttrs {
        HandlerAttrs::new(Strategy::Immediate)
    }

    fn callbacks() -> Vec<CallbackAttrs> {
        vec![CallbackAttrs::action("noop", "tally")]
    }

    fn construct(container: &Container) -> Result<Self, InvocationError> {
        Journal::of(container)?.push("tally:new");
        Ok(Tally)
    }

    fn call(&self, _method: &str, args: &mut CallArgs<'_>) -> Result<Value, InvocationError> {
        Ok(args.first())
    }
}

struct Shared;

impl Module for Shared {
    const ID: &'static str = "shared";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new().handler::<Tally>()
    }
}

struct Left;

impl Module for Left {
    const ID: &'static str = "left";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new().import::<Shared>().handler::<Tally>()
    }
}

struct Right;

impl Module for Right {
    const ID: &'static str = "right";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new().import::<Shared>()
    }
}

struct Diamond;

impl Module for Diamond {
    const ID: &'static str = "diamond";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new().imports::<(Left, Right)>()
    }
}

#[test]
fn shared_handler_is_registered_once() {
    let (mut app, dispatcher, journal) = app();
    app.bootstrap::<Diamond>().unwrap();

    let map = app.resolver().map();
    assert_eq!(map.handler_ids().collect::<Vec<_>>(), vec!["shared.tally"]);
    assert_eq!(
        map.module_ids().collect::<Vec<_>>(),
        vec!["diamond", "left", "shared", "right", "hookwire.runtime"]
    );
    assert_eq!(dispatcher.hook_count("tally"), 1);
    assert_eq!(journal.count("tally:new"), 1);
}

#[test]
fn resolution_is_idempotent() {
    let (mut app, _, _) = app();
    app.bootstrap::<Diamond>().unwrap();

    let first = app.resolver().get_handler("shared.tally").unwrap();
    let second = app.resolver().get_handler_of::<Tally>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let module = app.resolver().get_module("shared").unwrap();
    assert!(Arc::ptr_eq(&module, &app.resolver().get_module_of::<Shared>().unwrap()));
    assert!(app.container().has("module:shared"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Extensions
// ─────────────────────────────────────────────────────────────────────────────

struct Plugin;

impl Module for Plugin {
    const ID: &'static str = "plugin";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new().handler::<Tally>()
    }
}

struct Host;

impl Module for Host {
    const ID: &'static str = "host";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new().extendable()
    }
}

struct Closed;

impl Module for Closed {
    const ID: &'static str = "closed";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new()
    }
}

#[test]
fn extendable_module_accepts_imports() {
    let (mut app, dispatcher, _) = app();
    app.extend::<Host, Plugin>();
    app.bootstrap::<Host>().unwrap();

    assert_eq!(app.handler_state::<Tally>(), Some(HandlerState::Ready));
    assert!(dispatcher.has_event("tally"));
}

#[test]
fn extending_closed_module_is_invalid() {
    let (mut app, _, _) = app();
    app.extend::<Closed, Plugin>();
    let err = app.bootstrap::<Closed>().unwrap_err();
    assert!(matches!(
        err,
        HookwireError::InvalidDefinition { ref token, .. } if token == "module:closed"
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Dynamic modules and services
// ─────────────────────────────────────────────────────────────────────────────

struct Mailer {
    from: String,
}

impl Injectable for Mailer {
    const ID: &'static str = "mail.mailer";

    fn construct(container: &Container) -> Result<Self, ContainerError> {
        let from = container
            .value("mail.from")
            .and_then(|value| value.as_str().map(str::to_string))
            .ok_or_else(|| ContainerError::NotFound("mail.from".into()))?;
        Ok(Mailer { from })
    }
}

struct Clock;

impl Module for Clock {
    const ID: &'static str = "clock";
    const DYNAMIC: bool = true;

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new().service::<Mailer>()
    }

    fn configure(container: &Container) -> Bindings {
        let boots = container
            .value("clock.boots")
            .and_then(|value| value.as_u64())
            .unwrap_or(0);
        Bindings::new().value("clock.boots", json!(boots + 1))
    }
}

struct Mail;

impl Module for Mail {
    const ID: &'static str = "mail";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new().import::<Clock>()
    }

    fn configure(_: &Container) -> Bindings {
        Bindings::new()
            .value("mail.from", json!("noreply@example.org"))
            .alias("mailer", Token::service(Mailer::ID))
    }
}

#[test]
fn dynamic_module_configures_at_bootstrap_not_in_map() {
    let (mut app, _, _) = app();
    app.bootstrap::<Mail>().unwrap();

    let map = app.resolver().map();
    assert_eq!(map.defs, vec!["clock"]);
    assert!(map.value("clock.boots").is_none());
    assert_eq!(app.container().value("clock.boots"), Some(json!(1)));
}

#[test]
fn services_are_memoized_factories() {
    let (mut app, _, _) = app();
    app.bootstrap::<Mail>().unwrap();

    let first = app.container().get_as::<Mailer>("mailer").unwrap();
    let second = app.container().get_as::<Mailer>("service:mail.mailer").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.from, "noreply@example.org");
}

// ─────────────────────────────────────────────────────────────────────────────
// Bindings
// ─────────────────────────────────────────────────────────────────────────────

struct Ledger;

impl Module for Ledger {
    const ID: &'static str = "ledger";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new().import::<Shared>()
    }

    fn configure(_: &Container) -> Bindings {
        Bindings::new().value("hook:0", json!("ledger"))
    }
}

struct Squatter;

impl Module for Squatter {
    const ID: &'static str = "squatter";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new().import::<Shared>()
    }

    fn configure(_: &Container) -> Bindings {
        Bindings::new().value("handler:shared.tally", json!(null))
    }
}

#[test]
fn literal_bindings_do_not_replace_callback_records() {
    let (mut app, dispatcher, _) = app();
    app.bootstrap::<Ledger>().unwrap();

    let map = app.resolver().map();
    let token = Token::callback(Tally::ID, "noop", "tally", 10);
    assert!(map.callback(token.as_str()).is_some());
    assert_eq!(map.value("hook:0"), Some(&json!("ledger")));
    assert_eq!(app.container().value("hook:0"), Some(json!("ledger")));

    assert_eq!(dispatcher.hook_count("tally"), 1);
    assert_eq!(app.fire("tally", vec![json!(3)]).unwrap(), json!(3));
}

#[test]
fn binding_an_engine_token_is_invalid() {
    let (mut app, _, _) = app();
    let err = app.bootstrap::<Squatter>().unwrap_err();
    assert!(matches!(
        err,
        HookwireError::InvalidDefinition { ref token, ref reason }
            if token == "module:squatter" && reason.contains("handler:shared.tally")
    ));
    assert!(!app.is_booted());
}

// ─────────────────────────────────────────────────────────────────────────────
// Generated graphs
// ─────────────────────────────────────────────────────────────────────────────

const NODES: usize = 6;
const NODE_IDS: [&str; NODES] = ["node.0", "node.1", "node.2", "node.3", "node.4", "node.5"];
const LEAVES: usize = 4;
const LEAF_IDS: [&str; LEAVES] = ["leaf.0", "leaf.1", "leaf.2", "leaf.3"];

#[derive(Debug, Clone, Default)]
struct Shape {
    imports: Vec<Vec<usize>>,
    handlers: Vec<Vec<usize>>,
}

impl Shape {
    fn from_matrices(edges: &[Vec<bool>], owned: &[Vec<bool>]) -> Self {
        let imports = (0..NODES)
            .map(|i| ((i + 1)..NODES).filter(|&j| edges[i][j]).collect())
            .collect();
        let handlers = (0..NODES)
            .map(|i| (0..LEAVES).filter(|&h| owned[i][h]).collect())
            .collect();
        Self { imports, handlers }
    }

    fn reachable(&self) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![0];
        while let Some(node) = pending.pop() {
            if seen.insert(node) {
                pending.extend(self.imports[node].iter().copied());
            }
        }
        seen
    }
}

thread_local! {
    static SHAPE: RefCell<Shape> = RefCell::new(Shape::default());
}

struct Node<const N: usize>;

impl<const N: usize> Module for Node<N> {
    const ID: &'static str = NODE_IDS[N];

    fn attributes() -> ModuleAttrs {
        SHAPE.with_borrow(|shape| {
            let mut attrs = ModuleAttrs::new();
            attrs.imports = shape.imports[N].iter().map(|&i| node(i)).collect();
            attrs.handlers = shape.handlers[N].iter().map(|&h| leaf(h)).collect();
            attrs
        })
    }
}

struct Leaf<const N: usize>;

impl<const N: usize> Handler for Leaf<N> {
    const ID: &'static str = LEAF_IDS[N];

    fn attributes() -> HandlerAttrs {
        HandlerAttrs::new(Strategy::Lazy)
    }

    fn construct(_: &Container) -> Result<Self, InvocationError> {
        Ok(Leaf)
    }
}

fn node(i: usize) -> ModuleClass {
    match i {
        0 => ModuleClass::of::<Node<0>>(),
        1 => ModuleClass::of::<Node<1>>(),
        2 => ModuleClass::of::<Node<2>>(),
        3 => ModuleClass::of::<Node<3>>(),
        4 => ModuleClass::of::<Node<4>>(),
        _ => ModuleClass::of::<Node<5>>(),
    }
}

fn leaf(h: usize) -> HandlerClass {
    match h {
        0 => HandlerClass::of::<Leaf<0>>(),
        1 => HandlerClass::of::<Leaf<1>>(),
        2 => HandlerClass::of::<Leaf<2>>(),
        _ => HandlerClass::of::<Leaf<3>>(),
    }
}

fn matrix(rows: usize, cols: usize) -> impl proptest::strategy::Strategy<Value = Vec<Vec<bool>>> {
    prop::collection::vec(prop::collection::vec(any::<bool>(), cols), rows)
}

fn build(shape: Shape) -> Result<hookwire_core::definition::DefinitionMap, HookwireError> {
    SHAPE.set(shape);
    let container = Container::new();
    DefinitionBuilder::new(&container)
        .without_runtime()
        .build(node(0))
}

proptest! {
    #[test]
    fn acyclic_graphs_yield_each_reachable_handler_once(
        edges in matrix(NODES, NODES),
        owned in matrix(NODES, LEAVES),
    ) {
        let shape = Shape::from_matrices(&edges, &owned);
        let reachable = shape.reachable();
        let expected_handlers: BTreeSet<&str> = reachable
            .iter()
            .flat_map(|&n| shape.handlers[n].iter().map(|&h| LEAF_IDS[h]))
            .collect();
        let expected_modules: BTreeSet<&str> = reachable.iter().map(|&n| NODE_IDS[n]).collect();

        let map = build(shape).unwrap();
        let handlers: Vec<&str> = map.handler_ids().collect();
        let modules: BTreeSet<&str> = map.module_ids().collect();

        prop_assert_eq!(handlers.len(), expected_handlers.len());
        prop_assert_eq!(handlers.into_iter().collect::<BTreeSet<_>>(), expected_handlers);
        prop_assert_eq!(modules, expected_modules);
    }

    #[test]
    fn back_edge_to_entry_is_reported(
        edges in matrix(NODES, NODES),
        owned in matrix(NODES, LEAVES),
        target in 1..NODES,
    ) {
        let mut shape = Shape::from_matrices(&edges, &owned);
        if !shape.imports[0].contains(&target) {
            shape.imports[0].push(target);
        }
        shape.imports[target].push(0);

        match build(shape) {
            Err(HookwireError::CircularDependency { chain }) => {
                prop_assert_eq!(chain.first().map(String::as_str), Some(NODE_IDS[0]));
                prop_assert_eq!(chain.last().map(String::as_str), Some(NODE_IDS[0]));
                prop_assert!(chain.iter().any(|id| id == NODE_IDS[target]));
            }
            other => prop_assert!(false, "expected a cycle, got {:?}", other.map(|m| m.entry)),
        }
    }
}
