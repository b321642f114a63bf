//! Integration tests for the definition cache as seen through an [`App`].

mod common;

use core::sync::atomic::{AtomicUsize, Ordering};
use std::path::Path;
use std::sync::Arc;

use common::{Journal, app_with};
use hookwire_core::cache::{self, Decompile};
use hookwire_core::prelude::*;
use hookwire_core::resolver::Resolver;
use hookwire_core::scanner::DefinitionBuilder;
use serde_json::{Value, json};

static OUTLET_CONFIGURED: AtomicUsize = AtomicUsize::new(0);

struct Checkout;

impl Handler for Checkout {
    const ID: &'static str = "store.checkout";

    fn attributes() -> HandlerAttrs {
        HandlerAttrs::new(Strategy::Deferred).on("wp_loaded", 20)
    }

    fn callbacks() -> Vec<CallbackAttrs> {
        vec![
            CallbackAttrs::filter("total", "{store.prefix}_total")
                .priority(5)
                .flags(InvokeFlags::SAFE)
                .param(Param::Global("tax".into())),
        ]
    }

    fn construct(container: &Container) -> Result<Self, InvocationError> {
        Journal::of(container)?.push("checkout:new");
        Ok(Checkout)
    }

    fn call(&self, method: &str, args: &mut CallArgs<'_>) -> Result<Value, InvocationError> {
        match method {
            "total" => {
                let net: f64 = args.arg_as(0)?;
                let tax = args.injected_value(0).and_then(Value::as_f64).unwrap_or(0.0);
                Ok(json!(net + tax))
            }
            other => Err(InvocationError::UnknownMethod {
                target: Self::ID.into(),
                method: other.into(),
            }),
        }
    }
}

struct Store;

impl Module for Store {
    const ID: &'static str = "store";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new().handler::<Checkout>()
    }

    fn configure(_: &Container) -> Bindings {
        Bindings::new().value("store.prefix", json!("shop"))
    }
}

/// Same shape as [`Store`], counting how often its bindings are computed.
struct Outlet;

impl Module for Outlet {
    const ID: &'static str = "outlet";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new().handler::<Checkout>()
    }

    fn configure(_: &Container) -> Bindings {
        OUTLET_CONFIGURED.fetch_add(1, Ordering::SeqCst);
        Bindings::new().value("store.prefix", json!("shop"))
    }
}

struct Other;

impl Module for Other {
    const ID: &'static str = "other";

    fn attributes() -> ModuleAttrs {
        ModuleAttrs::new()
    }
}

fn cached_app(path: &Path) -> (App, Arc<EventDispatcher>, Arc<Journal>) {
    app_with(
        EngineConfig::new()
            .with_context(Context::FRONTEND)
            .with_cache(true)
            .with_cache_path(path)
            .with_global("tax", json!(2.5)),
    )
}

/// Everything an observer can see about the checkout after one request.
fn observe(app: &App, journal: &Journal) -> (Value, Vec<String>, Vec<(String, HandlerState)>) {
    app.fire("wp_loaded", Vec::new()).unwrap();
    let total = app.fire("shop_total", vec![json!(10.0)]).unwrap();
    (total, journal.entries(), app.states())
}

#[test]
fn cached_and_live_maps_behave_the_same() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("defs.json");

    let (mut live, _, live_journal) = cached_app(&path);
    live.bootstrap::<Outlet>().unwrap();
    assert!(path.exists());
    assert_eq!(OUTLET_CONFIGURED.load(Ordering::SeqCst), 1);

    let (mut cached, _, cached_journal) = cached_app(&path);
    cached.bootstrap::<Outlet>().unwrap();
    assert_eq!(OUTLET_CONFIGURED.load(Ordering::SeqCst), 1);

    assert_eq!(*live.resolver().map(), *cached.resolver().map());
    let expected = observe(&live, &live_journal);
    assert_eq!(expected.0, json!(12.5));
    assert_eq!(observe(&cached, &cached_journal), expected);
}

#[test]
fn saved_map_loads_back_equal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("defs.json");

    let container = Container::new();
    let map = DefinitionBuilder::new(&container)
        .build(ModuleClass::of::<Store>())
        .unwrap();
    cache::save(&path, &map).unwrap();
    let loaded = cache::load(&path).unwrap();
    assert_eq!(loaded, map);

    let from_live = Resolver::new(Arc::new(Container::new()), Arc::new(ClassRegistry::new()));
    from_live.set_map(map);
    let from_disk = Resolver::new(Arc::new(Container::new()), Arc::new(ClassRegistry::new()));
    from_disk.set_map(loaded);

    let token = "callback:store.checkout::total@{store.prefix}_total#5";
    let (a, b) = (
        from_live.get_callback(token).unwrap(),
        from_disk.get_callback(token).unwrap(),
    );
    assert_eq!(a.event(), b.event());
    assert_eq!(a.priority(), b.priority());
    assert_eq!(a.flags(), b.flags());
    assert_eq!(a.params(), b.params());

    let (h, g) = (
        from_live.get_handler("store.checkout").unwrap(),
        from_disk.get_handler("store.checkout").unwrap(),
    );
    assert_eq!(h.strategy(), g.strategy());
    assert_eq!(h.hook(), g.hook());
    assert_eq!(h.priority(), g.priority());
}

#[test]
fn cache_for_another_entry_is_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("defs.json");

    let (mut first, _, _) = cached_app(&path);
    first.bootstrap::<Other>().unwrap();

    let (mut second, _, journal) = cached_app(&path);
    second.bootstrap::<Store>().unwrap();
    assert_eq!(second.resolver().map().entry, "store");
    assert_eq!(observe(&second, &journal).0, json!(12.5));
    assert_eq!(cache::load(&path).unwrap().entry, "store");
}

#[test]
fn unreadable_cache_falls_back_to_scanning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("defs.json");
    std::fs::write(&path, "{ truncated").unwrap();

    let (mut app, _, journal) = cached_app(&path);
    app.bootstrap::<Store>().unwrap();
    assert_eq!(observe(&app, &journal).0, json!(12.5));
}

#[test]
fn deferred_decompile_applies_at_teardown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("defs.json");

    let (mut app, _, _) = cached_app(&path);
    app.bootstrap::<Store>().unwrap();
    app.decompile(Decompile::Deferred).unwrap();
    assert!(path.exists());

    app.teardown().unwrap();
    assert!(!path.exists());
}

#[test]
fn teardown_keeps_cache_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("defs.json");

    let (mut app, _, _) = app_with(
        EngineConfig::new()
            .with_context(Context::FRONTEND)
            .with_cache(true)
            .with_cache_path(&path)
            .with_decompile_on_shutdown(false),
    );
    app.bootstrap::<Store>().unwrap();
    app.decompile(Decompile::Deferred).unwrap();
    app.teardown().unwrap();
    assert!(path.exists());
}

#[test]
fn disabled_cache_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("defs.json");

    let (mut app, _, _) = app_with(
        EngineConfig::new()
            .with_context(Context::FRONTEND)
            .with_cache_path(&path),
    );
    app.bootstrap::<Store>().unwrap();
    assert!(!path.exists());
}

#[test]
fn disabled_cache_discards_an_earlier_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("defs.json");

    let (mut warm, _, _) = cached_app(&path);
    warm.bootstrap::<Store>().unwrap();
    assert!(path.exists());

    let (mut cold, _, journal) = app_with(
        EngineConfig::new()
            .with_context(Context::FRONTEND)
            .with_cache_path(&path)
            .with_global("tax", json!(2.5)),
    );
    cold.bootstrap::<Store>().unwrap();
    assert!(!path.exists());
    assert_eq!(observe(&cold, &journal).0, json!(12.5));
}
