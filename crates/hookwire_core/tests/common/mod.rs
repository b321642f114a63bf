//! Shared fixtures for the engine integration tests.

#![allow(dead_code, reason = "not every test binary uses every fixture")]

use std::sync::Arc;

use hookwire_core::prelude::*;
use parking_lot::Mutex;

/// Container token of the [`Journal`].
pub const JOURNAL: &str = "journal";

/// Ordered record of side effects observed by test handlers.
#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    /// Fetches the journal bound in `container`.
    pub fn of(container: &Container) -> Result<Arc<Self>, InvocationError> {
        Ok(container.get_as::<Journal>(JOURNAL)?)
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == entry).count()
    }
}

/// An app in the frontend context with a dispatcher handle and a journal.
pub fn app_with(config: EngineConfig) -> (App, Arc<EventDispatcher>, Arc<Journal>) {
    let dispatcher = Arc::new(EventDispatcher::new());
    let app = App::with_dispatcher(config, Arc::clone(&dispatcher) as Arc<dyn Dispatcher>);
    let journal = Arc::new(Journal::default());
    app.container()
        .set_shared(JOURNAL, Arc::clone(&journal) as Service);
    (app, dispatcher, journal)
}

/// [`app_with`] using a forced frontend context.
pub fn app() -> (App, Arc<EventDispatcher>, Arc<Journal>) {
    app_with(EngineConfig::new().with_context(Context::FRONTEND))
}
