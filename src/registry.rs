use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use crate::worker::Callable;

/// Shared-callable registry: named helpers made available inside every
/// compiled worker program. Populated by the embedding application before
/// tasks are compiled; an explicit object rather than process-global state,
/// shared via `Arc` between the application and the compiler.
///
/// Mutations after the compiler has baked its preamble are not reflected in
/// later programs until the cache is invalidated (see `Compiler`).
#[derive(Debug, Default)]
pub struct Registry {
    callables: Mutex<BTreeMap<String, Arc<Callable>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callable under `name`, replacing any previous entry.
    pub fn insert(&self, name: impl Into<String>, callable: Callable) {
        self.callables
            .lock()
            .expect("registry lock")
            .insert(name.into(), Arc::new(callable));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Callable>> {
        self.callables.lock().expect("registry lock").get(name).cloned()
    }

    /// Ordered copy of the current entries, taken once when the preamble is
    /// baked. BTreeMap ordering keeps the stringified form deterministic.
    pub fn snapshot(&self) -> BTreeMap<String, Arc<Callable>> {
        self.callables.lock().expect("registry lock").clone()
    }

    pub fn len(&self) -> usize {
        self.callables.lock().expect("registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
