//! Thread-safe directory of live virtual circuits keyed by remote endpoint
//! (spec §4.5).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::address::Endpoint;
use crate::server::tcp::VirtualCircuit;

#[derive(Default)]
pub struct TransportRegistry {
    entries: Mutex<HashMap<Endpoint, Arc<VirtualCircuit>>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        TransportRegistry::default()
    }

    /// Inserts `transport` at `endpoint` if no entry exists there yet.
    /// Returns `true` if inserted, `false` on collision — the caller of a
    /// losing `install` must close its own transport (spec §4.5 collision
    /// policy: first installer wins).
    pub fn install(&self, endpoint: Endpoint, transport: Arc<VirtualCircuit>) -> bool {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&endpoint) {
            false
        } else {
            entries.insert(endpoint, transport);
            true
        }
    }

    pub fn lookup(&self, endpoint: &Endpoint) -> Option<Arc<VirtualCircuit>> {
        self.entries.lock().unwrap().get(endpoint).cloned()
    }

    /// Removes the entry at `endpoint` only if it is identity-equal to
    /// `transport` — guards against an ABA race where the endpoint was
    /// reused by a different circuit between the caller observing it and
    /// calling remove.
    pub fn remove(&self, endpoint: &Endpoint, transport: &Arc<VirtualCircuit>) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(current) = entries.get(endpoint) {
            if Arc::ptr_eq(current, transport) {
                entries.remove(endpoint);
            }
        }
    }

    /// A point-in-time list of all live circuits, used by shutdown to close
    /// them without holding the registry lock across the close calls.
    pub fn snapshot(&self) -> Vec<Arc<VirtualCircuit>> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
