//! Name -> user-function registry. Rules refer to callbacks by name; the
//! registry is populated once at startup, before the ingest loop runs.
//!
//! Two arities exist: per-position rules pass one flight, proximity rules
//! pass the pair. Registering either arity under a name the rules reference
//! with the other arity is a configuration mistake and is logged at dispatch.

use std::collections::HashMap;

use tracing::warn;

use crate::flight::Flight;

/// Callback for per-position rules. Receives the flight with its lock held,
/// so flag updates are race-free.
pub type FlightCallback = Box<dyn Fn(&mut Flight) + Send + Sync>;

/// Callback for proximity rules. Receives both flights, locked in canonical
/// order.
pub type PairCallback = Box<dyn Fn(&Flight, &Flight) + Send + Sync>;

enum Entry {
    Single(FlightCallback),
    Pair(PairCallback),
}

#[derive(Default)]
pub struct CallbackRegistry {
    entries: HashMap<String, Entry>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut Flight) + Send + Sync + 'static,
    {
        self.entries
            .insert(name.to_string(), Entry::Single(Box::new(f)));
    }

    pub fn register_pair<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&Flight, &Flight) + Send + Sync + 'static,
    {
        self.entries
            .insert(name.to_string(), Entry::Pair(Box::new(f)));
    }

    /// Dispatch a single-flight callback. Returns false when the name is
    /// unknown or registered with the wrong arity.
    pub fn dispatch(&self, name: &str, flight: &mut Flight) -> bool {
        match self.entries.get(name) {
            Some(Entry::Single(f)) => {
                f(flight);
                true
            }
            Some(Entry::Pair(_)) => {
                warn!("callback '{name}' is pair-arity but was invoked for one flight");
                false
            }
            None => {
                warn!("callback '{name}' is not registered");
                false
            }
        }
    }

    /// Dispatch a pair callback for a proximity match.
    pub fn dispatch_pair(&self, name: &str, flight1: &Flight, flight2: &Flight) -> bool {
        match self.entries.get(name) {
            Some(Entry::Pair(f)) => {
                f(flight1, flight2);
                true
            }
            Some(Entry::Single(_)) => {
                warn!("callback '{name}' is single-arity but was invoked for a pair");
                false
            }
            None => {
                warn!("callback '{name}' is not registered");
                false
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}
