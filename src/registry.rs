//! The registry of live flights: `flight_id -> Flight`, guarded by a single
//! lock. Flights are created on first sight and expired once they go quiet
//! relative to the latest ingested timestamp.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::flight::{Flight, FlightHandle};
use crate::location::Location;
use crate::regions::RegionSet;
use crate::rules::RuleEngine;

/// Seconds with no update before a flight is expired. Empirically needed to
/// debounce poor-signal aircraft that fade in and out of coverage.
pub const EXPIRE_SECS: f64 = 180.0;

pub struct FlightRegistry {
    flights: Mutex<HashMap<String, FlightHandle>>,
    /// Region layers applied on every update, in configured order.
    layers: Arc<Vec<RegionSet>>,
}

impl FlightRegistry {
    pub fn new(layers: Arc<Vec<RegionSet>>) -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
            layers,
        }
    }

    pub fn layers(&self) -> &Arc<Vec<RegionSet>> {
        &self.layers
    }

    /// Track one position update: find or create the flight, refresh its
    /// position and region membership, then evaluate rules. Returns the
    /// sample's timestamp (which also advances the checkpoint clock for
    /// heartbeats and dropped positions).
    ///
    /// The registry lock covers only the map access and the state update;
    /// rule actions run after it is released, under the flight's own lock.
    pub fn add_location(&self, loc: Location, engine: &RuleEngine) -> f64 {
        let now = loc.now;
        let Some(flight_id) = loc.flight_id().map(str::to_string) else {
            return now;
        };

        let handle = {
            let mut flights = self.flights.lock().unwrap();
            let handle = flights
                .entry(flight_id.clone())
                .or_insert_with(|| {
                    debug!("new flight {flight_id}");
                    metrics::counter!("registry.flights_created_total").increment(1);
                    Arc::new(Mutex::new(Flight::new(
                        &flight_id,
                        &loc.callsign,
                        loc.clone(),
                        self.layers.len(),
                    )))
                })
                .clone();

            {
                let mut flight = handle.lock().unwrap();
                flight.update_loc(loc.clone());
                flight.update_inside_regions(&self.layers, &loc);
            }
            handle
        };

        engine.process_flight(&handle);
        now
    }

    /// Remove every flight whose last position is older than
    /// `now - expire_secs`, firing expire-path rules for each. Removal
    /// happens under the registry lock; rule dispatch after it is released.
    pub fn expire_old(&self, engine: &RuleEngine, now: f64, expire_secs: f64) {
        let expired: Vec<FlightHandle> = {
            let mut flights = self.flights.lock().unwrap();
            let doomed: Vec<String> = flights
                .iter()
                .filter(|(_, h)| now - h.lock().unwrap().last_loc.now > expire_secs)
                .map(|(id, _)| id.clone())
                .collect();
            doomed
                .iter()
                .filter_map(|id| flights.remove(id))
                .collect()
        };

        for handle in expired {
            {
                let flight = handle.lock().unwrap();
                debug!(
                    "expiring {} (quiet for {:.0} s)",
                    flight.flight_id,
                    now - flight.last_loc.now
                );
            }
            metrics::counter!("registry.flights_expired_total").increment(1);
            engine.do_expire(&handle);
        }
    }

    /// Hand the active flight list to the rule engine's proximity pass. The
    /// pairwise check lives there because its thresholds come from rule
    /// definitions.
    pub fn check_distance(&self, engine: &RuleEngine, now: f64) {
        let flights = self.active_flights();
        engine.handle_proximity_conditions(&flights, now);
    }

    pub fn active_flights(&self) -> Vec<FlightHandle> {
        self.flights.lock().unwrap().values().cloned().collect()
    }

    pub fn get(&self, flight_id: &str) -> Option<FlightHandle> {
        self.flights.lock().unwrap().get(flight_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.flights.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
