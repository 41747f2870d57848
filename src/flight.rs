//! Per-aircraft state: identity, most recent position, region membership per
//! layer, altitude trend, and the free-form flags that rule actions write.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use tracing::debug;

use crate::location::Location;
use crate::regions::RegionSet;

/// Number of recent altitudes kept for the trend window.
const ALT_TRACK_ENTRIES: usize = 5;

/// Shared handle to a flight. The registry owns the map of handles; the inner
/// mutex is the per-flight lock and is always acquired after (never before)
/// the registry lock.
pub type FlightHandle = Arc<Mutex<Flight>>;

#[derive(Debug)]
pub struct Flight {
    /// Best-effort stable identity: decoded tail, else callsign, else hex.
    /// Always non-empty.
    pub flight_id: String,
    /// Raw callsign as observed; may differ from flight_id ("N1234" vs "1234").
    pub other_id: String,
    /// First position we ever saw for this aircraft.
    pub first_loc: Location,
    /// Most recent position, including its timestamp.
    pub last_loc: Location,
    /// Region currently occupied, one slot per configured layer.
    pub inside_regions: Vec<Option<String>>,
    /// Region membership as of the previous position update.
    pub prev_inside_regions: Vec<Option<String>>,
    /// True from the second membership update on; distinguishes "first
    /// update" from "was in none".
    pub prev_valid: bool,
    /// Persistent notes written by rule actions, read by later rules/sinks.
    pub flags: BTreeMap<String, String>,
    /// Opaque id assigned by a downstream store, cached after first lookup.
    pub external_id: Option<i64>,

    alt_window: Vec<i32>,
    prev_seen: bool,
}

impl Flight {
    pub fn new(flight_id: &str, other_id: &str, loc: Location, num_layers: usize) -> Self {
        assert!(!flight_id.is_empty());
        Self {
            flight_id: flight_id.to_string(),
            other_id: other_id.to_string(),
            first_loc: loc.clone(),
            last_loc: loc,
            inside_regions: vec![None; num_layers],
            prev_inside_regions: vec![None; num_layers],
            prev_valid: false,
            flags: BTreeMap::new(),
            external_id: None,
            alt_window: Vec::with_capacity(ALT_TRACK_ENTRIES),
            prev_seen: false,
        }
    }

    /// Replace the last position. Secondary fields arrive intermittently, so
    /// a new position without them inherits the previous bundle.
    pub fn update_loc(&mut self, mut loc: Location) {
        if loc.info.is_none() {
            loc.info = self.last_loc.info.clone();
        }
        self.last_loc = loc;
    }

    /// Recompute region membership for every layer from the given position,
    /// remembering the previous state first.
    pub fn update_inside_regions(&mut self, layers: &[RegionSet], loc: &Location) {
        if self.prev_seen {
            self.prev_valid = true;
        }
        self.prev_seen = true;
        self.prev_inside_regions = self.inside_regions.clone();

        for (slot, layer) in self.inside_regions.iter_mut().zip(layers.iter()) {
            *slot = layer
                .contains(loc.lat, loc.lon, loc.track, loc.alt_baro)
                .and_then(|i| layer.name_of(i))
                .map(str::to_string);
        }

        if self.inside_regions != self.prev_inside_regions {
            let when = Utc
                .timestamp_opt(self.last_loc.now as i64, 0)
                .single()
                .map(|t| t.format("%m/%d/%y %H:%M").to_string())
                .unwrap_or_default();
            debug!(
                "{} region change for {}: was {:?} now {:?} {}",
                when,
                self.flight_id,
                self.prev_inside_regions,
                self.inside_regions,
                loc.to_str()
            );
        }
    }

    /// Update the rolling altitude window and report the trend of the new
    /// sample against the window mean: +1 climbing, -1 descending, 0 level.
    pub fn track_alt(&mut self, alt: i32) -> i8 {
        let avg = if self.alt_window.is_empty() {
            alt
        } else {
            (self.alt_window.iter().map(|&a| a as f64).sum::<f64>() / self.alt_window.len() as f64)
                as i32
        };
        if self.alt_window.len() == ALT_TRACK_ENTRIES {
            self.alt_window.remove(0);
        }
        self.alt_window.push(alt);

        match alt.cmp(&avg) {
            std::cmp::Ordering::Greater => 1,
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
        }
    }

    /// Trend indicator for displays: "^", "v", or blanks.
    pub fn alt_change_indicator(&mut self, alt: i32) -> &'static str {
        match self.track_alt(alt) {
            1 => "^",
            -1 => "v",
            _ => "  ",
        }
    }

    pub fn in_any_region(&self) -> bool {
        self.inside_regions.iter().any(Option::is_some)
    }

    pub fn was_in_any_region(&self) -> bool {
        self.prev_valid && self.prev_inside_regions.iter().any(Option::is_some)
    }

    /// Is the flight in any of the named regions? An empty list means the
    /// flight must currently be in no region at all.
    pub fn is_in_regions(&self, names: &[String]) -> bool {
        if names.is_empty() {
            return !self.in_any_region();
        }
        self.inside_regions
            .iter()
            .flatten()
            .any(|r| names.iter().any(|n| n == r))
    }

    /// Was the flight in any of the named regions on the previous update?
    /// Before the second update there is no previous state: only the
    /// "no region" query matches.
    pub fn was_in_regions(&self, names: &[String]) -> bool {
        if !self.prev_valid {
            return names.is_empty();
        }
        if names.is_empty() {
            return !self.was_in_any_region();
        }
        self.prev_inside_regions
            .iter()
            .flatten()
            .any(|r| names.iter().any(|n| n == r))
    }

    /// Did any layer's membership change on the last update?
    pub fn changed_regions(&self) -> bool {
        self.prev_valid && self.inside_regions != self.prev_inside_regions
    }

    /// Current emitter category, when the last position carried one.
    pub fn emitter_category(&self) -> Option<&str> {
        self.last_loc
            .info
            .as_ref()
            .and_then(|i| i.emitter_category.as_deref())
    }

    pub fn to_str(&self) -> String {
        format!("{} {:?}", self.last_loc.to_str(), self.inside_regions)
    }

    /// Live-map URL centered on the current position.
    pub fn to_link(&self) -> String {
        format!(
            "https://globe.airplanes.live/?lat={}&lon={}&zoom=10",
            self.last_loc.lat, self.last_loc.lon
        )
    }

    /// Recorded-replay URL for the current position's timestamp.
    pub fn to_recording(&self) -> String {
        let timestamp = Utc
            .timestamp_opt(self.last_loc.now as i64, 0)
            .single()
            .map(|t| t.format("%Y-%m-%d-%H:%M").to_string())
            .unwrap_or_default();
        format!(
            "https://globe.airplanes.live/?replay={}&lat={}&lon={}&zoom=10",
            timestamp, self.last_loc.lat, self.last_loc.lon
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::{rect_region, RegionSet};

    fn loc_at(lat: f64, lon: f64, alt: i32, now: f64) -> Location {
        Location {
            lat,
            lon,
            alt_baro: alt,
            now,
            callsign: "TEST1".into(),
            ..Location::default()
        }
    }

    fn two_layer_setup() -> Vec<RegionSet> {
        vec![
            RegionSet::new(vec![
                rect_region("Ground", 40.0, 41.0, -120.0, -119.0, 0, 500),
                rect_region("Air", 40.0, 41.0, -120.0, -119.0, 501, 20_000),
            ]),
            RegionSet::new(vec![rect_region(
                "Pattern",
                40.5,
                40.6,
                -119.6,
                -119.5,
                0,
                3_000,
            )]),
        ]
    }

    #[test]
    fn test_membership_tracks_layers_independently() {
        let layers = two_layer_setup();
        let loc = loc_at(40.55, -119.55, 400, 1000.0);
        let mut flight = Flight::new("TEST1", "TEST1", loc.clone(), layers.len());
        flight.update_inside_regions(&layers, &loc);

        assert_eq!(flight.inside_regions[0].as_deref(), Some("Ground"));
        assert_eq!(flight.inside_regions[1].as_deref(), Some("Pattern"));
        assert!(!flight.prev_valid);
    }

    #[test]
    fn test_prev_valid_after_second_update() {
        let layers = two_layer_setup();
        let loc1 = loc_at(40.55, -119.55, 400, 1000.0);
        let loc2 = loc_at(40.55, -119.55, 600, 1005.0);
        let mut flight = Flight::new("TEST1", "TEST1", loc1.clone(), layers.len());

        flight.update_inside_regions(&layers, &loc1);
        assert!(!flight.prev_valid);

        flight.update_loc(loc2.clone());
        flight.update_inside_regions(&layers, &loc2);
        assert!(flight.prev_valid);
        assert_eq!(flight.prev_inside_regions[0].as_deref(), Some("Ground"));
        assert_eq!(flight.inside_regions[0].as_deref(), Some("Air"));
        assert_eq!(flight.inside_regions.len(), flight.prev_inside_regions.len());
    }

    #[test]
    fn test_identical_updates_produce_no_change() {
        let layers = two_layer_setup();
        let loc = loc_at(40.55, -119.55, 400, 1000.0);
        let mut flight = Flight::new("TEST1", "TEST1", loc.clone(), layers.len());
        flight.update_inside_regions(&layers, &loc);
        flight.update_inside_regions(&layers, &loc);
        assert!(!flight.changed_regions());
    }

    #[test]
    fn test_empty_list_means_in_no_region() {
        let layers = two_layer_setup();
        let loc = loc_at(10.0, 10.0, 400, 1000.0); // outside everything
        let mut flight = Flight::new("TEST1", "TEST1", loc.clone(), layers.len());
        flight.update_inside_regions(&layers, &loc);

        assert!(flight.is_in_regions(&[]));
        assert!(!flight.is_in_regions(&["Ground".to_string()]));
    }

    #[test]
    fn test_was_in_regions_before_second_update() {
        let layers = two_layer_setup();
        let loc = loc_at(40.55, -119.55, 400, 1000.0);
        let mut flight = Flight::new("TEST1", "TEST1", loc.clone(), layers.len());
        flight.update_inside_regions(&layers, &loc);

        // No previous state yet: only the "no region" query matches.
        assert!(flight.was_in_regions(&[]));
        assert!(!flight.was_in_regions(&["Ground".to_string()]));
    }

    #[test]
    fn test_track_alt_trend() {
        let loc = loc_at(40.0, -119.0, 1000, 1000.0);
        let mut flight = Flight::new("TEST1", "TEST1", loc, 0);

        assert_eq!(flight.track_alt(1000), 0); // first sample vs itself
        assert_eq!(flight.track_alt(1100), 1);
        assert_eq!(flight.track_alt(900), -1);
        // Window holds only the last five entries.
        for alt in [2000, 2000, 2000, 2000, 2000] {
            flight.track_alt(alt);
        }
        assert_eq!(flight.track_alt(2000), 0);
    }

    #[test]
    fn test_info_preserved_across_updates() {
        let mut loc1 = loc_at(40.0, -119.0, 1000, 1000.0);
        loc1.info = Some(crate::location::AircraftInfo {
            squawk: Some(1200),
            ..Default::default()
        });
        let loc2 = loc_at(40.0, -119.0, 1100, 1010.0);

        let mut flight = Flight::new("TEST1", "TEST1", loc1, 0);
        flight.update_loc(loc2);
        assert_eq!(flight.last_loc.info.as_ref().unwrap().squawk, Some(1200));
    }

    #[test]
    fn test_first_last_ordering() {
        let loc1 = loc_at(40.0, -119.0, 1000, 1000.0);
        let loc2 = loc_at(40.1, -119.0, 1100, 1010.0);
        let mut flight = Flight::new("TEST1", "TEST1", loc1, 0);
        flight.update_loc(loc2);
        assert!(flight.last_loc.now >= flight.first_loc.now);
    }
}
