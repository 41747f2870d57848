//! Common test utilities for the scenario tests: region layers over the
//! test area, wire-format message builders, and counting callbacks.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use skywatch::regions::{rect_region, RegionSet};

/// The test area: a box around 40.76N 119.21W.
pub const AREA: (f64, f64, f64, f64) = (40.0, 41.5, -120.0, -119.0);

/// One layer with a "Ground" region (alt 0-500) stacked under an "Air"
/// region (alt 501+) over the same footprint.
pub fn ground_air_layer() -> RegionSet {
    let (lat_min, lat_max, lon_min, lon_max) = AREA;
    RegionSet::new(vec![
        rect_region("Ground", lat_min, lat_max, lon_min, lon_max, 0, 500),
        rect_region("Air", lat_min, lat_max, lon_min, lon_max, 501, 60_000),
    ])
}

/// One layer with a single full-height "Scenic" region over the test area.
pub fn scenic_layer() -> RegionSet {
    let (lat_min, lat_max, lon_min, lon_max) = AREA;
    RegionSet::new(vec![rect_region(
        "Scenic", lat_min, lat_max, lon_min, lon_max, 0, 60_000,
    )])
}

/// A wire-format position message. The hex is deliberately outside the
/// decodable registration blocks so the callsign becomes the flight id.
pub fn msg(flight: &str, lat: f64, lon: f64, alt: i32, now: f64) -> Value {
    json!({
        "now": now,
        "alt_baro": alt,
        "gs": 128.0,
        "lat": lat,
        "lon": lon,
        "track": 203.4,
        "hex": format!("3c{:04x}", mix(flight) % 0xffff),
        "flight": flight,
    })
}

/// A time-advancing heartbeat entry.
pub fn heartbeat(now: f64) -> Value {
    json!({"flight": "N/A", "now": now})
}

fn mix(s: &str) -> u32 {
    s.bytes()
        .fold(17u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32))
}

/// Shared counter for counting callback invocations across threads.
pub fn counter() -> Arc<AtomicU32> {
    Arc::new(AtomicU32::new(0))
}

pub fn count_of(c: &Arc<AtomicU32>) -> u32 {
    c.load(Ordering::SeqCst)
}

pub fn bump(c: &Arc<AtomicU32>) {
    c.fetch_add(1, Ordering::SeqCst);
}
