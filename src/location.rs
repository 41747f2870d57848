//! A single aircraft position report plus the secondary data that rides along
//! with it. Values are immutable once parsed; the registry and resampler
//! build new Locations rather than editing old ones.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geometry::haversine_nm;
use crate::icao;

/// Secondary ADS-B fields that arrive intermittently alongside positions.
/// Unrecognized keys are kept verbatim so downstream sinks can see them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AircraftInfo {
    pub squawk: Option<u32>,
    pub emergency: Option<String>,
    pub emitter_category: Option<String>,
    pub baro_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl AircraftInfo {
    fn is_empty(&self) -> bool {
        self.squawk.is_none()
            && self.emergency.is_none()
            && self.emitter_category.is_none()
            && self.baro_rate.is_none()
            && self.extra.is_empty()
    }
}

/// One position sample off the wire (or synthesized by the resampler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    /// Barometric altitude in feet; the wire sentinel "ground" maps to 0.
    pub alt_baro: i32,
    /// Seconds since the epoch, from the stream's own clock.
    pub now: f64,
    /// Raw ADS-B "flight" field; may be empty or "N/A".
    pub callsign: String,
    /// 24-bit ICAO address as lowercase hex, when present.
    pub icao_hex: Option<String>,
    /// Registration derived from the ICAO address, when decodable.
    pub tail: Option<String>,
    /// Ground speed in knots.
    pub ground_speed: f64,
    /// Ground track in degrees, 0-360.
    pub track: f64,
    /// Secondary field bundle; None when the message carried none of them.
    pub info: Option<AircraftInfo>,
    /// Set by the resampler's anti-teleport guard, never parsed off the wire.
    #[serde(default)]
    pub suspicious: bool,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            lat: 0.0,
            lon: 0.0,
            alt_baro: 0,
            now: 0.0,
            callsign: String::new(),
            icao_hex: None,
            tail: None,
            ground_speed: 0.0,
            track: 0.0,
            info: None,
            suspicious: false,
        }
    }
}

/// Pull a numeric field out of a noisy JSON object, defaulting to 0.
/// Raw feeds sometimes carry strings where numbers belong.
fn lenient_f64(v: &Value, key: &str) -> f64 {
    match v.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Altitude is an integer except for the "ground" sentinel.
fn lenient_alt(v: &Value) -> i32 {
    match v.get("alt_baro") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) as i32,
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn lenient_squawk(v: &Value) -> Option<u32> {
    match v.get("squawk") {
        Some(Value::Number(n)) => n.as_u64().map(|x| x as u32),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

const INFO_KEYS: [&str; 4] = ["squawk", "emergency", "category", "baro_rate"];

impl Location {
    /// Parse one wire-format message. Absent or wrong-typed numeric fields
    /// default to zero; only non-object input is rejected.
    pub fn from_json(v: &Value) -> Option<Location> {
        let obj = v.as_object()?;

        let callsign = obj
            .get("flight")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        let icao_hex = obj
            .get("hex")
            .and_then(Value::as_str)
            .map(|h| h.trim().to_ascii_lowercase());
        let tail = icao_hex.as_deref().and_then(icao::tail_from_hex);

        let mut info = AircraftInfo {
            squawk: lenient_squawk(v),
            emergency: obj
                .get("emergency")
                .and_then(Value::as_str)
                .map(str::to_string),
            emitter_category: obj
                .get("category")
                .and_then(Value::as_str)
                .map(str::to_string),
            baro_rate: obj.get("baro_rate").and_then(Value::as_f64),
            extra: BTreeMap::new(),
        };
        // The "flightdict" blob from trace conversion may carry keys we don't
        // model; keep them opaque.
        if let Some(Value::Object(fd)) = obj.get("flightdict") {
            for (k, val) in fd {
                if !INFO_KEYS.contains(&k.as_str()) && k != "flight" && k != "gs" {
                    info.extra.insert(k.clone(), val.clone());
                }
            }
        }

        Some(Location {
            lat: lenient_f64(v, "lat"),
            lon: lenient_f64(v, "lon"),
            alt_baro: lenient_alt(v),
            now: lenient_f64(v, "now"),
            callsign,
            icao_hex,
            tail,
            ground_speed: lenient_f64(v, "gs"),
            track: lenient_f64(v, "track"),
            info: if info.is_empty() { None } else { Some(info) },
            suspicious: false,
        })
    }

    /// Stable identity for tracking: decoded tail first, then the raw
    /// callsign, then the hex address. None means the position is untrackable
    /// and gets dropped.
    pub fn flight_id(&self) -> Option<&str> {
        if let Some(tail) = self.tail.as_deref() {
            if !tail.is_empty() {
                return Some(tail);
            }
        }
        if !self.callsign.is_empty() && self.callsign != "N/A" {
            return Some(&self.callsign);
        }
        match self.icao_hex.as_deref() {
            Some(hex) if !hex.is_empty() => Some(hex),
            _ => None,
        }
    }

    /// Heartbeats advance time without touching flight state.
    pub fn is_heartbeat(&self) -> bool {
        self.callsign == "N/A" && self.icao_hex.is_none()
    }

    /// Great-circle distance to another Location, nautical miles.
    pub fn dist_nm(&self, other: &Location) -> f64 {
        haversine_nm(self.lat, self.lon, other.lat, other.lon)
    }

    /// Great-circle distance from a bare lat/lon, nautical miles.
    pub fn dist_from_nm(&self, lat: f64, lon: f64) -> f64 {
        haversine_nm(self.lat, self.lon, lat, lon)
    }

    /// Midpoint of two samples, used to center replay links.
    pub fn midpoint(a: &Location, b: &Location) -> Location {
        Location {
            lat: (a.lat + b.lat) / 2.0,
            lon: (a.lon + b.lon) / 2.0,
            alt_baro: (a.alt_baro + b.alt_baro) / 2,
            now: a.now,
            ..Location::default()
        }
    }

    /// One-line human-readable form, parseable enough to round-trip the
    /// fields it prints.
    pub fn to_str(&self) -> String {
        format!(
            "{}: {} MSL {} deg {:.1} kts {:.4}, {:.4}",
            self.display_id(),
            self.alt_baro,
            self.track as i64,
            self.ground_speed,
            self.lat,
            self.lon
        )
    }

    fn display_id(&self) -> &str {
        self.flight_id().unwrap_or("N/A")
    }

    /// Compact wire-shaped JSON for the emit-jsonl sink.
    pub fn to_wire_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("now".into(), json_num(self.now));
        obj.insert("lat".into(), json_num(self.lat));
        obj.insert("lon".into(), json_num(self.lon));
        obj.insert("alt_baro".into(), Value::from(self.alt_baro));
        obj.insert("gs".into(), json_num(self.ground_speed));
        obj.insert("track".into(), json_num(self.track));
        if let Some(hex) = &self.icao_hex {
            obj.insert("hex".into(), Value::from(hex.clone()));
        }
        if !self.callsign.is_empty() {
            obj.insert("flight".into(), Value::from(self.callsign.clone()));
        }
        if let Some(info) = &self.info {
            if let Some(sq) = info.squawk {
                obj.insert("squawk".into(), Value::from(sq));
            }
            if let Some(e) = &info.emergency {
                obj.insert("emergency".into(), Value::from(e.clone()));
            }
            if let Some(c) = &info.emitter_category {
                obj.insert("category".into(), Value::from(c.clone()));
            }
            if let Some(br) = info.baro_rate {
                obj.insert("baro_rate".into(), json_num(br));
            }
        }
        Value::Object(obj)
    }
}

fn json_num(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
