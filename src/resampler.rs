//! Per-second position history reconstruction.
//!
//! Raw ADS-B samples arrive irregularly; the resampler keeps a per-aircraft
//! raw history and a time-indexed table filled with both raw and linearly
//! interpolated points at 1 Hz, so the proximity pass can replay any window
//! at uniform density. Tracks separated by more than the interpolation limit
//! get fresh sequence numbers ("N12345_2") instead of synthetic points.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tracing::{debug, error, info};

use crate::location::Location;
use crate::regions::RegionSet;
use crate::registry::FlightRegistry;
use crate::rules::RuleEngine;
use crate::stats::Stats;

#[derive(Debug, Clone)]
pub struct ResamplerConfig {
    /// Altitude band kept for resampling; terminal-area traffic is the
    /// subject of study, so everything else is skipped up front.
    pub min_altitude: i32,
    pub max_altitude: i32,
    /// Maximum gap bridged by interpolation; larger gaps start a new track.
    pub max_interpolate_secs: f64,
    /// Implied ground speed above this marks the segment suspicious.
    pub max_speed_kts: f64,
    /// Segment-to-segment implied-speed change above this marks the point
    /// suspicious.
    pub max_speed_delta_kts: f64,
}

impl Default for ResamplerConfig {
    fn default() -> Self {
        Self {
            min_altitude: 3_000,
            max_altitude: 12_000,
            max_interpolate_secs: 60.0,
            max_speed_kts: 600.0,
            max_speed_delta_kts: 100.0,
        }
    }
}

pub struct Resampler {
    config: ResamplerConfig,
    /// Optional region pre-filter; with layers present, points outside every
    /// layer are skipped.
    layers: Arc<Vec<RegionSet>>,

    /// Raw samples only, keyed by sequence-numbered track id.
    by_flight: HashMap<String, Vec<Location>>,
    /// Raw and synthetic samples, keyed by integer second. Sub-second
    /// overlaps all land in the same bucket.
    by_second: BTreeMap<i64, Vec<Location>>,

    /// tail -> current track sequence number.
    flight_counters: HashMap<String, u32>,
    /// tail -> timestamp of the last accepted sample.
    last_seen: HashMap<String, f64>,
    /// track id -> implied speed of the previous segment, for the
    /// anti-teleport delta check.
    last_segment_speed: HashMap<String, f64>,

    stats: Arc<Stats>,
}

impl Resampler {
    pub fn new(config: ResamplerConfig, layers: Arc<Vec<RegionSet>>, stats: Arc<Stats>) -> Self {
        Self {
            config,
            layers,
            by_flight: HashMap::new(),
            by_second: BTreeMap::new(),
            flight_counters: HashMap::new(),
            last_seen: HashMap::new(),
            last_segment_speed: HashMap::new(),
            stats,
        }
    }

    /// Add one raw sample, interpolating backwards across the gap to the
    /// previous sample of the same track.
    pub fn add_location(&mut self, loc: &Location) {
        let Some(tail) = loc.tail.clone().filter(|t| !t.is_empty()) else {
            Stats::bump(&self.stats.resampler_skipped);
            return;
        };
        let now = loc.now;

        if loc.alt_baro < self.config.min_altitude || loc.alt_baro > self.config.max_altitude {
            Stats::bump(&self.stats.resampler_skipped);
            return;
        }
        if !self.layers.is_empty()
            && !self
                .layers
                .iter()
                .any(|l| l.contains(loc.lat, loc.lon, loc.track, loc.alt_baro).is_some())
        {
            Stats::bump(&self.stats.resampler_skipped);
            metrics::counter!("resampler.region_skips_total").increment(1);
            return;
        }

        // Assign one sequence number per contiguous track of this tail.
        match self.flight_counters.get_mut(&tail) {
            None => {
                let when = Utc
                    .timestamp_opt(now as i64, 0)
                    .single()
                    .map(|t| t.to_string())
                    .unwrap_or_default();
                info!("new tail {tail} seen at {when}");
                self.flight_counters.insert(tail.clone(), 1);
            }
            Some(counter) => {
                if now - self.last_seen[&tail] > self.config.max_interpolate_secs {
                    *counter += 1;
                }
            }
        }
        self.last_seen.insert(tail.clone(), now);
        let flight_id = format!("{tail}_{}", self.flight_counters[&tail]);

        // The sequence id becomes the tracking identity for everything
        // stored here; the raw tail stays embedded in it.
        let mut stored = loc.clone();
        stored.callsign = flight_id.clone();
        stored.tail = None;

        if let Some(prev) = self.by_flight.get(&flight_id).and_then(|v| v.last()) {
            let gap = now - prev.now;
            if gap > 0.0 {
                let implied_kts = prev.dist_nm(&stored) / (gap / 3600.0);
                if implied_kts > self.config.max_speed_kts {
                    stored.suspicious = true;
                    debug!(
                        "{flight_id}: implied speed {implied_kts:.0} kts exceeds ceiling, flagged"
                    );
                }
                if let Some(&prev_kts) = self.last_segment_speed.get(&flight_id) {
                    if (implied_kts - prev_kts).abs() > self.config.max_speed_delta_kts {
                        stored.suspicious = true;
                    }
                }
                self.last_segment_speed.insert(flight_id.clone(), implied_kts);
            }

            if gap > 1.0 && gap <= self.config.max_interpolate_secs {
                let prev = prev.clone();
                for t in (prev.now as i64 + 1)..(now as i64) {
                    if let Some(mut interp) = interpolate_location(&prev, &stored, t as f64) {
                        interp.suspicious = stored.suspicious;
                        self.by_second.entry(t).or_default().push(interp);
                        Stats::bump(&self.stats.resampler_interpolated);
                        metrics::counter!("resampler.interpolated_total").increment(1);
                    }
                }
            }
        }

        self.by_flight
            .entry(flight_id)
            .or_default()
            .push(stored.clone());
        self.by_second.entry(now as i64).or_default().push(stored);
        Stats::bump(&self.stats.resampler_points);
    }

    /// Iterate every raw and synthetic point in timestamp order.
    pub fn for_each_resampled_point<F: FnMut(&Location)>(&self, mut callback: F) {
        for locations in self.by_second.values() {
            for loc in locations {
                callback(loc);
            }
        }
    }

    /// Points recorded for one second, if any.
    pub fn points_at(&self, second: i64) -> Option<&[Location]> {
        self.by_second.get(&second).map(Vec::as_slice)
    }

    /// Inclusive time range covered by the table.
    pub fn time_range(&self) -> Option<(i64, i64)> {
        let first = self.by_second.keys().next()?;
        let last = self.by_second.keys().next_back()?;
        Some((*first, *last))
    }

    /// Replay the resampled history through the rule engine to discover
    /// proximity events after the fact. Builds a synthetic registry holding
    /// exactly the aircraft present at each step, runs the same per-position
    /// and proximity paths as the live loop, and invokes `gc_callback` after
    /// each sweep so the LOS engine can finalize quiet events.
    pub fn do_prox_checks<F: FnMut(f64)>(
        &self,
        engine: &RuleEngine,
        layers: Arc<Vec<RegionSet>>,
        sample_interval: i64,
        mut gc_callback: F,
    ) {
        if !engine.has_proximity_rules() {
            error!("no proximity rules configured for resampled analysis");
            return;
        }
        let Some((min_time, max_time)) = self.time_range() else {
            error!("no time history available for resampled analysis");
            return;
        };
        debug!("analyzing resampled range {min_time} to {max_time}");

        let registry = FlightRegistry::new(layers);
        let mut point_count = 0usize;

        for (&t, locations) in &self.by_second {
            if (t - min_time) % sample_interval != 0 {
                continue;
            }

            for loc in locations {
                registry.add_location(loc.clone(), engine);
                point_count += 1;
            }

            registry.check_distance(engine, t as f64);
            registry.expire_old(engine, t as f64, self.config.max_interpolate_secs);
            gc_callback(t as f64);
        }

        info!("processed {point_count} resampled events");
    }

    /// Log per-track raw counts and the interpolation totals.
    pub fn report_stats(&self) {
        for (flight_id, locations) in &self.by_flight {
            info!("track {} holds {} raw locations", flight_id, locations.len());
        }
        info!(
            interpolated = self.stats.get(&self.stats.resampler_interpolated),
            total = self
                .by_second
                .values()
                .map(Vec::len)
                .sum::<usize>(),
            "resampling complete"
        );
    }
}

/// Linear interpolation between two samples of one track at `timestamp`.
/// Track is interpolated along the shortest arc so a 350°->10° turn doesn't
/// sweep through south. Returns None outside the [loc1, loc2] range.
pub fn interpolate_location(loc1: &Location, loc2: &Location, timestamp: f64) -> Option<Location> {
    if timestamp < loc1.now || timestamp > loc2.now {
        return None;
    }
    let factor = if loc2.now == loc1.now {
        0.0
    } else {
        (timestamp - loc1.now) / (loc2.now - loc1.now)
    };

    let mut track_diff = loc2.track - loc1.track;
    if track_diff.abs() > 180.0 {
        track_diff -= 360.0 * track_diff.signum();
    }

    Some(Location {
        lat: loc1.lat + factor * (loc2.lat - loc1.lat),
        lon: loc1.lon + factor * (loc2.lon - loc1.lon),
        alt_baro: (loc1.alt_baro as f64 + factor * (loc2.alt_baro - loc1.alt_baro) as f64) as i32,
        now: timestamp,
        callsign: loc1.callsign.clone(),
        icao_hex: loc1.icao_hex.clone(),
        tail: loc1.tail.clone(),
        ground_speed: loc1.ground_speed + factor * (loc2.ground_speed - loc1.ground_speed),
        track: (loc1.track + factor * track_diff).rem_euclid(360.0),
        info: None,
        suspicious: false,
    })
}
