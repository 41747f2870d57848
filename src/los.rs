//! Loss-of-separation event tracking.
//!
//! Proximity-rule callbacks feed pairs of flights into the tracker. Each
//! unordered pair owns at most one open event; repeat detections tighten the
//! recorded minima and re-capture the closest-approach geometry. Events with
//! no updates for `gc_secs` are finalized: pushed to the external sink,
//! logged as a CSV record for postprocessing, and removed. A later encounter
//! of the same pair opens a fresh event.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::flight::Flight;
use crate::location::Location;
use crate::stats::Stats;

/// Seconds without updates before an event is finalized.
pub const LOS_GC_TIME: f64 = 60.0;
/// Seconds between sweeps of the background GC task.
pub const LOS_GC_LOOP_DELAY: u64 = 1;

/// External store seam. The default implementation only logs; a database
/// adapter implements this to persist events.
pub trait LosSink: Send + Sync {
    /// A new event was opened. Returns an opaque row id to carry on the
    /// record, if the store assigns one.
    fn add_los(&self, event: &LosEvent) -> Option<i64>;
    /// An event was finalized with its minima.
    fn update_los(&self, event: &LosEvent);
}

/// Sink used when no external store is wired up.
pub struct LogOnlySink;

impl LosSink for LogOnlySink {
    fn add_los(&self, event: &LosEvent) -> Option<i64> {
        debug!("LOS open (no sink): {}", event.key());
        None
    }

    fn update_los(&self, event: &LosEvent) {
        debug!("LOS final (no sink): {}", event.key());
    }
}

/// Diagnostic confidence tag attached to a finalized event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LosQuality {
    VHigh,
    High,
    Medium,
    Low,
}

impl LosQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            LosQuality::VHigh => "vhigh",
            LosQuality::High => "high",
            LosQuality::Medium => "medium",
            LosQuality::Low => "low",
        }
    }
}

/// Per-flight context captured while the event is open, so finalization can
/// classify quality without reaching back into the registry.
#[derive(Debug, Clone)]
struct TrackInfo {
    first_seen: f64,
    last_seen: f64,
    emitter_category: Option<String>,
}

impl TrackInfo {
    fn of(flight: &Flight) -> Self {
        Self {
            first_seen: flight.first_loc.now,
            last_seen: flight.last_loc.now,
            emitter_category: flight.emitter_category().map(str::to_string),
        }
    }

    fn duration(&self) -> f64 {
        self.last_seen - self.first_seen
    }
}

/// One open loss-of-separation episode. A value type: it owns copies of the
/// Locations at closest approach and the flight ids, nothing borrowed.
#[derive(Debug, Clone)]
pub struct LosEvent {
    pub flight1_id: String,
    pub flight2_id: String,
    /// Positions at the closest approach seen so far (initially the first
    /// detection).
    pub loc1: Location,
    pub loc2: Location,
    /// Separations at the most recent detection.
    pub lat_dist: f64,
    pub alt_dist: f64,
    /// All-time minima for the episode.
    pub min_lat_dist: f64,
    pub min_alt_dist: f64,
    pub create_time: f64,
    pub last_time: f64,
    /// Row id assigned by the external sink, when it assigns one.
    pub external_id: Option<i64>,

    track1: TrackInfo,
    track2: TrackInfo,
}

impl LosEvent {
    /// Build a fresh event from an ordered pair. Callers canonicalize so that
    /// `flight1.flight_id <= flight2.flight_id`.
    fn new(flight1: &Flight, flight2: &Flight, lat_dist: f64, alt_dist: f64, now: f64) -> Self {
        Self {
            flight1_id: flight1.flight_id.clone(),
            flight2_id: flight2.flight_id.clone(),
            loc1: flight1.last_loc.clone(),
            loc2: flight2.last_loc.clone(),
            lat_dist,
            alt_dist,
            min_lat_dist: lat_dist,
            min_alt_dist: alt_dist,
            create_time: now,
            last_time: now,
            external_id: None,
            track1: TrackInfo::of(flight1),
            track2: TrackInfo::of(flight2),
        }
    }

    pub fn key(&self) -> String {
        format!("{} {}", self.flight1_id.trim(), self.flight2_id.trim())
    }

    /// Fold a repeat detection into the record. New minima re-capture the
    /// closest-approach Locations so the final geometry is the CPA, not the
    /// first detection.
    fn update(&mut self, flight1: &Flight, flight2: &Flight, lat_dist: f64, alt_dist: f64, now: f64) {
        self.lat_dist = lat_dist;
        self.alt_dist = alt_dist;
        self.last_time = now;
        self.track1 = TrackInfo::of(flight1);
        self.track2 = TrackInfo::of(flight2);

        if lat_dist <= self.min_lat_dist || alt_dist <= self.min_alt_dist {
            self.min_lat_dist = lat_dist;
            self.min_alt_dist = alt_dist;
            self.loc1 = flight1.last_loc.clone();
            self.loc2 = flight2.last_loc.clone();
        }
    }

    pub fn duration(&self) -> f64 {
        self.last_time - self.create_time
    }

    fn involves_helicopter(&self) -> bool {
        [&self.track1, &self.track2]
            .iter()
            .any(|t| t.emitter_category.as_deref() == Some("A7"))
    }

    /// Classify how trustworthy this event looks for downstream review.
    pub fn quality(&self) -> (LosQuality, &'static str) {
        let min_track = self.track1.duration().min(self.track2.duration());
        let duration = self.duration();

        if min_track < 60.0 {
            return (LosQuality::Low, "short track, insufficient data");
        }
        if duration > 120.0 {
            return (LosQuality::Low, "long event suggests formation flight");
        }
        if self.involves_helicopter() {
            return (LosQuality::Medium, "helicopter involved");
        }
        if duration > 60.0 {
            return (LosQuality::Medium, "moderate duration");
        }
        if duration <= 40.0 && self.min_lat_dist < 0.2 && self.min_alt_dist < 200.0 {
            return (LosQuality::VHigh, "very close approach with solid tracks");
        }
        (LosQuality::High, "brief encounter with good track data")
    }
}

pub struct LosTracker {
    events: DashMap<String, LosEvent>,
    sink: Box<dyn LosSink>,
    gc_secs: f64,
    stats: Arc<Stats>,
}

impl LosTracker {
    pub fn new(sink: Box<dyn LosSink>, stats: Arc<Stats>) -> Self {
        Self {
            events: DashMap::new(),
            sink,
            gc_secs: LOS_GC_TIME,
            stats,
        }
    }

    pub fn with_gc_secs(mut self, gc_secs: f64) -> Self {
        self.gc_secs = gc_secs;
        self
    }

    pub fn open_event_count(&self) -> usize {
        self.events.len()
    }

    pub fn get_event(&self, id_a: &str, id_b: &str) -> Option<LosEvent> {
        self.events.get(&pair_key(id_a, id_b)).map(|e| e.clone())
    }

    /// Record one proximity detection between two flights. Wire this as the
    /// pair callback of a proximity rule.
    pub fn los_update(&self, flight_a: &Flight, flight_b: &Flight) {
        // Canonical ordering gives a symmetric key and consistent record
        // orientation no matter which side was detected first.
        let (flight1, flight2) = if flight_a.flight_id <= flight_b.flight_id {
            (flight_a, flight_b)
        } else {
            (flight_b, flight_a)
        };

        let lat_dist = flight1.last_loc.dist_nm(&flight2.last_loc);
        let alt_dist = (flight1.last_loc.alt_baro - flight2.last_loc.alt_baro).abs() as f64;
        let now = flight1.last_loc.now;
        let key = pair_key(&flight1.flight_id, &flight2.flight_id);

        let created = {
            match self.events.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                    debug!("LOS update of key {key}");
                    entry.get_mut().update(flight1, flight2, lat_dist, alt_dist, now);
                    Stats::bump(&self.stats.los_update);
                    metrics::counter!("los.updates_total").increment(1);
                    false
                }
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    info!(
                        "LOS add key {} at {}: {} / {}",
                        key,
                        format_utc(now),
                        flight1.to_str(),
                        flight2.to_str()
                    );
                    entry.insert(LosEvent::new(flight1, flight2, lat_dist, alt_dist, now));
                    Stats::bump(&self.stats.los_add);
                    metrics::counter!("los.opened_total").increment(1);
                    true
                }
            }
        };

        // The sink may block on I/O; call it with no map lock held, then
        // attach the returned row id.
        if created {
            let event = self.events.get(&key).map(|e| e.clone());
            if let Some(event) = event {
                let external_id = self.sink.add_los(&event);
                if let Some(mut entry) = self.events.get_mut(&key) {
                    entry.external_id = external_id;
                }
            }
        }
    }

    /// Finalize every event that has been quiet longer than the GC window.
    /// Safe to call from the background task or a replay-driven callback.
    pub fn gc(&self, now: f64) {
        let quiet: Vec<String> = self
            .events
            .iter()
            .filter(|e| now - e.last_time > self.gc_secs)
            .map(|e| e.key().clone())
            .collect();

        for key in quiet {
            let Some((_, event)) = self.events.remove(&key) else {
                // Raced with a re-entry; nothing to finalize under this key.
                error!("LOS key {key} missing during GC");
                continue;
            };

            info!(
                "LOS final update: {} {} - minimum separation: {:.3} nm {:.0} ft MSL. Last seen: {}",
                event.flight1_id,
                event.flight2_id,
                event.min_lat_dist,
                event.min_alt_dist,
                format_utc(event.last_time)
            );
            Stats::bump(&self.stats.los_finalize);
            metrics::counter!("los.finalized_total").increment(1);

            self.sink.update_los(&event);
            log_csv_record(&event);
        }
    }

    /// Spawn the background GC sweep. Returns a quit-signal sender; dropping
    /// it (or sending) stops the task after its current sleep.
    pub fn start_gc_task(self: Arc<Self>) -> mpsc::Sender<()> {
        let (quit_tx, mut quit_rx) = mpsc::channel::<()>(1);
        let tracker = self;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(LOS_GC_LOOP_DELAY)).await;
                if quit_rx.try_recv().is_ok() {
                    info!("LOS GC task stopping");
                    break;
                }
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                tracker.gc(now);
            }
        });
        quit_tx
    }
}

fn pair_key(id_a: &str, id_b: &str) -> String {
    let (first, second) = if id_a <= id_b { (id_a, id_b) } else { (id_b, id_a) };
    format!("{} {}", first.trim(), second.trim())
}

fn format_utc(ts: f64) -> String {
    Utc.timestamp_opt(ts as i64, 0)
        .single()
        .map(|t| t.to_string())
        .unwrap_or_else(|| format!("@{ts}"))
}

/// The grep-able finalization record consumed by postprocessing. Column
/// positions are load-bearing; `interp`, `audio`, `type`, and `phase` are
/// reserved placeholders.
fn log_csv_record(event: &LosEvent) {
    let mean = Location::midpoint(&event.loc1, &event.loc2);
    let datestring = format_utc(event.last_time);
    let altdatestring = Utc
        .timestamp_opt(event.last_time as i64, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d-%H:%M").to_string())
        .unwrap_or_default();
    let link = format!(
        "https://globe.adsbexchange.com/?replay={}&lat={}&lon={}&zoom=12",
        altdatestring, mean.lat, mean.lon
    );
    let (quality, _) = event.quality();

    info!(
        "CSV OUTPUT FOR POSTPROCESSING: {},{},{},{},{},{},{},{},{},{},interp,audio,type,phase,,{},{}",
        event.last_time,
        datestring,
        altdatestring,
        mean.lat,
        mean.lon,
        mean.alt_baro,
        event.flight1_id.trim(),
        event.flight2_id.trim(),
        quality.as_str(),
        link,
        event.min_lat_dist,
        event.min_alt_dist
    );
}
