//! Declarative rule evaluation.
//!
//! Rules are parsed once at startup (`config`), pre-filtered spatially
//! (`spatial`), and rate-limited through the execution log (`cooldown`).
//! Evaluation runs on the ingest thread after every position update; the
//! per-pair proximity pass runs from the periodic checkpoint instead.

pub mod config;
pub mod cooldown;
pub mod spatial;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, error, info, warn};

use crate::callbacks::CallbackRegistry;
use crate::emit::JsonlEmitter;
use crate::flight::{Flight, FlightHandle};
use crate::stats::Stats;
use crate::webhooks::WebhookRegistry;

use config::{Actions, EmergencyCond, Rule, RulesFile};
use cooldown::RuleExecutionLog;
use spatial::SpatialIndex;

/// Engine tuning knobs. Both optimizations are optional; their contract is
/// that they never remove a rule that would otherwise match.
#[derive(Debug, Clone)]
pub struct RuleEngineConfig {
    pub use_spatial_index: bool,
    /// Grid cell size in degrees (1 degree is about 60 nm).
    pub grid_cell_deg: f64,
    /// Positions older than this (vs. the sweep time) are ignored by the
    /// proximity pass.
    pub min_fresh_secs: f64,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            use_spatial_index: true,
            grid_cell_deg: 1.0,
            min_fresh_secs: 10.0,
        }
    }
}

/// Whether the proximity condition acts as a gate (per-position evaluation)
/// or is skipped (the proximity pass itself, which checks pairs separately).
#[derive(Debug, Clone, Copy, PartialEq)]
enum EvalMode {
    PerPosition,
    PairFilter,
}

pub struct RuleEngine {
    rules: Vec<Rule>,
    aircraft_lists: HashMap<String, Vec<String>>,
    spatial: SpatialIndex,
    cooldowns: Mutex<RuleExecutionLog>,
    callbacks: RwLock<CallbackRegistry>,
    webhooks: RwLock<WebhookRegistry>,
    emitter: JsonlEmitter,
    stats: Arc<Stats>,
    config: RuleEngineConfig,
}

impl RuleEngine {
    pub fn new(file: RulesFile, stats: Arc<Stats>, config: RuleEngineConfig) -> Self {
        let spatial = SpatialIndex::build(&file.rules, config.grid_cell_deg, config.use_spatial_index);
        Self {
            rules: file.rules,
            aircraft_lists: file.aircraft_lists,
            spatial,
            cooldowns: Mutex::new(RuleExecutionLog::new()),
            callbacks: RwLock::new(CallbackRegistry::new()),
            webhooks: RwLock::new(WebhookRegistry::new()),
            emitter: JsonlEmitter::new(),
            stats,
            config,
        }
    }

    pub fn register_callback<F>(&self, name: &str, f: F)
    where
        F: Fn(&mut Flight) + Send + Sync + 'static,
    {
        self.callbacks.write().unwrap().register(name, f);
    }

    pub fn register_pair_callback<F>(&self, name: &str, f: F)
    where
        F: Fn(&Flight, &Flight) + Send + Sync + 'static,
    {
        self.callbacks.write().unwrap().register_pair(name, f);
    }

    pub fn register_webhook<F>(&self, kind: &str, f: F)
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        self.webhooks.write().unwrap().register(kind, f);
    }

    pub fn has_proximity_rules(&self) -> bool {
        self.rules.iter().any(Rule::is_proximity)
    }

    /// Dump per-rule execution counts to the log.
    pub fn report_rule_counts(&self) {
        self.cooldowns.lock().unwrap().report();
    }

    /// Evaluate all candidate rules against a flight after a position update.
    /// Fires actions for every rule whose conditions all pass.
    pub fn process_flight(&self, handle: &FlightHandle) {
        let mut flight = handle.lock().unwrap();
        let candidates = self
            .spatial
            .candidates(flight.last_loc.lat, flight.last_loc.lon);

        for idx in candidates {
            let rule = &self.rules[idx];
            if self.conditions_match(&flight, rule, EvalMode::PerPosition) {
                info!("MATCH rule {} for {}", rule.name, flight.flight_id);
                metrics::counter!("rules.matches_total", "rule" => rule.name.clone()).increment(1);
                self.do_actions(&mut flight, rule);
            }
        }
    }

    /// Expiry path: a flight is being removed from the registry. Fires rules
    /// that declare an `expire_callback` action (or carry the distinguished
    /// `expire_callback_rule` name), conditions permitting.
    pub fn do_expire(&self, handle: &FlightHandle) {
        let mut flight = handle.lock().unwrap();
        for rule in &self.rules {
            let is_expire_rule =
                rule.actions.expire_callback.is_some() || rule.name == "expire_callback_rule";
            if !is_expire_rule {
                continue;
            }
            if !self.conditions_match(&flight, rule, EvalMode::PerPosition) {
                continue;
            }
            debug!("expire actions for {} via rule {}", flight.flight_id, rule.name);
            if let Some(cb) = &rule.actions.expire_callback {
                self.log_fire(rule, &flight.flight_id, flight.last_loc.now, &rule.actions);
                self.invoke_callback(cb, &mut flight);
            } else {
                self.do_actions(&mut flight, rule);
            }
        }
    }

    /// The periodic O(N^2) pass behind `proximity` rules. For each such rule,
    /// flights are first filtered by the rule's per-flight conditions and a
    /// freshness gate; surviving unordered pairs are checked against the
    /// altitude/lateral thresholds, and matches fire the rule's actions with
    /// both flights.
    pub fn handle_proximity_conditions(&self, flights: &[FlightHandle], now: f64) {
        struct Snapshot {
            handle: FlightHandle,
            flight_id: String,
            alt: i32,
            lat: f64,
            lon: f64,
        }

        for rule in self.rules.iter().filter(|r| r.is_proximity()) {
            let thresholds = rule.conditions.proximity.expect("proximity rule");

            let mut survivors: Vec<Snapshot> = Vec::new();
            for handle in flights {
                let flight = handle.lock().unwrap();
                if now - flight.last_loc.now > self.config.min_fresh_secs {
                    continue;
                }
                if !self.conditions_match(&flight, rule, EvalMode::PairFilter) {
                    continue;
                }
                survivors.push(Snapshot {
                    handle: Arc::clone(handle),
                    flight_id: flight.flight_id.clone(),
                    alt: flight.last_loc.alt_baro,
                    lat: flight.last_loc.lat,
                    lon: flight.last_loc.lon,
                });
            }

            for i in 0..survivors.len() {
                for j in (i + 1)..survivors.len() {
                    let (a, b) = (&survivors[i], &survivors[j]);
                    let alt_sep = (a.alt - b.alt).abs() as f64;
                    if alt_sep >= thresholds.alt_sep_ft {
                        continue;
                    }
                    let lat_sep = crate::geometry::haversine_nm(a.lat, a.lon, b.lat, b.lon);
                    if lat_sep >= thresholds.lat_sep_nm {
                        continue;
                    }
                    info!(
                        "{}-{} inside minimum distance {:.2} nm / {:.0} ft",
                        a.flight_id, b.flight_id, lat_sep, alt_sep
                    );
                    metrics::counter!("rules.proximity_matches_total").increment(1);
                    self.do_pair_actions(rule, a.handle.clone(), b.handle.clone(), now);
                }
            }
        }
    }

    /// Evaluate a rule's conditions in fixed order, short-circuiting on the
    /// first miss. Cooldowns come last so only otherwise-matching rules
    /// consult the execution log.
    fn conditions_match(&self, flight: &Flight, rule: &Rule, mode: EvalMode) -> bool {
        Stats::bump(&self.stats.condition_match_calls);
        let c = &rule.conditions;
        let loc = &flight.last_loc;

        // Unknown condition names never match; the load path already warned.
        if !c.unknown.is_empty() {
            return false;
        }
        if c.enabled == Some(false) {
            return false;
        }

        let passed = |ok: bool| {
            if ok {
                Stats::bump(&self.stats.condition_matches_true);
            }
            ok
        };

        if let Some(list_name) = &c.aircraft_list {
            let Some(list) = self.aircraft_lists.get(list_name) else {
                warn!("rule {}: aircraft list '{}' not defined", rule.name, list_name);
                return false;
            };
            if !passed(list.iter().any(|id| id == &flight.flight_id)) {
                return false;
            }
        }
        if let Some(min) = c.min_alt {
            if !passed(loc.alt_baro >= min) {
                return false;
            }
        }
        if let Some(max) = c.max_alt {
            if !passed(loc.alt_baro <= max) {
                return false;
            }
        }
        if let Some(min) = c.min_vertical_rate {
            let rate = loc.info.as_ref().and_then(|i| i.baro_rate);
            if !passed(rate.is_some_and(|r| r >= min)) {
                return false;
            }
        }
        if let Some(max) = c.max_vertical_rate {
            let rate = loc.info.as_ref().and_then(|i| i.baro_rate);
            if !passed(rate.is_some_and(|r| r <= max)) {
                return false;
            }
        }
        if let Some(codes) = &c.squawk {
            let squawk = loc.info.as_ref().and_then(|i| i.squawk);
            if !passed(squawk.is_some_and(|s| codes.contains(&s))) {
                return false;
            }
        }
        if let Some(cond) = &c.emergency {
            let declared = loc
                .info
                .as_ref()
                .and_then(|i| i.emergency.as_deref())
                .filter(|e| !e.is_empty() && *e != "none");
            let ok = match cond {
                EmergencyCond::None => declared.is_none(),
                EmergencyCond::Any => declared.is_some(),
                EmergencyCond::Value(v) => declared == Some(v.as_str()),
            };
            if !passed(ok) {
                return false;
            }
        }
        if let Some(categories) = &c.category {
            let cat = flight.emitter_category();
            if !passed(cat.is_some_and(|c| categories.iter().any(|x| x == c))) {
                return false;
            }
        }
        if let Some(prefixes) = &c.callsign_prefix {
            let ok = prefixes.iter().any(|p| {
                flight.flight_id.starts_with(p.as_str()) || flight.other_id.starts_with(p.as_str())
            });
            if !passed(ok) {
                return false;
            }
        }
        if let Some(names) = &c.regions {
            if !passed(flight.is_in_regions(names)) {
                return false;
            }
        }
        if let Some((from, to)) = &c.transition_regions {
            let as_list = |side: &Option<String>| -> Vec<String> {
                side.iter().cloned().collect()
            };
            let ok = flight.was_in_regions(&as_list(from)) && flight.is_in_regions(&as_list(to));
            if !passed(ok) {
                return false;
            }
        }
        if c.changed_regions && !passed(flight.changed_regions()) {
            return false;
        }
        if let Some(ring) = &c.latlongring {
            let dist = loc.dist_from_nm(ring.lat, ring.lon);
            if !passed(dist <= ring.radius_nm) {
                return false;
            }
        }
        if let Some(ranges) = &c.time_ranges {
            if !passed(ranges.iter().any(|r| r.matches(loc.now))) {
                return false;
            }
        }

        // Proximity rules are evaluated exclusively in the periodic pass;
        // per-position evaluation treats the condition as a closed gate.
        if c.proximity.is_some() && mode == EvalMode::PerPosition {
            return false;
        }

        if let Some(secs) = c.cooldown_secs {
            let within = self.cooldowns.lock().unwrap().within_cooldown(
                &rule.name,
                &flight.flight_id,
                secs,
                loc.now,
            );
            if !passed(!within) {
                return false;
            }
        }
        if let Some(secs) = c.rule_cooldown_secs {
            let within = self
                .cooldowns
                .lock()
                .unwrap()
                .within_rule_cooldown(&rule.name, secs, loc.now);
            if !passed(!within) {
                return false;
            }
        }

        true
    }

    /// Record a fire in the execution log so subsequent cooldown checks see it.
    fn log_fire(&self, rule: &Rule, flight_id: &str, now: f64, actions: &Actions) {
        self.cooldowns
            .lock()
            .unwrap()
            .log(&rule.name, flight_id, now, actions.note.as_deref());
    }

    /// Run a single-flight callback with panic isolation; user code can
    /// never take down the ingest loop.
    fn invoke_callback(&self, name: &str, flight: &mut Flight) {
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.callbacks.read().unwrap().dispatch(name, flight)
        }));
        match result {
            Ok(true) => {
                Stats::bump(&self.stats.callbacks_fired);
                metrics::counter!("rules.callbacks_total").increment(1);
            }
            Ok(false) => {
                Stats::bump(&self.stats.callback_failures);
            }
            Err(_) => {
                error!("callback '{name}' panicked; continuing");
                Stats::bump(&self.stats.callback_failures);
                metrics::counter!("rules.callback_panics_total").increment(1);
            }
        }
    }

    /// Execute every action of a matched rule for one flight. Each executed
    /// action records a cooldown entry, even when it isn't a callback.
    fn do_actions(&self, flight: &mut Flight, rule: &Rule) {
        let now = flight.last_loc.now;
        let a = &rule.actions;

        if let Some(name) = &a.callback {
            self.log_fire(rule, &flight.flight_id, now, a);
            if a.note.is_some() {
                Stats::bump(&self.stats.callbacks_with_notes);
            }
            self.invoke_callback(name, flight);
        }
        if let Some(note) = &a.note {
            self.log_fire(rule, &flight.flight_id, now, a);
            debug!("setting note for {} to {}", flight.flight_id, note);
            flight.flags.insert("note".to_string(), note.clone());
        }
        if a.print {
            self.log_fire(rule, &flight.flight_id, now, a);
            info!("rule {} matched for {}", rule.name, flight.flight_id);
        }
        if let Some(spec) = &a.webhook {
            self.log_fire(rule, &flight.flight_id, now, a);
            let message = spec
                .message
                .clone()
                .unwrap_or_else(|| format!("{}: {}", rule.name, flight.to_str()));
            Stats::bump(&self.stats.webhooks_fired);
            self.webhooks
                .read()
                .unwrap()
                .send(&spec.kind, &spec.recipient, &message);
        }
        if let Some(path) = &a.emit_jsonl {
            self.log_fire(rule, &flight.flight_id, now, a);
            match self.emitter.append(path, &flight.last_loc) {
                Ok(()) => Stats::bump(&self.stats.emit_jsonl_lines),
                Err(e) => error!("emit_jsonl to {} failed: {e:#}", path.display()),
            }
        }
        // expire_callback fires from do_expire, never on a position update.
    }

    /// Execute a proximity rule's actions for a matched pair. Both flights
    /// are locked in canonical id order; the cooldown entry is recorded for
    /// both ids so per-flight cooldowns suppress either side.
    fn do_pair_actions(&self, rule: &Rule, h1: FlightHandle, h2: FlightHandle, now: f64) {
        let (first, second) = {
            let id1 = h1.lock().unwrap().flight_id.clone();
            let id2 = h2.lock().unwrap().flight_id.clone();
            if id1 <= id2 {
                (h1, h2)
            } else {
                (h2, h1)
            }
        };
        let mut f1 = first.lock().unwrap();
        let mut f2 = second.lock().unwrap();
        let a = &rule.actions;

        self.log_fire(rule, &f1.flight_id, now, a);
        self.log_fire(rule, &f2.flight_id, now, a);

        if let Some(name) = &a.callback {
            let result = catch_unwind(AssertUnwindSafe(|| {
                self.callbacks.read().unwrap().dispatch_pair(name, &f1, &f2)
            }));
            match result {
                Ok(true) => {
                    Stats::bump(&self.stats.callbacks_fired);
                    metrics::counter!("rules.callbacks_total").increment(1);
                }
                Ok(false) => Stats::bump(&self.stats.callback_failures),
                Err(_) => {
                    error!("pair callback '{name}' panicked; continuing");
                    Stats::bump(&self.stats.callback_failures);
                }
            }
        }
        if let Some(note) = &a.note {
            f1.flags.insert("note".to_string(), note.clone());
            f2.flags.insert("note".to_string(), note.clone());
        }
        if a.print {
            info!(
                "rule {} matched for {} / {}",
                rule.name, f1.flight_id, f2.flight_id
            );
        }
        if let Some(spec) = &a.webhook {
            let message = spec.message.clone().unwrap_or_else(|| {
                format!("{}: {} and {}", rule.name, f1.to_str(), f2.to_str())
            });
            Stats::bump(&self.stats.webhooks_fired);
            self.webhooks
                .read()
                .unwrap()
                .send(&spec.kind, &spec.recipient, &message);
        }
        if let Some(path) = &a.emit_jsonl {
            for loc in [&f1.last_loc, &f2.last_loc] {
                match self.emitter.append(path, loc) {
                    Ok(()) => Stats::bump(&self.stats.emit_jsonl_lines),
                    Err(e) => error!("emit_jsonl to {} failed: {e:#}", path.display()),
                }
            }
        }
    }
}
