//! Execution log behind the `cooldown` and `rule_cooldown` conditions.
//! Timestamps live in the ingested time domain, never wall-clock, so replays
//! at speed behave identically to live runs.

use std::collections::HashMap;

use tracing::info;

/// Per-rule fire counter, broken down by the note the rule wrote.
#[derive(Debug, Default)]
pub struct ExecutionCounter {
    pub count: u64,
    pub note_counts: HashMap<String, u64>,
}

impl ExecutionCounter {
    fn increment(&mut self, note: Option<&str>) {
        self.count += 1;
        if let Some(note) = note {
            *self.note_counts.entry(note.to_string()).or_insert(0) += 1;
        }
    }
}

/// Last execution times for each rule and rule/flight pair.
#[derive(Debug, Default)]
pub struct RuleExecutionLog {
    /// (rule_name, flight_id) -> last-fire timestamp. The flight_id slot is
    /// empty for the rule-wide entry.
    last_fire: HashMap<(String, String), f64>,
    counters: HashMap<String, ExecutionCounter>,
}

impl RuleExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a firing of `rule` for `flight_id` at ingested time `now`.
    /// Also refreshes the rule-wide entry used by `rule_cooldown`.
    pub fn log(&mut self, rule: &str, flight_id: &str, now: f64, note: Option<&str>) {
        self.counters
            .entry(rule.to_string())
            .or_default()
            .increment(note);
        self.last_fire
            .insert((rule.to_string(), flight_id.to_string()), now);
        self.last_fire.insert((rule.to_string(), String::new()), now);
    }

    /// Has `rule` fired for `flight_id` within the last `cooldown_secs`?
    pub fn within_cooldown(&self, rule: &str, flight_id: &str, cooldown_secs: f64, now: f64) -> bool {
        self.last_fire
            .get(&(rule.to_string(), flight_id.to_string()))
            .is_some_and(|&t| now - t < cooldown_secs)
    }

    /// Has `rule` fired for any flight within the last `cooldown_secs`?
    pub fn within_rule_cooldown(&self, rule: &str, cooldown_secs: f64, now: f64) -> bool {
        self.within_cooldown(rule, "", cooldown_secs, now)
    }

    pub fn fire_count(&self, rule: &str) -> u64 {
        self.counters.get(rule).map(|c| c.count).unwrap_or(0)
    }

    /// Log a summary of every rule that fired.
    pub fn report(&self) {
        for (rule, counter) in &self.counters {
            info!("rule {} matched {} times", rule, counter.count);
            for (note, count) in &counter.note_counts {
                info!("    including {} {} times", note, count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_window() {
        let mut log = RuleExecutionLog::new();
        log.log("banned", "N12345", 1000.0, None);

        assert!(log.within_cooldown("banned", "N12345", 180.0, 1100.0));
        assert!(!log.within_cooldown("banned", "N12345", 180.0, 1180.0));
        assert!(!log.within_cooldown("banned", "N99999", 180.0, 1100.0));
        assert!(!log.within_cooldown("other", "N12345", 180.0, 1100.0));
    }

    #[test]
    fn test_rule_wide_cooldown() {
        let mut log = RuleExecutionLog::new();
        log.log("page", "N1", 1000.0, None);

        // Rule-wide entry is refreshed regardless of which flight fired.
        assert!(log.within_rule_cooldown("page", 60.0, 1030.0));
        assert!(!log.within_rule_cooldown("page", 60.0, 1060.0));
    }

    #[test]
    fn test_later_fire_refreshes_window() {
        let mut log = RuleExecutionLog::new();
        log.log("r", "f", 1000.0, None);
        log.log("r", "f", 1150.0, None);
        assert!(log.within_cooldown("r", "f", 180.0, 1300.0));
    }

    #[test]
    fn test_counters_by_note() {
        let mut log = RuleExecutionLog::new();
        log.log("r", "f1", 1.0, Some("saw_takeoff"));
        log.log("r", "f2", 2.0, Some("saw_takeoff"));
        log.log("r", "f3", 3.0, None);
        assert_eq!(log.fire_count("r"), 3);
    }
}
