//! Rule file model. The file is a YAML mapping:
//!
//! ```yaml
//! config:
//!   region_layers: [ gates.json ]
//! aircraft_lists:
//!   banned: [ "N12345" ]
//! rules:
//!   takeoff:
//!     conditions: { transition_regions: [ Ground, Air ] }
//!     actions:    { callback: takeoff, note: saw_takeoff }
//! ```
//!
//! Conditions and actions are a closed set, parsed up front into typed form
//! so evaluation never does string compares. Unknown condition names make the
//! rule evaluate false; unknown action names are skipped. Both are warned
//! about here, at load time.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde_yaml::Value;
use tracing::warn;

/// `latlongring: [radius_nm, center_lat, center_lon]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLongRing {
    pub radius_nm: f64,
    pub lat: f64,
    pub lon: f64,
}

/// `proximity: [alt_sep_ft, lat_sep_nm]` — per-pair thresholds; a pair
/// survives only when strictly inside both.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityThresholds {
    pub alt_sep_ft: f64,
    pub lat_sep_nm: f64,
}

/// One `"HHMM-HHMM"` window in UTC. A window whose end precedes its start
/// wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    start_min: u32,
    end_min: u32,
}

impl TimeRange {
    pub fn parse(s: &str) -> Result<TimeRange> {
        let (start, end) = s
            .split_once('-')
            .with_context(|| format!("time range '{s}' is not HHMM-HHMM"))?;
        Ok(TimeRange {
            start_min: parse_hhmm(start)?,
            end_min: parse_hhmm(end)?,
        })
    }

    /// Does the given epoch timestamp (UTC) fall inside the window?
    /// Invariant under whole-day shifts: matches(ts) == matches(ts + 86400).
    pub fn matches(&self, ts: f64) -> bool {
        let secs_of_day = (ts as i64).rem_euclid(86_400);
        let minute = (secs_of_day / 60) as u32;
        if self.end_min < self.start_min {
            minute >= self.start_min || minute <= self.end_min
        } else {
            minute >= self.start_min && minute <= self.end_min
        }
    }
}

fn parse_hhmm(s: &str) -> Result<u32> {
    let s = s.trim();
    if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
        bail!("'{s}' is not a HHMM time");
    }
    let hours: u32 = s[..2].parse()?;
    let minutes: u32 = s[2..].parse()?;
    if hours > 23 || minutes > 59 {
        bail!("'{s}' is out of range for HHMM");
    }
    Ok(hours * 60 + minutes)
}

/// `emergency:` condition forms.
#[derive(Debug, Clone, PartialEq)]
pub enum EmergencyCond {
    /// No emergency declared (absent or literal "none").
    None,
    /// Any declared emergency.
    Any,
    /// A specific emergency value, e.g. "7700".
    Value(String),
}

/// Conditions of one rule, AND-combined. Option fields are absent conditions;
/// adding a condition can only narrow the match set.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    pub enabled: Option<bool>,
    pub aircraft_list: Option<String>,
    pub min_alt: Option<i32>,
    pub max_alt: Option<i32>,
    pub min_vertical_rate: Option<f64>,
    pub max_vertical_rate: Option<f64>,
    pub squawk: Option<Vec<u32>>,
    pub emergency: Option<EmergencyCond>,
    pub category: Option<Vec<String>>,
    pub callsign_prefix: Option<Vec<String>>,
    /// Some(vec![]) encodes `regions: []` / `regions: ~` — "in no region".
    pub regions: Option<Vec<String>>,
    /// (from, to); either side may be None meaning "no region".
    pub transition_regions: Option<(Option<String>, Option<String>)>,
    pub changed_regions: bool,
    pub latlongring: Option<LatLongRing>,
    pub time_ranges: Option<Vec<TimeRange>>,
    pub proximity: Option<ProximityThresholds>,
    /// Seconds (the file specifies minutes).
    pub cooldown_secs: Option<f64>,
    pub rule_cooldown_secs: Option<f64>,
    /// Condition names we don't recognize; their presence makes the rule
    /// evaluate false.
    pub unknown: Vec<String>,
}

/// `webhook: [kind, recipient, message?]`
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookSpec {
    pub kind: String,
    pub recipient: String,
    pub message: Option<String>,
}

/// Actions of one rule; all fire when the conditions match.
#[derive(Debug, Clone, Default)]
pub struct Actions {
    pub callback: Option<String>,
    pub note: Option<String>,
    pub print: bool,
    pub webhook: Option<WebhookSpec>,
    pub emit_jsonl: Option<PathBuf>,
    /// Fires when the flight is expired from the registry, not per-position.
    pub expire_callback: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub conditions: Conditions,
    pub actions: Actions,
}

impl Rule {
    pub fn is_proximity(&self) -> bool {
        self.conditions.proximity.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigSection {
    /// Paths to region layer files, one layer per file, in evaluation order.
    pub region_layers: Vec<PathBuf>,
}

/// Parsed rule file: config header, named aircraft lists, and rules in file
/// order (evaluation preserves that order).
#[derive(Debug, Clone, Default)]
pub struct RulesFile {
    pub config: ConfigSection,
    pub aircraft_lists: HashMap<String, Vec<String>>,
    pub rules: Vec<Rule>,
}

impl RulesFile {
    pub fn from_file(path: &std::path::Path) -> Result<RulesFile> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read rules file {}", path.display()))?;
        Self::from_str(&text).with_context(|| format!("in rules file {}", path.display()))
    }

    pub fn from_str(yaml: &str) -> Result<RulesFile> {
        let root: Value = serde_yaml::from_str(yaml).context("rules file is not valid YAML")?;

        let mut out = RulesFile::default();

        if let Some(config) = root.get("config") {
            if let Some(layers) = config.get("region_layers") {
                out.config.region_layers =
                    serde_yaml::from_value(layers.clone()).context("config.region_layers")?;
            }
        }

        if let Some(lists) = root.get("aircraft_lists") {
            out.aircraft_lists =
                serde_yaml::from_value(lists.clone()).context("aircraft_lists")?;
        }

        let Some(rules) = root.get("rules") else {
            return Ok(out);
        };
        let Value::Mapping(rules) = rules else {
            bail!("'rules' must be a mapping of rule name to body");
        };

        for (name, body) in rules {
            let name = name
                .as_str()
                .context("rule names must be strings")?
                .to_string();
            let conditions = parse_conditions(&name, body.get("conditions"))
                .with_context(|| format!("rule '{name}' conditions"))?;
            let actions = parse_actions(&name, body.get("actions"))
                .with_context(|| format!("rule '{name}' actions"))?;
            out.rules.push(Rule {
                name,
                conditions,
                actions,
            });
        }

        Ok(out)
    }
}

/// Accept a bare string or a list of strings.
fn string_or_list(v: &Value) -> Result<Vec<String>> {
    match v {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Sequence(_) => Ok(serde_yaml::from_value(v.clone())?),
        _ => bail!("expected a string or list of strings"),
    }
}

/// `regions:` accepts null (no region), an empty list, or a list of names.
fn region_list(v: &Value) -> Result<Vec<String>> {
    match v {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(seq) => seq
            .iter()
            .map(|e| match e {
                Value::Null => bail!("use `regions: ~` rather than a null list entry"),
                Value::String(s) => Ok(s.clone()),
                _ => bail!("region names must be strings"),
            })
            .collect(),
        Value::String(s) => Ok(vec![s.clone()]),
        _ => bail!("expected a list of region names or null"),
    }
}

fn numbers(v: &Value, want: usize, what: &str) -> Result<Vec<f64>> {
    let nums: Vec<f64> =
        serde_yaml::from_value(v.clone()).with_context(|| format!("{what} must be numbers"))?;
    if nums.len() != want {
        bail!("{what} expects {want} values, got {}", nums.len());
    }
    Ok(nums)
}

fn parse_conditions(rule_name: &str, v: Option<&Value>) -> Result<Conditions> {
    let mut out = Conditions::default();
    let Some(Value::Mapping(map)) = v else {
        return Ok(out);
    };

    for (key, value) in map {
        let key = key.as_str().context("condition names must be strings")?;
        match key {
            "enabled" => out.enabled = Some(serde_yaml::from_value(value.clone())?),
            "aircraft_list" => out.aircraft_list = Some(serde_yaml::from_value(value.clone())?),
            "min_alt" => out.min_alt = Some(serde_yaml::from_value(value.clone())?),
            "max_alt" => out.max_alt = Some(serde_yaml::from_value(value.clone())?),
            "min_vertical_rate" => {
                out.min_vertical_rate = Some(serde_yaml::from_value(value.clone())?)
            }
            "max_vertical_rate" => {
                out.max_vertical_rate = Some(serde_yaml::from_value(value.clone())?)
            }
            "squawk" => out.squawk = Some(serde_yaml::from_value(value.clone())?),
            "emergency" => {
                out.emergency = Some(match value.as_str() {
                    Some("none") => EmergencyCond::None,
                    Some("any") => EmergencyCond::Any,
                    Some(other) => EmergencyCond::Value(other.to_string()),
                    None => bail!("emergency expects none, any, or a value"),
                })
            }
            "category" => out.category = Some(string_or_list(value)?),
            "callsign_prefix" => out.callsign_prefix = Some(string_or_list(value)?),
            "regions" => out.regions = Some(region_list(value)?),
            "transition_regions" => {
                let Value::Sequence(seq) = value else {
                    bail!("transition_regions expects [from, to]");
                };
                if seq.len() != 2 {
                    bail!("transition_regions expects exactly 2 entries");
                }
                let side = |v: &Value| -> Result<Option<String>> {
                    match v {
                        Value::Null => Ok(None),
                        Value::String(s) => Ok(Some(s.clone())),
                        _ => bail!("transition_regions entries must be names or null"),
                    }
                };
                out.transition_regions = Some((side(&seq[0])?, side(&seq[1])?));
            }
            "changed_regions" => {
                // Accepts `strict` or a bare true.
                out.changed_regions = match value {
                    Value::String(s) if s == "strict" => true,
                    Value::Bool(b) => *b,
                    _ => bail!("changed_regions expects `strict`"),
                }
            }
            "latlongring" => {
                let n = numbers(value, 3, "latlongring")?;
                out.latlongring = Some(LatLongRing {
                    radius_nm: n[0],
                    lat: n[1],
                    lon: n[2],
                });
            }
            "time_ranges" => {
                let ranges: Vec<String> = serde_yaml::from_value(value.clone())?;
                out.time_ranges = Some(
                    ranges
                        .iter()
                        .map(|s| TimeRange::parse(s))
                        .collect::<Result<_>>()?,
                );
            }
            "proximity" => {
                let n = numbers(value, 2, "proximity")?;
                out.proximity = Some(ProximityThresholds {
                    alt_sep_ft: n[0],
                    lat_sep_nm: n[1],
                });
            }
            "cooldown" => {
                let minutes: f64 = serde_yaml::from_value(value.clone())?;
                out.cooldown_secs = Some(minutes * 60.0);
            }
            "rule_cooldown" => {
                let minutes: f64 = serde_yaml::from_value(value.clone())?;
                out.rule_cooldown_secs = Some(minutes * 60.0);
            }
            other => {
                warn!("rule '{rule_name}': unknown condition '{other}' (rule will never match)");
                out.unknown.push(other.to_string());
            }
        }
    }
    Ok(out)
}

fn parse_actions(rule_name: &str, v: Option<&Value>) -> Result<Actions> {
    let mut out = Actions::default();
    let Some(Value::Mapping(map)) = v else {
        return Ok(out);
    };

    for (key, value) in map {
        let key = key.as_str().context("action names must be strings")?;
        match key {
            "callback" => out.callback = Some(serde_yaml::from_value(value.clone())?),
            "note" => out.note = Some(serde_yaml::from_value(value.clone())?),
            "print" => out.print = serde_yaml::from_value(value.clone())?,
            "webhook" => {
                let parts: Vec<String> = serde_yaml::from_value(value.clone())?;
                if parts.len() < 2 || parts.len() > 3 {
                    bail!("webhook expects [kind, recipient, message?]");
                }
                out.webhook = Some(WebhookSpec {
                    kind: parts[0].clone(),
                    recipient: parts[1].clone(),
                    message: parts.get(2).cloned(),
                });
            }
            "emit_jsonl" => {
                let path: String = serde_yaml::from_value(value.clone())?;
                out.emit_jsonl = Some(PathBuf::from(path));
            }
            "expire_callback" => {
                out.expire_callback = Some(serde_yaml::from_value(value.clone())?)
            }
            other => {
                warn!("rule '{rule_name}': unknown action '{other}' (skipped)");
            }
        }
    }
    Ok(out)
}
