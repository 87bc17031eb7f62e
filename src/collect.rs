// PSET STATS COLLECTION
// RUNS ONLY AFTER THE SCRIPT'S BARRIER: CHILDREN WRITE THEIR FILES
// INCREMENTALLY, SO NOTHING HERE MAY TOUCH THEM BEFORE EVERY wait RETURNED.
//
// PER THREAD: WALK THE FEATURES IN DECLARATION ORDER AND RESOLVE EACH ONE.
// PER PROGRAM: FOLD EACH FEATURE'S PER-THREAD VALUES WITH ITS COMBINER.

use std::fs;
use std::path::Path;

use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{debug, warn};

use crate::error::{PsetError, Result};
use crate::feature::{FeatureKind, FeatureSet};
use crate::plan::{Execution, Plan};

/// Feature name to value, iterated in feature declaration order.
///
/// Values are `f64`. Counts above 2^53 (`EXACT_COUNT_LIMIT`) are rounded to
/// the nearest representable value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stats {
    entries: Vec<(String, f64)>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Stats {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

pub struct Collector<'a> {
    features: &'a FeatureSet,
    strict: bool,
}

impl<'a> Collector<'a> {
    pub fn new(features: &'a FeatureSet) -> Self {
        Self { features, strict: false }
    }

    // STRICT: AN EXTRACTION PATTERN THAT NEVER MATCHES IS A PARSE ERROR
    // RIGHT AWAY, INSTEAD OF A MISSING VALUE THAT SURFACES LATER
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn collect(&self, plan: &Plan) -> Result<Vec<Stats>> {
        plan.groups.iter().map(|g| self.collect_group(g)).collect()
    }

    pub fn collect_group(&self, group: &[Execution]) -> Result<Stats> {
        let per_thread = group.iter().map(|e| self.resolve(e)).collect::<Result<Vec<_>>>()?;

        let mut stats = Stats::new();
        for feature in self.features.iter() {
            let values = per_thread
                .iter()
                .zip(group)
                .map(|(s, e)| {
                    s.get(&feature.name).ok_or_else(|| PsetError::Dependency {
                        needed_by: format!("aggregation over {}", e.stdout.display()),
                        missing: feature.name.clone(),
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            stats.insert(&feature.name, feature.combiner.combine(&values));
        }
        Ok(stats)
    }

    pub fn resolve(&self, exec: &Execution) -> Result<Stats> {
        let mut perf: Option<String> = None;
        let mut stdout: Option<String> = None;
        let mut stats = Stats::new();

        for feature in self.features.iter() {
            match &feature.kind {
                FeatureKind::Counter => {
                    let text = cached_read(&mut perf, &exec.perfout)?;
                    let value = parse_counter(text, &feature.name)
                        .map_err(|msg| PsetError::parse(&exec.perfout, msg))?;
                    stats.insert(&feature.name, value);
                }
                FeatureKind::Extracted { pattern, group } => {
                    let text = cached_read(&mut stdout, &exec.stdout)?;
                    let captured = text
                        .lines()
                        .find_map(|line| pattern.captures(line))
                        .map(|caps| caps.get(*group).map_or("", |m| m.as_str()).to_string());
                    match captured {
                        Some(raw) => {
                            let value: f64 = raw.trim().parse().map_err(|_| {
                                PsetError::parse(
                                    &exec.stdout,
                                    format!("'{}' captured {:?}, not a number", feature.name, raw),
                                )
                            })?;
                            stats.insert(&feature.name, value);
                        }
                        None if self.strict => {
                            return Err(PsetError::parse(
                                &exec.stdout,
                                format!("no line matches '{}' for '{}'", pattern, feature.name),
                            ));
                        }
                        None => debug!(feature = %feature.name, file = %exec.stdout.display(), "no match"),
                    }
                }
                FeatureKind::Computed { func, args } => {
                    let inputs = args
                        .iter()
                        .map(|a| {
                            stats.get(a).ok_or_else(|| PsetError::Dependency {
                                needed_by: format!("feature '{}'", feature.name),
                                missing: a.clone(),
                            })
                        })
                        .collect::<Result<Vec<f64>>>()?;
                    stats.insert(&feature.name, func(&inputs));
                }
            }
        }

        debug!(cpu = exec.cpu, ?stats, "resolved thread");
        Ok(stats)
    }
}

fn cached_read<'c>(slot: &'c mut Option<String>, path: &Path) -> Result<&'c str> {
    if slot.is_none() {
        let bytes = fs::read(path).map_err(|e| PsetError::io(path, e))?;
        *slot = Some(String::from_utf8_lossy(&bytes).into_owned());
    }
    Ok(slot.as_deref().unwrap_or_default())
}

/// Largest count an `f64` holds exactly.
pub const EXACT_COUNT_LIMIT: u64 = 1 << f64::MANTISSA_DIGITS;

// FIRST LINE WHOSE WHITESPACE TOKENS INCLUDE THE COUNTER NAME.
// ITS FIRST TOKEN IS THE VALUE, GROUPING COMMAS REMOVED.
pub fn parse_counter(text: &str, name: &str) -> std::result::Result<f64, String> {
    let line = text
        .lines()
        .find(|l| l.split_whitespace().any(|t| t == name))
        .ok_or_else(|| format!("no line for counter '{}'", name))?;
    let raw: String = line
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|&c| c != ',')
        .collect();
    if let Ok(v) = raw.parse::<u64>() {
        if v > EXACT_COUNT_LIMIT {
            warn!(counter = name, value = v, "count above 2^53, rounded");
        }
        return Ok(v as f64);
    }
    // TIME-BASED EVENTS (task-clock) REPORT FRACTIONAL VALUES
    raw.parse::<f64>()
        .map_err(|_| format!("counter '{}' has value {:?}, not a number", name, raw))
}
