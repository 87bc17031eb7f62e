// PSET FEATURE MODEL
// A FEATURE NAMES ONE METRIC, SAYS WHERE ITS PER-THREAD VALUE COMES FROM
// (COUNTER FILE, STDOUT PATTERN, OR OTHER FEATURES) AND HOW THE THREADS
// OF ONE PROGRAM ARE COMBINED INTO A SINGLE VALUE.
//
// RESOLUTION ORDER IS DECLARATION ORDER. A COMPUTED FEATURE CAN ONLY NAME
// FEATURES THAT ALREADY EXIST, SO WALKING THE LIST FRONT TO BACK ALWAYS
// SEES ITS ARGUMENTS BEFORE IT.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{PsetError, Result};

pub type ComputeFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;
pub type CombineFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Reduction from the ordered per-thread values of a program to one value.
#[derive(Clone)]
pub enum Combiner {
    Sum,
    Min,
    Max,
    Mean,
    Custom(&'static str, CombineFn),
}

impl Combiner {
    pub fn combine(&self, values: &[f64]) -> f64 {
        match self {
            Self::Sum => values.iter().sum(),
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Mean => {
                if values.is_empty() {
                    return 0.0;
                }
                values.iter().sum::<f64>() / values.len() as f64
            }
            Self::Custom(_, f) => f(values),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Mean => "mean",
            Self::Custom(name, _) => *name,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(Self::Sum),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "mean" | "avg" => Some(Self::Mean),
            _ => None,
        }
    }
}

impl Default for Combiner {
    fn default() -> Self {
        Self::Sum
    }
}

impl fmt::Debug for Combiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone)]
pub enum FeatureKind {
    /// Read from the counter capture file. The feature name is the counter name.
    Counter,
    /// Derived from already-resolved features of the same thread.
    Computed { func: ComputeFn, args: Vec<String> },
    /// First stdout line matching `pattern`, capture group `group`.
    Extracted { pattern: Regex, group: usize },
}

impl fmt::Debug for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counter => f.write_str("Counter"),
            Self::Computed { args, .. } => f.debug_struct("Computed").field("args", args).finish(),
            Self::Extracted { pattern, group } => f
                .debug_struct("Extracted")
                .field("pattern", &pattern.as_str())
                .field("group", group)
                .finish(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Feature {
    pub name: String,
    pub combiner: Combiner,
    pub kind: FeatureKind,
}

impl Feature {
    pub fn is_counter(&self) -> bool {
        matches!(self.kind, FeatureKind::Counter)
    }
}

#[derive(Clone, Debug, Default)]
pub struct FeatureSet {
    features: Vec<Feature>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.name.as_str()).collect()
    }

    // COUNTER NAMES IN LIST ORDER -- THIS IS THE -e LIST HANDED TO THE CAPTURE TOOL
    pub fn counter_names(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter(|f| f.is_counter())
            .map(|f| f.name.as_str())
            .collect()
    }

    // COUNTERS GO TO THE FRONT OF THE LIST.
    // REGISTERING THE SAME COUNTER TWICE WITH THE SAME COMBINER IS A NO-OP.
    pub fn add_counter(&mut self, name: &str, combiner: Combiner) -> Result<()> {
        if let Some(existing) = self.get(name) {
            if existing.is_counter() && existing.combiner.name() == combiner.name() {
                return Ok(());
            }
            return Err(duplicate(name));
        }
        self.features.insert(
            0,
            Feature { name: name.to_string(), combiner, kind: FeatureKind::Counter },
        );
        Ok(())
    }

    pub fn add_computed<F>(
        &mut self,
        name: &str,
        func: F,
        args: &[&str],
        combiner: Combiner,
    ) -> Result<()>
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        if self.contains(name) {
            return Err(duplicate(name));
        }
        let missing: Vec<&str> = args.iter().copied().filter(|a| !self.contains(a)).collect();
        if !missing.is_empty() {
            return Err(PsetError::Config(format!(
                "computed feature '{}' depends on undefined features: {}",
                name,
                missing.join(", ")
            )));
        }
        self.features.push(Feature {
            name: name.to_string(),
            combiner,
            kind: FeatureKind::Computed {
                func: Arc::new(func),
                args: args.iter().map(|a| a.to_string()).collect(),
            },
        });
        Ok(())
    }

    // SEVERAL FEATURES MAY SHARE ONE PATTERN, EACH TAKING ITS OWN GROUP.
    // ALL-OR-NOTHING: A BAD ENTRY LEAVES THE SET UNTOUCHED.
    pub fn add_extracted(
        &mut self,
        pattern: &str,
        combiner: Combiner,
        groups: &[(&str, usize)],
    ) -> Result<()> {
        let regex = Regex::new(pattern).map_err(|e| {
            PsetError::Config(format!("bad extraction pattern '{}': {}", pattern, e))
        })?;
        // captures_len() COUNTS THE IMPLICIT GROUP 0
        let max_group = regex.captures_len() - 1;

        for (i, &(name, group)) in groups.iter().enumerate() {
            if self.contains(name) || groups[..i].iter().any(|(n, _)| *n == name) {
                return Err(duplicate(name));
            }
            if group > max_group {
                return Err(PsetError::Config(format!(
                    "feature '{}' asks for group {} but '{}' has {} group(s)",
                    name, group, pattern, max_group
                )));
            }
        }

        for &(name, group) in groups {
            self.features.push(Feature {
                name: name.to_string(),
                combiner: combiner.clone(),
                kind: FeatureKind::Extracted { pattern: regex.clone(), group },
            });
        }
        Ok(())
    }
}

fn duplicate(name: &str) -> PsetError {
    PsetError::Config(format!("feature '{}' is already defined", name))
}
