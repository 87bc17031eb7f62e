// PSET EXPERIMENT FILES
// TOML DESCRIPTION OF ONE EXPERIMENT SET FOR THE COMMAND LINE FRONT END.
//
//   dir = "l3contention-data"
//   cpus = ["18-35"]
//   timeout = "20s"
//   auto_partition = false
//
//   [[program]]
//   label = "d4"
//   commands = ["./rpd -with-outer-loop 5000000 8 9999999 4"]
//
//   [[counter]]
//   name = "cycles"
//   combiner = "min"
//
//   [[extract]]
//   pattern = '(\d+) out of \d+ accesses completed'
//   groups = { progress = 1 }
//
//   [[computed]]
//   name = "demand"
//   op = "div"
//   args = ["offcore_response.all_data_rd.llc_miss.local_dram", "cycles"]
//
// REGISTRATION ORDER: COUNTERS, THEN EXTRACTIONS, THEN COMPUTED, EACH IN
// FILE ORDER, SO COMPUTED FEATURES CAN NAME ANYTHING ABOVE THEM.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PsetError, Result};
use crate::experiment::ExperimentSet;
use crate::feature::Combiner;
use crate::plan::Program;
use crate::probe::{CacheConfig, HardwareProbe};
use crate::tools::Tools;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentFile {
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub cpus: Vec<CpuEntry>,
    pub timeout: Option<String>,
    #[serde(default)]
    pub auto_partition: bool,
    #[serde(default)]
    pub strict_extraction: bool,
    /// Replaces the `getconf` probe.
    pub cache_ways: Option<u32>,
    /// Replaces the `pqos` probe.
    pub partition_classes: Option<u32>,
    #[serde(default)]
    pub tools: Tools,
    #[serde(default, rename = "program")]
    pub programs: Vec<ProgramEntry>,
    #[serde(default, rename = "counter")]
    pub counters: Vec<CounterEntry>,
    #[serde(default, rename = "extract")]
    pub extracts: Vec<ExtractEntry>,
    #[serde(default)]
    pub computed: Vec<ComputedEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CpuEntry {
    Id(u32),
    List(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramEntry {
    pub label: String,
    pub commands: Vec<String>,
    /// Replicate a single command across this many threads.
    pub threads: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterEntry {
    pub name: String,
    #[serde(default = "default_combiner")]
    pub combiner: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractEntry {
    pub pattern: String,
    #[serde(default = "default_combiner")]
    pub combiner: String,
    pub groups: BTreeMap<String, usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComputedEntry {
    pub name: String,
    pub op: Op,
    pub args: Vec<String>,
    #[serde(default = "default_combiner")]
    pub combiner: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl Op {
    // LEFT FOLD OVER THE ARGUMENTS: div(a, b, c) = a / b / c
    pub fn apply(self, args: &[f64]) -> f64 {
        let Some((&first, rest)) = args.split_first() else {
            return 0.0;
        };
        rest.iter().fold(first, |acc, &x| match self {
            Self::Add => acc + x,
            Self::Sub => acc - x,
            Self::Mul => acc * x,
            Self::Div => acc / x,
        })
    }

    fn min_args(self) -> usize {
        match self {
            Self::Add | Self::Mul => 1,
            Self::Sub | Self::Div => 2,
        }
    }
}

fn default_combiner() -> String {
    "sum".into()
}

fn combiner(name: &str) -> Result<Combiner> {
    Combiner::from_name(name)
        .ok_or_else(|| PsetError::Config(format!("unknown combiner '{}' (sum, min, max, mean)", name)))
}

// "18-35", "0,2,4-7"
pub fn parse_cpu_list(text: &str) -> Result<Vec<u32>> {
    let bad = || PsetError::Config(format!("bad cpu list '{}'", text));
    let mut cpus = Vec::new();
    for range in text.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        match range.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo.trim().parse().map_err(|_| bad())?;
                let hi: u32 = hi.trim().parse().map_err(|_| bad())?;
                if hi < lo {
                    return Err(bad());
                }
                cpus.extend(lo..=hi);
            }
            None => cpus.push(range.parse().map_err(|_| bad())?),
        }
    }
    Ok(cpus)
}

struct OverrideProbe<'a> {
    ways: Option<u32>,
    classes: Option<u32>,
    inner: &'a dyn HardwareProbe,
}

impl HardwareProbe for OverrideProbe<'_> {
    fn cache_ways(&self) -> Result<u32> {
        self.ways.map_or_else(|| self.inner.cache_ways(), Ok)
    }

    fn partition_classes(&self) -> Result<u32> {
        self.classes.map_or_else(|| self.inner.partition_classes(), Ok)
    }
}

impl ExperimentFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PsetError::io(path, e))?;
        toml::from_str(&text).map_err(|e| PsetError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PsetError::Config(e.to_string()))
    }

    pub fn cpus(&self) -> Result<Vec<u32>> {
        let mut cpus = Vec::new();
        for entry in &self.cpus {
            match entry {
                CpuEntry::Id(id) => cpus.push(*id),
                CpuEntry::List(list) => cpus.extend(parse_cpu_list(list)?),
            }
        }
        Ok(cpus)
    }

    // THE PROBE IS ONLY CONSULTED WHEN PARTITIONING IS ON
    pub fn into_experiment(self, probe: &dyn HardwareProbe) -> Result<ExperimentSet> {
        let mut set = ExperimentSet::new(self.dir.clone().unwrap_or_else(ExperimentSet::default_dir));
        set.set_cpus(self.cpus()?);
        set.set_timeout(self.timeout.as_deref());
        set.set_auto_partition(self.auto_partition);
        set.strict_extraction = self.strict_extraction;
        set.tools = self.tools;

        if self.auto_partition {
            let probe = OverrideProbe {
                ways: self.cache_ways,
                classes: self.partition_classes,
                inner: probe,
            };
            set.cache = Some(CacheConfig::detect(&probe)?);
        }

        for p in self.programs {
            let commands = match p.threads {
                None => p.commands,
                Some(n) if p.commands.len() == 1 => vec![p.commands[0].clone(); n],
                Some(_) => {
                    return Err(PsetError::Config(format!(
                        "program '{}': threads needs exactly one command",
                        p.label
                    )))
                }
            };
            set.add_program(Program::new(&p.label, commands));
        }

        for c in &self.counters {
            set.add_event(&c.name, combiner(&c.combiner)?)?;
        }
        for x in &self.extracts {
            let groups: Vec<(&str, usize)> = x.groups.iter().map(|(n, g)| (n.as_str(), *g)).collect();
            set.extract_feature(&x.pattern, combiner(&x.combiner)?, &groups)?;
        }
        for c in &self.computed {
            if c.args.len() < c.op.min_args() {
                return Err(PsetError::Config(format!(
                    "computed feature '{}': {:?} needs at least {} argument(s)",
                    c.name,
                    c.op,
                    c.op.min_args()
                )));
            }
            let op = c.op;
            let args: Vec<&str> = c.args.iter().map(String::as_str).collect();
            set.compute_feature(&c.name, move |v| op.apply(v), &args, combiner(&c.combiner)?)?;
        }

        Ok(set)
    }
}
