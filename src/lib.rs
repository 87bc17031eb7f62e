// PSET LIBRARY
// CONCURRENT MICRO-BENCHMARK EXPERIMENTS ON PINNED CPUs:
// FEATURES -> PLAN -> SCRIPT -> (BASH RUNS IT) -> STATS
//
// SHARED BETWEEN THE pset BINARY AND THE INTEGRATION TESTS.

pub mod collect;
pub mod config;
pub mod error;
pub mod experiment;
pub mod feature;
pub mod plan;
pub mod probe;
pub mod script;
pub mod tools;

pub use collect::{Collector, Stats};
pub use error::{PsetError, Result};
pub use experiment::{ExperimentSet, RunOutcome};
pub use feature::{Combiner, Feature, FeatureKind, FeatureSet};
pub use plan::{build_plan, Execution, Plan, Program};
pub use probe::{CacheConfig, FixedProbe, HardwareProbe, SystemProbe};
pub use script::synthesize;
pub use tools::Tools;
