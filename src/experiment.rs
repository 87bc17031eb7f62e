// PSET EXPERIMENT SET
// OWNS ONE BATCH CONFIGURATION AND DRIVES A RUN END TO END:
//   MKDIR -> PLAN -> SCRIPT -> INFO DUMP -> CHMOD -> EXECUTE (BLOCKING) -> COLLECT
//
// SINGLE-THREADED. ALL PARALLELISM LIVES IN THE SCRIPT; THE ONLY
// SYNCHRONIZATION IS THE SCRIPT'S wait BARRIER.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::collect::{Collector, Stats};
use crate::error::{PsetError, Result};
use crate::feature::{Combiner, FeatureSet};
use crate::plan::{build_plan, Plan, Program};
use crate::probe::CacheConfig;
use crate::script::synthesize;
use crate::tools::Tools;

#[derive(Debug)]
pub struct ExperimentSet {
    programs: Vec<Program>,
    cpus: Vec<u32>,
    pub features: FeatureSet,
    pub dir: PathBuf,
    pub timeout: Option<String>,
    pub auto_partition: bool,
    pub strict_extraction: bool,
    pub tools: Tools,
    pub cache: Option<CacheConfig>,
}

#[derive(Debug)]
pub struct RunOutcome {
    /// One entry per program, in program order.
    pub stats: Vec<Stats>,
    /// Low 8 bits of the script's exit code, or 128 + signal.
    pub exit_status: i32,
    pub script: PathBuf,
}

impl ExperimentSet {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            programs: Vec::new(),
            cpus: Vec::new(),
            features: FeatureSet::new(),
            dir: dir.into(),
            timeout: None,
            auto_partition: false,
            strict_extraction: false,
            tools: Tools::default(),
            cache: None,
        }
    }

    // pset-<NANOSECONDS SINCE EPOCH>, UNIQUE ENOUGH FOR BACK-TO-BACK SETS
    pub fn default_dir() -> PathBuf {
        let ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        PathBuf::from(format!("pset-{}", ns))
    }

    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    pub fn set_programs(&mut self, programs: Vec<Program>) {
        self.programs = programs;
    }

    pub fn add_program(&mut self, program: Program) {
        self.programs.push(program);
    }

    pub fn cpus(&self) -> &[u32] {
        &self.cpus
    }

    // SORTED, NO DUPLICATES
    pub fn set_cpus(&mut self, cpus: impl IntoIterator<Item = u32>) {
        let mut cpus: Vec<u32> = cpus.into_iter().collect();
        cpus.sort_unstable();
        cpus.dedup();
        self.cpus = cpus;
    }

    pub fn set_timeout(&mut self, timeout: Option<&str>) {
        self.timeout = timeout.filter(|t| !t.is_empty()).map(str::to_string);
    }

    pub fn set_auto_partition(&mut self, flag: bool) {
        self.auto_partition = flag;
    }

    pub fn add_event(&mut self, name: &str, combiner: Combiner) -> Result<()> {
        self.features.add_counter(name, combiner)
    }

    pub fn compute_feature<F>(&mut self, name: &str, func: F, args: &[&str], combiner: Combiner) -> Result<()>
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        self.features.add_computed(name, func, args, combiner)
    }

    pub fn extract_feature(&mut self, pattern: &str, combiner: Combiner, groups: &[(&str, usize)]) -> Result<()> {
        self.features.add_extracted(pattern, combiner, groups)
    }

    pub fn plan(&self, stamp: &str) -> Result<Plan> {
        build_plan(
            &self.programs,
            &self.cpus,
            &self.features.counter_names(),
            self.timeout.as_deref(),
            &self.tools,
            &self.dir,
            stamp,
        )
    }

    fn partition(&self) -> Result<Option<&CacheConfig>> {
        if !self.auto_partition {
            return Ok(None);
        }
        self.cache.as_ref().map(Some).ok_or_else(|| {
            PsetError::Config("automatic cache partitioning needs a probed cache config".into())
        })
    }

    pub fn script_for(&self, plan: &Plan) -> Result<String> {
        synthesize(plan, self.partition()?, &self.tools)
    }

    // SCRIPT TEXT FOR INSPECTION. NOTHING IS WRITTEN OR RUN.
    pub fn create_script(&self, stamp: &str) -> Result<String> {
        self.script_for(&self.plan(stamp)?)
    }

    pub fn script_path(&self, stamp: &str) -> PathBuf {
        self.dir.join(format!("{}.sh", stamp))
    }

    pub fn info_path(&self, stamp: &str) -> PathBuf {
        self.dir.join(format!("{}.info", stamp))
    }

    pub fn write_info(&self, stamp: &str) -> Result<()> {
        let path = self.info_path(stamp);
        fs::write(&path, format!("{:#?}\n", self)).map_err(|e| PsetError::io(&path, e))
    }

    pub fn run(&self, stamp: &str) -> Result<RunOutcome> {
        self.run_with(stamp, &AtomicBool::new(false))
    }

    // `interrupted` IS SET BY THE CALLER'S SIGINT HANDLER. IF IT FIRES WHILE
    // THE SCRIPT RUNS, THE SCRIPT'S OWN TEARDOWN NEVER EXECUTES, SO RESET
    // THE PARTITIONS FROM HERE BEFORE GIVING UP.
    pub fn run_with(&self, stamp: &str, interrupted: &AtomicBool) -> Result<RunOutcome> {
        fs::create_dir_all(&self.dir).map_err(|e| PsetError::io(&self.dir, e))?;

        let plan = self.plan(stamp)?;
        let script = self.script_for(&plan)?;

        let path = self.script_path(stamp);
        fs::write(&path, &script).map_err(|e| PsetError::io(&path, e))?;
        self.write_info(stamp)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .map_err(|e| PsetError::io(&path, e))?;
        info!(script = %path.display(), threads = plan.thread_count(), "created script");

        if self.auto_partition && unsafe { libc::geteuid() } != 0 {
            warn!("cache partitioning usually needs root; pqos may fail");
        }

        info!("running...");
        let status = Command::new(runnable(&path))
            .status()
            .map_err(|e| PsetError::io(&path, e))?;
        let exit_status = exit_code(status);
        if exit_status == 0 {
            info!(exit_status, "script finished");
        } else {
            warn!(exit_status, "script finished with non-zero status, collecting anyway");
        }

        if interrupted.load(Ordering::Relaxed) {
            if self.auto_partition {
                self.reset_partitions();
            }
            return Err(PsetError::Interrupted);
        }

        let stats = Collector::new(&self.features)
            .strict(self.strict_extraction)
            .collect(&plan)?;

        Ok(RunOutcome { stats, exit_status, script: path })
    }

    fn reset_partitions(&self) {
        warn!(command = %self.tools.partition_reset, "resetting cache partitions");
        match Command::new("sh").arg("-c").arg(&self.tools.partition_reset).status() {
            Ok(s) if s.success() => {}
            Ok(s) => warn!(status = %s, "partition reset failed"),
            Err(e) => warn!(error = %e, "partition reset failed"),
        }
    }
}

// A BARE RELATIVE NAME WOULD BE LOOKED UP ON $PATH
fn runnable(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(".").join(path)
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code & 0xff,
        (None, Some(sig)) => 128 + sig,
        (None, None) => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpus_sorted_and_deduplicated() {
        let mut set = ExperimentSet::new("d");
        set.set_cpus([19, 18, 19, 3]);
        assert_eq!(set.cpus(), &[3, 18, 19]);
        set.set_cpus(18..21);
        assert_eq!(set.cpus(), &[18, 19, 20]);
    }

    #[test]
    fn fresh_sets_share_nothing() {
        let mut a = ExperimentSet::new("a");
        let b = ExperimentSet::new("b");
        a.add_program(Program::single("x", "true"));
        assert_eq!(a.programs().len(), 1);
        assert!(b.programs().is_empty());
    }

    #[test]
    fn empty_timeout_is_none() {
        let mut set = ExperimentSet::new("d");
        set.set_timeout(Some(""));
        assert_eq!(set.timeout, None);
        set.set_timeout(Some("5s"));
        assert_eq!(set.timeout.as_deref(), Some("5s"));
    }

    #[test]
    fn partitioning_without_cache_config_rejected() {
        let mut set = ExperimentSet::new("d");
        set.set_cpus([1]);
        set.add_program(Program::single("x", "true"));
        set.set_auto_partition(true);
        assert!(matches!(set.create_script("s"), Err(PsetError::Config(_))));

        set.cache = Some(CacheConfig { ways: 20, classes: 16 });
        assert!(set.create_script("s").unwrap().ends_with("pqos -R\n"));
    }

    #[test]
    fn relative_script_paths_are_runnable() {
        assert_eq!(runnable(Path::new("d/s.sh")), PathBuf::from("./d/s.sh"));
        assert_eq!(runnable(Path::new("/tmp/s.sh")), PathBuf::from("/tmp/s.sh"));
    }

    #[test]
    fn exit_code_low_bits() {
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
    }
}
