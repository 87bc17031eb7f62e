// PSET EXECUTION PLAN
// TURNS PROGRAMS INTO PINNED, FULLY-WRAPPED SHELL COMMANDS.
//
// CPUs ARE HANDED OUT FRONT TO BACK IN POOL ORDER, PROGRAM BY PROGRAM,
// THREAD BY THREAD. NO TWO EXECUTIONS IN ONE PLAN SHARE A CPU.
//
// COMMAND LAYOUT (LEFT TO RIGHT):
//   <affinity> [<counter capture>] [<timeout>] <command> ><out> 2><err>
//
// ARTIFACT PATHS ARE SHELL-QUOTED WHEN THEY CONTAIN ANYTHING BUT PLAIN PATH
// CHARACTERS. NO TWO EXECUTIONS SHARE AN ARTIFACT BASE NAME.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PsetError, Result};
use crate::tools::{shell_quote, Tools};

/// A labelled unit of work: one command per concurrently running thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub label: String,
    pub commands: Vec<String>,
}

impl Program {
    pub fn new<I, S>(label: &str, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: label.to_string(),
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    pub fn single(label: &str, command: &str) -> Self {
        Self::new(label, [command])
    }

    pub fn threads(&self) -> usize {
        self.commands.len()
    }
}

/// One pinned thread-level run. Never modified once the plan is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Execution {
    pub command: String,
    pub cpu: u32,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub perfout: PathBuf,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    /// One group per program, in program order; threads in command order.
    pub groups: Vec<Vec<Execution>>,
}

impl Plan {
    pub fn executions(&self) -> impl Iterator<Item = &Execution> {
        self.groups.iter().flatten()
    }

    pub fn thread_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    pub fn cpus(&self) -> Vec<u32> {
        self.executions().map(|e| e.cpu).collect()
    }
}

pub fn build_plan(
    programs: &[Program],
    cpus: &[u32],
    counters: &[&str],
    timeout: Option<&str>,
    tools: &Tools,
    dir: &Path,
    stamp: &str,
) -> Result<Plan> {
    if let Some(p) = programs.iter().find(|p| p.commands.is_empty()) {
        return Err(PsetError::Config(format!("program '{}' has no commands", p.label)));
    }

    let needed: usize = programs.iter().map(Program::threads).sum();
    if needed > cpus.len() {
        return Err(PsetError::Resource(format!(
            "not enough cpus: {} thread(s) requested, {} cpu(s) in the pool",
            needed,
            cpus.len()
        )));
    }

    let mut pool = cpus.iter().copied();
    let mut seen_labels: HashMap<&str, usize> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    let mut groups = Vec::with_capacity(programs.len());

    for program in programs {
        // SECOND USE OF A LABEL GETS -x1, THIRD -x2, ... SKIPPING ANY SUFFIX
        // WHOSE NAMES ANOTHER PROGRAM ALREADY HOLDS (A LABEL LIKE "d4-x1")
        let mut repeat = seen_labels.get(program.label.as_str()).copied().unwrap_or(0);
        let bases = loop {
            let bases = artifact_bases(dir, stamp, program, repeat);
            if bases.iter().all(|b| !taken.contains(b)) {
                break bases;
            }
            repeat += 1;
        };
        seen_labels.insert(program.label.as_str(), repeat + 1);

        let mut group = Vec::with_capacity(program.threads());
        for (template, base) in program.commands.iter().zip(&bases) {
            let cpu = pool.next().ok_or_else(|| {
                PsetError::Resource(format!("not enough cpus for program '{}'", program.label))
            })?;
            let exec = build_execution(template, cpu, base, counters, timeout, tools);
            debug!(cpu, command = %exec.command, "planned execution");
            group.push(exec);
        }
        taken.extend(bases);
        groups.push(group);
    }

    Ok(Plan { groups })
}

fn artifact_bases(dir: &Path, stamp: &str, program: &Program, repeat: usize) -> Vec<String> {
    let mut prefix = format!("{}/{}-{}", dir.display(), stamp, program.label);
    if repeat > 0 {
        prefix.push_str(&format!("-x{}", repeat));
    }
    match program.threads() {
        1 => vec![prefix],
        n => (1..=n).map(|i| format!("{}-i{}", prefix, i)).collect(),
    }
}

fn build_execution(
    template: &str,
    cpu: u32,
    base: &str,
    counters: &[&str],
    timeout: Option<&str>,
    tools: &Tools,
) -> Execution {
    let stdout = format!("{}.out", base);
    let stderr = format!("{}.err", base);
    let perfout = format!("{}.perf", base);

    let mut parts = vec![tools.affinity(cpu)];
    if !counters.is_empty() {
        parts.push(tools.counters(&perfout, counters));
    }
    if let Some(t) = timeout.filter(|t| !t.is_empty()) {
        parts.push(tools.timeout(t));
    }
    parts.push(template.trim().to_string());
    parts.push(format!(">{} 2>{}", shell_quote(&stdout), shell_quote(&stderr)));

    Execution {
        command: parts.join(" "),
        cpu,
        stdout: stdout.into(),
        stderr: stderr.into(),
        perfout: perfout.into(),
    }
}
