// PSET SCRIPT SYNTHESIS
// ONE BASH SCRIPT PER RUN:
//   #!/bin/bash
//   [pqos class define + assign, one pair per thread]
//   declare -a pids=()
//   <command> & pids+=($!)          (ONE PER EXECUTION, PLAN ORDER)
//   wait ${pids[i]}                 (BARRIER, ONE PER EXECUTION)
//   [pqos -R]
//
// NO set -e: A FAILED CHILD MUST NOT SKIP THE BARRIER OR THE TEARDOWN.
// OUTPUT IS A PURE FUNCTION OF THE PLAN, THE CACHE CONFIG AND THE TOOLS.

use crate::error::{PsetError, Result};
use crate::plan::Plan;
use crate::probe::{CacheConfig, MAX_WAYS};
use crate::tools::Tools;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassAssignment {
    pub class: u32,
    pub cpu: u32,
    pub mask: u64,
}

// SPLIT THE WAYS EVENLY INTO ONE CONTIGUOUS MASK PER CPU. CLASS 0 IS LEFT
// ALONE, SO CPU i GETS CLASS i+1. LEFTOVER WAYS STAY UNASSIGNED.
pub fn partition_classes(cpus: &[u32], cache: &CacheConfig) -> Result<Vec<ClassAssignment>> {
    let n = cpus.len() as u32;
    if n == 0 {
        return Ok(Vec::new());
    }
    if cache.ways > MAX_WAYS {
        return Err(PsetError::Resource(format!(
            "{} cache ways do not fit a {}-bit mask",
            cache.ways, MAX_WAYS
        )));
    }
    if n > cache.usable_classes() {
        return Err(PsetError::Resource(format!(
            "not enough classes of service: {} thread(s), {} usable class(es)",
            n,
            cache.usable_classes()
        )));
    }
    let ways_each = cache.ways / n;
    if ways_each == 0 {
        return Err(PsetError::Resource(format!(
            "not enough cache ways: {} thread(s), {} way(s)",
            n, cache.ways
        )));
    }

    // n * ways_each <= MAX_WAYS, SO EVERY SHIFTED MASK FITS
    let unit = if ways_each == MAX_WAYS { u64::MAX } else { (1u64 << ways_each) - 1 };
    Ok(cpus
        .iter()
        .enumerate()
        .map(|(i, &cpu)| ClassAssignment {
            class: i as u32 + 1,
            cpu,
            mask: unit << (i as u32 * ways_each),
        })
        .collect())
}

pub fn synthesize(plan: &Plan, partition: Option<&CacheConfig>, tools: &Tools) -> Result<String> {
    // RESOURCE CHECK FIRST -- NOTHING IS EMITTED IF THE CLASSES DON'T FIT
    let classes = match partition {
        Some(cache) => Some(partition_classes(&plan.cpus(), cache)?),
        None => None,
    };

    let mut lines: Vec<String> = vec!["#!/bin/bash".into()];

    if let Some(classes) = &classes {
        for c in classes {
            lines.push(tools.partition_define(c.class, c.mask));
            lines.push(tools.partition_assign(c.class, c.cpu));
        }
    }

    lines.push("declare -a pids=()".into());
    for exec in plan.executions() {
        lines.push(format!("{} & pids+=($!)", exec.command));
    }
    for i in 0..plan.thread_count() {
        lines.push(format!("wait ${{pids[{}]}}", i));
    }

    if classes.is_some() {
        lines.push(tools.partition_reset.clone());
    }

    let mut script = lines.join("\n");
    script.push('\n');
    Ok(script)
}
