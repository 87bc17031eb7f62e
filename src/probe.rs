// PSET HARDWARE PROBES
// TWO PROCESS-WIDE INTEGERS: L3 ASSOCIATIVITY (WAYS) AND THE NUMBER OF
// CACHE ALLOCATION CLASSES OF SERVICE. READ ONCE AT STARTUP, HELD IN AN
// IMMUTABLE CacheConfig AND PASSED TO WHOEVER NEEDS IT.

use std::process::Command;

use crate::error::{PsetError, Result};

pub trait HardwareProbe {
    fn cache_ways(&self) -> Result<u32>;
    fn partition_classes(&self) -> Result<u32>;
}

// WIDTH OF A CAPACITY BITMASK
pub const MAX_WAYS: u32 = u64::BITS;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub ways: u32,
    pub classes: u32,
}

impl CacheConfig {
    pub fn detect(probe: &dyn HardwareProbe) -> Result<Self> {
        let ways = probe.cache_ways()?;
        let classes = probe.partition_classes()?;
        if ways == 0 {
            return Err(PsetError::Probe("cache reports zero ways".into()));
        }
        if ways > MAX_WAYS {
            return Err(PsetError::Probe(format!(
                "cache reports {} ways, capacity masks hold at most {}",
                ways, MAX_WAYS
            )));
        }
        Ok(Self { ways, classes })
    }

    // CLASS 0 IS THE DEFAULT CLASS EVERY CPU STARTS IN
    pub fn usable_classes(&self) -> u32 {
        self.classes.saturating_sub(1)
    }
}

/// Asks the running system: `getconf -a` for associativity, `pqos -d` for classes.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProbe;

impl HardwareProbe for SystemProbe {
    fn cache_ways(&self) -> Result<u32> {
        let out = command_stdout("getconf", &["-a"])?;
        parse_getconf_assoc(&out).ok_or_else(|| {
            PsetError::Probe("could not determine L3 cache associativity with getconf".into())
        })
    }

    fn partition_classes(&self) -> Result<u32> {
        let out = command_stdout("pqos", &["-d"])?;
        parse_pqos_classes(&out).ok_or_else(|| {
            PsetError::Probe("could not determine number of classes of service through pqos".into())
        })
    }
}

/// Fixed answers, for tests and for machines where the values are known.
#[derive(Clone, Copy, Debug)]
pub struct FixedProbe {
    pub ways: u32,
    pub classes: u32,
}

impl HardwareProbe for FixedProbe {
    fn cache_ways(&self) -> Result<u32> {
        Ok(self.ways)
    }

    fn partition_classes(&self) -> Result<u32> {
        Ok(self.classes)
    }
}

fn command_stdout(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| PsetError::Probe(format!("failed to run {}: {}", program, e)))?;
    if !output.status.success() {
        return Err(PsetError::Probe(format!("{} exited with {}", program, output.status)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// "LEVEL3_CACHE_ASSOC                 20"
pub fn parse_getconf_assoc(text: &str) -> Option<u32> {
    text.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["LEVEL3_CACHE_ASSOC", value] => value.parse().ok(),
            _ => None,
        }
    })
}

// THE "Num COS" LINE WITHIN TWO LINES AFTER THE "L3 CAT" HEADER:
//   L3 CAT
//      CDP: disabled
//      Num COS: 16
pub fn parse_pqos_classes(text: &str) -> Option<u32> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.iter().position(|l| l.contains("L3 CAT"))?;
    lines[start..lines.len().min(start + 3)]
        .iter()
        .find(|l| l.contains("Num COS"))
        .and_then(|l| l.split_whitespace().last())
        .and_then(|v| v.parse().ok())
}

// ONLINE CPU COUNT, FOR SANITY CHECKS ON THE CONFIGURED POOL
pub fn online_cpus() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 1 { 1 } else { n as usize }
}
