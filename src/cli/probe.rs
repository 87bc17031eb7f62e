// PROBE SUBCOMMAND -- PRINTS WHAT AUTOMATIC CACHE PARTITIONING WOULD USE

use anyhow::Result;

use pset::probe::{online_cpus, HardwareProbe, SystemProbe};

pub fn run_probe() -> Result<()> {
    let probe = SystemProbe;

    println!("PSET HARDWARE PROBE");
    println!();
    println!("  {:<24}{}", "ONLINE CPUS", online_cpus());

    match probe.cache_ways() {
        Ok(w) => println!("  {:<24}{}", "L3 WAYS", w),
        Err(e) => println!("  {:<24}UNKNOWN ({})", "L3 WAYS", e),
    }
    match probe.partition_classes() {
        Ok(c) => println!("  {:<24}{} ({} USABLE, CLASS 0 RESERVED)", "CLASSES OF SERVICE", c,
                          c.saturating_sub(1)),
        Err(e) => println!("  {:<24}UNKNOWN ({})", "CLASSES OF SERVICE", e),
    }
    Ok(())
}
