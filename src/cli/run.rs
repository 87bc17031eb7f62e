// RUN / SCRIPT SUBCOMMANDS
// LOAD THE EXPERIMENT FILE, PROBE THE CACHE (ONLY IF PARTITIONING),
// THEN EITHER PRINT THE SCRIPT OR RUN IT AND REPORT THE STATS

use std::path::Path;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};

use pset::config::ExperimentFile;
use pset::{ExperimentSet, RunOutcome, SystemProbe};

fn load(file: &Path) -> Result<ExperimentSet> {
    let set = ExperimentFile::load(file)?
        .into_experiment(&SystemProbe)
        .with_context(|| format!("LOADING {}", file.display()))?;

    let online = pset::probe::online_cpus();
    if let Some(&cpu) = set.cpus().iter().find(|&&c| c as usize >= online) {
        tracing::warn!(cpu, online, "cpu id beyond the online cpu count");
    }
    Ok(set)
}

pub fn print_script(file: &Path, stamp: &str) -> Result<()> {
    let set = load(file)?;
    print!("{}", set.create_script(stamp)?);
    Ok(())
}

pub fn run_experiment(file: &Path, stamp: &str, json: bool, shutdown: &AtomicBool) -> Result<()> {
    let set = load(file)?;

    println!("PSET v0.3.0");
    println!("EXPERIMENT:      {}", file.display());
    println!("OUTPUT DIR:      {}", set.dir.display());
    println!("PROGRAMS:        {}", set.programs().len());
    println!("CPUS:            {:?}", set.cpus());
    println!("FEATURES:        {}", set.features.names().join(", "));
    println!("TIMEOUT:         {}", set.timeout.as_deref().unwrap_or("none"));
    match &set.cache {
        Some(c) => println!("CACHE SPLIT:     ON ({} ways, {} classes)", c.ways, c.classes),
        None => println!("CACHE SPLIT:     OFF"),
    }
    println!();

    let outcome = set.run_with(stamp, shutdown)?;
    println!("EXIT STATUS:     {}", outcome.exit_status);
    println!();

    if json {
        report_json(&set, &outcome)?;
    } else {
        report_table(&set, &outcome);
    }
    Ok(())
}

fn report_table(set: &ExperimentSet, outcome: &RunOutcome) {
    let width = set.features.names().iter().map(|n| n.len()).max().unwrap_or(0).max(8);
    for (program, stats) in set.programs().iter().zip(&outcome.stats) {
        println!("{} ({} THREAD{})", program.label.to_uppercase(), program.threads(),
                 if program.threads() == 1 { "" } else { "S" });
        println!("{}", "-".repeat(width + 20));
        for (name, value) in stats.iter() {
            println!("  {:<width$}  {}", name, format_value(value), width = width);
        }
        println!();
    }
}

fn report_json(set: &ExperimentSet, outcome: &RunOutcome) -> Result<()> {
    let rows: Vec<serde_json::Value> = set
        .programs()
        .iter()
        .zip(&outcome.stats)
        .map(|(p, s)| serde_json::json!({ "label": p.label, "stats": s }))
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

// WHOLE NUMBERS WITHOUT A TRAILING .0
fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{:.6}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_format() {
        assert_eq!(format_value(1_000_000.0), "1000000");
        assert_eq!(format_value(0.25), "0.250000");
        assert_eq!(format_value(-3.0), "-3");
    }
}
