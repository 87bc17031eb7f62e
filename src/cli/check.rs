use std::io::Read;
use std::path::Path;
use std::process::Command;

use anyhow::Result;

use pset::Tools;

fn check_tool(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }
    let found = config.contains("CONFIG_X86_CPU_RESCTRL=y");
    if found {
        println!("  CONFIG_X86_CPU_RESCTRL OK");
    } else {
        println!("  CONFIG_X86_CPU_RESCTRL NOT FOUND -- cache partitioning may not be available");
    }
    found
}

// -1 ALLOWS EVERYTHING, ABOVE 2 BLOCKS UNPRIVILEGED perf stat ENTIRELY
fn check_perf_paranoid() -> bool {
    let raw = std::fs::read_to_string("/proc/sys/kernel/perf_event_paranoid").unwrap_or_default();
    match raw.trim().parse::<i32>() {
        Ok(level) if level <= 2 => {
            println!("  perf_event_paranoid   {} OK", level);
            true
        }
        Ok(level) => {
            println!("  perf_event_paranoid   {} -- counters need root", level);
            unsafe { libc::geteuid() == 0 }
        }
        Err(_) => {
            println!("  perf_event_paranoid   UNREADABLE (SKIPPED)");
            true
        }
    }
}

pub fn run_check() -> Result<()> {
    println!("PSET DEPENDENCY CHECK");
    println!();

    let mut ok = true;
    let tools = Tools::default();
    let mut names = vec!["bash", "getconf"];
    names.extend(tools.programs());
    for tool in &names {
        if check_tool(tool) {
            println!("  {:<24}OK", tool);
        } else {
            println!("  {:<24}MISSING", tool);
            ok = false;
        }
    }
    println!();

    println!("KERNEL:");
    if !check_kernel_config() {
        ok = false;
    }
    if !check_perf_paranoid() {
        ok = false;
    }
    println!();

    let resctrl = Path::new("/sys/fs/resctrl/info/L3");
    if resctrl.exists() {
        let cbm = std::fs::read_to_string(resctrl.join("cbm_mask")).unwrap_or_default();
        println!("  resctrl               MOUNTED (L3 cbm_mask {})", cbm.trim());
    } else {
        println!("  resctrl               NOT MOUNTED (pqos will use MSRs directly)");
    }
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        if !check_tool("perf") {
            println!("  Install perf: pacman -S perf");
        }
        if !check_tool("pqos") {
            println!("  Install pqos: pacman -S intel-cmt-cat");
        }
        std::process::exit(1);
    }

    Ok(())
}
