// PSET END-TO-END RUNS
// REAL SCRIPTS, REAL bash, FAKE TOOLS.
//
// taskset/perf/pqos ARE REPLACED BY TEMPLATES THAT NEED NO PRIVILEGES:
//   AFFINITY   -> env PSET_CPU=<cpu>
//   COUNTERS   -> sh WRAPPER THAT WRITES A perf-STYLE FILE, THEN EXECS THE COMMAND
//   PARTITIONS -> echo INTO A LOG FILE
// TESTS SKIP THEMSELVES IF /bin/bash IS MISSING.
//
// THE REAL-TOOL RUN IS #[ignore]: sudo cargo test --test experiment -- --ignored

use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use pset::{Combiner, ExperimentSet, Program, PsetError, Tools};

const PROGRESS: &str = r"(\d+) out of \d+ accesses completed";

fn have_bash() -> bool {
    Path::new("/bin/bash").exists()
}

fn fake_tools(dir: &Path) -> Tools {
    Tools {
        affinity: "env PSET_CPU={cpu}".into(),
        counters: r#"sh -c 'printf "1,000,000 cycles\n" > {output}; exec "$0" "$@"'"#.into(),
        partition_define: format!("echo define {{class}} {{mask}} >> {}/pqos.log", dir.display()),
        partition_assign: format!("echo assign {{class}} {{cpu}} >> {}/pqos.log", dir.display()),
        partition_reset: format!("echo reset >> {}/pqos.log", dir.display()),
        ..Tools::default()
    }
}

fn experiment(dir: &Path) -> ExperimentSet {
    let mut set = ExperimentSet::new(dir.join("data"));
    set.tools = fake_tools(dir);
    set
}

fn echo(line: &str) -> String {
    format!("echo '{}'", line)
}

// === SCENARIOS ===

#[test]
fn single_counter_single_thread() {
    if !have_bash() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let mut set = experiment(tmp.path());
    set.set_cpus([5]);
    set.add_program(Program::single("solo", "true"));
    set.add_event("cycles", Combiner::Sum).unwrap();

    let outcome = set.run("X").unwrap();
    assert_eq!(outcome.exit_status, 0);
    assert_eq!(outcome.stats.len(), 1);
    assert_eq!(outcome.stats[0].get("cycles"), Some(1_000_000.0));
    assert_eq!(outcome.stats[0].len(), 1);

    // ARTIFACTS STAY ON DISK
    let data = tmp.path().join("data");
    assert!(data.join("X.sh").exists());
    assert!(data.join("X.info").exists());
    assert!(data.join("X-solo.out").exists());
    assert!(data.join("X-solo.err").exists());
    assert!(data.join("X-solo.perf").exists());
}

#[test]
fn extracted_progress_summed_over_threads() {
    if !have_bash() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let mut set = experiment(tmp.path());
    set.set_cpus([18, 19]);
    set.add_program(Program::new(
        "rpd",
        [
            echo("500 out of 1000 accesses completed"),
            echo("700 out of 1000 accesses completed"),
        ],
    ));
    set.extract_feature(PROGRESS, Combiner::Sum, &[("progress", 1)]).unwrap();

    let outcome = set.run("XY").unwrap();
    assert_eq!(outcome.stats[0].get("progress"), Some(1200.0));
}

#[test]
fn min_combiner_and_computed_feature() {
    if !have_bash() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().join("data");
    // EACH THREAD OVERWRITES ITS OWN COUNTER FILE AFTER THE FAKE WRAPPER WROTE IT
    let thread = |i: usize, cycles: u64, progress: u64| {
        format!(
            "sh -c \"echo '{} cycles' > {}/R-pair-i{}.perf; echo '{} out of 1000 accesses completed'\"",
            cycles,
            data.display(),
            i,
            progress
        )
    };

    let mut set = experiment(tmp.path());
    set.set_cpus([1, 2]);
    set.add_program(Program::new("pair", [thread(1, 400, 100), thread(2, 300, 60)]));
    set.add_event("cycles", Combiner::Min).unwrap();
    set.extract_feature(PROGRESS, Combiner::Sum, &[("progress", 1)]).unwrap();
    set.compute_feature("rate", |v| v[0] / v[1], &["progress", "cycles"], Combiner::Sum)
        .unwrap();

    let outcome = set.run("R").unwrap();
    let stats = &outcome.stats[0];
    assert_eq!(stats.get("cycles"), Some(300.0));
    assert_eq!(stats.get("progress"), Some(160.0));
    // 100/400 + 60/300
    assert!((stats.get("rate").unwrap() - 0.45).abs() < 1e-12);
    assert_eq!(stats.iter().map(|(n, _)| n).collect::<Vec<_>>(), vec!["cycles", "progress", "rate"]);
}

#[test]
fn programs_keep_their_order_and_labels() {
    if !have_bash() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let mut set = experiment(tmp.path());
    set.set_cpus([0, 1, 2]);
    set.set_programs(vec![
        Program::single("d4", &echo("4 out of 9 accesses completed")),
        Program::single("d4", &echo("5 out of 9 accesses completed")),
        Program::single("spin", &echo("6 out of 9 accesses completed")),
    ]);
    set.extract_feature(PROGRESS, Combiner::Sum, &[("progress", 1)]).unwrap();

    let outcome = set.run("S").unwrap();
    let progress: Vec<f64> = outcome.stats.iter().filter_map(|s| s.get("progress")).collect();
    assert_eq!(progress, vec![4.0, 5.0, 6.0]);
    assert!(tmp.path().join("data/S-d4-x1.out").exists());
}

// === BARRIER ===

#[test]
fn stats_read_only_after_every_process_exits() {
    if !have_bash() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let mut set = experiment(tmp.path());
    set.set_cpus([0, 1]);
    set.add_program(Program::new(
        "slow",
        [
            format!("sh -c \"sleep 0.3; {}\"", "echo 7 out of 8 accesses completed"),
            "sh -c \"sleep 0.1; echo 1 out of 8 accesses completed\"".to_string(),
        ],
    ));
    set.extract_feature(PROGRESS, Combiner::Sum, &[("progress", 1)]).unwrap();

    let start = Instant::now();
    let outcome = set.run("B").unwrap();
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert_eq!(outcome.stats[0].get("progress"), Some(8.0));
}

#[test]
fn timeout_wrapper_stops_long_runs() {
    if !have_bash() || !Path::new("/usr/bin/timeout").exists() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let mut set = experiment(tmp.path());
    set.set_cpus([0]);
    set.set_timeout(Some("0.2s"));
    set.add_program(Program::single("sleepy", "sleep 5"));

    let start = Instant::now();
    let outcome = set.run("T").unwrap();
    assert!(start.elapsed() < Duration::from_secs(4));
    // coreutils timeout EXITS 124 WHEN IT KILLS THE COMMAND
    assert_eq!(outcome.exit_status, 124);
}

// === FAILURE MODES ===

#[test]
fn failed_child_still_collected() {
    if !have_bash() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let mut set = experiment(tmp.path());
    set.set_cpus([3, 4]);
    set.set_programs(vec![
        Program::single("ok", &echo("2 out of 2 accesses completed")),
        Program::single("bad", "sh -c 'echo 1 out of 2 accesses completed; exit 3'"),
    ]);
    set.extract_feature(PROGRESS, Combiner::Sum, &[("progress", 1)]).unwrap();

    let outcome = set.run("F").unwrap();
    // THE LAST wait REPORTS THE FAILED CHILD
    assert_eq!(outcome.exit_status, 3);
    assert_eq!(outcome.stats[0].get("progress"), Some(2.0));
    assert_eq!(outcome.stats[1].get("progress"), Some(1.0));
}

#[test]
fn partitions_torn_down_after_failed_child() {
    if !have_bash() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let mut set = experiment(tmp.path());
    set.set_cpus([3, 4]);
    set.set_auto_partition(true);
    set.cache = Some(pset::CacheConfig { ways: 20, classes: 16 });
    set.set_programs(vec![
        Program::single("ok", "true"),
        Program::single("bad", "sh -c 'exit 3'"),
    ]);

    set.run("F").unwrap();

    let log = fs::read_to_string(tmp.path().join("pqos.log")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(
        lines,
        vec!["define 1 0x3ff", "assign 1 3", "define 2 0xffc00", "assign 2 4", "reset"]
    );
}

#[test]
fn unmatched_extraction_breaks_dependents() {
    if !have_bash() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let mut set = experiment(tmp.path());
    set.set_cpus([0]);
    set.add_program(Program::single("quiet", "echo nothing to see"));
    set.add_event("cycles", Combiner::Sum).unwrap();
    set.extract_feature(PROGRESS, Combiner::Sum, &[("progress", 1)]).unwrap();
    set.compute_feature("rate", |v| v[0] / v[1], &["progress", "cycles"], Combiner::Sum)
        .unwrap();

    match set.run("U") {
        Err(PsetError::Dependency { needed_by, missing }) => {
            assert_eq!(needed_by, "feature 'rate'");
            assert_eq!(missing, "progress");
        }
        other => panic!("expected dependency error, got {:?}", other),
    }

    // STRICT MODE FAILS AT THE EXTRACTION ITSELF
    set.strict_extraction = true;
    assert!(matches!(set.run("U2"), Err(PsetError::Parse { .. })));
}

#[test]
fn unmatched_extraction_without_dependents_fails_aggregation() {
    if !have_bash() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let mut set = experiment(tmp.path());
    set.set_cpus([0]);
    set.add_program(Program::single("quiet", "true"));
    set.extract_feature(PROGRESS, Combiner::Sum, &[("progress", 1)]).unwrap();
    assert!(matches!(set.run("A"), Err(PsetError::Dependency { .. })));
}

#[test]
fn missing_counter_line_is_a_parse_error() {
    if !have_bash() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let mut set = experiment(tmp.path());
    set.set_cpus([0]);
    set.add_program(Program::single("x", "true"));
    set.add_event("instructions", Combiner::Sum).unwrap();
    match set.run("P") {
        Err(PsetError::Parse { path, msg }) => {
            assert!(path.ends_with("P-x.perf"));
            assert!(msg.contains("instructions"));
        }
        other => panic!("expected parse error, got {:?}", other),
    }
}

#[test]
fn not_enough_cpus_spawns_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let mut set = experiment(tmp.path());
    set.set_cpus([0]);
    set.add_program(Program::new("two", ["true", "true"]));
    assert!(matches!(set.run("N"), Err(PsetError::Resource(_))));
    assert!(!tmp.path().join("data/N.sh").exists());
}

#[test]
fn info_dump_describes_the_set() {
    let tmp = tempfile::tempdir().unwrap();
    let mut set = experiment(tmp.path());
    set.set_cpus([9]);
    set.add_program(Program::single("solo", "true"));
    set.add_event("cycles", Combiner::Min).unwrap();
    fs::create_dir_all(&set.dir).unwrap();
    set.write_info("I").unwrap();
    let info = fs::read_to_string(set.info_path("I")).unwrap();
    assert!(info.contains("solo"));
    assert!(info.contains("cycles"));
    assert!(info.contains("min"));
}

// === SHELL QUOTING ===

#[test]
fn output_dir_with_spaces_keeps_redirects_inside_it() {
    if !have_bash() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    // AN UNQUOTED ">.../my data/..." WOULD WRITE TO THIS FILE
    fs::write(tmp.path().join("my"), "precious").unwrap();

    let mut set = ExperimentSet::new(tmp.path().join("my data"));
    set.tools = fake_tools(tmp.path());
    set.set_cpus([0]);
    set.add_program(Program::single("solo", &echo("5 out of 9 accesses completed")));
    set.extract_feature(PROGRESS, Combiner::Sum, &[("progress", 1)]).unwrap();

    let outcome = set.run("S").unwrap();
    assert_eq!(outcome.stats[0].get("progress"), Some(5.0));
    assert!(tmp.path().join("my data/S-solo.out").exists());
    assert!(tmp.path().join("my data/S-solo.err").exists());
    assert_eq!(fs::read_to_string(tmp.path().join("my")).unwrap(), "precious");
}

// === INTERRUPTION ===

#[test]
fn interrupted_partitioned_run_resets_and_skips_collection() {
    if !have_bash() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let mut set = experiment(tmp.path());
    set.set_cpus([7]);
    set.set_auto_partition(true);
    set.cache = Some(pset::CacheConfig { ways: 20, classes: 16 });
    set.add_program(Program::single("solo", "true"));
    // NEVER IN THE FAKE COUNTER FILE: COLLECTING WOULD BE A PARSE ERROR
    set.add_event("instructions", Combiner::Sum).unwrap();

    let result = set.run_with("I", &AtomicBool::new(true));
    assert!(matches!(result, Err(PsetError::Interrupted)), "got {:?}", result);

    // THE SCRIPT'S OWN TEARDOWN, THEN THE ORCHESTRATOR'S
    let log = fs::read_to_string(tmp.path().join("pqos.log")).unwrap();
    assert_eq!(log.lines().collect::<Vec<_>>(), vec!["define 1 0xfffff", "assign 1 7", "reset", "reset"]);
}

#[test]
fn interrupted_run_without_partitioning_resets_nothing() {
    if !have_bash() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let mut set = experiment(tmp.path());
    set.set_cpus([7]);
    set.add_program(Program::single("solo", "true"));
    set.add_event("instructions", Combiner::Sum).unwrap();

    let result = set.run_with("I", &AtomicBool::new(true));
    assert!(matches!(result, Err(PsetError::Interrupted)), "got {:?}", result);
    assert!(!tmp.path().join("pqos.log").exists());
    // THE SCRIPT STILL RAN TO ITS BARRIER
    assert!(tmp.path().join("data/I-solo.out").exists());
}

// === REAL TOOLS (ROOT + taskset + perf + pqos) ===

#[test]
#[ignore]
fn real_tools_partitioned_run() {
    assert_eq!(unsafe { libc::geteuid() }, 0, "REQUIRES ROOT (pqos + perf)");
    let cache = pset::CacheConfig::detect(&pset::SystemProbe).expect("PROBE FAILED");

    let tmp = tempfile::tempdir().unwrap();
    let mut set = ExperimentSet::new(tmp.path());
    set.set_cpus([0, 1]);
    set.set_auto_partition(true);
    set.cache = Some(cache);
    set.set_timeout(Some("2s"));
    set.add_program(Program::new("spin", ["sh -c 'while :; do :; done'"; 2]));
    set.add_event("cycles", Combiner::Sum).unwrap();

    let outcome = set.run("REAL").unwrap();
    assert!(outcome.stats[0].get("cycles").unwrap() > 0.0);
}
