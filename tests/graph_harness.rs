use std::fs::File;
use std::path::Path;

use kestrel_visual_script::config::{RuntimeConfig, StaticEventFanOut};
use kestrel_visual_script::graph_harness::{load_fixture, run_fixture, run_fixture_with_config, HarnessOutput};

const COUNTER: &str = "tests/fixtures/graph_harness/counter.json";

#[test]
fn counter_fixture_matches_golden() {
    assert_fixture_matches(COUNTER, "tests/fixtures/graph_harness/counter.golden.json");
}

#[test]
fn counter_fixture_is_stable_across_runs() {
    let fixture = load_fixture(COUNTER).expect("load fixture");
    let first = run_fixture(&fixture).expect("run fixture first time");
    let second = run_fixture(&fixture).expect("run fixture second time");
    assert_eq!(first, second, "fixture output should not depend on the run");
}

#[test]
fn fan_out_setting_does_not_affect_instance_events() {
    let fixture = load_fixture(COUNTER).expect("load fixture");
    let config = RuntimeConfig { static_event_fan_out: StaticEventFanOut::AllScripts, ..RuntimeConfig::default() };
    let all = run_fixture_with_config(&fixture, config).expect("run with fan-out");
    assert_eq!(all, run_fixture(&fixture).expect("run with defaults"));
}

#[test]
fn unknown_instances_abort_the_run() {
    let mut fixture = load_fixture(COUNTER).expect("load fixture");
    fixture.instances.clear();
    let err = run_fixture(&fixture).expect_err("steps reference missing instances");
    assert!(format!("{err:#}").contains("unknown instance 'a'"), "unexpected error: {err:#}");
}

fn assert_fixture_matches(fixture_path: &str, golden_path: &str) {
    let fixture = load_fixture(fixture_path).expect("load fixture");
    let output = run_fixture(&fixture).expect("run fixture");
    let golden_file = File::open(Path::new(golden_path)).expect("open golden");
    let golden: HarnessOutput = serde_json::from_reader(golden_file).expect("parse golden");
    assert_eq!(output, golden, "fixture {} diverged from golden {}", fixture_path, golden_path);
}
