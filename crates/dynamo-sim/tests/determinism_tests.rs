//! Same seed, same script, same history.

use dynamo_config::DynamoConfig;
use dynamo_sim::{EventLog, Scenario};
use tempfile::TempDir;

fn history(scenario: Scenario, seed: u64) -> Vec<dynamo_sim::LoggedEvent> {
    let run = scenario
        .run(DynamoConfig::default().with_seed(seed))
        .unwrap();
    run.sim.events().iter().cloned().collect()
}

#[test]
fn scenarios_replay_identically() {
    for scenario in [
        Scenario::SimplePut,
        Scenario::FailInitialNode,
        Scenario::HandoffRecovery,
        Scenario::PartitionRepair,
    ] {
        assert_eq!(
            history(scenario, 77),
            history(scenario, 77),
            "{scenario} diverged"
        );
    }
}

#[test]
fn sequence_numbers_are_dense() {
    let events = history(Scenario::DoublePut, 5);
    for (index, logged) in events.iter().enumerate() {
        assert_eq!(logged.seq, index as u64);
    }
}

#[test]
fn saved_log_loads_back() {
    let run = Scenario::GetPutGetPut
        .run(DynamoConfig::default().with_seed(2))
        .unwrap();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.bin");

    run.sim.events().save_to_file(&path).unwrap();
    let loaded = EventLog::load_from_file(&path).unwrap();

    let original: Vec<_> = run.sim.events().iter().cloned().collect();
    assert_eq!(loaded, original);
}

#[test]
fn json_lines_has_one_line_per_event() {
    let run = Scenario::SimpleGet
        .run(DynamoConfig::default().with_seed(9))
        .unwrap();
    let mut out = Vec::new();
    run.sim.events().write_json_lines(&mut out).unwrap();

    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count(), run.sim.events().len());
    for line in text.lines().take(20) {
        serde_json::from_str::<serde_json::Value>(line).unwrap();
    }
}
