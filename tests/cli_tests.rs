use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn demos() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos")
}

fn sandbox() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("proposal-sandbox").unwrap();
    cmd.env("PROPOSAL_SANDBOX_LOG", "warn");
    cmd
}

/// Temp workspace with the demo chain and the given proposal files.
fn workspace(config: &str, proposals: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    std::fs::copy(demos().join("chain.yaml"), dir.path().join("chain.yaml")).unwrap();
    for (name, body) in proposals {
        std::fs::write(dir.path().join(name), body).unwrap();
    }
    let config_path = dir.path().join("proposals.yaml");
    std::fs::write(&config_path, config).unwrap();
    (dir, config_path)
}

fn json_stdout(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).expect("stdout is JSON")
}

#[test]
fn test_check_demo_config() {
    sandbox()
        .arg("check")
        .arg(demos().join("proposals.yaml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("current: p2-raise-cap"));
}

#[test]
fn test_run_demo_direct_json() {
    let output = sandbox()
        .arg("--json")
        .arg("run")
        .arg(demos().join("proposals.yaml"))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json = json_stdout(&output);
    assert_eq!(json["success"], true);
    assert_eq!(json["reference_block"], 1200);
    assert_eq!(json["history"][0]["proposal"], "p1-deploy-vault");
    let current = &json["current"];
    assert_eq!(current["proposal"], "p2-raise-cap");
    assert_eq!(current["state"], "validated");
    let assertions = current["assertions"].as_array().unwrap();
    assert_eq!(assertions.len(), 4);
    assert!(assertions.iter().all(|a| a["passed"] == true));
    assert!(json["registry"]["vault"].is_string());
}

#[test]
fn test_run_demo_governance() {
    sandbox()
        .arg("run")
        .arg(demos().join("governance.yaml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Proposal validated"));
}

#[test]
fn test_run_includes_events_on_request() {
    let output = sandbox()
        .args(["--json", "run", "--events"])
        .arg(demos().join("proposals.yaml"))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json = json_stdout(&output);
    let events = json["events"].as_array().unwrap();
    assert_eq!(events[0]["event"], "environment_started");
    assert!(events
        .iter()
        .any(|e| e["event"] == "command_included" && e["proposal"] == "p2-raise-cap"));
}

#[test]
fn test_preview_shows_calldata() {
    let output = sandbox()
        .args(["--json", "preview"])
        .arg(demos().join("proposals.yaml"))
        .args(["--proposal", "p2-raise-cap"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json = json_stdout(&output);
    assert_eq!(json["replayed"][0], "p1-deploy-vault");
    let actions = json["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0]["method"], "setCap(uint256)");
    assert!(actions[0]["calldata"].as_str().unwrap().starts_with("0x"));
}

#[test]
fn test_replay_prints_registry() {
    sandbox()
        .arg("replay")
        .arg(demos().join("proposals.yaml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Replayed 2 proposal(s)"))
        .stdout(predicate::str::contains("vault"));
}

#[test]
fn test_broken_history_exits_with_fixture_code() {
    let (_dir, config) = workspace(
        "version: 1\nchain: chain.yaml\nexecutor: \"0xdead\"\nproposals:\n  - { name: stale, file: stale.yaml }\n  - { name: next, file: next.yaml, current: true }\n",
        &[
            (
                "stale.yaml",
                "title: Stale payout\ncommands:\n  - { target: treasury, method: \"withdraw(address,uint256)\", args: [{ symbol: bob }, { uint: \"999999\" }] }\n",
            ),
            ("next.yaml", "title: Next\n"),
        ],
    );
    sandbox()
        .arg("run")
        .arg(&config)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("REPLAY_FAILED"));
}

#[test]
fn test_failing_validation_exits_with_one() {
    let (_dir, config) = workspace(
        "version: 1\nchain: chain.yaml\nexecutor: \"0xdead\"\nproposals:\n  - { name: wip, file: wip.yaml, current: true }\n",
        &[("wip.yaml", "title: Work in progress\nvalidate:\n  - fail: not finished yet\n")],
    );
    let output = sandbox()
        .args(["--json", "run"])
        .arg(&config)
        .assert()
        .code(1)
        .get_output()
        .stdout
        .clone();
    let json = json_stdout(&output);
    assert_eq!(json["kind"], "assertion_failure");
    assert_eq!(json["fixture_error"], false);
}

#[test]
fn test_check_reports_sign_off_violation() {
    let (_dir, config) = workspace(
        "version: 1\nchain: chain.yaml\nexecutor: \"0xdead\"\nproposals:\n  - { name: p, file: p.yaml, affected_contracts: [vault], current: true }\n",
        &[(
            "p.yaml",
            "title: Touches treasury\ncommands:\n  - { target: treasury, method: \"setCap(uint256)\", args: [{ uint: 1 }] }\n",
        )],
    );
    sandbox()
        .arg("check")
        .arg(&config)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("not in affected_contracts"));
}

#[test]
fn test_missing_config_exits_with_config_code() {
    sandbox()
        .arg("check")
        .arg(Path::new("does/not/exist.yaml"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("CONFIG_ERROR"))
        .stderr(predicate::str::contains("Failed to read config"));
}

#[test]
fn test_unparsable_proposal_exits_with_config_code() {
    let (_dir, config) = workspace(
        "version: 1\nchain: chain.yaml\nexecutor: \"0xdead\"\nproposals:\n  - { name: bad, file: bad.yaml, current: true }\n",
        &[("bad.yaml", "title: [unclosed\n")],
    );
    sandbox()
        .arg("run")
        .arg(&config)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to parse proposal file"));
}
