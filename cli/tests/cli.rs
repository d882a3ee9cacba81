use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("demos")
        .join(name)
}

fn xrule() -> Command {
    Command::cargo_bin("xrule").unwrap()
}

#[test]
fn test_cli_run_prints_messages() {
    let mut cmd = xrule();
    cmd.arg("run")
        .arg("--rules")
        .arg(demo("rules.json"))
        .arg("--instance")
        .arg(demo("instance.json"));

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "[warning] solvency: Liabilities 450 exceed assets 300",
        ))
        .stdout(predicate::str::contains("[info] total.assets: 1500"))
        .stdout(predicate::str::contains("0001").not());
}

#[test]
fn test_cli_run_selected_rule_as_json() {
    let mut cmd = xrule();
    cmd.arg("run")
        .arg("--rules")
        .arg(demo("rules.json"))
        .arg("--instance")
        .arg(demo("instance.json"))
        .arg("--rule")
        .arg("total.assets")
        .arg("--json")
        .arg("--no-cache");

    let output = cmd.assert().success().get_output().stdout.clone();
    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["rule"], "total.assets");
    assert_eq!(results[0]["messages"][0]["value"], "1500");
}

#[test]
fn test_cli_list_shows_declarations() {
    let mut cmd = xrule();
    cmd.arg("list").arg("--rules").arg(demo("rules.json"));

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("solvency"))
        .stdout(predicate::str::contains("tolerance"))
        .stdout(predicate::str::contains("2 rule(s), 1 constant(s), 0 function(s)"));
}

#[test]
fn test_cli_unknown_rule_fails() {
    let mut cmd = xrule();
    cmd.arg("run")
        .arg("--rules")
        .arg(demo("rules.json"))
        .arg("--instance")
        .arg(demo("instance.json"))
        .arg("--rule")
        .arg("missing");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Unknown rule 'missing'"));
}

#[test]
fn test_cli_malformed_instance_fails() {
    let temp_dir = TempDir::new().unwrap();
    let instance = temp_dir.path().join("instance.json");
    fs::write(&instance, "{\"facts\": [{\"concept\": 1}]}").unwrap();

    let mut cmd = xrule();
    cmd.arg("run")
        .arg("--rules")
        .arg(demo("rules.json"))
        .arg("--instance")
        .arg(&instance);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("cannot load instance"));
}

#[test]
fn test_cli_rule_errors_and_crash_on_error() {
    let temp_dir = TempDir::new().unwrap();
    let rules = temp_dir.path().join("rules.json");
    fs::write(
        &rules,
        r#"{"rules": [
            {"output": {"name": "broken", "body": {"kind": {"arithmetic": {
                "op": "divide",
                "left": {"kind": {"literal": {"int": 1}}},
                "right": {"kind": {"literal": {"int": 0}}}
            }}}}},
            {"output": {"name": "fine", "body": {"kind": {"literal": {"string": "ok"}}}}}
        ]}"#,
    )
    .unwrap();

    let mut cmd = xrule();
    cmd.arg("run")
        .arg("--rules")
        .arg(&rules)
        .arg("--instance")
        .arg(demo("instance.json"));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("[info] fine: ok"))
        .stderr(predicate::str::contains("rule 'broken' failed"));

    let mut cmd = xrule();
    cmd.arg("run")
        .arg("--rules")
        .arg(&rules)
        .arg("--instance")
        .arg(demo("instance.json"))
        .arg("--crash-on-error");
    cmd.assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("fine").not());
}

#[test]
fn test_cli_options_file_with_flag_override() {
    let temp_dir = TempDir::new().unwrap();
    let options = temp_dir.path().join("options.json");
    fs::write(&options, r#"{"rule_filter": ["total.assets"], "no_cache": true}"#).unwrap();

    let mut cmd = xrule();
    cmd.arg("run")
        .arg("--rules")
        .arg(demo("rules.json"))
        .arg("--instance")
        .arg(demo("instance.json"))
        .arg("--options")
        .arg(&options);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("total.assets: 1500"))
        .stdout(predicate::str::contains("solvency").not());

    let mut cmd = xrule();
    cmd.arg("run")
        .arg("--rules")
        .arg(demo("rules.json"))
        .arg("--instance")
        .arg(demo("instance.json"))
        .arg("--options")
        .arg(&options)
        .arg("--rule")
        .arg("solvency");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("solvency"))
        .stdout(predicate::str::contains("total.assets").not());
}
