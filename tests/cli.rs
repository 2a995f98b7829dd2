//! Command line behaviour of the `bucketrun` binary.
#![cfg(unix)]

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

const FAKE_PYTEST: &str = r#"
for last; do :; done
case "$last" in
  *pass*) echo "== 1 passed in 0.01 seconds ==" ;;
  *flaky*)
    if [ -e "$last.seen" ]; then
      echo "== 1 passed in 0.01 seconds =="
    else
      touch "$last.seen"
      echo "== 1 failed in 0.01 seconds =="
      exit 1
    fi
    ;;
  *) echo "== 1 failed in 0.01 seconds =="; exit 1 ;;
esac
"#;

fn project(files: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("fake_pytest.sh"), FAKE_PYTEST).unwrap();
    std::fs::create_dir_all(dir.path().join("tests")).unwrap();
    for file in files {
        std::fs::write(dir.path().join("tests").join(file), "").unwrap();
    }
    dir
}

fn bucketrun(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("bucketrun").unwrap();
    cmd.current_dir(dir)
        .env_remove("RUST_LOG")
        .args(["--python", "sh fake_pytest.sh", "--timeout", "10"]);
    cmd
}

#[test]
fn test_passing_suite_exits_zero() {
    let dir = project(&["test_pass_a.py", "test_pass_b.py"]);
    bucketrun(dir.path())
        .args(["--bucket", "2", "tests/test_*.py"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[SUCCESS] tests/test_pass_a.py"))
        .stdout(predicate::str::contains("All buckets passed!"));
}

#[test]
fn test_failing_suite_exits_one() {
    let dir = project(&["test_pass.py", "test_broken.py"]);
    bucketrun(dir.path())
        .args(["--bucket", "2", "--retry", "1", "tests/test_*.py"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("[FAILED] tests/test_broken.py"));
}

#[test]
fn test_flaky_suite_exits_two() {
    let dir = project(&["test_flaky.py"]);
    bucketrun(dir.path())
        .args(["tests/test_flaky.py"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("[FLAKY]"));
}

#[test]
fn test_json_output() {
    let dir = project(&["test_pass.py"]);
    let output = bucketrun(dir.path())
        .args(["--json", "tests/test_pass.py"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["status"], "SUCCESS");
    assert_eq!(value["interrupted"], false);
    assert_eq!(value["results"][0]["name"], "tests/test_pass.py");
}

#[test]
fn test_collect_only_lists_buckets() {
    let dir = project(&["test_a.py", "test_b.py", "test_c.py"]);
    bucketrun(dir.path())
        .args(["--collect-only", "--bucket", "2", "tests/*.py"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Bucket 0 (2 units"))
        .stdout(predicate::str::contains("Bucket 1 (1 units"))
        .stdout(predicate::str::contains("tests/test_c.py"));
}

#[test]
fn test_hint_file_moves_heavy_unit_alone() {
    let dir = project(&["test_a.py", "test_b.py", "test_c.py"]);
    std::fs::write(
        dir.path().join("hints.toml"),
        "[weights]\n\"test_c.py\" = 50\n",
    )
    .unwrap();
    let output = bucketrun(dir.path())
        .args([
            "--collect-only",
            "--json",
            "--bucket",
            "2",
            "--hint",
            "hints.toml",
            "tests/*.py",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(plan[0]["units"], serde_json::json!(["tests/test_c.py"]));
    assert_eq!(
        plan[1]["units"],
        serde_json::json!(["tests/test_a.py", "tests/test_b.py"])
    );
}

#[test]
fn test_config_file_is_read() {
    let dir = project(&["test_a.py", "test_b.py", "test_c.py"]);
    std::fs::write(
        dir.path().join("bucketrun.toml"),
        "[run]\nbucket = 3\nstrategy = \"round-robin\"\n",
    )
    .unwrap();
    bucketrun(dir.path())
        .args(["--collect-only", "tests/*.py"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Bucket 2 (1 units"));
}

#[test]
fn test_log_file_records_time_and_results() {
    let dir = project(&["test_pass.py"]);
    bucketrun(dir.path())
        .args(["--log-file", "run.log", "tests/test_pass.py"])
        .assert()
        .success();
    let log = std::fs::read_to_string(dir.path().join("run.log")).unwrap();
    assert!(log.contains("] Time: "));
    assert!(log.contains("] [SUCCESS] tests/test_pass.py"));
}

#[test]
fn test_unmatched_pattern_fails() {
    let dir = project(&[]);
    bucketrun(dir.path())
        .args(["tests/*.py"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("matched no files"));
}

#[test]
fn test_zero_timeout_is_rejected() {
    let dir = project(&["test_pass.py"]);
    Command::cargo_bin("bucketrun")
        .unwrap()
        .current_dir(dir.path())
        .args(["--timeout", "0", "tests/test_pass.py"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Timeout must be a positive"));
}

#[test]
fn test_invalid_env_override_is_rejected() {
    let dir = project(&["test_pass.py"]);
    bucketrun(dir.path())
        .args(["--env", "NOVALUE", "tests/test_pass.py"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}
