//! CLI arg tests for sentinel_tail
use assert_cmd::Command;

fn tail() -> Command {
    Command::cargo_bin("sentinel_tail").expect("binary exists")
}

#[test]
fn help_mentions_token_and_json_flags() {
    let assert = tail().arg("--help").assert().success();
    let out = assert.get_output();
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    assert!(text.contains("Usage:"), "missing usage line\n{text}");
    assert!(
        text.contains("--token") && text.contains("-k") && text.contains("--json"),
        "help text missing expected flags (--token/-k, --json)\n{text}"
    );
}

#[test]
fn flags_before_help_are_accepted() {
    // --help short-circuits before any network access
    let assert = tail()
        .args(["-k", "secret", "--json", "--help"])
        .assert()
        .success();
    assert!(String::from_utf8_lossy(&assert.get_output().stderr).contains("Usage:"));
}

#[test]
fn unreachable_agent_fails() {
    // Port 1 on loopback refuses immediately.
    tail()
        .arg("ws://127.0.0.1:1/ws")
        .timeout(std::time::Duration::from_secs(10))
        .assert()
        .failure();
}
