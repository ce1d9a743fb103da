use std::path::PathBuf;
use std::process::Command;

fn loadgen_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_zippon-loadgen"))
}

fn generate(args: &[&str]) -> Vec<String> {
    let output = Command::new(loadgen_bin())
        .arg("generate")
        .args(args)
        .output()
        .expect("run zippon-loadgen generate");
    assert!(
        output.status.success(),
        "generate failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout)
        .expect("utf-8 stdout")
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn generate_prints_seeded_commands() {
    let first = generate(&["--count", "5", "--seed", "7"]);
    let second = generate(&["--count", "5", "--seed", "7"]);
    assert_eq!(first.len(), 5);
    assert_eq!(first, second);
    for line in &first {
        assert!(line.starts_with("ADD User (name = '"), "{line}");
        assert!(line.ends_with(')'), "{line}");
    }
}

#[test]
fn framed_output_wraps_run_requests() {
    let plain = generate(&["--count", "3", "--seed", "11"]);
    let framed = generate(&["--count", "3", "--seed", "11", "--framed"]);
    for (plain, framed) in plain.iter().zip(&framed) {
        assert_eq!(framed, &format!("run \"{plain}\""));
    }
}

#[test]
fn load_fails_cleanly_for_missing_binary() {
    let output = Command::new(loadgen_bin())
        .args(["load", "--bin", "/nonexistent/zippon-bin", "--sessions", "1", "--records", "1"])
        .output()
        .expect("run zippon-loadgen load");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("/nonexistent/zippon-bin"), "{stderr}");
}

#[test]
fn unwritable_report_path_names_the_file() {
    let output = Command::new(loadgen_bin())
        .args([
            "load",
            "--bin",
            "/nonexistent/zippon-bin",
            "--sessions",
            "0",
            "--out-json",
            "/nonexistent-dir/report.json",
        ])
        .output()
        .expect("run zippon-loadgen load");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to write report /nonexistent-dir/report.json"),
        "{stderr}"
    );
}
