use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn spec(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("specs").join(name)
}

fn flow_run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_flow-run"))
        .args(args)
        .output()
        .unwrap()
}

fn write_flow(dir: &TempDir, text: &str) -> String {
    let path = dir.path().join("program.flow");
    fs::write(&path, text).unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn test_flow_to_stdout() {
    let flow = spec("basic-flow.flow");
    let input = spec("input-numbers.data");
    let out = flow_run(&[flow.to_str().unwrap(), input.to_str().unwrap()]);
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "30\n50\n70\n");
    assert!(String::from_utf8_lossy(&out.stderr).contains("Processed 20 -> 3 values"));
}

#[test]
fn test_flow_to_output_file() {
    let dir = TempDir::new().unwrap();
    let out_path = dir.path().join("nested").join("out.data");
    let flow = spec("skip-take.flow");
    let input = spec("input-numbers.data");
    let out = flow_run(&[
        flow.to_str().unwrap(),
        input.to_str().unwrap(),
        "-o",
        out_path.to_str().unwrap(),
    ]);
    assert!(out.status.success());
    assert!(out.stdout.is_empty());
    assert_eq!(fs::read_to_string(&out_path).unwrap(), "5\n6\n7\n");
}

#[test]
fn test_mode_override_keeps_output() {
    let flow = spec("even-tens.flow");
    let input = spec("input-numbers.data");
    let sequential = flow_run(&[flow.to_str().unwrap(), input.to_str().unwrap()]);
    let parallel = flow_run(&[
        flow.to_str().unwrap(),
        input.to_str().unwrap(),
        "--mode",
        "parallel:3",
    ]);
    assert!(parallel.status.success());
    assert_eq!(sequential.stdout, parallel.stdout);
    assert_eq!(String::from_utf8_lossy(&parallel.stdout), "0\n20\n40\n60\n");
}

#[test]
fn test_reads_stdin() {
    let flow = spec("sum-squares.flow");
    let mut child = Command::new(env!("CARGO_BIN_EXE_flow-run"))
        .args([flow.to_str().unwrap(), "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(b"1\n2\n3\n").unwrap();
    let out = child.wait_with_output().unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "14\n");
}

#[test]
fn test_division_by_zero_fails() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir, "MAP DIV 0\n");
    let input = spec("input-numbers.data");
    let out = flow_run(&[&flow, input.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("division by zero"));
}

#[test]
fn test_negative_take_is_invalid_argument() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir, "TAKE -1\n");
    let input = spec("input-numbers.data");
    let out = flow_run(&[&flow, input.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid argument"));
}

#[test]
fn test_huge_worker_bound() {
    let flow = spec("basic-flow.flow");
    let input = spec("input-numbers.data");
    let out = flow_run(&[
        flow.to_str().unwrap(),
        input.to_str().unwrap(),
        "--mode",
        "parallel:18446744073709551615",
    ]);
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "30\n50\n70\n");
}

#[test]
fn test_bad_mode_is_rejected() {
    let flow = spec("basic-flow.flow");
    let input = spec("input-numbers.data");
    let out = flow_run(&[
        flow.to_str().unwrap(),
        input.to_str().unwrap(),
        "--mode",
        "parallel:0",
    ]);
    assert!(!out.status.success());
}

#[test]
fn test_missing_flow_file() {
    let out = flow_run(&["/nonexistent/program.flow", "-"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Error reading flow file"));
}
