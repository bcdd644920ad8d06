//! Command-line interface tests, run against the built `polishc` binary.

use std::path::Path;
use std::process::{Command, Output};

fn polishc(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_polishc"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run polishc")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn write_file(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path.display().to_string()
}

#[test]
fn test_interpret_expression() {
    let output = polishc(&["run", "-e", "push 3 add mul", "--interpret", "7", "10"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "91\n");
}

#[test]
fn test_check_reports_depth() {
    let output = polishc(&["check", "-e", "push 3 add mul", "--nargs", "2"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "ok: 3 operations, max stack depth 3\n");
}

#[test]
fn test_check_points_at_source() {
    let output = polishc(&["check", "-e", "push 1\n  dup 5", "--nargs", "0"]);
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("operation #1 (dup)"), "{}", err);
    assert!(err.contains("line 2, column 3"), "{}", err);
}

#[test]
fn test_parse_error() {
    let output = polishc(&["check", "-e", "push 1 jump"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Unknown word 'jump' at line 1, column 8"));
}

#[test]
fn test_source_is_required() {
    let output = polishc(&["check"]);
    assert!(!output.status.success());
}

#[test]
fn test_bad_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(dir.path(), "polish.toml", "register_budget = 99\n");
    let output = polishc(&["--config", &config, "check", "-e", "push 1"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("invalid config"));
}

#[cfg(all(target_arch = "x86_64", unix))]
mod native {
    use super::*;

    #[test]
    fn test_run_file_with_traces() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_file(
            dir.path(),
            "square.pol",
            "# f(x) = x * x\ndup 0\ntrace 0\nmul\ntrace 0\n",
        );
        let output = polishc(&["run", "-f", &program, "12"]);
        assert!(output.status.success(), "{}", stderr(&output));
        assert_eq!(stdout(&output), "trace #1: 12\ntrace #3: 144\n144\n");
    }

    #[test]
    fn test_run_matches_interpreter() {
        let source = "dup 1 dup 1 sub swap pop mul push 0xFFFF_FFFF add";
        let native = polishc(&["run", "-e", source, "5", "9"]);
        let interpreted = polishc(&["run", "-e", source, "--interpret", "5", "9"]);
        assert!(native.status.success(), "{}", stderr(&native));
        assert_eq!(stdout(&native), stdout(&interpreted));
    }

    #[test]
    fn test_run_with_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_file(dir.path(), "polish.toml", "register_budget = 0\n");
        let output = polishc(&["--config", &config, "run", "-e", "add add", "1", "2", "3"]);
        assert!(output.status.success(), "{}", stderr(&output));
        assert_eq!(stdout(&output), "6\n");
    }

    #[test]
    fn test_dump_identity() {
        let output = polishc(&["dump", "-e", "", "--nargs", "1"]);
        assert!(output.status.success(), "{}", stderr(&output));
        assert_eq!(stdout(&output), "00000000  55 48 89 e5 48 89 f8 5d c3\n");
    }

    #[test]
    fn test_run_invalid_program() {
        let output = polishc(&["run", "-e", "swap", "1"]);
        assert_eq!(output.status.code(), Some(1));
        assert!(stderr(&output).contains("invalid program"));
    }
}
