//! End-to-end tests over the compiled `ember` binary.

use std::path::PathBuf;
use std::process::{Command, Output};

fn ember(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ember"))
        .args(args)
        .env_remove("EMBER_STARTUP")
        .env_remove("EMBER_UNBUFFERED")
        .output()
        .expect("failed to launch the ember binary")
}

fn stdout_of(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr_of(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

/// A scratch file removed on drop, so failing tests don't accumulate junk
/// in the temp directory.
struct ScratchFile(PathBuf);

impl ScratchFile {
    fn with_source(name: &str, source: &str) -> Self {
        let path = std::env::temp_dir().join(format!("ember-cli-{}-{}", std::process::id(), name));
        std::fs::write(&path, source).expect("failed to write scratch file");
        ScratchFile(path)
    }

    fn path(&self) -> &str {
        self.0.to_str().unwrap()
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[test]
fn version_flag_prints_version_and_exits_zero() {
    for flag in ["-v", "--version"] {
        let out = ember(&[flag]);
        assert_eq!(out.status.code(), Some(0));
        assert!(stdout_of(&out).contains(env!("CARGO_PKG_VERSION")));
    }
}

#[test]
fn help_flag_prints_usage_and_exits_zero() {
    for flag in ["-h", "--help"] {
        let out = ember(&[flag]);
        assert_eq!(out.status.code(), Some(0));
        assert!(stdout_of(&out).contains("ember"));
    }
}

#[test]
fn inline_command_prints_its_result() {
    let out = ember(&["-c", "return 1 + 2 * 3;"]);
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout_of(&out).trim(), "7");
}

#[test]
fn inline_command_with_no_result_prints_nothing() {
    let out = ember(&["-c", "let x = 1;"]);
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout_of(&out).trim(), "");
}

#[test]
fn unbuffered_flag_is_accepted() {
    let out = ember(&["-u", "-c", "return 42;"]);
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout_of(&out).trim(), "42");
}

#[test]
fn unhandled_panic_exits_one_with_a_traceback() {
    let out = ember(&["-c", "panic \"boom\";"]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = stderr_of(&out);
    assert!(stderr.contains("panic: boom"), "stderr was: {stderr}");
    assert!(stderr.contains("Traceback (most recent call FIRST):"));
}

#[test]
fn parse_error_exits_one() {
    let out = ember(&["-c", "let = ;"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr_of(&out).contains("error"));
}

#[test]
fn unknown_flag_exits_two() {
    let out = ember(&["--definitely-not-a-flag"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn script_file_runs_to_completion() {
    let script = ScratchFile::with_source(
        "ok.em",
        "fn double(x) { return x * 2; }\nlet y = double(21);\n",
    );
    let out = ember(&[script.path()]);
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn script_file_panic_surfaces_both_frames() {
    let script = ScratchFile::with_source(
        "panics.em",
        "fn inner() { panic \"deep\"; }\ninner();\n",
    );
    let out = ember(&[script.path()]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = stderr_of(&out);
    assert!(stderr.contains("panic: deep"), "stderr was: {stderr}");
    assert!(stderr.contains("Traceback"));
}

#[test]
fn missing_file_exits_two() {
    let out = ember(&["/definitely/not/a/real/file.em"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr_of(&out).contains("cannot open"));
}

#[test]
fn startup_script_runs_before_the_entry_point() {
    // Top-level `fn` declarations bind through the global table, so they
    // stay visible to the entry point run after the startup script.
    let startup = ScratchFile::with_source("startup.em", "fn seeded() { return 40; }\n");
    let out = Command::new(env!("CARGO_BIN_EXE_ember"))
        .args(["-c", "return seeded() + 2;"])
        .env("EMBER_STARTUP", startup.path())
        .output()
        .expect("failed to launch the ember binary");
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout_of(&out).trim(), "42");
}
