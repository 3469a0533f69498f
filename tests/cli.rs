use std::io::Write;
use std::process::Command;

fn run_stackjit(args: &[&str], source: &str) -> (String, String, bool) {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let (command, flags) = args.split_first().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_stackjit"))
        .arg(command)
        .arg(&path)
        .args(flags)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to execute stackjit");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn assert_success(args: &[&str], source: &str) -> String {
    let (stdout, stderr, success) = run_stackjit(args, source);
    assert!(success, "command should succeed, stderr:\n{}", stderr);
    stdout
}

fn assert_failure(args: &[&str], source: &str) -> String {
    let (_, stderr, success) = run_stackjit(args, source);
    assert!(!success, "command should fail");
    stderr
}

const ADD2: &str = r#"
entry = "main"
args = [40]

[[methods]]
name = "add2"
locals = 1
body = ["getlocal 1", "putobject 2", "opt_plus", "leave"]

[[methods]]
name = "main"
locals = 1
body = ["putself", "getlocal 1", "send add2 1", "leave"]
"#;

const MULT: &str = r#"
entry = "main"

[[methods]]
name = "main"
body = ["putobject 6", "putobject 7", "opt_mult", "leave"]
"#;

#[test]
fn test_run() {
    assert_eq!(assert_success(&["run"], ADD2), "42\n");
}

#[test]
fn test_run_compare() {
    assert_eq!(assert_success(&["run", "--compare"], ADD2), "42\n");
}

#[test]
fn test_interp() {
    assert_eq!(assert_success(&["interp"], ADD2), "42\n");
    assert_eq!(assert_success(&["interp"], MULT), "42\n");
}

#[test]
fn test_run_with_jit_off_interprets() {
    assert_eq!(assert_success(&["run", "--jit", "off"], MULT), "42\n");
}

#[test]
fn test_receiver_and_booleans() {
    let source = r#"
entry = "main"
receiver = 5

[[methods]]
name = "main"
body = ["putself", "putobject 9", "opt_lt", "leave"]
"#;
    assert_eq!(assert_success(&["run", "--compare"], source), "true\n");
}

#[test]
#[cfg(all(target_arch = "x86_64", unix))]
fn test_compile_failure_aborts() {
    let stderr = assert_failure(&["run", "--jit", "on"], MULT);
    assert!(stderr.contains("fatal: failed to compile `main`"), "stderr:\n{}", stderr);
    assert!(stderr.contains("opt_mult"), "stderr:\n{}", stderr);
}

#[test]
#[cfg(all(target_arch = "x86_64", unix))]
fn test_dump_disasm_goes_to_stderr() {
    let (stdout, stderr, success) = run_stackjit(&["run", "--dump-disasm"], ADD2);
    assert!(success, "stderr:\n{}", stderr);
    assert_eq!(stdout, "42\n");
    assert!(stderr.contains("call"), "stderr:\n{}", stderr);
    assert!(stderr.contains("[r13+0x18]"), "stderr:\n{}", stderr);
}

#[test]
#[cfg(all(target_arch = "x86_64", unix))]
fn test_dump_native_json() {
    let stdout = assert_success(&["dump", "--native", "--disasm-format", "json"], ADD2);
    let json_lines: Vec<serde_json::Value> = stdout
        .lines()
        .filter(|line| line.starts_with('{'))
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(!json_lines.is_empty());
    assert!(json_lines.iter().all(|line| line["mnemonic"].is_string()));
    assert!(json_lines.iter().any(|line| line["mnemonic"] == "ret"));
}

#[test]
fn test_dump_listing() {
    let stdout = assert_success(&["dump"], ADD2);
    assert!(stdout.contains("add2"), "stdout:\n{}", stdout);
    assert!(stdout.contains("opt_plus"), "stdout:\n{}", stdout);
    assert!(stdout.contains("send"), "stdout:\n{}", stdout);
}

#[test]
fn test_bad_program() {
    let source = r#"
entry = "main"

[[methods]]
name = "main"
body = ["putnil", "frobnicate", "leave"]
"#;
    let stderr = assert_failure(&["run"], source);
    assert!(stderr.contains("main:2: unknown instruction `frobnicate`"), "stderr:\n{}", stderr);
}

#[test]
fn test_interpreter_error_is_reported() {
    let source = r#"
entry = "main"

[[methods]]
name = "main"
body = ["putnil", "putobject 1", "opt_plus", "leave"]
"#;
    let stderr = assert_failure(&["interp"], source);
    assert!(stderr.contains("error:"), "stderr:\n{}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let stderr = assert_failure(&["run", "--buffer-size", "0"], ADD2);
    assert!(stderr.contains("code_buffer_size must be positive"), "stderr:\n{}", stderr);
}
