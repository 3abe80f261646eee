//! CLI tests: spawn the `toolrun` binary and check output and exit codes.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use serde_json::Value;
use toolrun::exit_codes;
use toolrun::test_support::TestRoot;

fn toolrun(root: &TestRoot, args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_toolrun"))
        .arg("--root")
        .arg(root.path())
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn toolrun");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(stdin.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("toolrun output")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout json")
}

#[cfg(unix)]
#[test]
fn exec_script_with_default_root_runs_in_sandbox() {
    let root = TestRoot::new().expect("root");
    root.write(
        ".toolrun/config.toml",
        "script_command = [\"sh\", \"{file}\"]\n",
    )
    .expect("write config");

    let mut child = Command::new(env!("CARGO_BIN_EXE_toolrun"))
        .current_dir(root.path())
        .args(["exec", "--mode", "script"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn toolrun");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"echo hello\n")
        .expect("write stdin");
    let out = child.wait_with_output().expect("toolrun output");

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let json = stdout_json(&out);
    assert_eq!(json["stdout"], "hello\n");
    assert_eq!(json["exit_code"], 0);
    let path = json["path"].as_str().expect("path");
    assert!(Path::new(path).is_absolute());
    assert!(root.path().join("runner/sandbox/app_gen.py").is_file());
}

#[test]
fn bundle_manifest_and_rejection() {
    let root = TestRoot::new().expect("root");
    root.write("blocks/components/gee/aoi.py", "a = 1\n").expect("write");
    root.write("blocks/components/legacy/y.py", "y\n").expect("write");

    let ok = toolrun(
        &root,
        &["bundle", "--manifest", "blocks/components/gee/aoi.py"],
        "",
    );
    assert_eq!(ok.status.code(), Some(exit_codes::OK));
    let manifest = stdout_json(&ok);
    assert_eq!(manifest[0]["size"], 6);
    assert_eq!(manifest[0]["digest"].as_str().expect("digest").len(), 10);

    let denied = toolrun(
        &root,
        &[
            "bundle",
            "blocks/components/gee/aoi.py",
            "blocks/components/legacy/y.py",
        ],
        "",
    );
    assert_eq!(denied.status.code(), Some(exit_codes::INVALID));
    assert!(denied.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&denied.stderr);
    assert!(stderr.contains("legacy denied: blocks/components/legacy/y.py"));
}

#[test]
fn exec_inline_from_stdin() {
    let root = TestRoot::new().expect("root");
    let out = toolrun(&root, &["exec", "--mode", "inline"], "print('hi')\n");
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(
        stdout_json(&out),
        serde_json::json!({"status": "ok", "stdout": "hi\n", "stderr": ""})
    );
}

#[test]
fn exec_unknown_mode_exits_with_exec_failed() {
    let root = TestRoot::new().expect("root");
    let out = toolrun(&root, &["exec", "--mode", "docker"], "print(1)");
    assert_eq!(out.status.code(), Some(exit_codes::EXEC_FAILED));
    assert_eq!(stdout_json(&out)["error"], "unsupported_mode");
}

#[test]
fn extract_reads_reply_from_stdin() {
    let root = TestRoot::new().expect("root");
    let reply = "Sure.\n```json\n{\"uc_id\": \"x\", \"aoi\": 1, \"params\": {}, \"components\": []}\n```";
    let out = toolrun(&root, &["extract"], reply);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let json = stdout_json(&out);
    assert_eq!(json["plan"]["uc_id"], "x");
    assert_eq!(json["text"], "Sure.");
}

#[test]
fn init_config_refuses_to_overwrite() {
    let root = TestRoot::new().expect("root");
    let first = toolrun(&root, &["init-config"], "");
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    assert!(root.path().join(".toolrun/config.toml").is_file());

    let second = toolrun(&root, &["init-config"], "");
    assert_eq!(second.status.code(), Some(exit_codes::INVALID));
    let forced = toolrun(&root, &["init-config", "--force"], "");
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn instructions_fall_back_without_prompt_file() {
    let root = TestRoot::new().expect("root");
    let out = toolrun(&root, &["instructions"], "");
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("bundle_components"));

    root.write("prompts/mega_prompt.md", "Operator prompt.\n")
        .expect("write");
    let out = toolrun(&root, &["instructions"], "");
    assert_eq!(String::from_utf8_lossy(&out.stdout), "Operator prompt.\n");
}

#[test]
fn tool_call_dispatches_json() {
    let root = TestRoot::new().expect("root");
    let out = toolrun(
        &root,
        &[
            "tool",
            r#"{"tool": "suggest_next", "items": [{"id": "a", "label": "A", "payload": "{\"k\": 1}"}]}"#,
        ],
        "",
    );
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout_json(&out)["accepted"], 1);
}
