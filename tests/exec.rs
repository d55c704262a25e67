mod common;

use common::{greeter, sh_available, stderr, stdout, Workspace};
use serde_json::{json, Value};
use std::ffi::OsStr;

const HI_THERE: &str = r#"{"greeting": "hi there"}"#;

#[test]
fn simulate_prints_the_rendered_command() {
    let ws = Workspace::new();
    let path = ws.write_json("greeter.json", &greeter());

    let output = ws.bosh([
        OsStr::new("exec"),
        OsStr::new("simulate"),
        path.as_os_str(),
        OsStr::new("-i"),
        OsStr::new(HI_THERE),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "echo 'hi there' > world.txt\n");
    assert!(!ws.path().join("world.txt").exists());
}

#[test]
fn simulate_json_shows_defaults() {
    let ws = Workspace::new();
    let path = ws.write_json("greeter.json", &greeter());

    let output = ws.bosh([
        OsStr::new("exec"),
        OsStr::new("simulate"),
        path.as_os_str(),
        OsStr::new("-i"),
        OsStr::new(HI_THERE),
        OsStr::new("-j"),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let invocation: Value = serde_json::from_str(&stdout(&output)).expect("JSON");
    assert_eq!(invocation, json!({"greeting": "hi there", "name": "world"}));
}

#[test]
fn example_output_is_a_valid_invocation() {
    let ws = Workspace::new();
    let path = ws.write_json("greeter.json", &greeter());

    let example = ws.bosh([OsStr::new("example"), path.as_os_str(), OsStr::new("-c")]);
    assert!(example.status.success(), "stderr: {}", stderr(&example));
    let invocation: Value = serde_json::from_str(&stdout(&example)).expect("JSON");
    assert!(invocation["greeting"].is_string());
    let inv_path = ws.write_json("inv.json", &invocation);

    let check = ws.bosh([
        OsStr::new("invocation"),
        path.as_os_str(),
        OsStr::new("-i"),
        inv_path.as_os_str(),
    ]);
    assert!(check.status.success(), "stderr: {}", stderr(&check));
}

#[test]
fn launch_runs_on_the_host() {
    if !sh_available() {
        return;
    }
    let ws = Workspace::new();
    let path = ws.write_json("greeter.json", &greeter());

    let output = ws.bosh([
        OsStr::new("exec"),
        OsStr::new("launch"),
        path.as_os_str(),
        OsStr::new(HI_THERE),
        OsStr::new("--no-container"),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(ws.read("world.txt"), "hi there\n");
    assert!(stdout(&output).contains("world.txt (out, Required)"));
}

#[test]
fn launch_json_reports_the_result() {
    if !sh_available() {
        return;
    }
    let ws = Workspace::new();
    let path = ws.write_json("greeter.json", &greeter());

    let output = ws.bosh([
        OsStr::new("exec"),
        OsStr::new("launch"),
        path.as_os_str(),
        OsStr::new(r#"{"greeting": "hi", "name": "ada"}"#),
        OsStr::new("--json"),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let result: Value = serde_json::from_str(&stdout(&output)).expect("JSON");
    assert_eq!(result["exit_code"], 0);
    assert_eq!(result["shell_command"], "echo hi > ada.txt");
}

#[test]
fn missing_required_output_exits_with_two() {
    if !sh_available() {
        return;
    }
    let ws = Workspace::new();
    let mut descriptor = greeter();
    descriptor["output-files"]
        .as_array_mut()
        .expect("outputs")
        .push(json!({"id": "report", "name": "Report", "path-template": "report.txt"}));
    let path = ws.write_json("greeter.json", &descriptor);

    let output = ws.bosh([
        OsStr::new("exec"),
        OsStr::new("launch"),
        path.as_os_str(),
        OsStr::new(HI_THERE),
    ]);
    assert_eq!(output.status.code(), Some(2), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("report.txt (report, Required)"));
}

#[test]
fn failing_tool_exit_code_is_forwarded() {
    if !sh_available() {
        return;
    }
    let ws = Workspace::new();
    let mut descriptor = greeter();
    descriptor["command-line"] = json!("sh -c 'exit 3' [GREETING] > [OUT] [LOUD]");
    descriptor["error-codes"] = json!([{"code": 3, "description": "greeting refused"}]);
    let path = ws.write_json("greeter.json", &descriptor);

    let output = ws.bosh([
        OsStr::new("exec"),
        OsStr::new("launch"),
        path.as_os_str(),
        OsStr::new(HI_THERE),
    ]);
    assert_eq!(output.status.code(), Some(3), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("greeting refused"));
}

#[test]
fn evaluate_resolves_required_outputs() {
    let ws = Workspace::new();
    let path = ws.write_json("greeter.json", &greeter());

    let output = ws.bosh([
        OsStr::new("evaluate"),
        path.as_os_str(),
        OsStr::new(HI_THERE),
        OsStr::new("output-files/optional=False"),
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let result: Value = serde_json::from_str(&stdout(&output)).expect("JSON");
    assert_eq!(result, json!({"out": "world.txt"}));
}

#[test]
fn embedded_tests_pass_and_fail() {
    if !sh_available() {
        return;
    }
    let ws = Workspace::new();
    let mut descriptor = greeter();
    descriptor["tests"] = json!([
        {
            "name": "writes the greeting",
            "invocation": {"greeting": "hi"},
            "assertions": {
                "exit-code": 0,
                "output-files": [
                    {"id": "out", "md5-reference": "764efa883dda1e11db47671c4a3bbd9e"}
                ]
            }
        }
    ]);
    let path = ws.write_json("greeter.json", &descriptor);

    let output = ws.bosh([OsStr::new("test"), path.as_os_str()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("PASS writes the greeting"));

    descriptor["tests"][0]["assertions"]["exit-code"] = json!(1);
    let path = ws.write_json("greeter.json", &descriptor);
    let output = ws.bosh([OsStr::new("test"), path.as_os_str()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("FAIL writes the greeting"));
}
