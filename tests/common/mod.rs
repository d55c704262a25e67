//! Shared test infrastructure for integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A scratch directory `bosh` runs in, isolated from the user's config.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `value` as pretty JSON under `name` and return its path.
    pub fn write_json(&self, name: &str, value: &Value) -> PathBuf {
        let path = self.path().join(name);
        let text = serde_json::to_string_pretty(value).expect("serialize fixture");
        std::fs::write(&path, text).expect("write fixture");
        path
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.path().join(name)).expect("read file")
    }

    /// Run `bosh` with `args` inside the workspace.
    pub fn bosh<I, S>(&self, args: I) -> Output
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        Command::new(env!("CARGO_BIN_EXE_bosh"))
            .args(args)
            .current_dir(self.path())
            .env_remove("BOSH_CONFIG")
            .env_remove("BOSH_IMAGEPATH")
            .env_remove("BOSH_FORCE_DOCKER")
            .env_remove("BOSH_FORCE_SINGULARITY")
            .env_remove("BOSH_LOG")
            .env("XDG_CONFIG_HOME", self.path().join(".config"))
            .env("HOME", self.path())
            .output()
            .expect("run bosh")
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

pub fn sh_available() -> bool {
    Path::new("/bin/sh").exists()
}

/// A host-only tool that writes its greeting to a file named after `name`.
pub fn greeter() -> Value {
    json!({
        "name": "greeter",
        "tool-version": "1.0.0",
        "description": "Writes a greeting",
        "schema-version": "0.5",
        "command-line": "echo [GREETING] > [OUT] [LOUD]",
        "inputs": [
            {"id": "greeting", "name": "Greeting", "type": "String",
             "value-key": "[GREETING]"},
            {"id": "name", "name": "Name", "type": "String", "value-key": "[NAME]",
             "optional": true, "default-value": "world"},
            {"id": "loud", "name": "Loud", "type": "Flag", "value-key": "[LOUD]",
             "optional": true, "command-line-flag": "-n"}
        ],
        "output-files": [
            {"id": "out", "name": "Greeting file", "value-key": "[OUT]",
             "path-template": "[NAME].txt"},
            {"id": "log", "name": "Log", "path-template": "greeter.log",
             "optional": true}
        ]
    })
}
