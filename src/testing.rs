//! Runner for the tests embedded in a descriptor.

use crate::descriptor::{DescriptorTest, Invocation};
use crate::exec::Executor;
use anyhow::{Context, Result};
use md5::{Digest, Md5};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestOutcome {
    pub name: String,
    pub failures: Vec<String>,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Hex MD5 digest of a file's contents.
pub fn compute_md5(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(format!("{:x}", Md5::digest(&bytes)))
}

/// Launch every descriptor test and check its assertions. A test whose
/// invocation is invalid or cannot be launched fails; the others still run.
pub fn run_tests(executor: &Executor<'_>) -> Vec<TestOutcome> {
    executor
        .descriptor()
        .tests
        .iter()
        .map(|test| {
            let failures = run_one(executor, test);
            if failures.is_empty() {
                info!(test = %test.name, "passed");
            } else {
                warn!(test = %test.name, failures = failures.len(), "failed");
            }
            TestOutcome {
                name: test.name.clone(),
                failures,
            }
        })
        .collect()
}

fn run_one(executor: &Executor<'_>, test: &DescriptorTest) -> Vec<String> {
    let invocation = Invocation::from_map(test.invocation.clone());
    let result = match executor.launch(&invocation) {
        Ok(result) => result,
        Err(err) => return vec![format!("{err:#}")],
    };
    let mut failures = Vec::new();
    if let Some(expected) = test.assertions.exit_code {
        if i64::from(result.exit_code) != expected {
            failures.push(format!(
                "exit code {} does not match expected {expected}",
                result.exit_code
            ));
        }
    }
    if test.assertions.output_files.is_empty() {
        return failures;
    }
    let rendered = match executor.simulate(&invocation) {
        Ok(rendered) => rendered,
        Err(err) => {
            failures.push(format!("{err:#}"));
            return failures;
        }
    };
    for assertion in &test.assertions.output_files {
        let Some(path) = rendered.output_paths.get(&assertion.id) else {
            failures.push(format!("output \"{}\" has no resolved path", assertion.id));
            continue;
        };
        let path = executor.cwd().join(path);
        if !path.exists() {
            failures.push(format!(
                "output \"{}\" was not produced at {}",
                assertion.id,
                path.display()
            ));
            continue;
        }
        let Some(reference) = &assertion.md5_reference else {
            continue;
        };
        match compute_md5(&path) {
            Ok(digest) if digest.eq_ignore_ascii_case(reference) => {}
            Ok(digest) => failures.push(format!(
                "output \"{}\" has md5 {digest}, expected {reference}",
                assertion.id
            )),
            Err(err) => failures.push(format!("{err:#}")),
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;
    use crate::exec::ExecOptions;
    use serde_json::json;

    fn descriptor() -> Descriptor {
        Descriptor::from_value(json!({
            "name": "echo",
            "command-line": "echo [MSG] > [OUT]",
            "inputs": [{"id": "msg", "type": "String", "value-key": "[MSG]"}],
            "output-files": [{"id": "out", "value-key": "[OUT]", "path-template": "out.txt"}],
            "tests": [
                {"name": "good", "invocation": {"msg": "hi"},
                 "assertions": {"exit-code": 0, "output-files": [
                     {"id": "out", "md5-reference": "764efa883dda1e11db47671c4a3bbd9e"}]}},
                {"name": "wrong-digest", "invocation": {"msg": "hello"},
                 "assertions": {"output-files": [
                     {"id": "out", "md5-reference": "764efa883dda1e11db47671c4a3bbd9e"}]}},
                {"name": "bad-invocation", "invocation": {},
                 "assertions": {"exit-code": 0}}
            ]
        }))
        .expect("descriptor")
    }

    #[test]
    fn digests_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("f");
        std::fs::write(&path, "hi\n").expect("write");
        assert_eq!(
            compute_md5(&path).expect("md5"),
            "764efa883dda1e11db47671c4a3bbd9e"
        );
    }

    #[test]
    fn runs_each_test_and_reports_failures() {
        if !Path::new("/bin/sh").exists() {
            return;
        }
        let dir = tempfile::tempdir().expect("temp dir");
        let descriptor = descriptor();
        let executor = Executor::new(&descriptor, ExecOptions::default())
            .expect("executor")
            .with_cwd(dir.path());
        let outcomes = run_tests(&executor);
        let summary: Vec<(&str, bool)> = outcomes
            .iter()
            .map(|outcome| (outcome.name.as_str(), outcome.passed()))
            .collect();
        assert_eq!(
            summary,
            vec![("good", true), ("wrong-digest", false), ("bad-invocation", false)]
        );
        assert!(outcomes[1].failures[0].contains("has md5"), "{:?}", outcomes[1]);
    }
}
