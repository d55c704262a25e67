//! Result of one execution and post-run output classification.

use crate::descriptor::Descriptor;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// One declared output file, with the path it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescription {
    pub id: String,
    pub file_name: String,
    pub optional: bool,
}

impl fmt::Display for FileDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.optional { "Optional" } else { "Required" };
        write!(f, "{} ({}, {tag})", self.file_name, self.id)
    }
}

/// Where the container image used for a run came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ContainerLocation {
    /// `docker pull` failed; the engine will use whatever it has cached.
    LocalCopy,
    PulledFromDocker,
    /// A Singularity image file already present on disk.
    Local { name: String },
    /// A Singularity image pulled from `source` for this run.
    Pulled { source: String, name: String },
}

impl fmt::Display for ContainerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerLocation::LocalCopy => write!(f, "Local copy"),
            ContainerLocation::PulledFromDocker => write!(f, "Pulled from Docker"),
            ContainerLocation::Local { name } => write!(f, "Local ({name})"),
            ContainerLocation::Pulled { source, name } => write!(
                f,
                "Pulled from {source} ({name} not found in current working directory or specified image path)"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Description of the declared error code matching `exit_code`.
    pub error_message: Option<String>,
    pub output_files: Vec<FileDescription>,
    pub missing_files: Vec<FileDescription>,
    pub shell_command: String,
    pub container_command: Option<String>,
    pub container_location: Option<ContainerLocation>,
}

impl ExecutorOutput {
    /// Result of a dry run: the command is reported as stdout.
    pub fn simulated(command: &str) -> Self {
        Self {
            stdout: command.to_string(),
            shell_command: command.to_string(),
            ..Self::default()
        }
    }

    /// Whether the tool succeeded and produced every required output.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && self.missing_files.is_empty()
    }
}

impl fmt::Display for ExecutorOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(40);
        let section = |f: &mut fmt::Formatter<'_>, title: &str, body: &str| -> fmt::Result {
            writeln!(f, "{title}:")?;
            writeln!(f, "{rule}")?;
            writeln!(f, "{body}")?;
            writeln!(f)
        };
        section(f, "Shell command", &self.shell_command)?;
        if let Some(location) = &self.container_location {
            section(f, "Container location", &location.to_string())?;
        }
        if let Some(command) = &self.container_command {
            section(f, "Container command", command)?;
        }
        section(f, "Exit code", &self.exit_code.to_string())?;
        if !self.stdout.is_empty() {
            section(f, "Std out", self.stdout.trim_end())?;
        }
        if !self.stderr.is_empty() {
            section(f, "Std err", self.stderr.trim_end())?;
        }
        if let Some(message) = &self.error_message {
            section(f, "Error message", message)?;
        }
        section(f, "Output files", &file_list(&self.output_files))?;
        section(f, "Missing files", &file_list(&self.missing_files))
    }
}

fn file_list(files: &[FileDescription]) -> String {
    files
        .iter()
        .map(|file| format!("\t- {file}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Check every resolved output path against the filesystem, relative paths
/// against `base`. Wildcards in a path are glob-expanded and the first match
/// is reported. Absent optional outputs are not reported at all.
pub fn classify_outputs(
    descriptor: &Descriptor,
    paths: &BTreeMap<String, String>,
    base: &Path,
) -> (Vec<FileDescription>, Vec<FileDescription>) {
    let mut found = Vec::new();
    let mut missing = Vec::new();
    for output in &descriptor.output_files {
        let Some(path) = paths.get(&output.id) else {
            continue;
        };
        let describe = |file_name: String| FileDescription {
            id: output.id.clone(),
            file_name,
            optional: output.optional,
        };
        match first_match(path, base) {
            Some(file_name) => found.push(describe(file_name)),
            None if !output.optional => missing.push(describe(path.clone())),
            None => debug!(output = %output.id, %path, "optional output not produced"),
        }
    }
    (found, missing)
}

fn first_match(path: &str, base: &Path) -> Option<String> {
    let pattern = base.join(path);
    let found = glob::glob(&pattern.display().to_string())
        .ok()
        .and_then(|mut matches| matches.next())
        .and_then(Result::ok)
        // Literal paths that happen to contain glob metacharacters.
        .or_else(|| pattern.exists().then(|| pattern.clone()))?;
    let shown = match found.strip_prefix(base) {
        Ok(relative) if Path::new(path).is_relative() => relative,
        _ => found.as_path(),
    };
    Some(shown.display().to_string())
}

/// Description of the declared error code for `exit_code`, if any.
pub fn error_message(descriptor: &Descriptor, exit_code: i32) -> Option<String> {
    descriptor
        .error_description(i64::from(exit_code))
        .map(str::to_string)
}
