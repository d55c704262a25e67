//! Command, output-path and configuration-file rendering.
//!
//! Rendering is a pure function of the descriptor, the invocation and the
//! base directory used for `uses-absolute-path`; the same inputs always
//! yield byte-identical results. Output paths are resolved (two passes)
//! before configuration files, and both before the command line, since each
//! may reference the others through value-keys.

use crate::descriptor::{Descriptor, Input, InputType, Invocation, Output, Parameter};
use crate::util::shell_quote;
use anyhow::{Context as _, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

mod outputs;
pub mod template;

use template::{substitute, KeySet, Unresolved};

/// Everything a run needs, derived from one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rendered {
    pub command: String,
    pub output_paths: BTreeMap<String, String>,
    pub config_files: Vec<ConfigFile>,
    pub environment: Vec<(String, String)>,
    /// The invocation after path normalization.
    pub invocation: Invocation,
}

/// A generated configuration file and its rendered body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigFile {
    pub output_id: String,
    pub path: String,
    pub contents: String,
}

impl ConfigFile {
    /// Write the file, resolving a relative path against `base`.
    pub fn write_in(&self, base: &Path) -> Result<PathBuf> {
        let path = base.join(&self.path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        std::fs::write(&path, &self.contents)
            .with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), output = %self.output_id, "wrote configuration file");
        Ok(path)
    }
}

impl Rendered {
    pub fn write_config_files(&self, base: &Path) -> Result<()> {
        for file in &self.config_files {
            file.write_in(base)?;
        }
        Ok(())
    }
}

/// Where a value-key is being substituted.
#[derive(Debug, Clone, Copy)]
enum Context<'o> {
    Command,
    Path(&'o Output),
    Config(&'o Output),
    Environment,
}

pub struct Renderer<'a> {
    descriptor: &'a Descriptor,
    keys: KeySet<'a>,
    base_dir: PathBuf,
}

/// Render with the current directory as base.
pub fn render(descriptor: &Descriptor, invocation: &Invocation) -> Rendered {
    Renderer::new(descriptor).render(invocation)
}

impl<'a> Renderer<'a> {
    pub fn new(descriptor: &'a Descriptor) -> Self {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            descriptor,
            keys: KeySet::new(descriptor.value_keys()),
            base_dir,
        }
    }

    /// Directory that relative `uses-absolute-path` values are resolved in.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn render(&self, invocation: &Invocation) -> Rendered {
        let invocation = self.normalize_paths(invocation);
        let output_paths = self.output_paths(&invocation);
        let config_files = self.config_files(&invocation, &output_paths);
        let command = substitute(
            &self.descriptor.command_line,
            &self.keys,
            Unresolved::Remove,
            |key, offset| self.resolve(key, offset, Context::Command, &invocation, &output_paths),
        )
        .unwrap_or_default();
        let environment = self
            .descriptor
            .environment_variables
            .iter()
            .map(|var| {
                let value = substitute(&var.value, &self.keys, Unresolved::Remove, |key, offset| {
                    self.resolve(key, offset, Context::Environment, &invocation, &output_paths)
                })
                .unwrap_or_default();
                (var.name.clone(), value)
            })
            .collect();
        debug!(%command, outputs = output_paths.len(), "rendered invocation");
        Rendered {
            command,
            output_paths,
            config_files,
            environment,
            invocation,
        }
    }

    /// Make `uses-absolute-path` input values absolute against the base dir.
    pub fn normalize_paths(&self, invocation: &Invocation) -> Invocation {
        let mut normalized = invocation.clone();
        for input in self.descriptor.inputs.iter().filter(|i| i.uses_absolute_path) {
            let Some(value) = invocation.get(&input.id) else {
                continue;
            };
            let absolute = match value {
                Value::String(text) => Value::String(self.absolute(text)),
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| match item {
                            Value::String(text) => Value::String(self.absolute(text)),
                            other => other.clone(),
                        })
                        .collect(),
                ),
                other => other.clone(),
            };
            normalized.insert(input.id.clone(), absolute);
        }
        normalized
    }

    fn absolute(&self, path: &str) -> String {
        if Path::new(path).is_absolute() {
            path.to_string()
        } else {
            self.base_dir.join(path).display().to_string()
        }
    }

    /// Text for `key` from the first parameter owning it that has a value.
    fn resolve(
        &self,
        key: &str,
        offset: usize,
        context: Context<'_>,
        invocation: &Invocation,
        paths: &BTreeMap<String, String>,
    ) -> Option<String> {
        self.descriptor
            .parameters()
            .filter(|parameter| parameter.value_key() == Some(key))
            .find_map(|parameter| match parameter {
                Parameter::Input(input) => invocation
                    .get(&input.id)
                    .and_then(|value| input_text(input, value, context, offset)),
                Parameter::Output(output) => paths
                    .get(&output.id)
                    .map(|path| output_text(output, path, context)),
            })
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn strip_extensions(mut text: String, extensions: &[String]) -> String {
    for extension in extensions.iter().filter(|ext| !ext.is_empty()) {
        if let Some(stripped) = text.strip_suffix(extension.as_str()) {
            text = stripped.to_string();
        }
    }
    text
}

fn basename(text: &str) -> String {
    Path::new(text)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| text.to_string())
}

fn input_text(input: &Input, value: &Value, context: Context<'_>, offset: usize) -> Option<String> {
    if input.is_flag() {
        return match value {
            Value::Bool(true) => input.command_line_flag.clone(),
            _ => None,
        };
    }
    let items: Vec<&Value> = match value {
        Value::Null => return None,
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let textual = matches!(input.kind, InputType::String | InputType::File);
    let texts: Vec<String> = items
        .into_iter()
        .map(|item| {
            let mut text = scalar_text(item);
            match context {
                Context::Path(output) | Context::Config(output) if textual => {
                    text = strip_extensions(text, &output.path_template_stripped_extensions);
                }
                _ => {}
            }
            // Only the leading key of a path template keeps its directories.
            if matches!(context, Context::Path(_)) && input.kind == InputType::File && offset > 0 {
                text = basename(&text);
            }
            if matches!(context, Context::Command | Context::Config(_)) && textual {
                text = shell_quote(&text);
            }
            text
        })
        .collect();
    let joined = texts.join(input.list_separator());
    match (context, &input.command_line_flag) {
        (Context::Command, Some(flag)) => Some(format!("{flag}{}{joined}", input.flag_separator())),
        _ => Some(joined),
    }
}

fn output_text(output: &Output, path: &str, context: Context<'_>) -> String {
    match (context, &output.command_line_flag) {
        (Context::Command, Some(flag)) => {
            format!("{flag}{}{}", output.flag_separator(), shell_quote(path))
        }
        (Context::Command | Context::Config(_), _) => shell_quote(path),
        _ => path.to_string(),
    }
}

#[cfg(test)]
#[path = "render_tests.rs"]
mod tests;
