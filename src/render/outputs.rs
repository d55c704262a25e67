//! Output paths and configuration-file bodies.

use super::template::{substitute, Unresolved};
use super::{ConfigFile, Context, Renderer};
use crate::descriptor::{Invocation, Output};
use crate::expr::Guard;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

impl Renderer<'_> {
    /// Resolve every output's path. Outputs whose conditional templates all
    /// fail and have no `default` are left out.
    pub(super) fn output_paths(&self, invocation: &Invocation) -> BTreeMap<String, String> {
        let no_paths = BTreeMap::new();

        // Pass 1: inputs only; output keys are kept for pass 2.
        let mut first: BTreeMap<String, String> = BTreeMap::new();
        for output in &self.descriptor.output_files {
            let Some(template) = self.select_template(output, invocation, &first) else {
                debug!(output = %output.id, "no path template selected");
                continue;
            };
            let path = substitute(template, &self.keys, Unresolved::Keep, |key, offset| {
                self.resolve(key, offset, Context::Path(output), invocation, &no_paths)
            })
            .unwrap_or_default();
            first.insert(output.id.clone(), path);
        }

        // Pass 2: forward references to other outputs, then drop leftovers.
        let empty = Invocation::new();
        let mut resolved = BTreeMap::new();
        for output in &self.descriptor.output_files {
            let Some(path) = first.get(&output.id) else {
                continue;
            };
            let path = substitute(path, &self.keys, Unresolved::Keep, |key, offset| {
                self.resolve(key, offset, Context::Path(output), &empty, &first)
            })
            .unwrap_or_default();
            let mut path = substitute(&path, &self.keys, Unresolved::Remove, |_, _| None)
                .unwrap_or_default();
            if output.uses_absolute_path {
                path = self.absolute(&path);
            }
            resolved.insert(output.id.clone(), path);
        }
        resolved
    }

    /// The path template in effect: the plain `path-template`, or the first
    /// conditional entry in list order whose guard holds. A `default` entry
    /// always holds.
    fn select_template<'o>(
        &self,
        output: &'o Output,
        invocation: &Invocation,
        resolved: &BTreeMap<String, String>,
    ) -> Option<&'o str> {
        let Some(entries) = &output.conditional_path_template else {
            return output.path_template.as_deref();
        };
        let value_of = |id: &str| -> Option<Value> {
            if let Some(path) = resolved.get(id) {
                return Some(Value::String(path.clone()));
            }
            invocation.get(id).filter(|value| !value.is_null()).cloned()
        };
        for entry in entries {
            if entry.is_default() {
                return Some(&entry.path);
            }
            match Guard::parse(&entry.guard) {
                Ok(guard) if guard.evaluate(&value_of) => return Some(&entry.path),
                Ok(_) => {}
                Err(reason) => {
                    warn!(output = %output.id, guard = %entry.guard, %reason, "skipping unparseable guard");
                }
            }
        }
        None
    }

    /// Configuration files, one per output with a `file-template`. Lines with
    /// a key that has no value are dropped.
    pub(super) fn config_files(
        &self,
        invocation: &Invocation,
        paths: &BTreeMap<String, String>,
    ) -> Vec<ConfigFile> {
        let mut files = Vec::new();
        for output in &self.descriptor.output_files {
            let (Some(lines), Some(path)) = (&output.file_template, paths.get(&output.id)) else {
                continue;
            };
            let body: Vec<String> = lines
                .iter()
                .filter_map(|line| {
                    substitute(line, &self.keys, Unresolved::Clear, |key, offset| {
                        self.resolve(key, offset, Context::Config(output), invocation, paths)
                    })
                })
                .collect();
            files.push(ConfigFile {
                output_id: output.id.clone(),
                path: path.clone(),
                contents: body.join("\n"),
            });
        }
        files
    }
}
