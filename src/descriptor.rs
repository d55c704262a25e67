//! Typed descriptor model.
//!
//! A descriptor is loaded once and shared read-only by every stage. Optional
//! fields are explicit `Option`s or defaulted collections, and fields this
//! crate does not interpret are kept in `extra` so a formatted rewrite loses
//! nothing.

use crate::error::LoadError;
use crate::util::load_json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::path::Path;

mod invocation;

pub use invocation::Invocation;

pub const DEFAULT_SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Descriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    pub command_line: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<ContainerImage>,
    pub inputs: Vec<Input>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Group>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_files: Vec<Output>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_codes: Vec<ErrorCode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_variables: Vec<EnvironmentVariable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<DescriptorTest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_schema: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputType {
    String,
    Number,
    Flag,
    File,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::String => "String",
            InputType::Number => "Number",
            InputType::Flag => "Flag",
            InputType::File => "File",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Input {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: InputType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_key: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub list: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_separator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_list_entries: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_list_entries: Option<i64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub integer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Number>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub exclusive_minimum: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub exclusive_maximum: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_choices: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line_flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line_flag_separator: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disables_inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_requires: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_disables: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub uses_absolute_path: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Input {
    pub fn is_flag(&self) -> bool {
        self.kind == InputType::Flag
    }

    pub fn minimum(&self) -> Option<f64> {
        self.minimum.as_ref().and_then(Number::as_f64)
    }

    pub fn maximum(&self) -> Option<f64> {
        self.maximum.as_ref().and_then(Number::as_f64)
    }

    pub fn list_separator(&self) -> &str {
        self.list_separator.as_deref().unwrap_or(" ")
    }

    pub fn flag_separator(&self) -> &str {
        self.command_line_flag_separator.as_deref().unwrap_or(" ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Output {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional_path_template: Option<Vec<ConditionalPath>>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub list: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_template_stripped_extensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_template: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line_flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line_flag_separator: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub uses_absolute_path: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Output {
    pub fn flag_separator(&self) -> &str {
        self.command_line_flag_separator.as_deref().unwrap_or(" ")
    }
}

/// One guarded alternative of a conditional path template, written in the
/// descriptor as a single-entry object `{"<guard>": "<path>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct ConditionalPath {
    pub guard: String,
    pub path: String,
}

impl ConditionalPath {
    pub fn is_default(&self) -> bool {
        self.guard.trim() == "default"
    }
}

impl TryFrom<BTreeMap<String, String>> for ConditionalPath {
    type Error = String;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        if map.len() != 1 {
            return Err(format!(
                "conditional-path-template entries must have exactly one key (got {})",
                map.len()
            ));
        }
        let (guard, path) = map
            .into_iter()
            .next()
            .ok_or_else(|| "empty conditional-path-template entry".to_string())?;
        Ok(ConditionalPath { guard, path })
    }
}

impl From<ConditionalPath> for BTreeMap<String, String> {
    fn from(entry: ConditionalPath) -> Self {
        BTreeMap::from([(entry.guard, entry.path)])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Group {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub mutually_exclusive: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub one_is_required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub all_or_none: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Docker,
    Singularity,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerType::Docker => "docker",
            ContainerType::Singularity => "singularity",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContainerImage {
    #[serde(rename = "type")]
    pub kind: ContainerType,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_opts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCode {
    pub code: i64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorTest {
    pub name: String,
    pub invocation: Map<String, Value>,
    pub assertions: TestAssertions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestAssertions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_files: Vec<OutputAssertion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputAssertion {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5_reference: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A parameter that owns a value-key: either an input or an output.
#[derive(Debug, Clone, Copy)]
pub enum Parameter<'a> {
    Input(&'a Input),
    Output(&'a Output),
}

impl<'a> Parameter<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            Parameter::Input(input) => &input.id,
            Parameter::Output(output) => &output.id,
        }
    }

    pub fn value_key(&self) -> Option<&'a str> {
        match self {
            Parameter::Input(input) => input.value_key.as_deref(),
            Parameter::Output(output) => output.value_key.as_deref(),
        }
    }
}

impl Descriptor {
    /// Load a descriptor from a file path or an inline JSON document.
    pub fn load(input: &str) -> Result<Self, LoadError> {
        let value = load_json(input)?;
        Self::from_value(value)
    }

    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        Self::load(&path.display().to_string())
    }

    pub fn from_value(value: Value) -> Result<Self, LoadError> {
        serde_json::from_value(value).map_err(|source| LoadError::Shape {
            what: "descriptor",
            source,
        })
    }

    pub fn shell(&self) -> &str {
        self.shell.as_deref().unwrap_or(DEFAULT_SHELL)
    }

    pub fn input(&self, id: &str) -> Option<&Input> {
        self.inputs.iter().find(|input| input.id == id)
    }

    pub fn output(&self, id: &str) -> Option<&Output> {
        self.output_files.iter().find(|output| output.id == id)
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|group| group.id == id)
    }

    pub fn is_group(&self, id: &str) -> bool {
        self.group(id).is_some()
    }

    /// First group listing `input_id` as a member.
    pub fn group_of(&self, input_id: &str) -> Option<&Group> {
        self.groups
            .iter()
            .find(|group| group.members.iter().any(|member| member == input_id))
    }

    pub fn is_flag(&self, id: &str) -> bool {
        self.input(id).is_some_and(Input::is_flag)
    }

    /// Inputs followed by outputs, in declaration order.
    pub fn parameters(&self) -> impl Iterator<Item = Parameter<'_>> {
        self.inputs
            .iter()
            .map(Parameter::Input)
            .chain(self.output_files.iter().map(Parameter::Output))
    }

    /// Every declared value-key, inputs first, duplicates kept.
    pub fn value_keys(&self) -> Vec<&str> {
        self.parameters()
            .filter_map(|parameter| parameter.value_key())
            .collect()
    }

    pub fn error_description(&self, code: i64) -> Option<&str> {
        self.error_codes
            .iter()
            .find(|error| error.code == code)
            .map(|error| error.description.as_str())
    }

    /// Serialize in canonical key order for a formatted rewrite.
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
