//! Queries over a rendered invocation.
//!
//! A query reads `<section>[/<field>=<value>[,<field>=<value>...]]` where the
//! section is `output-files`, `inputs` or `groups`. Conditions are matched
//! against the descriptor entries of that section; a field the entry does
//! not set matches `False`.

use crate::descriptor::Descriptor;
use crate::error::QueryError;
use crate::render::Rendered;
use serde::Serialize;
use serde_json::{Map, Value};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    OutputFiles,
    Inputs,
    Groups,
}

impl Section {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "output-files" => Some(Section::OutputFiles),
            "inputs" => Some(Section::Inputs),
            "groups" => Some(Section::Groups),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub section: Section,
    pub conditions: Vec<(String, Value)>,
}

impl FromStr for Query {
    type Err = QueryError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| QueryError {
            query: text.to_string(),
            reason: reason.to_string(),
        };
        let (section, conditions) = text.split_once('/').unwrap_or((text, ""));
        let section = Section::parse(section)
            .ok_or_else(|| invalid("section must be output-files, inputs or groups"))?;
        let conditions = conditions
            .split(',')
            .filter(|condition| !condition.is_empty())
            .map(|condition| {
                let (field, value) = condition
                    .split_once('=')
                    .ok_or_else(|| invalid("conditions read <field>=<value>"))?;
                Ok((field.to_string(), condition_value(value)))
            })
            .collect::<Result<Vec<_>, QueryError>>()?;
        Ok(Query {
            section,
            conditions,
        })
    }
}

fn condition_value(text: &str) -> Value {
    if let Ok(number) = text.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(number) {
            return Value::Number(number);
        }
    }
    match text {
        "True" => Value::Bool(true),
        "False" => Value::Bool(false),
        other => Value::String(other.to_string()),
    }
}

fn field_matches(entry: &Value, field: &str, expected: &Value) -> bool {
    let actual = entry.get(field);
    match (actual, expected) {
        (None | Some(Value::Null), Value::Bool(false)) => true,
        (Some(actual), Value::Number(expected)) => actual.as_f64() == expected.as_f64(),
        (Some(actual), expected) => actual == expected,
        (None, _) => false,
    }
}

fn entries<T: Serialize>(items: &[T]) -> Vec<Value> {
    items
        .iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect()
}

/// Resolve `query` to a map from entry id to its value: the output path,
/// the input value, or a member-to-value map for groups. Entries with no
/// value map to `null`.
pub fn evaluate(descriptor: &Descriptor, rendered: &Rendered, query: &Query) -> Map<String, Value> {
    let candidates = match query.section {
        Section::OutputFiles => entries(&descriptor.output_files),
        Section::Inputs => entries(&descriptor.inputs),
        Section::Groups => entries(&descriptor.groups),
    };
    let mut result = Map::new();
    for entry in candidates {
        let eligible = query
            .conditions
            .iter()
            .all(|(field, expected)| field_matches(&entry, field, expected));
        let Some(id) = entry.get("id").and_then(Value::as_str) else {
            continue;
        };
        if !eligible {
            continue;
        }
        let value = match query.section {
            Section::OutputFiles => rendered
                .output_paths
                .get(id)
                .map_or(Value::Null, |path| Value::String(path.clone())),
            Section::Inputs => input_value(rendered, id),
            Section::Groups => {
                let members = descriptor
                    .group(id)
                    .map(|group| group.members.as_slice())
                    .unwrap_or_default();
                Value::Object(
                    members
                        .iter()
                        .map(|member| (member.clone(), input_value(rendered, member)))
                        .collect(),
                )
            }
        };
        result.insert(id.to_string(), value);
    }
    result
}

fn input_value(rendered: &Rendered, id: &str) -> Value {
    rendered.invocation.get(id).cloned().unwrap_or(Value::Null)
}
