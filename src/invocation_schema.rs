//! Compile a descriptor's constraints into a draft-04 JSON Schema for
//! invocations, and check invocations against it.
//!
//! Cross-field rules are expressed through two building blocks: an id is
//! *active* when present (and `true` for flags) and *inactive* otherwise.
//! `requires-inputs`, `disables-inputs`, mutually-exclusive, one-is-required
//! and all-or-none groups, and per-choice value dependencies all become
//! `anyOf`/`allOf` combinations of those two.

use crate::descriptor::{Descriptor, Input, InputType, Invocation};
use crate::error::InvocationValidationError;
use crate::validate::choice_key;
use jsonschema::{Draft, JSONSchema};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

pub const DRAFT_04: &str = "http://json-schema.org/draft-04/schema#";

/// The schema invocations of `descriptor` are checked against: the
/// descriptor's own `invocation-schema` when it carries one, else the
/// compiled one.
pub fn schema_for(descriptor: &Descriptor) -> Value {
    match &descriptor.invocation_schema {
        Some(schema) => schema.clone(),
        None => compile(descriptor),
    }
}

/// Compile the invocation schema. Deterministic for a given descriptor.
pub fn compile(descriptor: &Descriptor) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for input in &descriptor.inputs {
        properties.insert(input.id.clone(), property_schema(input));
        if !input.optional {
            required.push(Value::String(input.id.clone()));
        }
    }

    let mut schema = Map::new();
    schema.insert("$schema".into(), json!(DRAFT_04));
    schema.insert(
        "title".into(),
        json!(format!("{}.invocationSchema", descriptor.name)),
    );
    schema.insert("type".into(), json!("object"));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".into(), Value::Array(required));
    }
    schema.insert("additionalProperties".into(), json!(false));

    let rules = cross_field_rules(descriptor);
    if !rules.is_empty() {
        schema.insert("allOf".into(), Value::Array(rules));
    }
    Value::Object(schema)
}

fn property_schema(input: &Input) -> Value {
    let mut item = Map::new();
    let kind = match input.kind {
        InputType::Flag => "boolean",
        InputType::Number if input.integer => "integer",
        InputType::Number => "number",
        InputType::String | InputType::File => "string",
    };
    item.insert("type".into(), json!(kind));
    if input.kind == InputType::Number {
        if let Some(minimum) = &input.minimum {
            item.insert("minimum".into(), Value::Number(minimum.clone()));
            if input.exclusive_minimum {
                item.insert("exclusiveMinimum".into(), json!(true));
            }
        }
        if let Some(maximum) = &input.maximum {
            item.insert("maximum".into(), Value::Number(maximum.clone()));
            if input.exclusive_maximum {
                item.insert("exclusiveMaximum".into(), json!(true));
            }
        }
    }
    if let Some(choices) = input.value_choices.as_ref().filter(|c| !c.is_empty()) {
        item.insert("enum".into(), Value::Array(choices.clone()));
    }
    if !input.list {
        return Value::Object(item);
    }

    let mut list = Map::new();
    list.insert("type".into(), json!("array"));
    list.insert("items".into(), Value::Object(item));
    if let Some(min) = input.min_list_entries.filter(|min| *min > 0) {
        list.insert("minItems".into(), json!(min));
    }
    if let Some(max) = input.max_list_entries.filter(|max| *max >= 0) {
        list.insert("maxItems".into(), json!(max));
    }
    Value::Object(list)
}

fn active(descriptor: &Descriptor, id: &str) -> Value {
    if let Some(group) = descriptor.group(id) {
        let members: Vec<Value> = group
            .members
            .iter()
            .map(|member| active(descriptor, member))
            .collect();
        return json!({ "anyOf": members });
    }
    if descriptor.is_flag(id) {
        json!({ "required": [id], "properties": { id: { "enum": [true] } } })
    } else {
        json!({ "required": [id] })
    }
}

fn inactive(descriptor: &Descriptor, id: &str) -> Value {
    if descriptor.is_flag(id) {
        json!({ "properties": { id: { "enum": [false] } } })
    } else {
        json!({ "not": { "required": [id] } })
    }
}

fn all_of(schemas: Vec<Value>) -> Value {
    json!({ "allOf": schemas })
}

fn cross_field_rules(descriptor: &Descriptor) -> Vec<Value> {
    let mut rules = Vec::new();

    // Mutual exclusion is folded into each member's disables.
    let mut disables: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for input in &descriptor.inputs {
        let entry = disables.entry(input.id.as_str()).or_default();
        entry.extend(input.disables_inputs.iter().map(String::as_str));
    }
    for group in descriptor.groups.iter().filter(|g| g.mutually_exclusive) {
        for member in &group.members {
            let entry = disables.entry(member.as_str()).or_default();
            for other in group.members.iter().filter(|other| *other != member) {
                if !entry.contains(&other.as_str()) {
                    entry.push(other);
                }
            }
        }
    }

    for input in &descriptor.inputs {
        let id = input.id.as_str();
        if !input.requires_inputs.is_empty() {
            let required = input
                .requires_inputs
                .iter()
                .map(|target| active(descriptor, target))
                .collect();
            rules.push(json!({ "anyOf": [inactive(descriptor, id), all_of(required)] }));
        }
        if let Some(targets) = disables.get(id).filter(|targets| !targets.is_empty()) {
            let absent = targets
                .iter()
                .map(|target| inactive(descriptor, target))
                .collect();
            rules.push(json!({ "anyOf": [inactive(descriptor, id), all_of(absent)] }));
        }
        value_rules(descriptor, input, &mut rules);
    }

    for group in &descriptor.groups {
        if group.one_is_required {
            let members: Vec<Value> = group
                .members
                .iter()
                .map(|member| active(descriptor, member))
                .collect();
            rules.push(json!({ "anyOf": members }));
        }
        if group.all_or_none {
            let all = group.members.iter().map(|m| active(descriptor, m)).collect();
            let none = group.members.iter().map(|m| inactive(descriptor, m)).collect();
            rules.push(json!({ "anyOf": [all_of(all), all_of(none)] }));
        }
    }
    rules
}

/// Per-choice `value-requires` / `value-disables`: either the input does not
/// hold the choice, or the dependent ids are active (resp. inactive).
fn value_rules(descriptor: &Descriptor, input: &Input, rules: &mut Vec<Value>) {
    let Some(choices) = &input.value_choices else {
        return;
    };
    let id = input.id.as_str();
    let maps = [
        (input.value_requires.as_ref(), true),
        (input.value_disables.as_ref(), false),
    ];
    for (map, requires) in maps {
        for (key, targets) in map.into_iter().flatten() {
            if targets.is_empty() {
                continue;
            }
            let Some(choice) = choices.iter().find(|choice| choice_key(choice) == *key) else {
                continue;
            };
            let not_choice = json!({ "not": { "enum": [choice] } });
            let other_value = if input.list {
                json!({ "properties": { id: { "items": not_choice } } })
            } else {
                json!({ "properties": { id: not_choice } })
            };
            let dependents = targets
                .iter()
                .map(|target| {
                    if requires {
                        active(descriptor, target)
                    } else {
                        inactive(descriptor, target)
                    }
                })
                .collect();
            rules.push(json!({
                "anyOf": [
                    { "not": { "required": [id] } },
                    other_value,
                    all_of(dependents)
                ]
            }));
        }
    }
}

/// Check `invocation` against the descriptor's invocation schema, reporting
/// every violation.
pub fn validate_invocation(
    descriptor: &Descriptor,
    invocation: &Invocation,
) -> Result<(), InvocationValidationError> {
    let schema = schema_for(descriptor);
    validate_against(&schema, &invocation.to_value())
}

pub fn validate_against(schema: &Value, instance: &Value) -> Result<(), InvocationValidationError> {
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft4)
        .compile(schema)
        .map_err(|err| InvocationValidationError {
            errors: vec![format!("invocation schema does not compile: {err}")],
        })?;
    if let Err(errors) = compiled.validate(instance) {
        let errors: Vec<String> = errors
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{path}: {err}")
                }
            })
            .collect();
        debug!(violations = errors.len(), "invocation rejected");
        return Err(InvocationValidationError { errors });
    }
    Ok(())
}
