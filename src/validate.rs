//! Semantic descriptor checks.
//!
//! These are the business rules a structural schema cannot express: value-key
//! coverage and ambiguity, id uniqueness, input/group consistency, guard
//! typing, container index consistency and test declarations. Every rule
//! runs; violations are collected and reported together.

use crate::descriptor::{Descriptor, Input, InputType};
use crate::error::DescriptorValidationError;
use crate::exec::pull::scheme_prefix;
use crate::expr::{Guard, OperandType};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

/// Validate a parsed descriptor, returning every violation at once.
pub fn validate(descriptor: &Descriptor) -> Result<(), DescriptorValidationError> {
    let errors = violations(descriptor);
    debug!(name = %descriptor.name, violations = errors.len(), "validated descriptor");
    if errors.is_empty() {
        Ok(())
    } else {
        Err(DescriptorValidationError { errors })
    }
}

/// All rule violations, in rule order.
pub fn violations(descriptor: &Descriptor) -> Vec<String> {
    let mut errors = Vec::new();
    check_value_keys(descriptor, &mut errors);
    check_ids(descriptor, &mut errors);
    check_outputs(descriptor, &mut errors);
    for input in &descriptor.inputs {
        check_input(descriptor, input, &mut errors);
    }
    check_groups(descriptor, &mut errors);
    check_container(descriptor, &mut errors);
    check_tests(descriptor, &mut errors);
    errors
}

/// Rewrite the descriptor file in canonical key order.
pub fn format_output(path: &Path, descriptor: &Descriptor) -> Result<()> {
    let mut text = descriptor
        .to_pretty_json()
        .context("serialize descriptor")?;
    text.push('\n');
    std::fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn check_value_keys(descriptor: &Descriptor, errors: &mut Vec<String>) {
    let keys = descriptor.value_keys();

    let mut haystacks: Vec<&str> = vec![descriptor.command_line.as_str()];
    for output in &descriptor.output_files {
        if let Some(lines) = &output.file_template {
            haystacks.extend(lines.iter().map(String::as_str));
        }
        if let Some(path) = &output.path_template {
            haystacks.push(path);
        }
        for entry in output.conditional_path_template.iter().flatten() {
            haystacks.push(&entry.path);
        }
    }
    haystacks.extend(
        descriptor
            .environment_variables
            .iter()
            .map(|var| var.value.as_str()),
    );

    let mut reported = BTreeSet::new();
    for key in &keys {
        if !haystacks.iter().any(|text| text.contains(key)) && reported.insert(*key) {
            errors.push(format!(
                "KeyError: \"{key}\" not in command-line, file templates or environment variables"
            ));
        }
    }

    let mut reported = BTreeSet::new();
    for key in &keys {
        for other in &keys {
            if key != other && key.contains(other) && reported.insert((*key, *other)) {
                errors.push(format!("KeyError: \"{key}\" contains \"{other}\""));
            }
        }
    }

    // Shared keys are only legal among members of one mutually-exclusive group.
    let mut owners: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for parameter in descriptor.parameters() {
        if let Some(key) = parameter.value_key() {
            owners.entry(key).or_default().push(parameter.id());
        }
    }
    for (key, ids) in owners {
        if ids.len() < 2 {
            continue;
        }
        let shared_by_mutex = descriptor.groups.iter().any(|group| {
            group.mutually_exclusive
                && ids
                    .iter()
                    .all(|id| group.members.iter().any(|member| member == id))
        });
        if !shared_by_mutex {
            errors.push(format!(
                "MutExError: \"{key}\" belongs to 2+ non exclusive IDs"
            ));
        }
    }
}

fn check_ids(descriptor: &Descriptor, errors: &mut Vec<String>) {
    let ids = descriptor
        .inputs
        .iter()
        .map(|input| input.id.as_str())
        .chain(descriptor.output_files.iter().map(|output| output.id.as_str()))
        .chain(descriptor.groups.iter().map(|group| group.id.as_str()));
    let mut seen = BTreeSet::new();
    let mut reported = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) && reported.insert(id) {
            errors.push(format!("IdError: \"{id}\" is non-unique"));
        }
    }
}

fn guard_type(descriptor: &Descriptor, id: &str) -> Option<OperandType> {
    if let Some(input) = descriptor.input(id) {
        return Some(match input.kind {
            InputType::Number => OperandType::Number,
            InputType::Flag => OperandType::Flag,
            InputType::String | InputType::File => OperandType::String,
        });
    }
    descriptor.output(id).map(|_| OperandType::String)
}

fn check_outputs(descriptor: &Descriptor, errors: &mut Vec<String>) {
    let outputs = &descriptor.output_files;
    for (idx, first) in outputs.iter().enumerate() {
        let Some(template) = first.path_template.as_deref() else {
            continue;
        };
        for second in &outputs[idx + 1..] {
            if second.path_template.as_deref() == Some(template) {
                errors.push(format!(
                    "OutputError: \"{}\" and \"{}\" have the same path-template",
                    first.id, second.id
                ));
            }
        }
    }

    for output in outputs {
        let Some(entries) = output.conditional_path_template.as_ref() else {
            if output.path_template.is_none() {
                errors.push(format!(
                    "OutputError: \"{}\" has neither a path-template nor a conditional-path-template",
                    output.id
                ));
            }
            continue;
        };
        if output.path_template.is_some() {
            errors.push(format!(
                "OutputError: \"{}\" cannot have both a path-template and a conditional-path-template",
                output.id
            ));
        }
        let defaults = entries.iter().filter(|entry| entry.is_default()).count();
        if defaults > 1 {
            errors.push(format!(
                "OutputError: \"{}\" has more than one default conditional-path-template",
                output.id
            ));
        }
        if defaults == 0 && !output.optional {
            errors.push(format!(
                "OutputError: \"{}\" is required and its conditional-path-template needs a default",
                output.id
            ));
        }
        for entry in entries {
            let checked = Guard::parse(&entry.guard)
                .and_then(|guard| guard.check(|id| guard_type(descriptor, id)));
            if let Err(reason) = checked {
                errors.push(format!(
                    "OutputError: \"{}\" has an invalid conditional expression \"{}\": {reason}",
                    output.id, entry.guard
                ));
            }
        }
    }
}

fn check_input(descriptor: &Descriptor, input: &Input, errors: &mut Vec<String>) {
    let id = &input.id;
    match input.kind {
        InputType::Flag => {
            if input.command_line_flag.is_none() {
                errors.push(format!("InputError: \"{id}\" must have a command-line flag"));
            }
            if !input.optional {
                errors.push(format!("InputError: \"{id}\" should not be required"));
            }
        }
        InputType::Number => {
            if let (Some(min), Some(max)) = (input.minimum(), input.maximum()) {
                if min > max {
                    errors.push(format!(
                        "InputError: \"{id}\" cannot have greater min ({min}) than max ({max})"
                    ));
                }
            }
        }
        InputType::String | InputType::File => {}
    }

    if let Some(choices) = &input.value_choices {
        if choices.is_empty() {
            errors.push(format!(
                "InputError: \"{id}\" must have at least one value choice"
            ));
        }
        if let Some(default) = &input.default_value {
            let defaults: Vec<_> = match default.as_array() {
                Some(items) if input.list => items.iter().collect(),
                _ => vec![default],
            };
            if defaults.iter().any(|value| !choices.contains(value)) {
                errors.push(format!(
                    "InputError: \"{id}\" cannot have default value outside its choices"
                ));
            }
        }
    }

    if input.list {
        let min = input.min_list_entries.unwrap_or(0);
        if let Some(max) = input.max_list_entries {
            if min > max {
                errors.push(format!(
                    "InputError: \"{id}\" cannot have greater min entries ({min}) than max entries ({max})"
                ));
            }
            if max <= 0 {
                errors.push(format!(
                    "InputError: \"{id}\" cannot have non-positive max entries ({max})"
                ));
            }
        }
        if min < 0 {
            errors.push(format!(
                "InputError: \"{id}\" cannot have negative min entries ({min})"
            ));
        }
    }

    for required in &input.requires_inputs {
        if descriptor.input(required).is_none() && !descriptor.is_group(required) {
            errors.push(format!("InputError: \"{id}\" required id \"{required}\" not found"));
        }
    }
    for disabled in &input.disables_inputs {
        match descriptor.input(disabled) {
            None => errors.push(format!("InputError: \"{id}\" disabled id \"{disabled}\" not found")),
            Some(target) if !target.optional => errors.push(format!(
                "InputError: \"{id}\" disables \"{disabled}\" which is required"
            )),
            Some(_) => {}
        }
        if input.requires_inputs.contains(disabled) {
            errors.push(format!("InputError: \"{id}\" requires and disables \"{disabled}\""));
        }
    }
    if !input.optional && (!input.requires_inputs.is_empty() || !input.disables_inputs.is_empty())
    {
        errors.push(format!(
            "InputError: \"{id}\" cannot require or disable other inputs"
        ));
    }

    check_value_dependencies(descriptor, input, errors);
}

fn check_value_dependencies(descriptor: &Descriptor, input: &Input, errors: &mut Vec<String>) {
    let id = &input.id;
    let maps = [
        ("value-requires", input.value_requires.as_ref()),
        ("value-disables", input.value_disables.as_ref()),
    ];
    for (field, map) in maps {
        let Some(map) = map else {
            continue;
        };
        let Some(choices) = &input.value_choices else {
            errors.push(format!(
                "InputError: \"{id}\" has {field} but no value-choices"
            ));
            continue;
        };
        let declared: BTreeSet<String> = choices.iter().map(choice_key).collect();
        let keyed: BTreeSet<String> = map.keys().cloned().collect();
        if declared != keyed {
            errors.push(format!(
                "InputError: \"{id}\" {field} keys must match its value-choices"
            ));
        }
        for targets in map.values() {
            for target in targets {
                match descriptor.input(target) {
                    None => errors.push(format!(
                        "InputError: \"{id}\" {field} id \"{target}\" not found"
                    )),
                    Some(other) if !other.optional => errors.push(format!(
                        "InputError: \"{id}\" {field} id \"{target}\" must be optional"
                    )),
                    Some(_) => {}
                }
            }
        }
    }
    if let (Some(requires), Some(disables)) = (&input.value_requires, &input.value_disables) {
        for (choice, required) in requires {
            let Some(disabled) = disables.get(choice) else {
                continue;
            };
            for target in required.iter().filter(|target| disabled.contains(target)) {
                errors.push(format!(
                    "InputError: \"{id}\" choice \"{choice}\" requires and disables \"{target}\""
                ));
            }
        }
    }
}

/// Map keys are strings, so compare choices in their string form.
pub(crate) fn choice_key(choice: &serde_json::Value) -> String {
    match choice {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn check_groups(descriptor: &Descriptor, errors: &mut Vec<String>) {
    let groups = &descriptor.groups;
    let optional = |member: &str| descriptor.input(member).map(|input| input.optional);

    for group in groups {
        let gid = &group.id;
        let mut seen = BTreeSet::new();
        for member in &group.members {
            if descriptor.input(member).is_none() {
                errors.push(format!("GroupError: \"{gid}\" member \"{member}\" does not exist"));
            }
            if !seen.insert(member.as_str()) {
                errors.push(format!("GroupError: \"{gid}\" member \"{member}\" appears twice"));
            }
        }

        if group.mutually_exclusive {
            for member in &seen {
                if optional(member) == Some(false) {
                    errors.push(format!(
                        "GroupError: \"{gid}\" is mutually-exclusive and cannot have required members, such as \"{member}\""
                    ));
                }
                let Some(input) = descriptor.input(member) else {
                    continue;
                };
                for required in input.requires_inputs.iter().filter(|r| seen.contains(r.as_str())) {
                    errors.push(format!(
                        "GroupError: \"{gid}\" is mutually-exclusive and cannot have members require one another, such as \"{member}\" and \"{required}\""
                    ));
                }
            }
        }

        if group.one_is_required {
            for member in seen.iter().filter(|m| optional(m) == Some(false)) {
                errors.push(format!(
                    "GroupError: \"{gid}\" is a one-is-required group and contains a required member, \"{member}\""
                ));
            }
        }

        if group.all_or_none {
            if group.one_is_required || group.mutually_exclusive {
                errors.push(format!(
                    "GroupError: \"{gid}\" is an all-or-none group and cannot be paired with one-is-required or mutually-exclusive groups"
                ));
            }
            for member in seen.iter().filter(|m| optional(m) == Some(false)) {
                errors.push(format!(
                    "GroupError: \"{gid}\" is an all-or-none group and contains a required member, \"{member}\""
                ));
            }
        }
    }

    for required in groups.iter().filter(|group| group.one_is_required) {
        for all_or_none in groups.iter().filter(|group| group.all_or_none) {
            if required.id == all_or_none.id || required.members.is_empty() {
                continue;
            }
            let subset = required
                .members
                .iter()
                .all(|member| all_or_none.members.contains(member));
            if subset {
                errors.push(format!(
                    "GroupError: one-is-required group \"{}\" is a subset of all-or-none group \"{}\"",
                    required.id, all_or_none.id
                ));
            }
        }
    }

    for mutex in groups.iter().filter(|group| group.mutually_exclusive) {
        for all_or_none in groups.iter().filter(|group| group.all_or_none) {
            if mutex.id == all_or_none.id {
                continue;
            }
            let shared = mutex
                .members
                .iter()
                .filter(|member| all_or_none.members.contains(member))
                .count();
            if shared >= 2 {
                errors.push(format!(
                    "GroupError: mutually-exclusive group \"{}\" and all-or-none group \"{}\" share two or more members",
                    mutex.id, all_or_none.id
                ));
            }
        }
    }
}

fn check_container(descriptor: &Descriptor, errors: &mut Vec<String>) {
    let Some(container) = &descriptor.container_image else {
        return;
    };
    let (Some(image_scheme), Some(index)) = (scheme_prefix(&container.image), &container.index)
    else {
        return;
    };
    let index_scheme =
        scheme_prefix(index).unwrap_or_else(|| format!("{}://", index.trim_end_matches('/')));
    if image_scheme != index_scheme {
        errors.push(format!(
            "ContainerError: image \"{}\" does not match index \"{index}\"",
            container.image
        ));
    }
}

fn check_tests(descriptor: &Descriptor, errors: &mut Vec<String>) {
    let mut names = BTreeSet::new();
    for test in &descriptor.tests {
        if !names.insert(test.name.as_str()) {
            errors.push(format!("TestError: \"{}\" is non-unique", test.name));
        }
        let mut asserted = BTreeSet::new();
        for assertion in &test.assertions.output_files {
            if descriptor.output(&assertion.id).is_none() {
                errors.push(format!(
                    "TestError: \"{}\" output id \"{}\" not found",
                    test.name, assertion.id
                ));
            }
            if !asserted.insert(assertion.id.as_str()) {
                errors.push(format!(
                    "TestError: \"{}\" output id \"{}\" is asserted twice",
                    test.name, assertion.id
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
