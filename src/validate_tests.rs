use super::*;
use serde_json::{json, Value};

fn base() -> Value {
    json!({
        "name": "tool",
        "command-line": "tool [IN] [NUM] [MODE] [X]",
        "inputs": [
            {"id": "in", "type": "File", "value-key": "[IN]"},
            {"id": "num", "type": "Number", "value-key": "[NUM]", "optional": true,
             "minimum": 0, "maximum": 10},
            {"id": "mode", "type": "String", "value-key": "[MODE]", "optional": true,
             "value-choices": ["fast", "slow"]},
            {"id": "x", "type": "Flag", "value-key": "[X]", "optional": true,
             "command-line-flag": "-x"}
        ],
        "output-files": [
            {"id": "out", "path-template": "[IN]_out.txt"}
        ]
    })
}

fn errors_for(value: Value) -> Vec<String> {
    let descriptor = Descriptor::from_value(value).expect("descriptor");
    violations(&descriptor)
}

fn has(errors: &[String], needle: &str) -> bool {
    errors.iter().any(|error| error.contains(needle))
}

#[test]
fn valid_descriptor_passes() {
    let descriptor = Descriptor::from_value(base()).expect("descriptor");
    assert!(validate(&descriptor).is_ok(), "{:?}", violations(&descriptor));
}

#[test]
fn uncovered_value_key_is_rejected() {
    let mut value = base();
    value["command-line"] = json!("tool [IN] [NUM] [MODE]");
    let errors = errors_for(value);
    assert!(has(&errors, "KeyError: \"[X]\" not in command-line"), "{errors:?}");
}

#[test]
fn environment_variables_cover_keys() {
    let mut value = base();
    value["command-line"] = json!("tool [IN] [NUM] [MODE]");
    value["environment-variables"] = json!([{"name": "X", "value": "[X]"}]);
    assert!(errors_for(value).is_empty());
}

#[test]
fn key_containing_another_key_is_rejected() {
    let mut value = base();
    value["inputs"][1]["value-key"] = json!("[IN]2");
    value["command-line"] = json!("tool [IN] [IN]2 [MODE] [X]");
    let errors = errors_for(value);
    assert!(has(&errors, "KeyError: \"[IN]2\" contains \"[IN]\""), "{errors:?}");
}

#[test]
fn ids_must_be_unique_across_sections() {
    let mut value = base();
    value["groups"] = json!([{"id": "out", "members": ["num"]}]);
    let errors = errors_for(value);
    assert!(has(&errors, "IdError: \"out\" is non-unique"), "{errors:?}");
}

#[test]
fn shared_value_key_needs_a_mutex_group() {
    let mut value = base();
    value["inputs"][2]["value-key"] = json!("[NUM]");
    value["command-line"] = json!("tool [IN] [NUM] [X]");
    let errors = errors_for(value.clone());
    assert!(has(&errors, "MutExError: \"[NUM]\""), "{errors:?}");

    value["groups"] = json!([{"id": "g", "members": ["num", "mode"], "mutually-exclusive": true}]);
    assert!(errors_for(value).is_empty());
}

#[test]
fn flag_rules_are_enforced() {
    let mut value = base();
    value["inputs"][3] = json!({"id": "x", "type": "Flag", "value-key": "[X]"});
    let errors = errors_for(value);
    assert!(has(&errors, "\"x\" must have a command-line flag"), "{errors:?}");
    assert!(has(&errors, "\"x\" should not be required"), "{errors:?}");
}

#[test]
fn number_and_list_bounds_are_checked() {
    let mut value = base();
    value["inputs"][1]["minimum"] = json!(20);
    value["inputs"][2]["list"] = json!(true);
    value["inputs"][2]["min-list-entries"] = json!(3);
    value["inputs"][2]["max-list-entries"] = json!(0);
    let errors = errors_for(value);
    assert!(has(&errors, "greater min (20) than max (10)"), "{errors:?}");
    assert!(has(&errors, "greater min entries (3) than max entries (0)"), "{errors:?}");
    assert!(has(&errors, "non-positive max entries (0)"), "{errors:?}");
}

#[test]
fn defaults_must_be_among_choices() {
    let mut value = base();
    value["inputs"][2]["default-value"] = json!("medium");
    let errors = errors_for(value);
    assert!(has(&errors, "default value outside its choices"), "{errors:?}");
}

#[test]
fn requires_and_disables_are_cross_checked() {
    let mut value = base();
    value["inputs"][1]["requires-inputs"] = json!(["x", "ghost"]);
    value["inputs"][1]["disables-inputs"] = json!(["x", "in"]);
    value["inputs"][0]["requires-inputs"] = json!(["num"]);
    let errors = errors_for(value);
    assert!(has(&errors, "\"num\" required id \"ghost\" not found"), "{errors:?}");
    assert!(has(&errors, "\"num\" requires and disables \"x\""), "{errors:?}");
    assert!(has(&errors, "\"num\" disables \"in\" which is required"), "{errors:?}");
    assert!(has(&errors, "\"in\" cannot require or disable other inputs"), "{errors:?}");
}

#[test]
fn value_dependencies_must_match_choices() {
    let mut value = base();
    value["inputs"][2]["value-requires"] = json!({"fast": ["x"]});
    value["inputs"][2]["value-disables"] = json!({"fast": ["x"], "slow": []});
    let errors = errors_for(value);
    assert!(has(&errors, "value-requires keys must match"), "{errors:?}");
    assert!(has(&errors, "choice \"fast\" requires and disables \"x\""), "{errors:?}");
}

#[test]
fn group_rules_are_enforced() {
    let mut value = base();
    value["inputs"][1]["requires-inputs"] = json!(["x"]);
    value["groups"] = json!([
        {"id": "mutex", "members": ["in", "num", "x"], "mutually-exclusive": true},
        {"id": "both", "members": ["mode", "mode"], "all-or-none": true, "one-is-required": true}
    ]);
    let errors = errors_for(value);
    assert!(has(&errors, "cannot have required members, such as \"in\""), "{errors:?}");
    assert!(has(&errors, "require one another, such as \"num\" and \"x\""), "{errors:?}");
    assert!(has(&errors, "member \"mode\" appears twice"), "{errors:?}");
    assert!(has(&errors, "cannot be paired with one-is-required"), "{errors:?}");
}

#[test]
fn overlapping_groups_are_allowed() {
    let mut value = base();
    value["groups"] = json!([
        {"id": "pick", "members": ["num", "mode"], "mutually-exclusive": true},
        {"id": "need", "members": ["num", "mode"], "one-is-required": true}
    ]);
    let errors = errors_for(value.clone());
    assert!(errors.is_empty(), "{errors:?}");

    value["groups"] = json!([
        {"id": "pair", "members": ["num", "mode"], "all-or-none": true},
        {"id": "pick", "members": ["num", "mode", "x"], "mutually-exclusive": true}
    ]);
    let errors = errors_for(value);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(has(&errors, "\"pair\""), "{errors:?}");
}

#[test]
fn bare_and_or_terms_must_be_flags() {
    let mut value = base();
    value["output-files"] = json!([{
        "id": "out",
        "conditional-path-template": [
            {"mode and num": "a.txt"},
            {"num": "b.txt"},
            {"x and (num > 2)": "c.txt"},
            {"default": "d.txt"}
        ]
    }]);
    let errors = errors_for(value);
    assert!(has(&errors, "\"mode\" is a String"), "{errors:?}");
    assert!(has(&errors, "\"num\" is a Number"), "{errors:?}");
    assert!(!has(&errors, "x and (num > 2)"), "{errors:?}");
    assert_eq!(errors.len(), 2, "{errors:?}");
}

#[test]
fn conditional_paths_are_type_checked() {
    let mut value = base();
    value["output-files"] = json!([{
        "id": "out",
        "conditional-path-template": [
            {"num > 2": "big.txt"},
            {"x and (num == \"1\")": "bad.txt"},
            {"unknown": "ghost.txt"}
        ]
    }]);
    let errors = errors_for(value);
    assert!(has(&errors, "needs a default"), "{errors:?}");
    assert!(has(&errors, "cannot compare Number == String"), "{errors:?}");
    assert!(has(&errors, "non-ID string: \"unknown\""), "{errors:?}");
    assert!(!has(&errors, "num > 2\""), "{errors:?}");
}

#[test]
fn duplicate_defaults_and_paths_are_rejected() {
    let mut value = base();
    value["output-files"] = json!([
        {"id": "a", "path-template": "same.txt"},
        {"id": "b", "path-template": "same.txt"},
        {"id": "c", "conditional-path-template": [{"default": "x"}, {"default": "y"}]}
    ]);
    let errors = errors_for(value);
    assert!(has(&errors, "\"a\" and \"b\" have the same path-template"), "{errors:?}");
    assert!(has(&errors, "\"c\" has more than one default"), "{errors:?}");
}

#[test]
fn container_index_must_match_image_scheme() {
    let mut value = base();
    value["container-image"] = json!({
        "type": "singularity", "image": "docker://org/tool:1", "index": "shub://"
    });
    let errors = errors_for(value.clone());
    assert!(has(&errors, "ContainerError"), "{errors:?}");

    value["container-image"]["index"] = json!("docker://");
    assert!(errors_for(value).is_empty());
}

#[test]
fn only_a_leading_scheme_is_compared_with_the_index() {
    let mut value = base();
    value["container-image"] = json!({
        "type": "singularity", "image": "org/tool:1?mirror=http://host", "index": "shub://"
    });
    let errors = errors_for(value);
    assert!(!has(&errors, "ContainerError"), "{errors:?}");
}

#[test]
fn test_declarations_are_checked() {
    let mut value = base();
    value["tests"] = json!([
        {"name": "t", "invocation": {"in": "a"}, "assertions": {
            "output-files": [{"id": "nope"}, {"id": "out"}, {"id": "out"}]}},
        {"name": "t", "invocation": {"in": "a"}, "assertions": {"exit-code": 0}}
    ]);
    let errors = errors_for(value);
    assert!(has(&errors, "TestError: \"t\" is non-unique"), "{errors:?}");
    assert!(has(&errors, "output id \"nope\" not found"), "{errors:?}");
    assert!(has(&errors, "output id \"out\" is asserted twice"), "{errors:?}");
}

#[test]
fn every_violation_is_reported_together() {
    let mut value = base();
    value["command-line"] = json!("tool");
    value["inputs"][3]["optional"] = json!(false);
    let descriptor = Descriptor::from_value(value).expect("descriptor");
    let err = validate(&descriptor).expect_err("invalid");
    // [IN] is still covered by the output path-template.
    assert_eq!(err.errors.len(), 4, "{err}");
}

#[test]
fn format_output_rewrites_the_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("tool.json");
    let descriptor = Descriptor::from_value(base()).expect("descriptor");
    format_output(&path, &descriptor).expect("format");
    let reloaded = Descriptor::from_path(&path).expect("reload");
    assert_eq!(reloaded.inputs.len(), 4);
}
