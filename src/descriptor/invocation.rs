use super::Descriptor;
use crate::error::LoadError;
use crate::util::load_json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Concrete input values for one run, keyed by input id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Invocation(Map<String, Value>);

impl Invocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an invocation from a file path or an inline JSON object.
    pub fn load(input: &str) -> Result<Self, LoadError> {
        let value = load_json(input)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, LoadError> {
        serde_json::from_value(value).map_err(|source| LoadError::Shape {
            what: "invocation",
            source,
        })
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.0.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    pub fn insert(&mut self, id: impl Into<String>, value: Value) {
        self.0.insert(id.into(), value);
    }

    pub fn remove(&mut self, id: &str) -> Option<Value> {
        self.0.remove(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Whether `id` counts as "set": present, and `true` when it is a flag.
    pub fn is_active(&self, descriptor: &Descriptor, id: &str) -> bool {
        match self.0.get(id) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(value)) if descriptor.is_flag(id) => *value,
            Some(_) => true,
        }
    }

    /// Fill absent inputs that declare a `default-value`.
    pub fn with_defaults(mut self, descriptor: &Descriptor) -> Self {
        for input in &descriptor.inputs {
            let Some(default) = input.default_value.as_ref() else {
                continue;
            };
            let absent = matches!(self.0.get(&input.id), None | Some(Value::Null));
            if absent {
                self.0.insert(input.id.clone(), default.clone());
            }
        }
        self
    }

    /// Reorder entries to follow the descriptor's input order; unknown ids
    /// keep their relative order at the end.
    pub fn sorted_by_inputs(&self, descriptor: &Descriptor) -> Self {
        let mut sorted = Map::new();
        for input in &descriptor.inputs {
            if let Some(value) = self.0.get(&input.id) {
                sorted.insert(input.id.clone(), value.clone());
            }
        }
        for (id, value) in &self.0 {
            if !sorted.contains_key(id) {
                sorted.insert(id.clone(), value.clone());
            }
        }
        Self(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> Descriptor {
        Descriptor::from_value(json!({
            "name": "tool",
            "command-line": "tool [A] [B] [F]",
            "inputs": [
                {"id": "a", "type": "String", "value-key": "[A]", "default-value": "x"},
                {"id": "b", "type": "Number", "value-key": "[B]", "optional": true,
                 "default-value": 3},
                {"id": "f", "type": "Flag", "value-key": "[F]", "optional": true,
                 "command-line-flag": "-f"}
            ]
        }))
        .expect("descriptor")
    }

    #[test]
    fn defaults_fill_only_absent_inputs() {
        let descriptor = descriptor();
        let invocation = Invocation::from_value(json!({"a": "given"}))
            .expect("invocation")
            .with_defaults(&descriptor);
        assert_eq!(invocation.get("a"), Some(&json!("given")));
        assert_eq!(invocation.get("b"), Some(&json!(3)));
        assert!(!invocation.contains("f"));
    }

    #[test]
    fn false_flags_are_not_active() {
        let descriptor = descriptor();
        let invocation =
            Invocation::from_value(json!({"f": false, "b": 0})).expect("invocation");
        assert!(!invocation.is_active(&descriptor, "f"));
        assert!(invocation.is_active(&descriptor, "b"));
        assert!(!invocation.is_active(&descriptor, "a"));
    }

    #[test]
    fn sorting_follows_descriptor_order() {
        let descriptor = descriptor();
        let invocation =
            Invocation::from_value(json!({"zzz": 1, "f": true, "a": "v"})).expect("invocation");
        let ids: Vec<_> = invocation
            .sorted_by_inputs(&descriptor)
            .iter()
            .map(|(id, _)| id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "f", "zzz"]);
    }

    #[test]
    fn rejects_non_object_documents() {
        let err = Invocation::from_value(json!([1, 2])).expect_err("array");
        assert!(err.to_string().contains("invocation"), "{err}");
    }
}
