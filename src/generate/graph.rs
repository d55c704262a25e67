//! Requires/disables graph over input and group ids.
//!
//! Edges come from `requires-inputs`, all-or-none partners (which require each
//! other), `disables-inputs` and mutually-exclusive partners (which disable
//! each other). Choice-dependent edges (`value-requires`/`value-disables`)
//! are resolved against the value proposed for the node.

use crate::descriptor::{Descriptor, Invocation};
use crate::validate::choice_key;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub struct ConstraintGraph<'a> {
    descriptor: &'a Descriptor,
    requires: BTreeMap<&'a str, Vec<&'a str>>,
    disables: BTreeMap<&'a str, BTreeSet<&'a str>>,
}

impl<'a> ConstraintGraph<'a> {
    pub fn new(descriptor: &'a Descriptor) -> Self {
        let mut requires: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut disables: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for input in &descriptor.inputs {
            requires
                .entry(&input.id)
                .or_default()
                .extend(input.requires_inputs.iter().map(String::as_str));
            disables
                .entry(&input.id)
                .or_default()
                .extend(input.disables_inputs.iter().map(String::as_str));
        }
        for group in &descriptor.groups {
            for member in &group.members {
                let partners = group
                    .members
                    .iter()
                    .filter(|other| *other != member)
                    .map(String::as_str);
                if group.all_or_none {
                    requires.entry(member).or_default().extend(partners.clone());
                }
                if group.mutually_exclusive {
                    disables.entry(member).or_default().extend(partners);
                }
            }
        }
        Self {
            descriptor,
            requires,
            disables,
        }
    }

    fn value_edges(
        &self,
        id: &str,
        value: Option<&Value>,
        pick: fn(&'a crate::descriptor::Input) -> Option<&'a BTreeMap<String, Vec<String>>>,
    ) -> Vec<&'a str> {
        let (Some(input), Some(value)) = (self.descriptor.input(id), value) else {
            return Vec::new();
        };
        let Some(map) = pick(input) else {
            return Vec::new();
        };
        let chosen: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        chosen
            .into_iter()
            .filter_map(|choice| map.get(&choice_key(choice)))
            .flatten()
            .map(String::as_str)
            .collect()
    }

    /// Ids that must be filled alongside `id` holding `value`.
    pub fn requires_of(&self, id: &str, value: Option<&Value>) -> Vec<&'a str> {
        let mut out = self.requires.get(id).cloned().unwrap_or_default();
        out.extend(self.value_edges(id, value, |input| input.value_requires.as_ref()));
        out
    }

    /// Ids that must stay unset while `id` holds `value`.
    pub fn disables_of(&self, id: &str, value: Option<&Value>) -> BTreeSet<&'a str> {
        let mut out = self.disables.get(id).cloned().unwrap_or_default();
        out.extend(self.value_edges(id, value, |input| input.value_disables.as_ref()));
        out
    }

    /// Ids disabled by what is already set in `filled`.
    pub fn blocked(&self, filled: &Invocation) -> BTreeSet<&'a str> {
        filled
            .iter()
            .filter(|(id, _)| filled.is_active(self.descriptor, id))
            .flat_map(|(id, value)| self.disables_of(id, Some(value)))
            .collect()
    }

    /// Breadth-first requirement closure of `start` given what is already
    /// set in `filled` and the candidate values in `proposal`.
    ///
    /// Returns the ids that must be set together (possibly empty when
    /// `start` is already active), or `None` when any of them cannot be
    /// filled. Nothing is mutated; callers apply the result as a whole.
    pub fn closure(
        &self,
        start: &'a str,
        filled: &Invocation,
        proposal: &Invocation,
    ) -> Option<Vec<&'a str>> {
        let descriptor = self.descriptor;
        let blocked = self.blocked(filled);
        let mut queue = VecDeque::from([start]);
        let mut seen = BTreeSet::new();
        let mut members: Vec<&'a str> = Vec::new();

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(group) = descriptor.group(id) {
                // Requiring a group means requiring one of its members.
                let satisfied = group.members.iter().any(|member| {
                    filled.is_active(descriptor, member) || members.contains(&member.as_str())
                });
                if satisfied {
                    continue;
                }
                let candidate = group.members.iter().map(String::as_str).find(|member| {
                    !blocked.contains(member) && !seen.contains(member)
                });
                queue.push_back(candidate?);
                continue;
            }
            if filled.is_active(descriptor, id) {
                continue;
            }
            if descriptor.input(id).is_none() || blocked.contains(id) {
                return None;
            }
            members.push(id);
            queue.extend(self.requires_of(id, proposal.get(id)));
        }

        for id in &members {
            let conflict = self
                .disables_of(id, proposal.get(id))
                .into_iter()
                .any(|target| members.contains(&target) || filled.is_active(descriptor, target));
            if conflict {
                return None;
            }
        }
        Some(members)
    }
}
