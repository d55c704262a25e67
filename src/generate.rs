//! Random invocations that honour every descriptor constraint.
//!
//! Required inputs are seeded first, then every one-is-required group gets a
//! member whose requirement closure can be filled, then (for complete
//! invocations) every remaining optional input is tried once in random order.
//! The result is always checked against the compiled invocation schema.

use crate::descriptor::{Descriptor, Input, InputType, Invocation};
use crate::error::GenerateError;
use crate::invocation_schema::validate_invocation;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Number, Value};
use tracing::debug;

mod graph;

pub use graph::ConstraintGraph;

/// Half-width of the range used for unbounded numbers.
pub const DEFAULT_RANGE: f64 = 50.0;
pub const DECIMALS: i32 = 3;
pub const EPSILON: f64 = 1e-3;
pub const DEFAULT_LIST_MIN: i64 = 2;
pub const DEFAULT_LIST_MAX: i64 = 5;
pub const TOKEN_CHARS: usize = 2;
/// Upper bound on member picks for one one-is-required group.
pub const GROUP_ATTEMPTS: usize = 100;

const FILE_EXTENSIONS: [&str; 8] = [".csv", ".tex", ".j", ".cpp", ".m", ".mnc", ".nii.gz", ""];

/// Generate a valid invocation using the thread-local generator.
pub fn generate_random(descriptor: &Descriptor, complete: bool) -> Result<Invocation, GenerateError> {
    generate(descriptor, complete, &mut rand::thread_rng())
}

pub fn generate<R: Rng>(
    descriptor: &Descriptor,
    complete: bool,
    rng: &mut R,
) -> Result<Invocation, GenerateError> {
    let graph = ConstraintGraph::new(descriptor);
    let mut invocation = Invocation::new();

    for input in descriptor.inputs.iter().filter(|input| !input.optional) {
        if invocation.contains(&input.id) {
            continue;
        }
        let mut placed = false;
        for _ in 0..GROUP_ATTEMPTS {
            let proposal = propose(descriptor, rng);
            if let Some(closure) = graph.closure(&input.id, &invocation, &proposal) {
                apply(&mut invocation, &closure, &proposal);
                placed = true;
                break;
            }
        }
        if !placed {
            // Still required; the final schema check reports the conflict.
            invocation.insert(input.id.clone(), random_value(input, rng));
        }
    }

    for group in descriptor.groups.iter().filter(|group| group.one_is_required) {
        if group
            .members
            .iter()
            .any(|member| invocation.is_active(descriptor, member))
        {
            continue;
        }
        let mut satisfied = false;
        for _ in 0..GROUP_ATTEMPTS {
            let Some(member) = group.members.choose(rng) else {
                break;
            };
            let proposal = propose(descriptor, rng);
            if let Some(closure) = graph.closure(member, &invocation, &proposal) {
                debug!(group = %group.id, member = %member, filled = closure.len(), "one-is-required member chosen");
                apply(&mut invocation, &closure, &proposal);
                satisfied = true;
                break;
            }
        }
        if !satisfied {
            return Err(GenerateError::UnsatisfiableGroup {
                group: group.id.clone(),
                attempts: GROUP_ATTEMPTS,
            });
        }
    }

    if complete {
        let mut candidates: Vec<&Input> = descriptor
            .inputs
            .iter()
            .filter(|input| input.optional)
            .collect();
        candidates.shuffle(rng);
        for input in candidates {
            if invocation.contains(&input.id) {
                continue;
            }
            let proposal = propose(descriptor, rng);
            match graph.closure(&input.id, &invocation, &proposal) {
                Some(closure) => apply(&mut invocation, &closure, &proposal),
                None => debug!(input = %input.id, "skipped: requirement closure not satisfiable"),
            }
        }
    }

    let invocation = invocation.sorted_by_inputs(descriptor);
    validate_invocation(descriptor, &invocation)?;
    Ok(invocation)
}

fn propose<R: Rng>(descriptor: &Descriptor, rng: &mut R) -> Invocation {
    let mut proposal = Invocation::new();
    for input in &descriptor.inputs {
        proposal.insert(input.id.clone(), random_value(input, rng));
    }
    proposal
}

fn apply(invocation: &mut Invocation, closure: &[&str], proposal: &Invocation) {
    for id in closure {
        if let Some(value) = proposal.get(id) {
            invocation.insert(*id, value.clone());
        }
    }
}

/// A random value for `input` honouring its type, bounds, choices and list
/// cardinality.
pub fn random_value<R: Rng>(input: &Input, rng: &mut R) -> Value {
    if input.is_flag() {
        return Value::Bool(true);
    }
    if !input.list {
        return random_scalar(input, rng);
    }
    let high = input
        .max_list_entries
        .unwrap_or_else(|| DEFAULT_LIST_MAX.max(input.min_list_entries.unwrap_or(0)))
        .max(0);
    let low = input
        .min_list_entries
        .unwrap_or(DEFAULT_LIST_MIN)
        .clamp(0, high);
    let len = rng.gen_range(low..=high);
    Value::Array((0..len).map(|_| random_scalar(input, rng)).collect())
}

fn random_scalar<R: Rng>(input: &Input, rng: &mut R) -> Value {
    if let Some(choice) = input.value_choices.as_ref().and_then(|c| c.choose(rng)) {
        return choice.clone();
    }
    match input.kind {
        InputType::Number => random_number(input, rng),
        InputType::String => json!(format!("str_{}_{}", input.id, token(rng))),
        InputType::File => {
            let digits: String = (0..TOKEN_CHARS)
                .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
                .collect();
            let extension = FILE_EXTENSIONS.choose(rng).copied().unwrap_or_default();
            json!(format!("f_{}_{digits}{extension}", input.id))
        }
        InputType::Flag => Value::Bool(true),
    }
}

fn token<R: Rng>(rng: &mut R) -> String {
    (0..TOKEN_CHARS)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

fn random_number<R: Rng>(input: &Input, rng: &mut R) -> Value {
    let (mut low, mut high) = match (input.minimum(), input.maximum()) {
        (Some(min), Some(max)) => (min, max),
        (Some(min), None) => (min, min + DEFAULT_RANGE),
        (None, Some(max)) => (max - DEFAULT_RANGE, max),
        (None, None) => (-DEFAULT_RANGE, DEFAULT_RANGE),
    };
    let step = if input.integer { 1.0 } else { EPSILON };
    if input.exclusive_minimum && input.minimum.is_some() {
        low += step;
    }
    if input.exclusive_maximum && input.maximum.is_some() {
        high -= step;
    }

    if input.integer {
        let low = low.ceil() as i64;
        let high = high.floor() as i64;
        let value = if low >= high {
            low
        } else {
            rng.gen_range(low..=high)
        };
        return json!(value);
    }

    let value = if low >= high {
        low
    } else {
        let scale = 10f64.powi(DECIMALS);
        let drawn: f64 = rng.gen_range(low..=high);
        ((drawn * scale).round() / scale).clamp(low, high)
    };
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}
