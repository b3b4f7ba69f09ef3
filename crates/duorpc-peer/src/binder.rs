//! Argument binder: matches a params value against method candidates.
//!
//! Given an external name and the request's params (absent, `null`, an
//! array, or an object), the binder walks the registry candidates in
//! order and selects the first one whose arguments all pass their
//! deserialization probes. Rules:
//!
//! - Array params bind positionally; trailing defaulted parameters may be
//!   omitted; a probe failure disqualifies the candidate.
//! - Object params bind by name; missing properties require defaults;
//!   properties matching no parameter are ignored.
//! - Absent or `null` params are treated as the single-element list
//!   `[null]` for candidates that can accept exactly one argument, which
//!   makes `null` arguments reachable without wrapping. Candidates with
//!   no such arity (zero-arity ones included) are rejected.
//!
//! No surviving candidate means method-not-found.

use serde_json::Value;

use crate::convert::PayloadCodec;
use crate::registry::{MethodEntry, MethodRegistry, ParamSpec};

/// Bound argument slots: `None` marks an omitted, defaulted parameter.
pub type BoundArgs = Vec<Option<Value>>;

/// Selects the first candidate for `method` that binds against `params`.
pub fn bind<'r>(
    registry: &'r MethodRegistry,
    codec: &PayloadCodec,
    method: &str,
    params: Option<&Value>,
) -> Option<(&'r MethodEntry, BoundArgs)> {
    registry
        .candidates(method)
        .into_iter()
        .find_map(|entry| try_bind(entry, codec, params).map(|args| (entry, args)))
}

fn try_bind(entry: &MethodEntry, codec: &PayloadCodec, params: Option<&Value>) -> Option<BoundArgs> {
    match params {
        None | Some(Value::Null) => bind_positional(entry.params(), codec, &[Value::Null]),
        Some(Value::Array(items)) => bind_positional(entry.params(), codec, items),
        Some(Value::Object(map)) => bind_named(entry.params(), codec, map),
        // Scalar params are not a valid JSON-RPC shape for any candidate.
        Some(_) => None,
    }
}

fn bind_positional(specs: &[ParamSpec], codec: &PayloadCodec, items: &[Value]) -> Option<BoundArgs> {
    if items.len() > specs.len() {
        return None;
    }
    // Only trailing defaulted parameters may be omitted.
    let required = specs
        .iter()
        .rposition(|spec| !spec.has_default)
        .map_or(0, |index| index + 1);
    if items.len() < required {
        return None;
    }

    let mut args = Vec::with_capacity(specs.len());
    for (index, spec) in specs.iter().enumerate() {
        match items.get(index) {
            Some(value) => {
                if !spec.accepts(value, codec) {
                    return None;
                }
                args.push(Some(value.clone()));
            }
            None => args.push(None),
        }
    }
    Some(args)
}

fn bind_named(
    specs: &[ParamSpec],
    codec: &PayloadCodec,
    map: &serde_json::Map<String, Value>,
) -> Option<BoundArgs> {
    let mut args = Vec::with_capacity(specs.len());
    for spec in specs {
        match map.get(&spec.name) {
            Some(value) => {
                if !spec.accepts(value, codec) {
                    return None;
                }
                args.push(Some(value.clone()));
            }
            None if spec.has_default => args.push(None),
            None => return None,
        }
    }
    Some(args)
}
