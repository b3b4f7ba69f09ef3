//! Method registry: the dispatchable surface of a target.
//!
//! Rust has no runtime reflection, so the target populates a
//! [`MethodRegistry`] declaratively: one [`MethodEntry`] per dispatchable
//! method, carrying the external name, the parameter descriptors, the
//! cancellation flag, and the invoker. Binding stays data-driven: the
//! overload and async-suffix rules are plain table lookups over the
//! entries.
//!
//! # Registration rules
//!
//! - Multiple entries may share a name (overloads); candidate order for a
//!   name is registration order, deterministic per registry.
//! - Registering an entry whose name *and* parameter-type signature match
//!   an existing entry replaces it. A derived target registers its base's
//!   methods first and then its own, so the most-derived implementation
//!   always wins, whether the base method was overridden or merely
//!   redeclared.
//! - An entry named `FooAsync` is additionally reachable as `Foo`. If a
//!   distinct `Foo` entry exists both are kept, and the exact name wins
//!   at resolution.
//! - A cancellation token is not a visible parameter: entries that want
//!   one set [`MethodEntry::with_cancellation`] and receive the token
//!   through [`Invocation::cancellation`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::cancellation::CancellationToken;
use crate::convert::PayloadCodec;

/// Suffix stripped for the aliasing rule.
const ASYNC_SUFFIX: &str = "Async";

/// A failure raised by a target method.
///
/// `code` is the stringified platform error code that will travel as
/// `error.data.code`; `stack` travels as `error.data.stack`. A canceled
/// handler reports itself with [`MethodError::canceled`] and maps to the
/// request-canceled error response with null data fields.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct MethodError {
    pub message: String,
    pub code: Option<String>,
    pub stack: Option<String>,
    canceled: bool,
}

impl MethodError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            stack: None,
            canceled: false,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Marks the invocation as canceled rather than failed.
    pub fn canceled() -> Self {
        Self {
            message: "request canceled".to_string(),
            code: None,
            stack: None,
            canceled: true,
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }
}

impl From<serde_json::Error> for MethodError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<duorpc_common::DuorpcError> for MethodError {
    fn from(err: duorpc_common::DuorpcError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for MethodError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for MethodError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// The arguments handed to an invoker: bound argument slots (`None`
/// means "omitted, use the default"), the payload codec, and the
/// cancellation token (a never-canceled token for entries that did not
/// opt in).
pub struct Invocation {
    pub(crate) args: Vec<Option<Value>>,
    pub(crate) codec: Arc<PayloadCodec>,
    pub(crate) cancel: CancellationToken,
}

impl Invocation {
    /// Deserializes the argument at `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, MethodError> {
        match self.args.get(index) {
            Some(Some(value)) => Ok(self.codec.decode(value.clone())?),
            Some(None) => Err(MethodError::new(format!(
                "argument {index} was omitted and has no inline default"
            ))),
            None => Err(MethodError::new(format!("no argument at index {index}"))),
        }
    }

    /// Deserializes the argument at `index`, substituting `default` when
    /// the caller omitted it.
    pub fn arg_or<T: DeserializeOwned>(&self, index: usize, default: T) -> Result<T, MethodError> {
        match self.args.get(index) {
            Some(Some(value)) => Ok(self.codec.decode(value.clone())?),
            _ => Ok(default),
        }
    }

    /// The raw bound value at `index`, if the caller supplied one.
    pub fn raw(&self, index: usize) -> Option<&Value> {
        self.args.get(index).and_then(|slot| slot.as_ref())
    }

    /// Number of argument slots (the entry's declared arity).
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// The cancellation token injected by the dispatcher.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Describes one visible parameter: its name (for object params), whether
/// it has a default, the declared Rust type, and a probe that decides if
/// a JSON value can deserialize to that type.
#[derive(Clone)]
pub struct ParamSpec {
    pub(crate) name: String,
    pub(crate) has_default: bool,
    type_name: &'static str,
    probe: Arc<dyn Fn(&Value, &PayloadCodec) -> bool + Send + Sync>,
}

impl ParamSpec {
    /// A required parameter of type `T`.
    pub fn required<T: DeserializeOwned + 'static>(name: &str) -> Self {
        Self {
            name: name.to_string(),
            has_default: false,
            type_name: std::any::type_name::<T>(),
            probe: Arc::new(|value, codec| codec.decode::<T>(value.clone()).is_ok()),
        }
    }

    /// A parameter of type `T` that the caller may omit; the handler
    /// supplies the default through [`Invocation::arg_or`].
    pub fn optional<T: DeserializeOwned + 'static>(name: &str) -> Self {
        Self {
            has_default: true,
            ..Self::required::<T>(name)
        }
    }

    pub(crate) fn accepts(&self, value: &Value, codec: &PayloadCodec) -> bool {
        (self.probe)(value, codec)
    }
}

impl std::fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.name)
            .field("has_default", &self.has_default)
            .finish()
    }
}

pub type MethodFuture = Pin<Box<dyn Future<Output = Result<Value, MethodError>> + Send>>;
pub(crate) type MethodFn = Arc<dyn Fn(Invocation) -> MethodFuture + Send + Sync>;

/// One dispatchable method.
pub struct MethodEntry {
    name: String,
    params: Vec<ParamSpec>,
    accepts_cancellation: bool,
    handler: MethodFn,
}

impl MethodEntry {
    /// Creates an entry with the given external name, parameter
    /// descriptors, and invoker. The invoker runs once per matched
    /// inbound request and may execute concurrently with itself.
    pub fn new<F, Fut>(name: impl Into<String>, params: Vec<ParamSpec>, handler: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            params,
            accepts_cancellation: false,
            handler: Arc::new(move |invocation| Box::pin(handler(invocation))),
        }
    }

    /// Marks the entry as accepting a trailing cancellation token. The
    /// token is supplied by the dispatcher and is not part of the
    /// externally visible arity.
    pub fn with_cancellation(mut self) -> Self {
        self.accepts_cancellation = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn accepts_cancellation(&self) -> bool {
        self.accepts_cancellation
    }

    pub(crate) fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub(crate) fn handler(&self) -> MethodFn {
        self.handler.clone()
    }

    /// The declared parameter types, used to tell an override (same
    /// signature, replaced) from an overload (different signature, kept).
    fn signature(&self) -> Vec<&'static str> {
        self.params.iter().map(|spec| spec.type_name).collect()
    }

    /// The name this entry is additionally reachable under, per the
    /// async-suffix rule.
    fn alias(&self) -> Option<&str> {
        let stripped = self.name.strip_suffix(ASYNC_SUFFIX)?;
        (!stripped.is_empty()).then_some(stripped)
    }
}

impl std::fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodEntry")
            .field("name", &self.name)
            .field("arity", &self.params.len())
            .field("accepts_cancellation", &self.accepts_cancellation)
            .finish()
    }
}

/// The dispatchable method table of one target.
#[derive(Default)]
pub struct MethodRegistry {
    entries: Vec<MethodEntry>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entry, replacing any existing entry with the same
    /// name and parameter-type signature (most-derived implementation
    /// wins). Entries differing in arity or parameter types coexist as
    /// overloads.
    pub fn register(&mut self, entry: MethodEntry) -> &mut Self {
        let slot = self
            .entries
            .iter_mut()
            .find(|existing| existing.name == entry.name && existing.signature() == entry.signature());
        match slot {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries reachable under `method`, exact names first, then
    /// async-suffix aliases, each group in registration order.
    pub(crate) fn candidates(&self, method: &str) -> Vec<&MethodEntry> {
        let exact = self.entries.iter().filter(|entry| entry.name == method);
        let aliased = self
            .entries
            .iter()
            .filter(|entry| entry.alias() == Some(method));
        exact.chain(aliased).collect()
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("entries", &self.entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(name: &str, arity: usize, value: Value) -> MethodEntry {
        let params = (0..arity)
            .map(|i| ParamSpec::required::<Value>(&format!("p{i}")))
            .collect();
        MethodEntry::new(name, params, move |_inv| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    #[test]
    fn test_same_name_same_arity_replaces() {
        let mut registry = MethodRegistry::new();
        registry.register(constant("VirtualBaseMethod", 0, json!("base")));
        registry.register(constant("VirtualBaseMethod", 0, json!("child")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_name_different_arity_overloads() {
        let mut registry = MethodRegistry::new();
        registry.register(constant("Add", 1, json!(1)));
        registry.register(constant("Add", 2, json!(2)));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.candidates("Add").len(), 2);
    }

    #[test]
    fn test_same_arity_different_types_overloads() {
        let mut registry = MethodRegistry::new();
        registry.register(MethodEntry::new(
            "Parse",
            vec![ParamSpec::required::<i64>("n")],
            |_inv| async { Ok(json!("number")) },
        ));
        registry.register(MethodEntry::new(
            "Parse",
            vec![ParamSpec::required::<String>("s")],
            |_inv| async { Ok(json!("string")) },
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_async_suffix_alias() {
        let mut registry = MethodRegistry::new();
        registry.register(constant("FetchAsync", 0, json!(1)));

        assert_eq!(registry.candidates("Fetch").len(), 1);
        assert_eq!(registry.candidates("FetchAsync").len(), 1);
    }

    #[test]
    fn test_exact_name_precedes_alias() {
        let mut registry = MethodRegistry::new();
        registry.register(constant("FetchAsync", 0, json!("async")));
        registry.register(constant("Fetch", 0, json!("exact")));

        let candidates = registry.candidates("Fetch");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name(), "Fetch");
        assert_eq!(candidates[1].name(), "FetchAsync");
    }

    #[test]
    fn test_bare_async_is_not_aliased_to_empty() {
        let mut registry = MethodRegistry::new();
        registry.register(constant("Async", 0, json!(1)));
        assert!(registry.candidates("").is_empty());
    }

    #[test]
    fn test_candidate_order_is_registration_order() {
        let mut registry = MethodRegistry::new();
        registry.register(constant("M", 1, json!("first")));
        registry.register(constant("M", 2, json!("second")));

        let candidates = registry.candidates("M");
        assert_eq!(candidates[0].arity(), 1);
        assert_eq!(candidates[1].arity(), 2);
    }
}
