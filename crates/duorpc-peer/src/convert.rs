//! Serializer facade with an installable converter chain.
//!
//! [`PayloadCodec`] wraps `serde_json` with an ordered set of
//! [`ValueConverter`]s. Converters apply only to payload values: method
//! parameters, return values, and error `data`. They are never applied to
//! the envelope (`method`, `id`, `jsonrpc`) or to the array/object shape
//! of `params`. The peer serializes the envelope with plain serde and
//! splices converted payload values in, so envelope immunity holds by
//! construction rather than by discipline.
//!
//! Converters are shared for the lifetime of the peer and must be
//! thread-safe.

use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use duorpc_common::Result;

/// A bidirectional payload transformation.
///
/// `to_wire` runs on values about to be spliced into an outbound frame;
/// `from_wire` runs on values extracted from an inbound frame before
/// deserialization. A converter receives whole payload values and is
/// responsible for its own recursion into nested structures.
pub trait ValueConverter: Send + Sync {
    fn to_wire(&self, value: Value) -> Value;
    fn from_wire(&self, value: Value) -> Value;
}

/// The converter registry plus typed encode/decode helpers.
#[derive(Default)]
pub struct PayloadCodec {
    converters: RwLock<Vec<Arc<dyn ValueConverter>>>,
}

impl PayloadCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a converter to the chain. Chain order is install order:
    /// `to_wire` runs first-installed-first, `from_wire` in reverse.
    pub fn install(&self, converter: Arc<dyn ValueConverter>) {
        self.converters.write().unwrap().push(converter);
    }

    /// Number of installed converters.
    pub fn len(&self) -> usize {
        self.converters.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the outbound converter chain over a payload value.
    pub fn apply_to_wire(&self, value: Value) -> Value {
        let converters = self.converters.read().unwrap();
        converters
            .iter()
            .fold(value, |value, converter| converter.to_wire(value))
    }

    /// Runs the inbound converter chain over a payload value.
    pub fn apply_from_wire(&self, value: Value) -> Value {
        let converters = self.converters.read().unwrap();
        converters
            .iter()
            .rev()
            .fold(value, |value, converter| converter.from_wire(value))
    }

    /// Serializes a payload value and runs it through the outbound chain.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Value> {
        Ok(self.apply_to_wire(serde_json::to_value(value)?))
    }

    /// Runs a payload value through the inbound chain and deserializes it.
    pub fn decode<T: DeserializeOwned>(&self, value: Value) -> Result<T> {
        Ok(serde_json::from_value(self.apply_from_wire(value))?)
    }

    /// Serializes a params value, applying converters element-wise for
    /// positional params and property-wise for named params so the
    /// array/object shape itself stays untouched.
    pub fn encode_params<P: Serialize + ?Sized>(&self, params: &P) -> Result<Value> {
        let value = serde_json::to_value(params)?;
        Ok(match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.apply_to_wire(item))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, item)| (key, self.apply_to_wire(item)))
                    .collect(),
            ),
            other => self.apply_to_wire(other),
        })
    }
}
