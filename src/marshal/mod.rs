//! Conversion of raw script results into canonical JSON.
//!
//! Values are classified in a fixed order: strings, integers, doubles,
//! booleans, null/undefined, then objects. Objects are split by the kind the
//! host reports; sequences are read back one index at a time and plain
//! objects one property at a time, each through a helper script. Anything
//! else dispatchable is registered as an element and emitted as a handle.

pub mod array_like;

pub use array_like::{ArrayLikeDetection, LENGTH_HEURISTIC_SCRIPT};

use std::fmt;

use serde_json::{Map, Number, Value};

use crate::elements::ElementRegistry;
use crate::execution::fault::{ScriptFault, ScriptResult};
use crate::execution::invoker::ScriptInvoker;
use crate::host::{HostValue, ObjectKind, ScriptHost};

pub const LENGTH_SCRIPT: &str =
    "(function() { return function(){\nreturn arguments[0].length;\n};})();";
pub const ITEM_SCRIPT: &str =
    "(function() { return function(){\nreturn arguments[0][arguments[1]];\n};})();";

pub const DEFAULT_MAX_DEPTH: usize = 100;
pub const DEFAULT_MAX_SEQUENCE_LENGTH: i64 = 100_000;

/// Items reserved up front; the rest grows on demand.
const PREALLOCATED_ITEMS: i64 = 1024;

/// Knobs of the marshaller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarshalOptions {
    pub max_depth: usize,
    /// Longest sequence read back item by item. The length comes from the
    /// page, so anything above this is refused instead of walked.
    pub max_sequence_length: i64,
    pub array_like: ArrayLikeDetection,
}

impl Default for MarshalOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_sequence_length: DEFAULT_MAX_SEQUENCE_LENGTH,
            array_like: ArrayLikeDetection::default(),
        }
    }
}

/// Converts host values to JSON, registering every element it meets.
pub struct ResultMarshaller<'r, O> {
    invoker: ScriptInvoker,
    registry: &'r mut ElementRegistry<O>,
    options: MarshalOptions,
    visiting: Vec<u64>,
}

impl<'r, O: Clone + fmt::Debug> ResultMarshaller<'r, O> {
    pub fn new(registry: &'r mut ElementRegistry<O>, options: MarshalOptions) -> Self {
        Self {
            invoker: ScriptInvoker::new(),
            registry,
            options,
            visiting: Vec::new(),
        }
    }

    pub fn to_json<H>(&mut self, host: &mut H, value: HostValue<O>) -> ScriptResult<Value>
    where
        H: ScriptHost<Object = O>,
    {
        self.visiting.clear();
        self.marshal(host, value)
    }

    fn marshal<H>(&mut self, host: &mut H, value: HostValue<O>) -> ScriptResult<Value>
    where
        H: ScriptHost<Object = O>,
    {
        match value {
            HostValue::String(text) => Ok(Value::String(text)),
            HostValue::Integer(number) => Ok(Value::Number(number.into())),
            // JSON has no spelling for NaN or the infinities.
            HostValue::Double(number) => Ok(Number::from_f64(number)
                .map(Value::Number)
                .unwrap_or(Value::Null)),
            HostValue::Boolean(flag) => Ok(Value::Bool(flag)),
            HostValue::Null | HostValue::Undefined => Ok(Value::Null),
            HostValue::Object(object) => self.marshal_object(host, object),
            HostValue::Unsupported(description) => Err(ScriptFault::UnknownResult(description)),
        }
    }

    fn marshal_object<H>(&mut self, host: &mut H, object: O) -> ScriptResult<Value>
    where
        H: ScriptHost<Object = O>,
    {
        let kind = host
            .object_kind(&object)
            .map_err(ScriptFault::from_inspection)?;

        match kind {
            ObjectKind::Array | ObjectKind::ElementCollection => {
                self.nested(host, &object, |this, host| this.marshal_sequence(host, &object))
            }
            ObjectKind::ScriptObject => {
                let sequence =
                    self.options
                        .array_like
                        .is_array_like(&self.invoker, host, &object)?;
                self.nested(host, &object, |this, host| {
                    if sequence {
                        this.marshal_sequence(host, &object)
                    } else {
                        this.marshal_properties(host, &object)
                    }
                })
            }
            ObjectKind::Element | ObjectKind::Dispatchable(_) => {
                let handle = self.registry.register(object, host.document_id());
                log::trace!("marshalled element as {}", handle.token());
                Ok(handle.to_json())
            }
        }
    }

    /// Run `body` with `object` on the visiting stack, refusing revisits and
    /// runaway nesting.
    fn nested<H, F>(&mut self, host: &mut H, object: &O, body: F) -> ScriptResult<Value>
    where
        H: ScriptHost<Object = O>,
        F: FnOnce(&mut Self, &mut H) -> ScriptResult<Value>,
    {
        let identity = host
            .object_identity(object)
            .map_err(ScriptFault::from_inspection)?;
        if self.visiting.contains(&identity) {
            return Err(ScriptFault::CyclicResult(
                "result refers back to one of its own containers".into(),
            ));
        }
        if self.visiting.len() >= self.options.max_depth {
            return Err(ScriptFault::CyclicResult(format!(
                "result nests deeper than {} levels",
                self.options.max_depth
            )));
        }

        self.visiting.push(identity);
        let result = body(self, host);
        self.visiting.pop();
        result
    }

    fn marshal_sequence<H>(&mut self, host: &mut H, object: &O) -> ScriptResult<Value>
    where
        H: ScriptHost<Object = O>,
    {
        let length = self.helper(host, LENGTH_SCRIPT, vec![HostValue::Object(object.clone())])?;
        let length = match length {
            HostValue::Integer(length) if length >= 0 => length,
            other => {
                return Err(ScriptFault::UnknownResult(format!(
                    "sequence length is not a count: {other:?}"
                )));
            }
        };
        if length > self.options.max_sequence_length {
            return Err(ScriptFault::UnknownResult(format!(
                "sequence length {length} exceeds the limit of {}",
                self.options.max_sequence_length
            )));
        }

        let reserved = usize::try_from(length.min(PREALLOCATED_ITEMS)).unwrap_or_default();
        let mut items = Vec::with_capacity(reserved);
        for index in 0..length {
            let item = self.helper(
                host,
                ITEM_SCRIPT,
                vec![HostValue::Object(object.clone()), HostValue::Integer(index)],
            )?;
            items.push(self.marshal(host, item)?);
        }
        Ok(Value::Array(items))
    }

    fn marshal_properties<H>(&mut self, host: &mut H, object: &O) -> ScriptResult<Value>
    where
        H: ScriptHost<Object = O>,
    {
        let names = host
            .property_names(object)
            .map_err(ScriptFault::from_inspection)?;

        let mut properties = Map::new();
        for name in names {
            let value = self.helper(
                host,
                ITEM_SCRIPT,
                vec![HostValue::Object(object.clone()), HostValue::String(name.clone())],
            )?;
            let value = self.marshal(host, value)?;
            properties.insert(name, value);
        }
        Ok(Value::Object(properties))
    }

    fn helper<H>(
        &self,
        host: &mut H,
        script: &str,
        args: Vec<HostValue<O>>,
    ) -> ScriptResult<HostValue<O>>
    where
        H: ScriptHost<Object = O>,
    {
        self.invoker.execute(host, script, &args).map_err(|fault| match fault {
            ScriptFault::UnknownResult(_) => fault,
            other => ScriptFault::UnknownResult(other.to_string()),
        })
    }
}
