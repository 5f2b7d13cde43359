//! Resolution of protocol arguments into host values.

use serde_json::Value;

use crate::elements::{ELEMENT_KEY, ElementRegistry};
use crate::host::{DocumentId, HostValue};

use super::fault::{ScriptFault, ScriptResult};

/// One argument as received from the command layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptArgument {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    /// Handle token of a previously registered element.
    Element(String),
}

impl ScriptArgument {
    pub fn element(token: impl Into<String>) -> Self {
        ScriptArgument::Element(token.into())
    }

    /// Parse a JSON argument: primitives, or `{"ELEMENT": "<handle>"}`.
    pub fn from_json(value: &Value) -> ScriptResult<Self> {
        match value {
            Value::Null => Ok(ScriptArgument::Null),
            Value::Bool(flag) => Ok(ScriptArgument::Boolean(*flag)),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => Ok(ScriptArgument::Integer(integer)),
                None => number.as_f64().map(ScriptArgument::Double).ok_or_else(|| {
                    ScriptFault::InvalidArgument(format!("number {number} is out of range"))
                }),
            },
            Value::String(text) => Ok(ScriptArgument::String(text.clone())),
            Value::Object(map) if map.len() == 1 => match map.get(ELEMENT_KEY) {
                Some(Value::String(token)) => Ok(ScriptArgument::Element(token.clone())),
                _ => Err(ScriptFault::InvalidArgument(format!(
                    "unsupported object argument {value}"
                ))),
            },
            other => Err(ScriptFault::InvalidArgument(format!(
                "unsupported argument {other}"
            ))),
        }
    }

    pub fn from_json_list(values: &[Value]) -> ScriptResult<Vec<Self>> {
        values.iter().map(ScriptArgument::from_json).collect()
    }
}

impl From<&str> for ScriptArgument {
    fn from(value: &str) -> Self {
        ScriptArgument::String(value.to_string())
    }
}

impl From<String> for ScriptArgument {
    fn from(value: String) -> Self {
        ScriptArgument::String(value)
    }
}

impl From<bool> for ScriptArgument {
    fn from(value: bool) -> Self {
        ScriptArgument::Boolean(value)
    }
}

impl From<i64> for ScriptArgument {
    fn from(value: i64) -> Self {
        ScriptArgument::Integer(value)
    }
}

impl From<f64> for ScriptArgument {
    fn from(value: f64) -> Self {
        ScriptArgument::Double(value)
    }
}

/// Resolve `args` in order. Element handles must belong to `current`.
pub fn bind_arguments<O: Clone>(
    registry: &ElementRegistry<O>,
    current: DocumentId,
    args: &[ScriptArgument],
) -> ScriptResult<Vec<HostValue<O>>> {
    args.iter()
        .map(|arg| {
            Ok(match arg {
                ScriptArgument::Null => HostValue::Null,
                ScriptArgument::Boolean(flag) => HostValue::Boolean(*flag),
                ScriptArgument::Integer(number) => HostValue::Integer(*number),
                ScriptArgument::Double(number) => HostValue::Double(*number),
                ScriptArgument::String(text) => HostValue::String(text.clone()),
                ScriptArgument::Element(token) => {
                    HostValue::Object(registry.resolve(token, current)?)
                }
            })
        })
        .collect()
}
