//! Fallback policy deciding whether a generic script object is a sequence.
//!
//! Hosts report arrays and element collections structurally. Plain script
//! objects carry no such tag, so an object that exposes an enumerable
//! numeric `length` (own or inherited) can still be treated as array-like.

use serde::{Deserialize, Serialize};

use crate::execution::fault::{ScriptFault, ScriptResult};
use crate::execution::invoker::ScriptInvoker;
use crate::host::{HostValue, ScriptHost};

/// Helper script: `true` when `arguments[0]` enumerates a `length` property
/// holding a number.
pub const LENGTH_HEURISTIC_SCRIPT: &str = "(function() { return function(){\n\
var target = arguments[0];\n\
var enumerable = false;\n\
for (var name in target) { if (name === 'length') { enumerable = true; break; } }\n\
return enumerable && typeof target.length === 'number';\n\
};})();";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayLikeDetection {
    /// Structural tags first, then the enumerable `length` check.
    #[default]
    LengthHeuristic,
    /// Only structurally tagged arrays and collections are sequences.
    StructuralOnly,
}

impl ArrayLikeDetection {
    /// Decide for a script object the host tagged as
    /// [`ObjectKind::ScriptObject`](crate::host::ObjectKind::ScriptObject).
    pub fn is_array_like<H: ScriptHost>(
        &self,
        invoker: &ScriptInvoker,
        host: &mut H,
        object: &H::Object,
    ) -> ScriptResult<bool> {
        match self {
            ArrayLikeDetection::StructuralOnly => Ok(false),
            ArrayLikeDetection::LengthHeuristic => {
                let verdict = invoker
                    .execute(host, LENGTH_HEURISTIC_SCRIPT, &[HostValue::Object(object.clone())])
                    .map_err(|fault| {
                        ScriptFault::UnknownResult(format!("array-like check failed: {fault}"))
                    })?;
                Ok(matches!(verdict, HostValue::Boolean(true)))
            }
        }
    }
}
