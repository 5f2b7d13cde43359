//! Single-shot script execution against a hosted document.

use crate::host::{HostError, HostValue, ScriptHost};

use super::fault::{ScriptFault, ScriptResult};

/// Description used when the engine throws without saying why.
pub const GENERIC_SCRIPT_ERROR: &str = "unexpected JavaScript error";

/// Wrap a user-supplied function body into script text that evaluates to a
/// callable function.
pub fn wrap_function_body(body: &str) -> String {
    format!("(function() {{ return function(){{\n{body}\n}};}})();")
}

/// Executes script text with bound arguments.
///
/// The compiled function is held by the caller and passed straight back to
/// the host for invocation; nothing is parked on the document, so several
/// invokers may target the same document one after another without stepping
/// on each other.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptInvoker;

impl ScriptInvoker {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `script` (text evaluating to a function) and call it with the
    /// hosting window as receiver, `args` in order and the window appended as
    /// a trailing implicit argument. One evaluation per call, never retried.
    pub fn execute<H: ScriptHost>(
        &self,
        host: &mut H,
        script: &str,
        args: &[HostValue<H::Object>],
    ) -> ScriptResult<HostValue<H::Object>> {
        let function = host.compile_function(script).map_err(|err| {
            // Normally the first sign that the page is mid-navigation.
            log::debug!("cannot create anonymous function in {}: {err}", host.document_id());
            match err {
                HostError::Compilation(reason) => ScriptFault::Compilation(reason),
                other => ScriptFault::Compilation(other.to_string()),
            }
        })?;

        let window = host.window().map_err(|err| {
            log::warn!("cannot get parent window: {err}");
            ScriptFault::Runtime(err.to_string())
        })?;

        let mut bound = Vec::with_capacity(args.len() + 1);
        bound.extend(args.iter().cloned());
        bound.push(HostValue::Object(window.clone()));

        host.call_function(&function, &HostValue::Object(window), &bound)
            .map_err(|err| match err {
                HostError::Thrown { description } => {
                    let description =
                        description.unwrap_or_else(|| GENERIC_SCRIPT_ERROR.to_string());
                    log::info!("exception message was: {description}");
                    ScriptFault::Runtime(description)
                }
                HostError::Compilation(reason) => ScriptFault::Compilation(reason),
                other => ScriptFault::Runtime(other.to_string()),
            })
    }
}
