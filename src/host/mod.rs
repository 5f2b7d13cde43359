//! Hosted scripting engine boundary.
//!
//! The bridge never talks to a JavaScript engine directly. Everything it needs
//! from the page (compiling a function, calling it, inspecting the values it
//! returns) goes through [`ScriptHost`], so the execution and marshalling
//! layers stay engine-agnostic. [`BoaPage`] is the bundled implementation.

mod boa;

pub use boa::{BoaObject, BoaPage};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one loaded document. A navigation always yields a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(u64);

impl DocumentId {
    /// Mint an id that has never been handed out in this process.
    pub fn next() -> Self {
        Self(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "document#{}", self.0)
    }
}

/// A raw value crossing the host boundary, before marshalling.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue<O> {
    Undefined,
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Object(O),
    /// A value the host could not express (symbols, big integers, ...).
    Unsupported(String),
}

impl<O> HostValue<O> {
    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    pub fn as_object(&self) -> Option<&O> {
        match self {
            HostValue::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl<O> From<&str> for HostValue<O> {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_string())
    }
}

impl<O> From<String> for HostValue<O> {
    fn from(value: String) -> Self {
        HostValue::String(value)
    }
}

impl<O> From<bool> for HostValue<O> {
    fn from(value: bool) -> Self {
        HostValue::Boolean(value)
    }
}

impl<O> From<i64> for HostValue<O> {
    fn from(value: i64) -> Self {
        HostValue::Integer(value)
    }
}

impl<O> From<f64> for HostValue<O> {
    fn from(value: f64) -> Self {
        HostValue::Double(value)
    }
}

/// Structural tag the host reports for an object value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    /// A native sequence of the engine (a script array).
    Array,
    /// A live or static collection of DOM nodes.
    ElementCollection,
    /// A DOM element.
    Element,
    /// A script-created object without a more specific tag. Whether it is
    /// treated as a sequence is decided by the array-like policy.
    ScriptObject,
    /// Any other dispatchable host object (window, document, functions).
    Dispatchable(String),
}

/// Failures reported by a [`ScriptHost`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HostError {
    #[error("script text could not be evaluated: {0}")]
    Compilation(String),
    #[error("script threw: {}", .description.as_deref().unwrap_or("<no description>"))]
    Thrown { description: Option<String> },
    #[error("document is no longer attached")]
    Detached,
    #[error("host binding failure: {0}")]
    Binding(String),
}

/// Contract required from the hosted scripting engine and its document.
///
/// Implementations own one browsing context. Every call is synchronous and
/// blocking; timers registered by page scripts only advance while the host
/// is given a chance to run through [`ScriptHost::yield_to_page`] or while it
/// executes a call.
pub trait ScriptHost {
    /// Native object reference handed back and forth across the boundary.
    type Object: Clone + fmt::Debug;

    /// Identity of the document currently loaded.
    fn document_id(&self) -> DocumentId;

    /// Evaluate `source` in the document's scripting context. The text must
    /// evaluate to a callable function, which is returned directly.
    fn compile_function(&mut self, source: &str) -> Result<Self::Object, HostError>;

    /// Invoke `function` with an explicit receiver and ordered arguments.
    fn call_function(
        &mut self,
        function: &Self::Object,
        receiver: &HostValue<Self::Object>,
        args: &[HostValue<Self::Object>],
    ) -> Result<HostValue<Self::Object>, HostError>;

    /// The window hosting the current document.
    fn window(&mut self) -> Result<Self::Object, HostError>;

    fn object_kind(&mut self, object: &Self::Object) -> Result<ObjectKind, HostError>;

    /// Stable identity of the native object, equal for equal references.
    fn object_identity(&mut self, object: &Self::Object) -> Result<u64, HostError>;

    /// Enumerable property names of `object`, inherited ones included, in
    /// enumeration order.
    fn property_names(&mut self, object: &Self::Object) -> Result<Vec<String>, HostError>;

    /// Let the page's own event loop make progress between driver calls.
    fn yield_to_page(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_ids_are_never_reused() {
        let first = DocumentId::next();
        let second = DocumentId::next();
        assert_ne!(first, second);
        assert!(second > first);
    }

    #[test]
    fn thrown_error_without_description_still_formats() {
        let err = HostError::Thrown { description: None };
        assert_eq!(err.to_string(), "script threw: <no description>");
    }
}
