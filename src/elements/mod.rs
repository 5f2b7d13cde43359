//! Element handle registry.
//!
//! Maps opaque handle tokens sent over the wire to native element references.
//! Every registration mints a fresh handle; the same node may therefore be
//! known under many handles at once, each valid until its owning document is
//! torn down.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::execution::fault::ScriptFault;
use crate::execution::tokens::mint_token;
use crate::host::DocumentId;

/// Key of the one-entry JSON object that carries an element handle.
pub const ELEMENT_KEY: &str = "ELEMENT";

/// Opaque element identity as exchanged with the command layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    token: String,
    document: DocumentId,
}

impl ElementHandle {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn document(&self) -> DocumentId {
        self.document
    }

    /// Wire form: `{"ELEMENT": "<token>"}`.
    pub fn to_json(&self) -> Value {
        let mut wire = Map::new();
        wire.insert(ELEMENT_KEY.to_string(), Value::String(self.token.clone()));
        Value::Object(wire)
    }
}

#[derive(Debug)]
struct ManagedElement<O> {
    node: O,
    document: DocumentId,
}

/// Registry of managed elements keyed by handle token.
#[derive(Debug)]
pub struct ElementRegistry<O> {
    elements: HashMap<String, ManagedElement<O>>,
}

impl<O: Clone> ElementRegistry<O> {
    pub fn new() -> Self {
        Self {
            elements: HashMap::new(),
        }
    }

    /// Register `node` as owned by `document` and return a new handle.
    pub fn register(&mut self, node: O, document: DocumentId) -> ElementHandle {
        let mut token = mint_token();
        while self.elements.contains_key(&token) {
            token = mint_token();
        }
        self.elements
            .insert(token.clone(), ManagedElement { node, document });
        log::trace!("registered element {token} for {document}");
        ElementHandle { token, document }
    }

    /// Resolve a handle token against the document currently loaded.
    pub fn resolve(&self, token: &str, current: DocumentId) -> Result<O, ScriptFault> {
        let managed = self.elements.get(token).ok_or_else(|| {
            ScriptFault::StaleElement(format!("unknown element handle {token}"))
        })?;

        if managed.document != current {
            return Err(ScriptFault::StaleElement(format!(
                "element {token} belongs to {} which is no longer loaded",
                managed.document
            )));
        }

        Ok(managed.node.clone())
    }

    /// Drop every handle owned by `document`. Returns how many handles were
    /// released.
    pub fn retire_document(&mut self, document: DocumentId) -> usize {
        let before = self.elements.len();
        self.elements
            .retain(|_, managed| managed.document != document);
        before - self.elements.len()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl<O: Clone> Default for ElementRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_node_gets_distinct_handles() {
        let document = DocumentId::next();
        let mut registry = ElementRegistry::new();
        let first = registry.register("node-a", document);
        let second = registry.register("node-a", document);

        assert_ne!(first.token(), second.token());
        assert_eq!(registry.resolve(first.token(), document).unwrap(), "node-a");
        assert_eq!(registry.resolve(second.token(), document).unwrap(), "node-a");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unknown_handles_are_stale() {
        let registry: ElementRegistry<&str> = ElementRegistry::new();
        let err = registry.resolve("{nope}", DocumentId::next()).unwrap_err();
        assert!(matches!(err, ScriptFault::StaleElement(_)));
    }

    #[test]
    fn retiring_a_document_invalidates_its_handles() {
        let old = DocumentId::next();
        let new = DocumentId::next();
        let mut registry = ElementRegistry::new();
        let stale = registry.register("old-node", old);
        let live = registry.register("new-node", new);

        assert_eq!(registry.retire_document(old), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.retire_document(old), 0);
        assert!(matches!(
            registry.resolve(stale.token(), new),
            Err(ScriptFault::StaleElement(_))
        ));
        assert_eq!(registry.resolve(live.token(), new).unwrap(), "new-node");
    }

    #[test]
    fn handles_do_not_resolve_in_other_documents() {
        let owner = DocumentId::next();
        let mut registry = ElementRegistry::new();
        let handle = registry.register(7, owner);
        assert!(registry.resolve(handle.token(), DocumentId::next()).is_err());
    }

    #[test]
    fn wire_form_is_single_key_object() {
        let mut registry = ElementRegistry::new();
        let handle = registry.register((), DocumentId::next());
        let wire = handle.to_json();
        assert_eq!(wire.as_object().unwrap().len(), 1);
        assert_eq!(wire[ELEMENT_KEY], Value::String(handle.token().to_string()));
    }
}
