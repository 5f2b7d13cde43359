//! Fault taxonomy surfaced to the command layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::HostError;

/// Status code returned alongside every script response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Success,
    ScriptCompilationFault,
    ScriptRuntimeFault,
    ScriptTimeoutFault,
    PageReloadFault,
    StaleElementFault,
    UnknownResultFault,
    CyclicResultFault,
    InvalidArgumentFault,
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "Success",
            Status::ScriptCompilationFault => "ScriptCompilationFault",
            Status::ScriptRuntimeFault => "ScriptRuntimeFault",
            Status::ScriptTimeoutFault => "ScriptTimeoutFault",
            Status::PageReloadFault => "PageReloadFault",
            Status::StaleElementFault => "StaleElementFault",
            Status::UnknownResultFault => "UnknownResultFault",
            Status::CyclicResultFault => "CyclicResultFault",
            Status::InvalidArgumentFault => "InvalidArgumentFault",
        }
    }
}

/// Terminal failure of one script command. Never retried by this crate.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptFault {
    #[error("script could not be compiled: {0}")]
    Compilation(String),
    #[error("{0}")]
    Runtime(String),
    #[error("{0}")]
    Timeout(String),
    #[error("page reload detected during async script")]
    PageReload,
    #[error("stale element reference: {0}")]
    StaleElement(String),
    #[error("unknown script result: {0}")]
    UnknownResult(String),
    #[error("cyclic script result: {0}")]
    CyclicResult(String),
    #[error("invalid script argument: {0}")]
    InvalidArgument(String),
}

impl ScriptFault {
    pub fn status(&self) -> Status {
        match self {
            ScriptFault::Compilation(_) => Status::ScriptCompilationFault,
            ScriptFault::Runtime(_) => Status::ScriptRuntimeFault,
            ScriptFault::Timeout(_) => Status::ScriptTimeoutFault,
            ScriptFault::PageReload => Status::PageReloadFault,
            ScriptFault::StaleElement(_) => Status::StaleElementFault,
            ScriptFault::UnknownResult(_) => Status::UnknownResultFault,
            ScriptFault::CyclicResult(_) => Status::CyclicResultFault,
            ScriptFault::InvalidArgument(_) => Status::InvalidArgumentFault,
        }
    }

    /// Fault for a host failure outside of script evaluation itself, such as
    /// a helper call made while inspecting a result.
    pub(crate) fn from_inspection(err: HostError) -> Self {
        match err {
            HostError::Thrown { description } => ScriptFault::UnknownResult(
                description.unwrap_or_else(|| "result could not be inspected".into()),
            ),
            other => ScriptFault::UnknownResult(other.to_string()),
        }
    }
}

/// Result alias used across the execution layer.
pub type ScriptResult<T> = Result<T, ScriptFault>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_fault_maps_to_a_failure_status() {
        let faults = [
            ScriptFault::Compilation("x".into()),
            ScriptFault::Runtime("x".into()),
            ScriptFault::Timeout("x".into()),
            ScriptFault::PageReload,
            ScriptFault::StaleElement("x".into()),
            ScriptFault::UnknownResult("x".into()),
            ScriptFault::CyclicResult("x".into()),
            ScriptFault::InvalidArgument("x".into()),
        ];
        for fault in faults {
            assert!(!fault.status().is_success(), "{fault:?}");
        }
    }

    #[test]
    fn status_serialises_by_name() {
        let encoded = serde_json::to_string(&Status::PageReloadFault).unwrap();
        assert_eq!(encoded, "\"PageReloadFault\"");
        assert_eq!(Status::PageReloadFault.as_str(), "PageReloadFault");
    }
}
