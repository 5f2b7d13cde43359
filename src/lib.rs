//! # webscript-bridge
//!
//! Script execution and result marshalling for browser automation drivers.
//!
//! A command layer hands the bridge a function body and an ordered argument
//! list; the bridge runs it inside a hosted document, waits for the callback
//! of asynchronous scripts, and turns whatever comes back into canonical
//! JSON, with DOM elements replaced by opaque handles.
//!
//! ## Features
//!
//! - Engine-agnostic host boundary ([`ScriptHost`]) with a bundled Boa page
//! - Synchronous and callback-style asynchronous execution
//! - Page-reload and timeout detection for async scripts
//! - Element handle registry with stale-handle detection across navigations
//! - Cycle-safe marshalling of arrays, array-likes and plain objects
//! - Structured events and per-mode execution metrics
//!
//! ## Example
//!
//! ```no_run
//! use webscript_bridge::{BoaPage, ScriptArgument, ScriptBridge};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut bridge = ScriptBridge::new(BoaPage::new()?);
//!     let response = bridge.invoke(
//!         "return arguments[0] + arguments[1];",
//!         &[ScriptArgument::from(40_i64), ScriptArgument::from(2_i64)],
//!     );
//!     println!("{}", serde_json::to_string(&response)?);
//!     Ok(())
//! }
//! ```

mod bridge;

pub mod elements;
pub mod execution;
pub mod host;
pub mod marshal;
pub mod modules;

pub use crate::bridge::{
    BridgeError,
    BridgeResult,
    ScriptBridge,
    ScriptBridgeBuilder,
    ScriptBridgeConfig,
    ScriptResponse,
};

pub use crate::elements::{ELEMENT_KEY, ElementHandle, ElementRegistry};

pub use crate::execution::{
    AsyncExecutionCoordinator,
    AsyncState,
    GENERIC_SCRIPT_ERROR,
    ScriptArgument,
    ScriptFault,
    ScriptInvoker,
    ScriptResult,
    Status,
    TokenMint,
    bind_arguments,
    mint_token,
    wrap_function_body,
};

pub use crate::host::{BoaObject, BoaPage, DocumentId, HostError, HostValue, ObjectKind, ScriptHost};

pub use crate::marshal::{ArrayLikeDetection, MarshalOptions, ResultMarshaller};

pub use crate::modules::{
    BridgeEvent,
    EventDispatcher,
    EventHandler,
    ExecutionMode,
    LoggingHandler,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
