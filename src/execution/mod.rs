//! Script execution: the single-shot invoker, argument binding and the
//! asynchronous callback protocol built on top of them.

pub mod arguments;
pub mod async_script;
pub mod fault;
pub mod invoker;
pub mod tokens;

pub use arguments::{ScriptArgument, bind_arguments};
pub use async_script::{AsyncExecutionCoordinator, AsyncState};
pub use fault::{ScriptFault, ScriptResult, Status};
pub use invoker::{GENERIC_SCRIPT_ERROR, ScriptInvoker, wrap_function_body};
pub use tokens::{TokenMint, mint_token};
