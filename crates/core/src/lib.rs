//! Callbridge Core
//!
//! The function-calling side of a voice call: the contract the relay uses to
//! hand model-initiated function calls to whatever implements the tools, plus
//! two implementations of it. Nothing in here touches a socket.

pub mod dispatcher;
pub mod mcp;
pub mod registry;

pub use dispatcher::{
    DispatchError, FunctionDispatcher, FunctionSchema, dispatch_to_json, error_json,
};
pub use mcp::McpDispatcher;
pub use registry::FunctionRegistry;
