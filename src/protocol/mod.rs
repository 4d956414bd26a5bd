//! Agent protocol
//!
//! JSON-RPC 2.0 over newline-delimited stdio, exposing the orchestrator's
//! operations as tools and `tally://` resources.

pub mod catalog;
pub mod resources;
pub mod rpc;
pub mod server;
pub mod tools;

pub use catalog::{resource_list, tool_definitions, ResourceDescriptor, Tool, ToolDefinition};
pub use resources::{read_resource, ResourceUri};
pub use rpc::{ErrorCode, JsonRpcRequest, JsonRpcResponse, RpcError, PROTOCOL_VERSION};
pub use server::AgentServer;
pub use tools::{execute_tool, ResourceReadResult, ToolResult};
