//! JSON-RPC layer of the Model Context Protocol
//!
//! Message decoding, version negotiation, and routing of MCP methods to the
//! tool dispatch core.

pub mod rpc;
pub mod server;
