//! The sage tool server.
//!
//! A JSON-RPC 2.0 surface (newline-delimited stdio canonical, HTTP
//! POST alternate) exposing the memory service as five tools. The
//! server is the single boundary where internal typed errors become
//! JSON-RPC error objects and `isError` tool responses.

pub mod handlers;
pub mod http;
pub mod rpc;
pub mod service;
pub mod stdio;
pub mod tools;

pub use service::{MemoryService, ServiceContainer};
