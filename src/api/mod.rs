//! API Module
//!
//! This module handles the JSON-RPC API in front of the batch engine:
//! opening connections, executing batches and closing connections.

mod server;


pub use server::{AppState, JsonRpcError, JsonRpcRequest, JsonRpcResponse, Server, codes, router};
