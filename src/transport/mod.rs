//! Transport layer for the MCP server.
//!
//! Stdio is the only transport: the server is launched by the MCP client and
//! speaks JSON-RPC over its standard input/output.

pub mod stdio;

pub use stdio::StdioTransport;

use crate::error::WarehouseResult;
use std::future::Future;

/// Trait for MCP transport implementations.
///
/// Transports handle the low-level communication between the MCP server
/// and clients, abstracting away the protocol details.
pub trait Transport: Send + Sync {
    /// Start the transport and begin handling requests.
    ///
    /// This method should block until the transport is shut down.
    fn run(&self) -> impl Future<Output = WarehouseResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}
