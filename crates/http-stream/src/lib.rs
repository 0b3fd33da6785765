//! Streamable HTTP transport for MCP servers.
//!
//! One HTTP endpoint carries JSON-RPC 2.0 in both directions:
//! - `POST` submits client messages; responses come back inline (batch mode) or over an SSE
//!   stream (stream mode)
//! - `GET` opens a standalone SSE stream for server-initiated messages, resumable via
//!   `Last-Event-ID`
//! - `DELETE` terminates a session
//!
//! The crate owns sessions, streams and request correlation. What a method *does* is up to the
//! application's [`Dispatcher`]; it contains no tool, resource or prompt semantics.

pub mod config;
pub mod correlator;
pub mod cors;
pub mod dispatcher;
pub mod error;
pub mod jsonrpc;
pub mod multiplexer;
pub mod session;
mod sse;
pub mod transport;

pub use config::{ResponseMode, TransportConfig};
pub use dispatcher::{AllowAll, Authorizer, Dispatcher, RequestContext};
pub use error::{Result, TransportError};
pub use jsonrpc::{ErrorCode, ErrorObject, JsonRpcMessage, JsonRpcRequest, Outcome, RequestId};
pub use multiplexer::Delivery;
pub use session::{DestroyReason, SessionId};
pub use transport::{DestroyedSession, Transport, router};
