// Transport — request/response delivery of opaque relay messages
//
// `RelayTransport` is what a node calls to reach its next hop;
// `RequestHandler` is what a node implements to serve inbound calls.
// Two bindings ship: plain TCP frames and an in-process registry.

pub mod local;
pub mod rpc;
pub mod tcp;

pub use local::{LocalEndpoint, LocalNetwork};
pub use rpc::{RelayTransport, RequestHandler, RpcError};
pub use tcp::{serve, serve_with_timeout, TcpTransport, DEFAULT_CALL_TIMEOUT, MAX_FRAME_SIZE};
