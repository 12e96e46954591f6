//! WebSocket Streaming Transport
//!
//! Bridges sockets to the session handler and routes tick frames from the
//! broadcast engine to each connection's outbound queue.

pub mod router;
pub mod server;

pub use router::ConnectionRouter;
pub use server::{STREAM_PATH, StreamServer, StreamServerError, StreamState, stream_router};
