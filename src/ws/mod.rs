//! WebSocket transport for the eFTL protocol.
//!
//! One background task owns the socket. It is the only reader and the only
//! writer: outbound frames are funnelled to it through a channel, inbound frames
//! are classified by operation code and either answer the outstanding request or
//! are broadcast to subscribers.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: dials the endpoint and runs the read/write task
//! - [`ConnectionState`]: lifecycle of the session, published through a `watch` channel

pub mod connection;
pub mod error;

pub use connection::{ConnectionManager, ConnectionState, Expected};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
