#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod sequence;
pub(crate) mod serde_helpers;
pub mod subscription;
pub mod types;
pub mod ws;

pub use config::Config;
pub use connection::{Connection, Session};
pub use error::{Error, Kind};
pub use subscription::Subscription;
pub use types::OpCode;
pub use types::response::{Body, Event, Frame};
pub use ws::connection::ConnectionState;

pub type Result<T> = std::result::Result<T, Error>;

/// Client type reported in the login request unless overridden in [`Config`]
pub const CLIENT_TYPE: &str = "rust";

/// Client version reported in the login request unless overridden in [`Config`]
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
