//! Wire schema of the eFTL protocol.
//!
//! Every frame is a JSON object with an integer `op` field naming its kind.
//! Client to server requests live in [`request`], everything the client can
//! receive lives in [`response`].

pub mod request;
pub mod response;

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Operation code carried in the `op` field of every frame.
#[non_exhaustive]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize_repr,
    Deserialize_repr,
    strum_macros::Display,
)]
#[repr(u8)]
pub enum OpCode {
    /// Keep-alive, either direction. Never surfaced to callers.
    Heartbeat = 0,
    Login = 1,
    /// Successful login response carrying the session parameters
    Welcome = 2,
    Subscribe = 3,
    Subscribed = 4,
    Unsubscribe = 5,
    /// Subscription rejected by the server, or revoked later on
    Unsubscribed = 6,
    /// Inbound published message addressed to a subscription
    Event = 7,
    /// Outbound published message
    Message = 8,
    Ack = 9,
    Error = 10,
    Disconnect = 11,
    Goodbye = 12,
}

impl OpCode {
    /// Whether a frame of this kind can answer an outstanding login or subscribe request.
    ///
    /// Events and acks are never responses; they always go to the inbound streams.
    #[must_use]
    pub const fn is_response(self) -> bool {
        matches!(
            self,
            Self::Welcome
                | Self::Subscribed
                | Self::Unsubscribed
                | Self::Error
                | Self::Disconnect
                | Self::Goodbye
        )
    }
}

impl TryFrom<u64> for OpCode {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, u64> {
        Ok(match value {
            0 => Self::Heartbeat,
            1 => Self::Login,
            2 => Self::Welcome,
            3 => Self::Subscribe,
            4 => Self::Subscribed,
            5 => Self::Unsubscribe,
            6 => Self::Unsubscribed,
            7 => Self::Event,
            8 => Self::Message,
            9 => Self::Ack,
            10 => Self::Error,
            11 => Self::Disconnect,
            12 => Self::Goodbye,
            other => return Err(other),
        })
    }
}
