use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::serde_as;

use super::OpCode;
use super::request::MessageRequest;
use crate::serde_helpers::BoolFromAny;

/// Decoded frame, as produced by [`crate::codec::decode`].
///
/// Client to server kinds (`login`, `subscribe`, `unsubscribe`) are not expected
/// from a server and are kept as [`Frame::Other`] with their raw payload.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Heartbeat,
    Welcome(Welcome),
    Subscribed(Subscribed),
    Unsubscribed(Unsubscribed),
    Event(Event),
    Message(MessageRequest),
    Ack(Ack),
    Error(Notice),
    Disconnect(Notice),
    Goodbye(Notice),
    Other { op: OpCode, payload: Value },
}

impl Frame {
    #[must_use]
    pub const fn op(&self) -> OpCode {
        match self {
            Self::Heartbeat => OpCode::Heartbeat,
            Self::Welcome(_) => OpCode::Welcome,
            Self::Subscribed(_) => OpCode::Subscribed,
            Self::Unsubscribed(_) => OpCode::Unsubscribed,
            Self::Event(_) => OpCode::Event,
            Self::Message(_) => OpCode::Message,
            Self::Ack(_) => OpCode::Ack,
            Self::Error(_) => OpCode::Error,
            Self::Disconnect(_) => OpCode::Disconnect,
            Self::Goodbye(_) => OpCode::Goodbye,
            Self::Other { op, .. } => *op,
        }
    }

    /// Returns the event if this frame is an inbound published message.
    #[must_use]
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Event(event) => Some(event),
            _ => None,
        }
    }
}

/// Message body shared by inbound events and outbound messages.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct Body {
    /// Destination the message was published to
    #[serde(rename = "_dest")]
    #[builder(into)]
    pub destination: String,
    #[builder(into)]
    pub text: String,
    pub number: i64,
}

impl Body {
    #[must_use]
    pub fn new(destination: &str, text: &str, number: i64) -> Self {
        Self {
            destination: destination.to_owned(),
            text: text.to_owned(),
            number,
        }
    }
}

/// Login response (`op 2`) carrying the negotiated session parameters.
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Welcome {
    pub client_id: String,
    /// Token the server issues for resuming the session
    pub id_token: String,
    /// Session timeout, in seconds
    pub timeout: u64,
    /// Heartbeat interval, in seconds
    pub heartbeat: u64,
    /// Largest frame the server accepts, in bytes. Zero means no limit.
    pub max_size: usize,
    /// The server sends this as the string `"true"` or `"false"`
    #[serde(rename = "_qos")]
    #[serde_as(as = "BoolFromAny")]
    pub qos: bool,
}

/// Subscription confirmation (`op 4`).
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Subscribed {
    pub id: String,
}

/// Subscription rejection or revocation (`op 6`).
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Unsubscribed {
    pub id: String,
    pub err: i64,
    pub reason: String,
}

/// Inbound published message (`op 7`).
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Event {
    /// Subscription the event was delivered for
    pub to: String,
    pub seq: u64,
    pub body: Body,
}

impl Event {
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.body.destination
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.body.text
    }

    #[must_use]
    pub fn number(&self) -> i64 {
        self.body.number
    }
}

/// Acknowledgement of a published message (`op 9`).
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Ack {
    pub seq: u64,
    #[serde(default)]
    pub err: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Payload of `error`, `disconnect` and `goodbye` frames.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Notice {
    #[serde(default)]
    pub err: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deserialize_welcome_with_string_qos() {
        let welcome: Welcome = serde_json::from_value(json!({
            "client_id": "C1",
            "id_token": "T1",
            "timeout": 600,
            "heartbeat": 240,
            "max_size": 8192,
            "_qos": "true"
        }))
        .unwrap();

        assert_eq!(welcome.client_id, "C1");
        assert_eq!(welcome.id_token, "T1");
        assert_eq!(welcome.timeout, 600);
        assert_eq!(welcome.heartbeat, 240);
        assert_eq!(welcome.max_size, 8192);
        assert!(welcome.qos);
    }

    #[test]
    fn deserialize_welcome_with_qos_disabled() {
        let welcome: Welcome = serde_json::from_value(json!({
            "client_id": "C2",
            "id_token": "T2",
            "timeout": 1,
            "heartbeat": 1,
            "max_size": 0,
            "_qos": "false"
        }))
        .unwrap();

        assert!(!welcome.qos);
    }

    #[test]
    fn deserialize_event_body() {
        let event: Event = serde_json::from_value(json!({
            "to": "C1.s.1",
            "seq": 42,
            "body": { "_dest": "orders", "text": "hello", "number": 7 }
        }))
        .unwrap();

        assert_eq!(event.to, "C1.s.1");
        assert_eq!(event.seq, 42);
        assert_eq!(event.destination(), "orders");
        assert_eq!(event.text(), "hello");
        assert_eq!(event.number(), 7);
    }

    #[test]
    fn event_requires_body_fields() {
        let result = serde_json::from_value::<Event>(json!({
            "to": "C1.s.1",
            "seq": 1,
            "body": { "text": "no destination", "number": 1 }
        }));

        result.unwrap_err();
    }

    #[test]
    fn notice_fields_are_optional() {
        let notice: Notice = serde_json::from_value(json!({})).unwrap();
        assert_eq!(notice, Notice::default());
    }

    #[test]
    fn body_builder_accepts_str() {
        let body = Body::builder()
            .destination("orders")
            .text("hi")
            .number(2)
            .build();

        assert_eq!(body, Body::new("orders", "hi", 2));
    }
}
