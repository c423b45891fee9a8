use std::collections::BTreeMap;

use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};

use super::OpCode;
use super::response::Body;

/// Login options key used to ask the server for quality of service.
pub const QOS_OPTION: &str = "_qos";

/// Login request (`op 1`).
///
/// # Security
///
/// When serialized, this struct exposes the password in plaintext.
/// Prefer `wss://` endpoints and never log the encoded frame.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct LoginRequest {
    pub op: OpCode,
    pub client_type: String,
    pub client_version: String,
    pub user: String,
    pub password: SecretString,
    pub login_options: BTreeMap<String, String>,
}

impl LoginRequest {
    #[must_use]
    pub fn new(
        client_type: &str,
        client_version: &str,
        user: &str,
        password: SecretString,
        login_options: BTreeMap<String, String>,
    ) -> Self {
        Self {
            op: OpCode::Login,
            client_type: client_type.to_owned(),
            client_version: client_version.to_owned(),
            user: user.to_owned(),
            password,
            login_options,
        }
    }
}

impl Serialize for LoginRequest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap as _;

        let mut map = serializer.serialize_map(Some(6))?;

        map.serialize_entry("op", &self.op)?;
        map.serialize_entry("client_type", &self.client_type)?;
        map.serialize_entry("client_version", &self.client_version)?;
        map.serialize_entry("user", &self.user)?;
        // SECURITY: the protocol carries the password in the login frame itself.
        map.serialize_entry("password", self.password.expose_secret())?;
        map.serialize_entry("login_options", &self.login_options)?;

        map.end()
    }
}

/// Subscribe request (`op 3`).
#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
pub struct SubscribeRequest {
    pub op: OpCode,
    /// Subscription identifier, `<client id>.s.<ordinal>`
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable: Option<String>,
}

impl SubscribeRequest {
    /// Empty `matcher` or `durable` values are left out of the frame.
    #[must_use]
    pub fn new(id: String, matcher: &str, durable: Option<&str>) -> Self {
        Self {
            op: OpCode::Subscribe,
            id,
            matcher: (!matcher.is_empty()).then(|| matcher.to_owned()),
            durable: durable
                .filter(|name| !name.is_empty())
                .map(ToOwned::to_owned),
        }
    }
}

/// Unsubscribe request (`op 5`).
#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
pub struct UnsubscribeRequest {
    pub op: OpCode,
    pub id: String,
}

impl UnsubscribeRequest {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            op: OpCode::Unsubscribe,
            id: id.to_owned(),
        }
    }
}

/// Outbound published message (`op 8`).
///
/// `seq` is only present when quality of service was negotiated at login.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRequest {
    #[serde(skip_deserializing, default = "message_op")]
    pub op: OpCode,
    pub body: Body,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl MessageRequest {
    #[must_use]
    pub fn new(body: Body, seq: Option<u64>) -> Self {
        Self {
            op: OpCode::Message,
            body,
            seq,
        }
    }
}

fn message_op() -> OpCode {
    OpCode::Message
}

/// Disconnect request (`op 11`), sent when the client closes the session.
#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
pub struct DisconnectRequest {
    pub op: OpCode,
}

impl Default for DisconnectRequest {
    fn default() -> Self {
        Self {
            op: OpCode::Disconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_login_request() {
        let options = BTreeMap::from([(QOS_OPTION.to_owned(), "true".to_owned())]);
        let request = LoginRequest::new(
            "rust",
            "0.1.0",
            "alice",
            SecretString::from("secret"),
            options,
        );

        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"op":1,"client_type":"rust","client_version":"0.1.0","user":"alice","password":"secret","login_options":{"_qos":"true"}}"#
        );
    }

    #[test]
    fn login_request_debug_redacts_password() {
        let request = LoginRequest::new(
            "rust",
            "0.1.0",
            "alice",
            SecretString::from("hunter2"),
            BTreeMap::new(),
        );

        assert!(!format!("{request:?}").contains("hunter2"));
    }

    #[test]
    fn serialize_subscribe_request() {
        let request = SubscribeRequest::new("C1.s.1".to_owned(), r#"{"_dest":"orders"}"#, None);

        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"op":3,"id":"C1.s.1","matcher":"{\"_dest\":\"orders\"}"}"#);
    }

    #[test]
    fn subscribe_request_omits_empty_matcher() {
        let request = SubscribeRequest::new("C1.s.4".to_owned(), "", Some(""));

        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"op":3,"id":"C1.s.4"}"#);
    }

    #[test]
    fn subscribe_request_includes_durable_name() {
        let request = SubscribeRequest::new("C1.s.2".to_owned(), "", Some("audit"));

        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"op":3,"id":"C1.s.2","durable":"audit"}"#);
    }

    #[test]
    fn serialize_message_request_without_seq() {
        let request = MessageRequest::new(Body::new("orders", "hello", 3), None);

        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"op":8,"body":{"_dest":"orders","text":"hello","number":3}}"#
        );
    }

    #[test]
    fn serialize_unsubscribe_and_disconnect() {
        let unsubscribe = serde_json::to_string(&UnsubscribeRequest::new("C1.s.1")).unwrap();
        assert_eq!(unsubscribe, r#"{"op":5,"id":"C1.s.1"}"#);

        let disconnect = serde_json::to_string(&DisconnectRequest::default()).unwrap();
        assert_eq!(disconnect, r#"{"op":11}"#);
    }
}
