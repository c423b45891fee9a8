use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use crate::types::OpCode;
use crate::ws::connection::ConnectionState;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Error from the underlying socket: dial, read, write or close
    Transport,
    /// A received frame could not be decoded or lacks a usable `op`
    MalformedFrame,
    /// Login response was absent, of the wrong kind, or undecodable
    LoginFailed,
    /// The server refused a subscribe request
    SubscriptionRejected,
    /// Operation requires an open (logged in) connection
    ConnectionNotOpen,
    /// Encoded message exceeds the server advertised maximum
    MessageTooLarge,
    /// Response to a request was not of the expected kind
    UnexpectedResponse,
    /// Error related to invalid input supplied by the caller
    Validation,
    /// Internal error from dependencies
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        MalformedFrame {
            reason: reason.into(),
        }
        .into()
    }

    pub fn login_failed<S: Into<String>>(reason: S) -> Self {
        LoginFailed {
            reason: reason.into(),
        }
        .into()
    }

    #[must_use]
    pub fn not_open(state: ConnectionState) -> Self {
        ConnectionNotOpen { state }.into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct MalformedFrame {
    pub reason: String,
}

impl fmt::Display for MalformedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed frame: {}", self.reason)
    }
}

impl StdError for MalformedFrame {}

#[non_exhaustive]
#[derive(Debug)]
pub struct LoginFailed {
    pub reason: String,
}

impl fmt::Display for LoginFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "login failed: {}", self.reason)
    }
}

impl StdError for LoginFailed {}

/// The server answered a subscribe request with an `unsubscribed` frame.
#[non_exhaustive]
#[derive(Debug)]
pub struct SubscriptionRejected {
    /// Identifier of the rejected subscription
    pub id: String,
    /// Server error code (`err`)
    pub code: i64,
    /// Server supplied reason, verbatim
    pub reason: String,
}

impl fmt::Display for SubscriptionRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "subscription {} rejected ({}): {}",
            self.id, self.code, self.reason
        )
    }
}

impl StdError for SubscriptionRejected {}

#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct ConnectionNotOpen {
    pub state: ConnectionState,
}

impl fmt::Display for ConnectionNotOpen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection is not open (state: {})", self.state)
    }
}

impl StdError for ConnectionNotOpen {}

#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct MessageTooLarge {
    /// Size of the encoded frame in bytes
    pub size: usize,
    /// Maximum advertised by the server at login
    pub max: usize,
}

impl fmt::Display for MessageTooLarge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "message of {} bytes exceeds the maximum of {} bytes",
            self.size, self.max
        )
    }
}

impl StdError for MessageTooLarge {}

/// A request received a response of the wrong kind.
#[non_exhaustive]
#[derive(Debug)]
pub struct UnexpectedResponse {
    /// Operation code of the response that arrived
    pub op: OpCode,
    /// Raw frame text for diagnosis
    pub payload: String,
}

impl fmt::Display for UnexpectedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unexpected {} response: {}",
            self.op, self.payload
        )
    }
}

impl StdError for UnexpectedResponse {}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

impl From<MalformedFrame> for Error {
    fn from(err: MalformedFrame) -> Self {
        Error::with_source(Kind::MalformedFrame, err)
    }
}

impl From<LoginFailed> for Error {
    fn from(err: LoginFailed) -> Self {
        Error::with_source(Kind::LoginFailed, err)
    }
}

impl From<SubscriptionRejected> for Error {
    fn from(err: SubscriptionRejected) -> Self {
        Error::with_source(Kind::SubscriptionRejected, err)
    }
}

impl From<ConnectionNotOpen> for Error {
    fn from(err: ConnectionNotOpen) -> Self {
        Error::with_source(Kind::ConnectionNotOpen, err)
    }
}

impl From<MessageTooLarge> for Error {
    fn from(err: MessageTooLarge) -> Self {
        Error::with_source(Kind::MessageTooLarge, err)
    }
}

impl From<UnexpectedResponse> for Error {
    fn from(err: UnexpectedResponse) -> Self {
        Error::with_source(Kind::UnexpectedResponse, err)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}
