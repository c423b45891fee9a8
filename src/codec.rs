//! Frame encoding and decoding.
//!
//! Decoding never panics: a frame without a usable `op`, or without the fields
//! its kind requires, is reported as [`Kind::MalformedFrame`](crate::error::Kind::MalformedFrame).
//! Unknown extra fields are tolerated.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::Result;
use crate::error::{Error, MessageTooLarge};
use crate::serde_helpers::deserialize_with_warnings;
use crate::types::OpCode;
use crate::types::response::Frame;

/// Encode a request into the text of a frame.
pub fn encode<R: Serialize>(request: &R) -> Result<String> {
    Ok(serde_json::to_string(request)?)
}

/// Fail with [`MessageTooLarge`] when `frame` exceeds `max_size` bytes.
///
/// A `max_size` of zero means the server did not advertise a limit.
pub fn ensure_fits(frame: &str, max_size: usize) -> Result<()> {
    if max_size > 0 && frame.len() > max_size {
        return Err(MessageTooLarge {
            size: frame.len(),
            max: max_size,
        }
        .into());
    }

    Ok(())
}

/// Read only the operation code of a frame.
pub fn peek_op(bytes: &[u8]) -> Result<OpCode> {
    let mut map = parse_object(bytes)?;
    take_op(&mut map)
}

/// Read the `id` field of a frame, if it has a string one.
///
/// Used to attribute a frame that failed to decode.
pub fn peek_id(bytes: &[u8]) -> Option<String> {
    let mut map = parse_object(bytes).ok()?;
    match map.remove("id")? {
        Value::String(id) => Some(id),
        _ => None,
    }
}

/// Decode a frame into its typed representation.
///
/// Heartbeats are recognised from the `op` field alone; their payload is never inspected.
pub fn decode(bytes: &[u8]) -> Result<Frame> {
    let mut map = parse_object(bytes)?;
    let op = take_op(&mut map)?;
    let payload = Value::Object(map);

    let frame = match op {
        OpCode::Heartbeat => Frame::Heartbeat,
        OpCode::Welcome => Frame::Welcome(fields(op, payload)?),
        OpCode::Subscribed => Frame::Subscribed(fields(op, payload)?),
        OpCode::Unsubscribed => Frame::Unsubscribed(fields(op, payload)?),
        OpCode::Event => Frame::Event(fields(op, payload)?),
        OpCode::Message => Frame::Message(fields(op, payload)?),
        OpCode::Ack => Frame::Ack(fields(op, payload)?),
        OpCode::Error => Frame::Error(fields(op, payload)?),
        OpCode::Disconnect => Frame::Disconnect(fields(op, payload)?),
        OpCode::Goodbye => Frame::Goodbye(fields(op, payload)?),
        OpCode::Login | OpCode::Subscribe | OpCode::Unsubscribe => Frame::Other { op, payload },
    };

    Ok(frame)
}

fn parse_object(bytes: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::malformed(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(Error::malformed(format!("invalid JSON: {e}"))),
    }
}

fn take_op(map: &mut Map<String, Value>) -> Result<OpCode> {
    let raw = map
        .remove("op")
        .ok_or_else(|| Error::malformed("missing op field"))?;
    let number = raw
        .as_u64()
        .ok_or_else(|| Error::malformed(format!("op is not a non-negative integer: {raw}")))?;

    OpCode::try_from(number).map_err(|n| Error::malformed(format!("unknown op {n}")))
}

fn fields<T: DeserializeOwned>(op: OpCode, payload: Value) -> Result<T> {
    deserialize_with_warnings(payload).map_err(|e| Error::malformed(format!("{op} frame: {e}")))
}
