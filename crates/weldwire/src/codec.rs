//! # Wire Codec
//!
//! Turns a [`Message`] into its transmitted textual form and back. The codec
//! is a collaborator of the connection engine, not part of it: the engine
//! only ever asks for `serialize` and `deserialize`.
//!
//! [`JsonCodec`] is the shipped implementation; the positional array layout
//! it produces is the protocol's canonical shape regardless of text format.

use serde_json::Value as Json;

use crate::message::Message;
use crate::value::Value;

/// Failures while reading or writing the textual form of a message.
#[derive(Debug, Clone)]
pub enum Error {
    /// The input is not valid text for this codec at all.
    Malformed(String),
    /// The message array carries an unrecognized leading tag.
    UnknownTag(String),
    /// A required positional element is missing or of the wrong class.
    BadElement { position: usize, expected: &'static str },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Malformed(msg) => write!(f, "Malformed message: {}", msg),
            Error::UnknownTag(tag) => write!(f, "Unknown message tag: {}", tag),
            Error::BadElement { position, expected } => {
                write!(f, "Message element {} is not a {}", position, expected)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Converts messages to and from their transmitted textual form.
///
/// Object-safe so a connection can hold `Arc<dyn WireCodec>`.
pub trait WireCodec: Send + Sync + 'static {
    fn serialize(&self, message: &Message) -> Result<String>;
    fn deserialize(&self, raw: &str) -> Result<Message>;
}

/// The JSON rendition of the positional-array protocol.
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn serialize(&self, message: &Message) -> Result<String> {
        let array = match message {
            Message::Request { id, method, callback_indices, args } => {
                let mut out = vec![
                    Json::String("call".into()),
                    Json::Number((*id).into()),
                    Json::String(method.clone()),
                    Json::Array(
                        callback_indices
                            .iter()
                            .map(|i| Json::Number((*i as u64).into()))
                            .collect(),
                    ),
                ];
                out.extend(args.iter().map(Value::to_json));
                out
            }
            Message::Response { id, outcome } => {
                let mut out = vec![Json::String("call-reply".into()), Json::Number((*id).into())];
                match outcome {
                    Ok(Some(value)) => {
                        out.push(Json::Bool(true));
                        out.push(value.to_json());
                    }
                    Ok(None) => out.push(Json::Bool(true)),
                    Err(reason) => {
                        out.push(Json::Bool(false));
                        out.push(reason.to_json());
                    }
                }
                out
            }
            Message::Error { id, reason } => vec![
                Json::String("call-error".into()),
                Json::Number((*id).into()),
                Json::String(reason.clone()),
            ],
        };
        serde_json::to_string(&Json::Array(array)).map_err(|e| Error::Malformed(e.to_string()))
    }

    fn deserialize(&self, raw: &str) -> Result<Message> {
        let json: Json =
            serde_json::from_str(raw).map_err(|e| Error::Malformed(e.to_string()))?;
        let Json::Array(elements) = json else {
            return Err(Error::Malformed("message is not an array".into()));
        };
        let tag = str_at(&elements, 0)?;
        let id = int_at(&elements, 1)?;

        match tag {
            "call" => {
                let method = str_at(&elements, 2)?.to_string();
                let Some(Json::Array(raw_indices)) = elements.get(3) else {
                    return Err(Error::BadElement { position: 3, expected: "array" });
                };
                let mut callback_indices = Vec::with_capacity(raw_indices.len());
                for index in raw_indices {
                    let index = index
                        .as_u64()
                        .ok_or(Error::BadElement { position: 3, expected: "array of integers" })?;
                    callback_indices.push(index as usize);
                }
                let args = elements[4..].iter().map(Value::from_json).collect();
                Ok(Message::Request { id, method, callback_indices, args })
            }
            "call-reply" => {
                let Some(Json::Bool(success)) = elements.get(2) else {
                    return Err(Error::BadElement { position: 2, expected: "bool" });
                };
                let outcome = if *success {
                    Ok(elements.get(3).map(Value::from_json))
                } else {
                    let reason = elements
                        .get(3)
                        .ok_or(Error::BadElement { position: 3, expected: "failure reason" })?;
                    Err(Value::from_json(reason))
                };
                Ok(Message::Response { id, outcome })
            }
            "call-error" => {
                let reason = str_at(&elements, 2)?.to_string();
                Ok(Message::Error { id, reason })
            }
            other => Err(Error::UnknownTag(other.to_string())),
        }
    }
}

fn str_at(elements: &[Json], position: usize) -> Result<&str> {
    elements
        .get(position)
        .and_then(Json::as_str)
        .ok_or(Error::BadElement { position, expected: "string" })
}

fn int_at(elements: &[Json], position: usize) -> Result<i64> {
    elements
        .get(position)
        .and_then(Json::as_i64)
        .ok_or(Error::BadElement { position, expected: "integer" })
}
