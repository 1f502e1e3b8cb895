//! JSON array wire codec (`wamp.2.json`)
//!
//! Each message travels as `[code, field, field, ...]`. Trailing payload
//! elements are omitted when empty.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::message::{Message, MessageKind};
use crate::options::Payload;

/// WebSocket subprotocol name for this codec
pub const SUBPROTOCOL: &str = "wamp.2.json";

/// Encode a message into its array form
pub fn encode(message: &Message) -> Result<Value, ProtocolError> {
    let mut fields = vec![Value::from(message.kind().code())];

    match message {
        Message::Hello { realm, details } => {
            fields.push(Value::from(realm.as_str()));
            fields.push(to_value(details)?);
        }
        Message::Welcome { session, details } => {
            fields.push(Value::from(*session));
            fields.push(to_value(details)?);
        }
        Message::Abort { details, reason } | Message::Goodbye { details, reason } => {
            fields.push(to_value(details)?);
            fields.push(Value::from(reason.as_str()));
        }
        Message::Error {
            request_type,
            request,
            details,
            error,
            payload,
        } => {
            fields.push(Value::from(request_type.code()));
            fields.push(Value::from(*request));
            fields.push(Value::Object(details.clone()));
            fields.push(Value::from(error.as_str()));
            push_payload(&mut fields, payload);
        }
        Message::Publish {
            request,
            options,
            topic,
            payload,
        } => {
            fields.push(Value::from(*request));
            fields.push(to_value(options)?);
            fields.push(Value::from(topic.as_str()));
            push_payload(&mut fields, payload);
        }
        Message::Published {
            request,
            publication,
        } => {
            fields.push(Value::from(*request));
            fields.push(Value::from(*publication));
        }
        Message::Subscribe {
            request,
            options,
            topic,
        } => {
            fields.push(Value::from(*request));
            fields.push(to_value(options)?);
            fields.push(Value::from(topic.as_str()));
        }
        Message::Subscribed {
            request,
            subscription,
        }
        | Message::Unsubscribe {
            request,
            subscription,
        } => {
            fields.push(Value::from(*request));
            fields.push(Value::from(*subscription));
        }
        Message::Unsubscribed { request } | Message::Unregistered { request } => {
            fields.push(Value::from(*request));
        }
        Message::Event {
            subscription,
            publication,
            details,
            payload,
        } => {
            fields.push(Value::from(*subscription));
            fields.push(Value::from(*publication));
            fields.push(to_value(details)?);
            push_payload(&mut fields, payload);
        }
        Message::Call {
            request,
            options,
            procedure,
            payload,
        } => {
            fields.push(Value::from(*request));
            fields.push(to_value(options)?);
            fields.push(Value::from(procedure.as_str()));
            push_payload(&mut fields, payload);
        }
        Message::Cancel { request, options } => {
            fields.push(Value::from(*request));
            fields.push(to_value(options)?);
        }
        Message::Result {
            request,
            details,
            payload,
        } => {
            fields.push(Value::from(*request));
            fields.push(to_value(details)?);
            push_payload(&mut fields, payload);
        }
        Message::Register {
            request,
            options,
            procedure,
        } => {
            fields.push(Value::from(*request));
            fields.push(to_value(options)?);
            fields.push(Value::from(procedure.as_str()));
        }
        Message::Registered {
            request,
            registration,
        }
        | Message::Unregister {
            request,
            registration,
        } => {
            fields.push(Value::from(*request));
            fields.push(Value::from(*registration));
        }
        Message::Invocation {
            request,
            registration,
            details,
            payload,
        } => {
            fields.push(Value::from(*request));
            fields.push(Value::from(*registration));
            fields.push(to_value(details)?);
            push_payload(&mut fields, payload);
        }
        Message::Interrupt { request, options } => {
            fields.push(Value::from(*request));
            fields.push(to_value(options)?);
        }
        Message::Yield {
            request,
            options,
            payload,
        } => {
            fields.push(Value::from(*request));
            fields.push(to_value(options)?);
            push_payload(&mut fields, payload);
        }
    }

    Ok(Value::Array(fields))
}

/// Encode a message into a JSON text frame
pub fn to_json(message: &Message) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&encode(message)?)?)
}

/// Decode a JSON text frame
pub fn from_json(text: &str) -> Result<Message, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    decode(value)
}

/// Decode a message from its array form
pub fn decode(value: Value) -> Result<Message, ProtocolError> {
    let fields = match value {
        Value::Array(fields) => Fields(fields),
        _ => return Err(ProtocolError::malformed("message is not an array")),
    };

    let code = fields.id(0)?;
    let kind = MessageKind::from_code(code).ok_or(ProtocolError::UnknownMessageType(code))?;

    let message = match kind {
        MessageKind::Hello => Message::Hello {
            realm: fields.string(1)?,
            details: fields.dict(2)?,
        },
        MessageKind::Welcome => Message::Welcome {
            session: fields.id(1)?,
            details: fields.dict(2)?,
        },
        MessageKind::Abort => Message::Abort {
            details: fields.dict(1)?,
            reason: fields.string(2)?,
        },
        MessageKind::Goodbye => Message::Goodbye {
            details: fields.dict(1)?,
            reason: fields.string(2)?,
        },
        MessageKind::Error => {
            let request_code = fields.id(1)?;
            Message::Error {
                request_type: MessageKind::from_code(request_code)
                    .ok_or(ProtocolError::UnknownMessageType(request_code))?,
                request: fields.id(2)?,
                details: fields.dict(3)?,
                error: fields.string(4)?,
                payload: fields.payload(5)?,
            }
        }
        MessageKind::Publish => Message::Publish {
            request: fields.id(1)?,
            options: fields.dict(2)?,
            topic: fields.string(3)?,
            payload: fields.payload(4)?,
        },
        MessageKind::Published => Message::Published {
            request: fields.id(1)?,
            publication: fields.id(2)?,
        },
        MessageKind::Subscribe => Message::Subscribe {
            request: fields.id(1)?,
            options: fields.dict(2)?,
            topic: fields.string(3)?,
        },
        MessageKind::Subscribed => Message::Subscribed {
            request: fields.id(1)?,
            subscription: fields.id(2)?,
        },
        MessageKind::Unsubscribe => Message::Unsubscribe {
            request: fields.id(1)?,
            subscription: fields.id(2)?,
        },
        MessageKind::Unsubscribed => Message::Unsubscribed {
            request: fields.id(1)?,
        },
        MessageKind::Event => Message::Event {
            subscription: fields.id(1)?,
            publication: fields.id(2)?,
            details: fields.dict(3)?,
            payload: fields.payload(4)?,
        },
        MessageKind::Call => Message::Call {
            request: fields.id(1)?,
            options: fields.dict(2)?,
            procedure: fields.string(3)?,
            payload: fields.payload(4)?,
        },
        MessageKind::Cancel => Message::Cancel {
            request: fields.id(1)?,
            options: fields.dict(2)?,
        },
        MessageKind::Result => Message::Result {
            request: fields.id(1)?,
            details: fields.dict(2)?,
            payload: fields.payload(3)?,
        },
        MessageKind::Register => Message::Register {
            request: fields.id(1)?,
            options: fields.dict(2)?,
            procedure: fields.string(3)?,
        },
        MessageKind::Registered => Message::Registered {
            request: fields.id(1)?,
            registration: fields.id(2)?,
        },
        MessageKind::Unregister => Message::Unregister {
            request: fields.id(1)?,
            registration: fields.id(2)?,
        },
        MessageKind::Unregistered => Message::Unregistered {
            request: fields.id(1)?,
        },
        MessageKind::Invocation => Message::Invocation {
            request: fields.id(1)?,
            registration: fields.id(2)?,
            details: fields.dict(3)?,
            payload: fields.payload(4)?,
        },
        MessageKind::Interrupt => Message::Interrupt {
            request: fields.id(1)?,
            options: fields.dict(2)?,
        },
        MessageKind::Yield => Message::Yield {
            request: fields.id(1)?,
            options: fields.dict(2)?,
            payload: fields.payload(3)?,
        },
    };

    Ok(message)
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ProtocolError> {
    Ok(serde_json::to_value(value)?)
}

fn push_payload(fields: &mut Vec<Value>, payload: &Payload) {
    if payload.is_empty() {
        return;
    }
    fields.push(Value::Array(payload.args.clone()));
    if !payload.kwargs.is_empty() {
        fields.push(Value::Object(payload.kwargs.clone()));
    }
}

/// Positional access into a decoded array
struct Fields(Vec<Value>);

impl Fields {
    fn get(&self, index: usize) -> Result<&Value, ProtocolError> {
        self.0
            .get(index)
            .ok_or_else(|| ProtocolError::malformed(format!("missing element {}", index)))
    }

    fn id(&self, index: usize) -> Result<u64, ProtocolError> {
        self.get(index)?
            .as_u64()
            .ok_or_else(|| ProtocolError::malformed(format!("element {} is not an id", index)))
    }

    fn string(&self, index: usize) -> Result<String, ProtocolError> {
        self.get(index)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProtocolError::malformed(format!("element {} is not a string", index)))
    }

    fn dict<T: DeserializeOwned>(&self, index: usize) -> Result<T, ProtocolError> {
        let value = self.get(index)?;
        if !value.is_object() {
            return Err(ProtocolError::malformed(format!(
                "element {} is not a dictionary",
                index
            )));
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    fn payload(&self, index: usize) -> Result<Payload, ProtocolError> {
        let args = match self.0.get(index) {
            None => Vec::new(),
            Some(Value::Array(args)) => args.clone(),
            Some(_) => return Err(ProtocolError::malformed("arguments must be a list")),
        };
        let kwargs = match self.0.get(index + 1) {
            None => Map::new(),
            Some(Value::Object(kwargs)) => kwargs.clone(),
            Some(_) => return Err(ProtocolError::malformed("keyword arguments must be a dictionary")),
        };
        Ok(Payload { args, kwargs })
    }
}
