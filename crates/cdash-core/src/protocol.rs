use crate::model::{Instance, InstanceRef};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Upper bound for outbound frames. Inbound size is left to the socket.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame is not a valid envelope: {0}")]
    Json(String),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("invalid payload for '{event}': {message}")]
    Payload { event: String, message: String },
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

/// Untyped envelope exactly as it travels over the socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Create,
    Start,
    Stop,
    Remove,
}

impl CommandKind {
    pub const ALL: [CommandKind; 4] = [
        CommandKind::Create,
        CommandKind::Start,
        CommandKind::Stop,
        CommandKind::Remove,
    ];

    pub fn wire_name(&self) -> &'static str {
        match self {
            CommandKind::Create => "CREATE",
            CommandKind::Start => "START",
            CommandKind::Stop => "STOP",
            CommandKind::Remove => "REMOVE",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.wire_name() == name)
    }

    pub fn requires_target(&self) -> bool {
        !matches!(self, CommandKind::Create)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    kind: CommandKind,
    target_id: Option<String>,
}

impl Command {
    pub fn new(kind: CommandKind, target_id: Option<String>) -> Result<Self, ProtocolError> {
        let target_id = target_id.filter(|id| !id.trim().is_empty());
        match (kind.requires_target(), target_id.is_some()) {
            (true, false) => Err(ProtocolError::InvalidCommand(format!(
                "{kind} requires a target instance id"
            ))),
            (false, true) => Err(ProtocolError::InvalidCommand(format!(
                "{kind} does not take a target instance id"
            ))),
            _ => Ok(Self { kind, target_id }),
        }
    }

    pub fn create() -> Self {
        Self {
            kind: CommandKind::Create,
            target_id: None,
        }
    }

    pub fn start(id: impl Into<String>) -> Self {
        Self::targeted(CommandKind::Start, id.into())
    }

    pub fn stop(id: impl Into<String>) -> Self {
        Self::targeted(CommandKind::Stop, id.into())
    }

    pub fn remove(id: impl Into<String>) -> Self {
        Self::targeted(CommandKind::Remove, id.into())
    }

    fn targeted(kind: CommandKind, id: String) -> Self {
        Self {
            kind,
            target_id: Some(id),
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    pub fn to_wire(&self) -> WireMessage {
        let payload = match self.target_id.as_ref() {
            Some(id) => serde_json::json!({ "id": id }),
            None => Value::String(String::new()),
        };
        WireMessage {
            event: self.kind.wire_name().to_string(),
            payload,
        }
    }

    pub fn from_wire(message: &WireMessage) -> Result<Self, ProtocolError> {
        let kind = CommandKind::from_wire_name(&message.event)
            .ok_or_else(|| ProtocolError::UnknownEvent(message.event.clone()))?;
        if !kind.requires_target() {
            return Self::new(kind, None);
        }
        let target: InstanceRef = parse_payload(&message.event, message.payload.clone())?;
        Self::new(kind, Some(target.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    InstancesLoaded(Vec<Instance>),
    Created(Instance),
    Started(InstanceRef),
    Stopped(InstanceRef),
    Removed(InstanceRef),
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::InstancesLoaded(_) => "Instances",
            ServerEvent::Created(_) => "Created",
            ServerEvent::Started(_) => "Started",
            ServerEvent::Stopped(_) => "Stopped",
            ServerEvent::Removed(_) => "Removed",
        }
    }

    pub fn from_wire(message: WireMessage) -> Result<Self, ProtocolError> {
        let WireMessage { event, payload } = message;
        match event.as_str() {
            "Instances" => parse_payload(&event, payload).map(ServerEvent::InstancesLoaded),
            "Created" => parse_payload(&event, payload).map(ServerEvent::Created),
            "Started" => parse_payload(&event, payload).map(ServerEvent::Started),
            "Stopped" => parse_payload(&event, payload).map(ServerEvent::Stopped),
            "Removed" => parse_payload(&event, payload).map(ServerEvent::Removed),
            _ => Err(ProtocolError::UnknownEvent(event)),
        }
    }
}

fn parse_payload<T: DeserializeOwned>(event: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|err| ProtocolError::Payload {
        event: event.to_string(),
        message: err.to_string(),
    })
}

pub fn encode_wire(message: &WireMessage, max_frame_bytes: usize) -> Result<String, ProtocolError> {
    let encoded =
        serde_json::to_string(message).map_err(|err| ProtocolError::Json(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(ProtocolError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn encode_command(command: &Command, max_frame_bytes: usize) -> Result<String, ProtocolError> {
    encode_wire(&command.to_wire(), max_frame_bytes)
}

pub fn decode_wire(text: &str) -> Result<WireMessage, ProtocolError> {
    serde_json::from_str(text.trim()).map_err(|err| ProtocolError::Json(err.to_string()))
}

pub fn decode_server_event(text: &str) -> Result<ServerEvent, ProtocolError> {
    decode_wire(text).and_then(ServerEvent::from_wire)
}
