pub mod bus;
pub mod error;
pub mod model;
pub mod protocol;

pub use bus::{BusEvent, Delivery, EventBus, HandlerResult, SubscriptionId, Topic};
pub use error::{ConfigError, HandlerError};
pub use model::{Instance, InstanceRef, InstanceStatus, LogEntry, LogScope};
pub use protocol::{
    decode_server_event, decode_wire, encode_command, encode_wire, Command, CommandKind,
    ProtocolError, ServerEvent, WireMessage, DEFAULT_MAX_FRAME_BYTES,
};
