use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("mount target not found: {0}")]
    MissingTarget(String),
    #[error("server endpoint is not provided")]
    MissingEndpoint,
    #[error("invalid server endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("unsupported endpoint scheme '{scheme}', expected ws or wss")]
    UnsupportedScheme { scheme: String },
    #[error("connection already initialized for this session")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<crate::protocol::ProtocolError> for HandlerError {
    fn from(err: crate::protocol::ProtocolError) -> Self {
        Self(err.to_string())
    }
}
