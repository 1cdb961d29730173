use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub const LOG_TIME_FORMAT: &str = "%H:%M:%S %d.%m.%Y";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Created,
    Started,
    Stopped,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Created => "created",
            InstanceStatus::Started => "started",
            InstanceStatus::Stopped => "stopped",
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, InstanceStatus::Started)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub status: InstanceStatus,
}

impl Instance {
    pub fn new(id: impl Into<String>, status: InstanceStatus) -> Self {
        Self {
            id: id.into(),
            status,
        }
    }
}

/// Payload naming a single instance. Extra fields sent alongside the id are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceRef {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
}

impl InstanceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogScope {
    All,
    Instance(String),
}

impl LogScope {
    pub fn as_str(&self) -> &str {
        match self {
            LogScope::All => "all",
            LogScope::Instance(id) => id.as_str(),
        }
    }
}

impl fmt::Display for LogScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: LogScope,
    pub timestamp: DateTime<Utc>,
    pub info: String,
}

impl LogEntry {
    pub fn all(info: impl Into<String>) -> Self {
        Self::at(LogScope::All, Utc::now(), info)
    }

    pub fn instance(id: impl Into<String>, info: impl Into<String>) -> Self {
        Self::at(LogScope::Instance(id.into()), Utc::now(), info)
    }

    pub fn at(id: LogScope, timestamp: DateTime<Utc>, info: impl Into<String>) -> Self {
        Self {
            id,
            timestamp,
            info: info.into(),
        }
    }

    pub fn formatted_time(&self) -> String {
        self.timestamp
            .with_timezone(&Local)
            .format(LOG_TIME_FORMAT)
            .to_string()
    }
}

pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: serde_json::Value = serde_json::Value::deserialize(deserializer)?;
    match val {
        serde_json::Value::String(s) if !s.trim().is_empty() => Ok(s),
        serde_json::Value::String(_) => Err(serde::de::Error::custom("instance id is empty")),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}
