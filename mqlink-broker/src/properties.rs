use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Custom property value: the broker accepts strings and integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Number(i64),
    Text(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Number(value) => write!(f, "{value}"),
            PropertyValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

/// The capability calls a publish can carry besides body and tag.
pub trait PropertySink {
    fn message_key(&mut self, key: String);
    /// Absolute delivery time, milliseconds since the epoch.
    fn start_deliver_time(&mut self, time_millis: i64);
    /// Earliest first check-back, in seconds. Marks the message as transactional.
    fn trans_check_immunity_time(&mut self, time_seconds: i64);
    fn put_property(&mut self, key: String, value: PropertyValue);
}

/// Property bag attached to a publish request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_deliver_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trans_check_immunity_time: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

impl MessageProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_transactional(&self) -> bool {
        self.trans_check_immunity_time.is_some()
    }
}

impl PropertySink for MessageProperties {
    fn message_key(&mut self, key: String) {
        self.key = Some(key);
    }

    fn start_deliver_time(&mut self, time_millis: i64) {
        self.start_deliver_time = Some(time_millis);
    }

    fn trans_check_immunity_time(&mut self, time_seconds: i64) {
        self.trans_check_immunity_time = Some(time_seconds);
    }

    fn put_property(&mut self, key: String, value: PropertyValue) {
        self.custom.insert(key, value.to_string());
    }
}
