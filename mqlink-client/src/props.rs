use mqlink_broker::{MessageProperties, PropertySink, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ClientError, Result};

/// Absolute delivery time in milliseconds.
pub const SD_TIME: &str = "sdTime";
/// Transaction check immunity in seconds; marks a publish as transactional.
pub const TCI_TIME: &str = "tciTime";
/// Message key.
pub const KEY: &str = "key";

/// Flat property map attached to a publish. Recognised keys are [`SD_TIME`],
/// [`TCI_TIME`] and [`KEY`]; everything else is a custom property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgProps(BTreeMap<String, PropertyValue>);

impl MsgProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn start_deliver_time(self, time_millis: i64) -> Self {
        self.with(SD_TIME, time_millis)
    }

    pub fn trans_check_immunity_time(self, time_seconds: i64) -> Self {
        self.with(TCI_TIME, time_seconds)
    }

    pub fn message_key(self, key: impl Into<String>) -> Self {
        self.with(KEY, key.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }
}

impl<K, V> FromIterator<(K, V)> for MsgProps
where
    K: Into<String>,
    V: Into<PropertyValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Translate `props` into capability calls on `sink`, one call per entry.
pub fn parse_msg_props<S>(props: &MsgProps, sink: &mut S) -> Result<()>
where
    S: PropertySink,
{
    for (key, value) in props.iter() {
        match key.as_str() {
            SD_TIME => sink.start_deliver_time(integer(key, value)?),
            TCI_TIME => sink.trans_check_immunity_time(integer(key, value)?),
            KEY => sink.message_key(value.to_string()),
            _ => sink.put_property(key.clone(), value.clone()),
        }
    }
    Ok(())
}

/// Build the broker property bag for `props`.
pub fn to_message_properties(props: &MsgProps) -> Result<MessageProperties> {
    let mut properties = MessageProperties::new();
    parse_msg_props(props, &mut properties)?;
    Ok(properties)
}

fn integer(key: &str, value: &PropertyValue) -> Result<i64> {
    match value {
        PropertyValue::Number(number) => Ok(*number),
        PropertyValue::Text(text) => text.trim().parse().map_err(|_| ClientError::InvalidProperty {
            key: key.to_string(),
            reason: format!("expected an integer, got '{text}'"),
        }),
    }
}
