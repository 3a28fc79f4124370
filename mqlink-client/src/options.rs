use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ClientError, Result};

/// Largest batch the broker hands out per long-poll.
pub const MAX_BATCH_SIZE: u32 = 16;
/// Longest long-poll wait the broker accepts.
pub const MAX_WAIT_SECONDS: u32 = 30;
/// Long-poll wait used when a subscription does not set one.
pub const DEFAULT_WAIT_SECONDS: u32 = 10;

/// Connection and topic identity of one [`crate::TopicClient`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    pub endpoint: String,
    pub access_key: String,
    pub access_secret: String,
    pub topic: String,
    pub group: String,
    pub instance: String,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("access_secret", &"<redacted>")
            .field("topic", &self.topic)
            .field("group", &self.group)
            .field("instance", &self.instance)
            .finish()
    }
}

/// Per-subscription polling parameters, frozen for the lifetime of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    num_of_messages: u32,
    wait_seconds: Option<u32>,
}

impl SubscribeOptions {
    pub fn new(num_of_messages: u32, wait_seconds: Option<u32>) -> Result<Self> {
        if num_of_messages == 0 || num_of_messages > MAX_BATCH_SIZE {
            return Err(ClientError::InvalidOptions(format!(
                "num_of_messages must be between 1 and {MAX_BATCH_SIZE}, got {num_of_messages}"
            )));
        }
        if let Some(wait) = wait_seconds {
            if wait > MAX_WAIT_SECONDS {
                return Err(ClientError::InvalidOptions(format!(
                    "wait_seconds must be at most {MAX_WAIT_SECONDS}, got {wait}"
                )));
            }
        }
        Ok(Self {
            num_of_messages,
            wait_seconds,
        })
    }

    pub fn num_of_messages(&self) -> u32 {
        self.num_of_messages
    }

    pub fn wait_seconds(&self) -> Option<u32> {
        self.wait_seconds
    }

    /// The wait actually sent to the broker.
    pub fn effective_wait_seconds(&self) -> u32 {
        self.wait_seconds.unwrap_or(DEFAULT_WAIT_SECONDS)
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            num_of_messages: MAX_BATCH_SIZE,
            wait_seconds: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_bounds() {
        assert!(SubscribeOptions::new(0, None).is_err());
        assert!(SubscribeOptions::new(MAX_BATCH_SIZE + 1, None).is_err());
        assert!(SubscribeOptions::new(1, None).is_ok());
        assert!(SubscribeOptions::new(MAX_BATCH_SIZE, Some(MAX_WAIT_SECONDS)).is_ok());
        assert!(SubscribeOptions::new(3, Some(MAX_WAIT_SECONDS + 1)).is_err());
    }

    #[test]
    fn wait_defaults_to_ten_seconds() {
        let options = SubscribeOptions::new(4, None).unwrap();
        assert_eq!(options.effective_wait_seconds(), DEFAULT_WAIT_SECONDS);
        let options = SubscribeOptions::new(4, Some(0)).unwrap();
        assert_eq!(options.effective_wait_seconds(), 0);
    }

    #[test]
    fn debug_hides_secret() {
        let options = Options {
            endpoint: "http://localhost".into(),
            access_key: "ak".into(),
            access_secret: "very-secret".into(),
            topic: "t".into(),
            group: "g".into(),
            instance: "i".into(),
        };
        let rendered = format!("{options:?}");
        assert!(!rendered.contains("very-secret"));
    }

    #[test]
    fn options_deserialize_from_camel_case() {
        let options: Options = serde_json::from_str(
            r#"{"endpoint":"http://e","accessKey":"ak","accessSecret":"s","topic":"t","group":"g","instance":"i"}"#,
        )
        .unwrap();
        assert_eq!(options.access_key, "ak");
    }
}
