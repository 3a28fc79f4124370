use crate::{MessageProperties, ReceiptHandle};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    pub instance_id: String,
    pub topic: String,
    /// Set for transactional publishes, which are bound to a producer group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub transactional: bool,
    pub message_body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<MessageProperties>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub instance_id: String,
    pub topic: String,
    pub group_id: String,
    pub num_of_messages: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckRequest {
    pub instance_id: String,
    pub topic: String,
    pub group_id: String,
    pub receipt_handles: Vec<ReceiptHandle>,
}

/// Commit or rollback of one transactional message.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub instance_id: String,
    pub topic: String,
    pub group_id: String,
    pub receipt_handle: ReceiptHandle,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
