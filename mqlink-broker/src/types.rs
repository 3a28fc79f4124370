use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque broker-issued token identifying one fetched message instance.
pub type ReceiptHandle = String;

/// Status code the broker uses for every successful call.
pub const SUCCESS_CODE: u16 = 200;

/// Envelope returned by every channel call: status code, request id and body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response<T> {
    pub code: u16,
    #[serde(default)]
    pub request_id: Option<String>,
    pub body: T,
}

impl<T> Response<T> {
    pub fn new(code: u16, request_id: Option<String>, body: T) -> Self {
        Self {
            code,
            request_id,
            body,
        }
    }

    /// Any 2xx status counts as success.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Body of a publish response. `receipt_handle` is only present for
/// transactional publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishBody {
    #[serde(rename = "MessageId")]
    pub message_id: String,
    #[serde(rename = "MessageBodyMD5")]
    pub body_md5: String,
    #[serde(
        rename = "ReceiptHandle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub receipt_handle: Option<ReceiptHandle>,
}

/// One message as fetched from the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(rename = "MessageId")]
    pub id: String,
    #[serde(rename = "MessageBodyMD5")]
    pub body_md5: String,
    /// Milliseconds since the epoch.
    #[serde(rename = "PublishTime")]
    pub publish_time: i64,
    #[serde(rename = "NextConsumeTime")]
    pub next_consume_time: i64,
    #[serde(rename = "FirstConsumeTime")]
    pub first_consume_time: i64,
    #[serde(rename = "ConsumedTimes")]
    pub consumed_times: u32,
    #[serde(rename = "ReceiptHandle")]
    pub receipt_handle: ReceiptHandle,
    #[serde(rename = "MessageBody")]
    pub body: String,
    #[serde(rename = "MessageTag", default)]
    pub tag: String,
    /// Absolute delivery timestamp for scheduled messages, or the relative
    /// check-back delay in seconds for transactional ones.
    #[serde(
        rename = "StartDeliverTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub start_deliver_time: Option<i64>,
    #[serde(rename = "MessageKey", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "Properties", default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, String>>,
}

/// Per-handle failure reported by ack/commit/rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmError {
    #[serde(rename = "ErrorCode")]
    pub error_code: String,
    #[serde(rename = "ErrorMessage")]
    pub error_message: String,
    #[serde(rename = "ReceiptHandle")]
    pub receipt_handle: ReceiptHandle,
}

pub type PublishResponse = Response<PublishBody>;
pub type ConsumeResponse = Response<Vec<MessageRecord>>;
pub type ConfirmResponse = Response<Option<Vec<ConfirmError>>>;
