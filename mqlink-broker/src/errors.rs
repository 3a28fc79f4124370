use thiserror::Error;

/// Error code the broker reports when a long-poll expires without messages.
pub const MESSAGE_NOT_EXIST: &str = "MessageNotExist";

/// Error code reported for unknown, stale or already finalised receipt handles.
pub const RECEIPT_HANDLE_ERROR: &str = "ReceiptHandleError";

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The long-poll ended without any message. Not a failure.
    #[error("no message available (request {})", request_id.as_deref().unwrap_or("-"))]
    MessageNotExist { request_id: Option<String> },
    #[error("broker returned status {code} (request {})", request_id.as_deref().unwrap_or("-"))]
    Status {
        code: u16,
        request_id: Option<String>,
        body: Option<serde_json::Value>,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl BrokerError {
    pub fn is_message_not_exist(&self) -> bool {
        matches!(self, BrokerError::MessageNotExist { .. })
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        BrokerError::Transport(err.to_string())
    }
}
