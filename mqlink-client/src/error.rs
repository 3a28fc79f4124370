use mqlink_broker::{BrokerError, Response};
use serde::Serialize;
use thiserror::Error;

/// Error type handlers return; any boxed error will do.
pub type SendableError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The broker answered with a non-success status code.
    #[error("{message}")]
    BrokerRejection {
        message: String,
        code: u16,
        request_id: Option<String>,
        body: Option<serde_json::Value>,
    },

    /// The call failed before a status code was obtained.
    #[error("broker transport failure: {0}")]
    TransportFailure(#[source] BrokerError),

    /// A message handler returned an error or panicked.
    #[error("message handler failed: {0}")]
    HandlerFailure(#[source] SendableError),

    #[error("message body JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid message property '{key}': {reason}")]
    InvalidProperty { key: String, reason: String },

    #[error("invalid subscribe options: {0}")]
    InvalidOptions(String),

    #[error("transactional publish of {message_id} returned no receipt handle")]
    MissingReceiptHandle { message_id: String },
}

impl ClientError {
    /// Map a transport-side error raised by `operation`.
    pub(crate) fn from_broker(operation: &str, err: BrokerError) -> Self {
        match err {
            BrokerError::Status {
                code,
                request_id,
                body,
            } => ClientError::BrokerRejection {
                message: rejection_message(operation, code),
                code,
                request_id,
                body,
            },
            other => ClientError::TransportFailure(other),
        }
    }

    /// Build a rejection from a response that carried a non-success code.
    pub(crate) fn rejected<T>(operation: &str, response: &Response<T>) -> Self
    where
        T: Serialize,
    {
        let body = serde_json::to_value(&response.body)
            .ok()
            .filter(|value| !value.is_null());
        ClientError::BrokerRejection {
            message: rejection_message(operation, response.code),
            code: response.code,
            request_id: response.request_id.clone(),
            body,
        }
    }

    pub(crate) fn handler_panicked() -> Self {
        ClientError::HandlerFailure("message handler panicked".into())
    }

    /// Status code of a broker rejection.
    pub fn code(&self) -> Option<u16> {
        match self {
            ClientError::BrokerRejection { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientError::BrokerRejection { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }
}

fn rejection_message(operation: &str, code: u16) -> String {
    format!("{operation} response status error, code: {code}")
}

/// Turn a channel result into a client result, treating non-success codes as
/// rejections.
pub(crate) fn check<T>(
    operation: &str,
    result: std::result::Result<Response<T>, BrokerError>,
) -> Result<Response<T>>
where
    T: Serialize,
{
    match result {
        Ok(response) if response.is_success() => Ok(response),
        Ok(response) => Err(ClientError::rejected(operation, &response)),
        Err(err) => Err(ClientError::from_broker(operation, err)),
    }
}
