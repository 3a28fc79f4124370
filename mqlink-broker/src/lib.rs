mod errors;
pub mod http;
pub mod in_memory;
mod properties;
mod types;

pub use errors::{BrokerError, MESSAGE_NOT_EXIST, RECEIPT_HANDLE_ERROR};
pub use properties::{MessageProperties, PropertySink, PropertyValue};
pub use types::{
    ConfirmError, ConfirmResponse, ConsumeResponse, MessageRecord, PublishBody, PublishResponse,
    ReceiptHandle, Response, SUCCESS_CODE,
};

use async_trait::async_trait;

/// Channel that publishes normal messages to one topic.
#[async_trait]
pub trait Producer: Send + Sync + 'static {
    async fn publish(
        &self,
        body: String,
        tag: Option<String>,
        properties: Option<MessageProperties>,
    ) -> Result<PublishResponse, BrokerError>;
}

/// Channel that publishes transactional messages and finalises them.
#[async_trait]
pub trait TransProducer: Send + Sync + 'static {
    /// Publish a half-message. The response always carries a receipt handle.
    async fn publish(
        &self,
        body: String,
        tag: Option<String>,
        properties: Option<MessageProperties>,
    ) -> Result<PublishResponse, BrokerError>;

    /// Long-poll for half-messages whose transaction state must be checked.
    async fn consume_half_message(
        &self,
        num_of_messages: u32,
        wait_seconds: Option<u32>,
    ) -> Result<ConsumeResponse, BrokerError>;

    async fn commit(&self, receipt_handle: &str) -> Result<ConfirmResponse, BrokerError>;

    async fn rollback(&self, receipt_handle: &str) -> Result<ConfirmResponse, BrokerError>;
}

/// Channel that consumes and acknowledges messages for one topic and group.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    /// Long-poll for up to `num_of_messages`, waiting at most `wait_seconds`.
    /// An empty wait is reported as [`BrokerError::MessageNotExist`].
    async fn consume_message(
        &self,
        num_of_messages: u32,
        wait_seconds: Option<u32>,
    ) -> Result<ConsumeResponse, BrokerError>;

    async fn ack_message(
        &self,
        receipt_handles: Vec<ReceiptHandle>,
    ) -> Result<ConfirmResponse, BrokerError>;
}
