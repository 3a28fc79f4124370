use mqlink_broker::{ConfirmResponse, MessageRecord, PublishBody};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::{
    channels::Channels,
    error::{check, Result},
};

/// A fetched message. Consumed once [`Message::done`] succeeds; until then the
/// broker redelivers it after its next consume time.
#[derive(Clone)]
pub struct Message {
    channels: Arc<Channels>,
    record: Arc<MessageRecord>,
}

impl Message {
    pub(crate) fn new(channels: Arc<Channels>, record: MessageRecord) -> Self {
        Self {
            channels,
            record: Arc::new(record),
        }
    }

    pub fn record(&self) -> &MessageRecord {
        &self.record
    }

    pub fn receipt_handle(&self) -> &str {
        &self.record.receipt_handle
    }

    /// Decode the JSON body written by [`crate::TopicClient::send`].
    pub fn json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        Ok(serde_json::from_str(&self.record.body)?)
    }

    /// Acknowledge this message.
    pub async fn done(&self) -> Result<ConfirmResponse> {
        let result = self
            .channels
            .consumer
            .ack_message(vec![self.record.receipt_handle.clone()])
            .await;
        check("ack", result)
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Message").field(&self.record).finish()
    }
}

/// A transactional half-message delivered for check-back.
#[derive(Clone)]
pub struct HalfMessage {
    channels: Arc<Channels>,
    record: Arc<MessageRecord>,
}

impl HalfMessage {
    pub(crate) fn new(channels: Arc<Channels>, record: MessageRecord) -> Self {
        Self {
            channels,
            record: Arc::new(record),
        }
    }

    pub fn record(&self) -> &MessageRecord {
        &self.record
    }

    pub fn receipt_handle(&self) -> &str {
        &self.record.receipt_handle
    }

    pub fn json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        Ok(serde_json::from_str(&self.record.body)?)
    }

    /// Make the message visible to consumers.
    pub async fn commit(&self) -> Result<ConfirmResponse> {
        self.channels.commit(&self.record.receipt_handle).await
    }

    /// Discard the message.
    pub async fn rollback(&self) -> Result<ConfirmResponse> {
        self.channels.rollback(&self.record.receipt_handle).await
    }
}

impl std::fmt::Debug for HalfMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HalfMessage").field(&self.record).finish()
    }
}

/// Result of a transactional publish. The message stays invisible to
/// consumers until committed.
#[derive(Clone)]
pub struct TransMessage {
    channels: Arc<Channels>,
    body: PublishBody,
    receipt_handle: String,
}

impl TransMessage {
    pub(crate) fn new(channels: Arc<Channels>, body: PublishBody, receipt_handle: String) -> Self {
        Self {
            channels,
            body,
            receipt_handle,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.body.message_id
    }

    pub fn body_md5(&self) -> &str {
        &self.body.body_md5
    }

    pub fn receipt_handle(&self) -> &str {
        &self.receipt_handle
    }

    pub async fn commit(&self) -> Result<ConfirmResponse> {
        self.channels.commit(&self.receipt_handle).await
    }

    pub async fn rollback(&self) -> Result<ConfirmResponse> {
        self.channels.rollback(&self.receipt_handle).await
    }
}

impl std::fmt::Debug for TransMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransMessage")
            .field("message_id", &self.body.message_id)
            .field("receipt_handle", &self.receipt_handle)
            .finish()
    }
}
