//! Scripted broker channels for unit tests.

use async_trait::async_trait;
use mqlink_broker::{
    BrokerError, ConfirmError, ConfirmResponse, ConsumeResponse, Consumer, MessageProperties,
    MessageRecord, Producer, PublishBody, PublishResponse, ReceiptHandle, Response, TransProducer,
    RECEIPT_HANDLE_ERROR,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::channels::Channels;

pub(crate) fn record(id: &str, receipt_handle: &str) -> MessageRecord {
    MessageRecord {
        id: id.to_string(),
        body_md5: "MD5".to_string(),
        publish_time: 1,
        next_consume_time: 2,
        first_consume_time: 1,
        consumed_times: 1,
        receipt_handle: receipt_handle.to_string(),
        body: "{}".to_string(),
        tag: String::new(),
        start_deliver_time: None,
        key: None,
        properties: None,
    }
}

/// Successful consume response whose records carry the given receipt handles.
pub(crate) fn batch(handles: &[&str]) -> ConsumeResponse {
    let records = handles
        .iter()
        .map(|handle| record(&format!("id-{handle}"), handle))
        .collect();
    Response::new(200, Some("req".to_string()), records)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PublishCall {
    pub(crate) body: String,
    pub(crate) tag: Option<String>,
    pub(crate) properties: Option<MessageProperties>,
    pub(crate) transactional: bool,
}

#[derive(Default)]
struct Script {
    consume: VecDeque<Result<ConsumeResponse, BrokerError>>,
    publish: VecDeque<Result<PublishResponse, BrokerError>>,
    publishes: Vec<PublishCall>,
    consume_calls: usize,
    half_polls: Vec<(u32, Option<u32>)>,
    acks: Vec<Vec<ReceiptHandle>>,
    ack_limit: Option<usize>,
    commits: Vec<ReceiptHandle>,
    rollbacks: Vec<ReceiptHandle>,
}

/// Broker double: consume calls replay a script and then block forever,
/// signalling [`ScriptedBroker::wait_until_exhausted`]. Every call is recorded.
#[derive(Clone, Default)]
pub(crate) struct ScriptedBroker {
    script: Arc<Mutex<Script>>,
    log: Arc<Mutex<Vec<String>>>,
    exhausted: Arc<Notify>,
}

impl ScriptedBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn channels(&self) -> Arc<Channels> {
        Arc::new(Channels {
            producer: Arc::new(self.clone()),
            trans_producer: Arc::new(self.clone()),
            consumer: Arc::new(self.clone()),
        })
    }

    pub(crate) fn push_consume(&self, result: Result<ConsumeResponse, BrokerError>) {
        self.script.lock().consume.push_back(result);
    }

    pub(crate) fn push_publish(&self, result: Result<PublishResponse, BrokerError>) {
        self.script.lock().publish.push_back(result);
    }

    /// Acks beyond the first `limit` calls are rejected as stale.
    pub(crate) fn reject_acks_after(&self, limit: usize) {
        self.script.lock().ack_limit = Some(limit);
    }

    /// Shared event log; every poll appends `"poll"`.
    pub(crate) fn log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }

    pub(crate) async fn wait_until_exhausted(&self) {
        self.exhausted.notified().await;
    }

    pub(crate) fn consume_calls(&self) -> usize {
        self.script.lock().consume_calls
    }

    pub(crate) fn half_polls(&self) -> Vec<(u32, Option<u32>)> {
        self.script.lock().half_polls.clone()
    }

    pub(crate) fn publish_calls(&self) -> Vec<PublishCall> {
        self.script.lock().publishes.clone()
    }

    pub(crate) fn ack_calls(&self) -> Vec<Vec<ReceiptHandle>> {
        self.script.lock().acks.clone()
    }

    pub(crate) fn commit_calls(&self) -> Vec<ReceiptHandle> {
        self.script.lock().commits.clone()
    }

    pub(crate) fn rollback_calls(&self) -> Vec<ReceiptHandle> {
        self.script.lock().rollbacks.clone()
    }

    async fn next_consume(&self) -> Result<ConsumeResponse, BrokerError> {
        self.log.lock().push("poll".to_string());
        let next = self.script.lock().consume.pop_front();
        match next {
            Some(result) => result,
            None => {
                self.exhausted.notify_one();
                std::future::pending().await
            }
        }
    }

    fn next_publish(&self, call: PublishCall) -> Result<PublishResponse, BrokerError> {
        let mut script = self.script.lock();
        let transactional = call.transactional;
        script.publishes.push(call);
        let index = script.publishes.len();
        script.publish.pop_front().unwrap_or_else(|| {
            Ok(Response::new(
                200,
                Some(format!("req-{index}")),
                PublishBody {
                    message_id: format!("msg-{index}"),
                    body_md5: "MD5".to_string(),
                    receipt_handle: transactional.then(|| format!("trans-{index}")),
                },
            ))
        })
    }
}

fn confirmed() -> ConfirmResponse {
    Response::new(200, Some("req".to_string()), None)
}

#[async_trait]
impl Producer for ScriptedBroker {
    async fn publish(
        &self,
        body: String,
        tag: Option<String>,
        properties: Option<MessageProperties>,
    ) -> Result<PublishResponse, BrokerError> {
        self.next_publish(PublishCall {
            body,
            tag,
            properties,
            transactional: false,
        })
    }
}

#[async_trait]
impl TransProducer for ScriptedBroker {
    async fn publish(
        &self,
        body: String,
        tag: Option<String>,
        properties: Option<MessageProperties>,
    ) -> Result<PublishResponse, BrokerError> {
        self.next_publish(PublishCall {
            body,
            tag,
            properties,
            transactional: true,
        })
    }

    async fn consume_half_message(
        &self,
        num_of_messages: u32,
        wait_seconds: Option<u32>,
    ) -> Result<ConsumeResponse, BrokerError> {
        self.script
            .lock()
            .half_polls
            .push((num_of_messages, wait_seconds));
        self.next_consume().await
    }

    async fn commit(&self, receipt_handle: &str) -> Result<ConfirmResponse, BrokerError> {
        self.script.lock().commits.push(receipt_handle.to_string());
        Ok(confirmed())
    }

    async fn rollback(&self, receipt_handle: &str) -> Result<ConfirmResponse, BrokerError> {
        self.script.lock().rollbacks.push(receipt_handle.to_string());
        Ok(confirmed())
    }
}

#[async_trait]
impl Consumer for ScriptedBroker {
    async fn consume_message(
        &self,
        _num_of_messages: u32,
        _wait_seconds: Option<u32>,
    ) -> Result<ConsumeResponse, BrokerError> {
        self.script.lock().consume_calls += 1;
        self.next_consume().await
    }

    async fn ack_message(
        &self,
        receipt_handles: Vec<ReceiptHandle>,
    ) -> Result<ConfirmResponse, BrokerError> {
        let mut script = self.script.lock();
        script.acks.push(receipt_handles.clone());
        let over_limit = script.ack_limit.is_some_and(|limit| script.acks.len() > limit);
        if !over_limit {
            return Ok(confirmed());
        }
        let errors = receipt_handles
            .into_iter()
            .map(|receipt_handle| ConfirmError {
                error_code: RECEIPT_HANDLE_ERROR.to_string(),
                error_message: "stale receipt handle".to_string(),
                receipt_handle,
            })
            .collect();
        Ok(Response::new(404, Some("req".to_string()), Some(errors)))
    }
}
