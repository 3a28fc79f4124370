use crate::{
    BrokerError, ConfirmError, ConfirmResponse, ConsumeResponse, Consumer, MessageProperties,
    MessageRecord, Producer, PublishBody, PublishResponse, ReceiptHandle, Response, TransProducer,
    RECEIPT_HANDLE_ERROR, SUCCESS_CODE,
};
use async_trait::async_trait;
use chrono::Utc;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);
const HALF_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const NOT_FOUND: u16 = 404;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body_md5: String,
    body: String,
    tag: String,
    publish_time: i64,
    visible_at: i64,
    first_consume_time: Option<i64>,
    consumed_times: u32,
    start_deliver_time: Option<i64>,
    key: Option<String>,
    custom: HashMap<String, String>,
}

impl StoredMessage {
    fn new(body: String, tag: Option<String>, properties: Option<MessageProperties>) -> Self {
        let now = now_millis();
        let properties = properties.unwrap_or_default();
        let body_md5 = format!("{:X}", Md5::digest(body.as_bytes()));
        Self {
            id: Uuid::new_v4().simple().to_string().to_uppercase(),
            body_md5,
            body,
            tag: tag.unwrap_or_default(),
            publish_time: now,
            visible_at: properties.start_deliver_time.unwrap_or(now).max(now),
            first_consume_time: None,
            consumed_times: 0,
            start_deliver_time: properties
                .start_deliver_time
                .or(properties.trans_check_immunity_time),
            key: properties.key,
            custom: properties.custom.into_iter().collect(),
        }
    }

    fn deliver(&mut self, now: i64, next_consume_time: i64) -> MessageRecord {
        self.consumed_times += 1;
        let first_consume_time = *self.first_consume_time.get_or_insert(now);
        MessageRecord {
            id: self.id.clone(),
            body_md5: self.body_md5.clone(),
            publish_time: self.publish_time,
            next_consume_time,
            first_consume_time,
            consumed_times: self.consumed_times,
            receipt_handle: new_receipt_handle(),
            body: self.body.clone(),
            tag: self.tag.clone(),
            start_deliver_time: self.start_deliver_time,
            key: self.key.clone(),
            properties: (!self.custom.is_empty()).then(|| self.custom.clone()),
        }
    }
}

struct Inflight {
    message: StoredMessage,
    next_consume_time: i64,
}

struct HalfMessage {
    message: StoredMessage,
    check_at: i64,
}

#[derive(Default)]
struct TopicState {
    ready: VecDeque<StoredMessage>,
    inflight: HashMap<ReceiptHandle, Inflight>,
    half: HashMap<ReceiptHandle, HalfMessage>,
}

impl TopicState {
    fn requeue_expired(&mut self, now: i64) {
        let expired: Vec<ReceiptHandle> = self
            .inflight
            .iter()
            .filter(|(_, entry)| entry.next_consume_time <= now)
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in expired {
            if let Some(entry) = self.inflight.remove(&handle) {
                self.ready.push_back(entry.message);
            }
        }
    }

    fn take_visible(&mut self, limit: usize, now: i64, visibility: i64) -> Vec<MessageRecord> {
        let mut records = Vec::new();
        let mut index = 0;
        while records.len() < limit && index < self.ready.len() {
            if self.ready[index].visible_at > now {
                index += 1;
                continue;
            }
            let Some(mut message) = self.ready.remove(index) else {
                break;
            };
            let next_consume_time = now + visibility;
            let record = message.deliver(now, next_consume_time);
            self.inflight.insert(
                record.receipt_handle.clone(),
                Inflight {
                    message,
                    next_consume_time,
                },
            );
            records.push(record);
        }
        records
    }

    fn take_half(&mut self, limit: usize, now: i64) -> Vec<MessageRecord> {
        let due: Vec<ReceiptHandle> = self
            .half
            .iter()
            .filter(|(_, entry)| entry.check_at <= now)
            .map(|(handle, _)| handle.clone())
            .take(limit)
            .collect();
        let check_interval = HALF_CHECK_INTERVAL.as_millis() as i64;
        let mut records = Vec::with_capacity(due.len());
        for handle in due {
            if let Some(mut entry) = self.half.remove(&handle) {
                entry.check_at = now + check_interval;
                let record = entry.message.deliver(now, entry.check_at);
                self.half.insert(record.receipt_handle.clone(), entry);
                records.push(record);
            }
        }
        records
    }

    /// Earliest instant at which a currently hidden message becomes visible.
    fn next_visibility(&self, now: i64) -> Option<i64> {
        let ready = self.ready.iter().map(|m| m.visible_at);
        let inflight = self.inflight.values().map(|e| e.next_consume_time);
        ready.chain(inflight).filter(|at| *at > now).min()
    }

    fn next_half_check(&self, now: i64) -> Option<i64> {
        self.half
            .values()
            .map(|entry| entry.check_at)
            .filter(|at| *at > now)
            .min()
    }
}

struct BrokerState {
    topics: Mutex<HashMap<String, TopicState>>,
    notify: Notify,
    visibility_timeout: Duration,
}

/// Broker that keeps every topic in process memory. Consumer groups are not
/// modelled: all consumers of a topic share one queue.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages not acknowledged within `timeout` are redelivered.
    pub fn with_visibility_timeout(timeout: Duration) -> Self {
        Self {
            state: Arc::new(BrokerState {
                topics: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                visibility_timeout: timeout,
            }),
        }
    }

    /// Channel bound to one topic. It implements every channel trait.
    pub fn channel(&self, topic: impl Into<String>) -> InMemoryChannel {
        InMemoryChannel {
            state: Arc::clone(&self.state),
            topic: topic.into(),
        }
    }

    /// Number of messages waiting to be delivered, including scheduled ones.
    pub fn ready_len(&self, topic: &str) -> usize {
        self.state
            .topics
            .lock()
            .get(topic)
            .map(|t| t.ready.len())
            .unwrap_or_default()
    }

    /// Number of delivered messages awaiting acknowledgement.
    pub fn inflight_len(&self, topic: &str) -> usize {
        self.state
            .topics
            .lock()
            .get(topic)
            .map(|t| t.inflight.len())
            .unwrap_or_default()
    }

    /// Number of transactional messages neither committed nor rolled back.
    pub fn half_len(&self, topic: &str) -> usize {
        self.state
            .topics
            .lock()
            .get(topic)
            .map(|t| t.half.len())
            .unwrap_or_default()
    }
}

/// Topic-bound handle into an [`InMemoryBroker`].
#[derive(Clone)]
pub struct InMemoryChannel {
    state: Arc<BrokerState>,
    topic: String,
}

enum PollKind {
    Messages,
    HalfMessages,
}

impl InMemoryChannel {
    fn with_topic<R>(&self, f: impl FnOnce(&mut TopicState) -> R) -> R {
        let mut topics = self.state.topics.lock();
        f(topics.entry(self.topic.clone()).or_default())
    }

    async fn long_poll(
        &self,
        kind: PollKind,
        num_of_messages: u32,
        wait_seconds: Option<u32>,
    ) -> Result<ConsumeResponse, BrokerError> {
        let request_id = new_request_id();
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(u64::from(wait_seconds.unwrap_or_default()));
        let visibility = self.state.visibility_timeout.as_millis() as i64;
        let limit = num_of_messages as usize;

        loop {
            let notified = self.state.notify.notified();
            let now = now_millis();
            let (records, wake_at) = self.with_topic(|topic| match kind {
                PollKind::Messages => {
                    topic.requeue_expired(now);
                    let records = topic.take_visible(limit, now, visibility);
                    (records, topic.next_visibility(now))
                }
                PollKind::HalfMessages => (topic.take_half(limit, now), topic.next_half_check(now)),
            });

            if !records.is_empty() {
                return Ok(Response::new(SUCCESS_CODE, Some(request_id), records));
            }

            let mut wake = deadline;
            if let Some(at) = wake_at {
                let delay = Duration::from_millis(at.saturating_sub(now).max(0) as u64);
                if let Some(due) = tokio::time::Instant::now().checked_add(delay) {
                    wake = wake.min(due);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrokerError::MessageNotExist {
                    request_id: Some(request_id),
                });
            }
            let _ = tokio::time::timeout_at(wake, notified).await;
        }
    }

    fn finalize_half(&self, receipt_handle: &str, commit: bool) -> ConfirmResponse {
        let request_id = Some(new_request_id());
        let found = self.with_topic(|topic| match topic.half.remove(receipt_handle) {
            Some(entry) => {
                if commit {
                    let mut message = entry.message;
                    message.consumed_times = 0;
                    message.first_consume_time = None;
                    topic.ready.push_back(message);
                }
                true
            }
            None => false,
        });

        if !found {
            return rejected(request_id, vec![receipt_handle.to_string()]);
        }
        if commit {
            self.state.notify.notify_waiters();
        }
        Response::new(SUCCESS_CODE, request_id, None)
    }
}

#[async_trait]
impl Producer for InMemoryChannel {
    async fn publish(
        &self,
        body: String,
        tag: Option<String>,
        properties: Option<MessageProperties>,
    ) -> Result<PublishResponse, BrokerError> {
        let message = StoredMessage::new(body, tag, properties);
        let body = PublishBody {
            message_id: message.id.clone(),
            body_md5: message.body_md5.clone(),
            receipt_handle: None,
        };
        self.with_topic(|topic| topic.ready.push_back(message));
        self.state.notify.notify_waiters();
        Ok(Response::new(SUCCESS_CODE, Some(new_request_id()), body))
    }
}

#[async_trait]
impl TransProducer for InMemoryChannel {
    async fn publish(
        &self,
        body: String,
        tag: Option<String>,
        properties: Option<MessageProperties>,
    ) -> Result<PublishResponse, BrokerError> {
        let check_after = properties
            .as_ref()
            .and_then(|p| p.trans_check_immunity_time)
            .unwrap_or_default();
        let message = StoredMessage::new(body, tag, properties);
        let receipt_handle = new_receipt_handle();
        let body = PublishBody {
            message_id: message.id.clone(),
            body_md5: message.body_md5.clone(),
            receipt_handle: Some(receipt_handle.clone()),
        };
        let check_at = message
            .publish_time
            .saturating_add(check_after.max(0).saturating_mul(1000));
        self.with_topic(|topic| {
            topic
                .half
                .insert(receipt_handle, HalfMessage { message, check_at })
        });
        self.state.notify.notify_waiters();
        Ok(Response::new(SUCCESS_CODE, Some(new_request_id()), body))
    }

    async fn consume_half_message(
        &self,
        num_of_messages: u32,
        wait_seconds: Option<u32>,
    ) -> Result<ConsumeResponse, BrokerError> {
        self.long_poll(PollKind::HalfMessages, num_of_messages, wait_seconds)
            .await
    }

    async fn commit(&self, receipt_handle: &str) -> Result<ConfirmResponse, BrokerError> {
        Ok(self.finalize_half(receipt_handle, true))
    }

    async fn rollback(&self, receipt_handle: &str) -> Result<ConfirmResponse, BrokerError> {
        Ok(self.finalize_half(receipt_handle, false))
    }
}

#[async_trait]
impl Consumer for InMemoryChannel {
    async fn consume_message(
        &self,
        num_of_messages: u32,
        wait_seconds: Option<u32>,
    ) -> Result<ConsumeResponse, BrokerError> {
        self.long_poll(PollKind::Messages, num_of_messages, wait_seconds)
            .await
    }

    async fn ack_message(
        &self,
        receipt_handles: Vec<ReceiptHandle>,
    ) -> Result<ConfirmResponse, BrokerError> {
        let request_id = Some(new_request_id());
        let unknown: Vec<ReceiptHandle> = self.with_topic(|topic| {
            receipt_handles
                .into_iter()
                .filter(|handle| topic.inflight.remove(handle).is_none())
                .collect()
        });
        if unknown.is_empty() {
            Ok(Response::new(SUCCESS_CODE, request_id, None))
        } else {
            Ok(rejected(request_id, unknown))
        }
    }
}

fn rejected(request_id: Option<String>, handles: Vec<ReceiptHandle>) -> ConfirmResponse {
    let errors = handles
        .into_iter()
        .map(|receipt_handle| ConfirmError {
            error_code: RECEIPT_HANDLE_ERROR.to_string(),
            error_message: "receipt handle is unknown or no longer valid".to_string(),
            receipt_handle,
        })
        .collect();
    Response::new(NOT_FOUND, request_id, Some(errors))
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn new_receipt_handle() -> ReceiptHandle {
    Uuid::new_v4().to_string()
}

fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props_with_check(seconds: i64) -> MessageProperties {
        MessageProperties {
            trans_check_immunity_time: Some(seconds),
            ..MessageProperties::default()
        }
    }

    #[tokio::test]
    async fn consume_returns_published_message_once() {
        let broker = InMemoryBroker::new();
        let channel = broker.channel("orders");
        Producer::publish(&channel, "hello".into(), Some("created".into()), None)
            .await
            .unwrap();

        let response = channel.consume_message(16, Some(0)).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.body.len(), 1);
        let record = &response.body[0];
        assert_eq!(record.body, "hello");
        assert_eq!(record.tag, "created");
        assert_eq!(record.consumed_times, 1);
        assert_eq!(record.body_md5, "5D41402ABC4B2A76B9719D911017C592");

        let empty = channel.consume_message(16, Some(0)).await;
        assert!(matches!(empty, Err(BrokerError::MessageNotExist { .. })));
    }

    #[tokio::test]
    async fn ack_is_accepted_once() {
        let broker = InMemoryBroker::new();
        let channel = broker.channel("orders");
        Producer::publish(&channel, "a".into(), None, None)
            .await
            .unwrap();
        let record = channel.consume_message(1, Some(0)).await.unwrap().body.remove(0);

        let first = channel
            .ack_message(vec![record.receipt_handle.clone()])
            .await
            .unwrap();
        assert!(first.is_success());
        assert_eq!(broker.inflight_len("orders"), 0);

        let second = channel
            .ack_message(vec![record.receipt_handle.clone()])
            .await
            .unwrap();
        assert_eq!(second.code, NOT_FOUND);
        let errors = second.body.unwrap();
        assert_eq!(errors[0].error_code, RECEIPT_HANDLE_ERROR);
        assert_eq!(errors[0].receipt_handle, record.receipt_handle);
    }

    #[tokio::test]
    async fn unacknowledged_messages_are_redelivered_with_new_handle() {
        let broker = InMemoryBroker::with_visibility_timeout(Duration::ZERO);
        let channel = broker.channel("orders");
        Producer::publish(&channel, "retry me".into(), None, None)
            .await
            .unwrap();

        let first = channel.consume_message(1, Some(0)).await.unwrap().body.remove(0);
        let second = channel.consume_message(1, Some(0)).await.unwrap().body.remove(0);
        assert_eq!(first.id, second.id);
        assert_ne!(first.receipt_handle, second.receipt_handle);
        assert_eq!(second.consumed_times, 2);
        assert_eq!(second.first_consume_time, first.first_consume_time);

        let stale = channel
            .ack_message(vec![first.receipt_handle])
            .await
            .unwrap();
        assert!(!stale.is_success());
    }

    #[tokio::test]
    async fn scheduled_message_stays_hidden_until_due() {
        let broker = InMemoryBroker::new();
        let channel = broker.channel("orders");
        let props = MessageProperties {
            start_deliver_time: Some(now_millis() + 60_000),
            ..MessageProperties::default()
        };
        Producer::publish(&channel, "later".into(), None, Some(props))
            .await
            .unwrap();

        let result = channel.consume_message(1, Some(0)).await;
        assert!(matches!(result, Err(BrokerError::MessageNotExist { .. })));
        assert_eq!(broker.ready_len("orders"), 1);
    }

    #[tokio::test]
    async fn long_poll_wakes_on_publish() {
        let broker = InMemoryBroker::new();
        let consumer = broker.channel("orders");
        let producer = broker.channel("orders");

        let waiter = tokio::spawn(async move { consumer.consume_message(1, Some(5)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        Producer::publish(&producer, "wake".into(), None, None)
            .await
            .unwrap();

        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.body[0].body, "wake");
    }

    #[tokio::test]
    async fn committed_half_message_becomes_consumable() {
        let broker = InMemoryBroker::new();
        let channel = broker.channel("payments");
        let published = TransProducer::publish(&channel, "pay".into(), None, Some(props_with_check(60)))
            .await
            .unwrap();
        let handle = published.body.receipt_handle.unwrap();

        let hidden = channel.consume_message(1, Some(0)).await;
        assert!(matches!(hidden, Err(BrokerError::MessageNotExist { .. })));

        let committed = channel.commit(&handle).await.unwrap();
        assert!(committed.is_success());
        let response = channel.consume_message(1, Some(0)).await.unwrap();
        assert_eq!(response.body[0].body, "pay");
        assert_eq!(broker.half_len("payments"), 0);

        let again = channel.commit(&handle).await.unwrap();
        assert_eq!(again.code, NOT_FOUND);
    }

    #[tokio::test]
    async fn rolled_back_half_message_is_discarded() {
        let broker = InMemoryBroker::new();
        let channel = broker.channel("payments");
        let published = TransProducer::publish(&channel, "cancel".into(), None, None)
            .await
            .unwrap();
        let handle = published.body.receipt_handle.unwrap();

        assert!(channel.rollback(&handle).await.unwrap().is_success());
        assert_eq!(broker.half_len("payments"), 0);
        let result = channel.consume_message(1, Some(0)).await;
        assert!(matches!(result, Err(BrokerError::MessageNotExist { .. })));
    }

    #[tokio::test]
    async fn half_message_check_back_issues_fresh_handle() {
        let broker = InMemoryBroker::new();
        let channel = broker.channel("payments");
        let published = TransProducer::publish(&channel, "check".into(), None, Some(props_with_check(0)))
            .await
            .unwrap();
        let publish_handle = published.body.receipt_handle.unwrap();

        let response = channel.consume_half_message(4, Some(0)).await.unwrap();
        assert_eq!(response.body.len(), 1);
        let check_handle = response.body[0].receipt_handle.clone();
        assert_ne!(check_handle, publish_handle);

        assert!(!channel.commit(&publish_handle).await.unwrap().is_success());
        assert!(channel.commit(&check_handle).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn extreme_check_immunity_is_clamped() {
        let broker = InMemoryBroker::new();
        let channel = broker.channel("payments");
        let published =
            TransProducer::publish(&channel, "later".into(), None, Some(props_with_check(i64::MAX)))
                .await
                .unwrap();
        assert!(published.body.receipt_handle.is_some());
        assert_eq!(broker.half_len("payments"), 1);

        let result = channel.consume_half_message(4, Some(0)).await;
        assert!(matches!(result, Err(BrokerError::MessageNotExist { .. })));
        assert_eq!(broker.half_len("payments"), 1);
    }
}
