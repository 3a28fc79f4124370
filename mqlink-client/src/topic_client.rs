use log::{info, warn};
use mqlink_broker::{
    http::client::MqClient, ConfirmResponse, Consumer, MessageProperties, MessageRecord, Producer,
    PublishResponse, TransProducer,
};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;

use crate::{
    backoff::BackoffPolicy,
    channels::Channels,
    consume_loop::{ConsumeLoop, Feed, HalfMessageFeed, MessageFeed},
    error::{check, ClientError, Result},
    events::{boxed_handler, ErrorBus, EventBus, Handler, HandlerResult},
    message::{HalfMessage, Message, TransMessage},
    options::{Options, SubscribeOptions},
    props::{to_message_properties, MsgProps},
};

/// Handle to a running consume loop. Dropping it leaves the loop running.
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Stop the loop at its next suspension point.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Outcome of a single-handler registration.
#[derive(Debug)]
pub enum Registration {
    Started(SubscriptionHandle),
    /// A handler is already registered for this mode; nothing was started.
    AlreadyRegistered,
}

impl Registration {
    pub fn is_started(&self) -> bool {
        matches!(self, Registration::Started(_))
    }

    pub fn into_handle(self) -> Option<SubscriptionHandle> {
        match self {
            Registration::Started(handle) => Some(handle),
            Registration::AlreadyRegistered => None,
        }
    }
}

/// Publishes to and consumes from one topic for one consumer group.
///
/// Cloning is cheap and clones share listeners, error observers and
/// single-handler registrations.
#[derive(Clone)]
pub struct TopicClient {
    options: Arc<Options>,
    channels: Arc<Channels>,
    backoff: BackoffPolicy,
    messages: Arc<EventBus<Message>>,
    half_messages: Arc<EventBus<HalfMessage>>,
    message_errors: Arc<ErrorBus>,
    half_message_errors: Arc<ErrorBus>,
    consume_errors: Arc<ErrorBus>,
    message_handler: Arc<OnceLock<Handler<Message>>>,
    half_message_handler: Arc<OnceLock<Handler<HalfMessage>>>,
}

impl TopicClient {
    /// Connect to the HTTP endpoint named in `options`.
    pub fn connect(options: Options) -> Result<Self> {
        let client = MqClient::new(&options.endpoint, &options.access_key, &options.access_secret)
            .map_err(ClientError::TransportFailure)?;
        let producer = client.producer(&options.instance, &options.topic);
        let trans_producer =
            client.trans_producer(&options.instance, &options.topic, &options.group);
        let consumer = client.consumer(&options.instance, &options.topic, &options.group);
        info!(
            "Topic client for {} (group {}) on {}",
            options.topic, options.group, options.endpoint
        );
        Ok(Self::with_channels(
            options,
            Arc::new(producer),
            Arc::new(trans_producer),
            Arc::new(consumer),
        ))
    }

    /// Build a client over arbitrary channel implementations.
    pub fn with_channels(
        options: Options,
        producer: Arc<dyn Producer>,
        trans_producer: Arc<dyn TransProducer>,
        consumer: Arc<dyn Consumer>,
    ) -> Self {
        Self::from_channels(
            options,
            Arc::new(Channels {
                producer,
                trans_producer,
                consumer,
            }),
        )
    }

    pub(crate) fn from_channels(options: Options, channels: Arc<Channels>) -> Self {
        Self {
            options: Arc::new(options),
            channels,
            backoff: BackoffPolicy::default(),
            messages: Arc::new(EventBus::default()),
            half_messages: Arc::new(EventBus::default()),
            message_errors: Arc::new(ErrorBus::new("message")),
            half_message_errors: Arc::new(ErrorBus::new("half message")),
            consume_errors: Arc::new(ErrorBus::new("consume")),
            message_handler: Arc::new(OnceLock::new()),
            half_message_handler: Arc::new(OnceLock::new()),
        }
    }

    /// Replace the delay policy used between failed polls by loops started
    /// after this call.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Publish `msg` as JSON. A failed attempt is retried once with the same
    /// arguments; the second failure is returned.
    pub async fn send<T>(
        &self,
        msg: &T,
        tag: Option<&str>,
        props: Option<&MsgProps>,
    ) -> Result<PublishResponse>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_string(msg)?;
        let properties = props.map(to_message_properties).transpose()?;
        match self.publish_once(&body, tag, properties.clone()).await {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!("Publish to {} failed, retrying once: {}", self.options.topic, err);
                self.publish_once(&body, tag, properties).await
            }
        }
    }

    async fn publish_once(
        &self,
        body: &str,
        tag: Option<&str>,
        properties: Option<MessageProperties>,
    ) -> Result<PublishResponse> {
        let result = self
            .channels
            .producer
            .publish(body.to_string(), tag.map(str::to_string), properties)
            .await;
        check("publish", result)
    }

    /// Publish `msg` as a transactional half-message. Never retried.
    pub async fn send_trans<T>(
        &self,
        msg: &T,
        tag: Option<&str>,
        props: Option<&MsgProps>,
    ) -> Result<TransMessage>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_string(msg)?;
        let properties = props.map(to_message_properties).transpose()?;
        let result = self
            .channels
            .trans_producer
            .publish(body, tag.map(str::to_string), properties)
            .await;
        let response = check("transactional publish", result)?;
        let receipt_handle = response.body.receipt_handle.clone().ok_or_else(|| {
            ClientError::MissingReceiptHandle {
                message_id: response.body.message_id.clone(),
            }
        })?;
        Ok(TransMessage::new(
            Arc::clone(&self.channels),
            response.body,
            receipt_handle,
        ))
    }

    /// Acknowledge one record.
    pub async fn ack(&self, record: &MessageRecord) -> Result<ConfirmResponse> {
        let result = self
            .channels
            .consumer
            .ack_message(vec![record.receipt_handle.clone()])
            .await;
        check("ack", result)
    }

    /// Add a listener for messages delivered by [`TopicClient::subscribe`].
    /// Errors it returns are reported on the consume error channel.
    pub fn on_message<F, Fut>(&self, listener: F) -> &Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.messages.subscribe(boxed_handler(listener));
        self
    }

    /// Add a listener for half-messages delivered by
    /// [`TopicClient::subscribe_half_message`].
    pub fn on_half_message<F, Fut>(&self, listener: F) -> &Self
    where
        F: Fn(HalfMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.half_messages.subscribe(boxed_handler(listener));
        self
    }

    /// Observe failed polls of the message loops.
    pub fn on_message_error<F>(&self, observer: F) -> &Self
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.message_errors.subscribe(observer);
        self
    }

    /// Observe failed polls of the half-message loops.
    pub fn on_half_message_error<F>(&self, observer: F) -> &Self
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.half_message_errors.subscribe(observer);
        self
    }

    /// Observe handler and listener failures.
    pub fn on_consume_error<F>(&self, observer: F) -> &Self
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.consume_errors.subscribe(observer);
        self
    }

    /// Start a message loop that dispatches to every `on_message` listener.
    /// Each call starts another loop competing for the same messages.
    pub fn subscribe(&self, options: SubscribeOptions) -> SubscriptionHandle {
        if self.messages.len() == 0 {
            warn!("Subscribing to {} without message listeners", self.options.topic);
        }
        let consume_loop = self.consume_loop::<MessageFeed>(options, &self.message_errors);
        self.spawn(consume_loop.run_dispatch(Arc::clone(&self.messages)))
    }

    /// Start a half-message loop that dispatches to every `on_half_message`
    /// listener.
    pub fn subscribe_half_message(&self, options: SubscribeOptions) -> SubscriptionHandle {
        if self.half_messages.len() == 0 {
            warn!(
                "Subscribing to half messages of {} without listeners",
                self.options.topic
            );
        }
        let consume_loop =
            self.consume_loop::<HalfMessageFeed>(options, &self.half_message_errors);
        self.spawn(consume_loop.run_dispatch(Arc::clone(&self.half_messages)))
    }

    /// Register the single message handler and start its loop. Each batch is
    /// handled concurrently and fully settles before the next poll.
    pub fn on_message_sync<F, Fut>(&self, options: SubscribeOptions, handler: F) -> Registration
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        if self.message_handler.set(boxed_handler(handler)).is_err() {
            return Registration::AlreadyRegistered;
        }
        let Some(handler) = self.message_handler.get().cloned() else {
            return Registration::AlreadyRegistered;
        };
        let consume_loop = self.consume_loop::<MessageFeed>(options, &self.message_errors);
        Registration::Started(self.spawn(consume_loop.run_single(handler)))
    }

    /// Register the single half-message handler and start its loop.
    pub fn on_half_message_sync<F, Fut>(
        &self,
        options: SubscribeOptions,
        handler: F,
    ) -> Registration
    where
        F: Fn(HalfMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        if self.half_message_handler.set(boxed_handler(handler)).is_err() {
            return Registration::AlreadyRegistered;
        }
        let Some(handler) = self.half_message_handler.get().cloned() else {
            return Registration::AlreadyRegistered;
        };
        let consume_loop =
            self.consume_loop::<HalfMessageFeed>(options, &self.half_message_errors);
        Registration::Started(self.spawn(consume_loop.run_single(handler)))
    }

    fn consume_loop<F>(&self, options: SubscribeOptions, poll_errors: &Arc<ErrorBus>) -> ConsumeLoop<F>
    where
        F: Feed,
    {
        info!(
            "Starting {} loop on {}: up to {} message(s), {}s wait",
            F::NAME,
            self.options.topic,
            options.num_of_messages(),
            options.effective_wait_seconds()
        );
        ConsumeLoop::new(
            Arc::clone(&self.channels),
            options,
            self.backoff,
            Arc::clone(poll_errors),
            Arc::clone(&self.consume_errors),
        )
    }

    fn spawn<Fut>(&self, consume_loop: Fut) -> SubscriptionHandle
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        SubscriptionHandle {
            task: tokio::spawn(consume_loop),
        }
    }
}
