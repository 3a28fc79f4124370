use crate::{
    http::{
        types::{AckRequest, ConfirmRequest, ConsumeRequest, ErrorResponse, PublishRequest},
        REQUEST_ID_HEADER,
    },
    BrokerError, ConfirmError, ConfirmResponse, ConsumeResponse, Consumer, MessageProperties,
    MessageRecord, Producer, PublishBody, PublishResponse, ReceiptHandle, Response, TransProducer,
    MESSAGE_NOT_EXIST,
};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Added on top of the long-poll wait so the server can answer an empty poll.
const LONG_POLL_GRACE: Duration = Duration::from_secs(5);

struct ClientInner {
    client: Client,
    base_url: Url,
    access_key: String,
    access_secret: String,
}

/// HTTP connection to a broker endpoint. Hands out channels bound to one
/// instance and topic.
#[derive(Clone)]
pub struct MqClient {
    inner: Arc<ClientInner>,
}

impl MqClient {
    pub fn new(
        endpoint: &str,
        access_key: impl Into<String>,
        access_secret: impl Into<String>,
    ) -> Result<Self, BrokerError> {
        let client = Client::builder().build()?;
        Self::with_client(endpoint, access_key, access_secret, client)
    }

    /// Construct a client using a preconfigured HTTP client instance.
    pub fn with_client(
        endpoint: &str,
        access_key: impl Into<String>,
        access_secret: impl Into<String>,
        client: Client,
    ) -> Result<Self, BrokerError> {
        let mut base_url =
            Url::parse(endpoint).map_err(|err| BrokerError::InvalidEndpoint(err.to_string()))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            inner: Arc::new(ClientInner {
                client,
                base_url,
                access_key: access_key.into(),
                access_secret: access_secret.into(),
            }),
        })
    }

    pub fn producer(&self, instance_id: &str, topic: &str) -> HttpProducer {
        HttpProducer {
            channel: self.channel(instance_id, topic, None),
        }
    }

    pub fn trans_producer(&self, instance_id: &str, topic: &str, group_id: &str) -> HttpTransProducer {
        HttpTransProducer {
            channel: self.channel(instance_id, topic, Some(group_id)),
            group_id: group_id.to_string(),
        }
    }

    pub fn consumer(&self, instance_id: &str, topic: &str, group_id: &str) -> HttpConsumer {
        HttpConsumer {
            channel: self.channel(instance_id, topic, Some(group_id)),
            group_id: group_id.to_string(),
        }
    }

    fn channel(&self, instance_id: &str, topic: &str, group_id: Option<&str>) -> HttpChannel {
        HttpChannel {
            client: self.clone(),
            instance_id: instance_id.to_string(),
            topic: topic.to_string(),
            group_id: group_id.map(str::to_string),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, BrokerError> {
        self.inner
            .base_url
            .join(path)
            .map_err(|err| BrokerError::InvalidEndpoint(err.to_string()))
    }

    async fn post<B>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<(StatusCode, Option<String>, String), BrokerError>
    where
        B: Serialize + Sync,
    {
        let url = self.endpoint(path)?;
        debug!("POST {url}");
        let response = self
            .inner
            .client
            .post(url)
            .basic_auth(&self.inner.access_key, Some(&self.inner.access_secret))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let text = response.text().await?;
        Ok((status, request_id, text))
    }

    /// Issue a call whose only non-success outcomes are errors.
    async fn call<B, T>(&self, path: &str, body: &B, timeout: Duration) -> Result<Response<T>, BrokerError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let (status, request_id, text) = self.post(path, body, timeout).await?;
        if status.is_success() {
            let body = serde_json::from_str::<T>(&text)
                .map_err(|err| BrokerError::Transport(format!("undecodable {path} response: {err}")))?;
            return Ok(Response::new(status.as_u16(), request_id, body));
        }
        Err(failure(status, request_id, &text))
    }

    /// Issue an ack/commit/rollback. A rejection listing per-handle errors is
    /// returned as a non-success [`Response`] rather than an error.
    async fn confirm<B>(&self, path: &str, body: &B) -> Result<ConfirmResponse, BrokerError>
    where
        B: Serialize + Sync,
    {
        let (status, request_id, text) = self.post(path, body, REQUEST_TIMEOUT).await?;
        if status.is_success() {
            return Ok(Response::new(status.as_u16(), request_id, None));
        }
        match serde_json::from_str::<Vec<ConfirmError>>(&text) {
            Ok(errors) => Ok(Response::new(status.as_u16(), request_id, Some(errors))),
            Err(_) => Err(failure(status, request_id, &text)),
        }
    }
}

fn failure(status: StatusCode, request_id: Option<String>, text: &str) -> BrokerError {
    if let Ok(error) = serde_json::from_str::<ErrorResponse>(text) {
        if error.code == MESSAGE_NOT_EXIST {
            return BrokerError::MessageNotExist { request_id };
        }
    }
    BrokerError::Status {
        code: status.as_u16(),
        request_id,
        body: serde_json::from_str(text).ok(),
    }
}

fn long_poll_timeout(wait_seconds: Option<u32>) -> Duration {
    Duration::from_secs(u64::from(wait_seconds.unwrap_or_default())) + LONG_POLL_GRACE
}

#[derive(Clone)]
struct HttpChannel {
    client: MqClient,
    instance_id: String,
    topic: String,
    group_id: Option<String>,
}

impl HttpChannel {
    async fn publish(
        &self,
        body: String,
        tag: Option<String>,
        properties: Option<MessageProperties>,
        transactional: bool,
    ) -> Result<PublishResponse, BrokerError> {
        let request = PublishRequest {
            instance_id: self.instance_id.clone(),
            topic: self.topic.clone(),
            group_id: self.group_id.clone(),
            transactional,
            message_body: body,
            message_tag: tag,
            properties,
        };
        self.client
            .call::<_, PublishBody>("publish", &request, REQUEST_TIMEOUT)
            .await
    }

    async fn consume(
        &self,
        path: &str,
        group_id: &str,
        num_of_messages: u32,
        wait_seconds: Option<u32>,
    ) -> Result<ConsumeResponse, BrokerError> {
        let request = ConsumeRequest {
            instance_id: self.instance_id.clone(),
            topic: self.topic.clone(),
            group_id: group_id.to_string(),
            num_of_messages,
            wait_seconds,
        };
        self.client
            .call::<_, Vec<MessageRecord>>(path, &request, long_poll_timeout(wait_seconds))
            .await
    }

    fn confirm_request(&self, group_id: &str, receipt_handle: &str) -> ConfirmRequest {
        ConfirmRequest {
            instance_id: self.instance_id.clone(),
            topic: self.topic.clone(),
            group_id: group_id.to_string(),
            receipt_handle: receipt_handle.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct HttpProducer {
    channel: HttpChannel,
}

#[async_trait]
impl Producer for HttpProducer {
    async fn publish(
        &self,
        body: String,
        tag: Option<String>,
        properties: Option<MessageProperties>,
    ) -> Result<PublishResponse, BrokerError> {
        self.channel.publish(body, tag, properties, false).await
    }
}

#[derive(Clone)]
pub struct HttpTransProducer {
    channel: HttpChannel,
    group_id: String,
}

#[async_trait]
impl TransProducer for HttpTransProducer {
    async fn publish(
        &self,
        body: String,
        tag: Option<String>,
        properties: Option<MessageProperties>,
    ) -> Result<PublishResponse, BrokerError> {
        self.channel.publish(body, tag, properties, true).await
    }

    async fn consume_half_message(
        &self,
        num_of_messages: u32,
        wait_seconds: Option<u32>,
    ) -> Result<ConsumeResponse, BrokerError> {
        self.channel
            .consume("consume-half", &self.group_id, num_of_messages, wait_seconds)
            .await
    }

    async fn commit(&self, receipt_handle: &str) -> Result<ConfirmResponse, BrokerError> {
        let request = self.channel.confirm_request(&self.group_id, receipt_handle);
        self.channel.client.confirm("commit", &request).await
    }

    async fn rollback(&self, receipt_handle: &str) -> Result<ConfirmResponse, BrokerError> {
        let request = self.channel.confirm_request(&self.group_id, receipt_handle);
        self.channel.client.confirm("rollback", &request).await
    }
}

#[derive(Clone)]
pub struct HttpConsumer {
    channel: HttpChannel,
    group_id: String,
}

#[async_trait]
impl Consumer for HttpConsumer {
    async fn consume_message(
        &self,
        num_of_messages: u32,
        wait_seconds: Option<u32>,
    ) -> Result<ConsumeResponse, BrokerError> {
        self.channel
            .consume("consume", &self.group_id, num_of_messages, wait_seconds)
            .await
    }

    async fn ack_message(
        &self,
        receipt_handles: Vec<ReceiptHandle>,
    ) -> Result<ConfirmResponse, BrokerError> {
        let request = AckRequest {
            instance_id: self.channel.instance_id.clone(),
            topic: self.channel.topic.clone(),
            group_id: self.group_id.clone(),
            receipt_handles,
        };
        self.channel.client.confirm("ack", &request).await
    }
}
