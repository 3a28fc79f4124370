//! Long-poll consume loops.
//!
//! A loop never terminates on its own. Every poll ends in one of three ways:
//! a batch (possibly empty) that is dispatched, an empty long-poll that is
//! retried immediately, or a failure that is reported on the loop's error
//! channel and retried after an exponential backoff.

use async_trait::async_trait;
use log::{debug, warn};
use mqlink_broker::{BrokerError, ConsumeResponse, MessageRecord};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::{
    backoff::BackoffPolicy,
    channels::Channels,
    error::ClientError,
    events::{ErrorBus, EventBus, Handler},
    message::{HalfMessage, Message},
    options::SubscribeOptions,
};

/// Source of records for one kind of consume loop.
#[async_trait]
pub(crate) trait Feed: Send + Sync + 'static {
    type Handle: Clone + Send + 'static;

    const NAME: &'static str;

    async fn poll(
        channels: &Channels,
        num_of_messages: u32,
        wait_seconds: u32,
    ) -> Result<ConsumeResponse, BrokerError>;

    fn wrap(channels: &Arc<Channels>, record: MessageRecord) -> Self::Handle;
}

pub(crate) struct MessageFeed;

#[async_trait]
impl Feed for MessageFeed {
    type Handle = Message;

    const NAME: &'static str = "consumer";

    async fn poll(
        channels: &Channels,
        num_of_messages: u32,
        wait_seconds: u32,
    ) -> Result<ConsumeResponse, BrokerError> {
        channels
            .consumer
            .consume_message(num_of_messages, Some(wait_seconds))
            .await
    }

    fn wrap(channels: &Arc<Channels>, record: MessageRecord) -> Message {
        Message::new(Arc::clone(channels), record)
    }
}

pub(crate) struct HalfMessageFeed;

#[async_trait]
impl Feed for HalfMessageFeed {
    type Handle = HalfMessage;

    const NAME: &'static str = "half message consumer";

    async fn poll(
        channels: &Channels,
        num_of_messages: u32,
        wait_seconds: u32,
    ) -> Result<ConsumeResponse, BrokerError> {
        channels
            .trans_producer
            .consume_half_message(num_of_messages, Some(wait_seconds))
            .await
    }

    fn wrap(channels: &Arc<Channels>, record: MessageRecord) -> HalfMessage {
        HalfMessage::new(Arc::clone(channels), record)
    }
}

enum Poll {
    Batch(Vec<MessageRecord>),
    Empty,
    Failed(ClientError),
}

pub(crate) struct ConsumeLoop<F> {
    channels: Arc<Channels>,
    options: SubscribeOptions,
    backoff: BackoffPolicy,
    poll_errors: Arc<ErrorBus>,
    consume_errors: Arc<ErrorBus>,
    consecutive_failures: u32,
    _feed: std::marker::PhantomData<F>,
}

impl<F> ConsumeLoop<F>
where
    F: Feed,
{
    pub(crate) fn new(
        channels: Arc<Channels>,
        options: SubscribeOptions,
        backoff: BackoffPolicy,
        poll_errors: Arc<ErrorBus>,
        consume_errors: Arc<ErrorBus>,
    ) -> Self {
        Self {
            channels,
            options,
            backoff,
            poll_errors,
            consume_errors,
            consecutive_failures: 0,
            _feed: std::marker::PhantomData,
        }
    }

    async fn poll(&self) -> Poll {
        let result = F::poll(
            &self.channels,
            self.options.num_of_messages(),
            self.options.effective_wait_seconds(),
        )
        .await;

        match result {
            Ok(response) if response.is_success() => Poll::Batch(response.body),
            Ok(response) => Poll::Failed(ClientError::rejected(F::NAME, &response)),
            Err(err) if err.is_message_not_exist() => Poll::Empty,
            Err(err) => Poll::Failed(ClientError::from_broker(F::NAME, err)),
        }
    }

    /// Poll once. Failures are reported and followed by the backoff delay;
    /// only a successful poll yields records.
    async fn next_batch(&mut self) -> Option<Vec<MessageRecord>> {
        match self.poll().await {
            Poll::Batch(records) => {
                self.consecutive_failures = 0;
                Some(records)
            }
            Poll::Empty => {
                self.consecutive_failures = 0;
                debug!("No {} messages available, polling again", F::NAME);
                None
            }
            Poll::Failed(err) => {
                self.poll_errors.emit(&err);
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let delay = self.backoff.delay(self.consecutive_failures);
                warn!(
                    "{} poll failed {} time(s) in a row; retrying in {:?}",
                    F::NAME,
                    self.consecutive_failures,
                    delay
                );
                tokio::time::sleep(delay).await;
                None
            }
        }
    }

    /// Event-dispatch mode: every record goes to every listener on `bus`
    /// and the loop moves on without waiting for them.
    pub(crate) async fn run_dispatch(mut self, bus: Arc<EventBus<F::Handle>>) {
        loop {
            let Some(records) = self.next_batch().await else {
                continue;
            };
            debug!("Dispatching {} {} message(s)", records.len(), F::NAME);
            for record in records {
                bus.emit(F::wrap(&self.channels, record), &self.consume_errors);
            }
        }
    }

    /// Single-handler mode: the whole batch is handled concurrently and must
    /// settle before the next poll starts.
    pub(crate) async fn run_single(mut self, handler: Handler<F::Handle>) {
        loop {
            let Some(records) = self.next_batch().await else {
                continue;
            };
            let mut in_flight = JoinSet::new();
            for record in records {
                let handle = F::wrap(&self.channels, record);
                match catch_unwind(AssertUnwindSafe(|| handler(handle))) {
                    Ok(future) => {
                        in_flight.spawn(future);
                    }
                    Err(_) => self.consume_errors.emit(&ClientError::handler_panicked()),
                }
            }
            while let Some(settled) = in_flight.join_next().await {
                match settled {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => self.consume_errors.emit(&ClientError::HandlerFailure(err)),
                    Err(join) if join.is_panic() => {
                        self.consume_errors.emit(&ClientError::handler_panicked())
                    }
                    Err(_) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SendableError;
    use crate::events::boxed_handler;
    use crate::testing::{batch, ScriptedBroker};
    use mqlink_broker::Response;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn errors() -> (Arc<ErrorBus>, Arc<Mutex<Vec<String>>>) {
        let bus = Arc::new(ErrorBus::new("test"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(move |err| sink.lock().push(err.to_string()));
        (bus, seen)
    }

    fn message_loop(
        broker: &ScriptedBroker,
        options: SubscribeOptions,
        poll_errors: &Arc<ErrorBus>,
        consume_errors: &Arc<ErrorBus>,
    ) -> ConsumeLoop<MessageFeed> {
        ConsumeLoop::new(
            broker.channels(),
            options,
            BackoffPolicy::default(),
            Arc::clone(poll_errors),
            Arc::clone(consume_errors),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_survives_mixed_poll_results() {
        let broker = ScriptedBroker::new();
        broker.push_consume(Ok(batch(&["a", "b"])));
        broker.push_consume(Ok(Response::new(500, Some("req-500".into()), Vec::new())));
        broker.push_consume(Ok(batch(&[])));
        broker.push_consume(Ok(batch(&["c"])));

        let (poll_errors, poll_seen) = errors();
        let (consume_errors, consume_seen) = errors();
        let bus: Arc<EventBus<Message>> = Arc::new(EventBus::default());
        let handles = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&handles);
        bus.subscribe(boxed_handler(move |message: Message| {
            sink.lock().push(message.receipt_handle().to_string());
            async { Ok(()) }
        }));

        let consume_loop = message_loop(
            &broker,
            SubscribeOptions::new(16, Some(1)).unwrap(),
            &poll_errors,
            &consume_errors,
        );
        let task = tokio::spawn(consume_loop.run_dispatch(Arc::clone(&bus)));
        broker.wait_until_exhausted().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*handles.lock(), vec!["a", "b", "c"]);
        assert_eq!(poll_seen.lock().len(), 1);
        assert!(poll_seen.lock()[0].contains("code: 500"));
        assert!(consume_seen.lock().is_empty());
        assert_eq!(broker.consume_calls(), 5);
        assert!(!task.is_finished());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn empty_poll_is_silent_and_immediate() {
        let broker = ScriptedBroker::new();
        broker.push_consume(Err(BrokerError::MessageNotExist { request_id: None }));
        broker.push_consume(Err(BrokerError::MessageNotExist { request_id: None }));
        broker.push_consume(Ok(batch(&["x"])));

        let (poll_errors, poll_seen) = errors();
        let (consume_errors, _) = errors();
        let bus: Arc<EventBus<Message>> = Arc::new(EventBus::default());
        let consume_loop = message_loop(
            &broker,
            SubscribeOptions::default(),
            &poll_errors,
            &consume_errors,
        );

        let started = tokio::time::Instant::now();
        let task = tokio::spawn(consume_loop.run_dispatch(bus));
        broker.wait_until_exhausted().await;

        assert!(poll_seen.lock().is_empty());
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(broker.consume_calls(), 4);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_failures_back_off_exponentially() {
        let broker = ScriptedBroker::new();
        for _ in 0..3 {
            broker.push_consume(Err(BrokerError::Transport("connection reset".into())));
        }
        broker.push_consume(Ok(batch(&[])));
        broker.push_consume(Err(BrokerError::Transport("connection reset".into())));

        let (poll_errors, poll_seen) = errors();
        let (consume_errors, _) = errors();
        let consume_loop = ConsumeLoop::<MessageFeed>::new(
            broker.channels(),
            SubscribeOptions::default(),
            BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1)),
            Arc::clone(&poll_errors),
            consume_errors,
        );

        let started = tokio::time::Instant::now();
        let task = tokio::spawn(consume_loop.run_dispatch(Arc::new(EventBus::default())));
        broker.wait_until_exhausted().await;

        // 100 + 200 + 400 ms, reset by the successful poll, then 100 ms.
        assert_eq!(started.elapsed(), Duration::from_millis(800));
        assert_eq!(poll_seen.lock().len(), 4);
        assert!(poll_seen.lock()[0].contains("transport"));
        task.abort();
    }

    async fn assert_batch_settles_before_next_poll(size: usize) {
        let broker = ScriptedBroker::new();
        let names: Vec<String> = (0..size).map(|i| format!("m{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        broker.push_consume(Ok(batch(&refs)));
        broker.push_consume(Ok(batch(&["next"])));

        let (poll_errors, _) = errors();
        let (consume_errors, consume_seen) = errors();
        let log = broker.log();
        let handler_log = Arc::clone(&log);
        let handler = boxed_handler(move |message: Message| {
            let log = Arc::clone(&handler_log);
            async move {
                let handle = message.receipt_handle().to_string();
                let index: u64 = handle.trim_start_matches('m').parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(10 * (size as u64 - index))).await;
                log.lock().push(format!("done:{handle}"));
                if index % 2 == 1 {
                    return Err(SendableError::from("odd message"));
                }
                Ok(())
            }
        });

        let consume_loop = message_loop(
            &broker,
            SubscribeOptions::new(size as u32, None).unwrap(),
            &poll_errors,
            &consume_errors,
        );
        let task = tokio::spawn(consume_loop.run_single(handler));
        broker.wait_until_exhausted().await;

        let log = log.lock().clone();
        let second_poll = log
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.as_str() == "poll")
            .nth(1)
            .map(|(position, _)| position)
            .unwrap();
        for name in &names {
            let done = log.iter().position(|e| *e == format!("done:{name}")).unwrap();
            assert!(done < second_poll, "{name} settled after the next poll: {log:?}");
        }
        assert_eq!(consume_seen.lock().len(), size / 2);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn single_handler_barrier_batch_of_one() {
        assert_batch_settles_before_next_poll(1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn single_handler_barrier_batch_of_three() {
        assert_batch_settles_before_next_poll(3).await;
    }

    #[tokio::test(start_paused = true)]
    async fn single_handler_barrier_full_batch() {
        assert_batch_settles_before_next_poll(crate::options::MAX_BATCH_SIZE as usize).await;
    }

    #[tokio::test(start_paused = true)]
    async fn single_handler_panic_is_reported() {
        let broker = ScriptedBroker::new();
        broker.push_consume(Ok(batch(&["p"])));
        let (poll_errors, _) = errors();
        let (consume_errors, consume_seen) = errors();

        async fn explode(_: Message) -> crate::events::HandlerResult {
            panic!("handler exploded")
        }
        let consume_loop = message_loop(
            &broker,
            SubscribeOptions::default(),
            &poll_errors,
            &consume_errors,
        );
        let task = tokio::spawn(consume_loop.run_single(boxed_handler(explode)));
        broker.wait_until_exhausted().await;

        assert_eq!(consume_seen.lock().len(), 1);
        assert!(consume_seen.lock()[0].contains("panicked"));
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn handler_panicking_before_its_future_keeps_loop_alive() {
        let broker = ScriptedBroker::new();
        broker.push_consume(Ok(batch(&["p", "q"])));
        broker.push_consume(Ok(batch(&["r"])));
        let (poll_errors, poll_seen) = errors();
        let (consume_errors, consume_seen) = errors();
        let handled = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&handled);
        let handler = boxed_handler(move |message: Message| {
            if message.receipt_handle() == "p" {
                panic!("handler exploded before returning a future");
            }
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(message.receipt_handle().to_string());
                Ok::<(), SendableError>(())
            }
        });

        let consume_loop = message_loop(
            &broker,
            SubscribeOptions::default(),
            &poll_errors,
            &consume_errors,
        );
        let task = tokio::spawn(consume_loop.run_single(handler));
        broker.wait_until_exhausted().await;

        assert_eq!(*handled.lock(), vec!["q", "r"]);
        assert_eq!(consume_seen.lock().len(), 1);
        assert!(consume_seen.lock()[0].contains("panicked"));
        assert!(poll_seen.lock().is_empty());
        assert_eq!(broker.consume_calls(), 3);
        assert!(!task.is_finished());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn half_message_feed_polls_trans_producer() {
        let broker = ScriptedBroker::new();
        broker.push_consume(Ok(batch(&["h1"])));
        let (poll_errors, _) = errors();
        let (consume_errors, _) = errors();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = boxed_handler(move |half: HalfMessage| {
            let sink = Arc::clone(&sink);
            async move {
                half.commit().await?;
                sink.lock().push(half.receipt_handle().to_string());
                Ok::<(), SendableError>(())
            }
        });

        let consume_loop = ConsumeLoop::<HalfMessageFeed>::new(
            broker.channels(),
            SubscribeOptions::new(2, Some(3)).unwrap(),
            BackoffPolicy::default(),
            poll_errors,
            consume_errors,
        );
        let task = tokio::spawn(consume_loop.run_single(handler));
        broker.wait_until_exhausted().await;

        assert_eq!(*seen.lock(), vec!["h1"]);
        assert_eq!(broker.commit_calls(), vec!["h1".to_string()]);
        assert_eq!(broker.half_polls(), vec![(2, Some(3)); 2]);
        task.abort();
    }
}
