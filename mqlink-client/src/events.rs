//! Per-client listener registries for messages and errors.

use log::error;
use parking_lot::RwLock;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{ClientError, SendableError};

pub type HandlerResult = Result<(), SendableError>;
pub(crate) type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
pub(crate) type Handler<T> = Arc<dyn Fn(T) -> HandlerFuture + Send + Sync>;
type ErrorObserver = Arc<dyn Fn(&ClientError) + Send + Sync>;

pub(crate) fn boxed_handler<T, F, Fut>(handler: F) -> Handler<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |item| Box::pin(handler(item)) as HandlerFuture)
}

/// Multi-subscriber channel for one kind of message handle.
pub(crate) struct EventBus<T> {
    listeners: RwLock<Vec<Handler<T>>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<T> EventBus<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn subscribe(&self, handler: Handler<T>) {
        self.listeners.write().push(handler);
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Hand `item` to every listener in registration order without waiting
    /// for them. Failures and panics are reported on `failures`.
    pub(crate) fn emit(&self, item: T, failures: &Arc<ErrorBus>) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            let future = match catch_unwind(AssertUnwindSafe(|| listener(item.clone()))) {
                Ok(future) => future,
                Err(_) => {
                    failures.emit(&ClientError::handler_panicked());
                    continue;
                }
            };
            let failures = Arc::clone(failures);
            tokio::spawn(async move {
                match tokio::spawn(future).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => failures.emit(&ClientError::HandlerFailure(err)),
                    Err(join) if join.is_panic() => failures.emit(&ClientError::handler_panicked()),
                    Err(_) => {}
                }
            });
        }
    }
}

/// Observers of one error channel. With no observer registered, errors are
/// logged so they are never silently dropped.
pub(crate) struct ErrorBus {
    name: &'static str,
    observers: RwLock<Vec<ErrorObserver>>,
}

impl ErrorBus {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.observers.write().push(Arc::new(observer));
    }

    pub(crate) fn emit(&self, err: &ClientError) {
        let observers = self.observers.read().clone();
        if observers.is_empty() {
            error!("Unobserved {} error: {}", self.name, err);
            return;
        }
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(err))).is_err() {
                error!("{} observer panicked while handling: {}", self.name, err);
            }
        }
    }
}
