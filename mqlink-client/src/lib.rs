//! Topic client over the mqlink broker channels.
//!
//! A [`TopicClient`] publishes plain and transactional messages and runs
//! long-poll consume loops that hand out [`Message`] and [`HalfMessage`]
//! handles, either to every registered listener or to one registered handler.

pub mod backoff;
mod channels;
mod consume_loop;
pub mod error;
mod events;
mod message;
pub mod options;
pub mod props;
#[cfg(test)]
mod testing;
mod topic_client;

pub use backoff::BackoffPolicy;
pub use error::{ClientError, Result, SendableError};
pub use events::HandlerResult;
pub use message::{HalfMessage, Message, TransMessage};
pub use options::{Options, SubscribeOptions};
pub use props::{parse_msg_props, MsgProps};
pub use topic_client::{Registration, SubscriptionHandle, TopicClient};
