pub mod client;
pub mod server;
pub mod types;

/// Response header carrying the broker-assigned request id.
pub const REQUEST_ID_HEADER: &str = "x-mq-request-id";
