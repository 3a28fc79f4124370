use log::info;
use mqlink_broker::{http::server::run_server, in_memory::InMemoryBroker};
use std::{env, net::SocketAddr};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    mqlink_utilities::startup::startup("mqlink development broker")?;

    let addr: SocketAddr = env::var("MQLINK_BROKER_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:7070".into())
        .parse()?;

    let broker = InMemoryBroker::new();
    info!("Serving in-memory broker on {addr}");
    run_server(addr, broker).await?;
    Ok(())
}
