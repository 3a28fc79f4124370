mod config;

use config::{parse_config, Command, PublishArgs};
use log::{error, info, warn};
use mqlink_client::{HalfMessage, Message, SendableError, SubscriptionHandle, TopicClient};

#[tokio::main]
async fn main() -> Result<(), SendableError> {
    mqlink_utilities::startup::startup("mqlink worker")?;

    let config = parse_config();
    info!("Options: {:?}", config.options);
    let client = TopicClient::connect(config.options)?;
    client
        .on_message_error(|err| warn!("Message poll failed: {}", err))
        .on_half_message_error(|err| warn!("Half message poll failed: {}", err))
        .on_consume_error(|err| error!("Handler failed: {}", err));

    match config.command {
        Command::Publish(args) => publish(&client, &args).await,
        Command::PublishTrans { publish, rollback } => {
            publish_trans(&client, &publish, rollback).await
        }
        Command::Consume(poll) => {
            let registration = client.on_message_sync(poll.subscribe_options()?, handle_message);
            run_until_interrupted(registration.into_handle()).await
        }
        Command::CheckHalf { poll, rollback } => {
            let registration = client.on_half_message_sync(
                poll.subscribe_options()?,
                move |half: HalfMessage| check_half(half, rollback),
            );
            run_until_interrupted(registration.into_handle()).await
        }
    }
}

async fn publish(client: &TopicClient, args: &PublishArgs) -> Result<(), SendableError> {
    let props = args.msg_props();
    let response = client
        .send(&args.json_body(), args.tag.as_deref(), props.as_ref())
        .await?;
    info!(
        "Published {} (md5 {}), request {}",
        response.body.message_id,
        response.body.body_md5,
        response.request_id.unwrap_or_default()
    );
    Ok(())
}

async fn publish_trans(
    client: &TopicClient,
    args: &PublishArgs,
    rollback: bool,
) -> Result<(), SendableError> {
    let props = args.msg_props();
    let trans = client
        .send_trans(&args.json_body(), args.tag.as_deref(), props.as_ref())
        .await?;
    info!(
        "Published half message {} with receipt handle {}",
        trans.message_id(),
        trans.receipt_handle()
    );
    if rollback {
        trans.rollback().await?;
        info!("Rolled back {}", trans.message_id());
    } else {
        trans.commit().await?;
        info!("Committed {}", trans.message_id());
    }
    Ok(())
}

async fn handle_message(message: Message) -> Result<(), SendableError> {
    let record = message.record();
    info!(
        "Received {} (tag '{}', delivery {}): {}",
        record.id, record.tag, record.consumed_times, record.body
    );
    message.done().await?;
    Ok(())
}

async fn check_half(half: HalfMessage, rollback: bool) -> Result<(), SendableError> {
    let record = half.record();
    if rollback {
        info!("Rolling back half message {}", record.id);
        half.rollback().await?;
    } else {
        info!("Committing half message {}", record.id);
        half.commit().await?;
    }
    Ok(())
}

async fn run_until_interrupted(handle: Option<SubscriptionHandle>) -> Result<(), SendableError> {
    let Some(handle) = handle else {
        warn!("A handler is already registered; nothing to run");
        return Ok(());
    };
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping consumer...");
    handle.abort();
    Ok(())
}
