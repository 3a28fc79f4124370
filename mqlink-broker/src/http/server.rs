use crate::{
    http::{
        types::{AckRequest, ConfirmRequest, ConsumeRequest, ErrorResponse, PublishRequest},
        REQUEST_ID_HEADER,
    },
    in_memory::InMemoryBroker,
    BrokerError, Consumer, Producer, Response as BrokerResponse, TransProducer, MESSAGE_NOT_EXIST,
};
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use log::{info, warn};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;

#[derive(Clone)]
struct AppState {
    broker: InMemoryBroker,
}

pub async fn run_server(addr: SocketAddr, broker: InMemoryBroker) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, broker).await
}

/// Serve the broker on an already bound listener.
pub async fn serve(listener: TcpListener, broker: InMemoryBroker) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!("Broker listening on {addr}");
    }
    let app = Router::new()
        .route("/publish", post(publish))
        .route("/consume", post(consume))
        .route("/consume-half", post(consume_half))
        .route("/ack", post(ack))
        .route("/commit", post(commit))
        .route("/rollback", post(rollback))
        .with_state(AppState { broker });

    axum::serve(listener, app).await
}

async fn publish(State(state): State<AppState>, Json(request): Json<PublishRequest>) -> Response {
    let channel = state.broker.channel(request.topic);
    let result = if request.transactional {
        TransProducer::publish(
            &channel,
            request.message_body,
            request.message_tag,
            request.properties,
        )
        .await
    } else {
        Producer::publish(
            &channel,
            request.message_body,
            request.message_tag,
            request.properties,
        )
        .await
    };
    respond(result, StatusCode::CREATED)
}

async fn consume(State(state): State<AppState>, Json(request): Json<ConsumeRequest>) -> Response {
    let channel = state.broker.channel(request.topic);
    let result = channel
        .consume_message(request.num_of_messages, request.wait_seconds)
        .await;
    respond(result, StatusCode::OK)
}

async fn consume_half(
    State(state): State<AppState>,
    Json(request): Json<ConsumeRequest>,
) -> Response {
    let channel = state.broker.channel(request.topic);
    let result = channel
        .consume_half_message(request.num_of_messages, request.wait_seconds)
        .await;
    respond(result, StatusCode::OK)
}

async fn ack(State(state): State<AppState>, Json(request): Json<AckRequest>) -> Response {
    let channel = state.broker.channel(request.topic);
    respond_confirm(channel.ack_message(request.receipt_handles).await)
}

async fn commit(State(state): State<AppState>, Json(request): Json<ConfirmRequest>) -> Response {
    let channel = state.broker.channel(request.topic);
    respond_confirm(channel.commit(&request.receipt_handle).await)
}

async fn rollback(State(state): State<AppState>, Json(request): Json<ConfirmRequest>) -> Response {
    let channel = state.broker.channel(request.topic);
    respond_confirm(channel.rollback(&request.receipt_handle).await)
}

fn respond<T>(result: Result<BrokerResponse<T>, BrokerError>, success: StatusCode) -> Response
where
    T: Serialize,
{
    match result {
        Ok(response) => json_response(success, response.request_id, response.body),
        Err(err) => error_response(err),
    }
}

fn respond_confirm(
    result: Result<BrokerResponse<Option<Vec<crate::ConfirmError>>>, BrokerError>,
) -> Response {
    match result {
        Ok(response) if response.is_success() => {
            with_request_id(StatusCode::NO_CONTENT.into_response(), response.request_id)
        }
        Ok(response) => {
            let status =
                StatusCode::from_u16(response.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            json_response(status, response.request_id, response.body.unwrap_or_default())
        }
        Err(err) => error_response(err),
    }
}

fn error_response(err: BrokerError) -> Response {
    match err {
        BrokerError::MessageNotExist { request_id } => json_response(
            StatusCode::NOT_FOUND,
            request_id,
            ErrorResponse::new(MESSAGE_NOT_EXIST, "no message available"),
        ),
        BrokerError::Status {
            code, request_id, ..
        } => json_response(
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            request_id,
            ErrorResponse::new("status", format!("broker status {code}")),
        ),
        other => {
            warn!("Broker request failed: {other}");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                None,
                ErrorResponse::new("internal", other.to_string()),
            )
        }
    }
}

fn json_response<T>(status: StatusCode, request_id: Option<String>, payload: T) -> Response
where
    T: Serialize,
{
    with_request_id((status, Json(payload)).into_response(), request_id)
}

fn with_request_id(mut response: Response, request_id: Option<String>) -> Response {
    if let Some(value) = request_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
