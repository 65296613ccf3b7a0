//! HTTP API - record CRUD, live feed upgrades, health and metrics
//!
//! Routes:
//! - `POST /processed_agent_data/` store a batch of wire records, publish each
//! - `GET /processed_agent_data/` list all records
//! - `GET|PUT|DELETE /processed_agent_data/{id}`
//! - `GET /ws/{user_id}` WebSocket live feed for one identity
//! - `GET /health`, `GET /metrics`

use crate::domain::record::NewRecord;
use crate::domain::types::UserId;
use crate::infra::metrics::Metrics;
use crate::io::live_feed::LiveFeedSession;
use crate::io::prometheus;
use crate::services::store_gateway::StoreGateway;
use crate::services::subscription::SubscriptionRegistry;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{
    HeaderValue, CONNECTION, CONTENT_TYPE, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

const RESOURCE: &str = "processed_agent_data";
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Shared handles every request needs
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn StoreGateway>,
    pub registry: Arc<SubscriptionRegistry>,
    pub metrics: Arc<Metrics>,
    /// Per-listener queue depth for live feed sessions
    pub listener_queue: usize,
    /// Label on exported metrics
    pub agent: String,
}

type ApiResponse = Response<Full<Bytes>>;

#[derive(Serialize)]
struct Detail<'a> {
    detail: &'a str,
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> ApiResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_response<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> ApiResponse {
    match serde_json::to_vec(value) {
        Ok(body) => text_response(status, "application/json", body),
        Err(e) => {
            error!(error = %e, "response_encode_failed");
            internal_error()
        }
    }
}

fn detail(status: StatusCode, reason: &str) -> ApiResponse {
    json_response(status, &Detail { detail: reason })
}

fn internal_error() -> ApiResponse {
    text_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "application/json",
        r#"{"detail":"Internal Server Error"}"#,
    )
}

fn not_found() -> ApiResponse {
    detail(StatusCode::NOT_FOUND, "Not Found")
}

async fn read_body(req: Request<Incoming>) -> Result<Bytes, ApiResponse> {
    match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) => {
            debug!(error = %e, "request_body_read_failed");
            Err(detail(StatusCode::BAD_REQUEST, "Could not read request body"))
        }
    }
}

fn parse_id(raw: &str) -> Result<i64, ApiResponse> {
    raw.parse::<i64>().map_err(|_| {
        detail(StatusCode::UNPROCESSABLE_ENTITY, &format!("Invalid record id {raw:?}"))
    })
}

async fn create_records(req: Request<Incoming>, state: &ApiState) -> ApiResponse {
    let body = match read_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    let records = match NewRecord::parse_batch(&body) {
        Ok(records) => records,
        Err(e) => {
            state.metrics.record_submission(false);
            debug!(reason = %e, "submission_rejected");
            return detail(StatusCode::UNPROCESSABLE_ENTITY, &e.reason);
        }
    };

    match state.store.save(&records).await {
        Ok(saved) => {
            state.metrics.record_submission(true);
            info!(count = saved.len(), "submission_stored");
            state.registry.publish_all(&saved);
            json_response(StatusCode::CREATED, &saved)
        }
        Err(e) => {
            error!(error = %e, count = records.len(), "submission_save_failed");
            internal_error()
        }
    }
}

async fn list_records(state: &ApiState) -> ApiResponse {
    match state.store.list().await {
        Ok(records) => json_response(StatusCode::OK, &records),
        Err(e) => {
            error!(error = %e, "record_list_failed");
            internal_error()
        }
    }
}

async fn get_record(raw_id: &str, state: &ApiState) -> ApiResponse {
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.store.get(id).await {
        Ok(Some(record)) => json_response(StatusCode::OK, &record),
        Ok(None) => not_found(),
        Err(e) => {
            error!(error = %e, id = id, "record_get_failed");
            internal_error()
        }
    }
}

async fn update_record(req: Request<Incoming>, raw_id: &str, state: &ApiState) -> ApiResponse {
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let body = match read_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let record = match NewRecord::parse_one(&body) {
        Ok(record) => record,
        Err(e) => {
            state.metrics.record_submission(false);
            return detail(StatusCode::UNPROCESSABLE_ENTITY, &e.reason);
        }
    };

    match state.store.update(id, &record).await {
        Ok(Some(updated)) => json_response(StatusCode::OK, &updated),
        Ok(None) => not_found(),
        Err(e) => {
            error!(error = %e, id = id, "record_update_failed");
            internal_error()
        }
    }
}

async fn delete_record(raw_id: &str, state: &ApiState) -> ApiResponse {
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.store.delete(id).await {
        Ok(Some(deleted)) => json_response(StatusCode::OK, &deleted),
        Ok(None) => not_found(),
        Err(e) => {
            error!(error = %e, id = id, "record_delete_failed");
            internal_error()
        }
    }
}

/// Answer the WebSocket handshake and hand the upgraded connection to a session
fn upgrade_live_feed(
    mut req: Request<Incoming>,
    raw_user_id: &str,
    state: &ApiState,
    shutdown: watch::Receiver<bool>,
) -> ApiResponse {
    let user_id = match raw_user_id.parse::<i64>() {
        Ok(id) => UserId(id),
        Err(_) => {
            return detail(
                StatusCode::UNPROCESSABLE_ENTITY,
                &format!("Invalid user id {raw_user_id:?}"),
            )
        }
    };

    let wants_websocket = req
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let Some(key) = req.headers().get(SEC_WEBSOCKET_KEY).filter(|_| wants_websocket) else {
        return detail(StatusCode::BAD_REQUEST, "Expected a WebSocket upgrade request");
    };
    let accept = match HeaderValue::from_str(&derive_accept_key(key.as_bytes())) {
        Ok(accept) => accept,
        Err(e) => {
            warn!(error = %e, "websocket_accept_key_invalid");
            return internal_error();
        }
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    let session = LiveFeedSession {
        user_id,
        registry: state.registry.clone(),
        metrics: state.metrics.clone(),
        queue: state.listener_queue,
    };
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let ws =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                session.run(ws, shutdown).await;
            }
            Err(e) => warn!(user_id = %user_id, error = %e, "websocket_upgrade_failed"),
        }
    });

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ApiState>,
    shutdown: watch::Receiver<bool>,
) -> Result<ApiResponse, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let response = match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => text_response(StatusCode::OK, "text/plain", "ok"),
        (&Method::GET, ["metrics"]) => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            prometheus::render(&state.metrics, &state.agent),
        ),
        (&Method::POST, [RESOURCE]) => create_records(req, &state).await,
        (&Method::GET, [RESOURCE]) => list_records(&state).await,
        (&Method::GET, [RESOURCE, id]) => get_record(id, &state).await,
        (&Method::PUT, [RESOURCE, id]) => update_record(req, id, &state).await,
        (&Method::DELETE, [RESOURCE, id]) => delete_record(id, &state).await,
        (&Method::GET, ["ws", user_id]) => upgrade_live_feed(req, user_id, &state, shutdown),
        _ => not_found(),
    };

    debug!(method = %method, path = %path, status = response.status().as_u16(), "http_request");
    Ok(response)
}

/// Serve the API on an already-bound listener until shutdown
///
/// On shutdown every live feed session is released.
pub async fn start_api_server(
    listener: TcpListener,
    state: ApiState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = Arc::new(state);
    let addr = listener.local_addr()?;
    info!(addr = %addr, backend = state.store.backend_type(), "http_api_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();
                        let conn_shutdown = shutdown.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                handle_request(req, state.clone(), conn_shutdown.clone())
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .with_upgrades()
                                .await
                            {
                                debug!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    state.registry.close_all();
                    info!("http_api_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
