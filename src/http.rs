//! Thin HTTP ingress: `/push` accepts a task submission over JSON or
//! msgpack, `/result` polls a single result record. Business logic rides
//! entirely on [`Manager`]; this module adds no queueing semantics.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::codec::Value;
use crate::manager::{Manager, PushOptions};
use crate::task::Retry;

/// `{error, message}` body, matching the original WSGI app's error shape.
struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
        }
    }

    fn bad_params(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad-params", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        respond(
            self.status,
            &serde_json::json!({ "error": self.error, "message": self.message }),
            None,
        )
    }
}

/// Body accepted by `POST /push`, mirroring [`PushOptions`] field-for-field.
#[derive(Debug, Deserialize)]
struct PushRequest {
    queue: Option<String>,
    name: Option<String>,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    kwargs: std::collections::HashMap<String, Value>,
    meta: Option<std::collections::HashMap<String, Value>>,
    ttl: Option<u64>,
    eta: Option<f64>,
    delay: Option<u64>,
    dead: Option<String>,
    retry: Option<Retry>,
    retry_delay: Option<u64>,
    timeout: Option<u64>,
    keep_result: Option<u64>,
}

#[derive(Serialize)]
struct PushResponse {
    id: String,
}

#[derive(Deserialize)]
struct ResultQuery {
    id: Option<String>,
}

fn wants_msgpack(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/x-msgpack"))
        .unwrap_or(false)
}

fn respond(status: StatusCode, value: &impl Serialize, msgpack: Option<bool>) -> Response {
    if msgpack.unwrap_or(false) {
        match crate::codec::encode(value) {
            Ok(bytes) => (
                status,
                [(header::CONTENT_TYPE, "application/x-msgpack")],
                bytes,
            )
                .into_response(),
            Err(e) => {
                error!(error = %e, "failed to encode msgpack response");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    } else {
        (
            status,
            [(header::CONTENT_TYPE, "application/json; charset=UTF-8")],
            serde_json::to_vec(value).unwrap_or_default(),
        )
            .into_response()
    }
}

async fn push(
    State(manager): State<Arc<Manager>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let msgpack = wants_msgpack(&headers);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_string();

    let task: PushRequest = match content_type.as_str() {
        "application/json" => match serde_json::from_slice(&body) {
            Ok(t) => t,
            Err(_) => {
                return ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "invalid-encoding",
                    "Can't decode body",
                )
                .into_response()
            }
        },
        "application/x-msgpack" => match crate::codec::decode(&body) {
            Ok(t) => t,
            Err(_) => {
                return ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "invalid-encoding",
                    "Can't decode body",
                )
                .into_response()
            }
        },
        _ => {
            return ApiError::new(
                StatusCode::BAD_REQUEST,
                "invalid-content-type",
                "Content must be json or msgpack",
            )
            .into_response()
        }
    };

    let Some(queue) = task.queue.filter(|q| !q.is_empty()) else {
        return ApiError::bad_params("queue required").into_response();
    };
    let Some(name) = task.name.filter(|n| !n.is_empty()) else {
        return ApiError::bad_params("name required").into_response();
    };

    let opts = PushOptions {
        queue: Some(queue),
        name,
        args: task.args,
        kwargs: task.kwargs,
        meta: task.meta,
        ttl: task.ttl,
        eta: task.eta,
        delay: task.delay,
        dead: task.dead,
        retry: task.retry,
        retry_delay: task.retry_delay,
        timeout: task.timeout,
        keep_result: task.keep_result,
    };

    match manager.push(opts).await {
        Ok(result) => respond(StatusCode::OK, &PushResponse { id: result.id }, Some(msgpack)),
        Err(e) => {
            error!(error = %e, "push failed");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal-error", e.to_string())
                .into_response()
        }
    }
}

async fn result(
    State(manager): State<Arc<Manager>>,
    headers: HeaderMap,
    Query(query): Query<ResultQuery>,
) -> Response {
    let msgpack = wants_msgpack(&headers);
    let Some(id) = query.id.filter(|i| !i.is_empty()) else {
        return ApiError::bad_params("id required").into_response();
    };

    match manager.result_store().get(&id).await {
        Ok(record) => respond(StatusCode::OK, &record, Some(msgpack)),
        Err(e) => {
            error!(error = %e, "result lookup failed");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal-error", e.to_string())
                .into_response()
        }
    }
}

async fn not_found(headers: HeaderMap) -> Response {
    let msgpack = wants_msgpack(&headers);
    respond(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": "not-found", "message": "Not found" }),
        Some(msgpack),
    )
}

/// The ingress router, mounted by the CLI's `http` subcommand.
pub fn router(manager: Arc<Manager>) -> Router {
    Router::new()
        .route("/push", post(push))
        .route("/result", get(result))
        .fallback(not_found)
        .with_state(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wants_msgpack_checks_accept_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, "application/x-msgpack".parse().unwrap());
        assert!(wants_msgpack(&headers));

        let empty = HeaderMap::new();
        assert!(!wants_msgpack(&empty));
    }
}
