use crate::service::Publisher;
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Serialize)]
struct Accepted {
    status: &'static str,
    message: &'static str,
    timestamp: Value,
}

#[derive(Serialize)]
struct Rejected {
    status: &'static str,
    message: String,
}

/// Handler for POST /log
pub async fn log_handler(
    State(publisher): State<Arc<Publisher>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!("Received log request with body length: {}", body.len());

    match publisher.publish(&body, is_json_content_type(&headers)).await {
        Ok(receipt) => (
            StatusCode::CREATED,
            Json(Accepted {
                status: "success",
                message: "Log message queued",
                timestamp: receipt.timestamp,
            }),
        )
            .into_response(),
        Err(e) => {
            let status = if e.is_client_error() {
                warn!("Rejected log request: {e}");
                StatusCode::BAD_REQUEST
            } else {
                error!("Failed to queue log message: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (
                status,
                Json(Rejected {
                    status: "error",
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// `application/json` or any `application/*+json`, parameters ignored.
pub fn is_json_content_type(headers: &HeaderMap) -> bool {
    let Some(value) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    let mime = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    mime == "application/json"
        || (mime.starts_with("application/") && mime.ends_with("+json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type).unwrap(),
        );
        headers
    }

    #[test]
    fn test_json_content_types() {
        assert!(is_json_content_type(&headers_with("application/json")));
        assert!(is_json_content_type(&headers_with(
            "application/json; charset=utf-8"
        )));
        assert!(is_json_content_type(&headers_with("Application/JSON")));
        assert!(is_json_content_type(&headers_with(
            "application/vnd.api+json"
        )));
    }

    #[test]
    fn test_non_json_content_types() {
        assert!(!is_json_content_type(&HeaderMap::new()));
        assert!(!is_json_content_type(&headers_with("text/plain")));
        assert!(!is_json_content_type(&headers_with(
            "application/x-www-form-urlencoded"
        )));
    }
}
