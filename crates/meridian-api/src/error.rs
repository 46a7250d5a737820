//! HTTP error responses
//!
//! Every failure leaves the API as `{"kind", "message", "code"}`. Partial
//! failures add the resources needing reconciliation and backend errors add
//! the model server's status and body.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, error};

use meridian_common::Error;

/// Result type for handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// [`Error`] as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::validation(format!(
            "invalid request body: {}",
            rejection.body_text()
        )))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(Error::validation(format!(
            "invalid query string: {}",
            rejection.body_text()
        )))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let code = err.status_code();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(kind = err.kind(), error = %err, "request failed");
        } else {
            debug!(kind = err.kind(), error = %err, "request rejected");
        }

        let mut body = json!({
            "kind": err.kind(),
            "message": err.to_string(),
            "code": code,
        });
        match &err {
            Error::PartialFailure { resources, .. } => {
                body["resources"] = json!(resources);
            }
            Error::Backend {
                status: backend_status,
                body: backend_body,
            } => {
                body["backendStatus"] = json!(backend_status);
                body["backendBody"] = json!(backend_body);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}
