//! HTTP mapping of the shared error taxonomy.
//!
//! Handlers return `Result<_, ApiError>`; the conversion from the domain
//! error decides the status code and the wire shape. Internal errors never
//! leak details into the response body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use mg_domain::error::Error;

#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidRequest { .. }
            | Error::PreconditionFailed(_)
            | Error::UnsupportedFormat(_)
            | Error::NotLocal(_)
            | Error::Cancelled(_) => StatusCode::BAD_REQUEST,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) | Error::ModelNotFoundOnDisk(_) => StatusCode::NOT_FOUND,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wire-level error type string.
    fn wire_type(&self) -> &'static str {
        match &self.0 {
            Error::InvalidRequest { .. } => "invalid_request_error",
            Error::Forbidden(_) => "forbidden_access",
            other => other.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Log the detail, return a generic body.
            tracing::error!(error = %self.0, "internal error");
            "internal server error".to_owned()
        } else {
            self.0.to_string()
        };

        let mut error = serde_json::json!({
            "type": self.wire_type(),
            "message": message,
        });
        if let Error::InvalidRequest { param, .. } = &self.0 {
            error["param"] = serde_json::Value::String(param.clone());
        }

        (status, Json(serde_json::json!({ "error": error }))).into_response()
    }
}
