//! JSON error responses for catnip's HTTP surface

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CatnipErrorCode {
    /// A required query parameter is missing
    MissingParameter,
    /// No O-Neko version could be found for the request
    ResolutionFailed,
    /// O-Neko refused or failed the deploy call
    DeploymentFailed,
    /// The readiness monitor had no result
    StatusUnavailable,
    /// Method not served for managed hosts
    MethodNotAllowed,
    /// Handling took longer than the request timeout
    RequestTimeout,
    /// Internal error
    InternalError,
}

impl CatnipErrorCode {
    /// Get the default HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            CatnipErrorCode::MissingParameter => StatusCode::BAD_REQUEST,
            CatnipErrorCode::ResolutionFailed => StatusCode::BAD_REQUEST,
            CatnipErrorCode::DeploymentFailed => StatusCode::BAD_REQUEST,
            CatnipErrorCode::StatusUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            CatnipErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            CatnipErrorCode::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            CatnipErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Catnip-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            CatnipErrorCode::MissingParameter => "MISSING_PARAMETER",
            CatnipErrorCode::ResolutionFailed => "RESOLUTION_FAILED",
            CatnipErrorCode::DeploymentFailed => "DEPLOYMENT_FAILED",
            CatnipErrorCode::StatusUnavailable => "STATUS_UNAVAILABLE",
            CatnipErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            CatnipErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
            CatnipErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: CatnipErrorCode,
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: CatnipErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Catnip-Error header
pub fn json_error_response(
    code: CatnipErrorCode,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let error = ErrorResponse::new(code, message);
    let body = error.to_json();

    Response::builder()
        .status(code.status_code())
        .header("Content-Type", "application/json")
        .header("X-Catnip-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}
