//! Mapping of gateway failures onto HTTP responses

use super::common::{INVALID_PAYLOAD_BODY, PUBLISH_FAILED_BODY};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay::RelayError;

#[derive(Debug)]
pub enum GatewayError {
    InvalidPayload(serde_json::Error),
    Publish(RelayError),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            GatewayError::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::InvalidPayload(e) => write!(f, "invalid request payload: {e}"),
            GatewayError::Publish(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// The response body never carries the underlying cause.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = match self {
            GatewayError::InvalidPayload(_) => INVALID_PAYLOAD_BODY,
            GatewayError::Publish(_) => PUBLISH_FAILED_BODY,
        };
        (self.status_code(), body).into_response()
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::InvalidPayload(err)
    }
}

impl From<RelayError> for GatewayError {
    fn from(err: RelayError) -> Self {
        GatewayError::Publish(err)
    }
}
