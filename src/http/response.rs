//! API responses.
//!
//! # Responsibilities
//! - Project a [`CascadeResponse`] into the JSON envelope
//! - Map [`CascadeError`] outcomes to status codes
//!
//! # Design Decisions
//! - Unavailable → 503, FailedPrecondition → 400, Internal → 500
//! - Store and bus details are not leaked to callers

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{CascadeError, Outcome};
use crate::service::CascadeResponse;

/// JSON form of a downstream response. The body is base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseBody {
    pub status: String,
    pub status_code: u16,
    pub proto: String,
    pub proto_major: u8,
    pub proto_minor: u8,
    pub header: BTreeMap<String, String>,
    pub body: String,
    pub content_length: Option<u64>,
    pub is_from_alternative_endpoint: bool,
}

impl From<CascadeResponse> for ResponseBody {
    fn from(value: CascadeResponse) -> Self {
        Self {
            status: value.status,
            status_code: value.status_code,
            proto: value.proto,
            proto_major: value.proto_major,
            proto_minor: value.proto_minor,
            header: value.header,
            body: STANDARD.encode(&value.body),
            content_length: value.content_length,
            is_from_alternative_endpoint: value.is_from_alternative_endpoint,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// A request failure rendered for the caller.
#[derive(Debug)]
pub struct ApiError(pub CascadeError);

impl From<CascadeError> for ApiError {
    fn from(err: CascadeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let outcome = self.0.outcome();
        let status = match outcome {
            Outcome::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Outcome::FailedPrecondition => StatusCode::BAD_REQUEST,
            Outcome::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self.0 {
            CascadeError::Store(_) | CascadeError::Broker(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        (
            status,
            Json(ErrorBody {
                error: message,
                code: outcome.as_str().to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CascadeError::CircuitBreakerOpen("GET:a/x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (CascadeError::Validation("url is required".into()), StatusCode::BAD_REQUEST),
            (CascadeError::AlternativeExecutionFailed, StatusCode::INTERNAL_SERVER_ERROR),
            (CascadeError::Store(StoreError::KeyNotFound), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_body_is_base64() {
        let projected = ResponseBody::from(CascadeResponse {
            status: "200 OK".into(),
            status_code: 200,
            body: b"hello".to_vec(),
            is_from_alternative_endpoint: true,
            ..Default::default()
        });
        assert_eq!(projected.body, "aGVsbG8=");
        assert!(projected.is_from_alternative_endpoint);
    }
}
