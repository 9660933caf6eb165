//! Request identification and API request bodies.
//!
//! # Responsibilities
//! - Generate a UUID request ID unless the caller sent one
//! - Echo the ID on the response
//! - Decode API bodies into [`CascadeRequest`]
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Payload bodies travel base64-encoded inside the JSON envelope

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, Request};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};

use crate::error::CascadeError;
use crate::service::CascadeRequest;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Makes a fresh UUID v4 per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        uuid::Uuid::new_v4()
            .to_string()
            .parse()
            .ok()
            .map(RequestId::new)
    }
}

pub fn set_request_id_layer() -> SetRequestIdLayer<UuidRequestId> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), UuidRequestId)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

/// Read the request ID set by [`set_request_id_layer`].
pub trait RequestIdExt {
    fn request_id(&self) -> &str;
}

impl RequestIdExt for HeaderMap {
    fn request_id(&self) -> &str {
        self.get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }
}

/// Body of `POST /v1/request`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeneralRequestBody {
    pub method: String,
    pub url: String,
    pub header: BTreeMap<String, String>,
    /// Base64 payload.
    pub body: Option<String>,
    pub requiring_endpoint: Option<String>,
    pub requiring_method: Option<String>,
}

/// Body of the method-specific routes; the method comes from the route.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MethodRequestBody {
    pub url: String,
    pub header: BTreeMap<String, String>,
    pub body: Option<String>,
    pub requiring_endpoint: Option<String>,
    pub requiring_method: Option<String>,
}

impl MethodRequestBody {
    pub fn with_method(self, method: &str) -> GeneralRequestBody {
        GeneralRequestBody {
            method: method.to_string(),
            url: self.url,
            header: self.header,
            body: self.body,
            requiring_endpoint: self.requiring_endpoint,
            requiring_method: self.requiring_method,
        }
    }
}

impl TryFrom<GeneralRequestBody> for CascadeRequest {
    type Error = CascadeError;

    fn try_from(value: GeneralRequestBody) -> Result<Self, Self::Error> {
        let body = match value.body.as_deref() {
            None | Some("") => Vec::new(),
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(|e| CascadeError::Validation(format!("body is not valid base64: {}", e)))?,
        };
        Ok(CascadeRequest {
            method: value.method,
            url: value.url,
            header: value.header,
            body,
            requiring_endpoint: value.requiring_endpoint,
            requiring_method: value.requiring_method,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_decoding() {
        let request = CascadeRequest::try_from(GeneralRequestBody {
            method: "POST".into(),
            url: "http://a/x".into(),
            body: Some(STANDARD.encode(b"{\"k\":1}")),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(request.body, b"{\"k\":1}");

        let invalid = CascadeRequest::try_from(GeneralRequestBody {
            body: Some("***".into()),
            ..Default::default()
        });
        assert!(matches!(invalid, Err(CascadeError::Validation(_))));
    }

    #[test]
    fn test_method_route_body() {
        let general = MethodRequestBody {
            url: "http://a/x".into(),
            requiring_endpoint: Some("http://b/y".into()),
            ..Default::default()
        }
        .with_method("DELETE");
        assert_eq!(general.method, "DELETE");
        assert_eq!(general.requiring_endpoint.as_deref(), Some("http://b/y"));
    }

    #[test]
    fn test_request_id_fallback() {
        let mut headers = HeaderMap::new();
        assert_eq!(headers.request_id(), "unknown");
        headers.insert(X_REQUEST_ID, "abc".parse().unwrap());
        assert_eq!(headers.request_id(), "abc");
    }
}
