//! Downstream HTTP calls.
//!
//! # Responsibilities
//! - Perform the actual call to the requested (or alternative) endpoint
//! - Classify the result: transport errors and 5xx are failures, the rest
//!   is a response
//! - Project the response (status line, protocol, headers, body, length)
//!
//! # Design Decisions
//! - `Downstream` is a trait so the orchestrator can be driven without sockets
//! - One shared reqwest client with connection pooling and a per-call timeout

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An outgoing call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownstreamRequest {
    pub method: String,
    pub url: String,
    pub header: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// Projection of a downstream response returned to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeResponse {
    /// Status line, e.g. `200 OK`.
    pub status: String,
    pub status_code: u16,
    /// Protocol, e.g. `HTTP/1.1`.
    pub proto: String,
    pub proto_major: u8,
    pub proto_minor: u8,
    pub header: BTreeMap<String, String>,
    #[serde(skip)]
    pub body: Vec<u8>,
    /// Length announced by the server, if any.
    pub content_length: Option<u64>,
    pub is_from_alternative_endpoint: bool,
}

/// Why a downstream call counts as failed.
#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server error: {status}")]
    ServerError { status: u16 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Performs downstream calls.
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn call(&self, request: &DownstreamRequest) -> Result<CascadeResponse, DownstreamError>;
}

/// [`Downstream`] over a pooled reqwest client.
#[derive(Debug, Clone)]
pub struct HttpDownstream {
    client: reqwest::Client,
}

impl HttpDownstream {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, DownstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| DownstreamError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downstream for HttpDownstream {
    async fn call(&self, request: &DownstreamRequest) -> Result<CascadeResponse, DownstreamError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| DownstreamError::InvalidRequest(e.to_string()))?;
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| DownstreamError::InvalidRequest(e.to_string()))?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.header {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DownstreamError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(DownstreamError::ServerError {
                status: status.as_u16(),
            });
        }

        let version = response.version();
        let content_length = response.content_length();
        let header = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| DownstreamError::Transport(e.to_string()))?
            .to_vec();

        let (proto_major, proto_minor) = proto_numbers(version);
        Ok(CascadeResponse {
            status: status_line(status),
            status_code: status.as_u16(),
            proto: format!("{:?}", version),
            proto_major,
            proto_minor,
            header,
            body,
            content_length,
            is_from_alternative_endpoint: false,
        })
    }
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

fn proto_numbers(version: Version) -> (u8, u8) {
    match version {
        Version::HTTP_09 => (0, 9),
        Version::HTTP_10 => (1, 0),
        Version::HTTP_2 => (2, 0),
        Version::HTTP_3 => (3, 0),
        _ => (1, 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        assert_eq!(status_line(StatusCode::OK), "200 OK");
        assert_eq!(status_line(StatusCode::NOT_FOUND), "404 Not Found");
        assert_eq!(status_line(StatusCode::from_u16(599).unwrap()), "599");
    }

    #[test]
    fn test_proto_numbers() {
        assert_eq!(proto_numbers(Version::HTTP_11), (1, 1));
        assert_eq!(proto_numbers(Version::HTTP_2), (2, 0));
        assert_eq!(format!("{:?}", Version::HTTP_11), "HTTP/1.1");
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_sending() {
        let client = HttpDownstream::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        let bad_url = DownstreamRequest {
            method: "GET".into(),
            url: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(
            client.call(&bad_url).await,
            Err(DownstreamError::InvalidRequest(_))
        ));

        let bad_method = DownstreamRequest {
            method: "GE T".into(),
            url: "http://127.0.0.1:1/".into(),
            ..Default::default()
        };
        assert!(matches!(
            client.call(&bad_method).await,
            Err(DownstreamError::InvalidRequest(_))
        ));
    }
}
