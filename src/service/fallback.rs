//! Fallback resolution across configured alternatives.
//!
//! Alternatives are tried in declared order. One with a cached Open status is
//! skipped without a call; the rest go through their own breaker, so a
//! degraded alternative is short-circuited like any other endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use url::Url;

use super::client::{CascadeResponse, Downstream, DownstreamRequest};
use crate::breaker::{BreakerRegistry, ExecuteError, State};
use crate::config::Alternative;
use crate::endpoint::naming;
use crate::error::CascadeError;
use crate::observability::metrics;
use crate::store::{StateStore, StoreError};

/// Tries alternatives until one answers.
pub struct FallbackResolver {
    registry: Arc<BreakerRegistry>,
    store: Arc<dyn StateStore>,
    downstream: Arc<dyn Downstream>,
}

impl FallbackResolver {
    pub fn new(
        registry: Arc<BreakerRegistry>,
        store: Arc<dyn StateStore>,
        downstream: Arc<dyn Downstream>,
    ) -> Self {
        Self {
            registry,
            store,
            downstream,
        }
    }

    /// First successful response among `alternatives`.
    ///
    /// The query string of `primary_url` is carried over to each alternative.
    pub async fn resolve(
        &self,
        alternatives: &[Alternative],
        primary_url: &str,
        body: &[u8],
        header: &BTreeMap<String, String>,
    ) -> Result<CascadeResponse, CascadeError> {
        for alt in alternatives {
            if self.is_cached_open(alt).await {
                tracing::debug!(alternative = %alt.key, "Skipping alternative with open status");
                metrics::record_short_circuit("alternative");
                continue;
            }

            let request = DownstreamRequest {
                method: alt.method.clone(),
                url: merge_query(&alt.url, primary_url),
                header: header.clone(),
                body: body.to_vec(),
            };

            let downstream = self.downstream.clone();
            let result = self
                .registry
                .execute(&alt.key, || async move { downstream.call(&request).await })
                .await;

            match result {
                Ok(mut response) => {
                    tracing::info!(alternative = %alt.key, "Served by alternative endpoint");
                    metrics::record_fallback("success");
                    response.is_from_alternative_endpoint = true;
                    return Ok(response);
                }
                Err(ExecuteError::Open) => {
                    tracing::debug!(alternative = %alt.key, "Alternative circuit breaker is open");
                }
                Err(ExecuteError::Failed(e)) => {
                    tracing::warn!(alternative = %alt.key, error = %e, "Alternative endpoint failed");
                }
            }
        }

        metrics::record_fallback("exhausted");
        Err(CascadeError::AlternativeExecutionFailed)
    }

    async fn is_cached_open(&self, alt: &Alternative) -> bool {
        match self.store.get(&naming::status_key(&alt.key)).await {
            Ok(status) => status == State::Open.as_str(),
            Err(StoreError::KeyNotFound) => false,
            Err(e) => {
                tracing::warn!(alternative = %alt.key, error = %e, "Failed to read alternative status");
                false
            }
        }
    }
}

/// Append the query pairs of `primary` to `alternative`.
///
/// Either URL failing to parse leaves `alternative` unchanged.
pub(crate) fn merge_query(alternative: &str, primary: &str) -> String {
    let (Ok(mut target), Ok(source)) = (Url::parse(alternative), Url::parse(primary)) else {
        return alternative.to_string();
    };
    if matches!(source.query(), None | Some("")) {
        return alternative.to_string();
    }
    target.query_pairs_mut().extend_pairs(source.query_pairs());
    target.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::Settings;
    use crate::endpoint::EndpointKey;
    use crate::service::client::DownstreamError;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers per host: `ok` hosts succeed, everything else is a 503.
    #[derive(Default)]
    struct HostScript {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Downstream for HostScript {
        async fn call(&self, request: &DownstreamRequest) -> Result<CascadeResponse, DownstreamError> {
            self.calls.lock().unwrap().push(request.url.clone());
            if request.url.contains("://ok") {
                Ok(CascadeResponse {
                    status: "200 OK".into(),
                    status_code: 200,
                    body: request.url.clone().into_bytes(),
                    ..Default::default()
                })
            } else {
                Err(DownstreamError::ServerError { status: 503 })
            }
        }
    }

    fn alt(url: &str) -> Alternative {
        Alternative {
            key: EndpointKey::new("GET", url).unwrap(),
            method: "GET".into(),
            url: url.into(),
        }
    }

    fn resolver(store: InMemoryStore, downstream: Arc<HostScript>) -> FallbackResolver {
        let registry = Arc::new(BreakerRegistry::new(Settings {
            failure_threshold: 1,
            open_timeout: Duration::from_secs(60),
            interval: None,
        }));
        FallbackResolver::new(registry, Arc::new(store), downstream)
    }

    #[test]
    fn test_merge_query() {
        assert_eq!(
            merge_query("http://alt/x", "http://a/x?id=7&q=a%20b"),
            "http://alt/x?id=7&q=a+b"
        );
        assert_eq!(
            merge_query("http://alt/x?v=1", "http://a/x?id=7"),
            "http://alt/x?v=1&id=7"
        );
        assert_eq!(merge_query("http://alt/x", "http://a/x"), "http://alt/x");
        assert_eq!(merge_query("not a url", "http://a/x?id=7"), "not a url");
    }

    #[tokio::test]
    async fn test_first_healthy_alternative_wins() {
        let downstream = Arc::new(HostScript::default());
        let resolver = resolver(InMemoryStore::new(), downstream.clone());

        let response = resolver
            .resolve(
                &[alt("http://down/x"), alt("http://ok1/x"), alt("http://ok2/x")],
                "http://a/x?id=1",
                b"",
                &BTreeMap::new(),
            )
            .await
            .unwrap();

        assert!(response.is_from_alternative_endpoint);
        assert_eq!(response.body, b"http://ok1/x?id=1");
        assert_eq!(
            *downstream.calls.lock().unwrap(),
            vec!["http://down/x?id=1", "http://ok1/x?id=1"]
        );
    }

    #[tokio::test]
    async fn test_cached_open_alternative_is_skipped() {
        let store = InMemoryStore::new();
        store.set("status:GET:ok1/x", "open").await.unwrap();
        let downstream = Arc::new(HostScript::default());
        let resolver = resolver(store, downstream.clone());

        let response = resolver
            .resolve(
                &[alt("http://ok1/x"), alt("http://ok2/x")],
                "http://a/x",
                b"",
                &BTreeMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.body, b"http://ok2/x");
        assert_eq!(*downstream.calls.lock().unwrap(), vec!["http://ok2/x"]);
    }

    #[tokio::test]
    async fn test_exhausted_alternatives() {
        let downstream = Arc::new(HostScript::default());
        let resolver = resolver(InMemoryStore::new(), downstream.clone());
        let alternatives = [alt("http://down/x")];

        let first = resolver
            .resolve(&alternatives, "http://a/x", b"", &BTreeMap::new())
            .await;
        assert!(matches!(first, Err(CascadeError::AlternativeExecutionFailed)));

        // Threshold of one: the alternative's own breaker is now open.
        let second = resolver
            .resolve(&alternatives, "http://a/x", b"", &BTreeMap::new())
            .await;
        assert!(matches!(second, Err(CascadeError::AlternativeExecutionFailed)));
        assert_eq!(downstream.calls.lock().unwrap().len(), 1);
    }
}
