//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, timeout, request ID)
//! - Hand each API request to the orchestrator
//! - Mount the admin API when enabled
//! - Drain on shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin;
use crate::config::schema::{AdminConfig, CascadeConfig};
use crate::error::CascadeError;
use crate::http::request::{
    propagate_request_id_layer, set_request_id_layer, GeneralRequestBody, MethodRequestBody,
    RequestIdExt,
};
use crate::http::response::{ApiError, ResponseBody};
use crate::lifecycle::ShutdownSignal;
use crate::service::{CascadeRequest, Orchestrator};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub admin: AdminConfig,
}

/// HTTP front of the breaker.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(orchestrator: Arc<Orchestrator>, config: &CascadeConfig) -> Self {
        let state = AppState {
            orchestrator,
            admin: config.admin.clone(),
        };
        let router = Self::build_router(config, state);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &CascadeConfig, state: AppState) -> Router {
        let mut router = Router::new()
            .route("/health", get(health))
            .route("/v1/request", post(general_handler))
            .route("/v1/get", post(get_handler))
            .route("/v1/post", post(post_handler))
            .route("/v1/put", post(put_handler))
            .route("/v1/delete", post(delete_handler));

        if config.admin.enabled {
            router = router.nest("/admin", admin::router(state.clone()));
        }

        router
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.listener.request_timeout_secs,
            )))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// The assembled router, for driving without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.recv().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn general_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<GeneralRequestBody>,
) -> Result<Json<ResponseBody>, ApiError> {
    dispatch(&state, &headers, body).await
}

async fn get_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MethodRequestBody>,
) -> Result<Json<ResponseBody>, ApiError> {
    dispatch(&state, &headers, body.with_method("GET")).await
}

async fn post_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MethodRequestBody>,
) -> Result<Json<ResponseBody>, ApiError> {
    dispatch(&state, &headers, body.with_method("POST")).await
}

async fn put_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MethodRequestBody>,
) -> Result<Json<ResponseBody>, ApiError> {
    dispatch(&state, &headers, body.with_method("PUT")).await
}

async fn delete_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MethodRequestBody>,
) -> Result<Json<ResponseBody>, ApiError> {
    dispatch(&state, &headers, body.with_method("DELETE")).await
}

async fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    body: GeneralRequestBody,
) -> Result<Json<ResponseBody>, ApiError> {
    let request_id = headers.request_id();
    tracing::debug!(
        request_id = %request_id,
        method = %body.method,
        url = %body.url,
        "Handling request"
    );

    let request = CascadeRequest::try_from(body)?;
    match state.orchestrator.handle(request).await {
        Ok(response) => Ok(Json(ResponseBody::from(response))),
        Err(e) => {
            if matches!(e, CascadeError::CircuitBreakerOpen(_)) {
                tracing::debug!(request_id = %request_id, error = %e, "Request short-circuited");
            } else {
                tracing::warn!(request_id = %request_id, error = %e, "Request failed");
            }
            Err(ApiError(e))
        }
    }
}
