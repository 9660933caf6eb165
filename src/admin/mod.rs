//! Read-only admin API, mounted under `/admin`.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/breakers", get(get_breakers))
        .route("/subscriptions", get(get_subscriptions))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
