use std::sync::Arc;

use axum::{middleware, routing::get, Router};

pub mod client;
pub mod config;
pub mod domain;
pub mod errors;
pub mod format;
pub mod host;
pub mod http;
pub mod logging;
pub mod rpc;
pub mod schema;

use host::Host;

pub const SERVER_PATH: &str = "/webservice/loadedrest/server";

#[derive(Clone)]
pub struct AppState {
    pub host: Arc<dyn Host>,
}

impl AppState {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { host }
    }
}

pub fn build_app(state: AppState) -> Router {
    let server = get(http::handlers::server_endpoint)
        .post(http::handlers::server_endpoint)
        .put(http::handlers::server_endpoint)
        .delete(http::handlers::server_endpoint);

    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/loadedrest", get(http::handlers::discovery))
        .route(SERVER_PATH, server)
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
