//! Axum HTTP handlers for the web server
//!
//! Provides the web service endpoint, and general metadata endpoints.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Uri, Version},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::format::{FormatFactory, DEFAULT_FORMAT};
use crate::http::transport::TransportRequest;
use crate::rpc::server::Dispatcher;
use crate::{AppState, SERVER_PATH};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub server_endpoint: &'static str,
    pub formats: Vec<&'static str>,
    pub default_format: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery() -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        server_endpoint: SERVER_PATH,
        formats: FormatFactory::names(),
        default_format: DEFAULT_FORMAT,
    })
}

pub async fn server_endpoint(
    State(state): State<AppState>,
    version: Version,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    let (request, input) = TransportRequest::from_http(version, &headers, uri.query(), body);

    Dispatcher::new(state.host.clone())
        .run(&request, input)
        .await
        .into_response()
}
