use std::sync::Arc;

use loadedrest::{
    build_app,
    config::Config,
    domain::functions::builtin_registry,
    format::FormatFactory,
    host::{Principal, StaticHost},
    logging, AppState, SERVER_PATH,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;

    let host = StaticHost::new(
        config.token.clone(),
        Principal::new(config.username.clone()),
        builtin_registry(),
    )
    .with_protocol_enabled(config.protocol_enabled);
    let functions: Vec<String> = host.registry().names().map(str::to_string).collect();

    let bind_socket = config.bind_socket()?;
    let state = AppState::new(Arc::new(host));
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        endpoint = SERVER_PATH,
        protocol_enabled = config.protocol_enabled,
        formats = ?FormatFactory::names(),
        functions = ?functions,
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
