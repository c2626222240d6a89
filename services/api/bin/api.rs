//! Main Entrypoint for the Callbridge Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Choosing the function dispatcher (an MCP tool server, or none).
//! 3. Starting the session actor with the realtime model connector.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::{Context, anyhow};
use callbridge_api::{
    config::Config,
    router::create_router,
    state::AppState,
    ws::{
        SessionManager,
        provider::{default_session_config, openai::RealtimeConnector},
    },
};
use callbridge_core::{FunctionDispatcher, FunctionRegistry, McpDispatcher};
use rmcp::{ServiceExt, transport::TokioChildProcess};
use std::{net::SocketAddr, sync::Arc};
use tokio::process::Command;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Spawns the MCP tool server named by `command_line` and connects to it.
async fn connect_tool_server(command_line: &str) -> anyhow::Result<McpDispatcher> {
    let mut parts = command_line.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| anyhow!("TOOLS_MCP_COMMAND is empty"))?;
    let mut command = Command::new(program);
    command.args(parts);

    let transport =
        TokioChildProcess::new(command).context("Failed to spawn MCP tool server")?;
    let client = ()
        .serve(transport)
        .await
        .context("Failed to initialize MCP tool server session")?;
    Ok(McpDispatcher::new(client))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Function Dispatcher ---
    let dispatcher: Arc<dyn FunctionDispatcher> = match &config.tools_mcp_command {
        Some(command_line) => {
            info!(command = %command_line, "Using MCP tool server for function calls.");
            Arc::new(connect_tool_server(command_line).await?)
        }
        None => {
            info!("No tool server configured; the model has no functions to call.");
            Arc::new(FunctionRegistry::new())
        }
    };

    // --- 4. Session Actor ---
    let connector = Arc::new(RealtimeConnector::new(config.realtime_url.clone()));
    let session = SessionManager::spawn(
        connector,
        dispatcher.clone(),
        default_session_config(&config.realtime_voice),
    );

    let app_state = Arc::new(AppState {
        session,
        dispatcher,
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        realtime_url = %config.realtime_url,
        voice = %config.realtime_voice,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
