mod config;
mod endpoint;

use axum::routing::{get, post};
use axum::Router;
use config::{Config, LogFormat};
use gateway_backend::session::{spawn_reaper, SessionStore};
use gateway_core::{AgentAdapter, ProcessorConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub adapter: AgentAdapter,
    pub processor_config: ProcessorConfig,
    pub ws_buffer_size: usize,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(endpoint::sessions::create_session))
        .route("/sessions", get(endpoint::sessions::list_sessions))
        .route("/sessions/:id", get(endpoint::sessions::get_session))
        .route("/health", get(endpoint::sessions::health))
        .route("/ws", get(endpoint::ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("fatal: configuration error: {err}");
            std::process::exit(1);
        }
    };

    init_tracing(&config);

    tracing::info!(
        environment = ?config.environment,
        region = %config.aws_region,
        "starting conversational gateway"
    );

    let store = Arc::new(config.session_store());
    let adapter = AgentAdapter::connect(&config.aws_region, config.adapter_config()).await;
    let processor_config = ProcessorConfig {
        chunk_timeout: config.ws_chunk_timeout,
        stream_timeout: config.ws_stream_timeout,
    };

    let reaper_cancel = CancellationToken::new();
    let reaper_handle = spawn_reaper(
        store.clone(),
        Duration::from_secs(300),
        reaper_cancel.clone(),
    );

    let state = AppState {
        store,
        adapter,
        processor_config,
        ws_buffer_size: config.ws_buffer_size,
    };

    let app = build_router(state);
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|err| {
        tracing::error!(cause = %err, addr, "failed to bind listener");
        err
    })?;

    tracing::info!(addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper_cancel.cancel();
    let _ = reaper_handle.await;

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received, draining connections");
}
