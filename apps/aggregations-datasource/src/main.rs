use aggregations_datasource::{cli, config, engine, openapi, routes, services, state};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind aggregations-datasource listener on {addr}: port already in use. Stop the other service using this port or re-run with --port to choose another port.",
            );
        }
        Err(err) => Err(err)
            .with_context(|| format!("failed to bind aggregations-datasource listener on {addr}")),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    if args.print_openapi {
        println!(
            "{}",
            serde_json::to_string_pretty(&openapi::openapi_json())?
        );
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config::DatasourceConfig::from_env()?;
    let http = reqwest::Client::builder()
        .user_agent(concat!("aggregations-datasource/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build http client")?;
    let client = services::aggregations::AggregationClient::new(
        &config.api_base_url,
        http,
        config.request_timeout,
    )?;
    tracing::info!(
        api_base_url = %client.base_url(),
        timeout_secs = config.request_timeout.as_secs(),
        fallback_token = config.api_token.is_some(),
        "aggregations datasource configured"
    );

    let state = state::AppState {
        config,
        engine: engine::QueryEngine::new(client),
    };

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());
    let addr = format!("{}:{}", args.host, args.port);
    let listener = bind_listener(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
