#![forbid(unsafe_code)]

use std::sync::Arc;

use bws_adapter::{build_router, AdapterRuntime, ServiceConfig};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::from_env()?;
    init_logging(&config);

    let addr = config.bind;
    info!(
        engine_home = %config.engine_home.display(),
        work_dir = %config.work_dir.display(),
        timeout_secs = config.engine_timeout.as_secs(),
        max_pedigree_size = config.max_pedigree_size,
        "starting bws_adapter_http"
    );
    let runtime = Arc::new(AdapterRuntime::from_config(config)?);
    let app = build_router(runtime);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("bws_adapter_http listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn init_logging(config: &ServiceConfig) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(LevelFilter::from_level(config.log_level))
        .init();
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}
