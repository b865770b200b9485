use std::sync::Arc;

use anyhow::Context;

use jobgate_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ApiConfig::from_env().context("invalid configuration")?;
    jobgate_observability::tracing::init(&jobgate_observability::LogConfig::default().with_format(config.log_format));

    let services = Arc::new(
        jobgate_api::app::services::build_services(&config)
            .await
            .context("failed to build services")?,
    );
    let app = jobgate_api::app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    services.shutdown();
    Ok(())
}
