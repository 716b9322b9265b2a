use anyhow::Context;

use hsync_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real deployments set the environment directly.
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    hsync_observability::init(config.log_format);

    let services = hsync_api::app::services::build_services(&config)
        .await
        .context("failed to initialise storage")?;
    tracing::info!(backend = services.backend_name(), "storage ready");

    let app = hsync_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
